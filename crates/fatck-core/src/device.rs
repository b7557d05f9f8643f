/// Memory-mapped volume image access
use anyhow::Result;
use memmap2::MmapOptions;
use std::fs::OpenOptions;
use std::path::Path;

/// A memory-mapped volume image, writable in place.
///
/// All cluster and directory-record access in the checker goes through the
/// bounds-checked accessors here rather than raw offset arithmetic.
pub struct VolumeImage {
    _file: std::fs::File,
    mmap: memmap2::MmapMut,
}

impl VolumeImage {
    /// Open a volume image read-write and map it into memory
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())?;

        let mmap = unsafe { MmapOptions::new().map_mut(&file)? };

        Ok(VolumeImage { _file: file, mmap })
    }

    /// Get the size of the image in bytes
    pub fn len(&self) -> u64 {
        self.mmap.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Read a slice of bytes from the image
    pub fn bytes(&self, offset: u64, length: usize) -> Result<&[u8]> {
        let start = offset as usize;
        let end = start + length;

        if end > self.mmap.len() {
            anyhow::bail!("Read beyond end of image: {} > {}", end, self.mmap.len());
        }

        Ok(&self.mmap[start..end])
    }

    /// Borrow a slice of bytes for in-place mutation
    pub fn bytes_mut(&mut self, offset: u64, length: usize) -> Result<&mut [u8]> {
        let start = offset as usize;
        let end = start + length;

        if end > self.mmap.len() {
            anyhow::bail!("Write beyond end of image: {} > {}", end, self.mmap.len());
        }

        Ok(&mut self.mmap[start..end])
    }

    /// Flush outstanding changes back to the underlying file
    pub fn flush(&self) -> Result<()> {
        self.mmap.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_bounds_checked_access() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[0xAAu8; 64]).unwrap();
        tmp.flush().unwrap();

        let mut img = VolumeImage::open(tmp.path()).unwrap();
        assert_eq!(img.len(), 64);
        assert_eq!(img.bytes(0, 4).unwrap(), &[0xAA; 4]);
        assert!(img.bytes(60, 8).is_err());
        assert!(img.bytes_mut(64, 1).is_err());
    }

    #[test]
    fn test_mutation_persists() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[0u8; 32]).unwrap();
        tmp.flush().unwrap();

        {
            let mut img = VolumeImage::open(tmp.path()).unwrap();
            img.bytes_mut(8, 2).unwrap().copy_from_slice(&[0xDE, 0xAD]);
            img.flush().unwrap();
        }

        let contents = std::fs::read(tmp.path()).unwrap();
        assert_eq!(&contents[8..10], &[0xDE, 0xAD]);
    }
}
