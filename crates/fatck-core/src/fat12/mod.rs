/// FAT12 file system support
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use thiserror::Error;

// Sub-modules
pub mod check;
pub mod directory;
pub mod fat;

/// Boot sector size in bytes
pub const BOOT_SECTOR_SIZE: usize = 512;

/// Boot sector signature at offset 510
const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];

/// Largest data-cluster count a FAT12 volume can address
const FAT12_MAX_CLUSTERS: u32 = 4084;

/// Geometry validation failure; fatal, the checker never runs against an
/// unvalidated volume.
#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("boot sector read failed")]
    Io(#[from] std::io::Error),
    #[error("boot sector truncated: {0} bytes")]
    Truncated(usize),
    #[error("missing boot signature 0x55AA (found {0:#04x}{1:02x})")]
    BadSignature(u8, u8),
    #[error("unsupported bytes per sector: {0}")]
    BadBytesPerSector(u16),
    #[error("sectors per cluster must be a nonzero power of two, got {0}")]
    BadSectorsPerCluster(u8),
    #[error("volume declares no FAT copies")]
    NoFats,
    #[error("volume declares no root directory entries")]
    NoRootEntries,
    #[error("volume layout exceeds its declared sector count")]
    LayoutOverflow,
    #[error("{0} data clusters is out of FAT12 range")]
    NotFat12(u32),
    #[error("FAT too small: {capacity} entries for {needed} clusters")]
    FatTooSmall { capacity: u32, needed: u32 },
    #[error("image is {actual} bytes but geometry needs {expected}")]
    ImageTruncated { expected: u64, actual: u64 },
}

/// FAT12 boot sector / BIOS parameter block (raw fields)
#[derive(Debug)]
pub struct BootSector {
    pub jump_boot: [u8; 3],
    pub oem_name: [u8; 8],
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub fat_count: u8,
    pub root_entries: u16,
    pub total_sectors_16: u16,
    pub media_descriptor: u8,
    pub sectors_per_fat: u16,
    pub total_sectors_32: u32,
}

impl BootSector {
    /// Parse a FAT12 boot sector from raw bytes
    pub fn parse(data: &[u8]) -> Result<Self, GeometryError> {
        if data.len() < BOOT_SECTOR_SIZE {
            return Err(GeometryError::Truncated(data.len()));
        }

        if data[510..512] != BOOT_SIGNATURE {
            return Err(GeometryError::BadSignature(data[510], data[511]));
        }

        let mut cursor = Cursor::new(data);

        let mut jump_boot = [0u8; 3];
        std::io::Read::read_exact(&mut cursor, &mut jump_boot)?;
        let mut oem_name = [0u8; 8];
        std::io::Read::read_exact(&mut cursor, &mut oem_name)?;

        let bytes_per_sector = cursor.read_u16::<LittleEndian>()?;
        let sectors_per_cluster = cursor.read_u8()?;
        let reserved_sectors = cursor.read_u16::<LittleEndian>()?;
        let fat_count = cursor.read_u8()?;
        let root_entries = cursor.read_u16::<LittleEndian>()?;
        let total_sectors_16 = cursor.read_u16::<LittleEndian>()?;
        let media_descriptor = cursor.read_u8()?;
        let sectors_per_fat = cursor.read_u16::<LittleEndian>()?;
        cursor.set_position(32);
        let total_sectors_32 = cursor.read_u32::<LittleEndian>()?;

        Ok(BootSector {
            jump_boot,
            oem_name,
            bytes_per_sector,
            sectors_per_cluster,
            reserved_sectors,
            fat_count,
            root_entries,
            total_sectors_16,
            media_descriptor,
            sectors_per_fat,
            total_sectors_32,
        })
    }

    /// Total sector count, whichever of the 16/32-bit fields is in use
    pub fn total_sectors(&self) -> u32 {
        if self.total_sectors_16 != 0 {
            self.total_sectors_16 as u32
        } else {
            self.total_sectors_32
        }
    }

    /// Validate the BPB against FAT12 constraints and the actual image size,
    /// producing the derived geometry the checker works from.
    pub fn geometry(&self, image_len: u64) -> Result<Geometry, GeometryError> {
        if !matches!(self.bytes_per_sector, 512 | 1024 | 2048 | 4096) {
            return Err(GeometryError::BadBytesPerSector(self.bytes_per_sector));
        }
        if self.sectors_per_cluster == 0 || !self.sectors_per_cluster.is_power_of_two() {
            return Err(GeometryError::BadSectorsPerCluster(self.sectors_per_cluster));
        }
        if self.fat_count == 0 {
            return Err(GeometryError::NoFats);
        }
        if self.root_entries == 0 {
            return Err(GeometryError::NoRootEntries);
        }

        let geo = Geometry {
            bytes_per_sector: self.bytes_per_sector as u32,
            sectors_per_cluster: self.sectors_per_cluster as u32,
            reserved_sectors: self.reserved_sectors as u32,
            fat_count: self.fat_count as u32,
            sectors_per_fat: self.sectors_per_fat as u32,
            root_entries: self.root_entries as u32,
            total_sectors: self.total_sectors(),
        };

        if geo.data_start_sector() >= geo.total_sectors {
            return Err(GeometryError::LayoutOverflow);
        }

        let clusters = geo.cluster_count();
        if clusters == 0 || clusters > FAT12_MAX_CLUSTERS {
            return Err(GeometryError::NotFat12(clusters));
        }

        // Entries 0 and 1 are reserved, so the table must hold two more
        // entries than there are data clusters.
        let capacity = geo.fat_bytes() as u32 * 2 / 3;
        if capacity < clusters + 2 {
            return Err(GeometryError::FatTooSmall {
                capacity,
                needed: clusters + 2,
            });
        }

        let expected = geo.total_sectors as u64 * geo.bytes_per_sector as u64;
        if image_len < expected {
            return Err(GeometryError::ImageTruncated {
                expected,
                actual: image_len,
            });
        }

        Ok(geo)
    }
}

/// Derived FAT12 volume geometry.
///
/// Read-only to the checker core; every byte offset it touches is computed
/// here.
#[derive(Debug, Clone, Copy)]
pub struct Geometry {
    pub bytes_per_sector: u32,
    pub sectors_per_cluster: u32,
    pub reserved_sectors: u32,
    pub fat_count: u32,
    pub sectors_per_fat: u32,
    pub root_entries: u32,
    pub total_sectors: u32,
}

impl Geometry {
    /// Bytes per cluster
    pub fn cluster_size(&self) -> u32 {
        self.bytes_per_sector * self.sectors_per_cluster
    }

    /// Byte offset of FAT copy `copy` (0-based)
    pub fn fat_offset(&self, copy: u32) -> u64 {
        (self.reserved_sectors + copy * self.sectors_per_fat) as u64
            * self.bytes_per_sector as u64
    }

    /// Size of one FAT copy in bytes
    pub fn fat_bytes(&self) -> usize {
        (self.sectors_per_fat * self.bytes_per_sector) as usize
    }

    /// Byte offset of the fixed root directory array
    pub fn root_dir_offset(&self) -> u64 {
        (self.reserved_sectors + self.fat_count * self.sectors_per_fat) as u64
            * self.bytes_per_sector as u64
    }

    /// First sector of the data region (root directory rounded up to a
    /// sector boundary)
    fn data_start_sector(&self) -> u32 {
        let root_sectors =
            (self.root_entries * directory::ENTRY_SIZE as u32).div_ceil(self.bytes_per_sector);
        self.reserved_sectors + self.fat_count * self.sectors_per_fat + root_sectors
    }

    /// Byte offset of the data region (cluster 2)
    pub fn data_offset(&self) -> u64 {
        self.data_start_sector() as u64 * self.bytes_per_sector as u64
    }

    /// Number of data clusters on the volume
    pub fn cluster_count(&self) -> u32 {
        (self.total_sectors - self.data_start_sector()) / self.sectors_per_cluster
    }

    /// Highest valid data-cluster index (clusters 0 and 1 are reserved)
    pub fn max_cluster(&self) -> u16 {
        (self.cluster_count() + 1) as u16
    }

    /// Whether `cluster` is a currently-valid data-cluster index
    pub fn is_valid_cluster(&self, cluster: u16) -> bool {
        cluster >= fat::FIRST_CLUSTER && cluster <= self.max_cluster()
    }

    /// Byte offset of a data cluster
    pub fn cluster_to_offset(&self, cluster: u16) -> u64 {
        self.data_offset() + (cluster - fat::FIRST_CLUSTER) as u64 * self.cluster_size() as u64
    }
}

/// Get human-readable FAT12 volume information
pub fn volume_info(boot: &BootSector, geo: &Geometry) -> String {
    format!(
        "FAT12 File System\n\
         - OEM Name: {}\n\
         - Bytes per Sector: {}\n\
         - Sectors per Cluster: {}\n\
         - Bytes per Cluster: {}\n\
         - Reserved Sectors: {}\n\
         - FAT Copies: {}\n\
         - Sectors per FAT: {}\n\
         - Root Directory Entries: {}\n\
         - Total Sectors: {}\n\
         - Data Clusters: {}\n\
         - Media Descriptor: 0x{:02X}",
        String::from_utf8_lossy(&boot.oem_name).trim_end(),
        geo.bytes_per_sector,
        geo.sectors_per_cluster,
        geo.cluster_size(),
        geo.reserved_sectors,
        geo.fat_count,
        geo.sectors_per_fat,
        geo.root_entries,
        geo.total_sectors,
        geo.cluster_count(),
        boot.media_descriptor,
    )
}
