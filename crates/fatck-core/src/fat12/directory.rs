//! FAT12 directory record parsing and in-place editing
//!
//! Records are 32 bytes: 8-byte space-padded name, 3-byte extension,
//! attribute bitmask, 16-bit start cluster, 32-bit size. The first name byte
//! doubles as a slot sentinel:
//! - 0x00: empty, no further entries in this directory
//! - 0xE5: deleted, slot reusable
//! - 0x2E: dot / dot-dot pseudo-entry

use anyhow::Result;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Directory record size in bytes
pub const ENTRY_SIZE: usize = 32;

/// Slot sentinels in the first name byte
pub const SLOT_EMPTY: u8 = 0x00;
pub const SLOT_DELETED: u8 = 0xE5;
const DOT_MARKER: u8 = 0x2E;

/// Attribute bits
pub const ATTR_NORMAL: u8 = 0x00;
pub const ATTR_READ_ONLY: u8 = 0x01;
pub const ATTR_HIDDEN: u8 = 0x02;
pub const ATTR_SYSTEM: u8 = 0x04;
pub const ATTR_VOLUME_LABEL: u8 = 0x08;
pub const ATTR_DIRECTORY: u8 = 0x10;
pub const ATTR_ARCHIVE: u8 = 0x20;
/// All four low bits at once marks a long-file-name fragment
pub const ATTR_LONG_NAME: u8 = 0x0F;

/// Byte offsets of the fields the checker rewrites
const OFFSET_START_CLUSTER: usize = 26;
const OFFSET_SIZE: usize = 28;

/// What role a raw record plays, in the priority order the traverser
/// dispatches on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// End of entries in this directory
    Empty,
    /// Deleted; skip, slot reusable
    Deleted,
    /// "." or ".." pseudo-entry
    Dot,
    /// Long-file-name fragment, not a real file
    LongName,
    /// Volume label; informational only
    VolumeLabel,
    /// Subdirectory with the hidden bit set; not entered
    HiddenDirectory,
    /// Subdirectory to recurse into
    Directory,
    /// Regular file, subject to the size check
    File,
}

/// Parsed directory record
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub raw_name: [u8; 8],
    pub raw_ext: [u8; 3],
    pub attributes: u8,
    pub start_cluster: u16,
    pub size: u32,
}

impl DirEntry {
    /// Parse a single 32-byte directory record
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < ENTRY_SIZE {
            anyhow::bail!("Insufficient data for directory record");
        }

        let mut cursor = Cursor::new(data);

        let mut raw_name = [0u8; 8];
        std::io::Read::read_exact(&mut cursor, &mut raw_name)?;
        let mut raw_ext = [0u8; 3];
        std::io::Read::read_exact(&mut cursor, &mut raw_ext)?;
        let attributes = cursor.read_u8()?;

        cursor.set_position(OFFSET_START_CLUSTER as u64);
        let start_cluster = cursor.read_u16::<LittleEndian>()?;
        let size = cursor.read_u32::<LittleEndian>()?;

        Ok(DirEntry {
            raw_name,
            raw_ext,
            attributes,
            start_cluster,
            size,
        })
    }

    /// Classify the record for dispatch
    pub fn kind(&self) -> EntryKind {
        match self.raw_name[0] {
            SLOT_EMPTY => return EntryKind::Empty,
            SLOT_DELETED => return EntryKind::Deleted,
            DOT_MARKER => return EntryKind::Dot,
            _ => {}
        }

        if self.attributes & ATTR_LONG_NAME == ATTR_LONG_NAME {
            EntryKind::LongName
        } else if self.attributes & ATTR_VOLUME_LABEL != 0 {
            EntryKind::VolumeLabel
        } else if self.attributes & ATTR_DIRECTORY != 0 {
            if self.attributes & ATTR_HIDDEN != 0 {
                EntryKind::HiddenDirectory
            } else {
                EntryKind::Directory
            }
        } else {
            EntryKind::File
        }
    }

    /// Human-readable "NAME.EXT" with the space padding removed
    pub fn name(&self) -> String {
        let mut name = String::new();

        for &byte in &self.raw_name {
            if byte == b' ' || byte == 0 {
                break;
            }
            name.push(byte as char);
        }

        let base_len = name.len();
        for &byte in &self.raw_ext {
            if byte == b' ' || byte == 0 {
                break;
            }
            if name.len() == base_len {
                name.push('.');
            }
            name.push(byte as char);
        }

        name
    }
}

/// Format a synthetic filename into the on-disk 11-byte name field.
///
/// Uppercased; base names longer than 8 characters are truncated. Returns
/// true in the second position when no extension was supplied and the
/// placeholder was used.
pub fn format_83_name(filename: &str) -> ([u8; 11], bool) {
    let mut field = [b' '; 11];
    let upper = filename.to_uppercase();
    let mut parts = upper.splitn(2, '.');

    let base = parts.next().unwrap_or("");
    for (i, byte) in base.bytes().enumerate().take(8) {
        field[i] = byte;
    }

    let mut defaulted = false;
    match parts.next().filter(|e| !e.is_empty()) {
        Some(ext) => {
            for (i, byte) in ext.bytes().enumerate().take(3) {
                field[8 + i] = byte;
            }
        }
        None => {
            field[8..11].copy_from_slice(b"___");
            defaulted = true;
        }
    }

    (field, defaulted)
}

/// Populate a slot with a fresh plain-file record
pub fn write_file_entry(slot: &mut [u8], name_field: &[u8; 11], start_cluster: u16, size: u32) {
    slot[..ENTRY_SIZE].fill(0);
    slot[..11].copy_from_slice(name_field);
    slot[11] = ATTR_NORMAL;
    set_start_cluster(slot, start_cluster);
    set_size(slot, size);
}

/// Zero a record back to the empty sentinel
pub fn wipe_entry(slot: &mut [u8]) {
    slot[..ENTRY_SIZE].fill(0);
}

/// Rewrite the 32-bit size field in place
pub fn set_size(slot: &mut [u8], size: u32) {
    slot[OFFSET_SIZE..OFFSET_SIZE + 4].copy_from_slice(&size.to_le_bytes());
}

/// Rewrite the 16-bit start-cluster field in place
pub fn set_start_cluster(slot: &mut [u8], cluster: u16) {
    slot[OFFSET_START_CLUSTER..OFFSET_START_CLUSTER + 2].copy_from_slice(&cluster.to_le_bytes());
}
