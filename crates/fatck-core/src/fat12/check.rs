//! FAT12 consistency check and repair engine
//!
//! One pass over the volume:
//! 1. Walk the directory tree from the fixed root array, checking every
//!    regular file's declared size against its actual cluster chain and
//!    repairing disagreements in place, marking every reachable cluster.
//! 2. Sweep the FAT for allocated chains nothing references and reattach
//!    them under synthetic `found<N>.dat` root entries.
//!
//! The image buffer is mutated through a single exclusive borrow; traversal
//! completes before the sweep so live chains are never misread as orphans.

use anyhow::Result;

use super::directory::{self, DirEntry, EntryKind};
use super::fat::{self, ChainWalk};
use super::Geometry;
use crate::device::VolumeImage;
use crate::report::{CheckReport, Finding, Repair};

/// Recursion ceiling for corrupted directory trees; real FAT12 volumes are
/// nowhere near this deep.
const MAX_DIR_DEPTH: usize = 64;

/// Check run options
#[derive(Debug, Clone, Copy)]
pub struct CheckOptions {
    /// Write repairs back to the image; false reports findings only
    pub repair: bool,
}

impl Default for CheckOptions {
    fn default() -> Self {
        CheckOptions { repair: true }
    }
}

/// The consistency checker, owning all per-run state.
///
/// The used-cluster set is sized by the volume geometry and lives here, not
/// in process-wide state, so independent volumes get independent runs.
pub struct Checker<'a> {
    img: &'a mut VolumeImage,
    geo: Geometry,
    used: Vec<bool>,
    report: CheckReport,
    opts: CheckOptions,
}

impl<'a> Checker<'a> {
    pub fn new(img: &'a mut VolumeImage, geo: Geometry, opts: CheckOptions) -> Self {
        let used = vec![false; geo.max_cluster() as usize + 1];
        Checker {
            img,
            geo,
            used,
            report: CheckReport::new(!opts.repair),
            opts,
        }
    }

    /// Run the full check: tree traversal with size repair, then orphan
    /// recovery over the remaining clusters.
    pub fn run(mut self) -> Result<CheckReport> {
        tracing::info!(
            "Checking volume: {} data clusters, {} byte clusters",
            self.geo.cluster_count(),
            self.geo.cluster_size()
        );

        self.scan_root()?;
        self.recover_orphans()?;

        tracing::info!(
            "Check complete: {} findings, {} files checked, {} directories scanned",
            self.report.findings.len(),
            self.report.files_checked,
            self.report.directories_scanned
        );

        Ok(self.report)
    }

    /// Decoded FAT entry for `cluster`, from the first FAT copy
    fn fat_entry(&self, cluster: u16) -> Result<u16> {
        let table = self.img.bytes(self.geo.fat_offset(0), self.geo.fat_bytes())?;
        Ok(fat::read_entry(table, cluster))
    }

    /// Write `value` into `cluster`'s entry in every FAT copy
    fn set_fat_entry(&mut self, cluster: u16, value: u16) -> Result<()> {
        for copy in 0..self.geo.fat_count {
            let table = self
                .img
                .bytes_mut(self.geo.fat_offset(copy), self.geo.fat_bytes())?;
            fat::write_entry(table, cluster, value);
        }
        Ok(())
    }

    fn walk(&self, start: u16) -> Result<ChainWalk> {
        let table = self.img.bytes(self.geo.fat_offset(0), self.geo.fat_bytes())?;
        Ok(fat::walk_chain(table, &self.geo, start))
    }

    fn mark_used(&mut self, clusters: &[u16]) {
        for &cluster in clusters {
            self.used[cluster as usize] = true;
        }
    }

    /// Rewrite a walked chain's last entry to the end-of-chain marker when
    /// the walk ended on a dangling or self-referential value
    fn repair_tail(&mut self, path: &str, walk: &ChainWalk) -> Result<()> {
        let Some(last) = walk.last() else {
            return Ok(());
        };
        self.report.push(Finding::DanglingTail {
            path: path.to_string(),
            cluster: last,
        });
        if self.opts.repair {
            self.set_fat_entry(last, fat::ENTRY_EOC)?;
        }
        Ok(())
    }

    fn set_entry_size(&mut self, slot_offset: u64, size: u32) -> Result<()> {
        let slot = self.img.bytes_mut(slot_offset, directory::ENTRY_SIZE)?;
        directory::set_size(slot, size);
        Ok(())
    }

    fn scan_root(&mut self) -> Result<()> {
        tracing::debug!(
            "Scanning root directory ({} entries)",
            self.geo.root_entries
        );
        self.scan_block(
            "",
            self.geo.root_dir_offset(),
            self.geo.root_entries as usize,
            0,
        )?;
        Ok(())
    }

    /// Scan one fixed block of directory records, dispatching each live
    /// record. Returns true when the empty sentinel was reached and the
    /// enclosing directory holds no further entries.
    fn scan_block(
        &mut self,
        dir_path: &str,
        offset: u64,
        records: usize,
        depth: usize,
    ) -> Result<bool> {
        for i in 0..records {
            let slot_offset = offset + (i * directory::ENTRY_SIZE) as u64;
            let raw = self.img.bytes(slot_offset, directory::ENTRY_SIZE)?;
            let entry = DirEntry::parse(raw)?;

            match entry.kind() {
                EntryKind::Empty => return Ok(true),
                EntryKind::Deleted | EntryKind::Dot | EntryKind::LongName => continue,
                EntryKind::VolumeLabel => {
                    self.report.push(Finding::VolumeLabel { name: entry.name() });
                }
                EntryKind::HiddenDirectory => {
                    // Platform-generated trash directories; referenced, so
                    // their own chain must not look orphaned, but their
                    // contents are not visited.
                    tracing::debug!("Skipping hidden directory {}", entry.name());
                    if self.geo.is_valid_cluster(entry.start_cluster) {
                        let walk = self.walk(entry.start_cluster)?;
                        self.mark_used(&walk.clusters);
                    }
                }
                EntryKind::Directory => {
                    let name = entry.name();
                    let start = entry.start_cluster;
                    if !self.geo.is_valid_cluster(start) {
                        tracing::debug!(
                            "Directory {} has invalid start cluster {}, nothing to enter",
                            name,
                            start
                        );
                        continue;
                    }
                    let child_path = format!("{}{}/", dir_path, name);
                    if self.used[start as usize] {
                        self.report.push(Finding::CrossLinkedDirectory {
                            path: child_path,
                            start_cluster: start,
                        });
                        continue;
                    }
                    self.scan_directory(&child_path, start, depth + 1)?;
                }
                EntryKind::File => {
                    let path = format!("{}{}", dir_path, entry.name());
                    self.check_file(&path, slot_offset, &entry)?;
                }
            }
        }
        Ok(false)
    }

    /// Scan a cluster-chained subdirectory
    fn scan_directory(&mut self, path: &str, start: u16, depth: usize) -> Result<()> {
        if depth > MAX_DIR_DEPTH {
            tracing::warn!(
                "Directory nesting exceeds {} at {}, not descending",
                MAX_DIR_DEPTH,
                path
            );
            return Ok(());
        }

        tracing::debug!("Scanning directory {} at cluster {}", path, start);
        self.report.directories_scanned += 1;

        let walk = self.walk(start)?;
        self.mark_used(&walk.clusters);
        if !walk.terminated_cleanly() {
            self.repair_tail(path, &walk)?;
        }

        let records = self.geo.cluster_size() as usize / directory::ENTRY_SIZE;
        for &cluster in &walk.clusters {
            let stop =
                self.scan_block(path, self.geo.cluster_to_offset(cluster), records, depth)?;
            if stop {
                break;
            }
        }
        Ok(())
    }

    /// Compare a regular file's declared size against its chain and make
    /// them agree, the chain being ground truth for length and the size
    /// being ground truth for where the chain should end.
    fn check_file(&mut self, path: &str, slot_offset: u64, entry: &DirEntry) -> Result<()> {
        self.report.files_checked += 1;
        let cluster_size = self.geo.cluster_size();
        let start = entry.start_cluster;

        // Start cluster 0 is a legitimate empty file; a nonzero declared
        // size there disagrees with its zero-length chain.
        if start == 0 {
            if entry.size != 0 {
                let repair = if self.opts.repair {
                    self.set_entry_size(slot_offset, 0)?;
                    Repair::SizeAdjusted { new_size: 0 }
                } else {
                    Repair::NotApplied
                };
                self.report.push(Finding::SizeMismatch {
                    path: path.to_string(),
                    size_bytes: entry.size,
                    size_clusters: entry.size.div_ceil(cluster_size),
                    chain_clusters: 0,
                    repair,
                });
            }
            return Ok(());
        }

        // Anything else out of range is corrupt metadata, not a repairable
        // size: clear the record so future scans skip it.
        if !self.geo.is_valid_cluster(start) {
            self.report.push(Finding::CorruptEntry {
                path: path.to_string(),
                start_cluster: start,
            });
            if self.opts.repair {
                let slot = self.img.bytes_mut(slot_offset, directory::ENTRY_SIZE)?;
                directory::wipe_entry(slot);
            }
            return Ok(());
        }

        let walk = self.walk(start)?;
        self.mark_used(&walk.clusters);

        let size_clusters = entry.size.div_ceil(cluster_size);
        let chain_clusters = walk.len();

        if size_clusters == chain_clusters {
            if !walk.terminated_cleanly() {
                self.repair_tail(path, &walk)?;
            }
            return Ok(());
        }

        let repair = if !self.opts.repair {
            Repair::NotApplied
        } else if chain_clusters > size_clusters {
            if size_clusters == 0 {
                // No cluster can be the logical end of a zero-byte file;
                // release the whole chain and detach it from the record.
                for &cluster in &walk.clusters {
                    self.set_fat_entry(cluster, fat::ENTRY_FREE)?;
                }
                let slot = self.img.bytes_mut(slot_offset, directory::ENTRY_SIZE)?;
                directory::set_start_cluster(slot, 0);
                Repair::ChainFreed
            } else {
                let keep = size_clusters as usize;
                self.set_fat_entry(walk.clusters[keep - 1], fat::ENTRY_EOC)?;
                for &cluster in &walk.clusters[keep..] {
                    self.set_fat_entry(cluster, fat::ENTRY_FREE)?;
                }
                Repair::ChainTruncated
            }
        } else {
            // The exact byte count past the last full cluster is not
            // reconstructable; whole clusters are the accepted rounding.
            let new_size = chain_clusters * cluster_size;
            self.set_entry_size(slot_offset, new_size)?;
            if !walk.terminated_cleanly() {
                if let Some(last) = walk.last() {
                    self.set_fat_entry(last, fat::ENTRY_EOC)?;
                }
            }
            Repair::SizeAdjusted { new_size }
        };

        self.report.push(Finding::SizeMismatch {
            path: path.to_string(),
            size_bytes: entry.size,
            size_clusters,
            chain_clusters,
            repair,
        });
        Ok(())
    }

    /// Mark-and-sweep over the whole FAT: recover every allocated chain
    /// that traversal never reached and no other cluster links into.
    fn recover_orphans(&mut self) -> Result<()> {
        let max = self.geo.max_cluster();
        tracing::debug!("Sweeping {} clusters for orphan chains", self.geo.cluster_count());

        // A cluster some entry links to cannot be a chain head.
        let mut head_candidate = vec![true; max as usize + 1];
        for cluster in fat::FIRST_CLUSTER..=max {
            let entry = self.fat_entry(cluster)?;
            if self.geo.is_valid_cluster(entry) && entry != cluster {
                head_candidate[entry as usize] = false;
            }
        }

        let mut serial = 1u32;
        let mut unplaced = 0u32;
        let mut root_full = false;

        // Ascending head order makes the found<N> names deterministic
        // across runs on the same image.
        for cluster in fat::FIRST_CLUSTER..=max {
            if self.used[cluster as usize] || !head_candidate[cluster as usize] {
                continue;
            }
            let entry = self.fat_entry(cluster)?;
            if fat::is_free(entry) || fat::is_bad(entry) {
                continue;
            }

            let walk = self.walk(cluster)?;
            // Marked immediately so a later index in this same sweep cannot
            // rediscover part of the chain.
            self.mark_used(&walk.clusters);

            if root_full {
                unplaced += 1;
                continue;
            }

            let size = walk.len() * self.geo.cluster_size();
            let name = format!("found{}.dat", serial);

            if self.opts.repair {
                if !self.place_in_root(&name, cluster, size)? {
                    tracing::warn!("Root directory full, cannot reattach chain at {}", cluster);
                    root_full = true;
                    unplaced += 1;
                    continue;
                }
                if !walk.terminated_cleanly() {
                    if let Some(last) = walk.last() {
                        self.set_fat_entry(last, fat::ENTRY_EOC)?;
                    }
                }
            }

            tracing::info!(
                "Recovered orphan chain at cluster {} as {} ({} bytes)",
                cluster,
                name,
                size
            );
            self.report.push(Finding::OrphanRecovered {
                name,
                start_cluster: cluster,
                chain_clusters: walk.len(),
                size_bytes: size,
            });
            self.report.orphans_recovered += 1;
            serial += 1;
        }

        if unplaced > 0 {
            self.report.push(Finding::RootDirectoryFull { unplaced });
        }
        Ok(())
    }

    /// Materialize a new root-directory record for a recovered chain.
    ///
    /// The root array is a bounded resource: returns false when no empty or
    /// deleted slot remains, and the caller stops recovering.
    fn place_in_root(&mut self, name: &str, start: u16, size: u32) -> Result<bool> {
        let (name_field, ext_defaulted) = directory::format_83_name(name);
        if ext_defaulted {
            tracing::warn!("{} has no extension, using placeholder", name);
        }

        let root = self.geo.root_dir_offset();
        let entries = self.geo.root_entries as usize;

        for i in 0..entries {
            let offset = root + (i * directory::ENTRY_SIZE) as u64;
            match self.img.bytes(offset, 1)?[0] {
                directory::SLOT_EMPTY => {
                    let slot = self.img.bytes_mut(offset, directory::ENTRY_SIZE)?;
                    directory::write_file_entry(slot, &name_field, start, size);
                    // Keep an empty sentinel terminating the directory for
                    // the next insertion's search.
                    if i + 1 < entries {
                        let next = self
                            .img
                            .bytes_mut(offset + directory::ENTRY_SIZE as u64, directory::ENTRY_SIZE)?;
                        directory::wipe_entry(next);
                    }
                    return Ok(true);
                }
                directory::SLOT_DELETED => {
                    let slot = self.img.bytes_mut(offset, directory::ENTRY_SIZE)?;
                    directory::write_file_entry(slot, &name_field, start, size);
                    return Ok(true);
                }
                _ => {}
            }
        }
        Ok(false)
    }
}
