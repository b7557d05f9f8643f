//! Check run report
//!
//! Findings are data, not log lines: the core collects them in order and the
//! caller renders them (human text or JSON). Diagnostics go through
//! `tracing` separately.

use serde::Serialize;
use std::fmt;

/// Corrective action taken for a size mismatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Repair {
    /// Chain cut back to the metadata-implied length, excess clusters freed
    ChainTruncated,
    /// Whole chain freed and the record's start cluster cleared
    ChainFreed,
    /// Declared size grown/shrunk to match the true chain
    SizeAdjusted { new_size: u32 },
    /// Detection-only run, nothing written
    NotApplied,
}

/// One observation made during a check run
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    /// Volume label seen in the directory tree
    VolumeLabel { name: String },
    /// Declared size and chain length disagree
    SizeMismatch {
        path: String,
        size_bytes: u32,
        size_clusters: u32,
        chain_clusters: u32,
        repair: Repair,
    },
    /// Record's start cluster is out of range; the record was wiped
    CorruptEntry { path: String, start_cluster: u16 },
    /// Chain ended on a dangling or self-referential value; tail rewritten
    /// to the end-of-chain marker
    DanglingTail { path: String, cluster: u16 },
    /// Directory start cluster already belongs to another chain; not entered
    CrossLinkedDirectory { path: String, start_cluster: u16 },
    /// Unreferenced chain reattached under a synthetic name
    OrphanRecovered {
        name: String,
        start_cluster: u16,
        chain_clusters: u32,
        size_bytes: u32,
    },
    /// Root directory had no free slot left for recovered chains
    RootDirectoryFull { unplaced: u32 },
}

impl Finding {
    /// Volume labels are informational; everything else is an inconsistency
    fn is_inconsistency(&self) -> bool {
        !matches!(self, Finding::VolumeLabel { .. })
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Finding::VolumeLabel { name } => write!(f, "Volume: {}", name),
            Finding::SizeMismatch {
                path,
                size_bytes,
                size_clusters,
                chain_clusters,
                repair,
            } => {
                write!(
                    f,
                    "{}: declared size {} bytes ({} clusters) but chain has {} clusters",
                    path, size_bytes, size_clusters, chain_clusters
                )?;
                match repair {
                    Repair::ChainTruncated => {
                        write!(f, " -> chain truncated to {} clusters", size_clusters)
                    }
                    Repair::ChainFreed => write!(f, " -> chain freed, start cluster cleared"),
                    Repair::SizeAdjusted { new_size } => {
                        write!(f, " -> size adjusted to {} bytes", new_size)
                    }
                    Repair::NotApplied => Ok(()),
                }
            }
            Finding::CorruptEntry {
                path,
                start_cluster,
            } => write!(
                f,
                "{}: start cluster {} is out of range, entry cleared",
                path, start_cluster
            ),
            Finding::DanglingTail { path, cluster } => write!(
                f,
                "{}: chain ends without an end-of-file marker at cluster {}, marker written",
                path, cluster
            ),
            Finding::CrossLinkedDirectory {
                path,
                start_cluster,
            } => write!(
                f,
                "{}: directory start cluster {} already in use, not followed",
                path, start_cluster
            ),
            Finding::OrphanRecovered {
                name,
                start_cluster,
                chain_clusters,
                size_bytes,
            } => write!(
                f,
                "recovered {} (start cluster {}, {} clusters, {} bytes)",
                name, start_cluster, chain_clusters, size_bytes
            ),
            Finding::RootDirectoryFull { unplaced } => write!(
                f,
                "root directory full: {} orphan chain(s) could not be reattached",
                unplaced
            ),
        }
    }
}

/// Everything one check run observed and did
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub findings: Vec<Finding>,
    pub files_checked: u32,
    pub directories_scanned: u32,
    pub orphans_recovered: u32,
    /// True when the run was detection-only and left the image untouched
    pub dry_run: bool,
}

impl CheckReport {
    pub fn new(dry_run: bool) -> Self {
        CheckReport {
            findings: Vec::new(),
            files_checked: 0,
            directories_scanned: 0,
            orphans_recovered: 0,
            dry_run,
        }
    }

    pub fn push(&mut self, finding: Finding) {
        self.findings.push(finding);
    }

    /// Whether the run found nothing to repair
    pub fn is_clean(&self) -> bool {
        !self.findings.iter().any(Finding::is_inconsistency)
    }

    /// Render the human-readable report
    pub fn write_human<W: std::io::Write>(&self, mut w: W) -> std::io::Result<()> {
        if self.dry_run {
            writeln!(w, "(dry run: no changes were written)")?;
        }
        for finding in &self.findings {
            writeln!(w, "{}", finding)?;
        }
        if self.is_clean() {
            writeln!(w, "No inconsistency found.")?;
        } else {
            let count = self
                .findings
                .iter()
                .filter(|f| f.is_inconsistency())
                .count();
            writeln!(
                w,
                "{} inconsistency finding(s), {} file(s) checked, {} orphan(s) recovered.",
                count, self.files_checked, self.orphans_recovered
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_report_message() {
        let mut report = CheckReport::new(false);
        report.push(Finding::VolumeLabel {
            name: "MYDISK".to_string(),
        });
        assert!(report.is_clean());

        let mut out = Vec::new();
        report.write_human(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Volume: MYDISK"));
        assert!(text.contains("No inconsistency found."));
    }

    #[test]
    fn test_mismatch_rendering() {
        let finding = Finding::SizeMismatch {
            path: "SUBDIR/FILE.TXT".to_string(),
            size_bytes: 5000,
            size_clusters: 10,
            chain_clusters: 8,
            repair: Repair::SizeAdjusted { new_size: 4096 },
        };
        let line = finding.to_string();
        assert!(line.contains("SUBDIR/FILE.TXT"));
        assert!(line.contains("10 clusters"));
        assert!(line.contains("8 clusters"));
        assert!(line.contains("4096"));
    }

    #[test]
    fn test_json_shape() {
        let mut report = CheckReport::new(true);
        report.push(Finding::OrphanRecovered {
            name: "found1.dat".to_string(),
            start_cluster: 12,
            chain_clusters: 3,
            size_bytes: 1536,
        });
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"kind\":\"orphan_recovered\""));
        assert!(json.contains("\"dry_run\":true"));
    }
}
