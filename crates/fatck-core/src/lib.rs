//! fatck-core: FAT12 volume consistency checking and repair
//!
//! Validates that every file's declared size agrees with the cluster chain
//! backing it, repairs disagreements in place, and reattaches allocated
//! chains no directory entry references under synthetic `found<N>.dat`
//! names.
//!
//! The volume image is memory-mapped and mutated in place; a run either
//! completes or leaves the image as far as it got (there is no journal or
//! rollback). Use [`CheckOptions`] with `repair: false` for a detection-only
//! pass that writes nothing.

use anyhow::{Context, Result};
use std::path::Path;

pub mod device;
pub mod fat12;
pub mod report;

pub use device::VolumeImage;
pub use fat12::check::{CheckOptions, Checker};
pub use fat12::{BootSector, Geometry, GeometryError};
pub use report::{CheckReport, Finding, Repair};

/// Check (and by default repair) a FAT12 volume image in place.
///
/// Fatal errors are limited to an unopenable image and a boot sector whose
/// geometry fails validation; every inconsistency inside a valid volume is
/// handled and reported, never returned as an error.
pub fn check_image(image_path: &Path, opts: CheckOptions) -> Result<CheckReport> {
    tracing::info!("Starting check of {}", image_path.display());

    let mut img = VolumeImage::open(image_path)
        .with_context(|| format!("cannot open image {}", image_path.display()))?;

    let boot = BootSector::parse(img.bytes(0, fat12::BOOT_SECTOR_SIZE)?)?;
    let geo = boot.geometry(img.len())?;

    tracing::debug!(
        "Geometry: {} bytes/sector, {} sectors/cluster, {} root entries, {} clusters",
        geo.bytes_per_sector,
        geo.sectors_per_cluster,
        geo.root_entries,
        geo.cluster_count()
    );

    let report = Checker::new(&mut img, geo, opts).run()?;

    img.flush()?;
    Ok(report)
}
