use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fatck_core::{check_image, fat12, CheckOptions};

#[derive(Parser, Debug)]
#[command(name = "fatck", version, about = "FAT12 volume consistency checker and repairer")]
struct Cli {
	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// Check a volume image and repair inconsistencies in place
	Check {
		/// Path to the FAT12 volume image
		image: PathBuf,
		/// Report findings without writing anything to the image
		#[arg(long)]
		dry_run: bool,
		/// Emit the report as JSON instead of text
		#[arg(long)]
		json: bool,
	},
	/// Print volume geometry information
	Info {
		/// Path to the FAT12 volume image
		image: PathBuf,
	},
}

fn main() -> Result<()> {
	// Initialize tracing
	tracing_subscriber::fmt::init();

	let cli = Cli::parse();
	match cli.command {
		Commands::Check { image, dry_run, json } => {
			let report = check_image(&image, CheckOptions { repair: !dry_run })?;

			if json {
				println!("{}", serde_json::to_string_pretty(&report)?);
			} else {
				report.write_human(std::io::stdout().lock())?;
			}
		}
		Commands::Info { image } => {
			let mut file = std::fs::File::open(&image)
				.with_context(|| format!("cannot open image {}", image.display()))?;
			let image_len = file.metadata()?.len();

			let mut sector0 = vec![0u8; fat12::BOOT_SECTOR_SIZE];
			file.read_exact(&mut sector0)
				.context("image smaller than one sector")?;

			let boot = fat12::BootSector::parse(&sector0)?;
			let geo = boot.geometry(image_len)?;
			println!("{}", fat12::volume_info(&boot, &geo));
		}
	}
	Ok(())
}
