//! SkinScan analysis diagnostics
//!
//! Inspects what the orchestrator would do on this host: the detected device
//! profile and the configuration a run would actually use, the resolved
//! configuration file, and how a given photo would be preprocessed.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use skinscan_ai::memory::{ImagePool, ImagePoolProbe, MemoryGuard};
use skinscan_ai::models::DEFAULT_PIXEL_DENSITY;
use skinscan_ai::{AnalysisConfig, DeviceProfile, LesionImage, RecoveryPolicy};
use skinscan_common::config::{write_toml_config, ConfigResolver};
use skinscan_common::logging::init_tracing;
use tracing::info;

/// Command-line arguments for skinscan-ai
#[derive(Parser, Debug)]
#[command(name = "skinscan-ai")]
#[command(about = "Lesion analysis orchestration diagnostics")]
#[command(version)]
struct Args {
    /// Config file (overrides SKINSCAN_CONFIG and the platform default)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the device profile and the device-adjusted analysis config
    Profile {
        /// Preset to adjust instead of the configured one
        #[arg(long)]
        preset: Option<String>,
    },
    /// Print the resolved configuration file contents
    Config {
        /// Also write the resolved configuration to this path
        #[arg(long)]
        write: Option<PathBuf>,
    },
    /// Show how a photo would be validated and preprocessed
    Inspect {
        image: PathBuf,

        /// Pixels per millimetre of the photo
        #[arg(long, default_value_t = DEFAULT_PIXEL_DENSITY)]
        pixel_density: f32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let toml_config = ConfigResolver::new()
        .with_cli_path(args.config.clone())
        .load()
        .context("Failed to load configuration")?;
    init_tracing(&toml_config.logging).context("Failed to initialize logging")?;

    info!("Starting skinscan-ai v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Profile { preset } => {
            let mut settings = toml_config.analysis.clone();
            if preset.is_some() {
                settings.preset = preset;
            }
            let config = AnalysisConfig::from_settings(&settings)
                .context("Invalid [analysis] configuration")?;
            let policy = RecoveryPolicy::from_settings(&toml_config.recovery)
                .context("Invalid [recovery] configuration")?;

            let profile = DeviceProfile::global();
            let adjusted = profile
                .adjust(&config)
                .context("Device adjustment failed")?;

            let report = json!({
                "device": profile,
                "worker_pool_size": profile.worker_pool_size(),
                "configured": config,
                "adjusted": adjusted,
                "recovery": policy,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Config { write } => {
            let rendered =
                toml::to_string_pretty(&toml_config).context("Failed to render configuration")?;
            println!("{}", rendered);

            if let Some(path) = write {
                write_toml_config(&toml_config, &path)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                info!("Configuration written to {}", path.display());
            }
        }
        Command::Inspect {
            image,
            pixel_density,
        } => {
            let config = AnalysisConfig::from_settings(&toml_config.analysis)
                .context("Invalid [analysis] configuration")?;
            let profile = DeviceProfile::global();
            let adjusted = profile
                .adjust(&config)
                .context("Device adjustment failed")?;

            let lesion = LesionImage::open(&image, pixel_density)
                .with_context(|| format!("Failed to open {}", image.display()))?;
            let validation = lesion.validate("image");

            let pool = Arc::new(ImagePool::new());
            let probe = Arc::new(ImagePoolProbe::new(pool.clone(), profile.max_heap_bytes));
            let guard = MemoryGuard::new(probe, pool);
            let bytes_per_pixel = lesion.byte_size() / lesion.pixel_count().max(1);

            let report = json!({
                "width": lesion.width(),
                "height": lesion.height(),
                "pixels": lesion.pixel_count(),
                "decoded_bytes": lesion.byte_size(),
                "valid": validation.is_ok(),
                "validation_error": validation.err().map(|e| e.to_string()),
                "fits_memory": guard.fits(&lesion),
                "affordable_pixels": guard.affordable_pixels(bytes_per_pixel),
                "max_resolution_pixels": adjusted.max_resolution_pixels(),
                "downscale_needed": lesion.pixel_count() > adjusted.max_resolution_pixels(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
