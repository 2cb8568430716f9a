//! `raman-scan` command-line front end.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use raman_scan::config::Settings;
use raman_scan::controller::ScanController;
use raman_scan::hardware::registry::{MOCK_MOTOR, MOCK_SPECTROMETER};
use raman_scan::hardware::DeviceRegistry;
use raman_scan::heatmap::{render, Band, Colormap, RenderOptions};
use raman_scan::project;
use raman_scan::result::ScanResult;
use raman_scan::scan::{CancelToken, ScanEvent, ScanRegion, ScanRequest};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Point-by-point Raman raster scanner.
#[derive(Parser)]
#[command(name = "raman-scan")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColormapArg {
    Grayscale,
    Viridis,
    Inferno,
}

impl From<ColormapArg> for Colormap {
    fn from(arg: ColormapArg) -> Self {
        match arg {
            ColormapArg::Grayscale => Colormap::Grayscale,
            ColormapArg::Viridis => Colormap::Viridis,
            ColormapArg::Inferno => Colormap::Inferno,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a raster scan and write a project file
    Scan {
        /// Region origin X
        #[arg(long, default_value = "0.0", allow_hyphen_values = true)]
        x: f64,

        /// Region origin Y
        #[arg(long, default_value = "0.0", allow_hyphen_values = true)]
        y: f64,

        /// Region width
        #[arg(long)]
        width: f64,

        /// Region height
        #[arg(long)]
        height: f64,

        /// X step (defaults to the configured step)
        #[arg(long)]
        step_x: Option<f64>,

        /// Y step (defaults to the configured step)
        #[arg(long)]
        step_y: Option<f64>,

        /// Lower band bound in cm⁻¹ (defaults to the configured band)
        #[arg(long)]
        band_min: Option<f64>,

        /// Upper band bound in cm⁻¹ (defaults to the configured band)
        #[arg(long)]
        band_max: Option<f64>,

        /// Motor controller name
        #[arg(long, default_value = MOCK_MOTOR)]
        motor: String,

        /// Spectrometer name
        #[arg(long, default_value = MOCK_SPECTROMETER)]
        spectrometer: String,

        /// Heatmap colormap
        #[arg(long, value_enum, default_value = "viridis")]
        colormap: ColormapArg,

        /// Output project path (defaults to a timestamped file in the storage directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the contents of a project file
    Inspect {
        /// Project file
        input: PathBuf,
    },

    /// Recompute a project's heatmap under another band
    Reband {
        /// Project file
        input: PathBuf,

        /// Lower band bound in cm⁻¹
        #[arg(long)]
        band_min: f64,

        /// Upper band bound in cm⁻¹
        #[arg(long)]
        band_max: f64,

        /// Heatmap colormap
        #[arg(long, value_enum, default_value = "viridis")]
        colormap: ColormapArg,

        /// Output project path (defaults to `<input>_<min>_<max>.raman2dscan`)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List available devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;
    raman_scan::logging::init(&settings.application);
    info!(app = %settings.application.name, "Starting");

    match cli.command {
        Commands::Scan {
            x,
            y,
            width,
            height,
            step_x,
            step_y,
            band_min,
            band_max,
            motor,
            spectrometer,
            colormap,
            output,
        } => {
            let band = Band::new(
                band_min.unwrap_or(settings.scan.raman_min),
                band_max.unwrap_or(settings.scan.raman_max),
            )?;
            let request = ScanRequest::new(
                ScanRegion::new(x, y, width, height),
                step_x.unwrap_or(settings.scan.step_x),
                step_y.unwrap_or(settings.scan.step_y),
                band,
            );
            let output = output.unwrap_or_else(|| default_output(&settings));
            let render = RenderOptions {
                colormap: colormap.into(),
                ..RenderOptions::default()
            };
            run_scan(settings, request, &motor, &spectrometer, &render, output).await
        }
        Commands::Inspect { input } => inspect(&input).await,
        Commands::Reband {
            input,
            band_min,
            band_max,
            colormap,
            output,
        } => {
            let band = Band::from_unordered(band_min, band_max)?;
            settings.scan.check_band(band)?;
            let render = RenderOptions {
                colormap: colormap.into(),
                ..RenderOptions::default()
            };
            reband(&input, band, &render, output).await
        }
        Commands::Devices => {
            let registry = DeviceRegistry::with_defaults();
            println!("Motor controllers:");
            for name in registry.available_motors() {
                println!("  {name}");
            }
            println!("Spectrometers:");
            for name in registry.available_spectrometers() {
                println!("  {name}");
            }
            Ok(())
        }
    }
}

async fn run_scan(
    settings: Settings,
    request: ScanRequest,
    motor: &str,
    spectrometer: &str,
    render: &RenderOptions,
    output: PathBuf,
) -> Result<()> {
    let mut controller = ScanController::new(settings, DeviceRegistry::with_defaults());
    controller
        .connect_motor(motor)
        .await
        .with_context(|| format!("Failed to connect motor controller '{motor}'"))?;
    controller
        .connect_spectrometer(spectrometer)
        .await
        .with_context(|| format!("Failed to connect spectrometer '{spectrometer}'"))?;

    let cancel = CancelToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping after the current point");
                cancel.cancel();
            }
        })
    };

    let total = request.plan().len();
    println!("Scanning {total} points, band {}", request.band);
    let outcome = controller
        .run_scan(request, cancel, render, |event, _| match event {
            ScanEvent::Progress(pct) => {
                print!("\r{pct:>3}% ");
                let _ = std::io::stdout().flush();
            }
            ScanEvent::Eta(eta) => println!("ETA {eta}"),
            ScanEvent::Error { stage, message } => {
                eprintln!("\nDevice error during {stage}: {message}");
            }
            ScanEvent::PointAcquired(_) | ScanEvent::Finished(_) => {}
        })
        .await;
    ctrl_c.abort();
    controller.shutdown().await;
    let outcome = outcome.context("Scan failed")?;

    let report = &outcome.report;
    println!(
        "Scan {:?}: {} of {} points in {:.1?}",
        report.state,
        report.points.len(),
        report.planned,
        report.elapsed
    );

    match outcome.result {
        Some(result) => {
            let path = write_project(output, result).await?;
            println!("Project written to {}", path.display());
        }
        None => println!("No points collected, nothing written"),
    }

    if let Some(err) = outcome.report.error {
        bail!(err);
    }
    Ok(())
}

async fn inspect(input: &Path) -> Result<()> {
    let result = load_project(input).await?;
    let grid = &result.heatmap_grid;

    println!("File:         {}", input.display());
    if let Some(created_at) = result.created_at {
        println!("Created:      {created_at}");
    }
    println!("Points:       {}", result.scan_meta.point_count);
    println!(
        "Steps:        {} x {}",
        result.scan_meta.step_x, result.scan_meta.step_y
    );
    if let Some(region) = result.scan_meta.region {
        println!(
            "Region:       ({}, {}) {} x {}",
            region.x, region.y, region.width, region.height
        );
    }
    if let Some(name) = &result.spectrometer_meta.name {
        println!("Spectrometer: {name}");
    }
    println!("Band:         {}", result.heatmap_bounds);
    println!("Grid:         {} x {} ({:?})", grid.width(), grid.height(), grid.status());
    if let Some((low, high)) = grid.value_range() {
        println!("Intensity:    {low:.3} .. {high:.3}");
    }
    println!("Spectra rows: {}", result.spectra_table.len());
    let images = [
        ("heatmap", &result.images.heatmap_png),
        ("camera overview", &result.images.camera_overview_png),
        ("camera raw", &result.images.camera_raw_png),
    ];
    for (label, bytes) in images {
        if let Some(bytes) = bytes {
            println!("Image:        {label} ({} bytes)", bytes.len());
        }
    }
    Ok(())
}

async fn reband(
    input: &Path,
    band: Band,
    render: &RenderOptions,
    output: Option<PathBuf>,
) -> Result<()> {
    let result = load_project(input).await?;
    let mut rebanded = result.rebanded(band);
    if rebanded.heatmap_grid.status().is_renderable() {
        match render::render_png(&rebanded.heatmap_grid, render) {
            Ok(png) => rebanded.images.heatmap_png = Some(png),
            Err(err) => warn!(error = %err, "Heatmap image skipped"),
        }
    }

    let output = output.unwrap_or_else(|| {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "scan".to_string());
        input.with_file_name(format!(
            "{stem}_{}_{}.{}",
            band.min(),
            band.max(),
            project::EXTENSION
        ))
    });
    let path = write_project(output, rebanded).await?;
    println!("Rebanded project written to {}", path.display());
    Ok(())
}

async fn load_project(input: &Path) -> Result<ScanResult> {
    let path = input.to_path_buf();
    tokio::task::spawn_blocking(move || project::read(&path))
        .await?
        .with_context(|| format!("Failed to read project {}", input.display()))
}

async fn write_project(output: PathBuf, result: ScanResult) -> Result<PathBuf> {
    let target = output.clone();
    tokio::task::spawn_blocking(move || project::write(&target, &result))
        .await?
        .with_context(|| format!("Failed to write project {}", output.display()))
}

fn default_output(settings: &Settings) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    settings
        .storage
        .output_dir
        .join(format!("scan_{stamp}.{}", project::EXTENSION))
}
