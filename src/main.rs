use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod capture;
mod config;
mod detector;
mod error;
mod scheduler;
mod server;
mod session;
mod state;

use capture::{list_cameras, FfmpegCamera, TileGrid};
use config::Config;
use detector::{BirdDetector, DEFAULT_DIAGNOSTIC_CONFIDENCE};
use scheduler::Scheduler;
use session::CaptureSession;
use state::Database;

/// Pi in the Sky - Bird detection from webcam.
#[derive(Debug, Parser)]
#[command(name = "pisky", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(flatten)]
    Local(LocalCommand),
    /// Start the API server
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to bind to
        #[arg(long, default_value_t = 8000)]
        port: u16,
        /// Camera index used by POST /api/shoot
        #[arg(long = "camera", default_value_t = 0)]
        camera_index: u32,
    },
}

/// Commands that only do blocking work (camera, inference, SQLite)
#[derive(Debug, Subcommand)]
enum LocalCommand {
    /// Show configuration and paths
    Info,
    /// List available cameras
    List,
    /// Capture an image and detect birds
    Shoot {
        /// Keep all images even if no birds detected
        #[arg(long)]
        keep_all: bool,
        /// Camera index
        #[arg(long = "camera", default_value_t = 0)]
        camera_index: u32,
    },
    /// Capture repeatedly on a fixed interval
    Watch {
        /// Seconds between capture starts
        #[arg(long, default_value_t = 300)]
        interval: u64,
        /// Keep all images even if no birds detected
        #[arg(long)]
        keep_all: bool,
        /// Camera index
        #[arg(long = "camera", default_value_t = 0)]
        camera_index: u32,
        /// Stop after this many sessions
        #[arg(long)]
        max_runs: Option<u64>,
    },
    /// Run every class of the detector over the tiles of a still image
    Inspect {
        /// Image file to tile
        image: PathBuf,
        /// Minimum confidence to report
        #[arg(long, default_value_t = DEFAULT_DIAGNOSTIC_CONFIDENCE)]
        min_confidence: f32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pisky=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("invalid configuration")?;

    match cli.command {
        Command::Serve {
            host,
            port,
            camera_index,
        } => {
            println!("Starting server at http://{}:{}", host, port);
            let camera = Box::new(FfmpegCamera::new(camera_index));
            let state = server::AppState::new(config, camera);
            server::serve(state, &host, port).await
        }
        Command::Local(command) => {
            tokio::task::spawn_blocking(move || run_blocking(command, config))
                .await
                .context("command task panicked")?
        }
    }
}

fn run_blocking(command: LocalCommand, config: Config) -> anyhow::Result<()> {
    match command {
        LocalCommand::Info => info(&config),
        LocalCommand::List => {
            let cameras = list_cameras(10);
            if cameras.is_empty() {
                println!("No cameras found");
            } else {
                println!("Available cameras:");
                for (index, name) in cameras {
                    println!("  {}: {}", index, name);
                }
            }
            Ok(())
        }
        LocalCommand::Shoot {
            keep_all,
            camera_index,
        } => {
            let mut camera = FfmpegCamera::new(camera_index);
            let outcome = session::shoot(&config, &mut camera, keep_all)?;
            println!("{}", outcome);
            Ok(())
        }
        LocalCommand::Watch {
            interval,
            keep_all,
            camera_index,
            max_runs,
        } => {
            let detector = BirdDetector::from_config(&config)?;
            let mut camera = FfmpegCamera::new(camera_index);
            let mut scheduler = Scheduler::new(Duration::from_secs(interval));
            scheduler.run(max_runs, || {
                CaptureSession::new(&detector, &config, keep_all).run(&mut camera)
            });
            println!(
                "{} session(s): {} saved, {} failed",
                scheduler.runs(),
                scheduler.saved(),
                scheduler.failures()
            );
            Ok(())
        }
        LocalCommand::Inspect {
            image,
            min_confidence,
        } => inspect(&config, &image, min_confidence),
    }
}

fn info(config: &Config) -> anyhow::Result<()> {
    let model_path = config.model_path();
    let model_status = if model_path.exists() {
        "downloaded"
    } else {
        "not downloaded"
    };

    println!("Pi in the Sky configuration:");
    println!("  Data directory: {}", config.data_dir.display());
    println!("  Images:         {}", config.images_dir().display());
    println!("  Database:       {}", config.database_path().display());
    println!("  Model:          {} ({})", model_path.display(), model_status);
    println!("  Model source:   {}", config.model_url);
    println!("  Threshold:      {:.2}", config.min_confidence);

    if config.database_path().exists() {
        let db = Database::open(&config.database_path())?;
        let stats = db.get_stats()?;
        let missing = db.missing_images(&config.images_dir())?;
        println!("  Photographs:    {}", stats.total_photographs);
        println!("  Detections:     {}", stats.total_detections);
        if !missing.is_empty() {
            println!("  Missing images: {:?}", missing);
        }
    }
    Ok(())
}

fn inspect(config: &Config, image: &Path, min_confidence: f32) -> anyhow::Result<()> {
    let detector = BirdDetector::from_config(config)?;
    let frame = image::open(image)
        .with_context(|| format!("could not read {}", image.display()))?
        .to_rgb8();

    let (_, tiles) = TileGrid::default().tile(&frame);
    for (tile_index, tile) in tiles.iter().enumerate() {
        let found = detector.detect_all(tile, min_confidence)?;
        if found.is_empty() {
            continue;
        }
        let listing: Vec<String> = found
            .iter()
            .map(|(class_id, confidence)| {
                let marker = if *class_id == detector.target_class() { "*" } else { "" };
                format!("{}{}={:.2}", marker, class_id, confidence)
            })
            .collect();
        println!("Tile {:02}: {}", tile_index, listing.join(" "));
    }
    Ok(())
}
