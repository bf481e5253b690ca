use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use presence_core::{FaceDetector, Frame, RecognitionModel};
use presence_engine::{spawn_engine, Config, EngineConfig, EngineHandle};
use presence_store::IdentityStore;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "presence", about = "Face-recognition attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new person from captured stills
    Enroll {
        /// Display name
        #[arg(short, long)]
        name: String,
        /// Employee identifier (must be unique)
        #[arg(short, long)]
        employee_id: String,
        /// Image files standing in for the capture session
        #[arg(required = true)]
        frames: Vec<PathBuf>,
    },
    /// Run the recognition pipeline over image frames and record attendance
    Scan {
        #[arg(required = true)]
        frames: Vec<PathBuf>,
    },
    /// Show registered-user and attendance counts
    Stats,
    /// List recent attendance events
    Recent {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Enroll {
            name,
            employee_id,
            frames,
        } => {
            let engine = build_engine(&config)?;
            let frames = load_frames(&frames)?;
            match engine.enroll(frames, name, employee_id).await {
                Ok(receipt) => println!("{}", receipt.message()),
                Err(e) => {
                    println!("Enrollment failed: {e}");
                    std::process::exit(1);
                }
            }
        }
        Commands::Scan { frames } => {
            let engine = build_engine(&config)?;
            for path in frames {
                let frame = load_frame(&path)?;
                let report = engine.recognize(frame).await?;
                if report.is_empty() {
                    println!("{}: no faces detected", path.display());
                    continue;
                }
                for face in &report.faces {
                    let line = match face.greeting() {
                        Some(greeting) => greeting,
                        None => format!("{} at a distance above the threshold", face.name),
                    };
                    println!("{}: {line}", path.display());
                }
            }
        }
        Commands::Stats => {
            let store = IdentityStore::open(&config.db_path, None)?;
            let stats = store.stats()?;
            println!("Registered users:  {}", stats.total_users);
            println!("Attendance today:  {}", stats.attendance_today);
        }
        Commands::Recent { limit } => {
            let store = IdentityStore::open(&config.db_path, None)?;
            let events = store.recent_events(limit)?;
            if events.is_empty() {
                println!("No attendance events recorded");
            }
            for event in events {
                let marker = if event.synced { "synced" } else { "local" };
                println!("{}  {}  [{marker}]", event.timestamp, event.name);
            }
        }
    }

    Ok(())
}

fn build_engine(config: &Config) -> Result<EngineHandle> {
    let detector = FaceDetector::load(&config.detector_model, config.detector_params())
        .context("face detection unavailable")?;
    let model = RecognitionModel::load(&config.model_paths());
    let store = IdentityStore::open(&config.db_path, config.mirror.clone())?;

    Ok(spawn_engine(
        Box::new(detector),
        model,
        store,
        EngineConfig {
            distance_threshold: config.distance_threshold,
            min_enroll_samples: config.min_enroll_samples,
            model_paths: config.model_paths(),
        },
    ))
}

fn load_frame(path: &Path) -> Result<Frame> {
    Frame::from_path(path).with_context(|| format!("failed to load frame {}", path.display()))
}

fn load_frames(paths: &[PathBuf]) -> Result<Vec<Frame>> {
    paths.iter().map(|p| load_frame(p)).collect()
}
