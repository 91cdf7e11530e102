// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! nvr-core — always-on multi-camera HLS recording and indexing engine.
//!
//! Usage:
//!   nvr-core run      --config config.toml
//!   nvr-core status   --config config.toml
//!   nvr-core timeline --config config.toml --camera cam1 --date 2026-07-31
//!   nvr-core playlist --config config.toml --camera cam1 --from <ms> --to <ms>
//!   nvr-core cleanup  --config config.toml --camera cam1

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use nvr_core::config::Config;
use nvr_core::orphan;
use nvr_core::playback;
use nvr_core::retention;
use nvr_core::supervisor::Supervisor;

#[derive(Parser)]
#[command(name = "nvr-core", about = "Multi-camera HLS recording and indexing engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start recording and indexing all configured cameras.
    Run {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
    /// Print a status snapshot for every configured camera and exit.
    Status {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
    /// Print the hourly timeline summary for a camera on a given date.
    Timeline {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
        #[arg(long)]
        camera: String,
        /// Date in YYYY-MM-DD.
        #[arg(long)]
        date: String,
    },
    /// Print a VOD playlist for a camera over a millisecond time range.
    Playlist {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
        #[arg(long)]
        camera: String,
        #[arg(long)]
        from: i64,
        #[arg(long)]
        to: i64,
    },
    /// Run one retention sweep for a camera immediately and print the result.
    Cleanup {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
        #[arg(long)]
        camera: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config_path = match &cli.command {
        Command::Run { config }
        | Command::Status { config }
        | Command::Timeline { config, .. }
        | Command::Playlist { config, .. }
        | Command::Cleanup { config, .. } => config.clone(),
    };

    let cfg = match Config::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load config: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_level)),
        )
        .init();

    match cli.command {
        Command::Run { .. } => run(cfg).await,
        Command::Status { .. } => run_status(cfg).await,
        Command::Timeline { camera, date, .. } => run_timeline(cfg, &camera, &date).await,
        Command::Playlist { camera, from, to, .. } => run_playlist(cfg, &camera, from, to).await,
        Command::Cleanup { camera, .. } => run_cleanup(cfg, &camera).await,
    }
}

async fn run(cfg: Config) {
    info!(
        cameras = cfg.cameras.len(),
        base_path = ?cfg.storage.base_path,
        segment_duration_ms = cfg.storage.segment_duration_ms,
        "starting nvr-core"
    );

    let supervisor = match Supervisor::start(cfg).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to start supervisor");
            std::process::exit(1);
        }
    };

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal"),
        Err(e) => error!(error = %e, "signal handler error"),
    }

    supervisor.shutdown().await;
}

async fn run_status(cfg: Config) {
    println!("=== nvr-core status ===");
    match retention::disk_metrics(&cfg.storage.base_path) {
        Ok(m) => println!(
            "Disk: {:.1}% used ({} / {} bytes free)",
            m.percent_used * 100.0,
            m.free_bytes,
            m.total_bytes
        ),
        Err(e) => println!("Disk: unavailable ({e})"),
    }

    for cam in &cfg.cameras {
        match retention::camera_usage(&cfg.storage.base_path, &cam.id).await {
            Ok(usage) => println!(
                "  {} ({}): {} segments, {} bytes",
                cam.id, cam.name, usage.segment_count, usage.total_bytes
            ),
            Err(e) => println!("  {} ({}): error reading usage: {e}", cam.id, cam.name),
        }
    }
}

async fn run_timeline(cfg: Config, camera_id: &str, date: &str) {
    let date = match chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d") {
        Ok(d) => d,
        Err(e) => {
            eprintln!("invalid --date '{date}': {e}");
            std::process::exit(1);
        }
    };

    let (index, _handle) = nvr_core::index::spawn(cfg.storage.writer_queue_size);
    orphan::rebuild_from_disk(&cfg, &index).await;
    let buckets = index.get_hourly_summary(camera_id, date);
    if buckets.is_empty() {
        println!("No recordings for camera '{camera_id}' on {date}");
        return;
    }
    println!("=== Timeline for '{camera_id}' on {date} ===");
    for bucket in buckets {
        println!(
            "  {:02}:00  segments={}  duration_ms={}  bytes={}",
            bucket.hour, bucket.segment_count, bucket.total_duration_ms, bucket.total_size_bytes
        );
    }
}

async fn run_playlist(cfg: Config, camera_id: &str, from_ms: i64, to_ms: i64) {
    let (index, _handle) = nvr_core::index::spawn(cfg.storage.writer_queue_size);
    orphan::rebuild_from_disk(&cfg, &index).await;
    match playback::get_playback_info(&index, camera_id, from_ms, to_ms) {
        Ok(info) => {
            let playlist = playback::generate_playlist(&info.segments, |seg| {
                seg.file_path.display().to_string()
            });
            print!("{playlist}");
        }
        Err(e) => {
            eprintln!("cannot build playlist: {e}");
            std::process::exit(1);
        }
    }
}

async fn run_cleanup(cfg: Config, camera_id: &str) {
    let policy = cfg.retention_for(camera_id).as_policy();

    let (index, _handle) = nvr_core::index::spawn(cfg.storage.writer_queue_size);
    orphan::rebuild_from_disk(&cfg, &index).await;
    index.upsert_policy(camera_id, policy).await.ok();
    index.flush().await;

    let engine = retention::RetentionEngine::new(cfg, index);
    let (deleted, freed) = engine.force_cleanup(camera_id).await;

    println!(
        "removed {deleted} segments ({freed} bytes) for '{camera_id}' older than {} days",
        policy.retention_days
    );
}
