//! VShort worker binary.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vshort_media::{check_ffmpeg, check_ffprobe, check_ytdlp, detect_transcriber, Transcriber};
use vshort_models::SourceRef;
use vshort_worker::{
    ClipDelivery, Collaborators, ExportDelivery, LogDelivery, Orchestrator, Reaper, WorkerConfig,
};

#[derive(Debug, Parser)]
#[command(
    name = "vshort-worker",
    version,
    about = "Turn any video into vertical, captioned short clips"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Process one video (http(s) URL or local file) into clips
    Process {
        /// URL or path of the source video
        source: String,
        /// Base name for the produced clips
        #[arg(long)]
        name: Option<String>,
        /// Copy finished clips into this directory
        #[arg(long, env = "VSHORT_EXPORT_DIR")]
        export_dir: Option<PathBuf>,
    },
    /// Delete sessions older than the retention window
    Reap {
        /// Keep sweeping on the configured interval until interrupted
        #[arg(long)]
        watch: bool,
    },
    /// Verify the work directory and report which tools are installed
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing()?;

    let cli = Cli::parse();

    let config = WorkerConfig::from_env();
    config.validate()?;
    info!("Worker config: {:?}", config);

    if let Some(addr) = &config.metrics_addr {
        vshort_worker::metrics::install_exporter(addr)?;
        info!("Serving metrics on {}", addr);
    }

    match cli.command {
        Command::Process {
            source,
            name,
            export_dir,
        } => process(config, &source, name.as_deref(), export_dir).await,
        Command::Reap { watch: keep_running } => reap(config, keep_running).await,
        Command::Check => check(&config).await,
    }
}

/// Colored output for dev, JSON for production.
fn init_tracing() -> anyhow::Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("vshort=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
    Ok(())
}

/// Cancel signal that flips on Ctrl-C.
fn ctrl_c_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            let _ = tx.send(true);
        }
    });
    rx
}

async fn process(
    config: WorkerConfig,
    source: &str,
    name: Option<&str>,
    export_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let source = SourceRef::parse(source)?;

    // Expire old sessions before starting new work
    let reaper = Reaper::new(&config.work_dir, config.retention);
    if let Err(e) = reaper.sweep().await {
        warn!("Start-up session sweep failed: {}", e);
    }

    let collaborators = Collaborators::system(&config);
    let (event_tx, mut event_rx) = mpsc::channel(64);
    let orchestrator = Orchestrator::new(config, collaborators)?.with_events(event_tx);

    let event_log = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if let Ok(line) = serde_json::to_string(&event) {
                info!(target: "vshort_worker::events", "{}", line);
            }
        }
    });

    let delivery: Box<dyn ClipDelivery> = match export_dir {
        Some(dir) => Box::new(ExportDelivery::new(dir)),
        None => Box::new(LogDelivery),
    };

    let result = orchestrator
        .process(&source, name, delivery.as_ref(), ctrl_c_signal())
        .await;

    // Closing the event channel ends the log task
    drop(orchestrator);
    event_log.await.ok();

    match result {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Err(e) => {
            error!(kind = e.kind(), "Job failed: {}", e);
            Err(e.into())
        }
    }
}

async fn reap(config: WorkerConfig, keep_running: bool) -> anyhow::Result<()> {
    let reaper = Reaper::new(&config.work_dir, config.retention);
    let report = reaper.sweep().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if keep_running {
        info!(
            "Sweeping {} every {}s",
            config.work_dir.display(),
            config.reap_interval.as_secs()
        );
        reaper
            .run_periodic(config.reap_interval, ctrl_c_signal())
            .await;
    }
    Ok(())
}

async fn check(config: &WorkerConfig) -> anyhow::Result<()> {
    println!(
        "vshort-worker check: starting with work_dir={}",
        config.work_dir.display()
    );

    tokio::fs::create_dir_all(&config.work_dir)
        .await
        .with_context(|| format!("cannot create {}", config.work_dir.display()))?;
    let marker = config.work_dir.join(".write-check");
    tokio::fs::write(&marker, b"ok")
        .await
        .with_context(|| format!("{} is not writable", config.work_dir.display()))?;
    tokio::fs::remove_file(&marker).await.ok();

    let ffmpeg = check_ffmpeg()?;
    let ffprobe = check_ffprobe()?;
    println!("  ffmpeg:  {}", ffmpeg.display());
    println!("  ffprobe: {}", ffprobe.display());

    match check_ytdlp() {
        Ok(path) => println!("  yt-dlp:  {}", path.display()),
        Err(_) => println!("  yt-dlp:  not installed (URL sources unavailable)"),
    }

    let transcriber = detect_transcriber(&config.whisper_model);
    if transcriber.is_available() {
        println!("  captions: {} (model {})", transcriber.name(), config.whisper_model);
    } else {
        println!("  captions: not installed (clips are delivered without captions)");
    }

    println!("vshort-worker check: ok");
    Ok(())
}
