//! Sound event detection service binary
//!
//! Listens to the configured input device (or replays a WAV file) and
//! notifies every detection state change.

use anyhow::Context;
use clap::Parser;
use ringr::capture::{list_input_devices, DeviceSource};
use ringr::config::DEFAULT_CONFIG_FILE;
use ringr::dispatch::DEFAULT_QUEUE_CAPACITY;
use ringr::replay::WavSource;
use ringr::{
    build_notifier, load_config, AudioSource, DetectorConfig, NotificationDispatcher, NotifyHandle,
    PipelineStats, ToneDetector,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Time allowed for queued notifications to go out on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "ringr", version, about = "ringr. Sound event detection system")]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long = "conf", value_name = "FILE", default_value = DEFAULT_CONFIG_FILE)]
    conf: PathBuf,

    /// Show debug log messages in the log
    #[arg(short, long)]
    verbose: bool,

    /// Analyse a WAV file instead of the live input
    #[arg(long, value_name = "WAV")]
    replay: Option<PathBuf>,

    /// List input devices and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    if args.list_devices {
        match list_input_devices() {
            Ok(devices) => {
                for (index, name) in devices.iter().enumerate() {
                    println!("{:>3}  {}", index, name);
                }
                return;
            }
            Err(e) => {
                error!("Failed to list input devices: {}", e);
                std::process::exit(1);
            }
        }
    }

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        std::process::exit(1);
    }

    info!("ringr stopped");
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "ringr=debug" } else { "ringr=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = load_config(&args.conf, |key| std::env::var(key).ok())
        .context("Failed to load configuration")?;

    let notifier = build_notifier(&config.notifier)
        .await
        .context("Failed to create notifier")?;

    let stats = Arc::new(PipelineStats::default());
    let (notify, worker) =
        NotificationDispatcher::spawn(notifier, DEFAULT_QUEUE_CAPACITY, Arc::clone(&stats));

    // Sensors start in a known state
    notify.send(false);

    match args.replay {
        Some(path) => replay(path, &config.detector, notify, Arc::clone(&stats)).await?,
        None => listen(&config.detector, notify, Arc::clone(&stats)).await?,
    }

    if tokio::time::timeout(SHUTDOWN_GRACE, worker).await.is_err() {
        warn!("Pending notifications not delivered within {:?}", SHUTDOWN_GRACE);
    }

    let snapshot = stats.snapshot();
    info!(
        "Blocks processed: {}, skipped: {}, rejected: {}; notifications sent: {}, dropped: {}",
        snapshot.blocks_processed,
        snapshot.blocks_skipped,
        snapshot.blocks_rejected,
        snapshot.notifications_sent,
        snapshot.notifications_dropped
    );

    Ok(())
}

/// Detect on the live input until interrupted
async fn listen(
    config: &DetectorConfig,
    notify: NotifyHandle,
    stats: Arc<PipelineStats>,
) -> anyhow::Result<()> {
    let source = DeviceSource::open(config.device.as_deref(), config.latency)
        .context("Failed to open input device")?;
    let mut detector = ToneDetector::new(config, source.sample_rate(), stats)?;
    let block_size = detector.params().block_size;

    let stream = source
        .start(block_size, move |block, now| {
            forward(&mut detector, &notify, block, now)
        })
        .context("Failed to start capture")?;

    info!("Starting detector");
    shutdown_signal().await;

    // Releases the device
    drop(stream);
    Ok(())
}

/// Detect on a recorded file, as fast as it can be decoded
async fn replay(
    path: PathBuf,
    config: &DetectorConfig,
    notify: NotifyHandle,
    stats: Arc<PipelineStats>,
) -> anyhow::Result<()> {
    let source = WavSource::open(&path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut detector = ToneDetector::new(config, source.sample_rate(), stats)?;
    let block_size = detector.params().block_size;

    info!("Starting detector");
    let summary = tokio::task::spawn_blocking(move || {
        source.start(block_size, move |block, now| {
            forward(&mut detector, &notify, block, now)
        })
    })
    .await
    .context("Replay task failed")??;

    info!("Replay finished: {} blocks", summary.blocks);
    Ok(())
}

/// Audio-thread side of the pipeline: analyse, then enqueue state changes
fn forward(detector: &mut ToneDetector, notify: &NotifyHandle, block: &[f32], now: Instant) {
    match detector.process_block(block, now) {
        Ok(outcome) => {
            for state in outcome.notifications().iter() {
                notify.send(state);
            }
        }
        Err(e) => warn!("Skipping block: {}", e),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for interrupt: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Interrupt received, shutting down"),
        _ = terminate => info!("Termination requested, shutting down"),
    }
}
