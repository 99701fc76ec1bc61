use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use beatlight::audio::capture::input_device_names;
use beatlight::audio::ring::sample_ring;
use beatlight::config::AppConfig;
use beatlight::logging::HitLogger;
use beatlight::pipeline::stats::PipelineStats;
use beatlight::pipeline::{GraphWorker, Pipeline};
use beatlight::testing::kick_click_track;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;

#[derive(Parser, Debug)]
#[command(
    name = "beatlight",
    about = "Live percussive hit forecasting to scheduled lighting events"
)]
struct Cli {
    /// Path to a JSON configuration file (defaults are used when omitted)
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Capture live audio and run the forecasting pipeline
    Run {
        /// Stop after this many seconds (overrides the config value)
        #[arg(long)]
        timeout: Option<u64>,
        /// Override the hit/prediction log directory
        #[arg(long)]
        log_dir: Option<String>,
        /// Override the MQTT broker URI (tcp://<host>:<port>)
        #[arg(long)]
        broker: Option<String>,
        /// Disable the hit/prediction log file
        #[arg(long, default_value_t = false)]
        no_log: bool,
    },
    /// Run a synthetic click track through the full graph offline and
    /// stream the resulting hit and forecast records to stdout
    Simulate {
        /// Click tempo in BPM
        #[arg(long, default_value_t = 120)]
        bpm: u32,
        /// Length of the rendered track in seconds
        #[arg(long, default_value_t = 10.0)]
        seconds: f64,
        /// Suppress forecast records (hits only)
        #[arg(long, default_value_t = false)]
        hits_only: bool,
    },
    /// List available audio input devices
    Devices,
}

fn main() -> ExitCode {
    env_logger::init();
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = cli
        .config
        .as_ref()
        .map(AppConfig::load_from_file)
        .unwrap_or_default();

    match cli.command {
        Commands::Run {
            timeout,
            log_dir,
            broker,
            no_log,
        } => run_pipeline(config, timeout, log_dir, broker, no_log),
        Commands::Simulate {
            bpm,
            seconds,
            hits_only,
        } => run_simulation(config, bpm, seconds, hits_only),
        Commands::Devices => run_devices(),
    }
}

fn run_pipeline(
    mut config: AppConfig,
    timeout: Option<u64>,
    log_dir: Option<String>,
    broker: Option<String>,
    no_log: bool,
) -> Result<ExitCode> {
    if let Some(seconds) = timeout {
        config.runtime.run_timeout_seconds = Some(seconds);
    }
    if let Some(dir) = log_dir {
        config.logger.log_dir = dir;
    }
    if let Some(uri) = broker {
        config.publisher.broker_uri = uri;
    }
    if no_log {
        config.logger.enabled = false;
    }

    let timeout = config.runtime.run_timeout_seconds.map(Duration::from_secs);
    let handle = Pipeline::start(config)?;

    match timeout {
        Some(duration) => {
            eprintln!("running for {:?} (Ctrl+C to abort)", duration);
            std::thread::sleep(duration);
        }
        None => {
            eprintln!("running until killed (Ctrl+C)");
            loop {
                std::thread::sleep(Duration::from_millis(500));
            }
        }
    }

    let snap = handle.stats();
    handle.stop()?;
    eprintln!(
        "pipeline stopped: {} frames, {:?} hits, {} commands ({} dropped)",
        snap.frames, snap.hits, snap.commands_emitted, snap.commands_dropped
    );
    Ok(ExitCode::from(0))
}

fn run_simulation(
    mut config: AppConfig,
    bpm: u32,
    seconds: f64,
    hits_only: bool,
) -> Result<ExitCode> {
    anyhow::ensure!(bpm > 0, "bpm must be positive");
    anyhow::ensure!(
        (1.0..=600.0).contains(&seconds),
        "seconds must be in [1, 600]"
    );
    config.logger.enabled = false;
    config.validate()?;

    let period = 60.0 / bpm as f64;
    let audio = kick_click_track(config.audio.sample_rate, period, seconds, 55.0);

    let (mut producer, consumer) = sample_ring(audio.len() + 1);
    producer.push(&audio);

    // channel depth sized so a full offline run fits without lagging
    let depth = ((seconds * 40.0) as usize).max(1024);
    let (hit_tx, mut hit_rx) = broadcast::channel(depth);
    let (forecast_tx, mut forecast_rx) = broadcast::channel(depth);
    let logger = Arc::new(HitLogger::disabled());
    let stats = Arc::new(PipelineStats::new());

    let mut worker = GraphWorker::new(
        &config,
        consumer,
        None,
        logger,
        Arc::clone(&stats),
        hit_tx,
        forecast_tx,
    );

    // the ring is preloaded, so drain mode processes the whole track
    let stop = AtomicBool::new(true);
    worker.run(&stop);

    while let Ok(event) = hit_rx.try_recv() {
        println!("{}", serde_json::to_string(&event)?);
    }
    if !hits_only {
        while let Ok(frame) = forecast_rx.try_recv() {
            println!("{}", serde_json::to_string(&frame)?);
        }
    }

    let snap = stats.snapshot();
    eprintln!(
        "simulated {:.1} s at {} BPM: {} frames, {} kick hits, {} forecast emissions",
        seconds,
        bpm,
        snap.frames,
        snap.hits[0],
        snap.forecast_emissions
    );
    Ok(ExitCode::from(0))
}

fn run_devices() -> Result<ExitCode> {
    let names = input_device_names();
    if names.is_empty() {
        println!("No input devices found");
        return Ok(ExitCode::from(0));
    }
    for name in names {
        println!("{name}");
    }
    Ok(ExitCode::from(0))
}
