//! cockade_watch - command-line front end for the detection engine
//!
//! `image <path>` analyses one image and prints the result, the overlay
//! rectangle and the running statistics as JSON.
//! `live` opens the configured camera and polls until Ctrl-C or
//! `--duration-secs`, then prints statistics and recent activity.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use cockade_watch::{
    DetectionEngine, EngineConfig, EngineEvent, Facing, SkipReason, TriggerOutcome,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Backend base URL (overrides COCKADE_BACKEND_URL and the config file).
    #[arg(long, global = true)]
    backend_url: Option<String>,
    /// Class label to look for in detection responses.
    #[arg(long, global = true)]
    target_class: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one detection on an image file.
    Image {
        path: PathBuf,
    },
    /// Capture from the configured device and poll for detections.
    Live {
        /// Milliseconds between polling ticks.
        #[arg(long)]
        interval_ms: Option<u64>,
        /// Stop after this many seconds instead of waiting for Ctrl-C.
        #[arg(long)]
        duration_secs: Option<u64>,
        /// Camera facing (user|environment).
        #[arg(long)]
        facing: Option<Facing>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = EngineConfig::load()?;
    if let Some(url) = args.backend_url {
        config.service.base_url = url;
    }
    if let Some(class) = args.target_class {
        config.service.target_class = class;
    }
    config.validate()?;

    let engine = DetectionEngine::from_config(&config)?;
    match args.command {
        Command::Image { path } => run_image(&engine, &path),
        Command::Live {
            interval_ms,
            duration_secs,
            facing,
        } => run_live(
            &engine,
            interval_ms.map(Duration::from_millis),
            duration_secs.map(Duration::from_secs),
            facing,
        ),
    }
}

fn run_image(engine: &DetectionEngine, path: &Path) -> Result<()> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read image {}", path.display()))?;
    engine
        .authenticate()
        .context("could not obtain an auth token")?;

    let outcome = engine.analyze_image(&bytes)?;
    let result = match outcome {
        TriggerOutcome::Completed(result) => result,
        TriggerOutcome::Skipped(SkipReason::InFlight) => {
            return Err(anyhow!("a detection was already in flight"));
        }
        TriggerOutcome::Skipped(SkipReason::NoSource) => {
            return Err(anyhow!("image was not loaded"));
        }
    };

    let report = serde_json::json!({
        "result": result,
        "overlay": engine.overlay(),
        "stats": engine.stats(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    engine.shutdown();
    Ok(())
}

fn run_live(
    engine: &DetectionEngine,
    interval: Option<Duration>,
    duration: Option<Duration>,
    facing: Option<Facing>,
) -> Result<()> {
    let events = engine.subscribe();
    if let Err(err) = engine.authenticate() {
        log::warn!("starting without a credential ({}); will retry on first tick", err);
    }

    engine.start_capture(facing)?;
    let started = match interval {
        Some(interval) => engine.start_polling_every(interval),
        None => engine.start_polling(),
    };
    if !started {
        return Err(anyhow!("polling could not be started"));
    }

    let (stop_tx, stop_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    let deadline = duration.map(|d| Instant::now() + d);
    log::info!("cockade_watch polling; Ctrl-C to stop");
    loop {
        if stop_rx.try_recv().is_ok() {
            log::info!("shutdown signal received");
            break;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        match events.recv_timeout(Duration::from_millis(200)) {
            Ok(event) => report_event(&event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    engine.shutdown();
    let report = serde_json::json!({
        "stats": engine.stats(),
        "recent": engine.recent_activity(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn report_event(event: &EngineEvent) {
    match event {
        EngineEvent::DetectionCompleted(result) if result.is_detected() => {
            log::info!("target detected ({:.1}%)", result.confidence() * 100.0);
        }
        EngineEvent::DetectionCompleted(_) => log::debug!("no target in frame"),
        EngineEvent::DetectionFailed(err) => log::warn!("detection error: {}", err),
        EngineEvent::CaptureFailed(err) => log::error!("camera error: {}", err),
        EngineEvent::AuthFailed(err) => log::error!("auth error: {}", err),
        other => log::debug!("{:?}", other),
    }
}
