//! trapmosd - run the mosquito trap.
//!
//! Reads configuration from `TRAPMOS_CONFIG` plus `TRAPMOS_*` overrides, wires
//! camera, detector, location sources, uploader and status panel together and
//! runs the sensing loop until Ctrl-C or a camera failure.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use trapmos::config::TrapConfig;
use trapmos::detect::{InferenceBackend, StubBackend};
use trapmos::display::{DisplaySink, FileSink, LogSink, StatusDisplay};
use trapmos::location::{GpsSource, LocationManager, LocationSource, WifiSource};
use trapmos::pipeline::{Orchestrator, PipelineSettings};
use trapmos::upload::{CloudStore, DryRunStore, FirebaseStore, UploadQueue};

const WIFI_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about = "Mosquito trap: detect, locate, report")]
struct Args {
    /// Development mode: debug logging and a preview image of every processed frame.
    #[arg(long)]
    dev: bool,

    /// Configuration file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "TRAPMOS_CONFIG")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.dev { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    if let Some(path) = &args.config {
        std::env::set_var("TRAPMOS_CONFIG", path);
    }
    let cfg = TrapConfig::load()?;
    let device = cfg.device_identity()?;
    log::info!(
        "{} ({}) starting in {} mode",
        device.name,
        device.id,
        if args.dev { "development" } else { "normal" }
    );

    let sink: Box<dyn DisplaySink> = match &cfg.display.output_path {
        Some(path) => Box::new(FileSink::new(path)),
        None => Box::new(LogSink::new()),
    };
    let display = StatusDisplay::start(sink, cfg.display_settings())?;

    let store: Box<dyn CloudStore> = match cfg.firebase_config()? {
        Some(firebase) => {
            log::info!(
                "uploading to bucket {} / project {}",
                firebase.bucket,
                firebase.project_id
            );
            Box::new(FirebaseStore::new(firebase)?)
        }
        None => {
            log::warn!("uploads disabled; window reports are only logged");
            Box::new(DryRunStore)
        }
    };
    let uploads = UploadQueue::start(
        store,
        device,
        Some(display.clone()),
        cfg.upload.idle_poll,
    )?;

    let locations = LocationManager::start(gps_source(&cfg), wifi_source(&cfg))?;
    let camera = trapmos::ingest::open_camera(cfg.camera_config())?;
    let backend = inference_backend(&cfg)?;

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        handler_stop.store(true, Ordering::SeqCst);
    })
    .expect("error setting Ctrl-C handler");

    let orchestrator = Orchestrator::new(
        PipelineSettings::from_config(&cfg, args.dev),
        camera,
        backend,
        locations,
        uploads,
        display,
    );
    let summary = orchestrator.run(&stop)?;
    log::info!(
        "processed {} of {} frames; {} windows reported",
        summary.frames_processed,
        summary.frames_read,
        summary.windows_emitted
    );
    Ok(())
}

/// A GPS that cannot be opened leaves the trap on WiFi positioning.
fn gps_source(cfg: &TrapConfig) -> Option<Box<dyn LocationSource>> {
    if !cfg.location.gps_enabled {
        return None;
    }
    match GpsSource::open(
        &cfg.location.gps_device,
        cfg.location.gps_baud,
        cfg.location.gps_poll,
    ) {
        Ok(source) => Some(Box::new(source)),
        Err(err) => {
            log::warn!("gps unavailable: {:#}", err);
            None
        }
    }
}

fn wifi_source(cfg: &TrapConfig) -> Option<Box<dyn LocationSource>> {
    cfg.location.wifi_enabled.then(|| {
        Box::new(WifiSource::new(
            cfg.location.wifi_endpoint.clone(),
            WIFI_LOOKUP_TIMEOUT,
            cfg.location.wifi_poll,
        )) as Box<dyn LocationSource>
    })
}

fn inference_backend(cfg: &TrapConfig) -> Result<Box<dyn InferenceBackend>> {
    let Some(model_path) = &cfg.detection.model_path else {
        log::warn!("no model configured; using the stub detector");
        return Ok(Box::new(StubBackend::new()));
    };
    #[cfg(feature = "backend-tract")]
    {
        let side = cfg.camera.inference_width;
        let backend = trapmos::detect::TractBackend::new(
            model_path,
            side,
            side,
            cfg.detection.labels.clone(),
        )?
        .with_thresholds(
            cfg.detection.min_confidence,
            trapmos::detect::yolo::DEFAULT_IOU,
        );
        Ok(Box::new(backend))
    }
    #[cfg(not(feature = "backend-tract"))]
    {
        Err(anyhow::anyhow!(
            "model {} requires the backend-tract feature",
            model_path.display()
        ))
    }
}
