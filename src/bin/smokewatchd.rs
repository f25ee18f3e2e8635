//! smokewatchd - smoking detection edge daemon
//!
//! This daemon:
//! 1. Loads configuration (JSON file + environment overrides)
//! 2. Loads the detector model and connects the camera
//! 3. Runs the detection loop: preprocess, detect, decide, alert
//! 4. Reports detection events to the backend over REST and the push channel
//! 5. Drains queued reports and logs a run summary on exit (Ctrl-C or end of stream)

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::Ordering;

use smokewatch::config::CONFIG_ENV;
use smokewatch::detect::StubBackend;
use smokewatch::report::{
    build_push_transport, ApiClient, BackendDelivery, PushChannel, ReportDispatcher,
};
use smokewatch::{
    build_alert_sink, BackendRegistry, CameraSource, DetectionService, ServiceConfig,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Smoking detection edge daemon",
    after_help = "The default CAMERA_SOURCE (0, i.e. /dev/video0) needs a build with \
                  `--features ingest-v4l2`. Use CAMERA_SOURCE=stub://smoke to run without a camera."
)]
struct Args {
    /// JSON config file; environment variables override its values.
    #[arg(long, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Stop after processing this many frames.
    #[arg(long)]
    max_frames: Option<u64>,

    /// Detect and alert locally without contacting the backend.
    #[arg(long)]
    no_report: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = ServiceConfig::load_from(args.config.as_deref())?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cfg.log_level))
        .init();

    log::info!("smokewatchd {} starting", env!("CARGO_PKG_VERSION"));
    log::info!(
        "camera={} venue={} floor={} zone={} source={} {}x{}@{}fps",
        cfg.site.camera_id,
        cfg.site.venue_id,
        cfg.site.floor_number,
        cfg.site.zone_id,
        cfg.camera.source,
        cfg.camera.width,
        cfg.camera.height,
        cfg.camera.target_fps
    );
    log::info!(
        "engine: buffer={} threshold={:.2} cooldown={}s sequence_reset={}s max_sequences={}",
        cfg.engine.buffer_size,
        cfg.engine.detection_threshold,
        cfg.engine.alert_cooldown.as_secs(),
        cfg.engine.sequence_reset.as_secs(),
        cfg.engine.max_sequences
    );

    let mut registry = build_registry(&cfg)?;
    registry.warm_up().context("detector warm-up failed")?;

    let source = CameraSource::new(cfg.camera.clone())?;
    let alert = build_alert_sink(&cfg.alert.sound_path);
    log::info!("alert sink: {}", alert.name());

    let mut service = DetectionService::new(Box::new(source), registry, cfg.engine.clone(), alert)
        .with_max_frames(args.max_frames)
        .with_max_read_failures(cfg.max_read_failures);

    if args.no_report {
        log::info!("reporting disabled (--no-report)");
    } else {
        let dispatcher = build_dispatcher(&cfg)?;
        log::info!(
            "reporting to {} (policy {:?}, push {})",
            cfg.api.base_url,
            cfg.report.policy,
            cfg.api.push_url
        );
        service = service.with_reporting(dispatcher, cfg.report.policy);
    }

    let stop = service.stop_handle();
    ctrlc::set_handler(move || {
        stop.store(true, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("failed to install Ctrl-C handler: {}", e))?;

    let summary = service.run()?;
    log::info!(
        "run summary: frames={} detections={} alerts={} reports_submitted={} reports_dropped={} read_failures={} detector_errors={}",
        summary.frames,
        summary.detections,
        summary.alerts,
        summary.reports_submitted,
        summary.reports_dropped,
        summary.read_failures,
        summary.detector_errors
    );
    if let Some(delivery) = summary.delivery {
        log::info!(
            "delivery: processed={} pushed={} persisted={} persist_failed={} encode_failed={}",
            delivery.processed,
            delivery.pushed,
            delivery.persisted,
            delivery.persist_failed,
            delivery.encode_failed
        );
    }
    Ok(())
}

fn build_registry(cfg: &ServiceConfig) -> Result<BackendRegistry> {
    let mut registry = BackendRegistry::new();
    registry.register(StubBackend::new(cfg.detector.confidence_threshold));

    match cfg.detector.backend.as_str() {
        "tract" => {
            #[cfg(feature = "backend-tract")]
            {
                let backend = smokewatch::detect::TractBackend::new(
                    &cfg.detector.model_path,
                    cfg.detector.input_size,
                )?
                .with_thresholds(
                    cfg.detector.confidence_threshold,
                    cfg.detector.iou_threshold,
                );
                registry.register(backend);
            }
            #[cfg(not(feature = "backend-tract"))]
            return Err(anyhow!(
                "detector backend 'tract' requires the backend-tract feature"
            ));
        }
        "stub" => log::warn!("using stub detector backend; no model will be loaded"),
        _ => {}
    }

    registry.set_default(&cfg.detector.backend)?;
    Ok(registry)
}

fn build_dispatcher(cfg: &ServiceConfig) -> Result<ReportDispatcher> {
    let api = ApiClient::new(&cfg.api.base_url, cfg.api.api_key.clone());
    match api.camera_config(&cfg.site.camera_id) {
        Ok(record) => log::info!(
            "camera {} registered with backend: {}",
            cfg.site.camera_id,
            record
        ),
        Err(e) => log::warn!(
            "camera registration lookup failed (continuing): {:#}",
            e
        ),
    }

    let push = match build_push_transport(
        &cfg.api.push_url,
        cfg.api.api_key.as_deref(),
        &cfg.site.camera_id,
    ) {
        Ok(transport) => Some(PushChannel::new(transport)),
        Err(e) => {
            log::warn!("push channel disabled: {:#}", e);
            None
        }
    };

    let delivery = BackendDelivery::new(api, push);
    ReportDispatcher::spawn(
        cfg.site.clone(),
        Box::new(delivery),
        cfg.report.queue_capacity,
    )
}
