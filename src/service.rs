//! The detection run loop.
//!
//! Per frame: capture, preprocess, detect, update the decision engine, fire
//! the alert sink when the engine says so, and queue a report. The engine is
//! only touched from this loop; reporting sees snapshots.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};

use crate::alert::AlertSink;
use crate::config::ReportPolicy;
use crate::detect::BackendRegistry;
use crate::engine::{DecisionEngine, EngineConfig};
use crate::ingest::FrameSource;
use crate::preprocess::Preprocessor;
use crate::report::{DeliveryStats, ReportDispatcher, ReportJob};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);
const READ_RETRY_DELAY: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_READ_FAILURES: u32 = 30;

/// Counters reported when the loop exits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub detections: u64,
    pub alerts: u64,
    pub reports_submitted: u64,
    pub reports_dropped: u64,
    pub read_failures: u64,
    pub detector_errors: u64,
    /// Worker-side counters, present when reporting was enabled.
    pub delivery: Option<DeliveryStats>,
}

struct Reporting {
    dispatcher: ReportDispatcher,
    policy: ReportPolicy,
}

pub struct DetectionService {
    source: Box<dyn FrameSource>,
    detector: BackendRegistry,
    engine_config: EngineConfig,
    alert: Box<dyn AlertSink>,
    reporting: Option<Reporting>,
    preprocessor: Preprocessor,
    max_frames: Option<u64>,
    max_read_failures: u32,
    stop: Arc<AtomicBool>,
}

impl DetectionService {
    pub fn new(
        source: Box<dyn FrameSource>,
        detector: BackendRegistry,
        engine_config: EngineConfig,
        alert: Box<dyn AlertSink>,
    ) -> Self {
        Self {
            source,
            detector,
            engine_config,
            alert,
            reporting: None,
            preprocessor: Preprocessor::default(),
            max_frames: None,
            max_read_failures: DEFAULT_MAX_READ_FAILURES,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_reporting(mut self, dispatcher: ReportDispatcher, policy: ReportPolicy) -> Self {
        self.reporting = Some(Reporting { dispatcher, policy });
        self
    }

    pub fn with_preprocessor(mut self, preprocessor: Preprocessor) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    /// Stop after this many processed frames.
    pub fn with_max_frames(mut self, max_frames: Option<u64>) -> Self {
        self.max_frames = max_frames;
        self
    }

    pub fn with_max_read_failures(mut self, limit: u32) -> Self {
        self.max_read_failures = limit.max(1);
        self
    }

    /// Flag that ends the loop after the current frame when set.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Run until end of stream, the frame limit, a stop request or camera loss.
    ///
    /// Queued reports are drained before this returns, also on error.
    pub fn run(mut self) -> Result<RunSummary> {
        self.source.connect().context("connect camera source")?;
        let stats = self.source.stats();
        log::info!("camera connected: {}", stats.source);
        if let Some(name) = self.detector.default_name() {
            log::info!("detector backend: {}", name);
        }

        let mut summary = RunSummary::default();
        let outcome = self.run_loop(&mut summary);

        if let Some(reporting) = self.reporting.take() {
            summary.reports_submitted = reporting.dispatcher.submitted();
            summary.reports_dropped = reporting.dispatcher.dropped();
            match reporting.dispatcher.shutdown() {
                Ok(dispatch) => summary.delivery = Some(dispatch.delivery),
                Err(err) => log::error!("report dispatcher shutdown failed: {:#}", err),
            }
        }

        outcome.map(|()| summary)
    }

    fn run_loop(&mut self, summary: &mut RunSummary) -> Result<()> {
        let started = Instant::now();
        let mut engine = DecisionEngine::new(self.engine_config.clone(), started);
        let mut last_now = started;
        let mut last_health_log = started;
        let mut consecutive_failures = 0u32;

        loop {
            if self.stop.load(Ordering::SeqCst) {
                log::info!("stop requested");
                return Ok(());
            }
            if self.max_frames.is_some_and(|max| summary.frames >= max) {
                log::info!("frame limit reached ({} frames)", summary.frames);
                return Ok(());
            }

            let frame = match self.source.next_frame() {
                Ok(Some(frame)) => {
                    consecutive_failures = 0;
                    frame
                }
                Ok(None) => {
                    log::info!("camera stream ended");
                    return Ok(());
                }
                Err(err) => {
                    consecutive_failures += 1;
                    summary.read_failures += 1;
                    log::warn!(
                        "frame read failed ({}/{}): {:#}",
                        consecutive_failures,
                        self.max_read_failures,
                        err
                    );
                    if consecutive_failures >= self.max_read_failures {
                        return Err(anyhow!(
                            "camera lost after {} consecutive read failures",
                            consecutive_failures
                        ));
                    }
                    std::thread::sleep(READ_RETRY_DELAY);
                    continue;
                }
            };

            let processed = self.preprocessor.apply(frame.image());
            let result = match self.detector.detect(&processed) {
                Ok(result) => result,
                Err(err) => {
                    summary.detector_errors += 1;
                    log::warn!("detection failed on frame {}: {:#}", frame.sequence(), err);
                    continue;
                }
            };

            // Engine time must never go backwards.
            let now = frame.captured_at().max(last_now);
            last_now = now;

            let decision = engine.update(&result, now);
            summary.frames += 1;
            if result.has_detection() {
                summary.detections += 1;
            }

            if decision.alert {
                summary.alerts += 1;
                log::info!(
                    "alert: ratio={:.2} sequences={} confidence={:.2}",
                    decision.buffer_ratio.unwrap_or(0.0),
                    decision.sequence_count,
                    result.top_confidence()
                );
                if let Err(err) = self.alert.fire() {
                    log::error!("alert sink {} failed: {:#}", self.alert.name(), err);
                }
                engine.record_alert(now);
            }

            if let Some(reporting) = self.reporting.as_mut() {
                if reporting
                    .policy
                    .should_report(result.has_detection(), decision.alert)
                {
                    let job = ReportJob {
                        snapshot: engine.snapshot(now),
                        alert: decision.alert,
                        original: frame.into_image(),
                        processed,
                        result,
                    };
                    reporting.dispatcher.submit(job);
                }
            }

            if decision.fps_updated {
                log::debug!("fps={:.1}", engine.metrics().fps());
            }

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                let stats = self.source.stats();
                let snapshot = engine.snapshot(Instant::now().max(now));
                log::info!(
                    "camera health={} captured={} processed={} fps={:.1} ratio={:.2} sequences={} source={}",
                    self.source.is_healthy(),
                    stats.frames_captured,
                    snapshot.frame_count,
                    snapshot.fps,
                    snapshot.buffer_ratio.unwrap_or(0.0),
                    snapshot.sequence_count,
                    stats.source
                );
                last_health_log = Instant::now();
            }
        }
    }
}
