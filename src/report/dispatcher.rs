//! Background report delivery.
//!
//! The run loop hands each reportable frame to a bounded queue and moves on.
//! One worker thread encodes images, samples system metrics, builds the
//! event and delivers it: push notification first, then the REST call. The
//! worker only sees copies of engine state, never the engine itself.

use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context, Result};
use image::RgbImage;

use crate::detect::DetectionFrameResult;
use crate::engine::EngineSnapshot;
use crate::report::client::ApiClient;
use crate::report::event::{DetectionEvent, SiteIdentity, SystemMetrics};
use crate::report::images::FrameImages;
use crate::report::push::PushChannel;
use crate::report::system::SystemProbe;

pub const DEFAULT_QUEUE_CAPACITY: usize = 8;

/// Everything the worker needs to report one frame.
pub struct ReportJob {
    pub result: DetectionFrameResult,
    pub snapshot: EngineSnapshot,
    pub alert: bool,
    pub original: RgbImage,
    pub processed: RgbImage,
}

/// Final destinations for a serialized event.
pub trait EventDelivery: Send {
    /// Best-effort notification; failures are absorbed by the implementation.
    fn notify(&mut self, event: &DetectionEvent, body: &str) -> bool;

    /// Persist the event with the backend.
    fn persist(&mut self, event: &DetectionEvent, body: &str) -> Result<()>;

    fn shutdown(&mut self) {}
}

/// Push channel plus REST client.
pub struct BackendDelivery {
    push: Option<PushChannel>,
    api: ApiClient,
}

impl BackendDelivery {
    pub fn new(api: ApiClient, push: Option<PushChannel>) -> Self {
        Self { push, api }
    }
}

impl EventDelivery for BackendDelivery {
    fn notify(&mut self, _event: &DetectionEvent, body: &str) -> bool {
        match &mut self.push {
            Some(push) => push.send(body),
            None => false,
        }
    }

    fn persist(&mut self, _event: &DetectionEvent, body: &str) -> Result<()> {
        self.api.post_detection(body)
    }

    fn shutdown(&mut self) {
        if let Some(push) = &mut self.push {
            push.close();
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub processed: u64,
    pub pushed: u64,
    pub persisted: u64,
    pub persist_failed: u64,
    pub encode_failed: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub submitted: u64,
    pub dropped: u64,
    pub delivery: DeliveryStats,
}

pub struct ReportDispatcher {
    sender: Option<SyncSender<ReportJob>>,
    worker: Option<JoinHandle<DeliveryStats>>,
    submitted: u64,
    dropped: u64,
}

impl ReportDispatcher {
    pub fn spawn(
        site: SiteIdentity,
        delivery: Box<dyn EventDelivery>,
        capacity: usize,
    ) -> Result<Self> {
        let (sender, receiver) = mpsc::sync_channel(capacity.max(1));
        let worker = thread::Builder::new()
            .name("report-worker".to_string())
            .spawn(move || run_worker(site, delivery, receiver))
            .context("spawn report worker")?;
        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
            submitted: 0,
            dropped: 0,
        })
    }

    /// Queue a job without blocking. Returns false when the job was dropped.
    pub fn submit(&mut self, job: ReportJob) -> bool {
        let Some(sender) = &self.sender else {
            self.dropped += 1;
            return false;
        };
        match sender.try_send(job) {
            Ok(()) => {
                self.submitted += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                log::warn!(
                    "report queue full; dropping report ({} dropped so far)",
                    self.dropped
                );
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped += 1;
                log::warn!("report worker stopped; dropping report");
                false
            }
        }
    }

    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Close the queue, let the worker drain it and join.
    pub fn shutdown(mut self) -> Result<DispatchSummary> {
        self.sender.take();
        let delivery = match self.worker.take() {
            Some(worker) => worker
                .join()
                .map_err(|_| anyhow!("report worker panicked"))?,
            None => DeliveryStats::default(),
        };
        Ok(DispatchSummary {
            submitted: self.submitted,
            dropped: self.dropped,
            delivery,
        })
    }
}

impl Drop for ReportDispatcher {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_worker(
    site: SiteIdentity,
    mut delivery: Box<dyn EventDelivery>,
    receiver: Receiver<ReportJob>,
) -> DeliveryStats {
    let mut probe = SystemProbe::new();
    let mut stats = DeliveryStats::default();

    for job in receiver {
        stats.processed += 1;
        let images = FrameImages {
            original: job.original,
            processed: job.processed,
        };
        let image_data = match images.encode(&job.result) {
            Ok(data) => data,
            Err(err) => {
                stats.encode_failed += 1;
                log::warn!("report image encoding failed: {:#}", err);
                continue;
            }
        };
        let (cpu, ram) = probe.sample();
        let event = DetectionEvent::build(
            &site,
            &job.result,
            &job.snapshot,
            image_data,
            SystemMetrics::new(cpu, ram, &job.snapshot),
        );
        let body = match serde_json::to_string(&event) {
            Ok(body) => body,
            Err(err) => {
                stats.encode_failed += 1;
                log::warn!("report serialization failed: {}", err);
                continue;
            }
        };

        if delivery.notify(&event, &body) {
            stats.pushed += 1;
        }
        match delivery.persist(&event, &body) {
            Ok(()) => {
                stats.persisted += 1;
                log::info!(
                    "detection reported (confidence {:.2}, alert {})",
                    event.location.confidence,
                    job.alert
                );
            }
            Err(err) => {
                stats.persist_failed += 1;
                log::warn!("detection report failed: {:#}", err);
            }
        }
    }

    delivery.shutdown();
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, Detection};
    use std::sync::{Arc, Barrier, Mutex};
    use std::time::Duration;

    #[derive(Default)]
    struct Recorded {
        calls: Vec<&'static str>,
        bodies: Vec<String>,
        shutdown: bool,
    }

    struct RecordingDelivery {
        log: Arc<Mutex<Recorded>>,
        fail_persist: bool,
        gate: Option<Arc<Barrier>>,
    }

    impl EventDelivery for RecordingDelivery {
        fn notify(&mut self, _event: &DetectionEvent, body: &str) -> bool {
            if let Some(gate) = self.gate.take() {
                gate.wait();
                gate.wait();
            }
            let mut log = self.log.lock().expect("log");
            log.calls.push("notify");
            log.bodies.push(body.to_string());
            true
        }

        fn persist(&mut self, _event: &DetectionEvent, _body: &str) -> Result<()> {
            self.log.lock().expect("log").calls.push("persist");
            if self.fail_persist {
                Err(anyhow!("backend down"))
            } else {
                Ok(())
            }
        }

        fn shutdown(&mut self) {
            self.log.lock().expect("log").shutdown = true;
        }
    }

    fn job() -> ReportJob {
        ReportJob {
            result: DetectionFrameResult::from_detections(vec![Detection::new(
                BoundingBox::new(4, 4, 12, 12),
                0.7,
            )]),
            snapshot: EngineSnapshot {
                buffer_len: 3,
                buffer_ratio: Some(1.0),
                sequence_count: 0,
                frame_count: 3,
                total_detections: 3,
                fps: 0.0,
                detection_rate: 0.0,
                elapsed: Duration::ZERO,
            },
            alert: true,
            original: RgbImage::new(16, 16),
            processed: RgbImage::new(16, 16),
        }
    }

    #[test]
    fn pushes_before_persisting_and_drains_on_shutdown() -> Result<()> {
        let log = Arc::new(Mutex::new(Recorded::default()));
        let delivery = RecordingDelivery {
            log: Arc::clone(&log),
            fail_persist: false,
            gate: None,
        };
        let mut dispatcher =
            ReportDispatcher::spawn(SiteIdentity::default(), Box::new(delivery), 8)?;
        assert!(dispatcher.submit(job()));
        assert!(dispatcher.submit(job()));
        let summary = dispatcher.shutdown()?;

        assert_eq!(summary.submitted, 2);
        assert_eq!(summary.dropped, 0);
        assert_eq!(summary.delivery.persisted, 2);
        assert_eq!(summary.delivery.pushed, 2);

        let log = log.lock().expect("log");
        assert_eq!(log.calls, vec!["notify", "persist", "notify", "persist"]);
        assert!(log.shutdown);
        let body: serde_json::Value = serde_json::from_str(&log.bodies[0])?;
        assert_eq!(body["cameraId"], "1");
        assert_eq!(body["location"]["x"], 8);
        Ok(())
    }

    #[test]
    fn persist_failures_are_counted_not_fatal() -> Result<()> {
        let log = Arc::new(Mutex::new(Recorded::default()));
        let delivery = RecordingDelivery {
            log: Arc::clone(&log),
            fail_persist: true,
            gate: None,
        };
        let mut dispatcher =
            ReportDispatcher::spawn(SiteIdentity::default(), Box::new(delivery), 2)?;
        dispatcher.submit(job());
        dispatcher.submit(job());
        let summary = dispatcher.shutdown()?;
        assert_eq!(summary.delivery.persist_failed, 2);
        assert_eq!(summary.delivery.processed, 2);
        Ok(())
    }

    #[test]
    fn full_queue_drops_without_blocking() -> Result<()> {
        let log = Arc::new(Mutex::new(Recorded::default()));
        let gate = Arc::new(Barrier::new(2));
        let delivery = RecordingDelivery {
            log: Arc::clone(&log),
            fail_persist: false,
            gate: Some(Arc::clone(&gate)),
        };
        let mut dispatcher =
            ReportDispatcher::spawn(SiteIdentity::default(), Box::new(delivery), 1)?;

        // First job is picked up and parks the worker inside notify.
        assert!(dispatcher.submit(job()));
        gate.wait();
        // Queue holds one more; the third is dropped.
        assert!(dispatcher.submit(job()));
        assert!(!dispatcher.submit(job()));
        assert_eq!(dispatcher.dropped(), 1);
        gate.wait();

        let summary = dispatcher.shutdown()?;
        assert_eq!(summary.submitted, 2);
        assert_eq!(summary.dropped, 1);
        assert_eq!(summary.delivery.processed, 2);
        Ok(())
    }
}
