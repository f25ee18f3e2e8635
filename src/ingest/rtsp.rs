//! IP camera capture over RTSP, decoded by GStreamer.
//!
//! The pipeline decodes, converts and scales to the configured size in one
//! go, so every sample is already an RGB frame of `width x height`. The appsink
//! keeps only the newest sample; a slow detector sees the latest picture
//! rather than a growing backlog.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use gstreamer::prelude::*;
use image::RgbImage;

use super::{CameraConfig, CaptureHealth, FrameSource, SourceStats};
use crate::frame::Frame;

const MIN_PULL_TIMEOUT: Duration = Duration::from_millis(500);
/// Frame periods to wait for a sample before calling the read failed.
const PULL_TIMEOUT_FRAMES: u32 = 4;

pub struct RtspSource {
    config: CameraConfig,
    pipeline: gstreamer::Pipeline,
    sink: gstreamer_app::AppSink,
    health: CaptureHealth,
    end_of_stream: bool,
}

impl RtspSource {
    pub fn new(config: CameraConfig) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let launch = format!(
            "rtspsrc location={url} latency=0 ! decodebin ! videoconvert ! videoscale ! \
             video/x-raw,format=RGB,width={w},height={h} ! \
             appsink name=frames sync=false max-buffers=1 drop=true",
            url = config.source,
            w = config.width,
            h = config.height
        );
        let pipeline = gstreamer::parse::launch(&launch)
            .with_context(|| format!("build RTSP pipeline for {}", config.source))?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("RTSP launch line did not produce a pipeline"))?;
        let sink = pipeline
            .by_name("frames")
            .context("RTSP pipeline has no appsink")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("RTSP frames element is not an appsink"))?;

        Ok(Self {
            config,
            pipeline,
            sink,
            health: CaptureHealth::default(),
            end_of_stream: false,
        })
    }

    fn pull_timeout(&self) -> gstreamer::ClockTime {
        let per_frame = super::frame_interval(self.config.target_fps);
        let timeout = (per_frame * PULL_TIMEOUT_FRAMES).max(MIN_PULL_TIMEOUT);
        gstreamer::ClockTime::from_mseconds(timeout.as_millis() as u64)
    }

    /// Drain pending bus messages; errors become the source's read error.
    fn drain_bus(&mut self) -> Result<()> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        let mut failure = None;
        while let Some(message) = bus.pop() {
            match message.view() {
                gstreamer::MessageView::Eos(..) => self.end_of_stream = true,
                gstreamer::MessageView::Error(err) => {
                    failure = Some(anyhow!(
                        "{} reported: {}",
                        err.src()
                            .map(|src| src.path_string().to_string())
                            .unwrap_or_else(|| "pipeline".to_string()),
                        err.error()
                    ));
                }
                _ => {}
            }
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl FrameSource for RtspSource {
    fn connect(&mut self) -> Result<()> {
        self.pipeline
            .set_state(gstreamer::State::Playing)
            .with_context(|| format!("start RTSP stream {}", self.config.source))?;
        self.health.connected();
        log::info!(
            "RtspSource: streaming {} at {}x{}",
            self.config.source,
            self.config.width,
            self.config.height
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if let Err(err) = self.drain_bus() {
            self.health.failed(&err);
            return Err(err);
        }
        if self.end_of_stream {
            return Ok(None);
        }

        let image = self
            .sink
            .try_pull_sample(self.pull_timeout())
            .ok_or_else(|| anyhow!("no RTSP sample within {}", self.pull_timeout()))
            .and_then(|sample| sample_to_image(&sample));
        match image {
            Ok(image) => Ok(Some(Frame::new(image, self.health.frame_captured()))),
            Err(err) => {
                self.health.failed(&err);
                Err(err)
            }
        }
    }

    fn is_healthy(&self) -> bool {
        !self.end_of_stream && self.health.is_healthy(self.config.target_fps)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.health.frames(),
            source: self.config.source.clone(),
        }
    }
}

impl Drop for RtspSource {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gstreamer::State::Null);
    }
}

/// Repack an RGB sample into an `RgbImage`, dropping any row padding.
fn sample_to_image(sample: &gstreamer::Sample) -> Result<RgbImage> {
    let caps = sample.caps().context("RTSP sample has no caps")?;
    let info = gstreamer_video::VideoInfo::from_caps(caps).context("RTSP caps are not video")?;
    let buffer = sample.buffer().context("RTSP sample has no buffer")?;
    let map = buffer.map_readable().context("map RTSP sample")?;

    let (width, height) = (info.width(), info.height());
    let row = width as usize * 3;
    let stride = info.stride()[0] as usize;
    let data = map.as_slice();

    let packed = if stride == row {
        data.get(..row * height as usize)
            .context("RTSP sample shorter than one frame")?
            .to_vec()
    } else {
        data.chunks(stride)
            .take(height as usize)
            .map(|line| line.get(..row).context("RTSP sample row truncated"))
            .collect::<Result<Vec<_>>>()?
            .concat()
    };
    RgbImage::from_raw(width, height, packed)
        .ok_or_else(|| anyhow!("RTSP sample does not fill {}x{}", width, height))
}
