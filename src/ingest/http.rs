//! HTTP camera endpoints: `multipart/x-mixed-replace` MJPEG streams, or plain
//! JPEG snapshot URLs polled once per frame.

use std::io::Read;

use anyhow::{anyhow, Context, Result};

use super::{frame_interval, CameraConfig, CaptureHealth, FrameSource, SourceStats};
use crate::frame::Frame;

/// Upper bound on a single JPEG before the scan buffer is trimmed.
const MAX_JPEG_BYTES: usize = 4 * 1024 * 1024;

pub struct HttpSource {
    config: CameraConfig,
    stream: Option<HttpStream>,
    health: CaptureHealth,
}

enum HttpStream {
    Mjpeg(MjpegStream),
    Snapshot,
}

impl HttpSource {
    pub fn new(config: CameraConfig) -> Self {
        Self {
            config,
            stream: None,
            health: CaptureHealth::default(),
        }
    }

    fn read_jpeg(&mut self) -> Result<Option<Vec<u8>>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| anyhow!("http camera not connected; call connect() first"))?;
        match stream {
            HttpStream::Mjpeg(stream) => stream.read_next_jpeg(),
            HttpStream::Snapshot => fetch_snapshot(&self.config.source).map(Some),
        }
    }
}

impl FrameSource for HttpSource {
    fn connect(&mut self) -> Result<()> {
        let response = ureq::get(&self.config.source)
            .call()
            .with_context(|| format!("connect to http camera {}", self.config.source))?;
        let content_type = response.header("Content-Type").unwrap_or("").to_lowercase();
        if content_type.contains("multipart") {
            self.stream = Some(HttpStream::Mjpeg(MjpegStream::new(response.into_reader())));
        } else {
            self.stream = Some(HttpStream::Snapshot);
        }
        self.health.connected();
        log::info!(
            "HttpSource: connected to {} ({})",
            self.config.source,
            if content_type.contains("multipart") {
                "mjpeg"
            } else {
                "snapshot"
            }
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let min_interval = frame_interval(self.config.target_fps);
        let polling = matches!(self.stream, Some(HttpStream::Snapshot));
        if polling {
            // Each snapshot is a request; wait rather than poll ahead of the rate.
            self.health.pace(self.config.target_fps);
        }
        loop {
            let jpeg = match self.read_jpeg() {
                Ok(Some(jpeg)) => jpeg,
                Ok(None) => return Ok(None),
                Err(err) => {
                    self.health.failed(&err);
                    return Err(err);
                }
            };

            // MJPEG servers push at their own rate; drop frames that arrive early.
            let early = self
                .health
                .last_frame_at()
                .is_some_and(|last| last.elapsed() < min_interval);
            if !polling && early {
                continue;
            }

            let image = match image::load_from_memory(&jpeg).context("decode camera jpeg") {
                Ok(image) => image.into_rgb8(),
                Err(err) => {
                    self.health.failed(&err);
                    return Err(err);
                }
            };
            return Ok(Some(Frame::new(image, self.health.frame_captured())));
        }
    }

    fn is_healthy(&self) -> bool {
        self.stream.is_some() && self.health.is_healthy(self.config.target_fps)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.health.frames(),
            source: self.config.source.clone(),
        }
    }
}

struct MjpegStream {
    reader: Box<dyn Read + Send + Sync>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    fn new(reader: Box<dyn Read + Send + Sync>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    /// Next complete JPEG, or `None` once the server closes the stream.
    fn read_next_jpeg(&mut self) -> Result<Option<Vec<u8>>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let jpeg = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(Some(jpeg));
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Ok(None);
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn fetch_snapshot(url: &str) -> Result<Vec<u8>> {
    let response = ureq::get(url)
        .call()
        .with_context(|| format!("fetch jpeg snapshot from {}", url))?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64)
        .read_to_end(&mut bytes)
        .context("read jpeg snapshot")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg snapshot"));
    }
    Ok(bytes)
}

/// Locate the first SOI..EOI marker pair.
fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}
