//! Local USB camera capture through V4L2.
//!
//! RGB24 is requested first; cameras that only offer YUYV are converted in
//! software. The driver may also round the requested size, so frames use
//! whatever size was actually negotiated.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{CameraConfig, CaptureHealth, FrameSource, SourceStats};
use crate::frame::Frame;

const MMAP_BUFFERS: u32 = 4;

/// Size and pixel layout agreed with the driver.
#[derive(Clone, Copy, Debug)]
struct Negotiated {
    width: u32,
    height: u32,
    format: PixelFormat,
}

#[self_referencing]
struct OpenDevice {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

pub struct V4l2Source {
    config: CameraConfig,
    device_path: String,
    open: Option<(OpenDevice, Negotiated)>,
    health: CaptureHealth,
}

impl V4l2Source {
    pub fn new(config: CameraConfig, device_path: String) -> Self {
        Self {
            config,
            device_path,
            open: None,
            health: CaptureHealth::default(),
        }
    }

    fn negotiate(&self, device: &mut v4l::Device) -> Result<Negotiated> {
        let mut wanted = device
            .format()
            .with_context(|| format!("query format of {}", self.device_path))?;
        wanted.width = self.config.width;
        wanted.height = self.config.height;
        wanted.fourcc = v4l::FourCC::new(b"RGB3");

        let actual = device.set_format(&wanted).or_else(|err| {
            log::warn!(
                "V4l2Source: {} refused RGB24 {}x{} ({}); keeping driver format",
                self.device_path,
                self.config.width,
                self.config.height,
                err
            );
            device.format()
        })?;
        let format = PixelFormat::from_fourcc(&actual.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "{} only offers {}, which cannot be converted to RGB",
                self.device_path,
                actual.fourcc
            )
        })?;

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: {} ignored {} fps request: {}",
                    self.device_path,
                    self.config.target_fps,
                    err
                );
            }
        }

        Ok(Negotiated {
            width: actual.width,
            height: actual.height,
            format,
        })
    }
}

impl FrameSource for V4l2Source {
    fn connect(&mut self) -> Result<()> {
        let mut device = v4l::Device::with_path(&self.device_path)
            .with_context(|| format!("open camera device {}", self.device_path))?;
        let negotiated = self.negotiate(&mut device)?;

        let open = OpenDeviceTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(
                    device,
                    v4l::buffer::Type::VideoCapture,
                    MMAP_BUFFERS,
                )
            },
        }
        .try_build()
        .with_context(|| format!("map capture buffers on {}", self.device_path))?;

        self.open = Some((open, negotiated));
        self.health.connected();
        log::info!(
            "V4l2Source: capturing from {} ({}x{}, {:?})",
            self.device_path,
            negotiated.width,
            negotiated.height,
            negotiated.format
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let (open, negotiated) = self
            .open
            .as_mut()
            .ok_or_else(|| anyhow!("camera {} is not connected", self.device_path))?;
        let Negotiated {
            width,
            height,
            format,
        } = *negotiated;

        let pixels = open.with_stream_mut(|stream| {
            let (buffer, _meta) = stream.next().context("dequeue v4l2 buffer")?;
            normalize_to_rgb(buffer, width, height, format)
        });
        match pixels.and_then(|pixels| Frame::from_rgb(pixels, width, height, self.health.frames())) {
            Ok(frame) => {
                self.health.frame_captured();
                Ok(Some(frame))
            }
            Err(err) => {
                self.health.failed(&err);
                Err(err)
            }
        }
    }

    fn is_healthy(&self) -> bool {
        self.open.is_some() && self.health.is_healthy(self.config.target_fps)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.health.frames(),
            source: self.device_path.clone(),
        }
    }
}
