//! Synthetic camera (`stub://`) for tests and bench runs.
//!
//! Renders a dark, slightly noisy background. In the `smoke` scene a bright
//! square is drawn on a fixed schedule so that the stub detector produces
//! sustained presence runs separated by gaps.
//!
//! URL forms:
//! - `stub://smoke` (default scene) or `stub://empty`
//! - `?frames=N` ends the stream after N frames

use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use rand::Rng;
use url::Url;

use super::{CameraConfig, CaptureHealth, FrameSource, SourceStats};
use crate::frame::Frame;

/// Frames per scene cycle.
pub const SCENE_PERIOD: u64 = 90;
/// Frames within each cycle (`start..end`) that show the marker.
pub const SCENE_ACTIVE: std::ops::Range<u64> = 30..75;

const BACKGROUND_LEVEL: u8 = 40;
const NOISE_AMPLITUDE: i16 = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyntheticScene {
    /// Marker visible during `SCENE_ACTIVE` of every cycle.
    Smoke,
    /// Background only.
    Empty,
}

impl SyntheticScene {
    /// Whether frame `index` (0-based) shows the marker.
    pub fn marker_visible(&self, index: u64) -> bool {
        match self {
            Self::Smoke => SCENE_ACTIVE.contains(&(index % SCENE_PERIOD)),
            Self::Empty => false,
        }
    }
}

pub struct SyntheticSource {
    url: String,
    scene: SyntheticScene,
    width: u32,
    height: u32,
    target_fps: u32,
    frame_limit: Option<u64>,
    health: CaptureHealth,
}

impl SyntheticSource {
    pub fn new(scene: SyntheticScene, width: u32, height: u32) -> Self {
        Self {
            url: "stub://synthetic".to_string(),
            scene,
            width,
            height,
            target_fps: 0,
            frame_limit: None,
            health: CaptureHealth::default(),
        }
    }

    pub fn from_config(config: &CameraConfig) -> Result<Self> {
        let url = Url::parse(&config.source)
            .with_context(|| format!("parse synthetic camera url {}", config.source))?;
        let scene = match url.host_str().unwrap_or("smoke") {
            "" | "smoke" => SyntheticScene::Smoke,
            "empty" => SyntheticScene::Empty,
            other => return Err(anyhow!("unknown synthetic scene '{}'", other)),
        };
        let mut frame_limit = None;
        for (key, value) in url.query_pairs() {
            if key == "frames" {
                let limit = value
                    .parse::<u64>()
                    .with_context(|| format!("invalid synthetic frame limit '{}'", value))?;
                frame_limit = Some(limit);
            }
        }

        let mut source = Self::new(scene, config.width, config.height)
            .with_target_fps(config.target_fps)
            .with_frame_limit(frame_limit);
        source.url = config.source.clone();
        Ok(source)
    }

    pub fn with_target_fps(mut self, target_fps: u32) -> Self {
        self.target_fps = target_fps;
        self
    }

    pub fn with_frame_limit(mut self, limit: Option<u64>) -> Self {
        self.frame_limit = limit;
        self
    }

    fn render(&self, index: u64) -> RgbImage {
        let mut rng = rand::thread_rng();
        let mut image = RgbImage::from_fn(self.width, self.height, |_, _| {
            let noise = rng.gen_range(-NOISE_AMPLITUDE..=NOISE_AMPLITUDE);
            let level = (BACKGROUND_LEVEL as i16 + noise).clamp(0, 255) as u8;
            Rgb([level, level, level])
        });

        if self.scene.marker_visible(index) {
            let side = (self.width.min(self.height) / 6).max(4);
            // Drift slowly to the right so consecutive boxes differ.
            let travel = self.width.saturating_sub(side).max(1);
            let x0 = (self.width / 4 + (index % SCENE_PERIOD) as u32 * 2) % travel;
            let y0 = self.height.saturating_sub(side) / 2;
            for y in y0..(y0 + side).min(self.height) {
                for x in x0..(x0 + side).min(self.width) {
                    image.put_pixel(x, y, Rgb([255, 255, 255]));
                }
            }
        }
        image
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        self.health.connected();
        log::info!(
            "SyntheticSource: connected to {} ({}x{}, {:?})",
            self.url,
            self.width,
            self.height,
            self.scene
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self
            .frame_limit
            .is_some_and(|limit| self.health.frames() >= limit)
        {
            return Ok(None);
        }
        self.health.pace(self.target_fps);

        let image = self.render(self.health.frames());
        let sequence = self.health.frame_captured();
        Ok(Some(Frame::new(image, sequence)))
    }

    fn is_healthy(&self) -> bool {
        self.health.is_healthy(self.target_fps)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.health.frames(),
            source: self.url.clone(),
        }
    }
}
