//! Local alert output.
//!
//! The run loop fires the sink once per alert decision. Sink failures are
//! logged by the caller and never stop detection.

use std::path::{Path, PathBuf};
#[cfg(feature = "alert-audio")]
use std::thread;

use anyhow::Result;

pub trait AlertSink: Send {
    fn name(&self) -> &'static str;

    /// Raise one alert. Must not block for the length of the alert sound.
    fn fire(&mut self) -> Result<()>;
}

/// Writes alerts to the log only.
#[derive(Default)]
pub struct LogAlertSink {
    fired: u64,
}

impl LogAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fired(&self) -> u64 {
        self.fired
    }
}

impl AlertSink for LogAlertSink {
    fn name(&self) -> &'static str {
        "log"
    }

    fn fire(&mut self) -> Result<()> {
        self.fired += 1;
        log::warn!("ALERT: smoking detected (alert #{})", self.fired);
        Ok(())
    }
}

/// Plays an audio file on a detached thread per alert.
#[cfg(feature = "alert-audio")]
pub struct SoundAlertSink {
    path: PathBuf,
}

#[cfg(feature = "alert-audio")]
impl SoundAlertSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[cfg(feature = "alert-audio")]
impl AlertSink for SoundAlertSink {
    fn name(&self) -> &'static str {
        "sound"
    }

    fn fire(&mut self) -> Result<()> {
        use anyhow::Context;

        log::warn!("ALERT: smoking detected, playing {}", self.path.display());
        let path = self.path.clone();
        thread::Builder::new()
            .name("alert-sound".to_string())
            .spawn(move || {
                if let Err(err) = play_file(&path) {
                    log::error!("alert sound {} failed: {:#}", path.display(), err);
                }
            })
            .context("spawn alert sound thread")?;
        Ok(())
    }
}

#[cfg(feature = "alert-audio")]
fn play_file(path: &Path) -> Result<()> {
    use anyhow::{anyhow, Context};
    use std::fs::File;
    use std::io::BufReader;

    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let (_stream, handle) =
        rodio::OutputStream::try_default().map_err(|err| anyhow!("open audio output: {}", err))?;
    let sink = rodio::Sink::try_new(&handle).map_err(|err| anyhow!("create audio sink: {}", err))?;
    let source = rodio::Decoder::new(BufReader::new(file)).context("decode alert sound")?;
    sink.append(source);
    sink.sleep_until_end();
    Ok(())
}

/// Pick the alert sink for a configured sound file.
///
/// Falls back to `LogAlertSink` when the file is missing or audio support is
/// not compiled in.
pub fn build_alert_sink(sound_path: &Path) -> Box<dyn AlertSink> {
    if !sound_path.is_file() {
        log::warn!(
            "alert sound {} not found; alerts will be logged only",
            sound_path.display()
        );
        return Box::new(LogAlertSink::new());
    }

    #[cfg(feature = "alert-audio")]
    {
        Box::new(SoundAlertSink::new(sound_path.to_path_buf()))
    }
    #[cfg(not(feature = "alert-audio"))]
    {
        log::info!(
            "built without alert-audio; alerts for {} will be logged only",
            display_name(sound_path).display()
        );
        Box::new(LogAlertSink::new())
    }
}

#[cfg(not(feature = "alert-audio"))]
fn display_name(path: &Path) -> PathBuf {
    path.file_name().map(PathBuf::from).unwrap_or_else(|| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_sink_counts_alerts() -> Result<()> {
        let mut sink = LogAlertSink::new();
        sink.fire()?;
        sink.fire()?;
        assert_eq!(sink.fired(), 2);
        Ok(())
    }

    #[test]
    fn missing_sound_file_falls_back_to_log() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = build_alert_sink(&dir.path().join("missing.mp3"));
        assert_eq!(sink.name(), "log");
    }
}
