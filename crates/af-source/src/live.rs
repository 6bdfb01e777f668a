use std::process::Child;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use af_core::frame::FrameBuffer;
use af_core::traits::{MediaSource, PlaybackState, SourceKind};
use anyhow::{Context, Result};
use arc_swap::ArcSwapOption;

use crate::ffmpeg::{self, FramePool};

/// Démuxeur ffmpeg à forcer pour un périphérique de capture local.
#[must_use]
pub fn device_format(input: &str) -> Option<&'static str> {
    if input.starts_with("/dev/video") {
        Some("v4l2")
    } else if input.starts_with("video=") {
        Some("dshow")
    } else {
        None
    }
}

/// Flux live (caméra, URL réseau) : ni durée ni seek.
///
/// Le thread d'acquisition publie la dernière frame dans un slot ; la façade
/// ne bloque jamais. La fin du flux (EOF) est signalée par `has_ended`.
///
/// # Example
/// ```no_run
/// use af_core::traits::MediaSource;
/// use af_source::live::LiveSource;
///
/// let mut cam = LiveSource::open("/dev/video0").unwrap();
/// let frame = cam.current_frame();
/// ```
pub struct LiveSource {
    size: (u32, u32),
    latest: Arc<ArcSwapOption<FrameBuffer>>,
    ended: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    child: Child,
    handle: Option<thread::JoinHandle<()>>,
    frozen: Option<Arc<FrameBuffer>>,
    playback: PlaybackState,
}

impl LiveSource {
    /// Ouvre un périphérique ou une URL.
    ///
    /// # Errors
    /// Retourne une erreur si le flux ne peut être sondé ou si ffmpeg ne démarre pas.
    pub fn open(input: &str) -> Result<Self> {
        let format = device_format(input);
        let info = ffmpeg::probe(input, format)?;
        let (width, height) = info.decode_size();

        let mut args = Vec::new();
        if let Some(format) = format {
            args.extend(["-f".to_string(), format.to_string()]);
        }
        args.extend(["-i".to_string(), input.to_string()]);
        let mut spawned = ffmpeg::spawn_rgba_pipe(&args, width, height, None)
            .with_context(|| format!("Impossible de lancer ffmpeg sur {input}"))?;
        let mut stdout = spawned
            .stdout
            .take()
            .context("Pipe stdout ffmpeg indisponible")?;

        let latest = Arc::new(ArcSwapOption::empty());
        let ended = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(AtomicBool::new(false));

        let (t_latest, t_ended, t_stop) = (Arc::clone(&latest), Arc::clone(&ended), Arc::clone(&stop));
        let handle = thread::Builder::new()
            .name("af-live".to_string())
            .spawn(move || {
                let mut pool = FramePool::new(3, width, height);
                while !t_stop.load(Ordering::Acquire) {
                    match pool.read_frame(&mut stdout) {
                        Ok(Some(frame)) => t_latest.store(Some(frame)),
                        Ok(None) => {
                            log::info!("Flux live: fin du flux");
                            break;
                        }
                        Err(e) => {
                            log::warn!("Flux live: erreur lecture pipe: {e}");
                            break;
                        }
                    }
                }
                t_ended.store(true, Ordering::Release);
            })
            .context("Impossible de spawner le thread live")?;

        log::info!("Flux live ouvert: {width}x{height} ({input})");
        Ok(Self {
            size: (width, height),
            latest,
            ended,
            stop,
            child: spawned,
            handle: Some(handle),
            frozen: None,
            playback: PlaybackState::default(),
        })
    }
}

impl MediaSource for LiveSource {
    fn kind(&self) -> SourceKind {
        SourceKind::LiveStream
    }

    fn native_size(&self) -> (u32, u32) {
        self.size
    }

    fn duration(&self) -> Option<f64> {
        None
    }

    fn position(&self) -> f64 {
        0.0
    }

    fn request_seek(&mut self, _secs: f64) {}

    fn wait_seeked(&mut self, _timeout: Duration) -> bool {
        true
    }

    fn current_frame(&mut self) -> Option<Arc<FrameBuffer>> {
        if self.playback.paused {
            if self.frozen.is_none() {
                self.frozen = self.latest.load_full();
            }
            self.frozen.clone()
        } else {
            self.latest.load_full()
        }
    }

    fn playback(&self) -> PlaybackState {
        self.playback
    }

    fn set_playback(&mut self, state: PlaybackState) {
        if !state.paused {
            self.frozen = None;
        }
        self.playback = PlaybackState {
            position: 0.0,
            ..state
        };
    }

    fn has_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }
}

impl Drop for LiveSource {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        // tuer ffmpeg ferme le pipe et débloque la lecture en cours
        ffmpeg::reap(&mut self.child);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_devices_get_a_demuxer() {
        assert_eq!(device_format("/dev/video0"), Some("v4l2"));
        assert_eq!(device_format("video=Integrated Camera"), Some("dshow"));
        assert_eq!(device_format("rtsp://cam.local/stream"), None);
    }
}
