use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use af_core::frame::FrameBuffer;
use af_core::traits::{MediaSource, PlaybackState, SourceKind};
use anyhow::{Context, Result};

/// Source d'image fixe. Retourne toujours la même frame.
///
/// # Example
/// ```no_run
/// use af_source::image::ImageSource;
/// use std::path::Path;
/// let source = ImageSource::open(Path::new("photo.png")).unwrap();
/// ```
pub struct ImageSource {
    frame: Arc<FrameBuffer>,
    playback: PlaybackState,
}

impl ImageSource {
    /// Charge une image depuis le disque.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or decoded.
    pub fn open(path: &Path) -> Result<Self> {
        let frame = load_image(path)?;
        log::info!(
            "Image chargée : {}x{} ({})",
            frame.width,
            frame.height,
            path.display()
        );
        Ok(Self::from_frame(frame))
    }

    /// Wraps an already decoded frame.
    #[must_use]
    pub fn from_frame(frame: FrameBuffer) -> Self {
        Self {
            frame: Arc::new(frame),
            playback: PlaybackState {
                paused: true,
                ..PlaybackState::default()
            },
        }
    }
}

impl MediaSource for ImageSource {
    fn kind(&self) -> SourceKind {
        SourceKind::StillImage
    }

    fn native_size(&self) -> (u32, u32) {
        (self.frame.width, self.frame.height)
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
        Some(Arc::clone(&self.frame))
    }

    fn playback(&self) -> PlaybackState {
        self.playback
    }

    fn set_playback(&mut self, state: PlaybackState) {
        self.playback = PlaybackState {
            position: 0.0,
            ..state
        };
    }
}

/// Décode une image en RGBA.
///
/// # Errors
/// Returns an error if the image cannot be loaded or has zero area.
pub fn load_image(path: &Path) -> Result<FrameBuffer> {
    let img = image::open(path)
        .with_context(|| format!("Impossible de charger {}", path.display()))?;
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    FrameBuffer::from_rgba(width, height, rgba.into_raw())
        .filter(|fb| !fb.is_empty())
        .with_context(|| format!("Image vide : {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn still_source_has_no_time_axis() {
        let mut source = ImageSource::from_frame(FrameBuffer::new(8, 6));
        assert_eq!(source.kind(), SourceKind::StillImage);
        assert_eq!(source.native_size(), (8, 6));
        assert!(source.duration().is_none());
        source.request_seek(12.0);
        assert!(source.wait_seeked(Duration::ZERO));
        assert_eq!(source.position(), 0.0);
    }

    #[test]
    fn frame_is_shared_not_copied() {
        let mut source = ImageSource::from_frame(FrameBuffer::new(2, 2));
        let a = source.current_frame().unwrap();
        let b = source.current_frame().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn playback_keeps_mute_but_not_position() {
        let mut source = ImageSource::from_frame(FrameBuffer::new(2, 2));
        source.set_playback(PlaybackState {
            position: 4.0,
            paused: false,
            muted: true,
        });
        let state = source.playback();
        assert!(state.muted);
        assert!(!state.paused);
        assert_eq!(state.position, 0.0);
    }

    #[test]
    fn loads_png_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("px.png");
        image::RgbaImage::from_pixel(3, 2, image::Rgba([9, 8, 7, 255]))
            .save(&path)
            .unwrap();
        let frame = load_image(&path).unwrap();
        assert_eq!((frame.width, frame.height), (3, 2));
        assert_eq!(frame.pixel(2, 1), (9, 8, 7, 255));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(ImageSource::open(Path::new("/nonexistent/nothing.png")).is_err());
    }
}
