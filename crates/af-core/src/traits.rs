use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::frame::FrameBuffer;

/// Nature d'une source visuelle. Ensemble fermé : chaque site d'appel qui
/// dépend de la durée, du seek ou du mute fait un `match` exhaustif.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    /// Fichier vidéo de durée finie, seekable.
    FileVideo,
    /// Image fixe, sans axe temporel.
    StillImage,
    /// Flux live : ni durée ni seek.
    LiveStream,
}

impl SourceKind {
    /// `true` if the source has a time axis that can be seeked.
    #[must_use]
    pub fn is_seekable(self) -> bool {
        match self {
            Self::FileVideo => true,
            Self::StillImage | Self::LiveStream => false,
        }
    }
}

/// État de lecture capturé avant un export et restauré après.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PlaybackState {
    /// Position en secondes.
    pub position: f64,
    pub paused: bool,
    pub muted: bool,
}

/// Fournit des frames visuelles au pipeline.
///
/// Implémenté par : `ImageSource`, `VideoSource`, `LiveSource`.
///
/// # Example
/// ```
/// use af_core::traits::{MediaSource, PlaybackState, SourceKind};
/// use af_core::frame::FrameBuffer;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// struct DummySource(Arc<FrameBuffer>);
/// impl MediaSource for DummySource {
///     fn kind(&self) -> SourceKind { SourceKind::StillImage }
///     fn native_size(&self) -> (u32, u32) { (self.0.width, self.0.height) }
///     fn duration(&self) -> Option<f64> { None }
///     fn position(&self) -> f64 { 0.0 }
///     fn request_seek(&mut self, _secs: f64) {}
///     fn wait_seeked(&mut self, _timeout: Duration) -> bool { true }
///     fn current_frame(&mut self) -> Option<Arc<FrameBuffer>> { Some(Arc::clone(&self.0)) }
///     fn playback(&self) -> PlaybackState { PlaybackState::default() }
///     fn set_playback(&mut self, _state: PlaybackState) {}
/// }
/// let mut source = DummySource(Arc::new(FrameBuffer::new(4, 4)));
/// assert!(source.current_frame().is_some());
/// ```
pub trait MediaSource: Send {
    /// Variante de source.
    fn kind(&self) -> SourceKind;

    /// Dimensions natives des frames décodées. `(0, 0)` tant que rien n'est décodé.
    fn native_size(&self) -> (u32, u32);

    /// Durée en secondes ; `None` pour une image fixe ou un flux live.
    fn duration(&self) -> Option<f64>;

    /// Position courante en secondes.
    fn position(&self) -> f64;

    /// Demande un seek. La fin du seek est notifiée via `wait_seeked`.
    /// Sans effet sur une source non seekable.
    fn request_seek(&mut self, secs: f64);

    /// Attend la notification de fin de seek, au plus `timeout`.
    ///
    /// Retourne `false` si la notification n'est pas arrivée à temps.
    fn wait_seeked(&mut self, timeout: Duration) -> bool;

    /// Frame décodée à la position courante. Ne bloque jamais.
    fn current_frame(&mut self) -> Option<Arc<FrameBuffer>>;

    /// État de lecture courant.
    fn playback(&self) -> PlaybackState;

    /// Applique un état de lecture (pause, mute, et position si seekable).
    fn set_playback(&mut self, state: PlaybackState);

    /// `true` quand une source live ou un fichier a atteint sa fin naturelle.
    fn has_ended(&self) -> bool {
        false
    }

    /// Fichier dont la piste audio peut être décodée, s'il y en a un.
    fn audio_path(&self) -> Option<&Path> {
        None
    }
}
