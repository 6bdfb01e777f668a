use std::time::Duration;

use af_core::traits::MediaSource;

/// Attente maximale d'une notification de fin de seek.
pub const SEEK_TIMEOUT: Duration = Duration::from_millis(500);

/// Écart (secondes) en dessous duquel la source est considérée déjà en place.
pub const SEEK_EPSILON: f64 = 0.010;

/// Issue d'un seek piloté.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeekOutcome {
    /// Déjà à la cible, aucun seek émis.
    AlreadyThere,
    /// Notification reçue.
    Reached,
    /// Pas de notification dans le délai : on continue avec la frame courante.
    TimedOut,
}

/// Amène `source` à `timestamp` et attend la notification, au plus `timeout`.
///
/// Ne bloque jamais au-delà de `timeout` : une source qui ne notifie pas
/// (décodage bloqué) donne `TimedOut` et l'appelant échantillonne la frame
/// déjà décodée.
///
/// # Example
/// ```
/// use af_core::frame::FrameBuffer;
/// use af_core::traits::{MediaSource, PlaybackState, SourceKind};
/// use af_export::seek::{SeekOutcome, seek_to};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// struct Clock(f64);
/// impl MediaSource for Clock {
///     fn kind(&self) -> SourceKind { SourceKind::FileVideo }
///     fn native_size(&self) -> (u32, u32) { (1, 1) }
///     fn duration(&self) -> Option<f64> { Some(10.0) }
///     fn position(&self) -> f64 { self.0 }
///     fn request_seek(&mut self, secs: f64) { self.0 = secs; }
///     fn wait_seeked(&mut self, _timeout: Duration) -> bool { true }
///     fn current_frame(&mut self) -> Option<Arc<FrameBuffer>> { None }
///     fn playback(&self) -> PlaybackState { PlaybackState::default() }
///     fn set_playback(&mut self, _state: PlaybackState) {}
/// }
/// let mut clock = Clock(0.0);
/// assert_eq!(seek_to(&mut clock, 0.004, Duration::ZERO), SeekOutcome::AlreadyThere);
/// assert_eq!(seek_to(&mut clock, 2.0, Duration::ZERO), SeekOutcome::Reached);
/// ```
pub fn seek_to(source: &mut dyn MediaSource, timestamp: f64, timeout: Duration) -> SeekOutcome {
    if (source.position() - timestamp).abs() < SEEK_EPSILON {
        return SeekOutcome::AlreadyThere;
    }
    source.request_seek(timestamp);
    if source.wait_seeked(timeout) {
        SeekOutcome::Reached
    } else {
        log::debug!("seek {timestamp:.3}s : pas de notification après {timeout:?}");
        SeekOutcome::TimedOut
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSource;

    #[test]
    fn reaches_target_and_records_seek() {
        let mut source = FakeSource::video(10.0);
        assert_eq!(seek_to(&mut source, 1.5, SEEK_TIMEOUT), SeekOutcome::Reached);
        assert_eq!(source.seeks, vec![1.5]);
        assert!((source.position() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn skips_redundant_seek_within_epsilon() {
        let mut source = FakeSource::video(10.0);
        source.request_seek(3.0);
        assert!(source.wait_seeked(SEEK_TIMEOUT));
        assert_eq!(seek_to(&mut source, 3.009, SEEK_TIMEOUT), SeekOutcome::AlreadyThere);
        assert_eq!(source.seeks.len(), 1);
    }

    #[test]
    fn stalled_source_times_out_instead_of_hanging() {
        let mut source = FakeSource::video(10.0);
        source.stalled = true;
        let outcome = seek_to(&mut source, 4.0, Duration::from_millis(5));
        assert_eq!(outcome, SeekOutcome::TimedOut);
        assert!(source.current_frame().is_some());
    }
}
