use std::fmt;
use std::time::{Duration, Instant};

use af_audio::AudioFeed;
use af_core::config::{AppearanceSettings, ToneSettings};
use af_core::frame::FrameBuffer;
use af_core::traits::MediaSource;

use crate::codec::AudioConfig;
use crate::error::ExportError;
use crate::job::{ExportJob, ExportKind, ExportTask, Outcome, Step};
use crate::render::FrameRenderer;

/// Cadence d'échantillonnage de la surface rendue.
pub const CAPTURE_FPS: u32 = 30;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VideoCodec {
    Vp9,
    Vp8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AudioCodec {
    Opus,
}

/// Couple de codecs du flux ; `None` laisse le choix au conteneur.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CodecChoice {
    pub video: Option<VideoCodec>,
    pub audio: Option<AudioCodec>,
}

impl CodecChoice {
    /// Ordre de préférence : VP9+Opus puis VP8+Opus.
    pub const PREFERENCES: [Self; 2] = [
        Self {
            video: Some(VideoCodec::Vp9),
            audio: Some(AudioCodec::Opus),
        },
        Self {
            video: Some(VideoCodec::Vp8),
            audio: Some(AudioCodec::Opus),
        },
    ];

    /// Premier couple supporté, sinon le défaut du conteneur.
    #[must_use]
    pub fn negotiate(backend: &dyn StreamBackend) -> Self {
        Self::PREFERENCES
            .into_iter()
            .find(|choice| backend.supports(choice))
            .unwrap_or_default()
    }
}

impl fmt::Display for CodecChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.video, self.audio) {
            (None, None) => f.write_str("défaut"),
            (video, audio) => write!(f, "{video:?}+{audio:?}"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub codecs: CodecChoice,
    pub audio: Option<AudioConfig>,
}

/// Enregistreur de conteneur en flux : les morceaux encodés arrivent au fil
/// de l'eau sur `chunks()`.
pub trait StreamRecorder {
    /// # Errors
    /// Recorder closed.
    fn push_video(&mut self, frame: &FrameBuffer, timestamp_us: i64) -> Result<(), ExportError>;

    /// Échantillons f32 entrelacés.
    ///
    /// # Errors
    /// Recorder closed.
    fn push_audio(&mut self, samples: &[f32]) -> Result<(), ExportError>;

    fn chunks(&self) -> &flume::Receiver<Vec<u8>>;

    /// Arrête toutes les pistes. Au retour, chaque morceau restant est déjà
    /// dans `chunks()`.
    ///
    /// # Errors
    /// The encoder did not terminate cleanly.
    fn stop(&mut self) -> Result<(), ExportError>;
}

pub trait StreamBackend {
    fn supports(&self, codecs: &CodecChoice) -> bool;

    /// # Errors
    /// The recorder could not be started.
    fn open(&self, config: &StreamConfig) -> Result<Box<dyn StreamRecorder>, ExportError>;
}

/// Capture temps réel de la surface rendue (et d'un flux audio live
/// optionnel) vers un conteneur en flux.
///
/// S'arrête sur `request_stop` ou quand la source signale sa fin ; dans les
/// deux cas les morceaux accumulés sont concaténés en un seul buffer.
pub struct LiveCaptureRecorder {
    job: ExportJob,
    renderer: FrameRenderer,
    tone: ToneSettings,
    recorder: Option<Box<dyn StreamRecorder>>,
    audio: Option<Box<dyn AudioFeed>>,
    samples: Vec<f32>,
    chunks: Vec<Vec<u8>>,
    size: (u32, u32),
    interval: Duration,
    next_due: Instant,
    captured: u32,
    stop_requested: bool,
    done: bool,
}

impl LiveCaptureRecorder {
    /// Négocie les codecs et ouvre l'enregistreur.
    ///
    /// # Errors
    /// `PreconditionUnmet` si la grille est vide ; erreur du backend à
    /// l'ouverture.
    pub fn start(
        source: &dyn MediaSource,
        appearance: &AppearanceSettings,
        tone: &ToneSettings,
        backend: &dyn StreamBackend,
        audio: Option<Box<dyn AudioFeed>>,
    ) -> Result<Self, ExportError> {
        let renderer = FrameRenderer::new(appearance);
        let (sw, sh) = source.native_size();
        let size = renderer
            .geometry(sw, sh)
            .map(|g| g.even_render_size())
            .filter(|&(w, h)| w > 0 && h > 0)
            .ok_or_else(|| ExportError::precondition("grille vide"))?;

        let codecs = CodecChoice::negotiate(backend);
        let config = StreamConfig {
            width: size.0,
            height: size.1,
            fps: CAPTURE_FPS,
            codecs,
            audio: audio.as_ref().map(|feed| AudioConfig {
                sample_rate: feed.sample_rate(),
                channels: feed.channels(),
            }),
        };
        let recorder = backend.open(&config)?;
        log::info!(
            "[REC] {}x{} @ {CAPTURE_FPS}fps, codecs {codecs}, audio : {}",
            size.0,
            size.1,
            if config.audio.is_some() { "oui" } else { "non" }
        );

        Ok(Self {
            job: ExportJob::new(ExportKind::LiveCapture, 0),
            renderer,
            tone: *tone,
            recorder: Some(recorder),
            audio,
            samples: Vec::new(),
            chunks: Vec::new(),
            size,
            interval: Duration::from_secs(1) / CAPTURE_FPS,
            next_due: Instant::now(),
            captured: 0,
            stop_requested: false,
            done: false,
        })
    }

    /// Remplace l'intervalle d'échantillonnage.
    #[must_use]
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Frames capturées jusqu'ici.
    #[must_use]
    pub fn captured(&self) -> u32 {
        self.captured
    }

    fn collect_chunks(&mut self) {
        if let Some(recorder) = &self.recorder {
            self.chunks.extend(recorder.chunks().try_iter());
        }
    }

    fn capture(&mut self, source: &mut dyn MediaSource) -> Result<(), ExportError> {
        let now = Instant::now();
        if now < self.next_due {
            self.collect_chunks();
            return Ok(());
        }
        let Some(frame) = source.current_frame() else {
            return Ok(());
        };
        let Some(surface) = self.renderer.render(&frame, &self.tone, true)? else {
            return Ok(());
        };
        if (surface.width, surface.height) != self.size {
            log::debug!(
                "[REC] frame {}x{} ignorée (attendu {}x{})",
                surface.width,
                surface.height,
                self.size.0,
                self.size.1
            );
            return Ok(());
        }
        let Some(recorder) = self.recorder.as_mut() else {
            return Err(anyhow::anyhow!("enregistreur déjà arrêté").into());
        };
        let timestamp_us = i64::from(self.captured) * 1_000_000 / i64::from(CAPTURE_FPS);
        recorder.push_video(surface, timestamp_us)?;
        if let Some(feed) = self.audio.as_mut() {
            self.samples.clear();
            if feed.drain(&mut self.samples) > 0 {
                recorder.push_audio(&self.samples)?;
            }
        }
        self.captured += 1;
        self.job.frame_done();
        self.job.set_status(format!(
            "{:.1}s",
            f64::from(self.captured) / f64::from(CAPTURE_FPS)
        ));
        self.next_due = (self.next_due + self.interval).max(now);
        self.collect_chunks();
        Ok(())
    }

    /// Arrête les pistes et concatène les morceaux.
    fn stop_recording(&mut self) -> Result<Vec<u8>, ExportError> {
        self.audio = None;
        let mut recorder = self
            .recorder
            .take()
            .ok_or_else(|| anyhow::anyhow!("enregistreur déjà arrêté"))?;
        recorder.stop()?;
        self.chunks.extend(recorder.chunks().try_iter());
        Ok(std::mem::take(&mut self.chunks).concat())
    }

    fn conclude(&mut self, outcome: Outcome) {
        self.audio = None;
        if let Some(mut recorder) = self.recorder.take()
            && let Err(e) = recorder.stop()
        {
            log::warn!("[REC] arrêt de l'enregistreur : {e}");
        }
        self.chunks = Vec::new();
        self.samples = Vec::new();
        self.done = true;
        self.job.finish(outcome);
    }
}

impl ExportTask for LiveCaptureRecorder {
    fn job(&self) -> &ExportJob {
        &self.job
    }

    fn step(&mut self, source: &mut dyn MediaSource) -> Step {
        if self.done {
            return Step::Done;
        }
        if self.stop_requested || source.has_ended() {
            if source.has_ended() {
                log::info!("[REC] fin de la source");
            }
            let outcome = match self.stop_recording() {
                Ok(bytes) => Outcome::Success(bytes),
                Err(e) => Outcome::Failed(e.to_string()),
            };
            self.conclude(outcome);
            return Step::Done;
        }
        match self.capture(source) {
            Ok(()) => Step::Continue,
            Err(e) => {
                self.conclude(Outcome::Failed(e.to_string()));
                Step::Done
            }
        }
    }

    fn request_stop(&mut self) {
        self.stop_requested = true;
    }

    fn into_job(self: Box<Self>) -> ExportJob {
        self.job
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeFeed, FakeSource, FakeStreamBackend};

    fn appearance() -> AppearanceSettings {
        AppearanceSettings {
            cell_size: 8,
            ..AppearanceSettings::default()
        }
    }

    fn start(source: &FakeSource, backend: &FakeStreamBackend, audio: Option<Box<dyn AudioFeed>>) -> LiveCaptureRecorder {
        LiveCaptureRecorder::start(source, &appearance(), &ToneSettings::default(), backend, audio)
            .unwrap()
            .with_frame_interval(Duration::ZERO)
    }

    #[test]
    fn codec_negotiation_follows_preference() {
        let both = FakeStreamBackend::supporting(&[VideoCodec::Vp9, VideoCodec::Vp8]);
        assert_eq!(CodecChoice::negotiate(&both), CodecChoice::PREFERENCES[0]);
        let vp8 = FakeStreamBackend::supporting(&[VideoCodec::Vp8]);
        assert_eq!(CodecChoice::negotiate(&vp8).video, Some(VideoCodec::Vp8));
        let none = FakeStreamBackend::supporting(&[]);
        assert_eq!(CodecChoice::negotiate(&none), CodecChoice::default());
    }

    #[test]
    fn natural_end_stops_and_concatenates_chunks() {
        let mut source = FakeSource::live();
        let backend = FakeStreamBackend::supporting(&[VideoCodec::Vp9]);
        let mut rec = start(&source, &backend, None);
        for _ in 0..5 {
            assert_eq!(rec.step(&mut source), Step::Continue);
        }
        source.ended = true;
        assert_eq!(rec.step(&mut source), Step::Done);
        assert_eq!(rec.captured(), 5);
        let Some(Outcome::Success(bytes)) = rec.job().outcome() else {
            panic!("attendu un succès : {:?}", rec.job().outcome());
        };
        assert_eq!(bytes.as_slice(), &[0, 1, 2, 3, 4, b'E', b'N', b'D']);
        assert!(backend.log().lock().unwrap().stopped);
    }

    #[test]
    fn explicit_stop_yields_the_recording() {
        let mut source = FakeSource::video(3.0);
        let backend = FakeStreamBackend::supporting(&[VideoCodec::Vp8]);
        let mut rec = start(&source, &backend, None);
        rec.step(&mut source);
        rec.step(&mut source);
        rec.request_stop();
        assert_eq!(rec.step(&mut source), Step::Done);
        assert!(matches!(rec.job().outcome(), Some(Outcome::Success(b)) if b.len() == 5));
        let log = backend.log();
        let log = log.lock().unwrap();
        assert_eq!(log.config.map(|c| c.codecs.video), Some(Some(VideoCodec::Vp8)));
        assert_eq!(log.timestamps, vec![0, 33_333]);
    }

    #[test]
    fn live_audio_is_pushed_alongside_frames() {
        let mut source = FakeSource::live();
        let backend = FakeStreamBackend::supporting(&[VideoCodec::Vp9]);
        let mut rec = start(&source, &backend, Some(Box::new(FakeFeed { per_drain: 96 })));
        for _ in 0..3 {
            rec.step(&mut source);
        }
        let log = backend.log();
        let log = log.lock().unwrap();
        assert_eq!(log.audio_samples, 3 * 96);
        assert_eq!(
            log.config.and_then(|c| c.audio),
            Some(AudioConfig { sample_rate: 48_000, channels: 2 })
        );
    }

    #[test]
    fn push_failure_fails_and_stops_tracks() {
        let mut source = FakeSource::live();
        let backend = FakeStreamBackend {
            fail_after: Some(2),
            ..FakeStreamBackend::supporting(&[VideoCodec::Vp9])
        };
        let job = crate::job::run_to_end(Box::new(start(&source, &backend, None)), &mut source);
        assert!(matches!(job.outcome(), Some(Outcome::Failed(_))));
        assert!(backend.log().lock().unwrap().stopped);
    }

    #[test]
    fn empty_grid_is_rejected() {
        let source = FakeSource::live().with_size(3, 3);
        let backend = FakeStreamBackend::supporting(&[VideoCodec::Vp9]);
        let err = LiveCaptureRecorder::start(&source, &appearance(), &ToneSettings::default(), &backend, None);
        assert!(matches!(err.err(), Some(ExportError::PreconditionUnmet(_))));
    }
}
