use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use af_audio::AudioChunk;
use af_core::config::{AppearanceSettings, ExportSettings, ToneSettings};
use af_core::traits::{MediaSource, PlaybackState, SourceKind};

use crate::codec::{
    AudioConfig, AudioEncoder, AudioProvider, ContainerWriter, MediaBackend, PacketTrack, VideoConfig,
    VideoEncoder, forward_packets,
};
use crate::error::ExportError;
use crate::job::{Degradation, ExportJob, ExportKind, ExportTask, Outcome, Step};
use crate::render::FrameRenderer;
use crate::seek::{SeekOutcome, seek_to};

/// Cadence vidéo de l'export HQ.
pub const HQ_FPS: u32 = 30;

/// Une keyframe forcée par seconde.
pub const KEYFRAME_INTERVAL: u32 = 30;

/// États de l'export muxé.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MuxStage {
    ExtractingAudio,
    ConfiguringEncoders,
    EncodingAudio,
    EncodingVideo,
    Finalizing,
    Done,
}

impl fmt::Display for MuxStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ExtractingAudio => "audio : décodage",
            Self::ConfiguringEncoders => "configuration",
            Self::EncodingAudio => "audio : encodage",
            Self::EncodingVideo => "vidéo",
            Self::Finalizing => "finalisation",
            Self::Done => "terminé",
        })
    }
}

/// Encodeur vidéo et sa piste.
struct VideoLane {
    encoder: Box<dyn VideoEncoder>,
    track: PacketTrack,
}

struct AudioLane {
    encoder: Box<dyn AudioEncoder>,
    track: PacketTrack,
}

/// Export HQ : piste audio optionnelle encodée d'abord, puis vidéo à 30 fps
/// aux dimensions paires, keyframe forcée chaque seconde, le tout finalisé
/// en un seul conteneur.
///
/// L'audio est best-effort : un échec de décodage est une dégradation et
/// l'export continue en vidéo seule.
pub struct MuxedExporter {
    job: ExportJob,
    stage: MuxStage,
    backend: Box<dyn MediaBackend>,
    audio_provider: Box<dyn AudioProvider>,
    renderer: FrameRenderer,
    tone: ToneSettings,
    saved: PlaybackState,
    seek_timeout: Duration,
    video_config: VideoConfig,
    audio_path: Option<PathBuf>,
    audio_config: Option<AudioConfig>,
    pending_audio: VecDeque<AudioChunk>,
    container: Option<Box<dyn ContainerWriter>>,
    video: Option<VideoLane>,
    audio: Option<AudioLane>,
    index: u32,
    stop_requested: bool,
}

impl MuxedExporter {
    /// Vérifie source, géométrie et capacités, puis met la source en pause
    /// et en sourdine.
    ///
    /// # Errors
    /// `PreconditionUnmet` : source sans durée, grille vide, encodeur vidéo
    /// absent, ou encodeur audio absent alors que l'audio est demandé et
    /// disponible.
    pub fn start(
        source: &mut dyn MediaSource,
        appearance: &AppearanceSettings,
        tone: &ToneSettings,
        settings: &ExportSettings,
        backend: Box<dyn MediaBackend>,
        audio_provider: Box<dyn AudioProvider>,
    ) -> Result<Self, ExportError> {
        let duration = match source.kind() {
            SourceKind::FileVideo => source
                .duration()
                .ok_or_else(|| ExportError::precondition("durée de la vidéo inconnue"))?,
            SourceKind::StillImage | SourceKind::LiveStream => {
                return Err(ExportError::precondition(
                    "l'export HQ exige une vidéo de durée finie",
                ));
            }
        };
        let total = (duration.max(0.0) * f64::from(HQ_FPS)).floor() as u32;
        if total == 0 {
            return Err(ExportError::precondition("vidéo trop courte"));
        }

        let renderer = FrameRenderer::new(appearance);
        let (sw, sh) = source.native_size();
        let (width, height) = renderer
            .geometry(sw, sh)
            .map(|g| g.even_render_size())
            .filter(|&(w, h)| w > 0 && h > 0)
            .ok_or_else(|| ExportError::precondition("grille vide"))?;

        let caps = backend.capabilities();
        if !caps.video {
            return Err(ExportError::precondition("aucun encodeur vidéo disponible"));
        }
        let audio_path = if settings.capture_audio {
            source.audio_path().map(PathBuf::from)
        } else {
            None
        };
        if audio_path.is_some() && !caps.audio {
            return Err(ExportError::precondition("aucun encodeur audio disponible"));
        }

        let saved = source.playback();
        source.set_playback(PlaybackState {
            paused: true,
            muted: true,
            ..saved
        });
        log::info!(
            "[HQ] {total} frames {width}x{height} @ {HQ_FPS}fps, audio : {}",
            if audio_path.is_some() { "oui" } else { "non" }
        );

        Ok(Self {
            job: ExportJob::new(ExportKind::MuxedMedia, total),
            stage: if audio_path.is_some() {
                MuxStage::ExtractingAudio
            } else {
                MuxStage::ConfiguringEncoders
            },
            backend,
            audio_provider,
            renderer,
            tone: *tone,
            saved,
            seek_timeout: Duration::from_millis(settings.seek_timeout_ms),
            video_config: VideoConfig {
                width,
                height,
                fps: HQ_FPS,
                keyframe_interval: KEYFRAME_INTERVAL,
            },
            audio_path,
            audio_config: None,
            pending_audio: VecDeque::new(),
            container: None,
            video: None,
            audio: None,
            index: 0,
            stop_requested: false,
        })
    }

    #[must_use]
    pub fn stage(&self) -> MuxStage {
        self.stage
    }

    fn extract_audio(&mut self) {
        let Some(path) = self.audio_path.take() else {
            return;
        };
        match self.audio_provider.decode(&path) {
            Ok(decoded) if decoded.frames() > 0 => {
                log::info!(
                    "[HQ] audio : {:.2}s, {} Hz, {} canaux",
                    decoded.duration_secs(),
                    decoded.sample_rate,
                    decoded.channels
                );
                self.audio_config = Some(AudioConfig {
                    sample_rate: decoded.sample_rate,
                    channels: decoded.channels,
                });
                self.pending_audio = decoded.chunks().collect();
            }
            Ok(_) => self
                .job
                .degrade(Degradation::AudioUnavailable(String::from("piste audio vide"))),
            Err(e) => self.job.degrade(Degradation::AudioUnavailable(e.to_string())),
        }
    }

    fn configure(&mut self) -> Result<(), ExportError> {
        let mut container = self.backend.container()?;
        let track = container.add_video_track(&self.video_config)?;
        let encoder = self.backend.video_encoder(&self.video_config)?;
        self.video = Some(VideoLane { encoder, track });
        if let Some(config) = self.audio_config {
            let track = container.add_audio_track(&config)?;
            let encoder = self.backend.audio_encoder(&config)?;
            self.audio = Some(AudioLane { encoder, track });
        }
        self.container = Some(container);
        Ok(())
    }

    fn encode_audio_chunk(&mut self) -> Result<bool, ExportError> {
        let (Some(lane), Some(container)) = (self.audio.as_mut(), self.container.as_deref_mut()) else {
            return Ok(true);
        };
        match self.pending_audio.pop_front() {
            Some(chunk) => {
                lane.encoder.submit(&chunk)?;
                forward_packets(lane.encoder.packets(), container, &lane.track)?;
                Ok(false)
            }
            None => {
                lane.encoder.flush()?;
                forward_packets(lane.encoder.packets(), container, &lane.track)?;
                Ok(true)
            }
        }
    }

    fn encode_video_frame(&mut self, source: &mut dyn MediaSource) -> Result<(), ExportError> {
        let ts = f64::from(self.index) / f64::from(HQ_FPS);
        if seek_to(source, ts, self.seek_timeout) == SeekOutcome::TimedOut {
            self.job.degrade(Degradation::SeekTimeout { timestamp: ts });
        }
        let frame = source
            .current_frame()
            .ok_or_else(|| anyhow::anyhow!("aucune frame décodée à la frame {}", self.index))?;
        let surface = self
            .renderer
            .render(&frame, &self.tone, true)?
            .ok_or_else(|| anyhow::anyhow!("grille vide à la frame {}", self.index))?;
        if (surface.width, surface.height) != (self.video_config.width, self.video_config.height) {
            return Err(anyhow::anyhow!(
                "dimensions changées en cours d'export : {}x{}",
                surface.width,
                surface.height
            )
            .into());
        }
        let (Some(lane), Some(container)) = (self.video.as_mut(), self.container.as_deref_mut()) else {
            return Err(anyhow::anyhow!("encodeur vidéo non configuré").into());
        };
        let keyframe = self.index % KEYFRAME_INTERVAL == 0;
        lane.encoder
            .submit(surface, self.video_config.timestamp_us(self.index), keyframe)?;
        forward_packets(lane.encoder.packets(), container, &lane.track)?;
        Ok(())
    }

    fn finalize(&mut self) -> Result<Vec<u8>, ExportError> {
        let mut container = self
            .container
            .take()
            .ok_or_else(|| anyhow::anyhow!("conteneur déjà finalisé"))?;
        if let Some(mut lane) = self.video.take() {
            lane.encoder.flush()?;
            let drained = forward_packets(lane.encoder.packets(), container.as_mut(), &lane.track)?;
            log::debug!("[HQ] flush vidéo : {drained} paquets restants");
        }
        self.audio = None;
        container.finalize()
    }

    fn advance(&mut self, source: &mut dyn MediaSource) -> Result<Step, ExportError> {
        match self.stage {
            MuxStage::ExtractingAudio => {
                self.extract_audio();
                self.stage = MuxStage::ConfiguringEncoders;
            }
            MuxStage::ConfiguringEncoders => {
                self.configure()?;
                self.stage = if self.audio.is_some() {
                    MuxStage::EncodingAudio
                } else {
                    MuxStage::EncodingVideo
                };
            }
            MuxStage::EncodingAudio => {
                if self.encode_audio_chunk()? {
                    self.stage = MuxStage::EncodingVideo;
                }
            }
            MuxStage::EncodingVideo => {
                self.encode_video_frame(source)?;
                self.job.frame_done();
                self.index += 1;
                if self.index >= self.job.total() {
                    self.stage = MuxStage::Finalizing;
                }
            }
            MuxStage::Finalizing => {
                let bytes = self.finalize()?;
                self.conclude(source, Outcome::Success(bytes));
                return Ok(Step::Done);
            }
            MuxStage::Done => return Ok(Step::Done),
        }
        let status = match self.stage {
            MuxStage::EncodingVideo => format!("{} {}/{}", self.stage, self.index, self.job.total()),
            MuxStage::EncodingAudio => format!("{} ({} restants)", self.stage, self.pending_audio.len()),
            _ => self.stage.to_string(),
        };
        self.job.set_status(status);
        Ok(Step::Continue)
    }

    /// Libère encodeurs, conteneur et audio décodé puis restaure la lecture.
    fn conclude(&mut self, source: &mut dyn MediaSource, outcome: Outcome) {
        self.video = None;
        self.audio = None;
        self.container = None;
        self.pending_audio = VecDeque::new();
        source.set_playback(self.saved);
        self.stage = MuxStage::Done;
        self.job.finish(outcome);
    }
}

impl ExportTask for MuxedExporter {
    fn job(&self) -> &ExportJob {
        &self.job
    }

    fn step(&mut self, source: &mut dyn MediaSource) -> Step {
        if self.stage == MuxStage::Done {
            return Step::Done;
        }
        if self.stop_requested {
            self.conclude(source, Outcome::Cancelled);
            return Step::Done;
        }
        match self.advance(source) {
            Ok(step) => step,
            Err(e) => {
                self.conclude(source, Outcome::Failed(e.to_string()));
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
    use crate::codec::{Capabilities, TrackKind};
    use crate::job::run_to_end;
    use crate::testing::{FakeAudio, FakeBackend, FakeSource};

    fn appearance(cell: u32) -> AppearanceSettings {
        AppearanceSettings {
            cell_size: cell,
            ..AppearanceSettings::default()
        }
    }

    fn start(
        source: &mut FakeSource,
        backend: FakeBackend,
        audio: FakeAudio,
        cell: u32,
    ) -> Result<MuxedExporter, ExportError> {
        MuxedExporter::start(
            source,
            &appearance(cell),
            &ToneSettings::default(),
            &ExportSettings::default(),
            Box::new(backend),
            Box::new(audio),
        )
    }

    #[test]
    fn ten_seconds_yield_300_frames_with_keyframe_every_second() {
        let mut source = FakeSource::video(10.0);
        let backend = FakeBackend::default();
        let log = backend.log();
        let exporter = start(&mut source, backend, FakeAudio::Silence { secs: 10 }, 8).unwrap();
        let job = run_to_end(Box::new(exporter), &mut source);
        assert!(matches!(job.outcome(), Some(Outcome::Success(_))));
        assert_eq!(job.frame(), 300);
        assert_eq!(job.progress(), 100);

        let log = log.lock().unwrap();
        assert_eq!(log.submitted.len(), 300);
        let keyframes: Vec<usize> = log
            .submitted
            .iter()
            .enumerate()
            .filter(|(_, f)| f.keyframe)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(keyframes, (0..10).map(|k| k * 30).collect::<Vec<_>>());
        assert_eq!(log.submitted[30].timestamp_us, 1_000_000);

        let video_packets = log.written.iter().filter(|p| p.0 == TrackKind::Video).count();
        assert_eq!(video_packets, 300);
        assert_eq!(log.finalized_with, Some(log.written.len()));
    }

    #[test]
    fn audio_packets_precede_video_packets() {
        let mut source = FakeSource::video(2.0);
        let backend = FakeBackend::default();
        let log = backend.log();
        let exporter = start(&mut source, backend, FakeAudio::Silence { secs: 3 }, 8).unwrap();
        run_to_end(Box::new(exporter), &mut source);

        let log = log.lock().unwrap();
        let kinds: Vec<TrackKind> = log.written.iter().map(|p| p.0).collect();
        assert_eq!(kinds.iter().filter(|&&k| k == TrackKind::Audio).count(), 3);
        let first_video = kinds.iter().position(|&k| k == TrackKind::Video).unwrap();
        assert!(kinds[first_video..].iter().all(|&k| k == TrackKind::Video));
    }

    #[test]
    fn audio_failure_degrades_to_video_only() {
        let mut source = FakeSource::video(1.0);
        let backend = FakeBackend::default();
        let log = backend.log();
        let exporter = start(&mut source, backend, FakeAudio::Broken, 8).unwrap();
        let job = run_to_end(Box::new(exporter), &mut source);
        assert!(matches!(job.outcome(), Some(Outcome::Success(_))));
        assert!(
            job.degradations()
                .iter()
                .any(|d| matches!(d, Degradation::AudioUnavailable(_)))
        );
        let log = log.lock().unwrap();
        assert!(log.tracks.iter().all(|&k| k == TrackKind::Video));
        assert_eq!(log.written.len(), 30);
    }

    #[test]
    fn odd_snapped_size_is_forced_even() {
        let mut source = FakeSource::video(0.2).with_size(75, 45);
        let backend = FakeBackend::default();
        let log = backend.log();
        let exporter = start(&mut source, backend, FakeAudio::Broken, 5).unwrap();
        run_to_end(Box::new(exporter), &mut source);
        let log = log.lock().unwrap();
        assert_eq!(log.video_config.map(|c| (c.width, c.height)), Some((74, 44)));
        assert!(log.submitted.iter().all(|f| (f.width, f.height) == (74, 44)));
    }

    #[test]
    fn delayed_packets_are_drained_by_flush_before_finalize() {
        let mut source = FakeSource::video(1.0);
        let backend = FakeBackend {
            video_latency: 5,
            ..FakeBackend::default()
        };
        let log = backend.log();
        let job = run_to_end(
            Box::new(start(&mut source, backend, FakeAudio::Broken, 8).unwrap()),
            &mut source,
        );
        assert!(matches!(job.outcome(), Some(Outcome::Success(_))));
        let log = log.lock().unwrap();
        assert_eq!(log.finalized_with, Some(30));
        let ts: Vec<i64> = log.written.iter().map(|p| p.1).collect();
        assert!(ts.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn missing_capabilities_are_preconditions() {
        let mut source = FakeSource::video(1.0);
        let no_video = FakeBackend {
            caps: Capabilities { video: false, audio: true },
            ..FakeBackend::default()
        };
        assert!(matches!(
            start(&mut source, no_video, FakeAudio::Broken, 8).err(),
            Some(ExportError::PreconditionUnmet(_))
        ));

        let no_audio = FakeBackend {
            caps: Capabilities { video: true, audio: false },
            ..FakeBackend::default()
        };
        assert!(matches!(
            start(&mut source, no_audio, FakeAudio::Broken, 8).err(),
            Some(ExportError::PreconditionUnmet(_))
        ));

        source.audio = None;
        let no_audio = FakeBackend {
            caps: Capabilities { video: true, audio: false },
            ..FakeBackend::default()
        };
        assert!(start(&mut source, no_audio, FakeAudio::Broken, 8).is_ok());
        assert_eq!(source.playback, PlaybackState { position: 0.0, paused: true, muted: true });
    }

    #[test]
    fn empty_grid_and_still_source_are_rejected() {
        let mut tiny = FakeSource::video(1.0).with_size(4, 4);
        assert!(matches!(
            start(&mut tiny, FakeBackend::default(), FakeAudio::Broken, 8).err(),
            Some(ExportError::PreconditionUnmet(_))
        ));
        let mut still = FakeSource::still();
        assert!(matches!(
            start(&mut still, FakeBackend::default(), FakeAudio::Broken, 8).err(),
            Some(ExportError::PreconditionUnmet(_))
        ));
    }

    #[test]
    fn container_failure_fails_job_and_restores_playback() {
        let mut source = FakeSource::video(2.0);
        source.position = 1.25;
        let backend = FakeBackend {
            reject_after: Some(10),
            ..FakeBackend::default()
        };
        let job = run_to_end(
            Box::new(start(&mut source, backend, FakeAudio::Broken, 8).unwrap()),
            &mut source,
        );
        assert!(matches!(job.outcome(), Some(Outcome::Failed(_))));
        assert!(job.progress() < 100);
        assert_eq!(source.playback, PlaybackState { position: 1.25, paused: false, muted: false });
    }
}
