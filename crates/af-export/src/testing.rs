//! Doublures en mémoire pour les tests des orchestrateurs.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use af_audio::{AudioChunk, AudioError, AudioFeed, DecodedAudio};
use af_core::color::Rgb;
use af_core::frame::FrameBuffer;
use af_core::traits::{MediaSource, PlaybackState, SourceKind};

use crate::codec::{
    AudioConfig, AudioEncoder, AudioProvider, Capabilities, ContainerWriter, EncodedPacket, MediaBackend,
    PacketTrack, TrackKind, VideoConfig, VideoEncoder,
};
use crate::error::ExportError;
use crate::gif::PaletteFrameSink;
use crate::live::{CodecChoice, StreamBackend, StreamConfig, StreamRecorder, VideoCodec};
use crate::palette::Palette;

/// Source vidéo synthétique : la frame est un aplat dont le gris dépend de
/// la position.
pub struct FakeSource {
    pub kind: SourceKind,
    pub size: (u32, u32),
    pub duration: Option<f64>,
    pub position: f64,
    pending: Option<f64>,
    /// Ne notifie jamais la fin de seek et ne bouge pas.
    pub stalled: bool,
    pub ended: bool,
    pub seeks: Vec<f64>,
    pub playback: PlaybackState,
    pub audio: Option<PathBuf>,
}

impl FakeSource {
    pub fn video(duration: f64) -> Self {
        Self {
            kind: SourceKind::FileVideo,
            size: (64, 48),
            duration: Some(duration),
            position: 0.0,
            pending: None,
            stalled: false,
            ended: false,
            seeks: Vec::new(),
            playback: PlaybackState::default(),
            audio: Some(PathBuf::from("fake.mp4")),
        }
    }

    pub fn still() -> Self {
        Self {
            kind: SourceKind::StillImage,
            duration: None,
            audio: None,
            ..Self::video(0.0)
        }
    }

    pub fn live() -> Self {
        Self {
            kind: SourceKind::LiveStream,
            duration: None,
            audio: None,
            ..Self::video(0.0)
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.size = (width, height);
        self
    }
}

impl MediaSource for FakeSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn native_size(&self) -> (u32, u32) {
        self.size
    }

    fn duration(&self) -> Option<f64> {
        self.duration
    }

    fn position(&self) -> f64 {
        self.position
    }

    fn request_seek(&mut self, secs: f64) {
        self.seeks.push(secs);
        self.pending = Some(secs);
    }

    fn wait_seeked(&mut self, timeout: Duration) -> bool {
        if self.stalled {
            std::thread::sleep(timeout.min(Duration::from_millis(1)));
            return false;
        }
        match self.pending.take() {
            Some(target) => {
                self.position = target;
                true
            }
            None => false,
        }
    }

    fn current_frame(&mut self) -> Option<Arc<FrameBuffer>> {
        let (w, h) = self.size;
        let mut fb = FrameBuffer::new(w, h);
        let level = ((self.position * 20.0) as u32 % 256) as u8;
        fb.fill(Rgb(level, level, level));
        Some(Arc::new(fb))
    }

    fn playback(&self) -> PlaybackState {
        PlaybackState {
            position: self.position,
            ..self.playback
        }
    }

    fn set_playback(&mut self, state: PlaybackState) {
        self.playback = state;
        if self.kind.is_seekable() {
            self.position = state.position;
        }
    }

    fn has_ended(&self) -> bool {
        self.ended
    }

    fn audio_path(&self) -> Option<&Path> {
        self.audio.as_deref()
    }
}

/// Ce qu'un `RecordingSink` a reçu.
#[derive(Debug, Default)]
pub struct SinkLog {
    pub size: Option<(u16, u16)>,
    pub frames: u32,
    pub delays: Vec<u32>,
    pub palettes: Vec<usize>,
}

/// Sink de frames indexées qui n'encode rien.
#[derive(Default)]
pub struct RecordingSink {
    /// Échoue sur la frame d'index donné.
    pub fail_at: Option<u32>,
    pub log: Arc<Mutex<SinkLog>>,
}

impl RecordingSink {
    pub fn log(&self) -> Arc<Mutex<SinkLog>> {
        Arc::clone(&self.log)
    }
}

impl PaletteFrameSink for RecordingSink {
    fn begin(&mut self, width: u16, height: u16) -> Result<(), ExportError> {
        self.log.lock().unwrap().size = Some((width, height));
        Ok(())
    }

    fn push_frame(&mut self, indices: &[u8], palette: &Palette, delay_ms: u32) -> Result<(), ExportError> {
        let mut log = self.log.lock().unwrap();
        if self.fail_at == Some(log.frames) {
            return Err(ExportError::Encoder("frame refusée".into()));
        }
        let (w, h) = log.size.unwrap();
        assert_eq!(indices.len(), usize::from(w) * usize::from(h));
        assert!(indices.iter().all(|&i| usize::from(i) < palette.colors().len()));
        log.frames += 1;
        log.delays.push(delay_ms);
        log.palettes.push(palette.colors().len());
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>, ExportError> {
        let frames = self.log.lock().unwrap().frames;
        Ok(frames.to_le_bytes().to_vec())
    }
}

/// Frame soumise à l'encodeur vidéo factice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubmittedFrame {
    pub width: u32,
    pub height: u32,
    pub timestamp_us: i64,
    pub keyframe: bool,
}

/// Journal partagé du backend factice.
#[derive(Debug, Default)]
pub struct MuxLog {
    pub video_config: Option<VideoConfig>,
    pub tracks: Vec<TrackKind>,
    pub submitted: Vec<SubmittedFrame>,
    /// (piste, horodatage, keyframe) dans l'ordre d'écriture.
    pub written: Vec<(TrackKind, i64, bool)>,
    /// Nombre de paquets écrits au moment de la finalisation.
    pub finalized_with: Option<usize>,
}

/// Backend en mémoire : l'encodeur vidéo retient `video_latency` paquets
/// jusqu'au prochain submit ou au flush.
pub struct FakeBackend {
    pub caps: Capabilities,
    pub video_latency: usize,
    /// Le conteneur rejette tout paquet au-delà de ce nombre.
    pub reject_after: Option<usize>,
    pub log: Arc<Mutex<MuxLog>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            caps: Capabilities { video: true, audio: true },
            video_latency: 0,
            reject_after: None,
            log: Arc::default(),
        }
    }
}

impl FakeBackend {
    pub fn log(&self) -> Arc<Mutex<MuxLog>> {
        Arc::clone(&self.log)
    }
}

impl MediaBackend for FakeBackend {
    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    fn video_encoder(&self, _config: &VideoConfig) -> Result<Box<dyn VideoEncoder>, ExportError> {
        let (tx, rx) = flume::unbounded();
        Ok(Box::new(FakeVideoEncoder {
            tx,
            rx,
            held: VecDeque::new(),
            latency: self.video_latency,
            log: self.log(),
        }))
    }

    fn audio_encoder(&self, _config: &AudioConfig) -> Result<Box<dyn AudioEncoder>, ExportError> {
        let (tx, rx) = flume::unbounded();
        Ok(Box::new(FakeAudioEncoder { tx, rx }))
    }

    fn container(&self) -> Result<Box<dyn ContainerWriter>, ExportError> {
        Ok(Box::new(FakeContainer {
            next_id: 0,
            reject_after: self.reject_after,
            log: self.log(),
        }))
    }
}

struct FakeVideoEncoder {
    tx: flume::Sender<EncodedPacket>,
    rx: flume::Receiver<EncodedPacket>,
    held: VecDeque<EncodedPacket>,
    latency: usize,
    log: Arc<Mutex<MuxLog>>,
}

impl VideoEncoder for FakeVideoEncoder {
    fn submit(&mut self, frame: &FrameBuffer, timestamp_us: i64, keyframe: bool) -> Result<(), ExportError> {
        self.log.lock().unwrap().submitted.push(SubmittedFrame {
            width: frame.width,
            height: frame.height,
            timestamp_us,
            keyframe,
        });
        self.held.push_back(EncodedPacket {
            data: vec![0; 4],
            timestamp_us,
            duration_us: 33_333,
            keyframe,
        });
        while self.held.len() > self.latency {
            if let Some(packet) = self.held.pop_front() {
                self.tx.send(packet).unwrap();
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ExportError> {
        for packet in self.held.drain(..) {
            self.tx.send(packet).unwrap();
        }
        Ok(())
    }

    fn packets(&self) -> &flume::Receiver<EncodedPacket> {
        &self.rx
    }
}

struct FakeAudioEncoder {
    tx: flume::Sender<EncodedPacket>,
    rx: flume::Receiver<EncodedPacket>,
}

impl AudioEncoder for FakeAudioEncoder {
    fn submit(&mut self, chunk: &AudioChunk) -> Result<(), ExportError> {
        self.tx
            .send(EncodedPacket {
                data: vec![0; chunk.samples.len()],
                timestamp_us: chunk.timestamp_us,
                duration_us: 1_000_000,
                keyframe: true,
            })
            .unwrap();
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ExportError> {
        Ok(())
    }

    fn packets(&self) -> &flume::Receiver<EncodedPacket> {
        &self.rx
    }
}

struct FakeContainer {
    next_id: usize,
    reject_after: Option<usize>,
    log: Arc<Mutex<MuxLog>>,
}

impl FakeContainer {
    fn track(&mut self, kind: TrackKind) -> PacketTrack {
        self.log.lock().unwrap().tracks.push(kind);
        self.next_id += 1;
        PacketTrack::new(self.next_id, kind)
    }
}

impl ContainerWriter for FakeContainer {
    fn add_video_track(&mut self, config: &VideoConfig) -> Result<PacketTrack, ExportError> {
        self.log.lock().unwrap().video_config = Some(*config);
        Ok(self.track(TrackKind::Video))
    }

    fn add_audio_track(&mut self, _config: &AudioConfig) -> Result<PacketTrack, ExportError> {
        Ok(self.track(TrackKind::Audio))
    }

    fn write_packet(&mut self, track: &PacketTrack, packet: EncodedPacket) -> Result<(), ExportError> {
        let mut log = self.log.lock().unwrap();
        if self.reject_after.is_some_and(|n| log.written.len() >= n) {
            return Err(ExportError::Container("paquet refusé".into()));
        }
        log.written.push((track.kind(), packet.timestamp_us, packet.keyframe));
        Ok(())
    }

    fn finalize(self: Box<Self>) -> Result<Vec<u8>, ExportError> {
        let mut log = self.log.lock().unwrap();
        let count = log.written.len();
        log.finalized_with = Some(count);
        Ok(vec![0; count])
    }
}

/// Audio factice : silence stéréo à 100 Hz ou décodage en échec.
pub enum FakeAudio {
    Silence { secs: usize },
    Broken,
}

impl AudioProvider for FakeAudio {
    fn decode(&self, _path: &Path) -> Result<DecodedAudio, AudioError> {
        match self {
            Self::Silence { secs } => Ok(DecodedAudio {
                samples: vec![0.0; secs * 100 * 2],
                sample_rate: 100,
                channels: 2,
            }),
            Self::Broken => Err(AudioError::DecodeError("flux corrompu".into())),
        }
    }
}

/// Journal de l'enregistreur en flux factice.
#[derive(Debug, Default)]
pub struct StreamLog {
    pub config: Option<StreamConfig>,
    pub timestamps: Vec<i64>,
    pub audio_samples: usize,
    pub stopped: bool,
}

pub struct FakeStreamBackend {
    pub supported: Vec<VideoCodec>,
    /// Refuse toute frame vidéo au-delà de ce nombre.
    pub fail_after: Option<usize>,
    pub log: Arc<Mutex<StreamLog>>,
}

impl FakeStreamBackend {
    pub fn supporting(codecs: &[VideoCodec]) -> Self {
        Self {
            supported: codecs.to_vec(),
            fail_after: None,
            log: Arc::default(),
        }
    }

    pub fn log(&self) -> Arc<Mutex<StreamLog>> {
        Arc::clone(&self.log)
    }
}

impl StreamBackend for FakeStreamBackend {
    fn supports(&self, codecs: &CodecChoice) -> bool {
        codecs.video.is_some_and(|v| self.supported.contains(&v))
    }

    fn open(&self, config: &StreamConfig) -> Result<Box<dyn StreamRecorder>, ExportError> {
        self.log.lock().unwrap().config = Some(*config);
        let (tx, rx) = flume::unbounded();
        Ok(Box::new(FakeStreamRecorder {
            tx,
            rx,
            fail_after: self.fail_after,
            log: self.log(),
        }))
    }
}

/// Émet un morceau d'un octet (l'index de frame) par frame, puis `END` à l'arrêt.
struct FakeStreamRecorder {
    tx: flume::Sender<Vec<u8>>,
    rx: flume::Receiver<Vec<u8>>,
    fail_after: Option<usize>,
    log: Arc<Mutex<StreamLog>>,
}

impl StreamRecorder for FakeStreamRecorder {
    fn push_video(&mut self, _frame: &FrameBuffer, timestamp_us: i64) -> Result<(), ExportError> {
        let mut log = self.log.lock().unwrap();
        if self.fail_after.is_some_and(|n| log.timestamps.len() >= n) {
            return Err(ExportError::Encoder("frame refusée".into()));
        }
        let index = log.timestamps.len() as u8;
        log.timestamps.push(timestamp_us);
        self.tx.send(vec![index]).unwrap();
        Ok(())
    }

    fn push_audio(&mut self, samples: &[f32]) -> Result<(), ExportError> {
        self.log.lock().unwrap().audio_samples += samples.len();
        Ok(())
    }

    fn chunks(&self) -> &flume::Receiver<Vec<u8>> {
        &self.rx
    }

    fn stop(&mut self) -> Result<(), ExportError> {
        self.log.lock().unwrap().stopped = true;
        self.tx.send(b"END".to_vec()).unwrap();
        Ok(())
    }
}

/// Flux audio live factice, stéréo 48 kHz.
pub struct FakeFeed {
    pub per_drain: usize,
}

impl AudioFeed for FakeFeed {
    fn sample_rate(&self) -> u32 {
        48_000
    }

    fn channels(&self) -> u16 {
        2
    }

    fn drain(&mut self, out: &mut Vec<f32>) -> usize {
        out.clear();
        out.resize(self.per_drain, 0.25);
        self.per_drain
    }
}
