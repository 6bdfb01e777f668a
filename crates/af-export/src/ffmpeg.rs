//! Backends par défaut : ffmpeg en sous-processus (doit être dans PATH).
//!
//! - `FfmpegBackend` : export HQ. Les encodeurs empaquettent les frames RGBA
//!   et les échantillons PCM ; le conteneur pipe la vidéo vers ffmpeg qui
//!   encode en H.264/AAC et écrit un MP4.
//! - `FfmpegStreamBackend` : capture live, WebM sur stdout.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use af_audio::AudioChunk;
use af_core::frame::FrameBuffer;
use af_source::ffmpeg::reap;
use anyhow::Context;
use tempfile::{NamedTempFile, TempDir};

use crate::codec::{
    AudioConfig, AudioEncoder, Capabilities, ContainerWriter, EncodedPacket, MediaBackend, PacketTrack,
    TrackKind, VideoConfig, VideoEncoder,
};
use crate::error::ExportError;
use crate::live::{AudioCodec, CodecChoice, StreamBackend, StreamConfig, StreamRecorder, VideoCodec};

const FFMPEG: &str = "ffmpeg";

/// Profondeur de la file de l'encodeur vidéo : au-delà, `submit` bloque.
const ENCODER_QUEUE: usize = 4;

/// Frames en attente d'écriture vers ffmpeg pendant la capture live.
const LIVE_QUEUE: usize = 8;

/// Taille de lecture de la sortie WebM.
const CHUNK_SIZE: usize = 64 * 1024;

/// Liste des encodeurs de `ffmpeg -encoders`.
///
/// # Example
/// ```
/// use af_export::ffmpeg::parse_encoders;
/// let text = "Encoders:\n V..... = Video\n ------\n V....D libx264   H.264\n A....D aac   AAC\n";
/// assert_eq!(parse_encoders(text), vec!["libx264", "aac"]);
/// ```
#[must_use]
pub fn parse_encoders(text: &str) -> Vec<String> {
    text.lines()
        .skip_while(|line| !line.trim_start().starts_with("---"))
        .skip(1)
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(String::from)
        .collect()
}

/// Encodeurs disponibles ; vide si ffmpeg est introuvable.
fn probe_encoders() -> Vec<String> {
    match Command::new(FFMPEG).args(["-hide_banner", "-encoders"]).output() {
        Ok(out) if out.status.success() => parse_encoders(&String::from_utf8_lossy(&out.stdout)),
        Ok(out) => {
            log::warn!("ffmpeg -encoders : code {:?}", out.status.code());
            Vec::new()
        }
        Err(e) => {
            log::warn!("ffmpeg introuvable : {e}");
            Vec::new()
        }
    }
}

fn has(encoders: &[String], name: &str) -> bool {
    encoders.iter().any(|e| e == name)
}

fn container_error(e: impl std::fmt::Display) -> ExportError {
    ExportError::Container(e.to_string())
}

fn encoder_closed() -> ExportError {
    ExportError::Encoder(String::from("encodeur fermé"))
}

// ─── HQ ─────────────────────────────────────────────────────────────────────

/// Backend HQ : libx264 + aac en MP4.
#[derive(Clone, Debug)]
pub struct FfmpegBackend {
    caps: Capabilities,
}

impl FfmpegBackend {
    /// Sonde `ffmpeg -encoders` une fois.
    #[must_use]
    pub fn probe() -> Self {
        let encoders = probe_encoders();
        let caps = Capabilities {
            video: has(&encoders, "libx264"),
            audio: has(&encoders, "aac"),
        };
        log::info!("ffmpeg : vidéo {} / audio {}", caps.video, caps.audio);
        Self { caps }
    }
}

impl MediaBackend for FfmpegBackend {
    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    fn video_encoder(&self, config: &VideoConfig) -> Result<Box<dyn VideoEncoder>, ExportError> {
        Ok(Box::new(RawVideoEncoder::spawn(config)?))
    }

    fn audio_encoder(&self, _config: &AudioConfig) -> Result<Box<dyn AudioEncoder>, ExportError> {
        Ok(Box::new(PcmAudioEncoder::new()))
    }

    fn container(&self) -> Result<Box<dyn ContainerWriter>, ExportError> {
        Ok(Box::new(FfmpegContainer::new()?))
    }
}

enum EncoderJob {
    Frame(EncodedPacket),
    Flush(flume::Sender<()>),
}

/// Empaqueteur RGBA sur thread dédié. La file bornée fait office de
/// backpressure ; `Flush` est traité dans l'ordre des frames, son
/// acquittement garantit que tous les paquets précédents sont émis.
pub struct RawVideoEncoder {
    jobs: Option<flume::Sender<EncoderJob>>,
    packets: flume::Receiver<EncodedPacket>,
    worker: Option<JoinHandle<()>>,
    frame_duration_us: i64,
    frame_len: usize,
}

impl RawVideoEncoder {
    /// # Errors
    /// The worker thread could not be spawned.
    pub fn spawn(config: &VideoConfig) -> Result<Self, ExportError> {
        let (job_tx, job_rx) = flume::bounded::<EncoderJob>(ENCODER_QUEUE);
        let (packet_tx, packet_rx) = flume::unbounded();
        let worker = thread::Builder::new()
            .name("af-encoder".into())
            .spawn(move || {
                for job in job_rx.iter() {
                    match job {
                        EncoderJob::Frame(packet) => {
                            if packet_tx.send(packet).is_err() {
                                break;
                            }
                        }
                        EncoderJob::Flush(ack) => {
                            let _ = ack.send(());
                        }
                    }
                }
            })
            .context("thread encodeur")?;
        Ok(Self {
            jobs: Some(job_tx),
            packets: packet_rx,
            worker: Some(worker),
            frame_duration_us: config.frame_duration_us(),
            frame_len: config.width as usize * config.height as usize * 4,
        })
    }
}

impl VideoEncoder for RawVideoEncoder {
    fn submit(&mut self, frame: &FrameBuffer, timestamp_us: i64, keyframe: bool) -> Result<(), ExportError> {
        if frame.data.len() != self.frame_len {
            return Err(ExportError::Encoder(format!(
                "frame {}x{} ne correspond pas à la configuration",
                frame.width, frame.height
            )));
        }
        let jobs = self.jobs.as_ref().ok_or_else(encoder_closed)?;
        jobs.send(EncoderJob::Frame(EncodedPacket {
            data: frame.data.clone(),
            timestamp_us,
            duration_us: self.frame_duration_us,
            keyframe,
        }))
        .map_err(|_| encoder_closed())
    }

    fn flush(&mut self) -> Result<(), ExportError> {
        let jobs = self.jobs.as_ref().ok_or_else(encoder_closed)?;
        let (ack_tx, ack_rx) = flume::bounded(1);
        jobs.send(EncoderJob::Flush(ack_tx)).map_err(|_| encoder_closed())?;
        ack_rx.recv().map_err(|_| encoder_closed())
    }

    fn packets(&self) -> &flume::Receiver<EncodedPacket> {
        &self.packets
    }
}

impl Drop for RawVideoEncoder {
    fn drop(&mut self) {
        self.jobs = None;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// PCM f32 little-endian : un paquet par chunk, synchrone.
pub struct PcmAudioEncoder {
    tx: flume::Sender<EncodedPacket>,
    rx: flume::Receiver<EncodedPacket>,
}

impl PcmAudioEncoder {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Self { tx, rx }
    }
}

impl Default for PcmAudioEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioEncoder for PcmAudioEncoder {
    fn submit(&mut self, chunk: &AudioChunk) -> Result<(), ExportError> {
        let data: Vec<u8> = chunk.samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let duration_us = i64::from(chunk.frames) * 1_000_000 / i64::from(chunk.sample_rate.max(1));
        self.tx
            .send(EncodedPacket {
                data,
                timestamp_us: chunk.timestamp_us,
                duration_us,
                keyframe: true,
            })
            .map_err(|_| encoder_closed())
    }

    fn flush(&mut self) -> Result<(), ExportError> {
        Ok(())
    }

    fn packets(&self) -> &flume::Receiver<EncodedPacket> {
        &self.rx
    }
}

struct StagedAudio {
    config: AudioConfig,
    file: BufWriter<NamedTempFile>,
}

/// Conteneur MP4. La piste audio est écrite dans un fichier temporaire ;
/// ffmpeg démarre au premier paquet vidéo, avec l'audio complet en seconde
/// entrée. Un paquet audio après ce point est refusé.
///
/// Les keyframes sont placées par ffmpeg toutes les `keyframe_interval`
/// frames. Le drapeau `keyframe` de chaque paquet vidéo doit suivre cette
/// cadence : un paquet qui la contredit est refusé.
pub struct FfmpegContainer {
    tracks: Vec<TrackKind>,
    video: Option<VideoConfig>,
    video_frames: u64,
    audio: Option<StagedAudio>,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    output: NamedTempFile,
}

impl FfmpegContainer {
    /// # Errors
    /// The output temp file could not be created.
    pub fn new() -> Result<Self, ExportError> {
        let output = tempfile::Builder::new()
            .prefix("asciiframe-hq-")
            .suffix(".mp4")
            .tempfile()
            .context("fichier temporaire de sortie")?;
        Ok(Self {
            tracks: Vec::new(),
            video: None,
            video_frames: 0,
            audio: None,
            child: None,
            stdin: None,
            output,
        })
    }

    fn add_track(&mut self, kind: TrackKind) -> PacketTrack {
        self.tracks.push(kind);
        PacketTrack::new(self.tracks.len() - 1, kind)
    }

    fn spawn(&mut self) -> Result<(), ExportError> {
        let video = self
            .video
            .ok_or_else(|| ExportError::Container("aucune piste vidéo".into()))?;
        let staged = match self.audio.as_mut() {
            Some(audio) => {
                audio.file.flush().map_err(container_error)?;
                Some((audio.config, path_arg(audio.file.get_ref().path())?))
            }
            None => None,
        };
        let output = path_arg(self.output.path())?;
        let args = mp4_args(&video, staged.as_ref().map(|(c, p)| (c, p.as_str())), &output);

        log::debug!("ffmpeg {}", args.join(" "));
        let mut child = Command::new(FFMPEG)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExportError::Container(format!("lancement de ffmpeg : {e}")))?;
        self.stdin = child.stdin.take();
        self.child = Some(child);
        Ok(())
    }
}

/// Arguments ffmpeg de l'export MP4.
///
/// Pas de `-shortest` : une piste audio plus courte que la vidéo s'arrête
/// simplement, la vidéo garde toutes ses frames.
fn mp4_args(video: &VideoConfig, audio: Option<(&AudioConfig, &str)>, output: &str) -> Vec<String> {
    let mut args: Vec<String> = [
        "-hide_banner",
        "-loglevel",
        "error",
        "-y",
        "-f",
        "rawvideo",
        "-pix_fmt",
        "rgba",
        "-s",
    ]
    .into_iter()
    .map(String::from)
    .collect();
    args.push(format!("{}x{}", video.width, video.height));
    args.extend(["-r".into(), video.fps.to_string(), "-i".into(), "-".into()]);

    if let Some((config, path)) = audio {
        args.extend([
            "-f".into(),
            "f32le".into(),
            "-ar".into(),
            config.sample_rate.to_string(),
            "-ac".into(),
            config.channels.to_string(),
            "-i".into(),
            path.into(),
        ]);
        args.extend(["-map", "0:v", "-map", "1:a"].map(String::from));
    }

    let gop = video.keyframe_interval.max(1).to_string();
    args.extend(
        [
            "-c:v",
            "libx264",
            "-pix_fmt",
            "yuv420p",
            "-preset",
            "medium",
            "-crf",
            "18",
            "-sc_threshold",
            "0",
        ]
        .map(String::from),
    );
    args.extend([
        "-g".into(),
        gop.clone(),
        "-keyint_min".into(),
        gop.clone(),
        "-force_key_frames".into(),
        format!("expr:gte(n,n_forced*{gop})"),
    ]);
    if audio.is_some() {
        args.extend(["-c:a", "aac", "-b:a", "192k"].map(String::from));
    }
    args.extend(["-movflags", "+faststart", "-f", "mp4"].map(String::from));
    args.push(output.into());
    args
}

/// `true` si la frame `index` tombe sur la cadence de keyframes.
fn on_keyframe_cadence(index: u64, interval: u32) -> bool {
    index % u64::from(interval.max(1)) == 0
}

fn path_arg(path: &Path) -> Result<String, ExportError> {
    path.to_str()
        .map(String::from)
        .ok_or_else(|| ExportError::Container(format!("chemin non UTF-8 : {}", path.display())))
}

impl ContainerWriter for FfmpegContainer {
    fn add_video_track(&mut self, config: &VideoConfig) -> Result<PacketTrack, ExportError> {
        if self.video.is_some() {
            return Err(ExportError::Container("piste vidéo déjà présente".into()));
        }
        if config.width % 2 != 0 || config.height % 2 != 0 {
            return Err(ExportError::Container(format!(
                "dimensions impaires {}x{}",
                config.width, config.height
            )));
        }
        self.video = Some(*config);
        Ok(self.add_track(TrackKind::Video))
    }

    fn add_audio_track(&mut self, config: &AudioConfig) -> Result<PacketTrack, ExportError> {
        if self.audio.is_some() {
            return Err(ExportError::Container("piste audio déjà présente".into()));
        }
        let file = tempfile::Builder::new()
            .prefix("asciiframe-pcm-")
            .suffix(".f32")
            .tempfile()
            .map_err(container_error)?;
        self.audio = Some(StagedAudio {
            config: *config,
            file: BufWriter::new(file),
        });
        Ok(self.add_track(TrackKind::Audio))
    }

    fn write_packet(&mut self, track: &PacketTrack, packet: EncodedPacket) -> Result<(), ExportError> {
        if self.tracks.get(track.id()) != Some(&track.kind()) {
            return Err(ExportError::Container(format!("piste inconnue {}", track.id())));
        }
        match track.kind() {
            TrackKind::Audio => {
                if self.child.is_some() {
                    return Err(ExportError::Container(
                        "paquet audio après le début de la vidéo".into(),
                    ));
                }
                let audio = self
                    .audio
                    .as_mut()
                    .ok_or_else(|| ExportError::Container("aucune piste audio".into()))?;
                audio.file.write_all(&packet.data).map_err(container_error)
            }
            TrackKind::Video => {
                let interval = self.video.map_or(1, |v| v.keyframe_interval);
                if packet.keyframe != on_keyframe_cadence(self.video_frames, interval) {
                    return Err(ExportError::Container(format!(
                        "keyframe hors cadence à la frame {} (intervalle {interval})",
                        self.video_frames
                    )));
                }
                if self.child.is_none() {
                    self.spawn()?;
                }
                let stdin = self
                    .stdin
                    .as_mut()
                    .ok_or_else(|| ExportError::Container("stdin ffmpeg fermé".into()))?;
                stdin
                    .write_all(&packet.data)
                    .map_err(|e| ExportError::Container(format!("écriture vers ffmpeg : {e}")))?;
                self.video_frames += 1;
                Ok(())
            }
        }
    }

    fn finalize(mut self: Box<Self>) -> Result<Vec<u8>, ExportError> {
        let child = self
            .child
            .take()
            .ok_or_else(|| ExportError::Container("aucune frame vidéo écrite".into()))?;
        drop(self.stdin.take());
        let output = child.wait_with_output().map_err(container_error)?;
        if !output.status.success() {
            return Err(ExportError::Container(format!(
                "ffmpeg : {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        std::fs::read(self.output.path()).map_err(container_error)
    }
}

impl Drop for FfmpegContainer {
    fn drop(&mut self) {
        self.stdin = None;
        if let Some(mut child) = self.child.take() {
            reap(&mut child);
        }
    }
}

// ─── Capture live ───────────────────────────────────────────────────────────

/// Backend de capture live : WebM en flux sur stdout.
#[derive(Clone, Debug)]
pub struct FfmpegStreamBackend {
    encoders: Vec<String>,
}

impl FfmpegStreamBackend {
    #[must_use]
    pub fn probe() -> Self {
        Self {
            encoders: probe_encoders(),
        }
    }
}

fn video_codec_name(codec: VideoCodec) -> &'static str {
    match codec {
        VideoCodec::Vp9 => "libvpx-vp9",
        VideoCodec::Vp8 => "libvpx",
    }
}

fn audio_codec_name(codec: AudioCodec) -> &'static str {
    match codec {
        AudioCodec::Opus => "libopus",
    }
}

impl StreamBackend for FfmpegStreamBackend {
    fn supports(&self, codecs: &CodecChoice) -> bool {
        let video = codecs
            .video
            .is_none_or(|c| has(&self.encoders, video_codec_name(c)));
        let audio = codecs
            .audio
            .is_none_or(|c| has(&self.encoders, audio_codec_name(c)));
        video && audio
    }

    fn open(&self, config: &StreamConfig) -> Result<Box<dyn StreamRecorder>, ExportError> {
        Ok(Box::new(FfmpegStreamRecorder::start(config)?))
    }
}

/// Crée un named pipe (unix).
#[cfg(unix)]
fn make_fifo(path: &Path) -> anyhow::Result<()> {
    let status = Command::new("mkfifo").arg(path).status().context("mkfifo")?;
    anyhow::ensure!(status.success(), "mkfifo : code {:?}", status.code());
    Ok(())
}

#[cfg(not(unix))]
fn make_fifo(_path: &Path) -> anyhow::Result<()> {
    anyhow::bail!("named pipes non supportés sur cette plateforme")
}

/// Entrée audio via named pipe, alimentée par un thread écrivain.
struct AudioPipe {
    tx: Option<flume::Sender<Vec<u8>>>,
    writer: Option<JoinHandle<()>>,
    opened: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
    path: PathBuf,
    _dir: TempDir,
}

impl AudioPipe {
    fn create() -> anyhow::Result<(Self, PathBuf)> {
        let dir = tempfile::tempdir().context("répertoire temporaire")?;
        let path = dir.path().join("audio.f32");
        make_fifo(&path)?;
        let (tx, rx) = flume::bounded::<Vec<u8>>(LIVE_QUEUE);
        let opened = Arc::new(AtomicBool::new(false));
        let closing = Arc::new(AtomicBool::new(false));
        let (opened_flag, closing_flag) = (Arc::clone(&opened), Arc::clone(&closing));
        let fifo = path.clone();
        let writer = thread::Builder::new()
            .name("af-rec-audio".into())
            .spawn(move || {
                // Bloque jusqu'à ce qu'un lecteur ouvre le pipe.
                let Ok(mut file) = File::create(&fifo) else {
                    return;
                };
                if closing_flag.load(Ordering::Acquire) {
                    return;
                }
                opened_flag.store(true, Ordering::Release);
                for buf in rx.iter() {
                    if closing_flag.load(Ordering::Acquire) || file.write_all(&buf).is_err() {
                        break;
                    }
                }
            })
            .context("thread audio")?;
        Ok((
            Self {
                tx: Some(tx),
                writer: Some(writer),
                opened,
                closing,
                path: path.clone(),
                _dir: dir,
            },
            path,
        ))
    }

    /// Ferme la file et attend l'écrivain. Si personne n'a ouvert le pipe,
    /// une ouverture lecture-écriture (non bloquante sur un FIFO Linux),
    /// gardée jusqu'au join, libère l'écrivain qui sort sans rien écrire.
    fn close(&mut self) {
        self.tx = None;
        let Some(writer) = self.writer.take() else {
            return;
        };
        let mut unblock = None;
        if !self.opened.load(Ordering::Acquire) {
            log::debug!("[REC] pipe audio jamais ouvert par ffmpeg");
            self.closing.store(true, Ordering::Release);
            match OpenOptions::new().read(true).write(true).open(&self.path) {
                Ok(file) => unblock = Some(file),
                Err(e) => log::debug!("[REC] déblocage du pipe audio : {e}"),
            }
        }
        let _ = writer.join();
        drop(unblock);
    }
}

/// Enregistreur WebM : un thread écrit les frames dans stdin, un autre lit
/// stdout par morceaux.
pub struct FfmpegStreamRecorder {
    child: Option<Child>,
    frames: Option<flume::Sender<Vec<u8>>>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    audio: Option<AudioPipe>,
    chunks: flume::Receiver<Vec<u8>>,
    dropped: u64,
}

impl FfmpegStreamRecorder {
    /// # Errors
    /// ffmpeg could not be started.
    pub fn start(config: &StreamConfig) -> Result<Self, ExportError> {
        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-f", "rawvideo", "-pix_fmt", "rgba"]
            .map(String::from)
            .to_vec();
        args.extend([
            "-s".into(),
            format!("{}x{}", config.width, config.height),
            "-r".into(),
            config.fps.to_string(),
            "-i".into(),
            "-".into(),
        ]);

        let mut audio = None;
        if let Some(audio_config) = config.audio {
            match AudioPipe::create() {
                Ok((pipe, path)) => {
                    args.extend([
                        "-f".into(),
                        "f32le".into(),
                        "-ar".into(),
                        audio_config.sample_rate.to_string(),
                        "-ac".into(),
                        audio_config.channels.to_string(),
                        "-i".into(),
                        path_arg(&path)?,
                    ]);
                    audio = Some(pipe);
                }
                Err(e) => log::warn!("[REC] audio live désactivé : {e:#}"),
            }
        }

        if let Some(video) = config.codecs.video {
            args.extend(["-c:v".into(), video_codec_name(video).into()]);
            args.extend(["-deadline", "realtime", "-cpu-used", "8", "-b:v", "4M"].map(String::from));
        }
        if audio.is_some()
            && let Some(codec) = config.codecs.audio
        {
            args.extend(["-c:a".into(), audio_codec_name(codec).into()]);
        }
        args.extend(["-f", "webm", "-"].map(String::from));

        log::debug!("ffmpeg {}", args.join(" "));
        let mut child = Command::new(FFMPEG)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| ExportError::Encoder(format!("lancement de ffmpeg : {e}")))?;

        let (Some(mut stdin), Some(mut stdout)) = (child.stdin.take(), child.stdout.take()) else {
            reap(&mut child);
            return Err(ExportError::Encoder("pipes ffmpeg indisponibles".into()));
        };

        let (frame_tx, frame_rx) = flume::bounded::<Vec<u8>>(LIVE_QUEUE);
        let writer = thread::Builder::new()
            .name("af-rec-video".into())
            .spawn(move || {
                for frame in frame_rx.iter() {
                    if stdin.write_all(&frame).is_err() {
                        break;
                    }
                }
            })
            .context("thread vidéo")?;

        let (chunk_tx, chunk_rx) = flume::unbounded();
        let reader = thread::Builder::new()
            .name("af-rec-out".into())
            .spawn(move || {
                let mut buf = vec![0u8; CHUNK_SIZE];
                loop {
                    match stdout.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if chunk_tx.send(buf[..n].to_vec()).is_err() {
                                break;
                            }
                        }
                    }
                }
            })
            .context("thread de lecture")?;

        Ok(Self {
            child: Some(child),
            frames: Some(frame_tx),
            writer: Some(writer),
            reader: Some(reader),
            audio,
            chunks: chunk_rx,
            dropped: 0,
        })
    }
}

impl StreamRecorder for FfmpegStreamRecorder {
    fn push_video(&mut self, frame: &FrameBuffer, _timestamp_us: i64) -> Result<(), ExportError> {
        let frames = self.frames.as_ref().ok_or_else(encoder_closed)?;
        match frames.try_send(frame.data.clone()) {
            Ok(()) => Ok(()),
            Err(flume::TrySendError::Full(_)) => {
                self.dropped += 1;
                log::debug!("[REC] ffmpeg en retard, frame abandonnée ({})", self.dropped);
                Ok(())
            }
            Err(flume::TrySendError::Disconnected(_)) => Err(encoder_closed()),
        }
    }

    fn push_audio(&mut self, samples: &[f32]) -> Result<(), ExportError> {
        let Some(tx) = self.audio.as_ref().and_then(|a| a.tx.as_ref()) else {
            return Ok(());
        };
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        // Pipe plein : l'échantillon est perdu plutôt que de bloquer le tick.
        let _ = tx.try_send(bytes);
        Ok(())
    }

    fn chunks(&self) -> &flume::Receiver<Vec<u8>> {
        &self.chunks
    }

    fn stop(&mut self) -> Result<(), ExportError> {
        self.frames = None;
        if let Some(writer) = self.writer.take() {
            let _ = writer.join();
        }
        if let Some(audio) = self.audio.as_mut() {
            audio.close();
        }
        let status = match self.child.take() {
            Some(mut child) => child.wait().map_err(|e| ExportError::Encoder(e.to_string()))?,
            None => return Ok(()),
        };
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        if self.dropped > 0 {
            log::warn!("[REC] {} frames abandonnées", self.dropped);
        }
        if status.success() {
            Ok(())
        } else {
            Err(ExportError::Encoder(format!("ffmpeg : code {:?}", status.code())))
        }
    }
}

impl Drop for FfmpegStreamRecorder {
    fn drop(&mut self) {
        self.frames = None;
        if let Some(mut child) = self.child.take() {
            reap(&mut child);
        }
        if let Some(audio) = self.audio.as_mut() {
            audio.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoder_list_skips_legend() {
        let text = "Encoders:\n V..... = Video\n A..... = Audio\n ------\n V....D libx264              libx264 H.264\n V....D libvpx-vp9           libvpx VP9\n A....D libopus              libopus Opus\n";
        let encoders = parse_encoders(text);
        assert_eq!(encoders, vec!["libx264", "libvpx-vp9", "libopus"]);
        let backend = FfmpegStreamBackend { encoders };
        assert!(backend.supports(&CodecChoice::PREFERENCES[0]));
        assert!(!backend.supports(&CodecChoice::PREFERENCES[1]));
        assert!(backend.supports(&CodecChoice::default()));
    }

    #[test]
    fn raw_encoder_flush_drains_in_order() {
        let config = VideoConfig {
            width: 2,
            height: 2,
            fps: 30,
            keyframe_interval: 30,
        };
        let mut encoder = RawVideoEncoder::spawn(&config).unwrap();
        let frame = FrameBuffer::new(2, 2);
        for i in 0..10 {
            encoder.submit(&frame, config.timestamp_us(i), i % 30 == 0).unwrap();
        }
        encoder.flush().unwrap();
        let packets: Vec<EncodedPacket> = encoder.packets().try_iter().collect();
        assert_eq!(packets.len(), 10);
        assert!(packets[0].keyframe && !packets[1].keyframe);
        assert!(packets.windows(2).all(|w| w[0].timestamp_us < w[1].timestamp_us));
        assert_eq!(packets[0].duration_us, 33_333);
    }

    #[test]
    fn raw_encoder_rejects_mismatched_frame() {
        let config = VideoConfig {
            width: 4,
            height: 2,
            fps: 30,
            keyframe_interval: 30,
        };
        let mut encoder = RawVideoEncoder::spawn(&config).unwrap();
        assert!(matches!(
            encoder.submit(&FrameBuffer::new(2, 2), 0, true),
            Err(ExportError::Encoder(_))
        ));
    }

    #[test]
    fn pcm_packets_are_f32_le() {
        let mut encoder = PcmAudioEncoder::new();
        encoder
            .submit(&AudioChunk {
                samples: vec![1.0, -1.0],
                frames: 1,
                channels: 2,
                sample_rate: 4,
                timestamp_us: 2_000_000,
            })
            .unwrap();
        let packet = encoder.packets().try_recv().unwrap();
        assert_eq!(packet.data.len(), 8);
        assert_eq!(&packet.data[..4], &1.0f32.to_le_bytes());
        assert_eq!(packet.duration_us, 250_000);
        assert_eq!(packet.timestamp_us, 2_000_000);
    }

    #[test]
    fn container_checks_tracks_before_spawning() {
        let mut container = FfmpegContainer::new().unwrap();
        let odd = VideoConfig {
            width: 5,
            height: 4,
            fps: 30,
            keyframe_interval: 30,
        };
        assert!(container.add_video_track(&odd).is_err());

        let audio = container
            .add_audio_track(&AudioConfig {
                sample_rate: 48_000,
                channels: 2,
            })
            .unwrap();
        let packet = EncodedPacket {
            data: vec![0; 8],
            timestamp_us: 0,
            duration_us: 0,
            keyframe: true,
        };
        container.write_packet(&audio, packet.clone()).unwrap();
        let stranger = PacketTrack::new(7, TrackKind::Video);
        assert!(container.write_packet(&stranger, packet).is_err());
        assert!(Box::new(container).finalize().is_err());
    }

    fn hq_video() -> VideoConfig {
        VideoConfig {
            width: 640,
            height: 360,
            fps: 30,
            keyframe_interval: 30,
        }
    }

    #[test]
    fn mp4_args_keep_every_video_frame_when_audio_is_shorter() {
        let audio = AudioConfig {
            sample_rate: 48_000,
            channels: 2,
        };
        let args = mp4_args(&hq_video(), Some((&audio, "/tmp/pcm.f32")), "/tmp/out.mp4");
        assert!(!args.iter().any(|a| a == "-shortest"));
        assert!(args.windows(2).any(|w| w[0] == "-map" && w[1] == "1:a"));
        assert!(args.windows(2).any(|w| w[0] == "-c:a" && w[1] == "aac"));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/out.mp4"));
    }

    #[test]
    fn mp4_args_force_keyframes_on_the_configured_interval() {
        let args = mp4_args(&hq_video(), None, "out.mp4");
        assert!(args.windows(2).any(|w| w[0] == "-g" && w[1] == "30"));
        assert!(
            args.windows(2)
                .any(|w| w[0] == "-force_key_frames" && w[1] == "expr:gte(n,n_forced*30)")
        );
        assert!(!args.iter().any(|a| a == "-c:a" || a == "1:a"));
    }

    #[test]
    fn keyframe_cadence_follows_interval() {
        assert!(on_keyframe_cadence(0, 30));
        assert!(!on_keyframe_cadence(29, 30));
        assert!(on_keyframe_cadence(60, 30));
        assert!(on_keyframe_cadence(7, 0));
    }

    #[test]
    fn container_refuses_keyframe_flag_off_cadence() {
        let mut container = FfmpegContainer::new().unwrap();
        let track = container.add_video_track(&hq_video()).unwrap();
        let packet = EncodedPacket {
            data: vec![0; 640 * 360 * 4],
            timestamp_us: 0,
            duration_us: 33_333,
            keyframe: false,
        };
        let err = container.write_packet(&track, packet).unwrap_err();
        assert!(err.to_string().contains("hors cadence"));
        assert!(container.child.is_none());
    }

    #[cfg(target_os = "linux")]
    fn close_within(mut pipe: AudioPipe, limit: std::time::Duration) -> bool {
        let (done_tx, done_rx) = flume::bounded(1);
        thread::spawn(move || {
            pipe.close();
            let _ = done_tx.send(());
        });
        done_rx.recv_timeout(limit).is_ok()
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn audio_pipe_close_returns_when_nobody_reads() {
        let (pipe, _path) = AudioPipe::create().unwrap();
        if let Some(tx) = pipe.tx.as_ref() {
            tx.send(vec![0; 16]).unwrap();
        }
        assert!(close_within(pipe, std::time::Duration::from_secs(5)));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn audio_pipe_delivers_samples_to_a_reader() {
        let (pipe, path) = AudioPipe::create().unwrap();
        let reader = thread::spawn(move || std::fs::read(&path).unwrap());
        if let Some(tx) = pipe.tx.as_ref() {
            tx.send(1.0f32.to_le_bytes().to_vec()).unwrap();
        }
        while !pipe.opened.load(Ordering::Acquire) {
            thread::sleep(std::time::Duration::from_millis(1));
        }
        assert!(close_within(pipe, std::time::Duration::from_secs(5)));
        assert_eq!(reader.join().unwrap(), 1.0f32.to_le_bytes().to_vec());
    }
}
