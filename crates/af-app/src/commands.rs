//! Exports sans interface : une source, un export, un fichier.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use af_audio::{AudioFeed, FileFeed, MicFeed};
use af_core::config::AppConfig;
use af_core::traits::{MediaSource, SourceKind};
use af_export::codec::SymphoniaAudio;
use af_export::ffmpeg::{FfmpegBackend, FfmpegStreamBackend};
use af_export::gif::{GifExporter, GifSink};
use af_export::live::LiveCaptureRecorder;
use af_export::muxed::MuxedExporter;
use af_export::render::FrameRenderer;
use af_export::seek::seek_to;
use af_export::still::{export_filename, export_still, export_text};
use af_export::{ExportJob, ExportTask, Outcome, Step};
use anyhow::{Context, Result};
use chrono::Local;

use crate::cli::{ExportArgs, RecordArgs, SourceArgs};

/// Attente maximale de la première frame décodée.
const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// Ouvre la source et attend qu'une frame soit décodée.
///
/// # Errors
/// Source cannot be opened, or no frame arrives in time.
pub fn open_ready(args: &SourceArgs) -> Result<Box<dyn MediaSource>> {
    let mut source = af_source::open_source(&args.input, args.live)?;
    let deadline = Instant::now() + FIRST_FRAME_TIMEOUT;
    while source.current_frame().is_none() {
        anyhow::ensure!(
            Instant::now() < deadline,
            "Aucune frame décodée depuis {} après {FIRST_FRAME_TIMEOUT:?}",
            args.input.display()
        );
        std::thread::sleep(Duration::from_millis(10));
    }
    Ok(source)
}

/// Chemin de sortie : `-o` sinon nom horodaté dans `output_dir`.
pub fn output_path(explicit: Option<&Path>, config: &AppConfig, ext: &str) -> PathBuf {
    explicit.map_or_else(
        || config.export.output_dir.join(export_filename(ext, Local::now())),
        Path::to_path_buf,
    )
}

/// Écrit `bytes` dans `path`, dossier parent créé si besoin.
///
/// # Errors
/// Directory creation or write failure.
pub fn save_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("Création de {}", dir.display()))?;
    }
    std::fs::write(path, bytes).with_context(|| format!("Écriture de {}", path.display()))
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    save_bytes(path, bytes)?;
    println!("{} ({} octets)", path.display(), bytes.len());
    Ok(())
}

fn seek_if_requested(source: &mut dyn MediaSource, at: Option<f64>, config: &AppConfig) {
    if let Some(ts) = at {
        seek_to(source, ts, Duration::from_millis(config.export.seek_timeout_ms));
    }
}

/// `asciiframe still`
///
/// # Errors
/// Source, render or write failure.
pub fn still(args: &ExportArgs, config: &AppConfig) -> Result<()> {
    let mut source = open_ready(&args.source)?;
    seek_if_requested(source.as_mut(), args.at, config);
    let mut renderer = FrameRenderer::new(&config.appearance);
    let png = export_still(source.as_mut(), &mut renderer, &config.tone)?;
    write_output(&output_path(args.output.as_deref(), config, "png"), &png)
}

/// `asciiframe text` : stdout sans `-o`.
///
/// # Errors
/// Source, render or write failure.
pub fn text(args: &ExportArgs, config: &AppConfig) -> Result<()> {
    let mut source = open_ready(&args.source)?;
    seek_if_requested(source.as_mut(), args.at, config);
    let mut renderer = FrameRenderer::new(&config.appearance);
    let text = export_text(source.as_mut(), &mut renderer, &config.tone)?;
    match args.output.as_deref() {
        Some(path) => write_output(path, text.as_bytes()),
        None => {
            std::io::stdout().lock().write_all(text.as_bytes())?;
            Ok(())
        }
    }
}

/// Fait tourner un job jusqu'à son issue en affichant la progression sur stderr.
fn drive(mut task: Box<dyn ExportTask>, source: &mut dyn MediaSource, stop: Option<&dyn Fn() -> bool>) -> ExportJob {
    let mut shown = None;
    loop {
        if stop.is_some_and(|should_stop| should_stop()) {
            task.request_stop();
        }
        let step = task.step(source);
        let job = task.job();
        let progress = (job.progress(), job.frame());
        if shown != Some(progress) {
            eprint!("\r[{}] {:>3}% {}\x1b[K", job.kind().label(), job.progress(), job.status());
            shown = Some(progress);
        }
        if step == Step::Done {
            eprintln!();
            return task.into_job();
        }
        std::thread::yield_now();
    }
}

/// Écrit le résultat d'un job terminé.
fn conclude(job: ExportJob, output: Option<&Path>, config: &AppConfig) -> Result<()> {
    let kind = job.kind();
    for degradation in job.degradations() {
        eprintln!("  dégradé : {degradation}");
    }
    match job.into_outcome() {
        Some(Outcome::Success(bytes)) => write_output(&output_path(output, config, kind.extension()), &bytes),
        Some(Outcome::Failed(reason)) => anyhow::bail!("Export {} échoué : {reason}", kind.label()),
        Some(Outcome::Cancelled) => anyhow::bail!("Export {} annulé", kind.label()),
        None => anyhow::bail!("Export {} sans issue", kind.label()),
    }
}

/// Drapeau levé par Ctrl-C.
fn interrupt_flag() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&flag);
    ctrlc::set_handler(move || handler_flag.store(true, Ordering::SeqCst)).context("Handler Ctrl-C")?;
    Ok(flag)
}

/// `asciiframe gif`
///
/// # Errors
/// Precondition, export or write failure.
pub fn gif(args: &ExportArgs, config: &AppConfig) -> Result<()> {
    let mut source = open_ready(&args.source)?;
    let exporter = GifExporter::start(
        source.as_mut(),
        &config.appearance,
        &config.tone,
        &config.export,
        Box::new(GifSink::new()),
    )?;
    let interrupted = interrupt_flag()?;
    let stop = || interrupted.load(Ordering::SeqCst);
    let job = drive(Box::new(exporter), source.as_mut(), Some(&stop));
    conclude(job, args.output.as_deref(), config)
}

/// `asciiframe hq`
///
/// # Errors
/// Precondition, export or write failure.
pub fn hq(args: &ExportArgs, config: &AppConfig) -> Result<()> {
    let mut source = open_ready(&args.source)?;
    let mut export = config.export.clone();
    export.capture_audio &= !args.no_audio;
    let exporter = MuxedExporter::start(
        source.as_mut(),
        &config.appearance,
        &config.tone,
        &export,
        Box::new(FfmpegBackend::probe()),
        Box::new(SymphoniaAudio),
    )?;
    let interrupted = interrupt_flag()?;
    let stop = || interrupted.load(Ordering::SeqCst);
    let job = drive(Box::new(exporter), source.as_mut(), Some(&stop));
    conclude(job, args.output.as_deref(), config)
}

/// Origine de l'audio d'une capture live.
#[derive(Clone, Debug, PartialEq)]
pub enum LiveAudio {
    /// Piste de la vidéo, relue en temps réel à partir de `start` secondes.
    File { path: PathBuf, start: f64 },
    /// Micro par défaut.
    Mic,
}

/// Audio qui accompagne la source : sa propre piste pour un fichier, le
/// micro pour un flux live, rien pour une image fixe.
#[must_use]
pub fn live_audio_for(source: &dyn MediaSource) -> Option<LiveAudio> {
    match source.kind() {
        SourceKind::FileVideo => source.audio_path().map(|path| LiveAudio::File {
            path: path.to_path_buf(),
            start: source.position(),
        }),
        SourceKind::LiveStream => Some(LiveAudio::Mic),
        SourceKind::StillImage => None,
    }
}

/// Ouvre le flux audio de la source, si demandé et disponible.
pub fn live_audio(source: &dyn MediaSource, wanted: bool) -> Option<Box<dyn AudioFeed>> {
    if !wanted {
        return None;
    }
    match live_audio_for(source)? {
        LiveAudio::File { path, start } => match FileFeed::open(&path, start) {
            Ok(feed) => Some(Box::new(feed)),
            Err(e) => {
                log::warn!("Audio de {} illisible, capture sans audio : {e}", path.display());
                None
            }
        },
        LiveAudio::Mic => match MicFeed::start_default() {
            Ok(mic) => Some(Box::new(mic)),
            Err(e) => {
                log::warn!("Micro indisponible, capture sans audio : {e}");
                None
            }
        },
    }
}

/// `asciiframe record` : jusqu'à Ctrl-C, `--seconds` ou la fin de la source.
///
/// # Errors
/// Precondition, capture or write failure.
pub fn record(args: &RecordArgs, config: &AppConfig) -> Result<()> {
    let mut source = open_ready(&args.source)?;
    let backend = FfmpegStreamBackend::probe();
    let audio = live_audio(&*source, config.export.capture_audio && !args.no_audio);
    let recorder = LiveCaptureRecorder::start(&*source, &config.appearance, &config.tone, &backend, audio)?;

    let interrupted = interrupt_flag()?;
    let started = Instant::now();
    let limit = args.seconds.map(Duration::from_secs_f64);
    eprintln!("Enregistrement… Ctrl-C pour arrêter.");
    let stop = || {
        interrupted.load(Ordering::SeqCst) || limit.is_some_and(|limit| started.elapsed() >= limit)
    };
    let mut task: Box<dyn ExportTask> = Box::new(recorder);
    // Le recorder cadence lui-même ses captures ; on évite seulement de tourner à vide.
    let job = loop {
        if stop() {
            task.request_stop();
        }
        if task.step(source.as_mut()) == Step::Done {
            break task.into_job();
        }
        std::thread::sleep(Duration::from_millis(2));
    };
    eprintln!("{} frames capturées", job.frame());
    conclude(job, args.output.as_deref(), config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use af_core::frame::FrameBuffer;
    use af_core::traits::PlaybackState;

    struct Clip {
        kind: SourceKind,
        position: f64,
        audio: Option<PathBuf>,
    }

    impl MediaSource for Clip {
        fn kind(&self) -> SourceKind {
            self.kind
        }
        fn native_size(&self) -> (u32, u32) {
            (4, 4)
        }
        fn duration(&self) -> Option<f64> {
            None
        }
        fn position(&self) -> f64 {
            self.position
        }
        fn request_seek(&mut self, _secs: f64) {}
        fn wait_seeked(&mut self, _timeout: Duration) -> bool {
            true
        }
        fn current_frame(&mut self) -> Option<Arc<FrameBuffer>> {
            None
        }
        fn playback(&self) -> PlaybackState {
            PlaybackState::default()
        }
        fn set_playback(&mut self, _state: PlaybackState) {}
        fn audio_path(&self) -> Option<&Path> {
            self.audio.as_deref()
        }
    }

    fn clip(kind: SourceKind, audio: Option<&Path>) -> Clip {
        Clip {
            kind,
            position: 1.5,
            audio: audio.map(Path::to_path_buf),
        }
    }

    /// WAV mono 16 bits, 1 s de silence à `rate` Hz.
    fn silent_wav(path: &Path, rate: u32) {
        let data_len = rate * 2;
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&rate.to_le_bytes());
        bytes.extend_from_slice(&(rate * 2).to_le_bytes());
        bytes.extend_from_slice(&2u16.to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        bytes.resize(bytes.len() + data_len as usize, 0);
        std::fs::write(path, bytes).unwrap();
    }

    #[test]
    fn file_video_records_its_own_track_from_the_current_position() {
        let source = clip(SourceKind::FileVideo, Some(Path::new("/clips/a.mp4")));
        assert_eq!(
            live_audio_for(&source),
            Some(LiveAudio::File {
                path: PathBuf::from("/clips/a.mp4"),
                start: 1.5,
            })
        );
    }

    #[test]
    fn audio_source_follows_kind() {
        assert_eq!(live_audio_for(&clip(SourceKind::LiveStream, None)), Some(LiveAudio::Mic));
        assert_eq!(live_audio_for(&clip(SourceKind::StillImage, None)), None);
        assert_eq!(live_audio_for(&clip(SourceKind::FileVideo, None)), None);
    }

    #[test]
    fn file_video_gets_a_feed_decoded_from_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("track.wav");
        silent_wav(&path, 11_025);
        let source = clip(SourceKind::FileVideo, Some(&path));
        let feed = live_audio(&source, true).unwrap();
        assert_eq!((feed.sample_rate(), feed.channels()), (11_025, 1));
        assert!(live_audio(&source, false).is_none());
    }

    #[test]
    fn unreadable_track_records_without_audio() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.mp4");
        std::fs::write(&path, [0u8; 64]).unwrap();
        assert!(live_audio(&clip(SourceKind::FileVideo, Some(&path)), true).is_none());
    }
}
