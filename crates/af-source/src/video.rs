// Décodage vidéo via ffmpeg subprocess (std::process::Command).
//
// Architecture :
//   - `VideoSource`  : façade `MediaSource`, non bloquante côté appelant
//   - `video_loop`   : thread dédié, possède le pipe ffmpeg et dispatche les commandes
//   - `Decoder`      : pipe ffmpeg courant + horodatage de la prochaine frame
//   - frame courante publiée dans un slot `ArcSwapOption`, fin de seek notifiée
//     sur un canal flume

use std::path::{Path, PathBuf};
use std::process::Child;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use af_core::frame::FrameBuffer;
use af_core::traits::{MediaSource, PlaybackState, SourceKind};
use anyhow::{Context, Result};
use arc_swap::ArcSwapOption;
use flume::{Receiver, RecvTimeoutError, Sender};

use crate::ffmpeg::{self, FramePool, StreamInfo};

/// Taille du pool de frames pré-allouées.
const POOL_SIZE: usize = 4;

/// Un seek vers l'avant de moins d'une seconde lit les frames intermédiaires
/// sur le pipe ouvert au lieu de relancer ffmpeg.
const READ_AHEAD_SECS: f64 = 1.0;

/// Tolérance sur les horodatages (secondes).
const TIME_EPSILON: f64 = 0.001;

/// Commandes pour le thread vidéo.
///
/// # Example
/// ```
/// use af_source::video::VideoCommand;
/// let cmd = VideoCommand::Seek(5.0);
/// assert!(matches!(cmd, VideoCommand::Seek(_)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VideoCommand {
    /// Reprendre la lecture.
    Play,
    /// Mettre en pause.
    Pause,
    /// Positionner la lecture sur un horodatage absolu (secondes).
    Seek(f64),
    /// Arrêter le thread proprement.
    Quit,
}

/// État partagé entre le thread vidéo et la façade.
struct Shared {
    latest: ArcSwapOption<FrameBuffer>,
    position_bits: AtomicU64,
    ended: AtomicBool,
}

impl Shared {
    fn publish(&self, frame: Arc<FrameBuffer>, position: f64) {
        self.latest.store(Some(frame));
        self.position_bits.store(position.to_bits(), Ordering::Release);
    }

    fn position(&self) -> f64 {
        f64::from_bits(self.position_bits.load(Ordering::Acquire))
    }
}

/// Source vidéo fichier : durée finie, seekable.
///
/// # Example
/// ```no_run
/// use af_core::traits::MediaSource;
/// use af_source::video::VideoSource;
/// use std::path::Path;
/// use std::time::Duration;
///
/// let mut video = VideoSource::open(Path::new("clip.mp4")).unwrap();
/// video.request_seek(2.0);
/// if video.wait_seeked(Duration::from_millis(500)) {
///     let frame = video.current_frame();
/// }
/// ```
pub struct VideoSource {
    path: PathBuf,
    info: StreamInfo,
    size: (u32, u32),
    shared: Arc<Shared>,
    cmd_tx: Sender<VideoCommand>,
    seeked_rx: Receiver<f64>,
    handle: Option<thread::JoinHandle<()>>,
    /// Cible du dernier seek demandé, tant que sa notification n'est pas reçue.
    pending_seek: Option<f64>,
    paused: bool,
    muted: bool,
}

impl VideoSource {
    /// Sonde le fichier puis démarre le thread de décodage, en lecture.
    ///
    /// # Errors
    /// Retourne une erreur si `ffprobe` est introuvable, si le fichier n'a pas
    /// de flux vidéo ou si le thread ne peut pas être créé.
    pub fn open(path: &Path) -> Result<Self> {
        let path_str = path.to_str().context("Chemin vidéo invalide (non-UTF8)")?;
        let info = ffmpeg::probe(path_str, None)?;
        let size = info.decode_size();

        let shared = Arc::new(Shared {
            latest: ArcSwapOption::empty(),
            position_bits: AtomicU64::new(0f64.to_bits()),
            ended: AtomicBool::new(false),
        });
        let (cmd_tx, cmd_rx) = flume::unbounded();
        let (seeked_tx, seeked_rx) = flume::unbounded();

        let decoder = Decoder::new(path.to_path_buf(), size, info.fps);
        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("af-video".to_string())
            .spawn(move || video_loop(decoder, &worker_shared, &cmd_rx, &seeked_tx))
            .context("Impossible de spawner le thread vidéo")?;

        Ok(Self {
            path: path.to_path_buf(),
            info,
            size,
            shared,
            cmd_tx,
            seeked_rx,
            handle: Some(handle),
            pending_seek: None,
            paused: false,
            muted: false,
        })
    }

    /// Métadonnées sondées.
    #[must_use]
    pub fn info(&self) -> StreamInfo {
        self.info
    }

    fn send(&self, cmd: VideoCommand) {
        if self.cmd_tx.send(cmd).is_err() {
            log::warn!("Thread vidéo arrêté, commande {cmd:?} ignorée");
        }
    }
}

impl MediaSource for VideoSource {
    fn kind(&self) -> SourceKind {
        SourceKind::FileVideo
    }

    fn native_size(&self) -> (u32, u32) {
        self.size
    }

    fn duration(&self) -> Option<f64> {
        self.info.duration
    }

    fn position(&self) -> f64 {
        self.shared.position()
    }

    fn request_seek(&mut self, secs: f64) {
        let target = match self.info.duration {
            Some(d) => secs.clamp(0.0, d),
            None => secs.max(0.0),
        };
        // une notification restante appartient à un seek précédent
        for _ in self.seeked_rx.try_iter() {}
        self.pending_seek = Some(target);
        self.send(VideoCommand::Seek(target));
    }

    /// Seule la notification de la cible en attente compte : celle d'un seek
    /// précédent, arrivée en retard, est ignorée.
    fn wait_seeked(&mut self, timeout: Duration) -> bool {
        let Some(target) = self.pending_seek else {
            return true;
        };
        let deadline = Instant::now() + timeout;
        loop {
            match self.seeked_rx.recv_deadline(deadline) {
                Ok(done) if (done - target).abs() <= TIME_EPSILON => {
                    self.pending_seek = None;
                    return true;
                }
                Ok(stale) => log::debug!("Notification de seek {stale:.3}s ignorée (attendu {target:.3}s)"),
                Err(_) => return false,
            }
        }
    }

    fn current_frame(&mut self) -> Option<Arc<FrameBuffer>> {
        self.shared.latest.load_full()
    }

    fn playback(&self) -> PlaybackState {
        PlaybackState {
            position: self.position(),
            paused: self.paused,
            muted: self.muted,
        }
    }

    fn set_playback(&mut self, state: PlaybackState) {
        if (state.position - self.position()).abs() > TIME_EPSILON {
            self.request_seek(state.position);
        }
        if state.paused != self.paused {
            self.send(if state.paused {
                VideoCommand::Pause
            } else {
                VideoCommand::Play
            });
            self.paused = state.paused;
        }
        self.muted = state.muted;
    }

    fn has_ended(&self) -> bool {
        self.shared.ended.load(Ordering::Acquire)
    }

    fn audio_path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

impl Drop for VideoSource {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(VideoCommand::Quit);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Pipe ffmpeg courant et horodatage de la prochaine frame à lire.
struct Decoder {
    path: PathBuf,
    width: u32,
    height: u32,
    fps: f64,
    child: Option<Child>,
    pool: FramePool,
    next_ts: f64,
}

impl Decoder {
    fn new(path: PathBuf, (width, height): (u32, u32), fps: f64) -> Self {
        Self {
            path,
            width,
            height,
            fps,
            child: None,
            pool: FramePool::new(POOL_SIZE, width, height),
            next_ts: 0.0,
        }
    }

    fn frame_period(&self) -> f64 {
        1.0 / self.fps
    }

    /// Relance ffmpeg à `secs` (`-ss` avant `-i` : seek rapide sur keyframe).
    fn restart_at(&mut self, secs: f64) -> bool {
        self.stop();
        let args = vec![
            "-ss".to_string(),
            format!("{secs:.3}"),
            "-i".to_string(),
            self.path.to_string_lossy().into_owned(),
        ];
        self.child = ffmpeg::spawn_rgba_pipe(&args, self.width, self.height, Some(self.fps));
        self.next_ts = secs;
        self.child.is_some()
    }

    /// Lit la frame suivante et son horodatage. `Ok(None)` sur EOF.
    fn read(&mut self) -> Result<Option<(Arc<FrameBuffer>, f64)>> {
        let Some(stdout) = self.child.as_mut().and_then(|c| c.stdout.as_mut()) else {
            return Ok(None);
        };
        let Some(frame) = self.pool.read_frame(stdout)? else {
            return Ok(None);
        };
        let ts = self.next_ts;
        self.next_ts += self.frame_period();
        Ok(Some((frame, ts)))
    }

    fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            ffmpeg::reap(&mut child);
        }
    }
}

/// Positionne le décodeur sur `target` et publie la frame correspondante.
///
/// Retourne `false` si ffmpeg n'a pas pu être relancé : aucune notification
/// n'est alors émise.
fn seek_to(decoder: &mut Decoder, shared: &Shared, target: f64) -> bool {
    let ahead = target - decoder.next_ts;
    let open = decoder.child.is_some();
    // la frame affichée couvre déjà `target`
    let already_shown = open && ahead < -TIME_EPSILON && target >= shared.position() - TIME_EPSILON;

    if already_shown {
        log::debug!("Thread vidéo: {target:.3}s déjà affiché");
    } else if open && (-TIME_EPSILON..=READ_AHEAD_SECS).contains(&ahead) {
        // lecture anticipée jusqu'à la dernière frame ≤ target
        while decoder.next_ts <= target + TIME_EPSILON {
            match decoder.read() {
                Ok(Some((frame, ts))) => shared.publish(frame, ts),
                Ok(None) => break,
                Err(e) => {
                    log::warn!("Thread vidéo: erreur lecture pendant seek: {e}");
                    break;
                }
            }
        }
    } else {
        if !decoder.restart_at(target) {
            return false;
        }
        match decoder.read() {
            Ok(Some((frame, ts))) => shared.publish(frame, ts),
            Ok(None) => log::debug!("Thread vidéo: aucune frame à {target:.3}s"),
            Err(e) => log::warn!("Thread vidéo: erreur lecture après seek: {e}"),
        }
    }

    shared.position_bits.store(target.to_bits(), Ordering::Release);
    shared.ended.store(false, Ordering::Release);
    true
}

/// Boucle principale du thread vidéo.
fn video_loop(
    mut decoder: Decoder,
    shared: &Shared,
    cmd_rx: &Receiver<VideoCommand>,
    seeked_tx: &Sender<f64>,
) {
    let period = Duration::from_secs_f64(decoder.frame_period());
    let mut paused = false;
    let mut last_frame = Instant::now();

    if seek_to(&mut decoder, shared, 0.0) {
        log::debug!("Thread vidéo: première frame publiée");
    }

    loop {
        let idle = paused || shared.ended.load(Ordering::Acquire);
        let cmd = if idle {
            match cmd_rx.recv_timeout(Duration::from_millis(20)) {
                Ok(cmd) => Some(cmd),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        } else {
            match cmd_rx.try_recv() {
                Ok(cmd) => Some(cmd),
                Err(flume::TryRecvError::Empty) => None,
                Err(flume::TryRecvError::Disconnected) => break,
            }
        };

        match cmd {
            Some(VideoCommand::Quit) => {
                log::info!("Thread vidéo: Quit reçu, arrêt propre.");
                break;
            }
            Some(VideoCommand::Pause) => paused = true,
            Some(VideoCommand::Play) => {
                paused = false;
                last_frame = Instant::now();
            }
            Some(VideoCommand::Seek(target)) => {
                if seek_to(&mut decoder, shared, target) {
                    let _ = seeked_tx.send(target);
                }
                last_frame = Instant::now();
            }
            None => {}
        }
        if idle || cmd.is_some() {
            continue;
        }

        if let Some(remaining) = period.checked_sub(last_frame.elapsed()) {
            thread::sleep(remaining.min(Duration::from_millis(5)));
            continue;
        }
        last_frame = Instant::now();

        match decoder.read() {
            Ok(Some((frame, ts))) => shared.publish(frame, ts),
            Ok(None) => {
                log::info!("Thread vidéo: EOF à {:.1}s", shared.position());
                shared.ended.store(true, Ordering::Release);
            }
            Err(e) => {
                log::warn!("Thread vidéo: erreur lecture pipe: {e}");
                shared.ended.store(true, Ordering::Release);
            }
        }
    }

    decoder.stop();
    log::info!("Thread vidéo terminé proprement.");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared() -> Shared {
        Shared {
            latest: ArcSwapOption::empty(),
            position_bits: AtomicU64::new(0f64.to_bits()),
            ended: AtomicBool::new(false),
        }
    }

    #[test]
    fn publish_updates_frame_and_position() {
        let s = shared();
        assert!(s.latest.load_full().is_none());
        s.publish(Arc::new(FrameBuffer::new(2, 2)), 1.25);
        assert_eq!(s.position(), 1.25);
        assert_eq!(s.latest.load_full().unwrap().width, 2);
    }

    /// Source sans thread : le test joue le rôle du worker.
    fn detached() -> (VideoSource, Receiver<VideoCommand>, Sender<f64>) {
        let (cmd_tx, cmd_rx) = flume::unbounded();
        let (seeked_tx, seeked_rx) = flume::unbounded();
        let source = VideoSource {
            path: PathBuf::from("clip.mp4"),
            info: StreamInfo { width: 4, height: 2, fps: 25.0, duration: Some(10.0) },
            size: (4, 2),
            shared: Arc::new(shared()),
            cmd_tx,
            seeked_rx,
            handle: None,
            pending_seek: None,
            paused: false,
            muted: false,
        };
        (source, cmd_rx, seeked_tx)
    }

    #[test]
    fn late_notice_of_a_timed_out_seek_does_not_complete_the_next_one() {
        let (mut source, cmd_rx, seeked_tx) = detached();
        source.request_seek(1.0);
        assert!(!source.wait_seeked(Duration::from_millis(5)));

        source.request_seek(2.0);
        seeked_tx.send(1.0).unwrap();
        assert!(!source.wait_seeked(Duration::from_millis(20)));

        seeked_tx.send(2.0).unwrap();
        assert!(source.wait_seeked(Duration::from_millis(20)));
        let sent: Vec<_> = cmd_rx.try_iter().collect();
        assert_eq!(sent, vec![VideoCommand::Seek(1.0), VideoCommand::Seek(2.0)]);
    }

    #[test]
    fn seek_target_is_clamped_to_duration() {
        let (mut source, cmd_rx, seeked_tx) = detached();
        source.request_seek(42.0);
        seeked_tx.send(10.0).unwrap();
        assert!(source.wait_seeked(Duration::from_millis(20)));
        assert_eq!(cmd_rx.try_recv().unwrap(), VideoCommand::Seek(10.0));
    }

    #[test]
    fn decoder_without_pipe_reads_nothing() {
        let mut decoder = Decoder::new(PathBuf::from("none.mp4"), (4, 2), 25.0);
        assert!(decoder.read().unwrap().is_none());
        assert!((decoder.frame_period() - 0.04).abs() < 1e-12);
    }
}
