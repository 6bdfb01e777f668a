//! Helpers communs aux sources décodées par subprocess `ffmpeg`/`ffprobe`
//! (doivent être dans le PATH).

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;

use af_core::frame::FrameBuffer;
use anyhow::{Context, Result};

/// Largeur maximale du flux décodé. Au-delà, le pipe RGBA devient le goulot
/// (1920×1080@30fps ≈ 250 MB/s).
pub const MAX_DECODE_WIDTH: u32 = 1280;

/// Métadonnées extraites via ffprobe.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    /// Images par seconde (ex: 23.976, 24.0, 30.0).
    pub fps: f64,
    /// Durée en secondes, absente pour un flux live.
    pub duration: Option<f64>,
}

impl StreamInfo {
    /// Taille du flux décodé : largeur plafonnée, ratio conservé, dimensions paires.
    ///
    /// # Example
    /// ```
    /// use af_source::ffmpeg::StreamInfo;
    /// let info = StreamInfo { width: 1920, height: 1080, fps: 30.0, duration: None };
    /// assert_eq!(info.decode_size(), (1280, 720));
    /// ```
    #[must_use]
    pub fn decode_size(&self) -> (u32, u32) {
        let (w, h) = if self.width > MAX_DECODE_WIDTH {
            let h = u64::from(self.height) * u64::from(MAX_DECODE_WIDTH) / u64::from(self.width);
            (MAX_DECODE_WIDTH, h as u32)
        } else {
            (self.width, self.height)
        };
        ((w & !1).max(2), (h & !1).max(2))
    }
}

/// Interroge `ffprobe` sur le premier flux vidéo de `input`.
///
/// `format` force le démuxeur d'entrée (`v4l2`, `dshow`…) pour un périphérique.
///
/// # Errors
/// Retourne une erreur si `ffprobe` est introuvable ou si l'entrée ne
/// contient aucun flux vidéo décodable.
pub fn probe(input: &str, format: Option<&str>) -> Result<StreamInfo> {
    let mut cmd = Command::new("ffprobe");
    cmd.args(["-v", "quiet"]);
    if let Some(format) = format {
        cmd.args(["-f", format]);
    }
    let output = cmd
        .args([
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height,r_frame_rate:format=duration",
            "-of",
            "default=noprint_wrappers=1",
            "-i",
            input,
        ])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .context(
            "Impossible de lancer ffprobe. Vérifiez que ffprobe est installé et dans le PATH.",
        )?;

    let info = parse_probe_output(&String::from_utf8_lossy(&output.stdout))
        .with_context(|| format!("ffprobe n'a trouvé aucun flux vidéo dans {input}"))?;
    log::info!(
        "probe: {}x{} @ {:.3}fps, durée {:?} ({input})",
        info.width,
        info.height,
        info.fps,
        info.duration
    );
    Ok(info)
}

/// Parse la sortie `key=value` de ffprobe. `None` sans dimensions valides.
///
/// # Example
/// ```
/// use af_source::ffmpeg::parse_probe_output;
/// let info = parse_probe_output("width=640\nheight=360\nr_frame_rate=30000/1001\nduration=12.5\n").unwrap();
/// assert_eq!((info.width, info.height), (640, 360));
/// assert!((info.fps - 29.97).abs() < 0.01);
/// assert_eq!(info.duration, Some(12.5));
/// ```
#[must_use]
pub fn parse_probe_output(text: &str) -> Option<StreamInfo> {
    let mut width = 0u32;
    let mut height = 0u32;
    let mut fps = 30.0f64;
    let mut duration = None;

    for line in text.lines() {
        let Some((key, val)) = line.split_once('=') else {
            continue;
        };
        let val = val.trim();
        match key.trim() {
            "width" => width = val.parse().unwrap_or(0),
            "height" => height = val.parse().unwrap_or(0),
            "r_frame_rate" => {
                // "24/1", "30000/1001", "0/0" pour certains flux live
                let mut parts = val.splitn(2, '/');
                let num: f64 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0.0);
                let den: f64 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(1.0);
                if num > 0.0 && den > 0.0 {
                    fps = num / den;
                }
            }
            "duration" => duration = val.parse::<f64>().ok().filter(|d| *d > 0.0),
            _ => {}
        }
    }

    (width > 0 && height > 0).then_some(StreamInfo {
        width,
        height,
        fps: fps.clamp(1.0, 120.0),
        duration,
    })
}

/// Lance `ffmpeg` avec les arguments d'entrée donnés et récupère des frames
/// RGBA brutes `w × h` sur stdout. `-an` : l'audio passe par un autre chemin.
///
/// Retourne `None` si le spawn échoue (log::warn émis).
#[must_use]
pub fn spawn_rgba_pipe(input_args: &[String], w: u32, h: u32, fps: Option<f64>) -> Option<Child> {
    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-hide_banner", "-loglevel", "error"])
        .args(input_args)
        .args(["-vf", &format!("scale={w}:{h}:flags=bilinear")]);
    if let Some(fps) = fps {
        cmd.args(["-r", &format!("{fps:.6}")]);
    }
    cmd.args(["-f", "rawvideo", "-pix_fmt", "rgba", "-an", "pipe:1"])
        .stdout(Stdio::piped())
        .stdin(Stdio::null())
        .stderr(Stdio::null());

    match cmd.spawn() {
        Ok(child) => {
            log::debug!("ffmpeg spawné: {w}x{h} {input_args:?}");
            Some(child)
        }
        Err(e) => {
            log::warn!("spawn_rgba_pipe: impossible de lancer ffmpeg: {e}");
            None
        }
    }
}

/// Tue et récolte un processus enfant.
pub fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Lit exactement `buf.len()` bytes depuis `reader`.
///
/// # Errors
/// Retourne `Ok(true)` si lu avec succès, `Ok(false)` sur EOF avant complétion,
/// `Err` sur erreur I/O fatale.
pub fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool> {
    let mut total = 0usize;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) => return Ok(false),
            Ok(n) => total += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

/// Pool de frames réutilisables : un slot est libre quand le pool est son
/// seul propriétaire (`strong_count == 1`).
pub struct FramePool {
    slots: Vec<Arc<FrameBuffer>>,
    width: u32,
    height: u32,
}

impl FramePool {
    #[must_use]
    pub fn new(size: usize, width: u32, height: u32) -> Self {
        Self {
            slots: (0..size)
                .map(|_| Arc::new(FrameBuffer::new(width, height)))
                .collect(),
            width,
            height,
        }
    }

    /// Lit une frame de `reader` dans un slot libre.
    ///
    /// Si tous les slots sont pris, alloue un nouveau slot plutôt que bloquer.
    ///
    /// # Errors
    /// `Ok(None)` sur EOF, `Err` sur erreur I/O.
    pub fn read_frame<R: Read>(&mut self, reader: &mut R) -> Result<Option<Arc<FrameBuffer>>> {
        let idx = match self.slots.iter().position(|a| Arc::strong_count(a) == 1) {
            Some(i) => i,
            None => {
                self.slots
                    .push(Arc::new(FrameBuffer::new(self.width, self.height)));
                self.slots.len() - 1
            }
        };
        let Some(fb) = Arc::get_mut(&mut self.slots[idx]) else {
            return Ok(None);
        };
        if read_exact_or_eof(reader, &mut fb.data)? {
            Ok(Some(Arc::clone(&self.slots[idx])))
        } else {
            Ok(None)
        }
    }

    /// Nombre de slots alloués.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
