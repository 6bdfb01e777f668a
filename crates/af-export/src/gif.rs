use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use af_core::config::{AppearanceSettings, ExportSettings, PaletteStrategy, ToneSettings};
use af_core::traits::{MediaSource, PlaybackState, SourceKind};
use gif::{Encoder, Frame, Repeat};

use crate::error::ExportError;
use crate::job::{Degradation, ExportJob, ExportKind, ExportTask, Outcome, Step};
use crate::palette::{IndexMapper, NeuQuantizer, Palette, Quantizer};
use crate::render::FrameRenderer;
use crate::seek::{SeekOutcome, seek_to};

/// Cadence de l'animation.
pub const GIF_FPS: u32 = 10;

/// Plafond de durée : au-delà, les palettes par frame font exploser la mémoire.
pub const GIF_MAX_SECS: f64 = 15.0;

/// Délai inter-frame, `1000 / GIF_FPS` ms.
pub const FRAME_DELAY_MS: u32 = 1000 / GIF_FPS;

/// Nombre de frames émises pour une source de `duration` secondes.
///
/// # Example
/// ```
/// use af_export::gif::total_frames;
/// assert_eq!(total_frames(20.0, 15.0), 150);
/// assert_eq!(total_frames(2.55, 15.0), 25);
/// assert_eq!(total_frames(8.0, 3.0), 30);
/// ```
#[must_use]
pub fn total_frames(duration: f64, max_secs: f64) -> u32 {
    let capped = duration.min(max_secs.min(GIF_MAX_SECS)).max(0.0);
    (capped * f64::from(GIF_FPS)).floor() as u32
}

/// Destination des frames indexées sur palette.
pub trait PaletteFrameSink {
    /// Dimensions fixes de l'animation.
    ///
    /// # Errors
    /// Encoder setup failure.
    fn begin(&mut self, width: u16, height: u16) -> Result<(), ExportError>;

    /// Ajoute une frame : un index par pixel, sa palette locale et son délai.
    ///
    /// # Errors
    /// Encoder failure.
    fn push_frame(&mut self, indices: &[u8], palette: &Palette, delay_ms: u32) -> Result<(), ExportError>;

    /// Termine l'animation et rend le buffer.
    ///
    /// # Errors
    /// Encoder failure.
    fn finish(self: Box<Self>) -> Result<Vec<u8>, ExportError>;
}

/// GIF animé en mémoire : palette locale par frame, boucle infinie.
#[derive(Default)]
pub struct GifSink {
    encoder: Option<Encoder<Vec<u8>>>,
    width: u16,
    height: u16,
}

impl GifSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn encoding_error(e: impl fmt::Display) -> ExportError {
    ExportError::Encoder(format!("gif : {e}"))
}

impl PaletteFrameSink for GifSink {
    fn begin(&mut self, width: u16, height: u16) -> Result<(), ExportError> {
        let mut encoder = Encoder::new(Vec::new(), width, height, &[]).map_err(encoding_error)?;
        encoder.set_repeat(Repeat::Infinite).map_err(encoding_error)?;
        self.encoder = Some(encoder);
        self.width = width;
        self.height = height;
        Ok(())
    }

    fn push_frame(&mut self, indices: &[u8], palette: &Palette, delay_ms: u32) -> Result<(), ExportError> {
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| ExportError::Encoder("gif : begin() non appelé".into()))?;
        let frame = Frame {
            width: self.width,
            height: self.height,
            buffer: Cow::Borrowed(indices),
            palette: Some(palette.flat()),
            delay: (delay_ms / 10) as u16,
            ..Frame::default()
        };
        encoder.write_frame(&frame).map_err(encoding_error)
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>, ExportError> {
        let encoder = self
            .encoder
            .ok_or_else(|| ExportError::Encoder("gif : begin() non appelé".into()))?;
        encoder.into_inner().map_err(encoding_error)
    }
}

/// États de l'export animé.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GifStage {
    Seeking,
    Sampling,
    Quantizing,
    Emitting,
    Finalizing,
    Done,
}

impl fmt::Display for GifStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Seeking => "seek",
            Self::Sampling => "rendu",
            Self::Quantizing => "palette",
            Self::Emitting => "écriture",
            Self::Finalizing => "finalisation",
            Self::Done => "terminé",
        })
    }
}

/// Export animé sur palette : seek → rendu → palette par frame → frame
/// indexée, à 10 fps, durée plafonnée.
///
/// Chaque `step` exécute une transition d'état. Toute issue terminale
/// restaure l'état de lecture de la source.
pub struct GifExporter {
    job: ExportJob,
    stage: GifStage,
    renderer: FrameRenderer,
    tone: ToneSettings,
    strategy: PaletteStrategy,
    quantizer: Box<dyn Quantizer>,
    sink: Option<Box<dyn PaletteFrameSink>>,
    saved: PlaybackState,
    seek_timeout: Duration,
    size: (u32, u32),
    index: u32,
    rgba: Vec<u8>,
    palette: Option<Palette>,
    indices: Vec<u8>,
    stop_requested: bool,
}

impl GifExporter {
    /// Vérifie les préconditions, ouvre le sink puis met la source en pause
    /// et en sourdine.
    ///
    /// # Errors
    /// `PreconditionUnmet` pour une source sans durée, trop courte ou une
    /// grille vide ; erreur du sink à l'ouverture.
    pub fn start(
        source: &mut dyn MediaSource,
        appearance: &AppearanceSettings,
        tone: &ToneSettings,
        settings: &ExportSettings,
        mut sink: Box<dyn PaletteFrameSink>,
    ) -> Result<Self, ExportError> {
        let duration = match source.kind() {
            SourceKind::FileVideo => source
                .duration()
                .ok_or_else(|| ExportError::precondition("durée de la vidéo inconnue"))?,
            SourceKind::StillImage | SourceKind::LiveStream => {
                return Err(ExportError::precondition(
                    "l'export animé exige une vidéo de durée finie",
                ));
            }
        };
        let total = total_frames(duration, settings.gif_max_secs);
        if total == 0 {
            return Err(ExportError::precondition("vidéo trop courte"));
        }

        let renderer = FrameRenderer::new(appearance);
        let (sw, sh) = source.native_size();
        let size = renderer
            .geometry(sw, sh)
            .ok_or_else(|| ExportError::precondition("grille vide"))?
            .render_size();
        let (Ok(w), Ok(h)) = (u16::try_from(size.0), u16::try_from(size.1)) else {
            return Err(ExportError::precondition(format!(
                "{}x{} trop grand pour un GIF",
                size.0, size.1
            )));
        };
        sink.begin(w, h)?;

        let saved = source.playback();
        source.set_playback(PlaybackState {
            paused: true,
            muted: true,
            ..saved
        });
        log::info!("[GIF] {total} frames {w}x{h} @ {GIF_FPS}fps ({duration:.2}s source)");

        Ok(Self {
            job: ExportJob::new(ExportKind::AnimatedPalette, total),
            stage: GifStage::Seeking,
            renderer,
            tone: *tone,
            strategy: settings.palette_strategy,
            quantizer: Box::new(NeuQuantizer::default()),
            sink: Some(sink),
            saved,
            seek_timeout: Duration::from_millis(settings.seek_timeout_ms),
            size,
            index: 0,
            rgba: Vec::new(),
            palette: None,
            indices: Vec::new(),
            stop_requested: false,
        })
    }

    /// Remplace le quantificateur.
    #[must_use]
    pub fn with_quantizer(mut self, quantizer: Box<dyn Quantizer>) -> Self {
        self.quantizer = quantizer;
        self
    }

    #[must_use]
    pub fn stage(&self) -> GifStage {
        self.stage
    }

    fn advance(&mut self, source: &mut dyn MediaSource) -> Result<Step, ExportError> {
        let total = self.job.total();
        match self.stage {
            GifStage::Seeking => {
                let ts = f64::from(self.index) / f64::from(GIF_FPS);
                if seek_to(source, ts, self.seek_timeout) == SeekOutcome::TimedOut {
                    self.job.degrade(Degradation::SeekTimeout { timestamp: ts });
                }
                self.stage = GifStage::Sampling;
            }
            GifStage::Sampling => {
                let frame = source
                    .current_frame()
                    .ok_or_else(|| anyhow::anyhow!("aucune frame décodée à la frame {}", self.index))?;
                let surface = self
                    .renderer
                    .render(&frame, &self.tone, false)?
                    .ok_or_else(|| anyhow::anyhow!("grille vide à la frame {}", self.index))?;
                if (surface.width, surface.height) != self.size {
                    return Err(anyhow::anyhow!(
                        "dimensions changées en cours d'export : {}x{}",
                        surface.width,
                        surface.height
                    )
                    .into());
                }
                self.rgba.clear();
                self.rgba.extend_from_slice(&surface.data);
                self.stage = GifStage::Quantizing;
            }
            GifStage::Quantizing => {
                let reuse = self.strategy == PaletteStrategy::Shared && self.palette.is_some();
                if !reuse {
                    let (palette, degraded) = Palette::from_colors(self.quantizer.quantize(&self.rgba));
                    if degraded {
                        self.job.degrade(Degradation::EmptyPalette { frame: self.index });
                    }
                    self.palette = Some(palette);
                }
                if let Some(palette) = &self.palette {
                    self.indices = IndexMapper::new(palette).map_frame(&self.rgba);
                }
                self.stage = GifStage::Emitting;
            }
            GifStage::Emitting => {
                let (Some(sink), Some(palette)) = (self.sink.as_mut(), self.palette.as_ref()) else {
                    return Err(anyhow::anyhow!("sink ou palette absent").into());
                };
                sink.push_frame(&self.indices, palette, FRAME_DELAY_MS)?;
                self.job.frame_done();
                self.index += 1;
                self.stage = if self.index < total {
                    GifStage::Seeking
                } else {
                    GifStage::Finalizing
                };
            }
            GifStage::Finalizing => {
                let sink = self
                    .sink
                    .take()
                    .ok_or_else(|| anyhow::anyhow!("sink déjà finalisé"))?;
                let bytes = sink.finish()?;
                self.conclude(source, Outcome::Success(bytes));
                return Ok(Step::Done);
            }
            GifStage::Done => return Ok(Step::Done),
        }
        self.job.set_status(format!(
            "{} {}/{}",
            self.stage,
            (self.index + 1).min(total),
            total
        ));
        Ok(Step::Continue)
    }

    /// Nettoyage commun à toutes les issues.
    fn conclude(&mut self, source: &mut dyn MediaSource, outcome: Outcome) {
        source.set_playback(self.saved);
        self.sink = None;
        self.palette = None;
        self.rgba = Vec::new();
        self.indices = Vec::new();
        self.stage = GifStage::Done;
        self.job.finish(outcome);
    }
}

impl ExportTask for GifExporter {
    fn job(&self) -> &ExportJob {
        &self.job
    }

    fn step(&mut self, source: &mut dyn MediaSource) -> Step {
        if self.stage == GifStage::Done {
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
