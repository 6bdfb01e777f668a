use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use af_ascii::compositor::Compositor;
use af_core::config::AppConfig;
use af_core::frame::GlyphGrid;
use af_core::traits::MediaSource;
use af_export::codec::SymphoniaAudio;
use af_export::ffmpeg::{FfmpegBackend, FfmpegStreamBackend};
use af_export::gif::{GifExporter, GifSink};
use af_export::job::ExportKind;
use af_export::live::LiveCaptureRecorder;
use af_export::muxed::MuxedExporter;
use af_export::render::FrameRenderer;
use af_export::still::{export_still, export_text};
use af_export::{ExportError, ExportJob, ExportTask, JobSlot, Outcome};
use af_render::canvas::preview_geometry;
use af_render::fps::FpsCounter;
use af_render::ui::{self, JobBadge, RenderState, StatusLine};
use af_source::resize::Resizer;
use anyhow::Result;
use arc_swap::ArcSwap;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use ratatui::{DefaultTerminal, Frame};

use crate::commands::{live_audio, output_path, save_bytes};

/// Période du tick de preview (~30 Hz).
const TICK: Duration = Duration::from_millis(33);

/// Preview interactive : une source, une grille, au plus un export actif.
///
/// Tout tourne sur le thread principal ; un export actif avance d'un pas
/// par tick, sur son propre renderer.
pub struct App {
    config: Arc<ArcSwap<AppConfig>>,
    source: Box<dyn MediaSource>,
    source_name: String,
    resizer: Resizer,
    compositor: Compositor,
    grid: GlyphGrid,
    jobs: JobSlot,
    /// Sondages ffmpeg faits au premier export qui en a besoin.
    mux_backend: Option<FfmpegBackend>,
    stream_backend: Option<FfmpegStreamBackend>,
    fps: FpsCounter,
    help: bool,
    quitting: bool,
    message: Option<String>,
}

impl App {
    #[must_use]
    pub fn new(config: Arc<ArcSwap<AppConfig>>, source: Box<dyn MediaSource>, source_name: String) -> Self {
        let compositor = Compositor::new(&config.load().appearance);
        Self {
            config,
            source,
            source_name,
            resizer: Resizer::new(),
            compositor,
            grid: GlyphGrid::new(0, 0),
            jobs: JobSlot::default(),
            mux_backend: None,
            stream_backend: None,
            fps: FpsCounter::default(),
            help: false,
            quitting: false,
            message: None,
        }
    }

    /// Boucle principale : événements, pas d'export, rendu.
    ///
    /// # Errors
    /// Returns an error if terminal operations fail.
    pub fn run(&mut self, mut terminal: DefaultTerminal) -> Result<()> {
        let mut last_tick = Instant::now();
        while !self.quitting {
            let remaining = TICK.saturating_sub(last_tick.elapsed());
            if event::poll(remaining)? {
                self.handle_event(&event::read()?);
                continue;
            }
            last_tick = Instant::now();

            self.step_job();
            terminal.draw(|frame| self.render(frame))?;
            self.fps.tick();
        }
        self.drain_job();
        Ok(())
    }

    fn render_state(&self) -> RenderState {
        if self.help {
            RenderState::Help
        } else if self.source.playback().paused {
            RenderState::Paused
        } else {
            RenderState::Running
        }
    }

    /// Recompose la grille si la zone et la frame sont prêtes, puis dessine.
    fn render(&mut self, frame: &mut Frame) {
        let config = self.config.load();
        self.compositor.update_if_needed(&config.appearance);

        let (canvas, _) = ui::split(frame.area());
        if let Some(decoded) = self.source.current_frame()
            && let Some(geom) = preview_geometry((decoded.width, decoded.height), canvas)
        {
            match self.resizer.downsample(&decoded, geom.cols, geom.rows) {
                Ok(small) => self.grid = self.compositor.compose(small, &config.tone),
                Err(e) => log::debug!("Preview : resize ignoré : {e:#}"),
            }
        }

        let status = self.status_line();
        ui::draw(frame, &self.grid, config.appearance.background, &status, self.render_state());
    }

    fn status_line(&self) -> StatusLine {
        let playback = self.source.playback();
        StatusLine {
            source: self.source_name.clone(),
            position: Some(playback.position),
            duration: self.source.duration(),
            fps: self.fps.fps(),
            job: self.jobs.active().map(|job| JobBadge {
                label: job.kind().label(),
                progress: job.progress(),
                status: job.status().to_string(),
            }),
            message: self.message.clone(),
        }
    }

    fn handle_event(&mut self, event: &Event) {
        if let Event::Key(key) = event
            && key.kind == KeyEventKind::Press
        {
            self.handle_key(key.code);
        }
    }

    fn handle_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Char('q') => self.quitting = true,
            KeyCode::Char('?') => self.help = !self.help,
            KeyCode::Esc if self.help => self.help = false,
            KeyCode::Esc => {
                if self.jobs.is_busy() {
                    self.jobs.request_stop();
                    self.message = Some("Annulation…".into());
                }
            }
            KeyCode::Char(' ') => {
                let mut playback = self.source.playback();
                playback.paused = !playback.paused;
                self.source.set_playback(playback);
            }
            KeyCode::Char('s') => self.export_still(),
            KeyCode::Char('t') => self.export_text(),
            KeyCode::Char('g') => self.start_gif(),
            KeyCode::Char('h') => self.start_hq(),
            KeyCode::Char('r') => self.toggle_capture(),
            _ => {}
        }
    }

    fn save(&mut self, ext: &str, bytes: &[u8]) {
        let path = output_path(None, &self.config.load(), ext);
        self.message = Some(match save_bytes(&path, bytes) {
            Ok(()) => format!("→ {}", display_name(&path)),
            Err(e) => {
                log::error!("{e:#}");
                format!("Écriture échouée : {e}")
            }
        });
    }

    fn export_still(&mut self) {
        let config = self.config.load_full();
        let mut renderer = FrameRenderer::new(&config.appearance);
        match export_still(self.source.as_mut(), &mut renderer, &config.tone) {
            Ok(png) => self.save("png", &png),
            Err(e) => self.message = Some(format!("PNG : {e}")),
        }
    }

    fn export_text(&mut self) {
        let config = self.config.load_full();
        let mut renderer = FrameRenderer::new(&config.appearance);
        match export_text(self.source.as_mut(), &mut renderer, &config.tone) {
            Ok(text) => self.save("txt", text.as_bytes()),
            Err(e) => self.message = Some(format!("Texte : {e}")),
        }
    }

    fn report_start(&mut self, label: &str, result: Result<(), ExportError>) {
        match result {
            Ok(()) => self.message = None,
            Err(e) => {
                log::warn!("[{label}] non démarré : {e}");
                self.message = Some(format!("{label} : {e}"));
            }
        }
    }

    fn start_gif(&mut self) {
        let config = self.config.load_full();
        let source = self.source.as_mut();
        let result = self.jobs.start(|| {
            let exporter = GifExporter::start(
                source,
                &config.appearance,
                &config.tone,
                &config.export,
                Box::new(GifSink::new()),
            )?;
            Ok(Box::new(exporter) as Box<dyn ExportTask>)
        });
        self.report_start("GIF", result);
    }

    fn start_hq(&mut self) {
        let config = self.config.load_full();
        let backend = self.mux_backend.get_or_insert_with(FfmpegBackend::probe).clone();
        let source = self.source.as_mut();
        let result = self.jobs.start(|| {
            let exporter = MuxedExporter::start(
                source,
                &config.appearance,
                &config.tone,
                &config.export,
                Box::new(backend),
                Box::new(SymphoniaAudio),
            )?;
            Ok(Box::new(exporter) as Box<dyn ExportTask>)
        });
        self.report_start("HQ", result);
    }

    /// `r` démarre la capture, ou l'arrête si elle tourne.
    fn toggle_capture(&mut self) {
        if self.jobs.active().is_some_and(|job| job.kind() == ExportKind::LiveCapture) {
            self.jobs.request_stop();
            return;
        }
        let config = self.config.load_full();
        let backend = self.stream_backend.get_or_insert_with(FfmpegStreamBackend::probe);
        let source = &*self.source;
        let result = self.jobs.start(|| {
            let audio = live_audio(source, config.export.capture_audio);
            let recorder = LiveCaptureRecorder::start(source, &config.appearance, &config.tone, &*backend, audio)?;
            Ok(Box::new(recorder) as Box<dyn ExportTask>)
        });
        self.report_start("REC", result);
    }

    fn step_job(&mut self) {
        if let Some(job) = self.jobs.tick(self.source.as_mut()) {
            self.conclude(job);
        }
    }

    /// À la sortie : arrêt demandé, puis pas jusqu'à l'issue (une capture
    /// arrêtée est quand même écrite).
    fn drain_job(&mut self) {
        self.jobs.request_stop();
        while self.jobs.is_busy() {
            self.step_job();
        }
    }

    fn conclude(&mut self, job: ExportJob) {
        let kind = job.kind();
        let degraded = job.degradations().len();
        match job.into_outcome() {
            Some(Outcome::Success(bytes)) => {
                self.save(kind.extension(), &bytes);
                if degraded > 0
                    && let Some(message) = &mut self.message
                {
                    message.push_str(&format!(" ({degraded} dégradations)"));
                }
            }
            Some(Outcome::Failed(reason)) => self.message = Some(format!("{} échoué : {reason}", kind.label())),
            Some(Outcome::Cancelled) | None => self.message = Some(format!("{} annulé", kind.label())),
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}
