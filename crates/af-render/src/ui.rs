use af_core::color::Rgb;
use af_core::frame::GlyphGrid;
use ratatui::Frame;
use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::{Color, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph};

use crate::canvas;

/// État de la preview, pour les décisions de rendu.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderState {
    Running,
    Paused,
    /// Aide affichée par-dessus la preview.
    Help,
}

/// Job d'export actif, vu par la barre d'état.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobBadge {
    /// `GIF`, `HQ`, `REC`.
    pub label: &'static str,
    pub progress: u8,
    pub status: String,
}

/// Contenu de la barre d'état.
#[derive(Clone, Debug, Default)]
pub struct StatusLine {
    pub source: String,
    pub position: Option<f64>,
    pub duration: Option<f64>,
    pub fps: f64,
    pub job: Option<JobBadge>,
    /// Dernier message (export terminé, erreur…).
    pub message: Option<String>,
}

fn clock(secs: f64) -> String {
    let total = secs.max(0.0) as u64;
    format!("{:02}:{:02}", total / 60, total % 60)
}

/// Texte de la barre d'état.
///
/// # Example
/// ```
/// use af_render::ui::{JobBadge, RenderState, StatusLine, status_text};
/// let status = StatusLine {
///     source: "clip.mp4".into(),
///     position: Some(65.0),
///     duration: Some(120.0),
///     job: Some(JobBadge { label: "GIF", progress: 42, status: "rendu 42/100".into() }),
///     ..StatusLine::default()
/// };
/// let text = status_text(&status, RenderState::Running);
/// assert!(text.contains("01:05/02:00"));
/// assert!(text.contains("GIF 42%"));
/// ```
#[must_use]
pub fn status_text(status: &StatusLine, state: RenderState) -> String {
    let mut parts = vec![
        String::from(match state {
            RenderState::Running | RenderState::Help => "▶",
            RenderState::Paused => "⏸",
        }),
        status.source.clone(),
    ];
    match (status.position, status.duration) {
        (Some(pos), Some(dur)) => parts.push(format!("{}/{}", clock(pos), clock(dur))),
        (Some(pos), None) => parts.push(clock(pos)),
        _ => {}
    }
    parts.push(format!("{:.0} fps", status.fps));
    if let Some(job) = &status.job {
        parts.push(format!("[{} {}% {}]", job.label, job.progress, job.status));
    }
    if let Some(message) = &status.message {
        parts.push(message.clone());
    }
    parts.join("  ")
}

/// Découpe l'écran : canvas au-dessus, une ligne d'état en bas.
#[must_use]
pub fn split(area: Rect) -> (Rect, Rect) {
    let chunks = Layout::vertical([Constraint::Min(1), Constraint::Length(1)]).split(area);
    (chunks[0], chunks[1])
}

/// Dessine la preview complète : canvas, barre d'état, aide éventuelle.
pub fn draw(frame: &mut Frame, grid: &GlyphGrid, background: Rgb, status: &StatusLine, state: RenderState) {
    let (canvas_area, status_area) = split(frame.area());
    canvas::render_grid(frame.buffer_mut(), canvas_area, grid, background);

    let color = if status.job.is_some() {
        Color::Yellow
    } else {
        Color::DarkGray
    };
    frame.render_widget(
        Paragraph::new(Line::from(Span::styled(status_text(status, state), Style::default().fg(color)))),
        status_area,
    );

    if state == RenderState::Help {
        draw_help_overlay(frame, canvas_area);
    }
}

fn draw_help_overlay(frame: &mut Frame, area: Rect) {
    let help_text = vec![
        Line::from(Span::styled(" asciiframe ", Style::default().fg(Color::Yellow))),
        Line::from(""),
        Line::from(" s        Export PNG"),
        Line::from(" t        Export texte"),
        Line::from(" g        Export GIF"),
        Line::from(" h        Export HQ (MP4)"),
        Line::from(" r        Capture live on/off"),
        Line::from(" Esc      Annuler l'export"),
        Line::from(" Space    Play/Pause"),
        Line::from(" ?        Aide"),
        Line::from(" q        Quitter"),
    ];

    let help_width = 32u16.min(area.width);
    let help_height = (help_text.len() as u16 + 2).min(area.height);
    let x = area.x + area.width.saturating_sub(help_width) / 2;
    let y = area.y + area.height.saturating_sub(help_height) / 2;
    let help_area = Rect::new(x, y, help_width, help_height);

    frame.render_widget(Clear, help_area);
    frame.render_widget(
        Paragraph::new(help_text).block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Aide ")
                .style(Style::default().bg(Color::Black).fg(Color::White)),
        ),
        help_area,
    );
}
