/// Terminal preview for asciiframe.
///
/// Glyph grid to ratatui buffer, status line, frame-rate meter.
pub mod canvas;
pub mod fps;
pub mod ui;
