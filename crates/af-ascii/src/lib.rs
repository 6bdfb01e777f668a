/// Glyph conversion engine for asciiframe.
///
/// Tone adjustment, grid geometry, luminance-to-glyph mapping,
/// grid composition and text serialization.
pub mod compositor;
pub mod grid;
pub mod mapper;
pub mod text;
pub mod tone;
