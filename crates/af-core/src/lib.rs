/// Configuration, types, and shared structures for asciiframe.
///
/// This crate contains all shared types, traits, and configuration logic
/// used across the asciiframe workspace.

pub mod charset;
pub mod color;
pub mod config;
pub mod error;
pub mod frame;
pub mod traits;

pub use charset::{DensitySet, DensitySetId};
pub use color::Rgb;
pub use config::{AppConfig, AppearanceSettings, ColorMode, ToneSettings};
pub use error::CoreError;
pub use frame::{FrameBuffer, GlyphCell, GlyphGrid};
pub use traits::{MediaSource, PlaybackState, SourceKind};
