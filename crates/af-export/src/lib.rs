/// Export pipeline for asciiframe.
///
/// Surface rendering, seek-driven sampling, and the export jobs: still
/// image, text, animated palette image, muxed audio/video, live capture.
pub mod codec;
pub mod error;
pub mod ffmpeg;
pub mod gif;
pub mod job;
pub mod live;
pub mod muxed;
pub mod palette;
pub mod rasterizer;
pub mod render;
pub mod seek;
pub mod still;

#[cfg(test)]
pub(crate) mod testing;

pub use error::ExportError;
pub use job::{ExportJob, ExportKind, ExportTask, JobSlot, Outcome, Step, run_to_end};
