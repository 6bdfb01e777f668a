// Audio for asciiframe: full-file decode for the muxed export and live
// feeds (microphone or file played in real time) for the live recorder.

pub mod capture;
pub mod decode;
pub mod error;

pub use capture::{AudioFeed, FileFeed, MicFeed};
pub use decode::{AudioChunk, DecodedAudio, decode_file};
pub use error::AudioError;
