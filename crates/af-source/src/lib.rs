/// Visual sources for asciiframe: still image, file video, live stream,
/// plus the filtered resize primitive.
pub mod ffmpeg;
pub mod image;
pub mod live;
pub mod resize;
pub mod video;

use std::path::Path;

use af_core::traits::{MediaSource, SourceKind};
use anyhow::Result;

/// Extensions décodées par le crate `image` plutôt que par ffmpeg.
const STILL_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

/// Variante de source déduite de l'entrée.
///
/// # Example
/// ```
/// use af_core::traits::SourceKind;
/// use af_source::detect_kind;
/// use std::path::Path;
/// assert_eq!(detect_kind(Path::new("a.PNG"), false), SourceKind::StillImage);
/// assert_eq!(detect_kind(Path::new("a.mp4"), false), SourceKind::FileVideo);
/// assert_eq!(detect_kind(Path::new("/dev/video0"), true), SourceKind::LiveStream);
/// ```
#[must_use]
pub fn detect_kind(path: &Path, live: bool) -> SourceKind {
    if live {
        return SourceKind::LiveStream;
    }
    let is_still = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| STILL_EXTENSIONS.iter().any(|s| e.eq_ignore_ascii_case(s)));
    if is_still {
        SourceKind::StillImage
    } else {
        SourceKind::FileVideo
    }
}

/// Ouvre la source adaptée à `path`. `live` traite l'entrée comme un
/// périphérique ou une URL de flux.
///
/// # Errors
/// Propage l'erreur d'ouverture de la source choisie.
pub fn open_source(path: &Path, live: bool) -> Result<Box<dyn MediaSource>> {
    let source: Box<dyn MediaSource> = match detect_kind(path, live) {
        SourceKind::StillImage => Box::new(crate::image::ImageSource::open(path)?),
        SourceKind::FileVideo => Box::new(video::VideoSource::open(path)?),
        SourceKind::LiveStream => {
            Box::new(live::LiveSource::open(&path.to_string_lossy())?)
        }
    };
    Ok(source)
}
