use std::io::Cursor;

use af_ascii::text::compose_text;
use af_core::config::ToneSettings;
use af_core::frame::FrameBuffer;
use af_core::traits::MediaSource;
use anyhow::Context;
use chrono::{DateTime, Local};
use image::{ImageFormat, RgbaImage};

use crate::error::ExportError;
use crate::render::FrameRenderer;

/// Nom de fichier horodaté d'un export, `asciiframe-YYYYMMDD-HHMMSS.<ext>`.
///
/// # Example
/// ```
/// use af_export::still::export_filename;
/// use chrono::{Local, TimeZone};
/// let t = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
/// assert_eq!(export_filename("png", t), "asciiframe-20240309-140507.png");
/// assert_eq!(export_filename("gif", t), "asciiframe-20240309-140507.gif");
/// ```
#[must_use]
pub fn export_filename(ext: &str, now: DateTime<Local>) -> String {
    format!("asciiframe-{}.{ext}", now.format("%Y%m%d-%H%M%S"))
}

/// Encode une surface RGBA en PNG (sans perte).
///
/// # Errors
/// Returns an error if the buffer does not match its dimensions or the
/// encoder fails.
pub fn encode_png(fb: &FrameBuffer) -> Result<Vec<u8>, ExportError> {
    let img = RgbaImage::from_raw(fb.width, fb.height, fb.data.clone())
        .context("Buffer RGBA incohérent avec ses dimensions")?;
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)
        .context("Encodage PNG échoué")?;
    Ok(out.into_inner())
}

/// Rend la frame courante de `source` et l'encode en PNG.
///
/// # Errors
/// `PreconditionUnmet` sans frame décodée ou si la grille est vide.
pub fn export_still(
    source: &mut dyn MediaSource,
    renderer: &mut FrameRenderer,
    tone: &ToneSettings,
) -> Result<Vec<u8>, ExportError> {
    let frame = source
        .current_frame()
        .ok_or_else(|| ExportError::precondition("aucune frame décodée"))?;
    let surface = renderer
        .render(&frame, tone, false)?
        .ok_or_else(|| ExportError::precondition("grille vide"))?;
    let png = encode_png(surface)?;
    log::info!(
        "Image exportée : {}x{}, {} octets",
        surface.width,
        surface.height,
        png.len()
    );
    Ok(png)
}

/// Sérialise la frame courante de `source` en texte.
///
/// # Errors
/// `PreconditionUnmet` sans frame décodée ou si la grille est vide.
pub fn export_text(
    source: &mut dyn MediaSource,
    renderer: &mut FrameRenderer,
    tone: &ToneSettings,
) -> Result<String, ExportError> {
    let frame = source
        .current_frame()
        .ok_or_else(|| ExportError::precondition("aucune frame décodée"))?;
    let grid = renderer
        .sample(&frame, tone)?
        .ok_or_else(|| ExportError::precondition("grille vide"))?;
    Ok(compose_text(grid))
}
