//! Pipeline de tonalité par pixel.
//!
//! Ordre fixe, non commutatif : luminosité → contraste autour de 128 →
//! saturation vers la luma → gamma → clamp final. Une étape dont le paramètre
//! vaut exactement 1.0 est sautée ; le résultat est identique à l'appliquer.

use af_core::color::{LUMA_B, LUMA_G, LUMA_R};
use af_core::config::ToneSettings;

/// Applique les réglages de tonalité à un pixel RGB.
///
/// # Example
/// ```
/// use af_ascii::tone::adjust;
/// use af_core::config::ToneSettings;
/// let neutral = ToneSettings::default();
/// assert_eq!(adjust([12, 200, 99], &neutral), [12, 200, 99]);
///
/// let bright = ToneSettings { brightness: 2.0, ..ToneSettings::default() };
/// assert_eq!(adjust([100, 200, 0], &bright), [200, 255, 0]);
/// ```
#[must_use]
#[allow(clippy::float_cmp)]
pub fn adjust(rgb: [u8; 3], tone: &ToneSettings) -> [u8; 3] {
    let mut c = rgb.map(f32::from);

    if tone.brightness != 1.0 {
        for ch in &mut c {
            *ch *= tone.brightness;
        }
    }

    if tone.contrast != 1.0 {
        for ch in &mut c {
            *ch = (*ch - 128.0) * tone.contrast + 128.0;
        }
    }

    if tone.saturation != 1.0 {
        let luma = LUMA_R * c[0] + LUMA_G * c[1] + LUMA_B * c[2];
        for ch in &mut c {
            *ch = luma + (*ch - luma) * tone.saturation;
        }
    }

    if tone.gamma != 1.0 {
        let inv = 1.0 / tone.gamma;
        for ch in &mut c {
            *ch = 255.0 * (ch.clamp(0.0, 255.0) / 255.0).powf(inv);
        }
    }

    c.map(|v| v.clamp(0.0, 255.0).round() as u8)
}
