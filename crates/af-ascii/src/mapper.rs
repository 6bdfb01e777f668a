use af_core::charset::DensitySet;
use af_core::color::{Rgb, luminance};
use af_core::config::{AppearanceSettings, ColorMode, DEFAULT_TINT, ToneSettings};
use af_core::frame::GlyphCell;

use crate::tone;

/// Mappe un pixel échantillonné vers (glyphe, couleur).
///
/// Sans état mutable : même pixel + mêmes réglages = même cellule, bit à bit.
///
/// # Example
/// ```
/// use af_ascii::mapper::GlyphMapper;
/// use af_core::config::{AppearanceSettings, ToneSettings};
///
/// let mapper = GlyphMapper::new(&AppearanceSettings::default());
/// let tone = ToneSettings::default();
/// assert_eq!(mapper.map([0, 0, 0], &tone).ch, ' ');
/// assert_eq!(mapper.map([255, 255, 255], &tone).ch, '@');
/// ```
#[derive(Clone, Debug)]
pub struct GlyphMapper {
    density: DensitySet,
    color_mode: ColorMode,
    custom_color: Option<Rgb>,
    invert: bool,
}

impl GlyphMapper {
    /// Résout le jeu de densité (repli sur le jeu par défaut si inconnu).
    #[must_use]
    pub fn new(appearance: &AppearanceSettings) -> Self {
        Self {
            density: appearance.density.resolve(),
            color_mode: appearance.color_mode,
            custom_color: appearance.custom_color,
            invert: appearance.invert,
        }
    }

    /// Jeu de densité résolu.
    #[must_use]
    pub fn density(&self) -> &DensitySet {
        &self.density
    }

    /// Index dans la table pour une luminance [0, 255], inversion comprise.
    ///
    /// # Example
    /// ```
    /// use af_ascii::mapper::GlyphMapper;
    /// use af_core::config::AppearanceSettings;
    /// let mapper = GlyphMapper::new(&AppearanceSettings::default());
    /// assert_eq!(mapper.index_for(0.0), 0);
    /// assert_eq!(mapper.index_for(255.0), 9);
    /// ```
    #[inline(always)]
    #[must_use]
    pub fn index_for(&self, lum: f32) -> usize {
        let len = self.density.len();
        let scaled = (lum / 255.0) * len as f32;
        let index = (scaled.max(0.0).floor() as usize).min(len - 1);
        if self.invert { len - 1 - index } else { index }
    }

    /// Pipeline complet : tonalité → luminance → index → glyphe + couleur.
    #[inline]
    #[must_use]
    pub fn map(&self, rgb: [u8; 3], tone: &ToneSettings) -> GlyphCell {
        let [r, g, b] = tone::adjust(rgb, tone);
        let lum = luminance(r, g, b);
        GlyphCell {
            ch: self.density.glyph(self.index_for(lum)),
            fg: self.color_for(Rgb(r, g, b), lum),
        }
    }

    fn color_for(&self, adjusted: Rgb, lum: f32) -> Rgb {
        match self.color_mode {
            ColorMode::Source => adjusted,
            ColorMode::White => Rgb::WHITE,
            ColorMode::Custom => self.custom_color.unwrap_or(Rgb::WHITE),
            ColorMode::Tinted => {
                let tint = self.custom_color.unwrap_or(DEFAULT_TINT);
                let k = (lum / 255.0).clamp(0.0, 1.0);
                let scale = |c: u8| (f32::from(c) * k).round() as u8;
                Rgb(scale(tint.0), scale(tint.1), scale(tint.2))
            }
        }
    }
}
