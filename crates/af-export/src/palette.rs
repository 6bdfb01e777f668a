use std::collections::HashMap;

use color_quant::NeuQuant;

/// Nombre maximal d'entrées d'une palette.
pub const MAX_COLORS: usize = 256;

/// Palette repli quand la quantification ne produit rien.
pub const FALLBACK_PALETTE: [[u8; 3]; 1] = [[0, 0, 0]];

/// Calcule une palette adaptative (≤ 256 couleurs) depuis des pixels RGBA.
pub trait Quantizer {
    fn quantize(&self, rgba: &[u8]) -> Vec<[u8; 3]>;
}

/// Quantification NeuQuant (réseau de Kohonen), celle de l'encodeur GIF du
/// crate `image`.
#[derive(Clone, Copy, Debug)]
pub struct NeuQuantizer {
    /// 1 = qualité maximale, 30 = plus rapide.
    pub sample_factor: i32,
}

impl Default for NeuQuantizer {
    fn default() -> Self {
        Self { sample_factor: 10 }
    }
}

impl Quantizer for NeuQuantizer {
    fn quantize(&self, rgba: &[u8]) -> Vec<[u8; 3]> {
        if rgba.len() < 4 {
            return Vec::new();
        }
        let nq = NeuQuant::new(self.sample_factor, MAX_COLORS, rgba);
        nq.color_map_rgb()
            .chunks_exact(3)
            .map(|c| [c[0], c[1], c[2]])
            .collect()
    }
}

/// Palette prête à l'emploi, jamais vide.
///
/// # Example
/// ```
/// use af_export::palette::Palette;
/// let (palette, degraded) = Palette::from_colors(Vec::new());
/// assert!(degraded);
/// assert_eq!(palette.colors(), &[[0, 0, 0]]);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Palette {
    colors: Vec<[u8; 3]>,
}

impl Palette {
    /// Tronque à 256 entrées ; une liste vide devient la palette noire à une
    /// entrée et `degraded` vaut `true`.
    #[must_use]
    pub fn from_colors(mut colors: Vec<[u8; 3]>) -> (Self, bool) {
        if colors.is_empty() {
            return (
                Self {
                    colors: FALLBACK_PALETTE.to_vec(),
                },
                true,
            );
        }
        colors.truncate(MAX_COLORS);
        (Self { colors }, false)
    }

    #[must_use]
    pub fn colors(&self) -> &[[u8; 3]] {
        &self.colors
    }

    /// Table RGB à plat pour l'encodeur.
    #[must_use]
    pub fn flat(&self) -> Vec<u8> {
        self.colors.iter().flatten().copied().collect()
    }

    /// Index de la couleur la plus proche (distance euclidienne au carré).
    #[must_use]
    pub fn nearest(&self, rgb: [u8; 3]) -> u8 {
        let dist = |c: &[u8; 3]| {
            c.iter()
                .zip(rgb)
                .map(|(&a, b)| {
                    let d = i32::from(a) - i32::from(b);
                    d * d
                })
                .sum::<i32>()
        };
        self.colors
            .iter()
            .enumerate()
            .min_by_key(|(_, c)| dist(c))
            .map_or(0, |(i, _)| i as u8)
    }
}

/// Associe chaque pixel à l'index de palette le plus proche, avec cache par
/// couleur (les surfaces de glyphes ont peu de couleurs distinctes).
pub struct IndexMapper<'a> {
    palette: &'a Palette,
    cache: HashMap<[u8; 3], u8>,
}

impl<'a> IndexMapper<'a> {
    #[must_use]
    pub fn new(palette: &'a Palette) -> Self {
        Self {
            palette,
            cache: HashMap::new(),
        }
    }

    /// Un index par pixel RGBA (alpha ignoré).
    pub fn map_frame(&mut self, rgba: &[u8]) -> Vec<u8> {
        let palette = self.palette;
        let cache = &mut self.cache;
        rgba.chunks_exact(4)
            .map(|px| {
                let rgb = [px[0], px[1], px[2]];
                *cache.entry(rgb).or_insert_with(|| palette.nearest(rgb))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EmptyQuantizer;
    impl Quantizer for EmptyQuantizer {
        fn quantize(&self, _rgba: &[u8]) -> Vec<[u8; 3]> {
            Vec::new()
        }
    }

    #[test]
    fn neuquant_palette_is_bounded_and_covers_input() {
        let rgba: Vec<u8> = [120u8, 60, 30, 255].repeat(32 * 32);
        let colors = NeuQuantizer::default().quantize(&rgba);
        assert!(!colors.is_empty());
        assert!(colors.len() <= MAX_COLORS);
        let (palette, degraded) = Palette::from_colors(colors);
        assert!(!degraded);
        let close = palette.colors()[palette.nearest([120, 60, 30]) as usize];
        for (got, want) in close.iter().zip([120u8, 60, 30]) {
            assert!(got.abs_diff(want) <= 8, "{close:?}");
        }
    }

    #[test]
    fn empty_input_degrades_to_black() {
        let (palette, degraded) = Palette::from_colors(EmptyQuantizer.quantize(&[1, 2, 3, 4]));
        assert!(degraded);
        assert_eq!(palette.flat(), vec![0, 0, 0]);
        assert!(NeuQuantizer::default().quantize(&[]).is_empty());
    }

    #[test]
    fn mapper_picks_nearest_entry() {
        let (palette, _) = Palette::from_colors(vec![[0, 0, 0], [255, 255, 255], [255, 0, 0]]);
        let mut mapper = IndexMapper::new(&palette);
        let frame = [10, 10, 10, 255, 240, 240, 250, 255, 200, 30, 20, 255, 10, 10, 10, 255];
        assert_eq!(mapper.map_frame(&frame), vec![0, 1, 2, 0]);
    }

    #[test]
    fn oversized_palette_is_truncated() {
        let colors: Vec<[u8; 3]> = (0..300u32).map(|i| [(i % 256) as u8, 0, 0]).collect();
        let (palette, _) = Palette::from_colors(colors);
        assert_eq!(palette.colors().len(), MAX_COLORS);
    }
}
