use std::collections::HashMap;
use std::path::Path;

use ab_glyph::{Font, FontVec, PxScale, ScaleFont, point};
use af_core::charset::DensitySet;
use af_core::color::Rgb;
use af_core::frame::{FrameBuffer, GlyphGrid};
use anyhow::{Context, Result};
use rayon::prelude::*;

/// Masques de couverture `cell × cell` par glyphe.
///
/// Construit depuis une police TTF/OTF, ou depuis un atlas de blocs intégré
/// quand aucune police n'est disponible : chaque glyphe devient un bloc
/// centré dont l'aire suit son rang dans le jeu de densité.
pub struct GlyphAtlas {
    cell: u32,
    masks: HashMap<char, Vec<u8>>,
    /// Masque vide pour les caractères absents de l'atlas.
    empty: Vec<u8>,
}

impl GlyphAtlas {
    /// Rasterise `density` depuis les octets d'une police.
    ///
    /// Les glyphes absents de la police reçoivent le bloc de leur rang.
    ///
    /// # Errors
    /// Retourne une erreur si la police est invalide.
    pub fn from_font(font_data: Vec<u8>, cell: u32, density: &DensitySet) -> Result<Self> {
        let font = FontVec::try_from_vec(font_data).context("Police invalide")?;
        let scale = PxScale::from(cell as f32);
        let scaled = font.as_scaled(scale);
        let ascent = scaled.ascent();
        let mut atlas = Self::blank(cell);

        for (rank, &ch) in density.glyphs().iter().enumerate() {
            let gid = font.glyph_id(ch);
            if gid.0 == 0 && ch != ' ' {
                atlas.insert_block(ch, rank, density.len());
                continue;
            }
            let mut mask = vec![0u8; (cell * cell) as usize];
            let x0 = ((cell as f32 - scaled.h_advance(gid)) / 2.0).max(0.0);
            let glyph = gid.with_scale_and_position(scale, point(x0, ascent));
            if let Some(outline) = font.outline_glyph(glyph) {
                let bounds = outline.px_bounds();
                #[allow(clippy::cast_possible_wrap)]
                outline.draw(|x, y, v| {
                    let px = x as i32 + bounds.min.x as i32;
                    let py = y as i32 + bounds.min.y as i32;
                    if (0..cell as i32).contains(&px) && (0..cell as i32).contains(&py) {
                        let idx = (py as u32 * cell + px as u32) as usize;
                        mask[idx] = mask[idx].max((v * 255.0).round() as u8);
                    }
                });
            }
            atlas.masks.insert(ch, mask);
        }
        Ok(atlas)
    }

    /// Atlas de blocs intégré.
    ///
    /// # Example
    /// ```
    /// use af_core::charset::DensitySet;
    /// use af_export::rasterizer::GlyphAtlas;
    /// let atlas = GlyphAtlas::fallback(8, &DensitySet::new(" @"));
    /// assert!(atlas.mask(' ').iter().all(|&a| a == 0));
    /// assert!(atlas.mask('@').iter().all(|&a| a == 255));
    /// ```
    #[must_use]
    pub fn fallback(cell: u32, density: &DensitySet) -> Self {
        let mut atlas = Self::blank(cell);
        for (rank, &ch) in density.glyphs().iter().enumerate() {
            atlas.insert_block(ch, rank, density.len());
        }
        atlas
    }

    /// Police de `font_path` si elle se charge, sinon atlas de blocs (warn).
    #[must_use]
    pub fn load(font_path: Option<&Path>, cell: u32, density: &DensitySet) -> Self {
        let Some(path) = font_path else {
            return Self::fallback(cell, density);
        };
        let loaded = std::fs::read(path)
            .with_context(|| format!("Lecture de {}", path.display()))
            .and_then(|data| Self::from_font(data, cell, density));
        match loaded {
            Ok(atlas) => atlas,
            Err(e) => {
                log::warn!("Police indisponible ({e:#}), atlas de blocs utilisé");
                Self::fallback(cell, density)
            }
        }
    }

    fn blank(cell: u32) -> Self {
        let cell = cell.max(1);
        Self {
            cell,
            masks: HashMap::new(),
            empty: vec![0u8; (cell * cell) as usize],
        }
    }

    fn insert_block(&mut self, ch: char, rank: usize, len: usize) {
        let cell = self.cell;
        let coverage = if len > 1 {
            rank as f32 / (len - 1) as f32
        } else {
            1.0
        };
        // côté du bloc carré d'aire `coverage × cell²`
        let side = (coverage.sqrt() * cell as f32).round() as u32;
        let start = (cell - side.min(cell)) / 2;
        let end = start + side.min(cell);
        let mut mask = vec![0u8; (cell * cell) as usize];
        for y in start..end {
            for x in start..end {
                mask[(y * cell + x) as usize] = 255;
            }
        }
        self.masks.insert(ch, mask);
    }

    /// Côté d'une cellule en pixels.
    #[must_use]
    pub fn cell(&self) -> u32 {
        self.cell
    }

    /// Masque de `ch` (`cell × cell`, row-major). Vide si absent.
    #[must_use]
    pub fn mask(&self, ch: char) -> &[u8] {
        self.masks.get(&ch).unwrap_or(&self.empty)
    }
}

/// Peint une `GlyphGrid` sur une surface RGBA : fond d'abord, puis chaque
/// glyphe à l'origine de sa cellule, mélangé selon sa couverture.
///
/// Les cellules qui dépassent la surface sont rognées.
pub struct Rasterizer {
    atlas: GlyphAtlas,
    background: Rgb,
}

impl Rasterizer {
    #[must_use]
    pub fn new(atlas: GlyphAtlas, background: Rgb) -> Self {
        Self { atlas, background }
    }

    #[must_use]
    pub fn cell(&self) -> u32 {
        self.atlas.cell()
    }

    /// Rendu parallélisé par bande d'une rangée de cellules.
    pub fn render(&self, grid: &GlyphGrid, fb: &mut FrameBuffer) {
        let cell = self.atlas.cell() as usize;
        let width = fb.width as usize;
        let stride = width * 4;
        let bg = self.background;
        if stride == 0 || grid.cols == 0 {
            fb.fill(bg);
            return;
        }

        fb.data
            .par_chunks_mut(stride * cell)
            .enumerate()
            .for_each(|(gy, band)| {
                let band_rows = band.len() / stride;
                for px in band.chunks_exact_mut(4) {
                    px.copy_from_slice(&[bg.0, bg.1, bg.2, 255]);
                }
                if gy >= grid.rows as usize {
                    return;
                }
                for gx in 0..grid.cols as usize {
                    let x0 = gx * cell;
                    if x0 >= width {
                        break;
                    }
                    let glyph = grid.get(gx as u32, gy as u32);
                    let mask = self.atlas.mask(glyph.ch);
                    let cols = cell.min(width - x0);
                    for cy in 0..cell.min(band_rows) {
                        for cx in 0..cols {
                            let alpha = mask[cy * cell + cx];
                            if alpha == 0 {
                                continue;
                            }
                            let a = f32::from(alpha) / 255.0;
                            let blend = |fg: u8, bg: u8| {
                                (f32::from(fg) * a + f32::from(bg) * (1.0 - a)).round() as u8
                            };
                            let i = cy * stride + (x0 + cx) * 4;
                            band[i] = blend(glyph.fg.0, bg.0);
                            band[i + 1] = blend(glyph.fg.1, bg.1);
                            band[i + 2] = blend(glyph.fg.2, bg.2);
                        }
                    }
                }
            });
    }
}
