use af_core::config::{AppearanceSettings, ToneSettings};
use af_core::frame::{FrameBuffer, GlyphGrid};
use rayon::prelude::*;

use crate::mapper::GlyphMapper;

/// Compositor : frame réduite (un pixel par cellule) → `GlyphGrid`.
///
/// Garde le mapper résolu tant que l'apparence ne change pas.
///
/// # Example
/// ```
/// use af_ascii::compositor::Compositor;
/// use af_core::config::{AppearanceSettings, ToneSettings};
/// use af_core::frame::FrameBuffer;
///
/// let mut compositor = Compositor::new(&AppearanceSettings::default());
/// let small = FrameBuffer::new(4, 3);
/// let grid = compositor.compose(&small, &ToneSettings::default());
/// assert_eq!((grid.cols, grid.rows), (4, 3));
/// ```
pub struct Compositor {
    mapper: GlyphMapper,
    appearance: AppearanceSettings,
}

impl Compositor {
    #[must_use]
    pub fn new(appearance: &AppearanceSettings) -> Self {
        Self {
            mapper: GlyphMapper::new(appearance),
            appearance: appearance.clone(),
        }
    }

    /// Reconstruit le mapper si l'apparence a changé.
    pub fn update_if_needed(&mut self, appearance: &AppearanceSettings) {
        if self.appearance != *appearance {
            log::debug!("Apparence modifiée, mapper reconstruit ({:?})", appearance.density);
            self.mapper = GlyphMapper::new(appearance);
            self.appearance = appearance.clone();
        }
    }

    /// Mapper courant.
    #[must_use]
    pub fn mapper(&self) -> &GlyphMapper {
        &self.mapper
    }

    /// Construit une grille neuve à partir de `small`, déjà réduite à
    /// `cols × rows` pixels.
    #[must_use]
    pub fn compose(&self, small: &FrameBuffer, tone: &ToneSettings) -> GlyphGrid {
        let mut grid = GlyphGrid::new(small.width, small.height);
        if grid.cells.is_empty() {
            return grid;
        }
        let cols = small.width as usize;
        grid.cells
            .par_chunks_mut(cols)
            .zip(small.data.par_chunks(cols * 4))
            .for_each(|(row, pixels)| {
                for (cell, px) in row.iter_mut().zip(pixels.chunks_exact(4)) {
                    *cell = self.mapper.map([px[0], px[1], px[2]], tone);
                }
            });
        grid
    }
}
