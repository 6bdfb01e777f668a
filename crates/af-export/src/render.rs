use af_ascii::compositor::Compositor;
use af_ascii::grid::GridGeometry;
use af_core::config::{AppearanceSettings, ToneSettings};
use af_core::frame::{FrameBuffer, GlyphGrid};
use af_source::resize::Resizer;
use anyhow::Result;

use crate::rasterizer::{GlyphAtlas, Rasterizer};

/// Pipeline complet frame source → grille → surface.
///
/// Chaque instance possède sa propre surface : un export n'écrit jamais dans
/// la surface de la preview.
pub struct FrameRenderer {
    resizer: Resizer,
    compositor: Compositor,
    rasterizer: Rasterizer,
    surface: FrameBuffer,
    grid: GlyphGrid,
    cell: u32,
}

impl FrameRenderer {
    /// Construit le renderer pour un snapshot d'apparence (police ou atlas de blocs).
    #[must_use]
    pub fn new(appearance: &AppearanceSettings) -> Self {
        let compositor = Compositor::new(appearance);
        let atlas = GlyphAtlas::load(
            appearance.font_path.as_deref(),
            appearance.cell_size,
            compositor.mapper().density(),
        );
        Self::with_atlas(compositor, atlas, appearance)
    }

    /// Renderer avec l'atlas de blocs, sans accès disque.
    #[must_use]
    pub fn with_fallback_atlas(appearance: &AppearanceSettings) -> Self {
        let compositor = Compositor::new(appearance);
        let atlas = GlyphAtlas::fallback(appearance.cell_size, compositor.mapper().density());
        Self::with_atlas(compositor, atlas, appearance)
    }

    fn with_atlas(compositor: Compositor, atlas: GlyphAtlas, appearance: &AppearanceSettings) -> Self {
        Self {
            resizer: Resizer::new(),
            compositor,
            cell: atlas.cell(),
            rasterizer: Rasterizer::new(atlas, appearance.background),
            surface: FrameBuffer::new(0, 0),
            grid: GlyphGrid::new(0, 0),
        }
    }

    /// Géométrie pour une source `width × height`. `None` = grille vide.
    #[must_use]
    pub fn geometry(&self, width: u32, height: u32) -> Option<GridGeometry> {
        GridGeometry::compute(width, height, self.cell)
    }

    /// Échantillonne `frame` en une grille neuve. `Ok(None)` si la grille est vide.
    ///
    /// # Errors
    /// Propage une erreur du resize.
    pub fn sample(&mut self, frame: &FrameBuffer, tone: &ToneSettings) -> Result<Option<&GlyphGrid>> {
        let Some(geom) = self.geometry(frame.width, frame.height) else {
            return Ok(None);
        };
        let small = self.resizer.downsample(frame, geom.cols, geom.rows)?;
        self.grid = self.compositor.compose(small, tone);
        Ok(Some(&self.grid))
    }

    /// Rend `frame` sur la surface dédiée, aux dimensions alignées sur les
    /// cellules (`even` : ramenées en plus à des valeurs paires).
    ///
    /// `Ok(None)` si la grille est vide : rien à rendre pour cet appel.
    ///
    /// # Errors
    /// Propage une erreur du resize.
    pub fn render(
        &mut self,
        frame: &FrameBuffer,
        tone: &ToneSettings,
        even: bool,
    ) -> Result<Option<&FrameBuffer>> {
        let Some(geom) = self.geometry(frame.width, frame.height) else {
            return Ok(None);
        };
        if self.sample(frame, tone)?.is_none() {
            return Ok(None);
        }
        let (w, h) = if even {
            geom.even_render_size()
        } else {
            geom.render_size()
        };
        self.surface.ensure_size(w, h);
        self.rasterizer.render(&self.grid, &mut self.surface);
        Ok(Some(&self.surface))
    }

    /// Dernière grille échantillonnée.
    #[must_use]
    pub fn grid(&self) -> &GlyphGrid {
        &self.grid
    }
}
