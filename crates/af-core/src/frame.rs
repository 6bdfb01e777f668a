use crate::color::Rgb;

/// Buffer de pixels RGBA, row-major, 4 bytes par pixel.
///
/// Sert à la fois de frame source décodée, de cible du resize vers la grille
/// et de surface de rendu (preview, export, frame encodeur).
///
/// # Example
/// ```
/// use af_core::frame::FrameBuffer;
/// let fb = FrameBuffer::new(10, 10);
/// assert_eq!(fb.data.len(), 400);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameBuffer {
    /// Pixels RGBA, row-major, 4 bytes par pixel.
    pub data: Vec<u8>,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl FrameBuffer {
    /// Crée un buffer noir transparent aux dimensions données.
    ///
    /// # Example
    /// ```
    /// use af_core::frame::FrameBuffer;
    /// let fb = FrameBuffer::new(100, 50);
    /// assert_eq!(fb.width, 100);
    /// assert_eq!(fb.height, 50);
    /// assert_eq!(fb.data.len(), 100 * 50 * 4);
    /// ```
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            data: vec![0u8; width as usize * height as usize * 4],
            width,
            height,
        }
    }

    /// Wraps raw RGBA bytes. Returns `None` when the length does not match.
    #[must_use]
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        (data.len() == width as usize * height as usize * 4).then_some(Self {
            data,
            width,
            height,
        })
    }

    /// `true` when the buffer holds no pixel.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Réalloue le buffer seulement si les dimensions changent.
    pub fn ensure_size(&mut self, width: u32, height: u32) {
        if self.width != width || self.height != height {
            *self = Self::new(width, height);
        }
    }

    /// Accès au pixel (x, y) → (r, g, b, a).
    ///
    /// # Example
    /// ```
    /// use af_core::frame::FrameBuffer;
    /// let fb = FrameBuffer::new(10, 10);
    /// assert_eq!(fb.pixel(0, 0), (0, 0, 0, 0));
    /// ```
    #[inline(always)]
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> (u8, u8, u8, u8) {
        debug_assert!(x < self.width && y < self.height, "pixel out of bounds");
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        if idx + 3 >= self.data.len() {
            return (0, 0, 0, 0);
        }
        (
            self.data[idx],
            self.data[idx + 1],
            self.data[idx + 2],
            self.data[idx + 3],
        )
    }

    /// Remplit toute la surface avec une couleur opaque.
    ///
    /// # Example
    /// ```
    /// use af_core::color::Rgb;
    /// use af_core::frame::FrameBuffer;
    /// let mut fb = FrameBuffer::new(2, 2);
    /// fb.fill(Rgb(1, 2, 3));
    /// assert_eq!(fb.pixel(1, 1), (1, 2, 3, 255));
    /// ```
    pub fn fill(&mut self, color: Rgb) {
        for px in self.data.chunks_exact_mut(4) {
            px[0] = color.0;
            px[1] = color.1;
            px[2] = color.2;
            px[3] = 255;
        }
    }
}

/// Une cellule de la grille : un glyphe et sa couleur.
///
/// # Example
/// ```
/// use af_core::frame::GlyphCell;
/// let cell = GlyphCell::default();
/// assert_eq!(cell.ch, ' ');
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GlyphCell {
    /// Caractère à afficher.
    pub ch: char,
    /// Couleur du glyphe.
    pub fg: Rgb,
}

impl Default for GlyphCell {
    fn default() -> Self {
        Self {
            ch: ' ',
            fg: Rgb::BLACK,
        }
    }
}

/// Grille `rows × cols` de cellules, row-major.
///
/// Reconstruite à chaque échantillonnage, jamais mise à jour de façon incrémentale.
///
/// # Example
/// ```
/// use af_core::color::Rgb;
/// use af_core::frame::{GlyphCell, GlyphGrid};
/// let mut grid = GlyphGrid::new(80, 24);
/// grid.set(0, 0, GlyphCell { ch: '@', fg: Rgb(255, 0, 0) });
/// assert_eq!(grid.get(0, 0).ch, '@');
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GlyphGrid {
    /// Flat array of cells, row-major.
    pub cells: Vec<GlyphCell>,
    /// Width in cells.
    pub cols: u32,
    /// Height in cells.
    pub rows: u32,
}

impl GlyphGrid {
    /// Crée une grille remplie d'espaces noirs.
    ///
    /// # Example
    /// ```
    /// use af_core::frame::GlyphGrid;
    /// let grid = GlyphGrid::new(80, 24);
    /// assert_eq!(grid.cells.len(), 80 * 24);
    /// ```
    #[must_use]
    pub fn new(cols: u32, rows: u32) -> Self {
        Self {
            cells: vec![GlyphCell::default(); cols as usize * rows as usize],
            cols,
            rows,
        }
    }

    /// Set a cell at column `x`, row `y`.
    #[inline(always)]
    pub fn set(&mut self, x: u32, y: u32, cell: GlyphCell) {
        self.cells[y as usize * self.cols as usize + x as usize] = cell;
    }

    /// Get a cell reference at column `x`, row `y`.
    #[inline(always)]
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> &GlyphCell {
        &self.cells[y as usize * self.cols as usize + x as usize]
    }

    /// Iterate over the rows of the grid.
    pub fn rows(&self) -> impl Iterator<Item = &[GlyphCell]> {
        self.cells.chunks(self.cols.max(1) as usize)
    }
}
