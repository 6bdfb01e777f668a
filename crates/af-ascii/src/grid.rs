/// Géométrie de grille dérivée d'une source et d'une taille de cellule.
///
/// `cols = floor(width / cell)`, `rows = floor(height / cell)`. Les dimensions
/// de rendu sont « snappées » sur un nombre entier de cellules, pour qu'aucune
/// surface ne contienne de cellule partielle.
///
/// # Example
/// ```
/// use af_ascii::grid::GridGeometry;
/// let geo = GridGeometry::compute(320, 180, 16).unwrap();
/// assert_eq!((geo.cols, geo.rows), (20, 11));
/// assert_eq!(geo.render_size(), (320, 176));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridGeometry {
    /// Columns (cells per row).
    pub cols: u32,
    /// Rows.
    pub rows: u32,
    /// Côté d'une cellule en pixels.
    pub cell: u32,
}

impl GridGeometry {
    /// Calcule la grille. `None` signale une grille vide : rien à rendre pour cet
    /// appel, l'appelant réessaie au tick suivant.
    ///
    /// # Example
    /// ```
    /// use af_ascii::grid::GridGeometry;
    /// assert!(GridGeometry::compute(15, 300, 16).is_none());
    /// assert!(GridGeometry::compute(300, 300, 0).is_none());
    /// ```
    #[must_use]
    pub fn compute(width: u32, height: u32, cell: u32) -> Option<Self> {
        if cell == 0 {
            return None;
        }
        let cols = width / cell;
        let rows = height / cell;
        if cols == 0 || rows == 0 {
            return None;
        }
        Some(Self { cols, rows, cell })
    }

    /// Grille d'une cellule par caractère terminal (preview), sans pixels.
    #[must_use]
    pub fn fit(cols: u32, rows: u32) -> Option<Self> {
        (cols > 0 && rows > 0).then_some(Self {
            cols,
            rows,
            cell: 1,
        })
    }

    /// Dimensions snappées `cols*cell × rows*cell`.
    #[must_use]
    pub fn render_size(&self) -> (u32, u32) {
        (self.cols * self.cell, self.rows * self.cell)
    }

    /// Dimensions snappées puis forcées paires (décrément de 1 si impair),
    /// exigées par le codec vidéo.
    ///
    /// # Example
    /// ```
    /// use af_ascii::grid::GridGeometry;
    /// let geo = GridGeometry::compute(100, 100, 7).unwrap();
    /// assert_eq!(geo.render_size(), (98, 98));
    /// let geo = GridGeometry::compute(21, 35, 7).unwrap();
    /// assert_eq!(geo.even_render_size(), (20, 34));
    /// ```
    #[must_use]
    pub fn even_render_size(&self) -> (u32, u32) {
        let (w, h) = self.render_size();
        (w - w % 2, h - h % 2)
    }
}
