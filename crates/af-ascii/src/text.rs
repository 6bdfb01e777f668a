use af_core::frame::GlyphGrid;

/// Sérialise la grille en texte, ligne par ligne.
///
/// Chaque glyphe est émis deux fois pour compenser le ratio ~2:1
/// hauteur/largeur des polices monospace ; chaque ligne se termine par `\n`.
///
/// # Example
/// ```
/// use af_ascii::text::compose_text;
/// use af_core::color::Rgb;
/// use af_core::frame::{GlyphCell, GlyphGrid};
///
/// let mut grid = GlyphGrid::new(2, 2);
/// grid.set(1, 0, GlyphCell { ch: '@', fg: Rgb::WHITE });
/// grid.set(0, 1, GlyphCell { ch: '.', fg: Rgb::WHITE });
/// assert_eq!(compose_text(&grid), "  @@\n..  \n");
/// ```
#[must_use]
pub fn compose_text(grid: &GlyphGrid) -> String {
    let mut out = String::with_capacity((grid.cols as usize * 2 + 1) * grid.rows as usize);
    for row in grid.rows() {
        for cell in row {
            out.push(cell.ch);
            out.push(cell.ch);
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use af_core::color::Rgb;
    use af_core::frame::GlyphCell;

    #[test]
    fn empty_grid_yields_empty_text() {
        assert_eq!(compose_text(&GlyphGrid::new(0, 0)), "");
    }

    #[test]
    fn multibyte_glyphs_survive() {
        let mut grid = GlyphGrid::new(1, 1);
        grid.set(0, 0, GlyphCell { ch: '▓', fg: Rgb::WHITE });
        let text = compose_text(&grid);
        assert_eq!(text, "▓▓\n");
        assert_eq!(text.chars().count(), 3);
    }

    #[test]
    fn line_count_matches_rows() {
        let grid = GlyphGrid::new(7, 5);
        let text = compose_text(&grid);
        assert_eq!(text.lines().count(), 5);
        assert!(text.lines().all(|l| l.chars().count() == 14));
    }
}
