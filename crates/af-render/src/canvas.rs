use af_ascii::grid::GridGeometry;
use af_core::color::Rgb;
use af_core::frame::GlyphGrid;
use ratatui::buffer::Buffer;
use ratatui::layout::Rect;
use ratatui::style::Color;

/// Grille de preview pour une source `width × height` dans `area`.
///
/// Chaque glyphe occupe deux colonnes terminal (ratio ~2:1 des polices
/// monospace), le ratio de la source est conservé. `None` tant que la source
/// ou la zone n'a pas de surface.
///
/// # Example
/// ```
/// use af_render::canvas::preview_geometry;
/// use ratatui::layout::Rect;
/// let geo = preview_geometry((1920, 1080), Rect::new(0, 0, 80, 40)).unwrap();
/// assert_eq!((geo.cols, geo.rows), (40, 22));
/// assert!(preview_geometry((0, 0), Rect::new(0, 0, 80, 40)).is_none());
/// ```
#[must_use]
pub fn preview_geometry(source: (u32, u32), area: Rect) -> Option<GridGeometry> {
    let (w, h) = source;
    if w == 0 || h == 0 {
        return None;
    }
    let max_cols = u64::from(area.width / 2);
    let max_rows = u64::from(area.height);
    let (w, h) = (u64::from(w), u64::from(h));
    let (cols, rows) = if w * max_rows >= h * max_cols {
        (max_cols, h * max_cols / w)
    } else {
        (w * max_rows / h, max_rows)
    };
    let (cols, rows) = (cols as u32, rows as u32);
    GridGeometry::fit(cols, rows)
}

#[inline]
fn color(c: Rgb) -> Color {
    Color::Rgb(c.0, c.1, c.2)
}

/// Écrit directement une `GlyphGrid` dans un `ratatui::Buffer`, centrée
/// dans `area`, chaque glyphe doublé horizontalement.
///
/// Un fond noir laisse le fond du terminal.
///
/// # Example
/// ```
/// use af_core::color::Rgb;
/// use af_core::frame::{GlyphCell, GlyphGrid};
/// use af_render::canvas::render_grid;
/// use ratatui::buffer::Buffer;
/// use ratatui::layout::Rect;
///
/// let mut grid = GlyphGrid::new(1, 1);
/// grid.set(0, 0, GlyphCell { ch: '#', fg: Rgb::WHITE });
/// let area = Rect::new(0, 0, 2, 1);
/// let mut buf = Buffer::empty(area);
/// render_grid(&mut buf, area, &grid, Rgb::BLACK);
/// assert_eq!(buf[(1, 0)].symbol(), "#");
/// ```
pub fn render_grid(buf: &mut Buffer, area: Rect, grid: &GlyphGrid, background: Rgb) {
    let width = (grid.cols * 2).min(u32::from(area.width)) as u16;
    let height = grid.rows.min(u32::from(area.height)) as u16;
    let x0 = area.x + (area.width - width) / 2;
    let y0 = area.y + (area.height - height) / 2;
    let bg = if background == Rgb::BLACK {
        Color::Reset
    } else {
        color(background)
    };

    for (cy, row) in grid.rows().take(usize::from(height)).enumerate() {
        let y = y0 + cy as u16;
        for (cx, cell) in row.iter().enumerate() {
            let x = x0 + (cx as u16) * 2;
            for dx in 0..2 {
                if x + dx >= x0 + width {
                    break;
                }
                if let Some(out) = buf.cell_mut((x + dx, y)) {
                    out.set_char(cell.ch).set_fg(color(cell.fg)).set_bg(bg);
                }
            }
        }
    }
}
