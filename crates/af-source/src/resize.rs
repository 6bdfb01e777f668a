use af_core::frame::FrameBuffer;
use anyhow::{Context, Result};
use fast_image_resize::images::Image;
use fast_image_resize::{FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer as FirResizer};

/// Resize filtré réutilisable (convolution bilinéaire).
///
/// Le resizer et le buffer source sont conservés entre deux appels : pas
/// d'allocation en régime établi tant que les dimensions ne changent pas.
///
/// # Example
/// ```
/// use af_source::resize::Resizer;
/// use af_core::frame::FrameBuffer;
/// let mut r = Resizer::new();
/// let small = r.downsample(&FrameBuffer::new(64, 32), 8, 4).unwrap();
/// assert_eq!((small.width, small.height), (8, 4));
/// ```
pub struct Resizer {
    inner: FirResizer,
    options: ResizeOptions,
    /// Copie de la source : l'API exige `&mut` sur l'image d'entrée.
    src_buf: Vec<u8>,
    /// Cible réutilisée par `downsample`.
    scratch: FrameBuffer,
}

impl Resizer {
    #[must_use]
    pub fn new() -> Self {
        Self::with_filter(FilterType::Bilinear)
    }

    /// Resizer avec un autre filtre de convolution (`Box` pour les grilles
    /// très petites, par exemple).
    #[must_use]
    pub fn with_filter(filter: FilterType) -> Self {
        Self {
            inner: FirResizer::new(),
            options: ResizeOptions::new().resize_alg(ResizeAlg::Convolution(filter)),
            src_buf: Vec::new(),
            scratch: FrameBuffer::new(0, 0),
        }
    }

    /// Resize `src` into `dst`. The size of `dst` is the target size.
    ///
    /// # Errors
    /// Fails when either buffer is empty or its length does not match its
    /// dimensions.
    pub fn resize_into(&mut self, src: &FrameBuffer, dst: &mut FrameBuffer) -> Result<()> {
        if src.is_empty() || dst.is_empty() {
            anyhow::bail!(
                "Resize impossible : {}x{} -> {}x{}",
                src.width,
                src.height,
                dst.width,
                dst.height
            );
        }
        if src.width == dst.width && src.height == dst.height {
            dst.data.copy_from_slice(&src.data);
            return Ok(());
        }

        self.src_buf.clear();
        self.src_buf.extend_from_slice(&src.data);

        let src_image =
            Image::from_slice_u8(src.width, src.height, &mut self.src_buf, PixelType::U8x4)
                .context("Dimensions source invalides")?;
        let mut dst_image =
            Image::from_slice_u8(dst.width, dst.height, &mut dst.data, PixelType::U8x4)
                .context("Dimensions cible invalides")?;

        self.inner
            .resize(&src_image, &mut dst_image, Some(&self.options))
            .context("Resize échoué")?;
        Ok(())
    }

    /// Réduit `src` à `cols × rows` (un pixel par cellule de la grille).
    ///
    /// Le résultat emprunte le buffer interne ; il reste valide jusqu'au
    /// prochain appel.
    ///
    /// # Errors
    /// Same as [`Resizer::resize_into`].
    pub fn downsample(&mut self, src: &FrameBuffer, cols: u32, rows: u32) -> Result<&FrameBuffer> {
        let mut scratch = std::mem::replace(&mut self.scratch, FrameBuffer::new(0, 0));
        scratch.ensure_size(cols, rows);
        let result = self.resize_into(src, &mut scratch);
        self.scratch = scratch;
        result.map(|()| &self.scratch)
    }
}

impl Default for Resizer {
    fn default() -> Self {
        Self::new()
    }
}
