use serde::{Deserialize, Serialize};

/// 10 caractères, compact, bon contraste.
pub const CHARSET_COMPACT: &str = " .:-=+*#%@";

/// 70 caractères, Paul Bourke, du plus sombre au plus dense.
pub const CHARSET_STANDARD: &str =
    " .'`^\",:;Il!i><~+_-?][}{1)(|/tfjrxnuvczXYUJCLQ0OZmwqpdbkhao*#MW&8%B@$";

/// Blocs Unicode : pseudo-pixels.
pub const CHARSET_BLOCKS: &str = " ░▒▓█";

/// Minimal, haut contraste.
pub const CHARSET_MINIMAL: &str = " .:░▒▓█";

/// Binaire.
pub const CHARSET_BINARY: &str = " 01";

/// Identifiant de jeu de densité, tel qu'écrit dans la config.
///
/// Un identifiant inconnu est désérialisé en `Unknown` et se résout vers le jeu
/// par défaut : la table de densité n'est jamais vide.
///
/// # Example
/// ```
/// use af_core::charset::DensitySetId;
/// assert_eq!(DensitySetId::Unknown.resolve().len(), 10);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DensitySetId {
    #[default]
    Compact,
    Standard,
    Blocks,
    Minimal,
    Binary,
    #[serde(other)]
    Unknown,
}

impl DensitySetId {
    /// Résout l'identifiant en table de glyphes.
    #[must_use]
    pub fn resolve(self) -> DensitySet {
        let glyphs = match self {
            Self::Compact => CHARSET_COMPACT,
            Self::Standard => CHARSET_STANDARD,
            Self::Blocks => CHARSET_BLOCKS,
            Self::Minimal => CHARSET_MINIMAL,
            Self::Binary => CHARSET_BINARY,
            Self::Unknown => {
                log::warn!("Jeu de densité inconnu, repli sur le jeu compact");
                CHARSET_COMPACT
            }
        };
        DensitySet::new(glyphs)
    }

    /// Parse a CLI spelling. Unknown names map to `Unknown`.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "compact" => Self::Compact,
            "standard" => Self::Standard,
            "blocks" => Self::Blocks,
            "minimal" => Self::Minimal,
            "binary" => Self::Binary,
            _ => Self::Unknown,
        }
    }
}

/// Séquence ordonnée et non vide de glyphes, du plus sombre au plus clair.
///
/// # Example
/// ```
/// use af_core::charset::DensitySet;
/// let set = DensitySet::new(" .:#@");
/// assert_eq!(set.len(), 5);
/// assert_eq!(set.glyph(4), '@');
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DensitySet {
    glyphs: Vec<char>,
}

impl DensitySet {
    /// Build a set from a string ordered darkest→lightest.
    ///
    /// An empty string falls back to the compact set.
    #[must_use]
    pub fn new(glyphs: &str) -> Self {
        let glyphs: Vec<char> = glyphs.chars().collect();
        if glyphs.is_empty() {
            return Self::new(CHARSET_COMPACT);
        }
        Self { glyphs }
    }

    /// Number of glyphs, always ≥ 1.
    #[must_use]
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    /// Glyph at `index`, clamped to the last entry.
    #[inline(always)]
    #[must_use]
    pub fn glyph(&self, index: usize) -> char {
        self.glyphs[index.min(self.glyphs.len() - 1)]
    }

    /// Rank of `ch` in the set, if present.
    #[must_use]
    pub fn rank(&self, ch: char) -> Option<usize> {
        self.glyphs.iter().position(|&g| g == ch)
    }

    /// All glyphs, darkest first.
    #[must_use]
    pub fn glyphs(&self) -> &[char] {
        &self.glyphs
    }
}

impl Default for DensitySet {
    fn default() -> Self {
        Self::new(CHARSET_COMPACT)
    }
}
