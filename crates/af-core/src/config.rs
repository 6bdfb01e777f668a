use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::charset::DensitySetId;
use crate::color::Rgb;

/// Teinte utilisée par `ColorMode::LuminanceTinted` sans couleur personnalisée.
pub const DEFAULT_TINT: Rgb = Rgb(0x33, 0xff, 0x66);

/// Réglages de tonalité, instantané immuable par appel de rendu.
///
/// Toutes les valeurs sont des multiplicateurs/exposants positifs, neutres à 1.0.
///
/// # Example
/// ```
/// use af_core::config::ToneSettings;
/// assert!(ToneSettings::default().is_neutral());
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ToneSettings {
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
    pub gamma: f32,
}

impl Default for ToneSettings {
    fn default() -> Self {
        Self {
            brightness: 1.0,
            contrast: 1.0,
            saturation: 1.0,
            gamma: 1.0,
        }
    }
}

impl ToneSettings {
    /// `true` si chaque étape du pipeline de tonalité serait sautée.
    #[must_use]
    pub fn is_neutral(&self) -> bool {
        *self == Self::default()
    }

    /// Clamp to the positive range the tone pipeline assumes.
    pub fn clamp_all(&mut self) {
        self.brightness = self.brightness.clamp(0.05, 5.0);
        self.contrast = self.contrast.clamp(0.05, 5.0);
        self.saturation = self.saturation.clamp(0.05, 5.0);
        self.gamma = self.gamma.clamp(0.1, 5.0);
    }
}

/// Color mapping policy for glyphs.
///
/// # Example
/// ```
/// use af_core::config::ColorMode;
/// assert!(matches!(ColorMode::default(), ColorMode::Source));
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorMode {
    /// RGB ajusté du pixel source.
    #[default]
    Source,
    /// Blanc fixe.
    White,
    /// Couleur personnalisée fixe.
    Custom,
    /// Teinte fixe modulée par la luminance.
    Tinted,
}

impl ColorMode {
    /// Parse a CLI spelling.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "source" | "color" => Some(Self::Source),
            "white" => Some(Self::White),
            "custom" => Some(Self::Custom),
            "tinted" | "tint" => Some(Self::Tinted),
            _ => None,
        }
    }
}

/// Apparence de la grille de glyphes.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AppearanceSettings {
    /// Taille d'une cellule en pixels (carrée), > 0.
    pub cell_size: u32,
    /// Police TTF/OTF pour la rasterisation. `None` = atlas de blocs intégré.
    pub font_path: Option<PathBuf>,
    /// Jeu de densité.
    pub density: DensitySetId,
    pub color_mode: ColorMode,
    /// Couleur pour `Custom`, et teinte pour `Tinted`.
    pub custom_color: Option<Rgb>,
    /// Inverser l'ordre de la table de densité.
    pub invert: bool,
    pub background: Rgb,
}

impl Default for AppearanceSettings {
    fn default() -> Self {
        Self {
            cell_size: 10,
            font_path: None,
            density: DensitySetId::Compact,
            color_mode: ColorMode::Source,
            custom_color: None,
            invert: false,
            background: Rgb::BLACK,
        }
    }
}

impl AppearanceSettings {
    pub fn clamp_all(&mut self) {
        self.cell_size = self.cell_size.clamp(2, 64);
    }
}

/// Stratégie de palette pour l'export animé.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaletteStrategy {
    /// Palette adaptative recalculée à chaque frame.
    #[default]
    PerFrame,
    /// Palette de la première frame réutilisée pour toute l'animation.
    Shared,
}

/// Export tunables.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ExportSettings {
    /// Attente maximale d'une notification de seek.
    pub seek_timeout_ms: u64,
    /// Durée maximale de l'export animé, en secondes.
    pub gif_max_secs: f64,
    pub palette_strategy: PaletteStrategy,
    /// Dossier de sortie des fichiers exportés.
    pub output_dir: PathBuf,
    /// Inclure l'audio dans l'export HQ et la capture live.
    pub capture_audio: bool,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            seek_timeout_ms: 500,
            gif_max_secs: 15.0,
            palette_strategy: PaletteStrategy::PerFrame,
            output_dir: PathBuf::from("."),
            capture_audio: true,
        }
    }
}

impl ExportSettings {
    pub fn clamp_all(&mut self) {
        self.seek_timeout_ms = self.seek_timeout_ms.clamp(50, 5000);
        self.gif_max_secs = if self.gif_max_secs.is_finite() {
            self.gif_max_secs.clamp(1.0, 15.0)
        } else {
            15.0
        };
    }
}

/// Configuration complète, chargée depuis TOML.
///
/// # Example
/// ```
/// use af_core::config::AppConfig;
/// let config = AppConfig::default();
/// assert_eq!(config.appearance.cell_size, 10);
/// assert_eq!(config.export.seek_timeout_ms, 500);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub tone: ToneSettings,
    pub appearance: AppearanceSettings,
    pub export: ExportSettings,
}

impl AppConfig {
    /// Clamp all numeric fields to their valid ranges.
    /// Called after TOML deserialization to prevent out-of-range values.
    pub fn clamp_all(&mut self) {
        self.tone.clamp_all();
        self.appearance.clamp_all();
        self.export.clamp_all();
    }
}

/// Charge un fichier TOML ; les sections/champs absents gardent leur défaut.
///
/// # Errors
/// Returns an error if the file cannot be read or parsed.
///
/// # Example
/// ```no_run
/// use af_core::config::load_config;
/// use std::path::Path;
/// let config = load_config(Path::new("config/default.toml")).unwrap();
/// ```
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Impossible de lire {}", path.display()))?;
    parse_config(&content).with_context(|| format!("Erreur de parsing TOML dans {}", path.display()))
}

/// Parse TOML text into a clamped config.
///
/// # Errors
/// Returns an error if the text is not valid TOML for [`AppConfig`].
pub fn parse_config(content: &str) -> Result<AppConfig> {
    let mut config: AppConfig = toml::from_str(content)?;
    config.clamp_all();
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = parse_config("[tone]\ncontrast = 1.5\n").unwrap();
        assert!((config.tone.contrast - 1.5).abs() < f32::EPSILON);
        assert!((config.tone.gamma - 1.0).abs() < f32::EPSILON);
        assert_eq!(config.appearance, AppearanceSettings::default());
    }

    #[test]
    fn values_are_clamped_after_load() {
        let config = parse_config(
            "[tone]\ngamma = 0.0\nbrightness = -3.0\n[appearance]\ncell_size = 0\n[export]\ngif_max_secs = 90.0\n",
        )
        .unwrap();
        assert!(config.tone.gamma > 0.0);
        assert!(config.tone.brightness > 0.0);
        assert_eq!(config.appearance.cell_size, 2);
        assert!((config.export.gif_max_secs - 15.0).abs() < f64::EPSILON);
    }

    #[test]
    fn appearance_section_parses_colors_and_modes() {
        let config = parse_config(
            "[appearance]\ncolor_mode = \"tinted\"\ncustom_color = \"#ff0000\"\nbackground = \"#101010\"\ndensity = \"nope\"\n",
        )
        .unwrap();
        assert_eq!(config.appearance.color_mode, ColorMode::Tinted);
        assert_eq!(config.appearance.custom_color, Some(Rgb(255, 0, 0)));
        assert_eq!(config.appearance.background, Rgb(16, 16, 16));
        assert_eq!(config.appearance.density, DensitySetId::Unknown);
    }

    #[test]
    fn load_config_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[export]\npalette_strategy = \"shared\"").unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.export.palette_strategy, PaletteStrategy::Shared);
    }

    #[test]
    fn shipped_default_matches_builtin_defaults() {
        let config = parse_config(include_str!("../../../config/default.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn load_config_reports_missing_file() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(err.to_string().contains("Impossible de lire"));
    }
}
