use std::path::PathBuf;

use af_core::charset::DensitySetId;
use af_core::config::{AppConfig, ColorMode};
use clap::{Args, Parser, Subcommand};

/// asciiframe : images, vidéos et flux live en art ASCII, exportables.
#[derive(Parser, Debug)]
#[command(name = "asciiframe", version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Fichier de configuration TOML.
    #[arg(short, long, global = true, default_value = "config/default.toml")]
    pub config: PathBuf,

    /// Niveau de log : error, warn, info, debug, trace.
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(flatten)]
    pub overrides: Overrides,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Exporter la frame courante en PNG.
    Still(ExportArgs),
    /// Exporter la frame courante en texte (stdout sans -o).
    Text(ExportArgs),
    /// Exporter un GIF animé (10 fps, 15 s max).
    Gif(ExportArgs),
    /// Exporter une vidéo HQ (MP4, 30 fps, audio de la source).
    Hq(ExportArgs),
    /// Enregistrer la sortie rendue en WebM jusqu'à Ctrl-C.
    Record(RecordArgs),
    /// Preview interactive dans le terminal.
    Preview(SourceArgs),
}

#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Image, vidéo, ou périphérique/URL avec --live.
    pub input: PathBuf,

    /// Traiter l'entrée comme un flux live (webcam, URL).
    #[arg(long, default_value_t = false)]
    pub live: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Fichier de sortie. Défaut : nom horodaté dans `export.output_dir`.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Position (s) de la frame à exporter, pour still/text.
    #[arg(long)]
    pub at: Option<f64>,

    /// Ne pas inclure l'audio.
    #[arg(long, default_value_t = false)]
    pub no_audio: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RecordArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Durée maximale de l'enregistrement.
    #[arg(long)]
    pub seconds: Option<f64>,

    /// Enregistrer sans audio (ni piste du fichier, ni micro).
    #[arg(long, default_value_t = false)]
    pub no_audio: bool,
}

/// Surcharges d'apparence, appliquées après chaque chargement de config.
#[derive(Args, Debug, Clone, Default)]
pub struct Overrides {
    /// Taille de cellule en pixels.
    #[arg(long, global = true)]
    pub cell_size: Option<u32>,

    /// Jeu de densité : compact, standard, blocks, minimal, binary.
    #[arg(long, global = true)]
    pub density: Option<String>,

    /// Couleur : source, white, custom, tinted.
    #[arg(long, global = true)]
    pub color_mode: Option<String>,

    /// Inverser la table de densité.
    #[arg(long, global = true, default_value_t = false)]
    pub invert: bool,
}

impl Overrides {
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(cell) = self.cell_size {
            config.appearance.cell_size = cell;
        }
        if let Some(name) = &self.density {
            config.appearance.density = DensitySetId::from_name(name);
        }
        if let Some(name) = &self.color_mode {
            match ColorMode::from_name(name) {
                Some(mode) => config.appearance.color_mode = mode,
                None => log::warn!("Mode couleur inconnu '{name}', défaut conservé."),
            }
        }
        if self.invert {
            config.appearance.invert = true;
        }
        config.clamp_all();
    }
}

impl Command {
    /// Source visée par la commande.
    #[must_use]
    pub fn source(&self) -> &SourceArgs {
        match self {
            Self::Still(args) | Self::Text(args) | Self::Gif(args) | Self::Hq(args) => &args.source,
            Self::Record(args) => &args.source,
            Self::Preview(args) => args,
        }
    }
}
