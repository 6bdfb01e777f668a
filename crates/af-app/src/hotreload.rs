use std::path::Path;
use std::sync::Arc;

use af_core::config::{AppConfig, load_config};
use anyhow::Result;
use arc_swap::ArcSwap;
use notify::{Event, EventKind, RecursiveMode, Watcher};

use crate::cli::Overrides;

/// Recharge la config et réapplique les surcharges CLI.
///
/// # Errors
/// Returns an error if the file cannot be read or parsed.
pub fn reload(path: &Path, overrides: &Overrides) -> Result<AppConfig> {
    let mut config = load_config(path)?;
    overrides.apply(&mut config);
    Ok(config)
}

/// Lance un watcher qui remplace atomiquement le snapshot de config à chaque
/// modification du fichier. Une config invalide garde l'ancien snapshot.
///
/// Retourne le Watcher (doit rester vivant tant que l'app tourne).
///
/// # Errors
/// Returns an error if the watcher cannot be created or the path cannot be watched.
pub fn spawn_config_watcher(
    config_path: &Path,
    config: &Arc<ArcSwap<AppConfig>>,
    overrides: Overrides,
) -> Result<impl Watcher + use<>> {
    let config = Arc::clone(config);
    let path = config_path.to_path_buf();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        if let Ok(event) = res
            && matches!(event.kind, EventKind::Modify(_))
        {
            match reload(&path, &overrides) {
                Ok(new_config) => {
                    config.store(Arc::new(new_config));
                    log::info!("Config rechargée depuis {}", path.display());
                }
                Err(e) => log::warn!("Erreur de rechargement config : {e:#}"),
            }
        }
    })?;

    watcher.watch(config_path, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reload_keeps_cli_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[appearance]\ncell_size = 20\ninvert = false\n[tone]\ngamma = 2.0").unwrap();
        let overrides = Overrides {
            cell_size: Some(6),
            invert: true,
            ..Overrides::default()
        };
        let config = reload(file.path(), &overrides).unwrap();
        assert_eq!(config.appearance.cell_size, 6);
        assert!(config.appearance.invert);
        assert!((config.tone.gamma - 2.0).abs() < f32::EPSILON);
    }

    #[test]
    fn invalid_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[tone\ngamma = ").unwrap();
        assert!(reload(file.path(), &Overrides::default()).is_err());
    }
}
