use std::sync::Arc;

use af_core::config::AppConfig;
use anyhow::Result;
use arc_swap::ArcSwap;
use clap::Parser;

pub mod app;
pub mod cli;
pub mod commands;
pub mod hotreload;

use cli::{Cli, Command, SourceArgs};

fn main() -> Result<()> {
    // 1. Parser CLI
    let cli = Cli::parse();

    // 2. Initialiser le logging
    env_logger::Builder::new()
        .filter_level(cli.log_level.parse().unwrap_or(log::LevelFilter::Warn))
        .init();

    // 3. Charger la config, puis appliquer les overrides CLI
    let config = resolve_config(&cli)?;
    let source = cli.command.source();
    log::info!(
        "Source : {}{}",
        source.input.display(),
        if source.live { " (live)" } else { "" }
    );

    // 4. Dispatch
    match &cli.command {
        Command::Still(args) => commands::still(args, &config),
        Command::Text(args) => commands::text(args, &config),
        Command::Gif(args) => commands::gif(args, &config),
        Command::Hq(args) => commands::hq(args, &config),
        Command::Record(args) => commands::record(args, &config),
        Command::Preview(args) => preview(&cli, args, config),
    }
}

/// Config depuis `--config` ; fichier absent = défauts.
fn resolve_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = if cli.config.exists() {
        af_core::config::load_config(&cli.config)?
    } else {
        log::warn!(
            "Config introuvable : {}. Utilisation des défauts.",
            cli.config.display()
        );
        AppConfig::default()
    };
    cli.overrides.apply(&mut config);
    Ok(config)
}

fn preview(cli: &Cli, args: &SourceArgs, config: AppConfig) -> Result<()> {
    let source = commands::open_ready(args)?;
    let name = args
        .input
        .file_name()
        .map_or_else(|| args.input.display().to_string(), |n| n.to_string_lossy().into_owned());

    let config = Arc::new(ArcSwap::from_pointee(config));

    // Hot-reload (thread interne notify) ; absent si le fichier n'existe pas.
    let _watcher = if cli.config.exists() {
        Some(hotreload::spawn_config_watcher(&cli.config, &config, cli.overrides.clone())?)
    } else {
        None
    };

    let terminal = ratatui::init();
    let mut app_instance = app::App::new(config, source, name);
    let result = app_instance.run(terminal);

    // Restaurer le terminal (TOUJOURS, même en cas d'erreur)
    ratatui::restore();

    result
}
