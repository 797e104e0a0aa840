mod cli;
mod cmd;
mod dispatch;
mod format;
mod passphrase;
mod table;

use std::path::PathBuf;

use clap::Parser;

use shroud_core::config;

use cli::Cli;
use dispatch::dispatch_command;

const CONFIG_ENV: &str = "SHROUD_CONFIG";

fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let Some(path) = cli
        .config
        .map(PathBuf::from)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
    else {
        eprintln!("Error: no configuration file given.");
        eprintln!("Pass --config <path> or set {CONFIG_ENV}.");
        std::process::exit(1);
    };

    tracing::info!("Using config: {}", path.display());

    let cfg = match config::load_config(&path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = dispatch_command(&cli.command, &cfg) {
        eprintln!("Error: {}: {e}", cli.command.name());
        std::process::exit(1);
    }
}
