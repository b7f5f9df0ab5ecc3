use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use fs_capture::config::{self, ConfigStore, CONFIG_FILE_NAME};
use fs_capture::logging::{self, LogLevel};
use fs_capture::{app, App, Console};

/// Field-strength capture for the R&S ETL analyzer.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// debug, info, warning, error or critical. Anything else logs everything.
    level: Option<String>,

    /// INI file to use instead of the per-user default.
    config: Option<PathBuf>,

    /// List serial ports usable as ASRL resources, then exit.
    #[arg(long)]
    list_ports: bool,
}

fn list_serial_ports() -> anyhow::Result<()> {
    let ports = serialport::available_ports().context("could not enumerate serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found.");
    }
    for port in ports {
        println!("  {}  ->  ASRL{}::INSTR", port.port_name, port.port_name);
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if cli.list_ports {
        return list_serial_ports();
    }

    let default_dir = config::default_config_dir()
        .context("no per-user application data folder on this system")?;
    let (requested_dir, file_name) = match &cli.config {
        Some(path) => (
            path.parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| default_dir.clone()),
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| CONFIG_FILE_NAME.to_string()),
        ),
        None => (default_dir.clone(), CONFIG_FILE_NAME.to_string()),
    };

    let mut console = Console::stdio();
    let Some(dir) = app::resolve_config_dir(&mut console, requested_dir, &default_dir) else {
        return Ok(());
    };

    let _guard = logging::init(&dir, LogLevel::from_arg(cli.level.as_deref()))
        .with_context(|| format!("could not start logging in {}", dir.display()))?;
    tracing::info!("*** {} {} ***", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let ini_path = if cli.config.is_some() {
        match app::resolve_config_file(&mut console, &dir, &file_name) {
            Some(path) => path,
            None => {
                tracing::info!("Quit");
                return Ok(());
            }
        }
    } else {
        dir.join(&file_name)
    };
    tracing::warn!("INI file is {}", ini_path.display());

    let mut app = App::new(console, ConfigStore::new(ini_path)).context("could not read the INI file")?;
    app.run();
    Ok(())
}
