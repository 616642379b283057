// Evquell CLI
// Suppresses events on one input device while another shows activity

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use evquell_core::config::{Config, ConfigFile};
use evquell_core::{daemon, device};

/// Input event suppression daemon.
///
/// Grabs the filter device exclusively, mirrors it onto a virtual clone, and
/// drops configured events while the monitor device shows recent activity.
/// Everything else on the system reads the clone instead of the original.
#[derive(Parser, Debug)]
#[command(name = "evquell", version, about)]
struct Args {
    /// TOML configuration file (default: ~/.config/evquell/config.toml)
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Device to watch for activity (path or exact name); overrides config
    #[arg(short, long, value_name = "DEVICE")]
    monitor: Option<String>,

    /// Device to suppress events on (path or exact name); overrides config
    #[arg(short, long, value_name = "DEVICE")]
    filter: Option<String>,

    /// Suppression window in milliseconds; overrides config
    #[arg(short, long, value_name = "MS")]
    idle_ms: Option<u64>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Validate config and exit
    #[arg(long)]
    check_config: bool,

    /// List available input devices
    #[arg(long)]
    list_devices: bool,
}

fn list_devices() -> anyhow::Result<()> {
    let devices = device::list_devices().context("enumerating input devices")?;
    if devices.is_empty() {
        println!("No openable input devices found (check membership of the input group).");
        return Ok(());
    }
    println!("Found {} input device(s):", devices.len());
    for device in &devices {
        println!("  {}: {}", device.path.display(), device.name);
    }
    Ok(())
}

/// Load the config file and fold the CLI overrides in, CLI winning.
fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut file = match &args.config {
        Some(path) => ConfigFile::from_path(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => match ConfigFile::default_path() {
            // The default file is optional; CLI flags alone may be enough.
            Some(path) if path.exists() => ConfigFile::from_path(&path)
                .with_context(|| format!("loading {}", path.display()))?,
            _ => ConfigFile::default(),
        },
    };

    if let Some(monitor) = &args.monitor {
        file.monitor.device = Some(monitor.clone());
    }
    if let Some(filter) = &args.filter {
        file.filter.device = Some(filter.clone());
    }
    if let Some(idle_ms) = args.idle_ms {
        file.idle_ms = Some(idle_ms);
    }

    file.resolve().context("invalid configuration")
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_default_env()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    if args.list_devices {
        return list_devices();
    }

    let config = load_config(&args)?;

    if args.check_config {
        println!("Configuration is valid");
        return Ok(());
    }

    // The handlers only set this flag; the dispatch loop observes it after
    // each bounded wait.
    let shutdown = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&shutdown))
        .context("installing SIGTERM handler")?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&shutdown))
        .context("installing SIGINT handler")?;

    daemon::run(&config, shutdown).context("evquell failed")?;
    Ok(())
}
