//! drowsed — the drowse daemon.
//!
//! # Usage
//!
//! ```text
//! drowsed run --config /etc/drowse/drowse.toml --proxy-port 8080
//! drowsed check-config --config /etc/drowse/drowse.toml
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use drowsed::{DaemonConfig, LogFormat};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "drowsed", about = "Idle application sleeper and wake proxy")]
struct Cli {
    /// Path to drowse.toml; defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the watcher, wake proxy, and admin API.
    Run {
        /// Port for intercepted application traffic.
        #[arg(long)]
        proxy_port: Option<u16>,

        /// Port for the internal admin API.
        #[arg(long)]
        admin_port: Option<u16>,

        /// Data directory for persistent state.
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Validate the configuration and print the effective values.
    CheckConfig,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<DaemonConfig> {
    match path {
        Some(path) => DaemonConfig::from_file(path),
        None => Ok(DaemonConfig::default()),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,drowsed=debug,drowse=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_ref())?;
    init_tracing(config.log_format);

    match cli.command {
        Command::Run {
            proxy_port,
            admin_port,
            data_dir,
        } => {
            if let Some(port) = proxy_port {
                config.proxy_port = port;
            }
            if let Some(port) = admin_port {
                config.admin_port = port;
            }
            if let Some(dir) = data_dir {
                config.data_dir = dir;
            }
            drowsed::daemon::run(config).await
        }
        Command::CheckConfig => {
            config.validate()?;
            println!("{}", toml::to_string_pretty(&config.redacted())?);
            Ok(())
        }
    }
}
