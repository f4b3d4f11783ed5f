use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use directories::ProjectDirs;
use env_logger::Env;
use log::info;
use miette::{IntoDiagnostic, Result};
use tokio_graceful_shutdown::{SubsystemBuilder, Toplevel};

mod authority;
mod config;
mod error;
mod router;

use config::Config;
use router::Router;

/// Inter-queue manager: relays ITS messages between a local broker and
/// its neighbours.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    #[clap(flatten)]
    verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,

    /// Path to the INI configuration file. Defaults to the platform
    /// config directory's `its-iqm.ini`.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "its-iqm").map(|dirs| dirs.config_dir().join("its-iqm.ini"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let log_level = args.verbose.log_level_filter();
    env_logger::Builder::from_env(Env::default()).filter_level(log_level).init();

    let config_path = args
        .config
        .or_else(default_config_path)
        .ok_or_else(|| miette::miette!("no config path given and no platform config directory available"))?;

    info!("its-iqm {} loading config from {}", its_core::VERSION, config_path.display());
    let config = Config::load(&config_path).into_diagnostic()?;

    let router = Router::new(config).into_diagnostic()?;

    Toplevel::new(|s| async move {
        s.start(SubsystemBuilder::new("iqm-router", move |h| router.run(h)));
    })
    .catch_signals()
    .handle_shutdown_requests(Duration::from_millis(5000))
    .await
    .map_err(Into::into)
}
