use anyhow::Result;
use clap::{Parser, Subcommand};
use shipyard::cli::{AppCommand, ContainerCommand, ControlPlane, HostCommand, app, container, host, setup};
use shipyard::infra::config::default_config_dir;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "shipyard",
    version,
    about = "Places containers on remote podman hosts and groups them into applications"
)]
struct Cli {
    /// Config directory (default: ~/.config/shipyard)
    #[arg(long, env = "SHIPYARD_CONFIG_DIR", default_value_os_t = default_config_dir())]
    config_dir: std::path::PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a template shipyard.toml into the config dir
    Init,
    /// Hosts running a podman service
    Host(HostCommand),
    /// Containers placed on hosts
    Container(ContainerCommand),
    /// Applications and their attached containers
    App(AppCommand),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Commands::Init = cli.command {
        return setup::install(&cli.config_dir);
    }

    let plane = ControlPlane::open(&cli.config_dir)?;

    match cli.command {
        Commands::Init => Ok(()),
        Commands::Host(cmd) => host::run(cmd, &plane),
        Commands::Container(cmd) => container::run(cmd, &plane),
        Commands::App(cmd) => app::run(cmd, &plane),
    }
}
