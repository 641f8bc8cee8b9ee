use crate::infra::config::{DEFAULT_CONFIG_NAME, install_default_config};
use crate::infra::state_file::state_path;
use anyhow::Result;
use std::path::Path;
use tracing::info;

/// Prepares the config dir with a template `shipyard.toml`
pub fn install(config_dir: &Path) -> Result<()> {
    info!("Preparing config in {:?}", config_dir);

    install_default_config(config_dir)?;

    info!(
        "Config ready. Edit {:?} to add hosts; state is kept in {:?}",
        config_dir.join(DEFAULT_CONFIG_NAME),
        state_path(config_dir)
    );

    Ok(())
}
