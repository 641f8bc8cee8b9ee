use crate::domain::{Application, Container, Host};
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const STATE_FILE_NAME: &str = "state.json";
const STATE_VERSION: u32 = 1;

/// Everything the control plane knows, as saved between CLI invocations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    #[serde(default)]
    pub hosts: Vec<Host>,
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default)]
    pub applications: Vec<Application>,
    /// Highest container id ever handed out
    #[serde(default)]
    pub last_container_id: u64,
    /// Highest application id ever handed out
    #[serde(default)]
    pub last_application_id: u64,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            hosts: Vec::new(),
            containers: Vec::new(),
            applications: Vec::new(),
            last_container_id: 0,
            last_application_id: 0,
        }
    }
}

pub fn state_path(config_dir: &Path) -> PathBuf {
    config_dir.join(STATE_FILE_NAME)
}

/// Reads the saved snapshot; a missing file is an empty one
pub fn load_snapshot(config_dir: &Path) -> Result<Snapshot> {
    let path = state_path(config_dir);
    if !path.exists() {
        debug!("No state at {:?}, starting empty", path);
        return Ok(Snapshot::default());
    }

    let content = fs::read_to_string(&path).with_context(|| format!("reading {:?}", path))?;
    let snapshot: Snapshot =
        serde_json::from_str(&content).with_context(|| format!("parsing {:?}", path))?;

    if snapshot.version != STATE_VERSION {
        bail!(
            "{:?} has state version {}, expected {}",
            path,
            snapshot.version,
            STATE_VERSION
        );
    }

    Ok(snapshot)
}

/// Writes the snapshot next to the config, replacing the previous one atomically
pub fn save_snapshot(config_dir: &Path, snapshot: &Snapshot) -> Result<()> {
    fs::create_dir_all(config_dir).with_context(|| format!("creating {:?}", config_dir))?;

    let path = state_path(config_dir);
    let tmp = path.with_extension("json.tmp");
    let content = serde_json::to_string_pretty(snapshot).context("serializing state")?;

    fs::write(&tmp, content).with_context(|| format!("writing {:?}", tmp))?;
    fs::rename(&tmp, &path).with_context(|| format!("replacing {:?}", path))?;

    debug!(
        "Saved {} host(s), {} container(s), {} application(s) to {:?}",
        snapshot.hosts.len(),
        snapshot.containers.len(),
        snapshot.applications.len(),
        path
    );
    Ok(())
}
