use crate::domain::{Host, HostId};
use crate::services::{CallPolicy, RetryPolicy};
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_CONFIG_NAME: &str = "shipyard.toml";
pub const DEFAULT_SHIPYARD_TOML: &str = include_str!("../../config/default_shipyard.toml");

const DEFAULT_PODMAN: &str = "podman";
const DEFAULT_SERVICE_PORT: u16 = 8888;

pub fn default_config_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/root"))
        .join(".config/shipyard")
}

pub fn ensure_config_dir(config_dir: &Path) -> Result<()> {
    fs::create_dir_all(config_dir).with_context(|| format!("creating {:?}", config_dir))
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct RuntimeConfig {
    pub podman: Option<String>,
    pub call_timeout: Option<String>,
    pub default_port: Option<u16>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct RetryConfig {
    pub max_attempts: Option<u32>,
    pub initial_backoff: Option<String>,
    pub max_backoff: Option<String>,
    pub multiplier: Option<u32>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    pub id: String,
    pub name: Option<String>,
    pub address: String,
    pub endpoint: Option<String>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Hosts defined as [[hosts]]
    #[serde(default)]
    pub hosts: Vec<HostConfig>,
}

impl AppConfig {
    /// Merges another AppConfig into self.
    /// Values from `other` overwrite values in `self` if present; hosts with
    /// the same id are replaced.
    pub fn merge(&mut self, other: AppConfig) {
        if let Some(podman) = other.runtime.podman {
            self.runtime.podman = Some(podman);
        }
        if let Some(timeout) = other.runtime.call_timeout {
            self.runtime.call_timeout = Some(timeout);
        }
        if let Some(port) = other.runtime.default_port {
            self.runtime.default_port = Some(port);
        }

        if let Some(attempts) = other.retry.max_attempts {
            self.retry.max_attempts = Some(attempts);
        }
        if let Some(backoff) = other.retry.initial_backoff {
            self.retry.initial_backoff = Some(backoff);
        }
        if let Some(backoff) = other.retry.max_backoff {
            self.retry.max_backoff = Some(backoff);
        }
        if let Some(multiplier) = other.retry.multiplier {
            self.retry.multiplier = Some(multiplier);
        }

        for host in other.hosts {
            match self.hosts.iter_mut().find(|h| h.id == host.id) {
                Some(existing) => *existing = host,
                None => self.hosts.push(host),
            }
        }
    }

    pub fn podman_binary(&self) -> &str {
        self.runtime.podman.as_deref().unwrap_or(DEFAULT_PODMAN)
    }

    pub fn default_port(&self) -> u16 {
        self.runtime.default_port.unwrap_or(DEFAULT_SERVICE_PORT)
    }

    pub fn call_policy(&self) -> Result<CallPolicy> {
        let defaults = CallPolicy::default();
        let retry_defaults = RetryPolicy::default();

        let timeout = optional_duration(self.runtime.call_timeout.as_deref(), "runtime.call_timeout")?
            .unwrap_or(defaults.timeout);
        if timeout.is_zero() {
            bail!("runtime.call_timeout must be greater than zero");
        }

        let max_attempts = self.retry.max_attempts.unwrap_or(retry_defaults.max_attempts);
        if max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }

        Ok(CallPolicy {
            timeout,
            retry: RetryPolicy {
                max_attempts,
                initial_backoff: optional_duration(
                    self.retry.initial_backoff.as_deref(),
                    "retry.initial_backoff",
                )?
                .unwrap_or(retry_defaults.initial_backoff),
                max_backoff: optional_duration(self.retry.max_backoff.as_deref(), "retry.max_backoff")?
                    .unwrap_or(retry_defaults.max_backoff),
                multiplier: self.retry.multiplier.unwrap_or(retry_defaults.multiplier),
            },
        })
    }

    /// Validated host definitions
    pub fn hosts(&self) -> Result<Vec<Host>> {
        let mut seen = HashSet::new();
        let mut hosts = Vec::with_capacity(self.hosts.len());

        for entry in &self.hosts {
            validate_host_id(&entry.id)?;

            if !seen.insert(entry.id.clone()) {
                bail!("Host '{}' defined more than once", entry.id);
            }

            if entry.address.trim().is_empty() {
                bail!("Host '{}' has no address", entry.id);
            }

            let name = entry.name.clone().unwrap_or_else(|| entry.id.clone());
            let mut host = Host::new(HostId::new(entry.id.clone()), name, entry.address.trim());
            host.endpoint = entry.endpoint.clone();
            hosts.push(host);
        }

        Ok(hosts)
    }
}

/// Host ids end up in resource URIs, so keep them path-safe
pub fn validate_host_id(id: &str) -> Result<()> {
    let Some(first) = id.chars().next() else {
        bail!("Empty host id");
    };

    if !first.is_ascii_alphanumeric() {
        bail!("Host id '{}' must start with a letter or digit", id);
    }

    for c in id.chars() {
        if !c.is_ascii_alphanumeric() && c != '_' && c != '.' && c != '-' {
            bail!("Host id '{}' contains invalid character '{}'", id, c);
        }
    }

    Ok(())
}

fn optional_duration(value: Option<&str>, field: &str) -> Result<Option<Duration>> {
    value
        .map(|v| parse_duration(v).with_context(|| format!("parsing {}", field)))
        .transpose()
}

/// Parses `250ms`, `10s` or `2m`
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if let Some(stripped) = s.strip_suffix("ms") {
        let millis: u64 = stripped.trim().parse()?;
        Ok(Duration::from_millis(millis))
    } else if let Some(stripped) = s.strip_suffix('s') {
        let secs: u64 = stripped.trim().parse()?;
        Ok(Duration::from_secs(secs))
    } else if let Some(stripped) = s.strip_suffix('m') {
        let mins: u64 = stripped.trim().parse()?;
        let secs = mins
            .checked_mul(60)
            .ok_or_else(|| anyhow::anyhow!("Duration too large: {}", s))?;
        Ok(Duration::from_secs(secs))
    } else {
        Err(anyhow::anyhow!("Invalid duration format: {}", s))
    }
}

fn read_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
    toml::from_str(&content).with_context(|| format!("parsing {:?}", path))
}

/// Loads `shipyard.toml` from `config_dir`, then overlays one in the working directory
pub fn load_app_config(config_dir: &Path) -> Result<AppConfig> {
    let mut app_config = AppConfig::default();

    let global_config_path = config_dir.join(DEFAULT_CONFIG_NAME);
    if global_config_path.exists() {
        debug!("Loading config from {:?}", global_config_path);
        app_config = read_config(&global_config_path)?;
    }

    let local_config_path = PathBuf::from("./").join(DEFAULT_CONFIG_NAME);
    if local_config_path.exists() && !same_file(&local_config_path, &global_config_path) {
        debug!("Overlaying config from {:?}", local_config_path);
        app_config.merge(read_config(&local_config_path)?);
    }

    Ok(app_config)
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Writes the default `shipyard.toml` unless one already exists
pub fn install_default_config(target_dir: &Path) -> Result<()> {
    ensure_config_dir(target_dir)?;

    let target = target_dir.join(DEFAULT_CONFIG_NAME);
    if target.exists() {
        info!("Keeping existing {:?}", target);
        return Ok(());
    }

    fs::write(&target, DEFAULT_SHIPYARD_TOML)
        .with_context(|| format!("writing template to {:?}", target))?;
    info!("Wrote {:?}", target);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let toml = r#"
[runtime]
podman = "/usr/bin/podman"
call_timeout = "3s"

[retry]
max_attempts = 5
initial_backoff = "50ms"

[[hosts]]
id = "local"
address = "127.0.0.1"

[[hosts]]
id = "edge-1"
name = "Edge 1"
address = "10.0.0.5"
endpoint = "ssh://core@10.0.0.5/run/podman/podman.sock"
"#;

        let config: AppConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.podman_binary(), "/usr/bin/podman");
        assert_eq!(config.default_port(), 8888);

        let policy = config.call_policy().unwrap();
        assert_eq!(policy.timeout, Duration::from_secs(3));
        assert_eq!(policy.retry.max_attempts, 5);
        assert_eq!(policy.retry.initial_backoff, Duration::from_millis(50));
        assert_eq!(policy.retry.max_backoff, RetryPolicy::default().max_backoff);

        let hosts = config.hosts().unwrap();
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[0].name, "local");
        assert_eq!(hosts[1].name, "Edge 1");
        assert!(hosts[1].endpoint.is_some());
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.call_policy().unwrap(), CallPolicy::default());
        assert!(config.hosts().unwrap().is_empty());
    }

    #[test]
    fn rejects_host_without_address() {
        let toml = r#"
[[hosts]]
id = "local"
"#;
        assert!(toml::from_str::<AppConfig>(toml).is_err());
    }

    #[test]
    fn rejects_bad_host_ids_and_duplicates() {
        let mut config = AppConfig::default();
        config.hosts.push(HostConfig {
            id: "-bad".into(),
            name: None,
            address: "1.2.3.4".into(),
            endpoint: None,
        });
        assert!(config.hosts().is_err());

        config.hosts = vec![
            HostConfig {
                id: "a".into(),
                name: None,
                address: "1.2.3.4".into(),
                endpoint: None,
            };
            2
        ];
        assert!(config.hosts().is_err());

        assert!(validate_host_id("edge/1").is_err());
        assert!(validate_host_id("edge_1.lan").is_ok());
    }

    #[test]
    fn rejects_bad_durations() {
        let mut config = AppConfig::default();
        config.runtime.call_timeout = Some("soon".into());
        assert!(config.call_policy().is_err());

        config.runtime.call_timeout = Some("0s".into());
        assert!(config.call_policy().is_err());
    }

    #[test]
    fn parses_durations() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration(" 10s ").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert!(parse_duration("10h").is_err());
    }

    #[test]
    fn rejects_minutes_that_overflow() {
        let err = parse_duration(&format!("{}m", u64::MAX)).unwrap_err();
        assert!(err.to_string().contains("too large"));
        assert_eq!(
            parse_duration(&format!("{}m", u64::MAX / 60)).unwrap(),
            Duration::from_secs(u64::MAX / 60 * 60)
        );
    }

    #[test]
    fn merges_hosts_by_id() {
        let mut base: AppConfig = toml::from_str(
            r#"
[runtime]
call_timeout = "5s"
[[hosts]]
id = "local"
address = "127.0.0.1"
"#,
        )
        .unwrap();

        let overlay: AppConfig = toml::from_str(
            r#"
[[hosts]]
id = "local"
address = "192.168.1.2"
[[hosts]]
id = "edge"
address = "10.0.0.1"
"#,
        )
        .unwrap();

        base.merge(overlay);
        assert_eq!(base.hosts.len(), 2);
        assert_eq!(base.hosts[0].address, "192.168.1.2");
        assert_eq!(base.runtime.call_timeout.as_deref(), Some("5s"));
    }

    #[test]
    fn installs_default_config() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("conf");

        install_default_config(&target).unwrap();

        let content = fs::read_to_string(target.join(DEFAULT_CONFIG_NAME)).unwrap();
        assert_eq!(content, DEFAULT_SHIPYARD_TOML);

        let parsed: AppConfig = toml::from_str(&content).unwrap();
        assert_eq!(parsed.hosts().unwrap()[0].id, HostId::new("local"));
        assert!(parsed.call_policy().is_ok());
    }
}
