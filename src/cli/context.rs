use crate::domain::{Host, HostClient};
use crate::infra::config::{AppConfig, load_app_config};
use crate::infra::state_file::{Snapshot, load_snapshot, save_snapshot};
use crate::infra::PodmanHostClient;
use crate::services::{IdWatermarks, Orchestrator};
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Builds the runtime client for a host
pub type ClientFactory = dyn Fn(&Host) -> Arc<dyn HostClient>;

/// What a command produced: the JSON to print and whether state changed
#[derive(Debug)]
pub struct Outcome {
    pub output: serde_json::Value,
    pub mutated: bool,
}

impl Outcome {
    pub fn read(value: impl Serialize) -> Result<Self> {
        Ok(Self {
            output: serde_json::to_value(value).context("serializing output")?,
            mutated: false,
        })
    }

    pub fn changed(value: impl Serialize) -> Result<Self> {
        Ok(Self {
            output: serde_json::to_value(value).context("serializing output")?,
            mutated: true,
        })
    }
}

/// Config, saved state and the orchestrator built from them
pub struct ControlPlane {
    config_dir: PathBuf,
    config: AppConfig,
    orchestrator: Orchestrator,
    factory: Box<ClientFactory>,
}

impl ControlPlane {
    /// Opens the control plane with podman-backed clients
    pub fn open(config_dir: &Path) -> Result<Self> {
        let config = load_app_config(config_dir)?;
        let binary = config.podman_binary().to_string();
        let port = config.default_port();

        Self::open_with(config_dir, config, move |host: &Host| -> Arc<dyn HostClient> {
            Arc::new(PodmanHostClient::for_host(&binary, host, port))
        })
    }

    /// Opens the control plane with a caller-supplied client per host.
    ///
    /// Hosts come from the config and from saved state; the config wins on
    /// address and endpoint, saved state keeps the last known reachability.
    pub fn open_with(
        config_dir: &Path,
        config: AppConfig,
        factory: impl Fn(&Host) -> Arc<dyn HostClient> + 'static,
    ) -> Result<Self> {
        let orchestrator = Orchestrator::with_policy(config.call_policy()?);
        let snapshot = load_snapshot(config_dir)?;

        let mut hosts = config.hosts()?;
        for saved in &snapshot.hosts {
            match hosts.iter_mut().find(|h| h.id == saved.id) {
                Some(configured) => configured.status = saved.status,
                None => hosts.push(saved.clone()),
            }
        }

        for host in hosts {
            let client = factory(&host);
            debug!("Host {} uses {:?}", host.id, client);
            orchestrator
                .register_host(host, client)
                .context("registering hosts")?;
        }

        let watermarks = IdWatermarks {
            container: snapshot.last_container_id,
            application: snapshot.last_application_id,
        };
        orchestrator
            .restore(snapshot.containers, snapshot.applications, watermarks)
            .context("restoring saved state")?;

        Ok(Self {
            config_dir: config_dir.to_path_buf(),
            config,
            orchestrator,
            factory: Box::new(factory),
        })
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn client_for(&self, host: &Host) -> Arc<dyn HostClient> {
        (self.factory)(host)
    }

    pub fn is_configured_host(&self, host: &Host) -> bool {
        self.config.hosts.iter().any(|h| h.id == host.id.as_str())
    }

    pub fn snapshot(&self) -> Snapshot {
        let watermarks = self.orchestrator.watermarks();
        Snapshot {
            hosts: self.orchestrator.list_hosts(),
            containers: self.orchestrator.list_containers(),
            applications: self.orchestrator.list_applications(),
            last_container_id: watermarks.container,
            last_application_id: watermarks.application,
            ..Snapshot::default()
        }
    }

    pub fn save(&self) -> Result<()> {
        save_snapshot(&self.config_dir, &self.snapshot())
    }

    /// Saves if the command changed anything, then prints its output.
    ///
    /// A failed command may still have created or dropped containers, so
    /// state is saved before the error is returned.
    pub fn conclude(&self, result: Result<Outcome>) -> Result<()> {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                self.save()?;
                return Err(e);
            }
        };

        if outcome.mutated {
            self.save()?;
        }
        let rendered =
            serde_json::to_string_pretty(&outcome.output).context("rendering output")?;
        println!("{}", rendered);
        Ok(())
    }
}
