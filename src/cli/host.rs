use super::context::{ControlPlane, Outcome};
use crate::api::{ContainerRecord, HostRecord, ListResponse, container_uri, host_uri, parse_host_ref};
use crate::domain::{Host, HostId};
use crate::infra::config::validate_host_id;
use anyhow::{Result, bail};
use clap::{Args, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct HostCommand {
    #[command(subcommand)]
    pub action: HostAction,
}

#[derive(Subcommand, Debug)]
pub enum HostAction {
    /// List known hosts
    List,
    /// Register a host running a podman service
    Add {
        id: String,
        /// Hostname or IP address
        #[arg(long)]
        address: String,
        #[arg(long)]
        name: Option<String>,
        /// Runtime endpoint, e.g. ssh://core@host/run/podman/podman.sock
        #[arg(long)]
        endpoint: Option<String>,
    },
    /// Reconcile and list the containers on a host
    Containers { host: String },
    /// Forget a host that has no containers left
    Remove { host: String },
    /// Destroy every container on a host
    Teardown { host: String },
    /// Reconcile every host
    Refresh,
}

#[derive(Serialize)]
struct TeardownOutput {
    host: String,
    destroyed: Vec<String>,
    failed: Vec<FailureOutput>,
}

#[derive(Serialize)]
struct FailureOutput {
    container: String,
    error: String,
}

#[derive(Serialize)]
struct RefreshOutput {
    host: String,
    status: String,
    containers: Option<usize>,
    error: Option<String>,
}

pub fn run(cmd: HostCommand, plane: &ControlPlane) -> Result<()> {
    plane.conclude(execute(cmd.action, plane))
}

pub fn execute(action: HostAction, plane: &ControlPlane) -> Result<Outcome> {
    let orchestrator = plane.orchestrator();

    match action {
        HostAction::List => {
            let hosts: Vec<HostRecord> = orchestrator.list_hosts().iter().map(HostRecord::from).collect();
            Outcome::read(ListResponse::new(hosts))
        }
        HostAction::Add {
            id,
            address,
            name,
            endpoint,
        } => {
            validate_host_id(&id)?;
            if address.trim().is_empty() {
                bail!("Host '{}' needs an address", id);
            }

            let mut host = Host::new(HostId::new(id.clone()), name.unwrap_or(id), address.trim());
            host.endpoint = endpoint;

            orchestrator.register_host(host.clone(), plane.client_for(&host))?;
            Outcome::changed(HostRecord::from(&orchestrator.get_host(&host.id)?))
        }
        HostAction::Containers { host } => {
            let id = parse_host_ref(&host)?;
            let containers = orchestrator.host_containers(&id)?;
            let records: Vec<ContainerRecord> = containers.iter().map(ContainerRecord::from).collect();
            Outcome::changed(ListResponse::new(records))
        }
        HostAction::Remove { host } => {
            let id = parse_host_ref(&host)?;
            let removed = orchestrator.remove_host(&id)?;
            if plane.is_configured_host(&removed) {
                warn!(
                    "Host {} is still defined in the config and will be registered again",
                    removed.id
                );
            }
            Outcome::changed(HostRecord::from(&removed))
        }
        HostAction::Teardown { host } => {
            let id = parse_host_ref(&host)?;
            let report = orchestrator.destroy_all_containers_for_host(&id)?;
            info!(
                "Teardown of {}: {} destroyed, {} failed",
                id,
                report.destroyed.len(),
                report.failed.len()
            );

            Outcome::changed(TeardownOutput {
                host: host_uri(&id),
                destroyed: report.destroyed.iter().copied().map(container_uri).collect(),
                failed: report
                    .failed
                    .iter()
                    .map(|(container, err)| FailureOutput {
                        container: container_uri(*container),
                        error: err.to_string(),
                    })
                    .collect(),
            })
        }
        HostAction::Refresh => {
            let results = orchestrator.refresh_hosts();
            let mut output = Vec::with_capacity(results.len());

            for (id, result) in results {
                let status = orchestrator
                    .get_host(&id)
                    .map(|h| h.status.to_string())
                    .unwrap_or_default();
                let (containers, error) = match result {
                    Ok(containers) => (Some(containers.len()), None),
                    Err(e) => {
                        warn!("Refresh of {} failed: {}", id, e);
                        (None, Some(e.to_string()))
                    }
                };
                output.push(RefreshOutput {
                    host: host_uri(&id),
                    status,
                    containers,
                    error,
                });
            }

            Outcome::changed(ListResponse::new(output))
        }
    }
}
