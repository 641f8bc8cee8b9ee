//! Record shapes exchanged with the HTTP layer.
//!
//! Entities are referenced by resource URI (`/api/v1/containers/3/`).
//! Read records always carry every field; input records leave optional
//! parts out.

use crate::domain::{
    Application, ApplicationDraft, ApplicationId, Container, ContainerId, ContainerSpec,
    ContainerState, Host, HostId, PortMapping, Protocol, Reachability, Result, ShipyardError,
};
use serde::{Deserialize, Serialize};

pub const API_PREFIX: &str = "/api/v1";

pub fn application_uri(id: ApplicationId) -> String {
    format!("{}/applications/{}/", API_PREFIX, id)
}

pub fn container_uri(id: ContainerId) -> String {
    format!("{}/containers/{}/", API_PREFIX, id)
}

pub fn host_uri(id: &HostId) -> String {
    format!("{}/hosts/{}/", API_PREFIX, id)
}

/// Extracts the trailing id from `/api/v1/<collection>/<id>/`; a bare id is accepted too
fn resource_id<'a>(reference: &'a str, collection: &str) -> Option<&'a str> {
    let trimmed = reference.trim().trim_end_matches('/');
    let prefix = format!("{}/{}/", API_PREFIX, collection);

    let id = match trimmed.strip_prefix(&prefix) {
        Some(rest) => rest,
        None if !trimmed.contains('/') => trimmed,
        None => return None,
    };

    (!id.is_empty() && !id.contains('/')).then_some(id)
}

pub fn parse_container_ref(reference: &str) -> Result<ContainerId> {
    resource_id(reference, "containers")
        .and_then(|id| id.parse::<u64>().ok())
        .map(ContainerId)
        .ok_or_else(|| ShipyardError::Invalid {
            field: "containers",
            reason: format!("'{}' is not a container reference", reference),
        })
}

pub fn parse_application_ref(reference: &str) -> Result<ApplicationId> {
    resource_id(reference, "applications")
        .and_then(|id| id.parse::<u64>().ok())
        .map(ApplicationId)
        .ok_or_else(|| ShipyardError::Invalid {
            field: "application",
            reason: format!("'{}' is not an application reference", reference),
        })
}

pub fn parse_host_ref(reference: &str) -> Result<HostId> {
    resource_id(reference, "hosts")
        .map(HostId::new)
        .ok_or_else(|| ShipyardError::Invalid {
            field: "hosts",
            reason: format!("'{}' is not a host reference", reference),
        })
}

/// Envelope for list responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse<T> {
    pub objects: Vec<T>,
}

impl<T> ListResponse<T> {
    pub fn new(objects: Vec<T>) -> Self {
        Self { objects }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub id: ApplicationId,
    pub resource_uri: String,
    pub name: String,
    pub description: String,
    pub domain_name: String,
    pub backend_port: u32,
    pub protocol: Protocol,
    pub containers: Vec<String>,
}

impl From<&Application> for ApplicationRecord {
    fn from(app: &Application) -> Self {
        Self {
            id: app.id,
            resource_uri: application_uri(app.id),
            name: app.name.clone(),
            description: app.description.clone(),
            domain_name: app.domain_name.clone(),
            backend_port: app.backend_port,
            protocol: app.protocol,
            containers: app.containers().iter().copied().map(container_uri).collect(),
        }
    }
}

/// Body of a create or replace-style update request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationInput {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub domain_name: String,
    pub backend_port: u32,
    #[serde(default)]
    pub protocol: Protocol,
    /// Omitted means "leave attachments as they are"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub containers: Option<Vec<String>>,
}

impl ApplicationInput {
    pub fn to_draft(&self) -> Result<ApplicationDraft> {
        let containers = match &self.containers {
            Some(refs) => Some(
                refs.iter()
                    .map(|r| parse_container_ref(r))
                    .collect::<Result<Vec<_>>>()?,
            ),
            None => None,
        };

        Ok(ApplicationDraft {
            name: self.name.clone(),
            description: self.description.clone(),
            domain_name: self.domain_name.clone(),
            backend_port: self.backend_port,
            protocol: self.protocol,
            containers,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub id: ContainerId,
    pub resource_uri: String,
    /// Runtime identifier, empty while pending
    pub container_id: String,
    pub state: String,
    pub image: String,
    pub command: String,
    pub description: String,
    pub ports: Vec<PortMapping>,
    pub host: String,
    pub application: Option<String>,
}

impl From<&Container> for ContainerRecord {
    fn from(container: &Container) -> Self {
        let state = match container.state() {
            ContainerState::Pending => "pending",
            ContainerState::Running => "running",
        };

        Self {
            id: container.id,
            resource_uri: container_uri(container.id),
            container_id: container.runtime_id.clone().unwrap_or_default(),
            state: state.to_string(),
            image: container.image.clone(),
            command: container.command.clone(),
            description: container.description.clone(),
            ports: container.ports.iter().copied().collect(),
            host: host_uri(&container.host),
            application: container.application.map(application_uri),
        }
    }
}

/// Body of a container create request: one container per listed host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInput {
    pub image: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    pub hosts: Vec<String>,
}

impl ContainerInput {
    pub fn to_spec(&self) -> ContainerSpec {
        ContainerSpec {
            image: self.image.clone(),
            command: self.command.clone(),
            description: self.description.clone(),
            ports: self.ports.iter().copied().collect(),
        }
    }

    pub fn host_ids(&self) -> Result<Vec<HostId>> {
        self.hosts.iter().map(|h| parse_host_ref(h)).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRecord {
    pub id: HostId,
    pub resource_uri: String,
    pub name: String,
    pub hostname: String,
    pub status: Reachability,
}

impl From<&Host> for HostRecord {
    fn from(host: &Host) -> Self {
        Self {
            id: host.id.clone(),
            resource_uri: host_uri(&host.id),
            name: host.name.clone(),
            hostname: host.address.clone(),
            status: host.status,
        }
    }
}
