use super::{ApplicationId, ContainerId, HostId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    /// Recorded locally, runtime create call not yet confirmed
    Pending,
    Running,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PortMapping {
    pub host_port: u16,
    pub container_port: u16,
}

impl PortMapping {
    pub fn new(host_port: u16, container_port: u16) -> Self {
        Self {
            host_port,
            container_port,
        }
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host_port, self.container_port)
    }
}

impl FromStr for PortMapping {
    type Err = String;

    /// Parses `HOST:CONTAINER`, or a bare `PORT` for identical ports
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |p: &str| {
            p.trim()
                .parse::<u16>()
                .map_err(|_| format!("invalid port '{}' in mapping '{}'", p, s))
        };

        match s.split_once(':') {
            Some((host, container)) => Ok(Self::new(parse(host)?, parse(container)?)),
            None => {
                let port = parse(s)?;
                Ok(Self::new(port, port))
            }
        }
    }
}

/// What the caller asks the runtime to run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub image: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub ports: BTreeSet<PortMapping>,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Self::default()
        }
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_port(mut self, mapping: PortMapping) -> Self {
        self.ports.insert(mapping);
        self
    }
}

/// A container as reported by a host's runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerDescriptor {
    pub runtime_id: String,
    pub name: String,
    pub image: String,
    pub command: String,
    pub ports: BTreeSet<PortMapping>,
    pub running: bool,
}

/// A container tracked by the control plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub id: ContainerId,
    /// Runtime-assigned identifier, `None` while pending creation
    #[serde(default)]
    pub runtime_id: Option<String>,
    pub host: HostId,
    pub image: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub ports: BTreeSet<PortMapping>,
    #[serde(default)]
    pub application: Option<ApplicationId>,
}

impl Container {
    pub fn pending(id: ContainerId, host: HostId, spec: &ContainerSpec) -> Self {
        Self {
            id,
            runtime_id: None,
            host,
            image: spec.image.clone(),
            command: spec.command.clone(),
            description: spec.description.clone(),
            ports: spec.ports.clone(),
            application: None,
        }
    }

    /// Builds a record for a container found on the runtime but never tracked here
    pub fn adopted(id: ContainerId, host: HostId, descriptor: &ContainerDescriptor) -> Self {
        Self {
            id,
            runtime_id: Some(descriptor.runtime_id.clone()),
            host,
            image: descriptor.image.clone(),
            command: descriptor.command.clone(),
            description: format!("adopted from runtime ({})", descriptor.name),
            ports: descriptor.ports.clone(),
            application: None,
        }
    }

    pub fn state(&self) -> ContainerState {
        match self.runtime_id.as_deref() {
            Some(id) if !id.is_empty() => ContainerState::Running,
            _ => ContainerState::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state() == ContainerState::Pending
    }

    /// Name given to the container on the runtime
    pub fn runtime_name(&self) -> String {
        runtime_name(self.id)
    }
}

pub fn runtime_name(id: ContainerId) -> String {
    format!("shipyard-{}", id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_mapping_parsing() {
        assert_eq!(
            "8080:80".parse::<PortMapping>().unwrap(),
            PortMapping::new(8080, 80)
        );
        assert_eq!(
            "5432".parse::<PortMapping>().unwrap(),
            PortMapping::new(5432, 5432)
        );
        assert!("80:http".parse::<PortMapping>().is_err());
        assert!("70000:80".parse::<PortMapping>().is_err());
    }

    #[test]
    fn test_state_follows_runtime_id() {
        let spec = ContainerSpec::new("base").with_command("/bin/bash");
        let mut container = Container::pending(ContainerId(1), HostId::new("local"), &spec);
        assert_eq!(container.state(), ContainerState::Pending);

        container.runtime_id = Some(String::new());
        assert!(container.is_pending());

        container.runtime_id = Some("abc123".into());
        assert_eq!(container.state(), ContainerState::Running);
    }

    #[test]
    fn test_spec_ports_are_a_set() {
        let spec = ContainerSpec::new("nginx")
            .with_port(PortMapping::new(80, 80))
            .with_port(PortMapping::new(80, 80));
        assert_eq!(spec.ports.len(), 1);
    }

    #[test]
    fn test_runtime_name() {
        let container =
            Container::pending(ContainerId(42), HostId::new("local"), &ContainerSpec::new("x"));
        assert_eq!(container.runtime_name(), "shipyard-42");
    }
}
