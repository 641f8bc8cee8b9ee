use super::{ApplicationId, ContainerId, HostId};
use thiserror::Error;

/// Failure of a single remote runtime call, before host context is attached
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HostClientError {
    /// Network failure or deadline exceeded. Says nothing about remote state.
    #[error("runtime unreachable: {0}")]
    Unreachable(String),
    #[error("runtime rejected request: {0}")]
    Runtime(String),
    #[error("no such container: {0}")]
    NotFound(String),
}

pub type ClientResult<T> = std::result::Result<T, HostClientError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ShipyardError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("host {host} unreachable: {reason}")]
    Unreachable { host: HostId, reason: String },

    #[error("host {host} runtime error: {message}")]
    Runtime { host: HostId, message: String },

    #[error("host {host} still has {count} container(s)")]
    HasActiveContainers { host: HostId, count: usize },

    #[error("container {container} is already attached to application {application}")]
    AlreadyAttached {
        container: ContainerId,
        application: ApplicationId,
    },

    #[error("invalid backend port {0} (expected 1-65535)")]
    InvalidPort(u32),

    #[error("domain {0} is already used by another application")]
    DuplicateDomain(String),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ShipyardError {
    pub fn host_not_found(id: &HostId) -> Self {
        Self::NotFound {
            kind: "host",
            id: id.to_string(),
        }
    }

    pub fn container_not_found(id: ContainerId) -> Self {
        Self::NotFound {
            kind: "container",
            id: id.to_string(),
        }
    }

    pub fn application_not_found(id: ApplicationId) -> Self {
        Self::NotFound {
            kind: "application",
            id: id.to_string(),
        }
    }

    /// Attaches host context to a runtime call failure
    pub fn from_client(host: &HostId, err: HostClientError) -> Self {
        match err {
            HostClientError::Unreachable(reason) => Self::Unreachable {
                host: host.clone(),
                reason,
            },
            HostClientError::Runtime(message) => Self::Runtime {
                host: host.clone(),
                message,
            },
            HostClientError::NotFound(id) => Self::NotFound {
                kind: "runtime container",
                id,
            },
        }
    }

    /// Only network failures are worth another attempt
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, ShipyardError>;
