use super::error::{Result, ShipyardError};
use super::{ApplicationId, ContainerId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Https,
    Tcp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => write!(f, "http"),
            Self::Https => write!(f, "https"),
            Self::Tcp => write!(f, "tcp"),
        }
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            "tcp" => Ok(Self::Tcp),
            other => Err(format!("unknown protocol '{}' (expected http, https or tcp)", other)),
        }
    }
}

/// Caller-supplied application fields, used for both create and replace-style update
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ApplicationDraft {
    pub name: String,
    pub description: String,
    pub domain_name: String,
    pub backend_port: u32,
    pub protocol: Protocol,
    /// Desired attachments in order. `None` leaves attachments untouched on update.
    pub containers: Option<Vec<ContainerId>>,
}

/// Containers to attach and detach to turn one attachment list into another
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AttachmentDiff {
    pub added: Vec<ContainerId>,
    pub removed: Vec<ContainerId>,
}

impl AttachmentDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// A routable service identity with a non-owning, ordered set of containers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub domain_name: String,
    pub backend_port: u32,
    pub protocol: Protocol,
    #[serde(default)]
    containers: Vec<ContainerId>,
}

impl Application {
    pub fn new(id: ApplicationId, draft: &ApplicationDraft) -> Self {
        let mut app = Self {
            id,
            name: String::new(),
            description: String::new(),
            domain_name: String::new(),
            backend_port: 0,
            protocol: Protocol::default(),
            containers: Vec::new(),
        };
        app.apply(draft);
        app
    }

    /// Overwrites the scalar fields. Attachments are handled separately.
    pub fn apply(&mut self, draft: &ApplicationDraft) {
        self.name = draft.name.trim().to_string();
        self.description = draft.description.clone();
        self.domain_name = normalize_domain(&draft.domain_name);
        self.backend_port = draft.backend_port;
        self.protocol = draft.protocol;
    }

    pub fn containers(&self) -> &[ContainerId] {
        &self.containers
    }

    pub fn is_attached(&self, container: ContainerId) -> bool {
        self.containers.contains(&container)
    }

    /// Returns false when the container was already attached
    pub fn attach(&mut self, container: ContainerId) -> bool {
        if self.is_attached(container) {
            return false;
        }
        self.containers.push(container);
        true
    }

    /// Returns false when the container was not attached
    pub fn detach(&mut self, container: ContainerId) -> bool {
        let before = self.containers.len();
        self.containers.retain(|c| *c != container);
        before != self.containers.len()
    }

    pub fn clear_attachments(&mut self) -> Vec<ContainerId> {
        std::mem::take(&mut self.containers)
    }

    pub fn diff(&self, desired: &[ContainerId]) -> AttachmentDiff {
        let mut added = Vec::new();
        for id in desired {
            if !self.is_attached(*id) && !added.contains(id) {
                added.push(*id);
            }
        }

        let removed = self
            .containers
            .iter()
            .filter(|id| !desired.contains(id))
            .copied()
            .collect();

        AttachmentDiff { added, removed }
    }

    /// Reorders attachments to follow `desired`; ids not attached are skipped
    pub fn reorder(&mut self, desired: &[ContainerId]) {
        let mut ordered: Vec<ContainerId> = Vec::with_capacity(self.containers.len());
        for id in desired {
            if self.is_attached(*id) && !ordered.contains(id) {
                ordered.push(*id);
            }
        }
        for id in &self.containers {
            if !ordered.contains(id) {
                ordered.push(*id);
            }
        }
        self.containers = ordered;
    }

    /// Field validation plus domain uniqueness against `domains` (domain -> owner).
    ///
    /// The application's own entry in `domains` is not a conflict.
    pub fn validate(&self, domains: &HashMap<String, ApplicationId>) -> Result<()> {
        if self.name.is_empty() {
            return Err(ShipyardError::Invalid {
                field: "name",
                reason: "must not be empty".into(),
            });
        }

        if self.domain_name.is_empty() {
            return Err(ShipyardError::Invalid {
                field: "domain_name",
                reason: "must not be empty".into(),
            });
        }

        if self.domain_name.chars().any(char::is_whitespace) {
            return Err(ShipyardError::Invalid {
                field: "domain_name",
                reason: format!("'{}' contains whitespace", self.domain_name),
            });
        }

        if self.backend_port == 0 || self.backend_port > u16::MAX as u32 {
            return Err(ShipyardError::InvalidPort(self.backend_port));
        }

        match domains.get(&self.domain_name) {
            Some(owner) if *owner != self.id => {
                Err(ShipyardError::DuplicateDomain(self.domain_name.clone()))
            }
            _ => Ok(()),
        }
    }
}

/// Domains compare case-insensitively and without a trailing dot
pub fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_end_matches('.').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(name: &str, domain: &str, port: u32) -> ApplicationDraft {
        ApplicationDraft {
            name: name.to_string(),
            description: "test app".to_string(),
            domain_name: domain.to_string(),
            backend_port: port,
            protocol: Protocol::Http,
            containers: None,
        }
    }

    #[test]
    fn test_attach_is_idempotent() {
        let mut app = Application::new(ApplicationId(1), &draft("test-app", "test.example.com", 1234));

        assert!(app.attach(ContainerId(1)));
        assert!(!app.attach(ContainerId(1)));
        assert_eq!(app.containers(), &[ContainerId(1)]);
    }

    #[test]
    fn test_attach_preserves_insertion_order() {
        let mut app = Application::new(ApplicationId(1), &draft("a", "a.example.com", 80));
        app.attach(ContainerId(3));
        app.attach(ContainerId(1));
        app.attach(ContainerId(2));

        assert_eq!(app.containers(), &[ContainerId(3), ContainerId(1), ContainerId(2)]);

        assert!(app.detach(ContainerId(1)));
        assert!(!app.detach(ContainerId(1)));
        assert_eq!(app.containers(), &[ContainerId(3), ContainerId(2)]);
    }

    #[test]
    fn test_diff_against_desired_list() {
        let mut app = Application::new(ApplicationId(1), &draft("a", "a.example.com", 80));
        app.attach(ContainerId(1));
        app.attach(ContainerId(2));

        let diff = app.diff(&[ContainerId(2), ContainerId(3), ContainerId(3)]);
        assert_eq!(diff.added, vec![ContainerId(3)]);
        assert_eq!(diff.removed, vec![ContainerId(1)]);

        assert!(app.diff(&[ContainerId(1), ContainerId(2)]).is_empty());
    }

    #[test]
    fn test_reorder_follows_desired() {
        let mut app = Application::new(ApplicationId(1), &draft("a", "a.example.com", 80));
        app.attach(ContainerId(1));
        app.attach(ContainerId(2));
        app.attach(ContainerId(3));

        app.reorder(&[ContainerId(3), ContainerId(1), ContainerId(9)]);
        assert_eq!(app.containers(), &[ContainerId(3), ContainerId(1), ContainerId(2)]);
    }

    #[test]
    fn test_validate_rejects_bad_ports() {
        let domains = HashMap::new();

        let zero = Application::new(ApplicationId(1), &draft("a", "a.example.com", 0));
        assert_eq!(zero.validate(&domains), Err(ShipyardError::InvalidPort(0)));

        let huge = Application::new(ApplicationId(1), &draft("a", "a.example.com", 70000));
        assert_eq!(huge.validate(&domains), Err(ShipyardError::InvalidPort(70000)));

        let ok = Application::new(ApplicationId(1), &draft("a", "a.example.com", 65535));
        assert!(ok.validate(&domains).is_ok());
    }

    #[test]
    fn test_validate_domain_excludes_self() {
        let mut domains = HashMap::new();
        domains.insert("test.example.com".to_string(), ApplicationId(1));

        let same = Application::new(ApplicationId(1), &draft("a", "test.example.com", 80));
        assert!(same.validate(&domains).is_ok());

        let other = Application::new(ApplicationId(2), &draft("b", "TEST.example.com.", 80));
        assert_eq!(
            other.validate(&domains),
            Err(ShipyardError::DuplicateDomain("test.example.com".into()))
        );
    }

    #[test]
    fn test_validate_rejects_blank_fields() {
        let domains = HashMap::new();
        let blank_name = Application::new(ApplicationId(1), &draft("  ", "a.example.com", 80));
        assert!(matches!(
            blank_name.validate(&domains),
            Err(ShipyardError::Invalid { field: "name", .. })
        ));

        let blank_domain = Application::new(ApplicationId(1), &draft("a", "", 80));
        assert!(matches!(
            blank_domain.validate(&domains),
            Err(ShipyardError::Invalid { field: "domain_name", .. })
        ));
    }

    #[test]
    fn test_protocol_parsing() {
        assert_eq!("HTTPS".parse::<Protocol>(), Ok(Protocol::Https));
        assert_eq!(Protocol::Tcp.to_string(), "tcp");
        assert!("udp".parse::<Protocol>().is_err());
    }
}
