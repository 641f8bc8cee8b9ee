use crate::domain::{
    ApplicationId, Container, ContainerDescriptor, ContainerId, ContainerSpec, HostId, Result,
    ShipyardError,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct Inner {
    containers: BTreeMap<ContainerId, Container>,
    next_id: u64,
}

impl Inner {
    fn allocate(&mut self) -> ContainerId {
        self.next_id += 1;
        ContainerId(self.next_id)
    }

    fn runtime_id_owner(&self, runtime_id: &str) -> Option<ContainerId> {
        self.containers
            .values()
            .find(|c| c.runtime_id.as_deref() == Some(runtime_id))
            .map(|c| c.id)
    }
}

/// Outcome of merging a host's live listing into the registry
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    /// Everything tracked for the host afterwards, pending ones included
    pub containers: Vec<Container>,
    /// Tracked containers the runtime no longer has
    pub dropped: Vec<Container>,
    /// Runtime containers that were not tracked before
    pub adopted: Vec<ContainerId>,
}

/// Authoritative index of containers, keyed by `ContainerId`.
///
/// Host and application lookups are computed from the container records
/// themselves, so they cannot drift from the primary index.
#[derive(Debug, Default)]
pub struct ContainerRegistry {
    inner: RwLock<Inner>,
}

impl ContainerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts a container as-is. Duplicate keys or runtime ids are a `Conflict`.
    pub fn add(&self, container: Container) -> Result<()> {
        let mut inner = self.write();

        if inner.containers.contains_key(&container.id) {
            return Err(ShipyardError::Conflict(format!(
                "container {} already registered",
                container.id
            )));
        }

        if let Some(runtime_id) = container.runtime_id.as_deref() {
            if let Some(owner) = inner.runtime_id_owner(runtime_id) {
                return Err(ShipyardError::Conflict(format!(
                    "runtime id {} already registered as container {}",
                    runtime_id, owner
                )));
            }
        }

        inner.next_id = inner.next_id.max(container.id.0);
        debug!("Registered container {} on {}", container.id, container.host);
        inner.containers.insert(container.id, container);
        Ok(())
    }

    /// Records a container that is about to be created on `host`
    pub fn add_pending(&self, host: &HostId, spec: &ContainerSpec) -> Container {
        let mut inner = self.write();
        let id = inner.allocate();
        let container = Container::pending(id, host.clone(), spec);
        inner.containers.insert(id, container.clone());
        debug!("Container {} pending on {}", id, host);
        container
    }

    /// Stores the runtime identifier once the runtime confirmed the create
    pub fn confirm(&self, id: ContainerId, descriptor: &ContainerDescriptor) -> Result<Container> {
        let mut inner = self.write();

        if let Some(owner) = inner.runtime_id_owner(&descriptor.runtime_id) {
            if owner != id {
                return Err(ShipyardError::Conflict(format!(
                    "runtime id {} already registered as container {}",
                    descriptor.runtime_id, owner
                )));
            }
        }

        let container = inner
            .containers
            .get_mut(&id)
            .ok_or_else(|| ShipyardError::container_not_found(id))?;
        container.runtime_id = Some(descriptor.runtime_id.clone());
        Ok(container.clone())
    }

    pub fn get(&self, id: ContainerId) -> Result<Container> {
        self.read()
            .containers
            .get(&id)
            .cloned()
            .ok_or_else(|| ShipyardError::container_not_found(id))
    }

    pub fn contains(&self, id: ContainerId) -> bool {
        self.read().containers.contains_key(&id)
    }

    pub fn find_by_runtime_id(&self, runtime_id: &str) -> Option<Container> {
        self.read()
            .containers
            .values()
            .find(|c| c.runtime_id.as_deref() == Some(runtime_id))
            .cloned()
    }

    pub fn remove(&self, id: ContainerId) -> Option<Container> {
        let removed = self.write().containers.remove(&id);
        if removed.is_some() {
            debug!("Container {} removed from registry", id);
        }
        removed
    }

    pub fn list(&self) -> Vec<Container> {
        self.read().containers.values().cloned().collect()
    }

    pub fn by_host(&self, host: &HostId) -> Vec<Container> {
        self.read()
            .containers
            .values()
            .filter(|c| &c.host == host)
            .cloned()
            .collect()
    }

    pub fn count_by_host(&self, host: &HostId) -> usize {
        self.read()
            .containers
            .values()
            .filter(|c| &c.host == host)
            .count()
    }

    pub fn by_application(&self, application: ApplicationId) -> Vec<Container> {
        self.read()
            .containers
            .values()
            .filter(|c| c.application == Some(application))
            .cloned()
            .collect()
    }

    /// Marks `id` as attached to `application`.
    ///
    /// Attaching to the same application again is a no-op. A container
    /// attached elsewhere yields `AlreadyAttached`.
    pub fn attach(&self, id: ContainerId, application: ApplicationId) -> Result<()> {
        let mut inner = self.write();
        let container = inner
            .containers
            .get_mut(&id)
            .ok_or_else(|| ShipyardError::container_not_found(id))?;

        match container.application {
            Some(current) if current == application => Ok(()),
            Some(current) => Err(ShipyardError::AlreadyAttached {
                container: id,
                application: current,
            }),
            None => {
                container.application = Some(application);
                Ok(())
            }
        }
    }

    /// Checks what `attach` would do without changing anything
    pub fn check_attachable(&self, id: ContainerId, application: ApplicationId) -> Result<()> {
        let inner = self.read();
        let container = inner
            .containers
            .get(&id)
            .ok_or_else(|| ShipyardError::container_not_found(id))?;

        match container.application {
            Some(current) if current != application => Err(ShipyardError::AlreadyAttached {
                container: id,
                application: current,
            }),
            _ => Ok(()),
        }
    }

    /// Clears the link if `id` is attached to `application`. Returns whether it was.
    pub fn detach(&self, id: ContainerId, application: ApplicationId) -> bool {
        let mut inner = self.write();
        match inner.containers.get_mut(&id) {
            Some(container) if container.application == Some(application) => {
                container.application = None;
                true
            }
            _ => false,
        }
    }

    /// Merges `remote` (the host's live listing) into the registry.
    ///
    /// Pending containers are kept. Confirmed containers missing remotely
    /// are dropped. Unknown remote containers are adopted unattached.
    pub fn reconcile(&self, host: &HostId, remote: &[ContainerDescriptor]) -> Reconciliation {
        let mut inner = self.write();
        let live: HashSet<&str> = remote.iter().map(|d| d.runtime_id.as_str()).collect();

        let stale: Vec<ContainerId> = inner
            .containers
            .values()
            .filter(|c| &c.host == host && !c.is_pending())
            .filter(|c| {
                c.runtime_id
                    .as_deref()
                    .is_some_and(|runtime_id| !live.contains(runtime_id))
            })
            .map(|c| c.id)
            .collect();

        let mut dropped = Vec::with_capacity(stale.len());
        for id in stale {
            if let Some(container) = inner.containers.remove(&id) {
                warn!(
                    "Container {} ({}) is gone from {}, dropping it",
                    id,
                    container.runtime_id.as_deref().unwrap_or_default(),
                    host
                );
                dropped.push(container);
            }
        }

        let mut adopted = Vec::new();
        for descriptor in remote {
            match inner.runtime_id_owner(&descriptor.runtime_id) {
                Some(owner) => {
                    let container = &inner.containers[&owner];
                    if &container.host != host {
                        warn!(
                            "Runtime id {} on {} is already tracked on {}, ignoring",
                            descriptor.runtime_id, host, container.host
                        );
                    }
                }
                None => {
                    let id = inner.allocate();
                    info!(
                        "Adopting container {} ({}) found on {}",
                        descriptor.runtime_id, descriptor.name, host
                    );
                    inner
                        .containers
                        .insert(id, Container::adopted(id, host.clone(), descriptor));
                    adopted.push(id);
                }
            }
        }

        let containers = inner
            .containers
            .values()
            .filter(|c| &c.host == host)
            .cloned()
            .collect();

        Reconciliation {
            containers,
            dropped,
            adopted,
        }
    }

    pub fn snapshot(&self) -> Vec<Container> {
        self.list()
    }

    /// Highest id ever handed out, destroyed containers included
    pub fn last_id(&self) -> u64 {
        self.read().next_id
    }

    /// Replaces the registry contents with a previously saved snapshot.
    ///
    /// New ids continue after `last_id` so destroyed ids are never reused.
    pub fn restore(&self, containers: Vec<Container>, last_id: u64) -> Result<()> {
        let fresh = ContainerRegistry::new();
        for container in containers {
            fresh.add(container)?;
        }
        let mut restored = std::mem::take(&mut *fresh.write());
        restored.next_id = restored.next_id.max(last_id);
        *self.write() = restored;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(runtime_id: &str) -> ContainerDescriptor {
        ContainerDescriptor {
            runtime_id: runtime_id.to_string(),
            name: format!("n-{}", runtime_id),
            image: "base".to_string(),
            command: String::new(),
            ports: Default::default(),
            running: true,
        }
    }

    fn confirmed(registry: &ContainerRegistry, host: &HostId, runtime_id: &str) -> Container {
        let pending = registry.add_pending(host, &ContainerSpec::new("base"));
        registry.confirm(pending.id, &descriptor(runtime_id)).unwrap()
    }

    #[test]
    fn test_add_rejects_duplicate_runtime_id() {
        let registry = ContainerRegistry::new();
        let host = HostId::new("local");
        let first = confirmed(&registry, &host, "abc");

        let mut copy = first.clone();
        copy.id = ContainerId(99);
        assert!(matches!(registry.add(copy), Err(ShipyardError::Conflict(_))));

        assert!(matches!(registry.add(first), Err(ShipyardError::Conflict(_))));
    }

    #[test]
    fn test_confirm_rejects_runtime_id_owned_elsewhere() {
        let registry = ContainerRegistry::new();
        let host = HostId::new("local");
        confirmed(&registry, &host, "abc");

        let pending = registry.add_pending(&host, &ContainerSpec::new("base"));
        assert!(matches!(
            registry.confirm(pending.id, &descriptor("abc")),
            Err(ShipyardError::Conflict(_))
        ));
    }

    #[test]
    fn test_secondary_lookups() {
        let registry = ContainerRegistry::new();
        let a = HostId::new("a");
        let b = HostId::new("b");
        let c1 = confirmed(&registry, &a, "1");
        let c2 = confirmed(&registry, &a, "2");
        let c3 = confirmed(&registry, &b, "3");

        registry.attach(c1.id, ApplicationId(1)).unwrap();
        registry.attach(c3.id, ApplicationId(1)).unwrap();

        assert_eq!(registry.by_host(&a).len(), 2);
        assert_eq!(registry.count_by_host(&b), 1);
        let attached: Vec<_> = registry
            .by_application(ApplicationId(1))
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(attached, vec![c1.id, c3.id]);

        registry.remove(c1.id);
        assert_eq!(registry.by_application(ApplicationId(1)).len(), 1);
        assert!(registry.get(c2.id).is_ok());
    }

    #[test]
    fn test_attach_rules() {
        let registry = ContainerRegistry::new();
        let c = confirmed(&registry, &HostId::new("a"), "1");

        registry.attach(c.id, ApplicationId(1)).unwrap();
        registry.attach(c.id, ApplicationId(1)).unwrap();
        assert_eq!(
            registry.attach(c.id, ApplicationId(2)),
            Err(ShipyardError::AlreadyAttached {
                container: c.id,
                application: ApplicationId(1)
            })
        );
        assert!(registry.check_attachable(c.id, ApplicationId(2)).is_err());

        assert!(!registry.detach(c.id, ApplicationId(2)));
        assert!(registry.detach(c.id, ApplicationId(1)));
        assert!(registry.attach(ContainerId(404), ApplicationId(1)).is_err());
    }

    #[test]
    fn test_reconcile_drops_stale_keeps_pending_adopts_unknown() {
        let registry = ContainerRegistry::new();
        let host = HostId::new("local");
        let other = HostId::new("other");

        let kept = confirmed(&registry, &host, "keep");
        let stale = confirmed(&registry, &host, "gone");
        let pending = registry.add_pending(&host, &ContainerSpec::new("base"));
        let elsewhere = confirmed(&registry, &other, "far");

        let result = registry.reconcile(&host, &[descriptor("keep"), descriptor("new")]);

        assert_eq!(result.dropped.len(), 1);
        assert_eq!(result.dropped[0].id, stale.id);
        assert_eq!(result.adopted.len(), 1);

        let ids: Vec<_> = result.containers.iter().map(|c| c.id).collect();
        assert!(ids.contains(&kept.id));
        assert!(ids.contains(&pending.id));
        assert!(ids.contains(&result.adopted[0]));
        assert!(!ids.contains(&stale.id));

        assert!(registry.get(stale.id).is_err());
        assert!(registry.get(elsewhere.id).is_ok());
        let adopted = registry.get(result.adopted[0]).unwrap();
        assert_eq!(adopted.runtime_id.as_deref(), Some("new"));
        assert_eq!(adopted.application, None);
    }

    #[test]
    fn test_restore_replaces_contents() {
        let registry = ContainerRegistry::new();
        let host = HostId::new("local");
        let c = confirmed(&registry, &host, "x");
        let snapshot = registry.snapshot();

        let restored = ContainerRegistry::new();
        restored.restore(snapshot, registry.last_id()).unwrap();
        assert_eq!(restored.get(c.id).unwrap(), c);

        let next = restored.add_pending(&host, &ContainerSpec::new("base"));
        assert!(next.id > c.id);
    }

    #[test]
    fn test_restore_does_not_reuse_removed_ids() {
        let registry = ContainerRegistry::new();
        let host = HostId::new("local");
        let kept = confirmed(&registry, &host, "x");
        let gone = confirmed(&registry, &host, "y");
        registry.remove(gone.id);
        assert_eq!(registry.last_id(), gone.id.0);

        let restored = ContainerRegistry::new();
        restored.restore(registry.snapshot(), registry.last_id()).unwrap();
        let next = restored.add_pending(&host, &ContainerSpec::new("base"));
        assert!(next.id > gone.id);

        // A stale counter never goes below the live ids
        let behind = ContainerRegistry::new();
        behind.restore(registry.snapshot(), 0).unwrap();
        assert!(behind.add_pending(&host, &ContainerSpec::new("base")).id > kept.id);
    }
}
