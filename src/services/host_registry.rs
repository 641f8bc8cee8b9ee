use super::application_registry::ApplicationRegistry;
use super::container_registry::{ContainerRegistry, Reconciliation};
use crate::domain::{
    ClientResult, Host, HostClient, HostClientError, HostId, Reachability, Result, ShipyardError,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// A registered host together with its runtime client
#[derive(Debug)]
pub struct HostHandle {
    host: RwLock<Host>,
    client: Arc<dyn HostClient>,
    /// Serializes runtime operations against this host
    op_lock: Mutex<()>,
}

impl HostHandle {
    fn new(host: Host, client: Arc<dyn HostClient>) -> Self {
        Self {
            host: RwLock::new(host),
            client,
            op_lock: Mutex::new(()),
        }
    }

    pub fn host(&self) -> Host {
        self.host
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn id(&self) -> HostId {
        self.host().id
    }

    /// Holds this host's operation lock until the guard is dropped.
    ///
    /// Workflows hold it across a create/destroy/list sequence so they do
    /// not interleave with another workflow on the same host.
    pub fn exclusive(&self) -> MutexGuard<'_, ()> {
        self.op_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs one runtime call and records the host's reachability from its outcome
    pub fn call<T>(&self, op: impl FnOnce(&dyn HostClient) -> ClientResult<T>) -> Result<T> {
        let result = op(self.client.as_ref());

        let status = match &result {
            Err(HostClientError::Unreachable(_)) => Reachability::Unreachable,
            _ => Reachability::Reachable,
        };
        self.set_status(status);

        let id = self.id();
        result.map_err(|err| ShipyardError::from_client(&id, err))
    }

    fn set_status(&self, status: Reachability) {
        let mut host = self.host.write().unwrap_or_else(PoisonError::into_inner);
        if host.status != status {
            match status {
                Reachability::Unreachable => warn!("Host {} is unreachable", host.id),
                _ => info!("Host {} is {}", host.id, status),
            }
            host.status = status;
        }
    }
}

/// Known hosts and one runtime client per host
#[derive(Debug)]
pub struct HostRegistry {
    hosts: RwLock<BTreeMap<HostId, Arc<HostHandle>>>,
    containers: Arc<ContainerRegistry>,
    applications: Arc<ApplicationRegistry>,
}

impl HostRegistry {
    pub fn new(containers: Arc<ContainerRegistry>, applications: Arc<ApplicationRegistry>) -> Self {
        Self {
            hosts: RwLock::new(BTreeMap::new()),
            containers,
            applications,
        }
    }

    pub fn register(&self, host: Host, client: Arc<dyn HostClient>) -> Result<()> {
        let mut hosts = self.hosts.write().unwrap_or_else(PoisonError::into_inner);
        if hosts.contains_key(&host.id) {
            return Err(ShipyardError::Conflict(format!(
                "host {} already registered",
                host.id
            )));
        }

        info!("Registered host {} ({})", host.id, host.address);
        hosts.insert(host.id.clone(), Arc::new(HostHandle::new(host, client)));
        Ok(())
    }

    pub fn contains(&self, id: &HostId) -> bool {
        self.hosts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    pub fn get(&self, id: &HostId) -> Result<Host> {
        self.handle(id).map(|handle| handle.host())
    }

    pub fn handle(&self, id: &HostId) -> Result<Arc<HostHandle>> {
        self.hosts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| ShipyardError::host_not_found(id))
    }

    pub fn list(&self) -> Vec<Host> {
        self.hosts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|handle| handle.host())
            .collect()
    }

    pub fn ids(&self) -> Vec<HostId> {
        self.hosts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Lists the host's runtime and reconciles the registry against it.
    ///
    /// The runtime is authoritative for containers that have a runtime id;
    /// pending ones are kept as they are. Dropped containers are detached
    /// from their application before the host lock is released.
    pub fn all_containers(&self, id: &HostId, timeout: Duration) -> Result<Reconciliation> {
        let handle = self.handle(id)?;
        let _guard = handle.exclusive();

        let remote = handle.call(|client| client.list_containers(timeout))?;
        debug!("Host {} reports {} container(s)", id, remote.len());

        let reconciliation = self.containers.reconcile(id, &remote);
        for stale in &reconciliation.dropped {
            if let Some(app) = stale.application {
                self.applications.release(app, stale.id);
            }
        }

        Ok(reconciliation)
    }

    /// Forgets a host. Fails while any container still references it.
    pub fn remove(&self, id: &HostId) -> Result<Host> {
        let handle = self.handle(id)?;
        let _guard = handle.exclusive();

        let count = self.containers.count_by_host(id);
        if count > 0 {
            return Err(ShipyardError::HasActiveContainers {
                host: id.clone(),
                count,
            });
        }

        self.hosts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        info!("Removed host {}", id);
        Ok(handle.host())
    }

    pub fn snapshot(&self) -> Vec<Host> {
        self.list()
    }
}
