use super::{ApplicationRegistry, ContainerRegistry, HostHandle, HostRegistry, RetryPolicy};
use crate::domain::{
    Application, ApplicationDraft, ApplicationId, Container, ContainerDescriptor, ContainerId,
    ContainerSpec, Host, HostClient, HostId, Result, ShipyardError,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Deadline and retry settings applied to every runtime call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallPolicy {
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

/// Result of `create_and_attach`.
///
/// The container exists even when attaching failed.
#[derive(Debug, Clone)]
pub struct Placement {
    pub container: Container,
    pub attach_error: Option<ShipyardError>,
}

/// Highest ids ever handed out, kept across restarts so deleted ids stay dead
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IdWatermarks {
    pub container: u64,
    pub application: u64,
}

#[derive(Debug, Default)]
pub struct TeardownReport {
    pub destroyed: Vec<ContainerId>,
    pub failed: Vec<(ContainerId, ShipyardError)>,
}

impl TeardownReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Sequences every workflow that spans hosts, containers and applications
pub struct Orchestrator {
    hosts: Arc<HostRegistry>,
    containers: Arc<ContainerRegistry>,
    applications: Arc<ApplicationRegistry>,
    policy: CallPolicy,
}

impl Orchestrator {
    pub fn new(
        hosts: Arc<HostRegistry>,
        containers: Arc<ContainerRegistry>,
        applications: Arc<ApplicationRegistry>,
        policy: CallPolicy,
    ) -> Self {
        Self {
            hosts,
            containers,
            applications,
            policy,
        }
    }

    /// Fresh, empty registries wired together
    pub fn with_policy(policy: CallPolicy) -> Self {
        let containers = Arc::new(ContainerRegistry::new());
        let applications = Arc::new(ApplicationRegistry::new());
        let hosts = Arc::new(HostRegistry::new(containers.clone(), applications.clone()));
        Self::new(hosts, containers, applications, policy)
    }

    pub fn hosts(&self) -> &Arc<HostRegistry> {
        &self.hosts
    }

    pub fn containers(&self) -> &Arc<ContainerRegistry> {
        &self.containers
    }

    pub fn applications(&self) -> &Arc<ApplicationRegistry> {
        &self.applications
    }

    pub fn policy(&self) -> CallPolicy {
        self.policy
    }

    // Hosts

    pub fn register_host(&self, host: Host, client: Arc<dyn HostClient>) -> Result<()> {
        self.hosts.register(host, client)
    }

    pub fn list_hosts(&self) -> Vec<Host> {
        self.hosts.list()
    }

    pub fn get_host(&self, id: &HostId) -> Result<Host> {
        self.hosts.get(id)
    }

    /// Reconciles the host's containers against its runtime and returns them.
    ///
    /// Containers that vanished from the runtime are detached from their
    /// application before being forgotten.
    pub fn host_containers(&self, id: &HostId) -> Result<Vec<Container>> {
        let timeout = self.policy.timeout;
        let reconciliation = self
            .policy
            .retry
            .run("list containers", || self.hosts.all_containers(id, timeout))?;

        Ok(reconciliation.containers)
    }

    /// Reconciles every host in parallel. One host failing does not stop the others.
    pub fn refresh_hosts(&self) -> Vec<(HostId, Result<Vec<Container>>)> {
        let ids = self.hosts.ids();
        thread::scope(|scope| {
            let workers: Vec<_> = ids
                .into_iter()
                .map(|id| scope.spawn(move || {
                    let result = self.host_containers(&id);
                    (id, result)
                }))
                .collect();

            workers
                .into_iter()
                .filter_map(|worker| match worker.join() {
                    Ok(outcome) => Some(outcome),
                    Err(_) => {
                        error!("Host refresh worker panicked");
                        None
                    }
                })
                .collect()
        })
    }

    /// Forgets a host that no longer has containers
    pub fn remove_host(&self, id: &HostId) -> Result<Host> {
        self.hosts.remove(id)
    }

    /// Destroys every container tracked on `host`, continuing past failures
    pub fn destroy_all_containers_for_host(&self, host: &HostId) -> Result<TeardownReport> {
        self.hosts.get(host)?;

        let mut report = TeardownReport::default();
        let targets = self.containers.by_host(host);
        info!("Destroying {} container(s) on {}", targets.len(), host);

        for container in targets {
            match self.destroy_container(container.id) {
                Ok(()) => report.destroyed.push(container.id),
                Err(e) => {
                    error!("Failed to destroy container {}: {}", container.id, e);
                    report.failed.push((container.id, e));
                }
            }
        }

        Ok(report)
    }

    // Containers

    pub fn list_containers(&self) -> Vec<Container> {
        self.containers.list()
    }

    pub fn get_container(&self, id: ContainerId) -> Result<Container> {
        self.containers.get(id)
    }

    /// Creates one unattached container on `host`.
    ///
    /// The container is recorded as pending first, then confirmed with the
    /// runtime id. If the runtime call fails the pending record is dropped.
    pub fn create_container(&self, host: &HostId, spec: &ContainerSpec) -> Result<Container> {
        if spec.image.trim().is_empty() {
            return Err(ShipyardError::Invalid {
                field: "image",
                reason: "must not be empty".into(),
            });
        }

        let handle = self.hosts.handle(host)?;
        let _guard = handle.exclusive();

        let pending = self.containers.add_pending(host, spec);
        info!("Creating container {} ({}) on {}", pending.id, spec.image, host);

        let created = self.create_on_runtime(&handle, &pending.runtime_name(), spec);
        let confirmed = created.and_then(|descriptor| self.containers.confirm(pending.id, &descriptor));

        match confirmed {
            Ok(container) => {
                info!(
                    "Container {} running on {} as {}",
                    container.id,
                    host,
                    container.runtime_id.as_deref().unwrap_or_default()
                );
                Ok(container)
            }
            Err(e) => {
                self.containers.remove(pending.id);
                warn!("Create of container {} on {} failed: {}", pending.id, host, e);
                Err(e)
            }
        }
    }

    /// A retried create first checks whether the previous attempt landed
    fn create_on_runtime(
        &self,
        handle: &HostHandle,
        name: &str,
        spec: &ContainerSpec,
    ) -> Result<ContainerDescriptor> {
        let timeout = self.policy.timeout;
        let mut first_attempt = true;

        self.policy.retry.run("create container", || {
            if !first_attempt {
                match handle.call(|client| client.inspect(name, timeout)) {
                    Ok(existing) => {
                        debug!("Container {} already exists from an earlier attempt", name);
                        return Ok(existing);
                    }
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
            }
            first_attempt = false;
            handle.call(|client| client.create_container(name, spec, timeout))
        })
    }

    /// Creates one container per host, hosts in parallel.
    ///
    /// Every host is checked before anything is created. On failure the
    /// containers that were created stay registered.
    pub fn create_containers(&self, spec: &ContainerSpec, hosts: &[HostId]) -> Result<Vec<Container>> {
        if hosts.is_empty() {
            return Err(ShipyardError::Invalid {
                field: "hosts",
                reason: "at least one host is required".into(),
            });
        }
        for host in hosts {
            self.hosts.get(host)?;
        }

        let results: Vec<Result<Container>> = thread::scope(|scope| {
            let workers: Vec<_> = hosts
                .iter()
                .map(|host| scope.spawn(move || self.create_container(host, spec)))
                .collect();

            workers
                .into_iter()
                .zip(hosts)
                .map(|(worker, host)| {
                    worker.join().unwrap_or_else(|_| {
                        Err(ShipyardError::Runtime {
                            host: host.clone(),
                            message: "create worker panicked".into(),
                        })
                    })
                })
                .collect()
        });

        results.into_iter().collect()
    }

    /// Creates a container on `host` and attaches it to `app`.
    ///
    /// A failed attach leaves the container running and unattached.
    pub fn create_and_attach(
        &self,
        host: &HostId,
        spec: &ContainerSpec,
        app: ApplicationId,
    ) -> Result<Placement> {
        self.applications.get(app)?;

        let container = self.create_container(host, spec)?;

        match self.attach(app, container.id) {
            Ok(()) => {
                let container = self.containers.get(container.id).unwrap_or(container);
                Ok(Placement {
                    container,
                    attach_error: None,
                })
            }
            Err(e) => {
                warn!(
                    "Container {} created but not attached to application {}: {}",
                    container.id, app, e
                );
                Ok(Placement {
                    container,
                    attach_error: Some(e),
                })
            }
        }
    }

    /// Removes a container from its host's runtime, then from the registry,
    /// then from its application.
    ///
    /// Unknown ids succeed: the container is already gone.
    pub fn destroy_container(&self, id: ContainerId) -> Result<()> {
        let container = match self.containers.get(id) {
            Ok(container) => container,
            Err(e) if e.is_not_found() => {
                debug!("Container {} already gone", id);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let handle = self.hosts.handle(&container.host)?;
        let removed = {
            let _guard = handle.exclusive();

            // Someone else may have destroyed it while we waited for the host
            let container = match self.containers.get(id) {
                Ok(container) => container,
                Err(_) => return Ok(()),
            };

            if let Some(runtime_id) = container.runtime_id.as_deref().filter(|r| !r.is_empty()) {
                let timeout = self.policy.timeout;
                self.policy.retry.run("destroy container", || {
                    handle.call(|client| client.destroy_container(runtime_id, timeout))
                })?;
            }

            self.containers.remove(id)
        };

        if let Some(app) = removed.and_then(|c| c.application) {
            self.applications.release(app, id);
        }

        info!("Destroyed container {} on {}", id, container.host);
        Ok(())
    }

    // Attachments

    /// Attaches an existing container to an application.
    ///
    /// Repeating the call is a no-op. A container attached to a different
    /// application is rejected with `AlreadyAttached`.
    pub fn attach(&self, app: ApplicationId, container: ContainerId) -> Result<()> {
        self.applications.with_locked(app, |guard| {
            self.containers.attach(container, app)?;
            if guard.attachments().attach(container) {
                debug!("Attached container {} to application {}", container, app);
            }
            Ok(())
        })
    }

    pub fn detach(&self, app: ApplicationId, container: ContainerId) -> Result<()> {
        self.applications.with_locked(app, |guard| {
            guard.attachments().detach(container);
            self.containers.detach(container, app);
            Ok(())
        })
    }

    /// Turns `app`'s attachments into `desired`, registry first.
    ///
    /// Nothing changes if any addition is rejected.
    fn apply_attachments(
        &self,
        id: ApplicationId,
        app: &mut Application,
        desired: &[ContainerId],
    ) -> Result<()> {
        let diff = app.diff(desired);

        let mut attached = Vec::with_capacity(diff.added.len());
        for container in &diff.added {
            if let Err(e) = self.containers.attach(*container, id) {
                for done in attached {
                    self.containers.detach(done, id);
                }
                return Err(e);
            }
            attached.push(*container);
        }

        for container in &diff.removed {
            self.containers.detach(*container, id);
            app.detach(*container);
        }
        for container in &diff.added {
            app.attach(*container);
        }
        app.reorder(desired);

        if !diff.is_empty() {
            info!(
                "Application {}: attached {:?}, detached {:?}",
                id, diff.added, diff.removed
            );
        }
        Ok(())
    }

    // Applications

    pub fn list_applications(&self) -> Vec<Application> {
        self.applications.list()
    }

    pub fn get_application(&self, id: ApplicationId) -> Result<Application> {
        self.applications.get(id)
    }

    /// Creates an application, attaching `draft.containers` when given
    pub fn create_application(&self, draft: &ApplicationDraft) -> Result<Application> {
        let app = self.applications.create(draft)?;

        let Some(desired) = draft.containers.as_deref() else {
            return Ok(app);
        };

        let attached = self.applications.with_locked(app.id, |guard| {
            let updated = guard.get().clone();
            guard.commit_with(updated, |updated| {
                self.apply_attachments(app.id, updated, desired)
            })?;
            Ok(guard.get().clone())
        });

        if attached.is_err() {
            let _ = self.applications.remove_with(app.id, |_| Ok(()));
        }
        attached
    }

    /// Replace-style update: every field is overwritten and, when
    /// `draft.containers` is set, attachments become exactly that list.
    pub fn update_application(
        &self,
        id: ApplicationId,
        draft: &ApplicationDraft,
    ) -> Result<Application> {
        self.applications.with_locked(id, |guard| {
            let mut updated = guard.get().clone();
            updated.apply(draft);

            guard.commit_with(updated, |updated| match draft.containers.as_deref() {
                Some(desired) => self.apply_attachments(id, updated, desired),
                None => Ok(()),
            })?;

            info!("Updated application {}", id);
            Ok(guard.get().clone())
        })
    }

    /// Deletes the application record. Its containers keep running, unattached.
    pub fn delete_application(&self, id: ApplicationId) -> Result<Application> {
        let (app, cleared) = self.applications.remove_with(id, |app| {
            let cleared = app.clear_attachments();
            for container in &cleared {
                self.containers.detach(*container, id);
            }
            Ok(cleared)
        })?;

        info!(
            "Deleted application {} ({}), released {} container(s)",
            id,
            app.name,
            cleared.len()
        );
        Ok(app)
    }

    /// The application's containers in attachment order
    pub fn application_containers(&self, id: ApplicationId) -> Result<Vec<Container>> {
        let app = self.applications.get(id)?;
        Ok(app
            .containers()
            .iter()
            .filter_map(|container| match self.containers.get(*container) {
                Ok(found) => Some(found),
                Err(_) => {
                    warn!(
                        "Application {} lists container {} which is not registered",
                        id, container
                    );
                    None
                }
            })
            .collect())
    }

    // Persistence

    pub fn watermarks(&self) -> IdWatermarks {
        IdWatermarks {
            container: self.containers.last_id(),
            application: self.applications.last_id(),
        }
    }

    /// Loads saved containers and applications. Hosts must be registered first.
    ///
    /// Both sides of every attachment have to agree, otherwise nothing is loaded.
    pub fn restore(
        &self,
        containers: Vec<Container>,
        applications: Vec<Application>,
        watermarks: IdWatermarks,
    ) -> Result<()> {
        for container in &containers {
            if !self.hosts.contains(&container.host) {
                return Err(ShipyardError::Invalid {
                    field: "containers",
                    reason: format!(
                        "container {} belongs to unknown host {}",
                        container.id, container.host
                    ),
                });
            }
        }

        for app in &applications {
            for attached in app.containers() {
                let owner = containers
                    .iter()
                    .find(|c| c.id == *attached)
                    .and_then(|c| c.application);
                if owner != Some(app.id) {
                    return Err(ShipyardError::Invalid {
                        field: "applications",
                        reason: format!(
                            "application {} lists container {} which is not attached to it",
                            app.id, attached
                        ),
                    });
                }
            }
        }

        for container in &containers {
            if let Some(app) = container.application {
                let listed = applications
                    .iter()
                    .any(|a| a.id == app && a.is_attached(container.id));
                if !listed {
                    return Err(ShipyardError::Invalid {
                        field: "containers",
                        reason: format!(
                            "container {} points at application {} which does not list it",
                            container.id, app
                        ),
                    });
                }
            }
        }

        self.containers.restore(containers, watermarks.container)?;
        self.applications.restore(applications, watermarks.application)?;
        info!(
            "Restored {} container(s) and {} application(s)",
            self.containers.list().len(),
            self.applications.list().len()
        );
        Ok(())
    }
}
