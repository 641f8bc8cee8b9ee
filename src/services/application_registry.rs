use crate::domain::{
    Application, ApplicationDraft, ApplicationId, ContainerId, Result, ShipyardError,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, info, warn};

type Entry = Arc<Mutex<Application>>;

/// Unique-field indices, claimed and released at commit time
#[derive(Debug, Default)]
struct Claims {
    domains: HashMap<String, ApplicationId>,
    names: HashMap<String, ApplicationId>,
}

impl Claims {
    fn check(&self, app: &Application) -> Result<()> {
        app.validate(&self.domains)?;
        match self.names.get(&app.name) {
            Some(owner) if *owner != app.id => Err(ShipyardError::Conflict(format!(
                "application name {} is taken by application {}",
                app.name, owner
            ))),
            _ => Ok(()),
        }
    }

    fn claim(&mut self, app: &Application) {
        self.domains.insert(app.domain_name.clone(), app.id);
        self.names.insert(app.name.clone(), app.id);
    }

    fn release(&mut self, app: &Application) {
        if self.domains.get(&app.domain_name) == Some(&app.id) {
            self.domains.remove(&app.domain_name);
        }
        if self.names.get(&app.name) == Some(&app.id) {
            self.names.remove(&app.name);
        }
    }
}

/// Live applications, each behind its own lock.
///
/// Lock order: an application's lock before `claims` before `apps`.
#[derive(Debug, Default)]
pub struct ApplicationRegistry {
    apps: RwLock<BTreeMap<ApplicationId, Entry>>,
    claims: Mutex<Claims>,
    next_id: Mutex<u64>,
}

/// An application locked for exclusive modification
pub struct ApplicationGuard<'a> {
    registry: &'a ApplicationRegistry,
    app: MutexGuard<'a, Application>,
}

impl ApplicationGuard<'_> {
    pub fn get(&self) -> &Application {
        &self.app
    }

    /// Attachment changes do not touch unique fields, so no commit is needed
    pub fn attachments(&mut self) -> &mut Application {
        &mut self.app
    }

    /// Validates `updated` against every other application and stores it
    pub fn commit(&mut self, updated: Application) -> Result<()> {
        self.commit_with(updated, |_| Ok(()))
    }

    /// Like `commit`, running `finish` on the validated application first.
    ///
    /// Unique fields stay claimed while `finish` runs, so nothing can take
    /// them between validation and storage. An error from `finish` aborts
    /// the commit.
    pub fn commit_with(
        &mut self,
        mut updated: Application,
        finish: impl FnOnce(&mut Application) -> Result<()>,
    ) -> Result<()> {
        let mut claims = self.registry.claims();
        claims.check(&updated)?;
        finish(&mut updated)?;
        claims.release(&self.app);
        claims.claim(&updated);
        *self.app = updated;
        Ok(())
    }
}

impl ApplicationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn claims(&self) -> MutexGuard<'_, Claims> {
        self.claims.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn entry(&self, id: ApplicationId) -> Result<Entry> {
        self.apps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or_else(|| ShipyardError::application_not_found(id))
    }

    fn is_live(&self, id: ApplicationId, entry: &Entry) -> bool {
        self.apps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .is_some_and(|current| Arc::ptr_eq(current, entry))
    }

    /// Validates and stores a new application with no attachments
    pub fn create(&self, draft: &ApplicationDraft) -> Result<Application> {
        let mut claims = self.claims();

        let mut next_id = self.next_id.lock().unwrap_or_else(PoisonError::into_inner);
        let app = Application::new(ApplicationId(*next_id + 1), draft);
        claims.check(&app)?;
        *next_id += 1;

        claims.claim(&app);
        self.apps
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(app.id, Arc::new(Mutex::new(app.clone())));

        info!("Created application {} ({}) for {}", app.id, app.name, app.domain_name);
        Ok(app)
    }

    pub fn get(&self, id: ApplicationId) -> Result<Application> {
        let entry = self.entry(id)?;
        let app = entry.lock().unwrap_or_else(PoisonError::into_inner).clone();
        Ok(app)
    }

    pub fn contains(&self, id: ApplicationId) -> bool {
        self.entry(id).is_ok()
    }

    /// All applications in id order
    pub fn list(&self) -> Vec<Application> {
        let entries: Vec<Entry> = self
            .apps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        entries
            .iter()
            .map(|entry| entry.lock().unwrap_or_else(PoisonError::into_inner).clone())
            .collect()
    }

    /// Runs `f` with the application locked; concurrent calls for the same id queue up
    pub fn with_locked<T>(
        &self,
        id: ApplicationId,
        f: impl FnOnce(&mut ApplicationGuard<'_>) -> Result<T>,
    ) -> Result<T> {
        let entry = self.entry(id)?;
        let app = entry.lock().unwrap_or_else(PoisonError::into_inner);

        // Deleted while we waited for the lock
        if !self.is_live(id, &entry) {
            return Err(ShipyardError::application_not_found(id));
        }

        let mut guard = ApplicationGuard {
            registry: self,
            app,
        };
        f(&mut guard)
    }

    /// Runs `f` with the application locked, then deletes it if `f` succeeded
    pub fn remove_with<T>(
        &self,
        id: ApplicationId,
        f: impl FnOnce(&mut Application) -> Result<T>,
    ) -> Result<(Application, T)> {
        let entry = self.entry(id)?;
        let mut app = entry.lock().unwrap_or_else(PoisonError::into_inner);

        if !self.is_live(id, &entry) {
            return Err(ShipyardError::application_not_found(id));
        }

        let out = f(&mut app)?;

        self.claims().release(&app);
        self.apps
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        debug!("Application {} removed", id);

        Ok((app.clone(), out))
    }

    /// Removes `container` from `app`'s attachments. A missing application is ignored.
    pub fn release(&self, app: ApplicationId, container: ContainerId) {
        let result = self.with_locked(app, |guard| Ok(guard.attachments().detach(container)));

        match result {
            Ok(true) => debug!("Detached container {} from application {}", container, app),
            Ok(false) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!("Could not detach container {} from {}: {}", container, app, e),
        }
    }

    pub fn snapshot(&self) -> Vec<Application> {
        self.list()
    }

    /// Highest id ever handed out, deleted applications included
    pub fn last_id(&self) -> u64 {
        *self.next_id.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the contents with saved applications, re-validating unique fields.
    ///
    /// New ids continue after `last_id` so deleted ids are never reused.
    pub fn restore(&self, applications: Vec<Application>, last_id: u64) -> Result<()> {
        let mut claims = Claims::default();
        let mut apps = BTreeMap::new();
        let mut max_id = last_id;

        for app in applications {
            claims.check(&app)?;
            claims.claim(&app);
            max_id = max_id.max(app.id.0);
            apps.insert(app.id, Arc::new(Mutex::new(app)));
        }

        *self.claims() = claims;
        *self.next_id.lock().unwrap_or_else(PoisonError::into_inner) = max_id;
        *self.apps.write().unwrap_or_else(PoisonError::into_inner) = apps;
        Ok(())
    }
}
