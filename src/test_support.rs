use crate::domain::{
    ClientResult, ContainerDescriptor, ContainerSpec, HostClient, HostClientError,
};
use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Clone)]
struct ScriptedFailure {
    operation: String,
    error: HostClientError,
    /// `None` fails forever
    remaining: Option<usize>,
    /// Perform the operation before reporting the error (lost reply)
    applied: bool,
}

/// In-memory runtime for one host.
///
/// Operations are recorded as `"<op>:<arg>"` strings. Failures can be
/// scripted per operation name: `list`, `create`, `destroy`, `inspect`.
#[derive(Debug)]
pub struct FakeHostClient {
    prefix: String,
    containers: RwLock<BTreeMap<String, ContainerDescriptor>>,
    commands: RwLock<Vec<String>>,
    failures: RwLock<Vec<ScriptedFailure>>,
    latency: RwLock<Duration>,
    next_id: AtomicU64,
}

impl FakeHostClient {
    /// `prefix` keeps runtime ids unique when several fakes share a registry
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            containers: RwLock::new(BTreeMap::new()),
            commands: RwLock::new(Vec::new()),
            failures: RwLock::new(Vec::new()),
            latency: RwLock::new(Duration::ZERO),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn fail_on(&self, operation: &str, error: HostClientError) {
        self.script(operation, error, None, false);
    }

    pub fn fail_times(&self, operation: &str, error: HostClientError, times: usize) {
        self.script(operation, error, Some(times), false);
    }

    /// The operation takes effect remotely but the caller sees `error`
    pub fn fail_after_applying(&self, operation: &str, error: HostClientError, times: usize) {
        self.script(operation, error, Some(times), true);
    }

    pub fn clear_failures(&self) {
        self.failures.write().unwrap().clear();
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.write().unwrap() = latency;
    }

    /// Simulates a container disappearing without the control plane knowing
    pub fn remove_out_of_band(&self, runtime_id: &str) {
        self.containers.write().unwrap().remove(runtime_id);
    }

    /// Simulates a container started on the host by someone else
    pub fn add_foreign(&self, name: &str, image: &str) -> String {
        let runtime_id = self.allocate_id();
        self.containers.write().unwrap().insert(
            runtime_id.clone(),
            ContainerDescriptor {
                runtime_id: runtime_id.clone(),
                name: name.to_string(),
                image: image.to_string(),
                command: String::new(),
                ports: Default::default(),
                running: true,
            },
        );
        runtime_id
    }

    pub fn container_exists(&self, runtime_id: &str) -> bool {
        self.containers.read().unwrap().contains_key(runtime_id)
    }

    pub fn runtime_ids(&self) -> Vec<String> {
        self.containers.read().unwrap().keys().cloned().collect()
    }

    pub fn get_commands(&self) -> Vec<String> {
        self.commands.read().unwrap().clone()
    }

    pub fn count_commands(&self, prefix: &str) -> usize {
        self.commands
            .read()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn script(&self, operation: &str, error: HostClientError, remaining: Option<usize>, applied: bool) {
        self.failures.write().unwrap().push(ScriptedFailure {
            operation: operation.to_string(),
            error,
            remaining,
            applied,
        });
    }

    fn allocate_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        format!("{}{:012x}", self.prefix, n)
    }

    fn record_command(&self, cmd: &str) {
        self.commands.write().unwrap().push(cmd.to_string());
    }

    fn wait(&self, timeout: Duration) -> ClientResult<()> {
        let latency = *self.latency.read().unwrap();
        if latency.is_zero() {
            return Ok(());
        }
        if latency > timeout {
            std::thread::sleep(timeout);
            return Err(HostClientError::Unreachable(format!(
                "deadline of {:?} exceeded",
                timeout
            )));
        }
        std::thread::sleep(latency);
        Ok(())
    }

    /// Returns the scripted failure for `operation`, consuming one use
    fn take_failure(&self, operation: &str) -> Option<(HostClientError, bool)> {
        let mut failures = self.failures.write().unwrap();
        let index = failures.iter().position(|f| f.operation == operation)?;
        let failure = failures[index].clone();

        match failure.remaining {
            Some(1) => {
                failures.remove(index);
            }
            Some(n) => failures[index].remaining = Some(n - 1),
            None => {}
        }

        Some((failure.error, failure.applied))
    }

    fn find(&self, id_or_name: &str) -> Option<ContainerDescriptor> {
        let containers = self.containers.read().unwrap();
        containers
            .get(id_or_name)
            .or_else(|| containers.values().find(|c| c.name == id_or_name))
            .cloned()
    }
}

impl HostClient for FakeHostClient {
    fn list_containers(&self, timeout: Duration) -> ClientResult<Vec<ContainerDescriptor>> {
        self.record_command("list");
        self.wait(timeout)?;
        if let Some((err, _)) = self.take_failure("list") {
            return Err(err);
        }

        Ok(self.containers.read().unwrap().values().cloned().collect())
    }

    fn create_container(
        &self,
        name: &str,
        spec: &ContainerSpec,
        timeout: Duration,
    ) -> ClientResult<ContainerDescriptor> {
        self.record_command(&format!("create:{}", name));
        self.wait(timeout)?;

        let failure = self.take_failure("create");
        if let Some((err, false)) = failure {
            return Err(err);
        }

        if self.find(name).is_some() {
            return Err(HostClientError::Runtime(format!(
                "the container name \"{}\" is already in use",
                name
            )));
        }

        let descriptor = ContainerDescriptor {
            runtime_id: self.allocate_id(),
            name: name.to_string(),
            image: spec.image.clone(),
            command: spec.command.clone(),
            ports: spec.ports.clone(),
            running: true,
        };
        self.containers
            .write()
            .unwrap()
            .insert(descriptor.runtime_id.clone(), descriptor.clone());

        match failure {
            Some((err, true)) => Err(err),
            _ => Ok(descriptor),
        }
    }

    fn destroy_container(&self, runtime_id: &str, timeout: Duration) -> ClientResult<()> {
        self.record_command(&format!("destroy:{}", runtime_id));
        self.wait(timeout)?;

        let failure = self.take_failure("destroy");
        if let Some((err, false)) = failure {
            return Err(err);
        }

        self.containers.write().unwrap().remove(runtime_id);

        match failure {
            Some((err, true)) => Err(err),
            _ => Ok(()),
        }
    }

    fn inspect(&self, id_or_name: &str, timeout: Duration) -> ClientResult<ContainerDescriptor> {
        self.record_command(&format!("inspect:{}", id_or_name));
        self.wait(timeout)?;
        if let Some((err, _)) = self.take_failure("inspect") {
            return Err(err);
        }

        self.find(id_or_name)
            .ok_or_else(|| HostClientError::NotFound(id_or_name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[test]
    fn test_create_then_inspect_by_name() {
        let fake = FakeHostClient::new("a");
        let created = fake
            .create_container("shipyard-1", &ContainerSpec::new("base"), TIMEOUT)
            .unwrap();

        let found = fake.inspect("shipyard-1", TIMEOUT).unwrap();
        assert_eq!(found.runtime_id, created.runtime_id);
        assert!(created.runtime_id.starts_with('a'));
    }

    #[test]
    fn test_destroy_absent_is_ok() {
        let fake = FakeHostClient::new("a");
        assert!(fake.destroy_container("missing", TIMEOUT).is_ok());
    }

    #[test]
    fn test_scripted_failures_run_out() {
        let fake = FakeHostClient::new("a");
        fake.fail_times("list", HostClientError::Unreachable("down".into()), 2);

        assert!(fake.list_containers(TIMEOUT).is_err());
        assert!(fake.list_containers(TIMEOUT).is_err());
        assert!(fake.list_containers(TIMEOUT).is_ok());
    }

    #[test]
    fn test_latency_beyond_timeout_is_unreachable() {
        let fake = FakeHostClient::new("a");
        fake.set_latency(Duration::from_millis(50));

        let result = fake.list_containers(Duration::from_millis(5));
        assert!(matches!(result, Err(HostClientError::Unreachable(_))));
    }
}
