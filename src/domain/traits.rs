use super::error::ClientResult;
use super::{ContainerDescriptor, ContainerSpec};
use std::fmt::Debug;
use std::time::Duration;

/// Operations against one host's container runtime.
///
/// Every call is a blocking remote operation bounded by `timeout`. An
/// expired deadline is reported as `HostClientError::Unreachable`.
/// Implementations never retry on their own.
pub trait HostClient: Send + Sync + Debug {
    /// List every container the runtime knows about, running or not
    fn list_containers(&self, timeout: Duration) -> ClientResult<Vec<ContainerDescriptor>>;

    /// Create a container named `name` from `spec`
    fn create_container(
        &self,
        name: &str,
        spec: &ContainerSpec,
        timeout: Duration,
    ) -> ClientResult<ContainerDescriptor>;

    /// Remove a container. Removing an absent container succeeds.
    fn destroy_container(&self, runtime_id: &str, timeout: Duration) -> ClientResult<()>;

    /// Look up a container by runtime id or name
    fn inspect(&self, id_or_name: &str, timeout: Duration) -> ClientResult<ContainerDescriptor>;
}
