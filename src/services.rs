mod application_registry;
mod container_registry;
mod host_registry;
mod orchestrator;
mod retry;

pub use application_registry::{ApplicationGuard, ApplicationRegistry};
pub use container_registry::{ContainerRegistry, Reconciliation};
pub use host_registry::{HostHandle, HostRegistry};
pub use orchestrator::{CallPolicy, IdWatermarks, Orchestrator, Placement, TeardownReport};
pub use retry::RetryPolicy;
