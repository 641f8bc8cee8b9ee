pub mod api;
pub mod cli;
pub mod domain;
pub mod infra;
pub mod services;

// Make test_support available for integration tests
pub mod test_support;

pub use domain::{
    Application, ApplicationDraft, ApplicationId, Container, ContainerId, ContainerSpec, Host,
    HostClient, HostId, ShipyardError,
};
pub use infra::PodmanHostClient;
pub use services::{CallPolicy, Orchestrator, RetryPolicy};
