mod application;
mod container;
pub mod error;
mod host;
mod ids;
pub mod traits;

pub use application::{
    Application, ApplicationDraft, AttachmentDiff, Protocol, normalize_domain,
};
pub use container::{
    Container, ContainerDescriptor, ContainerSpec, ContainerState, PortMapping, runtime_name,
};
pub use error::{ClientResult, HostClientError, Result, ShipyardError};
pub use host::{Host, Reachability};
pub use ids::{ApplicationId, ContainerId, HostId};
pub use traits::HostClient;
