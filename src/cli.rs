pub mod app;
pub mod container;
pub mod context;
pub mod host;
pub mod setup;

pub use app::AppCommand;
pub use container::ContainerCommand;
pub use context::{ControlPlane, Outcome};
pub use host::HostCommand;
