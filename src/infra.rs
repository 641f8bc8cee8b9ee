pub mod config;
pub mod podman_client;
pub mod state_file;

pub use podman_client::PodmanHostClient;
pub use state_file::Snapshot;
