//! Container runtime client abstraction

use async_trait::async_trait;

use crate::descriptor::RuntimeConfig;
use crate::error::RuntimeError;

/// A container as reported by a listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    /// Names as reported by the runtime, possibly with a leading `/`
    pub names: Vec<String>,
}

impl ContainerSummary {
    pub fn has_name(&self, name: &str) -> bool {
        self.names.iter().any(|n| n.trim_start_matches('/') == name)
    }
}

/// Host-side publication of a container port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedPort {
    /// `<port>/<protocol>`, e.g. `5432/tcp`
    pub container_port: String,
    pub host_ip: Option<String>,
    pub host_port: Option<String>,
}

/// The parts of a container inspection the lifecycle cares about
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerDetails {
    pub running: bool,
    /// Address on the default bridge network
    pub ip_address: Option<String>,
    /// Addresses on any other attached networks, ordered by network name
    pub network_addresses: Vec<String>,
    pub published_ports: Vec<PublishedPort>,
}

/// Operations consumed from the container runtime.
///
/// Implementations map "already started" / "already stopped" responses to
/// `Ok(())`, a missing container to [`RuntimeError::NotFound`] and a naming
/// collision on create to [`RuntimeError::Conflict`].
#[async_trait]
pub trait RuntimeClient: Send + Sync + 'static {
    /// All containers, running or not, whose name matches `name`
    async fn list_containers(&self, name: &str) -> Result<Vec<ContainerSummary>, RuntimeError>;

    /// Make `image` available locally, waiting for any transfer to finish
    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError>;

    /// Create a container and return its ID
    async fn create_container(
        &self,
        name: &str,
        config: &RuntimeConfig,
    ) -> Result<String, RuntimeError>;

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, RuntimeError>;

    async fn stop_container(&self, id: &str) -> Result<(), RuntimeError>;

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError>;

    /// Last `tail` lines of combined stdout and stderr
    async fn fetch_logs(&self, id: &str, tail: usize) -> Result<String, RuntimeError>;

    /// A fresh session against the same runtime, independent of the async
    /// runtime this one was created on
    async fn reopen(&self) -> Result<Self, RuntimeError>
    where
        Self: Sized;
}
