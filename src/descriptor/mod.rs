//! Service descriptors
//!
//! A descriptor captures everything specific to one kind of backing service
//! (image, credentials, connection string syntax) so the provisioner can stay
//! service-agnostic.

pub mod postgres;

pub use postgres::{PostgresDescriptor, PostgresDescriptorBuilder};

/// Publication of the service port on a host interface. The host port is
/// always the service port itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostBinding {
    pub host_ip: String,
}

/// Everything the container runtime needs to create the service container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub image: String,
    /// Exposed container port, always TCP
    pub port: u16,
    /// `KEY=value` entries, in the order they are passed to the runtime
    pub environment: Vec<String>,
    pub host_binding: Option<HostBinding>,
}

impl RuntimeConfig {
    /// Port key in the runtime's `<port>/<protocol>` notation
    pub fn port_key(&self) -> String {
        format!("{}/tcp", self.port)
    }
}

/// Capability set implemented once per backing-service type
pub trait ServiceDescriptor: Send + Sync {
    fn container_image(&self) -> &str;

    fn container_name(&self) -> &str;

    fn port(&self) -> u16;

    fn environment(&self) -> Vec<String>;

    /// Optional host port publication; none by default
    fn host_binding(&self) -> Option<HostBinding> {
        None
    }

    /// Connection string for a service reachable at `address`.
    ///
    /// Must not fail: descriptors validate their values at construction.
    fn data_source_name(&self, address: &str) -> String;

    fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            image: self.container_image().to_string(),
            port: self.port(),
            environment: self.environment(),
            host_binding: self.host_binding(),
        }
    }
}
