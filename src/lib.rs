//! Ephemeral containerized databases for test runs.
//!
//! A [`Provisioner`] creates (or reuses) a container for a
//! [`ServiceDescriptor`], waits until its port accepts connections, and hands
//! back a [`ProvisionedResource`] carrying the connection string. Releasing
//! the resource stops the container.
//!
//! ```no_run
//! use testsql::{PostgresDescriptor, provision};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let descriptor = PostgresDescriptor::builder().container_name("my-tests").build()?;
//! let db = provision(&CancellationToken::new(), &descriptor).await?;
//! println!("{}", db.connection_descriptor());
//! db.release().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod descriptor;
pub mod docker;
pub mod error;
pub mod probe;
pub mod provision;
pub mod retry;
#[doc(hidden)]
pub mod testing;

pub use descriptor::{PostgresDescriptor, ServiceDescriptor};
pub use docker::DockerSession;
pub use error::{DescriptorError, ProvisionError, RuntimeError};
pub use provision::{ProvisionOptions, ProvisionState, ProvisionedResource, Provisioner};

use tokio_util::sync::CancellationToken;

/// Provision `descriptor` on the local Docker daemon with default options
pub async fn provision<D>(
    cancel: &CancellationToken,
    descriptor: &D,
) -> Result<ProvisionedResource<DockerSession>, ProvisionError>
where
    D: ServiceDescriptor + ?Sized,
{
    Provisioner::connect(ProvisionOptions::default())
        .await?
        .provision(cancel, descriptor)
        .await
}
