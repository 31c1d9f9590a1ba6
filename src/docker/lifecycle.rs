//! Idempotent container lifecycle on top of a [`RuntimeClient`]

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::types::NameConflictPolicy;
use crate::constants::{LOCALHOST_IP, LOG_FETCH_TIMEOUT};
use crate::descriptor::RuntimeConfig;
use crate::docker::client::{ContainerDetails, RuntimeClient};
use crate::error::{ProvisionError, RuntimeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Unstarted,
    Created,
    Running,
    Stopped,
}

/// One container managed for the duration of a provisioning attempt
#[derive(Debug, Clone)]
pub struct ContainerHandle {
    name: String,
    id: String,
    address: String,
    state: ContainerState,
    reused: bool,
}

impl ContainerHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: String::new(),
            address: String::new(),
            state: ContainerState::Unstarted,
            reused: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runtime-assigned ID; empty until created
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Resolved address; empty until resolved
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn state(&self) -> ContainerState {
        self.state
    }

    /// Whether an existing container with the same name was adopted
    pub fn reused(&self) -> bool {
        self.reused
    }

    fn invalid(&self, operation: &'static str) -> ProvisionError {
        ProvisionError::InvalidState {
            container: self.name.clone(),
            state: self.state,
            operation,
        }
    }
}

/// Race a runtime call against cancellation; the in-flight call is dropped
/// when the token fires
pub(crate) async fn cancellable<T, F>(
    cancel: &CancellationToken,
    call: F,
) -> Result<T, ProvisionError>
where
    F: Future<Output = Result<T, RuntimeError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProvisionError::Cancelled),
        result = call => result.map_err(ProvisionError::from),
    }
}

/// Maps a descriptor's runtime configuration to a running, addressable container
pub struct ContainerLifecycle<C: RuntimeClient> {
    client: Arc<C>,
    conflict_policy: NameConflictPolicy,
}

impl<C: RuntimeClient> Clone for ContainerLifecycle<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            conflict_policy: self.conflict_policy,
        }
    }
}

impl<C: RuntimeClient> ContainerLifecycle<C> {
    pub fn new(client: Arc<C>, conflict_policy: NameConflictPolicy) -> Self {
        Self {
            client,
            conflict_policy,
        }
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    pub fn conflict_policy(&self) -> NameConflictPolicy {
        self.conflict_policy
    }

    /// Adopt an existing container named `handle.name()` or create one.
    ///
    /// Never creates a second container with the same name. Under
    /// [`NameConflictPolicy::Reuse`] an existing container is reused even if
    /// it was created with a different configuration.
    pub async fn create_or_reuse(
        &self,
        cancel: &CancellationToken,
        config: &RuntimeConfig,
        image: &str,
        handle: &mut ContainerHandle,
    ) -> Result<(), ProvisionError> {
        if handle.state != ContainerState::Unstarted {
            return Err(handle.invalid("create"));
        }

        if let Some(id) = self.find_existing(cancel, &handle.name).await? {
            return self.adopt(handle, id);
        }

        debug!("Pulling image {}", image);
        let pull_start = std::time::Instant::now();
        cancellable(cancel, self.client.pull_image(image)).await?;
        debug!("Image {} available after {:?}", image, pull_start.elapsed());

        let id = match cancellable(cancel, self.client.create_container(&handle.name, config)).await
        {
            Ok(id) => id,
            // Another process created it between our listing and our create
            Err(ProvisionError::RuntimeClient(RuntimeError::Conflict(_))) => {
                match self.find_existing(cancel, &handle.name).await? {
                    Some(id) => return self.adopt(handle, id),
                    None => {
                        return Err(RuntimeError::Conflict(handle.name.clone()).into());
                    }
                }
            }
            Err(e) => return Err(e),
        };

        debug!("Created container {} ({})", handle.name, id);
        handle.id = id;
        handle.state = ContainerState::Created;
        Ok(())
    }

    async fn find_existing(
        &self,
        cancel: &CancellationToken,
        name: &str,
    ) -> Result<Option<String>, ProvisionError> {
        let containers = cancellable(cancel, self.client.list_containers(name)).await?;
        Ok(containers
            .into_iter()
            .find(|c| c.has_name(name))
            .map(|c| c.id))
    }

    fn adopt(&self, handle: &mut ContainerHandle, id: String) -> Result<(), ProvisionError> {
        match self.conflict_policy {
            NameConflictPolicy::Fail => Err(ProvisionError::ContainerNameConflict {
                name: handle.name.clone(),
                id,
            }),
            NameConflictPolicy::Reuse => {
                info!(
                    "Container {:?} already exists with ID {}, reusing it",
                    handle.name, id
                );
                handle.id = id;
                handle.state = ContainerState::Created;
                handle.reused = true;
                Ok(())
            }
        }
    }

    /// Start the container; a container that is already running is left alone
    pub async fn start(
        &self,
        cancel: &CancellationToken,
        handle: &mut ContainerHandle,
    ) -> Result<(), ProvisionError> {
        match handle.state {
            ContainerState::Running => return Ok(()),
            ContainerState::Created => {}
            ContainerState::Unstarted | ContainerState::Stopped => {
                return Err(handle.invalid("start"));
            }
        }

        cancellable(cancel, self.client.start_container(&handle.id)).await?;
        debug!("Started container {}", handle.name);
        handle.state = ContainerState::Running;
        Ok(())
    }

    /// Inspect the running container and record the address clients should
    /// use to reach `port`.
    ///
    /// A host binding is only used when it publishes `port` on the same host
    /// port, so `address:port` is always a valid endpoint. An empty result is
    /// fatal: address resolution is not retried.
    pub async fn resolve_address(
        &self,
        cancel: &CancellationToken,
        handle: &mut ContainerHandle,
        port: u16,
    ) -> Result<String, ProvisionError> {
        self.resolve(cancel, handle, Some(port)).await
    }

    /// Like [`resolve_address`](Self::resolve_address), ignoring host
    /// bindings: only the container's own network addresses qualify
    pub async fn resolve_container_address(
        &self,
        cancel: &CancellationToken,
        handle: &mut ContainerHandle,
    ) -> Result<String, ProvisionError> {
        self.resolve(cancel, handle, None).await
    }

    async fn resolve(
        &self,
        cancel: &CancellationToken,
        handle: &mut ContainerHandle,
        published_port: Option<u16>,
    ) -> Result<String, ProvisionError> {
        if handle.state != ContainerState::Running {
            return Err(handle.invalid("resolve the address of"));
        }

        let details = cancellable(cancel, self.client.inspect_container(&handle.id)).await?;
        let address = select_address(&details, published_port).ok_or_else(|| {
            ProvisionError::AddressUnavailable {
                container: handle.name.clone(),
            }
        })?;

        debug!("Container {} reachable at {}", handle.name, address);
        handle.address = address.clone();
        Ok(address)
    }

    /// Stop (and optionally remove) the container.
    ///
    /// A container that is already gone counts as stopped. Any other failure
    /// is reported as [`ProvisionError::Teardown`].
    pub async fn stop(
        &self,
        handle: &mut ContainerHandle,
        remove: bool,
    ) -> Result<(), ProvisionError> {
        match handle.state {
            ContainerState::Stopped => return Ok(()),
            ContainerState::Unstarted => {
                handle.state = ContainerState::Stopped;
                return Ok(());
            }
            ContainerState::Created | ContainerState::Running => {}
        }

        let teardown = |source: RuntimeError| ProvisionError::Teardown {
            container: handle.name.clone(),
            source,
        };

        match self.client.stop_container(&handle.id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!("Container {} already removed", handle.name);
            }
            Err(e) => return Err(teardown(e)),
        }

        if remove {
            match self.client.remove_container(&handle.id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(teardown(e)),
            }
        }

        debug!("Stopped container {}", handle.name);
        handle.state = ContainerState::Stopped;
        Ok(())
    }

    /// Recent log output for diagnostics, or a placeholder when unavailable
    pub async fn fetch_logs(&self, handle: &ContainerHandle, tail: usize) -> String {
        if handle.id.is_empty() {
            return "(no container)".to_string();
        }

        match tokio::time::timeout(LOG_FETCH_TIMEOUT, self.client.fetch_logs(&handle.id, tail))
            .await
        {
            Ok(Ok(logs)) if logs.trim().is_empty() => "(no logs available)".to_string(),
            Ok(Ok(logs)) => logs,
            Ok(Err(e)) => format!("(failed to fetch container logs: {})", e),
            Err(_) => "(timed out fetching container logs)".to_string(),
        }
    }
}

/// Host binding publishing `published_port` on the same host port first,
/// then the bridge address, then any other network's address
fn select_address(details: &ContainerDetails, published_port: Option<u16>) -> Option<String> {
    let published = published_port.and_then(|port| {
        let port_key = format!("{}/tcp", port);
        let host_port = port.to_string();
        details
            .published_ports
            .iter()
            .find(|p| {
                p.container_port == port_key && p.host_port.as_deref() == Some(host_port.as_str())
            })
            .map(|p| match p.host_ip.as_deref() {
                None | Some("") | Some("0.0.0.0") => LOCALHOST_IP.to_string(),
                Some(ip) => ip.to_string(),
            })
    });

    published
        .or_else(|| details.ip_address.clone().filter(|ip| !ip.is_empty()))
        .or_else(|| {
            details
                .network_addresses
                .iter()
                .find(|ip| !ip.is_empty())
                .cloned()
        })
}
