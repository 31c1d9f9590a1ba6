//! Provisioning orchestration: create, start, resolve, wait until ready, and
//! hand the caller a releasable resource.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, info, trace, warn};

use crate::config::builder::parse_flag;
use crate::config::types::{Config, NameConflictPolicy};
use crate::constants::{
    ABORT_CLEANUP_TIMEOUT, DEFAULT_CONNECT_TIMEOUT, DEFAULT_LOG_TAIL_LINES, KEEP_ON_FAILURE_ENV,
};
use crate::descriptor::{HostBinding, RuntimeConfig, ServiceDescriptor};
use crate::docker::DockerSession;
use crate::docker::client::RuntimeClient;
use crate::docker::lifecycle::{ContainerHandle, ContainerLifecycle, ContainerState};
use crate::error::ProvisionError;
use crate::probe::{ReadinessProbe, TcpProbe, endpoint};
use crate::retry::{ExponentialBackoff, RetryError};

/// Tunables for a [`Provisioner`]
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionOptions {
    pub backoff: ExponentialBackoff,
    /// Publish the service port on this host IP and connect through it. When
    /// the service never becomes reachable there, the container is removed
    /// and one more attempt connects to the container's own address.
    pub host: Option<String>,
    pub conflict_policy: NameConflictPolicy,
    /// Leave the container running when an attempt aborts
    pub keep_on_failure: bool,
    /// Remove the container on release instead of only stopping it
    pub remove_on_release: bool,
    pub log_tail_lines: usize,
    pub connect_timeout: Duration,
}

impl Default for ProvisionOptions {
    fn default() -> Self {
        let keep_on_failure = std::env::var(KEEP_ON_FAILURE_ENV)
            .ok()
            .and_then(|value| parse_flag(KEEP_ON_FAILURE_ENV, &value).ok())
            .unwrap_or(false);

        Self {
            backoff: ExponentialBackoff::default(),
            host: None,
            conflict_policy: NameConflictPolicy::default(),
            keep_on_failure,
            remove_on_release: false,
            log_tail_lines: DEFAULT_LOG_TAIL_LINES,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl From<&Config> for ProvisionOptions {
    fn from(config: &Config) -> Self {
        Self {
            backoff: config.retry.backoff(),
            host: config.docker.host.clone(),
            conflict_policy: config.docker.on_name_conflict,
            keep_on_failure: config.docker.keep_on_failure,
            remove_on_release: config.docker.remove_on_release,
            log_tail_lines: config.docker.log_tail_lines,
            connect_timeout: config.retry.connect_timeout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionState {
    Init,
    ContainerReady,
    Probing,
    Live,
    Released,
    Aborted,
}

fn transition(container: &str, state: &mut ProvisionState, next: ProvisionState) {
    debug!("Provisioning {}: {:?} -> {:?}", container, state, next);
    *state = next;
}

/// How one attempt publishes the service port and picks the address to dial
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route<'a> {
    /// The descriptor's own host binding, then the resolved container address
    Descriptor,
    /// Publish on this host IP and dial it
    Host(&'a str),
    /// No publication; dial the container's network address
    Container,
}

impl Route<'_> {
    fn runtime_config<D: ServiceDescriptor + ?Sized>(self, descriptor: &D) -> RuntimeConfig {
        let mut config = descriptor.runtime_config();
        match self {
            Route::Descriptor => {}
            Route::Host(host) => {
                config.host_binding = Some(HostBinding {
                    host_ip: host.to_string(),
                });
            }
            Route::Container => config.host_binding = None,
        }
        config
    }
}

/// Brings up one backing service per [`provision`](Self::provision) call
pub struct Provisioner<C: RuntimeClient, P: ReadinessProbe = TcpProbe> {
    lifecycle: ContainerLifecycle<C>,
    probe: P,
    options: ProvisionOptions,
}

impl Provisioner<DockerSession> {
    /// Provisioner backed by the local Docker daemon
    pub async fn connect(options: ProvisionOptions) -> Result<Self, ProvisionError> {
        let session = DockerSession::connect().await?;
        Ok(Self::new(session, options))
    }
}

impl<C: RuntimeClient> Provisioner<C> {
    pub fn new(client: C, options: ProvisionOptions) -> Self {
        let probe = TcpProbe::new(options.connect_timeout);
        Self {
            lifecycle: ContainerLifecycle::new(Arc::new(client), options.conflict_policy),
            probe,
            options,
        }
    }
}

impl<C: RuntimeClient, P: ReadinessProbe> Provisioner<C, P> {
    /// Replace the readiness probe
    pub fn with_probe<Q: ReadinessProbe>(self, probe: Q) -> Provisioner<C, Q> {
        Provisioner {
            lifecycle: self.lifecycle,
            probe,
            options: self.options,
        }
    }

    pub fn options(&self) -> &ProvisionOptions {
        &self.options
    }

    /// Provision `descriptor`.
    ///
    /// On failure a container created by the attempt is stopped and removed
    /// (unless `keep_on_failure` is set) before the error is returned. With
    /// [`ProvisionOptions::host`] set, a service that never answers on the
    /// host gets one more attempt on the container's own address.
    pub async fn provision<D>(
        &self,
        cancel: &CancellationToken,
        descriptor: &D,
    ) -> Result<ProvisionedResource<C>, ProvisionError>
    where
        D: ServiceDescriptor + ?Sized,
    {
        let Some(host) = self.options.host.as_deref() else {
            return self.attempt(cancel, descriptor, Route::Descriptor).await;
        };

        match self.attempt(cancel, descriptor, Route::Host(host)).await {
            Err(ProvisionError::RetryExhausted { endpoint, .. }) => {
                warn!(
                    "{} never became reachable through {}, retrying on the container address",
                    descriptor.container_name(),
                    endpoint
                );
                self.attempt(cancel, descriptor, Route::Container).await
            }
            result => result,
        }
    }

    async fn attempt<D>(
        &self,
        cancel: &CancellationToken,
        descriptor: &D,
        route: Route<'_>,
    ) -> Result<ProvisionedResource<C>, ProvisionError>
    where
        D: ServiceDescriptor + ?Sized,
    {
        let mut state = ProvisionState::Init;
        let mut handle = ContainerHandle::new(descriptor.container_name());
        let config = route.runtime_config(descriptor);

        match self
            .bring_up(cancel, descriptor, &config, route, &mut handle, &mut state)
            .await
        {
            Ok(address) => {
                transition(handle.name(), &mut state, ProvisionState::Live);
                info!(
                    "Container {} ready at {}",
                    handle.name(),
                    endpoint(&address, descriptor.port())
                );
                Ok(ProvisionedResource {
                    connection_descriptor: descriptor.data_source_name(&address),
                    lifecycle: self.lifecycle.clone(),
                    handle: tokio::sync::Mutex::new(handle),
                    released: AtomicBool::new(false),
                    remove_on_release: self.options.remove_on_release,
                })
            }
            Err(error) => {
                transition(handle.name(), &mut state, ProvisionState::Aborted);
                // A host attempt that is followed by a fallback must not leave
                // its container behind to be reused with the same binding
                let falls_back = matches!(route, Route::Host(_))
                    && matches!(error, ProvisionError::RetryExhausted { .. });
                let keep = self.options.keep_on_failure && !falls_back;
                self.clean_up_aborted(&mut handle, keep).await;
                Err(error)
            }
        }
    }

    async fn bring_up<D>(
        &self,
        cancel: &CancellationToken,
        descriptor: &D,
        config: &RuntimeConfig,
        route: Route<'_>,
        handle: &mut ContainerHandle,
        state: &mut ProvisionState,
    ) -> Result<String, ProvisionError>
    where
        D: ServiceDescriptor + ?Sized,
    {
        self.lifecycle
            .create_or_reuse(cancel, config, descriptor.container_image(), handle)
            .await?;
        self.lifecycle.start(cancel, handle).await?;
        transition(handle.name(), state, ProvisionState::ContainerReady);

        let address = match route {
            Route::Descriptor => {
                self.lifecycle
                    .resolve_address(cancel, handle, descriptor.port())
                    .await?
            }
            Route::Host(host) => host.to_string(),
            Route::Container => {
                self.lifecycle
                    .resolve_container_address(cancel, handle)
                    .await?
            }
        };
        transition(handle.name(), state, ProvisionState::Probing);

        self.wait_until_ready(cancel, handle, &address, descriptor.port())
            .await?;
        Ok(address)
    }

    async fn wait_until_ready(
        &self,
        cancel: &CancellationToken,
        handle: &ContainerHandle,
        address: &str,
        port: u16,
    ) -> Result<(), ProvisionError> {
        let target = endpoint(address, port);
        let lifecycle = &self.lifecycle;
        let probe = &self.probe;
        let tail = self.options.log_tail_lines;

        let result = self
            .options
            .backoff
            .retry_notify(
                cancel,
                move || async move {
                    if tracing::enabled!(Level::TRACE) {
                        let logs = lifecycle.fetch_logs(handle, tail).await;
                        trace!("Container {} output:\n{}", handle.name(), logs);
                    }
                    probe.probe(address, port).await
                },
                |error, delay| debug!("{} not ready ({}), retrying in {:?}", target, error, delay),
            )
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(RetryError::Cancelled { .. }) => Err(ProvisionError::Cancelled),
            Err(RetryError::Exhausted {
                attempts,
                elapsed,
                last_error,
                ..
            }) => {
                let logs = self
                    .lifecycle
                    .fetch_logs(handle, self.options.log_tail_lines)
                    .await;
                Err(ProvisionError::RetryExhausted {
                    endpoint: target,
                    attempts,
                    elapsed,
                    last_error,
                    logs,
                })
            }
        }
    }

    /// Best-effort stop and removal of a container this attempt created, so a
    /// broken container is never reused by the next attempt. Failures are
    /// logged so they never replace the error that caused the abort.
    async fn clean_up_aborted(&self, handle: &mut ContainerHandle, keep: bool) {
        if !matches!(
            handle.state(),
            ContainerState::Created | ContainerState::Running
        ) {
            return;
        }
        if handle.reused() {
            debug!("Leaving reused container {} as found", handle.name());
            return;
        }
        if keep {
            warn!(
                "Provisioning failed; leaving container {} ({}) running for debugging",
                handle.name(),
                handle.id()
            );
            return;
        }

        let stop = self.lifecycle.stop(handle, true);
        match tokio::time::timeout(ABORT_CLEANUP_TIMEOUT, stop).await {
            Ok(Ok(())) => debug!("Removed container {} after failed provisioning", handle.name()),
            Ok(Err(e)) => warn!(
                "Failed to stop container {} after failed provisioning: {}",
                handle.name(),
                e
            ),
            Err(_) => warn!(
                "Timed out stopping container {} after failed provisioning",
                handle.name()
            ),
        }
    }
}

/// A live backing service. Call [`release`](Self::release) when done; a
/// resource dropped without release stops its container on a helper thread.
pub struct ProvisionedResource<C: RuntimeClient> {
    connection_descriptor: String,
    lifecycle: ContainerLifecycle<C>,
    handle: tokio::sync::Mutex<ContainerHandle>,
    released: AtomicBool,
    remove_on_release: bool,
}

impl<C: RuntimeClient> std::fmt::Debug for ProvisionedResource<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisionedResource")
            .field("connection_descriptor", &self.connection_descriptor)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<C: RuntimeClient> ProvisionedResource<C> {
    /// Connection string for the live service
    pub fn connection_descriptor(&self) -> &str {
        &self.connection_descriptor
    }

    pub fn state(&self) -> ProvisionState {
        if self.released.load(Ordering::SeqCst) {
            ProvisionState::Released
        } else {
            ProvisionState::Live
        }
    }

    /// Stop the container. Only the first call reaches the runtime; later
    /// calls return `Ok(())` immediately.
    pub async fn release(&self) -> Result<(), ProvisionError> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut handle = self.handle.lock().await;
        self.lifecycle
            .stop(&mut handle, self.remove_on_release)
            .await?;
        debug!("Released container {}", handle.name());
        Ok(())
    }
}

impl<C: RuntimeClient> Drop for ProvisionedResource<C> {
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut handle = self.handle.get_mut().clone();
        if !matches!(
            handle.state(),
            ContainerState::Created | ContainerState::Running
        ) {
            return;
        }

        warn!(
            "Container {} dropped without release, stopping it",
            handle.name()
        );

        let client = Arc::clone(self.lifecycle.client());
        let conflict_policy = self.lifecycle.conflict_policy();
        let remove = self.remove_on_release;

        // The caller's runtime may be the one blocked in this drop, so the
        // stop runs on its own thread and runtime with a fresh session
        let cleanup = std::thread::spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    warn!("Failed to create runtime for cleanup: {}", e);
                    return;
                }
            };

            rt.block_on(async move {
                let session = match client.reopen().await {
                    Ok(session) => session,
                    Err(e) => {
                        warn!("Failed to reconnect for cleanup of {}: {}", handle.name(), e);
                        return;
                    }
                };
                let lifecycle = ContainerLifecycle::new(Arc::new(session), conflict_policy);
                if let Err(e) = lifecycle.stop(&mut handle, remove).await {
                    warn!("{}", e);
                }
            });
        });

        if cleanup.join().is_err() {
            warn!("Container cleanup thread panicked");
        }
    }
}
