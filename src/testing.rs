//! In-memory collaborators for exercising the provisioning lifecycle without
//! a container daemon.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::descriptor::RuntimeConfig;
use crate::docker::client::{ContainerDetails, ContainerSummary, PublishedPort, RuntimeClient};
use crate::error::RuntimeError;
use crate::probe::{ProbeError, ReadinessProbe, endpoint};

/// A runtime call recorded by [`FakeRuntime`], carrying its name/ID/image argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    ListContainers(String),
    PullImage(String),
    CreateContainer(String),
    StartContainer(String),
    InspectContainer(String),
    StopContainer(String),
    RemoveContainer(String),
    FetchLogs(String),
}

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub name: String,
    pub config: RuntimeConfig,
    pub running: bool,
    pub address: String,
}

#[derive(Debug, Default)]
struct FakeState {
    containers: Vec<FakeContainer>,
    calls: Vec<RuntimeCall>,
    next_id: u32,
    pull_failure: Option<String>,
    start_failure: Option<String>,
    stop_failure: Option<String>,
    without_network: bool,
    remapped_host_port: Option<u16>,
    create_race: bool,
    logs: String,
}

/// Container runtime double. Clones share state, so several provisioners
/// (or a provisioner and a test) can observe the same containers.
#[derive(Debug, Clone, Default)]
pub struct FakeRuntime {
    state: Arc<Mutex<FakeState>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every image pull fails with `message`
    pub fn with_pull_failure(self, message: impl Into<String>) -> Self {
        self.lock().pull_failure = Some(message.into());
        self
    }

    pub fn with_start_failure(self, message: impl Into<String>) -> Self {
        self.lock().start_failure = Some(message.into());
        self
    }

    pub fn with_stop_failure(self, message: impl Into<String>) -> Self {
        self.lock().stop_failure = Some(message.into());
        self
    }

    /// Containers report no network attachment
    pub fn without_network(self) -> Self {
        self.lock().without_network = true;
        self
    }

    /// Containers publish their service port on `0.0.0.0:<host_port>`, as
    /// one started elsewhere with `-p <host_port>:<port>` would
    pub fn with_remapped_host_port(self, host_port: u16) -> Self {
        self.lock().remapped_host_port = Some(host_port);
        self
    }

    /// The first create finds the name taken by a container that appeared
    /// after the listing, as with a concurrent process
    pub fn with_create_race(self) -> Self {
        self.lock().create_race = true;
        self
    }

    pub fn with_logs(self, logs: impl Into<String>) -> Self {
        self.lock().logs = logs.into();
        self
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.lock().calls.clone()
    }

    pub fn count(&self, predicate: impl Fn(&RuntimeCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    pub fn containers(&self) -> Vec<FakeContainer> {
        self.lock().containers.clone()
    }

    pub fn running_containers(&self) -> Vec<FakeContainer> {
        self.lock()
            .containers
            .iter()
            .filter(|c| c.running)
            .cloned()
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl FakeState {
    fn record(&mut self, call: RuntimeCall) {
        self.calls.push(call);
    }

    fn add_container(&mut self, name: &str, config: &RuntimeConfig) -> String {
        self.next_id += 1;
        let id = format!("fake{:08x}", self.next_id);
        self.containers.push(FakeContainer {
            id: id.clone(),
            name: name.to_string(),
            config: config.clone(),
            running: false,
            address: format!("172.17.0.{}", self.next_id + 1),
        });
        id
    }

    fn container_mut(&mut self, id: &str) -> Result<&mut FakeContainer, RuntimeError> {
        self.containers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))
    }
}

#[async_trait]
impl RuntimeClient for FakeRuntime {
    async fn list_containers(&self, name: &str) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let mut state = self.lock();
        state.record(RuntimeCall::ListContainers(name.to_string()));
        // Substring match, like the Docker name filter
        Ok(state
            .containers
            .iter()
            .filter(|c| c.name.contains(name))
            .map(|c| ContainerSummary {
                id: c.id.clone(),
                names: vec![format!("/{}", c.name)],
            })
            .collect())
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        state.record(RuntimeCall::PullImage(image.to_string()));
        match &state.pull_failure {
            Some(message) => Err(RuntimeError::other("pull image", message.clone())),
            None => Ok(()),
        }
    }

    async fn create_container(
        &self,
        name: &str,
        config: &RuntimeConfig,
    ) -> Result<String, RuntimeError> {
        let mut state = self.lock();
        state.record(RuntimeCall::CreateContainer(name.to_string()));

        if state.create_race {
            state.create_race = false;
            state.add_container(name, config);
            return Err(RuntimeError::Conflict(name.to_string()));
        }
        if state.containers.iter().any(|c| c.name == name) {
            return Err(RuntimeError::Conflict(name.to_string()));
        }
        Ok(state.add_container(name, config))
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        state.record(RuntimeCall::StartContainer(id.to_string()));
        if let Some(message) = state.start_failure.clone() {
            return Err(RuntimeError::other("start container", message));
        }
        state.container_mut(id)?.running = true;
        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, RuntimeError> {
        let mut state = self.lock();
        state.record(RuntimeCall::InspectContainer(id.to_string()));
        let without_network = state.without_network;
        let remapped_host_port = state.remapped_host_port;
        let container = state.container_mut(id)?;

        if without_network {
            return Ok(ContainerDetails {
                running: container.running,
                ..Default::default()
            });
        }

        let published_ports = match remapped_host_port {
            Some(host_port) => vec![PublishedPort {
                container_port: container.config.port_key(),
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some(host_port.to_string()),
            }],
            None => container
                .config
                .host_binding
                .iter()
                .map(|binding| PublishedPort {
                    container_port: container.config.port_key(),
                    host_ip: Some(binding.host_ip.clone()),
                    host_port: Some(container.config.port.to_string()),
                })
                .collect(),
        };

        Ok(ContainerDetails {
            running: container.running,
            ip_address: Some(container.address.clone()),
            network_addresses: Vec::new(),
            published_ports,
        })
    }

    async fn stop_container(&self, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        state.record(RuntimeCall::StopContainer(id.to_string()));
        if let Some(message) = state.stop_failure.clone() {
            return Err(RuntimeError::other("stop container", message));
        }
        state.container_mut(id)?.running = false;
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        state.record(RuntimeCall::RemoveContainer(id.to_string()));
        let before = state.containers.len();
        state.containers.retain(|c| c.id != id);
        if state.containers.len() == before {
            return Err(RuntimeError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn fetch_logs(&self, id: &str, tail: usize) -> Result<String, RuntimeError> {
        let mut state = self.lock();
        state.record(RuntimeCall::FetchLogs(id.to_string()));
        let lines: Vec<&str> = state.logs.lines().collect();
        let start = lines.len().saturating_sub(tail);
        Ok(lines[start..].join("\n"))
    }

    async fn reopen(&self) -> Result<Self, RuntimeError> {
        Ok(self.clone())
    }
}

/// Probe double that fails a fixed number of times before succeeding, and
/// optionally never reaches one address
#[derive(Debug, Default)]
pub struct ScriptedProbe {
    failures: Option<usize>,
    unreachable: Option<String>,
    calls: AtomicUsize,
    endpoints: Mutex<Vec<String>>,
}

impl ScriptedProbe {
    pub fn ready() -> Self {
        Self::succeed_after(0)
    }

    pub fn succeed_after(failures: usize) -> Self {
        Self {
            failures: Some(failures),
            ..Default::default()
        }
    }

    pub fn always_fail() -> Self {
        Self::default()
    }

    /// Connections to `address` are refused; any other address is ready
    pub fn unreachable(address: impl Into<String>) -> Self {
        Self {
            failures: Some(0),
            unreachable: Some(address.into()),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every endpoint probed so far, in order
    pub fn endpoints(&self) -> Vec<String> {
        self.endpoints
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl ReadinessProbe for ScriptedProbe {
    async fn probe(&self, address: &str, port: u16) -> Result<(), ProbeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let target = endpoint(address, port);
        self.endpoints
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(target.clone());

        let refused = self.unreachable.as_deref() == Some(address);
        match self.failures {
            Some(failures) if call >= failures && !refused => Ok(()),
            _ => Err(ProbeError::Connect {
                endpoint: target,
                source: io::Error::from(io::ErrorKind::ConnectionRefused),
            }),
        }
    }
}
