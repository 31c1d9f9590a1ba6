//! Docker container management for ephemeral test databases
//!
//! [`DockerSession`] implements [`RuntimeClient`] over the Docker Engine API;
//! [`ContainerLifecycle`] builds the idempotent create/start/resolve/stop
//! sequence on top of any runtime client.

pub mod client;
pub mod lifecycle;

pub use client::{ContainerDetails, ContainerSummary, PublishedPort, RuntimeClient};
pub use lifecycle::{ContainerHandle, ContainerLifecycle, ContainerState};

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::LogOutput;
use bollard::errors::Error as BollardError;
use bollard::models::{ContainerCreateBody, ContainerStateStatusEnum};
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, InspectContainerOptions, ListContainersOptions,
    LogsOptionsBuilder, RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::secret::{ContainerInspectResponse, HostConfig, PortBinding};
use futures_util::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::descriptor::RuntimeConfig;
use crate::error::RuntimeError;

/// Session with the local Docker daemon
#[derive(Debug, Clone)]
pub struct DockerSession {
    docker: Docker,
}

impl DockerSession {
    /// Check if Docker is available with detailed debug information
    pub async fn is_available_verbose() -> (bool, String) {
        match Self::try_connect_verbose().await {
            Ok((_, debug_info)) => (true, debug_info),
            Err(e) => (false, format!("Docker not available: {}", e)),
        }
    }

    /// Connect to the locally configured daemon, retrying briefly
    pub async fn connect() -> Result<Self, RuntimeError> {
        const MAX_RETRIES: u32 = 5;
        const RETRY_DELAY_MS: u64 = 200;

        for attempt in 0..=MAX_RETRIES {
            match Self::try_connect().await {
                Ok(session) => {
                    if attempt > 0 {
                        debug!("Connected to Docker after {} retries", attempt);
                    }
                    return Ok(session);
                }
                Err(e) => {
                    debug!("Docker not ready (attempt {}): {}", attempt + 1, e);
                    if attempt < MAX_RETRIES {
                        tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS)).await;
                    }
                }
            }
        }

        let (_, debug_info) = Self::is_available_verbose().await;

        Err(RuntimeError::other(
            "connect to Docker daemon",
            format!(
                "gave up after {} attempts.\n\n{}\nTroubleshooting:\n   • Make sure Docker is running\n   • Set DOCKER_HOST to the daemon socket, e.g. unix:///Users/$USER/.docker/run/docker.sock\n   • Check Docker Desktop settings",
                MAX_RETRIES + 1,
                debug_info
            ),
        ))
    }

    /// Wrap an existing bollard client
    pub fn from_docker(docker: Docker) -> Self {
        Self { docker }
    }

    async fn try_connect() -> Result<Self, String> {
        for (_description, socket_path) in Self::get_docker_socket_candidates() {
            if let Ok(docker) = Self::try_socket_path(&socket_path).await {
                return Ok(Self { docker });
            }
        }

        let docker = Docker::connect_with_local_defaults().map_err(|e| {
            format!(
                "Failed to connect to Docker daemon after trying all socket paths: {}",
                e
            )
        })?;
        docker
            .ping()
            .await
            .map_err(|e| format!("Docker daemon not responding: {}", e))?;

        Ok(Self { docker })
    }

    async fn try_connect_verbose() -> Result<(Self, String), String> {
        let mut debug_info = String::from("Docker socket detection:\n");

        for (description, socket_path) in &Self::get_docker_socket_candidates() {
            debug_info.push_str(&format!("  • {}: ", description));
            match Self::try_socket_path(socket_path).await {
                Ok(docker) => {
                    debug_info.push_str(&format!("connected ({})\n", socket_path));
                    return Ok((Self { docker }, debug_info));
                }
                Err(e) => debug_info.push_str(&format!("failed - {}\n", e)),
            }
        }

        debug_info.push_str("  • Bollard default detection: ");
        match Docker::connect_with_local_defaults() {
            Ok(docker) => match docker.ping().await {
                Ok(_) => {
                    debug_info.push_str("connected\n");
                    return Ok((Self { docker }, debug_info));
                }
                Err(e) => debug_info.push_str(&format!("failed to ping - {}\n", e)),
            },
            Err(e) => debug_info.push_str(&format!("failed to connect - {}\n", e)),
        }

        Err(format!(
            "Failed to connect to Docker daemon after trying all methods:\n{}",
            debug_info
        ))
    }

    /// Socket locations to try, in priority order
    fn get_docker_socket_candidates() -> Vec<(String, String)> {
        let mut candidates = Vec::new();

        if let Ok(docker_host) = std::env::var("DOCKER_HOST") {
            candidates.push(("DOCKER_HOST environment variable".to_string(), docker_host));
        }

        #[cfg(target_os = "macos")]
        {
            if let Ok(home) = std::env::var("HOME") {
                candidates.push((
                    "macOS Docker Desktop".to_string(),
                    format!("unix://{}/.docker/run/docker.sock", home),
                ));
                candidates.push((
                    "Colima".to_string(),
                    format!("unix://{}/.colima/default/docker.sock", home),
                ));
                candidates.push((
                    "OrbStack".to_string(),
                    format!("unix://{}/.orbstack/run/docker.sock", home),
                ));
            }
        }

        candidates.push((
            "Standard Linux location".to_string(),
            "unix:///var/run/docker.sock".to_string(),
        ));

        candidates
    }

    async fn try_socket_path(socket_path: &str) -> Result<Docker, String> {
        let Some(socket_file) = socket_path.strip_prefix("unix://") else {
            return Err(format!("Unsupported socket protocol: {}", socket_path));
        };

        let docker = Docker::connect_with_socket(socket_file, 120, bollard::API_DEFAULT_VERSION)
            .map_err(|e| format!("Failed to connect to socket {}: {}", socket_path, e))?;
        docker
            .ping()
            .await
            .map_err(|e| format!("Socket {} not responding: {}", socket_path, e))?;

        Ok(docker)
    }
}

/// 304 Not Modified: the container is already in the requested state
fn is_not_modified(e: &BollardError) -> bool {
    matches!(
        e,
        BollardError::DockerResponseServerError {
            status_code: 304,
            ..
        }
    )
}

fn classify(operation: &'static str, subject: &str, e: BollardError) -> RuntimeError {
    match e {
        BollardError::DockerResponseServerError {
            status_code: 404, ..
        } if operation != "pull image" => RuntimeError::NotFound(subject.to_string()),
        BollardError::DockerResponseServerError {
            status_code: 409, ..
        } if operation == "create container" => RuntimeError::Conflict(subject.to_string()),
        source => RuntimeError::Docker { operation, source },
    }
}

fn container_details(inspect: ContainerInspectResponse) -> ContainerDetails {
    let running = inspect
        .state
        .as_ref()
        .and_then(|s| s.status.as_ref())
        .is_some_and(|status| *status == ContainerStateStatusEnum::RUNNING);

    let Some(network_settings) = inspect.network_settings else {
        return ContainerDetails {
            running,
            ..Default::default()
        };
    };

    let mut networks: Vec<(String, String)> = network_settings
        .networks
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(name, endpoint)| endpoint.ip_address.map(|ip| (name, ip)))
        .collect();
    networks.sort();

    let published_ports = network_settings
        .ports
        .unwrap_or_default()
        .into_iter()
        .flat_map(|(container_port, bindings)| {
            bindings
                .unwrap_or_default()
                .into_iter()
                .map(move |binding| PublishedPort {
                    container_port: container_port.clone(),
                    host_ip: binding.host_ip,
                    host_port: binding.host_port,
                })
        })
        .collect();

    ContainerDetails {
        running,
        ip_address: network_settings.ip_address,
        network_addresses: networks.into_iter().map(|(_, ip)| ip).collect(),
        published_ports,
    }
}

#[async_trait]
impl RuntimeClient for DockerSession {
    async fn list_containers(&self, name: &str) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let list_options = ListContainersOptions {
            all: true,
            filters: Some(HashMap::from([(
                "name".to_string(),
                vec![name.to_string()],
            )])),
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(list_options))
            .await
            .map_err(|e| classify("list containers", name, e))?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                Some(ContainerSummary {
                    id: c.id?,
                    names: c.names.unwrap_or_default(),
                })
            })
            .collect())
    }

    /// Always pulls, so a floating tag such as `postgres:13` tracks the registry
    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        let create_image_options = CreateImageOptions {
            from_image: Some(image.to_string()),
            ..Default::default()
        };

        let mut pull_stream = self
            .docker
            .create_image(Some(create_image_options), None, None);

        while let Some(result) = pull_stream.next().await {
            if let Err(e) = result {
                return Err(classify("pull image", image, e));
            }
        }

        debug!("Successfully pulled image: {}", image);
        Ok(())
    }

    async fn create_container(
        &self,
        name: &str,
        config: &RuntimeConfig,
    ) -> Result<String, RuntimeError> {
        let host_config = config.host_binding.as_ref().map(|binding| HostConfig {
            port_bindings: Some(HashMap::from([(
                config.port_key(),
                Some(vec![PortBinding {
                    host_ip: Some(binding.host_ip.clone()),
                    host_port: Some(config.port.to_string()),
                }]),
            )])),
            ..Default::default()
        });

        let container_config = ContainerCreateBody {
            image: Some(config.image.clone()),
            tty: Some(false),
            env: Some(config.environment.clone()),
            exposed_ports: Some(HashMap::from([(config.port_key(), HashMap::new())])),
            host_config,
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: Some(name.to_string()),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(Some(create_options), container_config)
            .await
            .map_err(|e| classify("create container", name, e))?;

        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        match self
            .docker
            .start_container(id, None::<StartContainerOptions>)
            .await
        {
            Err(e) if !is_not_modified(&e) => Err(classify("start container", id, e)),
            _ => Ok(()),
        }
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, RuntimeError> {
        let inspect = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| classify("inspect container", id, e))?;

        Ok(container_details(inspect))
    }

    async fn stop_container(&self, id: &str) -> Result<(), RuntimeError> {
        match self
            .docker
            .stop_container(id, None::<StopContainerOptions>)
            .await
        {
            Err(e) if !is_not_modified(&e) => Err(classify("stop container", id, e)),
            _ => Ok(()),
        }
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        let remove_options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        self.docker
            .remove_container(id, Some(remove_options))
            .await
            .map_err(|e| classify("remove container", id, e))
    }

    async fn fetch_logs(&self, id: &str, tail: usize) -> Result<String, RuntimeError> {
        let options = LogsOptionsBuilder::new()
            .stdout(true)
            .stderr(true)
            .tail(&tail.to_string())
            .build();

        let results = self
            .docker
            .logs(id, Some(options))
            .collect::<Vec<Result<LogOutput, _>>>()
            .await;

        let mut logs = String::new();
        for result in results {
            let output = result.map_err(|e| classify("fetch logs", id, e))?;
            logs.push_str(&output.to_string());
        }
        Ok(logs)
    }

    async fn reopen(&self) -> Result<Self, RuntimeError> {
        Self::connect().await
    }
}
