use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::retry::ExponentialBackoff;

/// Raw configuration input - all fields Optional for merging
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ConfigInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postgres: Option<PostgresInput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryInput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker: Option<DockerInput>,
}

/// Resolved configuration with all defaults applied
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub postgres: PostgresConfig,
    pub retry: RetryConfig,
    pub docker: DockerConfig,
}

// PostgreSQL service configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct PostgresInput {
    pub image: Option<String>,
    pub container_name: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub bind_to_localhost: Option<bool>,
    pub params: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostgresConfig {
    pub image: String,
    pub container_name: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub bind_to_localhost: bool,
    pub params: BTreeMap<String, String>,
}

// Readiness retry configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RetryInput {
    pub initial_interval_ms: Option<u64>,
    pub multiplier: Option<f64>,
    pub randomization_factor: Option<f64>,
    pub max_interval_ms: Option<u64>,
    /// `0` disables the elapsed-time ceiling
    pub max_elapsed_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub initial_interval: Duration,
    pub multiplier: f64,
    pub randomization_factor: f64,
    pub max_interval: Duration,
    pub max_elapsed_time: Option<Duration>,
    pub connect_timeout: Duration,
}

impl RetryConfig {
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_interval,
            multiplier: self.multiplier,
            randomization_factor: self.randomization_factor,
            max_interval: self.max_interval,
            max_elapsed_time: self.max_elapsed_time,
        }
    }
}

/// What to do when a container with the requested name already exists
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum NameConflictPolicy {
    /// Adopt the existing container
    #[default]
    Reuse,
    /// Fail with a name conflict error
    Fail,
}

// Docker configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct DockerInput {
    /// Host IP to publish the service port on and connect through
    pub host: Option<String>,
    pub on_name_conflict: Option<NameConflictPolicy>,
    pub keep_on_failure: Option<bool>,
    pub remove_on_release: Option<bool>,
    pub log_tail_lines: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DockerConfig {
    pub host: Option<String>,
    pub on_name_conflict: NameConflictPolicy,
    pub keep_on_failure: bool,
    pub remove_on_release: bool,
    pub log_tail_lines: usize,
}

// CLI argument groups for command-specific options
#[derive(Debug, Clone, Default, Args)]
pub struct PostgresArgs {
    #[arg(long, help = "Container image to run")]
    pub image: Option<String>,

    #[arg(long, help = "Container name (reused across runs)")]
    pub container_name: Option<String>,

    #[arg(long, help = "Port the service listens on inside the container")]
    pub port: Option<u16>,

    #[arg(long, help = "Database name")]
    pub database: Option<String>,

    #[arg(long, help = "Database user")]
    pub user: Option<String>,

    #[arg(long, help = "Database password")]
    pub password: Option<String>,

    #[arg(long, help = "Publish the port on 127.0.0.1 and connect through it")]
    pub bind_to_localhost: bool,
}

#[derive(Debug, Clone, Default, Args)]
pub struct DockerArgs {
    #[arg(
        long,
        help = "Publish the port on this host IP and connect through it, falling back to the container address"
    )]
    pub host: Option<String>,

    #[arg(long, value_enum, help = "Behaviour when the container name is taken")]
    pub on_name_conflict: Option<NameConflictPolicy>,

    #[arg(long, help = "Leave the container running if provisioning fails")]
    pub keep_on_failure: bool,

    #[arg(long, help = "Remove the container on release instead of only stopping it")]
    pub remove_on_release: bool,
}

// Conversion functions from CLI args to config input
impl From<PostgresArgs> for PostgresInput {
    fn from(args: PostgresArgs) -> Self {
        Self {
            image: args.image,
            container_name: args.container_name,
            port: args.port,
            database: args.database,
            user: args.user,
            password: args.password,
            bind_to_localhost: args.bind_to_localhost.then_some(true),
            params: None, // Parameters come from file only
        }
    }
}

impl From<DockerArgs> for DockerInput {
    fn from(args: DockerArgs) -> Self {
        Self {
            host: args.host,
            on_name_conflict: args.on_name_conflict,
            keep_on_failure: args.keep_on_failure.then_some(true),
            remove_on_release: args.remove_on_release.then_some(true),
            log_tail_lines: None,
        }
    }
}

/// Fully populated input, used to print the effective configuration
impl From<&Config> for ConfigInput {
    fn from(config: &Config) -> Self {
        let millis = |d: Duration| d.as_millis() as u64;

        Self {
            postgres: Some(PostgresInput {
                image: Some(config.postgres.image.clone()),
                container_name: Some(config.postgres.container_name.clone()),
                port: Some(config.postgres.port),
                database: Some(config.postgres.database.clone()),
                user: Some(config.postgres.user.clone()),
                password: Some(config.postgres.password.clone()),
                bind_to_localhost: Some(config.postgres.bind_to_localhost),
                params: Some(config.postgres.params.clone()),
            }),
            retry: Some(RetryInput {
                initial_interval_ms: Some(millis(config.retry.initial_interval)),
                multiplier: Some(config.retry.multiplier),
                randomization_factor: Some(config.retry.randomization_factor),
                max_interval_ms: Some(millis(config.retry.max_interval)),
                max_elapsed_ms: Some(config.retry.max_elapsed_time.map_or(0, millis)),
                connect_timeout_ms: Some(millis(config.retry.connect_timeout)),
            }),
            docker: Some(DockerInput {
                host: config.docker.host.clone(),
                on_name_conflict: Some(config.docker.on_name_conflict),
                keep_on_failure: Some(config.docker.keep_on_failure),
                remove_on_release: Some(config.docker.remove_on_release),
                log_tail_lines: Some(config.docker.log_tail_lines),
            }),
        }
    }
}
