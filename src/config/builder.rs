use crate::config::{merge::Merge, types::*};
use crate::constants::{CONTAINER_NAME_ENV, IMAGE_ENV, KEEP_ON_FAILURE_ENV};
use anyhow::{Result, bail};
use std::time::Duration;

type EnvLookup = Box<dyn Fn(&str) -> Option<String>>;

pub struct ConfigBuilder {
    config_input: ConfigInput,
    env: EnvLookup,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config_input: ConfigInput::default(),
            env: Box::new(|key| std::env::var(key).ok()),
        }
    }

    pub fn with_file(mut self, file_input: ConfigInput) -> Self {
        self.config_input = self.config_input.merge(file_input);
        self
    }

    pub fn with_cli_args(mut self, cli_input: ConfigInput) -> Self {
        self.config_input = self.config_input.merge(cli_input);
        self
    }

    /// Replace the process environment as the source of fallback values
    pub fn with_env_lookup(mut self, lookup: impl Fn(&str) -> Option<String> + 'static) -> Self {
        self.env = Box::new(lookup);
        self
    }

    pub fn resolve(self) -> Result<Config> {
        let defaults = Config::default();

        let config = Config {
            postgres: self.resolve_postgres(&defaults.postgres),
            retry: self.resolve_retry(&defaults.retry),
            docker: self.resolve_docker(&defaults.docker)?,
        };
        validate(&config)?;
        Ok(config)
    }

    fn resolve_postgres(&self, defaults: &PostgresConfig) -> PostgresConfig {
        let pg_input = self.config_input.postgres.as_ref();

        PostgresConfig {
            image: pg_input
                .and_then(|p| p.image.as_ref())
                .cloned()
                .or_else(|| (self.env)(IMAGE_ENV))
                .unwrap_or_else(|| defaults.image.clone()),
            container_name: pg_input
                .and_then(|p| p.container_name.as_ref())
                .cloned()
                .or_else(|| (self.env)(CONTAINER_NAME_ENV))
                .unwrap_or_else(|| defaults.container_name.clone()),
            port: pg_input.and_then(|p| p.port).unwrap_or(defaults.port),
            database: pg_input
                .and_then(|p| p.database.as_ref())
                .cloned()
                .unwrap_or_else(|| defaults.database.clone()),
            user: pg_input
                .and_then(|p| p.user.as_ref())
                .cloned()
                .unwrap_or_else(|| defaults.user.clone()),
            password: pg_input
                .and_then(|p| p.password.as_ref())
                .cloned()
                .unwrap_or_else(|| defaults.password.clone()),
            bind_to_localhost: pg_input
                .and_then(|p| p.bind_to_localhost)
                .unwrap_or(defaults.bind_to_localhost),
            params: pg_input
                .and_then(|p| p.params.as_ref())
                .cloned()
                .unwrap_or_else(|| defaults.params.clone()),
        }
    }

    fn resolve_retry(&self, defaults: &RetryConfig) -> RetryConfig {
        let retry_input = self.config_input.retry.as_ref();
        let millis = |value: Option<u64>, default: Duration| {
            value.map(Duration::from_millis).unwrap_or(default)
        };

        let max_elapsed_time = match retry_input.and_then(|r| r.max_elapsed_ms) {
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
            None => defaults.max_elapsed_time,
        };

        RetryConfig {
            initial_interval: millis(
                retry_input.and_then(|r| r.initial_interval_ms),
                defaults.initial_interval,
            ),
            multiplier: retry_input
                .and_then(|r| r.multiplier)
                .unwrap_or(defaults.multiplier),
            randomization_factor: retry_input
                .and_then(|r| r.randomization_factor)
                .unwrap_or(defaults.randomization_factor),
            max_interval: millis(
                retry_input.and_then(|r| r.max_interval_ms),
                defaults.max_interval,
            ),
            max_elapsed_time,
            connect_timeout: millis(
                retry_input.and_then(|r| r.connect_timeout_ms),
                defaults.connect_timeout,
            ),
        }
    }

    fn resolve_docker(&self, defaults: &DockerConfig) -> Result<DockerConfig> {
        let docker_input = self.config_input.docker.as_ref();

        let keep_on_failure = match docker_input.and_then(|d| d.keep_on_failure) {
            Some(keep) => keep,
            None => match (self.env)(KEEP_ON_FAILURE_ENV) {
                Some(value) => parse_flag(KEEP_ON_FAILURE_ENV, &value)?,
                None => defaults.keep_on_failure,
            },
        };

        Ok(DockerConfig {
            host: docker_input
                .and_then(|d| d.host.as_ref())
                .filter(|host| !host.trim().is_empty())
                .cloned()
                .or_else(|| defaults.host.clone()),
            on_name_conflict: docker_input
                .and_then(|d| d.on_name_conflict)
                .unwrap_or(defaults.on_name_conflict),
            keep_on_failure,
            remove_on_release: docker_input
                .and_then(|d| d.remove_on_release)
                .unwrap_or(defaults.remove_on_release),
            log_tail_lines: docker_input
                .and_then(|d| d.log_tail_lines)
                .unwrap_or(defaults.log_tail_lines),
        })
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("{} must be a boolean, got {:?}", name, other),
    }
}

fn validate(config: &Config) -> Result<()> {
    let retry = &config.retry;

    if retry.initial_interval.is_zero() {
        bail!("retry.initial_interval_ms must be greater than zero");
    }
    if retry.max_interval < retry.initial_interval {
        bail!("retry.max_interval_ms must not be smaller than retry.initial_interval_ms");
    }
    if !retry.multiplier.is_finite() || retry.multiplier < 1.0 {
        bail!("retry.multiplier must be at least 1.0, got {}", retry.multiplier);
    }
    if !(0.0..=1.0).contains(&retry.randomization_factor) {
        bail!(
            "retry.randomization_factor must be between 0.0 and 1.0, got {}",
            retry.randomization_factor
        );
    }
    if retry.connect_timeout.is_zero() {
        bail!("retry.connect_timeout_ms must be greater than zero");
    }
    if config.postgres.port == 0 {
        bail!("postgres.port must be non-zero");
    }

    Ok(())
}
