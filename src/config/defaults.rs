use crate::config::types::*;
use crate::constants::*;
use std::collections::BTreeMap;

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_POSTGRES_IMAGE.to_string(),
            container_name: DEFAULT_CONTAINER_NAME.to_string(),
            port: DEFAULT_POSTGRES_PORT,
            database: DEFAULT_POSTGRES_DB.to_string(),
            user: DEFAULT_POSTGRES_USER.to_string(),
            password: DEFAULT_POSTGRES_PASSWORD.to_string(),
            bind_to_localhost: false,
            params: BTreeMap::from([("sslmode".to_string(), "disable".to_string())]),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_interval: DEFAULT_INITIAL_INTERVAL,
            multiplier: DEFAULT_MULTIPLIER,
            randomization_factor: DEFAULT_RANDOMIZATION_FACTOR,
            max_interval: DEFAULT_MAX_INTERVAL,
            max_elapsed_time: Some(DEFAULT_MAX_ELAPSED_TIME),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            host: None,
            on_name_conflict: NameConflictPolicy::Reuse,
            keep_on_failure: false,
            remove_on_release: false,
            log_tail_lines: DEFAULT_LOG_TAIL_LINES,
        }
    }
}
