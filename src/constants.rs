use std::time::Duration;

// PostgreSQL descriptor defaults
pub const DEFAULT_POSTGRES_PORT: u16 = 5432;
pub const DEFAULT_POSTGRES_DB: &str = "postgres";
pub const DEFAULT_POSTGRES_USER: &str = "postgres";
pub const DEFAULT_POSTGRES_PASSWORD: &str = "postgres";
pub const DEFAULT_POSTGRES_IMAGE: &str = "postgres:13";
pub const DEFAULT_CONTAINER_NAME: &str = "testsql-postgres";

// Host address used when a service port is published on the loopback interface
pub const LOCALHOST_IP: &str = "127.0.0.1";

// Readiness backoff defaults
pub const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_MULTIPLIER: f64 = 1.5;
pub const DEFAULT_RANDOMIZATION_FACTOR: f64 = 0.5;
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_ELAPSED_TIME: Duration = Duration::from_secs(120);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// Diagnostics and cleanup
pub const DEFAULT_LOG_TAIL_LINES: usize = 50;
pub const LOG_FETCH_TIMEOUT: Duration = Duration::from_secs(3);
pub const ABORT_CLEANUP_TIMEOUT: Duration = Duration::from_secs(10);

// Configuration file name
pub const CONFIG_FILENAME: &str = "testsql.yaml";

// Environment variable overrides
pub const KEEP_ON_FAILURE_ENV: &str = "TESTSQL_KEEP_ON_FAILURE";
pub const IMAGE_ENV: &str = "TESTSQL_IMAGE";
pub const CONTAINER_NAME_ENV: &str = "TESTSQL_CONTAINER_NAME";
