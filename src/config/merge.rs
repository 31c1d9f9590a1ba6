use crate::config::types::*;

/// Trait for merging optional configuration values
pub trait Merge<T> {
    fn merge(self, other: T) -> T;
}

impl<T> Merge<Option<T>> for Option<T> {
    fn merge(self, other: Option<T>) -> Option<T> {
        other.or(self)
    }
}

/// Merge two optional sections field by field, `other` winning
fn merge_section<T>(base: Option<T>, other: Option<T>, merge_with: fn(T, T) -> T) -> Option<T> {
    match (base, other) {
        (None, None) => None,
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (Some(a), Some(b)) => Some(merge_with(a, b)),
    }
}

impl Merge<ConfigInput> for ConfigInput {
    fn merge(self, other: ConfigInput) -> ConfigInput {
        ConfigInput {
            postgres: merge_section(self.postgres, other.postgres, PostgresInput::merge_with),
            retry: merge_section(self.retry, other.retry, RetryInput::merge_with),
            docker: merge_section(self.docker, other.docker, DockerInput::merge_with),
        }
    }
}

impl PostgresInput {
    pub fn merge_with(self, other: PostgresInput) -> PostgresInput {
        PostgresInput {
            image: other.image.or(self.image),
            container_name: other.container_name.or(self.container_name),
            port: other.port.or(self.port),
            database: other.database.or(self.database),
            user: other.user.or(self.user),
            password: other.password.or(self.password),
            bind_to_localhost: other.bind_to_localhost.or(self.bind_to_localhost),
            params: other.params.or(self.params),
        }
    }
}

impl RetryInput {
    pub fn merge_with(self, other: RetryInput) -> RetryInput {
        RetryInput {
            initial_interval_ms: other.initial_interval_ms.or(self.initial_interval_ms),
            multiplier: other.multiplier.or(self.multiplier),
            randomization_factor: other.randomization_factor.or(self.randomization_factor),
            max_interval_ms: other.max_interval_ms.or(self.max_interval_ms),
            max_elapsed_ms: other.max_elapsed_ms.or(self.max_elapsed_ms),
            connect_timeout_ms: other.connect_timeout_ms.or(self.connect_timeout_ms),
        }
    }
}

impl DockerInput {
    pub fn merge_with(self, other: DockerInput) -> DockerInput {
        DockerInput {
            host: other.host.or(self.host),
            on_name_conflict: other.on_name_conflict.or(self.on_name_conflict),
            keep_on_failure: other.keep_on_failure.or(self.keep_on_failure),
            remove_on_release: other.remove_on_release.or(self.remove_on_release),
            log_tail_lines: other.log_tail_lines.or(self.log_tail_lines),
        }
    }
}
