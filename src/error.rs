//! Error types for the provisioning lifecycle

use std::time::Duration;

use thiserror::Error;

use crate::docker::lifecycle::ContainerState;
use crate::probe::ProbeError;

/// A call to the container runtime failed
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("{operation} failed: {source}")]
    Docker {
        operation: &'static str,
        #[source]
        source: bollard::errors::Error,
    },

    #[error("no such container: {0}")]
    NotFound(String),

    #[error("container name already in use: {0}")]
    Conflict(String),

    #[error("{operation} failed: {message}")]
    Other {
        operation: &'static str,
        message: String,
    },
}

impl RuntimeError {
    pub fn other(operation: &'static str, message: impl Into<String>) -> Self {
        RuntimeError::Other {
            operation,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_))
    }
}

/// Reasons a provisioning attempt (or its teardown) failed
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("container runtime error: {0}")]
    RuntimeClient(#[from] RuntimeError),

    #[error("container {name:?} already exists with ID {id}")]
    ContainerNameConflict { name: String, id: String },

    #[error("container {container} has no usable network address")]
    AddressUnavailable { container: String },

    #[error(
        "service at {endpoint} did not become ready after {attempts} attempt(s) in {elapsed:?}\n\
         Last error: {last_error}\n\n\
         Container logs (most recent):\n{logs}"
    )]
    RetryExhausted {
        endpoint: String,
        attempts: u32,
        elapsed: Duration,
        #[source]
        last_error: ProbeError,
        logs: String,
    },

    #[error("provisioning cancelled")]
    Cancelled,

    #[error("cannot {operation} container {container} in state {state:?}")]
    InvalidState {
        container: String,
        state: ContainerState,
        operation: &'static str,
    },

    #[error("failed to stop container {container}: {source}")]
    Teardown {
        container: String,
        #[source]
        source: RuntimeError,
    },
}

/// A service descriptor was built from unusable values
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field} contains characters not allowed in a connection string: {value:?}")]
    InvalidCharacters { field: String, value: String },

    #[error("port must be non-zero")]
    InvalidPort,
}
