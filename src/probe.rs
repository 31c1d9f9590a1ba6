//! Transport-level readiness probing

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::constants::DEFAULT_CONNECT_TIMEOUT;

/// A single probe attempt failed. Always treated as transient.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("connection to {endpoint} failed: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("connection to {endpoint} timed out after {timeout:?}")]
    Timeout { endpoint: String, timeout: Duration },
}

/// Answers "can a client open a connection to this service right now?"
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn probe(&self, address: &str, port: u16) -> Result<(), ProbeError>;
}

/// Opens a TCP connection and closes it immediately, without any
/// service-specific handshake
#[derive(Debug, Clone)]
pub struct TcpProbe {
    connect_timeout: Duration,
}

impl TcpProbe {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

#[async_trait]
impl ReadinessProbe for TcpProbe {
    async fn probe(&self, address: &str, port: u16) -> Result<(), ProbeError> {
        let endpoint = endpoint(address, port);
        debug!("Attempting connection to {}", endpoint);

        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(endpoint.as_str()))
            .await
        {
            Ok(Ok(stream)) => {
                drop(stream);
                Ok(())
            }
            Ok(Err(source)) => {
                trace!("Connection test failed to {}: {}", endpoint, source);
                Err(ProbeError::Connect { endpoint, source })
            }
            Err(_) => Err(ProbeError::Timeout {
                endpoint,
                timeout: self.connect_timeout,
            }),
        }
    }
}

/// `host:port`, bracketing IPv6 literals
pub fn endpoint(address: &str, port: u16) -> String {
    if address.contains(':') && !address.starts_with('[') {
        format!("[{}]:{}", address, port)
    } else {
        format!("{}:{}", address, port)
    }
}
