//! PostgreSQL service descriptor

use std::collections::BTreeMap;

use crate::config::types::PostgresConfig;
use crate::constants::{
    DEFAULT_CONTAINER_NAME, DEFAULT_POSTGRES_DB, DEFAULT_POSTGRES_IMAGE,
    DEFAULT_POSTGRES_PASSWORD, DEFAULT_POSTGRES_PORT, DEFAULT_POSTGRES_USER, LOCALHOST_IP,
};
use crate::descriptor::{HostBinding, ServiceDescriptor};
use crate::error::DescriptorError;

/// Descriptor for a PostgreSQL container, producing keyword/value DSNs
/// understood by libpq-compatible drivers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresDescriptor {
    image: String,
    container_name: String,
    port: u16,
    database: String,
    user: String,
    password: String,
    params: BTreeMap<String, String>,
    bind_to_localhost: bool,
}

impl PostgresDescriptor {
    pub fn builder() -> PostgresDescriptorBuilder {
        PostgresDescriptorBuilder::default()
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Build a descriptor from resolved configuration
    pub fn from_config(config: &PostgresConfig) -> Result<Self, DescriptorError> {
        let mut builder = Self::builder()
            .image(&config.image)
            .container_name(&config.container_name)
            .port(config.port)
            .database(&config.database)
            .user(&config.user)
            .password(&config.password)
            .bind_to_localhost(config.bind_to_localhost)
            .clear_params();
        for (key, value) in &config.params {
            builder = builder.param(key, value);
        }
        builder.build()
    }
}

impl Default for PostgresDescriptor {
    fn default() -> Self {
        Self {
            image: DEFAULT_POSTGRES_IMAGE.to_string(),
            container_name: DEFAULT_CONTAINER_NAME.to_string(),
            port: DEFAULT_POSTGRES_PORT,
            database: DEFAULT_POSTGRES_DB.to_string(),
            user: DEFAULT_POSTGRES_USER.to_string(),
            password: DEFAULT_POSTGRES_PASSWORD.to_string(),
            params: BTreeMap::from([("sslmode".to_string(), "disable".to_string())]),
            bind_to_localhost: false,
        }
    }
}

impl ServiceDescriptor for PostgresDescriptor {
    fn container_image(&self) -> &str {
        &self.image
    }

    fn container_name(&self) -> &str {
        &self.container_name
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn environment(&self) -> Vec<String> {
        vec![
            format!("POSTGRES_PASSWORD={}", self.password),
            format!("POSTGRES_USER={}", self.user),
            format!("POSTGRES_DB={}", self.database),
        ]
    }

    fn host_binding(&self) -> Option<HostBinding> {
        self.bind_to_localhost.then(|| HostBinding {
            host_ip: LOCALHOST_IP.to_string(),
        })
    }

    fn data_source_name(&self, address: &str) -> String {
        let mut dsn = format!(
            "host={} user={} password={} dbname={} port={}",
            address, self.user, self.password, self.database, self.port
        );
        for (key, value) in &self.params {
            dsn.push_str(&format!(" {}={}", key, value));
        }
        dsn
    }
}

/// Builder for [`PostgresDescriptor`]; starts from the defaults
#[derive(Debug, Clone, Default)]
pub struct PostgresDescriptorBuilder {
    inner: PostgresDescriptor,
}

impl PostgresDescriptorBuilder {
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.inner.image = image.into();
        self
    }

    pub fn container_name(mut self, name: impl Into<String>) -> Self {
        self.inner.container_name = name.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.inner.port = port;
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.inner.database = database.into();
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.inner.user = user.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.inner.password = password.into();
        self
    }

    /// Extra `key=value` connection parameter appended to the DSN
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner.params.insert(key.into(), value.into());
        self
    }

    /// Drop all extra parameters, including the default `sslmode=disable`
    pub fn clear_params(mut self) -> Self {
        self.inner.params.clear();
        self
    }

    /// Publish the service port on 127.0.0.1 and connect through it
    pub fn bind_to_localhost(mut self, bind: bool) -> Self {
        self.inner.bind_to_localhost = bind;
        self
    }

    pub fn build(self) -> Result<PostgresDescriptor, DescriptorError> {
        let d = self.inner;

        for (field, value) in [
            ("image", &d.image),
            ("container name", &d.container_name),
            ("user", &d.user),
            ("database", &d.database),
        ] {
            if value.is_empty() {
                return Err(DescriptorError::Empty { field });
            }
        }
        if d.port == 0 {
            return Err(DescriptorError::InvalidPort);
        }

        check_dsn_value("user", &d.user)?;
        check_dsn_value("password", &d.password)?;
        check_dsn_value("database", &d.database)?;
        for (key, value) in &d.params {
            if key.is_empty() {
                return Err(DescriptorError::Empty {
                    field: "parameter name",
                });
            }
            if key.contains('=') {
                return Err(DescriptorError::InvalidCharacters {
                    field: "parameter name".to_string(),
                    value: key.clone(),
                });
            }
            check_dsn_value(key, key)?;
            check_dsn_value(key, value)?;
        }

        Ok(d)
    }
}

/// Reject values that would need quoting in a keyword/value connection string
fn check_dsn_value(field: &str, value: &str) -> Result<(), DescriptorError> {
    if value
        .chars()
        .any(|c| c.is_whitespace() || c == '\'' || c == '"' || c == '\\')
    {
        return Err(DescriptorError::InvalidCharacters {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
    Ok(())
}
