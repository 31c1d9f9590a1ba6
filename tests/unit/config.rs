use anyhow::Result;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;
use testsql::config::{
    ConfigBuilder, ConfigInput, DockerArgs, NameConflictPolicy, PostgresArgs, load_config,
};
use testsql::{ProvisionOptions, ServiceDescriptor};

fn write_config(dir: &TempDir, content: &str) -> Result<String> {
    let path = dir.path().join("testsql.yaml");
    fs::write(&path, content)?;
    Ok(path.to_string_lossy().into_owned())
}

#[test]
fn test_load_config_file() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_config(
        &dir,
        r#"
postgres:
  image: postgres:15-alpine
  user: app
  bind_to_localhost: true
retry:
  max_elapsed_ms: 45000
docker:
  log_tail_lines: 10
"#,
    )?;

    let config = ConfigBuilder::new()
        .with_env_lookup(|_| None)
        .with_file(load_config(&path)?)
        .resolve()?;

    assert_eq!(config.postgres.image, "postgres:15-alpine");
    assert_eq!(config.postgres.user, "app");
    assert!(config.postgres.bind_to_localhost);
    assert_eq!(config.retry.max_elapsed_time, Some(Duration::from_secs(45)));
    assert_eq!(config.docker.log_tail_lines, 10);

    let options = ProvisionOptions::from(&config);
    assert_eq!(options.log_tail_lines, 10);
    assert_eq!(
        options.backoff.max_elapsed_time,
        Some(Duration::from_secs(45))
    );
    Ok(())
}

#[test]
fn test_malformed_config_file_is_an_error() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_config(&dir, "postgres:\n  port: not-a-number\n")?;

    let err = load_config(&path).unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to parse config file"));
    Ok(())
}

#[test]
fn test_cli_args_override_file() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_config(
        &dir,
        "postgres:\n  container_name: from-file\ndocker:\n  on_name_conflict: reuse\n",
    )?;

    let cli_input = ConfigInput {
        postgres: Some(
            PostgresArgs {
                container_name: Some("from-cli".to_string()),
                ..Default::default()
            }
            .into(),
        ),
        retry: None,
        docker: Some(
            DockerArgs {
                on_name_conflict: Some(NameConflictPolicy::Fail),
                ..Default::default()
            }
            .into(),
        ),
    };

    let config = ConfigBuilder::new()
        .with_env_lookup(|_| None)
        .with_file(load_config(&path)?)
        .with_cli_args(cli_input)
        .resolve()?;

    assert_eq!(config.postgres.container_name, "from-cli");
    assert_eq!(config.docker.on_name_conflict, NameConflictPolicy::Fail);
    // Unset CLI flags do not clobber file values
    assert!(!config.docker.keep_on_failure);
    Ok(())
}

#[test]
fn test_descriptor_from_resolved_config() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_config(
        &dir,
        r#"
postgres:
  container_name: unit-db
  password: secret
  params:
    sslmode: disable
    connect_timeout: "10"
"#,
    )?;

    let config = ConfigBuilder::new()
        .with_env_lookup(|_| None)
        .with_file(load_config(&path)?)
        .resolve()?;
    let descriptor = testsql::PostgresDescriptor::from_config(&config.postgres)?;

    assert_eq!(descriptor.container_name(), "unit-db");
    assert_eq!(
        descriptor.data_source_name("10.0.0.5"),
        "host=10.0.0.5 user=postgres password=secret dbname=postgres port=5432 \
         connect_timeout=10 sslmode=disable"
    );
    Ok(())
}
