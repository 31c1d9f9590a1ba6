use anyhow::Result;
use predicates::prelude::*;

use crate::helpers::cli::CliTestHelper;

#[test]
fn test_help_lists_commands() -> Result<()> {
    let helper = CliTestHelper::new();

    helper
        .command()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("up"))
        .stdout(predicate::str::contains("config"))
        .stdout(predicate::str::contains("doctor"));

    Ok(())
}

#[test]
fn test_config_prints_defaults_without_file() -> Result<()> {
    let helper = CliTestHelper::new();

    helper
        .command()
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("image: postgres:13"))
        .stdout(predicate::str::contains("container_name: testsql-postgres"))
        .stdout(predicate::str::contains("max_elapsed_ms: 120000"));

    Ok(())
}

#[test]
fn test_config_merges_file_env_and_flags() -> Result<()> {
    let helper = CliTestHelper::new();
    helper.write_config(
        r#"
postgres:
  image: postgres:15
  container_name: from-file
docker:
  on_name_conflict: fail
"#,
    )?;

    helper
        .command()
        .env("TESTSQL_KEEP_ON_FAILURE", "1")
        .args(["config", "--container-name", "from-flag"])
        .assert()
        .success()
        .stdout(predicate::str::contains("image: postgres:15"))
        .stdout(predicate::str::contains("container_name: from-flag"))
        .stdout(predicate::str::contains("on_name_conflict: fail"))
        .stdout(predicate::str::contains("keep_on_failure: true"));

    Ok(())
}

#[test]
fn test_invalid_config_is_reported() -> Result<()> {
    let helper = CliTestHelper::new();
    helper.write_config("retry:\n  multiplier: 0.1\n")?;

    helper
        .command()
        .arg("config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("retry.multiplier"));

    Ok(())
}

#[test]
fn test_explicit_config_file_path() -> Result<()> {
    let helper = CliTestHelper::new();
    let path = helper.project_root.join("custom.yaml");
    std::fs::write(&path, "postgres:\n  database: custom_db\n")?;

    helper
        .command()
        .args(["--config-file", path.to_str().unwrap(), "config"])
        .assert()
        .success()
        .stdout(predicate::str::contains("database: custom_db"));

    Ok(())
}
