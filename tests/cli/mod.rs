/// CLI integration tests that exercise the actual binary with assert_cmd.
///
/// Use `CliTestHelper::command()` to run the binary inside a scratch project:
/// ```rust
/// helper.command()
///     .args(["config"])
///     .assert()
///     .success()
///     .stdout(predicate::str::contains("postgres:"));
/// ```
pub mod basic;
