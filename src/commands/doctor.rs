use anyhow::{Result, bail};
use testsql::DockerSession;

/// Report how the Docker daemon was (or was not) found
pub async fn cmd_doctor() -> Result<()> {
    let (available, report) = DockerSession::is_available_verbose().await;

    println!("{}", report.trim_end());
    if !available {
        bail!("Docker is not available");
    }

    println!("Docker is available");
    Ok(())
}
