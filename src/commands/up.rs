use anyhow::{Context, Result};
use std::future::Future;
use testsql::config::Config;
use testsql::{PostgresDescriptor, ProvisionOptions, Provisioner};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Provision the configured database, print its connection string and hold
/// it until `shutdown` completes
pub async fn cmd_up<S>(config: &Config, shutdown: S) -> Result<()>
where
    S: Future<Output = ()>,
{
    let descriptor = PostgresDescriptor::from_config(&config.postgres)
        .context("Invalid postgres configuration")?;

    let provisioner = Provisioner::connect(ProvisionOptions::from(config)).await?;

    let cancel = CancellationToken::new();
    let provisioning = provisioner.provision(&cancel, &descriptor);
    tokio::pin!(shutdown);
    tokio::pin!(provisioning);

    // Cancelling lets an in-flight attempt stop what it already started
    let mut shutdown_requested = false;
    let result = tokio::select! {
        result = &mut provisioning => result,
        _ = &mut shutdown => {
            info!("Shutdown requested, cancelling provisioning...");
            shutdown_requested = true;
            cancel.cancel();
            provisioning.await
        }
    };
    let resource = result?;

    println!("{}", resource.connection_descriptor());

    if !shutdown_requested {
        info!("Database is up; press Ctrl-C to stop it");
        shutdown.await;
    }

    info!("Stopping database...");
    resource
        .release()
        .await
        .context("Failed to stop the database container")?;
    Ok(())
}
