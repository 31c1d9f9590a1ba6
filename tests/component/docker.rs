//! Provisioning against a real Docker daemon

use std::time::Duration;

use testsql::descriptor::PostgresDescriptor;
use testsql::docker::{ContainerHandle, ContainerLifecycle, ContainerState, RuntimeClient};
use testsql::{ProvisionError, Provisioner};
use tokio_util::sync::CancellationToken;

use crate::helpers::docker::{docker_or_skip, test_options, unique_container_name};

#[tokio::test]
async fn test_docker_postgres_container() {
    let Some(session) = docker_or_skip().await else {
        return;
    };

    let descriptor = PostgresDescriptor::builder()
        .image("postgres:16-alpine")
        .container_name(unique_container_name("testsql_component"))
        .password("test_password")
        .build()
        .unwrap();

    let provisioner = Provisioner::new(session, test_options(Duration::from_secs(120)));
    let resource = provisioner
        .provision(&CancellationToken::new(), &descriptor)
        .await
        .unwrap();

    assert!(resource.connection_descriptor().starts_with("host="));
    assert!(resource.connection_descriptor().contains("password=test_password"));

    resource.release().await.unwrap();
    resource.release().await.unwrap();
}

#[tokio::test]
async fn test_failed_startup_includes_logs() {
    let Some(session) = docker_or_skip().await else {
        return;
    };

    // An image whose default command exits at once never opens the port
    let descriptor = PostgresDescriptor::builder()
        .image("alpine:3.20")
        .container_name(unique_container_name("testsql_fail"))
        .build()
        .unwrap();

    let provisioner = Provisioner::new(session.clone(), test_options(Duration::from_secs(3)));
    let result = provisioner
        .provision(&CancellationToken::new(), &descriptor)
        .await;

    match result {
        Err(ProvisionError::RetryExhausted { logs, .. }) => {
            assert!(!logs.is_empty());
        }
        // A stopped container may lose its address before the probe starts
        Err(ProvisionError::AddressUnavailable { .. }) => {}
        other => panic!("expected the attempt to fail, got {:?}", other.map(|_| ())),
    }

    let leftovers = session
        .list_containers(descriptor_name(&descriptor))
        .await
        .unwrap();
    assert!(leftovers.is_empty(), "container should have been removed");
}

#[tokio::test]
async fn test_pull_refreshes_image_already_present() {
    let Some(session) = docker_or_skip().await else {
        return;
    };

    // The second pull goes to the registry again and still succeeds
    session.pull_image("alpine:3.20").await.unwrap();
    session.pull_image("alpine:3.20").await.unwrap();
}

#[tokio::test]
async fn test_stop_is_idempotent_against_daemon() {
    let Some(session) = docker_or_skip().await else {
        return;
    };

    let descriptor = PostgresDescriptor::builder()
        .image("postgres:16-alpine")
        .container_name(unique_container_name("testsql_stop"))
        .build()
        .unwrap();

    let lifecycle = ContainerLifecycle::new(std::sync::Arc::new(session), Default::default());
    let cancel = CancellationToken::new();
    let mut handle = ContainerHandle::new(descriptor_name(&descriptor));
    let config = testsql::ServiceDescriptor::runtime_config(&descriptor);

    lifecycle
        .create_or_reuse(&cancel, &config, &config.image, &mut handle)
        .await
        .unwrap();
    lifecycle.start(&cancel, &mut handle).await.unwrap();
    lifecycle.start(&cancel, &mut handle).await.unwrap();
    assert_eq!(handle.state(), ContainerState::Running);

    lifecycle.stop(&mut handle, true).await.unwrap();
    lifecycle.stop(&mut handle, true).await.unwrap();
    assert_eq!(handle.state(), ContainerState::Stopped);
}

fn descriptor_name(descriptor: &PostgresDescriptor) -> &str {
    testsql::ServiceDescriptor::container_name(descriptor)
}
