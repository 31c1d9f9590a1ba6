//! End-to-end provisioning against the in-memory runtime

use std::time::{Duration, Instant};

use rstest::rstest;
use testsql::config::NameConflictPolicy;
use testsql::descriptor::{HostBinding, ServiceDescriptor};
use testsql::retry::ExponentialBackoff;
use testsql::testing::{FakeRuntime, RuntimeCall, ScriptedProbe};
use testsql::{PostgresDescriptor, ProvisionError, ProvisionOptions, ProvisionState, Provisioner};
use tokio_util::sync::CancellationToken;

fn options() -> ProvisionOptions {
    ProvisionOptions {
        backoff: ExponentialBackoff {
            initial_interval: Duration::from_millis(10),
            multiplier: 2.0,
            randomization_factor: 0.5,
            max_interval: Duration::from_millis(40),
            max_elapsed_time: Some(Duration::from_millis(250)),
        },
        keep_on_failure: false,
        ..ProvisionOptions::default()
    }
}

fn sample_descriptor() -> PostgresDescriptor {
    PostgresDescriptor::builder()
        .port(5432)
        .password("x")
        .user("y")
        .database("z")
        .image("db:13")
        .container_name("test-db-1")
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_connection_descriptor_for_resolved_address() {
    let runtime = FakeRuntime::new();
    let provisioner =
        Provisioner::new(runtime.clone(), options()).with_probe(ScriptedProbe::ready());

    let resource = provisioner
        .provision(&CancellationToken::new(), &sample_descriptor())
        .await
        .unwrap();

    assert_eq!(
        resource.connection_descriptor(),
        "host=172.17.0.2 user=y password=x dbname=z port=5432 sslmode=disable"
    );

    let containers = runtime.containers();
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].name, "test-db-1");
    assert_eq!(containers[0].config.image, "db:13");
    assert_eq!(
        containers[0].config.environment,
        vec!["POSTGRES_PASSWORD=x", "POSTGRES_USER=y", "POSTGRES_DB=z"]
    );

    resource.release().await.unwrap();
}

#[tokio::test]
async fn test_second_provision_reuses_container() {
    let runtime = FakeRuntime::new();
    let provisioner =
        Provisioner::new(runtime.clone(), options()).with_probe(ScriptedProbe::ready());
    let cancel = CancellationToken::new();

    let first = provisioner.provision(&cancel, &sample_descriptor()).await.unwrap();
    let second = provisioner.provision(&cancel, &sample_descriptor()).await.unwrap();

    assert_eq!(first.connection_descriptor(), second.connection_descriptor());
    assert_eq!(
        runtime.count(|c| matches!(c, RuntimeCall::CreateContainer(_))),
        1
    );
    assert_eq!(
        runtime.count(|c| matches!(c, RuntimeCall::PullImage(_))),
        1
    );
    assert_eq!(runtime.containers().len(), 1);

    second.release().await.unwrap();
    first.release().await.unwrap();
}

#[tokio::test]
async fn test_fail_policy_rejects_existing_container() {
    let runtime = FakeRuntime::new();
    let cancel = CancellationToken::new();
    let first = Provisioner::new(runtime.clone(), options())
        .with_probe(ScriptedProbe::ready())
        .provision(&cancel, &sample_descriptor())
        .await
        .unwrap();

    let strict = ProvisionOptions {
        conflict_policy: NameConflictPolicy::Fail,
        ..options()
    };
    let err = Provisioner::new(runtime.clone(), strict)
        .with_probe(ScriptedProbe::ready())
        .provision(&cancel, &sample_descriptor())
        .await
        .unwrap_err();

    match err {
        ProvisionError::ContainerNameConflict { name, .. } => assert_eq!(name, "test-db-1"),
        other => panic!("expected ContainerNameConflict, got {:?}", other),
    }
    // The existing container belongs to someone else and keeps running
    assert_eq!(runtime.running_containers().len(), 1);

    first.release().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_create_converges_on_one_container() {
    let runtime = FakeRuntime::new().with_create_race();
    let resource = Provisioner::new(runtime.clone(), options())
        .with_probe(ScriptedProbe::ready())
        .provision(&CancellationToken::new(), &sample_descriptor())
        .await
        .unwrap();

    assert_eq!(runtime.containers().len(), 1);
    assert!(resource.connection_descriptor().contains("dbname=z"));
    resource.release().await.unwrap();
}

#[tokio::test]
async fn test_release_twice_makes_one_stop_call() {
    let runtime = FakeRuntime::new();
    let resource = Provisioner::new(runtime.clone(), options())
        .with_probe(ScriptedProbe::ready())
        .provision(&CancellationToken::new(), &sample_descriptor())
        .await
        .unwrap();

    resource.release().await.unwrap();
    let calls = runtime.calls();
    resource.release().await.unwrap();

    assert_eq!(runtime.calls(), calls);
    assert_eq!(resource.state(), ProvisionState::Released);
    assert_eq!(
        runtime.count(|c| matches!(c, RuntimeCall::StopContainer(_))),
        1
    );
}

#[tokio::test]
async fn test_release_failure_reports_teardown() {
    let runtime = FakeRuntime::new().with_stop_failure("daemon went away");
    let resource = Provisioner::new(runtime.clone(), options())
        .with_probe(ScriptedProbe::ready())
        .provision(&CancellationToken::new(), &sample_descriptor())
        .await
        .unwrap();

    let err = resource.release().await.unwrap_err();
    assert!(matches!(err, ProvisionError::Teardown { .. }));
    // Released is terminal even when the stop failed
    assert!(resource.release().await.is_ok());
}

#[tokio::test]
async fn test_cancel_during_backoff_returns_promptly() {
    let runtime = FakeRuntime::new();
    let slow = ProvisionOptions {
        backoff: ExponentialBackoff {
            initial_interval: Duration::from_secs(30),
            max_interval: Duration::from_secs(60),
            randomization_factor: 0.0,
            ..ExponentialBackoff::default()
        },
        ..options()
    };
    let provisioner =
        Provisioner::new(runtime.clone(), slow).with_probe(ScriptedProbe::always_fail());

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let start = Instant::now();
    let err = provisioner
        .provision(&cancel, &sample_descriptor())
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::Cancelled));
    assert!(start.elapsed() < Duration::from_secs(5));
    // The container started by the cancelled attempt is stopped again
    assert!(runtime.running_containers().is_empty());
}

#[tokio::test]
async fn test_pull_failure_creates_nothing() {
    let runtime = FakeRuntime::new().with_pull_failure("manifest for db:13 not found");
    let err = Provisioner::new(runtime.clone(), options())
        .with_probe(ScriptedProbe::ready())
        .provision(&CancellationToken::new(), &sample_descriptor())
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::RuntimeClient(_)));
    assert!(runtime.containers().is_empty());
    assert_eq!(
        runtime.count(|c| matches!(c, RuntimeCall::CreateContainer(_))),
        0
    );
}

#[tokio::test]
async fn test_exhaustion_carries_last_error_and_logs() {
    let runtime = FakeRuntime::new()
        .with_logs("initdb: error: invalid option\nchild process exited with exit code 1");
    let start = Instant::now();
    let err = Provisioner::new(runtime.clone(), options())
        .with_probe(ScriptedProbe::always_fail())
        .provision(&CancellationToken::new(), &sample_descriptor())
        .await
        .unwrap_err();

    // Budget plus at most one capped step
    assert!(start.elapsed() < Duration::from_millis(250 + 40 + 200));

    match &err {
        ProvisionError::RetryExhausted {
            endpoint,
            attempts,
            logs,
            ..
        } => {
            assert_eq!(endpoint, "172.17.0.2:5432");
            assert!(*attempts > 1);
            assert!(logs.contains("exit code 1"));
        }
        other => panic!("expected RetryExhausted, got {:?}", other),
    }
    let message = err.to_string();
    assert!(message.contains("Container logs"));
    assert!(message.contains("Last error: connection to 172.17.0.2:5432 failed"));
    assert!(runtime.running_containers().is_empty());
}

#[tokio::test]
async fn test_missing_network_address_aborts() {
    let runtime = FakeRuntime::new().without_network();
    let probe = ScriptedProbe::ready();
    let provisioner = Provisioner::new(runtime.clone(), options()).with_probe(probe);

    let err = provisioner
        .provision(&CancellationToken::new(), &sample_descriptor())
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::AddressUnavailable { .. }));
    assert!(runtime.running_containers().is_empty());
}

#[rstest]
#[case(true, "host=127.0.0.1 ")]
#[case(false, "host=172.17.0.2 ")]
#[tokio::test]
async fn test_address_follows_localhost_binding(#[case] bind: bool, #[case] prefix: &str) {
    let runtime = FakeRuntime::new();
    let descriptor = PostgresDescriptor::builder()
        .container_name("bound-db")
        .bind_to_localhost(bind)
        .build()
        .unwrap();

    let resource = Provisioner::new(runtime.clone(), options())
        .with_probe(ScriptedProbe::ready())
        .provision(&CancellationToken::new(), &descriptor)
        .await
        .unwrap();

    assert!(resource.connection_descriptor().starts_with(prefix));
    resource.release().await.unwrap();
}

#[tokio::test]
async fn test_remapped_host_port_is_not_dialed() {
    // A reused container started elsewhere with `-p 15432:5432`
    let runtime = FakeRuntime::new().with_remapped_host_port(15432);
    let err = Provisioner::new(runtime.clone(), options())
        .with_probe(ScriptedProbe::always_fail())
        .provision(&CancellationToken::new(), &sample_descriptor())
        .await
        .unwrap_err();

    match err {
        ProvisionError::RetryExhausted { endpoint, .. } => {
            assert_eq!(endpoint, "172.17.0.2:5432");
        }
        other => panic!("expected RetryExhausted, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unreachable_host_falls_back_to_container_address() {
    let runtime = FakeRuntime::new();
    let with_host = ProvisionOptions {
        host: Some("10.1.2.3".to_string()),
        ..options()
    };
    let provisioner = Provisioner::new(runtime.clone(), with_host)
        .with_probe(ScriptedProbe::unreachable("10.1.2.3"));

    let resource = provisioner
        .provision(&CancellationToken::new(), &sample_descriptor())
        .await
        .unwrap();

    // The host-bound container is removed; its replacement publishes nothing
    assert_eq!(
        resource.connection_descriptor(),
        "host=172.17.0.3 user=y password=x dbname=z port=5432 sslmode=disable"
    );
    let containers = runtime.containers();
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].config.host_binding, None);
    assert_eq!(
        runtime.count(|c| matches!(c, RuntimeCall::CreateContainer(_))),
        2
    );
    assert_eq!(
        runtime.count(|c| matches!(c, RuntimeCall::RemoveContainer(_))),
        1
    );

    resource.release().await.unwrap();
}

#[tokio::test]
async fn test_host_fallback_ignores_keep_on_failure() {
    let runtime = FakeRuntime::new();
    let with_host = ProvisionOptions {
        host: Some("10.1.2.3".to_string()),
        keep_on_failure: true,
        ..options()
    };

    let err = Provisioner::new(runtime.clone(), with_host)
        .with_probe(ScriptedProbe::always_fail())
        .provision(&CancellationToken::new(), &sample_descriptor())
        .await
        .unwrap_err();

    match err {
        ProvisionError::RetryExhausted { endpoint, .. } => {
            assert_eq!(endpoint, "172.17.0.3:5432");
        }
        other => panic!("expected RetryExhausted, got {:?}", other),
    }
    // Only the fallback attempt's container is kept for debugging
    let containers = runtime.running_containers();
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].address, "172.17.0.3");
}

/// A second service type, to exercise the descriptor seam
struct EchoDescriptor;

impl ServiceDescriptor for EchoDescriptor {
    fn container_image(&self) -> &str {
        "hashicorp/http-echo:1.0"
    }

    fn container_name(&self) -> &str {
        "echo-service"
    }

    fn port(&self) -> u16 {
        5678
    }

    fn environment(&self) -> Vec<String> {
        vec!["ECHO_TEXT=hello".to_string()]
    }

    fn host_binding(&self) -> Option<HostBinding> {
        None
    }

    fn data_source_name(&self, address: &str) -> String {
        format!("http://{}:{}/", address, self.port())
    }
}

#[tokio::test]
async fn test_custom_descriptor() {
    let runtime = FakeRuntime::new();
    let resource = Provisioner::new(runtime.clone(), options())
        .with_probe(ScriptedProbe::succeed_after(1))
        .provision(&CancellationToken::new(), &EchoDescriptor)
        .await
        .unwrap();

    assert_eq!(resource.connection_descriptor(), "http://172.17.0.2:5678/");
    assert_eq!(runtime.containers()[0].config.port_key(), "5678/tcp");
    resource.release().await.unwrap();
}
