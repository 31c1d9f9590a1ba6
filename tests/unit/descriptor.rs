use rstest::rstest;
use testsql::descriptor::{HostBinding, RuntimeConfig, ServiceDescriptor};
use testsql::{DescriptorError, PostgresDescriptor};

#[test]
fn test_runtime_config_carries_descriptor_fields() {
    let descriptor = PostgresDescriptor::builder()
        .image("db:13")
        .container_name("test-db-1")
        .port(5432)
        .password("x")
        .user("y")
        .database("z")
        .build()
        .unwrap();

    assert_eq!(
        descriptor.runtime_config(),
        RuntimeConfig {
            image: "db:13".to_string(),
            port: 5432,
            environment: vec![
                "POSTGRES_PASSWORD=x".to_string(),
                "POSTGRES_USER=y".to_string(),
                "POSTGRES_DB=z".to_string(),
            ],
            host_binding: None,
        }
    );
}

#[test]
fn test_localhost_binding_publishes_service_port() {
    let descriptor = PostgresDescriptor::builder()
        .port(6543)
        .bind_to_localhost(true)
        .build()
        .unwrap();

    assert_eq!(
        descriptor.runtime_config().host_binding,
        Some(HostBinding {
            host_ip: "127.0.0.1".to_string(),
        })
    );
}

#[rstest]
#[case::empty_name(PostgresDescriptor::builder().container_name(""))]
#[case::zero_port(PostgresDescriptor::builder().port(0))]
#[case::space_in_password(PostgresDescriptor::builder().password("two words"))]
fn test_invalid_descriptors_rejected(#[case] builder: testsql::descriptor::PostgresDescriptorBuilder) {
    let err: DescriptorError = builder.build().unwrap_err();
    assert!(!err.to_string().is_empty());
}
