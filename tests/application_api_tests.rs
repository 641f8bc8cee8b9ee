use anyhow::Result;
use shipyard::api::{ApplicationInput, ApplicationRecord, ContainerInput, container_uri};
use shipyard::domain::{Host, HostId, Protocol, ShipyardError};
use shipyard::services::{CallPolicy, Orchestrator, RetryPolicy};
use shipyard::test_support::FakeHostClient;
use std::sync::Arc;
use std::time::Duration;

fn setup() -> (Orchestrator, Arc<FakeHostClient>) {
    let orchestrator = Orchestrator::with_policy(CallPolicy {
        timeout: Duration::from_millis(500),
        retry: RetryPolicy::none(),
    });
    let fake = Arc::new(FakeHostClient::new("a"));
    orchestrator
        .register_host(Host::new(HostId::new("local"), "local", "127.0.0.1"), fake.clone())
        .unwrap();
    (orchestrator, fake)
}

fn test_app_input() -> ApplicationInput {
    serde_json::from_str(
        r#"{
            "name": "test-app",
            "description": "test app",
            "domain_name": "test.example.com",
            "backend_port": 1234,
            "protocol": "http"
        }"#,
    )
    .unwrap()
}

fn test_container_input() -> ContainerInput {
    serde_json::from_str(
        r#"{
            "image": "base",
            "command": "/bin/bash",
            "description": "test app",
            "ports": [],
            "hosts": ["/api/v1/hosts/local/"]
        }"#,
    )
    .unwrap()
}

#[test]
fn test_create_application() -> Result<()> {
    let (orchestrator, _) = setup();
    let input = test_app_input();

    orchestrator.create_application(&input.to_draft()?)?;

    let apps = orchestrator.list_applications();
    let last = ApplicationRecord::from(apps.last().unwrap());
    assert_eq!(last.name, input.name);
    assert_eq!(last.domain_name, input.domain_name);
    assert_eq!(last.resource_uri, "/api/v1/applications/1/");
    Ok(())
}

#[test]
fn test_application_detail_has_every_field() -> Result<()> {
    let (orchestrator, _) = setup();
    let app = orchestrator.create_application(&test_app_input().to_draft()?)?;

    let value = serde_json::to_value(ApplicationRecord::from(&orchestrator.get_application(app.id)?))?;
    for key in [
        "name",
        "description",
        "domain_name",
        "backend_port",
        "protocol",
        "containers",
    ] {
        assert!(value.get(key).is_some(), "missing {}", key);
    }
    assert_eq!(value["backend_port"], 1234);
    assert_eq!(value["containers"], serde_json::json!([]));
    Ok(())
}

#[test]
fn test_update_application_with_container() -> Result<()> {
    let (orchestrator, _) = setup();
    let app = orchestrator.create_application(&test_app_input().to_draft()?)?;

    let input = test_container_input();
    let created = orchestrator.create_containers(&input.to_spec(), &input.host_ids()?)?;
    assert_eq!(created.len(), 1);
    assert_eq!(container_uri(created[0].id), "/api/v1/containers/1/");

    let mut update = test_app_input();
    update.name = "app-updated".into();
    update.containers = Some(vec!["/api/v1/containers/1/".into()]);
    orchestrator.update_application(app.id, &update.to_draft()?)?;

    let record = ApplicationRecord::from(&orchestrator.get_application(app.id)?);
    assert_eq!(record.name, "app-updated");
    assert_eq!(record.containers, vec!["/api/v1/containers/1/".to_string()]);
    assert_eq!(
        orchestrator.get_container(created[0].id)?.application,
        Some(app.id)
    );
    Ok(())
}

#[test]
fn test_delete_application() -> Result<()> {
    let (orchestrator, _) = setup();
    let app = orchestrator.create_application(&test_app_input().to_draft()?)?;

    orchestrator.delete_application(app.id)?;

    let err = orchestrator.get_application(app.id).unwrap_err();
    assert!(err.is_not_found());
    assert!(orchestrator.delete_application(app.id).unwrap_err().is_not_found());
    Ok(())
}

#[test]
fn test_duplicate_domain_is_rejected() -> Result<()> {
    let (orchestrator, _) = setup();
    orchestrator.create_application(&test_app_input().to_draft()?)?;

    let mut second = test_app_input();
    second.name = "other-app".into();
    second.domain_name = "TEST.example.com".into();

    assert_eq!(
        orchestrator.create_application(&second.to_draft()?),
        Err(ShipyardError::DuplicateDomain("test.example.com".into()))
    );
    assert_eq!(orchestrator.list_applications().len(), 1);
    Ok(())
}

#[test]
fn test_invalid_port_is_rejected() -> Result<()> {
    let (orchestrator, _) = setup();

    for port in [0, 65536] {
        let mut input = test_app_input();
        input.backend_port = port;
        assert_eq!(
            orchestrator.create_application(&input.to_draft()?),
            Err(ShipyardError::InvalidPort(port))
        );
    }

    let mut tcp = test_app_input();
    tcp.protocol = Protocol::Tcp;
    tcp.backend_port = 65535;
    assert!(orchestrator.create_application(&tcp.to_draft()?).is_ok());
    Ok(())
}

#[test]
fn test_list_applications_in_id_order() -> Result<()> {
    let (orchestrator, _) = setup();

    for n in 1..=3 {
        let mut input = test_app_input();
        input.name = format!("app-{}", n);
        input.domain_name = format!("app{}.example.com", n);
        orchestrator.create_application(&input.to_draft()?)?;
    }

    let names: Vec<String> = orchestrator
        .list_applications()
        .into_iter()
        .map(|a| a.name)
        .collect();
    assert_eq!(names, vec!["app-1", "app-2", "app-3"]);
    Ok(())
}
