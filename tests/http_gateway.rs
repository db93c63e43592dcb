use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_json, body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use synthsync::gateway::{Gateway, GatewayError, HttpGateway, HttpGatewayConfig};
use synthsync::models::{DnsRecord, Label, TestStatus, TestType};

fn gateway(server: &MockServer, max_retries: u32) -> HttpGateway {
    let mut config =
        HttpGatewayConfig::new("ops@example.com", "secret-token").with_base_url(&server.uri());
    config.max_retries = max_retries;
    config.initial_backoff = Duration::from_millis(1);
    config.max_backoff = Duration::from_millis(4);
    config.min_request_interval = Duration::ZERO;
    HttpGateway::new(config).unwrap()
}

fn dns_test_json() -> serde_json::Value {
    json!({
        "id": "T1",
        "name": "A",
        "type": "dns",
        "status": "TEST_STATUS_ACTIVE",
        "labels": ["L1"],
        "settings": {
            "dns": {
                "target": "example.com",
                "recordType": "DNS_RECORD_A",
                "servers": ["8.8.8.8"],
                "port": 53
            },
            "agentIds": ["ag1"],
            "tasks": ["dns"],
            "period": 60
        },
        "cdate": "2024-05-01T10:00:00Z"
    })
}

#[tokio::test]
async fn test_list_tests_sends_auth_headers_and_decodes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tests"))
        .and(header("X-CH-Auth-Email", "ops@example.com"))
        .and(header("X-CH-Auth-API-Token", "secret-token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "tests": [dns_test_json()] })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let tests = gateway(&server, 0).list_tests().await.unwrap();
    assert_eq!(tests.len(), 1);
    let test = &tests[0];
    assert_eq!(test.id.as_deref(), Some("T1"));
    assert_eq!(test.kind(), Some(TestType::Dns));
    assert_eq!(test.status, Some(TestStatus::Active));
    let dns = test.settings.dns.as_ref().unwrap();
    assert_eq!(dns.record_type, Some(DnsRecord::A));
    assert_eq!(dns.port, Some(53));
    assert_eq!(test.settings.agent_ids, vec!["ag1"]);
}

#[tokio::test]
async fn test_server_errors_are_retried_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/labels"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/labels"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "labels": [{ "id": "L1", "name": "csv-managed", "color": "#00FF00" }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let labels = gateway(&server, 3).list_labels().await.unwrap();
    assert_eq!(labels.len(), 1);
    assert_eq!(labels[0].name, "csv-managed");
}

#[tokio::test]
async fn test_rate_limit_exhausts_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/agents"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .expect(3)
        .mount(&server)
        .await;

    match gateway(&server, 2).list_agents().await {
        Err(GatewayError::Exhausted { attempts, message }) => {
            assert_eq!(attempts, 3);
            assert!(message.contains("slow down"));
        }
        other => panic!("expected exhaustion, got {:?}", other),
    }
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/labels"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad color"))
        .expect(1)
        .mount(&server)
        .await;

    let err = gateway(&server, 4)
        .create_label(&Label::new("prod", "not-a-color", "x"))
        .await
        .unwrap_err();
    assert!(!err.is_transport());
    match err {
        GatewayError::Rejected { status, message } => {
            assert_eq!(status, 400);
            assert_eq!(message, "bad color");
        }
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn test_create_and_update_send_test_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tests"))
        .and(body_partial_json(json!({ "test": { "name": "A", "type": "dns" } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "test": dns_test_json() })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/tests/T1"))
        .and(body_partial_json(json!({ "test": { "id": "T1", "name": "A" } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "test": dns_test_json() })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway(&server, 0);
    let mut desired: synthsync::models::Test = serde_json::from_value(dns_test_json()).unwrap();
    desired.id = Some("ignored-on-create".to_string());

    let created = gateway.create_test(&desired).await.unwrap();
    assert_eq!(created.id.as_deref(), Some("T1"));
    let updated = gateway.update_test("T1", &desired).await.unwrap();
    assert_eq!(updated.name, "A");
}

#[tokio::test]
async fn test_delete_and_status_accept_empty_bodies() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/tests/T1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/tests/T2/status"))
        .and(body_json(json!({ "id": "T2", "status": "TEST_STATUS_PAUSED" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway(&server, 0);
    gateway.delete_test("T1").await.unwrap();
    gateway.set_test_status("T2", TestStatus::Paused).await.unwrap();
}

#[tokio::test]
async fn test_malformed_success_body_is_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sites"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let err = gateway(&server, 0).list_sites().await.unwrap_err();
    assert!(matches!(err, GatewayError::Decode(_)));
}
