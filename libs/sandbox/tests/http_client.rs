//! HttpInstanceClient against a mock provisioning API.

use std::time::Duration;

use warden_id::{InstanceId, TemplateId};
use warden_sandbox::{ClientConfig, ClientError, CommandEnv, HttpInstanceClient, InstanceClient};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> HttpInstanceClient {
    HttpInstanceClient::new(ClientConfig {
        api_url: server.uri(),
        api_key: "test-key".to_string(),
        template_id: TemplateId::parse("base").unwrap(),
        instance_timeout: Duration::from_secs(3600),
        request_timeout: Duration::from_secs(5),
    })
    .unwrap()
}

fn id(raw: &str) -> InstanceId {
    InstanceId::parse(raw).unwrap()
}

#[tokio::test]
async fn create_sends_template_and_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sandboxes"))
        .and(header("X-API-Key", "test-key"))
        .and(body_json(serde_json::json!({"templateID": "base", "timeout": 3600})))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "sandboxID": "sb-42"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let created = client_for(&server).create().await.unwrap();
    assert_eq!(created, "sb-42");
}

#[tokio::test]
async fn create_maps_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sandboxes"))
        .respond_with(ResponseTemplate::new(429).set_body_string("quota exceeded"))
        .mount(&server)
        .await;

    let err = client_for(&server).create().await.unwrap_err();
    match err {
        ClientError::Api { status, body } => {
            assert_eq!(status, 429);
            assert_eq!(body, "quota exceeded");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn list_preserves_provider_order() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sandboxes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"sandboxID": "sb-b", "templateID": "base"},
            {"sandboxID": "sb-a", "startedAt": "2026-03-01T10:00:00Z"}
        ])))
        .mount(&server)
        .await;

    let listed = client_for(&server).list().await.unwrap();
    let ids: Vec<_> = listed.iter().map(|i| i.instance_id.as_str()).collect();
    assert_eq!(ids, vec!["sb-b", "sb-a"]);
    assert_eq!(listed[1].started_at.as_deref(), Some("2026-03-01T10:00:00Z"));
}

#[tokio::test]
async fn kill_returns_false_when_already_gone() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/sandboxes/sb-1"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/sandboxes/sb-gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert!(client.kill(&id("sb-1")).await.unwrap());
    assert!(!client.kill(&id("sb-gone")).await.unwrap());
}

#[tokio::test]
async fn is_running_reflects_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sandboxes/sb-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "sandboxID": "sb-1"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sandboxes/sb-2"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert!(client.is_running(&id("sb-1")).await.unwrap());
    assert!(!client.is_running(&id("sb-2")).await.unwrap());
}

#[tokio::test]
async fn read_and_write_file() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sandboxes/sb-1/files"))
        .and(query_param("path", "/home/user/agent/heartbeat.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"cycle_count\":1}"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sandboxes/sb-1/files"))
        .and(query_param("path", "/home/user/agent/notes.md"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let bytes = client
        .read_file(&id("sb-1"), "/home/user/agent/heartbeat.json")
        .await
        .unwrap();
    assert_eq!(bytes, b"{\"cycle_count\":1}");

    client
        .write_file(&id("sb-1"), "/home/user/agent/notes.md", b"hello")
        .await
        .unwrap();
}

#[tokio::test]
async fn read_missing_file_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sandboxes/sb-1/files"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .read_file(&id("sb-1"), "missing.json")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn run_command_nonzero_exit_is_command_failed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sandboxes/sb-1/commands"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "exitCode": 1,
            "stdout": "",
            "stderr": "pip: not found"
        })))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .run_command(
            &id("sb-1"),
            "pip install -r requirements.txt",
            &CommandEnv::new(),
            Duration::from_secs(30),
        )
        .await
        .unwrap_err();

    match err {
        ClientError::CommandFailed {
            exit_code, stderr, ..
        } => {
            assert_eq!(exit_code, 1);
            assert_eq!(stderr, "pip: not found");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn background_command_sets_flag() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sandboxes/sb-1/commands"))
        .and(body_json(serde_json::json!({
            "cmd": "python run.py",
            "envs": {"MODE": "prod"},
            "background": true
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "exitCode": 0
        })))
        .expect(1)
        .mount(&server)
        .await;

    let env = CommandEnv::from([("MODE".to_string(), "prod".to_string())]);
    client_for(&server)
        .start_background_command(&id("sb-1"), "python run.py", &env)
        .await
        .unwrap();
}
