// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP-level tests for lxd-client against a wiremock server.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lxd_client::{
    Client, CreateInstanceRequest, ExecRequest, FileHeader, ForwardAddress, ForwardPort,
    InstanceSource, LxdConfig, LxdError, ResourcePath, StateAction, StateChange,
};
use serde_json::{Value, json};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_bytes, body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn client_for(server: &MockServer) -> Client {
    let config = LxdConfig::new()
        .with_endpoint(server.address().to_string())
        .with_plaintext(true);
    Client::new(config).unwrap()
}

fn sync(metadata: Value) -> Value {
    json!({
        "type": "sync",
        "status": "Success",
        "status_code": 200,
        "error_code": 0,
        "error": "",
        "metadata": metadata
    })
}

fn accepted(operation_id: &str, metadata: Value) -> Value {
    json!({
        "type": "async",
        "status": "Operation created",
        "status_code": 100,
        "error_code": 0,
        "error": "",
        "operation": format!("/1.0/operations/{}", operation_id),
        "metadata": metadata
    })
}

fn error(code: u16, message: &str) -> Value {
    json!({"type": "error", "error_code": code, "error": message, "metadata": null})
}

// ============================================================================
// Instances and operations
// ============================================================================

#[tokio::test]
async fn test_create_instance_and_wait() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/1.0/instances"))
        .and(body_json(json!({
            "name": "wow",
            "source": {"type": "image", "alias": "ubuntu/24.04"},
            "start": true,
            "type": "container"
        })))
        .respond_with(ResponseTemplate::new(202).set_body_json(accepted(
            "op-create",
            json!({"id": "op-create", "class": "task", "status": "Running"}),
        )))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/1.0/operations/op-create/wait"))
        .respond_with(ResponseTemplate::new(200).set_body_json(sync(json!({
            "id": "op-create",
            "class": "task",
            "status": "Success",
            "status_code": 200,
            "resources": {"instances": ["/1.0/instances/wow"]}
        }))))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let request =
        CreateInstanceRequest::new(InstanceSource::image("ubuntu/24.04")).with_name("wow");
    let instance = client.create_instance_and_wait(&request).await.unwrap();

    assert_eq!(instance.name(), "wow");
    assert_eq!(instance.path().render(), "/1.0/instances/wow");
}

#[tokio::test]
async fn test_failed_operation_is_api_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/1.0/operations/op-bad/wait"))
        .respond_with(ResponseTemplate::new(200).set_body_json(sync(json!({
            "id": "op-bad",
            "class": "task",
            "status": "Failure",
            "status_code": 400,
            "err": "Failed instance creation: image not found"
        }))))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let op = ResourcePath::parse("/1.0/operations/op-bad").unwrap();
    let err = client.wait_operation(&op).await.unwrap_err();

    match err {
        LxdError::Api { code, message } => {
            assert_eq!(code, 400);
            assert!(message.contains("image not found"));
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_wait_timeout_is_passed_and_reported() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/1.0/operations/op-slow/wait"))
        .and(query_param("timeout", "5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(sync(json!({
            "id": "op-slow",
            "class": "task",
            "status": "Running",
            "status_code": 103
        }))))
        .expect(1)
        .mount(&server)
        .await;

    let config = LxdConfig::new()
        .with_endpoint(server.address().to_string())
        .with_plaintext(true)
        .with_wait_timeout(Duration::from_secs(5));
    let client = Client::new(config).unwrap();

    let op = ResourcePath::parse("/1.0/operations/op-slow").unwrap();
    assert!(matches!(
        client.wait_operation(&op).await,
        Err(LxdError::Timeout(5))
    ));
}

#[tokio::test]
async fn test_sub_second_wait_timeout_still_blocks() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/1.0/operations/op-slow/wait"))
        .and(query_param("timeout", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(sync(json!({
            "class": "task",
            "status": "Running",
            "status_code": 103
        }))))
        .expect(1)
        .mount(&server)
        .await;

    let config = LxdConfig::new()
        .with_endpoint(server.address().to_string())
        .with_plaintext(true)
        .with_wait_timeout(Duration::from_millis(200));
    let client = Client::new(config).unwrap();

    let op = ResourcePath::parse("/1.0/operations/op-slow").unwrap();
    assert!(matches!(
        client.wait_operation(&op).await,
        Err(LxdError::Timeout(1))
    ));
}

#[tokio::test]
async fn test_cancel_held_wait() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/1.0/operations/op-held/wait"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(sync(json!({"class": "task", "status": "Success"})))
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let token = CancellationToken::new();
    let client = client_for(&server).with_cancellation(token.clone());
    let op = ResourcePath::parse("/1.0/operations/op-held").unwrap();

    let started = Instant::now();
    let (result, _) = tokio::join!(client.wait_operation(&op), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    });

    assert!(matches!(result, Err(LxdError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_not_found_instance() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/1.0/instances/ghost"))
        .respond_with(ResponseTemplate::new(404).set_body_json(error(404, "not found")))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .instance("ghost")
        .get()
        .await
        .unwrap_err();
    match err {
        LxdError::Api { code, ref message } => {
            assert_eq!(code, 404);
            assert_eq!(message, "not found");
        }
        ref other => panic!("expected Api error, got {other:?}"),
    }
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_instance_state_and_project_scoping() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/1.0/instances/wow/state"))
        .and(query_param("project", "games"))
        .respond_with(ResponseTemplate::new(200).set_body_json(sync(json!({
            "status": "Running",
            "status_code": 103,
            "pid": 100,
            "processes": 7,
            "network": {
                "eth0": {"addresses": [{"family": "inet", "address": "10.0.0.5", "scope": "global"}]}
            }
        }))))
        .expect(1)
        .mount(&server)
        .await;

    let config = LxdConfig::new()
        .with_endpoint(server.address().to_string())
        .with_plaintext(true)
        .with_project("games");
    let state = Client::new(config)
        .unwrap()
        .instance("wow")
        .state()
        .await
        .unwrap();

    assert!(state.is_running());
    assert_eq!(state.processes, 7);
    assert_eq!(state.ipv4_addresses(), vec!["10.0.0.5"]);
}

#[tokio::test]
async fn test_list_instances() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/1.0/instances"))
        .respond_with(ResponseTemplate::new(200).set_body_json(sync(json!([
            "/1.0/instances/a",
            "/1.0/instances/b"
        ]))))
        .mount(&server)
        .await;

    let paths = client_for(&server).list_instances().await.unwrap();
    let names: Vec<_> = paths.iter().filter_map(|p| p.name()).collect();
    assert_eq!(names, vec!["a", "b"]);
}

#[tokio::test]
async fn test_update_state() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/1.0/instances/wow/state"))
        .and(body_json(json!({"action": "stop", "timeout": 30, "force": true, "stateful": false})))
        .respond_with(ResponseTemplate::new(202).set_body_json(accepted(
            "op-stop",
            json!({"id": "op-stop", "class": "task", "status": "Running"}),
        )))
        .expect(1)
        .mount(&server)
        .await;

    let pending = client_for(&server)
        .instance("wow")
        .update_state(&StateChange::new(StateAction::Stop).forced())
        .await
        .unwrap();
    assert_eq!(pending.path.render(), "/1.0/operations/op-stop");
    assert_eq!(pending.operation.id, "op-stop");
}

#[tokio::test]
async fn test_non_json_response_is_decode_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/1.0/instances/wow"))
        .respond_with(ResponseTemplate::new(502).set_body_raw("<html>bad gateway</html>", "text/html"))
        .mount(&server)
        .await;

    let err = client_for(&server).instance("wow").get().await.unwrap_err();
    assert!(matches!(err, LxdError::Decode(_)));
}

#[tokio::test]
async fn test_unreachable_server_is_transport_error() {
    let config = LxdConfig::new()
        .with_endpoint("127.0.0.1:1")
        .with_plaintext(true);
    let err = Client::new(config)
        .unwrap()
        .list_instances()
        .await
        .unwrap_err();
    assert!(matches!(err, LxdError::Transport(_)));
}

// ============================================================================
// Exec
// ============================================================================

#[tokio::test]
async fn test_exec_without_websocket_is_rejected_locally() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let request = ExecRequest::new(["true"]).with_wait_for_websocket(false);
    let err = client_for(&server)
        .instance("wow")
        .exec(&request)
        .await
        .unwrap_err();

    assert!(matches!(err, LxdError::Config(_)));
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_exec_returns_session_and_exit_code() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/1.0/instances/wow/exec"))
        .and(body_json(json!({
            "command": ["sh", "-c", "exit 7"],
            "wait-for-websocket": true,
            "interactive": false,
            "record-output": false
        })))
        .respond_with(ResponseTemplate::new(202).set_body_json(accepted(
            "op-exec",
            json!({
                "id": "op-exec",
                "class": "websocket",
                "status": "Running",
                "metadata": {"fds": {"0": "s0", "1": "s1", "2": "s2", "control": "sc"}}
            }),
        )))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/1.0/operations/op-exec/wait"))
        .respond_with(ResponseTemplate::new(200).set_body_json(sync(json!({
            "id": "op-exec",
            "class": "websocket",
            "status": "Success",
            "status_code": 200,
            "metadata": {"return": 7}
        }))))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let session = client
        .instance("wow")
        .exec(&ExecRequest::new(["sh", "-c", "exit 7"]))
        .await
        .unwrap();

    assert_eq!(session.operation().render(), "/1.0/operations/op-exec");
    assert!(!session.is_interactive());

    let outcome = session.wait(&client).await.unwrap();
    assert_eq!(outcome.exit_code, 7);
    assert!(!outcome.success());
}

// ============================================================================
// Files
// ============================================================================

#[tokio::test]
async fn test_read_directory() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/1.0/instances/wow/files"))
        .and(query_param("path", "/etc"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-LXD-uid", "0")
                .insert_header("X-LXD-gid", "0")
                .insert_header("X-LXD-mode", "0755")
                .insert_header("X-LXD-type", "directory")
                .set_body_raw(
                    serde_json::to_vec(&sync(json!(["hosts", "passwd"]))).unwrap(),
                    "application/json",
                ),
        )
        .mount(&server)
        .await;

    let handle = client_for(&server)
        .instance("wow")
        .read_file("/etc")
        .await
        .unwrap();

    assert!(handle.is_directory());
    assert_eq!(handle.metadata.mode, 0o755);
    assert_eq!(handle.metadata.file_type.as_deref(), Some("directory"));
    assert_eq!(handle.listing().unwrap(), ["hosts", "passwd"]);
    assert!(handle.into_reader().is_none());
}

#[tokio::test]
async fn test_read_file_streams_content() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/1.0/instances/wow/files"))
        .and(query_param("path", "/etc/hostname"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-LXD-uid", "1000")
                .insert_header("X-LXD-gid", "1000")
                .insert_header("X-LXD-mode", "0644")
                .set_body_raw(b"wow\n".to_vec(), "application/octet-stream"),
        )
        .mount(&server)
        .await;

    let handle = client_for(&server)
        .instance("wow")
        .read_file("/etc/hostname")
        .await
        .unwrap();

    assert!(!handle.is_directory());
    assert!(handle.listing().is_none());
    assert_eq!(handle.metadata.uid, 1000);
    assert_eq!(handle.metadata.mode, 0o644);

    let mut reader = handle.into_reader().unwrap();
    let mut content = String::new();
    reader.read_to_string(&mut content).await.unwrap();
    assert_eq!(content, "wow\n");
}

#[tokio::test]
async fn test_read_file_unexpected_content_type() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/1.0/instances/wow/files"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-LXD-uid", "0")
                .insert_header("X-LXD-gid", "0")
                .insert_header("X-LXD-mode", "0644")
                .set_body_raw("<html/>", "text/html"),
        )
        .mount(&server)
        .await;

    let err = client_for(&server)
        .instance("wow")
        .read_file("/x")
        .await
        .unwrap_err();
    assert!(matches!(err, LxdError::UnexpectedContentType(ref t) if t == "text/html"));
}

#[tokio::test]
async fn test_read_file_bad_headers() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/1.0/instances/wow/files"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-LXD-uid", "root")
                .insert_header("X-LXD-gid", "0")
                .insert_header("X-LXD-mode", "0644")
                .set_body_raw(b"data".to_vec(), "application/octet-stream"),
        )
        .mount(&server)
        .await;

    let err = client_for(&server)
        .instance("wow")
        .read_file("/x")
        .await
        .unwrap_err();
    assert!(matches!(err, LxdError::InvalidFileHeader(_)));
}

#[tokio::test]
async fn test_read_missing_file() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/1.0/instances/wow/files"))
        .respond_with(ResponseTemplate::new(404).set_body_json(error(404, "not found")))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .instance("wow")
        .read_file("/nope")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_write_file_headers_and_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/1.0/instances/wow/files"))
        .and(query_param("path", "/srv/server.properties"))
        .and(header("content-type", "application/octet-stream"))
        .and(header("x-lxd-uid", "1000"))
        .and(header("x-lxd-gid", "1000"))
        .and(header("x-lxd-mode", "0640"))
        .and(header("x-lxd-type", "file"))
        .and(header("x-lxd-write", "overwrite"))
        .and(body_bytes(b"motd=hello\n".to_vec()))
        .respond_with(ResponseTemplate::new(200).set_body_json(sync(json!({}))))
        .expect(1)
        .mount(&server)
        .await;

    let header = FileHeader::new().with_owner(1000, 1000).with_mode(0o640);
    client_for(&server)
        .instance("wow")
        .write_file("/srv/server.properties", &b"motd=hello\n"[..], header)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_write_file_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/1.0/instances/wow/files"))
        .respond_with(ResponseTemplate::new(403).set_body_json(error(403, "permission denied")))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .instance("wow")
        .write_file("/etc/shadow", &b""[..], FileHeader::new())
        .await
        .unwrap_err();
    assert_eq!(err.api_code(), Some(403));
}

#[tokio::test]
async fn test_delete_file() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/1.0/instances/wow/files"))
        .and(query_param("path", "/tmp/x"))
        .respond_with(ResponseTemplate::new(200).set_body_json(sync(json!({}))))
        .expect(1)
        .mount(&server)
        .await;

    client_for(&server)
        .instance("wow")
        .delete_file("/tmp/x")
        .await
        .unwrap();
}

// ============================================================================
// Network forwards
// ============================================================================

/// Stores whatever the last PUT/POST sent and serves it back on GET.
struct ForwardStore {
    stored: Arc<Mutex<Option<Value>>>,
}

impl Respond for ForwardStore {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let mut stored = self.stored.lock().unwrap();
        match request.method.as_str() {
            "GET" => match stored.as_ref() {
                Some(forward) => ResponseTemplate::new(200).set_body_json(sync(forward.clone())),
                None => ResponseTemplate::new(404).set_body_json(error(404, "not found")),
            },
            "PUT" | "POST" => {
                *stored = Some(serde_json::from_slice(&request.body).unwrap());
                ResponseTemplate::new(200).set_body_json(sync(json!({})))
            }
            _ => ResponseTemplate::new(405).set_body_json(error(405, "method not allowed")),
        }
    }
}

#[tokio::test]
async fn test_forward_update_replaces_ports() {
    let server = MockServer::start().await;
    let stored = Arc::new(Mutex::new(None));

    Mock::given(path("/1.0/networks/lxdbr0/forwards"))
        .respond_with(ForwardStore {
            stored: stored.clone(),
        })
        .mount(&server)
        .await;
    Mock::given(path("/1.0/networks/lxdbr0/forwards/192.0.2.10"))
        .respond_with(ForwardStore {
            stored: stored.clone(),
        })
        .mount(&server)
        .await;

    let network = client_for(&server).network("lxdbr0");

    // Missing rule reads as not-found.
    assert!(network.forward("192.0.2.10").await.unwrap_err().is_not_found());

    let initial = ForwardAddress::new("192.0.2.10")
        .with_port(ForwardPort::tcp("22", "10.0.0.5"))
        .with_port(ForwardPort::tcp("80", "10.0.0.5"));
    network.create_forward(&initial).await.unwrap();

    let replacement =
        ForwardAddress::new("192.0.2.10").with_port(ForwardPort::tcp("25565", "10.0.0.5"));
    network.update_forward(&replacement).await.unwrap();

    let current = network.forward("192.0.2.10").await.unwrap();
    assert_eq!(current.ports.len(), 1);
    assert_eq!(current.ports[0].listen_port, "25565");
    assert_eq!(current.ports[0].target_port, "25565");
    assert_eq!(current.ports[0].target_address, "10.0.0.5");
    assert!(current.ports.iter().all(|p| p.listen_port != "22" && p.listen_port != "80"));
}

#[tokio::test]
async fn test_list_forwards_uses_recursion() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/1.0/networks/lxdbr0/forwards"))
        .and(query_param("recursion", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(sync(json!([
            {"listen_address": "192.0.2.10", "ports": [
                {"listen_port": "25565", "target_port": "25565", "target_address": "10.0.0.5", "protocol": "tcp"}
            ]}
        ]))))
        .expect(1)
        .mount(&server)
        .await;

    let forwards = client_for(&server).network("lxdbr0").forwards().await.unwrap();
    assert_eq!(forwards.len(), 1);
    assert_eq!(forwards[0].listen_address, "192.0.2.10");
}
