//! Test helpers for nodefoundry-server
//!
//! Provides utilities for creating test instances of the server.

use crate::status_sync::StatusSync;
use crate::store::{MemoryStore, NodeStore};
use crate::AppState;
use nodefoundry_dhcp::{LeasePool, PoolConfig};
use nodefoundry_ipxe::{BootScriptGenerator, IpxeConfig, PreseedGenerator};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

pub const TEST_SERVER_ADDR: &str = "192.168.1.1:8080";

/// Create a minimal AppState for testing
///
/// In-memory store, a small lease pool, and a running status-sync
/// consumer. The agent binary path does not exist.
pub fn create_test_app_state() -> AppState {
    let store: Arc<dyn NodeStore> = Arc::new(MemoryStore::new());
    let config = IpxeConfig::new(TEST_SERVER_ADDR);

    let pool = LeasePool::new(&PoolConfig::new("10.0.0.100", "10.0.0.110"))
        .expect("valid test pool");

    // Keep the consumer alive for the whole test
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    std::mem::forget(shutdown_tx);
    let (status_tx, _) = Arc::new(StatusSync::new(store.clone())).spawn(16, shutdown_rx);

    AppState {
        store,
        boot_scripts: Arc::new(BootScriptGenerator::new(config.clone()).expect("valid config")),
        preseed: Arc::new(PreseedGenerator::new(config).expect("valid config")),
        pool: Some(Arc::new(pool)),
        status_tx,
        agent_binary: Arc::new(PathBuf::from("/nonexistent/nodefoundry-agent")),
        started_at: Instant::now(),
    }
}

/// Create a test router with all routes
pub fn create_test_api_router(state: AppState) -> axum::Router {
    crate::app(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
        response::Response,
    };
    use http_body_util::BodyExt;
    use nodefoundry_common::{Node, NodeStatus};
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn send(app: &axum::Router, method: &str, uri: &str, body: Option<&str>) -> Response {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header("Content-Type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        app.clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    async fn text_body(response: Response) -> String {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(body.to_vec()).unwrap()
    }

    async fn seed(state: &AppState, mac: &str, status: NodeStatus) {
        state.store.save(&Node::new(mac, status).unwrap()).await.unwrap();
    }

    #[tokio::test]
    async fn test_health() {
        let app = create_test_api_router(create_test_app_state());

        let response = send(&app, "GET", "/health", None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = json_body(response).await;
        assert_eq!(json["status"], "ok");
        assert!(json["uptime"].is_u64());
    }

    #[tokio::test]
    async fn test_create_node() {
        let app = create_test_api_router(create_test_app_state());

        let response = send(
            &app,
            "POST",
            "/api/v1/nodes",
            Some(r#"{"mac": "AA:BB:CC:DD:EE:FF", "ip": "10.0.0.5"}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let json = json_body(response).await;
        assert_eq!(json["mac"], "aabbccddeeff");
        assert_eq!(json["ip"], "10.0.0.5");
        assert_eq!(json["status"], "discovered");

        // Same machine again
        let response = send(
            &app,
            "POST",
            "/api/v1/nodes",
            Some(r#"{"mac": "aabbccddeeff"}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert!(json_body(response).await["error"].is_string());
    }

    #[tokio::test]
    async fn test_create_node_invalid_mac() {
        let app = create_test_api_router(create_test_app_state());

        let response = send(&app, "POST", "/api/v1/nodes", Some(r#"{"mac": "aa:bb"}"#)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let json = json_body(response).await;
        assert_eq!(json["error"], "invalid MAC address: aa:bb");
    }

    #[tokio::test]
    async fn test_get_node() {
        let state = create_test_app_state();
        seed(&state, "001122334455", NodeStatus::Discovered).await;
        let app = create_test_api_router(state);

        let response = send(&app, "GET", "/api/v1/nodes/00:11:22:33:44:55", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["mac"], "001122334455");

        let response = send(&app, "GET", "/api/v1/nodes/aabbccddeeff", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = send(&app, "GET", "/api/v1/nodes/nope", None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_nodes_by_status() {
        let state = create_test_app_state();
        seed(&state, "000000000001", NodeStatus::Discovered).await;
        seed(&state, "000000000002", NodeStatus::Installing).await;
        let app = create_test_api_router(state);

        let json = json_body(send(&app, "GET", "/api/v1/nodes", None).await).await;
        assert_eq!(json.as_array().unwrap().len(), 2);

        let json = json_body(send(&app, "GET", "/api/v1/nodes?status=installing", None).await).await;
        let nodes = json.as_array().unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0]["mac"], "000000000002");

        let response = send(&app, "GET", "/api/v1/nodes?status=rebooting", None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_install_action() {
        let state = create_test_app_state();
        seed(&state, "001122334455", NodeStatus::Discovered).await;
        let store = state.store.clone();
        let app = create_test_api_router(state);

        let response = send(
            &app,
            "PUT",
            "/api/v1/nodes/001122334455",
            Some(r#"{"action": "install"}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "installing");

        let response = send(
            &app,
            "PUT",
            "/api/v1/nodes/001122334455",
            Some(r#"{"action": "reboot"}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(
            &app,
            "PUT",
            "/api/v1/nodes/aabbccddeeff",
            Some(r#"{"action": "install"}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        assert_eq!(
            store.find_by_mac("001122334455").await.unwrap().status,
            NodeStatus::Installing
        );
    }

    #[tokio::test]
    async fn test_install_action_on_installed_node_conflicts() {
        let state = create_test_app_state();
        seed(&state, "001122334455", NodeStatus::Installed).await;
        let store = state.store.clone();
        let app = create_test_api_router(state);

        let response = send(
            &app,
            "PUT",
            "/api/v1/nodes/001122334455",
            Some(r#"{"action": "install"}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(
            json_body(response).await["error"],
            "invalid status transition: installed -> installing"
        );
        assert_eq!(
            store.find_by_mac("001122334455").await.unwrap().status,
            NodeStatus::Installed
        );
    }

    #[tokio::test]
    async fn test_delete_node() {
        let state = create_test_app_state();
        seed(&state, "001122334455", NodeStatus::Discovered).await;
        let app = create_test_api_router(state);

        let response = send(&app, "DELETE", "/api/v1/nodes/001122334455", None).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = send(&app, "DELETE", "/api/v1/nodes/001122334455", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_leases() {
        let state = create_test_app_state();
        let ip = state
            .pool
            .as_ref()
            .unwrap()
            .allocate("001122334455", None)
            .unwrap();
        let app = create_test_api_router(state);

        let json = json_body(send(&app, "GET", "/api/v1/leases", None).await).await;
        let leases = json.as_array().unwrap();
        assert_eq!(leases.len(), 1);
        assert_eq!(leases[0]["mac"], "001122334455");
        assert_eq!(leases[0]["ip"], ip.to_string());
    }

    #[tokio::test]
    async fn test_list_leases_without_pool() {
        let mut state = create_test_app_state();
        state.pool = None;
        let app = create_test_api_router(state);

        let json = json_body(send(&app, "GET", "/api/v1/leases", None).await).await;
        assert_eq!(json, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_boot_script_follows_status() {
        let state = create_test_app_state();
        seed(&state, "aabbccddeeff", NodeStatus::Discovered).await;
        let store = state.store.clone();
        let app = create_test_api_router(state);

        // iPXE expands ${mac} in colon notation
        let response = send(&app, "GET", "/boot/aa:bb:cc:dd:ee:ff/boot.ipxe", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        let script = text_body(response).await;
        assert!(script.starts_with("#!ipxe\n"));
        assert!(script.contains("sleep 90"));

        store
            .update_status("aabbccddeeff", NodeStatus::Installing)
            .await
            .unwrap();
        let script = text_body(send(&app, "GET", "/boot/aabbccddeeff/boot.ipxe", None).await).await;
        assert!(script.contains("preseed/${mac}/preseed.cfg"));

        let response = send(&app, "GET", "/boot/001122334455/boot.ipxe", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_preseed_with_overrides() {
        let state = create_test_app_state();
        seed(&state, "aabbccddeeff", NodeStatus::Installing).await;
        let app = create_test_api_router(state);

        let response = send(
            &app,
            "GET",
            "/preseed/aabbccddeeff/preseed.cfg?ip=10.0.0.50&netmask=255.255.255.0&gateway=10.0.0.1",
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let preseed = text_body(response).await;
        assert!(preseed.contains("d-i netcfg/get_ipaddress string 10.0.0.50\n"));
        assert!(preseed.contains("d-i netcfg/get_gateway string 10.0.0.1\n"));
        assert!(preseed.contains("http://192.168.1.1:8080/agent/nodefoundry-agent"));

        let response = send(&app, "GET", "/preseed/001122334455/preseed.cfg", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_preseed_rejects_malformed_overrides() {
        let state = create_test_app_state();
        seed(&state, "aabbccddeeff", NodeStatus::Installing).await;
        let app = create_test_api_router(state);

        // ip=10.0.0.5<LF>d-i preseed/early_command string id
        let response = send(
            &app,
            "GET",
            "/preseed/aabbccddeeff/preseed.cfg?ip=10.0.0.5%0Ad-i%20preseed%2Fearly_command%20string%20id",
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().contains("invalid ip"));

        let response = send(
            &app,
            "GET",
            "/preseed/aabbccddeeff/preseed.cfg?ip=10.0.0.5&gateway=router",
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_create_node_invalid_ip() {
        let app = create_test_api_router(create_test_app_state());

        let response = send(
            &app,
            "POST",
            "/api/v1/nodes",
            Some(r#"{"mac": "AA:BB:CC:DD:EE:FF", "ip": "10.0.0.5\nd-i x string y"}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_agent_unit() {
        let app = create_test_api_router(create_test_app_state());

        let response = send(&app, "GET", "/agent/nodefoundry-agent.service", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(text_body(response)
            .await
            .contains("ExecStart=/usr/local/bin/nodefoundry-agent"));
    }

    #[tokio::test]
    async fn test_agent_binary() {
        let app = create_test_api_router(create_test_app_state());
        let response = send(&app, "GET", "/agent/nodefoundry-agent", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nodefoundry-agent");
        std::fs::write(&path, b"\x7fELF").unwrap();

        let mut state = create_test_app_state();
        state.agent_binary = Arc::new(path);
        let app = create_test_api_router(state);

        let response = send(&app, "GET", "/agent/nodefoundry-agent", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/octet-stream"
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"\x7fELF");
    }

    #[tokio::test]
    async fn test_status_report_is_applied() {
        let state = create_test_app_state();
        seed(&state, "001122334455", NodeStatus::Installing).await;
        let store = state.store.clone();
        let app = create_test_api_router(state);

        let response = send(
            &app,
            "POST",
            "/agent/00:11:22:33:44:55/status",
            Some(r#"{"status": "installed", "ip": "10.0.0.7", "hostname": "web-1"}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let mut node = store.find_by_mac("001122334455").await.unwrap();
        for _ in 0..50 {
            if node.status == NodeStatus::Installed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            node = store.find_by_mac("001122334455").await.unwrap();
        }
        assert_eq!(node.status, NodeStatus::Installed);
        assert_eq!(node.hostname.as_deref(), Some("web-1"));

        let response = send(
            &app,
            "POST",
            "/agent/bogus/status",
            Some(r#"{"status": "installed"}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
