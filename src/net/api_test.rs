use super::*;

use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use serde_json::json;

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn client(base_url: &str) -> HttpApi {
    HttpApi::new(base_url, Duration::from_secs(5), Duration::from_secs(2)).unwrap()
}

// =============================================================================
// error_detail / check_status
// =============================================================================

#[test]
fn error_detail_reads_string_detail() {
    assert_eq!(error_detail(404, r#"{"detail":"Agent not found"}"#), "Agent not found");
}

#[test]
fn error_detail_renders_structured_detail() {
    let detail = error_detail(422, r#"{"detail":[{"loc":["body","name"],"msg":"field required"}]}"#);
    assert!(detail.contains("field required"));
}

#[test]
fn error_detail_falls_back_to_body_then_status() {
    assert_eq!(error_detail(502, "bad gateway\n"), "bad gateway");
    assert_eq!(error_detail(500, "  "), "request failed with status 500");
}

#[test]
fn check_status_accepts_2xx() {
    assert!(check_status(200, "").is_ok());
    assert!(check_status(204, "").is_ok());
}

#[test]
fn check_status_rejects_and_classifies() {
    let err = check_status(503, r#"{"detail":"busy"}"#).unwrap_err();
    assert_eq!(err.to_string(), "busy (status 503)");
    assert_eq!(err.error_code(), "E_API_RESPONSE");
    assert!(err.retryable());

    let err = check_status(400, r#"{"detail":"Connection already exists"}"#).unwrap_err();
    assert!(!err.retryable());
}

#[test]
fn parse_json_reports_parse_error() {
    let err = parse_json::<Vec<AgentRecord>>("{}").unwrap_err();
    assert!(matches!(err, ApiError::ApiParse(_)));
}

// =============================================================================
// HttpApi against a local server
// =============================================================================

#[tokio::test]
async fn list_agents_round_trip() {
    let app = Router::new().route(
        "/agents",
        get(|| async { Json(json!([{"id": "a1", "config": {"name": "One"}, "status": "running"}])) }),
    );
    let api = client(&serve(app).await);

    let agents = api.list_agents().await.unwrap();
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0].config.name, "One");
}

#[tokio::test]
async fn create_connection_echoes_client_id() {
    let app = Router::new().route(
        "/connections",
        post(|Json(body): Json<serde_json::Value>| async move {
            Json(json!({"status": "connected", "connection_id": body["id"]}))
        }),
    );
    let api = client(&serve(app).await);

    let conn = ConnectionRecord {
        id: "c-123".into(),
        from_agent: "a".into(),
        to_agent: "b".into(),
        from_handle: Some("right".into()),
        to_handle: Some("left".into()),
        enabled: true,
    };
    let created = api.create_connection(&conn).await.unwrap();
    assert_eq!(created.connection_id, "c-123");
}

#[tokio::test]
async fn broadcast_posts_to_broadcast_route() {
    let app = Router::new().route(
        "/messages/broadcast",
        post(|Json(body): Json<serde_json::Value>| async move {
            assert!(body.get("context").is_none());
            Json(json!({"results": [
                {"from_agent": body["from_agent"], "to_agent": "b", "message": body["message"]},
                {"from_agent": body["from_agent"], "to_agent": "c", "message": body["message"]},
            ]}))
        }),
    );
    let api = client(&serve(app).await);

    let request = MessageBroadcastRequest { from_agent: "a".into(), message: "hello".into(), context: None };
    let broadcast = api.broadcast_message(&request).await.unwrap();

    assert_eq!(broadcast.results.len(), 2);
    assert_eq!(broadcast.results[1]["to_agent"], "c");
    assert_eq!(broadcast.results[0]["message"], "hello");
}

#[tokio::test]
async fn broadcast_rejection_surfaces_detail() {
    let app = Router::new().route(
        "/messages/broadcast",
        post(|| async {
            (StatusCode::BAD_REQUEST, Json(json!({"detail": "from_agent and message are required"})))
        }),
    );
    let api = client(&serve(app).await);

    let request = MessageBroadcastRequest { from_agent: String::new(), message: "hello".into(), context: None };
    let err = api.broadcast_message(&request).await.unwrap_err();
    assert_eq!(err.to_string(), "from_agent and message are required (status 400)");
}

#[tokio::test]
async fn not_found_surfaces_detail() {
    let app = Router::new().route(
        "/agents/{id}",
        delete(|Path(id): Path<String>| async move {
            (StatusCode::NOT_FOUND, Json(json!({"detail": format!("Agent {id} not found")})))
        }),
    );
    let api = client(&serve(app).await);

    let err = api.delete_agent("ghost").await.unwrap_err();
    let ApiError::ApiResponse { status, detail } = err else {
        panic!("expected response error");
    };
    assert_eq!(status, 404);
    assert_eq!(detail, "Agent ghost not found");
}

#[tokio::test]
async fn unreachable_server_is_request_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let api = client(&format!("http://{addr}"));
    let err = api.health().await.unwrap_err();
    assert!(matches!(err, ApiError::ApiRequest(_)));
    assert!(err.retryable());
}
