use crate::mcp::McpServer;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Clone)]
struct AppState {
    server: Arc<McpServer>,
    shutdown: CancellationToken,
}

pub fn router(server: Arc<McpServer>, shutdown: CancellationToken) -> Router {
    Router::new()
        .route("/mcp", post(mcp_handler))
        .route("/health", get(health_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { server, shutdown })
}

pub async fn serve(
    bind: &str,
    server: Arc<McpServer>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("🌐 MCP HTTP server listening on {}", listener.local_addr()?);

    let app = router(server, shutdown.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("HTTP server shut down");
    Ok(())
}

async fn health_handler() -> &'static str {
    "OK"
}

/// One JSON-RPC message per POST. A client that disconnects drops this
/// future, and with it the request's in-flight guard, which cancels the research.
async fn mcp_handler(State(state): State<AppState>, body: String) -> Response {
    let message = match state.server.parse(&body) {
        Ok(message) => message,
        Err(response) => return Json(response).into_response(),
    };

    match message.id.clone() {
        None => {
            state.server.handle_notification(message).await;
            StatusCode::ACCEPTED.into_response()
        }
        Some(id) => {
            let in_flight = state.server.track(&id, &state.shutdown);
            let response = state
                .server
                .handle_request(id, &message.method, message.params, in_flight.token())
                .await;
            Json(response).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::tests::canned_registry;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app() -> Router {
        let server = Arc::new(McpServer::new(Arc::new(canned_registry())));
        router(server, CancellationToken::new())
    }

    async fn post_json(app: Router, body: Value) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/mcp")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, bytes.to_vec())
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_tools_call_over_http() {
        let (status, body) = post_json(
            app(),
            json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call", "params": {
                "name": "deep_search", "arguments": {"query": "What is X?"}
            }}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let response: Value = serde_json::from_slice(&body).unwrap();
        let payload: Value =
            serde_json::from_str(response["result"]["content"][0]["text"].as_str().unwrap()).unwrap();
        assert_eq!(payload["answer"], "Canned answer [1].");
    }

    #[tokio::test]
    async fn test_notification_is_accepted_without_body() {
        let (status, body) = post_json(
            app(),
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_body_gets_parse_error() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/mcp")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let response: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(response["error"]["code"], -32700);
        assert_eq!(response["id"], Value::Null);
    }
}
