//! HTTP router and JSON-RPC handlers

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::warn;
use uuid::Uuid;

use super::dispatch::Dispatcher;
use crate::Error;
use crate::protocol::{
    ErrorBody, JsonRpcRequest, JsonRpcResponse, RequestId, ToolsCallParams, ToolsListResult,
};

/// Shared application state
pub struct AppState {
    /// Tool dispatcher
    pub dispatcher: Dispatcher,
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/mcp", post(rpc_handler))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// POST /mcp — the JSON-RPC 2.0 tool surface.
async fn rpc_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let request: JsonRpcRequest = match serde_json::from_value(body) {
        Ok(request) => request,
        Err(e) => {
            return error_response(None, &Error::validation(format!("Invalid request: {e}")));
        }
    };
    let id = request.id.clone();

    match request.method.as_str() {
        "tools/call" => {
            let params: ToolsCallParams = match request
                .params
                .ok_or_else(|| Error::validation("Missing params"))
                .and_then(|p| {
                    serde_json::from_value(p)
                        .map_err(|e| Error::validation(format!("Invalid params: {e}")))
                }) {
                Ok(params) => params,
                Err(e) => return error_response(Some(id), &e),
            };

            let authorization = headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok());

            match state
                .dispatcher
                .dispatch(&params.name, &params.arguments, authorization)
                .await
            {
                Ok(result) => success_response(id, result),
                Err(e) => error_response(Some(id), &e),
            }
        }
        "tools/list" => {
            let result = ToolsListResult {
                tools: Dispatcher::catalog(),
            };
            success_response(id, serde_json::to_value(result).unwrap_or_default())
        }
        method => error_response(
            Some(id),
            &Error::NotFound(format!("Unknown method: {method}")),
        ),
    }
}

fn success_response(id: RequestId, result: Value) -> Response {
    (StatusCode::OK, Json(JsonRpcResponse::success(id, result))).into_response()
}

/// Map a gateway error to the wire shape, attaching a correlation id that is
/// also logged server-side.
fn error_response(id: Option<RequestId>, error: &Error) -> Response {
    let correlation_id = Uuid::new_v4().to_string();
    warn!(
        code = error.code(),
        status = error.status(),
        correlation_id = %correlation_id,
        "Tool call failed: {error}"
    );

    let status = StatusCode::from_u16(error.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = JsonRpcResponse::error(
        id,
        ErrorBody {
            code: error.code().to_string(),
            message: error.to_string(),
            correlation_id: Some(correlation_id),
        },
    );
    (status, Json(body)).into_response()
}
