//! HTTP JSON-RPC Server
//!
//! Provides HTTP endpoint for JSON-RPC methods.

use crate::methods::{
    handle_get_call_sequence, handle_get_delegate, handle_get_health, handle_get_receipt,
    handle_get_reserve, handle_get_slot, handle_get_stake, handle_operator_call, handle_submit_message, receipt_key,
    RpcContext, RpcError,
};
use axum::{
    extract::State,
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// JSON-RPC request
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// JSON-RPC response
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

/// HTTP RPC Server
pub struct HttpRpcServer {
    context: Arc<RpcContext>,
}

impl HttpRpcServer {
    pub fn new(context: Arc<RpcContext>) -> Self {
        Self { context }
    }

    /// Create the Axum router
    pub fn router(self) -> Router {
        // CORS layer to allow browser clients
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

        Router::new()
            .route("/", post(handle_rpc))
            .layer(cors)
            .with_state(self.context)
    }

    /// Run the server
    pub async fn run(self, addr: &str) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("HTTP RPC server listening on {}", addr);

        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

/// Handle JSON-RPC request
async fn handle_rpc(
    State(context): State<Arc<RpcContext>>,
    Json(request): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    let result = dispatch_method(&context, &request.method, request.params).await;

    let response = match result {
        Ok(value) => JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id: request.id,
            result: Some(value),
            error: None,
        },
        Err(e) => JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id: request.id,
            result: None,
            error: Some(JsonRpcError {
                code: error_code(&e),
                message: e.to_string(),
            }),
        },
    };

    (StatusCode::OK, Json(response))
}

/// Dispatch to appropriate method handler
pub async fn dispatch_method(
    ctx: &RpcContext,
    method: &str,
    params: Value,
) -> Result<Value, RpcError> {
    tracing::debug!("RPC method called: {}", method);
    let params: Vec<Value> = serde_json::from_value(params).unwrap_or_default();

    match method {
        "submitMessage" => {
            let envelope = str_param(&params, 0, "envelope")?;
            to_json(handle_submit_message(ctx, envelope)?)
        }

        "operatorCall" => {
            let call = str_param(&params, 0, "call")?;
            let signer = str_param(&params, 1, "signer")?;
            let signature = str_param(&params, 2, "signature")?;
            to_json(handle_operator_call(ctx, call, signer, signature).await?)
        }

        "getDelegate" => {
            let user = str_param(&params, 0, "user")?;
            to_json(handle_get_delegate(ctx, user)?)
        }

        "getStake" => {
            let user = str_param(&params, 0, "user")?;
            let pool = u64_param(&params, 1, "pool")?;
            to_json(handle_get_stake(ctx, user, pool)?)
        }

        "getReceipt" => {
            let key = receipt_key(
                u64_param(&params, 0, "chain")?,
                str_param(&params, 1, "sender")?,
                str_param(&params, 2, "user")?,
                u64_param(&params, 3, "pool")?,
                u64_param(&params, 4, "nonce")?,
            )?;
            to_json(handle_get_receipt(ctx, key)?)
        }

        "getReserve" => to_json(handle_get_reserve(ctx)?),

        "getCallSequence" => {
            let signer = str_param(&params, 0, "signer")?;
            Ok(json!(handle_get_call_sequence(ctx, signer)?))
        }

        "getSlot" => Ok(json!(handle_get_slot(ctx)?)),

        "getHealth" => Ok(json!(handle_get_health()?)),

        "getVersion" => Ok(json!({
            "xfarm-node": env!("CARGO_PKG_VERSION"),
        })),

        _ => Err(RpcError::MethodNotFound(method.to_string())),
    }
}

fn str_param<'a>(params: &'a [Value], index: usize, name: &str) -> Result<&'a str, RpcError> {
    params
        .get(index)
        .and_then(|v| v.as_str())
        .ok_or_else(|| RpcError::InvalidParams(format!("Missing {name}")))
}

fn u64_param(params: &[Value], index: usize, name: &str) -> Result<u64, RpcError> {
    params
        .get(index)
        .and_then(|v| v.as_u64())
        .ok_or_else(|| RpcError::InvalidParams(format!("Missing {name}")))
}

fn to_json<T: Serialize>(value: T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::InternalError(e.to_string()))
}

/// Map error to JSON-RPC error code
fn error_code(error: &RpcError) -> i32 {
    match error {
        RpcError::InvalidParams(_) => -32602,
        RpcError::MethodNotFound(_) => -32601,
        RpcError::InternalError(_) => -32603,
        RpcError::Unauthorized(_) => -32001,
    }
}
