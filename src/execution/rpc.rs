use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use hyper::client::HttpConnector;
use hyper::{Body, Client, Method, Request};
use serde_json::{json, Value};
use tracing::debug;

use super::derive_round_address;
use crate::error::ExecutionError;
use crate::traits::ExecutionLayer;
use crate::types::{AccountInfo, Instruction, Layer};

/// JSON-RPC client for the base and ephemeral layers.
///
/// # Protocol
/// - `getAccountInfo [address, {"encoding":"jsonParsed"}]` returns
///   `{"value": null}` or `{"value": {"owner": "...", "lamports": n}}`
/// - `sendInstruction [instruction]` hands the instruction to the layer's
///   signing relay and returns the transaction signature as a string
///
/// Timeouts are applied by the caller.
pub struct RpcExecutionLayer {
    base_url: String,
    ephemeral_url: String,
    program_id: String,
    delegation_program_id: String,
    client: Client<HttpConnector>,
    next_id: AtomicU64,
}

impl RpcExecutionLayer {
    pub fn new(
        base_url: String,
        ephemeral_url: String,
        program_id: String,
        delegation_program_id: String,
    ) -> Self {
        Self {
            base_url,
            ephemeral_url,
            program_id,
            delegation_program_id,
            client: Client::new(),
            next_id: AtomicU64::new(1),
        }
    }

    fn url(&self, layer: Layer) -> &str {
        match layer {
            Layer::Base => &self.base_url,
            Layer::Ephemeral => &self.ephemeral_url,
        }
    }

    /// Perform one JSON-RPC call. RPC-level errors come back as
    /// `Err(Ok(error_object))` so callers can pick the error kind.
    async fn call(
        &self,
        layer: Layer,
        method: &str,
        params: Value,
    ) -> Result<Result<Value, Value>, ExecutionError> {
        let transport = |message: String| ExecutionError::Transport { layer, message };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let request = Request::builder()
            .method(Method::POST)
            .uri(self.url(layer))
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .map_err(|e| transport(e.to_string()))?;

        debug!("rpc {} -> {} layer (id={})", method, layer, id);

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| transport(e.to_string()))?;
        let status = response.status();
        let body = hyper::body::to_bytes(response.into_body())
            .await
            .map_err(|e| transport(e.to_string()))?;

        if !status.is_success() {
            return Err(transport(format!("http status {}", status)));
        }

        let mut reply: Value =
            serde_json::from_slice(&body).map_err(|e| transport(format!("bad json: {}", e)))?;

        if let Some(error) = reply.get_mut("error") {
            return Ok(Err(error.take()));
        }
        match reply.get_mut("result") {
            Some(result) => Ok(Ok(result.take())),
            None => Err(transport("reply has neither result nor error".to_string())),
        }
    }
}

#[async_trait]
impl ExecutionLayer for RpcExecutionLayer {
    fn name(&self) -> &'static str {
        "rpc"
    }

    fn program_id(&self) -> &str {
        &self.program_id
    }

    fn delegation_program_id(&self) -> &str {
        &self.delegation_program_id
    }

    fn round_address(&self, round_id: &str) -> String {
        derive_round_address(&self.program_id, round_id)
    }

    async fn get_account(
        &self,
        layer: Layer,
        address: &str,
    ) -> Result<Option<AccountInfo>, ExecutionError> {
        let unreadable = |reason: String| ExecutionError::AccountUnreadable {
            address: address.to_string(),
            reason,
        };

        let result = self
            .call(
                layer,
                "getAccountInfo",
                json!([address, { "encoding": "jsonParsed", "commitment": "confirmed" }]),
            )
            .await?
            .map_err(|error| unreadable(error.to_string()))?;

        match result.get("value") {
            None | Some(Value::Null) => Ok(None),
            Some(value) => {
                let account: AccountInfo = serde_json::from_value(value.clone())
                    .map_err(|e| unreadable(format!("bad account payload: {}", e)))?;
                Ok(Some(account))
            }
        }
    }

    async fn submit_transaction(
        &self,
        layer: Layer,
        instruction: &Instruction,
    ) -> Result<String, ExecutionError> {
        let ix = serde_json::to_value(instruction).map_err(|e| ExecutionError::Rejected {
            layer,
            reason: format!("unencodable instruction: {}", e),
        })?;

        let result = self
            .call(layer, "sendInstruction", json!([ix]))
            .await?
            .map_err(|error| ExecutionError::Rejected {
                layer,
                reason: error.to_string(),
            })?;

        match result {
            Value::String(signature) => Ok(signature),
            other => Err(ExecutionError::Transport {
                layer,
                message: format!("unexpected signature payload: {}", other),
            }),
        }
    }
}
