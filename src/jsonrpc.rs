//! JSON-RPC 2.0 wire envelopes and server-initiated notification builders.
//!
//! Shapes mirror the teacher's `dcrjson::result_types::JsonRequest` /
//! `JsonResponse` convention: plain serde structs, method name constants
//! grouped the way `dcrjson::rpc_types` groups them.
use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

/// An inbound JSON-RPC request as read off the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    /// Absent or `null` marks a notification per JSON-RPC 1.0/2.0: no reply
    /// is sent (spec.md §6).
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// An outbound JSON-RPC response or server-initiated notification.
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub id: Option<Value>,
    pub result: Value,
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl From<&crate::error::RpcServerError> for RpcError {
    fn from(e: &crate::error::RpcServerError) -> Self {
        RpcError {
            code: e.code(),
            message: e.to_string(),
        }
    }
}

impl Response {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Response {
            id,
            result,
            error: None,
        }
    }

    pub fn failure(id: Option<Value>, err: &crate::error::RpcServerError) -> Self {
        Response {
            id,
            result: Value::Null,
            error: Some(err.into()),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("Response always serializes")
    }
}

/// A server-initiated notification: a JSON-RPC request with `id: null`.
pub fn notification(method: &str, params: Value) -> Vec<u8> {
    serde_json::json!({
        "jsonrpc": "1.0",
        "id": Value::Null,
        "method": method,
        "params": params,
    })
    .to_string()
    .into_bytes()
}

/// Notification method names, grouped the way the teacher groups its
/// `NOTIFICATION_METHOD_*` / `METHOD_*` constants in `dcrjson::rpc_types`.
pub mod notify_method {
    pub const BLOCK_CONNECTED: &str = "blockconnected";
    pub const BLOCK_DISCONNECTED: &str = "blockdisconnected";
    pub const TX_ACCEPTED: &str = "txaccepted";
    pub const TX_ACCEPTED_VERBOSE: &str = "txacceptedverbose";
    pub const RECV_TX: &str = "recvtx";
    pub const REDEEMING_TX: &str = "redeemingtx";
    pub const RESCAN_PROGRESS: &str = "rescanprogress";
    pub const RESCAN_FINISHED: &str = "rescanfinished";
}

use crate::types::{Block, BlockDetails, Transaction};

pub fn block_connected(block: &Block) -> Vec<u8> {
    notification(
        notify_method::BLOCK_CONNECTED,
        serde_json::json!([
            block.details.hash.to_hex(),
            block.details.height,
            block.details.timestamp,
        ]),
    )
}

pub fn block_disconnected(block: &Block) -> Vec<u8> {
    notification(
        notify_method::BLOCK_DISCONNECTED,
        serde_json::json!([
            block.details.hash.to_hex(),
            block.details.height,
            block.details.timestamp,
        ]),
    )
}

/// Compact `txaccepted`: tx hash plus BTC-denominated total output value.
pub fn tx_accepted(tx: &Transaction) -> Vec<u8> {
    let total_out: u64 = tx.outputs.iter().map(|o| o.value).sum();
    let btc = total_out as f64 / 1e8;
    notification(
        notify_method::TX_ACCEPTED,
        serde_json::json!([tx.hash.to_hex(), btc]),
    )
}

/// Verbose `txacceptedverbose`: the fully decoded transaction.
pub fn tx_accepted_verbose(tx: &Transaction) -> Vec<u8> {
    notification(
        notify_method::TX_ACCEPTED_VERBOSE,
        serde_json::json!({
            "txid": tx.hash.to_hex(),
            "hex": tx.hex,
        }),
    )
}

pub fn recv_tx(tx: &Transaction, block: Option<&BlockDetails>) -> Vec<u8> {
    notification(
        notify_method::RECV_TX,
        serde_json::json!([tx.hex, block_details_json(block)]),
    )
}

pub fn redeeming_tx(tx: &Transaction, block: Option<&BlockDetails>) -> Vec<u8> {
    notification(
        notify_method::REDEEMING_TX,
        serde_json::json!([tx.hex, block_details_json(block)]),
    )
}

pub fn rescan_progress(details: &BlockDetails) -> Vec<u8> {
    notification(
        notify_method::RESCAN_PROGRESS,
        serde_json::json!({
            "hash": details.hash.to_hex(),
            "height": details.height,
            "time": details.timestamp,
        }),
    )
}

pub fn rescan_finished(details: &BlockDetails) -> Vec<u8> {
    notification(
        notify_method::RESCAN_FINISHED,
        serde_json::json!({
            "hash": details.hash.to_hex(),
            "height": details.height,
            "time": details.timestamp,
        }),
    )
}

fn block_details_json(block: Option<&BlockDetails>) -> Value {
    match block {
        Some(d) => serde_json::json!({
            "hash": d.hash.to_hex(),
            "height": d.height,
            "time": d.timestamp,
        }),
        None => Value::Null,
    }
}
