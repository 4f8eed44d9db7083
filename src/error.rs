//! Error taxonomy for the websocket notification and RPC subsystem.
use thiserror::Error;

/// Bit-exact JSON-RPC error codes this crate surfaces to clients.
pub mod code {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INVALID_ADDRESS_OR_KEY: i32 = -5;
    pub const DATABASE: i32 = -20;
    pub const BLOCK_NOT_FOUND: i32 = -5;
}

/// Errors returned to a websocket client as a JSON-RPC error object.
///
/// Each variant's `code()` matches spec.md's bit-exact error code table;
/// `Reorganize` deliberately reuses the database code with a fixed message,
/// per spec.md §6.
#[derive(Debug, Error, Clone)]
pub enum RpcServerError {
    #[error("parse error")]
    Parse,

    #[error("{0}")]
    InvalidParams(String),

    #[error("invalid address or key: {0}")]
    InvalidAddressOrKey(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("block not found")]
    BlockNotFound,

    #[error("Reorganize")]
    Reorganize,
}

impl RpcServerError {
    pub fn code(&self) -> i32 {
        match self {
            RpcServerError::Parse => code::PARSE_ERROR,
            RpcServerError::InvalidParams(_) => code::INVALID_PARAMS,
            RpcServerError::InvalidAddressOrKey(_) => code::INVALID_ADDRESS_OR_KEY,
            RpcServerError::Database(_) => code::DATABASE,
            RpcServerError::BlockNotFound => code::BLOCK_NOT_FOUND,
            RpcServerError::Reorganize => code::DATABASE,
        }
    }
}

/// Sentinel returned by `QueueNotification`/`SendMessage` when the client has
/// already disconnected. Not a wire-facing `RpcServerError` — callers such as
/// the rescan engine match on it explicitly to stop early, silently.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("client quit")]
pub struct ClientQuit;

/// Errors internal to the notification router. These never cross the wire;
/// a misrouted control message is logged and discarded per spec.md §7.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("router channel closed")]
    Closed,
}

/// Errors raised while running a rescan. `Reorganize` and `ClientQuit` map
/// onto the same-named outcomes described in spec.md §4.E/§7.
#[derive(Debug, Error)]
pub enum RescanError {
    #[error(transparent)]
    ClientQuit(#[from] ClientQuit),

    #[error("reorganize")]
    Reorganize,

    #[error("database error: {0}")]
    Database(String),

    #[error("block not found")]
    BlockNotFound,
}

impl From<RescanError> for RpcServerError {
    fn from(e: RescanError) -> Self {
        match e {
            RescanError::ClientQuit(_) => RpcServerError::Database("client quit".into()),
            RescanError::Reorganize => RpcServerError::Reorganize,
            RescanError::Database(msg) => RpcServerError::Database(msg),
            RescanError::BlockNotFound => RpcServerError::BlockNotFound,
        }
    }
}
