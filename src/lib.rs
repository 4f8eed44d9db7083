//! Websocket notification and RPC subsystem for a blockchain full-node
//! daemon: a single-writer notification router fed by a relay task, a
//! per-client task pipeline (reader, sync writer, notification queue,
//! lazily-started async worker), command dispatch for the websocket-only
//! methods, and a rescan engine for historical address/outpoint lookups.
//!
//! This crate does not itself implement a chain store, an address format,
//! or the "standard" (non-websocket) JSON-RPC surface — [`chainstore`],
//! [`address`], and [`dispatch::StandardDispatcher`] are the seams a caller
//! supplies a concrete implementation for.
pub mod address;
pub mod appdir;
pub mod chainstore;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod jsonrpc;
pub mod relay;
pub mod rescan;
pub mod router;
pub mod server;
pub mod types;

pub use config::RpcServerConfig;
pub use dispatch::{DispatchContext, StandardDispatcher};
pub use error::{ClientQuit, RescanError, RouterError, RpcServerError};
pub use server::Server;
