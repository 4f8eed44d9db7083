//! Server glue — Component F.
//!
//! Owns the long-lived pieces a caller wires together once per daemon: the
//! router, its relay, and the shared dispatch context every connection's
//! tasks run against. Generalizes the teacher's `RPCConn`/`Websocket`
//! split in `rpcclient::connection` to the server side: [`Server::accept`]
//! is transport-agnostic over [`FrameReader`]/[`FrameWriter`], while
//! [`Server::listen`] (behind `transport-tungstenite`) is the concrete
//! production entry point.
use {
    crate::address::AddressDecoder,
    crate::chainstore::ChainStore,
    crate::client::pipeline::{self, FrameReader, FrameWriter},
    crate::config::RpcServerConfig,
    crate::dispatch::{DispatchContext, StandardDispatcher},
    crate::router::{self, RouterHandle},
    std::sync::Arc,
    tokio::task::JoinHandle,
};

/// Owns the router and the context every connection dispatches against.
/// Cheap to clone: everything inside is itself a handle or `Arc`.
#[derive(Clone)]
pub struct Server {
    ctx: DispatchContext,
    config: RpcServerConfig,
}

impl Server {
    /// Spawns the router task and builds a `Server` around it. Returns the
    /// server, the router's handle (for external publishers: block manager,
    /// mempool), and the router task's join handle.
    pub fn new(
        config: RpcServerConfig,
        chain_store: Arc<dyn ChainStore>,
        address_decoder: Arc<dyn AddressDecoder>,
        standard: Arc<dyn StandardDispatcher>,
    ) -> (Self, RouterHandle, JoinHandle<()>) {
        let (router, join) = router::spawn(address_decoder.clone());

        let ctx = DispatchContext {
            router: router.clone(),
            chain_store,
            address_decoder,
            standard,
        };

        (Server { ctx, config }, router, join)
    }

    pub fn router(&self) -> &RouterHandle {
        &self.ctx.router
    }

    /// Drives one connection to completion (spec.md §4.F): enforces the
    /// connection cap, authenticates, registers with the router, runs its
    /// tasks until disconnect, and unregisters. Mints a fresh session id
    /// per connection the way the wire's `session` command expects.
    pub async fn accept<R, W>(&self, remote_addr: String, reader: R, writer: W)
    where
        R: FrameReader + 'static,
        W: FrameWriter + 'static,
    {
        let session_id: u64 = rand::random();
        pipeline::serve(
            self.ctx.clone(),
            self.config.clone(),
            remote_addr,
            session_id,
            reader,
            writer,
        )
        .await;
    }

    /// Transitions the router to draining, disconnecting every client.
    pub fn shutdown(&self) {
        self.ctx.router.shutdown();
    }
}

/// Production listener backed by `tokio-tungstenite`, generalizing the
/// teacher's `dial_websocket`/`connect_stream` to the accept side of the
/// same library.
#[cfg(feature = "transport-tungstenite")]
pub mod listener {
    use super::Server;
    use crate::client::pipeline::tungstenite_transport::{WsReader, WsWriter};
    use futures_util::StreamExt;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    /// Accepts connections on `addr` until the listener errors, spawning one
    /// task per connection via [`Server::accept`]. Each accept failure is
    /// logged and skipped rather than tearing down the whole listener.
    pub async fn listen(server: Arc<Server>, addr: &str) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        log::info!("listening for websocket connections on {}", addr);

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    log::warn!("accept error: {}", e);
                    continue;
                }
            };

            let server = server.clone();
            tokio::spawn(async move {
                let remote_addr = peer.to_string();
                let ws_stream = match tokio_tungstenite::accept_async(stream).await {
                    Ok(s) => s,
                    Err(e) => {
                        log::warn!("{}: websocket handshake failed: {}", remote_addr, e);
                        return;
                    }
                };

                let (sink, stream) = ws_stream.split();
                server
                    .accept(remote_addr, WsReader(stream), WsWriter(sink))
                    .await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::TestAddressDecoder;
    use crate::chainstore::{ChainStore, ChainStoreError, PauseGuard};
    use crate::client::pipeline::{FrameReader, FrameWriter};
    use crate::error::RpcServerError;
    use crate::types::{Block, Hash};
    use async_trait::async_trait;
    use serde_json::Value;
    use tokio::sync::mpsc;

    struct ChanReader(mpsc::Receiver<Vec<u8>>);
    #[async_trait]
    impl FrameReader for ChanReader {
        async fn recv(&mut self) -> Option<Vec<u8>> {
            self.0.recv().await
        }
    }

    struct ChanWriter(mpsc::Sender<Vec<u8>>);
    #[async_trait]
    impl FrameWriter for ChanWriter {
        async fn send(&mut self, frame: Vec<u8>) -> bool {
            self.0.send(frame).await.is_ok()
        }
        async fn ping(&mut self) -> bool {
            true
        }
    }

    struct NoopStandard;
    #[async_trait]
    impl StandardDispatcher for NoopStandard {
        async fn dispatch(&self, method: &str, _params: &Value) -> Result<Value, RpcServerError> {
            Err(RpcServerError::InvalidParams(format!("unknown method {}", method)))
        }
        fn usage(&self) -> Vec<(String, String)> {
            vec![]
        }
        fn help(&self, _method: &str) -> Option<String> {
            None
        }
    }

    struct NoopStore;
    struct NoopGuard;
    impl PauseGuard for NoopGuard {}

    #[async_trait]
    impl ChainStore for NoopStore {
        async fn block_by_hash(&self, _hash: &Hash) -> Result<Block, ChainStoreError> {
            Err(ChainStoreError::BlockShaMissing)
        }
        async fn block_hash_by_height(&self, _height: i64) -> Result<Option<Hash>, ChainStoreError> {
            Ok(None)
        }
        async fn height_by_hash(&self, _hash: &Hash) -> Result<i64, ChainStoreError> {
            Ok(0)
        }
        async fn hash_range(&self, _min: i64, _max: i64) -> Result<Vec<Hash>, ChainStoreError> {
            Ok(vec![])
        }
        async fn best_block(&self) -> Result<(Hash, i64), ChainStoreError> {
            Ok((Hash::default(), 0))
        }
        async fn pause(&self) -> Box<dyn PauseGuard> {
            Box::new(NoopGuard)
        }
    }

    fn test_server() -> Server {
        let (server, _router, _join) = Server::new(
            RpcServerConfig::default(),
            Arc::new(NoopStore),
            Arc::new(TestAddressDecoder),
            Arc::new(NoopStandard),
        );
        server
    }

    #[tokio::test]
    async fn rejects_connection_beyond_cap() {
        let mut config = RpcServerConfig::default();
        config.rpc_max_websockets = 0;
        let (server, _router, _join) = Server::new(
            config,
            Arc::new(NoopStore),
            Arc::new(TestAddressDecoder),
            Arc::new(NoopStandard),
        );

        let (_in_tx, in_rx) = mpsc::channel(1);
        let (out_tx, mut out_rx) = mpsc::channel(1);
        server
            .accept("127.0.0.1:1".into(), ChanReader(in_rx), ChanWriter(out_tx))
            .await;

        assert!(out_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn shutdown_drains_connected_clients() {
        let server = test_server();
        assert_eq!(server.router().num_clients().await, 0);
        server.shutdown();
    }
}
