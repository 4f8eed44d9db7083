//! Per-client task pipeline — Component C's task-spawning half.
//!
//! Four cooperating tasks drive one client: a reader (pre-auth gate, then
//! the dispatch loop), a sync writer (drains bounded replies and sends a
//! periodic keepalive), a notification queue (drains the 1-slot
//! notification channel into the writer's queue), and a lazily-started
//! async worker (wired through [`Client::async_worker_sender`]).
//!
//! Generalizes the teacher's `ConnConfig::ws_split_stream`, which spawns a
//! single task forwarding a channel into a websocket sink
//! (`tokio::spawn(ws_rx.map(Ok).forward(ws_sender))`). Here that one
//! forwarding task becomes three, since replies, notifications, and the
//! read side each need a different backpressure profile (spec.md §3).
use {
    crate::client::auth::{authenticate, AuthResult, AuthenticateParams},
    crate::client::{Client, ClientChannels},
    crate::config::RpcServerConfig,
    crate::dispatch::{self, methods, DispatchContext, Outcome},
    crate::error::RpcServerError,
    crate::jsonrpc::{Request, Response},
    async_trait::async_trait,
    std::sync::Arc,
    std::time::Duration,
    tokio::sync::{mpsc, watch},
};

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Abstracts the inbound half of a duplex transport: a websocket frame, a
/// long-poll body, or (in tests) an in-memory queue all implement this the
/// same way.
#[async_trait]
pub trait FrameReader: Send {
    /// Returns the next complete inbound frame, or `None` once the
    /// transport has closed.
    async fn recv(&mut self) -> Option<Vec<u8>>;
}

/// Abstracts the outbound half of a duplex transport.
#[async_trait]
pub trait FrameWriter: Send {
    /// Sends one frame. Returns `false` once the transport has closed.
    async fn send(&mut self, frame: Vec<u8>) -> bool;

    /// Sends a transport-level keepalive. Returns `false` once closed.
    async fn ping(&mut self) -> bool;
}

/// Drives one connection end to end: enforces the connection cap, runs the
/// pre-authentication gate, registers the client with the router on
/// success, and runs its tasks until disconnect.
pub async fn serve<R, W>(
    ctx: DispatchContext,
    config: RpcServerConfig,
    remote_addr: String,
    session_id: u64,
    mut reader: R,
    mut writer: W,
) where
    R: FrameReader + 'static,
    W: FrameWriter + 'static,
{
    if ctx.router.num_clients().await >= config.rpc_max_websockets {
        log::warn!(
            "{}: rejecting connection, {} websockets already open",
            remote_addr,
            config.rpc_max_websockets
        );
        return;
    }

    let (client, chans) = Client::new(
        remote_addr.clone(),
        session_id,
        config.send_buffer_size,
        ctx.router.clone(),
    );

    if !authenticate_gate(&config, &client, &mut reader, &mut writer).await {
        log::debug!("{}: dropping connection, authentication failed", remote_addr);
        return;
    }

    log::info!(
        "{}: authenticated as {}",
        remote_addr,
        if client.is_admin() { "admin" } else { "limited" }
    );
    ctx.router.register_client(client.clone());

    let ClientChannels {
        notification_rx,
        send_rx,
        quit_rx,
    } = chans;
    let reply_tx = client.clone_send_sender();

    let writer_handle = tokio::spawn(run_writer(writer, send_rx, quit_rx.clone()));
    let queue_handle = tokio::spawn(run_notification_queue(
        notification_rx,
        reply_tx,
        quit_rx.clone(),
    ));

    run_reader(ctx, client.clone(), reader, quit_rx).await;

    client.disconnect();
    let _ = writer_handle.await;
    let _ = queue_handle.await;
    log::info!("{}: disconnected", remote_addr);
}

/// Reads and validates the first inbound frame, which must be an
/// `authenticate` call (spec.md §4.C). Any other outcome — wrong method,
/// bad credentials, malformed JSON, closed transport — drops the
/// connection before it is ever registered with the router.
async fn authenticate_gate<R: FrameReader, W: FrameWriter>(
    config: &RpcServerConfig,
    client: &Arc<Client>,
    reader: &mut R,
    writer: &mut W,
) -> bool {
    let raw = match reader.recv().await {
        Some(raw) => raw,
        None => return false,
    };

    let request: Request = match serde_json::from_slice(&raw) {
        Ok(r) => r,
        Err(_) => {
            let _ = writer
                .send(Response::failure(None, &RpcServerError::Parse).to_bytes())
                .await;
            return false;
        }
    };

    if request.method != methods::AUTHENTICATE {
        let err = RpcServerError::InvalidParams(
            "first request on a new connection must be authenticate".to_string(),
        );
        if let Some(id) = request.id {
            let _ = writer.send(Response::failure(Some(id), &err).to_bytes()).await;
        }
        return false;
    }

    let params: AuthenticateParams = match serde_json::from_value(request.params) {
        Ok(p) => p,
        Err(e) => {
            let err = RpcServerError::InvalidParams(e.to_string());
            if let Some(id) = request.id {
                let _ = writer.send(Response::failure(Some(id), &err).to_bytes()).await;
            }
            return false;
        }
    };

    match authenticate(
        &params.username,
        &params.passphrase,
        config.admin_hash.as_ref(),
        config.limited_hash.as_ref(),
    ) {
        Some(outcome) => {
            client.set_authenticated(matches!(outcome, AuthResult::Admin));
            if let Some(id) = request.id {
                let _ = writer
                    .send(Response::success(Some(id), serde_json::Value::Null).to_bytes())
                    .await;
            }
            true
        }
        None => {
            let err = RpcServerError::InvalidParams("authentication failed".to_string());
            if let Some(id) = request.id {
                let _ = writer.send(Response::failure(Some(id), &err).to_bytes()).await;
            }
            false
        }
    }
}

/// Drains the bounded reply channel, writing each frame to the transport,
/// and interleaves a periodic keepalive so idle connections are detected
/// promptly (an ambient addition beyond the core notification protocol).
async fn run_writer<W: FrameWriter>(
    mut writer: W,
    mut send_rx: mpsc::Receiver<Vec<u8>>,
    mut quit_rx: watch::Receiver<()>,
) {
    let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
    keepalive.tick().await;

    loop {
        tokio::select! {
            frame = send_rx.recv() => {
                match frame {
                    Some(frame) => {
                        if !writer.send(frame).await {
                            return;
                        }
                    }
                    None => return,
                }
            }
            _ = keepalive.tick() => {
                if !writer.ping().await {
                    return;
                }
            }
            _ = quit_rx.changed() => return,
        }
    }
}

/// Drains queued notifications into the same outbound channel the sync
/// writer serves, so a client's replies and notifications are delivered in
/// one ordered stream (spec.md §3).
async fn run_notification_queue(
    mut notification_rx: mpsc::Receiver<Vec<u8>>,
    reply_tx: mpsc::Sender<Vec<u8>>,
    mut quit_rx: watch::Receiver<()>,
) {
    loop {
        tokio::select! {
            frame = notification_rx.recv() => {
                match frame {
                    Some(frame) => {
                        if reply_tx.send(frame).await.is_err() {
                            return;
                        }
                    }
                    None => return,
                }
            }
            _ = quit_rx.changed() => return,
        }
    }
}

/// Reads and dispatches inbound frames until the transport closes or the
/// client is cancelled externally (spec.md §4.C).
async fn run_reader<R: FrameReader>(
    ctx: DispatchContext,
    client: Arc<Client>,
    mut reader: R,
    mut quit_rx: watch::Receiver<()>,
) {
    loop {
        let raw = tokio::select! {
            raw = reader.recv() => raw,
            _ = quit_rx.changed() => return,
        };

        let raw = match raw {
            Some(raw) => raw,
            None => return,
        };

        match dispatch::handle(&ctx, &client, &raw).await {
            Outcome::NoReply => {}
            Outcome::Reply(bytes) => {
                if client.send_message(bytes).await.is_err() {
                    return;
                }
            }
            Outcome::Async(cmd) => {
                let worker_ctx = ctx.clone();
                let sender = client.async_worker_sender(move |worker_client, cmd| {
                    let worker_ctx = worker_ctx.clone();
                    async move { dispatch::run_async(worker_ctx, worker_client, cmd).await }
                });
                if sender.send(cmd).await.is_err() {
                    log::warn!("{}: async worker unavailable", client.remote_addr());
                }
            }
        }
    }
}

/// Websocket transport adapter, generalizing the teacher's
/// `ConnConfig::ws_split_stream`/`dial_websocket` to the server side of the
/// same library (`tokio-tungstenite`).
#[cfg(feature = "transport-tungstenite")]
pub mod tungstenite_transport {
    use super::{FrameReader, FrameWriter};
    use async_trait::async_trait;
    use futures_util::stream::{SplitSink, SplitStream};
    use futures_util::{SinkExt, StreamExt};
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

    pub struct WsReader(pub SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>);
    pub struct WsWriter(pub SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>);

    #[async_trait]
    impl FrameReader for WsReader {
        async fn recv(&mut self) -> Option<Vec<u8>> {
            loop {
                match self.0.next().await {
                    Some(Ok(Message::Binary(bytes))) => return Some(bytes),
                    Some(Ok(Message::Text(text))) => return Some(text.into_bytes()),
                    Some(Ok(Message::Close(_))) | None => return None,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        log::warn!("websocket read error: {}", e);
                        return None;
                    }
                }
            }
        }
    }

    #[async_trait]
    impl FrameWriter for WsWriter {
        async fn send(&mut self, frame: Vec<u8>) -> bool {
            self.0.send(Message::Binary(frame)).await.is_ok()
        }

        async fn ping(&mut self) -> bool {
            self.0.send(Message::Ping(Vec::new())).await.is_ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::TestAddressDecoder;
    use crate::chainstore::{ChainStore, ChainStoreError, PauseGuard};
    use crate::client::auth::hash_credentials;
    use crate::dispatch::StandardDispatcher;
    use crate::router;
    use crate::types::{Block, Hash};
    use serde_json::Value;

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

    fn test_ctx() -> DispatchContext {
        DispatchContext {
            router: router::spawn(Arc::new(TestAddressDecoder)).0,
            chain_store: Arc::new(NoopStore),
            address_decoder: Arc::new(TestAddressDecoder),
            standard: Arc::new(NoopStandard),
        }
    }

    #[tokio::test]
    async fn rejects_first_message_that_is_not_authenticate() {
        let ctx = test_ctx();
        let config = RpcServerConfig::default();
        let (in_tx, in_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(4);

        let serve_handle = tokio::spawn(serve(
            ctx,
            config,
            "127.0.0.1:1".into(),
            1,
            ChanReader(in_rx),
            ChanWriter(out_tx),
        ));

        in_tx
            .send(br#"{"id":1,"method":"notifyblocks","params":[]}"#.to_vec())
            .await
            .unwrap();
        drop(in_tx);

        let reply = out_rx.recv().await.unwrap();
        let v: Value = serde_json::from_slice(&reply).unwrap();
        assert!(!v["error"].is_null());
        let _ = serve_handle.await;
    }

    #[tokio::test]
    async fn authenticates_then_dispatches_notifyblocks() {
        let ctx = test_ctx();
        let mut config = RpcServerConfig::default();
        config.admin_hash = Some(hash_credentials("admin", "hunter2"));

        let (in_tx, in_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(4);

        let serve_handle = tokio::spawn(serve(
            ctx,
            config,
            "127.0.0.1:1".into(),
            1,
            ChanReader(in_rx),
            ChanWriter(out_tx),
        ));

        let auth = serde_json::json!({
            "id": 1,
            "method": "authenticate",
            "params": {"username": "admin", "passphrase": "hunter2"},
        });
        in_tx.send(auth.to_string().into_bytes()).await.unwrap();

        let auth_reply = out_rx.recv().await.unwrap();
        let v: Value = serde_json::from_slice(&auth_reply).unwrap();
        assert!(v["error"].is_null());

        let notify = serde_json::json!({"id": 2, "method": "notifyblocks", "params": []});
        in_tx.send(notify.to_string().into_bytes()).await.unwrap();

        let notify_reply = out_rx.recv().await.unwrap();
        let v: Value = serde_json::from_slice(&notify_reply).unwrap();
        assert!(v["error"].is_null());

        drop(in_tx);
        let _ = serve_handle.await;
    }
}
