//! Client pipeline — Component C.
//!
//! This module holds the `Client` record: identity, auth/authorization
//! state, subscription mirrors, and the channel plumbing described in
//! spec.md §3. The four cooperating tasks (reader, sync writer, notification
//! queue, async worker) live in [`pipeline`], which drives a `Client`
//! against a concrete transport.
pub mod auth;
pub mod pipeline;

use {
    crate::error::ClientQuit,
    crate::router::RouterHandle,
    crate::types::OutPoint,
    std::collections::HashSet,
    std::sync::atomic::{AtomicBool, AtomicU64, Ordering},
    std::sync::Mutex,
    tokio::sync::{mpsc, watch},
};

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// A stable, cheap-to-hash identity for a connected client, valid for the
/// client's lifetime. Plays the role spec.md §3 assigns to "the client's
/// quit signal as map key": a unique per-client value the router's indices
/// key on, cheaper to hash than the `Client` record itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

impl ClientId {
    fn next() -> Self {
        ClientId(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Not a real client id (the counter starts at 1); used by the router
    /// as an internal shutdown sentinel.
    pub(crate) const fn sentinel() -> Self {
        ClientId(0)
    }
}

/// A pending command handed to the async worker (spec.md §4.C "long-running
/// dispatch").
#[derive(Debug)]
pub struct PendingCommand {
    pub id: Option<serde_json::Value>,
    pub method: String,
    pub params: serde_json::Value,
}

/// Receivers a freshly constructed [`Client`] hands off to [`pipeline`]
/// task-spawning functions. Kept separate from `Client` itself since only
/// one task may own each receiver.
pub struct ClientChannels {
    pub notification_rx: mpsc::Receiver<Vec<u8>>,
    pub send_rx: mpsc::Receiver<Vec<u8>>,
    pub quit_rx: watch::Receiver<()>,
}

pub struct Client {
    id: ClientId,
    remote_addr: String,
    session_id: u64,

    authenticated: AtomicBool,
    is_admin: AtomicBool,
    verbose_tx_updates: AtomicBool,

    /// The only cross-task mutable state guarded by a lock per spec.md §5;
    /// released before any I/O. `None` once disconnected — dropping the
    /// sender is what closes `quit` for every subscriber of `quit_rx`.
    quit_tx: Mutex<Option<watch::Sender<()>>>,

    disconnected: Mutex<bool>,

    /// Mirrors the router's reverse view of this client's subscriptions
    /// (spec.md §3 invariant 3). Mutated only by the router task, which is
    /// the indices' single writer; the `Mutex` here exists purely to
    /// satisfy `Arc` aliasing, not for contention — the router never holds
    /// it across an `.await`.
    spent_requests: Mutex<HashSet<OutPoint>>,
    addr_requests: Mutex<HashSet<String>>,

    /// Capacity-1 handoff to the notification queue task (spec.md §3).
    notification_tx: mpsc::Sender<Vec<u8>>,
    /// Bounded capacity-50 (configurable) handoff to the sync writer.
    send_tx: mpsc::Sender<Vec<u8>>,
    /// Lazily started on first long-running command (spec.md §4.C).
    async_tx: Mutex<Option<mpsc::Sender<PendingCommand>>>,

    router: RouterHandle,
}

impl Client {
    pub fn new(
        remote_addr: String,
        session_id: u64,
        send_buffer_size: usize,
        router: RouterHandle,
    ) -> (std::sync::Arc<Client>, ClientChannels) {
        let (notification_tx, notification_rx) = mpsc::channel(1);
        let (send_tx, send_rx) = mpsc::channel(send_buffer_size);
        let (quit_tx, quit_rx) = watch::channel(());

        let client = std::sync::Arc::new(Client {
            id: ClientId::next(),
            remote_addr,
            session_id,
            authenticated: AtomicBool::new(false),
            is_admin: AtomicBool::new(false),
            verbose_tx_updates: AtomicBool::new(false),
            quit_tx: Mutex::new(Some(quit_tx)),
            disconnected: Mutex::new(false),
            spent_requests: Mutex::new(HashSet::new()),
            addr_requests: Mutex::new(HashSet::new()),
            notification_tx,
            send_tx,
            async_tx: Mutex::new(None),
            router,
        });

        (
            client,
            ClientChannels {
                notification_rx,
                send_rx,
                quit_rx,
            },
        )
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    pub fn set_authenticated(&self, admin: bool) {
        self.authenticated.store(true, Ordering::SeqCst);
        self.is_admin.store(admin, Ordering::SeqCst);
    }

    pub fn is_admin(&self) -> bool {
        self.is_admin.load(Ordering::SeqCst)
    }

    pub fn verbose_tx_updates(&self) -> bool {
        self.verbose_tx_updates.load(Ordering::SeqCst)
    }

    pub fn set_verbose_tx_updates(&self, verbose: bool) {
        self.verbose_tx_updates.store(verbose, Ordering::SeqCst);
    }

    pub fn is_disconnected(&self) -> bool {
        *self.disconnected.lock().unwrap()
    }

    /// Returns a fresh subscriber to this client's quit signal. Robust to
    /// late subscription: if `disconnect` already ran, the sender is gone
    /// and `changed()` on the returned receiver resolves immediately with
    /// an error, the same as an already-fired cancellation.
    pub fn subscribe_quit(&self) -> watch::Receiver<()> {
        let guard = self.quit_tx.lock().unwrap();
        match &*guard {
            Some(tx) => tx.subscribe(),
            None => {
                // Already disconnected: manufacture a receiver whose sender
                // is immediately dropped so `changed()` fails right away.
                let (_tx, rx) = watch::channel(());
                rx
            }
        }
    }

    /// Idempotent disconnect: the first caller closes `quit` and tells the
    /// router to drop every subscription this client held; later callers
    /// observe `disconnected` already set and return immediately.
    pub fn disconnect(self: &std::sync::Arc<Self>) {
        {
            let mut disconnected = self.disconnected.lock().unwrap();
            if *disconnected {
                return;
            }
            *disconnected = true;
        }

        // Dropping the sender closes `quit` for every subscriber.
        self.quit_tx.lock().unwrap().take();

        self.router.unregister_client(self.id());
    }

    /// Publisher-safe best-effort notification send (spec.md §4.C). Must
    /// never backpressure the publisher for long; the 1-slot channel plus a
    /// dedicated draining task bounds how long it can stall, at the cost of
    /// head-of-line blocking documented in spec.md §9.
    pub async fn queue_notification(&self, bytes: Vec<u8>) -> Result<(), ClientQuit> {
        if self.is_disconnected() {
            return Err(ClientQuit);
        }

        self.notification_tx.send(bytes).await.map_err(|_| ClientQuit)
    }

    /// Bounded reply send: blocks the caller (typically the reader task)
    /// when the 50-slot channel is full, which is an acceptable backpressure
    /// point for request/response traffic (spec.md §4.C).
    pub async fn send_message(&self, bytes: Vec<u8>) -> Result<(), ClientQuit> {
        self.send_tx.send(bytes).await.map_err(|_| ClientQuit)
    }

    pub fn insert_spent_request(&self, outpoint: OutPoint) {
        self.spent_requests.lock().unwrap().insert(outpoint);
    }

    pub fn remove_spent_request(&self, outpoint: &OutPoint) {
        self.spent_requests.lock().unwrap().remove(outpoint);
    }

    pub fn has_spent_request(&self, outpoint: &OutPoint) -> bool {
        self.spent_requests.lock().unwrap().contains(outpoint)
    }

    pub fn insert_addr_request(&self, addr: String) {
        self.addr_requests.lock().unwrap().insert(addr);
    }

    pub fn remove_addr_request(&self, addr: &str) {
        self.addr_requests.lock().unwrap().remove(addr);
    }

    pub fn has_addr_request(&self, addr: &str) -> bool {
        self.addr_requests.lock().unwrap().contains(addr)
    }

    /// Drains both subscription mirrors, used by the router when it
    /// processes `UnregisterClient` to remove every outpoint/address entry
    /// this client held, atomically from the router's perspective (spec.md
    /// §3 invariant 3).
    pub fn drain_subscription_mirrors(&self) -> (Vec<OutPoint>, Vec<String>) {
        let outpoints: Vec<OutPoint> = self.spent_requests.lock().unwrap().drain().collect();
        let addrs: Vec<String> = self.addr_requests.lock().unwrap().drain().collect();
        (outpoints, addrs)
    }

    /// Clones the sender the notification queue task pushes into, feeding
    /// the same outbound channel the sync writer drains (spec.md §3).
    pub(crate) fn clone_send_sender(&self) -> mpsc::Sender<Vec<u8>> {
        self.send_tx.clone()
    }

    /// Returns the async worker's command channel, starting the worker task
    /// on first use (spec.md §4.C "lazy-start"). `runner` executes one
    /// [`PendingCommand`] to completion and is supplied by the dispatch
    /// layer so this module has no dependency on it.
    pub fn async_worker_sender<F, Fut>(
        self: &std::sync::Arc<Self>,
        runner: F,
    ) -> mpsc::Sender<PendingCommand>
    where
        F: Fn(std::sync::Arc<Client>, PendingCommand) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut guard = self.async_tx.lock().unwrap();
        if let Some(tx) = guard.as_ref() {
            return tx.clone();
        }

        let (tx, mut rx) = mpsc::channel::<PendingCommand>(1);
        let client = self.clone();
        let runner = std::sync::Arc::new(runner);

        tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                let runner = runner.clone();
                let client = client.clone();
                // One command at a time on a child task: a handler panic is
                // contained there and does not take down the worker loop.
                let handle = tokio::spawn(async move { runner(client, cmd).await });
                let _ = handle.await;
            }
        });

        *guard = Some(tx.clone());
        tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::TestAddressDecoder;
    use crate::router;
    use std::sync::Arc;

    fn test_router() -> RouterHandle {
        router::spawn(Arc::new(TestAddressDecoder)).0
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let (client, _chans) = Client::new("127.0.0.1:1".into(), 1, 50, test_router());
        assert!(!client.is_disconnected());
        client.disconnect();
        assert!(client.is_disconnected());
        client.disconnect();
        assert!(client.is_disconnected());
    }

    #[tokio::test]
    async fn queue_notification_fails_after_disconnect() {
        let (client, _chans) = Client::new("127.0.0.1:1".into(), 1, 50, test_router());
        client.disconnect();
        assert_eq!(client.queue_notification(vec![1]).await, Err(ClientQuit));
    }

    #[tokio::test]
    async fn subscribe_quit_after_disconnect_resolves_immediately() {
        let (client, _chans) = Client::new("127.0.0.1:1".into(), 1, 50, test_router());
        client.disconnect();
        let mut rx = client.subscribe_quit();
        assert!(rx.changed().await.is_err());
    }
}
