//! Notification router — Component B.
//!
//! The single authoritative owner of every subscription index. One task
//! consumes a tagged-union channel of events and control messages; no other
//! task ever mutates the indices, so no locking is needed around them
//! (spec.md §3, §5). Generalizes the teacher's
//! `notify::NotificationHandlers`/`NotificationState` bookkeeping — there, a
//! client tracks which notification kinds *it* asked a server for; here, the
//! server tracks which notification kinds *each connected client* asked for.
use {
    crate::address::AddressDecoder,
    crate::client::{Client, ClientId},
    crate::jsonrpc,
    crate::types::{Block, OutPoint, Transaction},
    std::collections::{HashMap, HashSet},
    std::sync::Arc,
    tokio::sync::{mpsc, oneshot},
};

/// Tagged union of everything the router consumes, per spec.md §4.B.
pub enum RouterMessage {
    BlockConnected(Block),
    BlockDisconnected(Block),
    MempoolTx { tx: Transaction, is_new: bool },

    RegisterClient(Arc<Client>),
    UnregisterClient(ClientId),
    RegisterBlocks(ClientId),
    UnregisterBlocks(ClientId),
    RegisterMempoolTxs(ClientId),
    UnregisterMempoolTxs(ClientId),
    RegisterSpent(ClientId, Vec<OutPoint>),
    UnregisterSpent(ClientId, OutPoint),
    RegisterAddr(ClientId, Vec<String>),
    UnregisterAddr(ClientId, String),
}

/// Cheap, cloneable handle used by clients, dispatch handlers, the rescan
/// engine, and external publishers (block manager, mempool) to talk to the
/// router. Internally funnels through the queue relay (Component A) so no
/// caller ever blocks on router latency.
#[derive(Clone)]
pub struct RouterHandle {
    tx: mpsc::UnboundedSender<RouterMessage>,
    query_tx: mpsc::Sender<oneshot::Sender<usize>>,
}

impl RouterHandle {
    fn send(&self, msg: RouterMessage) {
        // The relay absorbs this; a closed router (shut down) simply drops
        // the message, matching spec.md §7's "router errors are logged and
        // discarded" policy applied to the degenerate case of no router.
        let _ = self.tx.send(msg);
    }

    pub fn register_client(&self, client: Arc<Client>) {
        self.send(RouterMessage::RegisterClient(client));
    }

    pub fn unregister_client(&self, id: ClientId) {
        self.send(RouterMessage::UnregisterClient(id));
    }

    pub fn register_blocks(&self, id: ClientId) {
        self.send(RouterMessage::RegisterBlocks(id));
    }

    pub fn unregister_blocks(&self, id: ClientId) {
        self.send(RouterMessage::UnregisterBlocks(id));
    }

    pub fn register_mempool_txs(&self, id: ClientId) {
        self.send(RouterMessage::RegisterMempoolTxs(id));
    }

    pub fn unregister_mempool_txs(&self, id: ClientId) {
        self.send(RouterMessage::UnregisterMempoolTxs(id));
    }

    pub fn register_spent(&self, id: ClientId, outpoints: Vec<OutPoint>) {
        self.send(RouterMessage::RegisterSpent(id, outpoints));
    }

    pub fn unregister_spent(&self, id: ClientId, outpoint: OutPoint) {
        self.send(RouterMessage::UnregisterSpent(id, outpoint));
    }

    pub fn register_addr(&self, id: ClientId, addresses: Vec<String>) {
        self.send(RouterMessage::RegisterAddr(id, addresses));
    }

    pub fn unregister_addr(&self, id: ClientId, address: String) {
        self.send(RouterMessage::UnregisterAddr(id, address));
    }

    pub fn publish_block_connected(&self, block: Block) {
        self.send(RouterMessage::BlockConnected(block));
    }

    pub fn publish_block_disconnected(&self, block: Block) {
        self.send(RouterMessage::BlockDisconnected(block));
    }

    pub fn publish_mempool_tx(&self, tx: Transaction, is_new: bool) {
        self.send(RouterMessage::MempoolTx { tx, is_new });
    }

    /// Returns the current number of connected clients, synchronized through
    /// a direct channel exchange with the router (spec.md §4.B `numClients`).
    pub async fn num_clients(&self) -> usize {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.query_tx.send(reply_tx).await.is_err() {
            return 0;
        }
        reply_rx.await.unwrap_or(0)
    }

    /// Transitions the router to draining: every currently connected client
    /// is disconnected and the router task returns (spec.md §4.B).
    pub fn shutdown(&self) {
        self.send_shutdown();
    }

    fn send_shutdown(&self) {
        // Modeled as a message rather than a second quit-channel so the
        // router's single recv loop stays the only place state changes.
        let _ = self.tx.send(RouterMessage::UnregisterClient(ClientId::SHUTDOWN_SENTINEL));
    }
}

impl ClientId {
    /// Not a real client: used only as the payload of the router's internal
    /// shutdown message. The router recognizes it as a sentinel rather than
    /// attempting (harmlessly) to unregister a nonexistent client.
    const SHUTDOWN_SENTINEL: ClientId = ClientId::sentinel();
}

struct Router {
    clients: HashMap<ClientId, Arc<Client>>,
    block_subs: HashMap<ClientId, Arc<Client>>,
    mempool_subs: HashMap<ClientId, Arc<Client>>,
    watched_outpoints: HashMap<OutPoint, HashMap<ClientId, Arc<Client>>>,
    watched_addresses: HashMap<String, HashMap<ClientId, Arc<Client>>>,
    address_decoder: Arc<dyn AddressDecoder>,
}

/// Spawns the router task and returns a handle plus its join handle.
pub fn spawn(address_decoder: Arc<dyn AddressDecoder>) -> (RouterHandle, tokio::task::JoinHandle<()>) {
    let (router_tx, router_rx) = mpsc::channel::<RouterMessage>(1);
    let relay_tx = crate::relay::spawn(router_tx);
    let (query_tx, query_rx) = mpsc::channel(8);

    let handle = RouterHandle {
        tx: relay_tx,
        query_tx,
    };

    let router = Router {
        clients: HashMap::new(),
        block_subs: HashMap::new(),
        mempool_subs: HashMap::new(),
        watched_outpoints: HashMap::new(),
        watched_addresses: HashMap::new(),
        address_decoder,
    };

    let join = tokio::spawn(router.run(router_rx, query_rx));

    (handle, join)
}

impl Router {
    async fn run(
        mut self,
        mut rx: mpsc::Receiver<RouterMessage>,
        mut query_rx: mpsc::Receiver<oneshot::Sender<usize>>,
    ) {
        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(msg) => {
                            if self.handle_message(msg).await {
                                self.drain().await;
                                return;
                            }
                        }
                        None => {
                            log::debug!("{}", crate::error::RouterError::Closed);
                            return;
                        }
                    }
                }
                query = query_rx.recv() => {
                    match query {
                        Some(reply) => { let _ = reply.send(self.clients.len()); }
                        None => {}
                    }
                }
            }
        }
    }

    /// Returns `true` if this message was the shutdown sentinel and the
    /// router should begin draining.
    async fn handle_message(&mut self, msg: RouterMessage) -> bool {
        match msg {
            RouterMessage::UnregisterClient(id) if id == ClientId::SHUTDOWN_SENTINEL => {
                return true;
            }

            RouterMessage::BlockConnected(block) => self.on_block_connected(block).await,
            RouterMessage::BlockDisconnected(block) => self.on_block_disconnected(&block).await,
            RouterMessage::MempoolTx { tx, is_new } => self.on_mempool_tx(tx, is_new).await,

            RouterMessage::RegisterClient(client) => {
                self.clients.insert(client.id(), client);
            }
            RouterMessage::UnregisterClient(id) => self.unregister_client(id),
            RouterMessage::RegisterBlocks(id) => {
                if let Some(client) = self.clients.get(&id) {
                    self.block_subs.insert(id, client.clone());
                }
            }
            RouterMessage::UnregisterBlocks(id) => {
                if self.block_subs.remove(&id).is_none() {
                    log::warn!("unregister_blocks: client {:?} was not subscribed", id);
                }
            }
            RouterMessage::RegisterMempoolTxs(id) => {
                if let Some(client) = self.clients.get(&id) {
                    self.mempool_subs.insert(id, client.clone());
                }
            }
            RouterMessage::UnregisterMempoolTxs(id) => {
                if self.mempool_subs.remove(&id).is_none() {
                    log::warn!("unregister_mempool_txs: client {:?} was not subscribed", id);
                }
            }
            RouterMessage::RegisterSpent(id, outpoints) => self.register_spent(id, outpoints),
            RouterMessage::UnregisterSpent(id, outpoint) => self.unregister_spent(id, &outpoint),
            RouterMessage::RegisterAddr(id, addrs) => self.register_addr(id, addrs),
            RouterMessage::UnregisterAddr(id, addr) => self.unregister_addr(id, &addr),
        }

        false
    }

    async fn drain(&mut self) {
        for client in self.clients.values() {
            client.disconnect();
        }
        self.clients.clear();
        self.block_subs.clear();
        self.mempool_subs.clear();
        self.watched_outpoints.clear();
        self.watched_addresses.clear();
    }

    fn unregister_client(&mut self, id: ClientId) {
        let client = match self.clients.remove(&id) {
            Some(c) => c,
            None => {
                log::warn!("unregister_client: client {:?} already absent", id);
                return;
            }
        };

        self.block_subs.remove(&id);
        self.mempool_subs.remove(&id);

        let (outpoints, addrs) = client.drain_subscription_mirrors();
        for op in outpoints {
            self.remove_from_outpoint_index(&op, id);
        }
        for addr in addrs {
            self.remove_from_address_index(&addr, id);
        }
    }

    fn register_spent(&mut self, id: ClientId, outpoints: Vec<OutPoint>) {
        let client = match self.clients.get(&id) {
            Some(c) => c.clone(),
            None => return,
        };

        for op in outpoints {
            self.watched_outpoints
                .entry(op)
                .or_default()
                .insert(id, client.clone());
            client.insert_spent_request(op);
        }
    }

    fn unregister_spent(&mut self, id: ClientId, outpoint: &OutPoint) {
        if let Some(client) = self.clients.get(&id) {
            client.remove_spent_request(outpoint);
        }
        self.remove_from_outpoint_index(outpoint, id);
    }

    /// Invariant 2: an inner map is never left empty; removing the last
    /// client deletes the outer entry.
    fn remove_from_outpoint_index(&mut self, outpoint: &OutPoint, id: ClientId) {
        if let Some(inner) = self.watched_outpoints.get_mut(outpoint) {
            if inner.remove(&id).is_none() {
                log::warn!(
                    "unregister_spent: client {:?} was not watching {:?}",
                    id,
                    outpoint
                );
            }
            if inner.is_empty() {
                self.watched_outpoints.remove(outpoint);
            }
        }
    }

    fn register_addr(&mut self, id: ClientId, addresses: Vec<String>) {
        let client = match self.clients.get(&id) {
            Some(c) => c.clone(),
            None => return,
        };

        for addr in addresses {
            self.watched_addresses
                .entry(addr.clone())
                .or_default()
                .insert(id, client.clone());
            client.insert_addr_request(addr);
        }
    }

    fn unregister_addr(&mut self, id: ClientId, address: &str) {
        if let Some(client) = self.clients.get(&id) {
            client.remove_addr_request(address);
        }
        self.remove_from_address_index(address, id);
    }

    fn remove_from_address_index(&mut self, address: &str, id: ClientId) {
        if let Some(inner) = self.watched_addresses.get_mut(address) {
            if inner.remove(&id).is_none() {
                log::warn!(
                    "unregister_addr: client {:?} was not watching {}",
                    id,
                    address
                );
            }
            if inner.is_empty() {
                self.watched_addresses.remove(address);
            }
        }
    }

    async fn on_block_connected(&mut self, block: Block) {
        if !self.watched_outpoints.is_empty() || !self.watched_addresses.is_empty() {
            for tx in &block.transactions {
                self.scan_transaction(tx, Some(&block)).await;
            }
        }

        if !self.block_subs.is_empty() {
            let bytes = jsonrpc::block_connected(&block);
            for client in self.block_subs.values() {
                send_one(client, bytes.clone()).await;
            }
        }
    }

    async fn on_block_disconnected(&mut self, block: &Block) {
        if self.block_subs.is_empty() {
            return;
        }
        let bytes = jsonrpc::block_disconnected(block);
        for client in self.block_subs.values() {
            send_one(client, bytes.clone()).await;
        }
    }

    async fn on_mempool_tx(&mut self, tx: Transaction, is_new: bool) {
        if is_new && !self.mempool_subs.is_empty() {
            let compact = jsonrpc::tx_accepted(&tx);
            let mut verbose: Option<Vec<u8>> = None;

            for client in self.mempool_subs.values() {
                let bytes = if client.verbose_tx_updates() {
                    verbose
                        .get_or_insert_with(|| jsonrpc::tx_accepted_verbose(&tx))
                        .clone()
                } else {
                    compact.clone()
                };
                send_one(client, bytes).await;
            }
        }

        if !self.watched_outpoints.is_empty() || !self.watched_addresses.is_empty() {
            self.scan_transaction(&tx, None).await;
        }
    }

    /// Transaction-scan procedure (spec.md §4.B): fires at most one
    /// `redeemingtx` and one `recvtx` per client for this transaction.
    async fn scan_transaction(&mut self, tx: &Transaction, block: Option<&Block>) {
        let block_details = block.map(|b| b.details.clone());
        let mut redeemed_to: HashSet<ClientId> = HashSet::new();
        let mut one_shot_outpoints: Vec<OutPoint> = Vec::new();

        for input in &tx.inputs {
            let op = input.previous_outpoint;
            let subscribers = match self.watched_outpoints.get(&op) {
                Some(m) if !m.is_empty() => m.clone(),
                _ => continue,
            };

            let bytes = jsonrpc::redeeming_tx(tx, block_details.as_ref());
            for (id, client) in &subscribers {
                if redeemed_to.insert(*id) {
                    send_one(client, bytes.clone()).await;
                }
            }

            // One-shot rule (spec.md §3 invariant 4): only a block-confirmed
            // spend auto-unregisters the watch; a mempool sighting does not.
            if block.is_some() {
                one_shot_outpoints.push(op);
            }
        }

        for op in one_shot_outpoints {
            if let Some(inner) = self.watched_outpoints.remove(&op) {
                for client in inner.values() {
                    client.remove_spent_request(&op);
                }
            }
        }

        let mut recvd_to: HashSet<ClientId> = HashSet::new();
        for output in &tx.outputs {
            for addr_kind in self.address_decoder.extract_addresses(&output.pk_script) {
                let encoded = self.address_decoder.encode(&addr_kind);
                let subscribers = match self.watched_addresses.get(&encoded) {
                    Some(m) if !m.is_empty() => m.clone(),
                    _ => continue,
                };

                let bytes = jsonrpc::recv_tx(tx, block_details.as_ref());
                for (id, client) in &subscribers {
                    if recvd_to.insert(*id) {
                        send_one(client, bytes.clone()).await;
                    }

                    // Auto-register a one-shot spent-watch on the newly
                    // created outpoint so a later redemption fires
                    // `redeemingtx` to this same client.
                    let new_op = OutPoint::new(tx.hash, output_index(tx, output));
                    self.watched_outpoints
                        .entry(new_op)
                        .or_default()
                        .insert(*id, client.clone());
                    client.insert_spent_request(new_op);
                }
            }
        }
    }
}

fn output_index(tx: &Transaction, needle: &crate::types::TxOut) -> u32 {
    tx.outputs
        .iter()
        .position(|o| std::ptr::eq(o, needle))
        .expect("needle is an element of tx.outputs") as u32
}

/// Delivers one notification inline on the router task (spec.md §5: "the
/// router processes events in receive order; notifications to any single
/// client are enqueued in event order"). `queue_notification` can block
/// behind a slow client's full channel; the router accepts being paced by
/// the slowest notified client rather than fan sends out to unordered
/// spawned tasks, which would let two notifications to the same client race
/// each other (spec.md §9, Open Question (b)).
async fn send_one(client: &Arc<Client>, bytes: Vec<u8>) {
    if let Err(e) = client.queue_notification(bytes).await {
        log::debug!("dropping notification for disconnected client: {}", e);
    }
}
