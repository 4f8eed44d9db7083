//! Rescan engine — Component E.
//!
//! Runs entirely on a client's async worker (spec.md §4.E): walks a
//! historical block range tolerating chain reorganizations and client
//! disconnects, reporting progress, and — for open-ended requests that
//! reach the tip — upgrading seamlessly into a live subscription.
use {
    crate::address::{AddressDecoder, AddressKind},
    crate::chainstore::{ChainStore, ChainStoreError},
    crate::client::Client,
    crate::dispatch::{decode_outpoints, DispatchContext, WireOutpoint},
    crate::error::{ClientQuit, RescanError, RpcServerError},
    crate::jsonrpc::{recv_tx, redeeming_tx, rescan_finished, rescan_progress},
    crate::types::{Block, BlockDetails, Hash, OutPoint},
    serde::Deserialize,
    serde_json::Value,
    std::collections::HashSet,
    std::sync::Arc,
    std::time::{Duration, Instant},
};

const PROGRESS_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
pub struct RescanParams {
    pub beginblock: String,
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub outpoints: Vec<WireOutpoint>,
    pub endblock: Option<String>,
}

/// Classification buckets built once per rescan from the client's request
/// (spec.md §3). `compressed_pub_keys`/`uncompressed_pub_keys` stay empty
/// under the reference [`AddressDecoder`], which has no raw-pubkey address
/// kind; a decoder for a real address format would populate them during
/// `classify`.
#[derive(Default)]
pub struct RescanKeys {
    pub pub_key_hashes: HashSet<[u8; 20]>,
    pub script_hashes: HashSet<[u8; 20]>,
    pub compressed_pub_keys: HashSet<[u8; 33]>,
    pub uncompressed_pub_keys: HashSet<[u8; 65]>,
    pub fallbacks: HashSet<String>,
    pub unspent: HashSet<OutPoint>,
}

impl RescanKeys {
    fn classify(&mut self, decoder: &dyn AddressDecoder, addr: &str) {
        match decoder.decode(addr) {
            Some(AddressKind::P2pkh(digest)) => {
                self.pub_key_hashes.insert(digest);
            }
            Some(AddressKind::P2sh(digest)) => {
                self.script_hashes.insert(digest);
            }
            Some(AddressKind::Fallback(s)) => {
                self.fallbacks.insert(s);
            }
            None => {
                self.fallbacks.insert(addr.to_string());
            }
        }
    }

    fn matches_script(&self, decoder: &dyn AddressDecoder, pk_script: &[u8]) -> bool {
        decoder
            .extract_addresses(pk_script)
            .into_iter()
            .any(|kind| match kind {
                AddressKind::P2pkh(digest) => self.pub_key_hashes.contains(&digest),
                AddressKind::P2sh(digest) => self.script_hashes.contains(&digest),
                AddressKind::Fallback(s) => self.fallbacks.contains(&s),
            })
    }

    /// Re-encodes the hash-keyed buckets plus fallbacks into the string form
    /// the router's `watchedAddresses` index is keyed on, used when an
    /// open-ended rescan transitions into a live subscription.
    fn encoded_addresses(&self, decoder: &dyn AddressDecoder) -> Vec<String> {
        let mut out = Vec::with_capacity(self.pub_key_hashes.len() + self.script_hashes.len() + self.fallbacks.len());
        out.extend(
            self.pub_key_hashes
                .iter()
                .map(|d| decoder.encode(&AddressKind::P2pkh(*d))),
        );
        out.extend(
            self.script_hashes
                .iter()
                .map(|d| decoder.encode(&AddressKind::P2sh(*d))),
        );
        out.extend(self.fallbacks.iter().cloned());
        out
    }
}

/// Entry point invoked by the async worker for one `rescan` command
/// (spec.md §4.E). A client disconnect mid-rescan resolves to a quiet
/// success, matching spec.md §8 scenario 6.
pub async fn run(
    ctx: &DispatchContext,
    client: &Arc<Client>,
    params: &Value,
) -> Result<Value, RpcServerError> {
    let params: RescanParams =
        serde_json::from_value(params.clone()).map_err(|e| RpcServerError::InvalidParams(e.to_string()))?;

    let mut keys = RescanKeys::default();
    for addr in &params.addresses {
        keys.classify(ctx.address_decoder.as_ref(), addr);
    }
    for op in decode_outpoints(&params.outpoints)? {
        keys.unspent.insert(op);
    }

    let begin_hash = Hash::from_hex(&params.beginblock)
        .map_err(|_| RpcServerError::InvalidAddressOrKey(params.beginblock.clone()))?;
    let end_hash = params
        .endblock
        .as_ref()
        .map(|s| Hash::from_hex(s).map_err(|_| RpcServerError::InvalidAddressOrKey(s.clone())))
        .transpose()?;

    match run_inner(ctx, client, &mut keys, begin_hash, end_hash).await {
        Ok(()) => Ok(Value::Null),
        Err(RescanError::ClientQuit(_)) => Ok(Value::Null),
        Err(e) => Err(e.into()),
    }
}

async fn run_inner(
    ctx: &DispatchContext,
    client: &Arc<Client>,
    keys: &mut RescanKeys,
    begin_hash: Hash,
    end_hash: Option<Hash>,
) -> Result<(), RescanError> {
    let store = ctx.chain_store.as_ref();

    let mut min_block = store.height_by_hash(&begin_hash).await.map_err(store_err)?;
    let finite_end = end_hash.is_some();
    let mut max_block = match end_hash {
        Some(h) => store.height_by_hash(&h).await.map_err(store_err)? + 1,
        None => i64::MAX,
    };

    let mut last_block_hash: Option<Hash> = None;
    let mut last_block_details: Option<BlockDetails> = None;
    let mut last_progress = Instant::now();
    let mut quit_rx = client.subscribe_quit();

    'outer: while min_block < max_block {
        let mut hashes = store.hash_range(min_block, max_block).await.map_err(store_err)?;

        if hashes.is_empty() {
            if finite_end {
                break;
            }

            let caught_up = {
                let _guard = store.pause().await;
                let (tip_hash, _tip_height) = store.best_block().await.map_err(store_err)?;
                last_block_hash == Some(tip_hash)
            };

            if caught_up {
                ctx.router
                    .register_spent(client.id(), keys.unspent.iter().copied().collect());
                ctx.router
                    .register_addr(client.id(), keys.encoded_addresses(ctx.address_decoder.as_ref()));
                break;
            }

            continue;
        }

        let mut index = 0usize;
        while index < hashes.len() {
            if quit_rx.has_changed().is_err() {
                return Err(ClientQuit.into());
            }

            let hash = hashes[index];
            let block = match store.block_by_hash(&hash).await {
                Ok(b) => b,
                Err(ChainStoreError::BlockShaMissing) => {
                    if finite_end {
                        return Err(RescanError::Reorganize);
                    }

                    match reorg_recover(store, min_block + index as i64, max_block, last_block_hash).await? {
                        Some(new_hashes) => {
                            // The recovered window starts at the height of the
                            // missing hash, so `hashes[0]` is now at
                            // `min_block`: bump it by `index` to keep the
                            // "hashes[i] is at height min_block + i" invariant
                            // true before restarting from the front.
                            min_block += index as i64;
                            hashes = new_hashes;
                            index = 0;
                            continue;
                        }
                        None => {
                            min_block += index as i64;
                            continue 'outer;
                        }
                    }
                }
                Err(e) => return Err(RescanError::Database(e.to_string())),
            };

            if index == 0 {
                if let Some(expected) = last_block_hash {
                    if block.prev_hash != expected {
                        return Err(RescanError::Reorganize);
                    }
                }
            }

            scan_block(ctx, client, keys, &block).await?;

            last_block_hash = Some(block.details.hash);
            last_block_details = Some(block.details.clone());
            index += 1;

            if last_progress.elapsed() >= PROGRESS_INTERVAL {
                if let Some(details) = &last_block_details {
                    let bytes = rescan_progress(details);
                    client.queue_notification(bytes).await.map_err(|_| ClientQuit)?;
                }
                last_progress = Instant::now();
            }
        }

        min_block += index as i64;
    }

    if let Some(details) = &last_block_details {
        let bytes = rescan_finished(details);
        client.queue_notification(bytes).await.map_err(|_| ClientQuit)?;
    }

    Ok(())
}

/// Block scan (spec.md §4.E): matches inputs against `unspent`, outputs
/// against the address key buckets, queuing at most one `redeemingtx` and
/// one `recvtx` per transaction.
async fn scan_block(
    ctx: &DispatchContext,
    client: &Arc<Client>,
    keys: &mut RescanKeys,
    block: &Block,
) -> Result<(), RescanError> {
    for tx in &block.transactions {
        let mut redeemed = false;
        for input in &tx.inputs {
            if keys.unspent.remove(&input.previous_outpoint) && !redeemed {
                let bytes = redeeming_tx(tx, Some(&block.details));
                client.queue_notification(bytes).await.map_err(|_| ClientQuit)?;
                redeemed = true;
            }
        }

        let mut received = false;
        for (idx, output) in tx.outputs.iter().enumerate() {
            if keys.matches_script(ctx.address_decoder.as_ref(), &output.pk_script) {
                keys.unspent.insert(OutPoint::new(tx.hash, idx as u32));
                if !received {
                    let bytes = recv_tx(tx, Some(&block.details));
                    client.queue_notification(bytes).await.map_err(|_| ClientQuit)?;
                    received = true;
                }
            }
        }
    }

    Ok(())
}

/// Refetches the hash window starting at `from_height` and verifies the
/// recovered window links back to the last block already scanned
/// (spec.md §4.E "Reorg recovery"). `None` means the window is still empty;
/// the caller falls back to the open-ended tip-transition path.
async fn reorg_recover(
    store: &dyn ChainStore,
    from_height: i64,
    max_block: i64,
    last_block_hash: Option<Hash>,
) -> Result<Option<Vec<Hash>>, RescanError> {
    let hashes = store.hash_range(from_height, max_block).await.map_err(store_err)?;
    if hashes.is_empty() {
        return Ok(None);
    }

    let first = store.block_by_hash(&hashes[0]).await.map_err(store_err)?;
    if let Some(expected) = last_block_hash {
        if first.prev_hash != expected {
            return Err(RescanError::Reorganize);
        }
    }

    Ok(Some(hashes))
}

fn store_err(e: ChainStoreError) -> RescanError {
    RescanError::Database(e.to_string())
}
