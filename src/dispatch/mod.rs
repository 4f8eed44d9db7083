//! Command dispatch — Component D.
pub mod methods;

use {
    crate::address::AddressDecoder,
    crate::chainstore::ChainStore,
    crate::client::{Client, PendingCommand},
    crate::error::RpcServerError,
    crate::jsonrpc::{Request, Response},
    crate::router::RouterHandle,
    crate::types::{Hash, OutPoint},
    async_trait::async_trait,
    serde::Deserialize,
    serde_json::Value,
    std::sync::Arc,
};

/// External collaborator: the already-existing dispatcher for "standard"
/// (non-websocket) JSON-RPC commands (spec.md §1). Mirrors the teacher's
/// `RPCConn` trait shape — a narrow seam a caller supplies a concrete
/// implementation for.
#[async_trait]
pub trait StandardDispatcher: Send + Sync {
    /// Executes `method` with `params`, returning the JSON-RPC result value
    /// or an error.
    async fn dispatch(&self, method: &str, params: &Value) -> Result<Value, RpcServerError>;

    /// One-line usage strings for every method this dispatcher recognizes,
    /// merged into the websocket subsystem's `help` index.
    fn usage(&self) -> Vec<(String, String)>;

    /// Full help text for a single method, if recognized.
    fn help(&self, method: &str) -> Option<String>;
}

/// Shared, cloneable context every connection's dispatch calls run against.
#[derive(Clone)]
pub struct DispatchContext {
    pub router: RouterHandle,
    pub chain_store: Arc<dyn ChainStore>,
    pub address_decoder: Arc<dyn AddressDecoder>,
    pub standard: Arc<dyn StandardDispatcher>,
}

/// What the reader task should do with a parsed frame.
pub enum Outcome {
    /// Request had no `id`: a JSON-RPC notification, no reply sent.
    NoReply,
    /// A complete reply, ready to hand to `Client::send_message`.
    Reply(Vec<u8>),
    /// A long-running command to hand to the async worker.
    Async(PendingCommand),
}

/// Parses and routes one inbound frame per spec.md §4.D. Authentication is
/// handled by the caller (the reader task) before this is ever invoked,
/// since it follows a different, pre-authentication protocol.
pub async fn handle(ctx: &DispatchContext, client: &Arc<Client>, raw: &[u8]) -> Outcome {
    let request: Request = match serde_json::from_slice(raw) {
        Ok(r) => r,
        Err(_) => {
            return Outcome::Reply(Response::failure(None, &RpcServerError::Parse).to_bytes());
        }
    };

    let id = match request.id.clone() {
        Some(id) => id,
        None => return Outcome::NoReply,
    };

    if !client.is_admin() && !methods::limited_user_may_call(&request.method) {
        let err = RpcServerError::InvalidParams(
            "limited user not authorized for this method".to_string(),
        );
        return Outcome::Reply(Response::failure(Some(id), &err).to_bytes());
    }

    if methods::is_async_method(&request.method) {
        return Outcome::Async(PendingCommand {
            id: Some(id),
            method: request.method,
            params: request.params,
        });
    }

    let result = dispatch_sync(ctx, client, &request.method, &request.params).await;
    Outcome::Reply(match result {
        Ok(value) => Response::success(Some(id), value).to_bytes(),
        Err(e) => Response::failure(Some(id), &e).to_bytes(),
    })
}

/// Runs a long-running command on the async worker and sends its reply
/// directly, since by the time it completes the reader has moved on. Passed
/// to [`Client::async_worker_sender`] as the worker's runner.
pub async fn run_async(ctx: DispatchContext, client: Arc<Client>, cmd: PendingCommand) {
    let result = match cmd.method.as_str() {
        methods::RESCAN => crate::rescan::run(&ctx, &client, &cmd.params).await,
        other => Err(RpcServerError::InvalidParams(format!(
            "unknown async method {}",
            other
        ))),
    };

    let bytes = match result {
        Ok(value) => Response::success(cmd.id, value).to_bytes(),
        Err(e) => Response::failure(cmd.id, &e).to_bytes(),
    };

    let _ = client.send_message(bytes).await;
}

async fn dispatch_sync(
    ctx: &DispatchContext,
    client: &Arc<Client>,
    method: &str,
    params: &Value,
) -> Result<Value, RpcServerError> {
    match method {
        methods::HELP => help(ctx, params),
        methods::SESSION => Ok(serde_json::json!({ "sessionID": client.session_id() })),
        methods::NOTIFY_BLOCKS => {
            ctx.router.register_blocks(client.id());
            Ok(Value::Null)
        }
        methods::STOP_NOTIFY_BLOCKS => {
            ctx.router.unregister_blocks(client.id());
            Ok(Value::Null)
        }
        methods::NOTIFY_NEW_TRANSACTIONS => {
            #[derive(Deserialize, Default)]
            struct P {
                #[serde(default)]
                verbose: bool,
            }
            let p: P = parse_params(params)?;
            client.set_verbose_tx_updates(p.verbose);
            ctx.router.register_mempool_txs(client.id());
            Ok(Value::Null)
        }
        methods::STOP_NOTIFY_NEW_TRANSACTIONS => {
            ctx.router.unregister_mempool_txs(client.id());
            Ok(Value::Null)
        }
        methods::NOTIFY_RECEIVED => {
            let addresses: Vec<String> = parse_params(params)?;
            let encoded = decode_addresses(ctx, &addresses)?;
            ctx.router.register_addr(client.id(), encoded);
            Ok(Value::Null)
        }
        methods::STOP_NOTIFY_RECEIVED => {
            let addresses: Vec<String> = parse_params(params)?;
            for addr in decode_addresses(ctx, &addresses)? {
                ctx.router.unregister_addr(client.id(), addr);
            }
            Ok(Value::Null)
        }
        methods::NOTIFY_SPENT => {
            let wire: Vec<WireOutpoint> = parse_params(params)?;
            let outpoints = decode_outpoints(&wire)?;
            ctx.router.register_spent(client.id(), outpoints);
            Ok(Value::Null)
        }
        methods::STOP_NOTIFY_SPENT => {
            let wire: Vec<WireOutpoint> = parse_params(params)?;
            for op in decode_outpoints(&wire)? {
                ctx.router.unregister_spent(client.id(), op);
            }
            Ok(Value::Null)
        }
        other if methods::is_websocket_method(other) => Err(RpcServerError::InvalidParams(
            format!("{} must be dispatched asynchronously", other),
        )),
        other => ctx.standard.dispatch(other, params).await,
    }
}

fn help(ctx: &DispatchContext, params: &Value) -> Result<Value, RpcServerError> {
    #[derive(Deserialize, Default)]
    struct P {
        command: Option<String>,
    }
    let p: P = parse_params(params).unwrap_or_default();

    match p.command {
        None => {
            let mut lines: Vec<String> = WEBSOCKET_USAGE
                .iter()
                .map(|(m, u)| format!("{} {}", m, u))
                .collect();
            for (m, u) in ctx.standard.usage() {
                lines.push(format!("{} {}", m, u));
            }
            lines.sort();
            Ok(Value::String(lines.join("\n")))
        }
        Some(command) => {
            if let Some((_, usage)) = WEBSOCKET_USAGE.iter().find(|(m, _)| *m == command) {
                return Ok(Value::String((*usage).to_string()));
            }
            match ctx.standard.help(&command) {
                Some(text) => Ok(Value::String(text)),
                None => Err(RpcServerError::InvalidParams(format!(
                    "unknown command: {}",
                    command
                ))),
            }
        }
    }
}

const WEBSOCKET_USAGE: &[(&str, &str)] = &[
    (methods::HELP, "(\"command\") - list commands or show help for one"),
    (methods::SESSION, "- returns the session id for this connection"),
    (methods::NOTIFY_BLOCKS, "- subscribe to block connected/disconnected notifications"),
    (methods::STOP_NOTIFY_BLOCKS, "- unsubscribe from block notifications"),
    (
        methods::NOTIFY_NEW_TRANSACTIONS,
        "(\"verbose\") - subscribe to mempool transaction notifications",
    ),
    (
        methods::STOP_NOTIFY_NEW_TRANSACTIONS,
        "- unsubscribe from mempool transaction notifications",
    ),
    (
        methods::NOTIFY_RECEIVED,
        "(\"addresses\") - subscribe to notifications paying the given addresses",
    ),
    (
        methods::STOP_NOTIFY_RECEIVED,
        "(\"addresses\") - unsubscribe from address notifications",
    ),
    (
        methods::NOTIFY_SPENT,
        "(\"outpoints\") - subscribe to notifications spending the given outpoints",
    ),
    (
        methods::STOP_NOTIFY_SPENT,
        "(\"outpoints\") - unsubscribe from outpoint notifications",
    ),
    (
        methods::RESCAN,
        "(\"beginblock\", \"addresses\", \"outpoints\", \"endblock\") - rescan the chain",
    ),
];

#[derive(Deserialize)]
pub struct WireOutpoint {
    pub hash: String,
    pub index: u32,
}

pub(crate) fn decode_outpoints(wire: &[WireOutpoint]) -> Result<Vec<OutPoint>, RpcServerError> {
    wire.iter()
        .map(|w| {
            Hash::from_hex(&w.hash)
                .map(|hash| OutPoint::new(hash, w.index))
                .map_err(|_| RpcServerError::InvalidAddressOrKey(w.hash.clone()))
        })
        .collect()
}

fn decode_addresses(ctx: &DispatchContext, addresses: &[String]) -> Result<Vec<String>, RpcServerError> {
    addresses
        .iter()
        .map(|a| {
            ctx.address_decoder
                .decode(a)
                .map(|kind| ctx.address_decoder.encode(&kind))
                .ok_or_else(|| RpcServerError::InvalidAddressOrKey(a.clone()))
        })
        .collect()
}

fn parse_params<T: for<'de> Deserialize<'de>>(params: &Value) -> Result<T, RpcServerError> {
    serde_json::from_value(params.clone()).map_err(|e| RpcServerError::InvalidParams(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::TestAddressDecoder;
    use crate::chainstore::{ChainStore, ChainStoreError, PauseGuard};
    use crate::router;
    use crate::types::Block;

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
    async fn limited_user_notifyblocks_allowed() {
        let ctx = test_ctx();
        let (client, _chans) = Client::new("127.0.0.1:1".into(), 1, 50, ctx.router.clone());
        let raw = br#"{"id":1,"method":"notifyblocks","params":[]}"#;
        match handle(&ctx, &client, raw).await {
            Outcome::Reply(bytes) => {
                let v: Value = serde_json::from_slice(&bytes).unwrap();
                assert!(v["error"].is_null());
            }
            _ => panic!("expected reply"),
        }
    }

    #[tokio::test]
    async fn limited_user_disallowed_method_errors() {
        let ctx = test_ctx();
        let (client, _chans) = Client::new("127.0.0.1:1".into(), 1, 50, ctx.router.clone());
        let raw = br#"{"id":1,"method":"getblockcount","params":[]}"#;
        match handle(&ctx, &client, raw).await {
            Outcome::Reply(bytes) => {
                let v: Value = serde_json::from_slice(&bytes).unwrap();
                assert!(!v["error"].is_null());
                assert_eq!(v["error"]["code"], RpcServerError::InvalidParams(String::new()).code());
            }
            _ => panic!("expected reply"),
        }
    }

    #[tokio::test]
    async fn notification_request_gets_no_reply() {
        let ctx = test_ctx();
        let (client, _chans) = Client::new("127.0.0.1:1".into(), 1, 50, ctx.router.clone());
        let raw = br#"{"method":"notifyblocks","params":[]}"#;
        assert!(matches!(handle(&ctx, &client, raw).await, Outcome::NoReply));
    }

    #[tokio::test]
    async fn rescan_is_classified_as_async() {
        let ctx = test_ctx();
        let (client, _chans) = Client::new("127.0.0.1:1".into(), 1, 50, ctx.router.clone());
        client.set_authenticated(true);
        let raw = br#"{"id":1,"method":"rescan","params":{"beginblock":"00","addresses":[],"outpoints":[]}}"#;
        assert!(matches!(handle(&ctx, &client, raw).await, Outcome::Async(_)));
    }
}
