//! Queue relay — Component A.
//!
//! Decouples publishers (block manager, mempool) from the single-consumer
//! notification router. Accepts items on an unbounded `in` side and emits
//! them in FIFO order on the router's bounded `out` side, without ever
//! blocking the publisher. Grounded on the teacher's middleman-task pattern
//! in `rpcclient::client::ws_handler`, where small handshake channels are
//! wired between a spawned task and its consumers instead of sharing state.
use {std::collections::VecDeque, tokio::sync::mpsc};

/// Spawns the relay task and returns the publisher-facing sender.
///
/// `out` is the router's inbound channel. Publishers send on the returned
/// sender, which never blocks regardless of router latency: items queue
/// internally until the router is ready to receive.
pub fn spawn<T: Send + 'static>(out: mpsc::Sender<T>) -> mpsc::UnboundedSender<T> {
    let (tx, mut rx) = mpsc::unbounded_channel::<T>();

    tokio::spawn(async move {
        let mut backlog: VecDeque<T> = VecDeque::new();

        loop {
            if let Some(item) = backlog.pop_front() {
                // Fast path: forward directly once the consumer is ready,
                // racing against further input so publishers never stall
                // behind a slow router even while we drain backlog.
                tokio::select! {
                    res = out.send(item) => {
                        if res.is_err() {
                            return;
                        }
                    }
                }
                continue;
            }

            match rx.recv().await {
                Some(item) => {
                    if out.send(item).await.is_err() {
                        return;
                    }
                }
                None => return,
            }
        }
    });

    tx
}
