use criterion::{criterion_group, criterion_main, Criterion};
use nodewsrpc::address::{AddressDecoder, TestAddressDecoder};
use nodewsrpc::jsonrpc::{block_connected, recv_tx};
use nodewsrpc::types::{Block, BlockDetails, Hash, Transaction, TxOut};

fn sample_block(num_transactions: usize) -> Block {
    let mut transactions = Vec::with_capacity(num_transactions);
    for i in 0..num_transactions {
        let mut hash = [0u8; 32];
        hash[0] = i as u8;
        let mut script = vec![0x00];
        script.extend_from_slice(&[i as u8; 20]);
        transactions.push(Transaction {
            hash: Hash(hash),
            hex: "deadbeef".to_string(),
            inputs: vec![],
            outputs: vec![TxOut {
                value: 5000,
                pk_script: script,
            }],
        });
    }

    Block {
        details: BlockDetails {
            hash: Hash([9u8; 32]),
            height: 100,
            timestamp: 1_700_000_000,
        },
        prev_hash: Hash([0u8; 32]),
        transactions,
    }
}

/// Marshalling a `blockconnected` notification: built once per router event
/// regardless of subscriber count (spec.md §4.B), so its cost is paid on the
/// router's single-threaded hot path.
fn bench_block_connected_marshal(c: &mut Criterion) {
    let block = sample_block(0);
    c.bench_function("block_connected_marshal", |b| {
        b.iter(|| block_connected(&block))
    });
}

/// Marshalling a `recvtx` notification, the per-transaction-scan builder
/// reused across every matched output for a given transaction.
fn bench_recv_tx_marshal(c: &mut Criterion) {
    let block = sample_block(1);
    let tx = &block.transactions[0];
    c.bench_function("recv_tx_marshal", |b| {
        b.iter(|| recv_tx(tx, Some(&block.details)))
    });
}

/// Address extraction, the router's per-output cost during the
/// transaction-scan procedure's output loop (spec.md §4.B).
fn bench_address_extraction(c: &mut Criterion) {
    let decoder = TestAddressDecoder;
    let mut script = vec![0x00];
    script.extend_from_slice(&[7u8; 20]);

    c.bench_function("extract_addresses_p2pkh", |b| {
        b.iter(|| decoder.extract_addresses(&script))
    });
}

/// A block with many transactions, approximating the router's
/// `on_block_connected` per-transaction fan-out cost when scanning for
/// watched outpoints/addresses.
fn bench_block_scan_marshal(c: &mut Criterion) {
    let block = sample_block(200);
    c.bench_function("block_200_tx_recv_tx_marshal", |b| {
        b.iter(|| {
            for tx in &block.transactions {
                recv_tx(tx, Some(&block.details));
            }
        })
    });
}

criterion_group!(
    benches,
    bench_block_connected_marshal,
    bench_recv_tx_marshal,
    bench_address_extraction,
    bench_block_scan_marshal,
);
criterion_main!(benches);
