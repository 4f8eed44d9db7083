//! Core value types shared across the router, rescan engine, and dispatch.
use {
    serde::{Deserialize, Serialize},
    std::fmt,
};

/// Number of bytes in a block or transaction hash.
pub const HASH_SIZE: usize = 32;

/// A 32-byte block or transaction hash, displayed and parsed as big-endian hex
/// the way chain explorers print it (matching the wire's `hexHash` params).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash(pub [u8; HASH_SIZE]);

impl Hash {
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut buf = [0u8; HASH_SIZE];
        hex::decode_to_slice(s, &mut buf)?;
        Ok(Hash(buf))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl Serialize for Hash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// A reference to a specific transaction output: `(tx-hash, output-index)`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct OutPoint {
    pub hash: Hash,
    pub index: u32,
}

impl OutPoint {
    pub fn new(hash: Hash, index: u32) -> Self {
        OutPoint { hash, index }
    }
}

/// Minimal block header data the router and rescan engine need to build
/// notifications. The chain store is the authority on full block contents;
/// this is the subset carried in-band on notification payloads.
#[derive(Clone, Debug)]
pub struct BlockDetails {
    pub hash: Hash,
    pub height: i64,
    pub timestamp: i64,
}

/// A decoded transaction, kept intentionally small: this crate scans inputs
/// and outputs for watched outpoints/addresses but never interprets script
/// semantics beyond what `AddressDecoder` reports.
#[derive(Clone, Debug)]
pub struct Transaction {
    pub hash: Hash,
    pub hex: String,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
}

#[derive(Clone, Debug)]
pub struct TxIn {
    pub previous_outpoint: OutPoint,
}

#[derive(Clone, Debug)]
pub struct TxOut {
    pub value: u64,
    pub pk_script: Vec<u8>,
}

/// A block as seen by the router: hash/height/timestamp plus its
/// transactions, sufficient to run the transaction-scan procedure.
#[derive(Clone, Debug)]
pub struct Block {
    pub details: BlockDetails,
    pub prev_hash: Hash,
    pub transactions: Vec<Transaction>,
}
