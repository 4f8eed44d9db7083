//! Narrow contract for the underlying block chain store.
//!
//! Out of scope per spec.md §1: this crate never implements storage, only
//! the seam it reads through. Modeled on the teacher's `connection::RPCConn`
//! trait, which abstracts the transport the same way this trait abstracts
//! the chain store.
use {
    crate::types::{Block, Hash},
    async_trait::async_trait,
    thiserror::Error,
};

#[derive(Debug, Error, Clone)]
pub enum ChainStoreError {
    #[error("block sha missing")]
    BlockShaMissing,

    #[error("database error: {0}")]
    Database(String),
}

/// A brief exclusive window obtained via [`ChainStore::pause`]. While held,
/// the caller may assume the chain tip does not advance.
pub trait PauseGuard: Send {}

#[async_trait]
pub trait ChainStore: Send + Sync {
    /// Returns the full block identified by `hash`.
    async fn block_by_hash(&self, hash: &Hash) -> Result<Block, ChainStoreError>;

    /// Returns the hash of the best-chain block at `height`, if any.
    async fn block_hash_by_height(&self, height: i64) -> Result<Option<Hash>, ChainStoreError>;

    /// Returns the height of the best-chain block identified by `hash`.
    async fn height_by_hash(&self, hash: &Hash) -> Result<i64, ChainStoreError>;

    /// Returns up to `max - min` consecutive best-chain block hashes in
    /// `[min, max)`, possibly truncated short of the requested window.
    async fn hash_range(&self, min: i64, max: i64) -> Result<Vec<Hash>, ChainStoreError>;

    /// Returns the current best block (hash, height).
    async fn best_block(&self) -> Result<(Hash, i64), ChainStoreError>;

    /// Obtains a brief exclusive window during which chain mutations (block
    /// connects/disconnects) are blocked, so a tip comparison taken while
    /// the guard is held is known not to race a concurrent reorg.
    async fn pause(&self) -> Box<dyn PauseGuard>;
}
