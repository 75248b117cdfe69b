// Copyright (c) 2024 Botho Foundation

//! Content-addressed blob storage.

use bth_consensus_cpos_types::Hash;
use std::{collections::HashMap, sync::RwLock};

/// A store keyed by the SHA-256 digest of each blob.
pub trait BlobStore: Send + Sync {
    /// The blob with digest `hash`, or `None` if it is not held locally.
    fn get(&self, hash: &Hash) -> Option<Vec<u8>>;

    /// Store `bytes` and return their digest.
    fn put(&self, bytes: Vec<u8>) -> Hash;
}

/// Thread-safe in-memory [`BlobStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: RwLock<HashMap<Hash, Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blobs held.
    pub fn len(&self) -> usize {
        self.blobs.read().unwrap().len()
    }

    /// True if no blob is held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop the blob with digest `hash`, returning whether it was present.
    pub fn remove(&self, hash: &Hash) -> bool {
        self.blobs.write().unwrap().remove(hash).is_some()
    }
}

impl BlobStore for MemoryStore {
    fn get(&self, hash: &Hash) -> Option<Vec<u8>> {
        self.blobs.read().unwrap().get(hash).cloned()
    }

    fn put(&self, bytes: Vec<u8>) -> Hash {
        let hash = Hash::digest(&bytes);
        self.blobs.write().unwrap().insert(hash, bytes);
        hash
    }
}
