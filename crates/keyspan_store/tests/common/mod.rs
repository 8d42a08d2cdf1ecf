//! Shared helpers for store integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use keyspan_core::ByteId;
use keyspan_store::{MemoryBackend, StoreConfig, StoreOperations};

/// Unique in-memory address per test so parallel tests never share tables.
pub fn memory_address(label: &str) -> String {
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    format!("memory://{label}-{}", NEXT.fetch_add(1, Ordering::Relaxed))
}

/// Fresh backend plus operations handle over it.
pub fn memory_store(label: &str, config: StoreConfig) -> (MemoryBackend, StoreOperations) {
    let address = memory_address(label);
    let backend = MemoryBackend::new(address.clone());
    let config = StoreConfig {
        address,
        ..config
    };
    let ops = StoreOperations::new(Arc::new(backend.clone()), config);
    (backend, ops)
}

pub fn families(names: &[&str]) -> Vec<ByteId> {
    names.iter().map(|name| ByteId::from(*name)).collect()
}
