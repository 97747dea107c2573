//! Storage and locking backends for the ports in `crate::domain::ports`.

pub mod in_memory;
pub mod lock;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
