//! Filesystem primitives shared by the local stores.

pub mod atomic;
pub mod jsonl;
pub mod lock;

pub use atomic::{sweep_orphans, write_atomic, AtomicFile};
pub use lock::StoreLock;
