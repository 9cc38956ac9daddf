//! Row-store host scanned by `heap_fusion`.
//!
//! `heap_store` keeps relations as blocks of MVCC row versions in memory and
//! exposes them through the synchronous [`HeapAccess`] boundary: snapshots,
//! catalog lookups, parallel block-partitioned scans with host-evaluated scan
//! keys, and an error state that callers must flush after intercepting a
//! failure.

pub mod access;
pub mod error;
pub mod mvcc;
pub mod seed;
pub mod store;
pub mod tuple;
pub mod types;

pub use access::{
    HeapAccess, ParallelScanDesc, QualifiedName, RelationEntry, RelationId, RelationKind,
    ScanKey, ScanStrategy, TupleCursor,
};
pub use error::{ErrorState, HostError};
pub use mvcc::{CommitLog, Snapshot, Xid};
pub use seed::SeedFile;
pub use store::{HeapStore, HeapStoreConfig, DEFAULT_SCHEMA};
pub use tuple::{AttrSlot, Attribute, HeapTuple, OutputSlot, TupleDesc};
pub use types::{Datum, Numeric, TypeOid};
