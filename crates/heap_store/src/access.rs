//! Access-method boundary consumed by scan bridges.
//!
//! Everything a bridge needs from the host goes through [`HeapAccess`]:
//! snapshot acquisition, catalog lookups, parallel scan coordination and
//! tuple cursors. All calls are synchronous and may block.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::HostError;
use crate::mvcc::Snapshot;
use crate::tuple::{HeapTuple, TupleDesc};
use crate::types::Datum;

/// Catalog identifier of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelationId(pub u32);

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Schema-qualified relation name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QualifiedName {
    pub schema: String,
    pub name: String,
}

impl QualifiedName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Kind of catalog entry a name resolves to.
#[derive(Debug, Clone, PartialEq)]
pub enum RelationKind {
    Table,
    /// View with its defining query text.
    View { definition: String },
}

/// Catalog entry returned by [`HeapAccess::lookup_relation`].
#[derive(Debug, Clone, PartialEq)]
pub struct RelationEntry {
    pub id: RelationId,
    pub name: QualifiedName,
    pub kind: RelationKind,
}

/// Comparison performed by one scan key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStrategy {
    Less,
    LessEqual,
    Equal,
    GreaterEqual,
    Greater,
    IsNull,
    IsNotNull,
}

impl ScanStrategy {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Less => "<",
            Self::LessEqual => "<=",
            Self::Equal => "=",
            Self::GreaterEqual => ">=",
            Self::Greater => ">",
            Self::IsNull => "IS NULL",
            Self::IsNotNull => "IS NOT NULL",
        }
    }
}

/// Qualification evaluated by the host while scanning.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanKey {
    pub attnum: usize,
    pub strategy: ScanStrategy,
    /// Comparison argument; unused for the null tests.
    pub argument: Option<Datum>,
}

impl ScanKey {
    pub fn compare(attnum: usize, strategy: ScanStrategy, argument: Datum) -> Self {
        Self {
            attnum,
            strategy,
            argument: Some(argument),
        }
    }

    pub fn null_test(attnum: usize, is_null: bool) -> Self {
        Self {
            attnum,
            strategy: if is_null {
                ScanStrategy::IsNull
            } else {
                ScanStrategy::IsNotNull
            },
            argument: None,
        }
    }
}

impl fmt::Display for ScanKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.argument {
            Some(arg) => write!(f, "${} {} {}", self.attnum, self.strategy.as_sql(), arg),
            None => write!(f, "${} {}", self.attnum, self.strategy.as_sql()),
        }
    }
}

/// Shared state of one parallel heap scan. Workers attached to the same
/// descriptor receive disjoint block numbers.
#[derive(Debug)]
pub struct ParallelScanDesc {
    pub relation: RelationId,
    nblocks: usize,
    next_block: AtomicUsize,
}

impl ParallelScanDesc {
    pub fn new(relation: RelationId, nblocks: usize) -> Self {
        Self {
            relation,
            nblocks,
            next_block: AtomicUsize::new(0),
        }
    }

    /// Number of blocks the scan covers, fixed at scan start.
    pub fn nblocks(&self) -> usize {
        self.nblocks
    }

    /// Claims the next unscanned block, or `None` once all were handed out.
    pub fn next_block(&self) -> Option<usize> {
        let block = self.next_block.fetch_add(1, Ordering::AcqRel);
        (block < self.nblocks).then_some(block)
    }
}

/// Per-worker cursor over a heap scan.
pub trait TupleCursor: Send {
    /// Returns the next visible tuple satisfying the scan keys.
    fn next_tuple(&mut self) -> Result<Option<HeapTuple>, HostError>;
}

/// Host services required by the scan bridge.
pub trait HeapAccess: Send + Sync + fmt::Debug + 'static {
    fn acquire_snapshot(&self) -> Result<Snapshot, HostError>;

    /// Resolves a relation name. Unknown names are `Ok(None)`.
    fn lookup_relation(&self, name: &QualifiedName) -> Result<Option<RelationEntry>, HostError>;

    /// Lists the relations (tables and views) of one schema.
    fn list_relations(&self, schema: &str) -> Result<Vec<RelationEntry>, HostError>;

    /// Lists the schemas that exist in the catalog.
    fn list_schemas(&self) -> Result<Vec<String>, HostError>;

    fn relation_descriptor(&self, relation: RelationId) -> Result<TupleDesc, HostError>;

    /// Creates the shared state of a parallel scan over `relation`.
    fn begin_parallel_scan(&self, relation: RelationId) -> Result<ParallelScanDesc, HostError>;

    /// Opens one worker's cursor attached to a parallel scan.
    fn open_scan(
        &self,
        snapshot: &Snapshot,
        parallel: Arc<ParallelScanDesc>,
        keys: &[ScanKey],
    ) -> Result<Box<dyn TupleCursor>, HostError>;

    /// Clears error data recorded by a failed call on the calling thread.
    fn flush_error_state(&self);

    /// Number of error records the calling thread raised but did not flush.
    fn error_state_depth(&self) -> usize;
}
