//! In-memory heap storage implementing [`HeapAccess`].
//!
//! Relations are stored as fixed-capacity blocks of row versions. Writes
//! append new versions stamped with the writing transaction; deletes stamp
//! `xmax`. Readers never mutate blocks, they copy the tuples of one block out
//! under a read lock and evaluate visibility and scan keys on the copy.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::access::{
    HeapAccess, ParallelScanDesc, QualifiedName, RelationEntry, RelationId, RelationKind,
    ScanKey, ScanStrategy, TupleCursor,
};
use crate::error::{
    ErrorState, HostError, SQLSTATE_DATATYPE_MISMATCH, SQLSTATE_UNDEFINED_TABLE,
};
use crate::mvcc::{CommitLog, Snapshot, Xid};
use crate::tuple::{Attribute, HeapTuple, TupleDesc};
use crate::types::{Datum, Numeric, TypeOid};

/// Default number of row versions per block.
pub const DEFAULT_BLOCK_CAPACITY: usize = 64;
/// Schema created with every store.
pub const DEFAULT_SCHEMA: &str = "public";

/// Tunables of one store instance.
#[derive(Debug, Clone)]
pub struct HeapStoreConfig {
    pub block_capacity: usize,
}

impl Default for HeapStoreConfig {
    fn default() -> Self {
        Self {
            block_capacity: DEFAULT_BLOCK_CAPACITY,
        }
    }
}

#[derive(Debug)]
struct HeapRelation {
    desc: TupleDesc,
    blocks: Vec<Vec<HeapTuple>>,
}

#[derive(Debug, Default)]
struct Catalog {
    schemas: BTreeSet<String>,
    by_name: BTreeMap<QualifiedName, RelationEntry>,
    heaps: HashMap<RelationId, Arc<RwLock<HeapRelation>>>,
}

#[derive(Debug)]
struct StoreInner {
    config: HeapStoreConfig,
    clog: CommitLog,
    catalog: RwLock<Catalog>,
    errors: ErrorState,
    interrupt_pending: AtomicBool,
    next_relation_id: AtomicU32,
}

/// Cheaply cloneable handle to one in-memory heap store.
#[derive(Debug, Clone)]
pub struct HeapStore {
    inner: Arc<StoreInner>,
}

impl Default for HeapStore {
    fn default() -> Self {
        Self::new(HeapStoreConfig::default())
    }
}

impl HeapStore {
    pub fn new(config: HeapStoreConfig) -> Self {
        let mut catalog = Catalog::default();
        catalog.schemas.insert(DEFAULT_SCHEMA.to_string());
        Self {
            inner: Arc::new(StoreInner {
                config: HeapStoreConfig {
                    block_capacity: config.block_capacity.max(1),
                },
                clog: CommitLog::default(),
                catalog: RwLock::new(catalog),
                errors: ErrorState::default(),
                interrupt_pending: AtomicBool::new(false),
                next_relation_id: AtomicU32::new(16_384),
            }),
        }
    }

    pub fn create_schema(&self, schema: &str) {
        let mut catalog = self.inner.write_catalog();
        catalog.schemas.insert(schema.to_string());
    }

    /// Creates an empty table.
    pub fn create_table(
        &self,
        name: QualifiedName,
        attrs: Vec<Attribute>,
    ) -> Result<RelationId, HostError> {
        let mut catalog = self.inner.write_catalog();
        self.check_new_name(&catalog, &name)?;
        let id = RelationId(self.inner.next_relation_id.fetch_add(1, Ordering::Relaxed));
        debug!(relation = %name, relation_id = id.0, columns = attrs.len(), "created heap table");
        catalog.by_name.insert(
            name.clone(),
            RelationEntry {
                id,
                name,
                kind: RelationKind::Table,
            },
        );
        catalog.heaps.insert(
            id,
            Arc::new(RwLock::new(HeapRelation {
                desc: TupleDesc::new(attrs),
                blocks: Vec::new(),
            })),
        );
        Ok(id)
    }

    /// Registers a view by its defining query.
    pub fn create_view(
        &self,
        name: QualifiedName,
        definition: impl Into<String>,
    ) -> Result<RelationId, HostError> {
        let mut catalog = self.inner.write_catalog();
        self.check_new_name(&catalog, &name)?;
        let id = RelationId(self.inner.next_relation_id.fetch_add(1, Ordering::Relaxed));
        let definition = definition.into();
        debug!(relation = %name, relation_id = id.0, %definition, "created view");
        catalog.by_name.insert(
            name.clone(),
            RelationEntry {
                id,
                name,
                kind: RelationKind::View { definition },
            },
        );
        Ok(id)
    }

    fn check_new_name(&self, catalog: &Catalog, name: &QualifiedName) -> Result<(), HostError> {
        if !catalog.schemas.contains(&name.schema) {
            return Err(self.inner.errors.raise(HostError::new(
                "3F000",
                format!("schema \"{}\" does not exist", name.schema),
            )));
        }
        if catalog.by_name.contains_key(name) {
            return Err(self.inner.errors.raise(HostError::new(
                "42P07",
                format!("relation \"{name}\" already exists"),
            )));
        }
        Ok(())
    }

    /// Starts an explicit transaction.
    pub fn begin(&self) -> Xid {
        self.inner.clog.begin()
    }

    pub fn commit(&self, xid: Xid) -> bool {
        self.inner.clog.commit(xid)
    }

    pub fn abort(&self, xid: Xid) -> bool {
        self.inner.clog.abort(xid)
    }

    /// Inserts one row in its own committed transaction.
    ///
    /// `values` lists the live columns in order; dropped columns are stored as
    /// NULL.
    pub fn insert(&self, relation: RelationId, values: Vec<Option<Datum>>) -> Result<(), HostError> {
        let xid = self.begin();
        match self.insert_in(xid, relation, values) {
            Ok(()) => {
                self.commit(xid);
                Ok(())
            }
            Err(err) => {
                self.abort(xid);
                Err(err)
            }
        }
    }

    /// Inserts one row as part of transaction `xid`.
    pub fn insert_in(
        &self,
        xid: Xid,
        relation: RelationId,
        values: Vec<Option<Datum>>,
    ) -> Result<(), HostError> {
        let heap = self.inner.heap(relation)?;
        let mut heap = heap.write().unwrap_or_else(|e| e.into_inner());
        let live = heap.desc.live_attnums().collect::<Vec<_>>();
        if values.len() != live.len() {
            return Err(self.inner.errors.raise(HostError::new(
                SQLSTATE_DATATYPE_MISMATCH,
                format!(
                    "INSERT has {} expressions but relation {relation} has {} columns",
                    values.len(),
                    live.len()
                ),
            )));
        }

        let mut physical = vec![None; heap.desc.natts()];
        for (attnum, value) in live.into_iter().zip(values) {
            let attr = &heap.desc.attrs[attnum];
            match &value {
                None if attr.not_null => {
                    return Err(self.inner.errors.raise(HostError::new(
                        "23502",
                        format!("null value in column \"{}\" violates not-null constraint", attr.name),
                    )));
                }
                Some(datum) if !datum_matches_type(datum, attr.type_oid) => {
                    return Err(self.inner.errors.raise(HostError::new(
                        SQLSTATE_DATATYPE_MISMATCH,
                        format!(
                            "column \"{}\" is of type {} but value is {datum:?}",
                            attr.name, attr.type_oid
                        ),
                    )));
                }
                _ => {}
            }
            physical[attnum] = value;
        }

        let tuple = HeapTuple {
            xmin: xid,
            xmax: None,
            values: physical,
        };
        let capacity = self.inner.config.block_capacity;
        match heap.blocks.last_mut() {
            Some(block) if block.len() < capacity => block.push(tuple),
            _ => heap.blocks.push(vec![tuple]),
        }
        Ok(())
    }

    /// Deletes every row version visible now that matches `predicate`.
    /// Returns the number of rows deleted.
    pub fn delete_where<F>(&self, relation: RelationId, predicate: F) -> Result<usize, HostError>
    where
        F: Fn(&TupleDesc, &HeapTuple) -> bool,
    {
        let heap = self.inner.heap(relation)?;
        let snapshot = self.inner.clog.snapshot();
        let xid = self.begin();
        let mut deleted = 0usize;
        {
            let mut heap = heap.write().unwrap_or_else(|e| e.into_inner());
            let HeapRelation { desc, blocks } = &mut *heap;
            for tuple in blocks.iter_mut().flatten() {
                if tuple.xmax.is_none()
                    && snapshot.tuple_visible(tuple, &self.inner.clog)
                    && predicate(desc, tuple)
                {
                    tuple.xmax = Some(xid);
                    deleted += 1;
                }
            }
        }
        self.commit(xid);
        Ok(deleted)
    }

    /// Appends a column. Existing rows report `default` (or NULL) for it.
    pub fn add_column(
        &self,
        relation: RelationId,
        mut attr: Attribute,
        default: Option<Datum>,
    ) -> Result<usize, HostError> {
        let heap = self.inner.heap(relation)?;
        let mut heap = heap.write().unwrap_or_else(|e| e.into_inner());
        if heap.desc.find_live(&attr.name).is_some() {
            return Err(self.inner.errors.raise(HostError::new(
                "42701",
                format!("column \"{}\" of relation {relation} already exists", attr.name),
            )));
        }
        if let Some(datum) = &default {
            if !datum_matches_type(datum, attr.type_oid) {
                return Err(self.inner.errors.raise(HostError::new(
                    SQLSTATE_DATATYPE_MISMATCH,
                    format!("default for column \"{}\" has the wrong type", attr.name),
                )));
            }
        }
        attr.missing = default;
        heap.desc.attrs.push(attr);
        Ok(heap.desc.natts() - 1)
    }

    /// Marks a column dropped. Its physical slot stays in existing tuples.
    pub fn drop_column(&self, relation: RelationId, name: &str) -> Result<(), HostError> {
        let heap = self.inner.heap(relation)?;
        let mut heap = heap.write().unwrap_or_else(|e| e.into_inner());
        let Some(attnum) = heap.desc.find_live(name) else {
            return Err(self.inner.errors.raise(HostError::new(
                "42703",
                format!("column \"{name}\" of relation {relation} does not exist"),
            )));
        };
        let attr = &mut heap.desc.attrs[attnum];
        attr.dropped = true;
        attr.missing = None;
        attr.name = format!("........pg.dropped.{}........", attnum + 1);
        Ok(())
    }

    /// Number of blocks currently allocated for a relation.
    pub fn nblocks(&self, relation: RelationId) -> Result<usize, HostError> {
        let heap = self.inner.heap(relation)?;
        let heap = heap.read().unwrap_or_else(|e| e.into_inner());
        Ok(heap.blocks.len())
    }

    /// Error records raised but not yet flushed, summed over every thread.
    pub fn total_error_state_depth(&self) -> usize {
        self.inner.errors.total_depth()
    }

    /// Requests cancellation of whatever scan checks for interrupts next.
    pub fn request_cancel(&self) {
        warn!("query cancel requested");
        self.inner.interrupt_pending.store(true, Ordering::Release);
    }
}

impl StoreInner {
    fn write_catalog(&self) -> std::sync::RwLockWriteGuard<'_, Catalog> {
        self.catalog.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read_catalog(&self) -> std::sync::RwLockReadGuard<'_, Catalog> {
        self.catalog.read().unwrap_or_else(|e| e.into_inner())
    }

    fn heap(&self, relation: RelationId) -> Result<Arc<RwLock<HeapRelation>>, HostError> {
        self.read_catalog()
            .heaps
            .get(&relation)
            .cloned()
            .ok_or_else(|| {
                self.errors.raise(HostError::new(
                    SQLSTATE_UNDEFINED_TABLE,
                    format!("could not open relation with OID {relation}"),
                ))
            })
    }

    /// Consumes a pending interrupt, raising the cancellation error.
    fn check_for_interrupts(&self) -> Result<(), HostError> {
        if self.interrupt_pending.load(Ordering::Acquire)
            && self.interrupt_pending.swap(false, Ordering::AcqRel)
        {
            return Err(self.errors.raise(HostError::query_canceled()));
        }
        Ok(())
    }
}

impl HeapAccess for HeapStore {
    fn acquire_snapshot(&self) -> Result<Snapshot, HostError> {
        self.inner.errors.ensure_clean()?;
        Ok(self.inner.clog.snapshot())
    }

    fn lookup_relation(&self, name: &QualifiedName) -> Result<Option<RelationEntry>, HostError> {
        self.inner.errors.ensure_clean()?;
        let catalog = self.inner.read_catalog();
        if let Some(entry) = catalog.by_name.get(name) {
            return Ok(Some(entry.clone()));
        }
        // Unquoted identifiers are case-insensitive.
        Ok(catalog
            .by_name
            .iter()
            .find(|(key, _)| {
                key.schema.eq_ignore_ascii_case(&name.schema)
                    && key.name.eq_ignore_ascii_case(&name.name)
            })
            .map(|(_, entry)| entry.clone()))
    }

    fn list_relations(&self, schema: &str) -> Result<Vec<RelationEntry>, HostError> {
        self.inner.errors.ensure_clean()?;
        let catalog = self.inner.read_catalog();
        Ok(catalog
            .by_name
            .values()
            .filter(|entry| entry.name.schema.eq_ignore_ascii_case(schema))
            .cloned()
            .collect())
    }

    fn list_schemas(&self) -> Result<Vec<String>, HostError> {
        self.inner.errors.ensure_clean()?;
        Ok(self.inner.read_catalog().schemas.iter().cloned().collect())
    }

    fn relation_descriptor(&self, relation: RelationId) -> Result<TupleDesc, HostError> {
        self.inner.errors.ensure_clean()?;
        let heap = self.inner.heap(relation)?;
        let heap = heap.read().unwrap_or_else(|e| e.into_inner());
        Ok(heap.desc.clone())
    }

    fn begin_parallel_scan(&self, relation: RelationId) -> Result<ParallelScanDesc, HostError> {
        self.inner.errors.ensure_clean()?;
        let nblocks = self.nblocks(relation)?;
        debug!(relation_id = relation.0, nblocks, "initialized parallel heap scan");
        Ok(ParallelScanDesc::new(relation, nblocks))
    }

    fn open_scan(
        &self,
        snapshot: &Snapshot,
        parallel: Arc<ParallelScanDesc>,
        keys: &[ScanKey],
    ) -> Result<Box<dyn TupleCursor>, HostError> {
        self.inner.errors.ensure_clean()?;
        let heap = self.inner.heap(parallel.relation)?;
        {
            let guard = heap.read().unwrap_or_else(|e| e.into_inner());
            for key in keys {
                validate_scan_key(&guard.desc, key).map_err(|err| self.inner.errors.raise(err))?;
            }
        }
        Ok(Box::new(HeapCursor {
            store: Arc::clone(&self.inner),
            heap,
            snapshot: snapshot.clone(),
            parallel,
            keys: keys.to_vec(),
            pending: VecDeque::new(),
        }))
    }

    fn flush_error_state(&self) {
        self.inner.errors.flush();
    }

    fn error_state_depth(&self) -> usize {
        self.inner.errors.depth()
    }
}

/// Worker cursor claiming blocks from a shared parallel descriptor.
struct HeapCursor {
    store: Arc<StoreInner>,
    heap: Arc<RwLock<HeapRelation>>,
    snapshot: Snapshot,
    parallel: Arc<ParallelScanDesc>,
    keys: Vec<ScanKey>,
    pending: VecDeque<HeapTuple>,
}

impl HeapCursor {
    /// Copies the qualifying tuples of the next claimed block into `pending`.
    /// Returns `false` when no blocks remain.
    fn load_next_block(&mut self) -> bool {
        let Some(block) = self.parallel.next_block() else {
            return false;
        };
        let heap = self.heap.read().unwrap_or_else(|e| e.into_inner());
        let Some(tuples) = heap.blocks.get(block) else {
            return true;
        };
        for tuple in tuples {
            if self.snapshot.tuple_visible(tuple, &self.store.clog)
                && self
                    .keys
                    .iter()
                    .all(|key| key_matches(key, tuple.getattr(&heap.desc, key.attnum)))
            {
                self.pending.push_back(tuple.clone());
            }
        }
        true
    }
}

impl TupleCursor for HeapCursor {
    fn next_tuple(&mut self) -> Result<Option<HeapTuple>, HostError> {
        self.store.errors.ensure_clean()?;
        loop {
            self.store.check_for_interrupts()?;
            if let Some(tuple) = self.pending.pop_front() {
                return Ok(Some(tuple));
            }
            if !self.load_next_block() {
                return Ok(None);
            }
        }
    }
}

fn validate_scan_key(desc: &TupleDesc, key: &ScanKey) -> Result<(), HostError> {
    let Some(attr) = desc.attr(key.attnum).filter(|attr| !attr.dropped) else {
        return Err(HostError::new(
            "42703",
            format!("scan key references invalid attribute {}", key.attnum),
        ));
    };
    match (&key.strategy, &key.argument) {
        (ScanStrategy::IsNull | ScanStrategy::IsNotNull, _) => Ok(()),
        (_, Some(arg)) if datum_matches_type(arg, attr.type_oid) => Ok(()),
        (_, Some(arg)) => Err(HostError::new(
            SQLSTATE_DATATYPE_MISMATCH,
            format!(
                "scan key argument {arg:?} does not match column \"{}\" of type {}",
                attr.name, attr.type_oid
            ),
        )),
        (_, None) => Err(HostError::internal(format!(
            "scan key on attribute {} has no argument",
            key.attnum
        ))),
    }
}

fn key_matches(key: &ScanKey, value: Option<&Datum>) -> bool {
    match key.strategy {
        ScanStrategy::IsNull => value.is_none(),
        ScanStrategy::IsNotNull => value.is_some(),
        strategy => {
            let (Some(value), Some(arg)) = (value, key.argument.as_ref()) else {
                return false;
            };
            let Some(ord) = compare_datums(value, arg) else {
                return false;
            };
            match strategy {
                ScanStrategy::Less => ord.is_lt(),
                ScanStrategy::LessEqual => ord.is_le(),
                ScanStrategy::Equal => ord.is_eq(),
                ScanStrategy::GreaterEqual => ord.is_ge(),
                ScanStrategy::Greater => ord.is_gt(),
                ScanStrategy::IsNull | ScanStrategy::IsNotNull => false,
            }
        }
    }
}

/// Whether a datum is a valid value of the given column type.
pub fn datum_matches_type(datum: &Datum, type_oid: TypeOid) -> bool {
    matches!(
        (datum, type_oid),
        (Datum::Bool(_), TypeOid::BOOL)
            | (Datum::Int16(_), TypeOid::INT2)
            | (Datum::Int32(_), TypeOid::INT4)
            | (Datum::Int64(_), TypeOid::INT8)
            | (Datum::Float32(_), TypeOid::FLOAT4)
            | (Datum::Float64(_), TypeOid::FLOAT8)
            | (Datum::Numeric(_), TypeOid::NUMERIC)
            | (Datum::Text(_), TypeOid::TEXT | TypeOid::VARCHAR | TypeOid::BPCHAR)
            | (Datum::Bytea(_), TypeOid::BYTEA)
            | (Datum::Date(_), TypeOid::DATE)
            | (Datum::Time(_), TypeOid::TIME)
            | (Datum::Timestamp(_), TypeOid::TIMESTAMP)
            | (Datum::TimestampTz(_), TypeOid::TIMESTAMPTZ)
            | (Datum::Uuid(_), TypeOid::UUID)
            | (Datum::Json(_), TypeOid::JSON)
    ) || matches!(datum, Datum::Other { type_oid: oid, .. } if *oid == type_oid)
}

/// Orders two datums of the same type. Floats use a total order (NaN last).
pub fn compare_datums(left: &Datum, right: &Datum) -> Option<CmpOrdering> {
    let ord = match (left, right) {
        (Datum::Bool(a), Datum::Bool(b)) => a.cmp(b),
        (Datum::Int16(a), Datum::Int16(b)) => a.cmp(b),
        (Datum::Int32(a), Datum::Int32(b)) => a.cmp(b),
        (Datum::Int64(a), Datum::Int64(b)) => a.cmp(b),
        (Datum::Float32(a), Datum::Float32(b)) => a.total_cmp(b),
        (Datum::Float64(a), Datum::Float64(b)) => a.total_cmp(b),
        (Datum::Numeric(a), Datum::Numeric(b)) => compare_numeric(*a, *b),
        (Datum::Text(a), Datum::Text(b)) | (Datum::Json(a), Datum::Json(b)) => a.cmp(b),
        (Datum::Bytea(a), Datum::Bytea(b)) => a.cmp(b),
        (Datum::Date(a), Datum::Date(b)) => a.cmp(b),
        (Datum::Time(a), Datum::Time(b))
        | (Datum::Timestamp(a), Datum::Timestamp(b))
        | (Datum::TimestampTz(a), Datum::TimestampTz(b)) => a.cmp(b),
        (Datum::Uuid(a), Datum::Uuid(b)) => a.cmp(b),
        _ => return None,
    };
    Some(ord)
}

fn compare_numeric(a: Numeric, b: Numeric) -> CmpOrdering {
    let scale = a.scale.max(b.scale);
    let widen = |n: Numeric| {
        10i128
            .checked_pow(u32::from(scale - n.scale))
            .and_then(|factor| n.unscaled.checked_mul(factor))
    };
    match (widen(a), widen(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => {
            let to_f64 = |n: Numeric| n.unscaled as f64 / 10f64.powi(i32::from(n.scale));
            to_f64(a).total_cmp(&to_f64(b))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_table(store: &HeapStore, rows: i32) -> RelationId {
        let rel = store
            .create_table(
                QualifiedName::new(DEFAULT_SCHEMA, "t"),
                vec![Attribute::new("a", TypeOid::INT4)],
            )
            .expect("create table");
        for value in 0..rows {
            store
                .insert(rel, vec![Some(Datum::Int32(value))])
                .expect("insert row");
        }
        rel
    }

    fn drain(cursor: &mut dyn TupleCursor) -> Vec<HeapTuple> {
        let mut out = Vec::new();
        while let Some(tuple) = cursor.next_tuple().expect("next tuple") {
            out.push(tuple);
        }
        out
    }

    #[test]
    fn rows_fill_fixed_capacity_blocks() {
        let store = HeapStore::new(HeapStoreConfig { block_capacity: 4 });
        let rel = int_table(&store, 10);
        assert_eq!(store.nblocks(rel).expect("nblocks"), 3);
    }

    #[test]
    fn scan_keys_filter_inside_the_host() {
        let store = HeapStore::new(HeapStoreConfig { block_capacity: 3 });
        let rel = int_table(&store, 10);
        let snapshot = store.acquire_snapshot().expect("snapshot");
        let parallel = Arc::new(store.begin_parallel_scan(rel).expect("parallel"));
        let keys = [ScanKey::compare(0, ScanStrategy::GreaterEqual, Datum::Int32(7))];
        let mut cursor = store.open_scan(&snapshot, parallel, &keys).expect("open");
        let rows = drain(cursor.as_mut());
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn mismatched_scan_key_is_rejected_and_recorded() {
        let store = HeapStore::default();
        let rel = int_table(&store, 1);
        let snapshot = store.acquire_snapshot().expect("snapshot");
        let parallel = Arc::new(store.begin_parallel_scan(rel).expect("parallel"));
        let keys = [ScanKey::compare(0, ScanStrategy::Equal, Datum::Text("x".into()))];
        let err = store.open_scan(&snapshot, parallel, &keys).err().expect("error");
        assert_eq!(err.sqlstate, SQLSTATE_DATATYPE_MISMATCH);
        assert_eq!(store.error_state_depth(), 1);
        assert!(store.acquire_snapshot().is_err());
        store.flush_error_state();
        assert!(store.acquire_snapshot().is_ok());
    }

    #[test]
    fn pending_cancel_interrupts_next_fetch() {
        let store = HeapStore::default();
        let rel = int_table(&store, 5);
        let snapshot = store.acquire_snapshot().expect("snapshot");
        let parallel = Arc::new(store.begin_parallel_scan(rel).expect("parallel"));
        let mut cursor = store.open_scan(&snapshot, parallel, &[]).expect("open");
        assert!(cursor.next_tuple().expect("first tuple").is_some());
        store.request_cancel();
        let err = cursor.next_tuple().expect_err("canceled");
        assert!(err.is_cancellation());
    }

    #[test]
    fn added_column_reports_default_for_old_rows() {
        let store = HeapStore::default();
        let rel = int_table(&store, 2);
        store
            .add_column(rel, Attribute::new("b", TypeOid::INT4), Some(Datum::Int32(42)))
            .expect("add column");
        let desc = store.relation_descriptor(rel).expect("desc");
        assert_eq!(desc.attrs[1].missing, Some(Datum::Int32(42)));
        store
            .insert(rel, vec![Some(Datum::Int32(9)), None])
            .expect("insert new-layout row");

        let snapshot = store.acquire_snapshot().expect("snapshot");
        let parallel = Arc::new(store.begin_parallel_scan(rel).expect("parallel"));
        let keys = [ScanKey::compare(1, ScanStrategy::Equal, Datum::Int32(42))];
        let mut cursor = store.open_scan(&snapshot, parallel, &keys).expect("open");
        assert_eq!(drain(cursor.as_mut()).len(), 2);
    }

    #[test]
    fn delete_hides_rows_from_new_snapshots_only() {
        let store = HeapStore::default();
        let rel = int_table(&store, 4);
        let before = store.acquire_snapshot().expect("snapshot");
        let deleted = store
            .delete_where(rel, |_, tuple| tuple.values[0] == Some(Datum::Int32(1)))
            .expect("delete");
        assert_eq!(deleted, 1);

        let count = |snapshot: &Snapshot| {
            let parallel = Arc::new(store.begin_parallel_scan(rel).expect("parallel"));
            let mut cursor = store.open_scan(snapshot, parallel, &[]).expect("open");
            drain(cursor.as_mut()).len()
        };
        assert_eq!(count(&before), 4);
        assert_eq!(count(&store.acquire_snapshot().expect("snapshot")), 3);
    }

    #[test]
    fn numeric_comparison_rescales() {
        let a = Datum::Numeric(Numeric::new(150, 2));
        let b = Datum::Numeric(Numeric::new(15, 1));
        assert_eq!(compare_datums(&a, &b), Some(CmpOrdering::Equal));
    }
}
