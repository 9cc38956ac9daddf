//! Per-worker pull loop filling Arrow batches from heap tuples.

use std::sync::Arc;

use datafusion::arrow::datatypes::Schema;
use datafusion::arrow::record_batch::{RecordBatch, RecordBatchOptions};
use heap_store::{AttrSlot, TupleCursor};
use tracing::{debug, trace};

use crate::convert::row_to_columnar;
use crate::error::BridgeError;
use crate::guard::host_guard;
use crate::scan::global::{ScanGlobalState, ScanRun};
use crate::scan::local::ScanLocalState;

/// Position of a worker in its pull cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Between pulls; the next pull starts a new batch.
    Ready,
    /// Copying tuples into the batch under construction.
    Filling,
    /// The batch reached capacity before the worker ran out of tuples.
    BatchFull,
    /// No further rows; every later pull returns an empty batch.
    Exhausted,
}

/// Result of one pull.
#[derive(Debug)]
pub struct ScanPull {
    pub batch: RecordBatch,
    /// The worker will produce no further rows.
    pub exhausted: bool,
}

/// Drives one worker's share of a heap scan.
///
/// The host cursor opens lazily on the first pull, attached to the block
/// handout of the worker's run, and closes once the worker is exhausted or
/// the driver is dropped.
pub struct ScanDriver {
    global: Arc<ScanGlobalState>,
    /// Execution of the plan this worker belongs to.
    run: Arc<ScanRun>,
    local: ScanLocalState,
    cursor: Option<Box<dyn TupleCursor>>,
    state: DriverState,
    worker: usize,
}

impl std::fmt::Debug for ScanDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanDriver")
            .field("relation", &self.global.relation_name())
            .field("worker", &self.worker)
            .field("generation", &self.run.generation())
            .field("state", &self.state)
            .field("cursor_open", &self.cursor.is_some())
            .finish()
    }
}

impl ScanDriver {
    /// Attaches `worker` to the current run of `global` with batches of at
    /// most `capacity` rows.
    pub fn new(
        global: Arc<ScanGlobalState>,
        worker: usize,
        capacity: usize,
    ) -> Result<Self, BridgeError> {
        let local = ScanLocalState::new(&global, capacity)?;
        let run = global.attach_worker(worker);
        Ok(Self {
            global,
            run,
            local,
            cursor: None,
            state: DriverState::Ready,
            worker,
        })
    }

    /// Run this worker is attached to.
    pub fn run(&self) -> &Arc<ScanRun> {
        &self.run
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn local(&self) -> &ScanLocalState {
        &self.local
    }

    /// Fills and returns the next batch.
    ///
    /// Once the worker is exhausted every further pull returns an empty batch.
    pub fn pull(&mut self) -> Result<ScanPull, BridgeError> {
        if self.local.is_exhausted() {
            self.state = DriverState::Exhausted;
            return Ok(ScanPull {
                batch: self.empty_batch()?,
                exhausted: true,
            });
        }

        self.local.reset();
        self.state = DriverState::Filling;
        let result = self.fill();
        // Decision: a failed worker never resumes.
        if result.is_err() {
            self.local.mark_exhausted();
            self.cursor = None;
            self.state = DriverState::Exhausted;
            self.global.metrics().record_scan_error();
        }
        result?;

        let rows = self.local.output_vector_size();
        let batch = self.finish_batch(rows)?;
        let exhausted = self.local.is_exhausted();
        self.state = if exhausted {
            DriverState::Exhausted
        } else {
            DriverState::Ready
        };
        self.global.metrics().record_batch(rows as u64, self.global.count_only());
        trace!(
            relation = self.global.relation_name(),
            worker = self.worker,
            rows,
            exhausted,
            "pulled heap batch"
        );
        Ok(ScanPull { batch, exhausted })
    }

    fn fill(&mut self) -> Result<(), BridgeError> {
        let host = Arc::clone(self.global.host());
        if self.cursor.is_none() {
            let parallel = self.global.parallel_scan_for(&self.run)?;
            let cursor = host_guard(host.as_ref(), "open_scan", || {
                host.open_scan(self.global.snapshot(), parallel, self.global.filters())
            })?;
            debug!(
                relation = self.global.relation_name(),
                worker = self.worker,
                generation = self.run.generation(),
                "opened heap scan cursor"
            );
            self.cursor = Some(cursor);
        }

        while !self.local.is_full() {
            let Some(cursor) = self.cursor.as_mut() else {
                break;
            };
            let Some(tuple) = host_guard(host.as_ref(), "next_tuple", || cursor.next_tuple())?
            else {
                self.local.mark_exhausted();
                self.cursor = None;
                break;
            };
            self.global.metrics().record_rows_scanned(1);

            // Decision: count-only scans copy no values out of the tuple.
            if !self.global.count_only() {
                let offset = self.local.output_vector_size();
                for (idx, attnum) in self.global.output_attnums().iter().enumerate() {
                    self.local.values[idx] = match tuple.attr(*attnum) {
                        AttrSlot::Value(datum) => Some(datum.clone()),
                        AttrSlot::Null => None,
                        AttrSlot::Absent => self.global.missing_value(*attnum).cloned(),
                    };
                }
                for (value, vector) in self.local.values.iter().zip(self.local.vectors.iter_mut()) {
                    row_to_columnar(value.as_ref(), vector, offset)?;
                }
            }
            self.local.advance();
        }
        if self.local.is_full() && !self.local.is_exhausted() {
            self.state = DriverState::BatchFull;
        }
        Ok(())
    }

    fn finish_batch(&mut self, rows: usize) -> Result<RecordBatch, BridgeError> {
        if self.global.count_only() {
            self.run.add_counted_rows(rows as u64);
            return count_batch(rows);
        }
        let arrays = self
            .local
            .vectors
            .iter_mut()
            .map(|vector| vector.finish())
            .collect::<Vec<_>>();
        Ok(RecordBatch::try_new(self.global.output_schema(), arrays)?)
    }

    fn empty_batch(&self) -> Result<RecordBatch, BridgeError> {
        if self.global.count_only() {
            return count_batch(0);
        }
        Ok(RecordBatch::new_empty(self.global.output_schema()))
    }
}

/// Zero-column batch carrying only a row count.
fn count_batch(rows: usize) -> Result<RecordBatch, BridgeError> {
    Ok(RecordBatch::try_new_with_options(
        Arc::new(Schema::empty()),
        Vec::new(),
        &RecordBatchOptions::new().with_row_count(Some(rows)),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ScanMetrics;
    use crate::scan::global::InitInput;
    use datafusion::arrow::array::{Array, AsArray};
    use datafusion::arrow::datatypes::Int32Type;
    use heap_store::{
        Attribute, Datum, HeapAccess, HeapStore, HeapStoreConfig, QualifiedName, RelationId,
        TypeOid,
    };

    fn store_with_rows(rows: i32, block_capacity: usize) -> (HeapStore, RelationId) {
        let store = HeapStore::new(HeapStoreConfig { block_capacity });
        let id = store
            .create_table(
                QualifiedName::new("public", "t"),
                vec![
                    Attribute::new("a", TypeOid::INT4),
                    Attribute::new("b", TypeOid::TEXT),
                ],
            )
            .expect("create");
        for a in 0..rows {
            let b = (a % 2 == 0).then(|| Datum::Text(format!("row{a}")));
            store.insert(id, vec![Some(Datum::Int32(a)), b]).expect("insert");
        }
        (store, id)
    }

    fn global(store: &HeapStore, id: RelationId, projection: Option<&[usize]>) -> Arc<ScanGlobalState> {
        let entry = store
            .lookup_relation(&QualifiedName::new("public", "t"))
            .expect("lookup")
            .expect("exists");
        let desc = store.relation_descriptor(id).expect("desc");
        let field_attnums = desc.live_attnums().collect::<Vec<_>>();
        Arc::new(
            ScanGlobalState::init(
                Arc::new(store.clone()),
                InitInput {
                    relation: &entry,
                    bound_desc: &desc,
                    field_attnums: &field_attnums,
                    projection,
                    filters: &[],
                    filter_pushdown: true,
                    snapshot: None,
                },
                Arc::new(ScanMetrics::default()),
            )
            .expect("init"),
        )
    }

    #[test]
    fn pulls_fill_batches_until_exhausted() {
        let (store, id) = store_with_rows(5, 2);
        let mut driver = ScanDriver::new(global(&store, id, None), 0, 2).expect("driver");
        assert_eq!(driver.state(), DriverState::Ready);

        let first = driver.pull().expect("first");
        assert_eq!(first.batch.num_rows(), 2);
        assert!(!first.exhausted);
        assert_eq!(driver.state(), DriverState::Ready);

        let mut total = 2;
        loop {
            let pull = driver.pull().expect("pull");
            total += pull.batch.num_rows();
            if pull.exhausted {
                break;
            }
        }
        assert_eq!(total, 5);
        assert_eq!(driver.state(), DriverState::Exhausted);

        let after = driver.pull().expect("terminal pull");
        assert!(after.exhausted);
        assert_eq!(after.batch.num_rows(), 0);
    }

    #[test]
    fn projected_columns_keep_requested_order() {
        let (store, id) = store_with_rows(2, 8);
        let mut driver = ScanDriver::new(global(&store, id, Some(&[1, 0][..])), 0, 8).expect("driver");
        let pull = driver.pull().expect("pull");
        let batch = pull.batch;
        assert_eq!(batch.schema().field(0).name(), "b");
        assert_eq!(batch.column(1).as_primitive::<Int32Type>().value(1), 1);
        assert!(batch.column(0).is_null(1));
        assert_eq!(batch.column(0).as_string::<i32>().value(0), "row0");
    }

    #[test]
    fn count_only_updates_shared_counter() {
        let (store, id) = store_with_rows(7, 3);
        let state = global(&store, id, Some(&[][..]));
        let mut driver = ScanDriver::new(Arc::clone(&state), 0, 4).expect("driver");
        let mut emitted = 0;
        loop {
            let pull = driver.pull().expect("pull");
            assert_eq!(pull.batch.num_columns(), 0);
            emitted += pull.batch.num_rows();
            if pull.exhausted {
                break;
            }
        }
        assert_eq!(emitted, 7);
        assert_eq!(state.total_row_count(), 7);
    }

    #[test]
    fn second_execution_scans_every_block_again() {
        let (store, id) = store_with_rows(9, 2);
        let state = global(&store, id, Some(&[][..]));
        let drain = |driver: &mut ScanDriver| {
            let mut rows = 0;
            loop {
                let pull = driver.pull().expect("pull");
                rows += pull.batch.num_rows();
                if pull.exhausted {
                    return rows;
                }
            }
        };

        let mut first = ScanDriver::new(Arc::clone(&state), 0, 4).expect("first");
        assert_eq!(drain(&mut first), 9);
        assert_eq!(state.total_row_count(), 9);

        let mut second = ScanDriver::new(Arc::clone(&state), 0, 4).expect("second");
        assert_eq!(second.run().generation(), 1);
        assert_eq!(drain(&mut second), 9);
        assert_eq!(state.total_row_count(), 9);
    }

    #[test]
    fn added_column_reads_missing_value_for_old_rows() {
        let (store, id) = store_with_rows(2, 8);
        store
            .add_column(id, Attribute::new("c", TypeOid::INT4), Some(Datum::Int32(42)))
            .expect("add c");
        store
            .add_column(id, Attribute::new("d", TypeOid::INT4), None)
            .expect("add d");
        store
            .insert(id, vec![Some(Datum::Int32(9)), None, Some(Datum::Int32(1)), None])
            .expect("insert");

        let mut driver = ScanDriver::new(global(&store, id, Some(&[2, 3][..])), 0, 8).expect("driver");
        let batch = driver.pull().expect("pull").batch;
        let c = batch.column(0).as_primitive::<Int32Type>();
        assert_eq!((c.value(0), c.value(1), c.value(2)), (42, 42, 1));
        assert_eq!(batch.column(1).null_count(), 3);
    }

    #[test]
    fn host_error_is_surfaced_and_flushed() {
        let (store, id) = store_with_rows(4, 1);
        let mut driver = ScanDriver::new(global(&store, id, None), 0, 1).expect("driver");
        driver.pull().expect("first row");
        store.request_cancel();
        let err = driver.pull().expect_err("canceled");
        assert!(err.is_cancellation());
        assert_eq!(store.error_state_depth(), 0);
        assert_eq!(driver.state(), DriverState::Exhausted);
    }
}
