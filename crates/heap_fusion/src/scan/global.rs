//! State shared by every worker of one heap scan.
//!
//! [`ScanGlobalState`] is built once per planned scan. Each execution of the
//! plan gets its own [`ScanRun`], so executing the same physical plan twice
//! hands out every block again.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use datafusion::arrow::datatypes::{Schema, SchemaRef};
use datafusion::logical_expr::Expr;
use heap_store::{
    Datum, HeapAccess, ParallelScanDesc, RelationEntry, RelationId, ScanKey, Snapshot, TupleDesc,
};
use tracing::{debug, info};

use crate::error::BridgeError;
use crate::guard::host_guard;
use crate::metrics::ScanMetrics;
use crate::scan::filter::translate_filter;
use crate::types::{attribute_type, LogicalType};

/// One column touched by a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanColumn {
    /// Physical attribute ordinal in the heap tuple.
    pub attnum: usize,
    /// Position in the emitted batch; `None` for columns read only by filters.
    pub output_index: Option<usize>,
    /// Column name as bound, used for vector names and error messages.
    pub name: String,
    /// Columnar type the column is emitted as.
    pub logical_type: LogicalType,
    /// Host scan keys on this column.
    pub predicates: Vec<ScanKey>,
}

/// Ordered projection of a scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanColumns {
    columns: Vec<ScanColumn>,
}

impl ScanColumns {
    /// Every column the scan touches, emitted or filter-only.
    pub fn iter(&self) -> impl Iterator<Item = &ScanColumn> {
        self.columns.iter()
    }

    /// Emitted columns in output order.
    pub fn projected(&self) -> Vec<&ScanColumn> {
        let mut projected = self
            .columns
            .iter()
            .filter(|column| column.output_index.is_some())
            .collect::<Vec<_>>();
        projected.sort_by_key(|column| column.output_index);
        projected
    }

    /// Physical attribute of each output column, in output order.
    pub fn output_to_physical(&self) -> Vec<usize> {
        self.projected().iter().map(|column| column.attnum).collect()
    }

    /// Output position of each emitted physical attribute.
    pub fn physical_to_output(&self) -> BTreeMap<usize, usize> {
        self.columns
            .iter()
            .filter_map(|column| column.output_index.map(|idx| (column.attnum, idx)))
            .collect()
    }

    /// Every pushed-down scan key, in column order.
    pub fn filter_set(&self) -> Vec<ScanKey> {
        self.columns
            .iter()
            .flat_map(|column| column.predicates.iter().cloned())
            .collect()
    }

    fn entry(&mut self, attnum: usize, name: &str, logical_type: LogicalType) -> &mut ScanColumn {
        let idx = match self.columns.iter().position(|column| column.attnum == attnum) {
            Some(idx) => idx,
            None => {
                self.columns.push(ScanColumn {
                    attnum,
                    output_index: None,
                    name: name.to_string(),
                    logical_type,
                    predicates: Vec::new(),
                });
                self.columns.len() - 1
            }
        };
        &mut self.columns[idx]
    }
}

/// Everything global initialization needs from the bound table and the plan.
#[derive(Debug, Clone, Copy)]
pub struct InitInput<'a> {
    pub relation: &'a RelationEntry,
    /// Descriptor observed at bind time.
    pub bound_desc: &'a TupleDesc,
    /// Physical attribute behind each field of the bound schema.
    pub field_attnums: &'a [usize],
    /// Requested fields of the bound schema; `None` means all of them.
    pub projection: Option<&'a [usize]>,
    pub filters: &'a [Expr],
    pub filter_pushdown: bool,
    /// Snapshot of the running statement. `None` takes a fresh one.
    pub snapshot: Option<&'a Snapshot>,
}

/// One execution of a scan plan.
///
/// Holds the shared block handout and the count-only total. Workers attached
/// to the same run never see the same block twice.
#[derive(Debug, Default)]
pub struct ScanRun {
    generation: u64,
    parallel: Mutex<Option<Arc<ParallelScanDesc>>>,
    total_rows: AtomicU64,
}

impl ScanRun {
    fn new(generation: u64) -> Self {
        Self {
            generation,
            ..Self::default()
        }
    }

    /// Zero for the first execution of the plan, then one more per restart.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Adds rows counted by one worker in count-only mode.
    pub fn add_counted_rows(&self, rows: u64) {
        self.total_rows.fetch_add(rows, Ordering::Release);
    }

    /// Rows counted so far by the workers of this run.
    pub fn total_row_count(&self) -> u64 {
        self.total_rows.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
struct RunSlot {
    current: Arc<ScanRun>,
    /// Workers attached to `current`.
    attached: BTreeSet<usize>,
}

/// Per-scan state shared by all workers.
///
/// Every field except the run slot is written once in
/// [`ScanGlobalState::init`], before the state is shared.
#[derive(Debug)]
pub struct ScanGlobalState {
    host: Arc<dyn HeapAccess>,
    relation: RelationId,
    relation_name: String,
    snapshot: Snapshot,
    desc: TupleDesc,
    columns: ScanColumns,
    /// Physical attribute of each emitted column, in output order.
    output_attnums: Vec<usize>,
    filters: Vec<ScanKey>,
    count_only: bool,
    output_schema: SchemaRef,
    missing: BTreeMap<usize, Datum>,
    run: Mutex<RunSlot>,
    metrics: Arc<ScanMetrics>,
}

impl ScanGlobalState {
    /// Resolves the relation, takes the scan snapshot and builds the
    /// projection and filter sets.
    pub fn init(
        host: Arc<dyn HeapAccess>,
        input: InitInput<'_>,
        metrics: Arc<ScanMetrics>,
    ) -> Result<Self, BridgeError> {
        let relation = input.relation.id;
        let desc = host_guard(host.as_ref(), "relation_descriptor", || {
            host.relation_descriptor(relation)
        })?;
        check_bound_columns(input, &desc)?;
        // Decision: scans planned inside one statement share its snapshot.
        let snapshot = match input.snapshot {
            Some(snapshot) => snapshot.clone(),
            None => host_guard(host.as_ref(), "acquire_snapshot", || host.acquire_snapshot())?,
        };

        let all_fields = (0..input.field_attnums.len()).collect::<Vec<_>>();
        let requested = input.projection.unwrap_or(all_fields.as_slice());
        let count_only = requested.is_empty();

        let mut columns = ScanColumns::default();
        let mut fields = Vec::with_capacity(requested.len());
        for (output_index, field_idx) in requested.iter().enumerate() {
            let attnum = *input.field_attnums.get(*field_idx).ok_or_else(|| {
                BridgeError::internal(format!(
                    "projection references field {field_idx} of {} fields",
                    input.field_attnums.len()
                ))
            })?;
            let attr = &desc.attrs[attnum];
            let logical_type = attribute_type(attr);
            fields.push(logical_type.field(&attr.name, !attr.not_null));
            let column = columns.entry(attnum, &attr.name, logical_type);
            column.output_index = Some(output_index);
        }

        // Decision: untranslatable filters stay with DataFusion only.
        if input.filter_pushdown {
            for expr in input.filters {
                for key in translate_filter(expr, &desc).unwrap_or_default() {
                    let attr = &desc.attrs[key.attnum];
                    columns
                        .entry(key.attnum, &attr.name, attribute_type(attr))
                        .predicates
                        .push(key);
                }
            }
        }
        let filters = columns.filter_set();
        let output_attnums = columns.output_to_physical();
        let missing = init_relation_missing_attrs(&desc);
        metrics.record_scan(filters.len() as u64);

        info!(
            relation = %input.relation.name,
            relation_id = relation.0,
            columns = output_attnums.len(),
            filters = filters.len(),
            count_only,
            missing_attrs = missing.len(),
            statement_snapshot = input.snapshot.is_some(),
            "initialized heap scan"
        );

        Ok(Self {
            relation_name: input.relation.name.to_string(),
            host,
            relation,
            snapshot,
            desc,
            columns,
            output_attnums,
            filters,
            count_only,
            output_schema: Arc::new(Schema::new(fields)),
            missing,
            run: Mutex::new(RunSlot {
                current: Arc::new(ScanRun::new(0)),
                attached: BTreeSet::new(),
            }),
            metrics,
        })
    }

    /// Attaches `worker` to the current run of the plan.
    ///
    /// A worker that is already attached means the plan is executing again:
    /// a fresh run with its own block handout and counter replaces the
    /// current one. Workers of the previous run keep their own run.
    pub fn attach_worker(&self, worker: usize) -> Arc<ScanRun> {
        let mut slot = self.run.lock().unwrap_or_else(|e| e.into_inner());
        // Decision: a repeated partition id marks the start of a new execution.
        if slot.attached.contains(&worker) {
            let generation = slot.current.generation() + 1;
            debug!(
                relation = %self.relation_name,
                worker,
                generation,
                "restarting heap scan for a new execution"
            );
            slot.current = Arc::new(ScanRun::new(generation));
            slot.attached.clear();
        }
        slot.attached.insert(worker);
        Arc::clone(&slot.current)
    }

    fn current_run(&self) -> Arc<ScanRun> {
        let slot = self.run.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&slot.current)
    }

    /// Returns the shared physical scan descriptor of the current run,
    /// creating it on first use.
    pub fn parallel_scan(&self) -> Result<Arc<ParallelScanDesc>, BridgeError> {
        self.parallel_scan_for(&self.current_run())
    }

    /// Returns the shared physical scan descriptor of `run`, creating it on
    /// first use.
    pub fn parallel_scan_for(&self, run: &ScanRun) -> Result<Arc<ParallelScanDesc>, BridgeError> {
        let mut guard = run.parallel.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(parallel) = guard.as_ref() {
            return Ok(Arc::clone(parallel));
        }
        let parallel = Arc::new(host_guard(self.host.as_ref(), "begin_parallel_scan", || {
            self.host.begin_parallel_scan(self.relation)
        })?);
        debug!(
            relation = %self.relation_name,
            generation = run.generation(),
            nblocks = parallel.nblocks(),
            "acquired shared heap scan descriptor"
        );
        *guard = Some(Arc::clone(&parallel));
        Ok(parallel)
    }

    /// Adds rows counted by one worker of the current run.
    pub fn add_counted_rows(&self, rows: u64) {
        self.current_run().add_counted_rows(rows);
    }

    /// Rows counted so far by all workers of the current run.
    pub fn total_row_count(&self) -> u64 {
        self.current_run().total_row_count()
    }

    pub fn host(&self) -> &Arc<dyn HeapAccess> {
        &self.host
    }

    pub fn relation(&self) -> RelationId {
        self.relation
    }

    pub fn relation_name(&self) -> &str {
        &self.relation_name
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn desc(&self) -> &TupleDesc {
        &self.desc
    }

    pub fn columns(&self) -> &ScanColumns {
        &self.columns
    }

    /// Physical attribute of each emitted column, in output order.
    pub fn output_attnums(&self) -> &[usize] {
        &self.output_attnums
    }

    /// Scan keys handed to the host when a cursor opens.
    pub fn filters(&self) -> &[ScanKey] {
        &self.filters
    }

    pub fn count_only(&self) -> bool {
        self.count_only
    }

    pub fn output_schema(&self) -> SchemaRef {
        Arc::clone(&self.output_schema)
    }

    /// Value reported for `attnum` by tuples that predate the attribute.
    pub fn missing_value(&self, attnum: usize) -> Option<&Datum> {
        self.missing.get(&attnum)
    }

    pub fn metrics(&self) -> &Arc<ScanMetrics> {
        &self.metrics
    }
}

/// Builds the missing-attribute table of a relation: live attributes that
/// carry a stored value for tuples written before they were added.
pub fn init_relation_missing_attrs(desc: &TupleDesc) -> BTreeMap<usize, Datum> {
    desc.attrs
        .iter()
        .enumerate()
        .filter(|(_, attr)| !attr.dropped)
        .filter_map(|(attnum, attr)| attr.missing.clone().map(|value| (attnum, value)))
        .collect()
}

/// Fails when a column bound at planning time was dropped or retyped since.
fn check_bound_columns(input: InitInput<'_>, current: &TupleDesc) -> Result<(), BridgeError> {
    for attnum in input.field_attnums {
        let bound = input.bound_desc.attr(*attnum);
        let now = current.attr(*attnum);
        match (bound, now) {
            (Some(bound), Some(now))
                if !now.dropped && bound.type_oid == now.type_oid && bound.typmod == now.typmod => {}
            _ => {
                return Err(BridgeError::internal(format!(
                    "relation {} changed since the query was planned (attribute {attnum})",
                    input.relation.name
                )))
            }
        }
    }
    Ok(())
}
