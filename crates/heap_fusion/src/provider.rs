//! DataFusion table provider and execution plan over a heap relation.
//!
//! `TableProvider::scan` performs the global scan initialization (snapshot,
//! projection, pushed filters). Each `ExecutionPlan::execute` partition is one
//! scan worker pulling batches from the host on a blocking thread.
//!
//! Scans planned for one statement read the [`StatementSnapshot`] stored in
//! the session config, so every table of the statement sees the same data.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use datafusion::arrow::datatypes::{Schema, SchemaRef};
use datafusion::catalog::{Session, TableProvider};
use datafusion::common::{DataFusionError, Result as DFResult};
use datafusion::execution::TaskContext;
use datafusion::logical_expr::{Expr, TableProviderFilterPushDown, TableType};
use datafusion::physical_expr::EquivalenceProperties;
use datafusion::physical_plan::display::{DisplayAs, DisplayFormatType};
use datafusion::physical_plan::execution_plan::{Boundedness, EmissionType};
use datafusion::physical_plan::stream::RecordBatchStreamAdapter;
use datafusion::physical_plan::{
    ExecutionPlan, Partitioning, PlanProperties, SendableRecordBatchStream,
};
use heap_store::{HeapAccess, RelationEntry, RelationKind, Snapshot, TupleDesc};
use tracing::{debug, info_span, Instrument};

use crate::error::BridgeError;
use crate::guard::host_guard;
use crate::metrics::ScanMetrics;
use crate::scan::{translate_filter, InitInput, ScanDriver, ScanGlobalState};
use crate::types::attribute_type;

/// Execution knobs applied to every heap scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    /// Rows per emitted batch. `0` uses the session batch size.
    pub batch_rows: usize,
    /// Scan workers (plan partitions) per scan.
    pub max_workers: usize,
    /// Forward translatable filters to the host as scan keys.
    pub filter_pushdown: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            batch_rows: 0,
            max_workers: 1,
            filter_pushdown: true,
        }
    }
}

/// Snapshot of the statement being planned.
///
/// Stored as a `SessionConfig` extension; heap scans planned with a session
/// that carries one use it instead of taking their own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementSnapshot(pub Snapshot);

/// Table provider bound to one heap table.
///
/// The Arrow schema is fixed at bind time from the live attributes of the
/// relation; scans fail if the relation changed incompatibly since.
#[derive(Debug)]
pub struct HeapTableProvider {
    host: Arc<dyn HeapAccess>,
    relation: RelationEntry,
    /// Descriptor observed at bind time.
    desc: TupleDesc,
    /// Arrow schema of the live attributes, fixed at bind time.
    schema: SchemaRef,
    /// Physical attribute behind each schema field.
    field_attnums: Vec<usize>,
    options: ScanOptions,
    metrics: Arc<ScanMetrics>,
}

impl HeapTableProvider {
    /// Binds a provider to `relation`, which must be a table.
    pub fn try_new(
        host: Arc<dyn HeapAccess>,
        relation: RelationEntry,
        options: ScanOptions,
        metrics: Arc<ScanMetrics>,
    ) -> Result<Self, BridgeError> {
        if relation.kind != RelationKind::Table {
            return Err(BridgeError::internal(format!(
                "relation {} is not a table",
                relation.name
            )));
        }
        let id = relation.id;
        let desc = host_guard(host.as_ref(), "relation_descriptor", || {
            host.relation_descriptor(id)
        })?;
        let field_attnums = desc.live_attnums().collect::<Vec<_>>();
        let fields = field_attnums
            .iter()
            .map(|attnum| {
                let attr = &desc.attrs[*attnum];
                attribute_type(attr).field(&attr.name, !attr.not_null)
            })
            .collect::<Vec<_>>();
        debug!(
            relation = %relation.name,
            relation_id = id.0,
            fields = fields.len(),
            "bound heap table provider"
        );
        Ok(Self {
            host,
            relation,
            desc,
            schema: Arc::new(Schema::new(fields)),
            field_attnums,
            options,
            metrics,
        })
    }

    pub fn relation(&self) -> &RelationEntry {
        &self.relation
    }

    pub fn options(&self) -> ScanOptions {
        self.options
    }

    /// Initializes the scan state for one query. Without a statement
    /// snapshot the scan takes its own.
    pub fn init_scan(
        &self,
        projection: Option<&[usize]>,
        filters: &[Expr],
        snapshot: Option<&Snapshot>,
    ) -> Result<ScanGlobalState, BridgeError> {
        ScanGlobalState::init(
            Arc::clone(&self.host),
            InitInput {
                relation: &self.relation,
                bound_desc: &self.desc,
                field_attnums: &self.field_attnums,
                projection,
                filters,
                filter_pushdown: self.options.filter_pushdown,
                snapshot,
            },
            Arc::clone(&self.metrics),
        )
    }
}

#[async_trait]
impl TableProvider for HeapTableProvider {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    fn table_type(&self) -> TableType {
        TableType::Base
    }

    async fn scan(
        &self,
        state: &dyn Session,
        projection: Option<&Vec<usize>>,
        filters: &[Expr],
        _limit: Option<usize>,
    ) -> DFResult<Arc<dyn ExecutionPlan>> {
        let statement = state.config().get_extension::<StatementSnapshot>();
        let global = self.init_scan(
            projection.map(Vec::as_slice),
            filters,
            statement.as_deref().map(|statement| &statement.0),
        )?;
        let batch_rows = match self.options.batch_rows {
            0 => state.config().batch_size(),
            rows => rows,
        };
        Ok(Arc::new(HeapScanExec::new(
            Arc::new(global),
            batch_rows,
            self.options.max_workers,
        )))
    }

    fn supports_filters_pushdown(
        &self,
        filters: &[&Expr],
    ) -> DFResult<Vec<TableProviderFilterPushDown>> {
        let mut support = Vec::with_capacity(filters.len());
        for filter in filters {
            let pushed =
                self.options.filter_pushdown && translate_filter(filter, &self.desc).is_some();
            self.metrics.record_filter_support(pushed);
            // The host only prefilters; DataFusion re-applies every filter.
            support.push(if pushed {
                TableProviderFilterPushDown::Inexact
            } else {
                TableProviderFilterPushDown::Unsupported
            });
        }
        Ok(support)
    }
}

/// Physical plan node scanning a heap relation with `workers` partitions.
///
/// The plan can be executed more than once; each execution scans the
/// relation in full under the snapshot taken at planning time.
#[derive(Debug)]
pub struct HeapScanExec {
    global: Arc<ScanGlobalState>,
    batch_rows: usize,
    workers: usize,
    properties: PlanProperties,
}

impl HeapScanExec {
    pub fn new(global: Arc<ScanGlobalState>, batch_rows: usize, workers: usize) -> Self {
        let workers = workers.max(1);
        let properties = PlanProperties::new(
            EquivalenceProperties::new(global.output_schema()),
            Partitioning::UnknownPartitioning(workers),
            EmissionType::Incremental,
            Boundedness::Bounded,
        );
        Self {
            global,
            batch_rows: batch_rows.max(1),
            workers,
            properties,
        }
    }

    pub fn global(&self) -> &Arc<ScanGlobalState> {
        &self.global
    }
}

impl DisplayAs for HeapScanExec {
    fn fmt_as(&self, t: DisplayFormatType, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match t {
            DisplayFormatType::Default | DisplayFormatType::Verbose => {
                write!(
                    f,
                    "HeapScanExec: relation={}, workers={}, filters={}",
                    self.global.relation_name(),
                    self.workers,
                    self.global.filters().len()
                )?;
                if self.global.count_only() {
                    write!(f, ", count_only")?;
                }
                Ok(())
            }
            _ => write!(f, "relation={}", self.global.relation_name()),
        }
    }
}

impl ExecutionPlan for HeapScanExec {
    fn name(&self) -> &str {
        "HeapScanExec"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn properties(&self) -> &PlanProperties {
        &self.properties
    }

    fn children(&self) -> Vec<&Arc<dyn ExecutionPlan>> {
        Vec::new()
    }

    fn with_new_children(
        self: Arc<Self>,
        children: Vec<Arc<dyn ExecutionPlan>>,
    ) -> DFResult<Arc<dyn ExecutionPlan>> {
        if children.is_empty() {
            Ok(self)
        } else {
            Err(DataFusionError::Internal(
                "HeapScanExec does not accept children".to_string(),
            ))
        }
    }

    fn execute(
        &self,
        partition: usize,
        _context: Arc<TaskContext>,
    ) -> DFResult<SendableRecordBatchStream> {
        let driver = ScanDriver::new(Arc::clone(&self.global), partition, self.batch_rows)?;
        let span = info_span!(
            "heap_scan",
            relation = self.global.relation_name(),
            worker = partition
        );
        let stream = futures_util::stream::unfold(Some(driver), move |driver| {
            let pull_span = span.clone();
            let blocking_span = span.clone();
            async move {
                let mut driver = driver?;
                let joined = tokio::task::spawn_blocking(move || {
                    let _entered = blocking_span.enter();
                    let pull = driver.pull();
                    (driver, pull)
                })
                .await;
                match joined {
                    Ok((driver, Ok(pull))) => {
                        if pull.exhausted {
                            // Decision: a trailing empty batch ends the stream.
                            if pull.batch.num_rows() == 0 {
                                return None;
                            }
                            Some((Ok(pull.batch), None))
                        } else {
                            Some((Ok(pull.batch), Some(driver)))
                        }
                    }
                    Ok((_, Err(err))) => Some((Err(DataFusionError::from(err)), None)),
                    Err(err) => Some((Err(DataFusionError::External(Box::new(err))), None)),
                }
            }
            .instrument(pull_span)
        });
        Ok(Box::pin(RecordBatchStreamAdapter::new(
            self.global.output_schema(),
            stream,
        )))
    }
}
