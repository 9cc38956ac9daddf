//! Scan bridge exposing `heap_store` relations to an embedded DataFusion engine.
//!
//! Heap tables are planned as native DataFusion inputs:
//! - [`types`] maps heap types to Arrow types and back,
//! - [`convert`] moves single values between heap datums and Arrow arrays,
//! - [`scan`] holds the per-scan and per-worker state and the pull driver,
//! - [`provider`] adapts a heap table to `TableProvider`/`ExecutionPlan`,
//! - [`replacement`] resolves heap tables and views during name binding,
//! - [`guard`] translates errors in both directions across the boundary.
//!
//! [`HeapFusion`] is the composition root wiring these into a `SessionContext`.

use std::sync::Arc;

use anyhow::{Context, Result};
use datafusion::arrow::datatypes::SchemaRef;
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::common::{DataFusionError, Result as DFResult};
use datafusion::logical_expr::LogicalPlan;
use datafusion::prelude::{DataFrame, SessionConfig, SessionContext};
use heap_store::{HeapAccess, HostError, DEFAULT_SCHEMA};
use tracing::info;

pub mod convert;
pub mod error;
pub mod guard;
pub mod metrics;
pub mod provider;
pub mod replacement;
pub mod result;
pub mod scan;
pub mod types;

pub use error::BridgeError;
pub use guard::{engine_guard, host_guard};
pub use metrics::{ScanMetrics, ScanMetricsSnapshot};
pub use provider::{HeapScanExec, HeapTableProvider, ScanOptions, StatementSnapshot};
pub use replacement::{
    install_replacement_scans, Replacement, ReplacementScanResolver, ReplacementSchemaProvider,
};
pub use result::{QueryResult, ResultColumn};

/// Catalog DataFusion registers heap schemas under.
pub const DEFAULT_CATALOG: &str = "datafusion";

/// Runtime configuration of the bridge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeapFusionConfig {
    /// Rows per scan batch (`0` uses the DataFusion session batch size).
    pub scan_batch_rows: usize,
    /// Scan workers per heap scan.
    pub max_workers: usize,
    /// Forward translatable filters to the host as scan keys.
    pub filter_pushdown: bool,
    /// Schema unqualified names resolve against.
    pub default_schema: String,
}

impl Default for HeapFusionConfig {
    fn default() -> Self {
        Self {
            scan_batch_rows: 0,
            max_workers: default_max_workers(),
            filter_pushdown: true,
            default_schema: DEFAULT_SCHEMA.to_string(),
        }
    }
}

impl HeapFusionConfig {
    /// Loads configuration from environment variables with sensible defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let scan_batch_rows = parse_usize(
            std::env::var("HEAP_FUSION_SCAN_BATCH_ROWS").ok(),
            defaults.scan_batch_rows,
        )?;
        let max_workers = parse_usize(
            std::env::var("HEAP_FUSION_MAX_WORKERS").ok(),
            defaults.max_workers,
        )?
        .max(1);
        let filter_pushdown = parse_bool(
            std::env::var("HEAP_FUSION_FILTER_PUSHDOWN").ok(),
            defaults.filter_pushdown,
        )?;
        let default_schema = std::env::var("HEAP_FUSION_DEFAULT_SCHEMA")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(defaults.default_schema);
        Ok(Self {
            scan_batch_rows,
            max_workers,
            filter_pushdown,
            default_schema,
        })
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            batch_rows: self.scan_batch_rows,
            max_workers: self.max_workers,
            filter_pushdown: self.filter_pushdown,
        }
    }
}

/// DataFusion session with heap relations installed as replacement scans.
pub struct HeapFusion {
    host: Arc<dyn HeapAccess>,
    ctx: SessionContext,
    resolver: ReplacementScanResolver,
    metrics: Arc<ScanMetrics>,
    config: HeapFusionConfig,
}

impl std::fmt::Debug for HeapFusion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapFusion")
            .field("session_id", &self.ctx.session_id())
            .field("config", &self.config)
            .finish()
    }
}

impl HeapFusion {
    /// Builds the session and installs a replacement-scan overlay for every
    /// schema of the host catalog.
    pub fn new(host: Arc<dyn HeapAccess>, config: HeapFusionConfig) -> Result<Self> {
        let session_config = SessionConfig::new()
            .with_information_schema(true)
            .with_default_catalog_and_schema(DEFAULT_CATALOG, &config.default_schema);
        let ctx = SessionContext::new_with_config(session_config);
        let metrics = Arc::new(ScanMetrics::default());
        let resolver = ReplacementScanResolver::for_context(
            &ctx,
            Arc::clone(&host),
            config.scan_options(),
            Arc::clone(&metrics),
        );
        let engine = Self {
            host,
            ctx,
            resolver,
            metrics,
            config,
        };
        engine.refresh_catalog()?;
        info!(
            default_schema = %engine.config.default_schema,
            max_workers = engine.config.max_workers,
            scan_batch_rows = engine.config.scan_batch_rows,
            filter_pushdown = engine.config.filter_pushdown,
            "heap fusion session ready"
        );
        Ok(engine)
    }

    /// Installs overlays for host schemas created since the last call.
    pub fn refresh_catalog(&self) -> Result<()> {
        let schemas = host_guard(self.host.as_ref(), "list_schemas", || {
            self.host.list_schemas()
        })
        .context("list heap schemas")?;
        install_replacement_scans(&self.ctx, &self.resolver, &schemas)
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn resolver(&self) -> &ReplacementScanResolver {
        &self.resolver
    }

    pub fn config(&self) -> &HeapFusionConfig {
        &self.config
    }

    pub fn metrics(&self) -> ScanMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Plans and executes `sql`, returning the Arrow result.
    ///
    /// The statement takes one host snapshot up front; every heap scan it
    /// plans, including scans inside views and subqueries, reads under it.
    pub async fn collect(&self, sql: &str) -> DFResult<(SchemaRef, Vec<RecordBatch>)> {
        let snapshot = host_guard(self.host.as_ref(), "acquire_snapshot", || {
            self.host.acquire_snapshot()
        })?;
        let mut state = self.ctx.state();
        state
            .config_mut()
            .set_extension(Arc::new(StatementSnapshot(snapshot)));

        let plan = state.create_logical_plan(sql).await?;
        // Decision: catalog statements run against the shared context.
        let frame = match plan {
            LogicalPlan::Ddl(_) | LogicalPlan::Statement(_) => {
                self.ctx.execute_logical_plan(plan).await?
            }
            plan => DataFrame::new(state, plan),
        };
        let schema = Arc::clone(frame.schema().inner());
        let batches = frame.collect().await?;
        Ok((schema, batches))
    }

    /// Runs `sql` on behalf of the host and materializes the result as heap
    /// rows. Every failure, panics included, surfaces as a [`HostError`].
    pub async fn run_query(&self, sql: &str) -> std::result::Result<QueryResult, HostError> {
        engine_guard("run_query", async {
            let (schema, batches) = self.collect(sql).await?;
            QueryResult::materialize(&schema, &batches).map_err(DataFusionError::from)
        })
        .await
    }
}

fn default_max_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Parses an optional `usize` with fallback default.
fn parse_usize(value: Option<String>, default_value: usize) -> Result<usize> {
    match value {
        Some(raw) => raw
            .trim()
            .parse::<usize>()
            .with_context(|| format!("invalid usize value: {raw}")),
        None => Ok(default_value),
    }
}

/// Parses an optional boolean with fallback default.
fn parse_bool(value: Option<String>, default_value: bool) -> Result<bool> {
    match value.as_deref().map(str::trim) {
        Some("1") | Some("true") | Some("on") | Some("yes") => Ok(true),
        Some("0") | Some("false") | Some("off") | Some("no") => Ok(false),
        Some(raw) => Err(anyhow::anyhow!("invalid boolean value: {raw}")),
        None => Ok(default_value),
    }
}
