//! Replacement scans: heap tables and views as native DataFusion inputs.
//!
//! Names DataFusion cannot resolve from its own catalog are looked up in the
//! heap catalog. Tables become [`HeapTableProvider`]s; views become a
//! `ViewTable` planned from their defining query, whose own references go
//! through the same lookup again.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result as AnyResult};
use async_trait::async_trait;
use datafusion::catalog::memory::MemorySchemaProvider;
use datafusion::catalog::{SchemaProvider, TableProvider};
use datafusion::common::{DataFusionError, Result as DFResult};
use datafusion::datasource::ViewTable;
use datafusion::execution::session_state::SessionState;
use datafusion::prelude::SessionContext;
use heap_store::{HeapAccess, QualifiedName, RelationEntry, RelationKind};
use tracing::{debug, info, warn};

use crate::error::BridgeError;
use crate::metrics::ScanMetrics;
use crate::provider::{HeapTableProvider, ScanOptions};

/// Produces the current session state, or `None` once the session is gone.
pub type SessionSource = Arc<dyn Fn() -> Option<SessionState> + Send + Sync>;

/// What a heap catalog name was rewritten into.
#[derive(Debug)]
pub enum Replacement {
    Table(Arc<HeapTableProvider>),
    View {
        definition: String,
        provider: Arc<dyn TableProvider>,
    },
}

impl Replacement {
    pub fn into_provider(self) -> Arc<dyn TableProvider> {
        match self {
            Self::Table(provider) => provider as Arc<dyn TableProvider>,
            Self::View { provider, .. } => provider,
        }
    }
}

/// Resolves table references against the heap catalog.
#[derive(Clone)]
pub struct ReplacementScanResolver {
    host: Arc<dyn HeapAccess>,
    options: ScanOptions,
    metrics: Arc<ScanMetrics>,
    session: SessionSource,
}

impl fmt::Debug for ReplacementScanResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplacementScanResolver")
            .field("host", &self.host)
            .field("options", &self.options)
            .finish()
    }
}

impl ReplacementScanResolver {
    pub fn new(
        host: Arc<dyn HeapAccess>,
        options: ScanOptions,
        metrics: Arc<ScanMetrics>,
        session: SessionSource,
    ) -> Self {
        Self {
            host,
            options,
            metrics,
            session,
        }
    }

    /// Resolver that plans views with the given context's live state.
    ///
    /// Only a weak reference to the context is kept.
    pub fn for_context(
        ctx: &SessionContext,
        host: Arc<dyn HeapAccess>,
        options: ScanOptions,
        metrics: Arc<ScanMetrics>,
    ) -> Self {
        let weak = ctx.state_weak_ref();
        let session: SessionSource = Arc::new(move || {
            let state = weak.upgrade()?;
            let state = state.read().clone();
            Some(state)
        });
        Self::new(host, options, metrics, session)
    }

    /// Looks `schema.name` up in the heap catalog.
    ///
    /// Names the catalog does not know, and catalog lookups that fail, yield
    /// `Ok(None)` so DataFusion reports the reference the usual way. Errors are
    /// returned only for relations that exist but cannot be bound, such as a
    /// view whose definition does not plan.
    pub async fn resolve(
        &self,
        schema: &str,
        name: &str,
    ) -> Result<Option<Replacement>, BridgeError> {
        let qualified = QualifiedName::new(schema, name);
        // Decision: unknown names fall through to DataFusion's own error.
        let entry = match self.lookup(&qualified) {
            Some(entry) => entry,
            None => return Ok(None),
        };

        let replacement = match &entry.kind {
            RelationKind::Table => {
                let provider = HeapTableProvider::try_new(
                    Arc::clone(&self.host),
                    entry.clone(),
                    self.options,
                    Arc::clone(&self.metrics),
                )?;
                Replacement::Table(Arc::new(provider))
            }
            RelationKind::View { definition } => {
                let Some(state) = (self.session)() else {
                    debug!(relation = %entry.name, "session dropped; view not replaced");
                    return Ok(None);
                };
                let plan = state.create_logical_plan(definition).await.map_err(|err| {
                    BridgeError::internal(format!("planning view {}: {err}", entry.name))
                })?;
                Replacement::View {
                    definition: definition.clone(),
                    provider: Arc::new(ViewTable::new(plan, Some(definition.clone()))),
                }
            }
        };
        self.metrics.record_replacement();
        debug!(
            relation = %entry.name,
            view = matches!(replacement, Replacement::View { .. }),
            "resolved replacement scan"
        );
        Ok(Some(replacement))
    }

    /// Names of the relations in one heap schema.
    pub fn relation_names(&self, schema: &str) -> Vec<String> {
        match self.host.list_relations(schema) {
            Ok(entries) => entries.into_iter().map(|entry| entry.name.name).collect(),
            Err(err) => {
                self.host.flush_error_state();
                warn!(schema, error = %err, "listing heap relations failed");
                Vec::new()
            }
        }
    }

    /// Catalog lookup that flushes and logs host failures instead of
    /// returning them.
    fn lookup(&self, name: &QualifiedName) -> Option<RelationEntry> {
        match self.host.lookup_relation(name) {
            Ok(entry) => entry,
            Err(err) => {
                self.host.flush_error_state();
                warn!(relation = %name, error = %err, "heap catalog lookup failed");
                None
            }
        }
    }
}

/// Schema provider serving base tables first and heap relations second.
#[derive(Debug)]
pub struct ReplacementSchemaProvider {
    schema: String,
    base: Arc<dyn SchemaProvider>,
    resolver: ReplacementScanResolver,
}

impl ReplacementSchemaProvider {
    pub fn new(
        schema: impl Into<String>,
        base: Arc<dyn SchemaProvider>,
        resolver: ReplacementScanResolver,
    ) -> Self {
        Self {
            schema: schema.into(),
            base,
            resolver,
        }
    }
}

#[async_trait]
impl SchemaProvider for ReplacementSchemaProvider {
    fn as_any(&self) -> &dyn Any {
        self
    }

    /// Lists base tables plus every heap relation of this schema.
    fn table_names(&self) -> Vec<String> {
        let mut names = self.base.table_names();
        for name in self.resolver.relation_names(&self.schema) {
            if !names.iter().any(|existing| existing.eq_ignore_ascii_case(&name)) {
                names.push(name);
            }
        }
        names
    }

    /// Base tables first, then the heap catalog. A heap relation that exists
    /// but cannot be bound fails the lookup with its own error.
    async fn table(&self, name: &str) -> DFResult<Option<Arc<dyn TableProvider>>> {
        if let Some(table) = self.base.table(name).await? {
            return Ok(Some(table));
        }
        match self.resolver.resolve(&self.schema, name).await {
            Ok(replacement) => Ok(replacement.map(Replacement::into_provider)),
            Err(err) => {
                warn!(schema = %self.schema, table = name, error = %err, "replacement scan failed");
                Err(DataFusionError::from(err))
            }
        }
    }

    fn register_table(
        &self,
        name: String,
        table: Arc<dyn TableProvider>,
    ) -> DFResult<Option<Arc<dyn TableProvider>>> {
        self.base.register_table(name, table)
    }

    fn deregister_table(&self, name: &str) -> DFResult<Option<Arc<dyn TableProvider>>> {
        self.base.deregister_table(name)
    }

    fn table_exist(&self, name: &str) -> bool {
        self.base.table_exist(name)
            || self
                .resolver
                .relation_names(&self.schema)
                .iter()
                .any(|existing| existing.eq_ignore_ascii_case(name))
    }
}

/// Layers a [`ReplacementSchemaProvider`] over every heap schema of the
/// context's default catalog.
pub fn install_replacement_scans(
    ctx: &SessionContext,
    resolver: &ReplacementScanResolver,
    schemas: &[String],
) -> AnyResult<()> {
    let catalog_name = ctx.state().config().options().catalog.default_catalog.clone();
    let catalog = ctx
        .catalog(&catalog_name)
        .ok_or_else(|| anyhow!("catalog '{}' not found", catalog_name))?;

    for schema in schemas {
        // Decision: an installed overlay is kept; anything else becomes its base.
        let base = match catalog.schema(schema) {
            Some(base) => {
                if base.as_any().downcast_ref::<ReplacementSchemaProvider>().is_some() {
                    continue;
                }
                base
            }
            None => Arc::new(MemorySchemaProvider::new()) as Arc<dyn SchemaProvider>,
        };
        let overlay = Arc::new(ReplacementSchemaProvider::new(
            schema.clone(),
            base,
            resolver.clone(),
        ));
        catalog
            .register_schema(schema, overlay)
            .with_context(|| format!("register replacement schema '{schema}'"))?;
        info!(catalog = %catalog_name, schema = %schema, "installed replacement scans");
    }
    Ok(())
}
