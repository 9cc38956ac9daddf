//! Binary entrypoint: loads a heap seed file and runs SQL against it.
//!
//! Usage: `HEAP_FUSION_SEED=seed.json heap_fusion "SELECT ..." ["SELECT ..."]`

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use heap_fusion::{HeapFusion, HeapFusionConfig};
use heap_store::{HeapStore, SeedFile};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("heap_fusion=info,heap_store=info,warn")),
        )
        .init();

    let config = HeapFusionConfig::from_env()?;
    let store = HeapStore::default();
    if let Ok(path) = std::env::var("HEAP_FUSION_SEED") {
        let seed = SeedFile::from_path(&path)?;
        store
            .load_seed(&seed)
            .with_context(|| format!("load seed file {path}"))?;
    }

    let statements = std::env::args().skip(1).collect::<Vec<_>>();
    if statements.is_empty() {
        return Err(anyhow!("usage: heap_fusion <sql> [<sql> ...]"));
    }

    let engine = HeapFusion::new(Arc::new(store), config)?;
    for sql in &statements {
        let result = engine.run_query(sql).await.map_err(|err| anyhow!(err))?;
        println!(
            "{}",
            result
                .columns
                .iter()
                .map(|column| column.name.as_str())
                .collect::<Vec<_>>()
                .join("\t")
        );
        for row in result.text_rows() {
            let cells = row
                .into_iter()
                .map(|cell| cell.unwrap_or_else(|| "NULL".to_string()))
                .collect::<Vec<_>>();
            println!("{}", cells.join("\t"));
        }
        info!(rows = result.row_count(), "statement finished");
    }
    info!(
        metrics = %serde_json::to_string(&engine.metrics())?,
        "scan metrics"
    );
    Ok(())
}
