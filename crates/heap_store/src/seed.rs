//! JSON seed files describing schemas, tables, rows and views.
//!
//! ```json
//! {
//!   "tables": [{
//!     "name": "t",
//!     "columns": [{"name": "a", "type": "int4"}, {"name": "b", "type": "text"}],
//!     "rows": [[1, "x"], [2, null]]
//!   }],
//!   "views": [{"name": "v", "definition": "SELECT a FROM t WHERE a > 1"}]
//! }
//! ```

use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::access::QualifiedName;
use crate::store::{HeapStore, DEFAULT_SCHEMA};
use crate::tuple::Attribute;
use crate::types::{char_typmod, numeric_typmod, Datum, Numeric, TypeOid};

fn default_schema() -> String {
    DEFAULT_SCHEMA.to_string()
}

/// Top-level seed document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedFile {
    /// Schemas created before any table; `public` always exists.
    #[serde(default)]
    pub schemas: Vec<String>,
    #[serde(default)]
    pub tables: Vec<SeedTable>,
    /// Views, created after every table.
    #[serde(default)]
    pub views: Vec<SeedView>,
}

/// One table with its columns and initial rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedTable {
    #[serde(default = "default_schema")]
    pub schema: String,
    pub name: String,
    pub columns: Vec<SeedColumn>,
    /// Rows as JSON arrays, one cell per column.
    #[serde(default)]
    pub rows: Vec<Vec<Value>>,
}

/// Column declaration of a seeded table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedColumn {
    pub name: String,
    /// Host type name such as `int4`, `numeric` or `varchar`.
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub precision: Option<u8>,
    #[serde(default)]
    pub scale: Option<u8>,
    #[serde(default)]
    pub length: Option<u32>,
    #[serde(default)]
    pub not_null: bool,
}

/// View declared by its defining query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedView {
    #[serde(default = "default_schema")]
    pub schema: String,
    pub name: String,
    pub definition: String,
}

impl SeedFile {
    /// Reads and decodes a seed file from disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read seed file {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("parse seed file {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("decode seed json")
    }
}

impl SeedColumn {
    /// Builds the host attribute, encoding precision/scale or length as the
    /// type modifier.
    fn attribute(&self) -> Result<Attribute> {
        let type_oid = TypeOid::from_name(&self.type_name)
            .ok_or_else(|| anyhow!("unknown type '{}' for column '{}'", self.type_name, self.name))?;
        let typmod = match type_oid {
            TypeOid::NUMERIC => match (self.precision, self.scale) {
                (Some(precision), scale) => numeric_typmod(precision, scale.unwrap_or(0)),
                (None, None) => -1,
                (None, Some(_)) => bail!("column '{}' has a scale without precision", self.name),
            },
            TypeOid::VARCHAR | TypeOid::BPCHAR => self.length.map(char_typmod).unwrap_or(-1),
            _ => -1,
        };
        let mut attr = Attribute::new(&self.name, type_oid).with_typmod(typmod);
        attr.not_null = self.not_null;
        Ok(attr)
    }
}

/// Converts one JSON cell into a host value for a column type.
pub fn json_to_datum(type_oid: TypeOid, value: &Value) -> Result<Option<Datum>> {
    let datum = match (type_oid, value) {
        (_, Value::Null) => return Ok(None),
        (TypeOid::BOOL, Value::Bool(v)) => Datum::Bool(*v),
        (TypeOid::JSON, other) if !other.is_string() => Datum::Json(other.to_string()),
        (TypeOid::NUMERIC, Value::Number(n)) => Datum::Numeric(
            Numeric::parse(&n.to_string()).ok_or_else(|| anyhow!("invalid numeric {n}"))?,
        ),
        (_, Value::Number(n)) => Datum::parse_text(type_oid, &n.to_string())
            .ok_or_else(|| anyhow!("invalid {} value {n}", type_oid.name()))?,
        (_, Value::String(s)) => Datum::parse_text(type_oid, s)
            .ok_or_else(|| anyhow!("invalid {} value '{s}'", type_oid.name()))?,
        (_, other) => bail!("unsupported json value {other} for type {}", type_oid.name()),
    };
    Ok(Some(datum))
}

impl HeapStore {
    /// Creates every schema, table, row and view described by `seed`.
    pub fn load_seed(&self, seed: &SeedFile) -> Result<()> {
        for schema in &seed.schemas {
            self.create_schema(schema);
        }
        let mut rows_loaded = 0usize;
        for table in &seed.tables {
            self.create_schema(&table.schema);
            let attrs = table
                .columns
                .iter()
                .map(SeedColumn::attribute)
                .collect::<Result<Vec<_>>>()?;
            let types = attrs.iter().map(|attr| attr.type_oid).collect::<Vec<_>>();
            let relation = self
                .create_table(QualifiedName::new(&table.schema, &table.name), attrs)
                .with_context(|| format!("create table {}.{}", table.schema, table.name))?;
            for (row_idx, row) in table.rows.iter().enumerate() {
                if row.len() != types.len() {
                    bail!(
                        "row {row_idx} of {}.{} has {} values, expected {}",
                        table.schema,
                        table.name,
                        row.len(),
                        types.len()
                    );
                }
                let values = types
                    .iter()
                    .zip(row)
                    .map(|(type_oid, cell)| json_to_datum(*type_oid, cell))
                    .collect::<Result<Vec<_>>>()
                    .with_context(|| format!("row {row_idx} of {}.{}", table.schema, table.name))?;
                self.insert(relation, values)
                    .with_context(|| format!("insert row {row_idx} of {}.{}", table.schema, table.name))?;
                rows_loaded += 1;
            }
        }
        for view in &seed.views {
            self.create_schema(&view.schema);
            self.create_view(QualifiedName::new(&view.schema, &view.name), &view.definition)
                .with_context(|| format!("create view {}.{}", view.schema, view.name))?;
        }
        info!(
            tables = seed.tables.len(),
            views = seed.views.len(),
            rows = rows_loaded,
            "loaded heap seed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::HeapAccess;
    use std::io::Write;

    const SEED: &str = r#"{
        "tables": [{
            "name": "t",
            "columns": [
                {"name": "a", "type": "int4", "not_null": true},
                {"name": "b", "type": "text"},
                {"name": "amount", "type": "numeric", "precision": 10, "scale": 2},
                {"name": "day", "type": "date"}
            ],
            "rows": [[1, "x", 12.5, "2000-01-01"], [2, null, "3.25", null]]
        }],
        "views": [{"name": "v", "definition": "SELECT a FROM t WHERE a > 1"}]
    }"#;

    #[test]
    fn seed_file_populates_store() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(SEED.as_bytes()).expect("write seed");
        let seed = SeedFile::from_path(file.path()).expect("parse seed");

        let store = HeapStore::default();
        store.load_seed(&seed).expect("load seed");

        let table = store
            .lookup_relation(&QualifiedName::new("public", "t"))
            .expect("lookup")
            .expect("table exists");
        let desc = store.relation_descriptor(table.id).expect("descriptor");
        assert_eq!(desc.attrs[2].typmod, numeric_typmod(10, 2));
        assert!(desc.attrs[0].not_null);

        let view = store
            .lookup_relation(&QualifiedName::new("public", "v"))
            .expect("lookup")
            .expect("view exists");
        assert!(matches!(view.kind, crate::access::RelationKind::View { .. }));
    }

    #[test]
    fn json_cells_follow_column_type() {
        assert_eq!(
            json_to_datum(TypeOid::DATE, &Value::String("2000-01-01".into())).expect("date"),
            Some(Datum::Date(0))
        );
        assert_eq!(
            json_to_datum(TypeOid::INT8, &serde_json::json!(7)).expect("int8"),
            Some(Datum::Int64(7))
        );
        assert!(json_to_datum(TypeOid::INT4, &serde_json::json!("seven")).is_err());
    }

    #[test]
    fn row_width_mismatch_is_rejected() {
        let seed = SeedFile::from_json(
            r#"{"tables": [{"name": "w", "columns": [{"name": "a", "type": "int4"}], "rows": [[1, 2]]}]}"#,
        )
        .expect("parse");
        let err = HeapStore::default().load_seed(&seed).expect_err("width mismatch");
        assert!(err.to_string().contains("has 2 values"));
    }

    #[test]
    fn malformed_bytea_cell_is_an_error() {
        let seed = SeedFile::from_json(
            r#"{"tables": [{"name": "blobs", "columns": [{"name": "b", "type": "bytea"}], "rows": [["\\xaéb"]]}]}"#,
        )
        .expect("parse");
        let err = HeapStore::default().load_seed(&seed).expect_err("bad hex");
        assert!(format!("{err:#}").contains("invalid bytea value"), "{err:#}");
    }
}
