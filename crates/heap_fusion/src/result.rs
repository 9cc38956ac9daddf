//! Materialization of engine results back into heap output slots.

use datafusion::arrow::datatypes::Schema;
use datafusion::arrow::record_batch::RecordBatch;
use heap_store::{OutputSlot, TypeOid};

use crate::convert::columnar_to_row;
use crate::error::BridgeError;
use crate::types::row_store_type_for_field;

/// Result column as seen by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultColumn {
    /// Output column name as planned by DataFusion.
    pub name: String,
    /// Heap type the column's values are materialized as.
    pub type_oid: TypeOid,
}

/// Fully materialized query result in heap representation.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    /// Result columns in output order.
    pub columns: Vec<ResultColumn>,
    /// One output slot per result row, in batch order.
    pub rows: Vec<OutputSlot>,
}

impl QueryResult {
    /// Converts every row of `batches` into an [`OutputSlot`] typed after
    /// `schema`.
    pub fn materialize(schema: &Schema, batches: &[RecordBatch]) -> Result<Self, BridgeError> {
        let columns = schema
            .fields()
            .iter()
            .map(|field| {
                Ok(ResultColumn {
                    name: field.name().clone(),
                    type_oid: row_store_type_for_field(field)?,
                })
            })
            .collect::<Result<Vec<_>, BridgeError>>()?;
        let types = columns.iter().map(|column| column.type_oid).collect::<Vec<_>>();

        let mut rows = Vec::with_capacity(batches.iter().map(RecordBatch::num_rows).sum());
        for batch in batches {
            // Decision: every batch must match the planned result width.
            if batch.num_columns() != columns.len() {
                return Err(BridgeError::internal(format!(
                    "result batch has {} columns, expected {}",
                    batch.num_columns(),
                    columns.len()
                )));
            }
            for row in 0..batch.num_rows() {
                let mut slot = OutputSlot::new(types.clone());
                for (column, array) in batch.columns().iter().enumerate() {
                    columnar_to_row(array.as_ref(), row, &mut slot, column)?;
                }
                rows.push(slot);
            }
        }
        Ok(Self { columns, rows })
    }

    /// Number of materialized rows.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Text rendering of each row; `None` marks NULL.
    pub fn text_rows(&self) -> Vec<Vec<Option<String>>> {
        self.rows
            .iter()
            .map(|slot| {
                (0..slot.len())
                    .map(|column| slot.get(column).map(ToString::to_string))
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datafusion::arrow::array::{ArrayRef, Int32Array, StringArray};
    use datafusion::arrow::datatypes::{DataType, Field};
    use heap_store::Datum;
    use std::sync::Arc;

    #[test]
    fn batches_become_typed_slots() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("a", DataType::Int32, false),
            Field::new("b", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            Arc::clone(&schema),
            vec![
                Arc::new(Int32Array::from(vec![1, 2])) as ArrayRef,
                Arc::new(StringArray::from(vec![Some("x"), None])) as ArrayRef,
            ],
        )
        .expect("batch");

        let result = QueryResult::materialize(&schema, &[batch]).expect("materialize");
        assert_eq!(result.columns[1].type_oid, TypeOid::TEXT);
        assert_eq!(result.row_count(), 2);
        assert_eq!(result.rows[0].get(1), Some(&Datum::Text("x".into())));
        assert!(result.rows[1].is_null(1));
        assert_eq!(
            result.text_rows(),
            vec![
                vec![Some("1".to_string()), Some("x".to_string())],
                vec![Some("2".to_string()), None],
            ]
        );
    }
}
