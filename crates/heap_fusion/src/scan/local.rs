//! Per-worker scan state.

use heap_store::Datum;

use crate::convert::ColumnVector;
use crate::error::BridgeError;
use crate::scan::global::ScanGlobalState;

/// Scratch space and batch under construction for one worker.
#[derive(Debug)]
pub struct ScanLocalState {
    /// Values of the current row, one slot per projected column.
    pub(crate) values: Vec<Option<Datum>>,
    /// Output vectors of the in-progress batch, one per projected column.
    pub(crate) vectors: Vec<ColumnVector>,
    output_vector_size: usize,
    capacity: usize,
    exhausted: bool,
}

impl ScanLocalState {
    /// Sizes the scratch buffers to the projection of `global`. Count-only
    /// scans get no buffers at all.
    pub fn new(global: &ScanGlobalState, capacity: usize) -> Result<Self, BridgeError> {
        let capacity = capacity.max(1);
        let vectors = if global.count_only() {
            Vec::new()
        } else {
            global
                .columns()
                .projected()
                .into_iter()
                .map(|column| ColumnVector::new(&column.name, &column.logical_type, capacity))
                .collect::<Result<Vec<_>, _>>()?
        };
        Ok(Self {
            values: vec![None; vectors.len()],
            vectors,
            output_vector_size: 0,
            capacity,
            exhausted: false,
        })
    }

    /// Starts a new batch.
    pub fn reset(&mut self) {
        self.output_vector_size = 0;
        self.values.iter_mut().for_each(|value| *value = None);
    }

    /// Marks the worker's share of the scan as done. Never reverts.
    pub fn mark_exhausted(&mut self) {
        self.exhausted = true;
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Rows filled into the current batch.
    pub fn output_vector_size(&self) -> usize {
        self.output_vector_size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.output_vector_size >= self.capacity
    }

    pub(crate) fn advance(&mut self) {
        self.output_vector_size += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ScanMetrics;
    use crate::scan::global::InitInput;
    use heap_store::{Attribute, HeapAccess, HeapStore, QualifiedName, TypeOid};
    use std::sync::Arc;

    fn global(projection: Option<&[usize]>) -> ScanGlobalState {
        let store = HeapStore::default();
        let id = store
            .create_table(
                QualifiedName::new("public", "t"),
                vec![
                    Attribute::new("a", TypeOid::INT4),
                    Attribute::new("b", TypeOid::TEXT),
                ],
            )
            .expect("create");
        let entry = store
            .lookup_relation(&QualifiedName::new("public", "t"))
            .expect("lookup")
            .expect("exists");
        let desc = store.relation_descriptor(id).expect("desc");
        ScanGlobalState::init(
            Arc::new(store),
            InitInput {
                relation: &entry,
                bound_desc: &desc,
                field_attnums: &[0, 1],
                projection,
                filters: &[],
                filter_pushdown: true,
                snapshot: None,
            },
            Arc::new(ScanMetrics::default()),
        )
        .expect("init")
    }

    #[test]
    fn buffers_follow_projection() {
        let state = ScanLocalState::new(&global(Some(&[1][..])), 8).expect("local");
        assert_eq!(state.values.len(), 1);
        assert_eq!(state.vectors.len(), 1);
        assert_eq!(state.vectors[0].name(), "b");

        let count_only = ScanLocalState::new(&global(Some(&[][..])), 8).expect("local");
        assert!(count_only.values.is_empty());
        assert!(count_only.vectors.is_empty());
    }

    #[test]
    fn exhaustion_is_sticky_across_resets() {
        let mut state = ScanLocalState::new(&global(None), 2).expect("local");
        state.advance();
        state.advance();
        assert!(state.is_full());
        state.mark_exhausted();
        state.mark_exhausted();
        state.reset();
        assert_eq!(state.output_vector_size(), 0);
        assert!(state.is_exhausted());
    }
}
