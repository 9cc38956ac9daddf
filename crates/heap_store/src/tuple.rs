//! Tuple descriptors and heap tuples.

use serde::{Deserialize, Serialize};

use crate::mvcc::Xid;
use crate::types::{Datum, TypeOid};

/// One physical column of a relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub type_oid: TypeOid,
    /// Type modifier, `-1` when unconstrained.
    pub typmod: i32,
    pub not_null: bool,
    /// Dropped columns keep their physical slot but are invisible to queries.
    #[serde(default)]
    pub dropped: bool,
    /// Value reported for tuples written before this column existed.
    #[serde(default)]
    pub missing: Option<Datum>,
}

impl Attribute {
    pub fn new(name: impl Into<String>, type_oid: TypeOid) -> Self {
        Self {
            name: name.into(),
            type_oid,
            typmod: -1,
            not_null: false,
            dropped: false,
            missing: None,
        }
    }

    pub fn with_typmod(mut self, typmod: i32) -> Self {
        self.typmod = typmod;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    /// Whether tuples shorter than this attribute must report a stored value
    /// instead of NULL.
    pub fn has_missing(&self) -> bool {
        self.missing.is_some()
    }
}

/// Ordered physical layout of a relation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TupleDesc {
    pub attrs: Vec<Attribute>,
}

impl TupleDesc {
    pub fn new(attrs: Vec<Attribute>) -> Self {
        Self { attrs }
    }

    /// Number of physical attributes, dropped ones included.
    pub fn natts(&self) -> usize {
        self.attrs.len()
    }

    pub fn attr(&self, attnum: usize) -> Option<&Attribute> {
        self.attrs.get(attnum)
    }

    /// Physical ordinals of the attributes visible to queries.
    pub fn live_attnums(&self) -> impl Iterator<Item = usize> + '_ {
        self.attrs
            .iter()
            .enumerate()
            .filter(|(_, attr)| !attr.dropped)
            .map(|(idx, _)| idx)
    }

    /// Finds a live attribute by case-insensitive name.
    pub fn find_live(&self, name: &str) -> Option<usize> {
        self.live_attnums()
            .find(|idx| self.attrs[*idx].name.eq_ignore_ascii_case(name))
    }
}

/// One stored row version.
///
/// `values.len()` is the number of attributes that existed when the row was
/// written; later attributes are absent from this tuple.
#[derive(Debug, Clone, PartialEq)]
pub struct HeapTuple {
    pub xmin: Xid,
    pub xmax: Option<Xid>,
    pub values: Vec<Option<Datum>>,
}

/// Result of reading one attribute slot of a tuple.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AttrSlot<'a> {
    /// The tuple predates the attribute.
    Absent,
    Null,
    Value(&'a Datum),
}

impl HeapTuple {
    pub fn natts(&self) -> usize {
        self.values.len()
    }

    pub fn attr(&self, attnum: usize) -> AttrSlot<'_> {
        match self.values.get(attnum) {
            None => AttrSlot::Absent,
            Some(None) => AttrSlot::Null,
            Some(Some(datum)) => AttrSlot::Value(datum),
        }
    }

    /// Reads an attribute the way the host's own executor does: absent slots
    /// report the attribute's missing value.
    pub fn getattr<'a>(&'a self, desc: &'a TupleDesc, attnum: usize) -> Option<&'a Datum> {
        match self.attr(attnum) {
            AttrSlot::Value(datum) => Some(datum),
            AttrSlot::Null => None,
            AttrSlot::Absent => desc.attr(attnum).and_then(|attr| attr.missing.as_ref()),
        }
    }
}

/// Result tuple under construction, one slot per output column.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSlot {
    pub types: Vec<TypeOid>,
    pub values: Vec<Option<Datum>>,
}

impl OutputSlot {
    pub fn new(types: Vec<TypeOid>) -> Self {
        let values = vec![None; types.len()];
        Self { types, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Writes one column; `None` stores SQL NULL.
    pub fn set(&mut self, column: usize, value: Option<Datum>) -> bool {
        match self.values.get_mut(column) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn is_null(&self, column: usize) -> bool {
        matches!(self.values.get(column), Some(None))
    }

    pub fn get(&self, column: usize) -> Option<&Datum> {
        self.values.get(column).and_then(Option::as_ref)
    }

    /// Clears every column back to NULL so the slot can be reused.
    pub fn clear(&mut self) {
        self.values.iter_mut().for_each(|slot| *slot = None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_attribute_reads_missing_value() {
        let mut added = Attribute::new("c", TypeOid::INT4);
        added.missing = Some(Datum::Int32(7));
        let desc = TupleDesc::new(vec![Attribute::new("a", TypeOid::INT4), added]);
        let tuple = HeapTuple {
            xmin: Xid(1),
            xmax: None,
            values: vec![Some(Datum::Int32(1))],
        };
        assert_eq!(tuple.attr(1), AttrSlot::Absent);
        assert_eq!(tuple.getattr(&desc, 1), Some(&Datum::Int32(7)));
    }

    #[test]
    fn live_attnums_skip_dropped_columns() {
        let mut dropped = Attribute::new("b", TypeOid::TEXT);
        dropped.dropped = true;
        let desc = TupleDesc::new(vec![
            Attribute::new("a", TypeOid::INT4),
            dropped,
            Attribute::new("c", TypeOid::INT8),
        ]);
        assert_eq!(desc.live_attnums().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(desc.find_live("C"), Some(2));
        assert_eq!(desc.find_live("b"), None);
    }
}
