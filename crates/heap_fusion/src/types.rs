//! Mapping between heap column types and Arrow logical types.
//!
//! The mapping is total in the heap → Arrow direction: a column whose type has
//! no Arrow counterpart is exposed as `Utf8` tagged with
//! [`UNSUPPORTED_TYPE_METADATA`], so queries that never read it keep working.
//! Reading a non-null value of such a column fails at conversion time.

use std::collections::HashMap;

use datafusion::arrow::datatypes::{DataType, Field, TimeUnit};
use heap_store::types::{
    decode_char_typmod, decode_numeric_typmod, DATE_END_DAYS, DATE_MIN_DAYS, DATE_NOBEGIN,
    DATE_NOEND, TIMESTAMP_END_MICROS, TIMESTAMP_MIN_MICROS, TIMESTAMP_NOBEGIN, TIMESTAMP_NOEND,
};
use heap_store::{Attribute, TypeOid};

use crate::error::BridgeError;

/// Days from 1970-01-01 (Arrow) to 2000-01-01 (heap).
pub const DATE_EPOCH_OFFSET_DAYS: i32 = 10_957;
/// Microseconds from 1970-01-01 (Arrow) to 2000-01-01 (heap).
pub const TIMESTAMP_EPOCH_OFFSET_MICROS: i64 = DATE_EPOCH_OFFSET_DAYS as i64 * 86_400_000_000;

/// Field metadata key marking a column of a type the bridge cannot convert.
pub const UNSUPPORTED_TYPE_METADATA: &str = "heap.unsupported_type";
/// Field metadata key carrying the declared length of `char(n)`/`varchar(n)`.
pub const CHAR_LENGTH_METADATA: &str = "heap.char_length";
/// Field metadata key carrying the originating heap type oid.
pub const TYPE_OID_METADATA: &str = "heap.type_oid";

/// Precision and scale used for `numeric` without a modifier.
pub const UNCONSTRAINED_NUMERIC: (u8, u8) = (38, 10);
const MAX_DECIMAL128_PRECISION: u8 = 38;

/// Logical type identifiers of the columnar side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalTypeId {
    Boolean,
    SmallInt,
    Integer,
    BigInt,
    Float,
    Double,
    Decimal,
    Text,
    Varchar,
    Char,
    Blob,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Uuid,
    Json,
    /// Opaque string stand-in for heap types with no mapping.
    Unsupported,
}

/// Logical type plus the modifiers that survive the mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalType {
    pub id: LogicalTypeId,
    pub precision: u8,
    pub scale: u8,
    /// Declared length of character types.
    pub length: Option<u32>,
    /// Heap type this logical type was derived from.
    pub source: TypeOid,
}

impl LogicalType {
    fn simple(id: LogicalTypeId, source: TypeOid) -> Self {
        Self {
            id,
            precision: 0,
            scale: 0,
            length: None,
            source,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.id != LogicalTypeId::Unsupported
    }

    /// Arrow storage type of vectors holding this logical type.
    pub fn arrow_type(&self) -> DataType {
        match self.id {
            LogicalTypeId::Boolean => DataType::Boolean,
            LogicalTypeId::SmallInt => DataType::Int16,
            LogicalTypeId::Integer => DataType::Int32,
            LogicalTypeId::BigInt => DataType::Int64,
            LogicalTypeId::Float => DataType::Float32,
            LogicalTypeId::Double => DataType::Float64,
            LogicalTypeId::Decimal => DataType::Decimal128(self.precision, self.scale as i8),
            LogicalTypeId::Text
            | LogicalTypeId::Varchar
            | LogicalTypeId::Char
            | LogicalTypeId::Json
            | LogicalTypeId::Unsupported => DataType::Utf8,
            LogicalTypeId::Blob => DataType::Binary,
            LogicalTypeId::Date => DataType::Date32,
            LogicalTypeId::Time => DataType::Time64(TimeUnit::Microsecond),
            LogicalTypeId::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, None),
            LogicalTypeId::TimestampTz => {
                DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into()))
            }
            LogicalTypeId::Uuid => DataType::FixedSizeBinary(16),
        }
    }

    /// Arrow field for a column of this type, with heap metadata attached.
    pub fn field(&self, name: &str, nullable: bool) -> Field {
        let mut metadata = HashMap::new();
        metadata.insert(TYPE_OID_METADATA.to_string(), self.source.0.to_string());
        if let Some(length) = self.length {
            metadata.insert(CHAR_LENGTH_METADATA.to_string(), length.to_string());
        }
        if self.id == LogicalTypeId::Unsupported {
            metadata.insert(UNSUPPORTED_TYPE_METADATA.to_string(), self.source.name());
        }
        Field::new(name, self.arrow_type(), nullable).with_metadata(metadata)
    }
}

/// Maps a heap column type and modifier to its logical type.
pub fn to_columnar_type(type_oid: TypeOid, typmod: i32) -> LogicalType {
    let id = match type_oid {
        TypeOid::BOOL => LogicalTypeId::Boolean,
        TypeOid::INT2 => LogicalTypeId::SmallInt,
        TypeOid::INT4 => LogicalTypeId::Integer,
        TypeOid::INT8 => LogicalTypeId::BigInt,
        TypeOid::FLOAT4 => LogicalTypeId::Float,
        TypeOid::FLOAT8 => LogicalTypeId::Double,
        TypeOid::TEXT => LogicalTypeId::Text,
        TypeOid::BYTEA => LogicalTypeId::Blob,
        TypeOid::DATE => LogicalTypeId::Date,
        TypeOid::TIME => LogicalTypeId::Time,
        TypeOid::TIMESTAMP => LogicalTypeId::Timestamp,
        TypeOid::TIMESTAMPTZ => LogicalTypeId::TimestampTz,
        TypeOid::UUID => LogicalTypeId::Uuid,
        TypeOid::JSON => LogicalTypeId::Json,
        TypeOid::NUMERIC => {
            // Decision: only a negative modifier means unconstrained; an
            // undecodable one is unsupported.
            let (precision, scale) = if typmod < 0 {
                UNCONSTRAINED_NUMERIC
            } else {
                match decode_numeric_typmod(typmod) {
                    Some(modifier) => modifier,
                    None => return LogicalType::simple(LogicalTypeId::Unsupported, type_oid),
                }
            };
            if precision == 0 || precision > MAX_DECIMAL128_PRECISION || scale > precision {
                return LogicalType::simple(LogicalTypeId::Unsupported, type_oid);
            }
            return LogicalType {
                id: LogicalTypeId::Decimal,
                precision,
                scale,
                length: None,
                source: type_oid,
            };
        }
        TypeOid::VARCHAR | TypeOid::BPCHAR => {
            let id = if type_oid == TypeOid::BPCHAR {
                LogicalTypeId::Char
            } else {
                LogicalTypeId::Varchar
            };
            return LogicalType {
                length: decode_char_typmod(typmod),
                ..LogicalType::simple(id, type_oid)
            };
        }
        _ => LogicalTypeId::Unsupported,
    };
    LogicalType::simple(id, type_oid)
}

/// Maps a logical type id back to the heap type it represents.
pub fn to_row_store_type(id: LogicalTypeId) -> Result<TypeOid, BridgeError> {
    let oid = match id {
        LogicalTypeId::Boolean => TypeOid::BOOL,
        LogicalTypeId::SmallInt => TypeOid::INT2,
        LogicalTypeId::Integer => TypeOid::INT4,
        LogicalTypeId::BigInt => TypeOid::INT8,
        LogicalTypeId::Float => TypeOid::FLOAT4,
        LogicalTypeId::Double => TypeOid::FLOAT8,
        LogicalTypeId::Decimal => TypeOid::NUMERIC,
        LogicalTypeId::Text => TypeOid::TEXT,
        LogicalTypeId::Varchar => TypeOid::VARCHAR,
        LogicalTypeId::Char => TypeOid::BPCHAR,
        LogicalTypeId::Blob => TypeOid::BYTEA,
        LogicalTypeId::Date => TypeOid::DATE,
        LogicalTypeId::Time => TypeOid::TIME,
        LogicalTypeId::Timestamp => TypeOid::TIMESTAMP,
        LogicalTypeId::TimestampTz => TypeOid::TIMESTAMPTZ,
        LogicalTypeId::Uuid => TypeOid::UUID,
        LogicalTypeId::Json => TypeOid::JSON,
        LogicalTypeId::Unsupported => return Err(BridgeError::unsupported("unsupported")),
    };
    Ok(oid)
}

/// Heap type used to materialize an Arrow column of a query result.
pub fn row_store_type_for_arrow(data_type: &DataType) -> Result<TypeOid, BridgeError> {
    let oid = match data_type {
        DataType::Boolean => TypeOid::BOOL,
        DataType::Int8 | DataType::Int16 | DataType::UInt8 => TypeOid::INT2,
        DataType::Int32 | DataType::UInt16 => TypeOid::INT4,
        DataType::Int64 | DataType::UInt32 => TypeOid::INT8,
        DataType::UInt64 | DataType::Decimal128(_, _) => TypeOid::NUMERIC,
        DataType::Float16 | DataType::Float32 => TypeOid::FLOAT4,
        DataType::Float64 => TypeOid::FLOAT8,
        DataType::Null | DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => {
            TypeOid::TEXT
        }
        DataType::Binary | DataType::LargeBinary | DataType::BinaryView => TypeOid::BYTEA,
        DataType::FixedSizeBinary(16) => TypeOid::UUID,
        DataType::Date32 => TypeOid::DATE,
        DataType::Time64(_) => TypeOid::TIME,
        DataType::Timestamp(_, None) => TypeOid::TIMESTAMP,
        DataType::Timestamp(_, Some(_)) => TypeOid::TIMESTAMPTZ,
        other => return Err(BridgeError::unsupported(other.to_string())),
    };
    Ok(oid)
}

/// Heap type for a result field, honoring the heap type recorded on fields
/// that come straight from a heap column.
pub fn row_store_type_for_field(field: &Field) -> Result<TypeOid, BridgeError> {
    if let Some(type_name) = field.metadata().get(UNSUPPORTED_TYPE_METADATA) {
        return Err(BridgeError::unsupported(type_name.clone()));
    }
    let from_arrow = row_store_type_for_arrow(field.data_type())?;
    let recorded = field
        .metadata()
        .get(TYPE_OID_METADATA)
        .and_then(|raw| raw.parse::<u32>().ok())
        .map(TypeOid);
    match recorded {
        // Only trust the recorded type while the Arrow type still matches it.
        Some(oid) if to_columnar_type(oid, -1).arrow_type().equals_datatype(field.data_type()) => {
            Ok(oid)
        }
        Some(TypeOid::NUMERIC) if matches!(field.data_type(), DataType::Decimal128(_, _)) => {
            Ok(TypeOid::NUMERIC)
        }
        _ => Ok(from_arrow),
    }
}

/// Logical type of a heap attribute.
pub fn attribute_type(attr: &Attribute) -> LogicalType {
    to_columnar_type(attr.type_oid, attr.typmod)
}

/// Shifts a heap day number to an Arrow `Date32`. Infinities map to
/// themselves; `None` when the value is outside the heap's date range.
pub fn date_to_columnar(days: i32) -> Option<i32> {
    match days {
        DATE_NOBEGIN | DATE_NOEND => Some(days),
        _ if !(DATE_MIN_DAYS..DATE_END_DAYS).contains(&days) => None,
        _ => days
            .checked_add(DATE_EPOCH_OFFSET_DAYS)
            .filter(|shifted| *shifted != DATE_NOBEGIN && *shifted != DATE_NOEND),
    }
}

/// Shifts an Arrow `Date32` to a heap day number.
pub fn date_to_row_store(days: i32) -> Option<i32> {
    match days {
        DATE_NOBEGIN | DATE_NOEND => Some(days),
        _ => days
            .checked_sub(DATE_EPOCH_OFFSET_DAYS)
            .filter(|shifted| (DATE_MIN_DAYS..DATE_END_DAYS).contains(shifted)),
    }
}

/// Shifts heap microseconds to Arrow microseconds since the Unix epoch.
pub fn timestamp_to_columnar(micros: i64) -> Option<i64> {
    match micros {
        TIMESTAMP_NOBEGIN | TIMESTAMP_NOEND => Some(micros),
        _ if !(TIMESTAMP_MIN_MICROS..TIMESTAMP_END_MICROS).contains(&micros) => None,
        _ => micros
            .checked_add(TIMESTAMP_EPOCH_OFFSET_MICROS)
            .filter(|shifted| *shifted != TIMESTAMP_NOBEGIN && *shifted != TIMESTAMP_NOEND),
    }
}

/// Shifts Arrow microseconds since the Unix epoch to heap microseconds.
pub fn timestamp_to_row_store(micros: i64) -> Option<i64> {
    match micros {
        TIMESTAMP_NOBEGIN | TIMESTAMP_NOEND => Some(micros),
        _ => micros
            .checked_sub(TIMESTAMP_EPOCH_OFFSET_MICROS)
            .filter(|shifted| (TIMESTAMP_MIN_MICROS..TIMESTAMP_END_MICROS).contains(shifted)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heap_store::types::{char_typmod, numeric_typmod};

    const SUPPORTED: &[TypeOid] = &[
        TypeOid::BOOL,
        TypeOid::INT2,
        TypeOid::INT4,
        TypeOid::INT8,
        TypeOid::FLOAT4,
        TypeOid::FLOAT8,
        TypeOid::NUMERIC,
        TypeOid::TEXT,
        TypeOid::VARCHAR,
        TypeOid::BPCHAR,
        TypeOid::BYTEA,
        TypeOid::DATE,
        TypeOid::TIME,
        TypeOid::TIMESTAMP,
        TypeOid::TIMESTAMPTZ,
        TypeOid::UUID,
        TypeOid::JSON,
    ];

    #[test]
    fn every_supported_type_round_trips() {
        for oid in SUPPORTED {
            let logical = to_columnar_type(*oid, -1);
            assert!(logical.is_supported(), "{oid} should be supported");
            assert_eq!(to_row_store_type(logical.id), Ok(*oid));
        }
    }

    #[test]
    fn modifiers_are_preserved() {
        let numeric = to_columnar_type(TypeOid::NUMERIC, numeric_typmod(12, 3));
        assert_eq!((numeric.precision, numeric.scale), (12, 3));
        assert_eq!(numeric.arrow_type(), DataType::Decimal128(12, 3));

        let unconstrained = to_columnar_type(TypeOid::NUMERIC, -1);
        assert_eq!(unconstrained.arrow_type(), DataType::Decimal128(38, 10));

        let chars = to_columnar_type(TypeOid::BPCHAR, char_typmod(5));
        assert_eq!(chars.length, Some(5));
        let field = chars.field("c", true);
        assert_eq!(field.metadata().get(CHAR_LENGTH_METADATA).map(String::as_str), Some("5"));
    }

    #[test]
    fn unmapped_types_become_tagged_strings() {
        let point = to_columnar_type(TypeOid::POINT, -1);
        assert_eq!(point.id, LogicalTypeId::Unsupported);
        let field = point.field("p", true);
        assert_eq!(field.data_type(), &DataType::Utf8);
        assert!(field.metadata().contains_key(UNSUPPORTED_TYPE_METADATA));
        assert!(to_row_store_type(point.id).is_err());
        assert!(matches!(
            row_store_type_for_field(&field),
            Err(BridgeError::UnsupportedType { .. })
        ));

        let wide = to_columnar_type(TypeOid::NUMERIC, numeric_typmod(60, 2));
        assert_eq!(wide.id, LogicalTypeId::Unsupported);
        let huge = to_columnar_type(TypeOid::NUMERIC, ((300 << 16) | 2) + 4);
        assert_eq!(huge.id, LogicalTypeId::Unsupported);
    }

    #[test]
    fn recorded_heap_type_wins_for_result_fields() {
        let json = to_columnar_type(TypeOid::JSON, -1).field("doc", true);
        assert_eq!(row_store_type_for_field(&json), Ok(TypeOid::JSON));
        let plain = Field::new("x", DataType::Utf8, true);
        assert_eq!(row_store_type_for_field(&plain), Ok(TypeOid::TEXT));
        let list = DataType::List(std::sync::Arc::new(Field::new("item", DataType::Int32, true)));
        assert!(row_store_type_for_arrow(&list).is_err());
    }

    #[test]
    fn heap_epoch_is_arrow_day_10957() {
        assert_eq!(date_to_columnar(0), Some(DATE_EPOCH_OFFSET_DAYS));
        assert_eq!(date_to_row_store(0), Some(-DATE_EPOCH_OFFSET_DAYS));
        assert_eq!(date_to_columnar(DATE_NOEND), Some(DATE_NOEND));
        assert_eq!(date_to_row_store(DATE_NOBEGIN), Some(DATE_NOBEGIN));
    }

    #[test]
    fn date_boundaries_round_trip_and_overflow_is_detected() {
        for days in [DATE_MIN_DAYS, DATE_END_DAYS - 1, -1, 1] {
            let shifted = date_to_columnar(days).expect("in range");
            assert_eq!(date_to_row_store(shifted), Some(days));
        }
        assert_eq!(date_to_columnar(DATE_END_DAYS), None);
        assert_eq!(date_to_row_store(i32::MAX - 1), None);
        assert_eq!(date_to_row_store(i32::MIN + 1), None);
    }

    #[test]
    fn timestamp_shift_is_exact_and_checked() {
        assert_eq!(timestamp_to_columnar(0), Some(946_684_800_000_000));
        assert_eq!(timestamp_to_row_store(0), Some(-946_684_800_000_000));
        let min = timestamp_to_columnar(TIMESTAMP_MIN_MICROS).expect("min fits");
        assert_eq!(timestamp_to_row_store(min), Some(TIMESTAMP_MIN_MICROS));
        assert_eq!(timestamp_to_columnar(TIMESTAMP_END_MICROS - 1), None);
        assert_eq!(timestamp_to_columnar(TIMESTAMP_NOEND), Some(TIMESTAMP_NOEND));
        assert_eq!(timestamp_to_row_store(i64::MIN + 1), None);
    }
}
