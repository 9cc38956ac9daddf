//! Value conversion between heap datums and Arrow vectors.
//!
//! Heap values are always copied into Arrow-owned buffers; no vector ever
//! aliases memory of a heap tuple.

use std::sync::Arc;

use datafusion::arrow::array::{
    Array, ArrayBuilder, ArrayRef, AsArray, BinaryBuilder, BooleanBuilder, Date32Builder,
    Decimal128Builder, FixedSizeBinaryBuilder, Float32Builder, Float64Builder, Int16Builder,
    Int32Builder, Int64Builder, StringBuilder, Time64MicrosecondBuilder,
    TimestampMicrosecondBuilder,
};
use datafusion::arrow::datatypes::{
    DataType, Date32Type, Decimal128Type, Float16Type, Float32Type, Float64Type, Int16Type,
    Int32Type, Int64Type, Int8Type, Time64MicrosecondType, Time64NanosecondType,
    TimeUnit, TimestampMicrosecondType, TimestampMillisecondType, TimestampNanosecondType,
    TimestampSecondType, UInt16Type, UInt32Type, UInt64Type, UInt8Type,
};
use datafusion::common::ScalarValue;
use heap_store::{Datum, Numeric, OutputSlot, TypeOid};

use crate::error::BridgeError;
use crate::types::{
    date_to_columnar, date_to_row_store, timestamp_to_columnar, timestamp_to_row_store,
    LogicalType, LogicalTypeId,
};

enum VectorBuilder {
    Boolean(BooleanBuilder),
    Int16(Int16Builder),
    Int32(Int32Builder),
    Int64(Int64Builder),
    Float32(Float32Builder),
    Float64(Float64Builder),
    Decimal(Decimal128Builder),
    Utf8(StringBuilder),
    Binary(BinaryBuilder),
    Date32(Date32Builder),
    Time64(Time64MicrosecondBuilder),
    Timestamp(TimestampMicrosecondBuilder),
    Uuid(FixedSizeBinaryBuilder),
}

/// Typed Arrow builder for one output column of a batch.
pub struct ColumnVector {
    name: String,
    logical: LogicalType,
    builder: VectorBuilder,
}

impl std::fmt::Debug for ColumnVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnVector")
            .field("name", &self.name)
            .field("logical", &self.logical)
            .field("len", &self.len())
            .finish()
    }
}

impl ColumnVector {
    pub fn new(
        name: impl Into<String>,
        logical: &LogicalType,
        capacity: usize,
    ) -> Result<Self, BridgeError> {
        let builder = match logical.id {
            LogicalTypeId::Boolean => VectorBuilder::Boolean(BooleanBuilder::with_capacity(capacity)),
            LogicalTypeId::SmallInt => VectorBuilder::Int16(Int16Builder::with_capacity(capacity)),
            LogicalTypeId::Integer => VectorBuilder::Int32(Int32Builder::with_capacity(capacity)),
            LogicalTypeId::BigInt => VectorBuilder::Int64(Int64Builder::with_capacity(capacity)),
            LogicalTypeId::Float => VectorBuilder::Float32(Float32Builder::with_capacity(capacity)),
            LogicalTypeId::Double => VectorBuilder::Float64(Float64Builder::with_capacity(capacity)),
            LogicalTypeId::Decimal => VectorBuilder::Decimal(
                Decimal128Builder::with_capacity(capacity)
                    .with_precision_and_scale(logical.precision, logical.scale as i8)?,
            ),
            LogicalTypeId::Text
            | LogicalTypeId::Varchar
            | LogicalTypeId::Char
            | LogicalTypeId::Json
            | LogicalTypeId::Unsupported => {
                VectorBuilder::Utf8(StringBuilder::with_capacity(capacity, capacity * 16))
            }
            LogicalTypeId::Blob => {
                VectorBuilder::Binary(BinaryBuilder::with_capacity(capacity, capacity * 16))
            }
            LogicalTypeId::Date => VectorBuilder::Date32(Date32Builder::with_capacity(capacity)),
            LogicalTypeId::Time => {
                VectorBuilder::Time64(Time64MicrosecondBuilder::with_capacity(capacity))
            }
            LogicalTypeId::Timestamp => {
                VectorBuilder::Timestamp(TimestampMicrosecondBuilder::with_capacity(capacity))
            }
            LogicalTypeId::TimestampTz => VectorBuilder::Timestamp(
                TimestampMicrosecondBuilder::with_capacity(capacity).with_timezone("UTC"),
            ),
            LogicalTypeId::Uuid => {
                VectorBuilder::Uuid(FixedSizeBinaryBuilder::with_capacity(capacity, 16))
            }
        };
        Ok(Self {
            name: name.into(),
            logical: logical.clone(),
            builder,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn logical_type(&self) -> &LogicalType {
        &self.logical
    }

    /// Number of values written so far, which is the next writable offset.
    pub fn len(&self) -> usize {
        match &self.builder {
            VectorBuilder::Boolean(b) => b.len(),
            VectorBuilder::Int16(b) => b.len(),
            VectorBuilder::Int32(b) => b.len(),
            VectorBuilder::Int64(b) => b.len(),
            VectorBuilder::Float32(b) => b.len(),
            VectorBuilder::Float64(b) => b.len(),
            VectorBuilder::Decimal(b) => b.len(),
            VectorBuilder::Utf8(b) => b.len(),
            VectorBuilder::Binary(b) => b.len(),
            VectorBuilder::Date32(b) => b.len(),
            VectorBuilder::Time64(b) => b.len(),
            VectorBuilder::Timestamp(b) => b.len(),
            VectorBuilder::Uuid(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn append_null(&mut self) {
        match &mut self.builder {
            VectorBuilder::Boolean(b) => b.append_null(),
            VectorBuilder::Int16(b) => b.append_null(),
            VectorBuilder::Int32(b) => b.append_null(),
            VectorBuilder::Int64(b) => b.append_null(),
            VectorBuilder::Float32(b) => b.append_null(),
            VectorBuilder::Float64(b) => b.append_null(),
            VectorBuilder::Decimal(b) => b.append_null(),
            VectorBuilder::Utf8(b) => b.append_null(),
            VectorBuilder::Binary(b) => b.append_null(),
            VectorBuilder::Date32(b) => b.append_null(),
            VectorBuilder::Time64(b) => b.append_null(),
            VectorBuilder::Timestamp(b) => b.append_null(),
            VectorBuilder::Uuid(b) => b.append_null(),
        }
    }

    /// Hands out the filled array and leaves the builder empty for reuse.
    pub fn finish(&mut self) -> ArrayRef {
        match &mut self.builder {
            VectorBuilder::Boolean(b) => Arc::new(b.finish()),
            VectorBuilder::Int16(b) => Arc::new(b.finish()),
            VectorBuilder::Int32(b) => Arc::new(b.finish()),
            VectorBuilder::Int64(b) => Arc::new(b.finish()),
            VectorBuilder::Float32(b) => Arc::new(b.finish()),
            VectorBuilder::Float64(b) => Arc::new(b.finish()),
            VectorBuilder::Decimal(b) => Arc::new(b.finish()),
            VectorBuilder::Utf8(b) => Arc::new(b.finish()),
            VectorBuilder::Binary(b) => Arc::new(b.finish()),
            VectorBuilder::Date32(b) => Arc::new(b.finish()),
            VectorBuilder::Time64(b) => Arc::new(b.finish()),
            VectorBuilder::Timestamp(b) => Arc::new(b.finish()),
            VectorBuilder::Uuid(b) => Arc::new(b.finish()),
        }
    }

    fn mismatch(&self, datum: &Datum) -> BridgeError {
        BridgeError::conversion(
            &self.name,
            format!("expected a {} value, found {datum:?}", self.logical.source),
        )
    }

    fn out_of_range(&self, datum: &Datum) -> BridgeError {
        BridgeError::conversion(
            &self.name,
            format!("{} value {datum} is out of range", self.logical.source),
        )
    }
}

/// Writes one heap value into `vector` at `offset`.
///
/// `None` appends SQL NULL. Offsets must be written in order.
pub fn row_to_columnar(
    datum: Option<&Datum>,
    vector: &mut ColumnVector,
    offset: usize,
) -> Result<(), BridgeError> {
    if offset != vector.len() {
        return Err(BridgeError::conversion(
            &vector.name,
            format!("write at offset {offset} but vector holds {} values", vector.len()),
        ));
    }
    let Some(datum) = datum else {
        vector.append_null();
        return Ok(());
    };
    if vector.logical.id == LogicalTypeId::Unsupported {
        return Err(BridgeError::unsupported(vector.logical.source.name()));
    }

    match (&mut vector.builder, datum) {
        (VectorBuilder::Boolean(b), Datum::Bool(v)) => b.append_value(*v),
        (VectorBuilder::Int16(b), Datum::Int16(v)) => b.append_value(*v),
        (VectorBuilder::Int32(b), Datum::Int32(v)) => b.append_value(*v),
        (VectorBuilder::Int64(b), Datum::Int64(v)) => b.append_value(*v),
        (VectorBuilder::Float32(b), Datum::Float32(v)) => b.append_value(*v),
        (VectorBuilder::Float64(b), Datum::Float64(v)) => b.append_value(*v),
        (VectorBuilder::Decimal(b), Datum::Numeric(n)) => {
            // Decision: digits beyond the column scale fail the row.
            if n.scale > vector.logical.scale && !drops_no_digits(*n, vector.logical.scale) {
                return Err(BridgeError::conversion(
                    &vector.name,
                    format!(
                        "{} value {datum} has more than {} fractional digits",
                        vector.logical.source, vector.logical.scale
                    ),
                ));
            }
            let value = rescale(*n, vector.logical.scale)
                .filter(|v| fits_precision(*v, vector.logical.precision));
            match value {
                Some(v) => b.append_value(v),
                None => return Err(vector.out_of_range(datum)),
            }
        }
        (VectorBuilder::Utf8(b), Datum::Text(text)) => match vector.logical.length {
            Some(length) if vector.logical.id == LogicalTypeId::Char => {
                b.append_value(pad_bpchar(text, length as usize))
            }
            _ => b.append_value(text),
        },
        (VectorBuilder::Utf8(b), Datum::Json(text)) if vector.logical.id == LogicalTypeId::Json => {
            b.append_value(text)
        }
        (VectorBuilder::Binary(b), Datum::Bytea(bytes)) => b.append_value(bytes),
        (VectorBuilder::Date32(b), Datum::Date(days)) => match date_to_columnar(*days) {
            Some(shifted) => b.append_value(shifted),
            None => return Err(vector.out_of_range(datum)),
        },
        (VectorBuilder::Time64(b), Datum::Time(micros)) => b.append_value(*micros),
        (VectorBuilder::Timestamp(b), Datum::Timestamp(micros) | Datum::TimestampTz(micros)) => {
            match timestamp_to_columnar(*micros) {
                Some(shifted) => b.append_value(shifted),
                None => return Err(vector.out_of_range(datum)),
            }
        }
        (VectorBuilder::Uuid(b), Datum::Uuid(bytes)) => b.append_value(bytes)?,
        _ => return Err(vector.mismatch(datum)),
    }
    Ok(())
}

fn pad_bpchar(text: &str, length: usize) -> String {
    let chars = text.chars().count();
    if chars >= length {
        return text.to_string();
    }
    let mut padded = String::with_capacity(text.len() + length - chars);
    padded.push_str(text);
    padded.extend(std::iter::repeat(' ').take(length - chars));
    padded
}

/// Brings `n` to `scale` digits. Shrinking the scale only drops trailing
/// zeros; callers reject anything else first.
fn rescale(n: Numeric, scale: u8) -> Option<i128> {
    if n.scale <= scale {
        let factor = 10i128.checked_pow(u32::from(scale - n.scale))?;
        return n.unscaled.checked_mul(factor);
    }
    let divisor = 10i128.checked_pow(u32::from(n.scale - scale))?;
    (n.unscaled % divisor == 0).then(|| n.unscaled / divisor)
}

/// Whether cutting `n` down to `scale` fractional digits keeps its value.
fn drops_no_digits(n: Numeric, scale: u8) -> bool {
    match 10i128.checked_pow(u32::from(n.scale.saturating_sub(scale))) {
        Some(divisor) => n.unscaled % divisor == 0,
        None => n.unscaled == 0,
    }
}

fn fits_precision(value: i128, precision: u8) -> bool {
    match 10i128.checked_pow(u32::from(precision)) {
        Some(limit) => value.unsigned_abs() < limit.unsigned_abs(),
        None => true,
    }
}

/// Reads row `row` of `array` into column `column` of an output slot.
pub fn columnar_to_row(
    array: &dyn Array,
    row: usize,
    slot: &mut OutputSlot,
    column: usize,
) -> Result<(), BridgeError> {
    let target = slot
        .types
        .get(column)
        .copied()
        .ok_or_else(|| BridgeError::internal(format!("output slot has no column {column}")))?;
    let value = if array.is_null(row) {
        None
    } else {
        Some(array_value(array, row, target).map_err(|err| match err {
            BridgeError::Conversion { message, .. } => {
                BridgeError::conversion(format!("#{}", column + 1), message)
            }
            other => other,
        })?)
    };
    slot.set(column, value);
    Ok(())
}

fn array_value(array: &dyn Array, row: usize, target: TypeOid) -> Result<Datum, BridgeError> {
    let out_of_range = |what: &str| {
        BridgeError::conversion(String::new(), format!("{what} in row {row} is out of range for {target}"))
    };
    let datum = match array.data_type() {
        DataType::Boolean => Datum::Bool(array.as_boolean().value(row)),
        DataType::Int8 => Datum::Int16(i16::from(array.as_primitive::<Int8Type>().value(row))),
        DataType::UInt8 => Datum::Int16(i16::from(array.as_primitive::<UInt8Type>().value(row))),
        DataType::Int16 => Datum::Int16(array.as_primitive::<Int16Type>().value(row)),
        DataType::UInt16 => Datum::Int32(i32::from(array.as_primitive::<UInt16Type>().value(row))),
        DataType::Int32 => Datum::Int32(array.as_primitive::<Int32Type>().value(row)),
        DataType::UInt32 => Datum::Int64(i64::from(array.as_primitive::<UInt32Type>().value(row))),
        DataType::Int64 => Datum::Int64(array.as_primitive::<Int64Type>().value(row)),
        DataType::UInt64 => Datum::Numeric(Numeric::new(
            i128::from(array.as_primitive::<UInt64Type>().value(row)),
            0,
        )),
        DataType::Float16 => Datum::Float32(array.as_primitive::<Float16Type>().value(row).to_f32()),
        DataType::Float32 => Datum::Float32(array.as_primitive::<Float32Type>().value(row)),
        DataType::Float64 => Datum::Float64(array.as_primitive::<Float64Type>().value(row)),
        DataType::Decimal128(_, scale) => {
            let unscaled = array.as_primitive::<Decimal128Type>().value(row);
            if *scale >= 0 {
                Datum::Numeric(Numeric::new(unscaled, *scale as u8))
            } else {
                let factor = 10i128
                    .checked_pow(u32::from(scale.unsigned_abs()))
                    .and_then(|factor| unscaled.checked_mul(factor))
                    .ok_or_else(|| out_of_range("decimal"))?;
                Datum::Numeric(Numeric::new(factor, 0))
            }
        }
        DataType::Utf8 => text_datum(array.as_string::<i32>().value(row), target),
        DataType::LargeUtf8 => text_datum(array.as_string::<i64>().value(row), target),
        DataType::Utf8View => text_datum(array.as_string_view().value(row), target),
        DataType::Binary => Datum::Bytea(array.as_binary::<i32>().value(row).to_vec()),
        DataType::LargeBinary => Datum::Bytea(array.as_binary::<i64>().value(row).to_vec()),
        DataType::BinaryView => Datum::Bytea(array.as_binary_view().value(row).to_vec()),
        DataType::FixedSizeBinary(16) => {
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(array.as_fixed_size_binary().value(row));
            Datum::Uuid(bytes)
        }
        DataType::Date32 => {
            let days = array.as_primitive::<Date32Type>().value(row);
            Datum::Date(date_to_row_store(days).ok_or_else(|| out_of_range("date"))?)
        }
        DataType::Time64(TimeUnit::Microsecond) => {
            Datum::Time(array.as_primitive::<Time64MicrosecondType>().value(row))
        }
        DataType::Time64(_) => Datum::Time(
            array
                .as_primitive::<Time64NanosecondType>()
                .value(row)
                .div_euclid(1_000),
        ),
        DataType::Timestamp(unit, tz) => {
            let micros = match unit {
                TimeUnit::Second => array
                    .as_primitive::<TimestampSecondType>()
                    .value(row)
                    .checked_mul(1_000_000),
                TimeUnit::Millisecond => array
                    .as_primitive::<TimestampMillisecondType>()
                    .value(row)
                    .checked_mul(1_000),
                TimeUnit::Microsecond => {
                    Some(array.as_primitive::<TimestampMicrosecondType>().value(row))
                }
                TimeUnit::Nanosecond => Some(
                    array
                        .as_primitive::<TimestampNanosecondType>()
                        .value(row)
                        .div_euclid(1_000),
                ),
            }
            .and_then(timestamp_to_row_store)
            .ok_or_else(|| out_of_range("timestamp"))?;
            if tz.is_some() || target == TypeOid::TIMESTAMPTZ {
                Datum::TimestampTz(micros)
            } else {
                Datum::Timestamp(micros)
            }
        }
        other => return Err(BridgeError::unsupported(other.to_string())),
    };
    Ok(datum)
}

fn text_datum(text: &str, target: TypeOid) -> Datum {
    if target == TypeOid::JSON {
        Datum::Json(text.to_string())
    } else {
        Datum::Text(text.to_string())
    }
}

/// Converts a filter literal to a datum of the column's heap type.
///
/// Returns `None` whenever the conversion would not be exact, in which case
/// the predicate is not forwarded to the host.
pub fn scalar_to_datum(value: &ScalarValue, target: TypeOid) -> Option<Datum> {
    let datum = match (target, value) {
        (TypeOid::BOOL, ScalarValue::Boolean(Some(v))) => Datum::Bool(*v),
        (TypeOid::INT2, v) => Datum::Int16(i16::try_from(scalar_to_i64(v)?).ok()?),
        (TypeOid::INT4, v) => Datum::Int32(i32::try_from(scalar_to_i64(v)?).ok()?),
        (TypeOid::INT8, v) => Datum::Int64(scalar_to_i64(v)?),
        (TypeOid::FLOAT4, ScalarValue::Float32(Some(v))) => Datum::Float32(*v),
        (TypeOid::FLOAT8, ScalarValue::Float64(Some(v))) => Datum::Float64(*v),
        (TypeOid::FLOAT8, ScalarValue::Float32(Some(v))) => Datum::Float64(f64::from(*v)),
        (TypeOid::NUMERIC, ScalarValue::Decimal128(Some(v), _, scale)) if *scale >= 0 => {
            Datum::Numeric(Numeric::new(*v, *scale as u8))
        }
        (TypeOid::NUMERIC, v) => Datum::Numeric(Numeric::new(i128::from(scalar_to_i64(v)?), 0)),
        (
            TypeOid::TEXT | TypeOid::VARCHAR,
            ScalarValue::Utf8(Some(s)) | ScalarValue::LargeUtf8(Some(s)) | ScalarValue::Utf8View(Some(s)),
        ) => Datum::Text(s.clone()),
        (TypeOid::BYTEA, ScalarValue::Binary(Some(bytes)) | ScalarValue::LargeBinary(Some(bytes))) => {
            Datum::Bytea(bytes.clone())
        }
        (TypeOid::DATE, ScalarValue::Date32(Some(days))) => Datum::Date(date_to_row_store(*days)?),
        (TypeOid::TIME, ScalarValue::Time64Microsecond(Some(micros))) => Datum::Time(*micros),
        (TypeOid::TIMESTAMP, ScalarValue::TimestampMicrosecond(Some(micros), None)) => {
            Datum::Timestamp(timestamp_to_row_store(*micros)?)
        }
        (TypeOid::TIMESTAMPTZ, ScalarValue::TimestampMicrosecond(Some(micros), Some(_))) => {
            Datum::TimestampTz(timestamp_to_row_store(*micros)?)
        }
        (TypeOid::UUID, ScalarValue::FixedSizeBinary(16, Some(bytes))) => {
            Datum::Uuid(bytes.as_slice().try_into().ok()?)
        }
        _ => return None,
    };
    Some(datum)
}

fn scalar_to_i64(value: &ScalarValue) -> Option<i64> {
    match value {
        ScalarValue::Int64(Some(v)) => Some(*v),
        ScalarValue::Int32(Some(v)) => Some((*v).into()),
        ScalarValue::Int16(Some(v)) => Some((*v).into()),
        ScalarValue::Int8(Some(v)) => Some((*v).into()),
        ScalarValue::UInt64(Some(v)) => i64::try_from(*v).ok(),
        ScalarValue::UInt32(Some(v)) => Some((*v).into()),
        ScalarValue::UInt16(Some(v)) => Some((*v).into()),
        ScalarValue::UInt8(Some(v)) => Some((*v).into()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::to_columnar_type;
    use datafusion::arrow::array::{Date32Array, Decimal128Array, StringArray};
    use heap_store::types::{char_typmod, numeric_typmod, DATE_END_DAYS, DATE_MIN_DAYS};

    fn vector(type_oid: TypeOid, typmod: i32) -> ColumnVector {
        ColumnVector::new("c", &to_columnar_type(type_oid, typmod), 4).expect("vector")
    }

    #[test]
    fn nulls_and_text_are_written_in_order() {
        let mut v = vector(TypeOid::TEXT, -1);
        row_to_columnar(Some(&Datum::Text("x".into())), &mut v, 0).expect("x");
        row_to_columnar(None, &mut v, 1).expect("null");
        let array = v.finish();
        let strings = array.as_any().downcast_ref::<StringArray>().expect("utf8");
        assert_eq!(strings.value(0), "x");
        assert!(strings.is_null(1));
        assert!(v.is_empty());
    }

    #[test]
    fn out_of_order_offset_is_rejected() {
        let mut v = vector(TypeOid::INT4, -1);
        let err = row_to_columnar(Some(&Datum::Int32(1)), &mut v, 3).expect_err("gap");
        assert!(matches!(err, BridgeError::Conversion { .. }));
    }

    #[test]
    fn bpchar_is_blank_padded() {
        let mut v = vector(TypeOid::BPCHAR, char_typmod(4));
        row_to_columnar(Some(&Datum::Text("ab".into())), &mut v, 0).expect("pad");
        let array = v.finish();
        assert_eq!(array.as_string::<i32>().value(0), "ab  ");
    }

    #[test]
    fn numeric_is_rescaled_and_range_checked() {
        let mut v = vector(TypeOid::NUMERIC, numeric_typmod(5, 2));
        row_to_columnar(Some(&Datum::Numeric(Numeric::new(125, 1))), &mut v, 0).expect("12.5");
        row_to_columnar(Some(&Datum::Numeric(Numeric::new(-1010, 3))), &mut v, 1).expect("-1.010");
        let err = row_to_columnar(Some(&Datum::Numeric(Numeric::new(123_456, 0))), &mut v, 2)
            .expect_err("too wide");
        assert!(matches!(err, BridgeError::Conversion { .. }));
        let err = row_to_columnar(Some(&Datum::Numeric(Numeric::new(-1005, 3))), &mut v, 2)
            .expect_err("-1.005 needs three fractional digits");
        assert!(matches!(err, BridgeError::Conversion { .. }));
        let array = v.finish();
        let decimals = array.as_any().downcast_ref::<Decimal128Array>().expect("decimal");
        assert_eq!(decimals.value(0), 1_250);
        assert_eq!(decimals.value(1), -101);
    }

    #[test]
    fn unconstrained_numeric_rejects_digits_past_its_scale() {
        let mut v = vector(TypeOid::NUMERIC, -1);
        let twelve_digits = Datum::Numeric(Numeric::new(3_141_592_653_589, 12));
        let err = row_to_columnar(Some(&twelve_digits), &mut v, 0).expect_err("lossy");
        assert!(matches!(err, BridgeError::Conversion { .. }));

        let ten_digits = Datum::Numeric(Numeric::new(31_415_926_535_000, 13));
        row_to_columnar(Some(&ten_digits), &mut v, 0).expect("trailing zeros only");
        let array = v.finish();
        let decimals = array.as_any().downcast_ref::<Decimal128Array>().expect("decimal");
        assert_eq!(decimals.value(0), 31_415_926_535);
    }

    #[test]
    fn unsupported_values_fail_but_nulls_pass() {
        let mut v = vector(TypeOid::POINT, -1);
        row_to_columnar(None, &mut v, 0).expect("null is fine");
        let datum = Datum::Other {
            type_oid: TypeOid::POINT,
            text: "(1,2)".into(),
        };
        let err = row_to_columnar(Some(&datum), &mut v, 1).expect_err("unsupported");
        assert_eq!(err, BridgeError::unsupported("point"));
    }

    #[test]
    fn dates_round_trip_through_both_conversions() {
        let days = [DATE_MIN_DAYS, -10_957, 0, 8_400, DATE_END_DAYS - 1];
        let mut v = vector(TypeOid::DATE, -1);
        for (offset, day) in days.iter().enumerate() {
            row_to_columnar(Some(&Datum::Date(*day)), &mut v, offset).expect("date");
        }
        let array = v.finish();
        let dates = array.as_any().downcast_ref::<Date32Array>().expect("date32");
        assert_eq!(dates.value(2), 10_957);
        assert_eq!(dates.value(1), 0);

        let mut slot = OutputSlot::new(vec![TypeOid::DATE]);
        for (row, day) in days.iter().enumerate() {
            columnar_to_row(array.as_ref(), row, &mut slot, 0).expect("back");
            assert_eq!(slot.get(0), Some(&Datum::Date(*day)));
        }
    }

    #[test]
    fn columnar_nulls_clear_the_slot() {
        let array = StringArray::from(vec![Some("doc"), None]);
        let mut slot = OutputSlot::new(vec![TypeOid::JSON]);
        columnar_to_row(&array, 0, &mut slot, 0).expect("json");
        assert_eq!(slot.get(0), Some(&Datum::Json("doc".into())));
        columnar_to_row(&array, 1, &mut slot, 0).expect("null");
        assert!(slot.is_null(0));
    }

    #[test]
    fn columnar_types_without_heap_equivalent_are_errors() {
        let array = datafusion::arrow::array::DurationSecondArray::from(vec![1]);
        let mut slot = OutputSlot::new(vec![TypeOid::TEXT]);
        let err = columnar_to_row(&array, 0, &mut slot, 0).expect_err("duration");
        assert!(matches!(err, BridgeError::UnsupportedType { .. }));
    }

    #[test]
    fn filter_literals_convert_only_when_exact() {
        assert_eq!(
            scalar_to_datum(&ScalarValue::Int64(Some(7)), TypeOid::INT4),
            Some(Datum::Int32(7))
        );
        assert_eq!(scalar_to_datum(&ScalarValue::Int64(Some(1 << 40)), TypeOid::INT4), None);
        assert_eq!(
            scalar_to_datum(&ScalarValue::Date32(Some(10_957)), TypeOid::DATE),
            Some(Datum::Date(0))
        );
        assert_eq!(scalar_to_datum(&ScalarValue::Float64(Some(1.5)), TypeOid::FLOAT4), None);
        assert_eq!(scalar_to_datum(&ScalarValue::Utf8(Some("x".into())), TypeOid::BPCHAR), None);
    }
}
