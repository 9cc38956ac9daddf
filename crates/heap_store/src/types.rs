//! Row-store type identifiers, type modifiers and the in-memory datum model.
//!
//! Temporal values use the host's own epoch (2000-01-01), in days for `date`
//! and microseconds for `timestamp`/`timestamptz`. Nothing in this module knows
//! about any other epoch.

use std::fmt;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// Size of the variable-length header folded into type modifiers.
pub const VARHDRSZ: i32 = 4;

/// Julian day number of the host epoch (2000-01-01).
pub const POSTGRES_EPOCH_JDATE: i32 = 2_451_545;
/// Smallest valid `date`, in days since the host epoch (4714-11-24 BC).
pub const DATE_MIN_DAYS: i32 = -POSTGRES_EPOCH_JDATE;
/// Exclusive upper bound of valid `date` values, in days since the host epoch.
pub const DATE_END_DAYS: i32 = 2_147_483_494 - POSTGRES_EPOCH_JDATE;
/// `-infinity` date marker.
pub const DATE_NOBEGIN: i32 = i32::MIN;
/// `infinity` date marker.
pub const DATE_NOEND: i32 = i32::MAX;

/// Smallest valid timestamp, in microseconds since the host epoch.
pub const TIMESTAMP_MIN_MICROS: i64 = -211_813_488_000_000_000;
/// Exclusive upper bound of valid timestamps, in microseconds since the host epoch.
pub const TIMESTAMP_END_MICROS: i64 = 9_223_371_331_200_000_000;
/// `-infinity` timestamp marker.
pub const TIMESTAMP_NOBEGIN: i64 = i64::MIN;
/// `infinity` timestamp marker.
pub const TIMESTAMP_NOEND: i64 = i64::MAX;

const MICROS_PER_SECOND: i64 = 1_000_000;

/// Catalog identifier of a row-store type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeOid(pub u32);

impl TypeOid {
    pub const BOOL: TypeOid = TypeOid(16);
    pub const BYTEA: TypeOid = TypeOid(17);
    pub const INT8: TypeOid = TypeOid(20);
    pub const INT2: TypeOid = TypeOid(21);
    pub const INT4: TypeOid = TypeOid(23);
    pub const TEXT: TypeOid = TypeOid(25);
    pub const JSON: TypeOid = TypeOid(114);
    pub const POINT: TypeOid = TypeOid(600);
    pub const FLOAT4: TypeOid = TypeOid(700);
    pub const FLOAT8: TypeOid = TypeOid(701);
    pub const BPCHAR: TypeOid = TypeOid(1042);
    pub const VARCHAR: TypeOid = TypeOid(1043);
    pub const DATE: TypeOid = TypeOid(1082);
    pub const TIME: TypeOid = TypeOid(1083);
    pub const TIMESTAMP: TypeOid = TypeOid(1114);
    pub const TIMESTAMPTZ: TypeOid = TypeOid(1184);
    pub const INTERVAL: TypeOid = TypeOid(1186);
    pub const NUMERIC: TypeOid = TypeOid(1700);
    pub const UUID: TypeOid = TypeOid(2950);

    /// SQL-facing type name, used in error messages.
    pub fn name(self) -> String {
        let known = match self {
            Self::BOOL => "boolean",
            Self::BYTEA => "bytea",
            Self::INT8 => "bigint",
            Self::INT2 => "smallint",
            Self::INT4 => "integer",
            Self::TEXT => "text",
            Self::JSON => "json",
            Self::POINT => "point",
            Self::FLOAT4 => "real",
            Self::FLOAT8 => "double precision",
            Self::BPCHAR => "character",
            Self::VARCHAR => "character varying",
            Self::DATE => "date",
            Self::TIME => "time without time zone",
            Self::TIMESTAMP => "timestamp without time zone",
            Self::TIMESTAMPTZ => "timestamp with time zone",
            Self::INTERVAL => "interval",
            Self::NUMERIC => "numeric",
            Self::UUID => "uuid",
            _ => return format!("type oid {}", self.0),
        };
        known.to_string()
    }

    /// Parses the type names accepted by seed files.
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized = name.trim().to_ascii_lowercase();
        let oid = match normalized.as_str() {
            "bool" | "boolean" => Self::BOOL,
            "bytea" => Self::BYTEA,
            "int8" | "bigint" => Self::INT8,
            "int2" | "smallint" => Self::INT2,
            "int4" | "int" | "integer" => Self::INT4,
            "text" => Self::TEXT,
            "json" => Self::JSON,
            "point" => Self::POINT,
            "float4" | "real" => Self::FLOAT4,
            "float8" | "double precision" => Self::FLOAT8,
            "bpchar" | "char" | "character" => Self::BPCHAR,
            "varchar" | "character varying" => Self::VARCHAR,
            "date" => Self::DATE,
            "time" => Self::TIME,
            "timestamp" => Self::TIMESTAMP,
            "timestamptz" => Self::TIMESTAMPTZ,
            "interval" => Self::INTERVAL,
            "numeric" | "decimal" => Self::NUMERIC,
            "uuid" => Self::UUID,
            _ => return None,
        };
        Some(oid)
    }
}

impl fmt::Display for TypeOid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Encodes `numeric(precision, scale)` as a type modifier.
pub fn numeric_typmod(precision: u8, scale: u8) -> i32 {
    ((i32::from(precision) << 16) | i32::from(scale)) + VARHDRSZ
}

/// Decodes a numeric type modifier into `(precision, scale)`.
///
/// Returns `None` for the unconstrained modifier `-1`.
pub fn decode_numeric_typmod(typmod: i32) -> Option<(u8, u8)> {
    if typmod < VARHDRSZ {
        return None;
    }
    let raw = typmod - VARHDRSZ;
    let precision = u8::try_from((raw >> 16) & 0xffff).ok()?;
    let scale = u8::try_from(raw & 0xffff).ok()?;
    Some((precision, scale))
}

/// Encodes `char(n)` / `varchar(n)` as a type modifier.
pub fn char_typmod(length: u32) -> i32 {
    i32::try_from(length)
        .unwrap_or(i32::MAX - VARHDRSZ)
        .saturating_add(VARHDRSZ)
}

/// Decodes a character type modifier into its declared length.
pub fn decode_char_typmod(typmod: i32) -> Option<u32> {
    if typmod < VARHDRSZ {
        return None;
    }
    u32::try_from(typmod - VARHDRSZ).ok()
}

/// Fixed-point numeric value: `unscaled * 10^-scale`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Numeric {
    pub unscaled: i128,
    pub scale: u8,
}

impl Numeric {
    pub fn new(unscaled: i128, scale: u8) -> Self {
        Self { unscaled, scale }
    }

    /// Parses a plain decimal literal such as `-12.340`.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let (negative, digits) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text.strip_prefix('+').unwrap_or(text)),
        };
        let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
        if int_part.is_empty() && frac_part.is_empty() {
            return None;
        }
        if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
            return None;
        }
        let scale = u8::try_from(frac_part.len()).ok()?;
        let mut unscaled: i128 = 0;
        for b in int_part.bytes().chain(frac_part.bytes()) {
            unscaled = unscaled
                .checked_mul(10)?
                .checked_add(i128::from(b - b'0'))?;
        }
        Some(Self::new(if negative { -unscaled } else { unscaled }, scale))
    }
}

impl fmt::Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale == 0 {
            return write!(f, "{}", self.unscaled);
        }
        let sign = if self.unscaled < 0 { "-" } else { "" };
        let digits = self.unscaled.unsigned_abs().to_string();
        let scale = usize::from(self.scale);
        let padded = format!("{digits:0>width$}", width = scale + 1);
        let (int_part, frac_part) = padded.split_at(padded.len() - scale);
        write!(f, "{sign}{int_part}.{frac_part}")
    }
}

/// One materialized attribute value. SQL NULL is represented by `Option::None`
/// at the tuple level, never by a datum variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Datum {
    Bool(bool),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Numeric(Numeric),
    Text(String),
    Bytea(Vec<u8>),
    /// Days since 2000-01-01.
    Date(i32),
    /// Microseconds since midnight.
    Time(i64),
    /// Microseconds since 2000-01-01 00:00:00.
    Timestamp(i64),
    /// Microseconds since 2000-01-01 00:00:00 UTC.
    TimestampTz(i64),
    Uuid([u8; 16]),
    Json(String),
    /// Value of a type the host stores but exposes only through its text form.
    Other { type_oid: TypeOid, text: String },
}

fn host_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or(NaiveDate::MIN)
}

impl Datum {
    /// Builds a `date` datum from a calendar day.
    pub fn date_from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        Self::date_from_naive(date)
    }

    /// Builds a `date` datum from a chrono date.
    pub fn date_from_naive(date: NaiveDate) -> Option<Self> {
        let days = date.signed_duration_since(host_epoch()).num_days();
        i32::try_from(days).ok().map(Datum::Date)
    }

    /// Builds a `timestamp` datum from a chrono timestamp.
    pub fn timestamp_from_naive(ts: NaiveDateTime) -> Option<Self> {
        let epoch = host_epoch().and_time(NaiveTime::MIN);
        ts.signed_duration_since(epoch)
            .num_microseconds()
            .map(Datum::Timestamp)
    }

    /// Returns the chrono date of a finite `date` datum.
    pub fn as_naive_date(&self) -> Option<NaiveDate> {
        match self {
            Datum::Date(days) if *days != DATE_NOBEGIN && *days != DATE_NOEND => {
                host_epoch().checked_add_signed(Duration::days(i64::from(*days)))
            }
            _ => None,
        }
    }

    /// Returns the chrono timestamp of a finite timestamp datum.
    pub fn as_naive_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Datum::Timestamp(micros) | Datum::TimestampTz(micros)
                if *micros != TIMESTAMP_NOBEGIN && *micros != TIMESTAMP_NOEND =>
            {
                host_epoch()
                    .and_time(NaiveTime::MIN)
                    .checked_add_signed(Duration::microseconds(*micros))
            }
            _ => None,
        }
    }

    /// Parses the text form of a value for the given column type.
    pub fn parse_text(type_oid: TypeOid, text: &str) -> Option<Self> {
        let text = text.trim();
        let datum = match type_oid {
            TypeOid::BOOL => match text.to_ascii_lowercase().as_str() {
                "t" | "true" | "yes" | "on" | "1" => Datum::Bool(true),
                "f" | "false" | "no" | "off" | "0" => Datum::Bool(false),
                _ => return None,
            },
            TypeOid::INT2 => Datum::Int16(text.parse().ok()?),
            TypeOid::INT4 => Datum::Int32(text.parse().ok()?),
            TypeOid::INT8 => Datum::Int64(text.parse().ok()?),
            TypeOid::FLOAT4 => Datum::Float32(text.parse().ok()?),
            TypeOid::FLOAT8 => Datum::Float64(text.parse().ok()?),
            TypeOid::NUMERIC => Datum::Numeric(Numeric::parse(text)?),
            TypeOid::TEXT | TypeOid::VARCHAR | TypeOid::BPCHAR => Datum::Text(text.to_string()),
            TypeOid::JSON => Datum::Json(text.to_string()),
            TypeOid::BYTEA => Datum::Bytea(decode_hex_bytea(text)?),
            TypeOid::DATE => match text {
                "infinity" => Datum::Date(DATE_NOEND),
                "-infinity" => Datum::Date(DATE_NOBEGIN),
                _ => Self::date_from_naive(NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?)?,
            },
            TypeOid::TIME => {
                let time = NaiveTime::parse_from_str(text, "%H:%M:%S%.f").ok()?;
                let micros = time
                    .signed_duration_since(NaiveTime::MIN)
                    .num_microseconds()?;
                Datum::Time(micros)
            }
            TypeOid::TIMESTAMP | TypeOid::TIMESTAMPTZ => {
                let micros = match text {
                    "infinity" => TIMESTAMP_NOEND,
                    "-infinity" => TIMESTAMP_NOBEGIN,
                    _ => {
                        let ts = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
                            .ok()?;
                        match Self::timestamp_from_naive(ts)? {
                            Datum::Timestamp(micros) => micros,
                            _ => return None,
                        }
                    }
                };
                if type_oid == TypeOid::TIMESTAMPTZ {
                    Datum::TimestampTz(micros)
                } else {
                    Datum::Timestamp(micros)
                }
            }
            TypeOid::UUID => Datum::Uuid(parse_uuid(text)?),
            other => Datum::Other {
                type_oid: other,
                text: text.to_string(),
            },
        };
        Some(datum)
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Bool(v) => f.write_str(if *v { "t" } else { "f" }),
            Datum::Int16(v) => write!(f, "{v}"),
            Datum::Int32(v) => write!(f, "{v}"),
            Datum::Int64(v) => write!(f, "{v}"),
            Datum::Float32(v) => write!(f, "{v}"),
            Datum::Float64(v) => write!(f, "{v}"),
            Datum::Numeric(v) => write!(f, "{v}"),
            Datum::Text(v) | Datum::Json(v) => f.write_str(v),
            Datum::Bytea(bytes) => {
                f.write_str("\\x")?;
                for b in bytes {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
            Datum::Date(DATE_NOEND) => f.write_str("infinity"),
            Datum::Date(DATE_NOBEGIN) => f.write_str("-infinity"),
            Datum::Date(_) => match self.as_naive_date() {
                Some(date) => write!(f, "{}", date.format("%Y-%m-%d")),
                None => f.write_str("<invalid date>"),
            },
            Datum::Time(micros) => {
                let secs = micros.div_euclid(MICROS_PER_SECOND);
                let frac = micros.rem_euclid(MICROS_PER_SECOND);
                write!(
                    f,
                    "{:02}:{:02}:{:02}",
                    secs / 3600,
                    (secs / 60) % 60,
                    secs % 60
                )?;
                if frac != 0 {
                    write!(f, ".{frac:06}")?;
                }
                Ok(())
            }
            Datum::Timestamp(TIMESTAMP_NOEND) | Datum::TimestampTz(TIMESTAMP_NOEND) => {
                f.write_str("infinity")
            }
            Datum::Timestamp(TIMESTAMP_NOBEGIN) | Datum::TimestampTz(TIMESTAMP_NOBEGIN) => {
                f.write_str("-infinity")
            }
            Datum::Timestamp(_) | Datum::TimestampTz(_) => match self.as_naive_timestamp() {
                Some(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S%.f")),
                None => f.write_str("<invalid timestamp>"),
            },
            Datum::Uuid(bytes) => {
                for (idx, b) in bytes.iter().enumerate() {
                    if matches!(idx, 4 | 6 | 8 | 10) {
                        f.write_str("-")?;
                    }
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
            Datum::Other { text, .. } => f.write_str(text),
        }
    }
}

fn decode_hex_bytea(text: &str) -> Option<Vec<u8>> {
    let hex = text.strip_prefix("\\x")?.as_bytes();
    if hex.len() % 2 != 0 {
        return None;
    }
    hex.chunks(2).map(hex_byte).collect()
}

fn parse_uuid(text: &str) -> Option<[u8; 16]> {
    let hex = text.bytes().filter(|b| *b != b'-').collect::<Vec<_>>();
    if hex.len() != 32 {
        return None;
    }
    let mut out = [0u8; 16];
    for (slot, pair) in out.iter_mut().zip(hex.chunks(2)) {
        *slot = hex_byte(pair)?;
    }
    Some(out)
}

/// Decodes two ASCII hex digits. Anything else, multi-byte UTF-8 included,
/// is rejected.
fn hex_byte(pair: &[u8]) -> Option<u8> {
    let digit = |b: u8| (b as char).to_digit(16);
    match pair {
        [hi, lo] if hi.is_ascii() && lo.is_ascii() => {
            Some((digit(*hi)? * 16 + digit(*lo)?) as u8)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_typmod_round_trip() {
        let typmod = numeric_typmod(12, 4);
        assert_eq!(decode_numeric_typmod(typmod), Some((12, 4)));
        assert_eq!(decode_numeric_typmod(-1), None);
    }

    #[test]
    fn char_typmod_round_trip() {
        assert_eq!(decode_char_typmod(char_typmod(10)), Some(10));
        assert_eq!(decode_char_typmod(-1), None);
    }

    #[test]
    fn host_epoch_is_day_zero() {
        assert_eq!(Datum::date_from_ymd(2000, 1, 1), Some(Datum::Date(0)));
        assert_eq!(Datum::date_from_ymd(1970, 1, 1), Some(Datum::Date(-10_957)));
    }

    #[test]
    fn numeric_parse_and_display() {
        let value = Numeric::parse("-12.340").expect("parse numeric");
        assert_eq!(value, Numeric::new(-12_340, 3));
        assert_eq!(value.to_string(), "-12.340");
        assert_eq!(Numeric::new(5, 2).to_string(), "0.05");
        assert!(Numeric::parse("1.2.3").is_none());
    }

    #[test]
    fn text_forms_parse_back() {
        let date = Datum::parse_text(TypeOid::DATE, "2024-02-29").expect("date");
        assert_eq!(date.to_string(), "2024-02-29");
        let ts = Datum::parse_text(TypeOid::TIMESTAMP, "2000-01-01 00:00:01").expect("ts");
        assert_eq!(ts, Datum::Timestamp(1_000_000));
        let uuid = Datum::parse_text(TypeOid::UUID, "a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11")
            .expect("uuid");
        assert_eq!(uuid.to_string(), "a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11");
        assert_eq!(
            Datum::parse_text(TypeOid::DATE, "infinity"),
            Some(Datum::Date(DATE_NOEND))
        );
    }

    #[test]
    fn non_ascii_hex_is_rejected_without_panicking() {
        assert_eq!(
            Datum::parse_text(TypeOid::BYTEA, "\\x0aff"),
            Some(Datum::Bytea(vec![0x0a, 0xff]))
        );
        assert_eq!(Datum::parse_text(TypeOid::BYTEA, "\\xaéb"), None);
        assert_eq!(Datum::parse_text(TypeOid::BYTEA, "\\x+1"), None);
        assert_eq!(
            Datum::parse_text(TypeOid::UUID, "a0eebc99-9c0b-4ef8-bb6d-6bb9bd380aé"),
            None
        );
    }
}
