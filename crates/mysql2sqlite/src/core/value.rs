//! Value types flowing through the replication pipeline.
//!
//! Both sides use closed tagged enums so that the type mapper can match
//! exhaustively:
//!
//! - [`SourceValue`]: a raw value as decoded from MySQL
//! - [`TargetValue`]: one of SQLite's five storage classes
//! - [`WatermarkValue`]: the scalar a table's change cursor is made of

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};

/// Parse format for DATETIME text; the fractional second is optional.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Text format for DATE values.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parse format for TIME text; the fractional second is optional.
pub const TIME_FORMAT: &str = "%H:%M:%S%.f";

/// Canonical DATETIME text: `YYYY-MM-DD HH:MM:SS`, with `.ffffff` only when
/// the value has a fractional second.
pub fn format_datetime(v: &NaiveDateTime) -> String {
    if v.nanosecond() == 0 {
        v.format("%Y-%m-%d %H:%M:%S").to_string()
    } else {
        v.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
    }
}

/// Canonical TIME text: `HH:MM:SS`, with `.ffffff` only when needed.
pub fn format_time(v: &NaiveTime) -> String {
    if v.nanosecond() == 0 {
        v.format("%H:%M:%S").to_string()
    } else {
        v.format("%H:%M:%S%.6f").to_string()
    }
}

/// A raw column value read from the source database.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceValue {
    /// SQL NULL.
    Null,
    /// Signed integer (tinyint .. bigint).
    Int(i64),
    /// Unsigned integer; `bigint unsigned` can exceed `i64::MAX`.
    UInt(u64),
    /// Floating point (float, double).
    Float(f64),
    /// Exact decimal/numeric.
    Decimal(Decimal),
    /// Character data (char, varchar, text, enum, set, json).
    Text(String),
    /// Binary data (binary, varbinary, blob).
    Blob(Vec<u8>),
    /// Calendar date.
    Date(NaiveDate),
    /// Time of day.
    Time(NaiveTime),
    /// Timestamp without timezone (datetime, timestamp).
    DateTime(NaiveDateTime),
    /// Boolean (bit(1), tinyint(1) holding 0 or 1).
    Bool(bool),
}

impl SourceValue {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SourceValue::Null)
    }

    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            SourceValue::Null => "null",
            SourceValue::Int(_) => "integer",
            SourceValue::UInt(_) => "unsigned integer",
            SourceValue::Float(_) => "float",
            SourceValue::Decimal(_) => "decimal",
            SourceValue::Text(_) => "text",
            SourceValue::Blob(_) => "blob",
            SourceValue::Date(_) => "date",
            SourceValue::Time(_) => "time",
            SourceValue::DateTime(_) => "datetime",
            SourceValue::Bool(_) => "boolean",
        }
    }

    /// Interpret a soft-delete marker.
    ///
    /// A marker is set when it is non-NULL and not zero, false or empty.
    pub fn is_truthy(&self) -> bool {
        match self {
            SourceValue::Null => false,
            SourceValue::Int(v) => *v != 0,
            SourceValue::UInt(v) => *v != 0,
            SourceValue::Float(v) => *v != 0.0,
            SourceValue::Decimal(v) => !v.is_zero(),
            SourceValue::Text(s) => {
                let s = s.trim();
                !(s.is_empty() || s == "0" || s.eq_ignore_ascii_case("false"))
            }
            SourceValue::Blob(b) => !b.is_empty(),
            SourceValue::Date(_) | SourceValue::Time(_) | SourceValue::DateTime(_) => true,
            SourceValue::Bool(b) => *b,
        }
    }

    /// Convert to a watermark scalar, if this value can be one.
    pub fn to_watermark(&self) -> Option<WatermarkValue> {
        match self {
            SourceValue::Int(v) => Some(WatermarkValue::Integer(*v)),
            SourceValue::UInt(v) => i64::try_from(*v).ok().map(WatermarkValue::Integer),
            SourceValue::DateTime(v) => Some(WatermarkValue::Timestamp(*v)),
            SourceValue::Date(d) => Some(WatermarkValue::Timestamp(d.and_time(NaiveTime::MIN))),
            _ => None,
        }
    }
}

impl fmt::Display for SourceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceValue::Null => write!(f, "NULL"),
            SourceValue::Int(v) => write!(f, "{}", v),
            SourceValue::UInt(v) => write!(f, "{}", v),
            SourceValue::Float(v) => write!(f, "{}", v),
            SourceValue::Decimal(v) => write!(f, "{}", v),
            SourceValue::Text(v) => write!(f, "'{}'", v),
            SourceValue::Blob(v) => write!(f, "<{} bytes>", v.len()),
            SourceValue::Date(v) => write!(f, "{}", v.format(DATE_FORMAT)),
            SourceValue::Time(v) => f.write_str(&format_time(v)),
            SourceValue::DateTime(v) => f.write_str(&format_datetime(v)),
            SourceValue::Bool(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for SourceValue {
    fn from(v: i64) -> Self {
        SourceValue::Int(v)
    }
}

impl From<u64> for SourceValue {
    fn from(v: u64) -> Self {
        SourceValue::UInt(v)
    }
}

impl From<&str> for SourceValue {
    fn from(v: &str) -> Self {
        SourceValue::Text(v.to_string())
    }
}

impl From<String> for SourceValue {
    fn from(v: String) -> Self {
        SourceValue::Text(v)
    }
}

impl From<Vec<u8>> for SourceValue {
    fn from(v: Vec<u8>) -> Self {
        SourceValue::Blob(v)
    }
}

impl From<Decimal> for SourceValue {
    fn from(v: Decimal) -> Self {
        SourceValue::Decimal(v)
    }
}

impl From<NaiveDateTime> for SourceValue {
    fn from(v: NaiveDateTime) -> Self {
        SourceValue::DateTime(v)
    }
}

impl From<bool> for SourceValue {
    fn from(v: bool) -> Self {
        SourceValue::Bool(v)
    }
}

/// A value ready to be bound into a SQLite statement.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl TargetValue {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, TargetValue::Null)
    }
}

/// Scalar a table's watermark is made of.
///
/// `Integer` covers monotonic ids and the FULL-mode pass counter;
/// `Timestamp` covers updated-at style columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WatermarkValue {
    Integer(i64),
    Timestamp(NaiveDateTime),
}

impl WatermarkValue {
    /// The greater of two watermarks; keeps the stored cursor non-decreasing.
    #[must_use]
    pub fn max_with(self, other: Option<WatermarkValue>) -> WatermarkValue {
        match other {
            Some(o) if o > self => o,
            _ => self,
        }
    }

    /// Source-side value used to bind the watermark into a query.
    pub fn to_source_value(&self) -> SourceValue {
        match self {
            WatermarkValue::Integer(v) => SourceValue::Int(*v),
            WatermarkValue::Timestamp(v) => SourceValue::DateTime(*v),
        }
    }

    /// Parse the canonical timestamp text written by [`fmt::Display`].
    pub fn parse_timestamp(s: &str) -> Option<WatermarkValue> {
        NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
            .ok()
            .map(WatermarkValue::Timestamp)
    }
}

impl fmt::Display for WatermarkValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatermarkValue::Integer(v) => write!(f, "{}", v),
            WatermarkValue::Timestamp(v) => f.write_str(&format_datetime(v)),
        }
    }
}

impl Serialize for WatermarkValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn test_truthy_markers() {
        assert!(!SourceValue::Null.is_truthy());
        assert!(!SourceValue::Int(0).is_truthy());
        assert!(SourceValue::Int(1).is_truthy());
        assert!(!SourceValue::Text("".into()).is_truthy());
        assert!(!SourceValue::Text("0".into()).is_truthy());
        assert!(!SourceValue::Text("FALSE".into()).is_truthy());
        assert!(SourceValue::Text("yes".into()).is_truthy());
        assert!(SourceValue::Bool(true).is_truthy());
        assert!(SourceValue::DateTime(ts("2024-01-01 00:00:00")).is_truthy());
    }

    #[test]
    fn test_to_watermark() {
        assert_eq!(
            SourceValue::Int(250).to_watermark(),
            Some(WatermarkValue::Integer(250))
        );
        assert_eq!(SourceValue::UInt(u64::MAX).to_watermark(), None);
        assert_eq!(SourceValue::Text("x".into()).to_watermark(), None);
        assert_eq!(
            SourceValue::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()).to_watermark(),
            Some(WatermarkValue::Timestamp(ts("2024-03-01 00:00:00")))
        );
    }

    #[test]
    fn test_watermark_max_with() {
        let a = WatermarkValue::Integer(100);
        let b = WatermarkValue::Integer(250);
        assert_eq!(a.max_with(Some(b)), b);
        assert_eq!(b.max_with(Some(a)), b);
        assert_eq!(a.max_with(None), a);
    }

    #[test]
    fn test_watermark_timestamp_display_roundtrip() {
        let wm = WatermarkValue::Timestamp(ts("2024-05-06 07:08:09"));
        let text = wm.to_string();
        assert_eq!(text, "2024-05-06 07:08:09");
        assert_eq!(WatermarkValue::parse_timestamp(&text), Some(wm));
    }

    #[test]
    fn test_fractional_timestamp_roundtrip() {
        let v = NaiveDateTime::parse_from_str("2024-05-06 07:08:09.250000", DATETIME_FORMAT).unwrap();
        let wm = WatermarkValue::Timestamp(v);
        assert_eq!(wm.to_string(), "2024-05-06 07:08:09.250000");
        assert_eq!(WatermarkValue::parse_timestamp(&wm.to_string()), Some(wm));
    }

    #[test]
    fn test_watermark_serializes_as_string() {
        let json = serde_json::to_string(&WatermarkValue::Integer(42)).unwrap();
        assert_eq!(json, "\"42\"");
    }

    #[test]
    fn test_source_value_display() {
        assert_eq!(SourceValue::Text("a@b".into()).to_string(), "'a@b'");
        assert_eq!(SourceValue::Blob(vec![1, 2]).to_string(), "<2 bytes>");
        assert_eq!(SourceValue::Null.to_string(), "NULL");
    }
}
