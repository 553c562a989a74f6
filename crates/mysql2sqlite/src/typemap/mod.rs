//! Type mapping between MySQL values and SQLite storage classes.
//!
//! [`map_value`] is pure and total: every `(SourceValue, Affinity)` pair
//! either maps to a [`TargetValue`] or yields a [`TypeMappingError`] naming
//! what would be lost. Nothing is silently truncated.

use chrono::{NaiveDateTime, NaiveTime, Timelike};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::core::value::{format_datetime, format_time, DATE_FORMAT};
use crate::core::{Affinity, ColumnSpec, SourceType, SourceValue, TargetValue};
use crate::error::TypeMappingError;

/// Largest magnitude an f64 holds with integer precision.
const MAX_EXACT_F64_INT: u64 = 1 << 53;

/// Significant decimal digits an f64 always preserves.
const MAX_EXACT_F64_DIGITS: u32 = 15;

/// Affinity a bootstrapped replica column gets for a source type.
pub fn natural_affinity(source_type: SourceType) -> Affinity {
    match source_type {
        SourceType::Integer { .. } | SourceType::Boolean => Affinity::Integer,
        SourceType::Float => Affinity::Real,
        SourceType::Blob => Affinity::Blob,
        // Decimal text keeps scale and precision beyond 15 digits.
        SourceType::Decimal { .. }
        | SourceType::Text
        | SourceType::Date
        | SourceType::Time
        | SourceType::DateTime => Affinity::Text,
    }
}

/// Declared SQLite type for a bootstrapped replica column.
pub fn sqlite_decl(source_type: SourceType) -> &'static str {
    natural_affinity(source_type).declared_name()
}

/// Whether a replica column of `affinity` stores values of `source_type`
/// without changing their meaning. Anything else is reported as drift.
pub fn is_compatible(source_type: SourceType, affinity: Affinity) -> bool {
    if affinity == Affinity::Blob {
        // No affinity: values are stored exactly as bound.
        return true;
    }
    match source_type {
        SourceType::Integer { .. } | SourceType::Boolean => {
            matches!(affinity, Affinity::Integer | Affinity::Numeric)
        }
        SourceType::Decimal { precision, scale } => match affinity {
            Affinity::Text | Affinity::Blob => true,
            // Every decimal of up to 15 digits survives a trip through f64.
            Affinity::Numeric | Affinity::Real => precision <= MAX_EXACT_F64_DIGITS,
            Affinity::Integer => scale == 0,
        },
        SourceType::Float => matches!(affinity, Affinity::Real | Affinity::Numeric),
        SourceType::Text => affinity == Affinity::Text,
        SourceType::Blob => false,
        SourceType::Date | SourceType::Time | SourceType::DateTime => true,
    }
}

/// Convert one source value into the storage class of the column's affinity.
///
/// NULL always maps to NULL; nullability is enforced by the applier.
pub fn map_value(
    column: &ColumnSpec,
    value: &SourceValue,
) -> std::result::Result<TargetValue, TypeMappingError> {
    let affinity = column.target_type;
    let err = |message: String| TypeMappingError::new(&column.name, message);

    match value {
        SourceValue::Null => Ok(TargetValue::Null),
        SourceValue::Int(v) => map_int(*v, affinity).map_err(err),
        SourceValue::UInt(v) => match i64::try_from(*v) {
            Ok(v) => map_int(v, affinity).map_err(err),
            Err(_) if affinity == Affinity::Text => Ok(TargetValue::Text(v.to_string())),
            Err(_) => Err(err(format!("unsigned value {} exceeds 64-bit signed range", v))),
        },
        SourceValue::Bool(b) => Ok(match affinity {
            Affinity::Real => TargetValue::Real(if *b { 1.0 } else { 0.0 }),
            Affinity::Text => TargetValue::Text(if *b { "1" } else { "0" }.to_string()),
            Affinity::Integer | Affinity::Numeric | Affinity::Blob => {
                TargetValue::Integer(i64::from(*b))
            }
        }),
        SourceValue::Float(v) => map_float(*v, affinity).map_err(err),
        SourceValue::Decimal(d) => map_decimal(d, affinity).map_err(err),
        SourceValue::Text(s) => match affinity {
            Affinity::Integer | Affinity::Real | Affinity::Numeric if is_numeric_literal(s) => {
                Err(err(format!(
                    "text '{}' would be converted to a number by {} affinity",
                    s, affinity
                )))
            }
            _ => Ok(TargetValue::Text(s.clone())),
        },
        SourceValue::Blob(b) => Ok(TargetValue::Blob(b.clone())),
        SourceValue::Date(d) => {
            let text = d.format(DATE_FORMAT).to_string();
            map_temporal(text, d.and_time(NaiveTime::MIN), affinity).map_err(err)
        }
        SourceValue::DateTime(dt) => map_temporal(format_datetime(dt), *dt, affinity).map_err(err),
        SourceValue::Time(t) => {
            let secs = i64::from(t.num_seconds_from_midnight());
            let micros = t.nanosecond() / 1_000;
            match affinity {
                Affinity::Text | Affinity::Numeric | Affinity::Blob => {
                    Ok(TargetValue::Text(format_time(t)))
                }
                Affinity::Integer if t.nanosecond() == 0 => Ok(TargetValue::Integer(secs)),
                Affinity::Integer => Err(err(format!(
                    "time {} has sub-second precision that an INTEGER column would drop",
                    format_time(t)
                ))),
                Affinity::Real => seconds_as_real(secs, micros).map_err(err),
            }
        }
    }
}

fn map_int(v: i64, affinity: Affinity) -> std::result::Result<TargetValue, String> {
    match affinity {
        Affinity::Integer | Affinity::Numeric | Affinity::Blob => Ok(TargetValue::Integer(v)),
        Affinity::Text => Ok(TargetValue::Text(v.to_string())),
        Affinity::Real if v.unsigned_abs() <= MAX_EXACT_F64_INT => Ok(TargetValue::Real(v as f64)),
        Affinity::Real => Err(format!("integer {} is not exactly representable as REAL", v)),
    }
}

fn map_float(v: f64, affinity: Affinity) -> std::result::Result<TargetValue, String> {
    if v.is_nan() {
        return Err("NaN cannot be stored (SQLite would store NULL)".to_string());
    }
    match affinity {
        Affinity::Real | Affinity::Numeric | Affinity::Blob => Ok(TargetValue::Real(v)),
        Affinity::Text if v.is_finite() => Ok(TargetValue::Text(v.to_string())),
        Affinity::Text => Err(format!("{} has no text representation", v)),
        Affinity::Integer => {
            // 2^63 is exact in f64; anything below it and integral fits.
            if v.fract() == 0.0 && v >= i64::MIN as f64 && v < 9_223_372_036_854_775_808.0 {
                Ok(TargetValue::Integer(v as i64))
            } else {
                Err(format!("{} is not an integer in 64-bit range", v))
            }
        }
    }
}

fn map_decimal(d: &Decimal, affinity: Affinity) -> std::result::Result<TargetValue, String> {
    match affinity {
        Affinity::Text | Affinity::Blob => Ok(TargetValue::Text(d.to_string())),
        Affinity::Integer => decimal_as_integer(d),
        Affinity::Real => decimal_as_real(d),
        // NUMERIC converts decimal text to INTEGER or REAL on its own, so
        // bind the number it would store and only when nothing is lost.
        Affinity::Numeric if d.fract().is_zero() => {
            decimal_as_integer(d).or_else(|_| decimal_as_real(d))
        }
        Affinity::Numeric => decimal_as_real(d),
    }
}

fn decimal_as_integer(d: &Decimal) -> std::result::Result<TargetValue, String> {
    if !d.fract().is_zero() {
        return Err(format!("decimal {} has a fractional part", d));
    }
    d.to_i64()
        .map(TargetValue::Integer)
        .ok_or_else(|| format!("decimal {} exceeds 64-bit integer range", d))
}

fn decimal_as_real(d: &Decimal) -> std::result::Result<TargetValue, String> {
    let f = d
        .to_f64()
        .ok_or_else(|| format!("decimal {} has no REAL equivalent", d))?;
    // Decimal equality ignores trailing zeros, so 1.50 round-trips via 1.5.
    match f.to_string().parse::<Decimal>() {
        Ok(back) if back == *d => Ok(TargetValue::Real(f)),
        _ => Err(format!("decimal {} is not exactly representable as REAL", d)),
    }
}

/// Whether SQLite would read `s` as an integer or real literal when storing
/// it in a column with INTEGER, REAL or NUMERIC affinity.
fn is_numeric_literal(s: &str) -> bool {
    let s = s.trim_matches(|c: char| c.is_ascii_whitespace());
    let s = s.strip_prefix(['+', '-']).unwrap_or(s);
    let (mantissa, exponent) = match s.find(['e', 'E']) {
        Some(pos) => (&s[..pos], Some(&s[pos + 1..])),
        None => (s, None),
    };

    let (whole, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    if whole.is_empty() && fraction.is_empty() {
        return false;
    }
    if !all_digits(whole) || !all_digits(fraction) {
        return false;
    }

    match exponent {
        None => true,
        Some(exp) => {
            let digits = exp.strip_prefix(['+', '-']).unwrap_or(exp);
            !digits.is_empty() && all_digits(digits)
        }
    }
}

fn map_temporal(
    text: String,
    dt: NaiveDateTime,
    affinity: Affinity,
) -> std::result::Result<TargetValue, String> {
    let utc = dt.and_utc();
    let secs = utc.timestamp();
    let micros = utc.timestamp_subsec_micros();
    match affinity {
        Affinity::Text | Affinity::Numeric | Affinity::Blob => Ok(TargetValue::Text(text)),
        Affinity::Integer if utc.timestamp_subsec_nanos() == 0 => Ok(TargetValue::Integer(secs)),
        Affinity::Integer => Err(format!(
            "{} has sub-second precision that an INTEGER column would drop",
            text
        )),
        Affinity::Real => seconds_as_real(secs, micros),
    }
}

/// Seconds plus microseconds as REAL, when the microseconds survive.
fn seconds_as_real(secs: i64, micros: u32) -> std::result::Result<TargetValue, String> {
    let f = secs as f64 + f64::from(micros) / 1_000_000.0;
    let total_micros = i128::from(secs) * 1_000_000 + i128::from(micros);
    if (f * 1_000_000.0).round() as i128 == total_micros {
        Ok(TargetValue::Real(f))
    } else {
        Err(format!(
            "{}.{:06} seconds is not exactly representable as REAL",
            secs, micros
        ))
    }
}
