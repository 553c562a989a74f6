//! Property-based tests using proptest.
//!
//! Mapper totality over each source type's natural affinity, and watermark
//! monotonicity across arbitrary pass sequences.

use chrono::{NaiveDate, NaiveDateTime};
use mysql2sqlite::apply::WatermarkPlan;
use mysql2sqlite::core::{Affinity, ColumnSpec, SourceType};
use mysql2sqlite::typemap::{map_value, natural_affinity};
use mysql2sqlite::{SourceValue, TargetValue, WatermarkValue};
use proptest::prelude::*;
use rust_decimal::Decimal;

fn natural(source_type: SourceType) -> ColumnSpec {
    ColumnSpec::new("c", source_type, natural_affinity(source_type))
}

fn datetime() -> impl Strategy<Value = NaiveDateTime> {
    (1000i32..=9999, 1u32..=12, 1u32..=28, 0u32..24, 0u32..60, 0u32..60, 0u32..1_000_000).prop_map(
        |(y, mo, d, h, mi, s, us)| {
            NaiveDate::from_ymd_opt(y, mo, d)
                .unwrap()
                .and_hms_micro_opt(h, mi, s, us)
                .unwrap()
        },
    )
}

fn watermark() -> impl Strategy<Value = WatermarkValue> {
    prop_oneof![
        any::<i64>().prop_map(WatermarkValue::Integer),
        datetime().prop_map(WatermarkValue::Timestamp),
    ]
}

// =============================================================================
// Type mapping totality
// =============================================================================

proptest! {
    /// Every signed integer lands in INTEGER unchanged.
    #[test]
    fn signed_integers_map_exactly(v in any::<i64>()) {
        let mapped = map_value(&natural(SourceType::Integer { unsigned: false }), &SourceValue::Int(v));
        prop_assert_eq!(mapped, Ok(TargetValue::Integer(v)));
    }

    /// Unsigned values up to i64::MAX fit; above it they fail instead of wrapping.
    #[test]
    fn unsigned_integers_never_wrap(v in any::<u64>()) {
        let mapped = map_value(&natural(SourceType::Integer { unsigned: true }), &SourceValue::UInt(v));
        match i64::try_from(v) {
            Ok(signed) => prop_assert_eq!(mapped, Ok(TargetValue::Integer(signed))),
            Err(_) => prop_assert!(mapped.is_err()),
        }
    }

    /// Text, including the empty string, is stored verbatim under TEXT and BLOB affinity.
    #[test]
    fn text_is_verbatim(s in ".*", affinity in prop_oneof![Just(Affinity::Text), Just(Affinity::Blob)]) {
        let column = ColumnSpec::new("c", SourceType::Text, affinity);
        prop_assert_eq!(map_value(&column, &SourceValue::Text(s.clone())), Ok(TargetValue::Text(s)));
    }

    /// Under numeric affinities, text SQLite would read as a number is refused.
    #[test]
    fn numeric_affinity_refuses_number_like_text(
        s in "[ ]?[+-]?[0-9]{1,20}(\\.[0-9]{0,20})?([eE][+-]?[0-9]{1,3})?[ ]?",
        affinity in prop_oneof![Just(Affinity::Integer), Just(Affinity::Real), Just(Affinity::Numeric)],
    ) {
        let column = ColumnSpec::new("c", SourceType::Text, affinity);
        prop_assert!(map_value(&column, &SourceValue::Text(s)).is_err());
    }

    /// Under numeric affinities, text that is not a number is kept verbatim.
    #[test]
    fn numeric_affinity_keeps_plain_text(
        s in "[a-z@_][a-z0-9@._ -]{0,30}",
        affinity in prop_oneof![Just(Affinity::Integer), Just(Affinity::Real), Just(Affinity::Numeric)],
    ) {
        let column = ColumnSpec::new("c", SourceType::Text, affinity);
        prop_assert_eq!(map_value(&column, &SourceValue::Text(s.clone())), Ok(TargetValue::Text(s)));
    }

    /// Blobs, including zero-length ones, are stored byte for byte.
    #[test]
    fn blobs_are_verbatim(b in proptest::collection::vec(any::<u8>(), 0..64)) {
        let mapped = map_value(&natural(SourceType::Blob), &SourceValue::Blob(b.clone()));
        prop_assert_eq!(mapped, Ok(TargetValue::Blob(b)));
    }

    /// Decimals keep their exact text under the natural TEXT affinity.
    #[test]
    fn decimals_keep_scale(mantissa in any::<i64>(), scale in 0u32..=18) {
        let d = Decimal::new(mantissa, scale);
        let column = natural(SourceType::Decimal { precision: 38, scale });
        prop_assert_eq!(map_value(&column, &SourceValue::Decimal(d)), Ok(TargetValue::Text(d.to_string())));
    }

    /// Finite floats are stored as REAL unchanged.
    #[test]
    fn finite_floats_map(v in any::<f64>().prop_filter("finite", |v| v.is_finite())) {
        prop_assert_eq!(map_value(&natural(SourceType::Float), &SourceValue::Float(v)), Ok(TargetValue::Real(v)));
    }

    /// Datetimes map to canonical text that parses back to the same instant.
    #[test]
    fn datetimes_round_trip_as_text(dt in datetime()) {
        let mapped = map_value(&natural(SourceType::DateTime), &SourceValue::DateTime(dt));
        match mapped {
            Ok(TargetValue::Text(text)) => {
                let back = NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S%.f").unwrap();
                prop_assert_eq!(back, dt);
            }
            other => prop_assert!(false, "unexpected mapping {:?}", other),
        }
    }

    /// NULL maps to NULL for every source type.
    #[test]
    fn null_is_total(source_type in prop_oneof![
        Just(SourceType::Integer { unsigned: false }), Just(SourceType::Boolean),
        Just(SourceType::Float), Just(SourceType::Text), Just(SourceType::Blob),
        Just(SourceType::Date), Just(SourceType::Time), Just(SourceType::DateTime),
    ]) {
        prop_assert_eq!(map_value(&natural(source_type), &SourceValue::Null), Ok(TargetValue::Null));
    }
}

// =============================================================================
// Watermark monotonicity
// =============================================================================

proptest! {
    /// Whatever each pass observes, the stored watermark never decreases.
    #[test]
    fn stored_watermark_is_non_decreasing(
        observed in proptest::collection::vec(proptest::option::of(watermark()), 1..20)
    ) {
        let mut stored: Option<WatermarkValue> = None;
        for observed in observed {
            let next = WatermarkPlan { previous: stored, observed, purge_unseen: false }.next_value();
            if let Some(previous) = stored {
                prop_assert!(next.is_some());
                prop_assert!(next.unwrap() >= previous);
            }
            stored = next;
        }
    }

    /// The canonical watermark text parses back to the same value.
    #[test]
    fn timestamp_watermark_text_round_trips(dt in datetime()) {
        let wm = WatermarkValue::Timestamp(dt);
        prop_assert_eq!(WatermarkValue::parse_timestamp(&wm.to_string()), Some(wm));
    }
}
