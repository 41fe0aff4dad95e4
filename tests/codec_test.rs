//! Property tests for the column codecs.
//!
//! Uses proptest to verify lossless round trips for arbitrary data.

use proptest::prelude::*;
use tsfile::codec::encoding::{decode_times, decode_values, TimeEncoder, ValueEncoder};
use tsfile::{DataType, Encoding, Value};

/// Sorted timestamps with realistic, occasionally irregular deltas.
fn timestamp_strategy() -> impl Strategy<Value = Vec<i64>> {
    (
        0i64..1_000_000_000_000i64,
        prop::collection::vec(1i64..1_000_000_000, 1..100),
    )
        .prop_map(|(base, deltas)| {
            let mut timestamps = vec![base];
            let mut current = base;
            for delta in deltas {
                current = current.saturating_add(delta);
                timestamps.push(current);
            }
            timestamps
        })
}

fn f64_strategy() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(-1_000_000.0f64..1_000_000.0, 1..100)
}

fn i64_strategy() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(any::<i64>(), 1..100)
}

fn string_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(".{0,24}", 1..50)
}

proptest! {
    /// TS2DIFF round-trips sorted timestamps.
    #[test]
    fn test_ts2diff_time_roundtrip(timestamps in timestamp_strategy()) {
        let mut encoder = TimeEncoder::new(Encoding::Ts2Diff).unwrap();
        for &t in &timestamps {
            encoder.write(t);
        }
        let buf = encoder.finish();
        prop_assert_eq!(decode_times(Encoding::Ts2Diff, &buf).unwrap(), timestamps);
    }

    /// TS2DIFF round-trips arbitrary i64 values, not just sorted ones.
    #[test]
    fn test_ts2diff_value_roundtrip(values in i64_strategy()) {
        let mut encoder = ValueEncoder::new(DataType::I64, Encoding::Ts2Diff).unwrap();
        let expected: Vec<Value> = values.iter().map(|&v| Value::I64(v)).collect();
        for v in &expected {
            encoder.write(v).unwrap();
        }
        let buf = encoder.finish();
        prop_assert_eq!(
            decode_values(DataType::I64, Encoding::Ts2Diff, &buf).unwrap(),
            expected
        );
    }

    /// GORILLA round-trips f64 values bit-exactly.
    #[test]
    fn test_gorilla_roundtrip(values in f64_strategy()) {
        let mut encoder = ValueEncoder::new(DataType::F64, Encoding::Gorilla).unwrap();
        let expected: Vec<Value> = values.iter().map(|&v| Value::F64(v)).collect();
        for v in &expected {
            encoder.write(v).unwrap();
        }
        let buf = encoder.finish();
        prop_assert_eq!(
            decode_values(DataType::F64, Encoding::Gorilla, &buf).unwrap(),
            expected
        );
    }

    /// PLAIN round-trips strings of arbitrary content.
    #[test]
    fn test_plain_string_roundtrip(values in string_strategy()) {
        let mut encoder = ValueEncoder::new(DataType::Str, Encoding::Plain).unwrap();
        let expected: Vec<Value> = values.iter().cloned().map(Value::Str).collect();
        for v in &expected {
            encoder.write(v).unwrap();
        }
        let buf = encoder.finish();
        prop_assert_eq!(
            decode_values(DataType::Str, Encoding::Plain, &buf).unwrap(),
            expected
        );
    }
}

#[test]
fn test_ts2diff_compresses_regular_intervals() {
    let mut encoder = TimeEncoder::new(Encoding::Ts2Diff).unwrap();
    for i in 0..1000i64 {
        encoder.write(1_000_000 + i * 10);
    }
    let buf = encoder.finish();
    // constant delta collapses to one bit per point after the first two
    assert!(
        buf.len() < 200,
        "regular intervals should compress well, got {} bytes",
        buf.len()
    );
}
