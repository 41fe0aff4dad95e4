//! Per-type statistics: min/max/first/last/sum/count over a page or chunk.
//!
//! Statistics form a monoid: `update` folds one `(time, value)` point in,
//! `merge` combines two aggregates. Page statistics merge into chunk
//! statistics, chunk statistics into the per-series merged statistic of a
//! timeseries index.

use crate::codec::{write_f64, write_i64, write_var_str, write_var_u64, ByteReader};
use crate::error::Result;
use crate::schema::{DataType, TimeRange, Value};

/// Conversion and wire behaviour of one numeric primitive inside a
/// statistics block.
pub trait StatPrimitive: Copy + PartialOrd + PartialEq + std::fmt::Debug {
    /// Accumulator type of the `sum` field.
    type Sum: Copy + Default + std::ops::AddAssign + PartialEq + std::fmt::Debug;

    /// Converts a value into its sum contribution.
    fn to_sum(self) -> Self::Sum;
    /// Writes the value in its fixed-width wire form.
    fn write(out: &mut Vec<u8>, v: Self);
    /// Reads the value back.
    fn read(reader: &mut ByteReader<'_>) -> Result<Self>;
    /// Writes the sum field.
    fn write_sum(out: &mut Vec<u8>, v: Self::Sum);
    /// Reads the sum field.
    fn read_sum(reader: &mut ByteReader<'_>) -> Result<Self::Sum>;
}

impl StatPrimitive for i32 {
    type Sum = i64;

    fn to_sum(self) -> i64 {
        self as i64
    }
    fn write(out: &mut Vec<u8>, v: Self) {
        crate::codec::write_i32(out, v);
    }
    fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
        reader.read_i32()
    }
    fn write_sum(out: &mut Vec<u8>, v: i64) {
        write_i64(out, v);
    }
    fn read_sum(reader: &mut ByteReader<'_>) -> Result<i64> {
        reader.read_i64()
    }
}

impl StatPrimitive for i64 {
    type Sum = f64;

    fn to_sum(self) -> f64 {
        self as f64
    }
    fn write(out: &mut Vec<u8>, v: Self) {
        write_i64(out, v);
    }
    fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
        reader.read_i64()
    }
    fn write_sum(out: &mut Vec<u8>, v: f64) {
        write_f64(out, v);
    }
    fn read_sum(reader: &mut ByteReader<'_>) -> Result<f64> {
        reader.read_f64()
    }
}

impl StatPrimitive for f32 {
    type Sum = f64;

    fn to_sum(self) -> f64 {
        self as f64
    }
    fn write(out: &mut Vec<u8>, v: Self) {
        crate::codec::write_f32(out, v);
    }
    fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
        reader.read_f32()
    }
    fn write_sum(out: &mut Vec<u8>, v: f64) {
        write_f64(out, v);
    }
    fn read_sum(reader: &mut ByteReader<'_>) -> Result<f64> {
        reader.read_f64()
    }
}

impl StatPrimitive for f64 {
    type Sum = f64;

    fn to_sum(self) -> f64 {
        self
    }
    fn write(out: &mut Vec<u8>, v: Self) {
        write_f64(out, v);
    }
    fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
        reader.read_f64()
    }
    fn write_sum(out: &mut Vec<u8>, v: f64) {
        write_f64(out, v);
    }
    fn read_sum(reader: &mut ByteReader<'_>) -> Result<f64> {
        reader.read_f64()
    }
}

/// Common time-window fields shared by every statistics flavour.
#[derive(Debug, Clone, PartialEq)]
struct Window {
    count: u64,
    start_time: i64,
    end_time: i64,
}

impl Default for Window {
    fn default() -> Self {
        Self {
            count: 0,
            start_time: i64::MAX,
            end_time: i64::MIN,
        }
    }
}

impl Window {
    fn serialize_to(&self, out: &mut Vec<u8>) {
        write_var_u64(out, self.count);
        write_i64(out, self.start_time);
        write_i64(out, self.end_time);
    }

    fn deserialize_from(reader: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            count: reader.read_var_u64()?,
            start_time: reader.read_i64()?,
            end_time: reader.read_i64()?,
        })
    }
}

/// Statistics over one numeric column.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueStatistics<T: StatPrimitive> {
    window: Window,
    min: T,
    max: T,
    first: T,
    last: T,
    sum: T::Sum,
}

impl<T: StatPrimitive + Default> Default for ValueStatistics<T> {
    fn default() -> Self {
        Self {
            window: Window::default(),
            min: T::default(),
            max: T::default(),
            first: T::default(),
            last: T::default(),
            sum: T::Sum::default(),
        }
    }
}

impl<T: StatPrimitive + Default> ValueStatistics<T> {
    fn update(&mut self, time: i64, value: T) {
        if self.window.count == 0 {
            self.window.start_time = time;
            self.window.end_time = time;
            self.min = value;
            self.max = value;
            self.first = value;
            self.last = value;
        } else {
            if time < self.window.start_time {
                self.window.start_time = time;
                self.first = value;
            }
            if time > self.window.end_time {
                self.window.end_time = time;
                self.last = value;
            }
            if value < self.min {
                self.min = value;
            }
            if value > self.max {
                self.max = value;
            }
        }
        self.sum += value.to_sum();
        self.window.count += 1;
    }

    fn merge(&mut self, other: &Self) {
        if other.window.count == 0 {
            return;
        }
        if self.window.count == 0 {
            *self = other.clone();
            return;
        }
        if other.window.start_time < self.window.start_time {
            self.window.start_time = other.window.start_time;
            self.first = other.first;
        }
        if other.window.end_time > self.window.end_time {
            self.window.end_time = other.window.end_time;
            self.last = other.last;
        }
        if other.min < self.min {
            self.min = other.min;
        }
        if other.max > self.max {
            self.max = other.max;
        }
        self.sum += other.sum;
        self.window.count += other.window.count;
    }

    /// Smallest value seen.
    pub fn min(&self) -> T {
        self.min
    }

    /// Largest value seen.
    pub fn max(&self) -> T {
        self.max
    }

    /// Value at the earliest time.
    pub fn first(&self) -> T {
        self.first
    }

    /// Value at the latest time.
    pub fn last(&self) -> T {
        self.last
    }

    /// Sum of all values.
    pub fn sum(&self) -> T::Sum {
        self.sum
    }

    fn serialize_to(&self, out: &mut Vec<u8>) {
        self.window.serialize_to(out);
        T::write(out, self.min);
        T::write(out, self.max);
        T::write(out, self.first);
        T::write(out, self.last);
        T::write_sum(out, self.sum);
    }

    fn deserialize_from(reader: &mut ByteReader<'_>) -> Result<Self> {
        let window = Window::deserialize_from(reader)?;
        Ok(Self {
            window,
            min: T::read(reader)?,
            max: T::read(reader)?,
            first: T::read(reader)?,
            last: T::read(reader)?,
            sum: T::read_sum(reader)?,
        })
    }
}

/// Statistics over a boolean column. `sum` counts `true` values; min/max
/// are not defined for booleans.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BoolStatistics {
    window: Window,
    first: bool,
    last: bool,
    sum: i64,
}

impl BoolStatistics {
    fn update(&mut self, time: i64, value: bool) {
        if self.window.count == 0 {
            self.window.start_time = time;
            self.window.end_time = time;
            self.first = value;
            self.last = value;
        } else {
            if time < self.window.start_time {
                self.window.start_time = time;
                self.first = value;
            }
            if time > self.window.end_time {
                self.window.end_time = time;
                self.last = value;
            }
        }
        self.sum += value as i64;
        self.window.count += 1;
    }

    fn merge(&mut self, other: &Self) {
        if other.window.count == 0 {
            return;
        }
        if self.window.count == 0 {
            *self = other.clone();
            return;
        }
        if other.window.start_time < self.window.start_time {
            self.window.start_time = other.window.start_time;
            self.first = other.first;
        }
        if other.window.end_time > self.window.end_time {
            self.window.end_time = other.window.end_time;
            self.last = other.last;
        }
        self.sum += other.sum;
        self.window.count += other.window.count;
    }

    /// Number of `true` values.
    pub fn sum(&self) -> i64 {
        self.sum
    }

    fn serialize_to(&self, out: &mut Vec<u8>) {
        self.window.serialize_to(out);
        out.push(self.first as u8);
        out.push(self.last as u8);
        write_i64(out, self.sum);
    }

    fn deserialize_from(reader: &mut ByteReader<'_>) -> Result<Self> {
        let window = Window::deserialize_from(reader)?;
        Ok(Self {
            window,
            first: reader.read_u8()? != 0,
            last: reader.read_u8()? != 0,
            sum: reader.read_i64()?,
        })
    }
}

/// Statistics over a string column: first/last payloads only.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StringStatistics {
    window: Window,
    first: String,
    last: String,
}

impl StringStatistics {
    fn update(&mut self, time: i64, value: &str) {
        if self.window.count == 0 {
            self.window.start_time = time;
            self.window.end_time = time;
            self.first = value.to_string();
            self.last = value.to_string();
        } else {
            if time < self.window.start_time {
                self.window.start_time = time;
                self.first = value.to_string();
            }
            if time > self.window.end_time {
                self.window.end_time = time;
                self.last = value.to_string();
            }
        }
        self.window.count += 1;
    }

    fn merge(&mut self, other: &Self) {
        if other.window.count == 0 {
            return;
        }
        if self.window.count == 0 {
            *self = other.clone();
            return;
        }
        if other.window.start_time < self.window.start_time {
            self.window.start_time = other.window.start_time;
            self.first = other.first.clone();
        }
        if other.window.end_time > self.window.end_time {
            self.window.end_time = other.window.end_time;
            self.last = other.last.clone();
        }
        self.window.count += other.window.count;
    }

    fn serialize_to(&self, out: &mut Vec<u8>) {
        self.window.serialize_to(out);
        write_var_str(out, &self.first);
        write_var_str(out, &self.last);
    }

    fn deserialize_from(reader: &mut ByteReader<'_>) -> Result<Self> {
        let window = Window::deserialize_from(reader)?;
        Ok(Self {
            window,
            first: reader.read_var_str()?,
            last: reader.read_var_str()?,
        })
    }
}

/// Statistics over the time column alone.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TimeStatistics {
    window: Window,
}

impl TimeStatistics {
    fn update(&mut self, time: i64) {
        if self.window.count == 0 {
            self.window.start_time = time;
            self.window.end_time = time;
        } else {
            self.window.start_time = self.window.start_time.min(time);
            self.window.end_time = self.window.end_time.max(time);
        }
        self.window.count += 1;
    }

    fn merge(&mut self, other: &Self) {
        if other.window.count == 0 {
            return;
        }
        if self.window.count == 0 {
            *self = other.clone();
            return;
        }
        self.window.start_time = self.window.start_time.min(other.window.start_time);
        self.window.end_time = self.window.end_time.max(other.window.end_time);
        self.window.count += other.window.count;
    }

    fn serialize_to(&self, out: &mut Vec<u8>) {
        self.window.serialize_to(out);
    }

    fn deserialize_from(reader: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            window: Window::deserialize_from(reader)?,
        })
    }
}

/// Tagged statistics over one column of a page or chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum Statistics {
    /// Boolean column.
    Bool(BoolStatistics),
    /// i32 column.
    I32(ValueStatistics<i32>),
    /// i64 column.
    I64(ValueStatistics<i64>),
    /// f32 column.
    F32(ValueStatistics<f32>),
    /// f64 column.
    F64(ValueStatistics<f64>),
    /// String column.
    Str(StringStatistics),
    /// Time column (count and window only).
    Time(TimeStatistics),
}

impl Statistics {
    /// Empty statistics for a value column of the given type.
    pub fn for_type(data_type: DataType) -> Self {
        match data_type {
            DataType::Bool => Self::Bool(BoolStatistics::default()),
            DataType::I32 => Self::I32(ValueStatistics::default()),
            DataType::I64 => Self::I64(ValueStatistics::default()),
            DataType::F32 => Self::F32(ValueStatistics::default()),
            DataType::F64 => Self::F64(ValueStatistics::default()),
            DataType::Str => Self::Str(StringStatistics::default()),
            DataType::Vector => Self::Time(TimeStatistics::default()),
        }
    }

    /// Empty statistics for a time column.
    pub fn time() -> Self {
        Self::Time(TimeStatistics::default())
    }

    /// Folds one `(time, value)` point in.
    ///
    /// Panics if the value type does not match the statistics flavour:
    /// that is a library bug, not an input error.
    pub fn update(&mut self, time: i64, value: &Value) {
        match (self, value) {
            (Self::Bool(s), Value::Bool(v)) => s.update(time, *v),
            (Self::I32(s), Value::I32(v)) => s.update(time, *v),
            (Self::I64(s), Value::I64(v)) => s.update(time, *v),
            (Self::F32(s), Value::F32(v)) => s.update(time, *v),
            (Self::F64(s), Value::F64(v)) => s.update(time, *v),
            (Self::Str(s), Value::Str(v)) => s.update(time, v),
            (stats, value) => panic!(
                "statistics flavour {:?} fed a {} value",
                std::mem::discriminant(stats),
                value.data_type().name()
            ),
        }
    }

    /// Folds one timestamp into time statistics.
    pub fn update_time(&mut self, time: i64) {
        match self {
            Self::Time(s) => s.update(time),
            _ => panic!("update_time on value statistics"),
        }
    }

    /// Merges another aggregate of the same flavour in.
    pub fn merge(&mut self, other: &Statistics) {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.merge(b),
            (Self::I32(a), Self::I32(b)) => a.merge(b),
            (Self::I64(a), Self::I64(b)) => a.merge(b),
            (Self::F32(a), Self::F32(b)) => a.merge(b),
            (Self::F64(a), Self::F64(b)) => a.merge(b),
            (Self::Str(a), Self::Str(b)) => a.merge(b),
            (Self::Time(a), Self::Time(b)) => a.merge(b),
            _ => panic!("merging statistics of different flavours"),
        }
    }

    fn window(&self) -> &Window {
        match self {
            Self::Bool(s) => &s.window,
            Self::I32(s) => &s.window,
            Self::I64(s) => &s.window,
            Self::F32(s) => &s.window,
            Self::F64(s) => &s.window,
            Self::Str(s) => &s.window,
            Self::Time(s) => &s.window,
        }
    }

    /// Number of points folded in.
    pub fn count(&self) -> u64 {
        self.window().count
    }

    /// Earliest time seen (`i64::MAX` when empty).
    pub fn start_time(&self) -> i64 {
        self.window().start_time
    }

    /// Latest time seen (`i64::MIN` when empty).
    pub fn end_time(&self) -> i64 {
        self.window().end_time
    }

    /// True if the statistics window intersects `range`. Empty
    /// statistics never overlap.
    pub fn overlaps(&self, range: &TimeRange) -> bool {
        let w = self.window();
        w.count > 0 && range.overlaps(w.start_time, w.end_time)
    }

    /// Serializes the statistics block.
    pub fn serialize_to(&self, out: &mut Vec<u8>) {
        match self {
            Self::Bool(s) => s.serialize_to(out),
            Self::I32(s) => s.serialize_to(out),
            Self::I64(s) => s.serialize_to(out),
            Self::F32(s) => s.serialize_to(out),
            Self::F64(s) => s.serialize_to(out),
            Self::Str(s) => s.serialize_to(out),
            Self::Time(s) => s.serialize_to(out),
        }
    }

    /// Deserializes a statistics block of the flavour implied by
    /// `data_type` (`Vector` selects time statistics).
    pub fn deserialize_from(data_type: DataType, reader: &mut ByteReader<'_>) -> Result<Self> {
        Ok(match data_type {
            DataType::Bool => Self::Bool(BoolStatistics::deserialize_from(reader)?),
            DataType::I32 => Self::I32(ValueStatistics::deserialize_from(reader)?),
            DataType::I64 => Self::I64(ValueStatistics::deserialize_from(reader)?),
            DataType::F32 => Self::F32(ValueStatistics::deserialize_from(reader)?),
            DataType::F64 => Self::F64(ValueStatistics::deserialize_from(reader)?),
            DataType::Str => Self::Str(StringStatistics::deserialize_from(reader)?),
            DataType::Vector => Self::Time(TimeStatistics::deserialize_from(reader)?),
        })
    }

    /// The data type byte whose flavour this statistics block carries
    /// (`Vector` for time statistics).
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Bool(_) => DataType::Bool,
            Self::I32(_) => DataType::I32,
            Self::I64(_) => DataType::I64,
            Self::F32(_) => DataType::F32,
            Self::F64(_) => DataType::F64,
            Self::Str(_) => DataType::Str,
            Self::Time(_) => DataType::Vector,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_roundtrip(stats: &Statistics) {
        let mut buf = Vec::new();
        stats.serialize_to(&mut buf);
        let mut reader = ByteReader::new(&buf);
        let parsed = Statistics::deserialize_from(stats.data_type(), &mut reader).unwrap();
        assert_eq!(&parsed, stats);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_i64_update() {
        let mut stats = Statistics::for_type(DataType::I64);
        stats.update(10, &Value::I64(5));
        stats.update(20, &Value::I64(-3));
        stats.update(30, &Value::I64(8));

        assert_eq!(stats.count(), 3);
        assert_eq!(stats.start_time(), 10);
        assert_eq!(stats.end_time(), 30);
        if let Statistics::I64(s) = &stats {
            assert_eq!(s.min(), -3);
            assert_eq!(s.max(), 8);
            assert_eq!(s.first(), 5);
            assert_eq!(s.last(), 8);
            assert_eq!(s.sum(), 10.0);
        } else {
            unreachable!();
        }
        check_roundtrip(&stats);
    }

    #[test]
    fn test_merge_monoid_laws() {
        let mut a = Statistics::for_type(DataType::I32);
        a.update(1, &Value::I32(100));
        a.update(2, &Value::I32(50));

        let mut b = Statistics::for_type(DataType::I32);
        b.update(3, &Value::I32(-7));
        b.update(4, &Value::I32(200));

        // a ⊕ b equals folding all four points in order
        let mut merged = Statistics::for_type(DataType::I32);
        merged.merge(&a);
        merged.merge(&b);

        let mut folded = Statistics::for_type(DataType::I32);
        for (t, v) in [(1, 100), (2, 50), (3, -7), (4, 200)] {
            folded.update(t, &Value::I32(v));
        }
        assert_eq!(merged, folded);

        // identity on both sides
        let empty = Statistics::for_type(DataType::I32);
        let mut left = Statistics::for_type(DataType::I32);
        left.merge(&empty);
        left.merge(&a);
        assert_eq!(left, a);
        let mut right = a.clone();
        right.merge(&empty);
        assert_eq!(right, a);
    }

    #[test]
    fn test_merge_first_last_across_windows() {
        // b covers an earlier window than a: first must come from b
        let mut a = Statistics::for_type(DataType::F64);
        a.update(100, &Value::F64(9.0));
        let mut b = Statistics::for_type(DataType::F64);
        b.update(1, &Value::F64(7.0));

        a.merge(&b);
        if let Statistics::F64(s) = &a {
            assert_eq!(s.first(), 7.0);
            assert_eq!(s.last(), 9.0);
        } else {
            unreachable!();
        }
    }

    #[test]
    fn test_bool_sum_counts_trues() {
        let mut stats = Statistics::for_type(DataType::Bool);
        for (t, v) in [(1, true), (2, false), (3, true), (4, true)] {
            stats.update(t, &Value::Bool(v));
        }
        if let Statistics::Bool(s) = &stats {
            assert_eq!(s.sum(), 3);
        } else {
            unreachable!();
        }
        check_roundtrip(&stats);
    }

    #[test]
    fn test_string_stats() {
        let mut stats = Statistics::for_type(DataType::Str);
        stats.update(5, &Value::Str("mid".into()));
        stats.update(1, &Value::Str("early".into()));
        stats.update(9, &Value::Str("late".into()));
        if let Statistics::Str(s) = &stats {
            assert_eq!(s.first, "early");
            assert_eq!(s.last, "late");
        } else {
            unreachable!();
        }
        check_roundtrip(&stats);
    }

    #[test]
    fn test_time_stats() {
        let mut stats = Statistics::time();
        stats.update_time(7);
        stats.update_time(3);
        stats.update_time(11);
        assert_eq!(stats.count(), 3);
        assert_eq!(stats.start_time(), 3);
        assert_eq!(stats.end_time(), 11);
        check_roundtrip(&stats);
    }

    #[test]
    fn test_overlap_pruning() {
        let mut stats = Statistics::for_type(DataType::I64);
        stats.update(100, &Value::I64(1));
        stats.update(200, &Value::I64(2));

        assert!(stats.overlaps(&TimeRange::new(150, 300)));
        assert!(stats.overlaps(&TimeRange::new(200, 200)));
        assert!(!stats.overlaps(&TimeRange::new(201, 300)));
        assert!(!stats.overlaps(&TimeRange::new(0, 99)));

        let empty = Statistics::for_type(DataType::I64);
        assert!(!empty.overlaps(&TimeRange::all()));
    }
}
