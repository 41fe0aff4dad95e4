//! Table schemas, column descriptors, device identity and primitive values.

use crate::codec::{write_var_str, write_var_u32, ByteReader};
use crate::error::{Result, TsFileError};
use std::fmt;

/// Primitive data type of a column.
///
/// `Vector` is not a column type: it marks the time side of an aligned
/// family in the file tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataType {
    /// Boolean.
    Bool = 0,
    /// 32-bit signed integer.
    I32 = 1,
    /// 64-bit signed integer.
    I64 = 2,
    /// 32-bit IEEE-754 float.
    F32 = 3,
    /// 64-bit IEEE-754 float.
    F64 = 4,
    /// Length-prefixed UTF-8 string.
    Str = 5,
    /// Marker for the shared time column of an aligned family.
    Vector = 6,
}

impl DataType {
    /// Creates a DataType from its wire byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Bool),
            1 => Some(Self::I32),
            2 => Some(Self::I64),
            3 => Some(Self::F32),
            4 => Some(Self::F64),
            5 => Some(Self::Str),
            6 => Some(Self::Vector),
            _ => None,
        }
    }

    /// Human-readable name, used in error messages.
    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::Str => "string",
            Self::Vector => "vector",
        }
    }

    /// Default value encoding for this type.
    pub fn default_encoding(self) -> Encoding {
        match self {
            Self::I32 | Self::I64 => Encoding::Ts2Diff,
            Self::F32 | Self::F64 => Encoding::Gorilla,
            _ => Encoding::Plain,
        }
    }
}

/// Value encoding of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Encoding {
    /// Fixed-width values, length-prefixed strings.
    #[default]
    Plain = 0,
    /// Delta-of-delta bit packing for integers and timestamps.
    Ts2Diff = 4,
    /// XOR-based float compression.
    Gorilla = 8,
}

impl Encoding {
    /// Creates an Encoding from its wire byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Plain),
            4 => Some(Self::Ts2Diff),
            8 => Some(Self::Gorilla),
            _ => None,
        }
    }
}

/// Byte-level compression of a page payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Compression {
    /// No compression.
    Uncompressed = 0,
    /// LZ4 block compression.
    #[default]
    Lz4 = 7,
}

impl Compression {
    /// Creates a Compression from its wire byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Uncompressed),
            7 => Some(Self::Lz4),
            _ => None,
        }
    }
}

/// Role of a column within a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ColumnCategory {
    /// Participates in device identity.
    Tag = 0,
    /// Carries measured values.
    Field = 1,
    /// The implicit per-table time column.
    Time = 2,
}

impl ColumnCategory {
    /// Creates a ColumnCategory from its wire byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Tag),
            1 => Some(Self::Field),
            2 => Some(Self::Time),
            _ => None,
        }
    }
}

/// Schema of one column: name, type, codecs and category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    /// Column name.
    pub name: String,
    /// Primitive data type.
    pub data_type: DataType,
    /// Value encoding.
    pub encoding: Encoding,
    /// Page compression.
    pub compression: Compression,
    /// Tag or field.
    pub category: ColumnCategory,
}

impl ColumnSchema {
    /// Creates a column schema with the default encoding and compression
    /// for the data type.
    pub fn new(name: impl Into<String>, data_type: DataType, category: ColumnCategory) -> Self {
        Self {
            name: name.into(),
            data_type,
            encoding: data_type.default_encoding(),
            compression: Compression::default(),
            category,
        }
    }

    /// Overrides the value encoding.
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Overrides the page compression.
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }
}

/// Schema of a table: a name and an ordered column list.
///
/// Tag columns come first by convention; their per-row values form the
/// device identity. Exactly one implicit time column exists per table and
/// is not part of the column list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    /// Table name.
    pub table_name: String,
    /// Ordered column list.
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    /// Creates a table schema.
    pub fn new(table_name: impl Into<String>, columns: Vec<ColumnSchema>) -> Self {
        Self {
            table_name: table_name.into(),
            columns,
        }
    }

    /// Index of a column by name, or `None` if absent.
    pub fn find_column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Iterator over tag columns in schema order.
    pub fn tag_columns(&self) -> impl Iterator<Item = &ColumnSchema> {
        self.columns
            .iter()
            .filter(|c| c.category == ColumnCategory::Tag)
    }

    /// Iterator over field columns in schema order.
    pub fn field_columns(&self) -> impl Iterator<Item = &ColumnSchema> {
        self.columns
            .iter()
            .filter(|c| c.category == ColumnCategory::Field)
    }

    /// Position of a tag column among the tag columns, or `None`.
    pub fn tag_position(&self, name: &str) -> Option<usize> {
        self.tag_columns().position(|c| c.name == name)
    }

    /// Serializes the column list (the table name travels as the map key).
    pub fn serialize_to(&self, out: &mut Vec<u8>) {
        write_var_u32(out, self.columns.len() as u32);
        for col in &self.columns {
            write_var_str(out, &col.name);
            out.push(col.data_type as u8);
            out.push(col.encoding as u8);
            out.push(col.compression as u8);
            out.push(col.category as u8);
        }
    }

    /// Deserializes a column list under the given table name.
    pub fn deserialize_from(table_name: String, reader: &mut ByteReader<'_>) -> Result<Self> {
        let count = reader.read_var_u32()? as usize;
        let mut columns = Vec::with_capacity(count);
        for _ in 0..count {
            let name = reader.read_var_str()?;
            let data_type = DataType::from_u8(reader.read_u8()?)
                .ok_or_else(|| TsFileError::Corrupted("unknown data type byte".to_string()))?;
            let encoding = Encoding::from_u8(reader.read_u8()?)
                .ok_or_else(|| TsFileError::Corrupted("unknown encoding byte".to_string()))?;
            let compression = Compression::from_u8(reader.read_u8()?)
                .ok_or_else(|| TsFileError::Corrupted("unknown compression byte".to_string()))?;
            let category = ColumnCategory::from_u8(reader.read_u8()?)
                .ok_or_else(|| TsFileError::Corrupted("unknown column category byte".to_string()))?;
            columns.push(ColumnSchema {
                name,
                data_type,
                encoding,
                compression,
                category,
            });
        }
        Ok(Self {
            table_name,
            columns,
        })
    }
}

/// Identity of one series group: the table name followed by the per-row
/// tag-column values, as an ordered sequence of string segments.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId {
    segments: Vec<String>,
}

impl DeviceId {
    /// Creates a device identity from raw segments.
    pub fn new(segments: Vec<String>) -> Self {
        Self { segments }
    }

    /// Creates a device identity from a table name and its tag values.
    pub fn from_table_and_tags(table_name: &str, tags: &[String]) -> Self {
        let mut segments = Vec::with_capacity(tags.len() + 1);
        segments.push(table_name.to_string());
        segments.extend_from_slice(tags);
        Self { segments }
    }

    /// The ordered segments, table name first.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The tag segment at `pos` (0 = first tag column), if present.
    pub fn tag_segment(&self, pos: usize) -> Option<&str> {
        self.segments.get(pos + 1).map(|s| s.as_str())
    }

    /// Serializes the identity: segment count plus var-str segments.
    pub fn serialize_to(&self, out: &mut Vec<u8>) {
        write_var_u32(out, self.segments.len() as u32);
        for seg in &self.segments {
            write_var_str(out, seg);
        }
    }

    /// Deserializes a device identity.
    pub fn deserialize_from(reader: &mut ByteReader<'_>) -> Result<Self> {
        let count = reader.read_var_u32()? as usize;
        let mut segments = Vec::with_capacity(count);
        for _ in 0..count {
            segments.push(reader.read_var_str()?);
        }
        Ok(Self { segments })
    }

    /// The serialized form, used as the bloom filter key.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.serialize_to(&mut out);
        out
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

/// A primitive cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Boolean.
    Bool(bool),
    /// 32-bit signed integer.
    I32(i32),
    /// 64-bit signed integer.
    I64(i64),
    /// 32-bit float.
    F32(f32),
    /// 64-bit float.
    F64(f64),
    /// UTF-8 string.
    Str(String),
}

impl Value {
    /// The data type of this value.
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Bool(_) => DataType::Bool,
            Self::I32(_) => DataType::I32,
            Self::I64(_) => DataType::I64,
            Self::F32(_) => DataType::F32,
            Self::F64(_) => DataType::F64,
            Self::Str(_) => DataType::Str,
        }
    }
}

/// An inclusive time interval `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    /// Inclusive lower bound.
    pub min: i64,
    /// Inclusive upper bound.
    pub max: i64,
}

impl TimeRange {
    /// Creates a range `[min, max]`.
    pub fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    /// The unbounded range.
    pub fn all() -> Self {
        Self {
            min: i64::MIN,
            max: i64::MAX,
        }
    }

    /// True if `t` lies within the range.
    pub fn contains(&self, t: i64) -> bool {
        self.min <= t && t <= self.max
    }

    /// True if `[start, end]` intersects the range.
    pub fn overlaps(&self, start: i64, end: i64) -> bool {
        start <= self.max && end >= self.min
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self::all()
    }
}
