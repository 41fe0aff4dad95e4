//! TsFile - a self-describing, append-only, columnar time-series file
//! format.
//!
//! Tables of rows keyed by a strictly increasing per-series timestamp
//! are partitioned by device identity (the tuple of tag-column values)
//! and by field column. Writers accept column batches and produce files
//! readers can traverse without an external index; readers query by
//! `(table, device, measurement, time range)` and receive decoded
//! blocks of rows.
//!
//! # Components
//!
//! - [`TableSchema`] / [`Tablet`]: table declaration and row batches
//! - [`TsFileWriter`]: chunk-group encoding, flush policy, file tail
//! - [`TsFileReader`]: metadata loading, index descent, table queries
//! - [`ResultSet`]: row cursor with typed getters
//!
//! # Example
//!
//! ```rust,ignore
//! use tsfile::{ColumnCategory, ColumnSchema, DataType, TableSchema, Tablet, TsFileWriter, Value};
//!
//! let mut writer = TsFileWriter::create("weather.tsfile")?;
//! writer.register_table(TableSchema::new("weather", vec![
//!     ColumnSchema::new("station", DataType::Str, ColumnCategory::Tag),
//!     ColumnSchema::new("temperature", DataType::F64, ColumnCategory::Field),
//! ]))?;
//!
//! let mut tablet = Tablet::with_columns(
//!     "weather",
//!     &[("station", DataType::Str), ("temperature", DataType::F64)],
//!     1024,
//! )?;
//! tablet.add_row(1000, &[Some(Value::Str("s1".into())), Some(Value::F64(21.5))])?;
//! writer.write_table(&tablet)?;
//! writer.close()?;
//! ```

#![deny(missing_docs)]

pub mod codec;
pub mod config;
pub mod error;
pub mod meta;
pub mod read;
pub mod schema;
pub mod stat;
pub mod tablet;
pub mod write;

pub use config::TsFileConfig;
pub use error::{Result, TsFileError};
pub use read::{ResultSet, ResultSetMetadata, ScanOrdering, TsFileReader};
pub use schema::{
    ColumnCategory, ColumnSchema, Compression, DataType, DeviceId, Encoding, TableSchema,
    TimeRange, Value,
};
pub use stat::Statistics;
pub use tablet::{Tablet, TabletColumn};
pub use write::TsFileWriter;
