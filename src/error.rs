//! Error and Result types for TsFile operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A convenience `Result` type for TsFile operations.
pub type Result<T> = std::result::Result<T, TsFileError>;

/// The error type for TsFile operations.
#[derive(Debug, Error)]
pub enum TsFileError {
    /// An argument violated the call contract.
    #[error("Invalid argument: {0}")]
    InvalidArg(String),

    /// A tablet column's declared type does not match the registered schema.
    #[error("Type mismatch for column {column}: schema declares {expected}, tablet carries {actual}")]
    TypeMismatch {
        /// Name of the offending column.
        column: String,
        /// Data type declared in the table schema.
        expected: &'static str,
        /// Data type carried by the tablet.
        actual: &'static str,
    },

    /// A referenced column is not part of the table schema.
    #[error("Unknown column: {0}")]
    ColumnUnknown(String),

    /// The target table was not declared before writing.
    #[error("Table not registered: {0}")]
    TableNotRegistered(String),

    /// A table with the same name was already registered.
    #[error("Table already exists: {0}")]
    TableAlreadyExists(String),

    /// The requested result ordering is not supported.
    #[error("Unsupported result ordering")]
    UnsupportedOrdering,

    /// The requested device was not written to this file.
    #[error("Device not found: {0}")]
    DeviceNotExist(String),

    /// The requested measurement was not written for this device.
    #[error("Measurement not found: {0}")]
    MeasurementNotExist(String),

    /// A generic lookup miss (e.g. unknown table on query).
    #[error("Not found: {0}")]
    NotExist(String),

    /// Creating the output file would overwrite an existing one.
    #[error("File already exists: {0}")]
    FileAlreadyExists(PathBuf),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The file violates the format contract (bad magic, impossible
    /// lengths, truncated regions).
    #[error("TsFile corrupted: {0}")]
    Corrupted(String),

    /// Inconsistent chunk metadata encountered while building or reading
    /// the file tail.
    #[error("Metadata error: {0}")]
    MetaError(String),
}
