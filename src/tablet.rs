//! Tablet: a row batch bound to one table.
//!
//! Values are stored column-major with a per-column not-null bitmap.
//! Rows with the same device identity must be contiguous and their
//! timestamps strictly increasing; callers pre-sort.

use crate::error::{Result, TsFileError};
use crate::schema::{DataType, Value};
use bitvec::prelude::*;

/// One column of a tablet: name and declared type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabletColumn {
    /// Column name; must exist in the registered table schema.
    pub name: String,
    /// Declared data type; must match the schema.
    pub data_type: DataType,
}

#[derive(Debug, Clone)]
enum ColumnValues {
    Bool(Vec<bool>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    Str(Vec<String>),
}

impl ColumnValues {
    fn new(data_type: DataType, capacity: usize) -> Result<Self> {
        Ok(match data_type {
            DataType::Bool => Self::Bool(Vec::with_capacity(capacity)),
            DataType::I32 => Self::I32(Vec::with_capacity(capacity)),
            DataType::I64 => Self::I64(Vec::with_capacity(capacity)),
            DataType::F32 => Self::F32(Vec::with_capacity(capacity)),
            DataType::F64 => Self::F64(Vec::with_capacity(capacity)),
            DataType::Str => Self::Str(Vec::with_capacity(capacity)),
            DataType::Vector => {
                return Err(TsFileError::InvalidArg(
                    "vector is not a tablet column type".to_string(),
                ))
            }
        })
    }

    fn push(&mut self, value: Option<&Value>) -> Result<()> {
        match (self, value) {
            (Self::Bool(v), Some(Value::Bool(x))) => v.push(*x),
            (Self::I32(v), Some(Value::I32(x))) => v.push(*x),
            (Self::I64(v), Some(Value::I64(x))) => v.push(*x),
            (Self::F32(v), Some(Value::F32(x))) => v.push(*x),
            (Self::F64(v), Some(Value::F64(x))) => v.push(*x),
            (Self::Str(v), Some(Value::Str(x))) => v.push(x.clone()),
            (Self::Bool(v), None) => v.push(false),
            (Self::I32(v), None) => v.push(0),
            (Self::I64(v), None) => v.push(0),
            (Self::F32(v), None) => v.push(0.0),
            (Self::F64(v), None) => v.push(0.0),
            (Self::Str(v), None) => v.push(String::new()),
            (_, Some(v)) => {
                return Err(TsFileError::InvalidArg(format!(
                    "cell value type {} does not match the column",
                    v.data_type().name()
                )))
            }
        }
        Ok(())
    }

    fn get(&self, row: usize) -> Value {
        match self {
            Self::Bool(v) => Value::Bool(v[row]),
            Self::I32(v) => Value::I32(v[row]),
            Self::I64(v) => Value::I64(v[row]),
            Self::F32(v) => Value::F32(v[row]),
            Self::F64(v) => Value::F64(v[row]),
            Self::Str(v) => Value::Str(v[row].clone()),
        }
    }
}

/// A row batch targeted at one table.
#[derive(Debug)]
pub struct Tablet {
    table_name: String,
    columns: Vec<TabletColumn>,
    timestamps: Vec<i64>,
    values: Vec<ColumnValues>,
    notnull: Vec<BitVec<u8, Msb0>>,
    max_row_num: usize,
}

impl Tablet {
    /// Creates an empty tablet bound to `table_name` with the given
    /// column list (a subset or permutation of the table's columns) and
    /// row capacity.
    pub fn new(
        table_name: impl Into<String>,
        columns: Vec<TabletColumn>,
        max_row_num: usize,
    ) -> Result<Self> {
        let mut values = Vec::with_capacity(columns.len());
        for col in &columns {
            values.push(ColumnValues::new(col.data_type, max_row_num)?);
        }
        let notnull = columns.iter().map(|_| BitVec::new()).collect();
        Ok(Self {
            table_name: table_name.into(),
            columns,
            timestamps: Vec::with_capacity(max_row_num),
            values,
            notnull,
            max_row_num,
        })
    }

    /// Shorthand for [`Tablet::new`] from `(name, type)` pairs.
    pub fn with_columns(
        table_name: impl Into<String>,
        columns: &[(&str, DataType)],
        max_row_num: usize,
    ) -> Result<Self> {
        Self::new(
            table_name,
            columns
                .iter()
                .map(|(name, data_type)| TabletColumn {
                    name: (*name).to_string(),
                    data_type: *data_type,
                })
                .collect(),
            max_row_num,
        )
    }

    /// Appends one row. `cells` follow the tablet column order; `None`
    /// marks a null cell.
    ///
    /// # Errors
    ///
    /// `InvalidArg` when the tablet is full, the cell count differs from
    /// the column count, or a cell's type does not match its column.
    pub fn add_row(&mut self, timestamp: i64, cells: &[Option<Value>]) -> Result<()> {
        if self.timestamps.len() >= self.max_row_num {
            return Err(TsFileError::InvalidArg(format!(
                "tablet is full ({} rows)",
                self.max_row_num
            )));
        }
        if cells.len() != self.columns.len() {
            return Err(TsFileError::InvalidArg(format!(
                "row carries {} cells, tablet has {} columns",
                cells.len(),
                self.columns.len()
            )));
        }
        for (i, cell) in cells.iter().enumerate() {
            self.values[i].push(cell.as_ref())?;
            self.notnull[i].push(cell.is_some());
        }
        self.timestamps.push(timestamp);
        Ok(())
    }

    /// Target table name.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Number of rows currently held.
    pub fn row_count(&self) -> usize {
        self.timestamps.len()
    }

    /// Number of columns.
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// The column descriptors in tablet order.
    pub fn columns(&self) -> &[TabletColumn] {
        &self.columns
    }

    /// The timestamp column.
    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    /// True if the cell at `(col, row)` is null.
    pub fn is_null(&self, col: usize, row: usize) -> bool {
        !self.notnull[col][row]
    }

    /// The cell value at `(col, row)`, or `None` for a null cell.
    pub fn value_at(&self, col: usize, row: usize) -> Option<Value> {
        if self.is_null(col, row) {
            None
        } else {
            Some(self.values[col].get(row))
        }
    }

    /// Clears all rows, keeping the column layout.
    pub fn reset(&mut self) {
        self.timestamps.clear();
        for v in &mut self.values {
            match v {
                ColumnValues::Bool(v) => v.clear(),
                ColumnValues::I32(v) => v.clear(),
                ColumnValues::I64(v) => v.clear(),
                ColumnValues::F32(v) => v.clear(),
                ColumnValues::F64(v) => v.clear(),
                ColumnValues::Str(v) => v.clear(),
            }
        }
        for bm in &mut self.notnull {
            bm.clear();
        }
    }
}
