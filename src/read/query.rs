//! Table queries: device-ordered execution, per-device row assembly by
//! a k-way merge over field-column scans, tag fan-out and the
//! [`ResultSet`] cursor.

use crate::error::{Result, TsFileError};
use crate::read::file::TsFileReader;
use crate::read::scan::{DecodedPage, SeriesScanIterator};
use crate::schema::{ColumnCategory, DataType, DeviceId, TimeRange, Value};

/// Result ordering of a table query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOrdering {
    /// Global ascending time across devices. Not supported.
    Time,
    /// Device by device, times ascending within each device.
    Device,
}

/// Column names and data types of a result set. The time column comes
/// first, then the requested columns in request order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultSetMetadata {
    column_names: Vec<String>,
    data_types: Vec<DataType>,
}

impl ResultSetMetadata {
    /// Column names, time first.
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// Column data types, aligned with [`column_names`](Self::column_names).
    pub fn data_types(&self) -> &[DataType] {
        &self.data_types
    }

    /// Total column count including the time column.
    pub fn column_count(&self) -> usize {
        self.column_names.len()
    }
}

/// One requested column, deduplicated by name; `positions` lists every
/// slot it fills in the result row.
#[derive(Debug, Clone)]
struct RequestedColumn {
    name: String,
    category: ColumnCategory,
    tag_pos: Option<usize>,
    positions: Vec<usize>,
}

/// One assembled block of rows for a single device.
struct RowBlock {
    times: Vec<i64>,
    columns: Vec<Vec<Option<Value>>>,
}

/// The scan state of one field column inside the merge loop.
struct MeasurementColumnContext<'a> {
    iter: SeriesScanIterator<'a>,
    page: DecodedPage,
    pos: usize,
    positions: Vec<usize>,
}

impl<'a> MeasurementColumnContext<'a> {
    /// Pulls the first non-empty page; `None` when the scan is empty.
    fn open(mut iter: SeriesScanIterator<'a>, positions: Vec<usize>) -> Result<Option<Self>> {
        loop {
            match iter.next_page()? {
                Some(page) if !page.is_empty() => {
                    return Ok(Some(Self {
                        iter,
                        page,
                        pos: 0,
                        positions,
                    }))
                }
                Some(_) => continue,
                None => return Ok(None),
            }
        }
    }

    fn current_time(&self) -> i64 {
        self.page.times[self.pos]
    }

    fn current_value(&self) -> Option<Value> {
        self.page.values[self.pos].clone()
    }

    /// Steps to the next row, transparently loading the next page.
    /// Returns false once the iterator is exhausted.
    fn advance(&mut self) -> Result<bool> {
        self.pos += 1;
        while self.pos >= self.page.len() {
            match self.iter.next_page()? {
                Some(page) if !page.is_empty() => {
                    self.page = page;
                    self.pos = 0;
                }
                Some(_) => continue,
                None => return Ok(false),
            }
        }
        Ok(true)
    }
}

/// Assembles time-merged rows for one device.
struct SingleDeviceBlockReader<'a> {
    contexts: Vec<MeasurementColumnContext<'a>>,
    tag_fill: Vec<(Vec<usize>, String)>,
    block_size: usize,
    time_filter: TimeRange,
    column_count: usize,
}

impl<'a> SingleDeviceBlockReader<'a> {
    fn new(
        reader: &'a TsFileReader,
        device: &DeviceId,
        meas_root: (i64, i64),
        requested: &[RequestedColumn],
        time_filter: TimeRange,
        block_size: usize,
        column_count: usize,
    ) -> Result<Self> {
        let mut contexts = Vec::new();
        let mut tag_fill = Vec::new();
        for col in requested {
            match col.category {
                ColumnCategory::Tag => {
                    let value = col
                        .tag_pos
                        .and_then(|p| device.tag_segment(p))
                        .unwrap_or("")
                        .to_string();
                    tag_fill.push((col.positions.clone(), value));
                }
                ColumnCategory::Field => {
                    let located =
                        reader.locate_measurement(meas_root.0, meas_root.1, &col.name);
                    let (ts_offset, ts_end) = match located {
                        Ok(range) => range,
                        // a column this device never recorded simply
                        // contributes nulls
                        Err(TsFileError::MeasurementNotExist(_)) => continue,
                        Err(e) => return Err(e),
                    };
                    let index = match reader.load_series_index(ts_offset, ts_end, &col.name) {
                        Ok(index) => index,
                        Err(TsFileError::MeasurementNotExist(_)) => continue,
                        Err(e) => return Err(e),
                    };
                    let iter = SeriesScanIterator::new(reader, index, time_filter)?;
                    if let Some(ctx) =
                        MeasurementColumnContext::open(iter, col.positions.clone())?
                    {
                        contexts.push(ctx);
                    }
                }
                ColumnCategory::Time => {}
            }
        }
        Ok(Self {
            contexts,
            tag_fill,
            block_size,
            time_filter,
            column_count,
        })
    }

    /// Builds the next block of up to `block_size` rows in ascending
    /// time order; `None` once every column context is exhausted.
    fn next_block(&mut self) -> Result<Option<RowBlock>> {
        if self.contexts.is_empty() {
            return Ok(None);
        }
        let mut block = RowBlock {
            times: Vec::with_capacity(self.block_size),
            columns: vec![Vec::with_capacity(self.block_size); self.column_count],
        };

        while block.times.len() < self.block_size && !self.contexts.is_empty() {
            let next_time = self
                .contexts
                .iter()
                .map(MeasurementColumnContext::current_time)
                .min()
                .expect("active context set is non-empty");
            let emit = self.time_filter.contains(next_time);
            if emit {
                block.times.push(next_time);
                for column in &mut block.columns {
                    column.push(None);
                }
            }

            let mut exhausted = Vec::new();
            for (i, ctx) in self.contexts.iter_mut().enumerate() {
                if ctx.current_time() != next_time {
                    continue;
                }
                if emit {
                    let value = ctx.current_value();
                    for &p in &ctx.positions {
                        *block.columns[p]
                            .last_mut()
                            .expect("row slot was just pushed") = value.clone();
                    }
                }
                if !ctx.advance()? {
                    exhausted.push(i);
                }
            }
            for i in exhausted.into_iter().rev() {
                self.contexts.remove(i);
            }
        }

        if block.times.is_empty() {
            return Ok(None);
        }
        for (positions, value) in &self.tag_fill {
            for &p in positions {
                block.columns[p] = vec![Some(Value::Str(value.clone())); block.times.len()];
            }
        }
        Ok(Some(block))
    }
}

/// Cursor over the rows of a table query. Borrows the reader; dropping
/// the result set releases its scan state.
pub struct ResultSet<'a> {
    reader: &'a TsFileReader,
    metadata: ResultSetMetadata,
    requested: Vec<RequestedColumn>,
    time_filter: TimeRange,
    devices: std::vec::IntoIter<(DeviceId, i64, i64)>,
    current: Option<SingleDeviceBlockReader<'a>>,
    block: Option<RowBlock>,
    row: usize,
}

impl<'a> ResultSet<'a> {
    /// Column names and types, time column first.
    pub fn metadata(&self) -> &ResultSetMetadata {
        &self.metadata
    }

    /// Index of a column by name (`time` is column 0).
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.metadata
            .column_names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| TsFileError::ColumnUnknown(name.to_string()))
    }

    /// Advances to the next row; false once the result is exhausted.
    pub fn next(&mut self) -> Result<bool> {
        loop {
            if let Some(block) = &self.block {
                if self.row + 1 < block.times.len() {
                    self.row += 1;
                    return Ok(true);
                }
                self.block = None;
            }
            if self.current.is_none() {
                match self.devices.next() {
                    Some((device, offset, end)) => {
                        self.current = Some(SingleDeviceBlockReader::new(
                            self.reader,
                            &device,
                            (offset, end),
                            &self.requested,
                            self.time_filter,
                            self.reader.block_size() as usize,
                            self.metadata.column_count() - 1,
                        )?);
                    }
                    None => return Ok(false),
                }
            }
            match self
                .current
                .as_mut()
                .expect("device reader was just set")
                .next_block()?
            {
                Some(block) => {
                    self.block = Some(block);
                    self.row = 0;
                    return Ok(true);
                }
                None => self.current = None,
            }
        }
    }

    fn current_block(&self) -> Result<&RowBlock> {
        self.block
            .as_ref()
            .ok_or_else(|| TsFileError::InvalidArg("cursor is not on a row".to_string()))
    }

    fn cell(&self, index: usize) -> Result<Option<&Value>> {
        let block = self.current_block()?;
        if index == 0 || index >= self.metadata.column_count() {
            return Err(TsFileError::InvalidArg(format!(
                "column index {} is not a value column",
                index
            )));
        }
        Ok(block.columns[index - 1][self.row].as_ref())
    }

    /// True if the cell at `index` in the current row is null. The time
    /// column is never null.
    pub fn is_null(&self, index: usize) -> Result<bool> {
        if index == 0 {
            self.current_block()?;
            return Ok(false);
        }
        Ok(self.cell(index)?.is_none())
    }

    /// Reads an i64 cell; column 0 is the row time.
    pub fn get_i64(&self, index: usize) -> Result<i64> {
        if index == 0 {
            let block = self.current_block()?;
            return Ok(block.times[self.row]);
        }
        match self.cell(index)? {
            Some(Value::I64(v)) => Ok(*v),
            other => Err(type_error("i64", other)),
        }
    }

    /// Reads a bool cell.
    pub fn get_bool(&self, index: usize) -> Result<bool> {
        match self.cell(index)? {
            Some(Value::Bool(v)) => Ok(*v),
            other => Err(type_error("bool", other)),
        }
    }

    /// Reads an i32 cell.
    pub fn get_i32(&self, index: usize) -> Result<i32> {
        match self.cell(index)? {
            Some(Value::I32(v)) => Ok(*v),
            other => Err(type_error("i32", other)),
        }
    }

    /// Reads an f32 cell.
    pub fn get_f32(&self, index: usize) -> Result<f32> {
        match self.cell(index)? {
            Some(Value::F32(v)) => Ok(*v),
            other => Err(type_error("f32", other)),
        }
    }

    /// Reads an f64 cell.
    pub fn get_f64(&self, index: usize) -> Result<f64> {
        match self.cell(index)? {
            Some(Value::F64(v)) => Ok(*v),
            other => Err(type_error("f64", other)),
        }
    }

    /// Reads a string cell. The value is copied out of the block, so it
    /// stays valid across subsequent [`next`](Self::next) calls.
    pub fn get_string(&self, index: usize) -> Result<String> {
        match self.cell(index)? {
            Some(Value::Str(v)) => Ok(v.clone()),
            other => Err(type_error("string", other)),
        }
    }
}

fn type_error(expected: &'static str, cell: Option<&Value>) -> TsFileError {
    match cell {
        Some(v) => TsFileError::InvalidArg(format!(
            "cell holds {}, requested {}",
            v.data_type().name(),
            expected
        )),
        None => TsFileError::InvalidArg(format!("cell is null, requested {}", expected)),
    }
}

impl TsFileReader {
    /// Queries a table in DEVICE ordering: all requested columns of
    /// every device, rows ascending in time within each device.
    ///
    /// # Errors
    ///
    /// `NotExist` for an unknown table, `ColumnUnknown` for a column
    /// absent from its schema.
    pub fn query_table(
        &self,
        table: &str,
        columns: &[&str],
        t_min: i64,
        t_max: i64,
    ) -> Result<ResultSet<'_>> {
        self.query_table_ordered(table, columns, t_min, t_max, ScanOrdering::Device)
    }

    /// Queries a table with an explicit result ordering.
    ///
    /// # Errors
    ///
    /// `UnsupportedOrdering` for [`ScanOrdering::Time`].
    pub fn query_table_ordered(
        &self,
        table: &str,
        columns: &[&str],
        t_min: i64,
        t_max: i64,
        ordering: ScanOrdering,
    ) -> Result<ResultSet<'_>> {
        if ordering == ScanOrdering::Time {
            return Err(TsFileError::UnsupportedOrdering);
        }
        let schema = self
            .table_schema(table)
            .ok_or_else(|| TsFileError::NotExist(format!("table {}", table)))?;

        let mut requested: Vec<RequestedColumn> = Vec::new();
        let mut column_names = vec!["time".to_string()];
        let mut data_types = vec![DataType::I64];
        for (position, name) in columns.iter().enumerate() {
            let schema_idx = schema
                .find_column_index(name)
                .ok_or_else(|| TsFileError::ColumnUnknown((*name).to_string()))?;
            let schema_col = &schema.columns[schema_idx];
            column_names.push((*name).to_string());
            data_types.push(schema_col.data_type);
            match requested.iter_mut().find(|c| c.name == *name) {
                Some(col) => col.positions.push(position),
                None => requested.push(RequestedColumn {
                    name: (*name).to_string(),
                    category: schema_col.category,
                    tag_pos: schema.tag_position(name),
                    positions: vec![position],
                }),
            }
        }

        let devices = self.all_devices(self.device_root(table)?)?;
        Ok(ResultSet {
            reader: self,
            metadata: ResultSetMetadata {
                column_names,
                data_types,
            },
            requested,
            time_filter: TimeRange::new(t_min, t_max),
            devices: devices.into_iter(),
            current: None,
            block: None,
            row: 0,
        })
    }
}
