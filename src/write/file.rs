//! TsFileWriter: owns the output file from create to close.
//!
//! Write path: tablets split into device runs, runs fan out into
//! per-column chunk writers, chunk groups flush under memory pressure,
//! and `close` appends the timeseries indexes, the metadata index tree,
//! the schema dictionary, the bloom filter and the trailer.

use crate::config::TsFileConfig;
use crate::error::{Result, TsFileError};
use crate::meta::{
    BloomFilter, ChunkMeta, IndexKey, MetaIndexEntry, MetaIndexNode, MetaIndexNodeType,
    TimeseriesIndex, TsFileMeta, CHUNK_GROUP_HEADER_MARKER, MAGIC, TIME_CHUNK_MASK, TS_TYPE_MULTI,
    VERSION,
};
use crate::schema::{ColumnCategory, DataType, DeviceId, TableSchema};
use crate::stat::Statistics;
use crate::tablet::Tablet;
use crate::write::chunk::{DataChunkWriter, TimeChunkWriter, ValueChunkWriter};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Open chunk writers of one device between two flushes.
enum ChunkGroupState {
    /// Shared time chunk plus one value chunk per schema field column.
    Aligned {
        time: TimeChunkWriter,
        values: Vec<(String, ValueChunkWriter)>,
    },
    /// One data chunk per field column encountered, in encounter order.
    NonAligned { writers: Vec<(String, DataChunkWriter)> },
}

impl ChunkGroupState {
    fn has_data(&self) -> bool {
        match self {
            Self::Aligned { time, .. } => time.has_data(),
            Self::NonAligned { writers } => writers.iter().any(|(_, w)| w.has_data()),
        }
    }

    fn estimated_memory(&self) -> usize {
        match self {
            Self::Aligned { time, values } => {
                time.estimated_memory()
                    + values.iter().map(|(_, w)| w.estimated_memory()).sum::<usize>()
            }
            Self::NonAligned { writers } => {
                writers.iter().map(|(_, w)| w.estimated_memory()).sum()
            }
        }
    }
}

/// Mapping of one tablet against its registered schema.
struct TabletLayout {
    /// Per tablet column: schema tag position (tags only).
    tag_positions: Vec<Option<usize>>,
    /// Per schema field column: `(name, schema index, tablet column)`.
    fields: Vec<(String, usize, Option<usize>)>,
    /// Number of tag columns in the schema.
    schema_tag_count: usize,
}

/// Writer over one output file, append-only until [`close`](Self::close).
///
/// A failed flush is fatal: discard the writer and treat the partial
/// file as invalid.
pub struct TsFileWriter {
    file: BufWriter<File>,
    path: PathBuf,
    pos: u64,
    config: TsFileConfig,
    schemas: BTreeMap<String, TableSchema>,
    groups: BTreeMap<DeviceId, ChunkGroupState>,
    device_metas: BTreeMap<DeviceId, Vec<ChunkMeta>>,
    properties: BTreeMap<String, String>,
    records_since_flush: u64,
    next_mem_check: u64,
}

impl TsFileWriter {
    /// Creates a new file at `path` with the default configuration.
    ///
    /// # Errors
    ///
    /// `FileAlreadyExists` if the path already exists.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::create_with_config(path, TsFileConfig::default())
    }

    /// Creates a new file at `path` with an explicit configuration.
    pub fn create_with_config(path: impl AsRef<Path>, config: TsFileConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            return Err(TsFileError::FileAlreadyExists(path));
        }
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(MAGIC)?;
        writer.write_all(&[VERSION])?;
        let next_mem_check = config.record_count_for_next_mem_check;
        Ok(Self {
            file: writer,
            path,
            pos: (MAGIC.len() + 1) as u64,
            config,
            schemas: BTreeMap::new(),
            groups: BTreeMap::new(),
            device_metas: BTreeMap::new(),
            properties: BTreeMap::new(),
            records_since_flush: 0,
            next_mem_check,
        })
    }

    /// Declares a table. Must precede any write against it.
    ///
    /// # Errors
    ///
    /// `TableAlreadyExists` on a duplicate name.
    pub fn register_table(&mut self, schema: TableSchema) -> Result<()> {
        if self.schemas.contains_key(&schema.table_name) {
            return Err(TsFileError::TableAlreadyExists(schema.table_name));
        }
        self.schemas.insert(schema.table_name.clone(), schema);
        Ok(())
    }

    /// Sets a free-form file property, serialized in the tail.
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    fn check_tablet(&self, tablet: &Tablet) -> Result<TabletLayout> {
        let schema = self
            .schemas
            .get(tablet.table_name())
            .ok_or_else(|| TsFileError::TableNotRegistered(tablet.table_name().to_string()))?;

        let mut tag_positions = Vec::with_capacity(tablet.column_count());
        let mut tablet_index_of = BTreeMap::new();
        for (i, col) in tablet.columns().iter().enumerate() {
            let schema_idx = schema
                .find_column_index(&col.name)
                .ok_or_else(|| TsFileError::ColumnUnknown(col.name.clone()))?;
            let schema_col = &schema.columns[schema_idx];
            if schema_col.data_type != col.data_type {
                return Err(TsFileError::TypeMismatch {
                    column: col.name.clone(),
                    expected: schema_col.data_type.name(),
                    actual: col.data_type.name(),
                });
            }
            tag_positions.push(if schema_col.category == ColumnCategory::Tag {
                schema.tag_position(&col.name)
            } else {
                None
            });
            tablet_index_of.insert(col.name.clone(), i);
        }

        let fields = schema
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.category == ColumnCategory::Field)
            .map(|(idx, c)| {
                (
                    c.name.clone(),
                    idx,
                    tablet_index_of.get(&c.name).copied(),
                )
            })
            .collect();

        Ok(TabletLayout {
            tag_positions,
            fields,
            schema_tag_count: schema.tag_columns().count(),
        })
    }

    fn device_of_row(&self, tablet: &Tablet, layout: &TabletLayout, row: usize) -> DeviceId {
        let mut tags = vec![String::new(); layout.schema_tag_count];
        for (col, tag_pos) in layout.tag_positions.iter().enumerate() {
            if let Some(pos) = tag_pos {
                if let Some(crate::schema::Value::Str(s)) = tablet.value_at(col, row) {
                    tags[*pos] = s;
                }
            }
        }
        DeviceId::from_table_and_tags(tablet.table_name(), &tags)
    }

    /// Appends one tablet.
    ///
    /// Rows with the same device identity must be contiguous and their
    /// timestamps strictly increasing; callers pre-sort. The file is not
    /// necessarily appended before the call returns.
    pub fn write_table(&mut self, tablet: &Tablet) -> Result<()> {
        let layout = self.check_tablet(tablet)?;
        let row_count = tablet.row_count();
        if row_count == 0 {
            return Ok(());
        }

        // split [0, n) into maximal runs of identical device identity
        let mut start = 0usize;
        let mut current = self.device_of_row(tablet, &layout, 0);
        for row in 1..=row_count {
            let next = if row < row_count {
                Some(self.device_of_row(tablet, &layout, row))
            } else {
                None
            };
            let run_ends = match &next {
                Some(d) => *d != current,
                None => true,
            };
            if run_ends {
                self.write_device_run(tablet, &layout, current.clone(), start, row)?;
                if let Some(d) = next {
                    current = d;
                }
                start = row;
            }
        }

        self.records_since_flush += row_count as u64;
        self.check_memory_size_and_may_flush()
    }

    fn write_device_run(
        &mut self,
        tablet: &Tablet,
        layout: &TabletLayout,
        device: DeviceId,
        start: usize,
        end: usize,
    ) -> Result<()> {
        let schema = &self.schemas[tablet.table_name()];
        let config = &self.config;

        if !self.groups.contains_key(&device) {
            let state = if config.aligned_tables {
                let time = TimeChunkWriter::new(
                    config.time_encoding,
                    config.time_compression,
                    config.page_max_point_count,
                )?;
                let mut values = Vec::new();
                for col in schema.field_columns() {
                    values.push((
                        col.name.clone(),
                        ValueChunkWriter::new(
                            col.name.clone(),
                            col.data_type,
                            col.encoding,
                            col.compression,
                            config.page_max_point_count,
                        )?,
                    ));
                }
                ChunkGroupState::Aligned { time, values }
            } else {
                ChunkGroupState::NonAligned {
                    writers: Vec::new(),
                }
            };
            self.groups.insert(device.clone(), state);
        }

        let timestamps = tablet.timestamps();
        match self.groups.get_mut(&device).expect("group was just inserted") {
            ChunkGroupState::Aligned { time, values } => {
                for row in start..end {
                    time.write(timestamps[row])?;
                }
                for (field_idx, (_, _, tablet_col)) in layout.fields.iter().enumerate() {
                    let (_, writer) = &mut values[field_idx];
                    match tablet_col {
                        Some(col) => {
                            for row in start..end {
                                let value = tablet.value_at(*col, row);
                                writer.write(timestamps[row], value.as_ref())?;
                            }
                        }
                        // schema field absent from this tablet: null rows
                        // keep the value pages aligned with the time pages
                        None => {
                            for row in start..end {
                                writer.write(timestamps[row], None)?;
                            }
                        }
                    }
                }
            }
            ChunkGroupState::NonAligned { writers } => {
                for (name, schema_idx, tablet_col) in &layout.fields {
                    let Some(col) = tablet_col else { continue };
                    let writer = match writers.iter_mut().position(|(n, _)| n == name) {
                        Some(i) => &mut writers[i].1,
                        None => {
                            let schema_col = &schema.columns[*schema_idx];
                            writers.push((
                                name.clone(),
                                DataChunkWriter::new(
                                    name.clone(),
                                    schema_col.data_type,
                                    schema_col.encoding,
                                    schema_col.compression,
                                    config.time_encoding,
                                    config.page_max_point_count,
                                )?,
                            ));
                            &mut writers.last_mut().expect("writer was just pushed").1
                        }
                    };
                    for row in start..end {
                        if let Some(value) = tablet.value_at(*col, row) {
                            writer.write(timestamps[row], &value)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn check_memory_size_and_may_flush(&mut self) -> Result<()> {
        if self.records_since_flush < self.next_mem_check {
            return Ok(());
        }
        let mem_size: usize = self.groups.values().map(|g| g.estimated_memory()).sum();
        if mem_size > 0 {
            self.next_mem_check = (self.records_since_flush
                * self.config.chunk_group_size_threshold as u64
                / mem_size as u64)
                .max(1);
        }
        if mem_size > self.config.chunk_group_size_threshold {
            self.flush()?;
        }
        Ok(())
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.file.write_all(bytes)?;
        self.pos += bytes.len() as u64;
        Ok(())
    }

    /// Seals every open chunk group and appends it to the file.
    ///
    /// Devices flush in sorted order so the output is deterministic.
    pub fn flush(&mut self) -> Result<()> {
        let groups = std::mem::take(&mut self.groups);
        for (device, state) in groups {
            if !state.has_data() {
                continue;
            }
            let mut header = vec![CHUNK_GROUP_HEADER_MARKER];
            device.serialize_to(&mut header);
            self.write_all(&header)?;
            let group_start = self.pos;

            match state {
                ChunkGroupState::Aligned { mut time, values } => {
                    self.flush_chunk(&device, &mut time)?;
                    for (_, mut writer) in values {
                        self.flush_chunk(&device, &mut writer)?;
                    }
                }
                ChunkGroupState::NonAligned { writers } => {
                    for (_, mut writer) in writers {
                        if writer.has_data() {
                            self.flush_chunk(&device, &mut writer)?;
                        }
                    }
                }
            }
            debug!(
                device = %device,
                bytes = self.pos - group_start,
                "flushed chunk group"
            );
        }
        self.records_since_flush = 0;
        self.next_mem_check = self.config.record_count_for_next_mem_check;
        Ok(())
    }

    fn flush_chunk<P: crate::write::page::PageBuilder>(
        &mut self,
        device: &DeviceId,
        writer: &mut crate::write::chunk::ChunkWriter<P>,
    ) -> Result<()> {
        writer.end_chunk()?;
        let offset = self.pos as i64;
        let mut buf = Vec::new();
        writer.header().serialize_to(&mut buf);
        buf.extend_from_slice(writer.chunk_data());
        self.write_all(&buf)?;
        self.device_metas
            .entry(device.clone())
            .or_default()
            .push(writer.chunk_meta(offset));
        Ok(())
    }

    fn write_node(&mut self, node: &MetaIndexNode) -> Result<i64> {
        let offset = self.pos as i64;
        let mut buf = Vec::new();
        node.serialize_to(&mut buf);
        self.write_all(&buf)?;
        Ok(offset)
    }

    /// Builds an index tree over sorted leaf entries. `entry_ends[i]` is
    /// the exclusive end of entry i's byte range when it closes a leaf
    /// node. Leaf and internal levels are written to the file; the root
    /// is returned unwritten.
    fn build_index_tree(
        &mut self,
        entries: Vec<MetaIndexEntry>,
        entry_ends: Vec<i64>,
        leaf_type: MetaIndexNodeType,
        internal_type: MetaIndexNodeType,
    ) -> Result<MetaIndexNode> {
        assert_eq!(entries.len(), entry_ends.len());
        let degree = self.config.max_degree_of_index_node as usize;

        if entries.len() <= degree {
            let end_offset = entry_ends.last().copied().unwrap_or(self.pos as i64);
            return Ok(MetaIndexNode {
                children: entries,
                end_offset,
                node_type: leaf_type,
            });
        }

        // leaf level
        let mut level: Vec<MetaIndexEntry> = Vec::new();
        for chunk_start in (0..entries.len()).step_by(degree) {
            let chunk_end = (chunk_start + degree).min(entries.len());
            let node = MetaIndexNode {
                children: entries[chunk_start..chunk_end].to_vec(),
                end_offset: entry_ends[chunk_end - 1],
                node_type: leaf_type,
            };
            let offset = self.write_node(&node)?;
            level.push(MetaIndexEntry {
                key: entries[chunk_start].key.clone(),
                offset,
            });
        }

        // internal levels until the children fit one root
        while level.len() > degree {
            let level_end = self.pos as i64;
            let mut next: Vec<MetaIndexEntry> = Vec::new();
            let chunk_starts: Vec<usize> = (0..level.len()).step_by(degree).collect();
            for (i, &chunk_start) in chunk_starts.iter().enumerate() {
                let chunk_end = (chunk_start + degree).min(level.len());
                let end_offset = if i + 1 < chunk_starts.len() {
                    level[chunk_starts[i + 1]].offset
                } else {
                    level_end
                };
                let node = MetaIndexNode {
                    children: level[chunk_start..chunk_end].to_vec(),
                    end_offset,
                    node_type: internal_type,
                };
                let offset = self.write_node(&node)?;
                next.push(MetaIndexEntry {
                    key: level[chunk_start].key.clone(),
                    offset,
                });
            }
            level = next;
        }

        Ok(MetaIndexNode {
            children: level,
            end_offset: self.pos as i64,
            node_type: internal_type,
        })
    }

    /// Flushes remaining data and appends the file tail: timeseries
    /// indexes, the metadata index tree, the table-schema dictionary,
    /// the bloom filter, properties and the trailer.
    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        let meta_offset = self.pos as i64;

        // timeseries-index blocks, devices in sorted order; within one
        // device the empty time-column name sorts first so an aligned
        // reader meets the time index before any value index
        let device_metas = std::mem::take(&mut self.device_metas);
        struct DeviceIndexInfo {
            aligned: bool,
            entries: Vec<(String, i64)>,
            region_start: i64,
            region_end: i64,
        }
        let mut infos: BTreeMap<DeviceId, DeviceIndexInfo> = BTreeMap::new();
        for (device, metas) in device_metas {
            let mut by_name: BTreeMap<String, Vec<ChunkMeta>> = BTreeMap::new();
            for meta in metas {
                by_name.entry(meta.measurement_name.clone()).or_default().push(meta);
            }
            let aligned = by_name.keys().any(|n| n.is_empty());
            let region_start = self.pos as i64;
            let mut entries = Vec::new();
            for (name, mut group) in by_name {
                group.sort_by_key(|m| m.offset_of_chunk_header);
                assert!(!group.is_empty(), "measurement group lost its chunk metas");
                let multi = group.len() > 1;
                let first = &group[0];
                let ts_type = if multi { TS_TYPE_MULTI } else { 0 } | first.mask;
                let data_type = if first.mask & TIME_CHUNK_MASK != 0 {
                    DataType::Vector
                } else {
                    first.data_type
                };
                let mut merged = match data_type {
                    DataType::Vector => Statistics::time(),
                    dt => Statistics::for_type(dt),
                };
                for meta in &group {
                    merged.merge(&meta.statistics);
                }
                let index = TimeseriesIndex {
                    ts_type,
                    measurement_name: name.clone(),
                    data_type,
                    statistics: merged,
                    chunk_metas: group,
                };
                let offset = self.pos as i64;
                let mut buf = Vec::new();
                index.serialize_to(&mut buf);
                self.write_all(&buf)?;
                entries.push((name, offset));
            }
            let region_end = self.pos as i64;
            infos.insert(
                device,
                DeviceIndexInfo {
                    aligned,
                    entries,
                    region_start,
                    region_end,
                },
            );
        }

        // measurement tree per device
        let mut meas_roots: BTreeMap<DeviceId, (i64, i64)> = BTreeMap::new();
        for (device, info) in &infos {
            let (entries, ends) = if info.aligned {
                (
                    vec![MetaIndexEntry {
                        key: IndexKey::Name(String::new()),
                        offset: info.region_start,
                    }],
                    vec![info.region_end],
                )
            } else {
                let entries: Vec<MetaIndexEntry> = info
                    .entries
                    .iter()
                    .map(|(name, offset)| MetaIndexEntry {
                        key: IndexKey::Name(name.clone()),
                        offset: *offset,
                    })
                    .collect();
                let ends: Vec<i64> = info
                    .entries
                    .iter()
                    .enumerate()
                    .map(|(i, _)| {
                        info.entries
                            .get(i + 1)
                            .map(|(_, o)| *o)
                            .unwrap_or(info.region_end)
                    })
                    .collect();
                (entries, ends)
            };
            let root = self.build_index_tree(
                entries,
                ends,
                MetaIndexNodeType::LeafMeasurement,
                MetaIndexNodeType::InternalMeasurement,
            )?;
            let root_offset = self.write_node(&root)?;
            meas_roots.insert(device.clone(), (root_offset, self.pos as i64));
        }

        // device tree per table; the root node stays inline in the
        // file-level metadata
        let mut table_roots: BTreeMap<String, MetaIndexNode> = BTreeMap::new();
        let mut per_table: BTreeMap<String, Vec<(DeviceId, i64, i64)>> = BTreeMap::new();
        for (device, (root_offset, root_end)) in &meas_roots {
            let table = device.segments()[0].clone();
            per_table
                .entry(table)
                .or_default()
                .push((device.clone(), *root_offset, *root_end));
        }
        for (table, devices) in per_table {
            let entries: Vec<MetaIndexEntry> = devices
                .iter()
                .map(|(device, offset, _)| MetaIndexEntry {
                    key: IndexKey::Device(device.clone()),
                    offset: *offset,
                })
                .collect();
            let ends: Vec<i64> = devices.iter().map(|(_, _, end)| *end).collect();
            let root = self.build_index_tree(
                entries,
                ends,
                MetaIndexNodeType::LeafDevice,
                MetaIndexNodeType::InternalDevice,
            )?;
            table_roots.insert(table, root);
        }
        // registered tables with no data still answer queries: an empty
        // device leaf
        for name in self.schemas.keys() {
            table_roots.entry(name.clone()).or_insert(MetaIndexNode {
                children: Vec::new(),
                end_offset: self.pos as i64,
                node_type: MetaIndexNodeType::LeafDevice,
            });
        }

        let mut bloom_filter =
            BloomFilter::new(infos.len(), self.config.bloom_filter_error_rate);
        for device in infos.keys() {
            bloom_filter.insert(&device.to_bytes());
        }

        let meta = TsFileMeta {
            table_index_roots: table_roots,
            table_schemas: std::mem::take(&mut self.schemas),
            meta_offset,
            bloom_filter,
            properties: std::mem::take(&mut self.properties),
        };
        let mut meta_buf = Vec::new();
        meta.serialize_to(&mut meta_buf);
        let meta_size = meta_buf.len() as u32;
        self.write_all(&meta_buf)?;
        let mut trailer = Vec::with_capacity(10);
        crate::codec::write_u32(&mut trailer, meta_size);
        trailer.extend_from_slice(MAGIC);
        self.write_all(&trailer)?;

        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        debug!(
            path = %self.path.display(),
            meta_size,
            file_size = self.pos,
            "closed tsfile"
        );
        Ok(())
    }
}
