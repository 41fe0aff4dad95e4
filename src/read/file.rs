//! TsFileReader: trailer and metadata loading, index-tree descent and
//! timeseries-index lookup.

use crate::codec::ByteReader;
use crate::error::{Result, TsFileError};
use crate::meta::{
    AlignedTimeseriesIndex, MetaIndexNode, MetaIndexNodeType, TimeseriesIndex, TsFileMeta,
    IndexKey, MAGIC, TRAILER_SIZE, VERSION,
};
use crate::config::TsFileConfig;
use crate::read::scan::SeriesScanIterator;
use crate::schema::{DeviceId, Encoding, TableSchema, TimeRange};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::Path;
use tracing::debug;

/// Size of the first tail read; reused for the metadata block when it
/// already fits.
const TAIL_READ_SIZE: u64 = 1024;

/// Positioned-read counters, for diagnostics and pruning tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadMetrics {
    /// Number of positioned reads issued against the file.
    pub io_reads: u64,
    /// Number of chunk payloads loaded.
    pub chunk_reads: u64,
}

/// The timeseries index resolved for one `(device, measurement)`.
#[derive(Debug, Clone, PartialEq)]
pub enum SeriesIndex {
    /// A non-aligned series.
    Single(TimeseriesIndex),
    /// An aligned series: shared time index plus the value index.
    Aligned(AlignedTimeseriesIndex),
}

/// Read-only handle over one file. All reads are positioned, so a
/// loaded reader can be shared behind `&self`.
pub struct TsFileReader {
    file: File,
    file_size: u64,
    meta: TsFileMeta,
    config: TsFileConfig,
    io_reads: Cell<u64>,
    chunk_reads: Cell<u64>,
}

impl TsFileReader {
    /// Opens a file with the default configuration.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(path, TsFileConfig::default())
    }

    /// Opens a file: reads the trailer, verifies the magic and loads the
    /// file-level metadata.
    ///
    /// The configuration must agree with the writer's on the time
    /// encoding; everything else about the file is self-describing.
    pub fn open_with_config(path: impl AsRef<Path>, config: TsFileConfig) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let header_len = (MAGIC.len() + 1) as u64;
        if file_size < header_len + TRAILER_SIZE as u64 {
            return Err(TsFileError::Corrupted(format!(
                "file of {} bytes cannot hold a header and trailer",
                file_size
            )));
        }

        let window = TAIL_READ_SIZE.min(file_size);
        let mut tail = vec![0u8; window as usize];
        file.read_exact_at(&mut tail, file_size - window)?;

        let magic_at = tail.len() - MAGIC.len();
        if &tail[magic_at..] != MAGIC {
            return Err(TsFileError::Corrupted(
                "trailer magic mismatch".to_string(),
            ));
        }
        let size_at = tail.len() - TRAILER_SIZE;
        let meta_size =
            u32::from_be_bytes(tail[size_at..size_at + 4].try_into().unwrap()) as u64;
        if meta_size == 0 || meta_size + TRAILER_SIZE as u64 + header_len > file_size {
            return Err(TsFileError::Corrupted(format!(
                "impossible metadata size {}",
                meta_size
            )));
        }

        let meta_buf: Vec<u8> = if meta_size + TRAILER_SIZE as u64 <= window {
            // the tail window already covers the metadata block
            let start = tail.len() - TRAILER_SIZE - meta_size as usize;
            tail[start..start + meta_size as usize].to_vec()
        } else {
            let mut buf = vec![0u8; meta_size as usize];
            file.read_exact_at(&mut buf, file_size - TRAILER_SIZE as u64 - meta_size)?;
            buf
        };
        let mut reader = ByteReader::new(&meta_buf);
        let meta = TsFileMeta::deserialize_from(&mut reader)?;
        debug!(
            path = %path.display(),
            meta_size,
            tables = meta.table_index_roots.len(),
            "opened tsfile"
        );
        Ok(Self {
            file,
            file_size,
            meta,
            config,
            io_reads: Cell::new(1),
            chunk_reads: Cell::new(0),
        })
    }

    /// The cached file-level metadata.
    pub fn meta(&self) -> &TsFileMeta {
        &self.meta
    }

    pub(crate) fn time_encoding(&self) -> Encoding {
        self.config.time_encoding
    }

    pub(crate) fn block_size(&self) -> u32 {
        self.config.block_size
    }

    /// Names of the tables in this file.
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.meta.table_schemas.keys().map(|s| s.as_str())
    }

    /// Schema of a table, if present.
    pub fn table_schema(&self, name: &str) -> Option<&TableSchema> {
        self.meta.table_schemas.get(name)
    }

    /// File properties serialized at close.
    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.meta.properties
    }

    /// Snapshot of the positioned-read counters.
    pub fn read_metrics(&self) -> ReadMetrics {
        ReadMetrics {
            io_reads: self.io_reads.get(),
            chunk_reads: self.chunk_reads.get(),
        }
    }

    pub(crate) fn count_chunk_read(&self) {
        self.chunk_reads.set(self.chunk_reads.get() + 1);
    }

    /// Reads `len` bytes at `offset`.
    pub(crate) fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        if offset + len as u64 > self.file_size {
            return Err(TsFileError::Corrupted(format!(
                "read of {} bytes at {} crosses the file end {}",
                len, offset, self.file_size
            )));
        }
        let mut buf = vec![0u8; len];
        self.file.read_exact_at(&mut buf, offset)?;
        self.io_reads.set(self.io_reads.get() + 1);
        Ok(buf)
    }

    /// Offset at which the timeseries-index region begins; every chunk
    /// lies below it.
    pub(crate) fn data_region_end(&self) -> u64 {
        self.meta.meta_offset as u64
    }

    fn read_index_node(&self, offset: i64, end: i64, device_level: bool) -> Result<MetaIndexNode> {
        if end <= offset {
            return Err(TsFileError::Corrupted(format!(
                "empty index node range [{}, {})",
                offset, end
            )));
        }
        let buf = self.read_at(offset as u64, (end - offset) as usize)?;
        let mut reader = ByteReader::new(&buf);
        MetaIndexNode::deserialize_from(&mut reader, device_level)
    }

    /// Root of a table's device tree.
    pub(crate) fn device_root(&self, table: &str) -> Result<&MetaIndexNode> {
        self.meta
            .table_index_roots
            .get(table)
            .ok_or_else(|| TsFileError::NotExist(format!("table {}", table)))
    }

    /// Probes the bloom filter for a device identity.
    pub fn maybe_contains_device(&self, device: &DeviceId) -> bool {
        self.meta.bloom_filter.maybe_contains(&device.to_bytes())
    }

    /// Descends the device tree for the byte range of a device's
    /// measurement-tree root.
    pub(crate) fn locate_device(&self, device: &DeviceId) -> Result<(i64, i64)> {
        let root = self.device_root(device.segments()[0].as_str())?;
        let key = IndexKey::Device(device.clone());

        let not_exist = || TsFileError::DeviceNotExist(device.to_string());
        if root.node_type == MetaIndexNodeType::LeafDevice {
            let (entry, end) = root
                .binary_search_children(&key, true)
                .ok_or_else(not_exist)?;
            return Ok((entry.offset, end));
        }

        let (mut entry, mut end) = root
            .binary_search_children(&key, false)
            .ok_or_else(not_exist)?;
        loop {
            let node = self.read_index_node(entry.offset, end, true)?;
            let exact = node.node_type == MetaIndexNodeType::LeafDevice;
            let (child, child_end) = node
                .binary_search_children(&key, exact)
                .ok_or_else(not_exist)?;
            if exact {
                return Ok((child.offset, child_end));
            }
            entry = child;
            end = child_end;
        }
    }

    /// Descends a measurement tree (rooted in `[offset, end)`) for the
    /// byte range holding the timeseries index of `measurement`.
    pub(crate) fn locate_measurement(
        &self,
        offset: i64,
        end: i64,
        measurement: &str,
    ) -> Result<(i64, i64)> {
        let key = IndexKey::Name(measurement.to_string());
        let not_exist = || TsFileError::MeasurementNotExist(measurement.to_string());

        let mut node = self.read_index_node(offset, end, false)?;
        loop {
            // measurement searches are floor searches: the leaf range is
            // scanned afterwards and verifies the exact name
            let (entry, entry_end) = node
                .binary_search_children(&key, false)
                .ok_or_else(not_exist)?;
            if node.node_type == MetaIndexNodeType::LeafMeasurement {
                return Ok((entry.offset, entry_end));
            }
            node = self.read_index_node(entry.offset, entry_end, false)?;
        }
    }

    /// Reads the byte range `[offset, end)` and scans the packed
    /// timeseries-index blocks for `measurement`, pairing time and value
    /// indexes for aligned families.
    pub(crate) fn load_series_index(
        &self,
        offset: i64,
        end: i64,
        measurement: &str,
    ) -> Result<SeriesIndex> {
        let buf = self.read_at(offset as u64, (end - offset) as usize)?;
        let mut reader = ByteReader::new(&buf);
        let mut time_index: Option<TimeseriesIndex> = None;
        while !reader.is_empty() {
            let index = TimeseriesIndex::deserialize_from(&mut reader)?;
            if index.is_aligned_time() {
                time_index = Some(index);
            } else if index.measurement_name == measurement {
                return Ok(match time_index {
                    Some(time) => SeriesIndex::Aligned(AlignedTimeseriesIndex {
                        time,
                        value: index,
                    }),
                    None => SeriesIndex::Single(index),
                });
            }
        }
        Err(TsFileError::MeasurementNotExist(measurement.to_string()))
    }

    /// Opens a lazy scan over one `(device, measurement)` series.
    ///
    /// The bloom filter is probed before any tree read; a negative
    /// answer yields `DeviceNotExist` immediately. A series whose
    /// statistics miss the time filter yields an empty iterator.
    pub fn series_iterator(
        &self,
        device: &DeviceId,
        measurement: &str,
        time_filter: TimeRange,
    ) -> Result<SeriesScanIterator<'_>> {
        if !self.maybe_contains_device(device) {
            return Err(TsFileError::DeviceNotExist(device.to_string()));
        }
        let (dev_offset, dev_end) = self.locate_device(device)?;
        let (ts_offset, ts_end) = self.locate_measurement(dev_offset, dev_end, measurement)?;
        let index = self.load_series_index(ts_offset, ts_end, measurement)?;
        SeriesScanIterator::new(self, index, time_filter)
    }

    /// Walks a device tree and returns every `(device, measurement-root
    /// byte range)` leaf entry in device order.
    pub(crate) fn all_devices(&self, root: &MetaIndexNode) -> Result<Vec<(DeviceId, i64, i64)>> {
        let mut out = Vec::new();
        self.collect_devices(root, &mut out)?;
        Ok(out)
    }

    fn collect_devices(
        &self,
        node: &MetaIndexNode,
        out: &mut Vec<(DeviceId, i64, i64)>,
    ) -> Result<()> {
        for (i, child) in node.children.iter().enumerate() {
            let end = node
                .children
                .get(i + 1)
                .map(|c| c.offset)
                .unwrap_or(node.end_offset);
            match node.node_type {
                MetaIndexNodeType::LeafDevice => {
                    let IndexKey::Device(device) = &child.key else {
                        return Err(TsFileError::Corrupted(
                            "device leaf carries a measurement key".to_string(),
                        ));
                    };
                    out.push((device.clone(), child.offset, end));
                }
                MetaIndexNodeType::InternalDevice => {
                    let next = self.read_index_node(child.offset, end, true)?;
                    self.collect_devices(&next, out)?;
                }
                _ => {
                    return Err(TsFileError::Corrupted(
                        "measurement node inside a device tree".to_string(),
                    ))
                }
            }
        }
        Ok(())
    }

    /// Device identities of one table, in device-tree order.
    pub fn device_ids(&self, table: &str) -> Result<Vec<DeviceId>> {
        let root = self.device_root(table)?;
        Ok(self
            .all_devices(root)?
            .into_iter()
            .map(|(device, _, _)| device)
            .collect())
    }

    /// Format version of open files.
    pub fn version() -> u8 {
        VERSION
    }
}
