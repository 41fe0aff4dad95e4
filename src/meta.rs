//! On-disk metadata structures: chunk and page headers, chunk metas,
//! timeseries indexes, the metadata index tree, the file-level metadata
//! block and the device bloom filter.
//!
//! ## File layout (bytes, low → high)
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  "TsFile" (6 bytes) ‖ version 0x04 (1 byte)                  │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ChunkGroups (marker 0x00 ‖ device id ‖ chunks)              │
//! ├──────────────────────────────────────────────────────────────┤
//! │  TimeseriesIndex blocks (one per device × measurement)       │
//! ├──────────────────────────────────────────────────────────────┤
//! │  MetaIndexNodes (measurement trees, then device trees)       │
//! ├──────────────────────────────────────────────────────────────┤
//! │  TsFileMeta (index roots ‖ schemas ‖ bloom ‖ properties)     │
//! ├──────────────────────────────────────────────────────────────┤
//! │  meta size (u32) ‖ "TsFile" (6 bytes)                        │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use crate::codec::{
    write_i64, write_var_i64, write_var_str, write_var_u32, write_var_u64, ByteReader,
};
use crate::error::{Result, TsFileError};
use crate::schema::{Compression, DataType, DeviceId, Encoding, TableSchema};
use crate::stat::Statistics;
use std::collections::BTreeMap;
use std::io::Cursor;

/// Magic bytes at both ends of the file: "TsFile".
pub const MAGIC: &[u8; 6] = b"TsFile";

/// Format version byte.
pub const VERSION: u8 = 0x04;

/// Marker byte opening a chunk group.
pub const CHUNK_GROUP_HEADER_MARKER: u8 = 0x00;

/// Marker byte of a multi-page chunk header.
pub const CHUNK_HEADER_MARKER: u8 = 0x01;

/// Marker byte of a single-page chunk header.
pub const ONLY_ONE_PAGE_CHUNK_HEADER_MARKER: u8 = 0x05;

/// Mask bit of a time-only chunk (shared time column of an aligned
/// family).
pub const TIME_CHUNK_MASK: u8 = 0x80;

/// Mask bit of a value chunk belonging to an aligned family.
pub const VALUE_CHUNK_MASK: u8 = 0x40;

/// ts_type bit marking a timeseries index with more than one chunk.
pub const TS_TYPE_MULTI: u8 = 0x01;

/// Size of the trailer: u32 meta size plus the closing magic.
pub const TRAILER_SIZE: usize = 4 + MAGIC.len();

/// Header of one chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkHeader {
    /// Measurement name; empty for the time chunk of an aligned family.
    pub measurement_name: String,
    /// Total byte length of the page sequence that follows.
    pub data_size: u32,
    /// Value data type (i64 for a time chunk).
    pub data_type: DataType,
    /// Page compression.
    pub compression: Compression,
    /// Value encoding.
    pub encoding: Encoding,
    /// True if the chunk holds exactly one page.
    pub single_page: bool,
    /// Time/value chunk mask bits; 0 for a non-aligned chunk.
    pub mask: u8,
}

impl ChunkHeader {
    /// Serializes the header.
    pub fn serialize_to(&self, out: &mut Vec<u8>) {
        let marker = if self.single_page {
            ONLY_ONE_PAGE_CHUNK_HEADER_MARKER
        } else {
            CHUNK_HEADER_MARKER
        };
        out.push(marker | self.mask);
        write_var_str(out, &self.measurement_name);
        write_var_u32(out, self.data_size);
        out.push(self.data_type as u8);
        out.push(self.compression as u8);
        out.push(self.encoding as u8);
    }

    /// Deserializes a header, marker byte included.
    pub fn deserialize_from(reader: &mut ByteReader<'_>) -> Result<Self> {
        let marker_byte = reader.read_u8()?;
        let mask = marker_byte & (TIME_CHUNK_MASK | VALUE_CHUNK_MASK);
        let single_page = match marker_byte & !(TIME_CHUNK_MASK | VALUE_CHUNK_MASK) {
            CHUNK_HEADER_MARKER => false,
            ONLY_ONE_PAGE_CHUNK_HEADER_MARKER => true,
            other => {
                return Err(TsFileError::Corrupted(format!(
                    "unexpected chunk header marker 0x{:02x}",
                    other
                )))
            }
        };
        let measurement_name = reader.read_var_str()?;
        let data_size = reader.read_var_u32()?;
        let data_type = DataType::from_u8(reader.read_u8()?)
            .ok_or_else(|| TsFileError::Corrupted("unknown chunk data type".to_string()))?;
        let compression = Compression::from_u8(reader.read_u8()?)
            .ok_or_else(|| TsFileError::Corrupted("unknown chunk compression".to_string()))?;
        let encoding = Encoding::from_u8(reader.read_u8()?)
            .ok_or_else(|| TsFileError::Corrupted("unknown chunk encoding".to_string()))?;
        Ok(Self {
            measurement_name,
            data_size,
            data_type,
            compression,
            encoding,
            single_page,
            mask,
        })
    }
}

/// Header of one page inside a chunk.
///
/// The statistics block is omitted for the sole page of a single-page
/// chunk; the chunk-level statistics in the chunk meta cover it.
#[derive(Debug, Clone, PartialEq)]
pub struct PageHeader {
    /// Payload size before compression.
    pub uncompressed_size: u32,
    /// Payload size after compression.
    pub compressed_size: u32,
    /// Page statistics; `None` in a single-page chunk.
    pub statistics: Option<Statistics>,
}

impl PageHeader {
    /// Serializes the header.
    pub fn serialize_to(&self, out: &mut Vec<u8>) {
        write_var_u32(out, self.uncompressed_size);
        write_var_u32(out, self.compressed_size);
        if let Some(stats) = &self.statistics {
            stats.serialize_to(out);
        }
    }

    /// Deserializes a header. `stat_type` is `Some` when the chunk has
    /// more than one page (statistics present), with the data type that
    /// selects the statistics flavour.
    pub fn deserialize_from(reader: &mut ByteReader<'_>, stat_type: Option<DataType>) -> Result<Self> {
        let uncompressed_size = reader.read_var_u32()?;
        let compressed_size = reader.read_var_u32()?;
        let statistics = match stat_type {
            Some(dt) => Some(Statistics::deserialize_from(dt, reader)?),
            None => None,
        };
        Ok(Self {
            uncompressed_size,
            compressed_size,
            statistics,
        })
    }
}

/// Metadata of one emitted chunk, accumulated in memory until close.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkMeta {
    /// Measurement name; empty for a time chunk.
    pub measurement_name: String,
    /// Absolute file offset of the chunk header's marker byte.
    pub offset_of_chunk_header: i64,
    /// Value data type of the chunk.
    pub data_type: DataType,
    /// Time/value chunk mask bits.
    pub mask: u8,
    /// Chunk-level statistics.
    pub statistics: Statistics,
}

impl ChunkMeta {
    /// Serializes this meta into a timeseries-index chunk list.
    /// `prev_offset` is the previous chunk's offset (0 for the first);
    /// per-chunk statistics travel only when the index is multi-chunk.
    pub fn serialize_to(&self, out: &mut Vec<u8>, prev_offset: i64, multi: bool) {
        write_var_i64(out, self.offset_of_chunk_header - prev_offset);
        if multi {
            out.push(self.mask);
            self.statistics.serialize_to(out);
        }
    }
}

/// Index block for one `(device, measurement)`: its chunk metas and
/// their merged statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeseriesIndex {
    /// Low bit: multi-chunk; high bits: chunk mask.
    pub ts_type: u8,
    /// Measurement name; empty for the time side of an aligned family.
    pub measurement_name: String,
    /// Value data type; `Vector` marks the time side of an aligned
    /// family.
    pub data_type: DataType,
    /// Statistics merged over all chunks.
    pub statistics: Statistics,
    /// Chunk metas ordered by file offset.
    pub chunk_metas: Vec<ChunkMeta>,
}

impl TimeseriesIndex {
    /// True if this index describes the shared time column of an
    /// aligned family.
    pub fn is_aligned_time(&self) -> bool {
        self.data_type == DataType::Vector
    }

    /// Serializes the index block.
    pub fn serialize_to(&self, out: &mut Vec<u8>) {
        out.push(self.ts_type);
        write_var_str(out, &self.measurement_name);
        out.push(self.data_type as u8);

        let multi = self.ts_type & TS_TYPE_MULTI != 0;
        let mut list = Vec::new();
        let mut prev_offset = 0i64;
        for meta in &self.chunk_metas {
            meta.serialize_to(&mut list, prev_offset, multi);
            prev_offset = meta.offset_of_chunk_header;
        }
        write_var_u32(out, list.len() as u32);
        self.statistics.serialize_to(out);
        out.extend_from_slice(&list);
    }

    /// Deserializes one index block from a packed stream.
    pub fn deserialize_from(reader: &mut ByteReader<'_>) -> Result<Self> {
        let ts_type = reader.read_u8()?;
        let measurement_name = reader.read_var_str()?;
        let data_type = DataType::from_u8(reader.read_u8()?)
            .ok_or_else(|| TsFileError::Corrupted("unknown timeseries data type".to_string()))?;
        let list_len = reader.read_var_u32()? as usize;
        let statistics = Statistics::deserialize_from(data_type, reader)?;

        let multi = ts_type & TS_TYPE_MULTI != 0;
        let mask = ts_type & (TIME_CHUNK_MASK | VALUE_CHUNK_MASK);
        let mut list_reader = reader.sub_reader(list_len)?;
        let mut chunk_metas = Vec::new();
        let mut prev_offset = 0i64;
        while !list_reader.is_empty() {
            let offset = prev_offset + list_reader.read_var_i64()?;
            let (chunk_mask, chunk_stats) = if multi {
                let m = list_reader.read_u8()?;
                let stats = Statistics::deserialize_from(data_type, &mut list_reader)?;
                (m, stats)
            } else {
                (mask, statistics.clone())
            };
            chunk_metas.push(ChunkMeta {
                measurement_name: measurement_name.clone(),
                offset_of_chunk_header: offset,
                data_type,
                mask: chunk_mask,
                statistics: chunk_stats,
            });
            prev_offset = offset;
        }
        if chunk_metas.is_empty() {
            return Err(TsFileError::MetaError(format!(
                "timeseries index for '{}' carries no chunks",
                measurement_name
            )));
        }
        Ok(Self {
            ts_type,
            measurement_name,
            data_type,
            statistics,
            chunk_metas,
        })
    }
}

/// A timeseries index pair for one aligned `(device, measurement)`:
/// the shared time column plus the value column.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedTimeseriesIndex {
    /// Index of the shared time column (empty name, `Vector` type).
    pub time: TimeseriesIndex,
    /// Index of the value column.
    pub value: TimeseriesIndex,
}

/// Kind of a metadata index node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MetaIndexNodeType {
    /// Leaf whose children point at timeseries indexes.
    LeafMeasurement = 0,
    /// Internal node of a measurement tree.
    InternalMeasurement = 1,
    /// Leaf whose children point at measurement-tree roots.
    LeafDevice = 2,
    /// Internal node of a device tree.
    InternalDevice = 3,
}

impl MetaIndexNodeType {
    /// Creates a node type from its wire byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::LeafMeasurement),
            1 => Some(Self::InternalMeasurement),
            2 => Some(Self::LeafDevice),
            3 => Some(Self::InternalDevice),
            _ => None,
        }
    }

    /// True for the two device-level kinds.
    pub fn is_device_level(self) -> bool {
        matches!(self, Self::LeafDevice | Self::InternalDevice)
    }

    /// True for the two leaf kinds.
    pub fn is_leaf(self) -> bool {
        matches!(self, Self::LeafMeasurement | Self::LeafDevice)
    }
}

/// Compare key of a metadata index entry: a measurement name in
/// measurement trees, a device identity in device trees.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum IndexKey {
    /// Measurement name.
    Name(String),
    /// Device identity.
    Device(DeviceId),
}

impl IndexKey {
    fn serialize_to(&self, out: &mut Vec<u8>) {
        match self {
            Self::Name(name) => write_var_str(out, name),
            Self::Device(device) => device.serialize_to(out),
        }
    }

    /// True when the key is the empty measurement name (the aligned
    /// marker).
    pub fn is_empty_name(&self) -> bool {
        matches!(self, Self::Name(name) if name.is_empty())
    }
}

/// One child of a metadata index node.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaIndexEntry {
    /// Sort key of the child.
    pub key: IndexKey,
    /// Absolute file offset of the child node or timeseries index.
    pub offset: i64,
}

/// A node of the tail index tree.
///
/// Children are sorted by key. `end_offset` is the exclusive upper byte
/// of the region the last child points into.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaIndexNode {
    /// Sorted children.
    pub children: Vec<MetaIndexEntry>,
    /// Exclusive upper byte for the last child.
    pub end_offset: i64,
    /// Node kind.
    pub node_type: MetaIndexNodeType,
}

impl MetaIndexNode {
    /// Serializes the node.
    pub fn serialize_to(&self, out: &mut Vec<u8>) {
        write_var_u32(out, self.children.len() as u32);
        for child in &self.children {
            child.key.serialize_to(out);
            write_i64(out, child.offset);
        }
        write_i64(out, self.end_offset);
        out.push(self.node_type as u8);
    }

    /// Deserializes one node. `device_level` selects the key format;
    /// the parsed node type must agree with it.
    pub fn deserialize_from(reader: &mut ByteReader<'_>, device_level: bool) -> Result<Self> {
        let count = reader.read_var_u32()? as usize;
        let mut children = Vec::with_capacity(count);
        for _ in 0..count {
            let key = if device_level {
                IndexKey::Device(DeviceId::deserialize_from(reader)?)
            } else {
                IndexKey::Name(reader.read_var_str()?)
            };
            let offset = reader.read_i64()?;
            children.push(MetaIndexEntry { key, offset });
        }
        let end_offset = reader.read_i64()?;
        let node_type = MetaIndexNodeType::from_u8(reader.read_u8()?)
            .ok_or_else(|| TsFileError::Corrupted("unknown index node type".to_string()))?;
        if node_type.is_device_level() != device_level {
            return Err(TsFileError::Corrupted(format!(
                "index node type {:?} does not match its tree level",
                node_type
            )));
        }
        Ok(Self {
            children,
            end_offset,
            node_type,
        })
    }

    /// Returns the child with the largest key `≤ key` plus the exclusive
    /// end offset of its byte range (`children[i+1].offset`, or the
    /// node's own `end_offset` for the last child).
    ///
    /// With `exact` set, a missing equal key yields `None`. The aligned
    /// marker (a leaf-measurement node with a single empty-name child)
    /// matches any key.
    pub fn binary_search_children(
        &self,
        key: &IndexKey,
        exact: bool,
    ) -> Option<(MetaIndexEntry, i64)> {
        if self.children.is_empty() {
            return None;
        }
        let aligned = self.node_type == MetaIndexNodeType::LeafMeasurement
            && self.children.len() == 1
            && self.children[0].key.is_empty_name();

        let idx = if aligned {
            0
        } else {
            match self.children.binary_search_by(|c| c.key.cmp(key)) {
                Ok(i) => i,
                Err(0) => return None,
                Err(i) => {
                    if exact {
                        return None;
                    }
                    i - 1
                }
            }
        };

        let end_offset = if idx + 1 < self.children.len() {
            self.children[idx + 1].offset
        } else {
            self.end_offset
        };
        Some((self.children[idx].clone(), end_offset))
    }
}

/// Seeds of the bloom filter hash family.
const BLOOM_SEEDS: [u32; 8] = [5, 7, 11, 19, 31, 37, 43, 59];

/// Minimum filter size in bits.
const BLOOM_MINIMAL_SIZE_BITS: usize = 256;

/// Membership filter over device identities, probed before any index
/// descent.
#[derive(Debug, Clone, PartialEq)]
pub struct BloomFilter {
    size_bits: u32,
    hash_count: u32,
    bits: Vec<u8>,
}

impl BloomFilter {
    /// Creates an empty filter sized for `expected_entries` at the given
    /// false-positive rate.
    pub fn new(expected_entries: usize, error_rate: f64) -> Self {
        let n = expected_entries.max(1) as f64;
        let ln2 = std::f64::consts::LN_2;
        let m = (-(n * error_rate.ln()) / (ln2 * ln2)).ceil() as usize;
        let size_bits = m.max(BLOOM_MINIMAL_SIZE_BITS).div_ceil(8) * 8;
        let k = ((size_bits as f64 / n) * ln2).round() as u32;
        let hash_count = k.clamp(1, BLOOM_SEEDS.len() as u32);
        Self {
            size_bits: size_bits as u32,
            hash_count,
            bits: vec![0u8; size_bits / 8],
        }
    }

    fn bit_index(&self, key: &[u8], seed: u32) -> usize {
        let hash = murmur3::murmur3_x64_128(&mut Cursor::new(key), seed)
            .expect("in-memory cursor read cannot fail");
        (hash % self.size_bits as u128) as usize
    }

    /// Inserts a serialized device identity.
    pub fn insert(&mut self, key: &[u8]) {
        for seed in &BLOOM_SEEDS[..self.hash_count as usize] {
            let idx = self.bit_index(key, *seed);
            self.bits[idx / 8] |= 1 << (idx % 8);
        }
    }

    /// Returns false if the key was definitely never inserted.
    pub fn maybe_contains(&self, key: &[u8]) -> bool {
        BLOOM_SEEDS[..self.hash_count as usize].iter().all(|seed| {
            let idx = self.bit_index(key, *seed);
            self.bits[idx / 8] & (1 << (idx % 8)) != 0
        })
    }

    /// Serializes the filter as (size, hash count, bitmap).
    pub fn serialize_to(&self, out: &mut Vec<u8>) {
        write_var_u32(out, self.size_bits);
        write_var_u32(out, self.hash_count);
        out.extend_from_slice(&self.bits);
    }

    /// Deserializes a filter.
    pub fn deserialize_from(reader: &mut ByteReader<'_>) -> Result<Self> {
        let size_bits = reader.read_var_u32()?;
        if size_bits == 0 || size_bits % 8 != 0 {
            return Err(TsFileError::Corrupted(format!(
                "impossible bloom filter size {} bits",
                size_bits
            )));
        }
        let hash_count = reader.read_var_u32()?;
        if hash_count == 0 || hash_count as usize > BLOOM_SEEDS.len() {
            return Err(TsFileError::Corrupted(format!(
                "impossible bloom filter hash count {}",
                hash_count
            )));
        }
        let bits = reader.read_bytes(size_bits as usize / 8)?.to_vec();
        Ok(Self {
            size_bits,
            hash_count,
            bits,
        })
    }
}

/// The file-level metadata block at the tail.
#[derive(Debug, Clone, PartialEq)]
pub struct TsFileMeta {
    /// Device-tree root per table.
    pub table_index_roots: BTreeMap<String, MetaIndexNode>,
    /// Schema dictionary per table.
    pub table_schemas: BTreeMap<String, TableSchema>,
    /// Offset at which the timeseries-index blocks begin.
    pub meta_offset: i64,
    /// Membership filter over all written device identities.
    pub bloom_filter: BloomFilter,
    /// Free-form file properties.
    pub properties: BTreeMap<String, String>,
}

impl TsFileMeta {
    /// Serializes the metadata block.
    pub fn serialize_to(&self, out: &mut Vec<u8>) {
        write_var_u32(out, self.table_index_roots.len() as u32);
        for (name, root) in &self.table_index_roots {
            write_var_str(out, name);
            root.serialize_to(out);
        }
        write_var_u32(out, self.table_schemas.len() as u32);
        for (name, schema) in &self.table_schemas {
            write_var_str(out, name);
            schema.serialize_to(out);
        }
        write_i64(out, self.meta_offset);
        self.bloom_filter.serialize_to(out);
        write_var_u64(out, self.properties.len() as u64);
        for (key, value) in &self.properties {
            write_var_str(out, key);
            write_var_str(out, value);
        }
    }

    /// Deserializes the metadata block.
    pub fn deserialize_from(reader: &mut ByteReader<'_>) -> Result<Self> {
        let root_count = reader.read_var_u32()? as usize;
        let mut table_index_roots = BTreeMap::new();
        for _ in 0..root_count {
            let name = reader.read_var_str()?;
            let root = MetaIndexNode::deserialize_from(reader, true)?;
            table_index_roots.insert(name, root);
        }
        let schema_count = reader.read_var_u32()? as usize;
        let mut table_schemas = BTreeMap::new();
        for _ in 0..schema_count {
            let name = reader.read_var_str()?;
            let schema = TableSchema::deserialize_from(name.clone(), reader)?;
            table_schemas.insert(name, schema);
        }
        let meta_offset = reader.read_i64()?;
        let bloom_filter = BloomFilter::deserialize_from(reader)?;
        let property_count = reader.read_var_u64()? as usize;
        let mut properties = BTreeMap::new();
        for _ in 0..property_count {
            let key = reader.read_var_str()?;
            let value = reader.read_var_str()?;
            properties.insert(key, value);
        }
        Ok(Self {
            table_index_roots,
            table_schemas,
            meta_offset,
            bloom_filter,
            properties,
        })
    }
}
