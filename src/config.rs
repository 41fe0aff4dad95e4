//! Tuning knobs for the writer and reader engines.

use crate::schema::{Compression, Encoding};

/// Default in-memory size threshold for sealing a chunk group (128 MB).
pub const DEFAULT_CHUNK_GROUP_SIZE_THRESHOLD: usize = 128 * 1024 * 1024;

/// Default number of records written before the first memory check.
pub const DEFAULT_RECORD_COUNT_FOR_NEXT_MEM_CHECK: u64 = 1000;

/// Default maximum number of points per page.
pub const DEFAULT_PAGE_MAX_POINT_COUNT: u32 = 65_536;

/// Default maximum child count of a metadata index node.
pub const DEFAULT_MAX_DEGREE_OF_INDEX_NODE: u32 = 256;

/// Default target false-positive rate of the device bloom filter.
pub const DEFAULT_BLOOM_FILTER_ERROR_RATE: f64 = 0.05;

/// Default number of rows per result block on the read path.
pub const DEFAULT_BLOCK_SIZE: u32 = 1024;

/// Configuration for a [`TsFileWriter`](crate::write::TsFileWriter) or
/// [`TsFileReader`](crate::read::TsFileReader).
#[derive(Debug, Clone)]
pub struct TsFileConfig {
    /// In-memory size threshold above which all open chunk groups are
    /// sealed and flushed to the file. Default: 128 MB.
    pub chunk_group_size_threshold: usize,

    /// Number of records to accept before re-estimating memory usage.
    /// The writer adapts this after every check. Default: 1000.
    pub record_count_for_next_mem_check: u64,

    /// Maximum number of points in one page; reaching it seals the
    /// current page. Default: 65536.
    pub page_max_point_count: u32,

    /// Maximum child count of a metadata index node; overflow adds a new
    /// tree level. Default: 256.
    pub max_degree_of_index_node: u32,

    /// Target false-positive rate of the device bloom filter.
    /// Default: 0.05.
    pub bloom_filter_error_rate: f64,

    /// Number of rows per block produced by the read path. Default: 1024.
    pub block_size: u32,

    /// Whether tables are written as aligned chunk groups (shared time
    /// chunk plus value chunks). Default: true.
    pub aligned_tables: bool,

    /// Encoding of the time column. Default: TS2DIFF.
    pub time_encoding: Encoding,

    /// Compression of the time column. Default: LZ4.
    pub time_compression: Compression,
}

impl Default for TsFileConfig {
    fn default() -> Self {
        Self {
            chunk_group_size_threshold: DEFAULT_CHUNK_GROUP_SIZE_THRESHOLD,
            record_count_for_next_mem_check: DEFAULT_RECORD_COUNT_FOR_NEXT_MEM_CHECK,
            page_max_point_count: DEFAULT_PAGE_MAX_POINT_COUNT,
            max_degree_of_index_node: DEFAULT_MAX_DEGREE_OF_INDEX_NODE,
            bloom_filter_error_rate: DEFAULT_BLOOM_FILTER_ERROR_RATE,
            block_size: DEFAULT_BLOCK_SIZE,
            aligned_tables: true,
            time_encoding: Encoding::Ts2Diff,
            time_compression: Compression::Lz4,
        }
    }
}

impl TsFileConfig {
    /// Creates a configuration with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the chunk-group size threshold.
    pub fn with_chunk_group_size_threshold(mut self, threshold: usize) -> Self {
        self.chunk_group_size_threshold = threshold;
        self
    }

    /// Sets the record count before the next memory check.
    pub fn with_record_count_for_next_mem_check(mut self, count: u64) -> Self {
        self.record_count_for_next_mem_check = count;
        self
    }

    /// Sets the maximum point count per page.
    pub fn with_page_max_point_count(mut self, count: u32) -> Self {
        self.page_max_point_count = count.max(1);
        self
    }

    /// Sets the maximum child count of an index node.
    pub fn with_max_degree_of_index_node(mut self, degree: u32) -> Self {
        self.max_degree_of_index_node = degree.max(2);
        self
    }

    /// Sets the bloom filter target false-positive rate.
    pub fn with_bloom_filter_error_rate(mut self, rate: f64) -> Self {
        self.bloom_filter_error_rate = rate.clamp(1e-6, 0.5);
        self
    }

    /// Sets the number of rows per result block.
    pub fn with_block_size(mut self, rows: u32) -> Self {
        self.block_size = rows.max(1);
        self
    }

    /// Sets whether tables are written as aligned chunk groups.
    pub fn with_aligned_tables(mut self, aligned: bool) -> Self {
        self.aligned_tables = aligned;
        self
    }

    /// Sets the time-column encoding.
    pub fn with_time_encoding(mut self, encoding: Encoding) -> Self {
        self.time_encoding = encoding;
        self
    }

    /// Sets the time-column compression.
    pub fn with_time_compression(mut self, compression: Compression) -> Self {
        self.time_compression = compression;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TsFileConfig::default();
        assert_eq!(
            config.chunk_group_size_threshold,
            DEFAULT_CHUNK_GROUP_SIZE_THRESHOLD
        );
        assert_eq!(config.page_max_point_count, DEFAULT_PAGE_MAX_POINT_COUNT);
        assert!(config.aligned_tables);
    }

    #[test]
    fn test_builder_clamps() {
        let config = TsFileConfig::new()
            .with_max_degree_of_index_node(0)
            .with_page_max_point_count(0)
            .with_block_size(0);
        assert_eq!(config.max_degree_of_index_node, 2);
        assert_eq!(config.page_max_point_count, 1);
        assert_eq!(config.block_size, 1);
    }
}
