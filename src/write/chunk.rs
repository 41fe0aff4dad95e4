//! Chunk writers: concatenate sealed pages into an in-memory chunk
//! buffer, preserving the single-page statistics elision on the wire.
//!
//! The first page of a chunk is written header-first but its statistics
//! and payload are held back until a second page proves the chunk is
//! multi-page. A chunk that ends after one page therefore serializes
//! identically whether it was single-page by design or because the page
//! budget happened to align with the flush.

use crate::codec::write_var_u32;
use crate::error::Result;
use crate::meta::{ChunkHeader, ChunkMeta};
use crate::schema::{Compression, DataType, Encoding, Value};
use crate::stat::Statistics;
use crate::write::page::{DataPageWriter, PageBuilder, SealedPage, TimePageWriter, ValuePageWriter};

/// Rough per-chunk constant added to memory estimates for headers and
/// bookkeeping.
const CHUNK_OVERHEAD_BYTES: usize = 64;

/// A chunk writer over one page writer flavour.
pub struct ChunkWriter<P: PageBuilder> {
    measurement_name: String,
    data_type: DataType,
    encoding: Encoding,
    compression: Compression,
    mask: u8,
    page: P,
    page_max_point_count: u32,
    chunk_data: Vec<u8>,
    chunk_statistics: Statistics,
    first_page: Option<SealedPage>,
    num_pages: u32,
}

impl<P: PageBuilder> ChunkWriter<P> {
    fn with_page(
        measurement_name: String,
        data_type: DataType,
        encoding: Encoding,
        compression: Compression,
        mask: u8,
        page_max_point_count: u32,
        chunk_statistics: Statistics,
        page: P,
    ) -> Self {
        Self {
            measurement_name,
            data_type,
            encoding,
            compression,
            mask,
            page,
            page_max_point_count,
            chunk_data: Vec::new(),
            chunk_statistics,
            first_page: None,
            num_pages: 0,
        }
    }

    /// Seals the current page into the chunk buffer.
    ///
    /// With `end_chunk` set and no pages written yet, the page enters
    /// without a statistics block (single-page form). Otherwise the
    /// first page is stashed until a second page arrives, at which point
    /// its held-back statistics and payload are written in.
    fn seal_cur_page(&mut self, end_chunk: bool) -> Result<()> {
        let sealed = self.page.seal()?;
        self.chunk_statistics.merge(&sealed.statistics);

        if self.num_pages == 0 {
            write_var_u32(&mut self.chunk_data, sealed.uncompressed_size);
            write_var_u32(&mut self.chunk_data, sealed.compressed_size);
            if end_chunk {
                self.chunk_data.extend_from_slice(&sealed.payload);
            } else {
                self.first_page = Some(sealed);
            }
        } else {
            if self.num_pages == 1 {
                if let Some(first) = self.first_page.take() {
                    first.statistics.serialize_to(&mut self.chunk_data);
                    self.chunk_data.extend_from_slice(&first.payload);
                }
            }
            write_var_u32(&mut self.chunk_data, sealed.uncompressed_size);
            write_var_u32(&mut self.chunk_data, sealed.compressed_size);
            sealed.statistics.serialize_to(&mut self.chunk_data);
            self.chunk_data.extend_from_slice(&sealed.payload);
        }
        self.num_pages += 1;
        Ok(())
    }

    fn after_write(&mut self) -> Result<()> {
        if self.page.point_count() >= self.page_max_point_count {
            self.seal_cur_page(false)?;
        }
        Ok(())
    }

    /// True if the chunk holds any data, sealed or pending.
    pub fn has_data(&self) -> bool {
        self.num_pages > 0 || self.page.point_count() > 0
    }

    /// Rough in-memory footprint, used by the flush policy.
    pub fn estimated_memory(&self) -> usize {
        let stashed = self
            .first_page
            .as_ref()
            .map(|p| p.payload.len())
            .unwrap_or(0);
        self.chunk_data.len() + stashed + self.page.estimated_size() + CHUNK_OVERHEAD_BYTES
    }

    /// Ends the chunk: seals any pending page and finalizes the buffer.
    ///
    /// A chunk whose last page was already stashed (the page budget
    /// aligned exactly) stays in single-page form.
    pub fn end_chunk(&mut self) -> Result<()> {
        if self.page.point_count() > 0 {
            self.seal_cur_page(true)?;
        } else if let Some(first) = self.first_page.take() {
            self.chunk_data.extend_from_slice(&first.payload);
        }
        Ok(())
    }

    /// The chunk header for the sealed buffer. Valid after
    /// [`end_chunk`](Self::end_chunk).
    pub fn header(&self) -> ChunkHeader {
        ChunkHeader {
            measurement_name: self.measurement_name.clone(),
            data_size: self.chunk_data.len() as u32,
            data_type: self.data_type,
            compression: self.compression,
            encoding: self.encoding,
            single_page: self.num_pages <= 1,
            mask: self.mask,
        }
    }

    /// The sealed chunk bytes (page sequence).
    pub fn chunk_data(&self) -> &[u8] {
        &self.chunk_data
    }

    /// Builds the chunk meta for a chunk flushed at `offset`.
    pub fn chunk_meta(&self, offset: i64) -> ChunkMeta {
        ChunkMeta {
            measurement_name: self.measurement_name.clone(),
            offset_of_chunk_header: offset,
            data_type: if self.mask & crate::meta::TIME_CHUNK_MASK != 0 {
                DataType::Vector
            } else {
                self.data_type
            },
            mask: self.mask,
            statistics: self.chunk_statistics.clone(),
        }
    }
}

/// Chunk writer of a non-aligned field column.
pub type DataChunkWriter = ChunkWriter<DataPageWriter>;

impl DataChunkWriter {
    /// Creates a chunk writer for one `(device, measurement)`.
    pub fn new(
        measurement_name: impl Into<String>,
        data_type: DataType,
        encoding: Encoding,
        compression: Compression,
        time_encoding: Encoding,
        page_max_point_count: u32,
    ) -> Result<Self> {
        let page = DataPageWriter::new(data_type, encoding, compression, time_encoding)?;
        Ok(Self::with_page(
            measurement_name.into(),
            data_type,
            encoding,
            compression,
            0,
            page_max_point_count,
            Statistics::for_type(data_type),
            page,
        ))
    }

    /// Appends one point; seals the page when the page budget is
    /// reached.
    pub fn write(&mut self, time: i64, value: &Value) -> Result<()> {
        self.page.write(time, value)?;
        self.after_write()
    }
}

/// Chunk writer of the shared time column of an aligned device.
pub type TimeChunkWriter = ChunkWriter<TimePageWriter>;

impl TimeChunkWriter {
    /// Creates a time chunk writer.
    pub fn new(
        time_encoding: Encoding,
        compression: Compression,
        page_max_point_count: u32,
    ) -> Result<Self> {
        let page = TimePageWriter::new(time_encoding, compression)?;
        Ok(Self::with_page(
            String::new(),
            DataType::I64,
            time_encoding,
            compression,
            crate::meta::TIME_CHUNK_MASK,
            page_max_point_count,
            Statistics::time(),
            page,
        ))
    }

    /// Appends one timestamp.
    pub fn write(&mut self, time: i64) -> Result<()> {
        self.page.write(time);
        self.after_write()
    }
}

/// Chunk writer of one value column of an aligned device.
pub type ValueChunkWriter = ChunkWriter<ValuePageWriter>;

impl ValueChunkWriter {
    /// Creates a value chunk writer.
    pub fn new(
        measurement_name: impl Into<String>,
        data_type: DataType,
        encoding: Encoding,
        compression: Compression,
        page_max_point_count: u32,
    ) -> Result<Self> {
        let page = ValuePageWriter::new(data_type, encoding, compression)?;
        Ok(Self::with_page(
            measurement_name.into(),
            data_type,
            encoding,
            compression,
            crate::meta::VALUE_CHUNK_MASK,
            page_max_point_count,
            Statistics::for_type(data_type),
            page,
        ))
    }

    /// Appends one row; `None` marks a null cell that still occupies a
    /// bitmap slot.
    pub fn write(&mut self, time: i64, value: Option<&Value>) -> Result<()> {
        self.page.write(time, value)?;
        self.after_write()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::ONLY_ONE_PAGE_CHUNK_HEADER_MARKER;

    fn chunk_bytes(writer: &ChunkWriter<impl PageBuilder>) -> Vec<u8> {
        let mut out = Vec::new();
        writer.header().serialize_to(&mut out);
        out.extend_from_slice(writer.chunk_data());
        out
    }

    #[test]
    fn test_single_page_chunk_has_no_page_statistics() {
        let mut writer = DataChunkWriter::new(
            "s1",
            DataType::I64,
            Encoding::Plain,
            Compression::Uncompressed,
            Encoding::Plain,
            100,
        )
        .unwrap();
        for i in 0..5 {
            writer.write(i, &Value::I64(i)).unwrap();
        }
        writer.end_chunk().unwrap();

        let header = writer.header();
        assert!(header.single_page);

        let bytes = chunk_bytes(&writer);
        assert_eq!(bytes[0], ONLY_ONE_PAGE_CHUNK_HEADER_MARKER);
    }

    #[test]
    fn test_threshold_aligned_chunk_matches_by_design_single_page() {
        // page budget of exactly 5 stashes the page, then end_chunk with
        // an empty current page must produce the same bytes as a chunk
        // that never hit the budget
        let write_rows = |page_max: u32| {
            let mut writer = DataChunkWriter::new(
                "s1",
                DataType::I64,
                Encoding::Ts2Diff,
                Compression::Lz4,
                Encoding::Ts2Diff,
                page_max,
            )
            .unwrap();
            for i in 0..5 {
                writer.write(i * 10, &Value::I64(i)).unwrap();
            }
            writer.end_chunk().unwrap();
            chunk_bytes(&writer)
        };

        assert_eq!(write_rows(5), write_rows(100));
    }

    #[test]
    fn test_multi_page_chunk_reconstructs_first_page_statistics() {
        let mut writer = DataChunkWriter::new(
            "s1",
            DataType::I64,
            Encoding::Plain,
            Compression::Uncompressed,
            Encoding::Plain,
            3,
        )
        .unwrap();
        for i in 0..7 {
            writer.write(i, &Value::I64(i * 2)).unwrap();
        }
        writer.end_chunk().unwrap();

        let header = writer.header();
        assert!(!header.single_page);
        // pages of 3 + 3 + 1
        assert_eq!(writer.num_pages, 3);
        assert_eq!(writer.chunk_statistics.count(), 7);
    }

    #[test]
    fn test_value_chunk_counts_rows_not_values() {
        let mut writer = ValueChunkWriter::new(
            "s1",
            DataType::F64,
            Encoding::Gorilla,
            Compression::Uncompressed,
            2,
        )
        .unwrap();
        writer.write(1, None).unwrap();
        writer.write(2, None).unwrap();
        // two null rows still filled a page
        assert_eq!(writer.num_pages, 1);
        writer.write(3, Some(&Value::F64(1.0))).unwrap();
        writer.end_chunk().unwrap();
        assert_eq!(writer.chunk_statistics.count(), 1);
        assert!(writer.has_data());
    }

    #[test]
    fn test_empty_chunk_has_no_data() {
        let writer = TimeChunkWriter::new(Encoding::Ts2Diff, Compression::Lz4, 10).unwrap();
        assert!(!writer.has_data());
    }
}
