//! Lazy series scans: chunk loading, page iteration and decoding, with
//! statistics-driven pruning at the series, chunk and page level.

use crate::codec::compression::decompress;
use crate::codec::encoding::{decode_times, decode_values};
use crate::codec::ByteReader;
use crate::error::{Result, TsFileError};
use crate::meta::{ChunkHeader, ChunkMeta, PageHeader, TIME_CHUNK_MASK};
use crate::read::file::{SeriesIndex, TsFileReader};
use crate::schema::{DataType, Encoding, TimeRange, Value};

/// First read window when loading a chunk; grown when a header does not
/// fit.
const CHUNK_HEAD_READ_SIZE: u64 = 256;

/// One decoded page: the co-located time column plus the value column.
/// `values[i]` is `None` for a null row of an aligned value chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPage {
    /// Row timestamps, strictly increasing.
    pub times: Vec<i64>,
    /// Row values, one per timestamp.
    pub values: Vec<Option<Value>>,
}

impl DecodedPage {
    /// Number of rows.
    pub fn len(&self) -> usize {
        self.times.len()
    }

    /// True if the page holds no rows.
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

/// One loaded chunk: its header and the page sequence bytes.
pub(crate) struct OpenChunk {
    pub(crate) header: ChunkHeader,
    data: Vec<u8>,
    cursor: usize,
}

impl OpenChunk {
    pub(crate) fn new(header: ChunkHeader, data: Vec<u8>) -> Self {
        Self {
            header,
            data,
            cursor: 0,
        }
    }

    fn stat_type(&self) -> Option<DataType> {
        if self.header.single_page {
            None
        } else if self.header.mask & TIME_CHUNK_MASK != 0 {
            Some(DataType::Vector)
        } else {
            Some(self.header.data_type)
        }
    }

    /// Parses the next page header and returns it with the still
    /// compressed payload.
    pub(crate) fn next_page(&mut self) -> Result<Option<(PageHeader, Vec<u8>)>> {
        if self.cursor >= self.data.len() {
            return Ok(None);
        }
        let mut reader = ByteReader::new(&self.data[self.cursor..]);
        let page_header = PageHeader::deserialize_from(&mut reader, self.stat_type())?;
        let payload_start = self.cursor + reader.position();
        let payload_end = payload_start + page_header.compressed_size as usize;
        if payload_end > self.data.len() {
            return Err(TsFileError::Corrupted(format!(
                "page payload of {} bytes crosses the chunk end",
                page_header.compressed_size
            )));
        }
        let payload = self.data[payload_start..payload_end].to_vec();
        self.cursor = payload_end;
        Ok(Some((page_header, payload)))
    }
}

/// Loads the chunk at `offset`: header plus page bytes.
pub(crate) fn load_chunk(reader: &TsFileReader, offset: i64) -> Result<OpenChunk> {
    let bound = reader.data_region_end();
    let offset = offset as u64;
    if offset >= bound {
        return Err(TsFileError::Corrupted(format!(
            "chunk offset {} lies beyond the data region end {}",
            offset, bound
        )));
    }

    // headers are small; grow the window only for pathological names
    let mut window = CHUNK_HEAD_READ_SIZE.min(bound - offset);
    let (header, header_len, head) = loop {
        let head = reader.read_at(offset, window as usize)?;
        let mut r = ByteReader::new(&head);
        match ChunkHeader::deserialize_from(&mut r) {
            Ok(header) => break (header, r.position(), head),
            Err(e) => {
                if window < bound - offset {
                    window = (window * 4).min(bound - offset);
                } else {
                    return Err(e);
                }
            }
        }
    };

    let data_len = header.data_size as usize;
    let data = if head.len() >= header_len + data_len {
        head[header_len..header_len + data_len].to_vec()
    } else {
        reader.read_at(offset + header_len as u64, data_len)?
    };
    reader.count_chunk_read();
    Ok(OpenChunk::new(header, data))
}

fn decode_plain_page(
    chunk: &ChunkHeader,
    page: &PageHeader,
    payload: &[u8],
    time_encoding: Encoding,
) -> Result<DecodedPage> {
    let raw = decompress(chunk.compression, payload, page.uncompressed_size as usize)?;
    let mut reader = ByteReader::new(&raw);
    let time_len = reader.read_var_u32()? as usize;
    let time_buf = reader.read_bytes(time_len)?;
    let value_buf = reader.read_bytes(reader.remaining())?;
    let times = decode_times(time_encoding, time_buf)?;
    let values = decode_values(chunk.data_type, chunk.encoding, value_buf)?;
    if times.len() != values.len() {
        return Err(TsFileError::Corrupted(format!(
            "page decodes to {} times but {} values",
            times.len(),
            values.len()
        )));
    }
    Ok(DecodedPage {
        times,
        values: values.into_iter().map(Some).collect(),
    })
}

fn decode_aligned_page(
    time_chunk: &ChunkHeader,
    time_page: &PageHeader,
    time_payload: &[u8],
    value_chunk: &ChunkHeader,
    value_page: &PageHeader,
    value_payload: &[u8],
) -> Result<DecodedPage> {
    let time_raw = decompress(
        time_chunk.compression,
        time_payload,
        time_page.uncompressed_size as usize,
    )?;
    let times = decode_times(time_chunk.encoding, &time_raw)?;

    let value_raw = decompress(
        value_chunk.compression,
        value_payload,
        value_page.uncompressed_size as usize,
    )?;
    let mut reader = ByteReader::new(&value_raw);
    let row_count = reader.read_var_u32()? as usize;
    if row_count != times.len() {
        return Err(TsFileError::Corrupted(format!(
            "aligned page carries {} rows but its time page {}",
            row_count,
            times.len()
        )));
    }
    let bitmap = reader.read_bytes(row_count.div_ceil(8))?;
    let value_buf = reader.read_bytes(reader.remaining())?;
    let decoded = decode_values(value_chunk.data_type, value_chunk.encoding, value_buf)?;

    let mut decoded_iter = decoded.into_iter();
    let mut values = Vec::with_capacity(row_count);
    for row in 0..row_count {
        let not_null = bitmap[row / 8] & (0x80 >> (row % 8)) != 0;
        if not_null {
            let v = decoded_iter.next().ok_or_else(|| {
                TsFileError::Corrupted("value page bitmap claims more values than encoded".to_string())
            })?;
            values.push(Some(v));
        } else {
            values.push(None);
        }
    }
    Ok(DecodedPage { times, values })
}

struct OpenChunkPair {
    value: OpenChunk,
    time: Option<OpenChunk>,
}

/// Lazy scan over one `(device, measurement)` series: decodes pages of
/// statistics-matching chunks in file order.
pub struct SeriesScanIterator<'a> {
    reader: &'a TsFileReader,
    time_filter: TimeRange,
    chunks: Vec<ChunkMeta>,
    time_chunks: Vec<ChunkMeta>,
    aligned: bool,
    next_chunk: usize,
    current: Option<OpenChunkPair>,
}

impl<'a> SeriesScanIterator<'a> {
    pub(crate) fn new(
        reader: &'a TsFileReader,
        index: SeriesIndex,
        time_filter: TimeRange,
    ) -> Result<Self> {
        let (chunks, time_chunks, aligned) = match index {
            SeriesIndex::Single(idx) => {
                let chunks = if idx.statistics.overlaps(&time_filter) {
                    idx.chunk_metas
                        .into_iter()
                        .filter(|m| m.statistics.overlaps(&time_filter))
                        .collect()
                } else {
                    Vec::new()
                };
                (chunks, Vec::new(), false)
            }
            SeriesIndex::Aligned(idx) => {
                if idx.time.chunk_metas.len() != idx.value.chunk_metas.len() {
                    return Err(TsFileError::MetaError(format!(
                        "aligned series '{}' has {} value chunks but {} time chunks",
                        idx.value.measurement_name,
                        idx.value.chunk_metas.len(),
                        idx.time.chunk_metas.len()
                    )));
                }
                let mut chunks = Vec::new();
                let mut time_chunks = Vec::new();
                if idx.value.statistics.overlaps(&time_filter) {
                    for (value_meta, time_meta) in
                        idx.value.chunk_metas.into_iter().zip(idx.time.chunk_metas)
                    {
                        if value_meta.statistics.overlaps(&time_filter) {
                            chunks.push(value_meta);
                            time_chunks.push(time_meta);
                        }
                    }
                }
                (chunks, time_chunks, true)
            }
        };
        Ok(Self {
            reader,
            time_filter,
            chunks,
            time_chunks,
            aligned,
            next_chunk: 0,
            current: None,
        })
    }

    /// Decodes the next page whose statistics satisfy the time filter.
    /// `Ok(None)` once all matching chunks are consumed.
    pub fn next_page(&mut self) -> Result<Option<DecodedPage>> {
        loop {
            if self.current.is_none() {
                if self.next_chunk >= self.chunks.len() {
                    return Ok(None);
                }
                let value_meta = &self.chunks[self.next_chunk];
                let value = load_chunk(self.reader, value_meta.offset_of_chunk_header)?;
                let time = if self.aligned {
                    let time_meta = &self.time_chunks[self.next_chunk];
                    Some(load_chunk(self.reader, time_meta.offset_of_chunk_header)?)
                } else {
                    None
                };
                self.next_chunk += 1;
                self.current = Some(OpenChunkPair { value, time });
            }

            let pair = self.current.as_mut().expect("current chunk was just set");
            let Some((value_page, value_payload)) = pair.value.next_page()? else {
                self.current = None;
                continue;
            };

            if let Some(time_chunk) = pair.time.as_mut() {
                let Some((time_page, time_payload)) = time_chunk.next_page()? else {
                    return Err(TsFileError::Corrupted(
                        "aligned value chunk has more pages than its time chunk".to_string(),
                    ));
                };
                // page-level pruning by the time page window
                if let Some(stats) = &time_page.statistics {
                    if !stats.overlaps(&self.time_filter) {
                        continue;
                    }
                }
                let page = decode_aligned_page(
                    &time_chunk.header,
                    &time_page,
                    &time_payload,
                    &pair.value.header,
                    &value_page,
                    &value_payload,
                )?;
                return Ok(Some(page));
            }

            if let Some(stats) = &value_page.statistics {
                if !stats.overlaps(&self.time_filter) {
                    continue;
                }
            }
            let page = decode_plain_page(
                &pair.value.header,
                &value_page,
                &value_payload,
                self.reader.time_encoding(),
            )?;
            return Ok(Some(page));
        }
    }
}
