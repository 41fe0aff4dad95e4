//! Page writers: encode one column page and compute its statistics.
//!
//! Three flavours exist: a data page (time plus values, non-aligned
//! chunks), a time page (aligned time chunk) and a value page (aligned
//! value chunk, with a not-null bitmap so null rows keep their slot and
//! page boundaries stay in lockstep with the time chunk).

use crate::codec::compression::compress;
use crate::codec::encoding::{TimeEncoder, ValueEncoder};
use crate::codec::write_var_u32;
use crate::error::Result;
use crate::schema::{Compression, DataType, Encoding, Value};
use crate::stat::Statistics;
use bitvec::prelude::*;

/// An encoded, compressed page ready to enter a chunk.
#[derive(Debug, Clone)]
pub struct SealedPage {
    /// Payload size before compression.
    pub uncompressed_size: u32,
    /// Payload size after compression.
    pub compressed_size: u32,
    /// Statistics over the page.
    pub statistics: Statistics,
    /// Compressed payload bytes.
    pub payload: Vec<u8>,
}

/// Common behaviour of the three page writer flavours.
pub trait PageBuilder {
    /// Rows in the current page (nulls included for value pages).
    fn point_count(&self) -> u32;
    /// Rough in-memory size of the page so far.
    fn estimated_size(&self) -> usize;
    /// Encodes, compresses and resets the current page.
    fn seal(&mut self) -> Result<SealedPage>;
}

fn seal_payload(
    compression: Compression,
    statistics: &mut Statistics,
    uncompressed: Vec<u8>,
) -> SealedPage {
    let payload = compress(compression, &uncompressed);
    let empty = match statistics {
        Statistics::Time(_) => Statistics::time(),
        ref other => Statistics::for_type(other.data_type()),
    };
    SealedPage {
        uncompressed_size: uncompressed.len() as u32,
        compressed_size: payload.len() as u32,
        statistics: std::mem::replace(statistics, empty),
        payload,
    }
}

/// Page writer for a non-aligned chunk: co-located time and value
/// columns.
pub struct DataPageWriter {
    time_encoder: TimeEncoder,
    value_encoder: ValueEncoder,
    statistics: Statistics,
    compression: Compression,
}

impl DataPageWriter {
    /// Creates a page writer for the given column codecs.
    pub fn new(
        data_type: DataType,
        encoding: Encoding,
        compression: Compression,
        time_encoding: Encoding,
    ) -> Result<Self> {
        Ok(Self {
            time_encoder: TimeEncoder::new(time_encoding)?,
            value_encoder: ValueEncoder::new(data_type, encoding)?,
            statistics: Statistics::for_type(data_type),
            compression,
        })
    }

    /// Appends one `(time, value)` point.
    pub fn write(&mut self, time: i64, value: &Value) -> Result<()> {
        self.value_encoder.write(value)?;
        self.time_encoder.write(time);
        self.statistics.update(time, value);
        Ok(())
    }
}

impl PageBuilder for DataPageWriter {
    fn point_count(&self) -> u32 {
        self.time_encoder.count()
    }

    fn estimated_size(&self) -> usize {
        self.time_encoder.estimated_size() + self.value_encoder.estimated_size()
    }

    fn seal(&mut self) -> Result<SealedPage> {
        let time_buf = self.time_encoder.finish();
        let value_buf = self.value_encoder.finish();
        let mut uncompressed = Vec::with_capacity(time_buf.len() + value_buf.len() + 5);
        write_var_u32(&mut uncompressed, time_buf.len() as u32);
        uncompressed.extend_from_slice(&time_buf);
        uncompressed.extend_from_slice(&value_buf);
        Ok(seal_payload(
            self.compression,
            &mut self.statistics,
            uncompressed,
        ))
    }
}

/// Page writer for the shared time chunk of an aligned family.
pub struct TimePageWriter {
    time_encoder: TimeEncoder,
    statistics: Statistics,
    compression: Compression,
}

impl TimePageWriter {
    /// Creates a time page writer.
    pub fn new(time_encoding: Encoding, compression: Compression) -> Result<Self> {
        Ok(Self {
            time_encoder: TimeEncoder::new(time_encoding)?,
            statistics: Statistics::time(),
            compression,
        })
    }

    /// Appends one timestamp.
    pub fn write(&mut self, time: i64) {
        self.time_encoder.write(time);
        self.statistics.update_time(time);
    }
}

impl PageBuilder for TimePageWriter {
    fn point_count(&self) -> u32 {
        self.time_encoder.count()
    }

    fn estimated_size(&self) -> usize {
        self.time_encoder.estimated_size()
    }

    fn seal(&mut self) -> Result<SealedPage> {
        let uncompressed = self.time_encoder.finish();
        Ok(seal_payload(
            self.compression,
            &mut self.statistics,
            uncompressed,
        ))
    }
}

/// Page writer for one value chunk of an aligned family.
///
/// Every row occupies a bitmap slot; only not-null rows are encoded.
/// Statistics count not-null rows only.
pub struct ValuePageWriter {
    value_encoder: ValueEncoder,
    notnull: BitVec<u8, Msb0>,
    statistics: Statistics,
    compression: Compression,
}

impl ValuePageWriter {
    /// Creates a value page writer.
    pub fn new(data_type: DataType, encoding: Encoding, compression: Compression) -> Result<Self> {
        Ok(Self {
            value_encoder: ValueEncoder::new(data_type, encoding)?,
            notnull: BitVec::new(),
            statistics: Statistics::for_type(data_type),
            compression,
        })
    }

    /// Appends one row; `None` marks a null cell.
    pub fn write(&mut self, time: i64, value: Option<&Value>) -> Result<()> {
        match value {
            Some(v) => {
                self.value_encoder.write(v)?;
                self.statistics.update(time, v);
                self.notnull.push(true);
            }
            None => self.notnull.push(false),
        }
        Ok(())
    }
}

impl PageBuilder for ValuePageWriter {
    fn point_count(&self) -> u32 {
        self.notnull.len() as u32
    }

    fn estimated_size(&self) -> usize {
        self.value_encoder.estimated_size() + self.notnull.len() / 8
    }

    fn seal(&mut self) -> Result<SealedPage> {
        let row_count = self.notnull.len() as u32;
        let value_buf = self.value_encoder.finish();
        let bitmap = self.notnull.as_raw_slice();
        let mut uncompressed = Vec::with_capacity(5 + bitmap.len() + value_buf.len());
        write_var_u32(&mut uncompressed, row_count);
        uncompressed.extend_from_slice(bitmap);
        uncompressed.extend_from_slice(&value_buf);
        self.notnull = BitVec::new();
        Ok(seal_payload(
            self.compression,
            &mut self.statistics,
            uncompressed,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::compression::decompress;
    use crate::codec::encoding::{decode_times, decode_values};
    use crate::codec::ByteReader;

    #[test]
    fn test_data_page_seal_and_decode() {
        let mut page = DataPageWriter::new(
            DataType::I64,
            Encoding::Ts2Diff,
            Compression::Lz4,
            Encoding::Ts2Diff,
        )
        .unwrap();
        for i in 0..10 {
            page.write(i * 100, &Value::I64(i * 7)).unwrap();
        }
        assert_eq!(page.point_count(), 10);

        let sealed = page.seal().unwrap();
        assert_eq!(page.point_count(), 0);
        assert_eq!(sealed.statistics.count(), 10);

        let raw = decompress(
            Compression::Lz4,
            &sealed.payload,
            sealed.uncompressed_size as usize,
        )
        .unwrap();
        let mut reader = ByteReader::new(&raw);
        let time_len = reader.read_var_u32().unwrap() as usize;
        let time_buf = reader.read_bytes(time_len).unwrap();
        let value_buf = reader.read_bytes(reader.remaining()).unwrap();

        let times = decode_times(Encoding::Ts2Diff, time_buf).unwrap();
        assert_eq!(times, (0..10).map(|i| i * 100).collect::<Vec<_>>());
        let values = decode_values(DataType::I64, Encoding::Ts2Diff, value_buf).unwrap();
        assert_eq!(values.len(), 10);
    }

    #[test]
    fn test_value_page_nulls_keep_slots() {
        let mut page =
            ValuePageWriter::new(DataType::I32, Encoding::Plain, Compression::Uncompressed)
                .unwrap();
        page.write(1, Some(&Value::I32(5))).unwrap();
        page.write(2, None).unwrap();
        page.write(3, Some(&Value::I32(9))).unwrap();

        assert_eq!(page.point_count(), 3);
        let sealed = page.seal().unwrap();
        // statistics cover not-null rows only
        assert_eq!(sealed.statistics.count(), 2);

        let mut reader = ByteReader::new(&sealed.payload);
        let row_count = reader.read_var_u32().unwrap();
        assert_eq!(row_count, 3);
        let bitmap = reader.read_bytes(1).unwrap();
        assert_eq!(bitmap[0] & 0b1110_0000, 0b1010_0000);
        let values = decode_values(
            DataType::I32,
            Encoding::Plain,
            reader.read_bytes(reader.remaining()).unwrap(),
        )
        .unwrap();
        assert_eq!(values, vec![Value::I32(5), Value::I32(9)]);
    }

    #[test]
    fn test_time_page_stats() {
        let mut page = TimePageWriter::new(Encoding::Ts2Diff, Compression::Uncompressed).unwrap();
        for t in [5, 10, 15] {
            page.write(t);
        }
        let sealed = page.seal().unwrap();
        assert_eq!(sealed.statistics.count(), 3);
        assert_eq!(sealed.statistics.start_time(), 5);
        assert_eq!(sealed.statistics.end_time(), 15);
        assert_eq!(
            decode_times(Encoding::Ts2Diff, &sealed.payload).unwrap(),
            vec![5, 10, 15]
        );
    }
}
