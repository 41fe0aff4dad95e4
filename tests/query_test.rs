//! Query-path behaviour: time filtering, statistics pruning, orderings.

use tempfile::TempDir;
use tsfile::{
    ColumnCategory, ColumnSchema, DataType, ScanOrdering, TableSchema, Tablet, TsFileConfig,
    TsFileReader, TsFileWriter, Value,
};

fn schema(table: &str) -> TableSchema {
    TableSchema::new(
        table,
        vec![
            ColumnSchema::new("id", DataType::Str, ColumnCategory::Tag),
            ColumnSchema::new("v", DataType::I64, ColumnCategory::Field),
        ],
    )
}

/// Ten devices, each covering its own thousand-tick window.
fn write_windowed_devices(path: &std::path::Path, config: &TsFileConfig) {
    let mut writer = TsFileWriter::create_with_config(path, config.clone()).unwrap();
    writer.register_table(schema("t")).unwrap();
    for dev in 0..10i64 {
        let mut tablet =
            Tablet::with_columns("t", &[("id", DataType::Str), ("v", DataType::I64)], 1000)
                .unwrap();
        let base = dev * 1000;
        for i in 0..1000 {
            tablet
                .add_row(
                    base + i,
                    &[
                        Some(Value::Str(format!("dev{}", dev))),
                        Some(Value::I64(base + i)),
                    ],
                )
                .unwrap();
        }
        writer.write_table(&tablet).unwrap();
    }
    writer.close().unwrap();
}

#[test]
fn test_time_filter_exact_bounds() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bounds.tsfile");
    let config = TsFileConfig::default();
    write_windowed_devices(&path, &config);

    let reader = TsFileReader::open(&path).unwrap();
    let mut rs = reader.query_table("t", &["v"], 2500, 3499).unwrap();
    let mut times = Vec::new();
    while rs.next().unwrap() {
        let t = rs.get_i64(0).unwrap();
        assert!((2500..=3499).contains(&t), "row time {} out of range", t);
        times.push(t);
    }
    // every row of the window is present: 500 from dev2, 500 from dev3
    assert_eq!(times.len(), 1000);
    assert_eq!(times[0], 2500);
    assert_eq!(*times.last().unwrap(), 3499);
}

#[test]
fn test_statistics_pruning_reads_one_chunk() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("pruning.tsfile");
    let config = TsFileConfig::new().with_aligned_tables(false);
    write_windowed_devices(&path, &config);

    let reader = TsFileReader::open_with_config(&path, config).unwrap();
    let before = reader.read_metrics();

    let mut rs = reader.query_table("t", &["v"], 4200, 4300).unwrap();
    let mut count = 0;
    while rs.next().unwrap() {
        count += 1;
    }
    assert_eq!(count, 101);

    // only the one device whose window overlaps the filter pays a
    // chunk-data read; the other nine are pruned by statistics
    let after = reader.read_metrics();
    assert_eq!(after.chunk_reads - before.chunk_reads, 1);
}

#[test]
fn test_filter_outside_all_windows_reads_no_chunks() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nohit.tsfile");
    let config = TsFileConfig::new().with_aligned_tables(false);
    write_windowed_devices(&path, &config);

    let reader = TsFileReader::open_with_config(&path, config).unwrap();
    let before = reader.read_metrics();
    let mut rs = reader.query_table("t", &["v"], 50_000, 60_000).unwrap();
    assert!(!rs.next().unwrap());
    let after = reader.read_metrics();
    assert_eq!(after.chunk_reads - before.chunk_reads, 0);
}

#[test]
fn test_time_ordering_unsupported() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ordering.tsfile");
    let config = TsFileConfig::default();
    write_windowed_devices(&path, &config);

    let reader = TsFileReader::open(&path).unwrap();
    assert!(matches!(
        reader.query_table_ordered("t", &["v"], 0, 100, ScanOrdering::Time),
        Err(tsfile::TsFileError::UnsupportedOrdering)
    ));
    assert!(reader
        .query_table_ordered("t", &["v"], 0, 100, ScanOrdering::Device)
        .is_ok());
}

#[test]
fn test_bloom_filter_accepts_every_written_device() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bloom.tsfile");
    let config = TsFileConfig::default();
    write_windowed_devices(&path, &config);

    let reader = TsFileReader::open(&path).unwrap();
    for dev in 0..10 {
        let device =
            tsfile::DeviceId::from_table_and_tags("t", &[format!("dev{}", dev)]);
        assert!(reader.maybe_contains_device(&device));
    }
}

#[test]
fn test_merge_is_monotonic_per_device_with_two_fields() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("merge.tsfile");

    let table = TableSchema::new(
        "t",
        vec![
            ColumnSchema::new("id", DataType::Str, ColumnCategory::Tag),
            ColumnSchema::new("a", DataType::I64, ColumnCategory::Field),
            ColumnSchema::new("b", DataType::F64, ColumnCategory::Field),
        ],
    );
    let config = TsFileConfig::new().with_aligned_tables(false);
    let mut writer = TsFileWriter::create_with_config(&path, config.clone()).unwrap();
    writer.register_table(table).unwrap();

    // column a at even ticks, column b at odd ticks: the merge must
    // interleave them in time order with nulls on the absent side
    let mut tablet = Tablet::with_columns(
        "t",
        &[
            ("id", DataType::Str),
            ("a", DataType::I64),
            ("b", DataType::F64),
        ],
        64,
    )
    .unwrap();
    for t in 1..=20i64 {
        let (a, b) = if t % 2 == 0 {
            (Some(Value::I64(t)), None)
        } else {
            (None, Some(Value::F64(t as f64)))
        };
        tablet
            .add_row(t, &[Some(Value::Str("d".into())), a, b])
            .unwrap();
    }
    writer.write_table(&tablet).unwrap();
    writer.close().unwrap();

    let reader = TsFileReader::open_with_config(&path, config).unwrap();
    let mut rs = reader
        .query_table("t", &["a", "b"], i64::MIN, i64::MAX)
        .unwrap();
    let mut last_time = i64::MIN;
    let mut rows = 0;
    while rs.next().unwrap() {
        let t = rs.get_i64(0).unwrap();
        assert!(t > last_time, "times must strictly ascend within a device");
        last_time = t;
        if t % 2 == 0 {
            assert_eq!(rs.get_i64(1).unwrap(), t);
            assert!(rs.is_null(2).unwrap());
        } else {
            assert!(rs.is_null(1).unwrap());
            assert_eq!(rs.get_f64(2).unwrap(), t as f64);
        }
        rows += 1;
    }
    assert_eq!(rows, 20);
}

#[test]
fn test_small_blocks_cover_all_rows() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("blocks.tsfile");
    let config = TsFileConfig::new().with_block_size(7);
    write_windowed_devices(&path, &config);

    let reader = TsFileReader::open_with_config(&path, config).unwrap();
    let mut rs = reader
        .query_table("t", &["id", "v"], i64::MIN, i64::MAX)
        .unwrap();
    let mut rows = 0u64;
    while rs.next().unwrap() {
        rows += 1;
    }
    assert_eq!(rows, 10_000);
}

#[test]
fn test_duplicate_requested_column_fills_both_slots() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("dup.tsfile");
    let config = TsFileConfig::default();
    write_windowed_devices(&path, &config);

    let reader = TsFileReader::open(&path).unwrap();
    let mut rs = reader.query_table("t", &["v", "v", "id"], 0, 0).unwrap();
    assert!(rs.next().unwrap());
    assert_eq!(rs.get_i64(1).unwrap(), 0);
    assert_eq!(rs.get_i64(2).unwrap(), 0);
    assert_eq!(rs.get_string(3).unwrap(), "dev0");
    assert_eq!(rs.column_index("id").unwrap(), 3);
    assert!(!rs.next().unwrap());
}
