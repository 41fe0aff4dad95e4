//! End-to-end write/read round trips over real files.

use tempfile::TempDir;
use tsfile::{
    ColumnCategory, ColumnSchema, DataType, TableSchema, Tablet, TsFileConfig, TsFileReader,
    TsFileWriter, Value,
};

fn schema_str_i64(table: &str) -> TableSchema {
    TableSchema::new(
        table,
        vec![
            ColumnSchema::new("id", DataType::Str, ColumnCategory::Tag),
            ColumnSchema::new("v", DataType::I64, ColumnCategory::Field),
        ],
    )
}

#[test]
fn test_empty_table_close_and_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("empty.tsfile");

    let mut writer = TsFileWriter::create(&path).unwrap();
    writer.register_table(schema_str_i64("t")).unwrap();
    writer.close().unwrap();

    let reader = TsFileReader::open(&path).unwrap();
    assert_eq!(reader.tables().collect::<Vec<_>>(), vec!["t"]);
    assert!(reader.device_ids("t").unwrap().is_empty());

    let mut rs = reader
        .query_table("t", &["id", "v"], i64::MIN, i64::MAX)
        .unwrap();
    assert_eq!(
        rs.metadata().column_names(),
        &["time".to_string(), "id".to_string(), "v".to_string()]
    );
    assert_eq!(
        rs.metadata().data_types(),
        &[DataType::I64, DataType::Str, DataType::I64]
    );
    assert!(!rs.next().unwrap());
}

#[test]
fn test_aligned_single_device_with_null() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("aligned.tsfile");

    let mut writer = TsFileWriter::create(&path).unwrap();
    writer
        .register_table(TableSchema::new(
            "t",
            vec![
                ColumnSchema::new("id", DataType::Str, ColumnCategory::Tag),
                ColumnSchema::new("s", DataType::I32, ColumnCategory::Field),
            ],
        ))
        .unwrap();

    let mut tablet =
        Tablet::with_columns("t", &[("id", DataType::Str), ("s", DataType::I32)], 8).unwrap();
    tablet
        .add_row(1, &[Some(Value::Str("d1".into())), Some(Value::I32(10))])
        .unwrap();
    tablet
        .add_row(2, &[Some(Value::Str("d1".into())), Some(Value::I32(20))])
        .unwrap();
    tablet
        .add_row(3, &[Some(Value::Str("d1".into())), None])
        .unwrap();
    writer.write_table(&tablet).unwrap();
    writer.close().unwrap();

    let reader = TsFileReader::open(&path).unwrap();
    let mut rs = reader
        .query_table("t", &["id", "s"], i64::MIN, i64::MAX)
        .unwrap();

    let mut rows = Vec::new();
    while rs.next().unwrap() {
        let time = rs.get_i64(0).unwrap();
        let id = rs.get_string(1).unwrap();
        let s = if rs.is_null(2).unwrap() {
            None
        } else {
            Some(rs.get_i32(2).unwrap())
        };
        rows.push((time, id, s));
    }
    assert_eq!(
        rows,
        vec![
            (1, "d1".to_string(), Some(10)),
            (2, "d1".to_string(), Some(20)),
            (3, "d1".to_string(), None),
        ]
    );
}

#[test]
fn test_two_devices_device_ordering() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("two_devices.tsfile");

    let mut writer = TsFileWriter::create(&path).unwrap();
    writer.register_table(schema_str_i64("t")).unwrap();

    let mut tablet =
        Tablet::with_columns("t", &[("id", DataType::Str), ("v", DataType::I64)], 8).unwrap();
    tablet
        .add_row(5, &[Some(Value::Str("A".into())), Some(Value::I64(100))])
        .unwrap();
    tablet
        .add_row(6, &[Some(Value::Str("A".into())), Some(Value::I64(200))])
        .unwrap();
    tablet
        .add_row(5, &[Some(Value::Str("B".into())), Some(Value::I64(999))])
        .unwrap();
    writer.write_table(&tablet).unwrap();
    writer.close().unwrap();

    let reader = TsFileReader::open(&path).unwrap();
    let mut rs = reader
        .query_table("t", &["id", "v"], i64::MIN, i64::MAX)
        .unwrap();

    let mut rows = Vec::new();
    while rs.next().unwrap() {
        rows.push((
            rs.get_string(1).unwrap(),
            rs.get_i64(0).unwrap(),
            rs.get_i64(2).unwrap(),
        ));
    }
    // the A block precedes the B block, times ascend within each block
    assert_eq!(
        rows,
        vec![
            ("A".to_string(), 5, 100),
            ("A".to_string(), 6, 200),
            ("B".to_string(), 5, 999),
        ]
    );
}

#[test]
fn test_cross_chunk_merge_after_forced_flushes() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cross_chunk.tsfile");
    const N: i64 = 50;

    let mut writer = TsFileWriter::create(&path).unwrap();
    writer.register_table(schema_str_i64("t")).unwrap();

    // two explicit flushes carve the series into two chunk groups
    for half in 0..2i64 {
        let mut tablet =
            Tablet::with_columns("t", &[("id", DataType::Str), ("v", DataType::I64)], 64)
                .unwrap();
        for i in 0..N {
            let t = half * N + i + 1;
            tablet
                .add_row(t, &[Some(Value::Str("d".into())), Some(Value::I64(t * 3))])
                .unwrap();
        }
        writer.write_table(&tablet).unwrap();
        writer.flush().unwrap();
    }
    writer.close().unwrap();

    let reader = TsFileReader::open(&path).unwrap();
    let mut rs = reader
        .query_table("t", &["v"], i64::MIN, i64::MAX)
        .unwrap();
    let mut times = Vec::new();
    while rs.next().unwrap() {
        let t = rs.get_i64(0).unwrap();
        assert_eq!(rs.get_i64(1).unwrap(), t * 3);
        times.push(t);
    }
    assert_eq!(times, (1..=2 * N).collect::<Vec<_>>());
}

#[test]
fn test_schema_mismatch_leaves_file_valid() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mismatch.tsfile");

    let mut writer = TsFileWriter::create(&path).unwrap();
    writer
        .register_table(TableSchema::new(
            "t",
            vec![
                ColumnSchema::new("id", DataType::Str, ColumnCategory::Tag),
                ColumnSchema::new("v", DataType::I32, ColumnCategory::Field),
            ],
        ))
        .unwrap();

    let mut bad =
        Tablet::with_columns("t", &[("id", DataType::Str), ("v", DataType::I64)], 4).unwrap();
    bad.add_row(1, &[Some(Value::Str("d".into())), Some(Value::I64(1))])
        .unwrap();
    let err = writer.write_table(&bad).unwrap_err();
    assert!(matches!(err, tsfile::TsFileError::TypeMismatch { .. }));

    // a good tablet still goes through and the file closes valid
    let mut good =
        Tablet::with_columns("t", &[("id", DataType::Str), ("v", DataType::I32)], 4).unwrap();
    good.add_row(1, &[Some(Value::Str("d".into())), Some(Value::I32(7))])
        .unwrap();
    writer.write_table(&good).unwrap();
    writer.close().unwrap();

    let reader = TsFileReader::open(&path).unwrap();
    let mut rs = reader.query_table("t", &["v"], i64::MIN, i64::MAX).unwrap();
    assert!(rs.next().unwrap());
    assert_eq!(rs.get_i32(1).unwrap(), 7);
    assert!(!rs.next().unwrap());
}

#[test]
fn test_unknown_column_and_table_errors() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("errors.tsfile");

    let mut writer = TsFileWriter::create(&path).unwrap();
    writer.register_table(schema_str_i64("t")).unwrap();
    assert!(matches!(
        writer.register_table(schema_str_i64("t")),
        Err(tsfile::TsFileError::TableAlreadyExists(_))
    ));

    let mut tablet = Tablet::with_columns("nope", &[("v", DataType::I64)], 4).unwrap();
    tablet.add_row(1, &[Some(Value::I64(1))]).unwrap();
    assert!(matches!(
        writer.write_table(&tablet),
        Err(tsfile::TsFileError::TableNotRegistered(_))
    ));

    let mut tablet = Tablet::with_columns("t", &[("ghost", DataType::I64)], 4).unwrap();
    tablet.add_row(1, &[Some(Value::I64(1))]).unwrap();
    assert!(matches!(
        writer.write_table(&tablet),
        Err(tsfile::TsFileError::ColumnUnknown(_))
    ));
    writer.close().unwrap();

    let reader = TsFileReader::open(&path).unwrap();
    assert!(matches!(
        reader.query_table("nope", &["v"], 0, 10),
        Err(tsfile::TsFileError::NotExist(_))
    ));
    assert!(matches!(
        reader.query_table("t", &["ghost"], 0, 10),
        Err(tsfile::TsFileError::ColumnUnknown(_))
    ));
}

#[test]
fn test_create_refuses_existing_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("exists.tsfile");
    std::fs::write(&path, b"occupied").unwrap();
    assert!(matches!(
        TsFileWriter::create(&path),
        Err(tsfile::TsFileError::FileAlreadyExists(_))
    ));
}

#[test]
fn test_non_aligned_multiset_roundtrip_all_types() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("types.tsfile");

    let schema = TableSchema::new(
        "m",
        vec![
            ColumnSchema::new("tag", DataType::Str, ColumnCategory::Tag),
            ColumnSchema::new("b", DataType::Bool, ColumnCategory::Field),
            ColumnSchema::new("i", DataType::I32, ColumnCategory::Field),
            ColumnSchema::new("l", DataType::I64, ColumnCategory::Field),
            ColumnSchema::new("f", DataType::F32, ColumnCategory::Field),
            ColumnSchema::new("d", DataType::F64, ColumnCategory::Field),
            ColumnSchema::new("s", DataType::Str, ColumnCategory::Field),
        ],
    );

    let config = TsFileConfig::new().with_aligned_tables(false);
    let mut writer = TsFileWriter::create_with_config(&path, config.clone()).unwrap();
    writer.register_table(schema).unwrap();

    let mut tablet = Tablet::with_columns(
        "m",
        &[
            ("tag", DataType::Str),
            ("b", DataType::Bool),
            ("i", DataType::I32),
            ("l", DataType::I64),
            ("f", DataType::F32),
            ("d", DataType::F64),
            ("s", DataType::Str),
        ],
        64,
    )
    .unwrap();
    for t in 1..=20i64 {
        tablet
            .add_row(
                t,
                &[
                    Some(Value::Str("dev".into())),
                    Some(Value::Bool(t % 2 == 0)),
                    Some(Value::I32(t as i32 * 10)),
                    Some(Value::I64(t * 1000)),
                    Some(Value::F32(t as f32 / 2.0)),
                    Some(Value::F64(t as f64 * 1.5)),
                    Some(Value::Str(format!("row-{}", t))),
                ],
            )
            .unwrap();
    }
    writer.write_table(&tablet).unwrap();
    writer.close().unwrap();

    let reader = TsFileReader::open_with_config(&path, config).unwrap();
    let mut rs = reader
        .query_table("m", &["b", "i", "l", "f", "d", "s", "tag"], i64::MIN, i64::MAX)
        .unwrap();
    let mut count = 0i64;
    while rs.next().unwrap() {
        count += 1;
        let t = rs.get_i64(0).unwrap();
        assert_eq!(t, count);
        assert_eq!(rs.get_bool(1).unwrap(), t % 2 == 0);
        assert_eq!(rs.get_i32(2).unwrap(), t as i32 * 10);
        assert_eq!(rs.get_i64(3).unwrap(), t * 1000);
        assert_eq!(rs.get_f32(4).unwrap(), t as f32 / 2.0);
        assert_eq!(rs.get_f64(5).unwrap(), t as f64 * 1.5);
        assert_eq!(rs.get_string(6).unwrap(), format!("row-{}", t));
        assert_eq!(rs.get_string(7).unwrap(), "dev");
    }
    assert_eq!(count, 20);
}

#[test]
fn test_series_iterator_per_device_api() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("series.tsfile");

    let mut writer = TsFileWriter::create(&path).unwrap();
    writer.register_table(schema_str_i64("t")).unwrap();
    let mut tablet =
        Tablet::with_columns("t", &[("id", DataType::Str), ("v", DataType::I64)], 16).unwrap();
    for t in 1..=10 {
        tablet
            .add_row(t, &[Some(Value::Str("d9".into())), Some(Value::I64(t))])
            .unwrap();
    }
    writer.write_table(&tablet).unwrap();
    writer.close().unwrap();

    let reader = TsFileReader::open(&path).unwrap();
    let device = tsfile::DeviceId::from_table_and_tags("t", &["d9".to_string()]);
    let mut iter = reader
        .series_iterator(&device, "v", tsfile::TimeRange::all())
        .unwrap();
    let page = iter.next_page().unwrap().unwrap();
    assert_eq!(page.times, (1..=10).collect::<Vec<_>>());
    assert!(iter.next_page().unwrap().is_none());

    // a device the bloom filter never saw fails without any tree read
    let ghost = tsfile::DeviceId::from_table_and_tags("t", &["ghost".to_string()]);
    assert!(matches!(
        reader.series_iterator(&ghost, "v", tsfile::TimeRange::all()),
        Err(tsfile::TsFileError::DeviceNotExist(_))
    ));
}
