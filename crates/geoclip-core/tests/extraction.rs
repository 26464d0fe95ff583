//! End-to-end extraction tests against local Parquet fixtures.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow_array::builder::{ListBuilder, StringBuilder};
use arrow_array::cast::AsArray;
use arrow_array::{Array, ArrayRef, BinaryArray, Float64Array, RecordBatch, StringArray, StructArray};
use arrow_schema::{DataType, Field, Fields, Schema};
use datafusion::parquet::arrow::ArrowWriter;
use datafusion::parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use geoclip_core::{
    BoundingRegion, ExtractError, ExtractionOutcome, ExtractionRequest, run_extraction,
    validate_source,
};

fn wkb_point(x: f64, y: f64) -> Vec<u8> {
    let mut wkb = vec![0x01];
    wkb.extend_from_slice(&1u32.to_le_bytes());
    wkb.extend_from_slice(&x.to_le_bytes());
    wkb.extend_from_slice(&y.to_le_bytes());
    wkb
}

fn bbox_fields() -> Fields {
    Fields::from(vec![
        Field::new("xmin", DataType::Float64, true),
        Field::new("ymin", DataType::Float64, true),
        Field::new("xmax", DataType::Float64, true),
        Field::new("ymax", DataType::Float64, true),
    ])
}

fn names_fields() -> Fields {
    Fields::from(vec![Field::new("primary", DataType::Utf8, true)])
}

/// Three point features: two inside the unit test region, one far away.
fn fixture_batch(with_bbox: bool) -> RecordBatch {
    let points = [(0.5, 0.5), (50.0, 50.0), (0.9, 0.1)];

    let mut fields = vec![
        Field::new("id", DataType::Utf8, true),
        Field::new("names", DataType::Struct(names_fields()), true),
        Field::new(
            "tags",
            DataType::List(Arc::new(Field::new("item", DataType::Utf8, true))),
            true,
        ),
    ];
    if with_bbox {
        fields.push(Field::new("bbox", DataType::Struct(bbox_fields()), true));
    }
    fields.push(Field::new("geometry", DataType::Binary, true));

    let metadata = HashMap::from([(
        "geo".to_string(),
        r#"{"version":"1.1.0","primary_column":"geometry"}"#.to_string(),
    )]);
    let schema = Arc::new(Schema::new_with_metadata(fields, metadata));

    let ids = StringArray::from(vec!["a", "b", "c"]);
    let names = StructArray::new(
        names_fields(),
        vec![Arc::new(StringArray::from(vec!["Alpha", "Beta", "Gamma"])) as ArrayRef],
        None,
    );

    let mut tags = ListBuilder::new(StringBuilder::new());
    for tag in ["red", "green", "blue"] {
        tags.values().append_value(tag);
        tags.append(true);
    }
    let tags = tags.finish();

    let geometry = BinaryArray::from_iter_values(points.iter().map(|(x, y)| wkb_point(*x, *y)));

    let mut columns: Vec<ArrayRef> = vec![Arc::new(ids), Arc::new(names), Arc::new(tags)];
    if with_bbox {
        let coords: Vec<ArrayRef> = (0..4)
            .map(|i| {
                let values: Vec<f64> = points
                    .iter()
                    .map(|(x, y)| if i % 2 == 0 { *x } else { *y })
                    .collect();
                Arc::new(Float64Array::from(values)) as ArrayRef
            })
            .collect();
        columns.push(Arc::new(StructArray::new(bbox_fields(), coords, None)));
    }
    columns.push(Arc::new(geometry));

    RecordBatch::try_new(schema, columns).unwrap()
}

fn write_fixture(dir: &Path, name: &str, with_bbox: bool) -> PathBuf {
    let path = dir.join(name);
    let batch = fixture_batch(with_bbox);
    let file = File::create(&path).unwrap();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();
    path
}

fn unit_region() -> BoundingRegion {
    BoundingRegion::new(0.0, 0.0, 1.0, 1.0)
}

#[tokio::test]
async fn parquet_extraction_clips_and_keeps_schema() {
    let dir = TempDir::new().unwrap();
    let source = write_fixture(dir.path(), "source.parquet", true);
    let output = dir.path().join("clip.parquet");

    let request = ExtractionRequest::new(
        source.to_str().unwrap(),
        unit_region(),
        output.clone(),
    )
    .unwrap();
    let outcome = run_extraction(&request, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, ExtractionOutcome::Completed(output.clone()));

    let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(&output).unwrap())
        .unwrap()
        .build()
        .unwrap();
    let batches: Vec<RecordBatch> = reader.map(|b| b.unwrap()).collect();
    let rows: usize = batches.iter().map(RecordBatch::num_rows).sum();
    assert_eq!(rows, 2);

    let schema = batches[0].schema();
    let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
    assert_eq!(names, vec!["id", "names", "tags", "bbox", "geometry"]);
    assert_eq!(
        schema.field(1).data_type(),
        &DataType::Struct(names_fields())
    );
    assert!(schema.metadata().contains_key("geo"));

    let ids = batches[0].column(0).as_string::<i32>();
    assert_eq!(ids.value(0), "a");
    assert_eq!(ids.value(1), "c");
}

#[tokio::test]
async fn gpkg_extraction_flattens_nested_columns() {
    let dir = TempDir::new().unwrap();
    let source = write_fixture(dir.path(), "source.parquet", true);
    let output = dir.path().join("clip.gpkg");

    let request = ExtractionRequest::new(
        source.to_str().unwrap(),
        unit_region(),
        output.clone(),
    )
    .unwrap();
    let outcome = run_extraction(&request, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, ExtractionOutcome::Completed(output.clone()));

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(SqliteConnectOptions::new().filename(&output))
        .await
        .unwrap();

    let rows = sqlx::query("SELECT name, names, tags, geometry FROM clip ORDER BY fid")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get::<String, _>(0), "Alpha");
    assert_eq!(rows[0].get::<String, _>(1), r#"{"primary":"Alpha"}"#);
    assert_eq!(rows[0].get::<String, _>(2), "red");
    let blob: Vec<u8> = rows[0].get(3);
    assert_eq!(&blob[0..2], b"GP");
    assert_eq!(&blob[8..], wkb_point(0.5, 0.5).as_slice());
    assert_eq!(rows[1].get::<String, _>(0), "Gamma");

    let layer: String = sqlx::query("SELECT table_name FROM gpkg_contents")
        .fetch_one(&pool)
        .await
        .unwrap()
        .get(0);
    assert_eq!(layer, "clip");
    pool.close().await;
}

#[tokio::test]
async fn bboxless_source_uses_geometry_intersection() {
    let dir = TempDir::new().unwrap();
    let source = write_fixture(dir.path(), "plain.parquet", false);
    let output = dir.path().join("clip.parquet");

    let request = ExtractionRequest::new(
        source.to_str().unwrap(),
        unit_region(),
        output.clone(),
    )
    .unwrap();
    let outcome = run_extraction(&request, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, ExtractionOutcome::Completed(output.clone()));

    let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(&output).unwrap())
        .unwrap()
        .build()
        .unwrap();
    let rows: usize = reader.map(|b| b.unwrap().num_rows()).sum();
    assert_eq!(rows, 2);
}

#[tokio::test]
async fn cancelled_before_start_leaves_no_output() {
    let dir = TempDir::new().unwrap();
    let source = write_fixture(dir.path(), "source.parquet", true);
    let output = dir.path().join("clip.parquet");

    let cancel = CancellationToken::new();
    cancel.cancel();
    let request = ExtractionRequest::new(
        source.to_str().unwrap(),
        unit_region(),
        output.clone(),
    )
    .unwrap();
    let outcome = run_extraction(&request, &cancel).await.unwrap();
    assert_eq!(outcome, ExtractionOutcome::Cancelled);
    assert!(!output.exists());
}

#[tokio::test]
async fn validation_accepts_bbox_sources_only() {
    let dir = TempDir::new().unwrap();
    let with_bbox = write_fixture(dir.path(), "good.parquet", true);
    let without = write_fixture(dir.path(), "plain.parquet", false);

    let report = validate_source(with_bbox.to_str().unwrap()).await.unwrap();
    assert!(report.has_bbox);
    assert_eq!(report.columns.len(), 5);

    let err = validate_source(without.to_str().unwrap()).await.unwrap_err();
    assert!(matches!(err, ExtractError::MissingBboxColumn));
}
