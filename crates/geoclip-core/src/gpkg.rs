//! GeoPackage output sink.
//!
//! Builds a minimal OGC GeoPackage: the required `gpkg_spatial_ref_sys`,
//! `gpkg_contents`, and `gpkg_geometry_columns` tables plus one feature
//! table. Geometry values are stored as standard GeoPackage binary, a
//! small header followed by the WKB bytes from the source.
//!
//! Batches arriving here have already been projected, so every column is
//! a scalar: text, numbers, booleans, or binary geometry.

use std::path::PathBuf;

use arrow_array::cast::AsArray;
use arrow_array::types::{Float64Type, Int64Type};
use arrow_array::{Array, ArrayRef, RecordBatch};
use arrow_cast::cast;
use arrow_schema::{DataType, SchemaRef};
use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::error::{ExtractError, Result};
use crate::query::GEOMETRY_COLUMN;
use crate::region::BoundingRegion;
use crate::sink::BatchSink;

/// "GPKG" in ASCII, the required SQLite application id.
const GPKG_APPLICATION_ID: i64 = 1_196_444_487;
/// GeoPackage 1.3 user version.
const GPKG_USER_VERSION: i64 = 10_300;
const WGS84_SRS_ID: i32 = 4326;
const WGS84_DEFINITION: &str = "GEOGCS[\"WGS 84\",DATUM[\"WGS_1984\",\
    SPHEROID[\"WGS 84\",6378137,298.257223563]],\
    PRIMEM[\"Greenwich\",0],UNIT[\"degree\",0.0174532925199433],\
    AUTHORITY[\"EPSG\",\"4326\"]]";

/// SQLite storage class a column is written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Storage {
    Bool,
    Int,
    Real,
    Text,
    Blob,
}

impl Storage {
    fn of(data_type: &DataType) -> Self {
        match data_type {
            DataType::Boolean => Storage::Bool,
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64 => Storage::Int,
            DataType::Float16 | DataType::Float32 | DataType::Float64 => Storage::Real,
            DataType::Binary
            | DataType::LargeBinary
            | DataType::BinaryView
            | DataType::FixedSizeBinary(_) => Storage::Blob,
            _ => Storage::Text,
        }
    }

    fn declared_type(self) -> &'static str {
        match self {
            Storage::Bool => "BOOLEAN",
            Storage::Int => "INTEGER",
            Storage::Real => "REAL",
            Storage::Text => "TEXT",
            Storage::Blob => "BLOB",
        }
    }

    /// Canonical Arrow type every column is cast to before binding.
    fn canonical(self) -> DataType {
        match self {
            Storage::Bool => DataType::Boolean,
            Storage::Int => DataType::Int64,
            Storage::Real => DataType::Float64,
            Storage::Text => DataType::Utf8,
            Storage::Blob => DataType::Binary,
        }
    }
}

struct ColumnPlan {
    name: String,
    storage: Storage,
    geometry: bool,
}

/// Sink writing projected batches into a fresh GeoPackage file.
pub struct GeoPackageSink {
    pool: SqlitePool,
    path: PathBuf,
    columns: Vec<ColumnPlan>,
    insert_sql: String,
}

impl GeoPackageSink {
    /// Creates the package file, its metadata tables, and the feature table.
    ///
    /// An existing file at `path` is replaced. The declared extent in
    /// `gpkg_contents` is the requested region rather than the (unknown
    /// until the stream ends) extent of the matched rows.
    pub async fn create(
        path: PathBuf,
        table: &str,
        schema: SchemaRef,
        region: BoundingRegion,
    ) -> Result<Self> {
        let _ = std::fs::remove_file(&path);

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(ExtractError::engine)?;

        let columns: Vec<ColumnPlan> = schema
            .fields()
            .iter()
            .map(|field| {
                let geometry = field.name().eq_ignore_ascii_case(GEOMETRY_COLUMN)
                    && Storage::of(field.data_type()) == Storage::Blob;
                ColumnPlan {
                    name: field.name().clone(),
                    storage: Storage::of(field.data_type()),
                    geometry,
                }
            })
            .collect();

        let sink = GeoPackageSink {
            pool,
            path,
            insert_sql: insert_statement(table, &columns),
            columns,
        };
        sink.initialize(table, region).await?;
        Ok(sink)
    }

    async fn initialize(&self, table: &str, region: BoundingRegion) -> Result<()> {
        let run = |sql: String| {
            let pool = self.pool.clone();
            async move {
                sqlx::query(&sql)
                    .execute(&pool)
                    .await
                    .map_err(ExtractError::engine)
                    .map(|_| ())
            }
        };

        run(format!("PRAGMA application_id = {GPKG_APPLICATION_ID}")).await?;
        run(format!("PRAGMA user_version = {GPKG_USER_VERSION}")).await?;

        run("CREATE TABLE gpkg_spatial_ref_sys (\
             srs_name TEXT NOT NULL, srs_id INTEGER PRIMARY KEY, \
             organization TEXT NOT NULL, organization_coordsys_id INTEGER NOT NULL, \
             definition TEXT NOT NULL, description TEXT)"
            .to_string())
        .await?;
        run("CREATE TABLE gpkg_contents (\
             table_name TEXT NOT NULL PRIMARY KEY, data_type TEXT NOT NULL, \
             identifier TEXT UNIQUE, description TEXT DEFAULT '', \
             last_change DATETIME NOT NULL, \
             min_x DOUBLE, min_y DOUBLE, max_x DOUBLE, max_y DOUBLE, \
             srs_id INTEGER REFERENCES gpkg_spatial_ref_sys(srs_id))"
            .to_string())
        .await?;
        run("CREATE TABLE gpkg_geometry_columns (\
             table_name TEXT NOT NULL, column_name TEXT NOT NULL, \
             geometry_type_name TEXT NOT NULL, srs_id INTEGER NOT NULL, \
             z TINYINT NOT NULL, m TINYINT NOT NULL, \
             CONSTRAINT pk_geom_cols PRIMARY KEY (table_name, column_name))"
            .to_string())
        .await?;

        sqlx::query(
            "INSERT INTO gpkg_spatial_ref_sys VALUES \
             ('WGS 84 geodetic', ?, 'EPSG', 4326, ?, 'longitude/latitude in decimal degrees'), \
             ('Undefined cartesian SRS', -1, 'NONE', -1, 'undefined', NULL), \
             ('Undefined geographic SRS', 0, 'NONE', 0, 'undefined', NULL)",
        )
        .bind(WGS84_SRS_ID)
        .bind(WGS84_DEFINITION)
        .execute(&self.pool)
        .await
        .map_err(ExtractError::engine)?;

        run(create_table_statement(table, &self.columns)).await?;

        let last_change = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
        sqlx::query(
            "INSERT INTO gpkg_contents \
             (table_name, data_type, identifier, last_change, min_x, min_y, max_x, max_y, srs_id) \
             VALUES (?, 'features', ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(table)
        .bind(table)
        .bind(last_change)
        .bind(region.min_x)
        .bind(region.min_y)
        .bind(region.max_x)
        .bind(region.max_y)
        .bind(WGS84_SRS_ID)
        .execute(&self.pool)
        .await
        .map_err(ExtractError::engine)?;

        if let Some(geometry) = self.columns.iter().find(|c| c.geometry) {
            sqlx::query(
                "INSERT INTO gpkg_geometry_columns VALUES (?, ?, 'GEOMETRY', ?, 0, 0)",
            )
            .bind(table)
            .bind(&geometry.name)
            .bind(WGS84_SRS_ID)
            .execute(&self.pool)
            .await
            .map_err(ExtractError::engine)?;
        }

        Ok(())
    }
}

#[async_trait]
impl BatchSink for GeoPackageSink {
    async fn write(&mut self, batch: &RecordBatch) -> Result<()> {
        let prepared: Vec<ArrayRef> = self
            .columns
            .iter()
            .enumerate()
            .map(|(index, plan)| {
                let array = batch.column(index);
                if array.data_type() == &plan.storage.canonical() {
                    Ok(array.clone())
                } else {
                    cast(array.as_ref(), &plan.storage.canonical()).map_err(ExtractError::engine)
                }
            })
            .collect::<Result<_>>()?;

        let mut tx = self.pool.begin().await.map_err(ExtractError::engine)?;
        for row in 0..batch.num_rows() {
            let mut query = sqlx::query(&self.insert_sql);
            for (plan, array) in self.columns.iter().zip(&prepared) {
                query = if array.is_null(row) {
                    query.bind(None::<i64>)
                } else {
                    match plan.storage {
                        Storage::Bool => query.bind(array.as_boolean().value(row)),
                        Storage::Int => query.bind(array.as_primitive::<Int64Type>().value(row)),
                        Storage::Real => query.bind(array.as_primitive::<Float64Type>().value(row)),
                        Storage::Text => query.bind(array.as_string::<i32>().value(row).to_string()),
                        Storage::Blob => {
                            let bytes = array.as_binary::<i32>().value(row);
                            if plan.geometry {
                                query.bind(geometry_blob(bytes))
                            } else {
                                query.bind(bytes.to_vec())
                            }
                        }
                    }
                };
            }
            query.execute(&mut *tx).await.map_err(ExtractError::engine)?;
        }
        tx.commit().await.map_err(ExtractError::engine)
    }

    async fn finish(self: Box<Self>) -> Result<()> {
        self.pool.close().await;
        debug!("closed geopackage output {}", self.path.display());
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        self.pool.close().await;
        let _ = std::fs::remove_file(&self.path);
        Ok(())
    }
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn create_table_statement(table: &str, columns: &[ColumnPlan]) -> String {
    let mut parts = vec!["\"fid\" INTEGER PRIMARY KEY AUTOINCREMENT".to_string()];
    for plan in columns {
        parts.push(format!(
            "{} {}",
            quote(&plan.name),
            plan.storage.declared_type()
        ));
    }
    format!("CREATE TABLE {} ({})", quote(table), parts.join(", "))
}

fn insert_statement(table: &str, columns: &[ColumnPlan]) -> String {
    let names: Vec<String> = columns.iter().map(|c| quote(&c.name)).collect();
    let placeholders: Vec<&str> = columns.iter().map(|_| "?").collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote(table),
        names.join(", "),
        placeholders.join(", ")
    )
}

/// Wraps WKB bytes in a GeoPackage binary header.
///
/// Header layout: magic "GP", version 0, flags 0x01 (little-endian byte
/// order, no envelope), then the SRS id as a little-endian i32.
fn geometry_blob(wkb: &[u8]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(8 + wkb.len());
    blob.extend_from_slice(b"GP");
    blob.push(0x00);
    blob.push(0x01);
    blob.extend_from_slice(&WGS84_SRS_ID.to_le_bytes());
    blob.extend_from_slice(wkb);
    blob
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::{BinaryArray, Float64Array, StringArray};
    use arrow_schema::{Field, Schema};
    use sqlx::Row;
    use std::sync::Arc;

    fn wkb_point(x: f64, y: f64) -> Vec<u8> {
        let mut wkb = vec![0x01];
        wkb.extend_from_slice(&1u32.to_le_bytes());
        wkb.extend_from_slice(&x.to_le_bytes());
        wkb.extend_from_slice(&y.to_le_bytes());
        wkb
    }

    fn sample_batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("name", DataType::Utf8, true),
            Field::new("height", DataType::Float64, true),
            Field::new("geometry", DataType::Binary, true),
        ]));
        let points: Vec<Vec<u8>> = vec![wkb_point(1.0, 2.0), wkb_point(3.0, 4.0)];
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec![Some("Tower"), None])),
                Arc::new(Float64Array::from(vec![Some(42.5), None])),
                Arc::new(BinaryArray::from_iter_values(points.iter())),
            ],
        )
        .unwrap()
    }

    #[test]
    fn geometry_blob_header_layout() {
        let blob = geometry_blob(&[0xAA, 0xBB]);
        assert_eq!(&blob[0..2], b"GP");
        assert_eq!(blob[2], 0x00);
        assert_eq!(blob[3], 0x01);
        assert_eq!(i32::from_le_bytes([blob[4], blob[5], blob[6], blob[7]]), 4326);
        assert_eq!(&blob[8..], &[0xAA, 0xBB]);
    }

    #[test]
    fn statements_quote_identifiers() {
        let columns = vec![
            ColumnPlan {
                name: "name".to_string(),
                storage: Storage::Text,
                geometry: false,
            },
            ColumnPlan {
                name: "geometry".to_string(),
                storage: Storage::Blob,
                geometry: true,
            },
        ];
        assert_eq!(
            create_table_statement("buildings", &columns),
            "CREATE TABLE \"buildings\" (\"fid\" INTEGER PRIMARY KEY AUTOINCREMENT, \
             \"name\" TEXT, \"geometry\" BLOB)"
        );
        assert_eq!(
            insert_statement("buildings", &columns),
            "INSERT INTO \"buildings\" (\"name\", \"geometry\") VALUES (?, ?)"
        );
    }

    #[tokio::test]
    async fn writes_conforming_package() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.gpkg");
        let batch = sample_batch();
        let region = BoundingRegion::new(0.0, 0.0, 10.0, 10.0);

        let mut sink: Box<dyn BatchSink> = Box::new(
            GeoPackageSink::create(path.clone(), "features", batch.schema(), region)
                .await
                .unwrap(),
        );
        sink.write(&batch).await.unwrap();
        sink.finish().await.unwrap();

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(SqliteConnectOptions::new().filename(&path))
            .await
            .unwrap();

        let app_id: i64 = sqlx::query("PRAGMA application_id")
            .fetch_one(&pool)
            .await
            .unwrap()
            .get(0);
        assert_eq!(app_id, GPKG_APPLICATION_ID);

        let contents = sqlx::query("SELECT data_type, srs_id, max_x FROM gpkg_contents")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(contents.get::<String, _>(0), "features");
        assert_eq!(contents.get::<i32, _>(1), 4326);
        assert_eq!(contents.get::<f64, _>(2), 10.0);

        let rows = sqlx::query("SELECT name, geometry FROM features ORDER BY fid")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get::<String, _>(0), "Tower");
        let blob: Vec<u8> = rows[0].get(1);
        assert_eq!(&blob[0..2], b"GP");
        assert_eq!(&blob[8..], wkb_point(1.0, 2.0).as_slice());
        pool.close().await;
    }

    #[tokio::test]
    async fn abort_removes_partial_package() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.gpkg");
        let batch = sample_batch();
        let region = BoundingRegion::new(0.0, 0.0, 1.0, 1.0);

        let sink: Box<dyn BatchSink> = Box::new(
            GeoPackageSink::create(path.clone(), "features", batch.schema(), region)
                .await
                .unwrap(),
        );
        sink.abort().await.unwrap();
        assert!(!path.exists());
    }
}
