//! Extraction planning.
//!
//! This module is pure: it turns an inspected schema, a bounding region,
//! and an output format into a complete [`ExtractionSpec`] describing the
//! projection, spatial predicate, and write options. No I/O happens here,
//! which keeps the planning rules unit-testable without a backend.

use std::path::{Path, PathBuf};

use crate::error::{ExtractError, Result};
use crate::region::BoundingRegion;
use crate::schema::{ColumnDescriptor, SourceSchema, TypeFamily};

/// OGC GeoPackage driver identifier, recorded in the write options.
pub const GPKG_DRIVER: &str = "GPKG";
/// Conventional geometry column name in GeoParquet sources.
pub const GEOMETRY_COLUMN: &str = "geometry";
/// Struct column holding localized names in Overture-style schemas.
pub const NAMES_COLUMN: &str = "names";
/// Field inside [`NAMES_COLUMN`] holding the preferred display name.
pub const NAMES_PRIMARY_FIELD: &str = "primary";
/// Name given to the flattened display-name column in rewritten outputs.
pub const ENRICHED_NAME: &str = "name";
/// Separator used when flattening array columns to text.
pub const ARRAY_JOIN_SEPARATOR: &str = ", ";

/// The two supported output formats, selected by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Parquet output, columns passed through untouched.
    GeoParquet,
    /// GeoPackage output, nested columns rewritten to text.
    GeoPackage,
}

impl OutputFormat {
    /// Picks a format from the output path's extension (case-insensitive).
    ///
    /// Unknown or missing extensions are an [`ExtractError::UnsupportedFormat`].
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        match extension.as_str() {
            "parquet" => Ok(OutputFormat::GeoParquet),
            "gpkg" => Ok(OutputFormat::GeoPackage),
            _ => Err(ExtractError::UnsupportedFormat { extension }),
        }
    }

    /// Whether this format stores columns exactly as the source does.
    #[must_use]
    pub fn is_native(&self) -> bool {
        matches!(self, OutputFormat::GeoParquet)
    }
}

/// How a single column is carried into a rewritten output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnTransform {
    /// Copy the column as-is.
    Passthrough,
    /// Serialize each value to a JSON text column. Applied to structs and maps.
    JsonEncode,
    /// Join array elements into one text value with [`ARRAY_JOIN_SEPARATOR`].
    JoinArray,
}

/// One column of a rewritten projection.
#[derive(Debug, Clone)]
pub struct ColumnSelection {
    /// Source column name.
    pub name: String,
    /// Transform applied on the way out.
    pub transform: ColumnTransform,
}

/// The projection an extraction applies to each batch.
#[derive(Debug, Clone)]
pub enum Projection {
    /// All columns pass through unchanged. Used for native outputs.
    Passthrough,
    /// Per-column transforms for formats without nested types.
    Rewritten {
        /// Ordered column selections matching the source schema.
        columns: Vec<ColumnSelection>,
        /// Prepend a `name` column extracted from `names.primary`.
        enrich_name: bool,
    },
}

/// The spatial filter an extraction evaluates.
#[derive(Debug, Clone)]
pub enum SpatialPredicate {
    /// Range comparison against the `bbox` summary column. Fast path,
    /// usable whenever the source carries the column.
    BboxRange {
        /// The requested region in geographic coordinates.
        region: BoundingRegion,
    },
    /// Geometric intersection of decoded geometries with the region's ring.
    PolygonIntersection {
        /// Column holding WKB geometry.
        geometry_column: String,
        /// Closed five-point ring of the region boundary.
        ring: [(f64, f64); 5],
    },
}

/// Compression applied to Parquet output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionCodec {
    /// Zstandard at the default level.
    Zstd,
}

/// Format-specific write configuration.
#[derive(Debug, Clone)]
pub enum WriteOptions {
    /// Native Parquet output.
    GeoParquet {
        /// Column compression codec.
        compression: CompressionCodec,
    },
    /// Rewritten vector-package output.
    VectorPackage {
        /// Container driver identifier, always [`GPKG_DRIVER`].
        driver: &'static str,
    },
}

/// A fully planned extraction, ready for the executor.
#[derive(Debug, Clone)]
pub struct ExtractionSpec {
    /// Column handling for each emitted batch.
    pub projection: Projection,
    /// Row filter to apply.
    pub predicate: SpatialPredicate,
    /// Output write configuration.
    pub write: WriteOptions,
}

impl ExtractionSpec {
    /// Plans an extraction from an inspected schema.
    ///
    /// Native outputs keep every column untouched. Rewritten outputs map
    /// structs and maps to JSON text and arrays to joined text, and add a
    /// leading `name` column when any rewrite triggered and the schema has
    /// a `names.primary` field to draw from.
    ///
    /// Sources with a `bbox` column get the range predicate; sources
    /// without one fall back to geometric intersection.
    #[must_use]
    pub fn build(schema: &SourceSchema, region: BoundingRegion, format: OutputFormat) -> Self {
        let projection = if format.is_native() {
            Projection::Passthrough
        } else {
            let columns: Vec<ColumnSelection> = schema
                .columns
                .iter()
                .map(|c| ColumnSelection {
                    name: c.name.clone(),
                    transform: transform_for(c),
                })
                .collect();
            let any_rewrite = columns
                .iter()
                .any(|c| c.transform != ColumnTransform::Passthrough);
            let enrich_name = any_rewrite && has_primary_name(schema);
            Projection::Rewritten {
                columns,
                enrich_name,
            }
        };

        let predicate = if schema.has_bbox_column() {
            SpatialPredicate::BboxRange { region }
        } else {
            SpatialPredicate::PolygonIntersection {
                geometry_column: GEOMETRY_COLUMN.to_string(),
                ring: region.ring(),
            }
        };

        let write = match format {
            OutputFormat::GeoParquet => WriteOptions::GeoParquet {
                compression: CompressionCodec::Zstd,
            },
            OutputFormat::GeoPackage => WriteOptions::VectorPackage {
                driver: GPKG_DRIVER,
            },
        };

        ExtractionSpec {
            projection,
            predicate,
            write,
        }
    }
}

fn transform_for(column: &ColumnDescriptor) -> ColumnTransform {
    match column.family {
        TypeFamily::Struct | TypeFamily::Map => ColumnTransform::JsonEncode,
        TypeFamily::Array => ColumnTransform::JoinArray,
        TypeFamily::Scalar => ColumnTransform::Passthrough,
    }
}

fn has_primary_name(schema: &SourceSchema) -> bool {
    let Some(names) = schema.column(NAMES_COLUMN) else {
        return false;
    };
    match &names.data_type {
        arrow_schema::DataType::Struct(fields) => fields
            .iter()
            .any(|f| f.name().eq_ignore_ascii_case(NAMES_PRIMARY_FIELD)),
        _ => false,
    }
}

/// A validated extraction request.
///
/// Construction validates the output extension but performs no backend
/// calls, so requests can be built synchronously in UI or CLI code.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    /// Source dataset URI (local path, `s3://`, or `http(s)://`).
    pub uri: String,
    /// Region of interest in geographic coordinates.
    pub region: BoundingRegion,
    /// Destination file path.
    pub output: PathBuf,
    /// Output format derived from the destination extension.
    pub format: OutputFormat,
}

impl ExtractionRequest {
    /// Builds a request, rejecting unsupported output extensions.
    pub fn new(uri: impl Into<String>, region: BoundingRegion, output: PathBuf) -> Result<Self> {
        let format = OutputFormat::from_path(&output)?;
        Ok(ExtractionRequest {
            uri: uri.into(),
            region,
            output,
            format,
        })
    }
}
