//! Source schema inspection.
//!
//! Before planning an extraction we introspect the remote dataset's schema
//! once: column names, their nesting family, and whether the GeoParquet 1.1
//! `bbox` summary column is present. Nothing here reads row data.

use arrow_schema::{DataType, SchemaRef};
use datafusion::prelude::{ParquetReadOptions, SessionContext};

use crate::error::{ExtractError, Result};

/// Name of the GeoParquet 1.1 per-row bounding box column.
pub const BBOX_COLUMN: &str = "bbox";

/// Coarse shape classification of a column's type.
///
/// Downstream planning only cares about these four families, not the full
/// Arrow type lattice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFamily {
    /// Nested named fields.
    Struct,
    /// Key/value pairs.
    Map,
    /// Variable or fixed length lists.
    Array,
    /// Everything else, including binary geometry.
    Scalar,
}

impl TypeFamily {
    /// Classifies an Arrow type into its family.
    #[must_use]
    pub fn of(data_type: &DataType) -> Self {
        match data_type {
            DataType::Struct(_) => TypeFamily::Struct,
            DataType::Map(_, _) => TypeFamily::Map,
            DataType::List(_)
            | DataType::LargeList(_)
            | DataType::FixedSizeList(_, _)
            | DataType::ListView(_)
            | DataType::LargeListView(_) => TypeFamily::Array,
            _ => TypeFamily::Scalar,
        }
    }
}

/// One column of a source dataset, as seen by the planner.
#[derive(Debug, Clone)]
pub struct ColumnDescriptor {
    /// Column name exactly as spelled in the source schema.
    pub name: String,
    /// Shape family used to pick a transform.
    pub family: TypeFamily,
    /// The full Arrow type, kept for sink schema construction.
    pub data_type: DataType,
}

/// The inspected shape of a source dataset.
#[derive(Debug, Clone)]
pub struct SourceSchema {
    /// Arrow schema with source metadata intact.
    pub schema: SchemaRef,
    /// Planner-facing column descriptors, in schema order.
    pub columns: Vec<ColumnDescriptor>,
}

impl SourceSchema {
    /// Whether the dataset carries a `bbox` column, matched by exact name
    /// ignoring ASCII case. Substring matches do not count.
    #[must_use]
    pub fn has_bbox_column(&self) -> bool {
        self.columns
            .iter()
            .any(|c| c.name.eq_ignore_ascii_case(BBOX_COLUMN))
    }

    /// Returns the descriptor for the named column, ignoring ASCII case.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// Parquet read options used everywhere a source is opened.
///
/// Footer key/value metadata is kept so the GeoParquet `geo` entry survives
/// into the output file.
#[must_use]
pub fn read_options() -> ParquetReadOptions<'static> {
    ParquetReadOptions::default().skip_metadata(false)
}

/// Reads the schema of a remote or local Parquet dataset.
///
/// Any failure to open or parse the source is reported as
/// [`ExtractError::SourceUnreadable`] carrying the backend's message.
pub async fn inspect(ctx: &SessionContext, uri: &str) -> Result<SourceSchema> {
    let df = ctx
        .read_parquet(uri, read_options())
        .await
        .map_err(|e| ExtractError::SourceUnreadable {
            uri: uri.to_string(),
            message: e.to_string(),
        })?;
    let schema: SchemaRef = df.schema().inner().clone();
    let columns = schema
        .fields()
        .iter()
        .map(|field| ColumnDescriptor {
            name: field.name().clone(),
            family: TypeFamily::of(field.data_type()),
            data_type: field.data_type().clone(),
        })
        .collect();
    Ok(SourceSchema { schema, columns })
}
