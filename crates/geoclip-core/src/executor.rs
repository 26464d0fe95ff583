//! Extraction execution.
//!
//! Runs a planned extraction end to end: open the source, push the bbox
//! filter into the scan when one applies, stream batches through the
//! projection and into the sink, and stop promptly when the cancellation
//! token fires. Partial output files never survive a failed or cancelled
//! run.

use std::path::PathBuf;

use arrow::compute::filter_record_batch;
use arrow_array::cast::AsArray;
use arrow_array::{Array, BooleanArray, RecordBatch};
use arrow_cast::cast;
use arrow_schema::DataType;
use datafusion::functions::core::expr_ext::FieldAccessor;
use datafusion::prelude::{DataFrame, Expr, SessionContext, ident, lit};
use futures::StreamExt;
use geo::{Intersects, Rect, coord};
use geozero::ToGeo;
use geozero::wkb::Wkb;
use log::{debug, info};
use tokio_util::sync::CancellationToken;

use crate::error::{ExtractError, Result};
use crate::gpkg::GeoPackageSink;
use crate::project;
use crate::query::{ExtractionRequest, ExtractionSpec, SpatialPredicate, WriteOptions};
use crate::region::BoundingRegion;
use crate::schema::{self, SourceSchema};
use crate::sink::{BatchSink, GeoParquetSink};
use crate::store::register_store;

/// How an extraction ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionOutcome {
    /// The output file was written and closed.
    Completed(PathBuf),
    /// The run was cancelled; any partial output was removed.
    Cancelled,
}

/// Runs one extraction against a fresh session.
///
/// Validation errors keep their own variants; anything that fails after
/// planning surfaces as [`ExtractError::Engine`] with the backend's text,
/// unless the token fired first, in which case the error is swallowed and
/// the outcome is [`ExtractionOutcome::Cancelled`].
pub async fn run_extraction(
    request: &ExtractionRequest,
    cancel: &CancellationToken,
) -> Result<ExtractionOutcome> {
    let ctx = SessionContext::new();
    register_store(&ctx, &request.uri)?;
    let source = schema::inspect(&ctx, &request.uri).await?;
    if cancel.is_cancelled() {
        return Ok(ExtractionOutcome::Cancelled);
    }

    let spec = ExtractionSpec::build(&source, request.region, request.format);
    info!(
        "extracting {} -> {} ({} columns)",
        request.uri,
        request.output.display(),
        source.columns.len()
    );

    match execute(&ctx, request, &source, &spec, cancel).await {
        Ok(outcome) => Ok(outcome),
        Err(_) if cancel.is_cancelled() => Ok(ExtractionOutcome::Cancelled),
        Err(e) => Err(e),
    }
}

async fn execute(
    ctx: &SessionContext,
    request: &ExtractionRequest,
    source: &SourceSchema,
    spec: &ExtractionSpec,
    cancel: &CancellationToken,
) -> Result<ExtractionOutcome> {
    let df = ctx
        .read_parquet(&request.uri, schema::read_options())
        .await
        .map_err(ExtractError::engine)?;
    let df = push_down_filter(df, source, &spec.predicate)?;

    let out_schema = project::output_schema(&source.schema, &spec.projection);
    let mut sink: Box<dyn BatchSink> = match &spec.write {
        WriteOptions::GeoParquet { .. } => Box::new(GeoParquetSink::create(
            request.output.clone(),
            out_schema.clone(),
        )?),
        WriteOptions::VectorPackage { .. } => Box::new(
            GeoPackageSink::create(
                request.output.clone(),
                &layer_name(&request.output),
                out_schema.clone(),
                request.region,
            )
            .await?,
        ),
    };

    let mut stream = match df.execute_stream().await {
        Ok(stream) => stream,
        Err(e) => {
            sink.abort().await?;
            return Err(ExtractError::engine(e));
        }
    };

    let mut rows_out = 0usize;
    while let Some(next) = stream.next().await {
        if cancel.is_cancelled() {
            sink.abort().await?;
            return Ok(ExtractionOutcome::Cancelled);
        }
        let batch = match next {
            Ok(batch) => batch,
            Err(e) => {
                sink.abort().await?;
                return Err(ExtractError::engine(e));
            }
        };
        let batch = match apply_batch(&batch, spec) {
            Ok(batch) => batch,
            Err(e) => {
                sink.abort().await?;
                return Err(e);
            }
        };
        if batch.num_rows() == 0 {
            continue;
        }
        rows_out += batch.num_rows();
        if let Err(e) = sink.write(&batch).await {
            sink.abort().await?;
            return Err(e);
        }
    }

    if cancel.is_cancelled() {
        sink.abort().await?;
        return Ok(ExtractionOutcome::Cancelled);
    }
    sink.finish().await?;
    info!("wrote {} rows to {}", rows_out, request.output.display());
    Ok(ExtractionOutcome::Completed(request.output.clone()))
}

/// Builds the scan-level filter for the bbox fast path.
///
/// The range comparison is handed to the query engine so row groups whose
/// column statistics fall outside the region are skipped entirely.
fn push_down_filter(
    df: DataFrame,
    source: &SourceSchema,
    predicate: &SpatialPredicate,
) -> Result<DataFrame> {
    let SpatialPredicate::BboxRange { region } = predicate else {
        return Ok(df);
    };
    let bbox = source
        .column(schema::BBOX_COLUMN)
        .ok_or_else(|| ExtractError::engine("bbox column vanished between plan and scan"))?;
    let expr = bbox_range_expr(&bbox.name, region);
    df.filter(expr).map_err(ExtractError::engine)
}

fn bbox_range_expr(bbox_column: &str, region: &BoundingRegion) -> Expr {
    ident(bbox_column)
        .field("xmin")
        .between(lit(region.min_x), lit(region.max_x))
        .and(
            ident(bbox_column)
                .field("ymin")
                .between(lit(region.min_y), lit(region.max_y)),
        )
}

fn apply_batch(batch: &RecordBatch, spec: &ExtractionSpec) -> Result<RecordBatch> {
    let filtered = match &spec.predicate {
        SpatialPredicate::BboxRange { .. } => batch.clone(),
        SpatialPredicate::PolygonIntersection {
            geometry_column,
            ring,
        } => filter_intersecting(batch, geometry_column, ring)?,
    };
    project::apply(&filtered, &spec.projection)
}

/// Keeps rows whose decoded geometry intersects the region rectangle.
///
/// This is the slow path for sources without a bbox column: every WKB
/// value in the batch is decoded and tested.
fn filter_intersecting(
    batch: &RecordBatch,
    geometry_column: &str,
    ring: &[(f64, f64); 5],
) -> Result<RecordBatch> {
    let schema = batch.schema();
    let index = schema
        .fields()
        .iter()
        .position(|f| f.name().eq_ignore_ascii_case(geometry_column))
        .ok_or_else(|| {
            ExtractError::engine(format!("source has no '{geometry_column}' column"))
        })?;

    let array = batch.column(index);
    let array = if array.data_type() == &DataType::Binary {
        array.clone()
    } else {
        cast(array.as_ref(), &DataType::Binary).map_err(ExtractError::engine)?
    };
    let wkb = array.as_binary::<i32>();

    let rect = Rect::new(
        coord! { x: ring[0].0, y: ring[0].1 },
        coord! { x: ring[2].0, y: ring[2].1 },
    );

    let mut mask = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        if wkb.is_null(row) {
            mask.push(false);
            continue;
        }
        let geometry = Wkb(wkb.value(row)).to_geo().map_err(ExtractError::engine)?;
        mask.push(rect.intersects(&geometry));
    }
    let mask = BooleanArray::from(mask);
    debug!(
        "intersection filter kept {}/{} rows",
        mask.true_count(),
        batch.num_rows()
    );
    filter_record_batch(batch, &mask).map_err(ExtractError::engine)
}

fn layer_name(output: &std::path::Path) -> String {
    output
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("features")
        .to_string()
}
