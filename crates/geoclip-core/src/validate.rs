//! Source validation.
//!
//! One-shot checks run before an extraction is offered to the user: can
//! the source be opened at all, and does it carry the bbox column the
//! fast path depends on. Validation reads schema only, never row data.

use datafusion::prelude::SessionContext;
use log::info;

use crate::error::{ExtractError, Result};
use crate::schema::{self, ColumnDescriptor, SourceSchema};
use crate::store::register_store;

/// What a validation probe learned about a source.
#[derive(Debug, Clone)]
pub struct SourceReport {
    /// Columns in schema order.
    pub columns: Vec<ColumnDescriptor>,
    /// Whether the GeoParquet 1.1 bbox column is present.
    pub has_bbox: bool,
}

impl From<SourceSchema> for SourceReport {
    fn from(schema: SourceSchema) -> Self {
        let has_bbox = schema.has_bbox_column();
        SourceReport {
            columns: schema.columns,
            has_bbox,
        }
    }
}

/// Inspects a source without enforcing any layout requirements.
pub async fn probe_source(uri: &str) -> Result<SourceReport> {
    let ctx = SessionContext::new();
    register_store(&ctx, uri)?;
    let source = schema::inspect(&ctx, uri).await?;
    info!("probed {} ({} columns)", uri, source.columns.len());
    Ok(source.into())
}

/// Validates that a source is readable and extraction-ready.
///
/// Sources without a bbox column are rejected with
/// [`ExtractError::MissingBboxColumn`]; they would silently fall back to
/// the slow intersection scan otherwise, which custom sources must opt
/// into explicitly.
pub async fn validate_source(uri: &str) -> Result<SourceReport> {
    let report = probe_source(uri).await?;
    if !report.has_bbox {
        return Err(ExtractError::MissingBboxColumn);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_is_unreadable() {
        let err = validate_source("/definitely/not/here.parquet")
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::SourceUnreadable { .. }));
    }

    #[tokio::test]
    async fn unreadable_error_names_the_uri() {
        let err = probe_source("/definitely/not/here.parquet")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.parquet"));
    }
}
