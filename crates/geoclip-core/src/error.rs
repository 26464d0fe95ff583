//! Error types for extraction operations.
//!
//! This module provides structured error handling using `thiserror`. The
//! variants mirror the points where an extraction can be refused or fail:
//! source introspection, validation, format selection, and engine execution.

use thiserror::Error;

/// Errors raised by the extraction engine and its validators.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The dataset reference could not be opened or parsed as Parquet.
    ///
    /// Wraps the backend's own message so network, permission, and
    /// malformed-file failures all read the same way to the caller.
    #[error("unable to read source '{uri}': {message}")]
    SourceUnreadable {
        /// The dataset URI as supplied by the caller.
        uri: String,
        /// The underlying engine error text, verbatim.
        message: String,
    },

    /// The dataset lacks a `bbox` summary column.
    ///
    /// Only GeoParquet 1.1 sources with a bbox column are accepted; other
    /// layouts are rejected outright rather than degraded to a slow scan.
    #[error(
        "this tool only supports GeoParquet 1.1 datasets with a bbox column; \
         other GeoParquet layouts are not supported"
    )]
    MissingBboxColumn,

    /// The requested output extension is not one of the two supported formats.
    #[error("unsupported output format '{extension}' (expected .parquet or .gpkg)")]
    UnsupportedFormat {
        /// The offending file extension, lower-cased, possibly empty.
        extension: String,
    },

    /// The caller-supplied region is in a coordinate reference this tool
    /// cannot transform into the canonical geographic frame.
    #[error("unsupported source CRS '{crs}' (expected EPSG:4326 or EPSG:3857)")]
    UnsupportedCrs {
        /// The CRS identifier as supplied.
        crs: String,
    },

    /// The query or write step failed after validation passed.
    ///
    /// Carries the backend's native error text verbatim, reported once at
    /// the executor's outermost scope.
    #[error("{0}")]
    Engine(String),
}

impl ExtractError {
    /// Wraps an arbitrary engine failure, preserving its message text.
    pub fn engine(err: impl std::fmt::Display) -> Self {
        ExtractError::Engine(err.to_string())
    }
}

/// Type alias for Results using [`ExtractError`].
pub type Result<T> = std::result::Result<T, ExtractError>;
