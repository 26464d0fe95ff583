//! `geoclip-core` is the core library for the `GeoClip` project, extracting
//! bounding-box subsets of remote GeoParquet datasets.
//!
//! This crate includes:
//! - **Schema Inspection**: One-shot introspection of a source's columns and
//!   its GeoParquet 1.1 bbox layout.
//! - **Extraction Planning**: Pure construction of the projection, spatial
//!   predicate, and write options for a request.
//! - **Execution**: Streaming evaluation into Parquet or GeoPackage output
//!   with cooperative cancellation.
//! - **Lifecycle Coordination**: One extraction at a time, stop-and-wait
//!   replacement, and an ordered event stream for embedders.
//!
//! The typical entry points are [`validate_source`], [`run_extraction`], and
//! the [`Coordinator`] for long-lived hosts.

pub mod error;
pub mod executor;
pub mod gpkg;
pub mod lifecycle;
pub mod project;
pub mod query;
pub mod region;
pub mod schema;
pub mod sink;
pub mod store;
pub mod validate;

pub use error::{ExtractError, Result};
pub use executor::{ExtractionOutcome, run_extraction};
pub use lifecycle::{Coordinator, EngineJob, ExtractionEvent, ExtractionJob};
pub use query::{ExtractionRequest, ExtractionSpec, OutputFormat};
pub use region::BoundingRegion;
pub use validate::{SourceReport, probe_source, validate_source};
