//! Command-line interface for `GeoClip`, a tool for downloading bounding-box
//! subsets of remote GeoParquet datasets.
//!
//! This binary provides a user-friendly CLI over the [`geoclip_core`] library.
//! It can validate that a dataset is extraction-ready, inspect its schema,
//! and download a clipped subset to GeoParquet or GeoPackage.
//!
//! # Architecture
//!
//! The CLI is built using [`clap`] for argument parsing and [`tracing`] for
//! structured logging. It acts as a thin façade that parses arguments,
//! configures logging, and delegates to the core library. Ctrl-C during a
//! download cancels the extraction cooperatively and removes any partial
//! output file.
//!
//! # Available Commands
//!
//! - `download` - Extract the subset of a dataset inside a bounding box
//! - `validate` - Check that a dataset is readable and has a bbox column
//! - `inspect` - Display a dataset's schema without layout requirements

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use tabled::{Table, Tabled};
use tracing::{Level, info};
use tracing_log::LogTracer;
use tracing_subscriber::FmtSubscriber;

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

use geoclip_core::schema::TypeFamily;
use geoclip_core::{
    BoundingRegion, ExtractionOutcome, ExtractionRequest, SourceReport, probe_source,
    run_extraction, validate_source,
};

#[derive(Parser)]
#[command(
    name = "geoclip",
    version,
    about = "Download bounding-box subsets of GeoParquet datasets",
    long_about = "GeoClip streams the features of a remote GeoParquet dataset that fall\n\
                  inside a bounding box into a local GeoParquet or GeoPackage file,\n\
                  using the dataset's bbox column to skip everything else."
)]
/// Command-line arguments and options for the `GeoClip` CLI.
struct Cli {
    /// Enable verbose (INFO level) logging output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug (DEBUG level) logging output with detailed diagnostics.
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands for the `GeoClip` CLI.
#[derive(Subcommand)]
enum Commands {
    /// Downloads the subset of a dataset inside a bounding box.
    ///
    /// The output format is chosen from the output file's extension:
    /// `.parquet` keeps the source columns as-is, `.gpkg` rewrites nested
    /// columns to text for GeoPackage compatibility.
    Download {
        /// Source dataset (local path, `s3://`, or `http(s)://`).
        #[arg(value_name = "DATASET")]
        input: String,

        /// Path for the clipped output file (.parquet or .gpkg).
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,

        /// Bounding box as `min_x,min_y,max_x,max_y`.
        #[arg(short, long, value_name = "BOUNDS")]
        bbox: String,

        /// Coordinate reference system of the bounding box.
        #[arg(long, value_name = "CRS", default_value = "EPSG:4326")]
        crs: String,
    },

    /// Checks that a dataset is readable and ready for extraction.
    ///
    /// A dataset passes when it can be opened as Parquet and carries the
    /// GeoParquet 1.1 `bbox` column the fast path depends on.
    Validate {
        /// Source dataset (local path, `s3://`, or `http(s)://`).
        #[arg(value_name = "DATASET")]
        input: String,
    },

    /// Displays a dataset's schema without enforcing any layout.
    Inspect {
        /// Source dataset (local path, `s3://`, or `http(s)://`).
        #[arg(value_name = "DATASET")]
        input: String,
    },
}

/// Entry point for the `GeoClip` command-line interface.
///
/// Parses command-line arguments, configures the logging system based on
/// verbosity flags, and dispatches to the appropriate command handler.
///
/// # Errors
///
/// Returns an error if command execution fails or if the logging system
/// cannot be initialized.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity flags
    let log_level = if cli.debug {
        Level::DEBUG
    } else if cli.verbose {
        Level::INFO
    } else {
        Level::WARN
    };

    // Bridge logs from the `log` crate to the `tracing` ecosystem.
    LogTracer::init()?;

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Download {
            input,
            output,
            bbox,
            crs,
        } => handle_download(&input, output, &bbox, &crs).await,
        Commands::Validate { input } => handle_validate(&input).await,
        Commands::Inspect { input } => handle_inspect(&input).await,
    }
}

/// Parses `min_x,min_y,max_x,max_y` into a bounding region.
fn parse_bounds(bbox: &str, crs: &str) -> Result<BoundingRegion> {
    let parts: Vec<f64> = bbox
        .split(',')
        .map(|p| {
            p.trim()
                .parse::<f64>()
                .map_err(|_| anyhow!("invalid bounding box value '{}'", p.trim()))
        })
        .collect::<Result<_>>()?;
    if parts.len() != 4 {
        return Err(anyhow!(
            "bounding box must have four values (min_x,min_y,max_x,max_y), got {}",
            parts.len()
        ));
    }
    Ok(BoundingRegion::from_crs(
        parts[0], parts[1], parts[2], parts[3], crs,
    )?)
}

/// Handles the `download` command.
///
/// Runs one extraction with a cancellation token wired to Ctrl-C, so an
/// interrupted download stops cleanly and leaves no partial file behind.
async fn handle_download(input: &str, output: PathBuf, bbox: &str, crs: &str) -> Result<()> {
    let region = parse_bounds(bbox, crs)?;
    let request = ExtractionRequest::new(input, region, output)?;

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_cancel.cancel();
        }
    });

    info!("downloading {} into {}", input, request.output.display());
    match run_extraction(&request, &cancel).await? {
        ExtractionOutcome::Completed(path) => {
            println!("Saved {}", path.display());
            Ok(())
        }
        ExtractionOutcome::Cancelled => {
            println!("Download cancelled");
            Ok(())
        }
    }
}

/// Handles the `validate` command.
async fn handle_validate(input: &str) -> Result<()> {
    let report = validate_source(input).await?;
    println!("{input} is extraction-ready");
    print_schema(&report);
    Ok(())
}

/// Handles the `inspect` command.
async fn handle_inspect(input: &str) -> Result<()> {
    let report = probe_source(input).await?;
    print_schema(&report);
    if !report.has_bbox {
        println!("\nNote: no bbox column; extraction will scan geometries instead.");
    }
    Ok(())
}

/// One row of the schema table printed by `validate` and `inspect`.
#[derive(Tabled)]
struct ColumnRow {
    #[tabled(rename = "Column")]
    name: String,
    #[tabled(rename = "Family")]
    family: &'static str,
    #[tabled(rename = "Type")]
    data_type: String,
}

fn family_label(family: TypeFamily) -> &'static str {
    match family {
        TypeFamily::Struct => "struct",
        TypeFamily::Map => "map",
        TypeFamily::Array => "array",
        TypeFamily::Scalar => "scalar",
    }
}

fn print_schema(report: &SourceReport) {
    println!("\nColumns ({} total):\n", report.columns.len());
    let rows: Vec<ColumnRow> = report
        .columns
        .iter()
        .map(|c| ColumnRow {
            name: c.name.clone(),
            family: family_label(c.family),
            data_type: c.data_type.to_string(),
        })
        .collect();
    let table = Table::new(rows).to_string();
    println!("{table}");
}
