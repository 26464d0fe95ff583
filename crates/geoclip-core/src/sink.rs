//! Output sinks.
//!
//! A sink receives already-projected batches and owns the output file. The
//! trait keeps the executor format-agnostic and gives every code path a
//! deterministic way to release the file: `finish` on success, `abort` on
//! failure or cancellation.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use arrow_array::RecordBatch;
use arrow_schema::SchemaRef;
use async_trait::async_trait;
use datafusion::parquet::arrow::ArrowWriter;
use datafusion::parquet::basic::{Compression, ZstdLevel};
use datafusion::parquet::file::properties::WriterProperties;
use log::debug;

use crate::error::{ExtractError, Result};

/// Destination for a stream of projected record batches.
#[async_trait]
pub trait BatchSink: Send {
    /// Appends one batch to the output.
    async fn write(&mut self, batch: &RecordBatch) -> Result<()>;

    /// Flushes and closes the output, making it visible to readers.
    async fn finish(self: Box<Self>) -> Result<()>;

    /// Discards the partial output, removing the file if possible.
    async fn abort(self: Box<Self>) -> Result<()>;
}

/// Writes Zstandard-compressed Parquet.
///
/// Schema-level metadata, including the GeoParquet `geo` entry carried over
/// from the source footer, is written back into the output footer.
pub struct GeoParquetSink<W: Write + Send = File> {
    writer: ArrowWriter<W>,
    schema: SchemaRef,
    path: PathBuf,
}

impl GeoParquetSink {
    /// Creates the output file and prepares a writer for `schema`.
    pub fn create(path: PathBuf, schema: SchemaRef) -> Result<Self> {
        let file = File::create(&path).map_err(|e| ExtractError::SourceUnreadable {
            uri: path.display().to_string(),
            message: e.to_string(),
        })?;
        let props = WriterProperties::builder()
            .set_compression(Compression::ZSTD(ZstdLevel::default()))
            .build();
        let writer = ArrowWriter::try_new(file, schema.clone(), Some(props))
            .map_err(ExtractError::engine)?;
        Ok(GeoParquetSink {
            writer,
            schema,
            path,
        })
    }
}

#[async_trait]
impl<W: Write + Send> BatchSink for GeoParquetSink<W> {
    async fn write(&mut self, batch: &RecordBatch) -> Result<()> {
        // Upstream operators may strip schema-level metadata from batches;
        // the writer insists on exact schema equality, so reattach ours.
        let batch = if batch.schema() == self.schema {
            batch.clone()
        } else {
            RecordBatch::try_new(self.schema.clone(), batch.columns().to_vec())
                .map_err(ExtractError::engine)?
        };
        self.writer.write(&batch).map_err(ExtractError::engine)
    }

    async fn finish(self: Box<Self>) -> Result<()> {
        let GeoParquetSink { writer, path, .. } = *self;
        // A failed close leaves a truncated file behind; discard it so
        // callers never see partial output.
        if let Err(e) = writer.close() {
            let _ = std::fs::remove_file(&path);
            return Err(ExtractError::engine(e));
        }
        debug!("closed parquet output {}", path.display());
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        let GeoParquetSink { writer, path, .. } = *self;
        drop(writer);
        let _ = std::fs::remove_file(&path);
        Ok(())
    }
}
