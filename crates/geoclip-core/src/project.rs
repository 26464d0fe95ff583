//! Batch projection for rewritten outputs.
//!
//! GeoPackage has no nested column types, so batches headed there get
//! struct and map columns serialized to JSON text and array columns joined
//! into delimited text. Native Parquet output never passes through here.

use std::sync::Arc;

use arrow_array::builder::StringBuilder;
use arrow_array::cast::AsArray;
use arrow_array::{Array, ArrayRef, RecordBatch};
use arrow_cast::cast;
use arrow_cast::display::{ArrayFormatter, FormatOptions};
use arrow_json::writer::{make_encoder, EncoderOptions};
use arrow_schema::{DataType, Field, FieldRef, Schema, SchemaRef};

use crate::error::{ExtractError, Result};
use crate::query::{
    ARRAY_JOIN_SEPARATOR, ColumnTransform, ENRICHED_NAME, NAMES_COLUMN, NAMES_PRIMARY_FIELD,
    Projection,
};

/// Computes the schema batches will have after [`apply`].
///
/// Passthrough projections keep the input schema. Rewritten projections
/// replace transformed columns with nullable text fields, optionally with
/// a leading `name` column, preserving schema-level metadata.
#[must_use]
pub fn output_schema(input: &SchemaRef, projection: &Projection) -> SchemaRef {
    match projection {
        Projection::Passthrough => input.clone(),
        Projection::Rewritten {
            columns,
            enrich_name,
        } => {
            let mut fields: Vec<FieldRef> = Vec::with_capacity(columns.len() + 1);
            if *enrich_name {
                fields.push(Arc::new(Field::new(ENRICHED_NAME, DataType::Utf8, true)));
            }
            for (selection, field) in columns.iter().zip(input.fields()) {
                match selection.transform {
                    ColumnTransform::Passthrough => fields.push(field.clone()),
                    ColumnTransform::JsonEncode | ColumnTransform::JoinArray => {
                        fields.push(Arc::new(Field::new(&selection.name, DataType::Utf8, true)));
                    }
                }
            }
            Arc::new(Schema::new_with_metadata(fields, input.metadata().clone()))
        }
    }
}

/// Applies a projection to one batch.
pub fn apply(batch: &RecordBatch, projection: &Projection) -> Result<RecordBatch> {
    let Projection::Rewritten {
        columns,
        enrich_name,
    } = projection
    else {
        return Ok(batch.clone());
    };

    let schema = batch.schema();
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(columns.len() + 1);
    if *enrich_name {
        arrays.push(primary_name_array(batch)?);
    }
    for (index, selection) in columns.iter().enumerate() {
        let array = batch.column(index);
        let transformed = match selection.transform {
            ColumnTransform::Passthrough => array.clone(),
            ColumnTransform::JsonEncode => json_encode(&schema.fields()[index], array)?,
            ColumnTransform::JoinArray => join_array(array)?,
        };
        arrays.push(transformed);
    }

    RecordBatch::try_new(output_schema(&schema, projection), arrays)
        .map_err(ExtractError::engine)
}

/// Serializes each row of a nested column to a JSON text value.
fn json_encode(field: &FieldRef, array: &ArrayRef) -> Result<ArrayRef> {
    let options = EncoderOptions::default();
    let mut encoder =
        make_encoder(field, array.as_ref(), &options).map_err(ExtractError::engine)?;
    let mut builder = StringBuilder::new();
    let mut buf = Vec::new();
    for idx in 0..array.len() {
        if encoder.is_null(idx) {
            builder.append_null();
        } else {
            buf.clear();
            encoder.encode(idx, &mut buf);
            let text = std::str::from_utf8(&buf).map_err(ExtractError::engine)?;
            builder.append_value(text);
        }
    }
    Ok(Arc::new(builder.finish()))
}

/// Joins each row of a list column into one delimited text value.
fn join_array(array: &ArrayRef) -> Result<ArrayRef> {
    let mut builder = StringBuilder::new();
    let options = FormatOptions::default();
    match array.data_type() {
        DataType::List(_) => {
            let list = array.as_list::<i32>();
            for row in 0..list.len() {
                if list.is_null(row) {
                    builder.append_null();
                } else {
                    builder.append_value(join_values(&list.value(row), &options)?);
                }
            }
        }
        DataType::LargeList(_) => {
            let list = array.as_list::<i64>();
            for row in 0..list.len() {
                if list.is_null(row) {
                    builder.append_null();
                } else {
                    builder.append_value(join_values(&list.value(row), &options)?);
                }
            }
        }
        DataType::FixedSizeList(_, _) => {
            let list = array.as_fixed_size_list();
            for row in 0..list.len() {
                if list.is_null(row) {
                    builder.append_null();
                } else {
                    builder.append_value(join_values(&list.value(row), &options)?);
                }
            }
        }
        other => {
            return Err(ExtractError::engine(format!(
                "cannot join non-list column of type {other}"
            )));
        }
    }
    Ok(Arc::new(builder.finish()))
}

fn join_values(values: &ArrayRef, options: &FormatOptions<'_>) -> Result<String> {
    let formatter =
        ArrayFormatter::try_new(values.as_ref(), options).map_err(ExtractError::engine)?;
    let parts: Vec<String> = (0..values.len())
        .map(|i| formatter.value(i).to_string())
        .collect();
    Ok(parts.join(ARRAY_JOIN_SEPARATOR))
}

/// Extracts `names.primary` as a nullable text array, honoring struct nulls.
fn primary_name_array(batch: &RecordBatch) -> Result<ArrayRef> {
    let schema = batch.schema();
    let (index, _) = schema
        .fields()
        .iter()
        .enumerate()
        .find(|(_, f)| f.name().eq_ignore_ascii_case(NAMES_COLUMN))
        .ok_or_else(|| ExtractError::engine("names column vanished between plan and batch"))?;
    let names = batch.column(index).as_struct();
    let primary_index = names
        .fields()
        .iter()
        .position(|f| f.name().eq_ignore_ascii_case(NAMES_PRIMARY_FIELD))
        .ok_or_else(|| ExtractError::engine("names column has no primary field"))?;

    let primary = names.column(primary_index);
    let primary = if primary.data_type() == &DataType::Utf8 {
        primary.clone()
    } else {
        cast(primary.as_ref(), &DataType::Utf8).map_err(ExtractError::engine)?
    };

    let text = primary.as_string::<i32>();
    let mut builder = StringBuilder::new();
    for row in 0..names.len() {
        if names.is_null(row) || text.is_null(row) {
            builder.append_null();
        } else {
            builder.append_value(text.value(row));
        }
    }
    Ok(Arc::new(builder.finish()))
}
