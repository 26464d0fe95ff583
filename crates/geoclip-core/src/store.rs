//! Object store registration.
//!
//! Sources may live on the local filesystem, on S3, or behind plain HTTP.
//! The session context needs a matching object store registered before the
//! Parquet reader can touch a remote URI, so this happens once per
//! extraction, keyed on the URI scheme.

use std::sync::Arc;

use datafusion::prelude::SessionContext;
use log::debug;
use object_store::aws::AmazonS3Builder;
use object_store::http::HttpBuilder;
use url::Url;

use crate::error::{ExtractError, Result};

const DEFAULT_S3_REGION: &str = "us-east-1";

/// Registers the object store needed to read `uri` with the session.
///
/// Local paths and `file://` URIs need no registration. S3 buckets are
/// registered from the environment, falling back to anonymous access when
/// no credentials are present. HTTP(S) origins are registered directly.
pub fn register_store(ctx: &SessionContext, uri: &str) -> Result<()> {
    let Ok(url) = Url::parse(uri) else {
        // Bare filesystem paths do not parse as URLs; nothing to register.
        return Ok(());
    };

    match url.scheme() {
        "file" => Ok(()),
        "s3" => register_s3(ctx, &url),
        "http" | "https" => register_http(ctx, &url),
        other => Err(ExtractError::SourceUnreadable {
            uri: uri.to_string(),
            message: format!("unsupported URI scheme '{other}'"),
        }),
    }
}

fn register_s3(ctx: &SessionContext, url: &Url) -> Result<()> {
    let bucket = url.host_str().ok_or_else(|| ExtractError::SourceUnreadable {
        uri: url.to_string(),
        message: "missing bucket name".to_string(),
    })?;

    let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
    if std::env::var("AWS_ACCESS_KEY_ID").is_err() {
        // Public datasets such as Overture are served unauthenticated.
        debug!("no AWS credentials in environment, using anonymous S3 access");
        builder = builder.with_skip_signature(true);
    }
    if std::env::var("AWS_REGION").is_err() && std::env::var("AWS_DEFAULT_REGION").is_err() {
        builder = builder.with_region(DEFAULT_S3_REGION);
    }
    let store = builder.build().map_err(|e| ExtractError::SourceUnreadable {
        uri: url.to_string(),
        message: e.to_string(),
    })?;

    let base = Url::parse(&format!("s3://{bucket}")).map_err(|e| {
        ExtractError::SourceUnreadable {
            uri: url.to_string(),
            message: e.to_string(),
        }
    })?;
    ctx.register_object_store(&base, Arc::new(store));
    Ok(())
}

fn register_http(ctx: &SessionContext, url: &Url) -> Result<()> {
    let origin = url.origin().ascii_serialization();
    let store = HttpBuilder::new()
        .with_url(&origin)
        .build()
        .map_err(|e| ExtractError::SourceUnreadable {
            uri: url.to_string(),
            message: e.to_string(),
        })?;
    let base = Url::parse(&origin).map_err(|e| ExtractError::SourceUnreadable {
        uri: url.to_string(),
        message: e.to_string(),
    })?;
    ctx.register_object_store(&base, Arc::new(store));
    Ok(())
}
