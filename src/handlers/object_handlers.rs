//! HTTP handlers for buckets and objects in the local store.
//! Uploads stream straight to disk; a completed upload is announced to the
//! thumbnail pipeline the way a bucket notification would be.

use crate::{
    AppState,
    errors::AppError,
    models::{event::S3Event, object::Object},
    services::storage_service::DEFAULT_REGION,
};
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::io;
use tokio_util::io::ReaderStream;

/// Optional request body for `PUT /{bucket}` (create bucket).
#[derive(Debug, Deserialize)]
pub struct CreateBucketReq {
    #[serde(rename = "LocationConstraint")]
    pub location_constraint: Option<String>,
}

/// PUT `/{bucket}`: create bucket.
pub async fn create_bucket(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let payload = if body.is_empty() {
        None
    } else {
        Some(
            serde_json::from_slice::<CreateBucketReq>(&body)
                .map_err(|e| AppError::bad_request(format!("invalid bucket configuration: {e}")))?,
        )
    };
    let region = payload
        .and_then(|p| p.location_constraint)
        .unwrap_or_else(|| DEFAULT_REGION.into());

    let created = state.storage.create_bucket(&bucket, &region).await?;
    tracing::info!(bucket = %created.name, region = %created.region, "created bucket");

    Ok((StatusCode::CREATED, Json(created)))
}

/// PUT `/{bucket}/{*key}`: upload an object, then notify the pipeline.
pub async fn upload_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other));

    let object = state
        .storage
        .upload_object_stream(&bucket, &key, content_type, stream)
        .await?;

    if state.notify_on_upload {
        notify_created(&state, &bucket, &object);
    }

    let mut resp_headers = HeaderMap::new();
    if let Some(etag) = object.etag.as_ref() {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", etag)) {
            resp_headers.insert(header::ETAG, value);
        }
    }

    Ok((
        StatusCode::OK,
        resp_headers,
        Json(json!({
            "bucket": bucket,
            "key": object.key,
            "size": object.size_bytes,
        })),
    ))
}

/// GET `/{bucket}/{*key}`: stream an object back out.
pub async fn get_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let (meta, file) = state.storage.get_object_reader(&bucket, &key).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::new(body);
    set_object_headers(response.headers_mut(), &meta);
    Ok(response)
}

/// Hand a creation event for `object` to the pipeline on its own task, as a
/// notification source would invoke a handler per event.
fn notify_created(state: &AppState, bucket: &str, object: &Object) {
    let event = S3Event::object_created(
        bucket,
        &object.key,
        u64::try_from(object.size_bytes).ok(),
        object.content_type.clone(),
        object.last_modified,
    );
    let pipeline = state.pipeline.clone();
    tokio::spawn(async move {
        let outcome = pipeline.handle_event(&event).await;
        if outcome.is_retryable() {
            // Nothing redelivers local notifications; the upload stays without a thumbnail.
            tracing::warn!(?outcome, "upload notification failed and will not be retried");
        } else {
            tracing::debug!(?outcome, "upload notification handled");
        }
    });
}

fn set_object_headers(headers: &mut HeaderMap, meta: &Object) {
    let content_type = meta
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.size_bytes.max(0)));

    if let Some(etag) = meta.etag.as_ref() {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", etag)) {
            headers.insert(header::ETAG, value);
        }
    }

    if let Ok(value) = HeaderValue::from_str(&meta.last_modified.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}
