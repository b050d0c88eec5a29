//! HTTP surface of the thumbnailer.
//!
//! ## Structure
//! - **Notifications**
//!   - `POST   /events`: run the pipeline for one S3-style notification
//!
//! - **Local object store**
//!   - `PUT    /{bucket}`: create bucket
//!   - `PUT    /{bucket}/{*key}`: upload object (announced to the pipeline)
//!   - `GET    /{bucket}/{*key}`: download object
//!
//! - **Probes**
//!   - `GET    /healthz`, `GET /readyz`
//!
//! The wildcard `*key` allows nested keys like `original-images/2025/img.jpg`.

use crate::{
    AppState,
    handlers::{
        event_handlers::receive_event,
        health_handlers::{healthz, readyz},
        object_handlers::{create_bucket, get_object, upload_object},
    },
};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Build the router; handlers share `AppState`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/events", post(receive_event))
        .route("/{bucket}/{*key}", put(upload_object).get(get_object))
        .route("/{bucket}", put(create_bucket))
}
