//! Notification intake.
//!
//! `POST /events` accepts an S3-style notification (the payload S3, MinIO
//! webhooks and similar sources deliver), runs one pipeline invocation and
//! reports the outcome. The status code tells the sender whether
//! redelivering the same event could help.

use crate::{AppState, models::event::S3Event, models::outcome::InvocationOutcome};
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// `POST /events`
pub async fn receive_event(
    State(state): State<AppState>,
    Json(event): Json<S3Event>,
) -> Response {
    let outcome = state.pipeline.handle_event(&event).await;
    (status_for(&outcome), Json(outcome)).into_response()
}

/// Processed and skipped both count as handled; failures are 503 when a
/// retry could succeed and 422 when it never will.
pub fn status_for(outcome: &InvocationOutcome) -> StatusCode {
    match outcome {
        InvocationOutcome::Processed { .. } | InvocationOutcome::Skipped { .. } => StatusCode::OK,
        InvocationOutcome::Failed { retryable: true, .. } => StatusCode::SERVICE_UNAVAILABLE,
        InvocationOutcome::Failed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{object::ObjectReference, outcome::FailureKind},
        routes::routes::tests::{send, test_state},
        services::{key_router::SkipReason, resize_service::tests::sample_image},
    };
    use axum::{
        body::{Body, Bytes},
        http::{Request, header},
    };
    use chrono::Utc;
    use image::ImageFormat;
    use serde_json::{Value, json};

    fn post_event(body: impl Into<Body>) -> Request<Body> {
        Request::post("/events")
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.into())
            .unwrap()
    }

    fn created(bucket: &str, key: &str) -> Request<Body> {
        let event = S3Event::object_created(bucket, key, None, None, Utc::now());
        post_event(serde_json::to_vec(&event).unwrap())
    }

    async fn post(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
        let (status, body) = send(state, request).await;
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    #[test]
    fn test_status_for_outcomes() {
        let processed = InvocationOutcome::Processed {
            source: ObjectReference::new("photos", "original-images/a.png", None),
            destination: ObjectReference::new("thumbs", "resized-images/a.png", None),
        };
        let skipped = InvocationOutcome::Skipped {
            reason: SkipReason::AlreadyProcessed,
        };

        assert_eq!(status_for(&processed), StatusCode::OK);
        assert_eq!(status_for(&skipped), StatusCode::OK);
        assert_eq!(
            status_for(&InvocationOutcome::failed(FailureKind::Write, "disk full")),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&InvocationOutcome::failed(FailureKind::Fetch, "timeout")),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&InvocationOutcome::failed(FailureKind::Decode, "truncated")),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&InvocationOutcome::failed(FailureKind::NotFound, "gone")),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[tokio::test]
    async fn test_event_for_original_writes_thumbnail() {
        let state = test_state(false).await;
        state
            .storage
            .upload_object_bytes(
                "photos",
                "original-images/my cat.png",
                Some("image/png".into()),
                Bytes::from(sample_image(400, 200, ImageFormat::Png)),
            )
            .await
            .unwrap();

        let (status, body) = post(&state, created("photos", "original-images/my cat.png")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "processed");
        assert_eq!(
            body["destination"],
            json!({
                "bucket": "thumbs",
                "key": "resized-images/my cat.png",
                "content_type": "image/png"
            })
        );

        let (_, thumb) = state
            .storage
            .read_object("thumbs", "resized-images/my cat.png")
            .await
            .unwrap();
        let thumb = image::load_from_memory(&thumb).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (200, 100));
    }

    #[tokio::test]
    async fn test_event_for_thumbnail_is_skipped() {
        let state = test_state(false).await;
        let (status, body) = post(&state, created("thumbs", "resized-images/cat.png")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({ "status": "skipped", "reason": { "kind": "already_processed" } })
        );
    }

    #[tokio::test]
    async fn test_permanent_failures_are_unprocessable() {
        let state = test_state(false).await;

        let (status, body) = post(&state, created("photos", "original-images/gone.jpg")).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["kind"], "not_found");
        assert_eq!(body["retryable"], false);

        let (status, body) = post(&state, created("photos", "original-images/a..jpg")).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["kind"], "invalid_request");

        let (status, body) = post(&state, post_event(r#"{"Records":[]}"#)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["kind"], "malformed_event");
    }

    #[tokio::test]
    async fn test_store_outage_asks_for_redelivery() {
        let state = test_state(false).await;
        state.storage.db.close().await;

        let (status, body) = post(&state, created("photos", "original-images/cat.jpg")).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["kind"], "fetch");
        assert_eq!(body["retryable"], true);
    }

    #[tokio::test]
    async fn test_body_that_is_not_a_notification_is_rejected() {
        let state = test_state(false).await;

        let (status, _) = send(&state, post_event("not json at all")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&state, post_event(r#"{"Records":[{"eventTime":"x"}]}"#)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let untyped = Request::post("/events")
            .body(Body::from(r#"{"Records":[]}"#))
            .unwrap();
        let (status, _) = send(&state, untyped).await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }
}
