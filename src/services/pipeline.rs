//! One invocation per notification: route the key, fetch the original,
//! resize it, write the thumbnail.
//!
//! The steps run strictly in sequence and nothing is written unless every
//! earlier step succeeded. Failures are returned as an [`InvocationOutcome`]
//! rather than raised, leaving retry policy to whoever delivered the event.

use crate::{
    config::PipelineConfig,
    models::{
        event::{S3Event, S3EventRecord},
        outcome::{FailureKind, InvocationOutcome},
    },
    services::{
        key_router::{RouteDecision, RoutingRules},
        object_store::ObjectStore,
        resize_service::Resizer,
    },
};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct ThumbnailPipeline {
    store: Arc<dyn ObjectStore>,
    rules: RoutingRules,
    resizer: Resizer,
    destination_bucket: String,
}

impl ThumbnailPipeline {
    pub fn new(store: Arc<dyn ObjectStore>, config: PipelineConfig) -> Self {
        Self {
            store,
            rules: config.rules,
            resizer: Resizer::new(config.thumbnail_width),
            destination_bucket: config.destination_bucket,
        }
    }

    pub fn destination_bucket(&self) -> &str {
        &self.destination_bucket
    }

    /// Handle the first record of `event`; any further records are ignored.
    pub async fn handle_event(&self, event: &S3Event) -> InvocationOutcome {
        let Some(record) = event.first_record() else {
            warn!("notification contains no records");
            return InvocationOutcome::failed(
                FailureKind::MalformedEvent,
                "notification contains no records",
            );
        };

        if event.records.len() > 1 {
            warn!(
                ignored = event.records.len() - 1,
                "only the first record of a notification is processed"
            );
        }

        self.handle_record(record).await
    }

    async fn handle_record(&self, record: &S3EventRecord) -> InvocationOutcome {
        let src_bucket = record.s3.bucket.name.as_str();
        let raw_key = record.s3.object.key.as_str();

        let (src_key, dest_key) = match self.rules.route(raw_key) {
            RouteDecision::Skip(reason) => {
                info!(bucket = %src_bucket, key = %raw_key, %reason, "skipping object");
                return InvocationOutcome::Skipped { reason };
            }
            RouteDecision::Process {
                source_key,
                destination_key,
            } => (source_key, destination_key),
        };

        info!(
            event_time = %record.event_time,
            bucket = %src_bucket,
            key = %src_key,
            "processing object"
        );

        let fetched = match self.store.fetch_object(src_bucket, &src_key).await {
            Ok(fetched) => fetched,
            Err(err) => {
                let kind = if err.is_not_found() {
                    FailureKind::NotFound
                } else if err.is_retryable() {
                    FailureKind::Fetch
                } else {
                    FailureKind::InvalidRequest
                };
                error!(bucket = %src_bucket, key = %src_key, error = %err, %kind, "failed to fetch original");
                return InvocationOutcome::failed(kind, err.to_string());
            }
        };

        let resizer = self.resizer;
        let body = fetched.body.clone();
        let thumbnail = match tokio::task::spawn_blocking(move || resizer.resize(&body)).await {
            Ok(Ok(thumbnail)) => thumbnail,
            Ok(Err(err)) => {
                error!(bucket = %src_bucket, key = %src_key, error = %err, "failed to resize image");
                return InvocationOutcome::failed(FailureKind::Decode, err.to_string());
            }
            Err(err) => {
                error!(bucket = %src_bucket, key = %src_key, error = %err, "resize task aborted");
                return InvocationOutcome::failed(
                    FailureKind::Decode,
                    format!("resize task aborted: {err}"),
                );
            }
        };

        let content_type = fetched
            .reference
            .content_type
            .clone()
            .or_else(|| Some(thumbnail.content_type().to_string()));

        match self
            .store
            .put_object(
                &self.destination_bucket,
                &dest_key,
                Bytes::from(thumbnail.bytes),
                content_type,
            )
            .await
        {
            Ok(destination) => {
                info!(
                    source = %format!("{}/{}", src_bucket, src_key),
                    destination = %format!("{}/{}", destination.bucket, destination.key),
                    width = thumbnail.width,
                    height = thumbnail.height,
                    "successfully resized and uploaded thumbnail"
                );
                InvocationOutcome::Processed {
                    source: fetched.reference,
                    destination,
                }
            }
            Err(err) => {
                let kind = if err.is_retryable() {
                    FailureKind::Write
                } else {
                    FailureKind::InvalidRequest
                };
                error!(
                    bucket = %self.destination_bucket,
                    key = %dest_key,
                    error = %err,
                    %kind,
                    "failed to write thumbnail"
                );
                InvocationOutcome::failed(kind, err.to_string())
            }
        }
    }
}
