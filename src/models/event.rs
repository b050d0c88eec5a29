//! S3-style object notification payloads.
//!
//! Only the fields the pipeline reads are modelled; unknown fields are
//! ignored so notifications from S3, MinIO and similar sources all parse.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Event name used for notifications synthesized from local uploads.
pub const OBJECT_CREATED_PUT: &str = "ObjectCreated:Put";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Event {
    #[serde(rename = "Records", default)]
    pub records: Vec<S3EventRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3EventRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,

    /// Opaque timestamp string; only logged.
    #[serde(default)]
    pub event_time: String,

    pub s3: S3Entity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Entity {
    pub bucket: S3Bucket,
    pub object: S3Object,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Bucket {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Object {
    /// URL-encoded key with `+` standing in for spaces.
    pub key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl S3Event {
    /// Build a single-record creation notification for `key`, encoding the
    /// key the way upstream notification sources do.
    pub fn object_created(
        bucket: &str,
        key: &str,
        size: Option<u64>,
        content_type: Option<String>,
        event_time: DateTime<Utc>,
    ) -> Self {
        Self {
            records: vec![S3EventRecord {
                event_name: Some(OBJECT_CREATED_PUT.to_string()),
                event_time: event_time.to_rfc3339_opts(SecondsFormat::Millis, true),
                s3: S3Entity {
                    bucket: S3Bucket {
                        name: bucket.to_string(),
                    },
                    object: S3Object {
                        key: encode_event_key(key),
                        size,
                        content_type,
                    },
                },
            }],
        }
    }

    /// The record a single invocation acts on.
    pub fn first_record(&self) -> Option<&S3EventRecord> {
        self.records.first()
    }
}

/// Percent-encode each path segment, keep `/` separators and write spaces as `+`.
pub fn encode_event_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).replace("%20", "+"))
        .collect::<Vec<_>>()
        .join("/")
}
