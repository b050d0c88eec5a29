//! Result of a single pipeline invocation.

use crate::{models::object::ObjectReference, services::key_router::SkipReason};
use serde::Serialize;
use std::fmt;

/// Which step of an invocation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The notification carried no usable record.
    MalformedEvent,
    /// The source object does not exist (any more).
    NotFound,
    /// The store refused the bucket or key outright (bad name, unsafe key).
    InvalidRequest,
    /// Reading the source object failed.
    Fetch,
    /// The bytes could not be decoded, resized or re-encoded.
    Decode,
    /// Writing the thumbnail failed.
    Write,
}

impl FailureKind {
    /// Whether invoking again with the same event could succeed.
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureKind::Fetch | FailureKind::Write)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::MalformedEvent => "malformed_event",
            FailureKind::NotFound => "not_found",
            FailureKind::InvalidRequest => "invalid_request",
            FailureKind::Fetch => "fetch",
            FailureKind::Decode => "decode",
            FailureKind::Write => "write",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InvocationOutcome {
    Processed {
        source: ObjectReference,
        destination: ObjectReference,
    },
    Skipped {
        reason: SkipReason,
    },
    Failed {
        kind: FailureKind,
        message: String,
        retryable: bool,
    },
}

impl InvocationOutcome {
    pub fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        InvocationOutcome::Failed {
            kind,
            message: message.into(),
            retryable: kind.is_retryable(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, InvocationOutcome::Failed { retryable: true, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_retryable_kinds() {
        assert!(FailureKind::Fetch.is_retryable());
        assert!(FailureKind::Write.is_retryable());
        assert!(!FailureKind::NotFound.is_retryable());
        assert!(!FailureKind::Decode.is_retryable());
        assert!(!FailureKind::MalformedEvent.is_retryable());
        assert!(!FailureKind::InvalidRequest.is_retryable());
        assert_eq!(FailureKind::InvalidRequest.to_string(), "invalid_request");
    }

    #[test]
    fn test_failed_carries_retry_flag() {
        let outcome = InvocationOutcome::failed(FailureKind::Write, "disk full");
        assert!(outcome.is_retryable());
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({
                "status": "failed",
                "kind": "write",
                "message": "disk full",
                "retryable": true
            })
        );
    }

    #[test]
    fn test_skipped_serialization() {
        let outcome = InvocationOutcome::Skipped {
            reason: SkipReason::UnsupportedFormat("gif".into()),
        };
        assert!(!outcome.is_retryable());
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({
                "status": "skipped",
                "reason": { "kind": "unsupported_format", "detail": "gif" }
            })
        );
    }

    #[test]
    fn test_processed_serialization() {
        let outcome = InvocationOutcome::Processed {
            source: ObjectReference::new("photos", "original-images/cat.png", None),
            destination: ObjectReference::new(
                "thumbs",
                "resized-images/cat.png",
                Some("image/png".into()),
            ),
        };
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({
                "status": "processed",
                "source": { "bucket": "photos", "key": "original-images/cat.png" },
                "destination": {
                    "bucket": "thumbs",
                    "key": "resized-images/cat.png",
                    "content_type": "image/png"
                }
            })
        );
    }
}
