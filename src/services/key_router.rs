//! Maps an uploaded object key to the key its thumbnail is written under.
//!
//! Routing is a pure function of the key and the configured [`RoutingRules`].
//! Keys that already carry the resized prefix are never routed again, and
//! every destination key carries that prefix exactly once, so feeding a
//! destination key back through [`RoutingRules::route`] always skips.

use serde::Serialize;
use std::fmt;

/// Marks an object as a derivative written by this service.
pub const DEFAULT_RESIZED_PREFIX: &str = "resized-images/";

/// Source-side path segment dropped when building the destination key.
pub const DEFAULT_ORIGINAL_PREFIX: &str = "original-images/";

/// Extensions the resizer can decode.
pub const DEFAULT_SUPPORTED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Naming conventions used to route keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingRules {
    pub resized_prefix: String,
    pub original_prefix: String,
    /// Lower-case extensions without the leading dot.
    pub supported_extensions: Vec<String>,
}

impl Default for RoutingRules {
    fn default() -> Self {
        Self {
            resized_prefix: DEFAULT_RESIZED_PREFIX.into(),
            original_prefix: DEFAULT_ORIGINAL_PREFIX.into(),
            supported_extensions: DEFAULT_SUPPORTED_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }
}

/// Why an object was left alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    /// The key is already a derivative.
    AlreadyProcessed,
    /// The extension is not one the resizer decodes.
    UnsupportedFormat(String),
    /// The key does not percent-decode to UTF-8.
    MalformedKey,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::AlreadyProcessed => write!(f, "object is already resized"),
            SkipReason::UnsupportedFormat(ext) => write!(f, "unsupported file type ({ext})"),
            SkipReason::MalformedKey => write!(f, "object key is not valid UTF-8 once decoded"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    Skip(SkipReason),
    Process {
        /// Decoded key of the uploaded object.
        source_key: String,
        /// Key the thumbnail is written under in the destination bucket.
        destination_key: String,
    },
}

impl RoutingRules {
    /// Decide whether `raw_key`, as delivered by a notification, is resized
    /// and where the result goes.
    pub fn route(&self, raw_key: &str) -> RouteDecision {
        let Some(key) = normalize_key(raw_key) else {
            return RouteDecision::Skip(SkipReason::MalformedKey);
        };

        if key.starts_with(&self.resized_prefix) {
            return RouteDecision::Skip(SkipReason::AlreadyProcessed);
        }

        let ext = extension(&key);
        if !self.is_supported(&ext) {
            return RouteDecision::Skip(SkipReason::UnsupportedFormat(ext));
        }

        let remainder = self.strip_original_prefix(&key);
        // Would otherwise produce a key carrying the resized prefix twice.
        if remainder.starts_with(&self.resized_prefix) {
            return RouteDecision::Skip(SkipReason::AlreadyProcessed);
        }

        let destination_key = format!("{}{}", self.resized_prefix, remainder);
        RouteDecision::Process {
            source_key: key,
            destination_key,
        }
    }

    fn is_supported(&self, ext: &str) -> bool {
        self.supported_extensions
            .iter()
            .any(|supported| supported.eq_ignore_ascii_case(ext))
    }

    /// Drop everything up to the last `/<original prefix>` segment, then a
    /// leading `<original prefix>`.
    fn strip_original_prefix<'a>(&self, key: &'a str) -> &'a str {
        let prefix = self.original_prefix.as_str();
        if prefix.is_empty() {
            return key;
        }

        let needle = format!("/{prefix}");
        let tail = match key.rfind(&needle) {
            Some(pos) => &key[pos + needle.len()..],
            None => key,
        };
        tail.strip_prefix(prefix).unwrap_or(tail)
    }
}

/// Undo the notification encoding: `+` becomes a space, then `%XX`
/// sequences are decoded. Returns `None` when the bytes are not UTF-8.
pub fn normalize_key(raw_key: &str) -> Option<String> {
    let spaced = raw_key.replace('+', " ");
    urlencoding::decode(&spaced).ok().map(|key| key.into_owned())
}

/// Lower-cased text after the last `.`; the whole key when there is none.
pub fn extension(key: &str) -> String {
    key.rsplit_once('.')
        .map_or(key, |(_, ext)| ext)
        .to_lowercase()
}
