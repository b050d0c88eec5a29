//! src/services/storage_service.rs
//!
//! StorageService: the local object store the thumbnailer reads originals
//! from and writes thumbnails to. Metadata lives in SQLite; payloads live on
//! disk sharded beneath `base_path/{bucket}/{shard}/{shard}/{key}`.

use crate::{
    models::{
        bucket::Bucket,
        object::{Object, ObjectReference},
    },
    services::object_store::{FetchedObject, ObjectStore},
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut, stream};
use md5::Context;
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

/// Schema applied at startup (and by `--migrate`).
const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{0}` already exists")]
    BucketAlreadyExists(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("region `{0}` is not supported")]
    UnsupportedRegion(String),
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StorageError {
    /// True when the bucket or object is missing rather than unreachable.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::BucketNotFound(_) | StorageError::ObjectNotFound { .. }
        )
    }

    /// True for database and filesystem failures. Every other variant is a
    /// property of the request and fails the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Sqlx(_) | StorageError::Io(_))
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// StorageService provides the object operations the thumbnailer needs:
/// - Upload an object (writes bytes to disk and upserts metadata into SQLite)
/// - Read an object (metadata from SQLite, payload from disk)
/// - Create buckets
///
/// Writes overwrite silently; the last writer of a key wins.
#[derive(Clone)]
pub struct StorageService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;
pub const DEFAULT_REGION: &str = "local";
const SUPPORTED_REGIONS: [&str; 8] = [
    "local",
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "eu-west-1",
    "ap-southeast-1",
    "ap-northeast-1",
];

impl StorageService {
    /// Create a new StorageService backed by the provided SQLite pool and
    /// using `base_path` as the root directory for object payloads.
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Apply the embedded schema. Every statement is idempotent.
    pub async fn migrate(&self) -> StorageResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        tracing::info!("Running {} migration statements...", statements.len());

        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Basic key validation to avoid trivial path traversal vectors.
    ///
    /// Rejects empty or oversized keys, keys that begin with `/` or contain
    /// `..`, and keys with control characters or backslashes.
    fn ensure_key_safe(&self, key: &str) -> StorageResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StorageError::InvalidObjectKey);
        }
        if key.starts_with('/') || key.contains("..") {
            return Err(StorageError::InvalidObjectKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(StorageError::InvalidObjectKey);
        }
        Ok(())
    }

    /// Validate bucket name format.
    ///
    /// Enforces S3-like naming rules:
    /// - 3–63 characters
    /// - lowercase letters, digits, dots, hyphens only
    /// - cannot start/end with dot or hyphen
    /// - cannot contain consecutive dots or dot-hyphen patterns
    /// - cannot look like an IPv4 address
    pub fn ensure_bucket_name_safe(&self, name: &str) -> StorageResult<()> {
        let invalid = |reason: &str| StorageError::InvalidBucketName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        let len = name.len();
        if len < BUCKET_NAME_MIN_LEN || len > BUCKET_NAME_MAX_LEN {
            return Err(invalid("must be between 3 and 63 characters"));
        }

        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
        {
            return Err(invalid(
                "allowed characters are lowercase letters, digits, dots, and hyphens",
            ));
        }

        if name.starts_with('.')
            || name.ends_with('.')
            || name.starts_with('-')
            || name.ends_with('-')
        {
            return Err(invalid("must start and end with a lowercase letter or digit"));
        }

        if name.contains("..") || name.contains("-.") || name.contains(".-") {
            return Err(invalid(
                "cannot contain consecutive dots or dot-hyphen combinations",
            ));
        }

        if is_ipv4_like(name) {
            return Err(invalid("must not be formatted like an IP address"));
        }

        Ok(())
    }

    /// Case-insensitive check against SUPPORTED_REGIONS.
    fn ensure_region_valid(&self, region: &str) -> StorageResult<()> {
        if SUPPORTED_REGIONS
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(region))
        {
            Ok(())
        } else {
            Err(StorageError::UnsupportedRegion(region.to_string()))
        }
    }

    fn bucket_root(&self, bucket_name: &str) -> PathBuf {
        self.base_path.join(bucket_name)
    }

    /// Two-level shard directories from the first bytes of MD5(bucket/key).
    fn object_shards(bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// base_path/bucket/{shard}/{shard}/{key}. Parents may not exist yet.
    fn object_path(&self, bucket_name: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket_name, key);
        let mut path = self.bucket_root(bucket_name);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    /// Fetch bucket metadata from SQLite, BucketNotFound if missing.
    async fn fetch_bucket(&self, bucket: &str) -> StorageResult<Bucket> {
        self.ensure_bucket_name_safe(bucket)?;
        sqlx::query_as::<_, Bucket>(
            "SELECT id, name, region, created_at FROM buckets WHERE name = ?",
        )
        .bind(bucket)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::BucketNotFound(bucket.to_string()),
            other => StorageError::Sqlx(other),
        })
    }

    async fn fetch_object_record(&self, bucket: &Bucket, key: &str) -> StorageResult<Object> {
        sqlx::query_as::<_, Object>(
            "SELECT id, bucket_id, key, filename, content_type, size_bytes, etag, last_modified
             FROM objects
             WHERE key = ? AND bucket_id = ?",
        )
        .bind(key)
        .bind(bucket.id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::ObjectNotFound {
                bucket: bucket.name.clone(),
                key: key.to_string(),
            },
            other => StorageError::Sqlx(other),
        })
    }

    /// Stream-upload an object to disk and update metadata.
    ///
    /// - Writes bytes incrementally to a temporary file.
    /// - Computes MD5/etag and size while streaming.
    /// - Atomically renames into final location.
    /// - Upserts metadata row (overwrite semantics).
    ///
    /// Ensures durable writes (fsync) and cleans up temp files on errors.
    pub async fn upload_object_stream<S>(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
        stream: S,
    ) -> StorageResult<Object>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let file_path = self.object_path(&bucket_rec.name, key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StorageError::Io(err));
                }
            };
            size_bytes += chunk.len() as i64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }

        let filename = key.rsplit('/').next().unwrap_or(key).to_string();
        let etag = format!("{:x}", digest.compute());

        let insert_result = sqlx::query_as::<_, Object>(
            r#"
            INSERT INTO objects (
                id, bucket_id, key, filename, content_type, size_bytes, etag, last_modified
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket_id, key) DO UPDATE SET
                filename = excluded.filename,
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified
            RETURNING id, bucket_id, key, filename, content_type, size_bytes, etag, last_modified
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(bucket_rec.id)
        .bind(key)
        .bind(&filename)
        .bind(content_type)
        .bind(size_bytes)
        .bind(&etag)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await;

        match insert_result {
            Ok(obj) => Ok(obj),
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(StorageError::Sqlx(err))
            }
        }
    }

    /// Upload an in-memory payload.
    pub async fn upload_object_bytes(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
        body: Bytes,
    ) -> StorageResult<Object> {
        let stream = stream::once(async move { Ok::<_, io::Error>(body) });
        self.upload_object_stream(bucket, key, content_type, stream)
            .await
    }

    /// Fetch an object for reading.
    ///
    /// Returns metadata and an opened File handle ready for streaming out.
    /// Returns ObjectNotFound if metadata exists but physical file is missing.
    pub async fn get_object_reader(
        &self,
        bucket: &str,
        key: &str,
    ) -> StorageResult<(Object, File)> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let object = self.fetch_object_record(&bucket_rec, key).await?;

        let file_path = self.object_path(&bucket_rec.name, key);
        let file = File::open(&file_path)
            .await
            .map_err(|err| not_found_or_io(err, bucket, key))?;

        Ok((object, file))
    }

    /// Read metadata and the whole payload into memory.
    pub async fn read_object(&self, bucket: &str, key: &str) -> StorageResult<(Object, Bytes)> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let object = self.fetch_object_record(&bucket_rec, key).await?;

        let file_path = self.object_path(&bucket_rec.name, key);
        let data = fs::read(&file_path)
            .await
            .map_err(|err| not_found_or_io(err, bucket, key))?;

        Ok((object, Bytes::from(data)))
    }

    /// Create a bucket and initialize its directory.
    ///
    /// Validates name and region. Returns BucketAlreadyExists on a name
    /// conflict.
    pub async fn create_bucket(&self, name: &str, region: &str) -> StorageResult<Bucket> {
        self.ensure_bucket_name_safe(name)?;
        let normalized_region = region.to_lowercase();
        self.ensure_region_valid(&normalized_region)?;
        fs::create_dir_all(self.bucket_root(name)).await?;

        let bucket = Bucket {
            id: Uuid::new_v4(),
            name: name.to_string(),
            region: normalized_region,
            created_at: Utc::now(),
        };

        match sqlx::query(
            "INSERT INTO buckets (id, name, region, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(bucket.id)
        .bind(&bucket.name)
        .bind(&bucket.region)
        .bind(bucket.created_at)
        .execute(&*self.db)
        .await
        {
            Ok(_) => Ok(bucket),
            Err(err) if is_unique_violation(&err) => {
                Err(StorageError::BucketAlreadyExists(name.to_string()))
            }
            Err(err) => Err(StorageError::Sqlx(err)),
        }
    }

    pub async fn bucket_exists(&self, name: &str) -> StorageResult<bool> {
        match self.fetch_bucket(name).await {
            Ok(_) => Ok(true),
            Err(StorageError::BucketNotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Return the named bucket, creating it in the default region if absent.
    pub async fn ensure_bucket(&self, name: &str) -> StorageResult<Bucket> {
        match self.fetch_bucket(name).await {
            Ok(bucket) => Ok(bucket),
            Err(StorageError::BucketNotFound(_)) => {
                match self.create_bucket(name, DEFAULT_REGION).await {
                    Err(StorageError::BucketAlreadyExists(_)) => self.fetch_bucket(name).await,
                    other => other,
                }
            }
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl ObjectStore for StorageService {
    async fn fetch_object(&self, bucket: &str, key: &str) -> StorageResult<FetchedObject> {
        let (object, body) = self.read_object(bucket, key).await?;
        Ok(FetchedObject {
            reference: ObjectReference::from_object(bucket, &object),
            body,
        })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<String>,
    ) -> StorageResult<ObjectReference> {
        let object = self
            .upload_object_bytes(bucket, key, content_type, body)
            .await?;
        Ok(ObjectReference::from_object(bucket, &object))
    }
}

fn not_found_or_io(err: io::Error, bucket: &str, key: &str) -> StorageError {
    if err.kind() == ErrorKind::NotFound {
        StorageError::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    } else {
        StorageError::Io(err)
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    /// In-memory metadata plus a throwaway payload directory.
    pub(crate) async fn test_service() -> StorageService {
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let base = std::env::temp_dir().join(format!("thumbnailer-test-{}", Uuid::new_v4()));
        let service = StorageService::new(Arc::new(db), base);
        service.migrate().await.unwrap();
        service
    }

    #[tokio::test]
    async fn test_put_then_fetch_round_trip() {
        let service = test_service().await;
        service.create_bucket("photos", "local").await.unwrap();

        let written = service
            .put_object(
                "photos",
                "original-images/cat.png",
                Bytes::from_static(b"png-bytes"),
                Some("image/png".into()),
            )
            .await
            .unwrap();
        assert_eq!(
            written,
            ObjectReference::new("photos", "original-images/cat.png", Some("image/png".into()))
        );

        let fetched = service
            .fetch_object("photos", "original-images/cat.png")
            .await
            .unwrap();
        assert_eq!(fetched.body, Bytes::from_static(b"png-bytes"));
        assert_eq!(fetched.reference.content_type.as_deref(), Some("image/png"));
    }

    #[tokio::test]
    async fn test_overwrite_last_write_wins() {
        let service = test_service().await;
        service.create_bucket("photos", "local").await.unwrap();

        service
            .upload_object_bytes("photos", "a.jpg", None, Bytes::from_static(b"first"))
            .await
            .unwrap();
        let second = service
            .upload_object_bytes(
                "photos",
                "a.jpg",
                Some("image/jpeg".into()),
                Bytes::from_static(b"second!"),
            )
            .await
            .unwrap();

        assert_eq!(second.size_bytes, 7);
        assert_eq!(second.filename, "a.jpg");
        assert_eq!(second.etag.as_deref(), Some(format!("{:x}", md5::compute(b"second!")).as_str()));

        let (meta, body) = service.read_object("photos", "a.jpg").await.unwrap();
        assert_eq!(body, Bytes::from_static(b"second!"));
        assert_eq!(meta.content_type.as_deref(), Some("image/jpeg"));
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let service = test_service().await;
        service.create_bucket("photos", "local").await.unwrap();

        let err = service.fetch_object("photos", "nope.png").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(matches!(err, StorageError::ObjectNotFound { .. }));
    }

    #[tokio::test]
    async fn test_missing_bucket_is_not_found() {
        let service = test_service().await;
        let err = service
            .put_object("absent", "a.png", Bytes::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::BucketNotFound(_)));
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_unsafe_keys_are_rejected() {
        let service = test_service().await;
        service.create_bucket("photos", "local").await.unwrap();

        for key in ["", "/etc/passwd", "a/../b.png", "bad\\key.png"] {
            let err = service
                .put_object("photos", key, Bytes::new(), None)
                .await
                .unwrap_err();
            assert!(matches!(err, StorageError::InvalidObjectKey), "{key:?}");
        }
    }

    #[tokio::test]
    async fn test_duplicate_bucket_is_rejected() {
        let service = test_service().await;
        service.create_bucket("photos", "local").await.unwrap();
        let err = service.create_bucket("photos", "local").await.unwrap_err();
        assert!(matches!(err, StorageError::BucketAlreadyExists(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_only_io_and_database_errors_are_retryable() {
        let io_err = StorageError::Io(io::Error::new(ErrorKind::TimedOut, "timed out"));
        assert!(io_err.is_retryable());
        assert!(StorageError::Sqlx(sqlx::Error::PoolTimedOut).is_retryable());

        for err in [
            StorageError::InvalidObjectKey,
            StorageError::UnsupportedRegion("mars-1".into()),
            StorageError::BucketNotFound("absent".into()),
            StorageError::InvalidBucketName {
                name: "Photos_Upper".into(),
                reason: "uppercase".into(),
            },
        ] {
            assert!(!err.is_retryable(), "{err}");
        }
    }

    #[tokio::test]
    async fn test_unsupported_region_is_rejected() {
        let service = test_service().await;
        let err = service.create_bucket("photos", "mars-1").await.unwrap_err();
        assert!(matches!(err, StorageError::UnsupportedRegion(_)));
    }

    #[tokio::test]
    async fn test_ensure_bucket_is_idempotent() {
        let service = test_service().await;
        assert!(!service.bucket_exists("thumbs").await.unwrap());
        let first = service.ensure_bucket("thumbs").await.unwrap();
        assert!(service.bucket_exists("thumbs").await.unwrap());
        let second = service.ensure_bucket("thumbs").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.region, DEFAULT_REGION);
    }

    #[tokio::test]
    async fn test_bucket_name_rules() {
        let service = test_service().await;
        assert!(service.ensure_bucket_name_safe("my-photos.v2").is_ok());
        for name in ["ab", "Photos", "-photos", "photos.", "a..b", "a.-b", "192.168.1.1"] {
            assert!(service.ensure_bucket_name_safe(name).is_err(), "{name}");
        }
    }
}
