use crate::config::S3Config;
use anyhow::{Context, Result};
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::Client as S3Client;
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

/// One listed object, with the marker fields the capture-date cache keys on.
#[derive(Debug, Clone)]
pub struct ObjectInfo {
    pub key: String,
    pub size: i64,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl ObjectInfo {
    /// Version marker for cache keying: ETag when present, else the storage
    /// modification time.
    pub fn version_marker(&self) -> String {
        if let Some(etag) = &self.etag {
            return etag.clone();
        }
        self.last_modified
            .map(|ts| ts.to_rfc3339())
            .unwrap_or_else(|| "unversioned".to_string())
    }
}

/// Outcome of a bulk delete: which keys were removed and which failed.
#[derive(Debug, Default)]
pub struct BulkDeleteOutcome {
    pub deleted: Vec<String>,
    pub failed: Vec<BulkDeleteFailure>,
}

/// Per-key failure detail from a bulk delete.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BulkDeleteFailure {
    pub key: String,
    pub code: String,
    pub message: String,
}

/// Media bucket client wrapping S3 access for the calendar service.
pub struct MediaBucket {
    client: S3Client,
    bucket: String,
    public_base_url: String,
}

impl MediaBucket {
    /// Create a new bucket client from configuration.
    pub async fn new(config: &S3Config) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());
        let public_base_url = public_base_url(config);

        info!(
            bucket = %config.bucket,
            region = %config.region,
            public_base_url = %public_base_url,
            "Media bucket client initialized"
        );

        Ok(Self::from_client(client, &config.bucket, public_base_url))
    }

    /// Assemble a bucket client from an existing S3 client.
    pub fn from_client(
        client: S3Client,
        bucket: impl Into<String>,
        public_base_url: impl Into<String>,
    ) -> Self {
        let base: String = public_base_url.into();
        Self {
            client,
            bucket: bucket.into(),
            public_base_url: base.trim_end_matches('/').to_string(),
        }
    }

    /// List every object under `prefix`, following continuation tokens.
    #[instrument(skip(self))]
    pub async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .context("Failed to list objects")?;

            for object in response.contents() {
                let Some(key) = object.key() else { continue };
                objects.push(ObjectInfo {
                    key: key.to_string(),
                    size: object.size().unwrap_or(0),
                    etag: object.e_tag().map(String::from),
                    last_modified: object
                        .last_modified()
                        .and_then(|ts| DateTime::from_timestamp(ts.secs(), ts.subsec_nanos())),
                });
            }

            match response.next_continuation_token() {
                Some(token) => continuation_token = Some(token.to_string()),
                None => break,
            }
        }

        debug!(prefix = %prefix, count = objects.len(), "Listed objects");
        Ok(objects)
    }

    /// Fetch the first `len` bytes of an object.
    pub async fn get_object_prefix(&self, key: &str, len: u64) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .range(format!("bytes=0-{}", len.saturating_sub(1)))
            .send()
            .await
            .context("Failed to fetch object byte range")?;

        let bytes = response
            .body
            .collect()
            .await
            .context("Failed to read object byte range")?;
        Ok(bytes.to_vec())
    }

    /// Fetch an entire object.
    pub async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .context("Failed to fetch object")?;

        let bytes = response
            .body
            .collect()
            .await
            .context("Failed to read object body")?;
        Ok(bytes.to_vec())
    }

    /// Check whether an object exists, treating not-found as `false`.
    pub async fn object_exists(&self, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(false)
                } else {
                    Err(e).context("Failed to check object existence")
                }
            }
        }
    }

    /// Upload a JSON document, overwriting any previous object at `key`.
    #[instrument(skip(self, body), fields(size_bytes = body.len()))]
    pub async fn put_json(&self, key: &str, body: Vec<u8>) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type("application/json")
            .send()
            .await
            .context("Failed to upload JSON object")?;

        debug!(key = %key, "Uploaded JSON object");
        Ok(())
    }

    /// Delete up to 1000 objects in one call, reporting per-key outcomes.
    #[instrument(skip(self, keys), fields(count = keys.len()))]
    pub async fn delete_objects(&self, keys: &[String]) -> Result<BulkDeleteOutcome> {
        let mut identifiers = Vec::with_capacity(keys.len());
        for key in keys {
            identifiers.push(
                ObjectIdentifier::builder()
                    .key(key)
                    .build()
                    .context("Invalid object key in delete request")?,
            );
        }

        let delete = Delete::builder()
            .set_objects(Some(identifiers))
            .quiet(false)
            .build()
            .context("Failed to build delete request")?;

        let response = self
            .client
            .delete_objects()
            .bucket(&self.bucket)
            .delete(delete)
            .send()
            .await
            .context("Failed to delete objects")?;

        let mut outcome = BulkDeleteOutcome::default();
        for deleted in response.deleted() {
            if let Some(key) = deleted.key() {
                outcome.deleted.push(key.to_string());
            }
        }
        for error in response.errors() {
            outcome.failed.push(BulkDeleteFailure {
                key: error.key().unwrap_or_default().to_string(),
                code: error.code().unwrap_or("Unknown").to_string(),
                message: error.message().unwrap_or_default().to_string(),
            });
        }

        info!(
            deleted = outcome.deleted.len(),
            failed = outcome.failed.len(),
            "Bulk delete completed"
        );
        Ok(outcome)
    }

    /// Canonical public URL for an object key. Each path segment is
    /// percent-encoded independently; encoding the whole key at once would
    /// escape the separator slashes.
    pub fn public_url(&self, key: &str) -> String {
        let encoded = key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/{}", self.public_base_url, encoded)
    }

    /// Re-derive the object key behind a canonical public URL, the inverse of
    /// [`Self::public_url`]. Returns `None` for URLs outside this bucket.
    pub fn key_for_url(&self, url: &str) -> Option<String> {
        let path = url.strip_prefix(&self.public_base_url)?.strip_prefix('/')?;
        let segments: Result<Vec<String>, _> = path
            .split('/')
            .map(|segment| urlencoding::decode(segment).map(|s| s.into_owned()))
            .collect();
        segments.ok().map(|s| s.join("/"))
    }

    /// Get the bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

/// Resolve the public base URL media is served from.
fn public_base_url(config: &S3Config) -> String {
    if let Some(base) = &config.public_base_url {
        return base.trim_end_matches('/').to_string();
    }
    match &config.endpoint_url {
        Some(endpoint) => format!("{}/{}", endpoint.trim_end_matches('/'), config.bucket),
        None => format!("https://{}.s3.{}.amazonaws.com", config.bucket, config.region),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::config::{Credentials, Region};

    fn test_bucket() -> MediaBucket {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .credentials_provider(Credentials::new("test", "test", None, None, "static"))
            .build();
        MediaBucket::from_client(
            S3Client::from_conf(config),
            "memories",
            "https://media.example.com",
        )
    }

    #[test]
    fn test_public_url_preserves_separators() {
        let bucket = test_bucket();
        let url = bucket.public_url("processed/2024/family picnic.jpg");
        assert_eq!(
            url,
            "https://media.example.com/processed/2024/family%20picnic.jpg"
        );
        assert!(!url.contains("%2F"));
    }

    #[test]
    fn test_public_url_encodes_segment_contents() {
        let bucket = test_bucket();
        let url = bucket.public_url("processed/café & sea.png");
        assert!(url.starts_with("https://media.example.com/processed/"));
        assert!(url.contains("%20%26%20"));
    }

    #[test]
    fn test_key_for_url_inverts_public_url() {
        let bucket = test_bucket();
        for key in [
            "processed/2024/family picnic.jpg",
            "processed/café & sea.png",
            "originals/IMG_0001.CR2",
        ] {
            let url = bucket.public_url(key);
            assert_eq!(bucket.key_for_url(&url).as_deref(), Some(key));
        }
    }

    #[test]
    fn test_key_for_url_rejects_foreign_urls() {
        let bucket = test_bucket();
        assert_eq!(bucket.key_for_url("https://elsewhere.example.com/a.jpg"), None);
    }

    #[test]
    fn test_version_marker_prefers_etag() {
        let info = ObjectInfo {
            key: "a.jpg".to_string(),
            size: 1,
            etag: Some("\"abc\"".to_string()),
            last_modified: Some(Utc::now()),
        };
        assert_eq!(info.version_marker(), "\"abc\"");

        let undated = ObjectInfo {
            key: "a.jpg".to_string(),
            size: 1,
            etag: None,
            last_modified: None,
        };
        assert_eq!(undated.version_marker(), "unversioned");
    }

    #[test]
    fn test_default_public_base_url() {
        let config = crate::config::S3Config {
            bucket: "memories".to_string(),
            region: "eu-west-1".to_string(),
            endpoint_url: None,
            force_path_style: false,
            public_base_url: None,
            processed_prefix: "processed".to_string(),
            originals_prefix: "originals".to_string(),
        };
        assert_eq!(
            public_base_url(&config),
            "https://memories.s3.eu-west-1.amazonaws.com"
        );

        let minio = crate::config::S3Config {
            endpoint_url: Some("http://localhost:9000/".to_string()),
            ..config
        };
        assert_eq!(public_base_url(&minio), "http://localhost:9000/memories");
    }
}
