//! Capture-date extraction for media objects.
//!
//! Images are dated from EXIF tags found in the object's leading bytes;
//! videos are spooled to disk and probed with ffprobe for a container-level
//! `creation_time`, falling back to the storage modification time. Every
//! failure degrades to "undated" — a batch never fails because one object
//! has broken metadata.

use crate::bucket::{MediaBucket, ObjectInfo};
use crate::config::MediaConfig;
use crate::media::{self, MediaKind};
use chrono::{DateTime, NaiveDate};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use tracing::debug;

/// Memoized capture dates, keyed by object key and a version marker so a
/// re-uploaded object misses instead of serving the stale date. Invalidated
/// explicitly when objects are deleted.
#[derive(Default)]
pub struct CaptureDateCache {
    entries: RwLock<HashMap<String, CachedDate>>,
}

struct CachedDate {
    version: String,
    date: Option<NaiveDate>,
}

impl CaptureDateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached result for `key` at `version`; `None` means "not cached",
    /// `Some(None)` means "known undated".
    pub fn get(&self, key: &str, version: &str) -> Option<Option<NaiveDate>> {
        let entries = self.entries.read();
        entries
            .get(key)
            .filter(|cached| cached.version == version)
            .map(|cached| cached.date)
    }

    pub fn insert(&self, key: &str, version: &str, date: Option<NaiveDate>) {
        self.entries.write().insert(
            key.to_string(),
            CachedDate {
                version: version.to_string(),
                date,
            },
        );
    }

    /// Drop the entry for a deleted object.
    pub fn invalidate(&self, key: &str) {
        self.entries.write().remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Extracts capture dates from bucket objects, memoizing through an injected
/// [`CaptureDateCache`].
pub struct CaptureDateExtractor {
    bucket: Arc<MediaBucket>,
    cache: Arc<CaptureDateCache>,
    config: MediaConfig,
}

impl CaptureDateExtractor {
    pub fn new(bucket: Arc<MediaBucket>, cache: Arc<CaptureDateCache>, config: MediaConfig) -> Self {
        Self {
            bucket,
            cache,
            config,
        }
    }

    /// Capture date of an object, or `None` when no usable timestamp exists.
    pub async fn capture_date(&self, object: &ObjectInfo) -> Option<NaiveDate> {
        let version = object.version_marker();
        if let Some(cached) = self.cache.get(&object.key, &version) {
            return cached;
        }

        let date = match media::kind(&object.key) {
            MediaKind::Image => self.image_capture_date(&object.key).await,
            MediaKind::Video => self.video_capture_date(object).await,
        };

        self.cache.insert(&object.key, &version, date);
        date
    }

    async fn image_capture_date(&self, key: &str) -> Option<NaiveDate> {
        // The metadata header lives in the leading bytes; the full object is
        // never fetched for images.
        let bytes = match self
            .bucket
            .get_object_prefix(key, self.config.exif_scan_bytes)
            .await
        {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(key = %key, error = %e, "Failed to fetch image header");
                metrics::counter!("calendar.capture_date.fetch_failures").increment(1);
                return None;
            }
        };

        parse_exif_date(&bytes)
    }

    async fn video_capture_date(&self, object: &ObjectInfo) -> Option<NaiveDate> {
        match self.probe_video(&object.key).await {
            Some(date) => Some(date),
            // No container tag: the storage modification time is the best
            // remaining signal.
            None => object.last_modified.map(|ts| ts.date_naive()),
        }
    }

    /// Download the video and read `creation_time` from its first video
    /// stream via ffprobe. Any failure (fetch, spool, missing tool, bad
    /// output) yields `None`.
    async fn probe_video(&self, key: &str) -> Option<NaiveDate> {
        let bytes = match self.bucket.get_object(key).await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(key = %key, error = %e, "Failed to fetch video object");
                metrics::counter!("calendar.capture_date.fetch_failures").increment(1);
                return None;
            }
        };

        let spool = tempfile::NamedTempFile::new().ok()?;
        tokio::fs::write(spool.path(), &bytes).await.ok()?;

        let output = match tokio::process::Command::new(&self.config.ffprobe_path)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream_tags=creation_time:format_tags=creation_time",
            ])
            .arg(spool.path())
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                debug!(key = %key, error = %e, "Failed to run ffprobe");
                metrics::counter!("calendar.capture_date.probe_failures").increment(1);
                return None;
            }
        };

        if !output.status.success() {
            debug!(key = %key, status = %output.status, "ffprobe reported failure");
            return None;
        }

        parse_ffprobe_creation_date(&output.stdout)
    }
}

/// Parse EXIF bytes and return the first valid date tag, in priority order:
/// original capture, then digitization, then modification.
fn parse_exif_date(bytes: &[u8]) -> Option<NaiveDate> {
    let mut cursor = Cursor::new(bytes);
    let exif = exif::Reader::new().read_from_container(&mut cursor).ok()?;

    for tag in [
        exif::Tag::DateTimeOriginal,
        exif::Tag::DateTimeDigitized,
        exif::Tag::DateTime,
    ] {
        if let Some(field) = exif.get_field(tag, exif::In::PRIMARY) {
            let raw = field.display_value().to_string();
            if let Some(date) = parse_metadata_date(&raw) {
                return Some(date);
            }
        }
    }
    None
}

#[derive(Debug, Default, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    #[serde(default)]
    tags: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    #[serde(default)]
    tags: HashMap<String, String>,
}

/// Pull `creation_time` out of ffprobe's JSON, stream tags first, container
/// tags second.
fn parse_ffprobe_creation_date(stdout: &[u8]) -> Option<NaiveDate> {
    let probe: ProbeOutput = serde_json::from_slice(stdout).ok()?;

    let creation_time = probe
        .streams
        .first()
        .and_then(|stream| stream.tags.get("creation_time"))
        .or_else(|| {
            probe
                .format
                .as_ref()
                .and_then(|format| format.tags.get("creation_time"))
        })?;

    parse_metadata_date(creation_time)
}

/// Calendar date from the leading characters of a metadata timestamp.
/// Accepts the EXIF form (`2024:01:15 10:30:45`), ISO dates, and RFC 3339
/// timestamps.
fn parse_metadata_date(raw: &str) -> Option<NaiveDate> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw.trim()) {
        return Some(ts.date_naive());
    }
    let head: String = raw.trim().chars().take(10).map(|c| match c {
        ':' => '-',
        other => other,
    }).collect();
    NaiveDate::parse_from_str(&head, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_metadata_date_variants() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        assert_eq!(parse_metadata_date("2024:01:15 10:30:45"), Some(expected));
        assert_eq!(parse_metadata_date("2024-01-15 10:30:45"), Some(expected));
        assert_eq!(
            parse_metadata_date("2024-01-15T10:30:45.000000Z"),
            Some(expected)
        );
        assert_eq!(parse_metadata_date("2024-01-15"), Some(expected));
        assert_eq!(parse_metadata_date("not a date"), None);
        assert_eq!(parse_metadata_date(""), None);
    }

    #[test]
    fn test_parse_exif_date_rejects_garbage() {
        assert_eq!(parse_exif_date(b"definitely not a jpeg"), None);
        assert_eq!(parse_exif_date(&[]), None);
    }

    #[test]
    fn test_ffprobe_stream_tag_preferred_over_format_tag() {
        let json = br#"{
            "streams": [{"tags": {"creation_time": "2023-07-04T12:34:56.000000Z"}}],
            "format": {"tags": {"creation_time": "2020-01-01T00:00:00.000000Z"}}
        }"#;
        assert_eq!(
            parse_ffprobe_creation_date(json),
            NaiveDate::from_ymd_opt(2023, 7, 4)
        );
    }

    #[test]
    fn test_ffprobe_format_tag_fallback() {
        let json = br#"{
            "streams": [{"tags": {}}],
            "format": {"tags": {"creation_time": "2020-01-01T00:00:00.000000Z"}}
        }"#;
        assert_eq!(
            parse_ffprobe_creation_date(json),
            NaiveDate::from_ymd_opt(2020, 1, 1)
        );
    }

    #[test]
    fn test_ffprobe_no_tags_is_undated() {
        assert_eq!(parse_ffprobe_creation_date(br#"{"streams": []}"#), None);
        assert_eq!(parse_ffprobe_creation_date(b"not json"), None);
    }

    #[test]
    fn test_cache_hits_same_version_only() {
        let cache = CaptureDateCache::new();
        let date = NaiveDate::from_ymd_opt(2024, 2, 14);

        assert_eq!(cache.get("a.jpg", "v1"), None);
        cache.insert("a.jpg", "v1", date);
        assert_eq!(cache.get("a.jpg", "v1"), Some(date));
        // A re-uploaded object carries a new version marker and must miss.
        assert_eq!(cache.get("a.jpg", "v2"), None);
    }

    #[test]
    fn test_cache_remembers_undated_objects() {
        let cache = CaptureDateCache::new();
        cache.insert("b.jpg", "v1", None);
        assert_eq!(cache.get("b.jpg", "v1"), Some(None));
    }

    #[test]
    fn test_cache_invalidation() {
        let cache = CaptureDateCache::new();
        cache.insert("c.jpg", "v1", NaiveDate::from_ymd_opt(2024, 3, 1));
        cache.invalidate("c.jpg");
        assert_eq!(cache.get("c.jpg", "v1"), None);
        assert!(cache.is_empty());
    }
}
