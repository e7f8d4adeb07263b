//! The date→media index: a JSON object in the bucket mapping calendar days
//! to the public URLs of media captured that day.
//!
//! The builder does a full rebuild: everything under the processed prefix is
//! re-dated and the index object is overwritten. Pruning is the cheap
//! counterpart for deletions only — it can remove URLs and emptied dates but
//! never adds anything.

use crate::bucket::{MediaBucket, ObjectInfo};
use crate::capture_date::CaptureDateExtractor;
use crate::media;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// File name of the persisted index, under the processed prefix.
pub const INDEX_FILE_NAME: &str = "date-media-index.json";

/// Date string (`YYYY-MM-DD`) → public media URLs captured that day.
pub type DateMediaIndex = BTreeMap<String, Vec<String>>;

/// Storage key of the index object.
pub fn index_key(processed_prefix: &str) -> String {
    format!("{}/{}", processed_prefix.trim_end_matches('/'), INDEX_FILE_NAME)
}

/// Whether a listed object belongs in the index: not the index object
/// itself, and a web-displayable media format.
fn is_index_candidate(key: &str, index_key: &str) -> bool {
    key != index_key && media::is_web_displayable(key)
}

/// Reads and writes the persisted index object.
///
/// Loading is strict: a missing or unparseable index is an error, never an
/// empty map. Callers that want a soft fallback handle the error themselves.
pub struct IndexStore {
    bucket: Arc<MediaBucket>,
    key: String,
}

impl IndexStore {
    pub fn new(bucket: Arc<MediaBucket>, processed_prefix: &str) -> Self {
        Self {
            key: index_key(processed_prefix),
            bucket,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn load(&self) -> Result<DateMediaIndex> {
        let bytes = self
            .bucket
            .get_object(&self.key)
            .await
            .context("Failed to fetch date-media index")?;
        serde_json::from_slice(&bytes).context("Date-media index is not valid JSON")
    }

    pub async fn save(&self, index: &DateMediaIndex) -> Result<()> {
        let body =
            serde_json::to_vec_pretty(index).context("Failed to serialize date-media index")?;
        self.bucket.put_json(&self.key, body).await
    }
}

/// Summary of a full index build.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BuildSummary {
    /// Objects listed under the processed prefix
    pub scanned: usize,
    /// Candidates whose capture date resolved
    pub indexed: usize,
    /// Candidates skipped for lack of a resolvable date
    pub undated: usize,
    /// Distinct dates in the resulting index
    pub dates: usize,
    pub dry_run: bool,
}

/// Summary of a prune pass.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PruneSummary {
    pub removed_urls: usize,
    pub removed_dates: usize,
    /// Whether the pruned index was written back
    pub uploaded: bool,
    pub dry_run: bool,
}

/// Builds and prunes the persisted date→media index.
pub struct IndexBuilder {
    bucket: Arc<MediaBucket>,
    extractor: Arc<CaptureDateExtractor>,
    store: IndexStore,
    processed_prefix: String,
    batch_size: usize,
}

impl IndexBuilder {
    pub fn new(
        bucket: Arc<MediaBucket>,
        extractor: Arc<CaptureDateExtractor>,
        processed_prefix: &str,
        batch_size: usize,
    ) -> Self {
        Self {
            store: IndexStore::new(bucket.clone(), processed_prefix),
            bucket,
            extractor,
            processed_prefix: processed_prefix.to_string(),
            batch_size: batch_size.max(1),
        }
    }

    /// Full rebuild: enumerate, date, assemble, overwrite. `dry_run`
    /// computes the index without persisting it.
    #[instrument(skip(self))]
    pub async fn build(&self, dry_run: bool) -> Result<(DateMediaIndex, BuildSummary)> {
        let objects = self.bucket.list_objects(&self.processed_prefix).await?;
        let scanned = objects.len();

        let candidates: Vec<ObjectInfo> = objects
            .into_iter()
            .filter(|object| is_index_candidate(&object.key, self.store.key()))
            .collect();

        let dates = scan_capture_dates(&self.extractor, &candidates, self.batch_size).await;
        let dated: Vec<(String, Option<NaiveDate>)> = candidates
            .iter()
            .zip(dates)
            .map(|(object, date)| (self.bucket.public_url(&object.key), date))
            .collect();

        let undated = dated.iter().filter(|(_, date)| date.is_none()).count();
        let index = assemble_index(dated);
        let summary = BuildSummary {
            scanned,
            indexed: index.values().map(Vec::len).sum(),
            undated,
            dates: index.len(),
            dry_run,
        };

        if dry_run {
            info!(?summary, "Index build dry run complete");
        } else {
            self.store.save(&index).await?;
            metrics::counter!("calendar.index.builds").increment(1);
            info!(?summary, key = %self.store.key(), "Index rebuilt");
        }

        Ok((index, summary))
    }

    /// Remove index entries whose backing objects are gone. Re-uploads only
    /// when something was removed; never adds dates or URLs.
    #[instrument(skip(self))]
    pub async fn prune(&self, dry_run: bool) -> Result<(DateMediaIndex, PruneSummary)> {
        let index = self.store.load().await?;

        // Re-derive each URL's key and check it against storage. URLs that
        // don't map into this bucket are left untouched.
        let keys: Vec<String> = index
            .values()
            .flatten()
            .filter_map(|url| self.bucket.key_for_url(url))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let mut present: HashSet<String> = HashSet::new();
        for batch in keys.chunks(self.batch_size) {
            let checks =
                futures::future::join_all(batch.iter().map(|key| self.bucket.object_exists(key)))
                    .await;
            for (key, exists) in batch.iter().zip(checks) {
                if exists.context("Failed existence check during prune")? {
                    present.insert(key.clone());
                }
            }
        }

        let (pruned, removed_urls, removed_dates) = prune_missing(&index, |url| {
            match self.bucket.key_for_url(url) {
                Some(key) => present.contains(&key),
                None => {
                    warn!(url = %url, "Index URL outside the media bucket, keeping");
                    true
                }
            }
        });

        let removed_anything = removed_urls > 0 || removed_dates > 0;
        let uploaded = removed_anything && !dry_run;
        if uploaded {
            self.store.save(&pruned).await?;
            metrics::counter!("calendar.index.prunes").increment(1);
        }

        let summary = PruneSummary {
            removed_urls,
            removed_dates,
            uploaded,
            dry_run,
        };
        info!(?summary, "Index prune complete");
        Ok((pruned, summary))
    }
}

/// Resolve capture dates for `objects` in fixed-size batches: extractions
/// within a batch run concurrently, batches run strictly one after another,
/// bounding in-flight storage and probe calls.
pub async fn scan_capture_dates(
    extractor: &CaptureDateExtractor,
    objects: &[ObjectInfo],
    batch_size: usize,
) -> Vec<Option<NaiveDate>> {
    let mut dates = Vec::with_capacity(objects.len());
    for batch in objects.chunks(batch_size.max(1)) {
        let resolved =
            futures::future::join_all(batch.iter().map(|object| extractor.capture_date(object)))
                .await;
        debug!(batch = batch.len(), "Capture-date batch resolved");
        dates.extend(resolved);
    }
    dates
}

/// Assemble the index from (URL, capture date) pairs, skipping undated
/// entries entirely.
pub fn assemble_index<I>(entries: I) -> DateMediaIndex
where
    I: IntoIterator<Item = (String, Option<NaiveDate>)>,
{
    let mut index = DateMediaIndex::new();
    for (url, date) in entries {
        let Some(date) = date else { continue };
        index
            .entry(date.format("%Y-%m-%d").to_string())
            .or_default()
            .push(url);
    }
    index
}

/// Drop URLs the predicate rejects and dates left empty. Returns the pruned
/// index plus removal counts.
pub fn prune_missing<F>(index: &DateMediaIndex, is_present: F) -> (DateMediaIndex, usize, usize)
where
    F: Fn(&str) -> bool,
{
    let mut pruned = DateMediaIndex::new();
    let mut removed_urls = 0;
    let mut removed_dates = 0;

    for (date, urls) in index {
        let kept: Vec<String> = urls.iter().filter(|url| is_present(url)).cloned().collect();
        removed_urls += urls.len() - kept.len();
        if kept.is_empty() {
            removed_dates += 1;
        } else {
            pruned.insert(date.clone(), kept);
        }
    }

    (pruned, removed_urls, removed_dates)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, d)
    }

    #[test]
    fn test_index_key_location() {
        assert_eq!(index_key("processed"), "processed/date-media-index.json");
        assert_eq!(index_key("processed/"), "processed/date-media-index.json");
    }

    #[test]
    fn test_candidate_filter_excludes_non_displayable() {
        let idx = index_key("processed");
        assert!(is_index_candidate("processed/a.jpg", &idx));
        assert!(is_index_candidate("processed/clip.mp4", &idx));
        // Recognized media that browsers cannot render stays out.
        assert!(!is_index_candidate("processed/raw.cr2", &idx));
        assert!(!is_index_candidate("processed/photo.heic", &idx));
        // Non-media and the index object itself stay out.
        assert!(!is_index_candidate("processed/notes.txt", &idx));
        assert!(!is_index_candidate(&idx, &idx));
    }

    #[test]
    fn test_assemble_skips_undated() {
        let index = assemble_index(vec![
            ("https://m/a.jpg".to_string(), date(2024, 2, 14)),
            ("https://m/b.jpg".to_string(), None),
            ("https://m/c.jpg".to_string(), date(2024, 2, 14)),
            ("https://m/d.jpg".to_string(), date(2023, 12, 25)),
        ]);

        assert_eq!(index.len(), 2);
        assert_eq!(
            index.get("2024-02-14").unwrap(),
            &vec!["https://m/a.jpg".to_string(), "https://m/c.jpg".to_string()]
        );
        assert_eq!(
            index.get("2023-12-25").unwrap(),
            &vec!["https://m/d.jpg".to_string()]
        );
        assert!(!index.values().flatten().any(|u| u.contains("b.jpg")));
    }

    #[test]
    fn test_prune_removes_exactly_the_missing_url() {
        let mut index = DateMediaIndex::new();
        index.insert(
            "2024-02-14".to_string(),
            vec!["https://m/a.jpg".to_string(), "https://m/b.jpg".to_string()],
        );
        index.insert("2024-03-01".to_string(), vec!["https://m/c.jpg".to_string()]);

        let (pruned, removed_urls, removed_dates) =
            prune_missing(&index, |url| url != "https://m/b.jpg");

        assert_eq!(removed_urls, 1);
        assert_eq!(removed_dates, 0);
        assert_eq!(
            pruned.get("2024-02-14").unwrap(),
            &vec!["https://m/a.jpg".to_string()]
        );
        // Untouched entries are identical to the input.
        assert_eq!(pruned.get("2024-03-01"), index.get("2024-03-01"));
    }

    #[test]
    fn test_prune_drops_emptied_dates() {
        let mut index = DateMediaIndex::new();
        index.insert("2024-02-14".to_string(), vec!["https://m/gone.jpg".to_string()]);
        index.insert("2024-03-01".to_string(), vec!["https://m/kept.jpg".to_string()]);

        let (pruned, removed_urls, removed_dates) =
            prune_missing(&index, |url| !url.contains("gone"));

        assert_eq!(removed_urls, 1);
        assert_eq!(removed_dates, 1);
        assert!(!pruned.contains_key("2024-02-14"));
        assert!(pruned.contains_key("2024-03-01"));
    }

    #[test]
    fn test_prune_with_nothing_missing_is_identity() {
        let mut index = DateMediaIndex::new();
        index.insert("2024-02-14".to_string(), vec!["https://m/a.jpg".to_string()]);

        let (pruned, removed_urls, removed_dates) = prune_missing(&index, |_| true);
        assert_eq!((removed_urls, removed_dates), (0, 0));
        assert_eq!(pruned, index);
    }
}
