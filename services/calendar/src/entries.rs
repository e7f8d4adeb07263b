use crate::config::DatabaseConfig;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Kind of a calendar entry. Derivable from the media count but stored
/// alongside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Text,
    Photo,
    Gallery,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Text => "text",
            EntryKind::Photo => "photo",
            EntryKind::Gallery => "gallery",
        }
    }

    pub fn parse(s: &str) -> Option<EntryKind> {
        match s {
            "text" => Some(EntryKind::Text),
            "photo" => Some(EntryKind::Photo),
            "gallery" => Some(EntryKind::Gallery),
            _ => None,
        }
    }

    /// The kind a media list of `count` URLs implies.
    pub fn from_media_count(count: usize) -> EntryKind {
        match count {
            0 => EntryKind::Text,
            1 => EntryKind::Photo,
            _ => EntryKind::Gallery,
        }
    }
}

/// One calendar entry, keyed uniquely by its date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEntry {
    pub date: NaiveDate,
    pub kind: EntryKind,
    pub caption: String,
    pub media: Vec<String>,
}

/// Storage-native row shape; mapped to [`CalendarEntry`] on read.
#[derive(Debug, FromRow)]
struct EntryRow {
    date: NaiveDate,
    kind: String,
    caption: String,
    media: Option<serde_json::Value>,
}

impl EntryRow {
    fn into_entry(self) -> CalendarEntry {
        let media: Vec<String> = self
            .media
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default();
        // Unknown kinds can only come from out-of-band writes; fall back to
        // what the media implies.
        let kind = EntryKind::parse(&self.kind)
            .unwrap_or_else(|| EntryKind::from_media_count(media.len()));
        CalendarEntry {
            date: self.date,
            kind,
            caption: self.caption,
            media,
        }
    }
}

/// Calendar entry store backed by PostgreSQL.
pub struct EntryStore {
    pool: PgPool,
}

impl EntryStore {
    /// Create a new entry store with connection pool.
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Assemble a store around an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Every entry, ascending by date.
    #[instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<CalendarEntry>> {
        let rows = sqlx::query_as::<_, EntryRow>(
            r#"
            SELECT date, kind, caption, media
            FROM entries
            ORDER BY date ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list entries")?;

        Ok(rows.into_iter().map(EntryRow::into_entry).collect())
    }

    /// Insert or overwrite the entry for its date. An empty media list is
    /// stored as NULL rather than an empty array.
    #[instrument(skip(self, entry), fields(date = %entry.date, kind = %entry.kind.as_str()))]
    pub async fn upsert(&self, entry: &CalendarEntry) -> Result<()> {
        let media: Option<serde_json::Value> = if entry.media.is_empty() {
            None
        } else {
            Some(serde_json::to_value(&entry.media).context("Failed to encode media list")?)
        };

        sqlx::query(
            r#"
            INSERT INTO entries (date, kind, caption, media, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (date) DO UPDATE
            SET kind = EXCLUDED.kind,
                caption = EXCLUDED.caption,
                media = EXCLUDED.media,
                updated_at = NOW()
            "#,
        )
        .bind(entry.date)
        .bind(entry.kind.as_str())
        .bind(&entry.caption)
        .bind(media)
        .execute(&self.pool)
        .await
        .context("Failed to upsert entry")?;

        metrics::counter!("calendar.entries.upserted").increment(1);
        debug!(date = %entry.date, "Entry upserted");
        Ok(())
    }

    /// Delete the entry for a date. Returns whether a row was removed.
    #[instrument(skip(self))]
    pub async fn delete(&self, date: NaiveDate) -> Result<bool> {
        let result = sqlx::query("DELETE FROM entries WHERE date = $1")
            .bind(date)
            .execute(&self.pool)
            .await
            .context("Failed to delete entry")?;

        let removed = result.rows_affected() > 0;
        if removed {
            metrics::counter!("calendar.entries.deleted").increment(1);
        }
        debug!(date = %date, removed, "Entry delete finished");
        Ok(removed)
    }

    /// Get the connection pool (for health checks)
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_media_count() {
        assert_eq!(EntryKind::from_media_count(0), EntryKind::Text);
        assert_eq!(EntryKind::from_media_count(1), EntryKind::Photo);
        assert_eq!(EntryKind::from_media_count(2), EntryKind::Gallery);
        assert_eq!(EntryKind::from_media_count(12), EntryKind::Gallery);
    }

    #[test]
    fn test_kind_parse_round_trip() {
        for kind in [EntryKind::Text, EntryKind::Photo, EntryKind::Gallery] {
            assert_eq!(EntryKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EntryKind::parse("novel"), None);
    }

    #[test]
    fn test_row_mapping_null_media_is_empty_list() {
        let row = EntryRow {
            date: NaiveDate::from_ymd_opt(2026, 2, 14).unwrap(),
            kind: "text".to_string(),
            caption: "Happy Valentine's".to_string(),
            media: None,
        };
        let entry = row.into_entry();
        assert_eq!(entry.kind, EntryKind::Text);
        assert!(entry.media.is_empty());
    }

    #[test]
    fn test_row_mapping_unknown_kind_falls_back_to_derived() {
        let row = EntryRow {
            date: NaiveDate::from_ymd_opt(2026, 2, 14).unwrap(),
            kind: "mystery".to_string(),
            caption: String::new(),
            media: Some(serde_json::json!(["https://m/a.jpg", "https://m/b.jpg"])),
        };
        assert_eq!(row.into_entry().kind, EntryKind::Gallery);
    }
}
