use crate::auth::session;
use crate::auth::token::{constant_time_eq, Role};
use crate::auth::{RequireAdmin, RequireViewer};
use crate::bucket::{BulkDeleteFailure, MediaBucket, ObjectInfo};
use crate::capture_date::{CaptureDateCache, CaptureDateExtractor};
use crate::config::{Config, HttpConfig};
use crate::entries::{CalendarEntry, EntryKind, EntryStore};
use crate::error::ApiError;
use crate::index::{self, IndexBuilder, IndexStore};
use crate::media::{self, MediaKind};
use anyhow::{Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use axum_extra::extract::cookie::CookieJar;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};

/// Storage-side limit on keys per bulk delete call.
const MAX_BULK_DELETE_KEYS: usize = 1000;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub entries: Arc<EntryStore>,
    pub bucket: Arc<MediaBucket>,
    pub cache: Arc<CaptureDateCache>,
    pub extractor: Arc<CaptureDateExtractor>,
    pub index_store: Arc<IndexStore>,
}

impl AppState {
    fn index_builder(&self) -> IndexBuilder {
        IndexBuilder::new(
            self.bucket.clone(),
            self.extractor.clone(),
            &self.config.s3.processed_prefix,
            self.config.media.extraction_batch_size,
        )
    }
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.http);

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/v1/auth/login", post(login))
        .route("/api/v1/auth/logout", post(logout))
        .route("/api/v1/auth/session", get(session_info))
        .route("/api/v1/entries", get(list_entries).put(upsert_entry))
        .route("/api/v1/entries/:date", delete(delete_entry))
        .route("/api/v1/media", get(browse_media))
        .route("/api/v1/media/by-date/:date", get(media_by_date))
        .route("/api/v1/media/delete", post(bulk_delete_media))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(config: &HttpConfig) -> CorsLayer {
    if !config.cors_enabled {
        return CorsLayer::new();
    }
    if config.cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = config
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "calendar-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match sqlx::query("SELECT 1").fetch_one(state.entries.pool()).await {
        Ok(_) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    /// Shared viewer password
    #[serde(default)]
    password: Option<String>,
    /// Admin PIN
    #[serde(default)]
    pin: Option<String>,
}

#[derive(Debug, Serialize)]
struct SessionResponse {
    role: Role,
}

/// Exchange the viewer password or admin PIN for a session cookie.
async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(request): Json<LoginRequest>,
) -> Result<(CookieJar, Json<SessionResponse>), ApiError> {
    let auth = &state.config.auth;

    if let Some(pin) = &request.pin {
        if constant_time_eq(pin.as_bytes(), auth.admin_pin.as_bytes()) {
            metrics::counter!("calendar.auth.admin_logins").increment(1);
            let jar = jar.add(session::issue_cookie(auth, Role::Admin));
            return Ok((jar, Json(SessionResponse { role: Role::Admin })));
        }
        metrics::counter!("calendar.auth.login_failures").increment(1);
        return Err(ApiError::Unauthorized);
    }

    if let Some(password) = &request.password {
        if constant_time_eq(password.as_bytes(), auth.viewer_password.as_bytes()) {
            metrics::counter!("calendar.auth.viewer_logins").increment(1);
            let jar = jar.add(session::issue_cookie(auth, Role::Viewer));
            return Ok((jar, Json(SessionResponse { role: Role::Viewer })));
        }
        metrics::counter!("calendar.auth.login_failures").increment(1);
        return Err(ApiError::Unauthorized);
    }

    Err(ApiError::MissingField("password"))
}

/// Clear both session cookies.
async fn logout(jar: CookieJar) -> (CookieJar, StatusCode) {
    let jar = jar
        .add(session::expire_cookie(session::VIEWER_COOKIE))
        .add(session::expire_cookie(session::ADMIN_COOKIE));
    (jar, StatusCode::NO_CONTENT)
}

/// Current session role.
async fn session_info(RequireViewer(role): RequireViewer) -> Json<SessionResponse> {
    Json(SessionResponse { role })
}

/// Calendar entry in API responses.
#[derive(Debug, Serialize)]
struct EntryResponse {
    date: String,
    kind: EntryKind,
    caption: String,
    media: Vec<String>,
}

impl From<CalendarEntry> for EntryResponse {
    fn from(entry: CalendarEntry) -> Self {
        Self {
            date: entry.date.format("%Y-%m-%d").to_string(),
            kind: entry.kind,
            caption: entry.caption,
            media: entry.media,
        }
    }
}

/// List every entry, ascending by date.
#[instrument(skip(state))]
async fn list_entries(
    _viewer: RequireViewer,
    State(state): State<AppState>,
) -> Result<Json<Vec<EntryResponse>>, ApiError> {
    let entries = state.entries.list().await?;
    Ok(Json(entries.into_iter().map(Into::into).collect()))
}

#[derive(Debug, Deserialize)]
struct UpsertEntryRequest {
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    media: Option<Vec<String>>,
}

/// Create or replace the entry for a date.
#[instrument(skip(state, request))]
async fn upsert_entry(
    _admin: RequireAdmin,
    State(state): State<AppState>,
    Json(request): Json<UpsertEntryRequest>,
) -> Result<Json<EntryResponse>, ApiError> {
    let date_raw = request
        .date
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or(ApiError::MissingField("date"))?;
    let kind_raw = request
        .kind
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or(ApiError::MissingField("kind"))?;

    let date = parse_entry_date(date_raw)?;
    let kind = EntryKind::parse(kind_raw)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown kind: {kind_raw}")))?;

    let entry = CalendarEntry {
        date,
        kind,
        caption: request.caption.unwrap_or_default(),
        media: request.media.unwrap_or_default(),
    };
    state.entries.upsert(&entry).await?;

    Ok(Json(entry.into()))
}

/// Delete the entry for a date.
#[instrument(skip(state))]
async fn delete_entry(
    _admin: RequireAdmin,
    State(state): State<AppState>,
    Path(date_raw): Path<String>,
) -> Result<StatusCode, ApiError> {
    let date = parse_entry_date(&date_raw)?;
    state.entries.delete(date).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn parse_entry_date(raw: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest(format!("invalid date: {raw}")))
}

#[derive(Debug, Serialize)]
struct DateMediaResponse {
    date: String,
    urls: Vec<String>,
}

/// Media URLs captured on a date, from the persisted index. An unreadable
/// index falls back to a live extraction scan; a date simply absent from a
/// healthy index is a normal empty day.
#[instrument(skip(state))]
async fn media_by_date(
    _viewer: RequireViewer,
    State(state): State<AppState>,
    Path(date_raw): Path<String>,
) -> Result<Json<DateMediaResponse>, ApiError> {
    let date = parse_entry_date(&date_raw)?;
    let date_key = date.format("%Y-%m-%d").to_string();

    let urls = match state.index_store.load().await {
        Ok(index) => index.get(&date_key).cloned().unwrap_or_default(),
        Err(e) => {
            warn!(error = %e, "Date-media index unavailable, scanning live");
            let (computed, _) = state.index_builder().build(true).await?;
            computed.get(&date_key).cloned().unwrap_or_default()
        }
    };

    Ok(Json(DateMediaResponse {
        date: date_key,
        urls,
    }))
}

#[derive(Debug, Deserialize)]
struct BrowseQuery {
    source: Option<String>,
}

/// One bucket object in the admin browser listing.
#[derive(Debug, Serialize)]
struct MediaObjectResponse {
    key: String,
    url: String,
    /// Resolved capture date, if any
    date: Option<String>,
    kind: MediaKind,
    web_displayable: bool,
}

/// Admin media browser across the bucket's namespaces.
#[instrument(skip(state))]
async fn browse_media(
    _admin: RequireAdmin,
    State(state): State<AppState>,
    Query(query): Query<BrowseQuery>,
) -> Result<Json<Vec<MediaObjectResponse>>, ApiError> {
    let source = query.source.unwrap_or_else(|| "processed".to_string());

    let mut items = match source.as_str() {
        // Fast path straight off the persisted index; a live scan only when
        // the index is unavailable.
        "processed" => match state.index_store.load().await {
            Ok(index) => browse_from_index(&state, &index),
            Err(e) => {
                warn!(error = %e, "Date-media index unavailable, scanning live");
                browse_live(&state, &state.config.s3.processed_prefix).await?
            }
        },
        "originals" => browse_live(&state, &state.config.s3.originals_prefix).await?,
        "all" => browse_live(&state, "").await?,
        other => return Err(ApiError::BadRequest(format!("unknown source: {other}"))),
    };

    sort_media_listing(&mut items);
    Ok(Json(items))
}

/// Listing derived from the persisted index: dated, displayable objects only.
fn browse_from_index(state: &AppState, index: &index::DateMediaIndex) -> Vec<MediaObjectResponse> {
    let mut items = Vec::new();
    for (date, urls) in index {
        for url in urls {
            let Some(key) = state.bucket.key_for_url(url) else {
                continue;
            };
            items.push(MediaObjectResponse {
                url: url.clone(),
                date: Some(date.clone()),
                kind: media::kind(&key),
                web_displayable: media::is_web_displayable(&key),
                key,
            });
        }
    }
    items
}

/// Listing from a live storage scan, dating every recognized media object.
async fn browse_live(state: &AppState, prefix: &str) -> Result<Vec<MediaObjectResponse>, ApiError> {
    let objects = state.bucket.list_objects(prefix).await?;
    let candidates: Vec<ObjectInfo> = objects
        .into_iter()
        .filter(|object| {
            object.key != state.index_store.key() && media::is_recognized_media(&object.key)
        })
        .collect();

    let dates = index::scan_capture_dates(
        &state.extractor,
        &candidates,
        state.config.media.extraction_batch_size,
    )
    .await;

    Ok(candidates
        .into_iter()
        .zip(dates)
        .map(|(object, date)| MediaObjectResponse {
            url: state.bucket.public_url(&object.key),
            date: date.map(|d| d.format("%Y-%m-%d").to_string()),
            kind: media::kind(&object.key),
            web_displayable: media::is_web_displayable(&object.key),
            key: object.key,
        })
        .collect())
}

/// Dated items first (by date, then key), undated items after (by key).
fn sort_media_listing(items: &mut [MediaObjectResponse]) {
    items.sort_by(|a, b| match (&a.date, &b.date) {
        (Some(x), Some(y)) => x.cmp(y).then_with(|| a.key.cmp(&b.key)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.key.cmp(&b.key),
    });
}

#[derive(Debug, Deserialize)]
struct BulkDeleteRequest {
    #[serde(default)]
    keys: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct BulkDeleteResponse {
    deleted: Vec<String>,
    errors: Vec<BulkDeleteFailure>,
}

/// Delete up to 1000 bucket objects, reporting per-key outcomes.
#[instrument(skip(state, request))]
async fn bulk_delete_media(
    _admin: RequireAdmin,
    State(state): State<AppState>,
    Json(request): Json<BulkDeleteRequest>,
) -> Result<Json<BulkDeleteResponse>, ApiError> {
    let keys = request
        .keys
        .filter(|keys| !keys.is_empty())
        .ok_or(ApiError::MissingField("keys"))?;
    if keys.len() > MAX_BULK_DELETE_KEYS {
        return Err(ApiError::BadRequest(format!(
            "at most {MAX_BULK_DELETE_KEYS} keys per request"
        )));
    }

    let outcome = state.bucket.delete_objects(&keys).await?;
    for key in &outcome.deleted {
        state.cache.invalidate(key);
    }

    Ok(Json(BulkDeleteResponse {
        deleted: outcome.deleted,
        errors: outcome.failed,
    }))
}

/// Start the calendar API server
pub async fn start_api_server(state: AppState) -> Result<()> {
    let config = state.config.http.clone();
    let router = create_router(state);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting calendar API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}
