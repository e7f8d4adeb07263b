//! Memory Calendar Service
//!
//! Backend for a personal, date-gated memory calendar: an admin curates
//! daily note/photo/gallery entries out of a media bucket, and viewers read
//! them through a cookie-authenticated JSON API. Media capture dates are
//! extracted from embedded metadata and persisted as a date→URL index for
//! fast lookup.
//!
//! ## Architecture
//!
//! ```text
//! S3 Bucket                                     PostgreSQL
//! ┌───────────────────────┐                     ┌──────────────┐
//! │ originals/            │                     │ entries      │
//! │ processed/            │                     └──────────────┘
//! │   date-media-index.json│                           ▲
//! └───────────────────────┘                           │
//!        │         ▲                                   │
//!        ▼         │                                   │
//! ┌──────────────┐ │ build/prune           ┌──────────────────┐
//! │ Capture-Date │ └───────────────────────│ HTTP API         │
//! │ Extractor    │────────────────────────▶│ (auth, entries,  │
//! │ (EXIF/ffprobe)│      date lookups      │  media browser)  │
//! └──────────────┘                         └──────────────────┘
//! ```

pub mod api;
pub mod auth;
pub mod bucket;
pub mod capture_date;
pub mod config;
pub mod entries;
pub mod error;
pub mod index;
pub mod media;

pub use api::{create_router, AppState};
pub use auth::Role;
pub use bucket::{MediaBucket, ObjectInfo};
pub use capture_date::{CaptureDateCache, CaptureDateExtractor};
pub use config::Config;
pub use entries::{CalendarEntry, EntryKind, EntryStore};
pub use index::{DateMediaIndex, IndexBuilder, IndexStore};
