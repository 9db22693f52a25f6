//! Persistence backends for the segment cache.
//!
//! The cache is always loaded and saved as a whole. Two backends are
//! provided: an in-memory store used by tests, and a single JSON file kept
//! in the configuration directory.
//!
//! File format (one object per cache key):
//!
//! ```json
//! {
//!   "Rick Astley Never Gonna Give You Up": {
//!     "segments": [{"category": "sponsor", "segment": [3.0, 10.0]}],
//!     "video_id": "dQw4w9WgXcQ",
//!     "timestamp": "2024-05-01T12:34:56.123456+02:00"
//!   }
//! }
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

use crate::cache::CacheEntry;
use crate::errors::{Result, SponsorError};
use crate::model::{Segment, SegmentRecord, skippable_segments};

/// Bulk load / save of all cache entries against one storage resource.
pub trait CacheStore {
    /// Loads every entry. A missing resource is an empty cache, a
    /// present-but-unreadable one is an error.
    fn load_all(&self) -> Result<HashMap<String, CacheEntry>>;

    /// Replaces the stored content with `entries`.
    fn persist_all(&self, entries: &HashMap<String, CacheEntry>) -> Result<()>;

    /// Moves an unreadable resource out of the way so the next persist does
    /// not silently overwrite it.
    fn discard_corrupt(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Shared in-memory store. Clones see the same entries.
#[derive(Clone, Debug, Default)]
pub struct MemoryCacheStore {
    entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
    persist_count: Arc<AtomicUsize>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: HashMap<String, CacheEntry>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(entries)),
            persist_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Snapshot of the stored entries.
    pub fn entries(&self) -> HashMap<String, CacheEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Number of `persist_all` calls since creation.
    pub fn persist_count(&self) -> usize {
        self.persist_count.load(Ordering::SeqCst)
    }
}

impl CacheStore for MemoryCacheStore {
    fn load_all(&self) -> Result<HashMap<String, CacheEntry>> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| SponsorError::cache(format!("memory store lock poisoned: {}", e)))?;
        Ok(entries.clone())
    }

    fn persist_all(&self, entries: &HashMap<String, CacheEntry>) -> Result<()> {
        let mut stored = self
            .entries
            .lock()
            .map_err(|e| SponsorError::cache(format!("memory store lock poisoned: {}", e)))?;
        *stored = entries.clone();
        self.persist_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// JSON file store
// ============================================================================

/// On-disk representation of one entry.
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    #[serde(default)]
    segments: Vec<SegmentRecord>,
    #[serde(default, deserialize_with = "null_as_empty")]
    video_id: String,
    timestamp: String,
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Parses an ISO-8601 timestamp.
///
/// Timestamps carrying an offset are taken as is; naive ones (older files)
/// are interpreted in local time.
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    let naive: NaiveDateTime = raw.parse().ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|ts| ts.with_timezone(&Utc))
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.with_timezone(&Local)
        .to_rfc3339_opts(SecondsFormat::Micros, false)
}

impl StoredEntry {
    fn from_entry(entry: &CacheEntry) -> Self {
        Self {
            segments: entry.segments.iter().map(Segment::to_record).collect(),
            video_id: entry.content_id.clone(),
            timestamp: format_timestamp(&entry.fetched_at),
        }
    }

    fn into_entry(self, key: &str) -> CacheEntry {
        let fetched_at = parse_timestamp(&self.timestamp).unwrap_or_else(|| {
            warn!(key, timestamp = %self.timestamp, "Unreadable cache timestamp, entry treated as expired");
            DateTime::<Utc>::MIN_UTC
        });

        CacheEntry {
            content_id: self.video_id,
            // les anciens fichiers contiennent la liste brute, non filtrée
            segments: skippable_segments(&self.segments),
            fetched_at,
        }
    }
}

/// Cache persisted as a single JSON file.
#[derive(Clone, Debug)]
pub struct JsonFileCacheStore {
    path: PathBuf,
}

impl JsonFileCacheStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    fn corrupt_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".corrupt");
        PathBuf::from(name)
    }
}

impl CacheStore for JsonFileCacheStore {
    fn load_all(&self) -> Result<HashMap<String, CacheEntry>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No cache file found, starting with an empty cache");
            return Ok(HashMap::new());
        }

        // lu en octets : un contenu non UTF-8 est une erreur de décodage, pas d'I/O
        let json = fs::read(&self.path)?;
        if json.iter().all(u8::is_ascii_whitespace) {
            debug!(path = %self.path.display(), "Cache file is empty");
            return Ok(HashMap::new());
        }

        let stored: HashMap<String, StoredEntry> = serde_json::from_slice(&json)?;
        let entries = stored
            .into_iter()
            .map(|(key, entry)| {
                let entry = entry.into_entry(&key);
                (key, entry)
            })
            .collect::<HashMap<_, _>>();

        debug!(path = %self.path.display(), entries = entries.len(), "Cache loaded");
        Ok(entries)
    }

    fn persist_all(&self, entries: &HashMap<String, CacheEntry>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let stored: HashMap<&str, StoredEntry> = entries
            .iter()
            .map(|(key, entry)| (key.as_str(), StoredEntry::from_entry(entry)))
            .collect();
        let json = serde_json::to_string_pretty(&stored)?;

        // write + rename: a crash leaves either the old or the new file
        let tmp = self.temp_path();
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;

        debug!(path = %self.path.display(), entries = entries.len(), "Cache saved");
        Ok(())
    }

    fn discard_corrupt(&self) -> Result<()> {
        if self.path.exists() {
            let target = self.corrupt_path();
            fs::rename(&self.path, &target)?;
            warn!(path = %target.display(), "Corrupt cache file moved aside");
        }
        Ok(())
    }
}
