use std::cell::RefCell;
use std::fs;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use pmosponsor::{
    CacheEntry, CacheKey, CacheStore, ContentResolver, JsonFileCacheStore, PlaybackDevice,
    PlaybackMonitor, PlaybackSnapshot, Result, Segment, SegmentCache, SegmentCategory,
    SponsorBlockClient, SponsorConfig, TickOutcome,
};

struct FixedDevice {
    snapshot: PlaybackSnapshot,
    seeks: RefCell<Vec<f64>>,
}

impl PlaybackDevice for FixedDevice {
    fn status(&self) -> Result<PlaybackSnapshot> {
        Ok(self.snapshot.clone())
    }

    fn seek_to(&self, position_secs: f64) -> Result<()> {
        self.seeks.borrow_mut().push(position_secs);
        Ok(())
    }
}

struct FixedResolver(&'static str);

impl ContentResolver for FixedResolver {
    fn resolve(&self, _query: &str) -> Result<String> {
        Ok(self.0.to_string())
    }
}

#[test]
fn missing_file_loads_as_empty_cache() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = JsonFileCacheStore::new(dir.path().join("sponsorblock_cache.json"));

    let cache = SegmentCache::load(store, Duration::hours(2));
    assert!(cache.is_empty());
    Ok(())
}

#[test]
fn store_writes_file_readable_on_next_start() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("nested").join("sponsorblock_cache.json");
    let key = CacheKey::from("Rick Astley Never Gonna Give You Up");
    let now = Utc::now();

    let mut cache = SegmentCache::load(JsonFileCacheStore::new(&path), Duration::hours(2));
    cache.store(
        &key,
        CacheEntry::new(
            "dQw4w9WgXcQ".to_string(),
            vec![Segment::new(SegmentCategory::Sponsor, 3.0, 10.0)],
            now,
        ),
    )?;
    assert!(path.exists());

    let reloaded = SegmentCache::load(JsonFileCacheStore::new(&path), Duration::hours(2));
    let entry = reloaded.lookup_at(&key, now).expect("entry survives restart");
    assert_eq!(entry.content_id, "dQw4w9WgXcQ");
    assert_eq!(entry.segments.len(), 1);
    assert_eq!(entry.segments[0].end, 10.0);
    assert!((entry.fetched_at - now).num_milliseconds().abs() < 1);
    Ok(())
}

#[test]
fn corrupt_file_is_moved_aside() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("sponsorblock_cache.json");
    fs::write(&path, "{ not json")?;

    let cache = SegmentCache::load(JsonFileCacheStore::new(&path), Duration::hours(2));

    assert!(cache.is_empty());
    assert!(!path.exists());
    assert!(dir.path().join("sponsorblock_cache.json.corrupt").exists());
    Ok(())
}

#[test]
fn binary_file_is_moved_aside() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("sponsorblock_cache.json");
    fs::write(&path, [0xff, 0xfe, 0x00, 0x7b])?;

    let cache = SegmentCache::load(JsonFileCacheStore::new(&path), Duration::hours(2));

    assert!(cache.is_empty());
    assert!(dir.path().join("sponsorblock_cache.json.corrupt").exists());
    Ok(())
}

#[test]
fn whitespace_file_is_empty_cache() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("sponsorblock_cache.json");
    fs::write(&path, "  \n")?;

    let entries = JsonFileCacheStore::new(&path).load_all()?;
    assert!(entries.is_empty());
    Ok(())
}

#[test]
fn legacy_file_is_read() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("sponsorblock_cache.json");
    fs::write(
        &path,
        r#"{
            "Rick Astley Never Gonna Give You Up": {
                "segments": [
                    {"category": "sponsor", "segment": [3.0, 10.0], "UUID": "abc", "votes": 4},
                    {"category": "intro", "segment": [0.0, 2.0]}
                ],
                "video_id": "dQw4w9WgXcQ",
                "timestamp": "2024-05-01T12:34:56.123456"
            },
            "Unknown Unknown": {
                "segments": [],
                "video_id": null,
                "timestamp": "2024-05-01T12:35:00.000000"
            }
        }"#,
    )?;

    let entries = JsonFileCacheStore::new(&path).load_all()?;
    assert_eq!(entries.len(), 2);

    let rick = &entries["Rick Astley Never Gonna Give You Up"];
    assert_eq!(rick.content_id, "dQw4w9WgXcQ");
    assert_eq!(
        rick.segments,
        vec![Segment::new(SegmentCategory::Sponsor, 3.0, 10.0)]
    );
    assert!(rick.fetched_at < Utc::now());

    let unknown = &entries["Unknown Unknown"];
    assert!(unknown.content_id.is_empty());
    Ok(())
}

#[test]
fn http_error_caches_empty_segments_with_now() -> anyhow::Result<()> {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/api/skipSegments")
        .match_query(mockito::Matcher::Any)
        .with_status(500)
        .create();

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("sponsorblock_cache.json");
    let device = FixedDevice {
        snapshot: PlaybackSnapshot {
            is_playing: true,
            app_name: "YouTube".to_string(),
            title: Some("Never Gonna Give You Up".to_string()),
            artist: Some("Rick Astley".to_string()),
            position_secs: 5.0,
        },
        seeks: RefCell::new(Vec::new()),
    };
    let source = SponsorBlockClient::new(
        format!("{}/api/skipSegments", server.url()),
        StdDuration::from_secs(2),
    );
    let cache = SegmentCache::load(JsonFileCacheStore::new(&path), Duration::hours(2));
    let mut monitor = PlaybackMonitor::new(
        &device,
        FixedResolver("dQw4w9WgXcQ"),
        source,
        cache,
        &SponsorConfig::default(),
    );

    let now = Utc::now();
    assert_eq!(monitor.poll_once_at(now), TickOutcome::Tracking { skipped: 0 });
    mock.assert();
    assert!(device.seeks.borrow().is_empty());

    let entries = JsonFileCacheStore::new(&path).load_all()?;
    let entry = &entries["Rick Astley Never Gonna Give You Up"];
    assert_eq!(entry.content_id, "dQw4w9WgXcQ");
    assert!(entry.segments.is_empty());
    assert!((entry.fetched_at - now).num_milliseconds().abs() < 1);
    Ok(())
}
