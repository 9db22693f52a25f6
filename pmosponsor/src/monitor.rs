//! Playback monitor: the polling loop that skips sponsor segments.
//!
//! Each tick reads the device status. When the configured application is
//! playing a titled media, the monitor resolves the segments of that media
//! (through the cache first) and seeks past every segment the playback
//! position currently falls into. A segment is skipped at most once per
//! tracked media, so the user can seek back into it.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, CacheStore, SegmentCache};
use crate::config_ext::SponsorConfig;
use crate::model::{CacheKey, PlaybackSnapshot, Segment};
use crate::playback::PlaybackDevice;
use crate::resolver::ContentResolver;
use crate::source::SegmentSource;

/// Media currently tracked by the monitor.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackedContent {
    pub key: CacheKey,
    /// Empty when the media could not be resolved.
    pub content_id: String,
    pub segments: Vec<Segment>,
    pub fetched_at: DateTime<Utc>,
}

impl TrackedContent {
    fn from_entry(key: CacheKey, entry: CacheEntry) -> Self {
        Self {
            key,
            content_id: entry.content_id,
            segments: entry.segments,
            fetched_at: entry.fetched_at,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum MonitorState {
    #[default]
    Idle,
    Tracking(TrackedContent),
}

/// What one call to [`PlaybackMonitor::poll_once`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing recognized is playing.
    Idle,
    /// A media is tracked; `skipped` seeks succeeded during this tick.
    Tracking { skipped: usize },
    /// The device status could not be read.
    StatusFailed,
}

/// Start offsets of the segments already skipped for one cache key.
///
/// Offsets are compared bit for bit: they come unchanged from the cache
/// entry, never from arithmetic.
#[derive(Clone, Debug, Default)]
pub struct AppliedSet {
    key: Option<CacheKey>,
    starts: HashSet<u64>,
}

impl AppliedSet {
    /// Binds the set to `key`, clearing it when the key changes.
    pub fn track(&mut self, key: &CacheKey) -> bool {
        if self.key.as_ref() == Some(key) {
            return false;
        }
        self.key = Some(key.clone());
        self.starts.clear();
        true
    }

    pub fn contains(&self, start: f64) -> bool {
        self.starts.contains(&start.to_bits())
    }

    pub fn insert(&mut self, start: f64) {
        self.starts.insert(start.to_bits());
    }

    pub fn len(&self) -> usize {
        self.starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }
}

pub struct PlaybackMonitor<D, R, S, C>
where
    D: PlaybackDevice,
    R: ContentResolver,
    S: SegmentSource,
    C: CacheStore,
{
    device: D,
    resolver: R,
    source: S,
    cache: SegmentCache<C>,
    app_name: String,
    poll_interval: Duration,
    idle_poll_interval: Duration,
    state: MonitorState,
    applied: AppliedSet,
}

impl<D, R, S, C> PlaybackMonitor<D, R, S, C>
where
    D: PlaybackDevice,
    R: ContentResolver,
    S: SegmentSource,
    C: CacheStore,
{
    pub fn new(device: D, resolver: R, source: S, cache: SegmentCache<C>, config: &SponsorConfig) -> Self {
        Self {
            device,
            resolver,
            source,
            cache,
            app_name: config.app_name.clone(),
            poll_interval: config.poll_interval,
            idle_poll_interval: config.idle_poll_interval,
            state: MonitorState::Idle,
            applied: AppliedSet::default(),
        }
    }

    pub fn state(&self) -> &MonitorState {
        &self.state
    }

    pub fn applied(&self) -> &AppliedSet {
        &self.applied
    }

    pub fn cache(&self) -> &SegmentCache<C> {
        &self.cache
    }

    /// Cache key of `snapshot` when it is a playing media of the monitored
    /// application.
    fn recognize(&self, snapshot: &PlaybackSnapshot) -> Option<CacheKey> {
        if !snapshot.is_playing || snapshot.app_name != self.app_name {
            return None;
        }
        snapshot.cache_key()
    }

    fn go_idle(&mut self) {
        if let MonitorState::Tracking(tracked) = &self.state {
            debug!(key = %tracked.key, "Monitor idle");
        }
        self.state = MonitorState::Idle;
    }

    /// Segments of `key`: cached entry if fresh, otherwise resolve and fetch,
    /// then store the result with `now` as its timestamp.
    fn resolve_segments(&mut self, key: &CacheKey, now: DateTime<Utc>) -> CacheEntry {
        if let Some(entry) = self.cache.lookup_at(key, now) {
            if entry.is_resolved() {
                debug!(key = %key, content_id = %entry.content_id, "Segments served from cache");
            } else {
                debug!(key = %key, "Cached as unresolved, not searching again");
            }
            return entry.clone();
        }

        let content_id = match self.resolver.resolve(key.as_str()) {
            Ok(id) => id.trim().to_string(),
            Err(e) => {
                warn!(key = %key, "Content resolution failed: {}", e);
                String::new()
            }
        };

        let segments = if content_id.is_empty() {
            info!(key = %key, "No content found");
            Vec::new()
        } else {
            info!(key = %key, content_id = %content_id, "Content resolved");
            self.source.fetch_segments(&content_id)
        };

        let entry = CacheEntry::new(content_id, segments, now);
        if let Err(e) = self.cache.store(key, entry.clone()) {
            warn!(key = %key, "Failed to persist segment cache: {}", e);
        }
        entry
    }

    /// Runs one tick using the wall clock.
    pub fn poll_once(&mut self) -> TickOutcome {
        self.poll_once_at(Utc::now())
    }

    /// Runs one tick, taking `now` as the current time for cache decisions.
    pub fn poll_once_at(&mut self, now: DateTime<Utc>) -> TickOutcome {
        let snapshot = match self.device.status() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Failed to read playback status: {}", e);
                self.go_idle();
                return TickOutcome::StatusFailed;
            }
        };

        let Some(key) = self.recognize(&snapshot) else {
            self.go_idle();
            return TickOutcome::Idle;
        };

        let needs_resolution = match &self.state {
            MonitorState::Tracking(tracked) if tracked.key == key => {
                self.cache.lookup_at(&key, now).is_none()
            }
            _ => true,
        };

        if self.applied.track(&key) {
            info!(key = %key, "Now playing");
        }

        if needs_resolution {
            let entry = self.resolve_segments(&key, now);
            self.state = MonitorState::Tracking(TrackedContent::from_entry(key, entry));
        }

        let MonitorState::Tracking(tracked) = &self.state else {
            return TickOutcome::Idle;
        };

        if tracked.content_id.is_empty() {
            return TickOutcome::Tracking { skipped: 0 };
        }

        let position = snapshot.position_secs;
        let remaining = tracked
            .segments
            .iter()
            .filter(|segment| !self.applied.contains(segment.start))
            .count();
        debug!(position, remaining, "Playback position");

        let mut skipped = 0;
        for segment in &tracked.segments {
            if !segment.contains(position) || self.applied.contains(segment.start) {
                continue;
            }

            match self.device.seek_to(segment.end) {
                Ok(()) => {
                    info!(
                        category = segment.category.as_str(),
                        from = position,
                        to = segment.end,
                        "Skipped segment"
                    );
                    self.applied.insert(segment.start);
                    skipped += 1;
                }
                Err(e) => warn!(
                    category = segment.category.as_str(),
                    start = segment.start,
                    "Seek failed, retrying next tick: {}",
                    e
                ),
            }
        }

        TickOutcome::Tracking { skipped }
    }

    /// Delay before the tick following `outcome`.
    pub fn interval_after(&self, outcome: TickOutcome) -> Duration {
        match outcome {
            TickOutcome::Tracking { .. } => self.poll_interval,
            TickOutcome::Idle | TickOutcome::StatusFailed => self.idle_poll_interval,
        }
    }

    /// Polls until `shutdown` receives a message or is disconnected.
    pub fn run(&mut self, shutdown: &Receiver<()>) {
        info!(app = %self.app_name, "Playback monitor started");

        loop {
            let outcome = self.poll_once();
            match shutdown.recv_timeout(self.interval_after(outcome)) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        info!("Playback monitor stopped");
    }
}
