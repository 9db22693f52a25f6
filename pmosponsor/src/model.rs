use std::fmt;

use serde::{Deserialize, Serialize};

/// Category of a skippable range, as labelled by the segment service.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SegmentCategory {
    Sponsor,
    SelfPromo,
    /// Any other category (intro, outro, interaction, ...). Never skipped.
    Other(String),
}

impl SegmentCategory {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "sponsor" => SegmentCategory::Sponsor,
            "selfpromo" => SegmentCategory::SelfPromo,
            _ => SegmentCategory::Other(label.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            SegmentCategory::Sponsor => "sponsor",
            SegmentCategory::SelfPromo => "selfpromo",
            SegmentCategory::Other(s) => s.as_str(),
        }
    }

    pub fn is_skippable(&self) -> bool {
        matches!(self, SegmentCategory::Sponsor | SegmentCategory::SelfPromo)
    }
}

/// Categories requested from the segment service.
pub const SKIPPABLE_CATEGORIES: [SegmentCategory; 2] =
    [SegmentCategory::Sponsor, SegmentCategory::SelfPromo];

/// Wire representation of a segment, shared by the segment service and the
/// cache file: `{"category": "sponsor", "segment": [3.0, 10.0]}`.
///
/// Extra fields sent by the service (UUID, votes, ...) are ignored.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SegmentRecord {
    pub category: String,
    pub segment: Vec<f64>,
}

/// A time range within the playing content, in seconds.
#[derive(Clone, Debug, PartialEq)]
pub struct Segment {
    pub category: SegmentCategory,
    pub start: f64,
    pub end: f64,
}

impl Segment {
    pub fn new(category: SegmentCategory, start: f64, end: f64) -> Self {
        Self {
            category,
            start,
            end,
        }
    }

    /// Converts a wire record, rejecting ranges that cannot be acted upon.
    pub fn from_record(record: &SegmentRecord) -> Option<Self> {
        let (start, end) = match record.segment.as_slice() {
            [start, end, ..] => (*start, *end),
            _ => return None,
        };

        if !start.is_finite() || !end.is_finite() || start < 0.0 || end < start {
            return None;
        }

        Some(Segment::new(
            SegmentCategory::from_label(&record.category),
            start,
            end,
        ))
    }

    pub fn to_record(&self) -> SegmentRecord {
        SegmentRecord {
            category: self.category.as_str().to_string(),
            segment: vec![self.start, self.end],
        }
    }

    /// True when `position` lies inside the segment, bounds included.
    pub fn contains(&self, position: f64) -> bool {
        self.start <= position && position <= self.end
    }
}

/// Converts wire records into skippable segments, dropping other categories
/// and malformed ranges.
pub fn skippable_segments(records: &[SegmentRecord]) -> Vec<Segment> {
    records
        .iter()
        .filter_map(Segment::from_record)
        .filter(|segment| segment.category.is_skippable())
        .collect()
}

/// Key identifying "what is playing" in the segment cache.
///
/// Built as `"{artist} {title}"`, which is also the free-text query handed
/// to the content resolver.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Builds the key from playback metadata. Blank fields yield `None`.
    pub fn from_metadata(artist: &str, title: &str) -> Option<Self> {
        let artist = artist.trim();
        let title = title.trim();
        if artist.is_empty() || title.is_empty() {
            return None;
        }
        Some(CacheKey(format!("{} {}", artist, title)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        CacheKey(value.to_string())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Live status of the playback device, as seen by one poll.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlaybackSnapshot {
    pub is_playing: bool,
    /// Display name of the application running on the device ("" when none).
    pub app_name: String,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub position_secs: f64,
}

impl PlaybackSnapshot {
    /// Cache key for the current content, if both title and artist are known.
    pub fn cache_key(&self) -> Option<CacheKey> {
        match (&self.artist, &self.title) {
            (Some(artist), Some(title)) => CacheKey::from_metadata(artist, title),
            _ => None,
        }
    }
}
