//! Client for the SponsorBlock segment service.
//!
//! `GET {api_url}?videoID={id}&categories=[...]` returns a JSON array of
//! `{"category": ..., "segment": [start, end], ...}` records, or a 404 when
//! nobody submitted segments for that video.

use std::time::Duration;

use tracing::{debug, info, warn};
use ureq::Agent;

use crate::errors::{Result, SponsorError};
use crate::model::{SKIPPABLE_CATEGORIES, Segment, SegmentRecord, skippable_segments};

/// Public SponsorBlock endpoint.
pub const DEFAULT_API_URL: &str = "https://sponsor.ajay.app/api/skipSegments";

/// Default timeout for segment service requests.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);

const USER_AGENT: &str = concat!("pmosponsor/", env!("CARGO_PKG_VERSION"));

/// Source of skippable segments for a resolved content ID.
pub trait SegmentSource {
    /// Fetches the sponsor / selfpromo segments of `content_id`.
    ///
    /// Never fails: any error degrades to "no segments known".
    fn fetch_segments(&self, content_id: &str) -> Vec<Segment>;
}

impl<T: SegmentSource + ?Sized> SegmentSource for &T {
    fn fetch_segments(&self, content_id: &str) -> Vec<Segment> {
        (**self).fetch_segments(content_id)
    }
}

pub fn build_agent(timeout: Duration) -> Agent {
    Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

/// Blocking SponsorBlock client.
#[derive(Clone, Debug)]
pub struct SponsorBlockClient {
    agent: Agent,
    api_url: String,
}

impl SponsorBlockClient {
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            agent: build_agent(timeout),
            api_url: api_url.into(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Value of the `categories` query parameter.
    fn categories_param() -> String {
        let labels = SKIPPABLE_CATEGORIES
            .iter()
            .map(|c| format!("\"{}\"", c.as_str()))
            .collect::<Vec<_>>();
        format!("[{}]", labels.join(","))
    }

    /// Raw records for `content_id`, with transport and status errors.
    pub fn fetch_records(&self, content_id: &str) -> Result<Vec<SegmentRecord>> {
        debug!(content_id, url = %self.api_url, "Querying segment service");

        let mut response = self
            .agent
            .get(&self.api_url)
            .query("videoID", content_id)
            .query("categories", Self::categories_param())
            .header("User-Agent", USER_AGENT)
            .call()
            .map_err(|e| match e {
                ureq::Error::StatusCode(code) => SponsorError::HttpStatus(code),
                other => SponsorError::Http(other),
            })?;

        let body = response.body_mut().read_to_string()?;
        let records: Vec<SegmentRecord> = serde_json::from_str(&body)?;
        Ok(records)
    }
}

impl SegmentSource for SponsorBlockClient {
    fn fetch_segments(&self, content_id: &str) -> Vec<Segment> {
        match self.fetch_records(content_id) {
            Ok(records) => {
                let segments = skippable_segments(&records);
                debug!(
                    content_id,
                    received = records.len(),
                    kept = segments.len(),
                    "Segments fetched"
                );
                segments
            }
            Err(SponsorError::HttpStatus(404)) => {
                info!(content_id, "No segments found for video ID");
                Vec::new()
            }
            Err(e) => {
                warn!(content_id, "Failed to fetch segments: {}", e);
                Vec::new()
            }
        }
    }
}
