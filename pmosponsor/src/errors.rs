use thiserror::Error;

pub type Result<T> = std::result::Result<T, SponsorError>;

#[derive(Error, Debug)]
pub enum SponsorError {
    #[error("Chromecast Error: {0}")]
    ChromecastError(String),
    #[error("Device '{0}' not found on the local network")]
    DeviceNotFound(String),
    #[error("Discovery Error: {0}")]
    DiscoveryError(String),
    #[error("Resolver Error: {0}")]
    ResolverError(String),
    #[error("HTTP request failed: {0}")]
    Http(#[from] ureq::Error),
    #[error("Segment service returned HTTP status {0}")]
    HttpStatus(u16),
    #[error("Cache Error: {0}")]
    CacheError(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl SponsorError {
    pub fn chromecast(message: impl Into<String>) -> Self {
        SponsorError::ChromecastError(message.into())
    }

    pub fn discovery(message: impl Into<String>) -> Self {
        SponsorError::DiscoveryError(message.into())
    }

    pub fn resolver(message: impl Into<String>) -> Self {
        SponsorError::ResolverError(message.into())
    }

    pub fn cache(message: impl Into<String>) -> Self {
        SponsorError::CacheError(message.into())
    }
}
