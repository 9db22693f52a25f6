//! # PMOSponsor - Saut automatique des segments sponsorisés
//!
//! Surveille la lecture d'une application média sur un Chromecast et saute
//! les segments "sponsor" et "selfpromo" connus du service SponsorBlock.
//!
//! ## Architecture
//!
//! - [`monitor::PlaybackMonitor`] : boucle de polling, état Idle/Tracking
//! - [`cache::SegmentCache`] : cache TTL persistant des segments par titre
//! - [`source::SponsorBlockClient`] : client HTTP du service de segments
//! - [`resolver::YtDlpResolver`] : résolution titre → identifiant de vidéo
//! - [`chromecast::ChromecastDevice`] : pilotage Cast v2 et découverte mDNS
//!
//! Les collaborateurs sont des traits ([`PlaybackDevice`], [`ContentResolver`],
//! [`SegmentSource`], [`CacheStore`]) pour pouvoir tester le moniteur sans
//! réseau.

pub mod cache;
pub mod chromecast;
pub mod config_ext;
pub mod errors;
pub mod logs;
pub mod model;
pub mod monitor;
pub mod playback;
pub mod resolver;
pub mod source;

pub use cache::{CacheEntry, CacheStore, JsonFileCacheStore, MemoryCacheStore, SegmentCache};
pub use chromecast::{ChromecastDevice, ChromecastInfo, find_device};
pub use config_ext::{SponsorConfig, SponsorConfigExt};
pub use errors::{Result, SponsorError};
pub use model::{CacheKey, PlaybackSnapshot, Segment, SegmentCategory, SegmentRecord};
pub use monitor::{AppliedSet, MonitorState, PlaybackMonitor, TickOutcome, TrackedContent};
pub use playback::PlaybackDevice;
pub use resolver::{ContentResolver, YtDlpResolver};
pub use source::{SegmentSource, SponsorBlockClient};
