//! Chromecast playback device using the rust_cast library.
//!
//! Every operation opens a fresh Cast connection (TLS on port 8009),
//! connects the platform receiver, then the transport of the running
//! application. Keeping no connection around avoids heartbeat bookkeeping
//! between polls and lifetime issues with `CastDevice`.
//!
//! rust_cast calls block without a deadline, so each operation runs on a
//! short-lived worker thread and is abandoned once the operation timeout
//! elapses. Only one worker may be alive at a time: while an abandoned one
//! is still blocked on the device, new operations fail immediately instead
//! of stacking up threads and sockets.

pub mod discovery;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, bounded};
use rust_cast::CastDevice;
use rust_cast::channels::media::{Metadata, PlayerState, StatusEntry};
use rust_cast::channels::receiver::Application;
use tracing::{debug, info, warn};

use crate::errors::{Result, SponsorError};
use crate::model::PlaybackSnapshot;
use crate::playback::PlaybackDevice;

pub use discovery::{ChromecastInfo, find_device};

/// Destination of the platform receiver.
const DEFAULT_DESTINATION_ID: &str = "receiver-0";

/// Default deadline for one Cast operation.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Ensures the Rustls CryptoProvider is initialized exactly once.
fn ensure_crypto_provider_initialized() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let _ = rustls::crypto::CryptoProvider::install_default(
            rustls::crypto::aws_lc_rs::default_provider(),
        );
    });
}

/// Title and artist carried by the Cast media metadata.
///
/// Music tracks expose an artist; generic media (what video apps usually
/// send) and movies only have a subtitle, which holds the channel or author
/// name. TV shows map the episode to the title and the series to the artist.
pub fn title_and_artist(metadata: Option<&Metadata>) -> (Option<String>, Option<String>) {
    match metadata {
        Some(Metadata::MusicTrack(track)) => (
            track.title.clone(),
            track.artist.clone().or_else(|| track.album_artist.clone()),
        ),
        Some(Metadata::Generic(generic)) => (generic.title.clone(), generic.subtitle.clone()),
        Some(Metadata::Movie(movie)) => (movie.title.clone(), movie.subtitle.clone()),
        Some(Metadata::TvShow(show)) => (show.episode_title.clone(), show.series_title.clone()),
        _ => (None, None),
    }
}

/// Builds the snapshot of one media status entry.
fn snapshot_from_entry(app_name: &str, entry: &StatusEntry) -> PlaybackSnapshot {
    let (title, artist) =
        title_and_artist(entry.media.as_ref().and_then(|media| media.metadata.as_ref()));

    PlaybackSnapshot {
        is_playing: matches!(entry.player_state, PlayerState::Playing),
        app_name: app_name.to_string(),
        title,
        artist,
        position_secs: entry.current_time.map(f64::from).unwrap_or(0.0),
    }
}

/// Clears the in-flight flag when dropped, including when the worker panics.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Chromecast controlled over the Cast protocol.
#[derive(Clone, Debug)]
pub struct ChromecastDevice {
    info: ChromecastInfo,
    timeout: Duration,
    /// Set while a worker thread is running, shared by clones.
    busy: Arc<AtomicBool>,
}

impl ChromecastDevice {
    pub fn new(info: ChromecastInfo) -> Self {
        Self {
            info,
            timeout: DEFAULT_OPERATION_TIMEOUT,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn info(&self) -> &ChromecastInfo {
        &self.info
    }

    /// Opens a connection and verifies that the device answers.
    ///
    /// Called once at startup; a failure here is fatal for the program.
    pub fn attach(&self) -> Result<()> {
        let apps = self.run_with_deadline("attach", |device| {
            let cast = device.connect()?;
            let status = cast
                .receiver
                .get_status()
                .map_err(|e| SponsorError::chromecast(format!("Failed to get receiver status: {}", e)))?;
            Ok(status
                .applications
                .iter()
                .map(|app| app.display_name.clone())
                .collect::<Vec<_>>())
        })?;

        info!(
            device = %self.info.friendly_name,
            running_apps = ?apps,
            "Connected to Chromecast"
        );
        Ok(())
    }

    /// Runs `op` on a worker thread, giving up after the operation timeout.
    ///
    /// Fails at once while a previous worker is still running.
    fn run_with_deadline<T, F>(&self, name: &'static str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(ChromecastDevice) -> Result<T> + Send + 'static,
    {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(device = %self.info.friendly_name, "Previous Cast operation still blocked, skipping {}", name);
            return Err(SponsorError::chromecast(format!(
                "{} skipped: previous operation still pending",
                name
            )));
        }

        let guard = InFlight(self.busy.clone());
        let (tx, rx) = bounded(1);
        let device = self.clone();

        // si le spawn échoue, la closure (et donc le guard) est libérée
        thread::Builder::new()
            .name(format!("cast-{}", name))
            .spawn(move || {
                let result = op(device);
                // libéré avant l'envoi : l'appelant peut enchaîner aussitôt
                drop(guard);
                let _ = tx.send(result);
            })?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(SponsorError::chromecast(format!(
                "{} timed out after {}ms",
                name,
                self.timeout.as_millis()
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(SponsorError::chromecast(format!(
                "{} worker terminated unexpectedly",
                name
            ))),
        }
    }

    /// Creates a new connection to the platform receiver.
    fn connect(&self) -> Result<CastDevice<'static>> {
        ensure_crypto_provider_initialized();
        debug!("Connecting to Chromecast at {}:{}", self.info.host, self.info.port);

        let device = CastDevice::connect_without_host_verification(
            self.info.host.clone(),
            self.info.port,
        )
        .map_err(|e| SponsorError::chromecast(format!("Failed to connect to Chromecast: {}", e)))?;

        device
            .connection
            .connect(DEFAULT_DESTINATION_ID.to_string())
            .map_err(|e| SponsorError::chromecast(format!("Failed to connect receiver channel: {}", e)))?;

        device
            .heartbeat
            .ping()
            .map_err(|e| SponsorError::chromecast(format!("Failed to send ping: {}", e)))?;

        Ok(device)
    }

    /// First running application, if any.
    fn running_application(cast: &CastDevice<'_>) -> Result<Option<Application>> {
        let status = cast
            .receiver
            .get_status()
            .map_err(|e| SponsorError::chromecast(format!("Failed to get receiver status: {}", e)))?;
        Ok(status.applications.into_iter().next())
    }

    /// Media status entry of `app`, connecting to its transport first.
    fn media_entry(cast: &CastDevice<'_>, app: &Application) -> Result<Option<StatusEntry>> {
        cast.connection
            .connect(app.transport_id.clone())
            .map_err(|e| SponsorError::chromecast(format!("Failed to connect to app transport: {}", e)))?;

        let status = cast
            .media
            .get_status(app.transport_id.clone(), None)
            .map_err(|e| SponsorError::chromecast(format!("Failed to get media status: {}", e)))?;

        Ok(status.entries.into_iter().next())
    }

    fn read_status(&self) -> Result<PlaybackSnapshot> {
        let cast = self.connect()?;

        let Some(app) = Self::running_application(&cast)? else {
            return Ok(PlaybackSnapshot::default());
        };

        let snapshot = match Self::media_entry(&cast, &app)? {
            Some(entry) => snapshot_from_entry(&app.display_name, &entry),
            None => PlaybackSnapshot {
                app_name: app.display_name.clone(),
                ..PlaybackSnapshot::default()
            },
        };

        Ok(snapshot)
    }

    fn seek_active_media(&self, position_secs: f64) -> Result<()> {
        let cast = self.connect()?;

        let app = Self::running_application(&cast)?
            .ok_or_else(|| SponsorError::chromecast("No application running"))?;
        let entry = Self::media_entry(&cast, &app)?
            .ok_or_else(|| SponsorError::chromecast("No media session available"))?;

        cast.media
            .seek(
                app.transport_id.clone(),
                entry.media_session_id,
                Some(position_secs as f32),
                None,
            )
            .map_err(|e| SponsorError::chromecast(format!("Failed to seek: {}", e)))?;

        Ok(())
    }
}

impl PlaybackDevice for ChromecastDevice {
    fn status(&self) -> Result<PlaybackSnapshot> {
        self.run_with_deadline("status", |device| device.read_status())
    }

    fn seek_to(&self, position_secs: f64) -> Result<()> {
        debug!("ChromecastDevice: seek_to({})", position_secs);
        self.run_with_deadline("seek", move |device| device.seek_active_media(position_secs))
    }
}
