use crate::errors::Result;
use crate::model::PlaybackSnapshot;

/// Remote playback device controlled by the monitor.
///
/// Implemented by [`crate::chromecast::ChromecastDevice`] in production and by
/// scripted fakes in tests.
pub trait PlaybackDevice {
    /// Reads the current playback status.
    fn status(&self) -> Result<PlaybackSnapshot>;

    /// Seeks the active media to `position_secs`.
    fn seek_to(&self, position_secs: f64) -> Result<()>;
}

impl<T: PlaybackDevice + ?Sized> PlaybackDevice for &T {
    fn status(&self) -> Result<PlaybackSnapshot> {
        (**self).status()
    }

    fn seek_to(&self, position_secs: f64) -> Result<()> {
        (**self).seek_to(position_secs)
    }
}
