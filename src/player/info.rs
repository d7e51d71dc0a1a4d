//! Observable player state published to the UI.
//!
//! [`PlayerInfo`] lives behind its own mutex inside the player; it is a leaf
//! lock (nothing else is acquired while holding it). Change notifications
//! are latched dirty bits: the player sets them, the UI reads the snapshot
//! and clears them after rendering. The current-track field is always
//! updated before `file_changed` is set.

use crate::model::TrackRef;

/// Playback status as the UI sees it (the consumer's status).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerStatus {
    #[default]
    Stopped,
    Playing,
    Paused,
}

/// Latched change notifications.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirtyFlags {
    pub file: bool,
    pub metadata: bool,
    pub status: bool,
    pub position: bool,
    pub buffer_fill: bool,
    pub volume: bool,
}

impl DirtyFlags {
    pub fn any(&self) -> bool {
        self.file || self.metadata || self.status || self.position || self.buffer_fill || self.volume
    }
}

/// Snapshot of everything the UI renders about playback.
#[derive(Debug, Clone, Default)]
pub struct PlayerInfo {
    pub status: PlayerStatus,
    /// Currently playing (or loaded) track.
    pub current: Option<TrackRef>,
    /// Position in whole seconds.
    pub position: u32,
    /// Keep playing past the end of the current track?
    pub cont: bool,
    pub vol_left: u8,
    pub vol_right: u8,
    pub vol_max: u8,
    /// Sealed chunks in the ring buffer.
    pub buffer_fill: usize,
    /// Ring buffer size in chunks.
    pub buffer_size: usize,
    /// Stream metadata line (icy title updates).
    pub metadata: Option<String>,
    /// Pending error message; the UI consumes and clears it.
    pub error_msg: Option<String>,
    pub dirty: DirtyFlags,
}

impl PlayerInfo {
    /// Take the pending error, clearing it.
    pub fn take_error(&mut self) -> Option<String> {
        self.error_msg.take()
    }

    /// Read and clear the dirty bits after rendering.
    pub fn consume_dirty(&mut self) -> DirtyFlags {
        std::mem::take(&mut self.dirty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirty_flags_latch_and_clear() {
        let mut info = PlayerInfo::default();
        assert!(!info.dirty.any());

        info.dirty.status = true;
        info.dirty.position = true;
        assert!(info.dirty.any());

        let taken = info.consume_dirty();
        assert!(taken.status && taken.position);
        assert!(!info.dirty.any());
    }

    #[test]
    fn test_take_error_clears() {
        let mut info = PlayerInfo {
            error_msg: Some("decoder exploded".into()),
            ..Default::default()
        };
        assert_eq!(info.take_error().as_deref(), Some("decoder exploded"));
        assert!(info.take_error().is_none());
    }
}
