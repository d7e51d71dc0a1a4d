//! Configuration system using TOML files.
//!
//! Config is stored in the OS-standard config directory
//! (`~/.config/quaver/config.toml` on Linux). The file is human-readable
//! and editable; settings load at startup and save when changed.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::engine::PlayOpts;
use crate::library::AaaMode;
use crate::model::{DEFAULT_SORT_KEYS, SortKey};

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Audio output settings
    pub audio: AudioConfig,

    /// Library settings
    pub library: LibraryConfig,

    /// Playback policy flags
    pub playback: PlaybackConfig,

    /// Sorted-view key names
    pub sort: SortConfig,
}

/// Audio output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Output plugin name ("cpal" or "null")
    pub output: String,

    /// Ring buffer size in chunks (clamped to 3..=30)
    pub buffer_chunks: usize,

    /// Promote ≤2ch/≤16bit formats to stereo signed 16-bit so output
    /// plugins face fewer formats
    pub promote_stereo_16bit: bool,

    /// Volume per channel, 0..=100
    pub volume_left: u8,
    pub volume_right: u8,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            output: "cpal".to_string(),
            buffer_chunks: 16,
            promote_stereo_16bit: true,
            volume_left: 100,
            volume_right: 100,
        }
    }
}

/// Library settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Library scan paths
    pub paths: Vec<PathBuf>,

    /// Sort "The X" as "X, The"
    pub smart_artist_sort: bool,

    /// Re-read cached entries whose duration is zero (suspect records)
    pub rescan_zero_duration: bool,

    /// On cache miss, store a bare record instead of reading the file
    pub skip_track_info: bool,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            smart_artist_sort: true,
            rescan_zero_duration: true,
            skip_track_info: false,
        }
    }
}

/// Playback policy flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub shuffle: bool,
    pub repeat: bool,
    pub repeat_current: bool,
    /// Advance over the library (true) or the playlist (false)
    pub play_library: bool,
    /// Follow the sorted view instead of the tree
    pub play_sorted: bool,
    /// "all", "artist" or "album"
    pub aaa_mode: String,
    pub auto_reshuffle: bool,
    /// Continue past the end of the current track
    pub cont: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            shuffle: false,
            repeat: false,
            repeat_current: false,
            play_library: true,
            play_sorted: false,
            aaa_mode: "all".to_string(),
            auto_reshuffle: true,
            cont: true,
        }
    }
}

/// Sorted-view keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SortConfig {
    pub keys: Vec<String>,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            keys: vec![
                "artist".to_string(),
                "album".to_string(),
                "discnumber".to_string(),
                "tracknumber".to_string(),
                "title".to_string(),
                "filename".to_string(),
            ],
        }
    }
}

impl Config {
    /// The configured sort keys; unknown names are dropped, an empty result
    /// falls back to the default tuple.
    pub fn sort_keys(&self) -> Vec<SortKey> {
        let keys: Vec<SortKey> = self
            .sort
            .keys
            .iter()
            .filter_map(|name| SortKey::parse(name))
            .collect();
        if keys.is_empty() {
            DEFAULT_SORT_KEYS.to_vec()
        } else {
            keys
        }
    }

    /// The playback flags as the engine consumes them.
    pub fn play_opts(&self) -> PlayOpts {
        PlayOpts {
            shuffle: self.playback.shuffle,
            repeat: self.playback.repeat,
            repeat_current: self.playback.repeat_current,
            play_library: self.playback.play_library,
            play_sorted: self.playback.play_sorted,
            aaa_mode: AaaMode::parse(&self.playback.aaa_mode).unwrap_or_default(),
            auto_reshuffle: self.playback.auto_reshuffle,
        }
    }
}

/// Get the config directory path.
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("quaver"))
}

/// Get the full path to the config file.
pub fn config_file() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Load the config, falling back to defaults when missing or invalid.
pub fn load() -> Config {
    let Some(path) = config_file() else {
        return Config::default();
    };
    match std::fs::read_to_string(&path) {
        Ok(text) => toml::from_str(&text).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "invalid config file, using defaults");
            Config::default()
        }),
        Err(_) => Config::default(),
    }
}

/// Save the config, creating the directory as needed.
pub fn save(config: &Config) -> crate::error::Result<()> {
    let dir = config_dir().ok_or_else(|| crate::error::Error::config("no config directory"))?;
    std::fs::create_dir_all(&dir)?;
    let text = toml::to_string_pretty(config)
        .map_err(|e| crate::error::Error::config(e.to_string()))?;
    std::fs::write(dir.join("config.toml"), text)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.audio.output, "cpal");
        assert_eq!(config.audio.buffer_chunks, 16);
        assert!(config.audio.promote_stereo_16bit);
        assert!(config.library.rescan_zero_duration);
        assert!(config.playback.cont);
        assert_eq!(config.sort_keys(), DEFAULT_SORT_KEYS.to_vec());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [playback]
            shuffle = true
            aaa_mode = "album"
            "#,
        )
        .expect("parse");
        assert!(config.playback.shuffle);
        assert_eq!(config.play_opts().aaa_mode, AaaMode::Album);
        assert_eq!(config.audio.output, "cpal");
    }

    #[test]
    fn test_unknown_sort_keys_dropped() {
        let config: Config = toml::from_str(
            r#"
            [sort]
            keys = ["artist", "mood", "title"]
            "#,
        )
        .expect("parse");
        assert_eq!(
            config.sort_keys(),
            vec![SortKey::Artist, SortKey::Title]
        );
    }

    #[test]
    fn test_roundtrip() {
        let mut config = Config::default();
        config.playback.repeat = true;
        config.library.paths = vec![PathBuf::from("/music")];
        let text = toml::to_string_pretty(&config).expect("serialize");
        let back: Config = toml::from_str(&text).expect("parse");
        assert!(back.playback.repeat);
        assert_eq!(back.library.paths, vec![PathBuf::from("/music")]);
    }
}
