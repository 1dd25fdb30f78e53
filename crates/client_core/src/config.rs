use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use serde::Deserialize;
use tracing::warn;

pub const DEFAULT_CONFIG_FILE: &str = "chat_sync.toml";
pub const CONFIG_PATH_ENV: &str = "CHAT_SYNC_CONFIG";
const ENV_PREFIX: &str = "CHAT_SYNC__";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub edit_window_secs: u64,
    pub dedup_window_secs: u64,
    pub away_after_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub min_recording_millis: u64,
    pub sampler_frame_millis: u64,
    pub max_attachment_bytes: u64,
    pub encoder_bits_per_second: u32,
    pub preferred_audio_formats: Vec<String>,
    pub event_buffer: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            edit_window_secs: 180,
            dedup_window_secs: 10,
            away_after_secs: 300,
            heartbeat_interval_secs: 30,
            min_recording_millis: 1_000,
            sampler_frame_millis: 16,
            max_attachment_bytes: 10 * 1024 * 1024,
            encoder_bits_per_second: 128_000,
            preferred_audio_formats: vec![
                "audio/webm;codecs=opus".into(),
                "audio/mp4;codecs=mp4a.40.2".into(),
                "audio/webm;codecs=pcm".into(),
                "audio/wav".into(),
            ],
            event_buffer: 1024,
        }
    }
}

impl SyncSettings {
    pub fn edit_window(&self) -> Duration {
        Duration::from_secs(self.edit_window_secs)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }

    pub fn away_after(&self) -> Duration {
        Duration::from_secs(self.away_after_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn min_recording(&self) -> Duration {
        Duration::from_millis(self.min_recording_millis)
    }

    pub fn sampler_frame(&self) -> Duration {
        Duration::from_millis(self.sampler_frame_millis.max(1))
    }
}

/// Loads settings from `chat_sync.toml` (or the file named by
/// `CHAT_SYNC_CONFIG`) and then applies `CHAT_SYNC__*` environment overrides.
/// A missing or unreadable file leaves the defaults in place.
pub fn load_settings() -> SyncSettings {
    let path = std::env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut settings = match load_settings_from(&path) {
        Ok(settings) => settings,
        Err(err) => {
            if path.exists() {
                warn!(path = %path.display(), "ignoring unreadable settings file: {err:#}");
            }
            SyncSettings::default()
        }
    };

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings
}

pub fn load_settings_from(path: &Path) -> anyhow::Result<SyncSettings> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
    toml::from_str(&raw)
        .with_context(|| format!("failed to parse settings file '{}'", path.display()))
}

pub fn apply_env_overrides(settings: &mut SyncSettings, lookup: impl Fn(&str) -> Option<String>) {
    let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

    override_parsed(&mut settings.edit_window_secs, "EDIT_WINDOW_SECS", var("EDIT_WINDOW_SECS"));
    override_parsed(&mut settings.dedup_window_secs, "DEDUP_WINDOW_SECS", var("DEDUP_WINDOW_SECS"));
    override_parsed(&mut settings.away_after_secs, "AWAY_AFTER_SECS", var("AWAY_AFTER_SECS"));
    override_parsed(
        &mut settings.heartbeat_interval_secs,
        "HEARTBEAT_INTERVAL_SECS",
        var("HEARTBEAT_INTERVAL_SECS"),
    );
    override_parsed(
        &mut settings.min_recording_millis,
        "MIN_RECORDING_MILLIS",
        var("MIN_RECORDING_MILLIS"),
    );
    override_parsed(
        &mut settings.sampler_frame_millis,
        "SAMPLER_FRAME_MILLIS",
        var("SAMPLER_FRAME_MILLIS"),
    );
    override_parsed(
        &mut settings.max_attachment_bytes,
        "MAX_ATTACHMENT_BYTES",
        var("MAX_ATTACHMENT_BYTES"),
    );
    override_parsed(
        &mut settings.encoder_bits_per_second,
        "ENCODER_BITS_PER_SECOND",
        var("ENCODER_BITS_PER_SECOND"),
    );
    override_parsed(&mut settings.event_buffer, "EVENT_BUFFER", var("EVENT_BUFFER"));

    if let Some(v) = var("PREFERRED_AUDIO_FORMATS") {
        let formats: Vec<String> = v
            .split(',')
            .map(str::trim)
            .filter(|format| !format.is_empty())
            .map(str::to_string)
            .collect();
        if formats.is_empty() {
            warn!("ignoring empty {ENV_PREFIX}PREFERRED_AUDIO_FORMATS");
        } else {
            settings.preferred_audio_formats = formats;
        }
    }
}

fn override_parsed<T: std::str::FromStr>(slot: &mut T, name: &str, raw: Option<String>) {
    let Some(raw) = raw else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(parsed) => *slot = parsed,
        Err(_) => warn!("ignoring invalid {ENV_PREFIX}{name}={raw}"),
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
