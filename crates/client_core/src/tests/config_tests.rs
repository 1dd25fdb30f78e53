use super::{apply_env_overrides, load_settings_from, SyncSettings};

use std::{
    collections::HashMap,
    env, fs,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

fn env_map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn defaults_match_chat_timings() {
    let settings = SyncSettings::default();
    assert_eq!(settings.edit_window(), Duration::from_secs(180));
    assert_eq!(settings.away_after(), Duration::from_secs(300));
    assert!(settings.heartbeat_interval() < settings.away_after());
    assert_eq!(settings.min_recording(), Duration::from_millis(1_000));
    assert_eq!(settings.max_attachment_bytes, 10 * 1024 * 1024);
    assert_eq!(
        settings.preferred_audio_formats.last().map(String::as_str),
        Some("audio/wav")
    );
}

#[test]
fn partial_file_keeps_remaining_defaults() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let path = env::temp_dir().join(format!("chat_sync_settings_{suffix}.toml"));
    fs::write(&path, "away_after_secs = 60\nheartbeat_interval_secs = 5\n").expect("write");

    let settings = load_settings_from(&path).expect("load");
    assert_eq!(settings.away_after_secs, 60);
    assert_eq!(settings.heartbeat_interval_secs, 5);
    assert_eq!(settings.edit_window_secs, 180);

    fs::remove_file(path).expect("cleanup");
}

#[test]
fn missing_file_is_an_error() {
    let path = env::temp_dir().join("chat_sync_settings_does_not_exist.toml");
    assert!(load_settings_from(&path).is_err());
}

#[test]
fn env_overrides_apply_and_invalid_values_are_ignored() {
    let vars = env_map(&[
        ("CHAT_SYNC__EDIT_WINDOW_SECS", "90"),
        ("CHAT_SYNC__AWAY_AFTER_SECS", "soon"),
        ("CHAT_SYNC__PREFERRED_AUDIO_FORMATS", "audio/wav, audio/webm;codecs=pcm"),
    ]);
    let mut settings = SyncSettings::default();
    apply_env_overrides(&mut settings, |key| vars.get(key).cloned());

    assert_eq!(settings.edit_window_secs, 90);
    assert_eq!(settings.away_after_secs, 300);
    assert_eq!(
        settings.preferred_audio_formats,
        vec!["audio/wav".to_string(), "audio/webm;codecs=pcm".to_string()]
    );
}
