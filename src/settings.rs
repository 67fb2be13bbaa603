//! The advanced settings document: a fixed set of categories, each a map of
//! options, loaded once per invocation and written back whole.

use crate::constants::{ASSUMED_FRAME_RATE, SETTINGS_EXPORT_VERSION};
use crate::storage::{self, StoreError};
use crate::youtube::{BroadcastRequest, LatencyPreference, MonitorStream};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamLatency {
    Low,
    UltraLow,
    #[serde(other)]
    Normal,
}

impl StreamLatency {
    pub fn preference(self) -> LatencyPreference {
        match self {
            StreamLatency::UltraLow => LatencyPreference::UltraLow,
            StreamLatency::Low => LatencyPreference::Low,
            StreamLatency::Normal => LatencyPreference::Normal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    pub enable_dvr: bool,
    pub enable_content_encryption: bool,
    pub enable_embed: bool,
    pub enable_auto_start: bool,
    pub enable_auto_stop: bool,
    pub record_from_start: bool,
    pub monitor_stream: bool,
    pub broadcast_delay_ms: u32,
    pub custom_rtmp_url: String,
    pub stream_latency: StreamLatency,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            enable_dvr: true,
            enable_content_encryption: false,
            enable_embed: true,
            enable_auto_start: true,
            enable_auto_stop: true,
            record_from_start: true,
            monitor_stream: false,
            broadcast_delay_ms: 0,
            custom_rtmp_url: String::new(),
            stream_latency: StreamLatency::Normal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailSettings {
    pub auto_upload: bool,
    pub resize_thumbnail: bool,
    pub thumbnail_quality: u8,
    pub backup_thumbnails: bool,
}

impl Default for ThumbnailSettings {
    fn default() -> Self {
        Self {
            auto_upload: true,
            resize_thumbnail: true,
            thumbnail_quality: 85,
            backup_thumbnails: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonetizationSettings {
    pub enable_monetization: bool,
    pub enable_super_chat: bool,
    pub enable_channel_memberships: bool,
    pub enable_merchandise: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H265,
    #[serde(other)]
    H264,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Mp3,
    #[serde(other)]
    Aac,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TechnicalSettings {
    pub video_codec: VideoCodec,
    pub audio_codec: AudioCodec,
    /// Seconds between keyframes.
    pub keyframe_interval: u32,
    pub b_frames: u32,
    pub audio_sample_rate: u32,
    pub audio_channels: u32,
    pub enable_hardware_encoding: bool,
}

impl Default for TechnicalSettings {
    fn default() -> Self {
        Self {
            video_codec: VideoCodec::H264,
            audio_codec: AudioCodec::Aac,
            keyframe_interval: 2,
            b_frames: 0,
            audio_sample_rate: 44100,
            audio_channels: 2,
            enable_hardware_encoding: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub notify_stream_start: bool,
    pub notify_stream_end: bool,
    pub notify_errors: bool,
    pub webhook_url: String,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            notify_stream_start: true,
            notify_stream_end: true,
            notify_errors: true,
            webhook_url: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    pub enable_stream_key_rotation: bool,
    pub allowed_encoders: Vec<String>,
    pub ip_whitelist: Vec<String>,
    pub enable_https_only: bool,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            enable_stream_key_rotation: false,
            allowed_encoders: Vec::new(),
            ip_whitelist: Vec::new(),
            enable_https_only: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub stream_settings: StreamSettings,
    pub thumbnail_settings: ThumbnailSettings,
    pub monetization: MonetizationSettings,
    pub technical_settings: TechnicalSettings,
    pub notification_settings: NotificationSettings,
    pub security_settings: SecuritySettings,
}

/// Categories counted by [`Settings::summary`], with their display labels.
const SUMMARY_CATEGORIES: [(&str, &str); 5] = [
    ("stream_settings", "Stream Settings"),
    ("thumbnail_settings", "Thumbnail Settings"),
    ("monetization", "Monetization"),
    ("notification_settings", "Notifications"),
    ("security_settings", "Security"),
];

#[derive(Debug, Serialize, Deserialize)]
pub struct SettingsExport {
    pub exported_at: String,
    pub version: String,
    pub settings: Settings,
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Unknown setting '{0}'; use <category>.<option>")]
    UnknownKey(String),
    #[error("Invalid value for '{key}': {source}")]
    InvalidValue {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Value '{value}' is not accepted for '{key}'")]
    Rejected { key: String, value: String },
    #[error("Invalid settings file format: {0}")]
    InvalidImport(String),
}

impl Settings {
    /// Copy stream options onto a broadcast creation payload.
    pub fn apply_to_broadcast_request(&self, request: &mut BroadcastRequest) {
        let stream = &self.stream_settings;
        let details = &mut request.content_details;

        details.enable_auto_start = stream.enable_auto_start;
        details.enable_auto_stop = Some(stream.enable_auto_stop);
        details.record_from_start = stream.record_from_start;
        details.enable_dvr = stream.enable_dvr;
        details.enable_content_encryption = stream.enable_content_encryption;
        details.enable_embed = stream.enable_embed;

        details.monitor_stream = Some(MonitorStream {
            enable_monitor_stream: stream.monitor_stream,
            broadcast_stream_delay_ms: if stream.monitor_stream {
                stream.broadcast_delay_ms
            } else {
                0
            },
        });
        details.latency_preference = Some(stream.stream_latency.preference());
    }

    /// Encoder command-line tokens derived from the technical category.
    pub fn build_encoder_flags(&self) -> Vec<String> {
        let technical = &self.technical_settings;
        let mut flags = Vec::new();

        if technical.video_codec == VideoCodec::H265 {
            flags.extend(["-c:v".to_string(), "libx265".to_string()]);
        }

        let gop = u64::from(technical.keyframe_interval) * u64::from(ASSUMED_FRAME_RATE);
        flags.extend(["-g".to_string(), gop.to_string()]);

        if technical.b_frames > 0 {
            flags.extend(["-bf".to_string(), technical.b_frames.to_string()]);
        }

        if technical.audio_codec == AudioCodec::Mp3 {
            flags.extend(["-c:a".to_string(), "libmp3lame".to_string()]);
        }

        flags.extend([
            "-ar".to_string(),
            technical.audio_sample_rate.to_string(),
            "-ac".to_string(),
            technical.audio_channels.to_string(),
        ]);

        if technical.enable_hardware_encoding {
            flags.extend(["-hwaccel".to_string(), "auto".to_string()]);
        }

        flags
    }

    /// Number of enabled boolean options per category.
    pub fn summary(&self) -> Vec<(&'static str, usize)> {
        let document = self.to_value();
        SUMMARY_CATEGORIES
            .iter()
            .map(|(key, label)| {
                let enabled = document
                    .get(key)
                    .and_then(Value::as_object)
                    .map(|options| {
                        options
                            .values()
                            .filter(|value| value.as_bool() == Some(true))
                            .count()
                    })
                    .unwrap_or(0);
                (*label, enabled)
            })
            .collect()
    }

    /// Look up `category.option`.
    pub fn get(&self, key: &str) -> Result<Value, SettingsError> {
        let (category, option) = split_key(key)?;
        self.to_value()
            .get(category)
            .and_then(|options| options.get(option))
            .cloned()
            .ok_or_else(|| SettingsError::UnknownKey(key.to_string()))
    }

    /// Set `category.option` from raw text. The text is read as JSON when it
    /// parses, otherwise as a plain string.
    pub fn set(&mut self, key: &str, raw: &str) -> Result<(), SettingsError> {
        let (category, option) = split_key(key)?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));

        let mut document = self.to_value();
        let slot = document
            .get_mut(category)
            .and_then(|options| options.get_mut(option))
            .ok_or_else(|| SettingsError::UnknownKey(key.to_string()))?;
        *slot = value.clone();

        let updated: Settings =
            serde_json::from_value(document).map_err(|source| SettingsError::InvalidValue {
                key: key.to_string(),
                source,
            })?;
        // Unknown enum strings decode to their fallback; refuse them here instead.
        if updated.get(key)? != value {
            return Err(SettingsError::Rejected {
                key: key.to_string(),
                value: raw.to_string(),
            });
        }
        *self = updated;
        Ok(())
    }

    fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn split_key(key: &str) -> Result<(&str, &str), SettingsError> {
    key.split_once('.')
        .filter(|(category, option)| !category.is_empty() && !option.is_empty())
        .ok_or_else(|| SettingsError::UnknownKey(key.to_string()))
}

/// Owns the settings file and the in-memory document.
#[derive(Debug)]
pub struct SettingsCatalog {
    path: PathBuf,
    settings: Settings,
}

impl SettingsCatalog {
    /// Load the stored document; a missing file yields the defaults.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        let settings = storage::read_json(&path)?.unwrap_or_default();
        Ok(SettingsCatalog { path, settings })
    }

    /// Load the stored document, falling back to the defaults when the file
    /// is missing or unreadable.
    pub fn load_or_default(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match storage::read_json::<Settings>(&path) {
            Ok(settings) => SettingsCatalog {
                settings: settings.unwrap_or_default(),
                path,
            },
            Err(err) => {
                log::warn!("Using default settings: {err}");
                SettingsCatalog {
                    path,
                    settings: Settings::default(),
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn save(&self) -> Result<(), SettingsError> {
        storage::write_json(&self.path, &self.settings)?;
        log::info!("Saved settings to {}", self.path.display());
        Ok(())
    }

    pub fn reset(&mut self) {
        self.settings = Settings::default();
    }

    pub fn export(&self, exported_at: String) -> Result<String, SettingsError> {
        let export = SettingsExport {
            exported_at,
            version: SETTINGS_EXPORT_VERSION.to_string(),
            settings: self.settings.clone(),
        };
        serde_json::to_string_pretty(&export).map_err(|source| SettingsError::InvalidValue {
            key: "settings".to_string(),
            source,
        })
    }

    /// Replace the document with the `settings` of an export file.
    pub fn import(&mut self, json: &str) -> Result<(), SettingsError> {
        let mut document: Value = serde_json::from_str(json)
            .map_err(|err| SettingsError::InvalidImport(err.to_string()))?;
        let settings = document
            .get_mut("settings")
            .map(Value::take)
            .ok_or_else(|| SettingsError::InvalidImport("missing 'settings' key".to_string()))?;
        self.settings = serde_json::from_value(settings)
            .map_err(|err| SettingsError::InvalidImport(err.to_string()))?;
        Ok(())
    }
}
