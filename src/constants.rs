//! Centralized constants for file names, limits and format strings.

/// Session table, rewritten on every save.
pub const SESSION_FILE: &str = "live_session.json";

/// Backup copy of the session table, written alongside the primary.
pub const BACKUP_SESSION_FILE: &str = "temp_session.json";

/// Remembers the session id between invocations.
pub const CURRENT_SESSION_FILE: &str = "current_session";

pub const SETTINGS_FILE: &str = "advanced_settings.json";
pub const THUMBNAIL_UPLOAD_LOG: &str = "thumbnail_uploads.json";
pub const TOKEN_FILE: &str = "token.json";
pub const CREDENTIALS_FILE: &str = "credentials.json";
pub const CHANNEL_CONFIG_FILE: &str = "channel_config.json";

/// Session records idle longer than this are dropped on load.
pub const SESSION_TTL_SECS: f64 = 24.0 * 3600.0;

/// Conservative thumbnail upload limits.
pub const DAILY_UPLOAD_LIMIT: u32 = 50;
pub const HOURLY_UPLOAD_LIMIT: u32 = 10;

/// Retention of the quota log.
pub const DAILY_RETENTION_DAYS: i64 = 7;
pub const HOURLY_RETENTION_HOURS: i64 = 24;

/// Quota log keys (YYYY-MM-DD and YYYY-MM-DD-HH).
pub const DAY_KEY_FORMAT: &str = "%Y-%m-%d";
pub const HOUR_KEY_FORMAT: &str = "%Y-%m-%d-%H";

/// Asia/Jakarta, which observes no daylight saving.
pub const DEFAULT_UTC_OFFSET_HOURS: i32 = 7;

/// Frame rate assumed when converting keyframe seconds to a GOP size.
pub const ASSUMED_FRAME_RATE: u32 = 30;

pub const SETTINGS_EXPORT_VERSION: &str = "1.0";

pub const NOTIFY_TIMEOUT_SECS: u64 = 5;
pub const WEBHOOK_TEST_TIMEOUT_SECS: u64 = 10;
pub const API_TIMEOUT_SECS: u64 = 30;

/// How long `auth login` waits for the browser to come back.
pub const LOGIN_TIMEOUT_SECS: u64 = 300;

pub const NOTIFICATION_SOURCE: &str = "youtube_live_stream_manager";
pub const WEBHOOK_TEST_SOURCE: &str = "advanced_settings";

pub const YOUTUBE_SCOPE: &str = "https://www.googleapis.com/auth/youtube.force-ssl";
pub const YOUTUBE_API_BASE: &str = "https://www.googleapis.com/youtube/v3/";
pub const YOUTUBE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/youtube/v3/";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
pub const WATCH_URL_PREFIX: &str = "https://www.youtube.com/watch?v=";

/// Platform API quota, in units per day and per call.
pub const API_DAILY_QUOTA_UNITS: u32 = 10_000;
pub const API_BROADCAST_INSERT_UNITS: u32 = 50;
pub const API_THUMBNAIL_SET_UNITS: u32 = 50;
pub const API_CHANNEL_LIST_UNITS: u32 = 1;
