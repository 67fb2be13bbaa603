//! Command handlers. Each invocation opens the stores once, runs a single
//! command against them and prints the result to stdout.

use crate::auth::{self, AuthError, Authenticator};
use crate::broadcast::{
    BroadcastService, StreamControls, StreamForm, Thumbnail, ThumbnailOutcome,
};
use crate::cli::{AuthCommand, ChannelCommand, SessionCommand, SettingsCommand, StreamCommand};
use crate::clock;
use crate::constants::{
    API_BROADCAST_INSERT_UNITS, API_CHANNEL_LIST_UNITS, API_DAILY_QUOTA_UNITS,
    API_THUMBNAIL_SET_UNITS, CHANNEL_CONFIG_FILE, CREDENTIALS_FILE, DAILY_UPLOAD_LIMIT,
    HOURLY_UPLOAD_LIMIT, SETTINGS_FILE, THUMBNAIL_UPLOAD_LOG, TOKEN_FILE,
};
use crate::host;
use crate::notify::{self, NotifyOutcome};
use crate::quota::{QuotaGate, QuotaLog};
use crate::session::{self, BroadcastData, SessionPaths, SessionStore};
use crate::settings::SettingsCatalog;
use crate::storage;
use crate::youtube::{LiveApi, YouTubeClient};
use crate::AppError;
use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// Form snapshot that mirrors the saved settings document.
const SETTINGS_FORM: &str = "advanced_settings";

pub struct App {
    data_dir: PathBuf,
    offset: FixedOffset,
    sessions: SessionStore,
    catalog: SettingsCatalog,
    quota: QuotaGate,
}

impl App {
    pub fn open(data_dir: &Path, session: Option<String>, utc_offset: i32) -> Result<Self, AppError> {
        let offset =
            clock::offset_from_hours(utc_offset).ok_or(AppError::InvalidOffset(utc_offset))?;
        let session_id = session::resolve_session_id(data_dir, session, &clock::now(offset))?;

        let paths = SessionPaths::in_dir(data_dir);
        let sessions = match SessionStore::open(paths.clone(), session_id.clone(), offset) {
            Ok(store) => store,
            Err(err) => {
                log::warn!("Starting with an empty session table: {err}");
                SessionStore::empty(paths, session_id, offset)
            }
        };

        Ok(App {
            data_dir: data_dir.to_path_buf(),
            offset,
            sessions,
            catalog: SettingsCatalog::load_or_default(data_dir.join(SETTINGS_FILE)),
            quota: QuotaGate::new(data_dir.join(THUMBNAIL_UPLOAD_LOG), offset),
        })
    }

    fn timestamp(&self) -> String {
        clock::now(self.offset).to_rfc3339()
    }

    fn authenticator(&self) -> Result<Authenticator, AppError> {
        Ok(Authenticator::new(
            self.data_dir.join(TOKEN_FILE),
            self.data_dir.join(CREDENTIALS_FILE),
        )?)
    }

    fn client(&self) -> Result<YouTubeClient, AppError> {
        let token = self.authenticator()?.check()?;
        let access_token = token.access_token().ok_or(AuthError::NotAuthenticated)?;
        Ok(YouTubeClient::new(access_token)?)
    }

    pub fn auth(&mut self, command: AuthCommand) -> Result<(), AppError> {
        let authenticator = self.authenticator()?;
        match command {
            AuthCommand::Status => match authenticator.check() {
                Ok(token) => {
                    println!("Authenticated");
                    if let Some(expiry) = token.expiry {
                        println!(
                            "Token expires: {}",
                            expiry.with_timezone(&self.offset).to_rfc3339()
                        );
                    }
                    Ok(())
                }
                Err(AuthError::NotAuthenticated) => {
                    println!("Not authenticated. Run `ytlive auth login` to sign in.");
                    Ok(())
                }
                Err(err) => Err(err.into()),
            },
            AuthCommand::Login => {
                authenticator.login(|url| {
                    println!("Open this URL in your browser to authorize access:");
                    println!("{url}");
                })?;
                println!(
                    "Authentication successful; token saved to {}",
                    authenticator.token_path().display()
                );
                Ok(())
            }
            AuthCommand::Test => {
                match self.client()?.my_channel()? {
                    Some(channel) => println!("API connection OK: {}", channel.snippet.title),
                    None => println!("API connection OK, but this account has no channel"),
                }
                println!("Daily API quota: {API_DAILY_QUOTA_UNITS} units");
                println!("  create broadcast: ~{API_BROADCAST_INSERT_UNITS} units");
                println!("  set thumbnail: ~{API_THUMBNAIL_SET_UNITS} units");
                println!("  channel info: ~{API_CHANNEL_LIST_UNITS} unit");
                Ok(())
            }
            AuthCommand::ImportCredentials { file } => {
                authenticator.import_credentials(&file)?;
                println!(
                    "Credentials saved to {}",
                    self.data_dir.join(CREDENTIALS_FILE).display()
                );
                Ok(())
            }
        }
    }

    pub fn channel(&mut self, command: ChannelCommand) -> Result<(), AppError> {
        match command {
            ChannelCommand::Info => {
                let Some(channel) = self.client()?.my_channel()? else {
                    println!("No channel found for this account");
                    return Ok(());
                };
                let stats = &channel.statistics;
                let hidden = || "hidden".to_string();
                println!("Channel: {}", channel.snippet.title);
                println!("ID: {}", channel.id);
                println!(
                    "Subscribers: {}",
                    stats.subscriber_count.clone().unwrap_or_else(hidden)
                );
                println!("Videos: {}", stats.video_count.clone().unwrap_or_else(hidden));
                println!("Views: {}", stats.view_count.clone().unwrap_or_else(hidden));
                if !channel.snippet.description.is_empty() {
                    println!("Description: {}", channel.snippet.description);
                }
                Ok(())
            }
            ChannelCommand::ImportConfig { file } => {
                let destination = self.data_dir.join(CHANNEL_CONFIG_FILE);
                auth::import_channel_config(&file, &destination)?;
                println!("Channel configuration saved to {}", destination.display());
                Ok(())
            }
        }
    }

    pub fn stream(&mut self, command: StreamCommand) -> Result<(), AppError> {
        match command {
            StreamCommand::Create(args) => {
                let form = StreamForm::from(&args);
                let thumbnail = args
                    .thumbnail
                    .as_deref()
                    .map(Thumbnail::from_path)
                    .transpose()?;
                let client = self.client()?;
                let outcome = BroadcastService::new(
                    &client,
                    self.catalog.settings(),
                    &self.quota,
                    &mut self.sessions,
                    self.offset,
                )
                .create(&form, thumbnail.as_ref())?;

                println!("Live stream created");
                print_broadcast(&outcome.data);
                match outcome.thumbnail {
                    ThumbnailOutcome::NotRequested => {}
                    ThumbnailOutcome::Disabled => {
                        println!("Thumbnail not uploaded: auto upload is disabled")
                    }
                    ThumbnailOutcome::Uploaded(status) => println!(
                        "Thumbnail uploaded ({}/{DAILY_UPLOAD_LIMIT} today, {}/{HOURLY_UPLOAD_LIMIT} this hour)",
                        status.daily_count, status.hourly_count
                    ),
                    ThumbnailOutcome::QuotaExceeded(status) => println!(
                        "Thumbnail not uploaded: quota exceeded ({}/{DAILY_UPLOAD_LIMIT} today, {}/{HOURLY_UPLOAD_LIMIT} this hour)",
                        status.daily_count, status.hourly_count
                    ),
                    ThumbnailOutcome::Failed(reason) => {
                        println!("Thumbnail upload failed: {reason}")
                    }
                }
                Ok(())
            }
            StreamCommand::Status => {
                let restored = self.sessions.restore();
                match restored.broadcast {
                    Some(data) => {
                        print_broadcast(&data);
                        let state = if restored.streaming_active {
                            "live"
                        } else {
                            "not streaming"
                        };
                        println!("Streaming: {state}");
                    }
                    None => println!("No active broadcast"),
                }
                Ok(())
            }
            StreamCommand::Start => {
                let data = self.controls().start()?;
                println!("Streaming started for \"{}\"", data.title);
                println!("Point your encoder at {} with key {}", data.rtmp_url, data.stream_key);
                Ok(())
            }
            StreamCommand::Stop => {
                let notification = self.controls().stop()?;
                println!("Streaming stopped");
                if let Some(NotifyOutcome::Rejected(status)) = notification {
                    println!("Webhook rejected the notification (HTTP {status})");
                }
                Ok(())
            }
            StreamCommand::Delete => {
                self.controls().delete()?;
                println!("Broadcast cleared from this session");
                Ok(())
            }
            StreamCommand::Configs => {
                let configs = self.sessions.get_stream_configs();
                if configs.is_empty() {
                    println!("No saved stream configurations");
                }
                for (index, config) in configs.iter().enumerate() {
                    let title = config
                        .fields
                        .get("title")
                        .and_then(Value::as_str)
                        .unwrap_or("(untitled)");
                    println!("{}. {title} (saved {})", index + 1, config.saved_at);
                }
                Ok(())
            }
            StreamCommand::SaveConfig => {
                let fields = self.controls().save_config()?;
                let title = fields.get("title").and_then(Value::as_str).unwrap_or_default();
                println!("Saved stream configuration \"{title}\"");
                Ok(())
            }
        }
    }

    fn controls(&mut self) -> StreamControls<'_> {
        StreamControls::new(&mut self.sessions, self.catalog.settings(), self.offset)
    }

    pub fn quota(&mut self) -> Result<(), AppError> {
        let status = match self.quota.can_upload() {
            Ok(status) => status,
            Err(err) => {
                log::warn!("Reading quota log failed, assuming no uploads: {err}");
                QuotaLog::default().status_at(&clock::now(self.offset))
            }
        };
        println!(
            "Thumbnail uploads today: {}/{DAILY_UPLOAD_LIMIT}",
            status.daily_count
        );
        println!(
            "Thumbnail uploads this hour: {}/{HOURLY_UPLOAD_LIMIT}",
            status.hourly_count
        );
        println!(
            "Uploads allowed: {}",
            if status.allowed { "yes" } else { "no" }
        );
        Ok(())
    }

    /// Write the settings file and mirror it into the session.
    fn save_settings(&mut self) -> Result<(), AppError> {
        self.catalog.save()?;
        let document = serde_json::to_value(self.catalog.settings()).map_err(AppError::Output)?;
        self.sessions.save_form_data(SETTINGS_FORM, document)?;
        Ok(())
    }

    pub fn settings(&mut self, command: SettingsCommand) -> Result<(), AppError> {
        match command {
            SettingsCommand::Show => println!("{}", to_pretty(self.catalog.settings())?),
            SettingsCommand::Get { key } => {
                println!("{}", display_value(&self.catalog.settings().get(&key)?))
            }
            SettingsCommand::Set { key, value } => {
                self.catalog.settings_mut().set(&key, &value)?;
                self.save_settings()?;
                println!(
                    "{key} = {}",
                    display_value(&self.catalog.settings().get(&key)?)
                );
            }
            SettingsCommand::Reset => {
                self.catalog.reset();
                self.save_settings()?;
                println!("Settings reset to defaults");
            }
            SettingsCommand::Summary => {
                for (label, enabled) in self.catalog.settings().summary() {
                    println!("{label}: {enabled} enabled");
                }
            }
            SettingsCommand::Export { output } => {
                let json = self.catalog.export(self.timestamp())?;
                write_or_print(output.as_deref(), &json)?;
            }
            SettingsCommand::Import { file } => {
                let json = read_file(&file)?;
                self.catalog.import(&json)?;
                self.save_settings()?;
                println!("Settings imported from {}", file.display());
            }
            SettingsCommand::EncoderFlags => {
                println!("{}", self.catalog.settings().build_encoder_flags().join(" "))
            }
            SettingsCommand::TestWebhook { url } => {
                let url = url.unwrap_or_else(|| {
                    self.catalog
                        .settings()
                        .notification_settings
                        .webhook_url
                        .clone()
                });
                if url.trim().is_empty() {
                    return Err(AppError::NoWebhook);
                }
                match notify::test_webhook(url.trim(), self.timestamp())? {
                    NotifyOutcome::Delivered(status) => {
                        println!("Webhook test succeeded (HTTP {status})")
                    }
                    NotifyOutcome::Rejected(status) => {
                        println!("Webhook test failed (HTTP {status})")
                    }
                    other => println!("Webhook test not sent: {other:?}"),
                }
            }
            SettingsCommand::ApplyPreview => {
                let form = StreamForm {
                    title: "Preview".to_string(),
                    ..StreamForm::default()
                };
                let mut request = form.broadcast_request(self.timestamp());
                self.catalog
                    .settings()
                    .apply_to_broadcast_request(&mut request);
                println!("{}", to_pretty(&request.content_details)?);
            }
        }
        Ok(())
    }

    pub fn session(&mut self, command: SessionCommand) -> Result<(), AppError> {
        match command {
            SessionCommand::Info => println!("{}", to_pretty(&self.sessions.info())?),
            SessionCommand::Cleanup { hours } => {
                let removed = self.sessions.cleanup(hours)?;
                println!("Removed {removed} session record(s) older than {hours} hour(s)");
            }
            SessionCommand::Export { output } => {
                let json = self.sessions.export()?;
                write_or_print(output.as_deref(), &json)?;
            }
            SessionCommand::Import { file } => {
                let json = read_file(&file)?;
                let imported = self.sessions.import(&json)?;
                println!("Imported session {imported}");
            }
        }
        Ok(())
    }

    pub fn logs(&mut self) -> Result<(), AppError> {
        let info = self.sessions.info();
        let last_updated = info
            .last_updated
            .and_then(|secs| DateTime::<Utc>::from_timestamp_millis((secs * 1000.0) as i64))
            .map(|at| at.with_timezone(&self.offset).to_rfc3339())
            .unwrap_or_else(|| "never".to_string());

        println!("Session: {}", info.session_id);
        println!("Last updated: {last_updated}");
        println!("Active broadcast: {}", yes_no(info.has_broadcast));
        println!("Streaming status stored: {}", yes_no(info.has_streaming_status));
        println!("Saved stream configs: {}", info.stream_configs_count);
        println!("Saved forms: {}", info.form_data_count);
        println!("Stored sessions: {}", self.sessions.records().len());

        let usage = host::sample();
        println!("CPU usage: {:.1}%", usage.cpu_percent);
        println!(
            "Memory: {} / {} MB ({:.1}%)",
            usage.memory_used_bytes / (1024 * 1024),
            usage.memory_total_bytes / (1024 * 1024),
            usage.memory_percent()
        );
        println!("Process memory: {:.1} MB", usage.process_memory_mb);
        for disk in &usage.disks {
            println!(
                "Disk {}: {:.1} GB free of {:.1} GB",
                disk.mount_point,
                disk.available_bytes as f64 / 1e9,
                disk.total_bytes as f64 / 1e9
            );
        }
        Ok(())
    }
}

fn print_broadcast(data: &BroadcastData) {
    println!("Title: {}", data.title);
    println!("Broadcast ID: {}", data.broadcast_id);
    println!("Stream ID: {}", data.stream_id);
    println!("Privacy: {}", data.privacy);
    println!("Watch URL: {}", data.watch_url);
    println!("RTMP URL: {}", data.rtmp_url);
    println!("Stream key: {}", data.stream_key);
    println!("Created: {}", data.created_at);
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

/// Strings print bare; everything else prints as compact JSON.
fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn to_pretty<T: Serialize + ?Sized>(value: &T) -> Result<String, AppError> {
    serde_json::to_string_pretty(value).map_err(AppError::Output)
}

fn read_file(path: &Path) -> Result<String, AppError> {
    fs::read_to_string(path).map_err(|source| AppError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write_or_print(output: Option<&Path>, contents: &str) -> Result<(), AppError> {
    match output {
        Some(path) => {
            storage::write_text(path, contents)?;
            println!("Exported to {}", path.display());
        }
        None => println!("{contents}"),
    }
    Ok(())
}
