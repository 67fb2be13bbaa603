//! Creating a live broadcast end to end, and the controls for the active one.
//!
//! Creation is a fixed sequence of remote calls: insert the broadcast, insert
//! the stream, bind them, then optionally upload a thumbnail. Nothing is
//! rolled back: when a later step fails, the error names what already exists
//! on the platform so the user can finish or clean up by hand.

use crate::clock;
use crate::constants::WATCH_URL_PREFIX;
use crate::notify::{EventKind, Notifier, NotifyOutcome};
use crate::quota::{QuotaGate, QuotaStatus};
use crate::session::{BroadcastData, SessionError, SessionStore};
use crate::settings::Settings;
use crate::youtube::{
    ApiError, BroadcastRequest, BroadcastSnippet, BroadcastStatus, ContentDetails, LiveApi,
    StreamRequest,
};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Form snapshot name used to recover an unfinished "new stream" form.
pub const NEW_STREAM_FORM: &str = "new_stream_form";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Privacy {
    Public,
    Unlisted,
    Private,
}

impl Privacy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Privacy::Public => "public",
            Privacy::Unlisted => "unlisted",
            Privacy::Private => "private",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamForm {
    pub title: String,
    pub description: String,
    pub privacy: Privacy,
    pub category: String,
    pub tags: Vec<String>,
    pub language: String,
    pub enable_dvr: bool,
    pub enable_auto_start: bool,
    pub enable_content_encryption: bool,
    pub custom_rtmp: String,
}

impl Default for StreamForm {
    fn default() -> Self {
        StreamForm {
            title: String::new(),
            description: String::new(),
            privacy: Privacy::Public,
            category: "Gaming".to_string(),
            tags: Vec::new(),
            language: "en".to_string(),
            enable_dvr: true,
            enable_auto_start: true,
            enable_content_encryption: false,
            custom_rtmp: String::new(),
        }
    }
}

impl StreamForm {
    pub fn validate(&self) -> Result<(), BroadcastError> {
        if self.title.trim().is_empty() {
            return Err(BroadcastError::MissingTitle);
        }
        Ok(())
    }

    /// The creation payload for this form, before settings are applied.
    pub fn broadcast_request(&self, scheduled_start_time: String) -> BroadcastRequest {
        BroadcastRequest {
            snippet: BroadcastSnippet {
                title: self.title.clone(),
                description: self.description.clone(),
                scheduled_start_time,
            },
            status: BroadcastStatus {
                privacy_status: self.privacy.as_str().to_string(),
            },
            content_details: ContentDetails {
                enable_auto_start: self.enable_auto_start,
                enable_dvr: self.enable_dvr,
                enable_content_encryption: self.enable_content_encryption,
                record_from_start: true,
                enable_embed: true,
                ..ContentDetails::default()
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct Thumbnail {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
    pub mime: &'static str,
}

impl Thumbnail {
    pub fn from_path(path: &Path) -> Result<Self, BroadcastError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        let mime = match extension.as_deref() {
            Some("jpg") | Some("jpeg") => "image/jpeg",
            Some("png") => "image/png",
            _ => return Err(BroadcastError::UnsupportedThumbnail(path.to_path_buf())),
        };
        let bytes = fs::read(path).map_err(|source| BroadcastError::ThumbnailFile {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Thumbnail {
            path: path.to_path_buf(),
            bytes,
            mime,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStep {
    CreateBroadcast,
    CreateStream,
    BindStream,
}

impl fmt::Display for RemoteStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RemoteStep::CreateBroadcast => "create broadcast",
            RemoteStep::CreateStream => "create stream",
            RemoteStep::BindStream => "bind stream to broadcast",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ThumbnailOutcome {
    NotRequested,
    /// Thumbnail auto-upload is switched off in the settings.
    Disabled,
    Uploaded(QuotaStatus),
    QuotaExceeded(QuotaStatus),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct BroadcastOutcome {
    pub data: BroadcastData,
    pub thumbnail: ThumbnailOutcome,
    pub notification: Option<NotifyOutcome>,
}

#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    #[error("Stream title is required")]
    MissingTitle,
    #[error("Unsupported thumbnail '{}'; use a .jpg, .jpeg or .png file", .0.display())]
    UnsupportedThumbnail(PathBuf),
    #[error("Cannot read thumbnail {}: {source}", .path.display())]
    ThumbnailFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to {step}: {source}{}", created_note(.broadcast_id, .stream_id))]
    Remote {
        step: RemoteStep,
        broadcast_id: Option<String>,
        stream_id: Option<String>,
        #[source]
        source: ApiError,
    },
    #[error("No active broadcast in this session")]
    NoActiveBroadcast,
    #[error(transparent)]
    Session(#[from] SessionError),
}

fn created_note(broadcast_id: &Option<String>, stream_id: &Option<String>) -> String {
    let mut created = Vec::new();
    if let Some(id) = broadcast_id {
        created.push(format!("broadcast {id}"));
    }
    if let Some(id) = stream_id {
        created.push(format!("stream {id}"));
    }
    if created.is_empty() {
        String::new()
    } else {
        format!(" (already created: {})", created.join(", "))
    }
}

pub struct BroadcastService<'a, A: LiveApi> {
    api: &'a A,
    settings: &'a Settings,
    quota: &'a QuotaGate,
    sessions: &'a mut SessionStore,
    offset: FixedOffset,
}

impl<'a, A: LiveApi> BroadcastService<'a, A> {
    pub fn new(
        api: &'a A,
        settings: &'a Settings,
        quota: &'a QuotaGate,
        sessions: &'a mut SessionStore,
        offset: FixedOffset,
    ) -> Self {
        BroadcastService {
            api,
            settings,
            quota,
            sessions,
            offset,
        }
    }

    fn timestamp(&self) -> String {
        clock::now(self.offset).to_rfc3339()
    }

    pub fn create(
        &mut self,
        form: &StreamForm,
        thumbnail: Option<&Thumbnail>,
    ) -> Result<BroadcastOutcome, BroadcastError> {
        let snapshot = serde_json::to_value(form).unwrap_or(Value::Null);
        self.sessions.save_form_data(NEW_STREAM_FORM, snapshot)?;
        form.validate()?;

        let mut request = form.broadcast_request(self.timestamp());
        self.settings.apply_to_broadcast_request(&mut request);

        let (data, thumbnail_outcome) = match self.create_remote(form, &request, thumbnail) {
            Ok(created) => created,
            Err(err) => {
                self.report_failure(&err);
                return Err(err);
            }
        };

        self.sessions.save_broadcast_data(data.clone())?;
        log::info!(
            "Created broadcast {} bound to stream {}",
            data.broadcast_id,
            data.stream_id
        );

        let notification = self.notify(
            EventKind::StreamStart,
            &format!("Live stream \"{}\" created successfully", data.title),
            serde_json::to_value(&data).ok(),
        );

        self.sessions.save_form_data(NEW_STREAM_FORM, json!({}))?;

        Ok(BroadcastOutcome {
            data,
            thumbnail: thumbnail_outcome,
            notification,
        })
    }

    fn create_remote(
        &self,
        form: &StreamForm,
        request: &BroadcastRequest,
        thumbnail: Option<&Thumbnail>,
    ) -> Result<(BroadcastData, ThumbnailOutcome), BroadcastError> {
        let broadcast = self
            .api
            .insert_broadcast(request)
            .map_err(|source| BroadcastError::Remote {
                step: RemoteStep::CreateBroadcast,
                broadcast_id: None,
                stream_id: None,
                source,
            })?;

        let stream = self
            .api
            .insert_stream(&StreamRequest::rtmp_1080p(format!("{} - Stream", form.title)))
            .map_err(|source| BroadcastError::Remote {
                step: RemoteStep::CreateStream,
                broadcast_id: Some(broadcast.id.clone()),
                stream_id: None,
                source,
            })?;

        self.api
            .bind_broadcast(&broadcast.id, &stream.id)
            .map_err(|source| BroadcastError::Remote {
                step: RemoteStep::BindStream,
                broadcast_id: Some(broadcast.id.clone()),
                stream_id: Some(stream.id.clone()),
                source,
            })?;

        let thumbnail_outcome = match thumbnail {
            Some(thumbnail) => self.upload_thumbnail(&broadcast.id, thumbnail),
            None => ThumbnailOutcome::NotRequested,
        };

        let ingestion = stream.cdn.ingestion_info;
        let rtmp_url = [
            form.custom_rtmp.trim(),
            self.settings.stream_settings.custom_rtmp_url.trim(),
        ]
        .into_iter()
        .find(|url| !url.is_empty())
        .map(str::to_string)
        .unwrap_or(ingestion.ingestion_address);

        let data = BroadcastData {
            watch_url: format!("{WATCH_URL_PREFIX}{}", broadcast.id),
            broadcast_id: broadcast.id,
            stream_id: stream.id,
            title: form.title.clone(),
            description: form.description.clone(),
            privacy: form.privacy.as_str().to_string(),
            rtmp_url,
            stream_key: ingestion.stream_name,
            created_at: self.timestamp(),
        };
        Ok((data, thumbnail_outcome))
    }

    /// Upload a thumbnail if the settings and quota allow it. Failures are
    /// reported in the outcome and never abort the broadcast.
    fn upload_thumbnail(&self, video_id: &str, thumbnail: &Thumbnail) -> ThumbnailOutcome {
        if !self.settings.thumbnail_settings.auto_upload {
            return ThumbnailOutcome::Disabled;
        }
        let status = match self.quota.can_upload() {
            Ok(status) => status,
            Err(err) => {
                log::warn!("Skipping thumbnail upload: {err}");
                return ThumbnailOutcome::Failed(err.to_string());
            }
        };
        if !status.allowed {
            log::warn!(
                "Thumbnail upload quota exceeded ({} today, {} this hour)",
                status.daily_count,
                status.hourly_count
            );
            return ThumbnailOutcome::QuotaExceeded(status);
        }

        if let Err(err) = self
            .api
            .set_thumbnail(video_id, &thumbnail.bytes, thumbnail.mime)
        {
            log::warn!("Failed to upload thumbnail {}: {err}", thumbnail.path.display());
            return ThumbnailOutcome::Failed(err.to_string());
        }
        match self.quota.record_upload() {
            Ok(status) => ThumbnailOutcome::Uploaded(status),
            Err(err) => {
                log::warn!("Thumbnail uploaded but quota log not updated: {err}");
                ThumbnailOutcome::Uploaded(status)
            }
        }
    }

    fn report_failure(&self, err: &BroadcastError) {
        log::error!("{err}");
        self.notify(
            EventKind::Error,
            &format!("Failed to create live stream: {err}"),
            None,
        );
    }

    fn notify(&self, kind: EventKind, message: &str, data: Option<Value>) -> Option<NotifyOutcome> {
        notify_best_effort(self.settings, kind, message, data, self.timestamp())
    }
}

fn notify_best_effort(
    settings: &Settings,
    kind: EventKind,
    message: &str,
    data: Option<Value>,
    timestamp: String,
) -> Option<NotifyOutcome> {
    match Notifier::new(&settings.notification_settings).notify(kind, message, data.as_ref(), timestamp)
    {
        Ok(outcome) => Some(outcome),
        Err(err) => {
            log::warn!("Notification error: {err}");
            None
        }
    }
}

/// Controls for the broadcast recorded in the current session.
pub struct StreamControls<'a> {
    sessions: &'a mut SessionStore,
    settings: &'a Settings,
    offset: FixedOffset,
}

impl<'a> StreamControls<'a> {
    pub fn new(sessions: &'a mut SessionStore, settings: &'a Settings, offset: FixedOffset) -> Self {
        StreamControls {
            sessions,
            settings,
            offset,
        }
    }

    fn active(&self) -> Result<BroadcastData, BroadcastError> {
        self.sessions
            .get_current_broadcast()
            .map(|current| current.data.clone())
            .ok_or(BroadcastError::NoActiveBroadcast)
    }

    /// Mark the active broadcast as streaming.
    pub fn start(&mut self) -> Result<BroadcastData, BroadcastError> {
        let data = self.active()?;
        self.sessions.save_streaming_status(json!({
            "active": true,
            "broadcast_id": data.broadcast_id,
        }))?;
        Ok(data)
    }

    /// Mark the active broadcast as stopped and announce the end.
    pub fn stop(&mut self) -> Result<Option<NotifyOutcome>, BroadcastError> {
        let data = self.active()?;
        self.sessions.save_streaming_status(json!({
            "active": false,
            "broadcast_id": data.broadcast_id,
        }))?;
        Ok(notify_best_effort(
            self.settings,
            EventKind::StreamEnd,
            &format!("Live stream \"{}\" ended", data.title),
            serde_json::to_value(&data).ok(),
            clock::now(self.offset).to_rfc3339(),
        ))
    }

    /// Forget the active broadcast. The platform resources are left alone.
    pub fn delete(&mut self) -> Result<(), BroadcastError> {
        self.sessions.clear_current_broadcast()?;
        Ok(())
    }

    /// Keep the active broadcast's metadata as a reusable stream config.
    pub fn save_config(&mut self) -> Result<Map<String, Value>, BroadcastError> {
        let data = self.active()?;
        let mut fields = Map::new();
        fields.insert("title".into(), Value::String(data.title));
        fields.insert("description".into(), Value::String(data.description));
        fields.insert("privacy".into(), Value::String(data.privacy));
        fields.insert("rtmp_url".into(), Value::String(data.rtmp_url));
        self.sessions.save_stream_config(fields.clone())?;
        Ok(fields)
    }
}
