//! Per-session bookkeeping: the active broadcast, saved stream configs,
//! streaming status and form snapshots, keyed by session id.
//!
//! The whole table lives in one JSON file (plus a backup copy) and is
//! rewritten on every save. Records idle for more than 24 hours are dropped
//! when the table is loaded.

use crate::clock;
use crate::constants::{
    BACKUP_SESSION_FILE, CURRENT_SESSION_FILE, SESSION_FILE, SESSION_TTL_SECS,
};
use crate::storage::{self, StoreError};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub type SessionTable = BTreeMap<String, SessionRecord>;

/// What the platform handed back for a freshly created broadcast.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastData {
    pub broadcast_id: String,
    pub stream_id: String,
    pub title: String,
    pub description: String,
    pub privacy: String,
    pub rtmp_url: String,
    pub stream_key: String,
    pub watch_url: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentBroadcast {
    pub data: BroadcastData,
    pub created_at: String,
    pub status: String,
}

/// A saved stream configuration. Arbitrary fields are kept as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    #[serde(default)]
    pub saved_at: String,
    #[serde(default)]
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingStatus {
    pub status: Value,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormSnapshot {
    pub data: Value,
    pub saved_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    #[serde(default)]
    pub session_id: String,
    /// Unix seconds of the last save.
    #[serde(default)]
    pub last_updated: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_broadcast: Option<CurrentBroadcast>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stream_configs: Vec<StreamConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streaming_status: Option<StreamingStatus>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub form_data: BTreeMap<String, FormSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionExport {
    pub session_id: String,
    pub exported_at: String,
    pub data: SessionRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub last_updated: Option<f64>,
    pub has_broadcast: bool,
    pub stream_configs_count: usize,
    pub has_streaming_status: bool,
    pub form_data_count: usize,
}

/// State recovered from the table at the start of an interaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestoredState {
    pub broadcast: Option<BroadcastData>,
    pub streaming_active: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Session '{0}' has no stored data")]
    NoRecord(String),
    #[error("Invalid session export: {0}")]
    InvalidExport(#[source] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct SessionPaths {
    pub primary: PathBuf,
    pub backup: PathBuf,
}

impl SessionPaths {
    pub fn in_dir(dir: &Path) -> Self {
        SessionPaths {
            primary: dir.join(SESSION_FILE),
            backup: dir.join(BACKUP_SESSION_FILE),
        }
    }
}

/// Load the table, dropping records idle for more than 24 hours at `now`.
pub fn load_table(path: &Path, now: &DateTime<FixedOffset>) -> Result<SessionTable, StoreError> {
    let table: SessionTable = storage::read_json(path)?.unwrap_or_default();
    let now_secs = clock::unix_seconds(now);
    Ok(table
        .into_iter()
        .filter(|(_, record)| now_secs - record.last_updated < SESSION_TTL_SECS)
        .collect())
}

/// Pick the session id for this invocation: an explicit id wins, then the
/// id remembered in the data directory, then a freshly generated one.
pub fn resolve_session_id(
    data_dir: &Path,
    explicit: Option<String>,
    now: &DateTime<FixedOffset>,
) -> Result<String, StoreError> {
    if let Some(id) = explicit.filter(|id| !id.trim().is_empty()) {
        return Ok(id);
    }
    let marker = data_dir.join(CURRENT_SESSION_FILE);
    match fs::read_to_string(&marker) {
        Ok(contents) if !contents.trim().is_empty() => return Ok(contents.trim().to_string()),
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(source) => return Err(StoreError::Io { path: marker, source }),
    }
    let id = format!("session_{}_{}", now.timestamp(), uuid::Uuid::new_v4().simple());
    storage::write_text(&marker, &id)?;
    log::info!("Started new session {id}");
    Ok(id)
}

pub struct SessionStore {
    paths: SessionPaths,
    session_id: String,
    offset: FixedOffset,
    records: SessionTable,
}

impl SessionStore {
    /// Open the store for `session_id`, loading every live record.
    pub fn open(
        paths: SessionPaths,
        session_id: impl Into<String>,
        offset: FixedOffset,
    ) -> Result<Self, SessionError> {
        let records = load_table(&paths.primary, &clock::now(offset))?;
        Ok(SessionStore {
            paths,
            session_id: session_id.into(),
            offset,
            records,
        })
    }

    /// A store with an empty table, used when the stored table is unreadable.
    pub fn empty(paths: SessionPaths, session_id: impl Into<String>, offset: FixedOffset) -> Self {
        SessionStore {
            paths,
            session_id: session_id.into(),
            offset,
            records: SessionTable::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn records(&self) -> &SessionTable {
        &self.records
    }

    pub fn record(&self, session_id: &str) -> Option<&SessionRecord> {
        self.records.get(session_id)
    }

    fn current(&self) -> Option<&SessionRecord> {
        self.records.get(&self.session_id)
    }

    fn current_mut(&mut self) -> &mut SessionRecord {
        self.records.entry(self.session_id.clone()).or_default()
    }

    fn timestamp(&self) -> String {
        clock::now(self.offset).to_rfc3339()
    }

    /// Stamp the current record and write the whole table to the primary
    /// file and the backup.
    pub fn save(&mut self) -> Result<(), SessionError> {
        let now = clock::unix_seconds(&clock::now(self.offset));
        let session_id = self.session_id.clone();
        let record = self.current_mut();
        record.last_updated = now;
        record.session_id = session_id;

        storage::write_json(&self.paths.primary, &self.records)?;
        storage::write_json(&self.paths.backup, &self.records)?;
        log::debug!(
            "Saved {} session record(s) to {}",
            self.records.len(),
            self.paths.primary.display()
        );
        Ok(())
    }

    pub fn save_broadcast_data(&mut self, data: BroadcastData) -> Result<(), SessionError> {
        let created_at = self.timestamp();
        self.current_mut().current_broadcast = Some(CurrentBroadcast {
            data,
            created_at,
            status: "created".to_string(),
        });
        self.save()
    }

    pub fn get_current_broadcast(&self) -> Option<&CurrentBroadcast> {
        self.current()?.current_broadcast.as_ref()
    }

    pub fn clear_current_broadcast(&mut self) -> Result<(), SessionError> {
        if let Some(record) = self.records.get_mut(&self.session_id) {
            record.current_broadcast = None;
            self.save()?;
        }
        Ok(())
    }

    pub fn save_stream_config(&mut self, fields: Map<String, Value>) -> Result<(), SessionError> {
        let config = StreamConfig {
            fields,
            saved_at: self.timestamp(),
            session_id: self.session_id.clone(),
        };
        self.current_mut().stream_configs.push(config);
        self.save()
    }

    pub fn get_stream_configs(&self) -> &[StreamConfig] {
        self.current()
            .map(|record| record.stream_configs.as_slice())
            .unwrap_or_default()
    }

    pub fn save_streaming_status(&mut self, status: Value) -> Result<(), SessionError> {
        let updated_at = self.timestamp();
        self.current_mut().streaming_status = Some(StreamingStatus { status, updated_at });
        self.save()
    }

    pub fn get_streaming_status(&self) -> Option<&StreamingStatus> {
        self.current()?.streaming_status.as_ref()
    }

    pub fn save_form_data(&mut self, form_name: &str, data: Value) -> Result<(), SessionError> {
        let saved_at = self.timestamp();
        self.current_mut()
            .form_data
            .insert(form_name.to_string(), FormSnapshot { data, saved_at });
        self.save()
    }

    pub fn get_form_data(&self, form_name: &str) -> Option<&Value> {
        self.current()?
            .form_data
            .get(form_name)
            .map(|snapshot| &snapshot.data)
    }

    pub fn restore(&self) -> RestoredState {
        RestoredState {
            broadcast: self.get_current_broadcast().map(|current| current.data.clone()),
            streaming_active: self
                .get_streaming_status()
                .and_then(|status| status.status.get("active"))
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }
    }

    pub fn info(&self) -> SessionInfo {
        match self.current() {
            Some(record) => SessionInfo {
                session_id: self.session_id.clone(),
                last_updated: Some(record.last_updated),
                has_broadcast: record.current_broadcast.is_some(),
                stream_configs_count: record.stream_configs.len(),
                has_streaming_status: record.streaming_status.is_some(),
                form_data_count: record.form_data.len(),
            },
            None => SessionInfo {
                session_id: self.session_id.clone(),
                last_updated: None,
                has_broadcast: false,
                stream_configs_count: 0,
                has_streaming_status: false,
                form_data_count: 0,
            },
        }
    }

    /// Drop records not updated within `older_than_hours` and return how many
    /// were removed. Saving afterwards recreates the current session's record.
    pub fn cleanup(&mut self, older_than_hours: u32) -> Result<usize, SessionError> {
        let cutoff =
            clock::unix_seconds(&clock::now(self.offset)) - f64::from(older_than_hours) * 3600.0;
        let before = self.records.len();
        self.records.retain(|_, record| record.last_updated >= cutoff);
        let removed = before - self.records.len();
        self.save()?;
        log::info!("Removed {removed} session record(s) older than {older_than_hours}h");
        Ok(removed)
    }

    pub fn export(&self) -> Result<String, SessionError> {
        let record = self
            .current()
            .ok_or_else(|| SessionError::NoRecord(self.session_id.clone()))?;
        let export = SessionExport {
            session_id: self.session_id.clone(),
            exported_at: self.timestamp(),
            data: record.clone(),
        };
        serde_json::to_string_pretty(&export).map_err(SessionError::InvalidExport)
    }

    /// Store an exported record under its original id and return that id.
    /// The record counts as updated now, so the expiry window restarts.
    pub fn import(&mut self, json: &str) -> Result<String, SessionError> {
        let export: SessionExport =
            serde_json::from_str(json).map_err(SessionError::InvalidExport)?;
        let imported_id = export.session_id.clone();
        let mut record = export.data;
        record.last_updated = clock::unix_seconds(&clock::now(self.offset));
        self.records.insert(imported_id.clone(), record);
        self.save()?;
        Ok(imported_id)
    }
}
