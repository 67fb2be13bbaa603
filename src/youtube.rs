//! Thin blocking client for the YouTube Data API v3 live endpoints.
//!
//! The platform is an opaque collaborator: requests are built from typed
//! payloads and only the fields this tool reads are decoded from responses.

use crate::constants::{API_TIMEOUT_SECS, YOUTUBE_API_BASE, YOUTUBE_UPLOAD_BASE};
use reqwest::blocking::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastRequest {
    pub snippet: BroadcastSnippet,
    pub status: BroadcastStatus,
    pub content_details: ContentDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastSnippet {
    pub title: String,
    pub description: String,
    pub scheduled_start_time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastStatus {
    pub privacy_status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentDetails {
    pub enable_auto_start: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_auto_stop: Option<bool>,
    pub enable_dvr: bool,
    pub enable_content_encryption: bool,
    pub record_from_start: bool,
    pub enable_embed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitor_stream: Option<MonitorStream>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_preference: Option<LatencyPreference>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStream {
    pub enable_monitor_stream: bool,
    pub broadcast_stream_delay_ms: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LatencyPreference {
    Normal,
    Low,
    UltraLow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamRequest {
    pub snippet: StreamSnippet,
    pub cdn: CdnSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSnippet {
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdnSettings {
    pub format: String,
    pub ingestion_type: String,
}

impl StreamRequest {
    pub fn rtmp_1080p(title: impl Into<String>) -> Self {
        StreamRequest {
            snippet: StreamSnippet {
                title: title.into(),
            },
            cdn: CdnSettings {
                format: "1080p".to_string(),
                ingestion_type: "rtmp".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LiveBroadcast {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LiveStream {
    pub id: String,
    pub cdn: StreamCdn,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamCdn {
    pub ingestion_info: IngestionInfo,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionInfo {
    pub ingestion_address: String,
    pub stream_name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Channel {
    pub id: String,
    pub snippet: ChannelSnippet,
    #[serde(default)]
    pub statistics: ChannelStatistics,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChannelSnippet {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatistics {
    pub subscriber_count: Option<String>,
    pub video_count: Option<String>,
    pub view_count: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChannelList {
    #[serde(default)]
    items: Vec<Channel>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("platform returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid endpoint: {0}")]
    Url(#[from] url::ParseError),
}

/// The platform operations the broadcast workflow depends on.
pub trait LiveApi {
    fn insert_broadcast(&self, request: &BroadcastRequest) -> Result<LiveBroadcast, ApiError>;
    fn insert_stream(&self, request: &StreamRequest) -> Result<LiveStream, ApiError>;
    fn bind_broadcast(&self, broadcast_id: &str, stream_id: &str) -> Result<(), ApiError>;
    fn set_thumbnail(&self, video_id: &str, image: &[u8], mime: &str) -> Result<(), ApiError>;
    fn my_channel(&self) -> Result<Option<Channel>, ApiError>;
}

#[derive(Debug)]
pub struct YouTubeClient {
    http: Client,
    access_token: String,
    api_base: Url,
    upload_base: Url,
}

impl YouTubeClient {
    pub fn new(access_token: impl Into<String>) -> Result<Self, ApiError> {
        Self::with_endpoints(access_token, YOUTUBE_API_BASE, YOUTUBE_UPLOAD_BASE)
    }

    /// Point the client at other base URLs. Bases must end with `/`.
    pub fn with_endpoints(
        access_token: impl Into<String>,
        api_base: &str,
        upload_base: &str,
    ) -> Result<Self, ApiError> {
        Ok(YouTubeClient {
            http: Client::builder()
                .timeout(Duration::from_secs(API_TIMEOUT_SECS))
                .build()?,
            access_token: access_token.into(),
            api_base: Url::parse(api_base)?,
            upload_base: Url::parse(upload_base)?,
        })
    }

    fn endpoint(&self, base: &Url, path: &str, query: &[(&str, &str)]) -> Result<Url, ApiError> {
        let mut url = base.join(path)?;
        url.query_pairs_mut().extend_pairs(query);
        Ok(url)
    }

    fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let response = request.bearer_auth(&self.access_token).send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json()?)
    }
}

impl LiveApi for YouTubeClient {
    fn insert_broadcast(&self, request: &BroadcastRequest) -> Result<LiveBroadcast, ApiError> {
        let url = self.endpoint(
            &self.api_base,
            "liveBroadcasts",
            &[("part", "snippet,status,contentDetails")],
        )?;
        log::debug!("Inserting broadcast '{}'", request.snippet.title);
        self.send(self.http.post(url).json(request))
    }

    fn insert_stream(&self, request: &StreamRequest) -> Result<LiveStream, ApiError> {
        let url = self.endpoint(&self.api_base, "liveStreams", &[("part", "snippet,cdn")])?;
        log::debug!("Inserting stream '{}'", request.snippet.title);
        self.send(self.http.post(url).json(request))
    }

    fn bind_broadcast(&self, broadcast_id: &str, stream_id: &str) -> Result<(), ApiError> {
        let url = self.endpoint(
            &self.api_base,
            "liveBroadcasts/bind",
            &[
                ("part", "id,contentDetails"),
                ("id", broadcast_id),
                ("streamId", stream_id),
            ],
        )?;
        let _: LiveBroadcast = self.send(self.http.post(url))?;
        Ok(())
    }

    fn set_thumbnail(&self, video_id: &str, image: &[u8], mime: &str) -> Result<(), ApiError> {
        let url = self.endpoint(
            &self.upload_base,
            "thumbnails/set",
            &[("videoId", video_id), ("uploadType", "media")],
        )?;
        let request = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, mime)
            .body(image.to_vec());
        let _: serde_json::Value = self.send(request)?;
        Ok(())
    }

    fn my_channel(&self) -> Result<Option<Channel>, ApiError> {
        let url = self.endpoint(
            &self.api_base,
            "channels",
            &[("part", "snippet,statistics"), ("mine", "true")],
        )?;
        let list: ChannelList = self.send(self.http.get(url))?;
        Ok(list.items.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve_once;
    use serde_json::json;

    fn client_for(base: &str) -> YouTubeClient {
        YouTubeClient::with_endpoints("tok-123", base, base).unwrap()
    }

    #[test]
    fn latency_preference_uses_platform_literals() {
        assert_eq!(json!(LatencyPreference::UltraLow), json!("ultraLow"));
        assert_eq!(json!(LatencyPreference::Low), json!("low"));
        assert_eq!(json!(LatencyPreference::Normal), json!("normal"));
    }

    #[test]
    fn broadcast_request_serializes_camel_case_and_skips_unset_fields() {
        let request = BroadcastRequest {
            snippet: BroadcastSnippet {
                title: "T".into(),
                description: "D".into(),
                scheduled_start_time: "2025-07-06T10:00:00+07:00".into(),
            },
            status: BroadcastStatus {
                privacy_status: "public".into(),
            },
            content_details: ContentDetails {
                enable_auto_start: true,
                enable_dvr: true,
                record_from_start: true,
                enable_embed: true,
                ..ContentDetails::default()
            },
        };
        let value = json!(request);
        assert_eq!(value["snippet"]["scheduledStartTime"], "2025-07-06T10:00:00+07:00");
        assert_eq!(value["status"]["privacyStatus"], "public");
        assert_eq!(value["contentDetails"]["enableAutoStart"], true);
        assert!(value["contentDetails"].get("latencyPreference").is_none());
        assert!(value["contentDetails"].get("monitorStream").is_none());
    }

    #[test]
    fn insert_stream_sends_bearer_token_and_reads_ingestion_info() {
        let (base, requests) = serve_once(
            200,
            r#"{"id":"stream-9","cdn":{"ingestionInfo":{"ingestionAddress":"rtmp://x/live2","streamName":"key-9"}}}"#,
        );
        let stream = client_for(&base)
            .insert_stream(&StreamRequest::rtmp_1080p("Show - Stream"))
            .unwrap();
        assert_eq!(stream.id, "stream-9");
        assert_eq!(stream.cdn.ingestion_info.stream_name, "key-9");

        let captured = requests.recv().unwrap();
        assert!(captured
            .request_line
            .starts_with("POST /liveStreams?part=snippet%2Ccdn"));
        assert_eq!(captured.header("authorization"), Some("Bearer tok-123"));
        assert_eq!(captured.json()["cdn"]["ingestionType"], "rtmp");
    }

    #[test]
    fn bind_passes_ids_in_query() {
        let (base, requests) = serve_once(200, r#"{"id":"b-1"}"#);
        client_for(&base).bind_broadcast("b-1", "s-1").unwrap();
        let captured = requests.recv().unwrap();
        assert!(captured.request_line.contains("id=b-1"));
        assert!(captured.request_line.contains("streamId=s-1"));
    }

    #[test]
    fn thumbnail_upload_is_a_media_upload() {
        let (base, requests) = serve_once(200, r#"{"items":[]}"#);
        client_for(&base)
            .set_thumbnail("vid", &[0xff, 0xd8, 0xff], "image/jpeg")
            .unwrap();
        let captured = requests.recv().unwrap();
        assert!(captured.request_line.starts_with("POST /thumbnails/set?"));
        assert!(captured.request_line.contains("videoId=vid"));
        assert!(captured.request_line.contains("uploadType=media"));
        assert_eq!(captured.header("content-type"), Some("image/jpeg"));
        assert_eq!(captured.body, vec![0xff, 0xd8, 0xff]);
    }

    #[test]
    fn error_status_carries_response_body() {
        let (base, _requests) = serve_once(403, r#"{"error":"quotaExceeded"}"#);
        let err = client_for(&base).my_channel().unwrap_err();
        match err {
            ApiError::Status { status, body } => {
                assert_eq!(status, 403);
                assert!(body.contains("quotaExceeded"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn my_channel_returns_first_item_or_none() {
        let (base, _requests) = serve_once(
            200,
            r#"{"items":[{"id":"UC1","snippet":{"title":"Tombo"},"statistics":{"subscriberCount":"10"}}]}"#,
        );
        let channel = client_for(&base).my_channel().unwrap().unwrap();
        assert_eq!(channel.snippet.title, "Tombo");
        assert_eq!(channel.statistics.subscriber_count.as_deref(), Some("10"));

        let (base, _requests) = serve_once(200, r#"{"items":[]}"#);
        assert!(client_for(&base).my_channel().unwrap().is_none());
    }
}
