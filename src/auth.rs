//! OAuth for the YouTube Data API: stored-token checks and refresh, the
//! installed-app consent flow over a loopback redirect, and credential
//! file imports.

use crate::constants::{DEFAULT_AUTH_URI, DEFAULT_TOKEN_URI, LOGIN_TIMEOUT_SECS, YOUTUBE_SCOPE};
use crate::storage::{self, StoreError};
use chrono::{DateTime, Duration, Utc};
use hyper::service::{make_service_fn, service_fn};
use hyper::{header, Body, Request, Response, Server, StatusCode};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::convert::Infallible;
use std::io;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use url::Url;

/// Tokens this close to expiry are treated as expired.
const EXPIRY_SKEW_SECS: i64 = 60;

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// One client entry of a Google client-secret document.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClientConfig {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ClientSecretFile {
    installed: Option<ClientConfig>,
    web: Option<ClientConfig>,
}

impl ClientSecretFile {
    fn into_config(self) -> Option<ClientConfig> {
        self.installed.or(self.web)
    }
}

/// The authorized-user document kept in `token.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredToken {
    pub token: Option<String>,
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub expiry: Option<DateTime<Utc>>,
}

impl StoredToken {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.token.is_some()
            && self
                .expiry
                .map_or(true, |expiry| expiry > now + Duration::seconds(EXPIRY_SKEW_SECS))
    }

    pub fn access_token(&self) -> Option<&str> {
        self.token.as_deref()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Not authenticated; run `ytlive auth login` first")]
    NotAuthenticated,
    #[error("{} not found; import OAuth credentials first", .0.display())]
    MissingCredentials(PathBuf),
    #[error("Invalid OAuth credentials: {0}")]
    InvalidCredentials(String),
    #[error("Token endpoint returned HTTP {status}: {body}")]
    TokenEndpoint { status: u16, body: String },
    #[error("Authorization callback failed: {0}")]
    Callback(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("Callback server failed: {0}")]
    Server(#[from] hyper::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub struct Authenticator {
    token_path: PathBuf,
    credentials_path: PathBuf,
    http: Client,
}

impl Authenticator {
    pub fn new(token_path: PathBuf, credentials_path: PathBuf) -> Result<Self, AuthError> {
        Ok(Authenticator {
            token_path,
            credentials_path,
            http: Client::builder().build()?,
        })
    }

    pub fn token_path(&self) -> &Path {
        &self.token_path
    }

    /// Return a usable token, refreshing and re-saving it when it expired.
    pub fn check(&self) -> Result<StoredToken, AuthError> {
        let token: StoredToken =
            storage::read_json(&self.token_path)?.ok_or(AuthError::NotAuthenticated)?;
        if token.is_valid_at(Utc::now()) {
            return Ok(token);
        }
        if token.refresh_token.is_none() {
            return Err(AuthError::NotAuthenticated);
        }
        log::info!("Access token expired; refreshing");
        let refreshed = self.refresh(token)?;
        storage::write_json(&self.token_path, &refreshed)?;
        Ok(refreshed)
    }

    fn refresh(&self, token: StoredToken) -> Result<StoredToken, AuthError> {
        let refresh_token = token
            .refresh_token
            .as_deref()
            .ok_or(AuthError::NotAuthenticated)?;
        let response = self.exchange(
            &token.token_uri,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", &token.client_id),
                ("client_secret", &token.client_secret),
            ],
        )?;
        Ok(StoredToken {
            token: Some(response.access_token),
            refresh_token: response.refresh_token.or(token.refresh_token),
            expiry: response
                .expires_in
                .map(|secs| Utc::now() + Duration::seconds(secs)),
            ..token
        })
    }

    fn exchange(&self, token_uri: &str, form: &[(&str, &str)]) -> Result<TokenResponse, AuthError> {
        let response = self.http.post(token_uri).form(form).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::TokenEndpoint {
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            });
        }
        Ok(response.json()?)
    }

    fn client_config(&self) -> Result<ClientConfig, AuthError> {
        let file: ClientSecretFile = storage::read_json(&self.credentials_path)?
            .ok_or_else(|| AuthError::MissingCredentials(self.credentials_path.clone()))?;
        file.into_config().ok_or_else(|| {
            AuthError::InvalidCredentials("expected an 'installed' or 'web' client".to_string())
        })
    }

    /// Run the installed-app consent flow. `announce` receives the consent
    /// URL to show the user; the call blocks until the browser redirects back.
    pub fn login(&self, announce: impl FnOnce(&Url)) -> Result<StoredToken, AuthError> {
        let client = self.client_config()?;
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let redirect_uri = format!("http://{}/", listener.local_addr()?);
        let state = uuid::Uuid::new_v4().simple().to_string();

        let consent = consent_url(&client, &redirect_uri, &state)?;
        announce(&consent);

        let code = wait_for_code(
            listener,
            &state,
            std::time::Duration::from_secs(LOGIN_TIMEOUT_SECS),
        )?;

        let response = self.exchange(
            &client.token_uri,
            &[
                ("grant_type", "authorization_code"),
                ("code", &code),
                ("client_id", &client.client_id),
                ("client_secret", &client.client_secret),
                ("redirect_uri", &redirect_uri),
            ],
        )?;
        let token = StoredToken {
            token: Some(response.access_token),
            refresh_token: response.refresh_token,
            token_uri: client.token_uri,
            client_id: client.client_id,
            client_secret: client.client_secret,
            scopes: vec![YOUTUBE_SCOPE.to_string()],
            expiry: response
                .expires_in
                .map(|secs| Utc::now() + Duration::seconds(secs)),
        };
        storage::write_json(&self.token_path, &token)?;
        log::info!("Saved OAuth token to {}", self.token_path.display());
        Ok(token)
    }

    /// Validate a client-secret document and store it as the credentials file.
    pub fn import_credentials(&self, source: &Path) -> Result<(), AuthError> {
        let document: Value = storage::require_json(source)?;
        serde_json::from_value::<ClientSecretFile>(document.clone())
            .ok()
            .and_then(ClientSecretFile::into_config)
            .ok_or_else(|| {
                AuthError::InvalidCredentials(
                    "expected an 'installed' or 'web' client with id and secret".to_string(),
                )
            })?;
        storage::write_json(&self.credentials_path, &document)?;
        Ok(())
    }
}

/// Validate a channel configuration document and store it at `destination`.
pub fn import_channel_config(source: &Path, destination: &Path) -> Result<Value, StoreError> {
    let document: Value = storage::require_json(source)?;
    storage::write_json(destination, &document)?;
    Ok(document)
}

fn consent_url(client: &ClientConfig, redirect_uri: &str, state: &str) -> Result<Url, AuthError> {
    let mut url = Url::parse(&client.auth_uri)?;
    url.query_pairs_mut()
        .append_pair("client_id", &client.client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("response_type", "code")
        .append_pair("scope", YOUTUBE_SCOPE)
        .append_pair("access_type", "offline")
        .append_pair("prompt", "consent")
        .append_pair("state", state);
    Ok(url)
}

/// Serve the loopback redirect until a request carries the consent result.
/// Requests without one (favicons, speculative connections) get a 404 and the
/// wait continues.
fn wait_for_code(
    listener: TcpListener,
    state: &str,
    timeout: std::time::Duration,
) -> Result<String, AuthError> {
    listener.set_nonblocking(true)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let state = state.to_string();

    runtime.block_on(async move {
        let (tx, mut rx) = mpsc::channel::<Result<String, AuthError>>(1);
        let shutdown = Arc::new(Notify::new());

        let make_service = make_service_fn(move |_conn| {
            let tx = tx.clone();
            let state = state.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |request: Request<Body>| {
                    let tx = tx.clone();
                    let outcome = parse_callback(request.uri().query(), &state);
                    async move {
                        let Some(outcome) = outcome else {
                            return Response::builder()
                                .status(StatusCode::NOT_FOUND)
                                .body(Body::empty());
                        };
                        let page = match &outcome {
                            Ok(_) => "Authentication complete. You can close this window.",
                            Err(_) => "Authentication failed. Return to the terminal for details.",
                        };
                        let _ = tx.send(outcome).await;
                        Response::builder()
                            .header(header::CONTENT_TYPE, "text/plain")
                            .header(header::CONNECTION, "close")
                            .body(Body::from(page))
                    }
                }))
            }
        });

        let stop = shutdown.clone();
        let server = Server::from_tcp(listener)?
            .http1_only(true)
            .serve(make_service)
            .with_graceful_shutdown(async move { stop.notified().await });
        let server = tokio::spawn(server);

        let received = tokio::time::timeout(timeout, rx.recv()).await;
        shutdown.notify_one();
        match tokio::time::timeout(std::time::Duration::from_secs(5), server).await {
            Ok(Ok(Err(err))) => log::warn!("Callback server stopped with an error: {err}"),
            Err(_) => log::debug!("Callback server did not drain in time"),
            _ => {}
        }

        match received {
            Ok(Some(outcome)) => outcome,
            Ok(None) => Err(AuthError::Callback("callback server stopped".to_string())),
            Err(_) => Err(AuthError::Callback(
                "timed out waiting for the browser redirect".to_string(),
            )),
        }
    })
}

/// Read the consent result from a redirect query. `None` means the request
/// carries no result at all.
fn parse_callback(query: Option<&str>, state: &str) -> Option<Result<String, AuthError>> {
    let mut code = None;
    let mut returned_state = None;
    let mut error = None;
    for (key, value) in url::form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => returned_state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }
    if code.is_none() && error.is_none() && returned_state.is_none() {
        return None;
    }
    if let Some(error) = error {
        return Some(Err(AuthError::Callback(error)));
    }
    if returned_state.as_deref() != Some(state) {
        return Some(Err(AuthError::Callback("state mismatch".to_string())));
    }
    Some(code.ok_or_else(|| AuthError::Callback("no authorization code".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve_once;
    use assert_fs::prelude::*;

    fn token(expiry: Option<DateTime<Utc>>, refresh: Option<&str>, token_uri: &str) -> StoredToken {
        StoredToken {
            token: Some("old-access".into()),
            refresh_token: refresh.map(str::to_string),
            token_uri: token_uri.into(),
            client_id: "cid".into(),
            client_secret: "secret".into(),
            scopes: vec![YOUTUBE_SCOPE.into()],
            expiry,
        }
    }

    fn authenticator(temp: &assert_fs::TempDir) -> Authenticator {
        Authenticator::new(
            temp.path().join("token.json"),
            temp.path().join("credentials.json"),
        )
        .unwrap()
    }

    #[test]
    fn validity_honours_expiry_with_skew() {
        let now = Utc::now();
        assert!(token(None, None, DEFAULT_TOKEN_URI).is_valid_at(now));
        assert!(token(Some(now + Duration::minutes(10)), None, DEFAULT_TOKEN_URI).is_valid_at(now));
        assert!(!token(Some(now + Duration::seconds(30)), None, DEFAULT_TOKEN_URI).is_valid_at(now));
        assert!(!token(Some(now - Duration::hours(1)), None, DEFAULT_TOKEN_URI).is_valid_at(now));
    }

    #[test]
    fn check_without_token_is_not_authenticated() {
        let temp = assert_fs::TempDir::new().unwrap();
        assert!(matches!(
            authenticator(&temp).check(),
            Err(AuthError::NotAuthenticated)
        ));
    }

    #[test]
    fn expired_token_without_refresh_is_not_authenticated() {
        let temp = assert_fs::TempDir::new().unwrap();
        let auth = authenticator(&temp);
        let stale = token(Some(Utc::now() - Duration::hours(2)), None, DEFAULT_TOKEN_URI);
        storage::write_json(auth.token_path(), &stale).unwrap();
        assert!(matches!(auth.check(), Err(AuthError::NotAuthenticated)));
    }

    #[test]
    fn expired_token_is_refreshed_and_saved() {
        let temp = assert_fs::TempDir::new().unwrap();
        let auth = authenticator(&temp);
        let (base, requests) =
            serve_once(200, r#"{"access_token":"new-access","expires_in":3599}"#);
        let stale = token(
            Some(Utc::now() - Duration::hours(2)),
            Some("refresh-1"),
            &format!("{base}token"),
        );
        storage::write_json(auth.token_path(), &stale).unwrap();

        let refreshed = auth.check().unwrap();
        assert_eq!(refreshed.access_token(), Some("new-access"));
        assert_eq!(refreshed.refresh_token.as_deref(), Some("refresh-1"));
        assert!(refreshed.is_valid_at(Utc::now()));

        let saved: StoredToken = storage::require_json(auth.token_path()).unwrap();
        assert_eq!(saved, refreshed);

        let body = String::from_utf8(requests.recv().unwrap().body).unwrap();
        assert!(body.contains("grant_type=refresh_token"));
        assert!(body.contains("refresh_token=refresh-1"));
    }

    #[test]
    fn refresh_failure_surfaces_endpoint_status() {
        let temp = assert_fs::TempDir::new().unwrap();
        let auth = authenticator(&temp);
        let (base, _requests) = serve_once(400, r#"{"error":"invalid_grant"}"#);
        let stale = token(
            Some(Utc::now() - Duration::hours(2)),
            Some("revoked"),
            &format!("{base}token"),
        );
        storage::write_json(auth.token_path(), &stale).unwrap();
        assert!(matches!(
            auth.check(),
            Err(AuthError::TokenEndpoint { status: 400, .. })
        ));
    }

    #[test]
    fn import_credentials_requires_a_client_entry() {
        let temp = assert_fs::TempDir::new().unwrap();
        let auth = authenticator(&temp);
        let bogus = temp.child("bogus.json");
        bogus.write_str(r#"{"something":"else"}"#).unwrap();
        assert!(matches!(
            auth.import_credentials(bogus.path()),
            Err(AuthError::InvalidCredentials(_))
        ));

        let good = temp.child("client_secret.json");
        good.write_str(r#"{"installed":{"client_id":"cid","client_secret":"s"}}"#)
            .unwrap();
        auth.import_credentials(good.path()).unwrap();
        let config = auth.client_config().unwrap();
        assert_eq!(config.client_id, "cid");
        assert_eq!(config.token_uri, DEFAULT_TOKEN_URI);
    }

    #[test]
    fn login_without_credentials_fails_early() {
        let temp = assert_fs::TempDir::new().unwrap();
        let result = authenticator(&temp).login(|_| panic!("should not announce"));
        assert!(matches!(result, Err(AuthError::MissingCredentials(_))));
    }

    #[test]
    fn consent_url_carries_scope_and_state() {
        let client = ClientConfig {
            client_id: "cid".into(),
            client_secret: "s".into(),
            auth_uri: DEFAULT_AUTH_URI.into(),
            token_uri: DEFAULT_TOKEN_URI.into(),
        };
        let url = consent_url(&client, "http://127.0.0.1:5000/", "xyz").unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("scope".into(), YOUTUBE_SCOPE.into())));
        assert!(pairs.contains(&("state".into(), "xyz".into())));
        assert!(pairs.contains(&("access_type".into(), "offline".into())));
    }

    #[test]
    fn callback_parsing_checks_state_and_errors() {
        assert_eq!(
            parse_callback(Some("state=xyz&code=4%2Fabc"), "xyz")
                .unwrap()
                .unwrap(),
            "4/abc"
        );
        assert!(matches!(
            parse_callback(Some("state=other&code=abc"), "xyz"),
            Some(Err(AuthError::Callback(_)))
        ));
        assert!(matches!(
            parse_callback(Some("error=access_denied"), "xyz"),
            Some(Err(AuthError::Callback(_)))
        ));
        assert!(parse_callback(None, "xyz").is_none());
        assert!(parse_callback(Some("utm=1"), "xyz").is_none());
    }

    #[test]
    fn redirect_wait_skips_stray_requests() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());

        let browser = std::thread::spawn(move || {
            // An idle connection that never sends a request.
            let _idle = std::net::TcpStream::connect(base.trim_start_matches("http://")).unwrap();
            let client = Client::new();
            let favicon = client.get(format!("{base}/favicon.ico")).send().unwrap();
            assert_eq!(favicon.status(), reqwest::StatusCode::NOT_FOUND);
            let redirect = client
                .get(format!("{base}/?state=xyz&code=4%2Fabc&scope=youtube"))
                .send()
                .unwrap();
            assert_eq!(redirect.status(), reqwest::StatusCode::OK);
            assert!(redirect.text().unwrap().contains("Authentication complete"));
        });

        let code = wait_for_code(listener, "xyz", std::time::Duration::from_secs(10)).unwrap();
        assert_eq!(code, "4/abc");
        browser.join().unwrap();
    }

    #[test]
    fn redirect_wait_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let result = wait_for_code(listener, "xyz", std::time::Duration::from_millis(50));
        assert!(matches!(result, Err(AuthError::Callback(message)) if message.contains("timed out")));
    }

    #[test]
    fn channel_config_must_be_json() {
        let temp = assert_fs::TempDir::new().unwrap();
        let source = temp.child("channels.json");
        source.write_str(r#"{"channels":[{"name":"Tombo"}]}"#).unwrap();
        let destination = temp.path().join("channel_config.json");
        import_channel_config(source.path(), &destination).unwrap();
        assert!(destination.exists());

        let broken = temp.child("broken.json");
        broken.write_str("nope").unwrap();
        assert!(matches!(
            import_channel_config(broken.path(), &destination),
            Err(StoreError::Malformed { .. })
        ));
    }
}
