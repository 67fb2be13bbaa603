pub mod app;
pub mod auth;
pub mod broadcast;
pub mod cli;
pub mod clock;
pub mod constants;
pub mod host;
pub mod notify;
pub mod quota;
pub mod session;
pub mod settings;
pub mod storage;
pub mod youtube;

#[cfg(test)]
mod test_support;

use app::App;
use clap::Parser;
use cli::{Cli, Commands};
use std::path::PathBuf;

#[derive(Debug)]
pub enum AppError {
    InvalidOffset(i32),
    Io { path: PathBuf, source: std::io::Error },
    Output(serde_json::Error),
    NoWebhook,
    Store(storage::StoreError),
    Session(session::SessionError),
    Settings(settings::SettingsError),
    Auth(auth::AuthError),
    Api(youtube::ApiError),
    Broadcast(broadcast::BroadcastError),
    Notify(notify::NotifyError),
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::InvalidOffset(hours) => {
                write!(f, "Invalid UTC offset '{hours}'; use whole hours between -23 and 23")
            }
            AppError::Io { path, source } => write!(f, "{}: {source}", path.display()),
            AppError::Output(err) => write!(f, "Failed to render output: {err}"),
            AppError::NoWebhook => write!(
                f,
                "No webhook configured; set notification_settings.webhook_url or pass --url"
            ),
            AppError::Store(err) => write!(f, "{err}"),
            AppError::Session(err) => write!(f, "{err}"),
            AppError::Settings(err) => write!(f, "{err}"),
            AppError::Auth(err) => write!(f, "{err}"),
            AppError::Api(err) => write!(f, "{err}"),
            AppError::Broadcast(err) => write!(f, "{err}"),
            AppError::Notify(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::InvalidOffset(_) | AppError::NoWebhook => None,
            AppError::Io { source, .. } => Some(source),
            AppError::Output(err) => Some(err),
            AppError::Store(err) => Some(err),
            AppError::Session(err) => Some(err),
            AppError::Settings(err) => Some(err),
            AppError::Auth(err) => Some(err),
            AppError::Api(err) => Some(err),
            AppError::Broadcast(err) => Some(err),
            AppError::Notify(err) => Some(err),
        }
    }
}

macro_rules! from_module_error {
    ($($variant:ident => $error:ty),* $(,)?) => {
        $(
            impl From<$error> for AppError {
                fn from(err: $error) -> Self {
                    AppError::$variant(err)
                }
            }
        )*
    };
}

from_module_error! {
    Store => storage::StoreError,
    Session => session::SessionError,
    Settings => settings::SettingsError,
    Auth => auth::AuthError,
    Api => youtube::ApiError,
    Broadcast => broadcast::BroadcastError,
    Notify => notify::NotifyError,
}

pub fn run() -> Result<(), AppError> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let mut app = App::open(&cli.data_dir, cli.session.clone(), cli.utc_offset)?;
    match cli.command {
        Commands::Auth { command } => app.auth(command),
        Commands::Channel { command } => app.channel(command),
        Commands::Stream { command } => app.stream(command),
        Commands::Quota => app.quota(),
        Commands::Settings { command } => app.settings(command),
        Commands::Session { command } => app.session(command),
        Commands::Logs => app.logs(),
    }
}
