use crate::broadcast::{Privacy, StreamForm};
use crate::constants::DEFAULT_UTC_OFFSET_HOURS;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Manage YouTube Live broadcasts from the terminal", long_about = None)]
pub struct Cli {
    /// Directory holding sessions, settings, tokens and the quota log.
    #[arg(long = "data-dir", env = "YTLIVE_DATA_DIR", default_value = ".", global = true)]
    pub data_dir: PathBuf,

    /// Session id to work in; defaults to the one remembered in the data directory.
    #[arg(long, env = "YTLIVE_SESSION", global = true)]
    pub session: Option<String>,

    /// Fixed UTC offset in hours used for timestamps and quota keys.
    #[arg(
        long = "utc-offset",
        env = "YTLIVE_UTC_OFFSET",
        default_value_t = DEFAULT_UTC_OFFSET_HOURS,
        allow_negative_numbers = true,
        global = true
    )]
    pub utc_offset: i32,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// OAuth login and credential management.
    Auth {
        #[command(subcommand)]
        command: AuthCommand,
    },
    /// Channel details and configuration.
    Channel {
        #[command(subcommand)]
        command: ChannelCommand,
    },
    /// Create and control the session's live broadcast.
    Stream {
        #[command(subcommand)]
        command: StreamCommand,
    },
    /// Show thumbnail upload quota usage.
    Quota,
    /// Inspect and change the advanced settings.
    Settings {
        #[command(subcommand)]
        command: SettingsCommand,
    },
    /// Inspect, clean up and move session data.
    Session {
        #[command(subcommand)]
        command: SessionCommand,
    },
    /// Session details together with host resource usage.
    Logs,
}

#[derive(Subcommand, Debug)]
pub enum AuthCommand {
    /// Report whether a usable token is stored.
    Status,
    /// Run the browser consent flow and store the token.
    Login,
    /// Call the API with the stored token and show quota costs.
    Test,
    /// Store an OAuth client secret file as the credentials.
    ImportCredentials {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
pub enum ChannelCommand {
    /// Show the authenticated channel.
    Info,
    /// Validate and store a channel configuration JSON file.
    ImportConfig {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
pub enum StreamCommand {
    /// Create a broadcast, its ingest stream and bind them.
    Create(CreateArgs),
    /// Show the active broadcast and streaming state.
    Status,
    /// Mark the active broadcast as streaming.
    Start,
    /// Mark the active broadcast as stopped.
    Stop,
    /// Forget the active broadcast.
    Delete,
    /// List saved stream configurations.
    Configs,
    /// Save the active broadcast's metadata as a stream configuration.
    SaveConfig,
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    #[arg(long)]
    pub title: String,

    #[arg(long, default_value = "")]
    pub description: String,

    #[arg(long, value_enum, default_value_t = Privacy::Public)]
    pub privacy: Privacy,

    #[arg(long, default_value = "Gaming")]
    pub category: String,

    /// Comma-separated tags.
    #[arg(long, value_delimiter = ',')]
    pub tags: Vec<String>,

    #[arg(long, default_value = "en")]
    pub language: String,

    #[arg(long = "no-dvr")]
    pub no_dvr: bool,

    #[arg(long = "no-auto-start")]
    pub no_auto_start: bool,

    #[arg(long = "encrypt")]
    pub encrypt: bool,

    /// RTMP ingest URL to show instead of the platform's.
    #[arg(long = "custom-rtmp", default_value = "")]
    pub custom_rtmp: String,

    /// JPEG or PNG image to upload as the broadcast thumbnail.
    #[arg(long, value_name = "IMAGE")]
    pub thumbnail: Option<PathBuf>,
}

impl From<&CreateArgs> for StreamForm {
    fn from(args: &CreateArgs) -> Self {
        StreamForm {
            title: args.title.clone(),
            description: args.description.clone(),
            privacy: args.privacy,
            category: args.category.clone(),
            tags: args
                .tags
                .iter()
                .map(|tag| tag.trim().to_string())
                .filter(|tag| !tag.is_empty())
                .collect(),
            language: args.language.clone(),
            enable_dvr: !args.no_dvr,
            enable_auto_start: !args.no_auto_start,
            enable_content_encryption: args.encrypt,
            custom_rtmp: args.custom_rtmp.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum SettingsCommand {
    /// Print the whole settings document.
    Show,
    /// Print one option, e.g. `stream_settings.enable_dvr`.
    Get {
        #[arg(value_name = "KEY")]
        key: String,
    },
    /// Change one option. The value is parsed as JSON, falling back to a string.
    Set {
        #[arg(value_name = "KEY")]
        key: String,
        #[arg(value_name = "VALUE", allow_hyphen_values = true)]
        value: String,
    },
    /// Restore the default settings.
    Reset,
    /// Count enabled options per category.
    Summary,
    /// Write a versioned settings snapshot.
    Export {
        #[arg(long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Replace the settings with an exported snapshot.
    Import {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Print the encoder flags derived from the technical settings.
    EncoderFlags,
    /// Send a test event to the webhook.
    TestWebhook {
        /// Webhook to test instead of the configured one.
        #[arg(long)]
        url: Option<String>,
    },
    /// Show the broadcast options the settings would produce.
    ApplyPreview,
}

#[derive(Subcommand, Debug)]
pub enum SessionCommand {
    /// Show a summary of the current session.
    Info,
    /// Remove session records older than the given age.
    Cleanup {
        #[arg(long, default_value_t = 24)]
        hours: u32,
    },
    /// Export the current session record.
    Export {
        #[arg(long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Import an exported session record under its original id.
    Import {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}
