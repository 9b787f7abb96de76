use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the pageviews binary.
#[derive(Debug, Parser)]
#[command(name = "pageviews", version, about = "Page view counters backed by Redis")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "PAGEVIEWS_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub store: StoreOverrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP API.
    Serve(Box<ServeArgs>),
    /// Read or record view counts from the command line.
    Views(ViewsArgs),
    /// Print the local visitor id, creating it on first use.
    Visitor(VisitorArgs),
}

/// Connection overrides shared by every command. Each flag also reads the
/// conventional `REDIS_*` environment variable.
#[derive(Debug, Args, Default, Clone)]
pub struct StoreOverrides {
    /// Override the store backend (redis|memory).
    #[arg(long = "store-backend", value_name = "BACKEND", global = true)]
    pub backend: Option<String>,

    /// Override the Redis host.
    #[arg(long = "redis-host", env = "REDIS_HOST", value_name = "HOST", global = true)]
    pub host: Option<String>,

    /// Override the Redis port.
    #[arg(long = "redis-port", env = "REDIS_PORT", value_name = "PORT", global = true)]
    pub port: Option<u16>,

    /// Override the Redis ACL username.
    #[arg(
        long = "redis-username",
        env = "REDIS_USERNAME",
        value_name = "USER",
        global = true
    )]
    pub username: Option<String>,

    /// Override the Redis password.
    #[arg(
        long = "redis-password",
        env = "REDIS_PASSWORD",
        value_name = "PASSWORD",
        hide_env_values = true,
        global = true
    )]
    pub password: Option<String>,

    /// Connect to Redis over TLS.
    #[arg(
        long = "redis-tls",
        env = "REDIS_TLS",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub tls: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override how long rendered counts stay fresh; zero disables caching.
    #[arg(long = "revalidate-window-seconds", value_name = "SECONDS")]
    pub revalidate_window_seconds: Option<u64>,

    /// Toggle repeat-view suppression.
    #[arg(
        long = "dedup-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub dedup_enabled: Option<bool>,

    /// Override the repeat-view suppression window.
    #[arg(long = "dedup-window-seconds", value_name = "SECONDS")]
    pub dedup_window_seconds: Option<u64>,
}

#[derive(Debug, Args, Clone)]
pub struct ViewsArgs {
    #[command(subcommand)]
    pub command: ViewsCommand,
}

#[derive(Debug, Subcommand, Clone)]
pub enum ViewsCommand {
    /// Print the current count of one or more items.
    Get(ViewsGetArgs),
    /// Count one view of an item.
    Record(ViewsRecordArgs),
}

#[derive(Debug, Args, Clone)]
pub struct ViewsGetArgs {
    /// Content category; defaults to the first configured category.
    #[arg(long, value_name = "CATEGORY")]
    pub category: Option<String>,

    /// Ignore the revalidation window and read the store directly.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub fresh: bool,

    /// Emit one JSON object per line instead of a table.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub json: bool,

    /// Item slugs to read.
    #[arg(value_name = "SLUG", required = true, num_args = 1..)]
    pub slugs: Vec<String>,
}

#[derive(Debug, Args, Clone)]
pub struct ViewsRecordArgs {
    /// Content category; defaults to the first configured category.
    #[arg(long, value_name = "CATEGORY")]
    pub category: Option<String>,

    /// Record without a visitor id, bypassing repeat-view suppression.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub anonymous: bool,

    #[command(flatten)]
    pub identity: IdentityOverride,

    /// Item slug to record.
    #[arg(value_name = "SLUG")]
    pub slug: String,
}

#[derive(Debug, Args, Clone, Default)]
pub struct VisitorArgs {
    #[command(flatten)]
    pub identity: IdentityOverride,
}

#[derive(Debug, Args, Default, Clone)]
pub struct IdentityOverride {
    /// Override the file holding the local visitor id.
    #[arg(long = "identity-file", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub identity_file: Option<PathBuf>,
}
