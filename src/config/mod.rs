//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

mod cli;

pub use cli::{
    CliArgs, Command, IdentityOverride, ServeArgs, ServeOverrides, StoreOverrides, ViewsArgs,
    ViewsCommand, ViewsGetArgs, ViewsRecordArgs, VisitorArgs,
};

use crate::cache::{DEFAULT_REVALIDATE_CAPACITY, DEFAULT_REVALIDATE_SECS};
use crate::domain::keys::{DEFAULT_CATEGORY, DEFAULT_NAMESPACE, KeySpace};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "pageviews";
const ENV_PREFIX: &str = "PAGEVIEWS";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_REDIS_DATABASE: i64 = 0;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 1_000;
const DEFAULT_DEDUP_WINDOW_SECS: u64 = 30 * 60;
const DEFAULT_COOKIE_NAME: &str = "visitorId";
const DEFAULT_COOKIE_MAX_AGE_DAYS: u32 = 365;
const DEFAULT_IDENTITY_FILE: &str = ".pageviews/visitor.json";
const DEFAULT_FEATURED_LIMIT: usize = 3;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub store: StoreSettings,
    pub counters: CounterSettings,
    pub revalidate: RevalidateSettings,
    pub dedup: DedupSettings,
    pub identity: IdentitySettings,
    pub featured: FeaturedSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub enum StoreSettings {
    /// Process-local counters; lost on restart.
    Memory,
    Redis(RedisSettings),
}

#[derive(Clone, PartialEq, Eq)]
pub struct RedisSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: bool,
    pub database: i64,
    pub connect_timeout: Duration,
    pub response_timeout: Duration,
}

impl std::fmt::Debug for RedisSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("tls", &self.tls)
            .field("database", &self.database)
            .field("connect_timeout", &self.connect_timeout)
            .field("response_timeout", &self.response_timeout)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct CounterSettings {
    pub namespace: String,
    /// Content categories served; the first is the default.
    pub categories: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RevalidateSettings {
    pub window: Duration,
    pub capacity: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct DedupSettings {
    pub enabled: bool,
    pub window: Duration,
}

#[derive(Debug, Clone)]
pub struct IdentitySettings {
    pub cookie_name: String,
    pub cookie_max_age: Duration,
    pub file: PathBuf,
}

#[derive(Debug, Clone)]
pub struct FeaturedSettings {
    pub pinned: Vec<String>,
    pub limit: usize,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("counters.categories")
            .with_list_parse_key("featured.pinned")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_cli(cli);
    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    store: RawStoreSettings,
    counters: RawCounterSettings,
    revalidate: RawRevalidateSettings,
    dedup: RawDedupSettings,
    identity: RawIdentitySettings,
    featured: RawFeaturedSettings,
}

impl RawSettings {
    fn apply_cli(&mut self, cli: &CliArgs) {
        self.apply_store_overrides(&cli.store);
        match cli.command.as_ref() {
            Some(Command::Serve(args)) => self.apply_serve_overrides(&args.overrides),
            Some(Command::Views(args)) => match &args.command {
                ViewsCommand::Get(_) => {}
                ViewsCommand::Record(record) => self.apply_identity_override(&record.identity),
            },
            Some(Command::Visitor(args)) => self.apply_identity_override(&args.identity),
            None => self.apply_serve_overrides(&ServeOverrides::default()),
        }
    }

    fn apply_store_overrides(&mut self, overrides: &StoreOverrides) {
        if let Some(backend) = overrides.backend.as_ref() {
            self.store.backend = Some(backend.clone());
        }
        if let Some(host) = overrides.host.as_ref() {
            self.store.host = Some(host.clone());
        }
        if let Some(port) = overrides.port {
            self.store.port = Some(port);
        }
        if let Some(username) = overrides.username.as_ref() {
            self.store.username = Some(username.clone());
        }
        if let Some(password) = overrides.password.as_ref() {
            self.store.password = Some(password.clone());
        }
        if let Some(tls) = overrides.tls {
            self.store.tls = Some(tls);
        }
    }

    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(window) = overrides.revalidate_window_seconds {
            self.revalidate.window_seconds = Some(window);
        }
        if let Some(enabled) = overrides.dedup_enabled {
            self.dedup.enabled = Some(enabled);
        }
        if let Some(window) = overrides.dedup_window_seconds {
            self.dedup.window_seconds = Some(window);
        }
    }

    fn apply_identity_override(&mut self, overrides: &IdentityOverride) {
        if let Some(path) = overrides.identity_file.as_ref() {
            self.identity.file = Some(path.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            store,
            counters,
            revalidate,
            dedup,
            identity,
            featured,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            store: build_store_settings(store)?,
            counters: build_counter_settings(counters)?,
            revalidate: build_revalidate_settings(revalidate)?,
            dedup: build_dedup_settings(dedup)?,
            identity: build_identity_settings(identity)?,
            featured: build_featured_settings(featured),
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_store_settings(store: RawStoreSettings) -> Result<StoreSettings, LoadError> {
    let backend = non_empty(store.backend).unwrap_or_else(|| "redis".to_string());
    match backend.to_ascii_lowercase().as_str() {
        "memory" => Ok(StoreSettings::Memory),
        "redis" => {
            let host = non_empty(store.host).ok_or_else(|| {
                LoadError::invalid("store.host", "required for the redis backend (REDIS_HOST)")
            })?;
            let port = match store.port {
                Some(0) => {
                    return Err(LoadError::invalid(
                        "store.port",
                        "port must be greater than zero",
                    ));
                }
                Some(port) => port,
                None => {
                    return Err(LoadError::invalid(
                        "store.port",
                        "required for the redis backend (REDIS_PORT)",
                    ));
                }
            };

            let database = store.database.unwrap_or(DEFAULT_REDIS_DATABASE);
            if database < 0 {
                return Err(LoadError::invalid(
                    "store.database",
                    "must not be negative",
                ));
            }

            let connect_ms = store
                .connect_timeout_ms
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS);
            let response_ms = store
                .response_timeout_ms
                .unwrap_or(DEFAULT_RESPONSE_TIMEOUT_MS);
            non_zero_u32(connect_ms, "store.connect_timeout_ms")?;
            non_zero_u32(response_ms, "store.response_timeout_ms")?;

            Ok(StoreSettings::Redis(RedisSettings {
                host,
                port,
                username: non_empty(store.username),
                password: store.password.filter(|value| !value.is_empty()),
                tls: store.tls.unwrap_or(false),
                database,
                connect_timeout: Duration::from_millis(connect_ms),
                response_timeout: Duration::from_millis(response_ms),
            }))
        }
        other => Err(LoadError::invalid(
            "store.backend",
            format!("unknown backend `{other}`; expected `redis` or `memory`"),
        )),
    }
}

fn build_counter_settings(counters: RawCounterSettings) -> Result<CounterSettings, LoadError> {
    let namespace =
        non_empty(counters.namespace).unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

    let mut categories: Vec<String> = Vec::new();
    for category in counters.categories.unwrap_or_default() {
        let category = category.trim().to_string();
        if category.is_empty() {
            continue;
        }
        if categories.contains(&category) {
            return Err(LoadError::invalid(
                "counters.categories",
                format!("category `{category}` is listed twice"),
            ));
        }
        categories.push(category);
    }
    if categories.is_empty() {
        categories.push(DEFAULT_CATEGORY.to_string());
    }

    for category in &categories {
        KeySpace::new(namespace.as_str(), category.as_str())
            .map_err(|err| LoadError::invalid("counters", err.to_string()))?;
    }

    Ok(CounterSettings {
        namespace,
        categories,
    })
}

fn build_revalidate_settings(
    revalidate: RawRevalidateSettings,
) -> Result<RevalidateSettings, LoadError> {
    let window = revalidate
        .window_seconds
        .unwrap_or(DEFAULT_REVALIDATE_SECS);
    let capacity = revalidate.capacity.unwrap_or(DEFAULT_REVALIDATE_CAPACITY);
    let capacity = NonZeroUsize::new(capacity)
        .ok_or_else(|| LoadError::invalid("revalidate.capacity", "must be greater than zero"))?;

    Ok(RevalidateSettings {
        window: Duration::from_secs(window),
        capacity,
    })
}

fn build_dedup_settings(dedup: RawDedupSettings) -> Result<DedupSettings, LoadError> {
    let window = dedup.window_seconds.unwrap_or(DEFAULT_DEDUP_WINDOW_SECS);
    if window == 0 {
        return Err(LoadError::invalid(
            "dedup.window_seconds",
            "must be greater than zero; set dedup.enabled = false instead",
        ));
    }

    Ok(DedupSettings {
        enabled: dedup.enabled.unwrap_or(true),
        window: Duration::from_secs(window),
    })
}

fn build_identity_settings(identity: RawIdentitySettings) -> Result<IdentitySettings, LoadError> {
    let cookie_name =
        non_empty(identity.cookie_name).unwrap_or_else(|| DEFAULT_COOKIE_NAME.to_string());
    if cookie_name
        .bytes()
        .any(|b| !b.is_ascii_graphic() || b"()<>@,;:\\\"/[]?={}".contains(&b))
    {
        return Err(LoadError::invalid(
            "identity.cookie_name",
            format!("`{cookie_name}` is not a valid cookie name"),
        ));
    }

    let days = identity
        .cookie_max_age_days
        .unwrap_or(DEFAULT_COOKIE_MAX_AGE_DAYS);
    let days = non_zero_u32(days.into(), "identity.cookie_max_age_days")?;

    Ok(IdentitySettings {
        cookie_name,
        cookie_max_age: Duration::from_secs(u64::from(days.get()) * 24 * 60 * 60),
        file: identity
            .file
            .unwrap_or_else(|| PathBuf::from(DEFAULT_IDENTITY_FILE)),
    })
}

fn build_featured_settings(featured: RawFeaturedSettings) -> FeaturedSettings {
    let mut pinned: Vec<String> = Vec::new();
    for slug in featured.pinned.unwrap_or_default() {
        let slug = slug.trim().to_string();
        if !slug.is_empty() && !pinned.contains(&slug) {
            pinned.push(slug);
        }
    }

    FeaturedSettings {
        pinned,
        limit: featured.limit.unwrap_or(DEFAULT_FEATURED_LIMIT),
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStoreSettings {
    backend: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    tls: Option<bool>,
    database: Option<i64>,
    connect_timeout_ms: Option<u64>,
    response_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCounterSettings {
    namespace: Option<String>,
    categories: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRevalidateSettings {
    window_seconds: Option<u64>,
    capacity: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDedupSettings {
    enabled: Option<bool>,
    window_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawIdentitySettings {
    cookie_name: Option<String>,
    cookie_max_age_days: Option<u32>,
    file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawFeaturedSettings {
    pinned: Option<Vec<String>>,
    limit: Option<usize>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    };
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
