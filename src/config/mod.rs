//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::NonZeroU32,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "gambit-export";
const ENV_PREFIX: &str = "GAMBIT_EXPORT";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8788;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_BASE_BACKOFF_MS: u64 = 250;
const DEFAULT_MAX_BACKOFF_MS: u64 = 5000;
const DEFAULT_CHROMIUM_PATH: &str = "chromium";
const DEFAULT_ASSET_ROOT: &str = "assets";
const DEFAULT_FONT_TIMEOUT_MS: u64 = 1500;
const DEFAULT_IMAGE_TIMEOUT_MS: u64 = 2500;
const DEFAULT_SETTLE_MS: u64 = 20;
const DEFAULT_CAPTURE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_STORAGE_DIR: &str = "artifacts";
const DEFAULT_ERROR_MAX_CHARS: u32 = 2000;

/// Command-line arguments for the gambit-export binary.
#[derive(Debug, Parser)]
#[command(
    name = "gambit-export",
    version,
    about = "Card export pipeline: render queue, worker daemon and export ledger"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "GAMBIT_EXPORT_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service and the render daemon.
    Serve(Box<ServeArgs>),
    /// Render one card from a JSON payload file without touching the queue.
    Render(RenderArgs),
    /// Queue one render job covering the given cards.
    Enqueue(EnqueueArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RendererOverrides {
    /// Override the Chromium executable used for captures.
    #[arg(long = "chromium-path", value_name = "PATH")]
    pub chromium_path: Option<PathBuf>,

    /// Override the directory project-relative assets are read from.
    #[arg(long = "asset-root", value_name = "PATH")]
    pub asset_root: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub renderer: RendererOverrides,

    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

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

    /// Toggle the background render daemon.
    #[arg(
        long = "daemon-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub daemon_enabled: Option<bool>,

    /// Override the storage backend (filesystem|http).
    #[arg(long = "storage-backend", value_name = "BACKEND")]
    pub storage_backend: Option<String>,

    /// Override the artifact directory of the filesystem backend.
    #[arg(long = "storage-directory", value_name = "PATH")]
    pub storage_directory: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    #[command(flatten)]
    pub renderer: RendererOverrides,

    /// JSON file holding `{card, template, runtime?, artUrl?}`.
    #[arg(value_name = "PAYLOAD", value_hint = ValueHint::FilePath)]
    pub payload: PathBuf,

    /// Where to write the PNG.
    #[arg(long, short, value_name = "PNG", value_hint = ValueHint::FilePath)]
    pub output: PathBuf,
}

#[derive(Debug, Args, Clone)]
pub struct EnqueueArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Card ids, rendered in the given order.
    #[arg(value_name = "CARD_ID", required = true)]
    pub card_ids: Vec<String>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub daemon: DaemonSettings,
    pub renderer: RendererSettings,
    pub storage: StorageSettings,
    pub jobs: JobsSettings,
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
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct DaemonSettings {
    pub enabled: bool,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

#[derive(Debug, Clone)]
pub struct RendererSettings {
    pub chromium_path: PathBuf,
    pub asset_root: PathBuf,
    pub font_timeout: Duration,
    pub image_timeout: Duration,
    pub settle: Duration,
    pub capture_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageSettings {
    Filesystem {
        directory: PathBuf,
        public_base_url: String,
    },
    Http {
        endpoint: String,
    },
}

#[derive(Debug, Clone)]
pub struct JobsSettings {
    pub error_max_chars: NonZeroU32,
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

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Render(args)) => raw.apply_renderer_overrides(&args.renderer),
        Some(Command::Enqueue(args)) => raw.apply_database_override(&args.database),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

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
    database: RawDatabaseSettings,
    daemon: RawDaemonSettings,
    renderer: RawRendererSettings,
    storage: RawStorageSettings,
    jobs: RawJobsSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(enabled) = overrides.daemon_enabled {
            self.daemon.enabled = Some(enabled);
        }
        if let Some(backend) = overrides.storage_backend.as_ref() {
            self.storage.backend = Some(backend.clone());
        }
        if let Some(directory) = overrides.storage_directory.as_ref() {
            self.storage.directory = Some(directory.clone());
        }
        self.apply_database_override(&overrides.database);
        self.apply_renderer_overrides(&overrides.renderer);
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }

    fn apply_renderer_overrides(&mut self, overrides: &RendererOverrides) {
        if let Some(path) = overrides.chromium_path.as_ref() {
            self.renderer.chromium_path = Some(path.clone());
        }
        if let Some(root) = overrides.asset_root.as_ref() {
            self.renderer.asset_root = Some(root.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            daemon,
            renderer,
            storage,
            jobs,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let database = build_database_settings(database)?;
        let daemon = build_daemon_settings(daemon)?;
        let renderer = build_renderer_settings(renderer)?;
        let storage = build_storage_settings(storage, &server)?;
        let jobs = build_jobs_settings(jobs)?;

        Ok(Self {
            server,
            logging,
            database,
            daemon,
            renderer,
            storage,
            jobs,
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

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });
    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_daemon_settings(daemon: RawDaemonSettings) -> Result<DaemonSettings, LoadError> {
    let base_ms = daemon.base_backoff_ms.unwrap_or(DEFAULT_BASE_BACKOFF_MS);
    let max_ms = daemon.max_backoff_ms.unwrap_or(DEFAULT_MAX_BACKOFF_MS);
    if base_ms == 0 {
        return Err(LoadError::invalid(
            "daemon.base_backoff_ms",
            "must be greater than zero",
        ));
    }
    if max_ms < base_ms {
        return Err(LoadError::invalid(
            "daemon.max_backoff_ms",
            format!("must be at least daemon.base_backoff_ms ({base_ms})"),
        ));
    }

    Ok(DaemonSettings {
        enabled: daemon.enabled.unwrap_or(true),
        base_backoff: Duration::from_millis(base_ms),
        max_backoff: Duration::from_millis(max_ms),
    })
}

fn build_renderer_settings(renderer: RawRendererSettings) -> Result<RendererSettings, LoadError> {
    let chromium_path = renderer
        .chromium_path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CHROMIUM_PATH));
    if chromium_path.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "renderer.chromium_path",
            "path must not be empty",
        ));
    }
    let asset_root = renderer
        .asset_root
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ASSET_ROOT));

    let capture_secs = renderer
        .capture_timeout_secs
        .unwrap_or(DEFAULT_CAPTURE_TIMEOUT_SECS);
    if capture_secs == 0 {
        return Err(LoadError::invalid(
            "renderer.capture_timeout_secs",
            "must be greater than zero",
        ));
    }

    Ok(RendererSettings {
        chromium_path,
        asset_root,
        font_timeout: Duration::from_millis(
            renderer.font_timeout_ms.unwrap_or(DEFAULT_FONT_TIMEOUT_MS),
        ),
        image_timeout: Duration::from_millis(
            renderer.image_timeout_ms.unwrap_or(DEFAULT_IMAGE_TIMEOUT_MS),
        ),
        settle: Duration::from_millis(renderer.settle_ms.unwrap_or(DEFAULT_SETTLE_MS)),
        capture_timeout: Duration::from_secs(capture_secs),
    })
}

fn build_storage_settings(
    storage: RawStorageSettings,
    server: &ServerSettings,
) -> Result<StorageSettings, LoadError> {
    let backend = storage
        .backend
        .map(|value| value.trim().to_ascii_lowercase())
        .unwrap_or_else(|| "filesystem".to_string());

    match backend.as_str() {
        "filesystem" => {
            let directory = storage
                .directory
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR));
            if directory.as_os_str().is_empty() {
                return Err(LoadError::invalid(
                    "storage.directory",
                    "path must not be empty",
                ));
            }
            let public_base_url = storage
                .public_base_url
                .map(|url| url.trim().trim_end_matches('/').to_string())
                .filter(|url| !url.is_empty())
                .unwrap_or_else(|| format!("http://{}", server.addr));
            Ok(StorageSettings::Filesystem {
                directory,
                public_base_url,
            })
        }
        "http" => {
            let endpoint = storage
                .endpoint
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .ok_or_else(|| {
                    LoadError::invalid("storage.endpoint", "required for the http backend")
                })?;
            Ok(StorageSettings::Http { endpoint })
        }
        other => Err(LoadError::invalid(
            "storage.backend",
            format!("unknown backend `{other}` (expected filesystem or http)"),
        )),
    }
}

fn build_jobs_settings(jobs: RawJobsSettings) -> Result<JobsSettings, LoadError> {
    Ok(JobsSettings {
        error_max_chars: non_zero_u32(
            jobs.error_max_chars
                .unwrap_or(DEFAULT_ERROR_MAX_CHARS.into()),
            "jobs.error_max_chars",
        )?,
    })
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
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDaemonSettings {
    enabled: Option<bool>,
    base_backoff_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRendererSettings {
    chromium_path: Option<PathBuf>,
    asset_root: Option<PathBuf>,
    font_timeout_ms: Option<u64>,
    image_timeout_ms: Option<u64>,
    settle_ms: Option<u64>,
    capture_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    backend: Option<String>,
    directory: Option<PathBuf>,
    public_base_url: Option<String>,
    endpoint: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawJobsSettings {
    error_max_chars: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    let value: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
