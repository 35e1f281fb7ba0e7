//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    net::SocketAddr,
    num::NonZeroUsize,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

pub use cli::{CacheBackendArg, CliArgs, Command, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "rendergate";
const ENV_PREFIX: &str = "RENDERGATE";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379/";
const DEFAULT_MEMORY_LIMIT: u64 = 256;
const DEFAULT_CHUNK_SIZE: u64 = 950_000;
const DEFAULT_MAX_CHUNKS: u64 = 16;
const DEFAULT_CACHE_IO_WORKERS: u64 = 1;
const DEFAULT_MIN_TTL_SECS: u64 = 600;
const DEFAULT_MAX_TTL_SECS: u64 = 7200;
const DEFAULT_RENDER_TIMEOUT_SECS: u64 = 15;
const DEFAULT_RENDER_WORKERS: u64 = 1;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;
const DEFAULT_RATE_LIMIT: u64 = 60;
const DEFAULT_RATE_LIMIT_INTERVAL_SECS: u64 = 600;

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub render: RenderSettings,
    pub rate_limit: RateLimitSettings,
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackendKind {
    Disabled,
    Memory,
    Redis,
}

impl CacheBackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Memory => "memory",
            Self::Redis => "redis",
        }
    }
}

impl FromStr for CacheBackendKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "disabled" | "none" | "off" => Ok(Self::Disabled),
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            other => Err(format!(
                "unknown backend `{other}` (expected disabled, memory or redis)"
            )),
        }
    }
}

impl From<CacheBackendArg> for CacheBackendKind {
    fn from(arg: CacheBackendArg) -> Self {
        match arg {
            CacheBackendArg::Disabled => Self::Disabled,
            CacheBackendArg::Memory => Self::Memory,
            CacheBackendArg::Redis => Self::Redis,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub backend: CacheBackendKind,
    /// Entry limit of the in-memory backend.
    pub memory_limit: NonZeroUsize,
    pub redis_url: String,
    /// Upper bound of one stored chunk, in bytes.
    pub chunk_size: NonZeroUsize,
    pub max_chunks: NonZeroUsize,
    pub io_workers: NonZeroUsize,
    pub min_ttl: Duration,
    pub max_ttl: Duration,
    /// Request paths always cached for `max_ttl`.
    pub max_cacheable_paths: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    /// `None` never answers early.
    pub timeout: Option<Duration>,
    pub workers: NonZeroUsize,
    pub fetch_timeout: Duration,
    pub local_root: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    /// Zero disables rate limiting.
    pub limit: u32,
    pub interval: Duration,
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
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("cache.max_cacheable_paths"),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(command) => raw.apply_serve_overrides(command.serve_overrides()),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

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
    cache: RawCacheSettings,
    render: RawRenderSettings,
    rate_limit: RawRateLimitSettings,
}

impl RawSettings {
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
        if let Some(backend) = overrides.cache_backend {
            self.cache.backend = Some(CacheBackendKind::from(backend).as_str().to_string());
        }
        if let Some(url) = overrides.cache_redis_url.as_ref() {
            self.cache.redis_url = Some(url.clone());
        }
        if let Some(limit) = overrides.cache_memory_limit {
            self.cache.memory_limit = Some(limit);
        }
        if let Some(seconds) = overrides.render_timeout_seconds {
            self.render.timeout_seconds = Some(seconds);
        }
        if let Some(workers) = overrides.render_workers {
            self.render.workers = Some(workers);
        }
        if let Some(root) = overrides.render_local_root.as_ref() {
            self.render.local_root = Some(root.clone());
        }
        if let Some(limit) = overrides.rate_limit {
            self.rate_limit.limit = Some(limit);
        }
        if let Some(seconds) = overrides.rate_limit_interval_seconds {
            self.rate_limit.interval_seconds = Some(seconds);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cache,
            render,
            rate_limit,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            cache: build_cache_settings(cache)?,
            render: build_render_settings(render)?,
            rate_limit: build_rate_limit_settings(rate_limit)?,
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

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let backend = match cache.backend {
        Some(value) => CacheBackendKind::from_str(&value)
            .map_err(|reason| LoadError::invalid("cache.backend", reason))?,
        None => CacheBackendKind::Memory,
    };

    let redis_url = cache
        .redis_url
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_REDIS_URL.to_string());

    let min_secs = cache.min_ttl_seconds.unwrap_or(DEFAULT_MIN_TTL_SECS);
    let max_secs = cache.max_ttl_seconds.unwrap_or(DEFAULT_MAX_TTL_SECS);
    if min_secs > max_secs {
        return Err(LoadError::invalid(
            "cache.min_ttl_seconds",
            format!("must not exceed cache.max_ttl_seconds ({max_secs})"),
        ));
    }

    let max_cacheable_paths = cache
        .max_cacheable_paths
        .into_iter()
        .map(|path| path.trim().to_string())
        .filter(|path| !path.is_empty())
        .collect();

    Ok(CacheSettings {
        backend,
        memory_limit: non_zero_usize(
            cache.memory_limit.unwrap_or(DEFAULT_MEMORY_LIMIT),
            "cache.memory_limit",
        )?,
        redis_url,
        chunk_size: non_zero_usize(
            cache.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE),
            "cache.chunk_size",
        )?,
        max_chunks: non_zero_usize(
            cache.max_chunks.unwrap_or(DEFAULT_MAX_CHUNKS),
            "cache.max_chunks",
        )?,
        io_workers: non_zero_usize(
            cache.io_workers.unwrap_or(DEFAULT_CACHE_IO_WORKERS),
            "cache.io_workers",
        )?,
        min_ttl: Duration::from_secs(min_secs),
        max_ttl: Duration::from_secs(max_secs),
        max_cacheable_paths,
    })
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let timeout_secs = render.timeout_seconds.unwrap_or(DEFAULT_RENDER_TIMEOUT_SECS);
    let fetch_secs = render
        .fetch_timeout_seconds
        .unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS);
    if fetch_secs == 0 {
        return Err(LoadError::invalid(
            "render.fetch_timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(RenderSettings {
        timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
        workers: non_zero_usize(
            render.workers.unwrap_or(DEFAULT_RENDER_WORKERS),
            "render.workers",
        )?,
        fetch_timeout: Duration::from_secs(fetch_secs),
        local_root: render.local_root,
    })
}

fn build_rate_limit_settings(
    rate_limit: RawRateLimitSettings,
) -> Result<RateLimitSettings, LoadError> {
    let limit_value = rate_limit.limit.unwrap_or(DEFAULT_RATE_LIMIT);
    let limit: u32 = limit_value
        .try_into()
        .map_err(|_| LoadError::invalid("rate_limit.limit", "value exceeds supported range for u32"))?;

    let interval_secs = rate_limit
        .interval_seconds
        .unwrap_or(DEFAULT_RATE_LIMIT_INTERVAL_SECS);
    if limit > 0 && interval_secs == 0 {
        return Err(LoadError::invalid(
            "rate_limit.interval_seconds",
            "must be greater than zero when a limit is set",
        ));
    }

    Ok(RateLimitSettings {
        limit,
        interval: Duration::from_secs(interval_secs),
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
struct RawCacheSettings {
    backend: Option<String>,
    memory_limit: Option<u64>,
    redis_url: Option<String>,
    chunk_size: Option<u64>,
    max_chunks: Option<u64>,
    io_workers: Option<u64>,
    min_ttl_seconds: Option<u64>,
    max_ttl_seconds: Option<u64>,
    max_cacheable_paths: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    timeout_seconds: Option<u64>,
    workers: Option<u64>,
    fetch_timeout_seconds: Option<u64>,
    local_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRateLimitSettings {
    limit: Option<u64>,
    interval_seconds: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
