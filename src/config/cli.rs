use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the rendergate binary.
#[derive(Debug, Parser)]
#[command(
    name = "rendergate",
    version,
    about = "Caching, coalescing document render gateway"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "RENDERGATE_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP gateway.
    Serve(Box<ServeArgs>),
    /// Print the effective configuration and exit.
    #[command(name = "check-config")]
    CheckConfig(Box<ServeArgs>),
}

impl Command {
    pub fn serve_overrides(&self) -> &ServeOverrides {
        match self {
            Command::Serve(args) | Command::CheckConfig(args) => &args.overrides,
        }
    }
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CacheBackendArg {
    Disabled,
    Memory,
    Redis,
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

    /// Select the cache backend.
    #[arg(long = "cache-backend", value_name = "BACKEND", value_enum)]
    pub cache_backend: Option<CacheBackendArg>,

    /// Override the Redis connection URL.
    #[arg(long = "cache-redis-url", value_name = "URL")]
    pub cache_redis_url: Option<String>,

    /// Override the in-memory cache entry limit.
    #[arg(long = "cache-memory-limit", value_name = "COUNT")]
    pub cache_memory_limit: Option<u64>,

    /// Override the render deadline; 0 waits for every render.
    #[arg(long = "render-timeout-seconds", value_name = "SECONDS")]
    pub render_timeout_seconds: Option<u64>,

    /// Override the render worker count.
    #[arg(long = "render-workers", value_name = "COUNT")]
    pub render_workers: Option<u64>,

    /// Serve files below this directory under `/localfile/`.
    #[arg(long = "render-local-root", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub render_local_root: Option<PathBuf>,

    /// Override the per-visitor request limit; 0 disables rate limiting.
    #[arg(long = "rate-limit", value_name = "COUNT")]
    pub rate_limit: Option<u64>,

    /// Override the rate limit window.
    #[arg(long = "rate-limit-interval-seconds", value_name = "SECONDS")]
    pub rate_limit_interval_seconds: Option<u64>,
}
