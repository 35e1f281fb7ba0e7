use std::{future::IntoFuture, net::SocketAddr, process, sync::Arc};

use rendergate::{
    application::{
        error::AppError,
        fetch::{LocalFiles, UrlFetcher},
        rate_limit::RateLimiter,
        render::{MarkdownRenderer, RenderOrchestrator, RenderService, TtlPolicy},
    },
    cache::{CacheConfig, KeyValueCache},
    config,
    infra::{
        error::InfraError,
        http::{self, HttpState},
        pool::WorkerPool,
        telemetry,
    },
};
use tokio::sync::Notify;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    match command {
        config::Command::CheckConfig(_) => {
            println!("{settings:#?}");
            Ok(())
        }
        config::Command::Serve(_) => {
            telemetry::init(&settings.logging).map_err(AppError::from)?;
            run_serve(settings).await
        }
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let state = build_http_state(&settings)?;
    let router = http::build_router(state);

    let addr = settings.server.addr;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| InfraError::Bind { addr, source })?;

    info!(
        target = "rendergate::serve",
        addr = %addr,
        cache = settings.cache.backend.as_str(),
        "Listening"
    );

    let shutdown = Arc::new(Notify::new());
    let trigger = shutdown.clone();
    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        info!(target = "rendergate::serve", "Shutdown signal received");
        trigger.notify_one();
    });

    let grace = settings.server.graceful_shutdown;
    tokio::select! {
        result = server.into_future() => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        _ = async {
            shutdown.notified().await;
            tokio::time::sleep(grace).await;
        } => {
            warn!(
                target = "rendergate::serve",
                grace_secs = grace.as_secs(),
                "Graceful shutdown timed out, dropping open connections"
            );
        }
    }

    Ok(())
}

fn build_http_state(settings: &config::Settings) -> Result<HttpState, AppError> {
    let cache_config = CacheConfig::from(&settings.cache);
    let cache = Arc::new(KeyValueCache::from_config(&cache_config).map_err(InfraError::from)?);

    let rate_limiter = RateLimiter::new(
        cache.clone(),
        settings.rate_limit.limit,
        settings.rate_limit.interval,
    );
    let ttl = TtlPolicy::new(settings.cache.min_ttl, settings.cache.max_ttl)
        .with_max_cacheable(settings.cache.max_cacheable_paths.iter().cloned());
    let orchestrator = Arc::new(RenderOrchestrator::new(
        cache,
        rate_limiter,
        ttl,
        settings.render.timeout,
    ));

    let renderer = RenderService::new(
        WorkerPool::new("render", settings.render.workers),
        Arc::new(MarkdownRenderer::new()),
    );

    let urls = UrlFetcher::new(settings.render.fetch_timeout).map_err(InfraError::from)?;

    let local = match settings.render.local_root.as_ref() {
        Some(path) => Some(LocalFiles::new(path).map_err(|source| InfraError::LocalRoot {
            path: path.clone(),
            source,
        })?),
        None => None,
    };

    Ok(HttpState {
        orchestrator,
        renderer,
        urls,
        local,
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
