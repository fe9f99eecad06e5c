use std::{error::Error as StdError, future::IntoFuture, process, sync::Arc, time::Duration};

use axum::Router;
use meshx_proxy::{
    application::{error::AppError, render::RenderService, upstream::HttpUpstream},
    cache::{CacheKey, DiskBlobStore, blob_path},
    config::{self, CacheSettings, Command, KeyArgs, ServeArgs, Settings},
    domain::render::RenderRequest,
    infra::{
        error::InfraError,
        http::{self, HttpState},
        telemetry,
    },
};
use tokio::{net::TcpListener, sync::Notify, task::JoinHandle};
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
    let mut causes = Vec::new();
    let mut current = StdError::source(error);
    while let Some(cause) = current {
        causes.push(cause.to_string());
        current = cause.source();
    }

    if dispatcher::has_been_set() {
        error!(error = %error, causes = ?causes, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, causes = ?causes, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli().map_err(InfraError::from)?;

    let command = cli_args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        Command::Serve(_) => run_serve(settings).await,
        Command::Key(args) => run_key(settings, args).await,
        Command::Sweep(_) => run_sweep(settings).await,
    }
}

async fn run_serve(settings: Settings) -> Result<(), AppError> {
    let store = Arc::new(open_store(&settings.cache)?);
    let upstream = HttpUpstream::new(settings.upstream.base_url.clone(), settings.upstream.timeout)?;
    let renderer = RenderService::new(store.clone(), Arc::new(upstream))
        .with_coalescing(settings.cache.coalesce_misses);

    let sweeper = spawn_sweeper(store, &settings.cache);

    let router = http::build_router(HttpState {
        renderer: Arc::new(renderer),
    });
    let listener = TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| InfraError::bind(settings.server.addr, err))?;

    info!(
        target = "meshx::serve",
        addr = %settings.server.addr,
        upstream = %settings.upstream.base_url,
        upstream_timeout_s = settings.upstream.timeout.as_secs(),
        cache_dir = %settings.cache.directory.display(),
        coalesce_misses = settings.cache.coalesce_misses,
        eviction = settings.cache.eviction.is_enabled(),
        "Proxy listening"
    );

    let result = serve_http(listener, router, settings.server.graceful_shutdown).await;

    if let Some(handle) = sweeper {
        handle.abort();
        let _ = handle.await;
    }

    result
}

async fn run_key(settings: Settings, args: KeyArgs) -> Result<(), AppError> {
    let request = RenderRequest::new(Some(args.text), args.font)?;
    let key = CacheKey::for_request(&request);
    let path = blob_path(&settings.cache.directory, &key, &settings.cache.extension);
    let cached = tokio::fs::try_exists(&path)
        .await
        .map_err(InfraError::from)?;

    println!("key:    {key}");
    println!("font:   {}", request.font());
    println!("path:   {}", path.display());
    println!("cached: {}", if cached { "yes" } else { "no" });
    Ok(())
}

async fn run_sweep(settings: Settings) -> Result<(), AppError> {
    let store = open_store(&settings.cache)?;
    let policy = settings.cache.eviction;

    if !policy.is_enabled() {
        warn!(
            target = "meshx::sweep",
            "No eviction limits configured; the sweep will only report the cache size"
        );
    }

    let report = store.sweep(&policy).await?;

    println!("files deleted: {}", report.files_deleted);
    println!("bytes freed:   {}", report.bytes_freed);
    println!("size before:   {}", report.size_before);
    println!("size after:    {}", report.size_after);
    Ok(())
}

fn open_store(cache: &CacheSettings) -> Result<DiskBlobStore, AppError> {
    let store = DiskBlobStore::new(cache.directory.clone(), cache.extension.clone())
        .map_err(|err| InfraError::cache_directory(&cache.directory, err))?;
    Ok(store)
}

fn spawn_sweeper(store: Arc<DiskBlobStore>, cache: &CacheSettings) -> Option<JoinHandle<()>> {
    if !cache.eviction.is_enabled() {
        return None;
    }

    let policy = cache.eviction;
    let period = cache.sweep_interval;
    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await; // Skip the first immediate tick
        loop {
            interval.tick().await;
            if let Err(err) = store.sweep(&policy).await {
                warn!(
                    target = "meshx::sweep",
                    error = %err,
                    "Background cache sweep failed"
                );
            }
        }
    }))
}

async fn serve_http(listener: TcpListener, router: Router, grace: Duration) -> Result<(), AppError> {
    let shutdown = Arc::new(Notify::new());
    let trigger = Arc::clone(&shutdown);
    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move { trigger.notified().await })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            return result.map_err(|err| AppError::unexpected(format!("server error: {err}")));
        }
        () = shutdown_signal() => {}
    }

    info!(
        target = "meshx::serve",
        grace_seconds = grace.as_secs(),
        "Shutdown requested; draining open requests"
    );
    shutdown.notify_one();

    match tokio::time::timeout(grace, &mut server).await {
        Ok(result) => result.map_err(|err| AppError::unexpected(format!("server error: {err}"))),
        Err(_) => {
            warn!(
                target = "meshx::serve",
                grace_seconds = grace.as_secs(),
                "Graceful shutdown timed out; dropping open connections"
            );
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(target = "meshx::serve", error = %err, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(target = "meshx::serve", error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
