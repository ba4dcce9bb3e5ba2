use std::{process, sync::Arc, time::Duration};

use gambit_export::{
    application::{
        compose::{AssetResolver, Compositor, ReadinessTimings},
        daemon::{Backoff, DaemonHealth, RenderDaemon},
        error::AppError,
        exports::ExportLedgerService,
        pipeline::{CardResolver, RenderPayload},
        queue::RenderQueueService,
        rasterize::{CardRasterizer, RenderEngine},
        repos::{CatalogRepo, ExportsRepo, RenderJobsRepo},
        storage::ObjectStorage,
    },
    config::{self, Settings, StorageSettings},
    infra::{
        chromium::ChromiumEngine,
        db::PostgresRepositories,
        error::InfraError,
        http::{self, HttpState},
        storage::{FilesystemObjectStorage, HttpObjectStorage},
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

/// Headroom on top of the readiness timeouts for auto-fit and layout.
const LAYOUT_BUDGET: Duration = Duration::from_millis(500);

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

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Render(args) => run_render(settings, args).await,
        config::Command::Enqueue(args) => run_enqueue(settings, args).await,
    }
}

struct Services {
    queue: RenderQueueService,
    resolver: CardResolver,
    ledger: ExportLedgerService,
}

async fn run_serve(settings: Settings) -> Result<(), AppError> {
    let (engine, rasterizer) = build_rasterizer(&settings);
    let (storage, artifacts) = build_storage(&settings)?;

    let mut state = HttpState::new(Arc::new(rasterizer.clone()), DaemonHealth::disabled());
    if let Some(artifacts) = artifacts {
        state = state.with_artifacts(artifacts);
    }

    let mut daemon_task = None;
    match connect_database(&settings).await? {
        Some(repositories) => {
            let services = build_services(&repositories, storage.clone(), &settings);
            state = state
                .with_database(repositories)
                .with_queue(Arc::new(services.queue.clone()))
                .with_ledger(Arc::new(services.ledger.clone()));

            if settings.daemon.enabled {
                let daemon = RenderDaemon::new(
                    services.queue,
                    services.resolver,
                    rasterizer,
                    storage,
                    services.ledger,
                    Backoff::new(settings.daemon.base_backoff, settings.daemon.max_backoff),
                );
                state.daemon = daemon.health();
                daemon_task = Some(daemon.spawn());
            }
        }
        None => {
            warn!(
                target = "gambit_export::serve",
                "No database configured; serving /health and /render only"
            );
        }
    }

    let router = http::build_router(state);
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(InfraError::from)?;
    info!(
        target = "gambit_export::serve",
        addr = %settings.server.addr,
        daemon = daemon_task.is_some(),
        "Listening"
    );

    let served = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")));

    if let Some(task) = daemon_task {
        info!(
            target = "gambit_export::serve",
            "Waiting for the render daemon to finish its current job"
        );
        if let Err(err) = task.shutdown(settings.server.graceful_shutdown).await {
            warn!(
                target = "gambit_export::serve",
                error = %err,
                "Render daemon task ended abnormally"
            );
        }
    }
    engine.shutdown().await;

    served
}

async fn run_render(settings: Settings, args: config::RenderArgs) -> Result<(), AppError> {
    let raw = tokio::fs::read(&args.payload)
        .await
        .map_err(InfraError::from)?;
    let payload: RenderPayload = serde_json::from_slice(&raw).map_err(|err| {
        AppError::validation(format!("{}: {err}", args.payload.display()))
    })?;

    let (engine, rasterizer) = build_rasterizer(&settings);
    let result = payload.render(&rasterizer).await;
    engine.shutdown().await;
    let rendered = result?;

    tokio::fs::write(&args.output, &rendered.png)
        .await
        .map_err(InfraError::from)?;
    info!(
        target = "gambit_export::render",
        card_id = %rendered.manifest.card_id,
        output = %args.output.display(),
        checksum = %rendered.checksum_sha256,
        png_bytes = rendered.png.len(),
        "Card written"
    );
    Ok(())
}

async fn run_enqueue(settings: Settings, args: config::EnqueueArgs) -> Result<(), AppError> {
    let repositories = connect_database(&settings)
        .await?
        .ok_or_else(|| InfraError::configuration("database url is not configured"))?;
    let jobs: Arc<dyn RenderJobsRepo> = Arc::new(repositories.clone());
    let catalog: Arc<dyn CatalogRepo> = Arc::new(repositories);
    let queue = RenderQueueService::new(jobs, catalog)
        .with_error_max_chars(settings.jobs.error_max_chars.get() as usize);

    let job_id = queue.enqueue_batch(args.card_ids).await?;
    info!(target = "gambit_export::enqueue", job_id = %job_id, "Render job queued");
    println!("{job_id}");
    Ok(())
}

fn build_rasterizer(settings: &Settings) -> (Arc<ChromiumEngine>, CardRasterizer) {
    let renderer = &settings.renderer;
    let timings = ReadinessTimings {
        font_timeout: renderer.font_timeout,
        image_timeout: renderer.image_timeout,
        settle: renderer.settle,
    };
    let engine = Arc::new(ChromiumEngine::new(
        renderer.chromium_path.clone(),
        timings.total() + LAYOUT_BUDGET,
        renderer.capture_timeout,
    ));
    let compositor = Compositor::new(AssetResolver::with_root(&renderer.asset_root), timings);
    let rasterizer = CardRasterizer::new(engine.clone(), compositor);
    (engine, rasterizer)
}

type StorageBackends = (
    Arc<dyn ObjectStorage>,
    Option<Arc<FilesystemObjectStorage>>,
);

fn build_storage(settings: &Settings) -> Result<StorageBackends, AppError> {
    match &settings.storage {
        StorageSettings::Filesystem {
            directory,
            public_base_url,
        } => {
            let storage = Arc::new(
                FilesystemObjectStorage::new(directory.clone(), public_base_url.clone())
                    .map_err(|err| InfraError::storage(format!("{}: {err}", directory.display())))?,
            );
            Ok((storage.clone(), Some(storage)))
        }
        StorageSettings::Http { endpoint } => {
            let storage = HttpObjectStorage::new(endpoint)
                .map_err(|err| InfraError::storage(err.to_string()))?;
            Ok((Arc::new(storage), None))
        }
    }
}

async fn connect_database(settings: &Settings) -> Result<Option<PostgresRepositories>, AppError> {
    let Some(database_url) = settings.database.url.as_ref() else {
        return Ok(None);
    };

    let pool = PostgresRepositories::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| InfraError::database(err.to_string()))?;
    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| InfraError::database(err.to_string()))?;

    Ok(Some(PostgresRepositories::new(pool)))
}

fn build_services(
    repositories: &PostgresRepositories,
    storage: Arc<dyn ObjectStorage>,
    settings: &Settings,
) -> Services {
    let jobs: Arc<dyn RenderJobsRepo> = Arc::new(repositories.clone());
    let catalog: Arc<dyn CatalogRepo> = Arc::new(repositories.clone());
    let exports: Arc<dyn ExportsRepo> = Arc::new(repositories.clone());

    Services {
        queue: RenderQueueService::new(jobs, catalog.clone())
            .with_error_max_chars(settings.jobs.error_max_chars.get() as usize),
        resolver: CardResolver::new(catalog),
        ledger: ExportLedgerService::new(exports, storage),
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(
            target = "gambit_export::serve",
            error = %err,
            "Failed to listen for shutdown signal"
        );
        std::future::pending::<()>().await;
    }
    info!(target = "gambit_export::serve", "Shutdown requested");
}
