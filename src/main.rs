use actix_cors::Cors;
use actix_web::{web, App, HttpServer, HttpResponse, middleware, error, http::StatusCode};
use cohort_match::config::{LoggingSettings, Settings};
use cohort_match::routes::{self, cohorts::AppState};
use cohort_match::services::{start_workers, CacheManager, PassRunner, PostgresClient, WorkerOptions};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, error};
use tracing_subscriber::EnvFilter;

/// JSON error response for rejected requests
#[derive(Debug, serde::Serialize)]
pub struct JsonError {
    pub error: String,
    pub message: String,
    pub status_code: u16,
}

impl std::fmt::Display for JsonError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error, self.message)
    }
}

impl std::error::Error for JsonError {}

impl error::ResponseError for JsonError {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::BAD_REQUEST))
            .json(self)
    }
}

/// Handle path parameter errors (e.g. a non-numeric cohort id)
pub fn handle_path_error(err: error::PathError, _req: &actix_web::HttpRequest) -> actix_web::Error {
    JsonError {
        error: "invalid_path".to_string(),
        message: format!("Invalid path: {}", err),
        status_code: 400,
    }
    .into()
}

fn init_tracing(logging: &LoggingSettings) {
    let logging = logging
        .clone()
        .overridden(std::env::var("LOG_LEVEL").ok(), std::env::var("LOG_FORMAT").ok());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true);

    if logging.is_pretty() {
        subscriber.pretty().init();
    } else {
        subscriber.json().init();
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenv::dotenv().ok();

    // Logging is not set up until the settings are read
    let settings = Settings::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;

    init_tracing(&settings.logging);

    info!("Starting Cohort Match engine...");

    let cache_ttl = settings.cache.ttl_secs.unwrap_or(86_400);
    let l1_cache_size = settings.cache.l1_cache_size.unwrap_or(10_000);

    let cache = CacheManager::new(settings.cache.redis_url.as_deref(), l1_cache_size, cache_ttl)
        .await
        .map_err(|e| {
            error!("Failed to connect to Redis: {}", e);
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, e.to_string())
        })?;
    let cache = Arc::new(cache);

    info!(
        redis = cache.has_redis(),
        "Report cache initialized (L1: {} entries, TTL: {}s)", l1_cache_size, cache_ttl
    );

    let db_max_conn = settings.database.max_connections.unwrap_or(10);
    let postgres = PostgresClient::from_settings(
        &settings.database.url,
        Some(db_max_conn),
        settings.database.min_connections,
        settings.database.acquire_timeout_secs,
        settings.database.idle_timeout_secs,
    )
    .await
    .map_err(|e| {
        error!("Failed to connect to PostgreSQL: {}", e);
        std::io::Error::new(std::io::ErrorKind::ConnectionRefused, e.to_string())
    })?;
    let postgres = Arc::new(postgres);

    info!("PostgreSQL client initialized (max: {} connections)", db_max_conn);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let options = WorkerOptions::from(&settings.engine);
    let runner = Arc::new(PassRunner::new(postgres.clone()));
    let (queue, worker_handles) = start_workers(runner, cache.clone(), options, shutdown_rx);

    let app_state = AppState {
        queue,
        cache,
        postgres,
    };

    let host = settings.server.host.clone();
    let port = settings.server.port;
    let workers = settings.server.workers.unwrap_or(4);

    info!("Starting HTTP server on {}:{}", host, port);

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::PathConfig::default().error_handler(handle_path_error))
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .configure(routes::configure_routes)
    })
    .workers(workers)
    .bind((host, port))?
    .run()
    .await?;

    info!("HTTP server stopped, draining pass workers");
    let _ = shutdown_tx.send(true);
    for handle in worker_handles {
        if let Err(e) = handle.await {
            error!("Pass worker terminated abnormally: {}", e);
        }
    }

    Ok(())
}
