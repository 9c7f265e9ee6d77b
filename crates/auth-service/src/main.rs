//! Auth Service
//!
//! Authenticates bearer credentials for the platform's HTTP APIs.
//!
//! # Startup
//!
//! 1. Load configuration and initialize tracing
//! 2. Install the Prometheus recorder
//! 3. Connect to Postgres
//! 4. Assemble the authentication pipeline
//! 5. Spawn the introspection cache purge task
//! 6. Serve HTTP until SIGINT/SIGTERM, then cancel background tasks

use auth_service::auth::idp_client::{HttpIdpClient, IdpClient};
use auth_service::auth::pipeline::{AuthPipeline, PipelineDeps};
use auth_service::config::{Config, LogFormat};
use auth_service::observability::metrics::init_metrics_recorder;
use auth_service::repositories::api_tokens::PgApiTokenStore;
use auth_service::repositories::introspection_cache::PgIntrospectionCache;
use auth_service::routes::{self, AppState};
use auth_service::services::user_profiles::UserProfileService;
use auth_service::tasks::start_cache_purge;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env();
    init_tracing(
        config
            .as_ref()
            .map(|c| c.log_format)
            .unwrap_or(LogFormat::Pretty),
    );

    info!("Starting Auth Service");

    let config = config.map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        app_env = %config.app_env,
        issuer_configured = config.issuer_url.is_some(),
        standalone_mode = config.standalone_mode,
        "Configuration loaded successfully"
    );

    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics recorder: {}", e);
        e
    })?;

    info!("Connecting to database...");
    let db_url_with_timeout = add_query_timeout(&config.database_url, 5);
    let db_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&db_url_with_timeout)
        .await
        .map_err(|e| {
            error!("Failed to connect to database: {}", e);
            e
        })?;
    info!("Database connection established");

    let idp: Option<Arc<dyn IdpClient>> = config.issuer_url.clone().map(|issuer| {
        if config.service_account_key_path.is_none() {
            warn!("AUTH_SERVICE_ACCOUNT_KEY_PATH not set; introspection will fail and fall through");
        }
        Arc::new(HttpIdpClient::new(
            issuer,
            config.service_account_key_path.clone(),
            config.idp_http_timeout(),
        )) as Arc<dyn IdpClient>
    });

    let pipeline = Arc::new(AuthPipeline::from_config(
        &config,
        PipelineDeps {
            api_tokens: Arc::new(PgApiTokenStore::new(db_pool.clone())),
            cache: Arc::new(PgIntrospectionCache::new(db_pool.clone())),
            idp,
            profiles: Arc::new(UserProfileService::new(db_pool.clone())),
        },
    ));

    let shutdown_token = CancellationToken::new();

    if config.cache_purge_interval_seconds > 0 {
        tokio::spawn(start_cache_purge(
            db_pool.clone(),
            Duration::from_secs(config.cache_purge_interval_seconds),
            shutdown_token.child_token(),
        ));
    } else {
        info!("Introspection cache purge disabled (CACHE_PURGE_INTERVAL_SECONDS=0)");
    }

    let bind_address = config.bind_address.clone();

    let state = Arc::new(AppState {
        pool: db_pool,
        config,
        pipeline,
    });

    let app = routes::build_routes(state, metrics_handle);

    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    info!("Auth Service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    shutdown_token.cancel();
    info!("Auth Service shutdown complete");

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "auth_service=debug,tower_http=debug".into());

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
/// Returns when a shutdown signal is received and the drain period is complete.
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    let drain_secs: u64 = std::env::var("AUTH_DRAIN_SECONDS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(30);

    if drain_secs > 0 {
        warn!("Draining connections for {} seconds...", drain_secs);
        tokio::time::sleep(Duration::from_secs(drain_secs)).await;
        info!("Drain period complete");
    } else {
        info!("Skipping drain period (AUTH_DRAIN_SECONDS=0)");
    }
}

/// Adds statement_timeout to the database URL.
fn add_query_timeout(url: &str, timeout_secs: u32) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!(
        "{}{}options=-c%20statement_timeout%3D{}s",
        url, separator, timeout_secs
    )
}
