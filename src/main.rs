use rental_portal::{
    AppState,
    config::{AppConfig, Env},
    create_router,
    rate_limit::spawn_sweeper,
    repository::{PostgresRepository, RepositoryState},
    store::{RedisTokenStore, TokenStoreState},
};
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// main
///
/// Entry point: configuration, logging, user store, token store, HTTP server.
#[tokio::main]
async fn main() {
    // 1. Configuration & Environment Loading (Fail-Fast)
    dotenv::dotenv().ok();
    let config = AppConfig::load();

    // 2. Logging Filter Setup
    // RUST_LOG wins; otherwise debug for this crate and request summaries from tower_http.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "rental_portal=debug,tower_http=info".into());

    // 3. Initialize Logging based on Environment
    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            // JSON lines for the log aggregator.
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Application starting in {:?} mode", config.env);

    // 4. User Store (Postgres)
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.db_url)
        .await
        .expect("FATAL: Failed to connect to Postgres. Check DATABASE_URL.");

    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("FATAL: Failed to apply database migrations.");

    let repo = Arc::new(PostgresRepository::new(pool)) as RepositoryState;

    // 5. Token Store (Redis)
    // Connects lazily, so an outage at startup only degrades the calls made during it.
    let tokens = if config.redis.enabled {
        let store = RedisTokenStore::new(&config.redis.url, config.redis.connect_timeout)
            .unwrap_or_else(|e| panic!("FATAL: Invalid REDIS_URL: {e}"));
        if let Err(e) = store.ping().await {
            tracing::warn!(
                error = %e,
                "token store unreachable at startup; blacklist checks fail open and rate limiting stays in-process until it recovers"
            );
        }
        Some(Arc::new(store) as TokenStoreState)
    } else {
        tracing::info!("token store disabled by configuration");
        None
    };

    // 6. Unified State Assembly
    let port = config.port;
    let app_state = AppState::new(repo, tokens, config);
    let _sweeper = spawn_sweeper(app_state.limiters.local_store(), SWEEP_INTERVAL);

    // 7. Router and Server Startup
    let app = create_router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| panic!("FATAL: Failed to bind {addr}: {e}"));

    tracing::info!("Listening on {addr}");
    tracing::info!("API Documentation (Swagger UI) available at: http://localhost:{port}/swagger-ui");

    // Peer addresses are needed to key rate limits when no proxy header is present.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("FATAL: HTTP server terminated unexpectedly.");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received, draining connections");
}
