use anyhow::Context;
use axum::{
    handler::Handler,
    middleware,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use postgate::config;
use postgate::database::manager::DatabaseManager;
use postgate::handlers;
use postgate::middleware::auth::token_auth_middleware;
use postgate::services::{bootstrap, touch};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = config::config();

    let pool = DatabaseManager::host_pool()
        .await
        .context("connecting to the host database")?;
    sqlx::migrate!()
        .run(&pool)
        .await
        .context("applying migrations")?;
    bootstrap::ensure_admin_token(&pool)
        .await
        .context("bootstrapping the admin token")?;
    touch::spawn(pool.clone());

    let app = router();

    let addr = format!("{}:{}", cfg.host, cfg.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "postgate listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    DatabaseManager::close_all().await;
    Ok(())
}

fn router() -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        // Auth wraps the handler, not the whole route, so undeclared methods
        // still answer 405 rather than 401.
        .route(
            "/query",
            post(handlers::query::query_post.layer(middleware::from_fn(token_auth_middleware))),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
