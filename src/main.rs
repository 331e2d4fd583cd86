mod config;
mod db;
mod error;
mod handlers;
mod middleware;
mod models;
mod services;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::db::Database;
use crate::services::{ActivationSessions, ApiMailer, Mailer};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Arc<Config>,
    pub mailer: Arc<dyn Mailer>,
    pub activations: Arc<ActivationSessions>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "item_retriever=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Item Retriever...");

    // Load configuration
    let config = Config::load()?;
    let config = Arc::new(config);
    tracing::info!("Configuration loaded");

    // Initialize database
    let db = Database::new(&config.database.path).await?;
    db.run_migrations().await?;
    tracing::info!("Database initialized");

    // Outbound mail
    let mailer: Arc<dyn Mailer> = Arc::new(ApiMailer::new(config.mail.clone())?);
    if !config.mail.is_configured() {
        tracing::warn!("Mail API key or sender not configured; OTP dispatch will fail");
    }

    // Activation sessions and the countdown sweeper
    let activations = Arc::new(ActivationSessions::default());
    let sweeper = activations.clone().spawn_sweeper();

    // Create app state
    let state = AppState {
        db,
        config: config.clone(),
        mailer,
        activations,
    };

    // Build router
    let app = create_router(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    sweeper.abort();

    Ok(())
}

fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Public routes (no auth required). The activation endpoints resolve
    // their identity themselves, so an anonymous caller gets the
    // awaiting-email state instead of a 401.
    let public_routes = Router::new()
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/otp/send", post(handlers::otp::send_otp))
        .route("/auth/otp/verify", post(handlers::otp::verify_otp))
        .route("/auth/activation", get(handlers::activation::activation_status))
        .route(
            "/auth/activation/verify",
            post(handlers::activation::activation_verify),
        )
        .route(
            "/auth/activation/resend",
            post(handlers::activation::activation_resend),
        );

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/user/profile", get(handlers::user::get_profile))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    // Combine all routes under /api/v1
    Router::new()
        .nest("/api/v1", public_routes.merge(protected_routes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
