use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post},
    Router,
};
use kernel::UPLOADS_URL_PREFIX;
use tokio::net::TcpListener;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    classify::ServerErrorsFailureClass, limit::RequestBodyLimitLayer, services::ServeDir,
    trace::TraceLayer,
};
use tracing::Span;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

pub mod auth;
pub mod config;
pub mod domain;
pub mod error;
pub mod file_reply;
mod handlers;
pub mod storage;

use crate::config::Config;
use crate::storage::LocalStorage;

const DEFAULT_LOG_FILTER: &str = "quickdesk=debug,server=debug,tower_http=debug";

/// Shared handler state. Built once from [`Config`], no globals.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<LocalStorage>,
    pub config: Arc<Config>,
}

impl AppState {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            storage: Arc::new(LocalStorage::new(config.uploads_dir.clone())),
            config: Arc::new(config),
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::upload_single,
        handlers::upload_multiple,
        handlers::get_file,
        handlers::delete_file,
        handlers::get_file_info,
        handlers::get_stats,
        handlers::cleanup,
        handlers::health,
    ),
    components(
        schemas(
            kernel::StoredFile,
            kernel::UploadStats,
            kernel::CleanupResult,
            kernel::DeleteResult,
            kernel::Role
        ),
        responses(file_reply::FileReply)
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "upload", description = "Ticket attachment storage"),
        (name = "admin", description = "Storage maintenance, admin role only"),
        (name = "service", description = "Service status")
    )
)]
struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Binds the configured port and serves until Ctrl+C or SIGTERM.
pub async fn run(config: Config) -> io::Result<()> {
    let storage = LocalStorage::new(config.uploads_dir.clone());
    storage
        .ensure_root()
        .await
        .map_err(|e| io::Error::other(e.to_string()))?;

    let socket = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(socket).await?;
    tracing::debug!(
        "listening on {socket}, uploads in {}",
        config.uploads_dir.display()
    );

    let app = create_routes(config);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

pub fn create_routes(config: Config) -> Router {
    let state = AppState::new(config);
    let body_limit = state.config.body_limit();
    let uploads_dir = state.config.uploads_dir.clone();

    let admin = Router::new()
        .route("/stats", get(handlers::get_stats))
        .route("/cleanup", delete(handlers::cleanup))
        .route_layer(middleware::from_fn(auth::require_admin));

    let upload = Router::new()
        .route("/single", post(handlers::upload_single))
        .route("/multiple", post(handlers::upload_multiple))
        .route(
            "/file/:filename",
            get(handlers::get_file).delete(handlers::delete_file),
        )
        .route("/info/:filename", get(handlers::get_file_info))
        .merge(admin)
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    Router::new()
        .route("/api/health", get(handlers::health))
        .nest("/api/upload", upload)
        .nest_service(UPLOADS_URL_PREFIX, ServeDir::new(uploads_dir))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(DefaultBodyLimit::disable())
                .layer(RequestBodyLimitLayer::new(body_limit))
                .into_inner(),
        )
        // outside the limit layer so its plain text 413 is rewritten
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http().on_failure(
                    |error: ServerErrorsFailureClass, _latency: Duration, _span: &Span| {
                        tracing::error!("Server error: {error}");
                    },
                ))
                .layer(middleware::map_response(error::envelope_rejections))
                .into_inner(),
        )
        .with_state(state)
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("signal received, starting graceful shutdown");
}
