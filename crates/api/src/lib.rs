//! HTTP boundary for the order service.
//!
//! Resolves the caller's identity from gateway headers, tags every request with
//! a correlation id, and hands off to the order lifecycle engine and catalog
//! services. Errors are shaped by the domain responder. Structured logging via
//! tracing, Prometheus metrics on `/metrics`.

pub mod config;
pub mod error;
pub mod identity;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::http::HeaderName;
use axum::routing::{get, post, put};
use domain::{CatalogRepository, CatalogService, OrderRepository, OrderService};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::postgres::PgPoolOptions;
use store::{PgStore, TransactionManager, TransactionalStore};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use error::StartupError;
use identity::REQUEST_ID_HEADER;

/// Shared application state accessible from all handlers.
pub struct AppState<S: TransactionalStore> {
    pub orders: OrderService<S>,
    pub catalog: CatalogService<S>,
}

impl<S> AppState<S>
where
    S: TransactionalStore,
    S::Handle: OrderRepository + CatalogRepository,
{
    /// Builds both services over one transaction manager on `store`.
    pub fn new(store: S) -> Arc<Self> {
        let tm = TransactionManager::new(store);
        Arc::new(Self {
            orders: OrderService::new(tm.clone()),
            catalog: CatalogService::new(tm),
        })
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S>(state: Arc<AppState<S>>, metrics_handle: PrometheusHandle) -> Router
where
    S: TransactionalStore,
    S::Handle: OrderRepository + CatalogRepository,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    let app = Router::new()
        .route("/health", get(routes::health::check))
        .route(
            "/orders",
            post(routes::orders::create::<S>).get(routes::orders::list::<S>),
        )
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route(
            "/orders/{id}/status",
            put(routes::orders::update_status::<S>),
        )
        .route("/orders/{id}/cancel", post(routes::orders::cancel::<S>))
        .route("/meals", post(routes::catalog::create_meal::<S>))
        .route(
            "/meals/{id}",
            put(routes::catalog::update_meal::<S>).delete(routes::catalog::delete_meal::<S>),
        )
        .route("/menus", post(routes::catalog::create_menu::<S>))
        .route("/menus/{id}", put(routes::catalog::update_menu::<S>))
        .with_state(state)
        .merge(metrics_router);

    with_middleware(app)
}

/// Wraps a router in the request-id, tracing, CORS and panic recovery layers.
pub fn with_middleware(router: Router) -> Router {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    router.layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::new(request_id))
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
            .layer(axum::middleware::from_fn(error::recover_panics)),
    )
}

/// Connects to PostgreSQL and applies migrations when configured to.
pub async fn connect_postgres(config: &Config, url: &str) -> Result<PgStore, StartupError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(url)
        .await?;
    let store = PgStore::new(pool);

    if config.run_migrations {
        store.run_migrations().await?;
        tracing::info!("database migrations applied");
    }
    Ok(store)
}
