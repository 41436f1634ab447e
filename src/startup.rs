//! Application startup and lifecycle management.

use crate::config::BillingConfig;
use crate::handlers;
use crate::services::{
    init_metrics, BillingEngine, BillingStore, BillingSweep, CapacityScheduler, Database,
    HttpActivitySink, HttpWalletClient, NodeStore,
};
use crate::error::AppError;
use axum::routing::{get, post};
use axum::Router;
use secrecy::ExposeSecret;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: BillingConfig,
    pub db: Arc<Database>,
    pub billing: Arc<dyn BillingStore>,
    pub nodes: Arc<dyn NodeStore>,
    pub engine: Arc<BillingEngine>,
    pub sweep: Arc<BillingSweep>,
    pub capacity: Arc<CapacityScheduler>,
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: BillingConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build the application without running migrations.
    /// Use this in tests when migrations are already applied by the test harness.
    pub async fn build_without_migrations(config: BillingConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(config: BillingConfig, run_migrations: bool) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(
            config.database.url.expose_secret(),
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if run_migrations {
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }

        let db = Arc::new(db);
        let billing: Arc<dyn BillingStore> = db.clone();
        let nodes: Arc<dyn NodeStore> = db.clone();

        let wallet = Arc::new(HttpWalletClient::new(&config.wallet.url));
        let events = Arc::new(HttpActivitySink::new(&config.activity.url));

        let engine = Arc::new(BillingEngine::new(
            billing.clone(),
            wallet,
            db.clone(),
            events.clone(),
            config.pricing,
        ));
        let sweep = Arc::new(BillingSweep::new(billing.clone(), engine.clone()));
        let capacity = Arc::new(CapacityScheduler::new(nodes.clone(), events));

        let state = AppState {
            config: config.clone(),
            db,
            billing,
            nodes,
            engine,
            sweep,
            capacity,
        };

        let router = Router::new()
            .route("/health", get(handlers::health_check))
            .route("/ready", get(handlers::readiness_check))
            .route("/metrics", get(handlers::metrics_handler))
            // Billing
            .route("/billing/sweep", post(handlers::run_sweep))
            .route("/billing/sweeps", get(handlers::list_sweep_runs))
            .route("/billing/subjects", post(handlers::create_subject))
            .route("/billing/subjects/:id", get(handlers::get_subject))
            .route("/billing/subjects/:id/charge", post(handlers::charge_subject))
            .route("/billing/subjects/:id/cycles", get(handlers::list_cycles))
            .route("/billing/cycles/:id/refund", post(handlers::refund_cycle))
            .route("/billing/estimate", post(handlers::estimate_cost))
            .route("/billing/usage", post(handlers::record_usage))
            // Worker nodes
            .route("/nodes", post(handlers::register_node).get(handlers::list_nodes))
            .route("/nodes/dispatch", post(handlers::dispatch_build))
            .route("/nodes/sweep", post(handlers::sweep_stale_nodes))
            .route("/nodes/:id/heartbeat", post(handlers::node_heartbeat))
            .route("/nodes/:id/claim", post(handlers::claim_slot))
            .route("/nodes/:id/release", post(handlers::release_slot))
            .layer(
                TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                    let request_id = request
                        .headers()
                        .get("x-request-id")
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or("-");

                    tracing::info_span!(
                        "http_request",
                        request_id = %request_id,
                        method = %request.method(),
                        uri = %request.uri(),
                    )
                }),
            )
            .with_state(state);

        let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
            .parse()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Invalid bind address: {}", e)))?;
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "Billing service listener bound");

        Ok(Self {
            port,
            listener,
            router,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        tracing::info!(
            service = "compute-billing-service",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            "Service ready to accept connections"
        );
        axum::serve(self.listener, self.router).await
    }
}
