//! HTTP server implementation using Axum.

use std::path::Path;
use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    routing::{delete, get, post, put},
};
use docket_core::DocketConfig;
use docket_scheduler::{
    Clock, Dispatcher, DocketDb, LifecycleService, Scheduler, TaskQueue, system_clock,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::routes;

/// Shared state for the gateway server.
pub struct AppState {
    pub config: DocketConfig,
    pub start_time: std::time::Instant,
    pub db: Arc<DocketDb>,
    pub lifecycle: Arc<LifecycleService>,
    pub queue: Arc<TaskQueue>,
    /// Owns the background tick; the trigger-check endpoint shares its guard.
    pub scheduler: Arc<Scheduler>,
}

impl AppState {
    /// Wire services over one database and one time source.
    pub fn new(config: DocketConfig, db: Arc<DocketDb>, clock: Clock) -> Self {
        let lifecycle = Arc::new(
            LifecycleService::new(db.clone(), &config.lifecycle).with_clock(clock.clone()),
        );
        let dispatcher = Arc::new(Dispatcher::new(config.notify.clone()));
        let queue = Arc::new(
            TaskQueue::new(db.clone(), dispatcher, config.scheduler.max_send_attempts)
                .with_clock(clock.clone()),
        );
        let scheduler = Arc::new(
            Scheduler::new(db.clone(), lifecycle.clone(), queue.clone(), &config.scheduler)
                .with_clock(clock),
        );
        Self {
            config,
            start_time: std::time::Instant::now(),
            db,
            lifecycle,
            queue,
            scheduler,
        }
    }

    fn api_token(&self) -> Option<&str> {
        self.config.gateway.api_token.as_deref().filter(|t| !t.is_empty())
    }
}

/// API token middleware: validates X-Api-Token header or ?token= query.
async fn require_token(
    State(state): State<Arc<AppState>>,
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    use axum::response::IntoResponse;

    // No token configured: allow all
    let Some(expected) = state.api_token() else {
        return next.run(req).await;
    };

    let from_header = req
        .headers()
        .get("X-Api-Token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if from_header == expected {
        return next.run(req).await;
    }

    let from_query = req
        .uri()
        .query()
        .into_iter()
        .flat_map(|q| q.split('&'))
        .filter_map(|pair| pair.strip_prefix("token="))
        .any(|token| token == expected);
    if from_query {
        return next.run(req).await;
    }

    (
        axum::http::StatusCode::UNAUTHORIZED,
        axum::Json(serde_json::json!({"ok": false, "error": "Unauthorized: invalid or missing API token"})),
    )
        .into_response()
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    build_router_from_arc(Arc::new(state))
}

pub fn build_router_from_arc(shared: Arc<AppState>) -> Router {
    // Protected routes: require the API token when one is configured
    let protected = Router::new()
        // Process nodes
        .route(
            "/api/v1/cases/{id}/nodes",
            get(routes::list_case_nodes).post(routes::add_node),
        )
        .route("/api/v1/cases/{id}/recalculate", post(routes::recalculate_case))
        .route(
            "/api/v1/nodes/{id}",
            put(routes::update_node).delete(routes::delete_node),
        )
        .route("/api/v1/nodes/{id}/detail", get(routes::node_detail))
        .route("/api/v1/nodes/{id}/recalculate", post(routes::recalculate_node))
        .route("/api/v1/nodes/update-status", post(routes::update_all_statuses))
        .route("/api/v1/nodes/overdue/statistics", get(routes::overdue_statistics))
        .route("/api/v1/nodes/upcoming", get(routes::upcoming_nodes))
        // Notification rules
        .route(
            "/api/v1/notifications/rules",
            get(routes::list_rules).post(routes::create_rule),
        )
        .route(
            "/api/v1/notifications/rules/{id}",
            get(routes::get_rule).put(routes::update_rule).delete(routes::delete_rule),
        )
        .route("/api/v1/notifications/rules/{id}/toggle", post(routes::toggle_rule))
        // Notification tasks
        .route("/api/v1/notifications", get(routes::list_notifications))
        .route("/api/v1/notifications/unread-count", get(routes::unread_count))
        .route("/api/v1/notifications/trigger-check", post(routes::trigger_check))
        .route("/api/v1/notifications/purge-orphans", post(routes::purge_orphans))
        .route("/api/v1/notifications/{id}", delete(routes::delete_notification))
        .route("/api/v1/notifications/{id}/read", put(routes::mark_read))
        .route("/api/v1/notifications/{id}/send", post(routes::send_notification))
        .route("/api/v1/notifications/{id}/send-history", get(routes::send_history))
        // Scheduler
        .route("/api/v1/scheduler/status", get(routes::scheduler_status))
        .route_layer(axum::middleware::from_fn_with_state(shared.clone(), require_token));

    // Public routes: no auth
    let public = Router::new().route("/health", get(routes::health_check));

    let cors = {
        let cors = CorsLayer::new()
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::PUT,
                axum::http::Method::DELETE,
                axum::http::Method::OPTIONS,
            ])
            .allow_headers(Any)
            .max_age(std::time::Duration::from_secs(3600));

        let origins: Vec<_> = shared
            .config
            .gateway
            .cors_origins
            .iter()
            .filter_map(|s| s.trim().parse::<axum::http::HeaderValue>().ok())
            .collect();
        if origins.is_empty() {
            cors.allow_origin(Any)
        } else {
            cors.allow_origin(origins)
        }
    };

    protected
        .merge(public)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Start the HTTP server and, when enabled, the background scheduler.
/// `config.database_path` must already be expanded.
pub async fn start(config: DocketConfig) -> anyhow::Result<()> {
    let db = Arc::new(DocketDb::open(Path::new(&config.database_path))?);
    tracing::info!("🗄️ Database: {}", config.database_path);

    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let state = Arc::new(AppState::new(config, db, system_clock()));

    if state.config.scheduler.enabled {
        state.scheduler.start();
    } else {
        tracing::info!("⏸️ Scheduler disabled by config");
    }

    let app = build_router_from_arc(state.clone());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("🌐 Docket gateway listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("🛑 Shutdown signal received");
        })
        .await?;

    state.scheduler.stop();
    Ok(())
}
