//! Router assembly and server lifecycle.

use std::{future::IntoFuture, net::SocketAddr, sync::Arc};

use {
    axum::{
        Json, Router,
        extract::State,
        response::IntoResponse,
        routing::{get, post},
    },
    serde_json::json,
    tokio_util::sync::CancellationToken,
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{error, info},
};

use {
    switchboard_common::time::rfc3339_now,
    switchboard_config::SwitchboardConfig,
    switchboard_protocol::openai::ModelCard,
};

use crate::{completions, heartbeat, logs, logs::DebugLogStore, state::GatewayState, ws};

/// Shared handler state: the registry/correlator pair plus the static model
/// catalog.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<GatewayState>,
    pub models: Arc<Vec<ModelCard>>,
}

/// Build the full router (shared between production startup and tests).
pub fn build_app(gateway: Arc<GatewayState>, models: Vec<ModelCard>) -> Router {
    // The original deployment sat behind editor plugins and local tools on
    // arbitrary origins, so CORS stays wide open.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app_state = AppState {
        gateway,
        models: Arc::new(models),
    };

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route(
            "/logs",
            get(logs::list_logs_handler).delete(logs::clear_logs_handler),
        )
        .route("/logs/{filename}", get(logs::read_log_handler))
        .route("/v1/models", get(completions::list_models_handler))
        .route("/v1/chat/completions", post(completions::chat_completions_handler))
        .route("/ws", get(ws::ws_upgrade_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Run the gateway until ctrl-c. Constructs the state, spawns the heartbeat
/// loop, serves, then cancels + joins the heartbeat and detaches any
/// remaining clients.
pub async fn run(config: SwitchboardConfig) -> anyhow::Result<()> {
    let debug_logs = if config.logs.enabled {
        match DebugLogStore::new(&config.logs.debug_dir) {
            Ok(store) => Some(store),
            Err(e) => {
                error!(dir = %config.logs.debug_dir.display(), error = %e, "debug log dir unavailable, sink disabled");
                None
            },
        }
    } else {
        None
    };

    let gateway = GatewayState::new(config.timeouts.clone(), debug_logs);
    let shutdown = CancellationToken::new();
    let heartbeat_handle = heartbeat::spawn(Arc::clone(&gateway), shutdown.clone());

    let ctrl_c_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            error!("failed to install ctrl-c handler");
            return;
        }
        info!("shutdown signal received");
        ctrl_c_shutdown.cancel();
    });

    let app = build_app(Arc::clone(&gateway), config.model_cards());
    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "gateway listening");

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .into_future();
    // Dropping the server on cancellation also closes the client sockets, so
    // a lingering WebSocket cannot hold the process open.
    tokio::select! {
        result = server => result?,
        () = shutdown.cancelled() => {},
    }

    // The heartbeat loop exits on the same token; join it before tearing
    // down the sessions so no sweep races the detach.
    let _ = heartbeat_handle.await;
    gateway.detach_all("shutdown").await;
    info!("gateway stopped");
    Ok(())
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn root_handler(State(app): State<AppState>) -> impl IntoResponse {
    let snapshot = app.gateway.snapshot().await;
    Json(json!({
        "status": "online",
        "service": "switchboard",
        "timestamp": rfc3339_now(),
        "connections": snapshot,
    }))
}

async fn health_handler(State(app): State<AppState>) -> impl IntoResponse {
    let snapshot = app.gateway.snapshot().await;
    let status = if snapshot.total_connections > 0 {
        "healthy"
    } else {
        "degraded"
    };
    Json(json!({
        "status": status,
        "active_connections": snapshot.total_connections,
        "idle_connections": snapshot.idle_connections,
        "timestamp": rfc3339_now(),
    }))
}

async fn stats_handler(State(app): State<AppState>) -> impl IntoResponse {
    Json(app.gateway.snapshot().await)
}
