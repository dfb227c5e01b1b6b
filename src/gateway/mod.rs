//! Minimal HTTP listener for webhook delivery.
//!
//! Serves:
//! - `POST <webhook path>`: Bot API pushes updates here; guarded by the
//!   secret-token header when a secret is configured.
//! - `GET /health`: liveness probe.

mod auth;
mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::comm::Relay;

// ---------------------------------------------------------------------------
// Gateway handle
// ---------------------------------------------------------------------------

/// Handle returned by [`start_gateway`].
pub struct Gateway {
    /// Server task handle; finishes after graceful shutdown.
    pub handle: JoinHandle<()>,
    /// The address the server is actually listening on.
    pub addr: SocketAddr,
}

/// Listener settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub addr: SocketAddr,
    /// Route updates are posted to; must start with `/`.
    pub path: String,
    /// Expected `X-Telegram-Bot-Api-Secret-Token` value.
    pub secret: Option<String>,
}

// ---------------------------------------------------------------------------
// Shared state injected into axum handlers
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) relay: Arc<Relay>,
    pub(crate) secret: Option<String>,
    pub(crate) started: Instant,
}

// ---------------------------------------------------------------------------
// Server startup
// ---------------------------------------------------------------------------

/// Build the router without binding, so it can be served or tested.
pub fn router(relay: Arc<Relay>, path: &str, secret: Option<String>) -> Router {
    let state = AppState {
        relay,
        secret,
        started: Instant::now(),
    };

    if state.secret.is_some() {
        info!("webhook secret check enabled");
    } else {
        warn!("webhook secret check disabled (WEBHOOK_SECRET not set)");
    }

    let webhook = Router::new()
        .route(path, post(handlers::webhook::receive_update))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::secret_token_middleware,
        ));

    Router::new()
        .route("/health", get(handlers::health::health))
        .merge(webhook)
        .with_state(state)
}

/// Bind `cfg.addr` and serve until `cancel` fires.
pub async fn start_gateway(
    cfg: GatewayConfig,
    relay: Arc<Relay>,
    cancel: CancellationToken,
) -> anyhow::Result<Gateway> {
    anyhow::ensure!(
        cfg.path.starts_with('/'),
        "webhook path must start with '/': {}",
        cfg.path
    );

    let app = router(relay, &cfg.path, cfg.secret);
    let listener = tokio::net::TcpListener::bind(cfg.addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        let shutdown = async move { cancel.cancelled().await };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            error!("gateway server error: {e}");
        }
    });

    info!(%bound_addr, path = %cfg.path, "gateway started");

    Ok(Gateway {
        handle,
        addr: bound_addr,
    })
}
