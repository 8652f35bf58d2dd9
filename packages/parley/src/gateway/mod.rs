//! Development realtime gateway.
//!
//! Speaks the Socket.IO subset the ESM client uses: one namespace, the
//! `private-message` relay keyed by `userId`, and a periodic `time-msg`
//! broadcast. Nothing is persisted.

mod handler;


use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use parley_core::esm::wire::{EVENT_TIME, SOCKET_IO_PATH, TimeMessage};

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// How often `time-msg` is broadcast.
    pub time_interval: Duration,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            time_interval: Duration::from_secs(1),
            ping_interval: Duration::from_secs(25),
            ping_timeout: Duration::from_secs(20),
        }
    }
}

struct Peer {
    connection_id: Uuid,
    frames: mpsc::UnboundedSender<String>,
}

/// Live connections keyed by `userId`. One connection per id; the most
/// recent registration wins.
#[derive(Clone, Default)]
pub struct Registry {
    peers: Arc<RwLock<HashMap<String, Peer>>>,
}

impl Registry {
    /// Returns true when an older connection with the same id was replaced.
    pub async fn register(
        &self,
        user_id: &str,
        connection_id: Uuid,
        frames: mpsc::UnboundedSender<String>,
    ) -> bool {
        let mut peers = self.peers.write().await;
        let replaced = peers
            .insert(
                user_id.to_string(),
                Peer {
                    connection_id,
                    frames,
                },
            )
            .is_some();
        if replaced {
            info!(user_id, "newer connection replaced existing registration");
        }
        replaced
    }

    /// Remove `user_id` only if it still points at `connection_id`.
    pub async fn unregister(&self, user_id: &str, connection_id: Uuid) {
        let mut peers = self.peers.write().await;
        if peers
            .get(user_id)
            .is_some_and(|p| p.connection_id == connection_id)
        {
            peers.remove(user_id);
            debug!(user_id, "unregistered");
        }
    }

    /// Queue a frame for `user_id`. False when nobody is registered under it.
    pub async fn deliver(&self, user_id: &str, frame: String) -> bool {
        let peers = self.peers.read().await;
        match peers.get(user_id) {
            Some(peer) => peer.frames.send(frame).is_ok(),
            None => false,
        }
    }

    /// Queue a frame for every registered connection.
    pub async fn broadcast(&self, frame: &str) -> usize {
        let peers = self.peers.read().await;
        peers
            .values()
            .filter(|p| p.frames.send(frame.to_string()).is_ok())
            .count()
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }
}

#[derive(Clone)]
pub struct GatewayState {
    pub registry: Registry,
    pub config: Arc<GatewayConfig>,
}

impl GatewayState {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            registry: Registry::default(),
            config: Arc::new(config),
        }
    }
}

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route(SOCKET_IO_PATH, get(handler::socket_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Broadcast `time-msg` to every registered connection until cancelled.
pub fn spawn_clock(registry: Registry, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match handler::time_frame() {
                        Ok(frame) => {
                            let peers = registry.broadcast(&frame).await;
                            trace!(peers, "time broadcast");
                        }
                        Err(e) => warn!("Failed to encode {}: {}", EVENT_TIME, e),
                    }
                }
            }
        }
    })
}

/// Serve the gateway on `listener` until `cancel` fires.
pub async fn serve(listener: TcpListener, config: GatewayConfig, cancel: CancellationToken) -> Result<()> {
    let state = GatewayState::new(config);
    let clock = spawn_clock(
        state.registry.clone(),
        state.config.time_interval,
        cancel.clone(),
    );

    let addr = listener.local_addr().context("Listener has no local address")?;
    info!("Gateway listening on ws://{}{}", addr, SOCKET_IO_PATH);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(cancel.clone().cancelled_owned())
        .await
        .context("Gateway server error")?;

    cancel.cancel();
    let _ = clock.await;
    info!("Gateway stopped");
    Ok(())
}

pub(crate) fn now_time_message() -> TimeMessage {
    TimeMessage {
        time: chrono::Utc::now().timestamp_millis(),
    }
}
