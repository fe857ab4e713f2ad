//! # Weave Host
//!
//! The central broker. Binds two TLS planes: a node-facing listener for
//! workers that implement methods and emit events, and an api-facing listener
//! for callers. Calls are correlated through a shared task table; events fan
//! out to subscribers on both planes.

pub mod api_plane;
pub mod config;
pub mod node_plane;
pub mod state;

pub use config::{HostConfig, PlaneConfig};
pub use state::HostState;

use std::sync::Arc;
use std::time::Duration;

use codec::envelope::heartbeat_request;
use network::{spawn_listener, ConnectionSet, TransportConfig};
use tracing::{debug, info};

use crate::api_plane::ApiPlane;
use crate::node_plane::NodePlane;

/// A started host with its bound addresses.
pub struct RunningHost {
    pub node_addr: std::net::SocketAddr,
    pub api_addr: std::net::SocketAddr,
    state: Arc<HostState>,
}

impl RunningHost {
    pub fn state(&self) -> &Arc<HostState> {
        &self.state
    }

    /// Closes every connection on both planes.
    pub async fn shutdown(&self) {
        self.state.node_conns.close_all().await;
        self.state.api_conns.close_all().await;
    }
}

/// Binds both planes and spawns their accept loops plus the periodic
/// heartbeat/deadline maintenance task.
pub async fn start(config: HostConfig) -> fabric::Result<RunningHost> {
    let heartbeat_interval = Duration::from_secs(config.heartbeat_interval_secs);
    let state = Arc::new(HostState::new(&config));

    let node_addr = spawn_listener(
        config.node.bind,
        &config.node.tls()?,
        TransportConfig::default(),
        state.node_conns.clone(),
        Arc::new(NodePlane::new(Arc::clone(&state))),
    )
    .await?;
    info!(%node_addr, "node plane listening");

    let api_addr = spawn_listener(
        config.api.bind,
        &config.api.tls()?,
        TransportConfig::default(),
        state.api_conns.clone(),
        Arc::new(ApiPlane::new(Arc::clone(&state))),
    )
    .await?;
    info!(%api_addr, "api plane listening");

    tokio::spawn(maintenance(Arc::clone(&state), heartbeat_interval));

    Ok(RunningHost {
        node_addr,
        api_addr,
        state,
    })
}

/// Periodic upkeep: server-initiated heartbeats to every connection and the
/// pending-task deadline sweep.
async fn maintenance(state: Arc<HostState>, heartbeat_interval: Duration) {
    let mut ticker = tokio::time::interval(heartbeat_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;

        let reclaimed = state.tasks.sweep_expired();
        if reclaimed > 0 {
            debug!(reclaimed, "reclaimed expired tasks");
        }

        for conns in [&state.node_conns, &state.api_conns] {
            for conn in conns.snapshot() {
                tokio::spawn(async move {
                    // A failed heartbeat write surfaces through the driver's
                    // own error path; nothing to do here.
                    if let Err(e) = conn.send(&heartbeat_request()).await {
                        debug!(conn = conn.id(), "heartbeat send failed: {e}");
                    }
                });
            }
        }
    }
}

/// Resolves a connection id on a plane and queues a send to it off the
/// handler path.
pub(crate) fn send_later(conns: &ConnectionSet, id: network::ConnectionId, msg: codec::Message) {
    match conns.get(id) {
        Some(conn) => {
            tokio::spawn(async move {
                if let Err(e) = conn.send(&msg).await {
                    debug!(conn = conn.id(), "queued send failed: {e}");
                }
            });
        }
        None => debug!(conn = id, "dropping send to departed connection"),
    }
}
