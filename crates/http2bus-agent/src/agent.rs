//! Route document agent

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use http2bus_core::schema::validate_routes;
use http2bus_core::{BusError, MessageBus, Route};
use parking_lot::RwLock;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::document::RouteDocument;
use crate::error::AgentError;
use crate::{ROUTES_ANNOUNCE_NAMESPACE, ROUTES_HEARTBEAT_NAMESPACE};

/// Agent settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// Application name; also the tag added to every bus route
    pub name: String,
    /// Document lifetime in milliseconds
    pub ttl: u64,
    /// Fixed update time, defaults to agent creation time
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Owns and broadcasts this application's route document
pub struct RoutesAgent {
    doc: RwLock<RouteDocument>,
    bus: Arc<dyn MessageBus>,
}

impl RoutesAgent {
    /// Create an agent with an empty document
    pub fn create(config: AgentConfig, bus: Arc<dyn MessageBus>) -> Self {
        let updated_at = config.updated_at.unwrap_or_else(Utc::now);
        Self {
            doc: RwLock::new(RouteDocument::new(config.name, config.ttl, updated_at)),
            bus,
        }
    }

    /// Current document
    pub fn document(&self) -> RouteDocument {
        self.doc.read().clone()
    }

    /// Replace the document's routes and announce the new version
    ///
    /// Every bus route is tagged with the agent name (once). Fails without
    /// touching the document if the routes do not validate. A failed
    /// announcement is logged; the next heartbeat carries the document.
    pub async fn load(&self, mut routes: Vec<Route>) -> Result<&Self, AgentError> {
        validate_routes(&routes)?;

        {
            let mut doc = self.doc.write();
            for route in routes.iter_mut() {
                if let Route::Bus(route) = route {
                    route.bus.insert_tag(&doc.name);
                }
            }
            doc.set_routes(routes);
            info!(
                name = %doc.name,
                version = doc.version_hash.as_deref().unwrap_or_default(),
                "Loaded route document"
            );
        }

        if let Err(e) = self.do_broadcast().await {
            warn!(error = %e, "Failed to announce route document");
        }
        Ok(self)
    }

    /// Announce the current document
    pub async fn do_broadcast(&self) -> Result<(), AgentError> {
        self.send(ROUTES_ANNOUNCE_NAMESPACE).await
    }

    /// Re-send the current document on the heartbeat namespace
    pub async fn heartbeat(&self) -> Result<(), AgentError> {
        if self.doc.read().routes.is_none() {
            debug!("No routes loaded, skipping heartbeat");
            return Ok(());
        }
        self.send(ROUTES_HEARTBEAT_NAMESPACE).await
    }

    /// Send heartbeats every `interval` until the handle is dropped
    pub fn start_heartbeat(self: &Arc<Self>, interval: Duration) -> HeartbeatHandle {
        let agent = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = agent.heartbeat().await {
                    warn!(error = %e, "Route document heartbeat failed");
                }
            }
        });
        HeartbeatHandle { task }
    }

    async fn send(&self, namespace: &str) -> Result<(), AgentError> {
        let payload =
            serde_json::to_value(self.document()).map_err(|e| BusError::Encode(e.to_string()))?;
        self.bus.broadcast(namespace, payload).await?;
        Ok(())
    }
}

/// Stops the heartbeat task when dropped
pub struct HeartbeatHandle {
    task: JoinHandle<()>,
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
