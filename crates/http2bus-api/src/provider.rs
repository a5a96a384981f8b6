//! Routes provider
//!
//! Mounts a remote application's route set. The provider listens for route
//! documents on the announce and heartbeat namespaces and loads the routes of
//! the matching application into its own nested [`RouteComposer`] whenever the
//! document's version hash changes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use http2bus_agent::{RouteDocument, ROUTES_ANNOUNCE_NAMESPACE, ROUTES_HEARTBEAT_NAMESPACE};
use http2bus_core::{BusError, MessageBus, ProviderConfig};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bridge::BridgeOptions;
use crate::error::ProviderError;
use crate::router::RouteComposer;

/// A live provider mount
pub struct RoutesProvider {
    config: ProviderConfig,
    composer: Arc<RouteComposer>,
    bus: Arc<dyn MessageBus>,
    subscriptions: Vec<u64>,
    listener: Mutex<Option<JoinHandle<()>>>,
    released: AtomicBool,
}

impl RoutesProvider {
    /// Subscribe to route documents and start the listener task
    pub fn spawn(
        config: ProviderConfig,
        bus: Arc<dyn MessageBus>,
        options: BridgeOptions,
    ) -> Result<Arc<Self>, BusError> {
        let announce = bus.subscribe(ROUTES_ANNOUNCE_NAMESPACE)?;
        let heartbeat = match bus.subscribe(ROUTES_HEARTBEAT_NAMESPACE) {
            Ok(subscription) => subscription,
            Err(e) => {
                if let Err(unsubscribe) = bus.unsubscribe(announce.id) {
                    warn!(error = %unsubscribe, "Failed to drop announce subscription");
                }
                return Err(e);
            }
        };

        let composer = Arc::new(RouteComposer::new(Arc::clone(&bus), options));
        let task = tokio::spawn(listen(
            config.name.clone(),
            Arc::clone(&composer),
            announce.receiver,
            heartbeat.receiver,
        ));
        info!(provider = %config.name, "Started routes provider");

        Ok(Arc::new(Self {
            config,
            composer,
            bus,
            subscriptions: vec![announce.id, heartbeat.id],
            listener: Mutex::new(Some(task)),
            released: AtomicBool::new(false),
        }))
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn is_provider_for_config(&self, config: &ProviderConfig) -> bool {
        self.config == *config
    }

    /// Nested composer holding the provider's current routes
    pub fn composer(&self) -> &RouteComposer {
        &self.composer
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Stop listening, drop the nested routes and unsubscribe
    pub fn release(&self) -> Result<(), ProviderError> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Err(ProviderError::AlreadyReleased(self.config.name.clone()));
        }

        if let Some(task) = self.listener.lock().take() {
            task.abort();
        }
        self.composer.reset();

        let mut result = Ok(());
        for id in &self.subscriptions {
            if let Err(source) = self.bus.unsubscribe(*id) {
                if result.is_ok() {
                    result = Err(ProviderError::Unsubscribe {
                        name: self.config.name.clone(),
                        source,
                    });
                }
            }
        }

        info!(provider = %self.config.name, "Released routes provider");
        result
    }
}

impl Drop for RoutesProvider {
    fn drop(&mut self) {
        if let Some(task) = self.listener.get_mut().take() {
            task.abort();
        }
    }
}

async fn listen(
    name: String,
    composer: Arc<RouteComposer>,
    mut announce: broadcast::Receiver<Value>,
    mut heartbeat: broadcast::Receiver<Value>,
) {
    let mut current: Option<String> = None;

    loop {
        let received = tokio::select! {
            received = announce.recv() => received,
            received = heartbeat.recv() => received,
        };

        match received {
            Ok(payload) => apply_document(&name, &composer, &mut current, payload),
            Err(RecvError::Lagged(skipped)) => {
                warn!(provider = %name, skipped, "Route document listener lagged");
            }
            Err(RecvError::Closed) => {
                debug!(provider = %name, "Route document channel closed");
                break;
            }
        }
    }
}

/// Load a received document's routes if it is ours and has changed
fn apply_document(
    name: &str,
    composer: &RouteComposer,
    current: &mut Option<String>,
    payload: Value,
) {
    let document: RouteDocument = match serde_json::from_value(payload) {
        Ok(document) => document,
        Err(e) => {
            debug!(provider = %name, error = %e, "Ignoring malformed route document");
            return;
        }
    };
    if document.name != name {
        return;
    }
    let (Some(version), Some(routes)) = (document.version_hash, document.routes) else {
        return;
    };
    if current.as_deref() == Some(version.as_str()) {
        return;
    }

    match composer.load(&routes) {
        Ok(()) => {
            info!(provider = %name, version = %version, routes = routes.len(), "Applied route document");
            *current = Some(version);
        }
        Err(e) => warn!(provider = %name, version = %version, error = %e, "Rejected route document"),
    }
}
