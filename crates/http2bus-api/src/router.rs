//! Router composer
//!
//! Holds the active dispatch tree for a route list. `load` builds a complete
//! new tree off to the side and swaps it in with a single store, so in-flight
//! requests keep the snapshot they started with. Provider routes mount a
//! [`RoutesProvider`], reused across loads while its config is unchanged.

use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};

use arc_swap::ArcSwapOption;
use axum::extract::Request;
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use futures::future::BoxFuture;
use http2bus_core::schema::validate_routes;
use http2bus_core::{BusRoute, HttpMethod, MessageBus, ProviderConfig, Route};
use parking_lot::Mutex;
use tower::{service_fn, Layer, Service, ServiceExt};
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::bridge::{BridgeOptions, RouteBridge};
use crate::cors::cors_layer;
use crate::error::RouteError;
use crate::pattern::{PathParams, PathPattern};
use crate::provider::RoutesProvider;

/// Outcome of offering a request to a dispatch tree
pub enum Dispatch {
    Handled(Response),
    /// No entry claimed the request; it is handed back unchanged
    Unrouted(Request),
}

/// Type-erased request handler
#[derive(Clone)]
struct Handler(Arc<dyn Fn(Request) -> BoxFuture<'static, Response> + Send + Sync>);

impl Handler {
    fn from_service<S>(service: S) -> Self
    where
        S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
        S::Future: Send + 'static,
    {
        Self(Arc::new(move |request: Request| -> BoxFuture<'static, Response> {
            let service = service.clone();
            Box::pin(async move {
                match service.oneshot(request).await {
                    Ok(response) => response,
                    Err(never) => match never {},
                }
            })
        }))
    }

    /// Wrap a service in a route's CORS layer
    ///
    /// The CORS layer answers every `OPTIONS` request itself; those answers
    /// go out as `204 No Content`.
    fn with_cors<S>(cors: CorsLayer, service: S) -> Self
    where
        S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
        S::Future: Send + 'static,
    {
        let inner = Self::from_service(cors.layer(service));
        Self(Arc::new(move |request: Request| -> BoxFuture<'static, Response> {
            let preflight = request.method() == Method::OPTIONS;
            let response = inner.call(request);
            Box::pin(async move {
                let mut response = response.await;
                if preflight && response.status() == StatusCode::OK {
                    *response.status_mut() = StatusCode::NO_CONTENT;
                }
                response
            })
        }))
    }

    fn bridge(bridge: RouteBridge, cors: CorsLayer) -> Self {
        let bridge = Arc::new(bridge);
        Self::with_cors(
            cors,
            service_fn(move |request: Request| {
                let bridge = Arc::clone(&bridge);
                async move { Ok::<_, Infallible>(bridge.handle(request).await) }
            }),
        )
    }

    /// `OPTIONS` responder that only applies CORS
    fn preflight(cors: CorsLayer) -> Self {
        Self::with_cors(
            cors,
            service_fn(|_request: Request| async {
                Ok::<_, Infallible>(StatusCode::NO_CONTENT.into_response())
            }),
        )
    }

    fn call(&self, request: Request) -> BoxFuture<'static, Response> {
        (self.0)(request)
    }
}

enum EntryKind {
    Method { method: Method, handler: Handler },
    Any(Handler),
    Mount(Arc<RoutesProvider>),
}

struct Entry {
    pattern: PathPattern,
    kind: EntryKind,
}

/// Immutable, ordered dispatch table; the first matching entry wins
pub struct DispatchTree {
    entries: Vec<Entry>,
}

impl DispatchTree {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn dispatch(self: Arc<Self>, mut request: Request) -> BoxFuture<'static, Dispatch> {
        Box::pin(async move {
            for entry in &self.entries {
                let path = request.uri().path().to_owned();
                let Some(found) = entry.pattern.matches(&path) else {
                    continue;
                };

                match &entry.kind {
                    EntryKind::Method { method, handler } => {
                        if !method_matches(method, request.method()) {
                            continue;
                        }
                        request.extensions_mut().insert(PathParams(found.params));
                        return Dispatch::Handled(handler.call(request).await);
                    }
                    EntryKind::Any(handler) => {
                        request.extensions_mut().insert(PathParams(found.params));
                        return Dispatch::Handled(handler.call(request).await);
                    }
                    EntryKind::Mount(provider) => {
                        let original = request.uri().clone();
                        let Some(stripped) = strip_mount(&original, found.matched) else {
                            warn!(path = %path, mount = %entry.pattern.as_str(), "Could not rewrite mounted path");
                            continue;
                        };
                        *request.uri_mut() = stripped;

                        match provider.composer().dispatch(request).await {
                            Dispatch::Handled(response) => return Dispatch::Handled(response),
                            Dispatch::Unrouted(mut passed) => {
                                *passed.uri_mut() = original;
                                request = passed;
                            }
                        }
                    }
                }
            }
            Dispatch::Unrouted(request)
        })
    }
}

/// `GET` handlers also answer `HEAD`
fn method_matches(route: &Method, request: &Method) -> bool {
    route == request || (*route == Method::GET && *request == Method::HEAD)
}

/// Drop the first `matched` bytes of the path, keeping a leading `/` and the query
fn strip_mount(uri: &Uri, matched: usize) -> Option<Uri> {
    let rest = uri.path().get(matched..)?;
    let path = if rest.starts_with('/') {
        rest.to_string()
    } else {
        format!("/{rest}")
    };
    let path_and_query = match uri.query() {
        Some(query) => format!("{path}?{query}"),
        None => path,
    };

    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(path_and_query.parse().ok()?);
    Uri::from_parts(parts).ok()
}

fn to_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Head => Method::HEAD,
        HttpMethod::Get => Method::GET,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Post => Method::POST,
        HttpMethod::Delete => Method::DELETE,
        HttpMethod::Options => Method::OPTIONS,
    }
}

/// Live routing table with provider cache
pub struct RouteComposer {
    bus: Arc<dyn MessageBus>,
    options: BridgeOptions,
    tree: ArcSwapOption<DispatchTree>,
    /// Providers referenced by the active tree; also serializes loads
    providers: Mutex<Vec<Arc<RoutesProvider>>>,
}

impl RouteComposer {
    pub fn new(bus: Arc<dyn MessageBus>, options: BridgeOptions) -> Self {
        Self {
            bus,
            options,
            tree: ArcSwapOption::empty(),
            providers: Mutex::new(Vec::new()),
        }
    }

    /// Replace the active routes
    ///
    /// Validates the whole list first; on any error the active tree is left
    /// untouched. Providers no longer referenced are released after the swap.
    /// Must be called from within a Tokio runtime.
    pub fn load(&self, routes: &[Route]) -> Result<(), RouteError> {
        validate_routes(routes)?;

        let mut providers = self.providers.lock();
        let mut next = Vec::new();
        let mut created = Vec::new();

        let entries = match self.build(routes, &providers, &mut next, &mut created) {
            Ok(entries) => entries,
            Err(e) => {
                for provider in created {
                    if let Err(e) = provider.release() {
                        warn!(error = %e, "Failed to release provider after aborted load");
                    }
                }
                return Err(e);
            }
        };

        let entry_count = entries.len();
        self.tree.store(Some(Arc::new(DispatchTree { entries })));

        let stale: Vec<_> = providers
            .iter()
            .filter(|old| !next.iter().any(|new| Arc::ptr_eq(old, new)))
            .cloned()
            .collect();
        *providers = next;

        for provider in stale {
            if let Err(e) = provider.release() {
                warn!(provider = %provider.name(), error = %e, "Failed to release provider");
            }
        }

        info!(
            routes = routes.len(),
            entries = entry_count,
            providers = providers.len(),
            "Loaded routes"
        );
        Ok(())
    }

    /// Drop the active tree and release every cached provider
    pub fn reset(&self) {
        let mut providers = self.providers.lock();
        self.tree.store(None);
        for provider in providers.drain(..) {
            if let Err(e) = provider.release() {
                warn!(provider = %provider.name(), error = %e, "Failed to release provider");
            }
        }
        debug!("Router reset");
    }

    /// Offer a request to the active tree
    pub async fn dispatch(&self, request: Request) -> Dispatch {
        match self.tree.load_full() {
            Some(tree) => tree.dispatch(request).await,
            None => Dispatch::Unrouted(request),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.tree.load().is_some()
    }

    /// Snapshot of the active tree
    pub fn tree(&self) -> Option<Arc<DispatchTree>> {
        self.tree.load_full()
    }

    /// Providers referenced by the active tree
    pub fn providers(&self) -> Vec<Arc<RoutesProvider>> {
        self.providers.lock().clone()
    }

    fn build(
        &self,
        routes: &[Route],
        cached: &[Arc<RoutesProvider>],
        next: &mut Vec<Arc<RoutesProvider>>,
        created: &mut Vec<Arc<RoutesProvider>>,
    ) -> Result<Vec<Entry>, RouteError> {
        let mut entries = Vec::new();
        let mut registered = HashSet::new();

        for route in routes {
            let full_path = route.http().full_path();
            match route {
                Route::Provider(route) => {
                    let provider = self.find_or_spawn(&route.provider, cached, next, created)?;
                    entries.push(Entry {
                        pattern: compile(&full_path, PathPattern::mount)?,
                        kind: EntryKind::Mount(provider),
                    });
                }
                Route::Bus(route) => {
                    self.build_bus_route(route, &full_path, &mut entries, &mut registered)?;
                }
            }
        }
        Ok(entries)
    }

    fn build_bus_route(
        &self,
        route: &BusRoute,
        full_path: &str,
        entries: &mut Vec<Entry>,
        registered: &mut HashSet<(String, Method)>,
    ) -> Result<(), RouteError> {
        let cors = cors_layer(route.http.cors.as_ref());
        let bridge = RouteBridge::new(route.clone(), Arc::clone(&self.bus), self.options);
        let handler = Handler::bridge(bridge, cors.clone());

        if route.http.remote {
            entries.push(Entry {
                pattern: compile(full_path, PathPattern::mount)?,
                kind: EntryKind::Any(handler),
            });
            return Ok(());
        }

        let pattern = compile(full_path, PathPattern::route)?;
        let methods = route.methods();
        for method in &methods {
            let method = to_method(*method);
            if !registered.insert((full_path.to_string(), method.clone())) {
                warn!(path = %full_path, method = %method, "Duplicate route registration, earlier entry wins");
            }
            entries.push(Entry {
                pattern: pattern.clone(),
                kind: EntryKind::Method {
                    method,
                    handler: handler.clone(),
                },
            });
        }

        if !methods.contains(&HttpMethod::Options) {
            entries.push(Entry {
                pattern,
                kind: EntryKind::Method {
                    method: Method::OPTIONS,
                    handler: Handler::preflight(cors),
                },
            });
        }
        Ok(())
    }

    fn find_or_spawn(
        &self,
        config: &ProviderConfig,
        cached: &[Arc<RoutesProvider>],
        next: &mut Vec<Arc<RoutesProvider>>,
        created: &mut Vec<Arc<RoutesProvider>>,
    ) -> Result<Arc<RoutesProvider>, RouteError> {
        if let Some(provider) = next.iter().find(|p| p.is_provider_for_config(config)) {
            return Ok(Arc::clone(provider));
        }

        let provider = match cached.iter().find(|p| p.is_provider_for_config(config)) {
            Some(provider) => Arc::clone(provider),
            None => {
                let provider = RoutesProvider::spawn(config.clone(), Arc::clone(&self.bus), self.options)
                    .map_err(|source| RouteError::Provider {
                        name: config.name.clone(),
                        source,
                    })?;
                created.push(Arc::clone(&provider));
                provider
            }
        };
        next.push(Arc::clone(&provider));
        Ok(provider)
    }
}

fn compile(
    path: &str,
    build: fn(&str) -> Result<PathPattern, regex::Error>,
) -> Result<PathPattern, RouteError> {
    build(path).map_err(|e| RouteError::InvalidPath {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

/// Tower service exposing a composer; unrouted requests get an empty 404
#[derive(Clone)]
pub struct ComposerService {
    composer: Arc<RouteComposer>,
}

impl ComposerService {
    pub fn new(composer: Arc<RouteComposer>) -> Self {
        Self { composer }
    }
}

impl Service<Request> for ComposerService {
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let composer = Arc::clone(&self.composer);
        Box::pin(async move {
            Ok(match composer.dispatch(request).await {
                Dispatch::Handled(response) => response,
                Dispatch::Unrouted(request) => {
                    debug!(method = %request.method(), uri = %request.uri(), "No route");
                    StatusCode::NOT_FOUND.into_response()
                }
            })
        })
    }
}
