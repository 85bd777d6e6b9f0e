use crate::{
    auth::{AuthGate, Authenticated},
    config::{GatewayConfig, PROTECTED_RESOURCE_PATH},
    dispatch::{ProtocolEngine, dispatch, internal_error, rewrite_to_protocol_path},
    error::{Error, Result},
    jwks::KeySetProvider,
    services::{ServiceFactory, ServiceHandle},
    store::NoteStore,
    token::{OpaqueTokenVerifier, TokenVerifier},
};
use axum::{
    Json, Router,
    extract::{FromRef, Request, State},
    http::{HeaderMap, HeaderName, Method, Uri, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{any, get, post},
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

/// Session header shared by the streamable-HTTP transport.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Gateway in front of a protocol engine: serves discovery documents,
/// authenticates protocol traffic and dispatches it to the engine.
pub struct GatewayServer<E>
where
    E: ProtocolEngine,
{
    config: Arc<GatewayConfig>,
    gate: Arc<AuthGate>,
    engine: Arc<E>,
    services: Arc<ServiceHandle>,
    service_factory: Option<ServiceFactory>,
}

impl<E: ProtocolEngine> Clone for GatewayServer<E> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            gate: self.gate.clone(),
            engine: self.engine.clone(),
            services: self.services.clone(),
            service_factory: self.service_factory.clone(),
        }
    }
}

impl<E: ProtocolEngine> FromRef<GatewayServer<E>> for Arc<AuthGate> {
    fn from_ref(server: &GatewayServer<E>) -> Self {
        server.gate.clone()
    }
}

impl<E> GatewayServer<E>
where
    E: ProtocolEngine + 'static,
{
    /// Create a new gateway server builder.
    pub fn builder() -> GatewayServerBuilder<E> {
        GatewayServerBuilder::default()
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn services(&self) -> &Arc<ServiceHandle> {
        &self.services
    }

    /// Create the axum router with discovery and protocol endpoints.
    pub fn router(&self) -> Router {
        Router::new()
            .route(
                "/",
                get(handle_descriptor)
                    .post(handle_streamable)
                    .delete(handle_passthrough),
            )
            .route(PROTECTED_RESOURCE_PATH, get(handle_protected_resource_metadata))
            .route("/sse", get(handle_passthrough))
            .route("/message", post(handle_passthrough))
            .route("/mcp", any(handle_passthrough))
            .layer(middleware::from_fn_with_state(self.clone(), bind_services))
            .layer(cors_layer())
            .with_state(self.clone())
    }

    /// Binds the data service from the configured factory unless something
    /// already bound it.
    fn ensure_services_bound(&self) {
        if self.services.is_bound() {
            return;
        }
        if let Some(factory) = &self.service_factory {
            self.services.bind_with(|| factory());
        }
    }
}

fn cors_layer() -> CorsLayer {
    let session = HeaderName::from_static(SESSION_HEADER);
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, session.clone()])
        .expose_headers([header::WWW_AUTHENTICATE, session])
        .max_age(Duration::from_secs(86400))
}

// Handler functions

/// Runs before every request, ahead of its first suspension point.
async fn bind_services<E>(
    State(server): State<GatewayServer<E>>,
    request: Request,
    next: Next,
) -> Response
where
    E: ProtocolEngine + 'static,
{
    server.ensure_services_bound();
    next.run(request).await
}

/// Handle the unauthenticated server descriptor
async fn handle_descriptor<E>(State(server): State<GatewayServer<E>>) -> Result<Response>
where
    E: ProtocolEngine + 'static,
{
    let config = &server.config;

    let mut descriptor = serde_json::json!({
        "name": config.server_name,
        "title": config.server_name,
        "version": config.server_version,
        "description": format!("{} - Model Context Protocol server", config.server_name),
        "endpoints": {
            "sse": "/sse",
            "message": "/message",
            "mcp": "/mcp",
        },
    });

    if config.auth.has_discovery() {
        descriptor["oauth"] = serde_json::json!({
            "discovery": config.auth.resource_metadata_url(),
        });
    }

    Ok(Json(descriptor).into_response())
}

/// Handle OAuth protected resource metadata discovery (RFC 9728)
async fn handle_protected_resource_metadata<E>(
    State(server): State<GatewayServer<E>>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response>
where
    E: ProtocolEngine + 'static,
{
    let config = &server.config;

    let resource = if config.is_production {
        // HTTP/2 carries the host in the :authority pseudo-header
        let host = headers
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .or_else(|| uri.authority().map(|authority| authority.as_str()))
            .ok_or_else(|| Error::InvalidRequest("missing Host header".to_string()))?;
        format!("https://{}/", host)
    } else {
        format!("http://localhost:{}/", config.port)
    };

    let metadata = serde_json::json!({
        "resource": resource,
        "authorization_servers": [config.auth.issuer],
        "jwks_uri": config.auth.jwks_url.as_str(),
        "bearer_methods_supported": ["header"],
        "resource_name": config.server_name,
    });

    Ok((
        [(header::CACHE_CONTROL, "public, max-age=3600")],
        Json(metadata),
    )
        .into_response())
}

/// Handle `POST /`: the streamable transport, served on the protocol path
async fn handle_streamable<E>(
    State(server): State<GatewayServer<E>>,
    Authenticated(caller): Authenticated,
    request: Request,
) -> Response
where
    E: ProtocolEngine + 'static,
{
    let request = match rewrite_to_protocol_path(request) {
        Ok(request) => request,
        Err(e) => {
            tracing::error!("failed to rewrite request: {}", e);
            return internal_error();
        }
    };

    tracing::debug!("dispatching streamable request for {}", caller);
    dispatch(
        server.engine.as_ref(),
        request,
        &caller,
        server.config.engine_timeout,
    )
    .await
}

/// Handle the remaining transports, forwarded as-is
async fn handle_passthrough<E>(
    State(server): State<GatewayServer<E>>,
    Authenticated(caller): Authenticated,
    request: Request,
) -> Response
where
    E: ProtocolEngine + 'static,
{
    tracing::debug!(
        "dispatching {} {} for {}",
        request.method(),
        request.uri().path(),
        caller
    );
    dispatch(
        server.engine.as_ref(),
        request,
        &caller,
        server.config.engine_timeout,
    )
    .await
}

/// Builder for GatewayServer
pub struct GatewayServerBuilder<E>
where
    E: ProtocolEngine,
{
    config: Option<GatewayConfig>,
    engine: Option<Arc<E>>,
    services: Option<Arc<ServiceHandle>>,
    service_factory: Option<ServiceFactory>,
    opaque_verifier: Option<Arc<dyn OpaqueTokenVerifier>>,
    key_sets: Option<Arc<KeySetProvider>>,
}

impl<E> Default for GatewayServerBuilder<E>
where
    E: ProtocolEngine,
{
    fn default() -> Self {
        Self {
            config: None,
            engine: None,
            services: None,
            service_factory: None,
            opaque_verifier: None,
            key_sets: None,
        }
    }
}

impl<E> GatewayServerBuilder<E>
where
    E: ProtocolEngine + 'static,
{
    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn engine(mut self, engine: Arc<E>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Share a service handle with the engine. A fresh one is created
    /// when none is given.
    pub fn services(mut self, services: Arc<ServiceHandle>) -> Self {
        self.services = Some(services);
        self
    }

    /// Data service bound on the first incoming request.
    pub fn service_factory<F, N>(mut self, factory: F) -> Self
    where
        F: Fn() -> Arc<N> + Send + Sync + 'static,
        N: NoteStore + 'static,
    {
        self.service_factory = Some(Arc::new(move || factory() as Arc<dyn NoteStore>));
        self
    }

    pub fn opaque_verifier(mut self, verifier: Arc<dyn OpaqueTokenVerifier>) -> Self {
        self.opaque_verifier = Some(verifier);
        self
    }

    /// Supply the key set provider, e.g. one with a custom cache policy.
    pub fn key_sets(mut self, key_sets: Arc<KeySetProvider>) -> Self {
        self.key_sets = Some(key_sets);
        self
    }

    pub fn build(self) -> Result<GatewayServer<E>> {
        let config = self
            .config
            .ok_or_else(|| Error::InvalidRequest("config required".to_string()))?;
        let engine = self
            .engine
            .ok_or_else(|| Error::InvalidRequest("engine required".to_string()))?;

        let key_sets = match self.key_sets {
            Some(key_sets) => key_sets,
            None => Arc::new(KeySetProvider::new(config.auth.verify_timeout)?),
        };

        let mut verifier = TokenVerifier::new(&config.auth, key_sets);
        if let Some(opaque) = self.opaque_verifier {
            verifier = verifier.with_opaque_verifier(opaque);
        }

        let gate = Arc::new(AuthGate::new(config.auth.clone(), verifier));

        Ok(GatewayServer {
            config: Arc::new(config),
            gate,
            engine,
            services: self.services.unwrap_or_default(),
            service_factory: self.service_factory,
        })
    }
}
