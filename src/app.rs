use std::sync::Arc;

use axum::{
    http::HeaderValue,
    middleware,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::access::AccessResolver;
use crate::database::RecordStore;
use crate::handlers::{protected, public};
use crate::middleware::jwt_auth_middleware;

/// Shared, read-only request state
#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<AccessResolver>,
    pub store: Arc<dyn RecordStore>,
    pub jwt_secret: Arc<str>,
    pub max_nested_depth: u32,
    /// Right required by the explain endpoint
    pub explain_right: Option<Arc<str>>,
}

impl AppState {
    pub fn new(resolver: AccessResolver, store: Arc<dyn RecordStore>, jwt_secret: impl Into<Arc<str>>) -> Self {
        Self {
            resolver: Arc::new(resolver),
            store,
            jwt_secret: jwt_secret.into(),
            max_nested_depth: crate::config::config().filter.max_nested_depth,
            explain_right: crate::config::config().access.explain_right.as_deref().map(Arc::from),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        // Public
        .route("/health", get(public::health))
        // Protected API
        .merge(protected_routes(state.clone()))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

/// Router with the CORS policy from configuration
pub fn router_with_cors(state: AppState, origins: &[String]) -> Router {
    let cors = if origins.iter().any(|o| o == "*") {
        CorsLayer::permissive()
    } else {
        let origins = origins.iter().filter_map(|o| o.parse().ok()).collect::<Vec<HeaderValue>>();
        CorsLayer::new().allow_origin(origins).allow_methods(tower_http::cors::Any).allow_headers(tower_http::cors::Any)
    };
    router(state).layer(cors)
}

fn protected_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/api/auth/whoami", get(protected::auth::whoami))
        .route("/api/data/:resource", get(protected::data::list))
        .route("/api/data/:resource/:id", get(protected::data::read))
        .route("/api/find/:resource", post(protected::find::find_post))
        .route("/api/access/explain/:resource/:operation", post(protected::access::explain))
        .route_layer(middleware::from_fn_with_state(state, jwt_auth_middleware))
}
