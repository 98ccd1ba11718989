use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tracing::warn;

use parley_types::api::HealthResponse;

use crate::auth::TokenVerifier;
use crate::config::GatewayConfig;
use crate::connection::handle_connection;
use crate::registry::PresenceRegistry;
use crate::router::MessageRouter;
use crate::store::MessageStore;

/// Everything a connection needs, shared by every handler.
#[derive(Clone)]
pub struct GatewayState {
    registry: PresenceRegistry,
    router: MessageRouter,
    verifier: Arc<dyn TokenVerifier>,
    config: Arc<GatewayConfig>,
}

impl GatewayState {
    /// Spawns the presence registry, so this must run inside a Tokio runtime.
    pub fn new(store: Arc<dyn MessageStore>, verifier: Arc<dyn TokenVerifier>, config: GatewayConfig) -> Self {
        let registry = PresenceRegistry::spawn();
        let router = MessageRouter::new(registry.clone(), store);
        Self {
            registry,
            router,
            verifier,
            config: Arc::new(config),
        }
    }

    pub fn registry(&self) -> &PresenceRegistry {
        &self.registry
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    pub token: Option<String>,
}

pub fn routes(state: GatewayState) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/health", get(health))
        .with_state(state)
}

/// The token is checked before the upgrade. A bad token never gets a
/// socket, only a 401.
async fn ws_upgrade(
    State(state): State<GatewayState>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = params
        .token
        .or_else(|| bearer_token(&headers))
        .unwrap_or_default();

    let user = match state.verifier.verify(&token) {
        Ok(user) => user,
        Err(e) => {
            warn!("Rejected gateway upgrade: {}", e);
            return (StatusCode::UNAUTHORIZED, e.to_string()).into_response();
        }
    };

    let max_frame_bytes = state.config.max_frame_bytes;
    ws.max_message_size(max_frame_bytes)
        .on_upgrade(move |socket| handle_connection(socket, state, user))
}

async fn health(State(state): State<GatewayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        online: state.registry.online_count(),
    })
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_header_is_parsed() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_none());

        headers.insert(header::AUTHORIZATION, "Bearer abc.def".parse().unwrap());
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc.def"));

        headers.insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert!(bearer_token(&headers).is_none());
    }
}
