pub mod auth;
pub mod config;
pub mod connection;
pub mod conversation;
pub mod endpoint;
pub mod error;
pub mod registry;
pub mod router;
pub mod routes;
pub mod store;

pub use auth::{JwtVerifier, TokenVerifier};
pub use config::GatewayConfig;
pub use routes::{GatewayState, routes};
