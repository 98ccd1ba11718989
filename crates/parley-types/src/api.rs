use serde::{Deserialize, Serialize};

// -- JWT Claims --

/// Identity token claims issued by the sign-in service and verified by the
/// gateway at upgrade time. Only `sub` and `exp` are mandatory; profile
/// claims fall back to defaults when the issuer omits them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    pub exp: usize,
}

// -- Health --

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub online: usize,
}
