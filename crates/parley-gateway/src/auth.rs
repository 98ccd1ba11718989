use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};

use parley_types::api::Claims;
use parley_types::models::UserProfile;

use crate::error::AuthError;

/// Checks an identity token presented at the upgrade handshake and returns
/// the profile it vouches for. Signature and expiry are always checked.
pub trait TokenVerifier: Send + Sync + 'static {
    fn verify(&self, token: &str) -> Result<UserProfile, AuthError>;
}

/// HS256 JWTs signed with the sign-in service's shared secret.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<UserProfile, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let token_data = decode::<Claims>(token, &self.key, &self.validation)?;
        if token_data.claims.sub.is_empty() {
            return Err(AuthError::EmptySubject);
        }

        Ok(UserProfile::from(token_data.claims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    const SECRET: &str = "test-secret";

    fn token(secret: &str, sub: &str, exp_offset_secs: i64) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            name: Some("Ada".into()),
            avatar_url: None,
            public_key: Some("pk".into()),
            exp: (chrono::Utc::now().timestamp() + exp_offset_secs) as usize,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn accepts_valid_token() {
        let verifier = JwtVerifier::new(SECRET);
        let profile = verifier.verify(&token(SECRET, "u1", 3600)).unwrap();
        assert_eq!(profile.id, "u1");
        assert_eq!(profile.name, "Ada");
        assert_eq!(profile.public_key.as_deref(), Some("pk"));
    }

    #[test]
    fn rejects_wrong_signature() {
        let verifier = JwtVerifier::new(SECRET);
        let err = verifier.verify(&token("other-secret", "u1", 3600)).unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
    }

    #[test]
    fn rejects_expired_token() {
        let verifier = JwtVerifier::new(SECRET);
        let err = verifier.verify(&token(SECRET, "u1", -3600)).unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
    }

    #[test]
    fn rejects_missing_and_garbage_tokens() {
        let verifier = JwtVerifier::new(SECRET);
        assert!(matches!(verifier.verify(""), Err(AuthError::MissingToken)));
        assert!(matches!(verifier.verify("not-a-jwt"), Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn rejects_empty_subject() {
        let verifier = JwtVerifier::new(SECRET);
        let err = verifier.verify(&token(SECRET, "", 3600)).unwrap_err();
        assert!(matches!(err, AuthError::EmptySubject));
    }
}
