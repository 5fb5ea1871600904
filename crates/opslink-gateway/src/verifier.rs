use jsonwebtoken::{DecodingKey, Validation, decode};

use opslink_types::api::Claims;

use crate::error::GatewayError;

/// Validates credentials issued by the platform's auth service.
///
/// Token issuance and refresh live outside the messaging core; this is the
/// one seam through which a presented credential becomes a user identity.
/// The credential is checked once, at handshake time, never per frame.
#[derive(Clone)]
pub struct IdentityVerifier {
    secret: String,
}

impl IdentityVerifier {
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            secret: jwt_secret.into(),
        }
    }

    pub fn verify(&self, token: &str) -> Result<Claims, GatewayError> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map(|data| data.claims)
        .map_err(|_| GatewayError::Unauthenticated("invalid credential"))
    }
}
