//! Bearer token authentication.
//!
//! The expected token is read once from the environment variable named by
//! `auth.token_env`. Tokens are compared by HMAC tag so the comparison time
//! does not depend on where the first mismatching byte is.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

use crate::config::AuthConfig;

type HmacSha256 = Hmac<Sha256>;

const TAG_KEY: &[u8] = b"docmark-bearer-token";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// The server has no token configured, so no request can be accepted.
    #[error("server authentication is not configured ({env} is unset)")]
    MissingSecret { env: String },

    #[error("missing bearer token")]
    MissingCredential,

    #[error("invalid bearer token")]
    InvalidCredential,
}

/// Expected bearer token for API requests.
#[derive(Clone)]
pub struct BearerAuth {
    env: String,
    secret: Option<String>,
}

impl BearerAuth {
    pub fn from_env(config: &AuthConfig) -> Self {
        let secret = std::env::var(&config.token_env)
            .ok()
            .filter(|s| !s.is_empty());
        Self {
            env: config.token_env.clone(),
            secret,
        }
    }

    pub fn with_secret(secret: Option<String>) -> Self {
        Self {
            env: AuthConfig::default().token_env,
            secret,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.secret.is_some()
    }

    /// Checks an `Authorization` header value.
    pub fn verify(&self, authorization: Option<&str>) -> Result<(), AuthError> {
        let Some(secret) = self.secret.as_deref() else {
            return Err(AuthError::MissingSecret {
                env: self.env.clone(),
            });
        };
        let token = authorization
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingCredential)?;

        let expected = keyed()?.chain_update(secret.as_bytes()).finalize().into_bytes();
        keyed()?
            .chain_update(token.as_bytes())
            .verify_slice(&expected)
            .map_err(|_| AuthError::InvalidCredential)
    }
}

fn keyed() -> Result<HmacSha256, AuthError> {
    HmacSha256::new_from_slice(TAG_KEY).map_err(|_| AuthError::InvalidCredential)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_matching_token() {
        let auth = BearerAuth::with_secret(Some("s3cret".to_string()));
        assert_eq!(auth.verify(Some("Bearer s3cret")), Ok(()));
    }

    #[test]
    fn rejects_wrong_or_missing_token() {
        let auth = BearerAuth::with_secret(Some("s3cret".to_string()));
        assert_eq!(auth.verify(Some("Bearer nope")), Err(AuthError::InvalidCredential));
        assert_eq!(auth.verify(Some("Bearer s3cret2")), Err(AuthError::InvalidCredential));
        assert_eq!(auth.verify(Some("s3cret")), Err(AuthError::MissingCredential));
        assert_eq!(auth.verify(Some("Bearer ")), Err(AuthError::MissingCredential));
        assert_eq!(auth.verify(None), Err(AuthError::MissingCredential));
    }

    #[test]
    fn unconfigured_server_rejects_everything() {
        let auth = BearerAuth::with_secret(None);
        assert!(matches!(
            auth.verify(Some("Bearer anything")),
            Err(AuthError::MissingSecret { .. })
        ));
    }
}
