//! Identity verification for WebSocket connections

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::game::PlayerId;

pub type HmacSha256 = Hmac<Sha256>;

/// Claims carried by a signed identity token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (player ID)
    pub sub: PlayerId,
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

/// Verify a `payload.signature` token and extract its claims. Both parts
/// are base64url without padding; the signature is HMAC-SHA256 over the
/// encoded payload.
pub fn verify_token(token: &str, secret: &str) -> Result<Claims, AuthError> {
    let (payload_b64, signature_b64) = token.split_once('.').ok_or(AuthError::InvalidToken)?;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::InvalidToken)?;
    mac.update(payload_b64.as_bytes());

    let provided_signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| AuthError::InvalidToken)?;

    // Constant-time comparison
    mac.verify_slice(&provided_signature)
        .map_err(|_| AuthError::InvalidToken)?;

    let payload_json = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| AuthError::InvalidToken)?;

    let claims: Claims =
        serde_json::from_slice(&payload_json).map_err(|_| AuthError::InvalidToken)?;

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|_| AuthError::InvalidToken)?
        .as_secs();

    if claims.exp < now {
        return Err(AuthError::TokenExpired);
    }

    Ok(claims)
}

/// Produce a token for `claims`
#[cfg(test)]
pub fn sign_token(claims: &Claims, secret: &str) -> Result<String, AuthError> {
    let payload = serde_json::to_vec(claims).map_err(|_| AuthError::InvalidToken)?;
    let payload_b64 = URL_SAFE_NO_PAD.encode(payload);

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::InvalidToken)?;
    mac.update(payload_b64.as_bytes());
    let signature_b64 = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{}.{}", payload_b64, signature_b64))
}

/// Authentication error types
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing identity")]
    MissingIdentity,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (StatusCode::UNAUTHORIZED, self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    fn claims(exp: u64) -> Claims {
        Claims {
            sub: 42,
            name: Some("alice".into()),
            exp,
        }
    }

    #[test]
    fn test_valid_token() {
        let token = sign_token(&claims(u64::MAX), SECRET).unwrap();
        let verified = verify_token(&token, SECRET).unwrap();
        assert_eq!(verified.sub, 42);
        assert_eq!(verified.name.as_deref(), Some("alice"));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = sign_token(&claims(u64::MAX), SECRET).unwrap();
        assert!(matches!(
            verify_token(&token, "other"),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let token = sign_token(&claims(u64::MAX), SECRET).unwrap();
        let (_, signature) = token.split_once('.').unwrap();
        let forged = URL_SAFE_NO_PAD.encode(br#"{"sub":1,"exp":18446744073709551615}"#);
        assert!(verify_token(&format!("{}.{}", forged, signature), SECRET).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let token = sign_token(&claims(1), SECRET).unwrap();
        assert!(matches!(
            verify_token(&token, SECRET),
            Err(AuthError::TokenExpired)
        ));
    }

    #[test]
    fn test_malformed_token_rejected() {
        assert!(verify_token("no-dot-here", SECRET).is_err());
        assert!(verify_token("a.b.c", SECRET).is_err());
    }
}
