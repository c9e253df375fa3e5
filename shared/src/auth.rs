use crate::responses::ErrorKey;
use crate::types::UserRole;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("missing Authorization header")]
    MissingToken,
    #[error("malformed token")]
    Malformed,
    #[error("token signature does not match")]
    BadSignature,
    #[error("token expired")]
    Expired,
    #[error("no role in organization {0}")]
    NoMembership(String),
}

impl AuthError {
    pub fn error_key(&self) -> ErrorKey {
        match self {
            AuthError::MissingToken => ErrorKey::Unauthorized,
            AuthError::Malformed | AuthError::BadSignature => ErrorKey::InvalidToken,
            AuthError::Expired => ErrorKey::TokenExpired,
            AuthError::NoMembership(_) => ErrorKey::Forbidden,
        }
    }
}

/// Signed token payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayload {
    /// User id
    pub sub: String,
    #[serde(default)]
    pub org_id_to_role: HashMap<String, UserRole>,
    /// Expiry, seconds since epoch
    pub exp: i64,
}

/// Authenticated caller, valid for one request
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: String,
    pub org_roles: HashMap<String, UserRole>,
}

impl Session {
    pub fn role_in(&self, organization_id: &str) -> Result<UserRole, AuthError> {
        self.org_roles
            .get(organization_id)
            .copied()
            .ok_or_else(|| AuthError::NoMembership(organization_id.to_string()))
    }
}

impl From<TokenPayload> for Session {
    fn from(payload: TokenPayload) -> Self {
        Session {
            user_id: payload.sub,
            org_roles: payload.org_id_to_role,
        }
    }
}

fn mac(secret: &[u8]) -> HmacSha256 {
    HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size")
}

pub fn sign_token(payload: &TokenPayload, secret: &[u8]) -> Result<String, serde_json::Error> {
    let header = URL_SAFE_NO_PAD.encode(TOKEN_HEADER);
    let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload)?);
    let signing_input = format!("{}.{}", header, body);

    let mut mac = mac(secret);
    mac.update(signing_input.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{}.{}", signing_input, signature))
}

/// Check signature and expiry; `now` is seconds since epoch
pub fn verify_token(token: &str, secret: &[u8], now: i64) -> Result<TokenPayload, AuthError> {
    let mut parts = token.split('.');
    let (header, body, signature) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(b), Some(s), None) => (h, b, s),
        _ => return Err(AuthError::Malformed),
    };

    let signature = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|_| AuthError::Malformed)?;
    let mut mac = mac(secret);
    mac.update(header.as_bytes());
    mac.update(b".");
    mac.update(body.as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| AuthError::BadSignature)?;

    let body = URL_SAFE_NO_PAD.decode(body).map_err(|_| AuthError::Malformed)?;
    let payload: TokenPayload = serde_json::from_slice(&body).map_err(|_| AuthError::Malformed)?;

    if payload.exp <= now {
        return Err(AuthError::Expired);
    }
    Ok(payload)
}

/// Extract the token from `Authorization: Bearer <token>`
pub fn bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    let header = header.ok_or(AuthError::MissingToken)?.trim();
    let token = header
        .strip_prefix("Bearer")
        .or_else(|| header.strip_prefix("bearer"))
        .unwrap_or(header)
        .trim();
    if token.is_empty() {
        return Err(AuthError::MissingToken);
    }
    Ok(token)
}

pub fn authenticate(header: Option<&str>, secret: &[u8], now: i64) -> Result<Session, AuthError> {
    let token = bearer_token(header)?;
    verify_token(token, secret, now).map(Session::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-secret";

    fn payload(exp: i64) -> TokenPayload {
        TokenPayload {
            sub: "user-1".to_string(),
            org_id_to_role: HashMap::from([
                ("org-a".to_string(), UserRole::Admin),
                ("org-b".to_string(), UserRole::Customer),
            ]),
            exp,
        }
    }

    #[test]
    fn test_signed_token_verifies() {
        let token = sign_token(&payload(2_000), SECRET).unwrap();
        let verified = verify_token(&token, SECRET, 1_000).unwrap();
        assert_eq!(verified, payload(2_000));
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let token = sign_token(&payload(2_000), SECRET).unwrap();
        assert_eq!(
            verify_token(&token, b"other", 1_000),
            Err(AuthError::BadSignature)
        );
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let token = sign_token(&payload(2_000), SECRET).unwrap();
        let mut forged = payload(2_000);
        forged.org_id_to_role.insert("org-b".to_string(), UserRole::Admin);
        let forged_body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());

        let parts: Vec<&str> = token.split('.').collect();
        let tampered = format!("{}.{}.{}", parts[0], forged_body, parts[2]);
        assert_eq!(
            verify_token(&tampered, SECRET, 1_000),
            Err(AuthError::BadSignature)
        );
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let token = sign_token(&payload(1_000), SECRET).unwrap();
        assert_eq!(verify_token(&token, SECRET, 1_000), Err(AuthError::Expired));
    }

    #[test]
    fn test_malformed_token() {
        assert_eq!(verify_token("abc", SECRET, 0), Err(AuthError::Malformed));
        assert_eq!(verify_token("a.b.c.d", SECRET, 0), Err(AuthError::Malformed));
    }

    #[test]
    fn test_bearer_extraction() {
        assert_eq!(bearer_token(Some("Bearer abc")), Ok("abc"));
        assert_eq!(bearer_token(Some("abc")), Ok("abc"));
        assert_eq!(bearer_token(Some("Bearer ")), Err(AuthError::MissingToken));
        assert_eq!(bearer_token(None), Err(AuthError::MissingToken));
    }

    #[test]
    fn test_session_role_lookup() {
        let token = sign_token(&payload(2_000), SECRET).unwrap();
        let session = authenticate(Some(&format!("Bearer {}", token)), SECRET, 1_000).unwrap();
        assert_eq!(session.user_id, "user-1");
        assert_eq!(session.role_in("org-b"), Ok(UserRole::Customer));
        assert_eq!(
            session.role_in("org-c"),
            Err(AuthError::NoMembership("org-c".to_string()))
        );
    }
}
