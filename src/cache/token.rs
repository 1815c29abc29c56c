use std::fmt;
use std::sync::Arc;

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cache::error::TokenError;
use crate::utils::constants::MISSING_EXPIRY_FALLBACK_MS;

/// Claims read from the token payload. Signatures are never checked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// session identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

struct TokenInner {
    raw: String,
    claims: TokenClaims,
}

/// Immutable decoded credential.
///
/// Clones share the same allocation; a refreshed credential is always a
/// new `Token`.
#[derive(Clone)]
pub struct Token {
    inner: Arc<TokenInner>,
}

impl Token {
    /// Decodes a compact `header.payload.signature` token.
    pub fn decode(raw: impl Into<String>) -> Result<Self, TokenError> {
        let raw = raw.into();
        let mut parts = raw.split('.');
        let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(_), Some(payload), Some(_), None) => payload,
            _ => return Err(TokenError::InvalidToken("expected three segments".to_owned())),
        };

        let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| TokenError::InvalidToken(format!("base64 decode error: {}", e)))?;

        let claims = serde_json::from_slice::<TokenClaims>(&decoded)
            .map_err(|e| TokenError::InvalidToken(format!("invalid payload: {}", e)))?;

        Ok(Self::from_parts(raw, claims))
    }

    pub fn from_parts(raw: impl Into<String>, claims: TokenClaims) -> Self {
        Self {
            inner: Arc::new(TokenInner {
                raw: raw.into(),
                claims,
            }),
        }
    }

    pub fn raw(&self) -> &str {
        &self.inner.raw
    }

    pub fn claims(&self) -> &TokenClaims {
        &self.inner.claims
    }

    pub fn subject(&self) -> Option<&str> {
        self.inner.claims.sub.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.inner.claims.sid.as_deref()
    }

    pub fn issued_at(&self) -> Option<i64> {
        self.inner.claims.iat
    }

    pub fn expires_at_secs(&self) -> Option<i64> {
        self.inner.claims.exp
    }

    /// Hard expiry in milliseconds; `now_ms + 60s` when the token carries no `exp`.
    pub fn expires_at_ms(&self, now_ms: i64) -> i64 {
        match self.inner.claims.exp {
            Some(exp) => exp.saturating_mul(1000),
            None => now_ms + MISSING_EXPIRY_FALLBACK_MS,
        }
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.inner.raw == other.inner.raw
    }
}

impl Eq for Token {}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let raw = &self.inner.raw;
        let shown: String = raw.chars().take(12).collect();
        let ellipsis = if shown.len() < raw.len() { "…" } else { "" };
        f.debug_struct("Token")
            .field("raw", &format_args!("{}{}", shown, ellipsis))
            .field("sid", &self.inner.claims.sid)
            .field("exp", &self.inner.claims.exp)
            .finish()
    }
}
