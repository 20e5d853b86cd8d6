//! Acting-player resolution from the bearer token.
//!
//! The token's signature is not checked here; the backend does that. The
//! client only needs the subject to fill `player_id` in its envelopes.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::error::AuthError;

#[derive(Deserialize)]
struct Claims {
    #[serde(default)]
    sub: Option<Value>,
    #[serde(default)]
    user_id: Option<Value>,
}

fn claim_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn player_id_from_token(token: &str) -> Result<String, AuthError> {
    let mut parts = token.trim().split('.');
    let (Some(_header), Some(payload), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(AuthError::Malformed);
    };
    // Some issuers keep the padding.
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('='))?;
    let claims: Claims = serde_json::from_slice(&bytes)?;
    claims
        .sub
        .and_then(claim_to_string)
        .or_else(|| claims.user_id.and_then(claim_to_string))
        .ok_or(AuthError::MissingSubject)
}

/// Token subject first, then the locally cached id.
pub fn resolve_player_id(token: Option<&str>, cached: Option<&str>) -> Option<String> {
    if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
        match player_id_from_token(token) {
            Ok(id) => return Some(id),
            Err(e) => warn!("could not read player id from token: {e}"),
        }
    }
    cached
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;

    fn token_with(payload: &str) -> String {
        format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#),
            URL_SAFE_NO_PAD.encode(payload)
        )
    }

    #[test]
    fn reads_sub_then_user_id() {
        assert_eq!(player_id_from_token(&token_with(r#"{"sub":"u-7"}"#)).unwrap(), "u-7");
        assert_eq!(player_id_from_token(&token_with(r#"{"user_id":42}"#)).unwrap(), "42");
        assert!(matches!(
            player_id_from_token(&token_with(r#"{"exp":1}"#)),
            Err(AuthError::MissingSubject)
        ));
    }

    #[test]
    fn malformed_tokens_fall_back_to_cache() {
        assert!(matches!(player_id_from_token("abc"), Err(AuthError::Malformed)));
        assert!(matches!(player_id_from_token("a.!!!.c"), Err(AuthError::Base64(_))));
        assert_eq!(resolve_player_id(Some("abc"), Some("cached-1")).as_deref(), Some("cached-1"));
        assert_eq!(resolve_player_id(None, Some("  ")), None);
        assert_eq!(
            resolve_player_id(Some(&token_with(r#"{"sub":"u-1"}"#)), Some("cached-1")).as_deref(),
            Some("u-1")
        );
    }
}
