use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tracing::debug;

/// Actor attribution resolved from an optional bearer token. Endpoints never
/// reject on auth failure; an unverifiable token just leaves the actor
/// anonymous and audit entries record no actor id.
#[derive(Debug, Clone, Default)]
pub struct CurrentActor(pub Option<String>);

#[derive(Debug, Deserialize)]
struct IdentityClaims {
    sub: String,
}

/// Resolve the acting user from the `Authorization` header, if any.
///
/// Returns `None` when the header is missing, malformed, or when the token
/// fails HS256 verification against `secret`. When no secret is configured
/// every request is anonymous.
pub fn resolve_actor(headers: &HeaderMap, secret: Option<&str>) -> CurrentActor {
    let Some(secret) = secret else {
        return CurrentActor(None);
    };
    let Some(token) = bearer_token(headers) else {
        return CurrentActor(None);
    };

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_aud = false;

    match decode::<IdentityClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    ) {
        Ok(decoded) if !decoded.claims.sub.trim().is_empty() => {
            CurrentActor(Some(decoded.claims.sub))
        }
        Ok(_) => CurrentActor(None),
        Err(error) => {
            debug!(%error, "bearer token rejected, proceeding anonymously");
            CurrentActor(None)
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get("authorization")?.to_str().ok()?;
    let (scheme, token) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    Some(token)
}
