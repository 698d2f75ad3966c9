//! Custom Axum extractors.
//!
//! The upstream auth layer terminates tokens and forwards identity headers;
//! these extractors turn them into the single `Actor` value the engine
//! consumes, and collect the client metadata recorded on transactions.

use crate::types::{Actor, ClientMeta, Role, UserId};
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use uuid::Uuid;

/// The authenticated principal, from upstream-auth headers.
///
/// Requires `X-User-Id` (UUID). `X-User-Email` and `X-User-Role` are
/// optional; unknown roles default to `user`.
#[derive(Debug, Clone)]
pub struct CurrentActor(pub Actor);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentActor
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("X-User-Id")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or((
                StatusCode::UNAUTHORIZED,
                "Authentication required".to_string(),
            ))?;
        let email = parts
            .headers
            .get("X-User-Email")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let role = parts
            .headers
            .get("X-User-Role")
            .and_then(|v| v.to_str().ok())
            .map_or(Role::User, Role::parse);
        Ok(Self(Actor {
            user_id: UserId::from_uuid(user_id),
            email,
            role,
            is_system: false,
        }))
    }
}

/// Client metadata recorded on the transaction.
///
/// IP comes from `X-Forwarded-For` (first hop) or `X-Real-IP`; the
/// User-Agent header rides along verbatim.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo(pub ClientMeta);

#[async_trait]
impl<S> FromRequestParts<S> for ClientInfo
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ip = parts
            .headers
            .get("X-Forwarded-For")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .map(|s| s.trim().to_string())
            .or_else(|| {
                parts
                    .headers
                    .get("X-Real-IP")
                    .and_then(|v| v.to_str().ok())
                    .map(ToString::to_string)
            });
        let user_agent = parts
            .headers
            .get("User-Agent")
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
        Ok(Self(ClientMeta { ip, user_agent }))
    }
}

/// The optional `Idempotency-Key` request header.
#[derive(Debug, Clone, Default)]
pub struct IdempotencyKeyHeader(pub Option<String>);

#[async_trait]
impl<S> FromRequestParts<S> for IdempotencyKeyHeader
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get("Idempotency-Key") else {
            return Ok(Self(None));
        };
        let key = value
            .to_str()
            .map_err(|_| {
                (
                    StatusCode::BAD_REQUEST,
                    "Invalid Idempotency-Key header value".to_string(),
                )
            })?
            .to_string();
        if key.is_empty() || key.len() > 128 {
            return Err((
                StatusCode::BAD_REQUEST,
                "Idempotency-Key must be between 1 and 128 characters".to_string(),
            ));
        }
        Ok(Self(Some(key)))
    }
}
