//! Token authentication for the API.
//!
//! Clients send `Authorization: Token <key>` (or `Bearer <key>`). Handlers
//! that need an identity take [`AuthUser`]; handlers that merely benefit
//! from one take [`MaybeAuthUser`].

pub mod password;
pub mod token;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use crate::models::User;
use crate::state::AppState;
use crate::utils::error::AppError;

#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or_else(|| {
                AppError::AuthError("Authentication credentials were not provided".to_string())
            })?
            .to_str()
            .map_err(|_| AppError::AuthError("Invalid token header".to_string()))?;

        let key = token::parse_authorization(header)
            .ok_or_else(|| AppError::AuthError("Invalid token header".to_string()))?;

        state
            .store
            .find_user_by_token(key)
            .await?
            .map(AuthUser)
            .ok_or_else(|| AppError::AuthError("Invalid token".to_string()))
    }
}

/// The caller's identity when an `Authorization` header is sent.
///
/// Only a missing header means anonymous. A bad token is still a 401 and a
/// failed lookup is still a server error.
#[derive(Debug, Clone)]
pub struct MaybeAuthUser(pub Option<User>);

#[async_trait]
impl FromRequestParts<AppState> for MaybeAuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if !parts.headers.contains_key(AUTHORIZATION) {
            return Ok(Self(None));
        }
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;
        Ok(Self(Some(user)))
    }
}
