use axum::extract::State;
use axum::response::Response;
use tracing::info;
use validator::Validate;

use crate::auth::password::{hash_password, verify_password};
use crate::auth::token::generate_token;
use crate::handlers::extract::ApiJson;
use crate::models::user::{AuthPayload, LoginRequest, SignUpRequest};
use crate::models::NewUser;
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::{created, success};

fn invalid_credentials() -> AppError {
    AppError::AuthError("Invalid credentials".to_string())
}

pub async fn sign_up(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<SignUpRequest>,
) -> Result<Response, AppError> {
    request.validate()?;

    let password_hash = hash_password(&request.password)?;
    let user = state
        .store
        .create_user(NewUser {
            username: request.username,
            email: request.email,
            first_name: request.first_name,
            last_name: request.last_name,
            password_hash,
        })
        .await?;
    let token = state.store.issue_token(user.id, &generate_token()).await?;
    info!(user_id = %user.id, username = %user.username, "User signed up");

    Ok(created(
        AuthPayload { user, token },
        "User registered successfully",
    ))
}

pub async fn login(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<LoginRequest>,
) -> Result<Response, AppError> {
    request.validate()?;

    let credentials = state
        .store
        .find_credentials(&request.username)
        .await?
        .ok_or_else(invalid_credentials)?;
    if !verify_password(&request.password, &credentials.password_hash)? {
        return Err(invalid_credentials());
    }

    let user = credentials.user;
    let token = state.store.issue_token(user.id, &generate_token()).await?;
    info!(user_id = %user.id, "User logged in");

    Ok(success(AuthPayload { user, token }, "Login successful"))
}
