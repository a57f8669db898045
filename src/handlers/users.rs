use axum::extract::State;
use axum::response::Response;

use crate::auth::AuthUser;
use crate::handlers::extract::ResourceId;
use crate::models::UserDetail;
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::success;

pub async fn list_users(
    _caller: AuthUser,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let users = state.store.list_users().await?;
    Ok(success(users, "Users retrieved successfully"))
}

pub async fn get_user(
    _caller: AuthUser,
    State(state): State<AppState>,
    ResourceId(id): ResourceId,
) -> Result<Response, AppError> {
    let user = state
        .store
        .find_user(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User with id '{}' was not found", id)))?;
    let activity = state.store.user_activity(id).await?;

    Ok(success(
        UserDetail { user, activity },
        "User retrieved successfully",
    ))
}
