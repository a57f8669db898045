use std::collections::HashMap;

use axum::extract::State;
use axum::response::Response;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::handlers::events::present_events;
use crate::handlers::extract::ResourceId;
use crate::models::{EventView, Registration, RegistrationView, User, UserSummary};
use crate::state::AppState;
use crate::store::Store;
use crate::utils::error::AppError;
use crate::utils::response::success;

async fn present_registrations(
    store: &dyn Store,
    user: &User,
    registrations: Vec<Registration>,
) -> Result<Vec<RegistrationView>, AppError> {
    let event_ids: Vec<Uuid> = registrations.iter().map(|r| r.event_id).collect();
    let events = store.find_events(&event_ids).await?;
    let mut views: HashMap<Uuid, EventView> = present_events(store, &events)
        .await?
        .into_iter()
        .map(|view| (view.id, view))
        .collect();

    let summary = UserSummary::from(user);
    registrations
        .into_iter()
        .map(|registration| {
            let event = views.remove(&registration.event_id).ok_or_else(|| {
                AppError::InternalServerError(format!(
                    "event {} of registration {} is missing",
                    registration.event_id, registration.id
                ))
            })?;
            Ok(RegistrationView {
                id: registration.id,
                user: summary.clone(),
                event,
                registered_at: registration.registered_at,
            })
        })
        .collect()
}

fn registration_not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("Registration with id '{}' was not found", id))
}

pub async fn list_my_registrations(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let registrations = state.store.registrations_for_user(user.id).await?;
    let views = present_registrations(state.store.as_ref(), &user, registrations).await?;

    Ok(success(views, "Registrations retrieved successfully"))
}

pub async fn get_my_registration(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    ResourceId(id): ResourceId,
) -> Result<Response, AppError> {
    // Other users' registrations are reported as missing rather than forbidden.
    let registration = state
        .store
        .find_registration(id)
        .await?
        .filter(|r| r.user_id == user.id)
        .ok_or_else(|| registration_not_found(id))?;

    let view = present_registrations(state.store.as_ref(), &user, vec![registration])
        .await?
        .pop()
        .ok_or_else(|| registration_not_found(id))?;

    Ok(success(view, "Registration retrieved successfully"))
}
