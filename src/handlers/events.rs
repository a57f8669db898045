use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::response::Response;
use chrono::Utc;
use tracing::info;
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::auth::{AuthUser, MaybeAuthUser};
use crate::handlers::extract::{ApiJson, ResourceId};
use crate::models::event::EventListQuery;
use crate::models::{
    Event, EventDetail, EventDraft, EventFilter, EventPatch, EventView, RegistrationView, User,
    UserSummary,
};
use crate::services::permissions::ensure_can_modify;
use crate::state::AppState;
use crate::store::{event_not_found, Store};
use crate::utils::error::AppError;
use crate::utils::response::{created, empty_success, no_content, success};

pub(crate) async fn load_event(store: &dyn Store, id: Uuid) -> Result<Event, AppError> {
    store.find_event(id).await?.ok_or_else(|| event_not_found(id))
}

/// Attaches organizer summaries with a single user lookup.
pub(crate) async fn present_events(
    store: &dyn Store,
    events: &[Event],
) -> Result<Vec<EventView>, AppError> {
    let mut organizer_ids: Vec<Uuid> = events.iter().map(|e| e.organizer_id).collect();
    organizer_ids.sort_unstable();
    organizer_ids.dedup();

    let organizers: HashMap<Uuid, UserSummary> = store
        .find_users(&organizer_ids)
        .await?
        .iter()
        .map(|u| (u.id, UserSummary::from(u)))
        .collect();

    events
        .iter()
        .map(|event| {
            organizers
                .get(&event.organizer_id)
                .cloned()
                .map(|organizer| EventView::new(event, organizer))
                .ok_or_else(|| {
                    AppError::InternalServerError(format!(
                        "organizer {} of event {} is missing",
                        event.organizer_id, event.id
                    ))
                })
        })
        .collect()
}

async fn present_event(store: &dyn Store, event: &Event) -> Result<EventView, AppError> {
    present_events(store, std::slice::from_ref(event))
        .await?
        .pop()
        .ok_or_else(|| AppError::InternalServerError("event presentation was empty".to_string()))
}

fn ensure_upcoming(draft: &EventDraft) -> Result<(), AppError> {
    draft.ensure_upcoming(Utc::now()).map_err(|e| {
        let mut errors = ValidationErrors::new();
        errors.add("start_time", e);
        AppError::InvalidInput(errors)
    })
}

pub async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventListQuery>,
) -> Result<Response, AppError> {
    let filter = EventFilter::try_from(query).map_err(AppError::ValidationError)?;
    let events = state.store.list_events(&filter).await?;
    let views = present_events(state.store.as_ref(), &events).await?;

    Ok(success(views, "Events retrieved successfully"))
}

pub async fn create_event(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    ApiJson(draft): ApiJson<EventDraft>,
) -> Result<Response, AppError> {
    draft.validate()?;
    ensure_upcoming(&draft)?;

    let event = state.store.create_event(user.id, &draft).await?;
    info!(event_id = %event.id, organizer_id = %user.id, "Event created");

    Ok(created(
        EventView::new(&event, UserSummary::from(&user)),
        "Event created successfully",
    ))
}

pub async fn get_event(
    MaybeAuthUser(viewer): MaybeAuthUser,
    State(state): State<AppState>,
    ResourceId(id): ResourceId,
) -> Result<Response, AppError> {
    let store = state.store.as_ref();
    let event = load_event(store, id).await?;
    let view = present_event(store, &event).await?;
    let attendees = store.attendees(id).await?;
    let is_registered = match viewer {
        Some(viewer) => store.is_registered(viewer.id, id).await?,
        None => false,
    };

    Ok(success(
        EventDetail {
            event: view,
            attendees: attendees.iter().map(UserSummary::from).collect(),
            is_registered,
        },
        "Event retrieved successfully",
    ))
}

pub async fn replace_event(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    ResourceId(id): ResourceId,
    ApiJson(draft): ApiJson<EventDraft>,
) -> Result<Response, AppError> {
    apply_changes(&state, &user, id, EventPatch::from(draft)).await
}

pub async fn patch_event(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    ResourceId(id): ResourceId,
    ApiJson(patch): ApiJson<EventPatch>,
) -> Result<Response, AppError> {
    apply_changes(&state, &user, id, patch).await
}

async fn apply_changes(
    state: &AppState,
    user: &User,
    id: Uuid,
    patch: EventPatch,
) -> Result<Response, AppError> {
    let event = load_event(state.store.as_ref(), id).await?;
    ensure_can_modify(user, &event)?;

    let moves_start = patch.changes_start_time(&event);
    let draft = patch.apply(&event);
    draft.validate()?;
    if moves_start {
        ensure_upcoming(&draft)?;
    }

    let updated = state.store.update_event(id, &draft).await?;
    info!(event_id = %id, organizer_id = %user.id, "Event updated");

    Ok(success(
        EventView::new(&updated, UserSummary::from(user)),
        "Event updated successfully",
    ))
}

pub async fn delete_event(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    ResourceId(id): ResourceId,
) -> Result<Response, AppError> {
    let event = load_event(state.store.as_ref(), id).await?;
    ensure_can_modify(&user, &event)?;

    state.store.delete_event(id).await?;
    info!(event_id = %id, organizer_id = %user.id, "Event deleted");

    Ok(no_content())
}

pub async fn register(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    ResourceId(id): ResourceId,
) -> Result<Response, AppError> {
    let store = state.store.as_ref();
    let event = load_event(store, id).await?;

    let registration = state.registrations.register(&user, &event).await?;

    // Reload so the response reflects the new attendee count.
    let event = load_event(store, id).await?;
    let view = RegistrationView {
        id: registration.id,
        user: UserSummary::from(&user),
        event: present_event(store, &event).await?,
        registered_at: registration.registered_at,
    };

    Ok(created(view, "Successfully registered for event"))
}

pub async fn unregister(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    ResourceId(id): ResourceId,
) -> Result<Response, AppError> {
    let event = load_event(state.store.as_ref(), id).await?;
    state.registrations.unregister(&user, &event).await?;

    Ok(empty_success("Successfully unregistered from event"))
}

pub async fn attendees(
    State(state): State<AppState>,
    ResourceId(id): ResourceId,
) -> Result<Response, AppError> {
    let store = state.store.as_ref();
    load_event(store, id).await?;
    let attendees: Vec<UserSummary> = store
        .attendees(id)
        .await?
        .iter()
        .map(UserSummary::from)
        .collect();

    Ok(success(attendees, "Attendees retrieved successfully"))
}
