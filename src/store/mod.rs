//! Persistence for users, tokens, events and registrations.
//!
//! [`PgStore`] is the production backend. [`MemoryStore`] keeps everything
//! in process and backs the test suite and database-less development runs.
//! Both implementations must honour the same atomicity: a registration is
//! admitted (see [`crate::services::registration::admit`]) while no other
//! writer can change that event's registrations or capacity.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    Event, EventDraft, EventFilter, NewUser, Registration, User, UserActivity, UserCredentials,
};
use crate::utils::error::AppError;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait Store: Send + Sync {
    /// Fails with a validation error when the username is taken.
    async fn create_user(&self, new_user: NewUser) -> Result<User, AppError>;
    async fn find_user(&self, id: Uuid) -> Result<Option<User>, AppError>;
    async fn find_users(&self, ids: &[Uuid]) -> Result<Vec<User>, AppError>;
    async fn find_credentials(&self, username: &str) -> Result<Option<UserCredentials>, AppError>;
    async fn list_users(&self) -> Result<Vec<User>, AppError>;
    async fn user_activity(&self, user_id: Uuid) -> Result<UserActivity, AppError>;

    /// Stores `candidate` as the user's token unless one exists; returns the stored token.
    async fn issue_token(&self, user_id: Uuid, candidate: &str) -> Result<String, AppError>;
    async fn find_user_by_token(&self, token: &str) -> Result<Option<User>, AppError>;

    async fn create_event(&self, organizer_id: Uuid, draft: &EventDraft) -> Result<Event, AppError>;
    async fn find_event(&self, id: Uuid) -> Result<Option<Event>, AppError>;
    async fn find_events(&self, ids: &[Uuid]) -> Result<Vec<Event>, AppError>;
    async fn list_events(&self, filter: &EventFilter) -> Result<Vec<Event>, AppError>;
    /// Fails with `CapacityBelowAttendance` when the new capacity is too small.
    async fn update_event(&self, id: Uuid, draft: &EventDraft) -> Result<Event, AppError>;
    /// Removes the event and its registrations.
    async fn delete_event(&self, id: Uuid) -> Result<(), AppError>;

    /// Atomically checks duplicates and capacity, then inserts.
    async fn register(&self, user_id: Uuid, event_id: Uuid) -> Result<Registration, AppError>;
    async fn unregister(&self, user_id: Uuid, event_id: Uuid) -> Result<(), AppError>;
    /// Attendees of an event, earliest registration first.
    async fn attendees(&self, event_id: Uuid) -> Result<Vec<User>, AppError>;
    async fn is_registered(&self, user_id: Uuid, event_id: Uuid) -> Result<bool, AppError>;
    /// A user's registrations, newest first.
    async fn registrations_for_user(&self, user_id: Uuid) -> Result<Vec<Registration>, AppError>;
    async fn find_registration(&self, id: Uuid) -> Result<Option<Registration>, AppError>;
}

pub(crate) fn event_not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("Event with id '{}' was not found", id))
}

pub(crate) fn username_taken() -> AppError {
    AppError::ValidationError("A user with that username already exists.".to_string())
}
