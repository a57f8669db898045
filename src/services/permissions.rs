use crate::models::{Event, User};
use crate::utils::error::AppError;

/// Only the organizer may change or delete an event.
pub fn can_modify(user: &User, event: &Event) -> bool {
    user.id == event.organizer_id
}

pub fn ensure_can_modify(user: &User, event: &Event) -> Result<(), AppError> {
    if can_modify(user, event) {
        Ok(())
    } else {
        Err(AppError::Forbidden(
            "Only the organizer can modify this event".to_string(),
        ))
    }
}
