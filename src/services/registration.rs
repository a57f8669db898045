//! Capacity-bounded event registration.
//!
//! The admission rule lives in [`admit`] so both stores apply exactly the same
//! ordering of checks while holding their own lock on the event.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::info;

use crate::models::{Event, Registration, User};
use crate::services::notifications::Notifier;
use crate::store::Store;
use crate::utils::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("You are already registered for this event")]
    AlreadyRegistered,

    #[error("This event has reached maximum capacity")]
    CapacityExceeded,

    #[error("You are not registered for this event")]
    NotRegistered,

    #[error("Organizer cannot register for their own event")]
    OrganizerCannotRegister,

    #[error("Cannot register for past events")]
    EventAlreadyStarted,

    #[error("Capacity cannot be lower than the current number of attendees")]
    CapacityBelowAttendance,
}

impl RegistrationError {
    pub fn code(&self) -> &'static str {
        match self {
            RegistrationError::AlreadyRegistered => "ALREADY_REGISTERED",
            RegistrationError::CapacityExceeded => "CAPACITY_EXCEEDED",
            RegistrationError::NotRegistered => "NOT_REGISTERED",
            RegistrationError::OrganizerCannotRegister => "ORGANIZER_CANNOT_REGISTER",
            RegistrationError::EventAlreadyStarted => "EVENT_ALREADY_STARTED",
            RegistrationError::CapacityBelowAttendance => "CAPACITY_BELOW_ATTENDANCE",
        }
    }
}

/// Decides whether one more registration may be added to an event.
///
/// Must be called while the caller holds exclusive access to the event's
/// registrations, otherwise two callers can both observe `active < capacity`.
pub fn admit(already_registered: bool, active: i64, capacity: i32) -> Result<(), RegistrationError> {
    if already_registered {
        return Err(RegistrationError::AlreadyRegistered);
    }
    if active >= i64::from(capacity) {
        return Err(RegistrationError::CapacityExceeded);
    }
    Ok(())
}

/// Checks that a new capacity still fits the registrations already taken.
pub fn check_capacity(active: i64, capacity: i32) -> Result<(), RegistrationError> {
    if active > i64::from(capacity) {
        return Err(RegistrationError::CapacityBelowAttendance);
    }
    Ok(())
}

#[derive(Clone)]
pub struct RegistrationManager {
    store: Arc<dyn Store>,
    notifier: Notifier,
}

impl RegistrationManager {
    pub fn new(store: Arc<dyn Store>, notifier: Notifier) -> Self {
        Self { store, notifier }
    }

    pub async fn register(&self, user: &User, event: &Event) -> Result<Registration, AppError> {
        if user.id == event.organizer_id {
            return Err(RegistrationError::OrganizerCannotRegister.into());
        }
        if event.has_started(Utc::now()) {
            return Err(RegistrationError::EventAlreadyStarted.into());
        }

        let registration = self.store.register(user.id, event.id).await?;
        info!(
            event_id = %event.id,
            user_id = %user.id,
            registration_id = %registration.id,
            "User registered for event"
        );

        // Delivery runs detached; a failed email never undoes the registration.
        self.notifier.registration_confirmed(user, event);

        Ok(registration)
    }

    pub async fn unregister(&self, user: &User, event: &Event) -> Result<(), AppError> {
        self.store.unregister(user.id, event.id).await?;
        info!(event_id = %event.id, user_id = %user.id, "User unregistered from event");

        self.notifier.unregistered(user, event);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventDraft, NewUser};
    use crate::services::notifications::{Email, MailError, Mailer};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Outbox(Mutex<Vec<Email>>);

    #[async_trait]
    impl Mailer for Outbox {
        async fn send(&self, email: &Email) -> Result<(), MailError> {
            self.0.lock().unwrap().push(email.clone());
            Ok(())
        }
    }

    async fn user(store: &MemoryStore, username: &str) -> User {
        store
            .create_user(NewUser {
                username: username.to_string(),
                email: format!("{}@example.com", username),
                first_name: String::new(),
                last_name: String::new(),
                password_hash: String::new(),
            })
            .await
            .unwrap()
    }

    async fn event_starting(store: &MemoryStore, organizer: &User, offset: Duration) -> Event {
        let start = Utc::now() + offset;
        store
            .create_event(
                organizer.id,
                &EventDraft {
                    title: "Standup".to_string(),
                    description: String::new(),
                    location: "Room 1".to_string(),
                    start_time: start,
                    end_time: None,
                    capacity: 5,
                },
            )
            .await
            .unwrap()
    }

    fn manager(store: &Arc<MemoryStore>, outbox: &Arc<Outbox>) -> RegistrationManager {
        let store: Arc<dyn Store> = store.clone();
        let mailer: Arc<dyn Mailer> = outbox.clone();
        RegistrationManager::new(store, Notifier::new(mailer))
    }

    #[tokio::test]
    async fn test_started_event_is_closed() {
        let store = Arc::new(MemoryStore::new());
        let outbox = Arc::new(Outbox::default());
        let organizer = user(&store, "organizer").await;
        let attendee = user(&store, "attendee").await;
        let event = event_starting(&store, &organizer, -Duration::minutes(5)).await;

        let err = manager(&store, &outbox)
            .register(&attendee, &event)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Registration(RegistrationError::EventAlreadyStarted)
        ));

        assert!(store.attendees(event.id).await.unwrap().is_empty());
        assert!(!store.is_registered(attendee.id, event.id).await.unwrap());
        tokio::task::yield_now().await;
        assert!(outbox.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_organizer_is_turned_away() {
        let store = Arc::new(MemoryStore::new());
        let outbox = Arc::new(Outbox::default());
        let organizer = user(&store, "organizer").await;
        let event = event_starting(&store, &organizer, Duration::days(1)).await;

        let err = manager(&store, &outbox)
            .register(&organizer, &event)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Registration(RegistrationError::OrganizerCannotRegister)
        ));
        assert!(store.attendees(event.id).await.unwrap().is_empty());
    }

    #[test]
    fn test_admit_open_event() {
        assert_eq!(admit(false, 0, 1), Ok(()));
        assert_eq!(admit(false, 9, 10), Ok(()));
    }

    #[test]
    fn test_admit_full_event() {
        assert_eq!(admit(false, 1, 1), Err(RegistrationError::CapacityExceeded));
        assert_eq!(admit(false, 12, 10), Err(RegistrationError::CapacityExceeded));
    }

    #[test]
    fn test_duplicate_reported_before_capacity() {
        assert_eq!(admit(true, 1, 1), Err(RegistrationError::AlreadyRegistered));
        assert_eq!(admit(true, 0, 5), Err(RegistrationError::AlreadyRegistered));
    }

    #[test]
    fn test_check_capacity() {
        assert_eq!(check_capacity(3, 3), Ok(()));
        assert_eq!(check_capacity(0, 1), Ok(()));
        assert_eq!(
            check_capacity(4, 3),
            Err(RegistrationError::CapacityBelowAttendance)
        );
    }
}
