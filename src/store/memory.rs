use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::event::EventOrderField;
use crate::models::{
    Event, EventDraft, EventFilter, NewUser, Registration, User, UserActivity, UserCredentials,
};
use crate::services::registration::{admit, check_capacity, RegistrationError};
use crate::store::{event_not_found, username_taken, Store};
use crate::utils::error::AppError;

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, UserCredentials>,
    // user id -> token
    tokens: HashMap<Uuid, String>,
    events: HashMap<Uuid, Event>,
    registrations: Vec<Registration>,
}

impl Tables {
    fn active_count(&self, event_id: Uuid) -> i64 {
        self.registrations
            .iter()
            .filter(|r| r.event_id == event_id)
            .count() as i64
    }

    fn is_registered(&self, user_id: Uuid, event_id: Uuid) -> bool {
        self.registrations
            .iter()
            .any(|r| r.user_id == user_id && r.event_id == event_id)
    }

    fn with_count(&self, event: &Event) -> Event {
        Event {
            attendees_count: self.active_count(event.id),
            ..event.clone()
        }
    }
}

/// Process-local store. A single lock around all tables makes every
/// operation atomic, so registrations cannot overshoot capacity.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches_search(event: &Event, needle: &str) -> bool {
    [&event.title, &event.description, &event.location]
        .iter()
        .any(|field| field.to_lowercase().contains(needle))
}

fn compare_events(a: &Event, b: &Event, field: EventOrderField) -> Ordering {
    match field {
        EventOrderField::StartTime => a.start_time.cmp(&b.start_time),
        EventOrderField::CreatedAt => a.created_at.cmp(&b.created_at),
        EventOrderField::Title => a.title.cmp(&b.title),
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_user(&self, new_user: NewUser) -> Result<User, AppError> {
        let mut tables = self.tables.write().await;
        if tables
            .users
            .values()
            .any(|c| c.user.username == new_user.username)
        {
            return Err(username_taken());
        }

        let user = User {
            id: Uuid::new_v4(),
            username: new_user.username,
            email: new_user.email,
            first_name: new_user.first_name,
            last_name: new_user.last_name,
            date_joined: Utc::now(),
        };
        tables.users.insert(
            user.id,
            UserCredentials {
                user: user.clone(),
                password_hash: new_user.password_hash,
            },
        );
        Ok(user)
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>, AppError> {
        let tables = self.tables.read().await;
        Ok(tables.users.get(&id).map(|c| c.user.clone()))
    }

    async fn find_users(&self, ids: &[Uuid]) -> Result<Vec<User>, AppError> {
        let tables = self.tables.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| tables.users.get(id))
            .map(|c| c.user.clone())
            .collect())
    }

    async fn find_credentials(&self, username: &str) -> Result<Option<UserCredentials>, AppError> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .values()
            .find(|c| c.user.username == username)
            .cloned())
    }

    async fn list_users(&self) -> Result<Vec<User>, AppError> {
        let tables = self.tables.read().await;
        let mut users: Vec<User> = tables.users.values().map(|c| c.user.clone()).collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }

    async fn user_activity(&self, user_id: Uuid) -> Result<UserActivity, AppError> {
        let tables = self.tables.read().await;
        Ok(UserActivity {
            organized_events_count: tables
                .events
                .values()
                .filter(|e| e.organizer_id == user_id)
                .count() as i64,
            registered_events_count: tables
                .registrations
                .iter()
                .filter(|r| r.user_id == user_id)
                .count() as i64,
        })
    }

    async fn issue_token(&self, user_id: Uuid, candidate: &str) -> Result<String, AppError> {
        let mut tables = self.tables.write().await;
        Ok(tables
            .tokens
            .entry(user_id)
            .or_insert_with(|| candidate.to_string())
            .clone())
    }

    async fn find_user_by_token(&self, token: &str) -> Result<Option<User>, AppError> {
        let tables = self.tables.read().await;
        Ok(tables
            .tokens
            .iter()
            .find(|(_, key)| key.as_str() == token)
            .and_then(|(user_id, _)| tables.users.get(user_id))
            .map(|c| c.user.clone()))
    }

    async fn create_event(&self, organizer_id: Uuid, draft: &EventDraft) -> Result<Event, AppError> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();
        let event = Event {
            id: Uuid::new_v4(),
            organizer_id,
            title: draft.title.clone(),
            description: draft.description.clone(),
            location: draft.location.clone(),
            start_time: draft.start_time,
            end_time: draft.end_time,
            capacity: draft.capacity,
            attendees_count: 0,
            created_at: now,
            updated_at: now,
        };
        tables.events.insert(event.id, event.clone());
        Ok(event)
    }

    async fn find_event(&self, id: Uuid) -> Result<Option<Event>, AppError> {
        let tables = self.tables.read().await;
        Ok(tables.events.get(&id).map(|e| tables.with_count(e)))
    }

    async fn find_events(&self, ids: &[Uuid]) -> Result<Vec<Event>, AppError> {
        let tables = self.tables.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| tables.events.get(id))
            .map(|e| tables.with_count(e))
            .collect())
    }

    async fn list_events(&self, filter: &EventFilter) -> Result<Vec<Event>, AppError> {
        let tables = self.tables.read().await;
        let needle = filter.search.as_ref().map(|s| s.to_lowercase());

        let mut events: Vec<Event> = tables
            .events
            .values()
            .filter(|e| needle.as_deref().map_or(true, |n| matches_search(e, n)))
            .map(|e| tables.with_count(e))
            .collect();

        events.sort_by(|a, b| {
            let ordering = compare_events(a, b, filter.ordering.field);
            let ordering = if filter.ordering.descending {
                ordering.reverse()
            } else {
                ordering
            };
            ordering.then_with(|| a.id.cmp(&b.id))
        });
        Ok(events)
    }

    async fn update_event(&self, id: Uuid, draft: &EventDraft) -> Result<Event, AppError> {
        let mut tables = self.tables.write().await;
        let active = tables.active_count(id);
        let event = tables.events.get_mut(&id).ok_or_else(|| event_not_found(id))?;
        check_capacity(active, draft.capacity)?;

        event.title = draft.title.clone();
        event.description = draft.description.clone();
        event.location = draft.location.clone();
        event.start_time = draft.start_time;
        event.end_time = draft.end_time;
        event.capacity = draft.capacity;
        event.updated_at = Utc::now();
        event.attendees_count = active;
        Ok(event.clone())
    }

    async fn delete_event(&self, id: Uuid) -> Result<(), AppError> {
        let mut tables = self.tables.write().await;
        if tables.events.remove(&id).is_none() {
            return Err(event_not_found(id));
        }
        tables.registrations.retain(|r| r.event_id != id);
        Ok(())
    }

    async fn register(&self, user_id: Uuid, event_id: Uuid) -> Result<Registration, AppError> {
        let mut tables = self.tables.write().await;
        let capacity = tables
            .events
            .get(&event_id)
            .map(|e| e.capacity)
            .ok_or_else(|| event_not_found(event_id))?;

        admit(
            tables.is_registered(user_id, event_id),
            tables.active_count(event_id),
            capacity,
        )?;

        let registration = Registration {
            id: Uuid::new_v4(),
            user_id,
            event_id,
            registered_at: Utc::now(),
        };
        tables.registrations.push(registration.clone());
        Ok(registration)
    }

    async fn unregister(&self, user_id: Uuid, event_id: Uuid) -> Result<(), AppError> {
        let mut tables = self.tables.write().await;
        let position = tables
            .registrations
            .iter()
            .position(|r| r.user_id == user_id && r.event_id == event_id)
            .ok_or(RegistrationError::NotRegistered)?;
        tables.registrations.remove(position);
        Ok(())
    }

    async fn attendees(&self, event_id: Uuid) -> Result<Vec<User>, AppError> {
        let tables = self.tables.read().await;
        // Registrations are appended in order, so insertion order is registration order.
        Ok(tables
            .registrations
            .iter()
            .filter(|r| r.event_id == event_id)
            .filter_map(|r| tables.users.get(&r.user_id))
            .map(|c| c.user.clone())
            .collect())
    }

    async fn is_registered(&self, user_id: Uuid, event_id: Uuid) -> Result<bool, AppError> {
        let tables = self.tables.read().await;
        Ok(tables.is_registered(user_id, event_id))
    }

    async fn registrations_for_user(&self, user_id: Uuid) -> Result<Vec<Registration>, AppError> {
        let tables = self.tables.read().await;
        Ok(tables
            .registrations
            .iter()
            .rev()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn find_registration(&self, id: Uuid) -> Result<Option<Registration>, AppError> {
        let tables = self.tables.read().await;
        Ok(tables.registrations.iter().find(|r| r.id == id).cloned())
    }
}
