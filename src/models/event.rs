use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::models::user::UserSummary;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub id: Uuid,
    pub organizer_id: Uuid,
    pub title: String,
    pub description: String,
    pub location: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub capacity: i32,
    pub attendees_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    pub fn is_full(&self) -> bool {
        self.attendees_count >= i64::from(self.capacity)
    }

    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        self.start_time <= now
    }
}

/// The writable fields of an event, as accepted on create and PUT.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Validate)]
#[validate(schema(function = "ends_after_start"))]
pub struct EventDraft {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[validate(length(min = 1, max = 300))]
    pub location: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[validate(range(min = 1, message = "Capacity must be greater than 0"))]
    pub capacity: i32,
}

impl EventDraft {
    pub fn ensure_upcoming(&self, now: DateTime<Utc>) -> Result<(), ValidationError> {
        if self.start_time < now {
            return Err(ValidationError::new("start_time_in_past")
                .with_message("Event date cannot be in the past".into()));
        }
        Ok(())
    }
}

/// Partial update body for PATCH. `end_time: null` clears the end time.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "double_option")]
    pub end_time: Option<Option<DateTime<Utc>>>,
    pub capacity: Option<i32>,
}

impl EventPatch {
    pub fn apply(self, event: &Event) -> EventDraft {
        EventDraft {
            title: self.title.unwrap_or_else(|| event.title.clone()),
            description: self.description.unwrap_or_else(|| event.description.clone()),
            location: self.location.unwrap_or_else(|| event.location.clone()),
            start_time: self.start_time.unwrap_or(event.start_time),
            end_time: self.end_time.unwrap_or(event.end_time),
            capacity: self.capacity.unwrap_or(event.capacity),
        }
    }

    /// True when the body moves the event to a different start time.
    pub fn changes_start_time(&self, event: &Event) -> bool {
        self.start_time.is_some_and(|start| start != event.start_time)
    }
}

impl From<EventDraft> for EventPatch {
    fn from(draft: EventDraft) -> Self {
        Self {
            title: Some(draft.title),
            description: Some(draft.description),
            location: Some(draft.location),
            start_time: Some(draft.start_time),
            end_time: Some(draft.end_time),
            capacity: Some(draft.capacity),
        }
    }
}

fn double_option<'de, D>(deserializer: D) -> Result<Option<Option<DateTime<Utc>>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<DateTime<Utc>>::deserialize(deserializer).map(Some)
}

fn ends_after_start(draft: &EventDraft) -> Result<(), ValidationError> {
    match draft.end_time {
        Some(end) if end <= draft.start_time => Err(ValidationError::new("end_before_start")
            .with_message("Event end time must be after its start time".into())),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOrderField {
    StartTime,
    CreatedAt,
    Title,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventOrdering {
    pub field: EventOrderField,
    pub descending: bool,
}

impl Default for EventOrdering {
    fn default() -> Self {
        Self {
            field: EventOrderField::StartTime,
            descending: true,
        }
    }
}

impl FromStr for EventOrdering {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (descending, name) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let field = match name {
            "start_time" | "date" => EventOrderField::StartTime,
            "created_at" => EventOrderField::CreatedAt,
            "title" => EventOrderField::Title,
            other => return Err(format!("Unknown ordering field '{}'", other)),
        };
        Ok(Self { field, descending })
    }
}

#[derive(Debug, Deserialize)]
pub struct EventListQuery {
    pub search: Option<String>,
    pub ordering: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub search: Option<String>,
    pub ordering: EventOrdering,
}

impl TryFrom<EventListQuery> for EventFilter {
    type Error = String;

    fn try_from(query: EventListQuery) -> Result<Self, Self::Error> {
        let ordering = match query.ordering.as_deref() {
            Some(raw) if !raw.trim().is_empty() => raw.trim().parse()?,
            _ => EventOrdering::default(),
        };
        let search = query
            .search
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        Ok(Self { search, ordering })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventView {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub location: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub organizer: UserSummary,
    pub capacity: i32,
    pub attendees_count: i64,
    pub is_full: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EventView {
    pub fn new(event: &Event, organizer: UserSummary) -> Self {
        Self {
            id: event.id,
            title: event.title.clone(),
            description: event.description.clone(),
            location: event.location.clone(),
            start_time: event.start_time,
            end_time: event.end_time,
            organizer,
            capacity: event.capacity,
            attendees_count: event.attendees_count,
            is_full: event.is_full(),
            created_at: event.created_at,
            updated_at: event.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDetail {
    #[serde(flatten)]
    pub event: EventView,
    pub attendees: Vec<UserSummary>,
    pub is_registered: bool,
}
