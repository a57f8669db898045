use async_trait::async_trait;
use sqlx::migrate::MigrateError;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::event::EventOrderField;
use crate::models::{
    Event, EventDraft, EventFilter, NewUser, Registration, User, UserActivity, UserCredentials,
};
use crate::services::registration::{admit, check_capacity, RegistrationError};
use crate::store::{event_not_found, username_taken, Store};
use crate::utils::error::AppError;

const USER_COLUMNS: &str = "u.id, u.username, u.email, u.first_name, u.last_name, u.date_joined";

const EVENT_SELECT: &str = "SELECT e.id, e.organizer_id, e.title, e.description, e.location, \
     e.start_time, e.end_time, e.capacity, \
     (SELECT COUNT(*) FROM event_registrations r WHERE r.event_id = e.id) AS attendees_count, \
     e.created_at, e.updated_at \
     FROM events e";

const REGISTRATION_COLUMNS: &str = "id, user_id, event_id, registered_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<(), MigrateError> {
        sqlx::migrate!().run(&self.pool).await
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// `ILIKE` pattern matching `term` literally anywhere in the column.
fn contains_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

fn order_clause(filter: &EventFilter) -> String {
    let column = match filter.ordering.field {
        EventOrderField::StartTime => "e.start_time",
        EventOrderField::CreatedAt => "e.created_at",
        EventOrderField::Title => "e.title",
    };
    let direction = if filter.ordering.descending { "DESC" } else { "ASC" };
    format!("ORDER BY {} {}, e.id", column, direction)
}

#[async_trait]
impl Store for PgStore {
    async fn create_user(&self, new_user: NewUser) -> Result<User, AppError> {
        sqlx::query_as::<_, User>(
            "INSERT INTO users (id, username, email, first_name, last_name, password_hash) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING id, username, email, first_name, last_name, date_joined",
        )
        .bind(Uuid::new_v4())
        .bind(&new_user.username)
        .bind(&new_user.email)
        .bind(&new_user.first_name)
        .bind(&new_user.last_name)
        .bind(&new_user.password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                username_taken()
            } else {
                e.into()
            }
        })
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>, AppError> {
        let sql = format!("SELECT {} FROM users u WHERE u.id = $1", USER_COLUMNS);
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_users(&self, ids: &[Uuid]) -> Result<Vec<User>, AppError> {
        let sql = format!("SELECT {} FROM users u WHERE u.id = ANY($1)", USER_COLUMNS);
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(ids.to_vec())
            .fetch_all(&self.pool)
            .await?)
    }

    async fn find_credentials(&self, username: &str) -> Result<Option<UserCredentials>, AppError> {
        let sql = format!(
            "SELECT {}, u.password_hash FROM users u WHERE u.username = $1",
            USER_COLUMNS
        );
        Ok(sqlx::query_as::<_, UserCredentials>(&sql)
            .bind(username)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_users(&self) -> Result<Vec<User>, AppError> {
        let sql = format!("SELECT {} FROM users u ORDER BY u.username", USER_COLUMNS);
        Ok(sqlx::query_as::<_, User>(&sql).fetch_all(&self.pool).await?)
    }

    async fn user_activity(&self, user_id: Uuid) -> Result<UserActivity, AppError> {
        let (organized, registered) = sqlx::query_as::<_, (i64, i64)>(
            "SELECT \
             (SELECT COUNT(*) FROM events WHERE organizer_id = $1), \
             (SELECT COUNT(*) FROM event_registrations WHERE user_id = $1)",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(UserActivity {
            organized_events_count: organized,
            registered_events_count: registered,
        })
    }

    async fn issue_token(&self, user_id: Uuid, candidate: &str) -> Result<String, AppError> {
        sqlx::query(
            "INSERT INTO auth_tokens (key, user_id) VALUES ($1, $2) \
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(candidate)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(
            sqlx::query_scalar::<_, String>("SELECT key FROM auth_tokens WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?,
        )
    }

    async fn find_user_by_token(&self, token: &str) -> Result<Option<User>, AppError> {
        let sql = format!(
            "SELECT {} FROM users u JOIN auth_tokens t ON t.user_id = u.id WHERE t.key = $1",
            USER_COLUMNS
        );
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(token)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn create_event(&self, organizer_id: Uuid, draft: &EventDraft) -> Result<Event, AppError> {
        Ok(sqlx::query_as::<_, Event>(
            "INSERT INTO events \
             (id, organizer_id, title, description, location, start_time, end_time, capacity) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING id, organizer_id, title, description, location, start_time, end_time, \
             capacity, 0::BIGINT AS attendees_count, created_at, updated_at",
        )
        .bind(Uuid::new_v4())
        .bind(organizer_id)
        .bind(&draft.title)
        .bind(&draft.description)
        .bind(&draft.location)
        .bind(draft.start_time)
        .bind(draft.end_time)
        .bind(draft.capacity)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn find_event(&self, id: Uuid) -> Result<Option<Event>, AppError> {
        let sql = format!("{} WHERE e.id = $1", EVENT_SELECT);
        Ok(sqlx::query_as::<_, Event>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_events(&self, ids: &[Uuid]) -> Result<Vec<Event>, AppError> {
        let sql = format!("{} WHERE e.id = ANY($1)", EVENT_SELECT);
        Ok(sqlx::query_as::<_, Event>(&sql)
            .bind(ids.to_vec())
            .fetch_all(&self.pool)
            .await?)
    }

    async fn list_events(&self, filter: &EventFilter) -> Result<Vec<Event>, AppError> {
        let sql = format!(
            "{} WHERE ($1::TEXT IS NULL \
             OR e.title ILIKE $1 OR e.description ILIKE $1 OR e.location ILIKE $1) {}",
            EVENT_SELECT,
            order_clause(filter)
        );
        Ok(sqlx::query_as::<_, Event>(&sql)
            .bind(filter.search.as_deref().map(contains_pattern))
            .fetch_all(&self.pool)
            .await?)
    }

    async fn update_event(&self, id: Uuid, draft: &EventDraft) -> Result<Event, AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query_scalar::<_, Uuid>("SELECT id FROM events WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| event_not_found(id))?;

        let active = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM event_registrations WHERE event_id = $1",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        check_capacity(active, draft.capacity)?;

        sqlx::query(
            "UPDATE events SET title = $2, description = $3, location = $4, start_time = $5, \
             end_time = $6, capacity = $7, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(&draft.title)
        .bind(&draft.description)
        .bind(&draft.location)
        .bind(draft.start_time)
        .bind(draft.end_time)
        .bind(draft.capacity)
        .execute(&mut *tx)
        .await?;

        let sql = format!("{} WHERE e.id = $1", EVENT_SELECT);
        let event = sqlx::query_as::<_, Event>(&sql)
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(event)
    }

    async fn delete_event(&self, id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM events WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(event_not_found(id));
        }
        Ok(())
    }

    async fn register(&self, user_id: Uuid, event_id: Uuid) -> Result<Registration, AppError> {
        let mut tx = self.pool.begin().await?;

        // The row lock serialises registrations for this event until commit.
        let capacity = sqlx::query_scalar::<_, i32>(
            "SELECT capacity FROM events WHERE id = $1 FOR UPDATE",
        )
        .bind(event_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| event_not_found(event_id))?;

        let (already_registered, active) = sqlx::query_as::<_, (bool, i64)>(
            "SELECT \
             EXISTS (SELECT 1 FROM event_registrations WHERE event_id = $1 AND user_id = $2), \
             (SELECT COUNT(*) FROM event_registrations WHERE event_id = $1)",
        )
        .bind(event_id)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        admit(already_registered, active, capacity)?;

        let sql = format!(
            "INSERT INTO event_registrations (id, user_id, event_id) VALUES ($1, $2, $3) \
             RETURNING {}",
            REGISTRATION_COLUMNS
        );
        let registration = sqlx::query_as::<_, Registration>(&sql)
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(event_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::from(RegistrationError::AlreadyRegistered)
                } else {
                    e.into()
                }
            })?;

        tx.commit().await?;
        Ok(registration)
    }

    async fn unregister(&self, user_id: Uuid, event_id: Uuid) -> Result<(), AppError> {
        let result =
            sqlx::query("DELETE FROM event_registrations WHERE user_id = $1 AND event_id = $2")
                .bind(user_id)
                .bind(event_id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(RegistrationError::NotRegistered.into());
        }
        Ok(())
    }

    async fn attendees(&self, event_id: Uuid) -> Result<Vec<User>, AppError> {
        let sql = format!(
            "SELECT {} FROM event_registrations r JOIN users u ON u.id = r.user_id \
             WHERE r.event_id = $1 ORDER BY r.registered_at, r.id",
            USER_COLUMNS
        );
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(event_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn is_registered(&self, user_id: Uuid, event_id: Uuid) -> Result<bool, AppError> {
        Ok(sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM event_registrations WHERE user_id = $1 AND event_id = $2)",
        )
        .bind(user_id)
        .bind(event_id)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn registrations_for_user(&self, user_id: Uuid) -> Result<Vec<Registration>, AppError> {
        let sql = format!(
            "SELECT {} FROM event_registrations WHERE user_id = $1 \
             ORDER BY registered_at DESC, id",
            REGISTRATION_COLUMNS
        );
        Ok(sqlx::query_as::<_, Registration>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn find_registration(&self, id: Uuid) -> Result<Option<Registration>, AppError> {
        let sql = format!(
            "SELECT {} FROM event_registrations WHERE id = $1",
            REGISTRATION_COLUMNS
        );
        Ok(sqlx::query_as::<_, Registration>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::EventOrdering;
    use chrono::{Duration, Utc};

    async fn user(store: &PgStore, username: &str) -> User {
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

    fn draft(capacity: i32) -> EventDraft {
        EventDraft {
            title: "Limited seats".to_string(),
            description: String::new(),
            location: "Main hall".to_string(),
            start_time: Utc::now() + Duration::days(2),
            end_time: None,
            capacity,
        }
    }

    #[sqlx::test]
    #[ignore = "needs DATABASE_URL pointing at a disposable Postgres"]
    async fn test_concurrent_registrations_hold_capacity(pool: PgPool) {
        let store = PgStore::new(pool);
        let organizer = user(&store, "organizer").await;
        let event = store.create_event(organizer.id, &draft(3)).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..10 {
            let attendee = user(&store, &format!("attendee{}", i)).await;
            let store = store.clone();
            let event_id = event.id;
            handles.push(tokio::spawn(async move {
                store.register(attendee.id, event_id).await
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => admitted += 1,
                Err(AppError::Registration(RegistrationError::CapacityExceeded)) => {}
                Err(other) => panic!("unexpected error: {:?}", other),
            }
        }
        assert_eq!(admitted, 3);
        assert_eq!(store.attendees(event.id).await.unwrap().len(), 3);
    }

    #[sqlx::test]
    #[ignore = "needs DATABASE_URL pointing at a disposable Postgres"]
    async fn test_duplicate_and_capacity_rules(pool: PgPool) {
        let store = PgStore::new(pool);
        let organizer = user(&store, "organizer").await;
        let ada = user(&store, "ada").await;
        let bob = user(&store, "bob").await;
        let event = store.create_event(organizer.id, &draft(5)).await.unwrap();

        store.register(ada.id, event.id).await.unwrap();
        store.register(bob.id, event.id).await.unwrap();
        assert!(matches!(
            store.register(ada.id, event.id).await,
            Err(AppError::Registration(RegistrationError::AlreadyRegistered))
        ));

        assert!(matches!(
            store.update_event(event.id, &draft(1)).await,
            Err(AppError::Registration(RegistrationError::CapacityBelowAttendance))
        ));
        let updated = store.update_event(event.id, &draft(2)).await.unwrap();
        assert_eq!(updated.attendees_count, 2);
        assert!(updated.is_full());

        store.unregister(ada.id, event.id).await.unwrap();
        assert!(matches!(
            store.unregister(ada.id, event.id).await,
            Err(AppError::Registration(RegistrationError::NotRegistered))
        ));
    }

    #[test]
    fn test_contains_pattern_escapes_wildcards() {
        assert_eq!(contains_pattern("rust"), "%rust%");
        assert_eq!(contains_pattern("100%_fun"), "%100\\%\\_fun%");
        assert_eq!(contains_pattern("a\\b"), "%a\\\\b%");
    }

    #[test]
    fn test_order_clause() {
        assert_eq!(
            order_clause(&EventFilter::default()),
            "ORDER BY e.start_time DESC, e.id"
        );
        let filter = EventFilter {
            search: None,
            ordering: EventOrdering {
                field: EventOrderField::Title,
                descending: false,
            },
        };
        assert_eq!(order_clause(&filter), "ORDER BY e.title ASC, e.id");
    }
}
