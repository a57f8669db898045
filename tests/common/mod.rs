#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use eventhub_server::config::Config;
use eventhub_server::models::EventDraft;
use eventhub_server::routes::create_routes;
use eventhub_server::services::notifications::{Email, MailError, Mailer};
use eventhub_server::state::AppState;
use eventhub_server::store::{MemoryStore, Store};

#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<Email>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<Email> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: axum::http::HeaderMap,
    pub body: Value,
}

pub struct TestUser {
    pub id: String,
    pub token: String,
}

pub struct TestApp {
    router: Router,
    pub store: Arc<dyn Store>,
    pub mailer: Arc<RecordingMailer>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    pub fn with_store(store: Arc<dyn Store>) -> Self {
        let mailer = Arc::new(RecordingMailer::default());
        let state = AppState::new(Config::default(), Arc::clone(&store), mailer.clone());
        Self {
            router: create_routes(state),
            store,
            mailer,
        }
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Token {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };

        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn sign_up(&self, username: &str) -> TestUser {
        let response = self
            .request(
                Method::POST,
                "/api/auth/register/",
                None,
                Some(json!({
                    "username": username,
                    "email": format!("{}@example.com", username),
                    "password": "correct-horse-battery",
                    "password_confirm": "correct-horse-battery",
                    "first_name": username,
                })),
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{}", response.body);

        TestUser {
            id: response.body["data"]["user"]["id"].as_str().unwrap().to_string(),
            token: response.body["data"]["token"].as_str().unwrap().to_string(),
        }
    }

    pub async fn create_event(&self, organizer: &TestUser, title: &str, capacity: i32) -> String {
        let response = self
            .request(
                Method::POST,
                "/api/events/",
                Some(&organizer.token),
                Some(event_body(title, capacity)),
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{}", response.body);
        response.body["data"]["id"].as_str().unwrap().to_string()
    }

    /// Inserts an event that is already under way. The API refuses to create
    /// these, so it goes straight to the store.
    pub async fn create_started_event(&self, organizer: &TestUser, title: &str) -> String {
        let start = Utc::now() - chrono::Duration::hours(1);
        let draft = EventDraft {
            title: title.to_string(),
            description: String::new(),
            location: "Community hall".to_string(),
            start_time: start,
            end_time: Some(start + chrono::Duration::hours(3)),
            capacity: 10,
        };
        let organizer_id = Uuid::parse_str(&organizer.id).unwrap();
        let event = self.store.create_event(organizer_id, &draft).await.unwrap();
        event.id.to_string()
    }

    pub async fn register(&self, user: &TestUser, event_id: &str) -> TestResponse {
        self.request(
            Method::POST,
            &format!("/api/events/{}/register/", event_id),
            Some(&user.token),
            None,
        )
        .await
    }

    pub async fn unregister(&self, user: &TestUser, event_id: &str) -> TestResponse {
        self.request(
            Method::POST,
            &format!("/api/events/{}/unregister/", event_id),
            Some(&user.token),
            None,
        )
        .await
    }

    /// Emails go out on background tasks; give them a moment to land.
    pub async fn wait_for_emails(&self, count: usize) -> Vec<Email> {
        for _ in 0..100 {
            let sent = self.mailer.sent();
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.mailer.sent()
    }
}

pub fn event_body(title: &str, capacity: i32) -> Value {
    let start = Utc::now() + chrono::Duration::days(14);
    json!({
        "title": title,
        "description": "Talks, snacks and networking",
        "location": "Community hall",
        "start_time": start.to_rfc3339(),
        "end_time": (start + chrono::Duration::hours(3)).to_rfc3339(),
        "capacity": capacity,
    })
}
