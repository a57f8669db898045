use std::sync::Arc;

use async_trait::async_trait;
use lettre::address::AddressError;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::SmtpConfig;
use crate::models::{Event, User};

const EVENT_DATE_FORMAT: &str = "%B %d, %Y at %I:%M %p";

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid address: {0}")]
    Address(#[from] AddressError),

    #[error("could not build message: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("smtp transport failed: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &Email) -> Result<(), MailError>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig, from: &str) -> Result<Self, MailError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.relay)?;
        if let Some(port) = config.port {
            builder = builder.port(port);
        }
        if let Some(username) = &config.username {
            builder = builder.credentials(Credentials::new(
                username.clone(),
                config.password.clone().unwrap_or_default(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
            from: from.parse()?,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(email.to.parse()?)
            .subject(email.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(email.body.clone())?;

        self.transport.send(message).await?;
        Ok(())
    }
}

/// Writes emails to the log instead of delivering them. Used when no SMTP
/// relay is configured.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        info!(to = %email.to, subject = %email.subject, body = %email.body, "Email (not delivered)");
        Ok(())
    }
}

pub fn registration_confirmation(user: &User, event: &Event) -> Email {
    Email {
        to: user.email.clone(),
        subject: format!("Registration Confirmed: {}", event.title),
        body: format!(
            "Hi {},\n\nYou are registered for \"{}\".\n\nWhen: {}\nWhere: {}\n\nSee you there!\n",
            greeting_name(user),
            event.title,
            event.start_time.format(EVENT_DATE_FORMAT),
            event.location,
        ),
    }
}

pub fn unregistration_notice(user: &User, event: &Event) -> Email {
    Email {
        to: user.email.clone(),
        subject: format!("Unregistered from: {}", event.title),
        body: format!(
            "Hi {},\n\nYou are no longer registered for \"{}\" on {}.\n\nYou can register again while seats remain.\n",
            greeting_name(user),
            event.title,
            event.start_time.format(EVENT_DATE_FORMAT),
        ),
    }
}

fn greeting_name(user: &User) -> &str {
    if user.first_name.is_empty() {
        &user.username
    } else {
        &user.first_name
    }
}

#[derive(Clone)]
pub struct Notifier {
    mailer: Arc<dyn Mailer>,
}

impl Notifier {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }

    pub fn registration_confirmed(&self, user: &User, event: &Event) -> JoinHandle<()> {
        self.dispatch(registration_confirmation(user, event))
    }

    pub fn unregistered(&self, user: &User, event: &Event) -> JoinHandle<()> {
        self.dispatch(unregistration_notice(user, event))
    }

    /// Sends in the background. Failures are logged and dropped.
    pub fn dispatch(&self, email: Email) -> JoinHandle<()> {
        let mailer = Arc::clone(&self.mailer);
        tokio::spawn(async move {
            match mailer.send(&email).await {
                Ok(()) => info!(to = %email.to, subject = %email.subject, "Email sent"),
                Err(e) => warn!(to = %email.to, subject = %email.subject, error = %e, "Failed to send email"),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;
    use uuid::Uuid;

    struct Recording(Mutex<Vec<Email>>);

    #[async_trait]
    impl Mailer for Recording {
        async fn send(&self, email: &Email) -> Result<(), MailError> {
            self.0.lock().unwrap().push(email.clone());
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl Mailer for Broken {
        async fn send(&self, _email: &Email) -> Result<(), MailError> {
            Err(MailError::Address("not an address".parse::<Mailbox>().unwrap_err()))
        }
    }

    fn fixtures() -> (User, Event) {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            username: "ada".to_string(),
            email: "ada@example.com".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            date_joined: now,
        };
        let event = Event {
            id: Uuid::new_v4(),
            organizer_id: Uuid::new_v4(),
            title: "Rust Meetup".to_string(),
            description: String::new(),
            location: "Room 101".to_string(),
            start_time: Utc.with_ymd_and_hms(2031, 3, 5, 18, 30, 0).unwrap(),
            end_time: None,
            capacity: 10,
            attendees_count: 0,
            created_at: now,
            updated_at: now,
        };
        (user, event)
    }

    #[test]
    fn test_confirmation_content() {
        let (user, event) = fixtures();
        let email = registration_confirmation(&user, &event);
        assert_eq!(email.to, "ada@example.com");
        assert_eq!(email.subject, "Registration Confirmed: Rust Meetup");
        assert!(email.body.starts_with("Hi Ada,"));
        assert!(email.body.contains("March 05, 2031 at 06:30 PM"));
        assert!(email.body.contains("Room 101"));
    }

    #[test]
    fn test_unregistration_falls_back_to_username() {
        let (mut user, event) = fixtures();
        user.first_name.clear();
        let email = unregistration_notice(&user, &event);
        assert_eq!(email.subject, "Unregistered from: Rust Meetup");
        assert!(email.body.starts_with("Hi ada,"));
    }

    #[tokio::test]
    async fn test_dispatch_delivers() {
        let recording = Arc::new(Recording(Mutex::new(Vec::new())));
        let notifier = Notifier::new(recording.clone());
        let (user, event) = fixtures();

        notifier.registration_confirmed(&user, &event).await.unwrap();

        let sent = recording.0.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Registration Confirmed: Rust Meetup");
    }

    #[tokio::test]
    async fn test_dispatch_swallows_failures() {
        let notifier = Notifier::new(Arc::new(Broken));
        let (user, event) = fixtures();

        // The task completes normally even though delivery failed.
        assert!(notifier.unregistered(&user, &event).await.is_ok());
    }
}
