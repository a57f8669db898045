pub mod notifications;
pub mod permissions;
pub mod registration;

pub use notifications::{LogMailer, Mailer, Notifier, SmtpMailer};
pub use registration::RegistrationManager;
