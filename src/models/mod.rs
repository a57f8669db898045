pub mod event;
pub mod registration;
pub mod user;

pub use event::{Event, EventDetail, EventDraft, EventFilter, EventPatch, EventView};
pub use registration::{Registration, RegistrationView};
pub use user::{NewUser, User, UserActivity, UserCredentials, UserDetail, UserSummary};
