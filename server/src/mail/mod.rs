pub mod auth;
pub mod client;
pub mod error;
pub mod message;
pub mod poller;

pub use client::{BodyType, GmailClient, SendEmailOptions, ThreadMessage};
pub use error::MailApiError;
pub use message::SanitizedEmail;
