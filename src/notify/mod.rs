//! Completion notifications, decoupled from execution via the lifecycle
//! event bus.

pub mod directory;
pub mod dispatcher;
pub mod mail;

pub use directory::{EmailDirectory, StaticEmailDirectory};
pub use dispatcher::NotificationDispatcher;
pub use mail::{MailSender, SmtpMailSender};
