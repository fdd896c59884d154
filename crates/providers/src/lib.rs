pub mod availability;
pub mod mailer;

pub use availability::{AvailabilityClient, AvailabilityError};
pub use mailer::{EmailMessage, MailerClient, MailerError, SentEmail};
