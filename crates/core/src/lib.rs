#![warn(clippy::unwrap_used)]

pub mod clock;
pub mod config;
pub mod error;
pub mod templates;
pub mod types;
pub mod validation;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::AppConfig;
pub use error::{CampaignError, CampaignResult, FieldError};
