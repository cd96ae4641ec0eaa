//! Outbound and inbound messaging channels.
//!
//! Outbound: a `SendProvider` seam with Twilio and log-only implementations,
//! driven by a `Dispatcher` that applies the retry policy.
//! Inbound: parsing of user keyword commands (START, STOP, SUBSCRIBE, ...).

#![warn(clippy::unwrap_used)]

pub mod dispatcher;
pub mod inbound;
pub mod provider;
pub mod twilio;

pub use dispatcher::{DispatchOutcome, Dispatcher, RetryPolicy};
pub use inbound::{parse_inbound, InboundMessage};
pub use provider::{LogProvider, ProviderError, ScriptedProvider, SendProvider, SendRequest};
pub use twilio::TwilioProvider;
