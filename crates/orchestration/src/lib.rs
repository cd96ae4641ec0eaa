//! Campaign execution: resolves recipients, gates, dispatches, records
//! receipts, and reconciles provider status callbacks.

#![warn(clippy::unwrap_used)]

pub mod engine;
pub mod inbound;
pub mod reconciler;
pub mod recorder;
pub mod resolver;
pub mod runner;
pub mod stats;
pub mod trigger;

pub use engine::CampaignEngine;
pub use inbound::InboundHandler;
pub use reconciler::StatusReconciler;
pub use recorder::ReceiptRecorder;
pub use resolver::RecipientResolver;
pub use runner::{CampaignRunner, CancelToken, RunnerSettings};
pub use stats::delivery_stats;
pub use trigger::trigger_topic;
