#![warn(clippy::unwrap_used)]

pub mod rest;
pub mod server;
pub mod webhooks;

pub use server::{router, ApiServer};
