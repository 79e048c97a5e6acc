//! Core domain + application logic for the CSV sorting bot.
//!
//! This crate is intentionally framework-agnostic. Telegram lives behind the
//! messaging port implemented in the adapter crate.

pub mod aggregate;
pub mod classify;
pub mod config;
pub mod day;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod merge;
pub mod messaging;
pub mod security;
pub mod sessions;
pub mod workflow;

pub use errors::{Error, Result};
