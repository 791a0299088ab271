//! Core domain + application logic for the Nyasha relay bot.
//!
//! This crate is intentionally framework-agnostic. The messaging network and the
//! language model live behind ports (traits) implemented in adapter crates.

pub mod clock;
pub mod completion;
pub mod config;
pub mod credentials;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod orchestrator;
pub mod persona;
pub mod router;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::{Error, Result};
