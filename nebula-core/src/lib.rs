//! Core types for nebula
//!
//! This crate owns the stateful pieces of the chat front-end (credential
//! holder, session store, conversation history) together with the shared
//! configuration, logging and error plumbing used by the other crates.

pub mod config;
pub mod credential;
pub mod error;
pub mod logging;
pub mod session;
pub mod utils;

pub use error::{Error, Result};
