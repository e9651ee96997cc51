//! Core of BotMaid, a multi-platform chat-bot runtime.
//!
//! This crate is framework-agnostic. Telegram and CQHTTP live behind the
//! [`platform::PlatformAdapter`] port, implemented in adapter crates.

pub mod antiloop;
pub mod auth;
pub mod builtins;
pub mod command;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod errors;
pub mod help;
pub mod logging;
pub mod platform;
pub mod poller;
pub mod runtime;
pub mod store;
pub mod timer;
pub mod tokenizer;
pub mod utils;
pub mod version;
pub mod words;

pub use errors::{Error, Result};
pub use runtime::{BotMaid, BotMaidBuilder, Connection};
