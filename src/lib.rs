#![forbid(unsafe_code)]

//! Local IPC bridge between front-ends and long-running agent conversations.
//!
//! Front-ends connect to a Unix domain socket and exchange newline-delimited
//! JSON records. The [`broker::Broker`] routes each record by session id to a
//! [`session::Session`], which drives an [`engine::Engine`] and turns every
//! engine decision point into an asynchronous request/response round-trip.

pub mod broker;
pub mod config;
pub mod engine;
pub mod errors;
pub mod framer;
pub mod protocol;
pub mod session;

pub use config::BridgeConfig;
pub use errors::{AppError, Result};
