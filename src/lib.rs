//! thread_relay: Telegram relay for stateful OpenAI assistant threads.
//!
//! This library crate re-exports modules so integration tests
//! (under `tests/`) can access them.

pub mod annotate;
pub mod assistant;
pub mod comm;
pub mod config;
pub mod engine;
pub mod gateway;
pub mod session;
pub mod telegram;
