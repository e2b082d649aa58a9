//! # Autotrader
//!
//! Rule-based automated stock trading against a brokerage REST OpenAPI.
//!
//! ## Architecture
//!
//! - `config`: Configuration loading and validation
//! - `broker`: Resilient API client (rate limiting, token lifecycle,
//!   classified retry/backoff, typed operations)
//! - `market`: Session calendar for the domestic and overseas markets
//! - `engine`: Strategy state machine, position ledger and scheduler
//! - `persistence`: SQLite trade log

pub mod broker;
pub mod config;
pub mod engine;
pub mod market;
pub mod persistence;

pub use config::Config;
