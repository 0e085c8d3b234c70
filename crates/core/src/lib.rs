//! Delivery Dates Core - Shared types library.
//!
//! This crate provides common types used across the delivery dates components:
//! - `server` - Webhook intake, metafield pipeline, `DutchNed` proxy and admin API
//! - `cli` - Command-line tools for migrations, tokens and the dead-letter queue
//!
//! # Architecture
//!
//! The core crate contains only types and traits - no I/O, no database access,
//! no HTTP clients. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for shop domains, order IDs, delivery dates and statuses

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
