//! Delivery Dates server library.
//!
//! This crate provides the service as a library, allowing it to be tested
//! end to end and reused by the CLI.
//!
//! # Architecture
//!
//! - [`routes`] - Axum handlers (storefront API, Shopify webhooks, OAuth, monitoring)
//! - [`services`] - Attribute transform, metafield upserts, the processing
//!   pipeline, error classification and circuit breakers
//! - [`shopify`] - Admin API client, webhook and OAuth verification
//! - [`dutchned`] - `DutchNed` delivery date client with response cache
//! - [`kv`] - Key-value persistence (`PostgreSQL` or in-memory)
//! - [`worker`] - Background retry scheduler
//!
//! # Security
//!
//! This crate holds shop access tokens with `write_orders` scope. Webhooks
//! and OAuth callbacks are HMAC-verified; `/admin/*` requires a bearer token.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod dutchned;
pub mod error;
pub mod kv;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod shopify;
pub mod state;
pub mod worker;
