//! Core types for the delivery dates service.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod delivery_date;
pub mod id;
pub mod shop;
pub mod status;

pub use delivery_date::{DeliveryDate, DeliveryDateError};
pub use id::*;
pub use shop::{ShopDomain, ShopDomainError};
pub use status::*;
