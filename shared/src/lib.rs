//! Shared types for the order engine
//!
//! Common types used by the engine and its callers: order state enums,
//! order/item aggregates, payment callback shapes, and utility helpers.

pub mod order;
pub mod util;

// Re-exports
pub use serde::{Deserialize, Serialize};
