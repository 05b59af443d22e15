//! # streamheal Common Library
//!
//! Shared code for the streamheal crates including:
//! - Error types
//! - Event types (HealEvent enum) and the EventBus
//! - Configuration file resolution
//! - Time utilities

pub mod config;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
pub use events::{EventBus, HealEvent};
