//! Mediavault Types
//!
//! Shared type definitions for asset records, the asset status state machine,
//! events and payload schemas used across the mediavault services.

pub mod asset;
pub mod events;
pub mod schemas;
pub mod error;

pub use asset::*;
pub use events::*;
pub use schemas::*;
pub use error::*;
