//! Message Bus Client Library
//!
//! Publishes pipeline outcome events and consumes intake and transcoder
//! notifications from NATS JetStream. An in-process implementation backs
//! tests and single-node runs.

pub mod error;
pub mod memory;
pub mod nats;
pub mod traits;

pub use error::*;
pub use memory::*;
pub use nats::*;
pub use traits::*;
