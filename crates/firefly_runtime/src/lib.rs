//! Firefly Runtime
//!
//! Control plane of the interpreter:
//! - Receive loop: delivered serial chunks become execution cycles
//! - Lifecycle supervisor: boot handshake, consumer thread, shutdown
//! - Settings layer

pub mod receive;
pub mod settings;
pub mod supervisor;

/// Runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
