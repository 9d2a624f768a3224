//! Firefly Hardware Abstraction Layer
//!
//! Driver seams consumed by the interpreter:
//! - Serial receive/transmit (`SerialPort`, `SerialEvent`)
//! - Digital output pin (`DigitalPin`)
//! - Console text sink (`TextSink`)
//!
//! Real hardware sits behind the traits; the in-memory implementations
//! back the test suite and the host demo.

pub mod console;
pub mod gpio;
pub mod serial;

pub use console::TextSink;
pub use gpio::{DigitalPin, PinId, PinLevel};
pub use serial::{SerialConfig, SerialError, SerialEvent, SerialPort};

/// HAL version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
