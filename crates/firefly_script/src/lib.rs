//! Firefly Scripting System
//!
//! JavaScript execution via QuickJS behind an explicit runtime context.
//! One chunk of program text in, one [`runtime::ExecutionOutcome`] out; the
//! capability bridge exposes the native surface (`print`, `switch_light`)
//! to executed programs.

pub mod capability;
pub mod runtime;

pub use rquickjs;
