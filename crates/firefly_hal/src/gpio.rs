//! Digital output pin abstraction

use std::fmt;

/// Pin identifier (board-specific numbering)
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct PinId(pub u32);

impl fmt::Display for PinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GPIO{}", self.0)
    }
}

/// Logical pin level
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PinLevel {
    Low,
    High,
}

/// Pin direction
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PinMode {
    Disabled,
    Output,
}

/// Command surface of a digital output pin.
///
/// The pin driver owns the state; callers issue commands and never cache
/// levels. `configure_output` is idempotent and safe to repeat before every
/// level change.
pub trait DigitalPin {
    fn configure_output(&mut self);
    fn set_level(&mut self, level: PinLevel);
}

/// In-memory pin recording every transition, for tests and the host demo.
pub struct MemoryPin {
    id: PinId,
    mode: PinMode,
    level: Option<PinLevel>,
    transitions: Vec<PinLevel>,
}

impl MemoryPin {
    pub fn new(id: PinId) -> Self {
        Self {
            id,
            mode: PinMode::Disabled,
            level: None,
            transitions: Vec::new(),
        }
    }

    pub fn id(&self) -> PinId {
        self.id
    }

    pub fn mode(&self) -> PinMode {
        self.mode
    }

    /// Last driven level, if any.
    pub fn level(&self) -> Option<PinLevel> {
        self.level
    }

    /// Every level ever driven, in order.
    pub fn transitions(&self) -> &[PinLevel] {
        &self.transitions
    }
}

impl DigitalPin for MemoryPin {
    fn configure_output(&mut self) {
        self.mode = PinMode::Output;
    }

    fn set_level(&mut self, level: PinLevel) {
        tracing::debug!(pin = %self.id, ?level, "pin level set");
        self.level = Some(level);
        self.transitions.push(level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_mode_and_transitions() {
        let mut pin = MemoryPin::new(PinId(2));
        assert_eq!(pin.mode(), PinMode::Disabled);
        assert_eq!(pin.level(), None);

        pin.configure_output();
        pin.set_level(PinLevel::High);
        pin.configure_output(); // idempotent
        pin.set_level(PinLevel::Low);

        assert_eq!(pin.mode(), PinMode::Output);
        assert_eq!(pin.level(), Some(PinLevel::Low));
        assert_eq!(pin.transitions(), &[PinLevel::High, PinLevel::Low]);
    }
}
