//! GPIO adapter for A4988-class stepper driver control.
//!
//! The motion engine in `stepper-engine` never touches registers or sysfs
//! paths directly. It only knows about [`GpioPort`], a three-call
//! interface: configure a pin as an output or input, and write a level to
//! an output pin. Everything else (which chip, which board, which kernel
//! interface) lives behind one of the backends in this crate.

use thiserror::Error;

/// Digital level driven onto (or read from) a GPIO pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high {
            Level::High
        } else {
            Level::Low
        }
    }
}

/// Pull resistor configuration for an input pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullMode {
    Off,
    Up,
    Down,
}

/// Errors surfaced by a [`GpioPort`] backend.
///
/// These are "OS" errors in the taxonomy of the engine's error handling: a
/// failed GPIO write aborts the motor's current job but never the process.
#[derive(Debug, Error)]
pub enum GpioError {
    #[error("pin {0} is not available on this backend")]
    InvalidPin(u32),
    #[error("failed to configure pin {pin} as {mode}")]
    Configure { pin: u32, mode: &'static str },
    #[error("failed to write pin {pin}")]
    Write { pin: u32 },
    #[error("backend error: {0}")]
    Backend(String),
}

/// The minimal GPIO surface the motion engine requires.
///
/// Pin identifiers are whatever the host GPIO library uses (BCM numbering
/// on Raspberry Pi); the engine treats them as opaque integers.
pub trait GpioPort: Send {
    /// Configures `pin` as a digital output, initial level unspecified.
    fn configure_output(&mut self, pin: u32) -> Result<(), GpioError>;

    /// Configures `pin` as a digital input.
    fn configure_input(&mut self, pin: u32) -> Result<(), GpioError>;

    /// Configures `pin` as a digital input with the given pull resistor.
    fn configure_pullup(&mut self, pin: u32, mode: PullMode) -> Result<(), GpioError>;

    /// Drives `level` onto a previously-configured output pin.
    fn write(&mut self, pin: u32, level: Level) -> Result<(), GpioError>;
}

mod mock;
pub use mock::MockGpio;

#[cfg(feature = "rppal-backend")]
mod rppal_backend;
#[cfg(feature = "rppal-backend")]
pub use rppal_backend::RppalGpio;
