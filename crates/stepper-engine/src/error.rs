//! Error taxonomy for the engine: one `thiserror` enum at the library
//! boundary, one variant family per failure class.

use thiserror::Error;

/// Errors returned by the control surface ([`crate::Engine`]).
///
/// Four families: a bad caller-supplied configuration, a call made
/// while the motor/diagram isn't in a state that accepts it, bad
/// waypoint/profile data, and an underlying OS/GPIO failure. Numeric
/// edge cases (divide by zero, degenerate segments) are handled inside
/// `kinematics` by returning `0` rather than by raising one of these.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown motor {0:?}")]
    UnknownMotor(crate::motor::MotorId),

    #[error("unknown motion diagram {0:?}")]
    UnknownDiagram(crate::motor::DiagramId),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("motor {motor:?} is not in a state that accepts this call (currently {state})")]
    State {
        motor: crate::motor::MotorId,
        state: &'static str,
    },

    #[error("invalid motion-diagram data: {0}")]
    Data(String),

    #[error("GPIO operation failed")]
    Gpio(#[from] stepper_gpio::GpioError),

    #[error("OS call failed: {0}")]
    Os(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
