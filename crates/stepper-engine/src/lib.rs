//! Real-time step-pulse motion engine for A4988/DRV8825-class stepper
//! drivers.
//!
//! [`Engine`] owns a background scheduler thread that scans every known
//! motor, emitting step pulses on schedule and running each motor's own
//! state machine (bounded constant-speed runs with acceleration/
//! deceleration ramps, or motion-diagram playback). Motors and motion
//! diagrams are created and controlled through [`Engine`]'s methods;
//! [`MotorHandle`] gives callers a lock-free view of a motor's live
//! counters from any thread.

pub mod clock;
pub mod control;
pub mod diagram;
pub mod error;
pub mod kinematics;
pub mod motor;
pub mod profile_file;
mod scheduler;

pub use control::{Engine, EngineOptions, DEFAULT_RT_PRIORITY};
pub use diagram::{MotionDiagram, MovePoint};
pub use error::EngineError;
pub use motor::{Direction, DiagramId, Mode, MotorHandle, MotorId, MotorParams, MotorPins};
pub use profile_file::SpeedFormat;
pub use scheduler::EngineState;
