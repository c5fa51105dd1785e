//! The real-time scanning loop and the per-motor state-machine tick.
//!
//! `tick_motor` is the pure heart of the engine: given a motor, the
//! diagram collection, a GPIO sink, and "now", it performs at most one
//! pulse and returns. It has no opinion about threads, sleeping, or
//! scheduling policy, so tests drive it directly with a sequence of
//! synthetic timestamps. [`run_scheduler_thread`] is the thin production
//! wrapper that repeatedly calls it from a real `SCHED_FIFO` thread.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use stepper_gpio::{GpioError, GpioPort, Level};

use crate::clock::{Clock, Micros, SystemClock};
use crate::diagram::MotionDiagram;
use crate::error::EngineError;
use crate::kinematics::{self, RampStep};
use crate::motor::{DiagramId, Direction, Mode, Motor, MotorId};

/// Number of `step` pin toggles inserted between the rising and falling
/// edge of a pulse: enough for an A4988-class driver to latch the edge
/// without a real sleep call on the hot path.
const PULSE_SPIN_CYCLES: u32 = 8;

/// The scheduler-owned collection of motors, diagrams, and the GPIO sink.
/// Guarded by one lock so a structural change (new/kill motor or
/// diagram) and a scheduler scan can never interleave.
pub struct EngineInner {
    pub motors: HashMap<MotorId, Motor>,
    pub diagrams: HashMap<DiagramId, MotionDiagram>,
    pub gpio: Box<dyn GpioPort>,
    pub next_motor_id: u64,
    pub next_diagram_id: u64,
}

impl EngineInner {
    pub fn new(gpio: Box<dyn GpioPort>) -> Self {
        Self {
            motors: HashMap::new(),
            diagrams: HashMap::new(),
            gpio,
            next_motor_id: 0,
            next_diagram_id: 0,
        }
    }

    pub fn alloc_motor_id(&mut self) -> MotorId {
        let id = MotorId(self.next_motor_id);
        self.next_motor_id += 1;
        id
    }

    pub fn alloc_diagram_id(&mut self) -> DiagramId {
        let id = DiagramId(self.next_diagram_id);
        self.next_diagram_id += 1;
        id
    }
}

/// Shared engine state: the mutex-guarded collection plus the clock and
/// the run/stop flag the scheduler thread watches.
pub struct EngineState {
    pub inner: Mutex<EngineInner>,
    pub clock: Box<dyn Clock>,
    pub running: AtomicBool,
    /// Count of scheduler scans skipped because the collection was
    /// frozen by a concurrent structural change.
    pub frozen_scans: AtomicU64,
}

impl EngineState {
    pub fn new(gpio: Box<dyn GpioPort>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(EngineInner::new(gpio)),
            clock: Box::new(SystemClock::new()),
            running: AtomicBool::new(true),
            frozen_scans: AtomicU64::new(0),
        })
    }
}

/// Performs at most one pulse for `motor` if it is due at `now_us`.
/// Returns `Err` only for a GPIO failure, which the caller should log
/// and treat as local to this motor: a failed pulse aborts the motor's
/// job, never the process.
pub fn tick_motor(
    motor: &mut Motor,
    diagrams: &HashMap<DiagramId, MotionDiagram>,
    gpio: &mut dyn GpioPort,
    now_us: Micros,
) -> Result<(), EngineError> {
    if !motor.mode.is_active() {
        return Ok(());
    }
    if now_us < motor.next_due_us {
        return Ok(());
    }

    let due = motor.next_due_us;
    let latency_us = now_us.saturating_sub(due);

    let result = match motor.mode {
        Mode::Idle | Mode::JobReady => Ok(()),
        Mode::StartRun => {
            motor.run_start_us = now_us;
            motor.current_step = 0;
            motor.current_omega = 0.0;
            motor.shared.reset_job_counters();
            start_run(motor, now_us)
        }
        Mode::SpeedUp | Mode::RunSpeedUp => speed_up_pulse(motor, gpio, now_us),
        Mode::Run => run_pulse(motor, gpio, now_us),
        Mode::SpeedDown | Mode::RunSpeedDown => speed_down_pulse(motor, gpio, now_us),
        Mode::StartMd => {
            start_md(motor, diagrams, now_us)?;
            md_pulse(motor, diagrams, gpio, now_us)
        }
        Mode::RunMd | Mode::RunSpeedMd => md_pulse(motor, diagrams, gpio, now_us),
    };

    if result.is_ok() && motor.mode.is_active() {
        motor.shared.record_latency(latency_us);
        motor.shared.set_runtime(now_us.saturating_sub(motor.run_start_us));
    }

    result
}

/// Direction implied by a signed angular velocity, used only during
/// motion-diagram playback (bidirectional). Bounded runs use
/// `motor.direction` directly instead — it is fixed once by
/// `set_direction` before `start()` and never re-derived from speed.
fn direction_from_omega(omega: f64, fallback: Direction) -> Direction {
    if omega > 0.0 {
        Direction::Cw
    } else if omega < 0.0 {
        Direction::Ccw
    } else {
        fallback
    }
}

fn emit_pulse(motor: &mut Motor, gpio: &mut dyn GpioPort, direction: Direction) -> Result<(), EngineError> {
    if !motor.enabled {
        return Err(EngineError::State {
            motor: motor.id,
            state: motor.mode.as_str(),
        });
    }
    if direction != motor.direction {
        write_direction(motor, gpio, direction)?;
    }
    step_pulse(gpio, motor.pins.step).map_err(|e| abort_on_gpio_error(motor, e))?;
    motor.shared.record_step();
    Ok(())
}

fn write_direction(motor: &mut Motor, gpio: &mut dyn GpioPort, direction: Direction) -> Result<(), EngineError> {
    let level = Level::from(matches!(direction, Direction::Ccw));
    gpio.write(motor.pins.dir, level)
        .map_err(|e| abort_on_gpio_error(motor, e))?;
    motor.direction = direction;
    Ok(())
}

/// Step pulse shape: step low, step high, a short hold, step low.
fn step_pulse(gpio: &mut dyn GpioPort, step_pin: u32) -> Result<(), GpioError> {
    gpio.write(step_pin, Level::Low)?;
    gpio.write(step_pin, Level::High)?;
    for _ in 0..PULSE_SPIN_CYCLES {
        std::hint::spin_loop();
    }
    gpio.write(step_pin, Level::Low)?;
    Ok(())
}

fn abort_on_gpio_error(motor: &mut Motor, e: GpioError) -> EngineError {
    motor.set_mode(Mode::Idle);
    motor.enabled = false;
    EngineError::Gpio(e)
}

/// `StartRun` is a pure decision transition: it computes the interval
/// before the first pulse and schedules it, emitting nothing itself.
/// The following due tick — now in `RunSpeedUp` or `Run` — performs the
/// actual first pulse, recomputing the same step (since neither
/// `current_step` nor `current_omega` changed here) before emitting it.
fn start_run(motor: &mut Motor, now_us: Micros) -> Result<(), EngineError> {
    let omega_target = kinematics::omega_from_steptime(motor.target_steptime_us, motor.params.steps_per_rev);
    let step = kinematics::speed_up_step(
        motor.current_step,
        motor.params.steps_per_rev,
        motor.params.alpha_up,
        omega_target,
        motor.current_omega,
    );

    let (steptime_us, next_mode) = match step {
        RampStep::Ramping { steptime_us, .. } => (steptime_us, Mode::RunSpeedUp),
        RampStep::ReachedTarget { steptime_us } => (steptime_us, Mode::Run),
    };

    motor.current_steptime_us = steptime_us;
    motor.next_due_us = now_us + steptime_us.max(1) as u64;
    motor.set_mode(next_mode);
    Ok(())
}

fn speed_up_pulse(motor: &mut Motor, gpio: &mut dyn GpioPort, now_us: Micros) -> Result<(), EngineError> {
    let omega_target = kinematics::omega_from_steptime(motor.target_steptime_us, motor.params.steps_per_rev);
    let step = kinematics::speed_up_step(
        motor.current_step,
        motor.params.steps_per_rev,
        motor.params.alpha_up,
        omega_target,
        motor.current_omega,
    );

    emit_pulse(motor, gpio, motor.direction)?;

    let (omega_new, steptime_us, next_mode) = match step {
        RampStep::Ramping { omega_new, steptime_us } => (omega_new, steptime_us, Mode::RunSpeedUp),
        RampStep::ReachedTarget { steptime_us } => (omega_target, steptime_us, Mode::Run),
    };

    motor.current_omega = omega_new;
    motor.current_steptime_us = steptime_us;
    motor.current_step += 1;
    motor.next_due_us = now_us + steptime_us.max(1) as u64;

    finish_bounded_pulse(motor, next_mode);
    Ok(())
}

fn run_pulse(motor: &mut Motor, gpio: &mut dyn GpioPort, now_us: Micros) -> Result<(), EngineError> {
    let braking = kinematics::braking_distance_steps(
        motor.current_steptime_us,
        motor.params.steps_per_rev,
        motor.params.alpha_down,
    );
    let should_brake = motor.params.alpha_down > 0.0 && (motor.num_rest as f64) <= braking;

    emit_pulse(motor, gpio, motor.direction)?;
    motor.next_due_us = now_us + motor.current_steptime_us.max(1) as u64;

    let next_mode = if should_brake { Mode::RunSpeedDown } else { Mode::Run };
    finish_bounded_pulse(motor, next_mode);
    Ok(())
}

fn speed_down_pulse(motor: &mut Motor, gpio: &mut dyn GpioPort, now_us: Micros) -> Result<(), EngineError> {
    let steptime_us = kinematics::speed_down_step(
        motor.num_rest,
        motor.params.steps_per_rev,
        motor.params.alpha_down,
    );

    emit_pulse(motor, gpio, motor.direction)?;

    motor.current_steptime_us = steptime_us;
    motor.next_due_us = now_us + steptime_us.max(1) as u64;
    finish_bounded_pulse(motor, Mode::RunSpeedDown);
    Ok(())
}

/// Shared tail of the three bounded-run pulse handlers: decrement the
/// remaining step count and either finish the job or move to
/// `next_mode`.
fn finish_bounded_pulse(motor: &mut Motor, next_mode: Mode) {
    motor.num_rest = motor.num_rest.saturating_sub(1);
    if motor.num_rest == 0 {
        motor.set_mode(Mode::JobReady);
    } else {
        motor.set_mode(next_mode);
    }
}

fn start_md(
    motor: &mut Motor,
    diagrams: &HashMap<DiagramId, MotionDiagram>,
    now_us: Micros,
) -> Result<(), EngineError> {
    let diagram_id = motor.diagram.ok_or_else(|| EngineError::Data("no diagram assigned".into()))?;
    let diagram = diagrams
        .get(&diagram_id)
        .ok_or(EngineError::UnknownDiagram(diagram_id))?;
    if diagram.data_incorrect || diagram.is_empty() {
        motor.set_mode(Mode::Idle);
        return Err(EngineError::Data("motion diagram is not playable".into()));
    }
    motor.diagram_pointer = 0;
    motor.diagram_step_in_segment = 0;
    motor.current_omega = diagram.waypoints()[0].omega;
    motor.run_start_us = now_us;
    motor.shared.reset_job_counters();
    Ok(())
}

fn md_pulse(
    motor: &mut Motor,
    diagrams: &HashMap<DiagramId, MotionDiagram>,
    gpio: &mut dyn GpioPort,
    now_us: Micros,
) -> Result<(), EngineError> {
    let diagram_id = match motor.diagram {
        Some(id) => id,
        None => {
            motor.set_mode(Mode::Idle);
            return Ok(());
        }
    };
    let diagram = match diagrams.get(&diagram_id) {
        Some(d) => d,
        None => return Err(EngineError::UnknownDiagram(diagram_id)),
    };

    let (start, end) = match diagram.segment_at(motor.diagram_pointer) {
        Some(pair) => pair,
        None => {
            motor.set_mode(Mode::JobReady);
            return Ok(());
        }
    };

    let alpha_seg = MotionDiagram::segment_alpha(start, end);
    let dt = (end.t_us - start.t_us) as f64 / 1_000_000.0;
    let phi_seg = 0.5 * (start.omega + end.omega) * dt;
    let steps_per_rev = segment_steps_per_rev(motor);
    let phi = kinematics::phi_step(steps_per_rev);
    let steps_in_segment = if phi == 0.0 {
        0
    } else {
        (phi_seg.abs() / phi).round() as u64
    };

    if steps_in_segment == 0 {
        motor.current_omega = end.omega;
        motor.diagram_pointer += 1;
        motor.diagram_step_in_segment = 0;
        motor.next_due_us = now_us;
        return md_pulse(motor, diagrams, gpio, now_us);
    }

    let step = kinematics::md_segment_step(motor.current_omega, alpha_seg, end.omega, steps_per_rev);
    let direction = direction_from_omega(step.omega_new, motor.direction);

    if step.steptime_us == 0 {
        motor.current_omega = step.omega_new;
        motor.diagram_step_in_segment += 1;
    } else {
        emit_pulse(motor, gpio, direction)?;
        motor.current_omega = step.omega_new;
        motor.diagram_step_in_segment += 1;
        motor.current_steptime_us = step.steptime_us;
    }
    motor.next_due_us = now_us + step.steptime_us.max(1) as u64;

    if motor.diagram_step_in_segment >= steps_in_segment {
        motor.diagram_pointer += 1;
        motor.diagram_step_in_segment = 0;
        motor.current_omega = end.omega;
    }

    let next_mode = if alpha_seg == 0.0 { Mode::RunMd } else { Mode::RunSpeedMd };
    motor.set_mode(next_mode);
    Ok(())
}

fn segment_steps_per_rev(motor: &Motor) -> u32 {
    motor.params.steps_per_rev
}

/// Elevates the calling thread to `SCHED_FIFO` and optionally pins it to
/// one CPU core. Failure is logged and swallowed: a denied real-time
/// elevation is a warning, not a fatal error — the scheduler still runs,
/// just without RT guarantees.
fn elevate_realtime(priority: i32, pin_core: Option<usize>) {
    #[cfg(target_os = "linux")]
    {
        unsafe {
            let param = libc::sched_param {
                sched_priority: priority,
            };
            if libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) != 0 {
                tracing::warn!(
                    error = %std::io::Error::last_os_error(),
                    "failed to elevate scheduler thread to SCHED_FIFO; continuing at normal priority"
                );
            }
            if let Some(core) = pin_core {
                let mut set: libc::cpu_set_t = std::mem::zeroed();
                libc::CPU_SET(core, &mut set);
                if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
                    tracing::warn!(
                        core,
                        error = %std::io::Error::last_os_error(),
                        "failed to pin scheduler thread to requested core"
                    );
                }
            }
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = (priority, pin_core);
        tracing::warn!("real-time scheduling is only supported on Linux; running unelevated");
    }
}

/// Spawns the scheduler thread. Every scan either processes all motors
/// once or, if a structural change (`new_motor`/`kill_motor`/diagram
/// mutation) currently holds the lock, is skipped outright — implemented
/// as a `try_lock` rather than an explicit extra flag.
pub fn run_scheduler_thread(
    state: Arc<EngineState>,
    rt_priority: i32,
    rt_core: Option<usize>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        elevate_realtime(rt_priority, rt_core);

        while state.running.load(Ordering::Acquire) {
            let now_us = state.clock.now_us();
            match state.inner.try_lock() {
                Some(mut inner) => {
                    let EngineInner {
                        motors,
                        diagrams,
                        gpio,
                        ..
                    } = &mut *inner;
                    let mut any_active = false;
                    for motor in motors.values_mut() {
                        if motor.mode.is_active() {
                            any_active = true;
                        }
                        if let Err(e) = tick_motor(motor, diagrams, gpio.as_mut(), now_us) {
                            tracing::warn!(motor = ?motor.id, error = %e, "motor job aborted");
                        }
                    }
                    drop(inner);
                    if !any_active {
                        std::thread::sleep(Duration::from_millis(1));
                    }
                }
                None => {
                    state.frozen_scans.fetch_add(1, Ordering::Relaxed);
                    std::thread::sleep(Duration::from_micros(100));
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::MotorPins;
    use stepper_gpio::MockGpio;

    fn new_test_motor(id: u64) -> Motor {
        let mut m = Motor::new(
            MotorId(id),
            MotorPins {
                step: 10,
                dir: 11,
                enable: 12,
            },
            400,
        );
        m.params.alpha_up = 20.0;
        m.params.alpha_down = 40.0;
        m.enabled = true;
        m
    }

    #[test]
    fn idle_motor_never_ticks() {
        let mut motor = new_test_motor(0);
        let diagrams = HashMap::new();
        let mut gpio = MockGpio::new();
        gpio.configure_output(10).unwrap();
        gpio.configure_output(11).unwrap();
        tick_motor(&mut motor, &diagrams, &mut gpio, 1_000_000).unwrap();
        assert!(gpio.write_log.is_empty());
    }

    #[test]
    fn bounded_run_reaches_job_ready() {
        let mut motor = new_test_motor(0);
        motor.target_steptime_us = 2000;
        motor.num_rest = 400;
        motor.set_mode(Mode::StartRun);

        let diagrams = HashMap::new();
        let mut gpio = MockGpio::new();
        gpio.configure_output(10).unwrap();
        gpio.configure_output(11).unwrap();

        let mut now = 0u64;
        for _ in 0..10_000 {
            if motor.mode == Mode::JobReady {
                break;
            }
            tick_motor(&mut motor, &diagrams, &mut gpio, now).unwrap();
            now = now.max(motor.next_due_us);
        }

        assert_eq!(motor.mode, Mode::JobReady);
        assert_eq!(motor.handle().real_stepcount(), 400);
    }
}
