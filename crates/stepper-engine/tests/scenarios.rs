//! End-to-end scenarios driving the real [`Engine`] (real scheduler
//! thread, mock GPIO) rather than calling `tick_motor` directly — these
//! exercise the control surface the way a caller actually would.

use std::time::{Duration, Instant};

use stepper_engine::{Direction, Engine, EngineOptions, Mode, MotorPins};
use stepper_gpio::MockGpio;

fn wait_until(mut predicate: impl FnMut() -> bool, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    predicate()
}

const STEPS_PER_REV: u32 = 400;

fn pins(base: u32) -> MotorPins {
    MotorPins {
        step: base,
        dir: base + 1,
        enable: base + 2,
    }
}

#[test]
fn bounded_run_of_400_steps_reaches_job_ready() {
    let engine = Engine::new(Box::new(MockGpio::new()), EngineOptions::default());
    let motor = engine.new_motor(pins(0), STEPS_PER_REV).unwrap();
    engine.enable(motor.id()).unwrap();
    engine.set_params(motor.id(), Direction::Cw, 400, 20.0, 40.0).unwrap();
    engine.set_steptime(motor.id(), 2000).unwrap();
    engine.start(motor.id()).unwrap();

    let finished = wait_until(|| motor.mode() == Mode::JobReady, Duration::from_secs(5));
    assert!(finished, "run did not reach JobReady in time");
    assert_eq!(motor.real_stepcount(), 400);
    assert_eq!(motor.current_stepcount(), 400);
}

#[test]
fn two_motors_run_independently() {
    let engine = Engine::new(Box::new(MockGpio::new()), EngineOptions::default());
    let a = engine.new_motor(pins(0), STEPS_PER_REV).unwrap();
    let b = engine.new_motor(pins(10), STEPS_PER_REV).unwrap();
    engine.enable(a.id()).unwrap();
    engine.enable(b.id()).unwrap();
    engine.set_params(a.id(), Direction::Cw, 50, 20.0, 40.0).unwrap();
    engine.set_params(b.id(), Direction::Cw, 50, 20.0, 40.0).unwrap();
    engine.set_steptime(a.id(), 1000).unwrap();
    engine.set_steptime(b.id(), 5000).unwrap();
    engine.start(a.id()).unwrap();
    engine.start(b.id()).unwrap();

    let both_done = wait_until(
        || a.mode() == Mode::JobReady && b.mode() == Mode::JobReady,
        Duration::from_secs(5),
    );
    assert!(both_done);
    assert_eq!(a.real_stepcount(), 50);
    assert_eq!(b.real_stepcount(), 50);
}

#[test]
fn motion_diagram_without_reversal_completes() {
    let engine = Engine::new(Box::new(MockGpio::new()), EngineOptions::default());
    let motor = engine.new_motor(pins(0), STEPS_PER_REV).unwrap();
    engine.enable(motor.id()).unwrap();

    let diagram = engine.new_diagram(400);
    engine.add_waypoint_omega(diagram, 200_000, 10.0).unwrap();
    engine.add_waypoint_omega(diagram, 400_000, 10.0).unwrap();
    engine.add_waypoint_omega(diagram, 600_000, 0.0).unwrap();

    engine.start_md(motor.id(), diagram).unwrap();
    let finished = wait_until(|| motor.mode() == Mode::JobReady, Duration::from_secs(5));
    assert!(finished, "diagram playback did not finish in time");
    assert!(motor.real_stepcount() > 0);
}

#[test]
fn motion_diagram_with_direction_reversal_completes() {
    let engine = Engine::new(Box::new(MockGpio::new()), EngineOptions::default());
    let motor = engine.new_motor(pins(0), STEPS_PER_REV).unwrap();
    engine.enable(motor.id()).unwrap();

    let diagram = engine.new_diagram(400);
    engine.add_waypoint_omega(diagram, 200_000, 8.0).unwrap();
    // Reversal: a zero-crossing waypoint should be inserted automatically.
    engine.add_waypoint_omega(diagram, 400_000, -8.0).unwrap();
    assert_eq!(engine.count_waypoints(diagram).unwrap(), 4);

    engine.start_md(motor.id(), diagram).unwrap();
    let finished = wait_until(|| motor.mode() == Mode::JobReady, Duration::from_secs(5));
    assert!(finished, "reversing diagram did not finish in time");
}

#[test]
fn rpm_and_steptime_conversions_round_trip() {
    let engine = Engine::new(Box::new(MockGpio::new()), EngineOptions::default());
    let motor = engine.new_motor(pins(0), STEPS_PER_REV).unwrap();
    engine.set_rpm(motor.id(), 60.0).unwrap();
    // 60rpm at 400 steps/rev => 400 steps/s => steptime 2500us.
    engine.set_steptime(motor.id(), 2500).unwrap();
    // Hz here is revolutions/sec, so set_hz(1.0) == set_rpm(60.0).
    engine.set_hz(motor.id(), 1.0).unwrap();
}

#[test]
fn endless_run_requires_stop_to_terminate() {
    let engine = Engine::new(Box::new(MockGpio::new()), EngineOptions::default());
    let motor = engine.new_motor(pins(0), STEPS_PER_REV).unwrap();
    engine.enable(motor.id()).unwrap();
    engine.set_params(motor.id(), Direction::Cw, 0, 20.0, 40.0).unwrap();
    engine.set_steptime(motor.id(), 2000).unwrap();
    engine.start(motor.id()).unwrap();

    wait_until(|| motor.real_stepcount() > 10, Duration::from_secs(2));
    assert_ne!(motor.mode(), Mode::JobReady, "an endless run must not self-terminate");
    engine.stop(motor.id()).unwrap();
    let finished = wait_until(|| motor.mode() == Mode::JobReady, Duration::from_secs(5));
    assert!(finished, "graceful stop did not reach JobReady in time");
}

#[test]
fn start_without_configured_params_is_rejected() {
    let engine = Engine::new(Box::new(MockGpio::new()), EngineOptions::default());
    let motor = engine.new_motor(pins(0), STEPS_PER_REV).unwrap();
    engine.enable(motor.id()).unwrap();
    assert!(engine.start(motor.id()).is_err());
}

#[test]
fn fast_stop_halts_immediately() {
    let engine = Engine::new(Box::new(MockGpio::new()), EngineOptions::default());
    let motor = engine.new_motor(pins(0), STEPS_PER_REV).unwrap();
    engine.enable(motor.id()).unwrap();
    engine.set_params(motor.id(), Direction::Cw, 0, 20.0, 40.0).unwrap();
    engine.set_steptime(motor.id(), 2000).unwrap();
    engine.start(motor.id()).unwrap();

    wait_until(|| motor.real_stepcount() > 5, Duration::from_secs(2));
    engine.fast_stop(motor.id()).unwrap();
    let stopped_count = motor.real_stepcount();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(motor.real_stepcount(), stopped_count, "fast_stop must halt pulses immediately");
    assert_eq!(motor.mode(), Mode::Idle);
}

#[test]
fn set_direction_rejected_while_running() {
    let engine = Engine::new(Box::new(MockGpio::new()), EngineOptions::default());
    let motor = engine.new_motor(pins(0), STEPS_PER_REV).unwrap();
    engine.enable(motor.id()).unwrap();
    engine.set_params(motor.id(), Direction::Cw, 0, 20.0, 40.0).unwrap();
    engine.set_steptime(motor.id(), 2000).unwrap();
    engine.start(motor.id()).unwrap();

    wait_until(|| motor.real_stepcount() > 0, Duration::from_secs(2));
    assert!(engine.set_direction(motor.id(), Direction::Ccw).is_err());
    engine.fast_stop(motor.id()).unwrap();
}
