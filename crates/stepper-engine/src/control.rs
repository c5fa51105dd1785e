//! The public control surface: creating and tearing down motors and
//! motion diagrams, issuing runs, and reading back state. Every method
//! here takes the engine's mutex with a blocking `lock()` — these calls
//! are not latency sensitive, unlike the scheduler's own `try_lock` scan.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use stepper_gpio::{GpioPort, Level, PullMode};

use crate::clock::Micros;
use crate::diagram::MotionDiagram;
use crate::error::EngineError;
use crate::motor::{Direction, DiagramId, Mode, Motor, MotorHandle, MotorId, MotorPins};
use crate::scheduler::{run_scheduler_thread, EngineState};
use crate::{kinematics, profile_file};

/// Real-time priority passed to `sched_setscheduler`.
pub const DEFAULT_RT_PRIORITY: i32 = 95;

/// The motion engine. Owns the scheduler thread for its lifetime;
/// dropping it (or calling [`Engine::shutdown`]) stops the thread.
pub struct Engine {
    state: Arc<EngineState>,
    scheduler: Option<std::thread::JoinHandle<()>>,
}

/// Construction options for [`Engine::new`].
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    pub rt_priority: i32,
    pub rt_core: Option<usize>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            rt_priority: DEFAULT_RT_PRIORITY,
            rt_core: None,
        }
    }
}

impl Engine {
    /// Starts the engine, including its background scheduler thread.
    pub fn new(gpio: Box<dyn GpioPort>, options: EngineOptions) -> Self {
        let state = EngineState::new(gpio);
        let scheduler = run_scheduler_thread(state.clone(), options.rt_priority, options.rt_core);
        Self {
            state,
            scheduler: Some(scheduler),
        }
    }

    /// Stops the scheduler thread and returns once it has exited.
    pub fn shutdown(&mut self) {
        self.state.running.store(false, Ordering::Release);
        if let Some(handle) = self.scheduler.take() {
            let _ = handle.join();
        }
    }

    fn now_us(&self) -> Micros {
        self.state.clock.now_us()
    }

    /// Creates a motor. The chip starts disabled (active-low enable) and
    /// its direction is fixed to `Cw` until [`Engine::set_direction`] is
    /// called. `steps_per_rev` is a hardware constant fixed for the
    /// motor's lifetime; ramp rates and target step count are configured
    /// separately through [`Engine::set_params`].
    pub fn new_motor(&self, pins: MotorPins, steps_per_rev: u32) -> Result<MotorHandle, EngineError> {
        let mut inner = self.state.inner.lock();
        let id = inner.alloc_motor_id();

        inner.gpio.configure_output(pins.step)?;
        inner.gpio.configure_output(pins.dir)?;
        inner.gpio.configure_output(pins.enable)?;
        inner.gpio.write(pins.enable, Level::High)?; // active-low: High = disabled

        let motor = Motor::new(id, pins, steps_per_rev);
        let handle = motor.handle();
        inner.motors.insert(id, motor);
        Ok(handle)
    }

    pub fn kill_motor(&self, id: MotorId) -> Result<(), EngineError> {
        let mut inner = self.state.inner.lock();
        inner.motors.remove(&id).ok_or(EngineError::UnknownMotor(id))?;
        Ok(())
    }

    pub fn kill_all_motors(&self) {
        self.state.inner.lock().motors.clear();
    }

    pub fn count_motors(&self) -> usize {
        self.state.inner.lock().motors.len()
    }

    /// Configures direction, target step count, and ramp rates for the
    /// next run. `num_steps == 0` means endless (run until `stop`/
    /// `fast_stop`); a negative value leaves the motor unconfigured, and
    /// [`Engine::start`] will refuse to run it. Only valid while the
    /// motor is not mid-job.
    pub fn set_params(
        &self,
        id: MotorId,
        direction: Direction,
        num_steps: i64,
        alpha_up: f64,
        alpha_down: f64,
    ) -> Result<(), EngineError> {
        let mut inner = self.state.inner.lock();
        let motor = inner.motors.get(&id).ok_or(EngineError::UnknownMotor(id))?;
        if motor.mode.is_active() {
            return Err(EngineError::State {
                motor: id,
                state: motor.mode.as_str(),
            });
        }
        let pins = motor.pins;
        inner.gpio.write(pins.dir, Level::from(matches!(direction, Direction::Ccw)))?;
        let motor = inner.motors.get_mut(&id).expect("checked above");
        motor.direction = direction;
        motor.num_steps = num_steps;
        motor.params.alpha_up = alpha_up;
        motor.params.alpha_down = alpha_down;
        Ok(())
    }

    pub fn set_steptime(&self, id: MotorId, steptime_us: u32) -> Result<(), EngineError> {
        self.with_idle_motor(id, |motor| {
            motor.target_steptime_us = steptime_us;
            Ok(())
        })
    }

    pub fn set_rpm(&self, id: MotorId, rpm: f64) -> Result<(), EngineError> {
        self.with_idle_motor(id, |motor| {
            motor.target_steptime_us = kinematics::steptime_from_rpm(rpm, motor.params.steps_per_rev);
            Ok(())
        })
    }

    /// `hz` is revolutions per second (`rpm = hz·60`), matching
    /// `set_rpm`/`set_steptime`'s shared target-velocity semantics.
    pub fn set_hz(&self, id: MotorId, hz: f64) -> Result<(), EngineError> {
        self.with_idle_motor(id, |motor| {
            let omega = hz * std::f64::consts::TAU;
            motor.target_steptime_us = kinematics::steptime_from_omega(omega, motor.params.steps_per_rev);
            Ok(())
        })
    }

    pub fn set_direction(&self, id: MotorId, direction: Direction) -> Result<(), EngineError> {
        let mut inner = self.state.inner.lock();
        let motor = inner.motors.get_mut(&id).ok_or(EngineError::UnknownMotor(id))?;
        if motor.mode.is_active() {
            return Err(EngineError::State {
                motor: id,
                state: motor.mode.as_str(),
            });
        }
        inner.gpio.write(motor.pins.dir, Level::from(matches!(direction, Direction::Ccw)))?;
        let motor = inner.motors.get_mut(&id).expect("checked above");
        motor.direction = direction;
        Ok(())
    }

    pub fn enable(&self, id: MotorId) -> Result<(), EngineError> {
        let mut inner = self.state.inner.lock();
        let pins = inner.motors.get(&id).ok_or(EngineError::UnknownMotor(id))?.pins;
        inner.gpio.write(pins.enable, Level::Low)?; // active-low: Low = enabled
        inner.motors.get_mut(&id).expect("checked above").enabled = true;
        Ok(())
    }

    pub fn disable(&self, id: MotorId) -> Result<(), EngineError> {
        let mut inner = self.state.inner.lock();
        let motor = inner.motors.get(&id).ok_or(EngineError::UnknownMotor(id))?;
        let pins = motor.pins;
        inner.gpio.write(pins.enable, Level::High)?;
        let motor = inner.motors.get_mut(&id).expect("checked above");
        motor.enabled = false;
        motor.set_mode(Mode::Idle);
        Ok(())
    }

    /// Emits a single step pulse directly, bypassing the scheduler, in
    /// `direction`. Only valid while the motor is idle.
    pub fn single_step(&self, id: MotorId, direction: Direction) -> Result<(), EngineError> {
        let mut inner = self.state.inner.lock();
        let motor = inner.motors.get(&id).ok_or(EngineError::UnknownMotor(id))?;
        if motor.mode.is_active() {
            return Err(EngineError::State {
                motor: id,
                state: motor.mode.as_str(),
            });
        }
        if !motor.enabled {
            return Err(EngineError::State {
                motor: id,
                state: "disabled",
            });
        }
        let pins = motor.pins;
        inner.gpio.write(pins.dir, Level::from(matches!(direction, Direction::Ccw)))?;
        inner.gpio.write(pins.step, Level::Low)?;
        inner.gpio.write(pins.step, Level::High)?;
        inner.gpio.write(pins.step, Level::Low)?;
        let motor = inner.motors.get_mut(&id).expect("checked above");
        motor.direction = direction;
        motor.shared.record_step();
        Ok(())
    }

    /// Starts a run using the direction, target step count, and ramp
    /// rates last configured through [`Engine::set_params`]. A target of
    /// `0` runs endlessly until [`Engine::stop`] or [`Engine::fast_stop`];
    /// an unconfigured (negative) target is a `Configuration` error.
    pub fn start(&self, id: MotorId) -> Result<(), EngineError> {
        let now = self.now_us();
        let mut inner = self.state.inner.lock();
        let motor = inner.motors.get_mut(&id).ok_or(EngineError::UnknownMotor(id))?;
        if motor.mode.is_active() {
            return Err(EngineError::State {
                motor: id,
                state: motor.mode.as_str(),
            });
        }
        if !motor.enabled {
            return Err(EngineError::State {
                motor: id,
                state: "disabled",
            });
        }
        if motor.num_steps < 0 {
            return Err(EngineError::Configuration(
                "num_steps not configured; call set_params before start".into(),
            ));
        }
        motor.num_rest = if motor.num_steps == 0 { u64::MAX } else { motor.num_steps as u64 };
        motor.current_omega = 0.0;
        motor.current_step = 0;
        motor.next_due_us = now;
        motor.set_mode(Mode::StartRun);
        Ok(())
    }

    /// Requests a graceful stop: decelerates to rest using `alpha_down`
    /// rather than halting immediately. A no-op on an idle motor.
    pub fn stop(&self, id: MotorId) -> Result<(), EngineError> {
        let mut inner = self.state.inner.lock();
        let motor = inner.motors.get_mut(&id).ok_or(EngineError::UnknownMotor(id))?;
        match motor.mode {
            Mode::Idle | Mode::JobReady | Mode::SpeedDown | Mode::RunSpeedDown => Ok(()),
            Mode::Run | Mode::SpeedUp | Mode::RunSpeedUp => {
                if motor.params.alpha_down <= 0.0 {
                    motor.set_mode(Mode::JobReady);
                    return Ok(());
                }
                let braking = kinematics::braking_distance_steps(
                    motor.current_steptime_us,
                    motor.params.steps_per_rev,
                    motor.params.alpha_down,
                );
                motor.num_rest = braking.ceil().max(1.0) as u64;
                Ok(())
            }
            Mode::StartMd | Mode::RunMd | Mode::RunSpeedMd => Err(EngineError::State {
                motor: id,
                state: motor.mode.as_str(),
            }),
        }
    }

    /// Halts a motor immediately, abandoning any deceleration ramp. The
    /// motor may stall; use [`Engine::stop`] for a graceful halt.
    pub fn fast_stop(&self, id: MotorId) -> Result<(), EngineError> {
        let mut inner = self.state.inner.lock();
        let motor = inner.motors.get_mut(&id).ok_or(EngineError::UnknownMotor(id))?;
        motor.current_omega = 0.0;
        motor.set_mode(Mode::Idle);
        Ok(())
    }

    fn with_idle_motor(
        &self,
        id: MotorId,
        f: impl FnOnce(&mut Motor) -> Result<(), EngineError>,
    ) -> Result<(), EngineError> {
        let mut inner = self.state.inner.lock();
        let motor = inner.motors.get_mut(&id).ok_or(EngineError::UnknownMotor(id))?;
        if motor.mode.is_active() {
            return Err(EngineError::State {
                motor: id,
                state: motor.mode.as_str(),
            });
        }
        f(motor)
    }

    // -- Motion diagrams --------------------------------------------------

    pub fn new_diagram(&self, steps_per_rev: u32) -> DiagramId {
        let mut inner = self.state.inner.lock();
        let id = inner.alloc_diagram_id();
        inner.diagrams.insert(id, MotionDiagram::new(id, steps_per_rev));
        id
    }

    /// Rejected while `id` is actively driving a motor's `StartMd`/`RunMd`/
    /// `RunSpeedMd` playback; use [`Engine::fast_stop`] on that motor first.
    pub fn kill_diagram(&self, id: DiagramId) -> Result<(), EngineError> {
        let mut inner = self.state.inner.lock();
        if !inner.diagrams.contains_key(&id) {
            return Err(EngineError::UnknownDiagram(id));
        }
        if let Some(motor) = inner.motors.values().find(|m| m.diagram == Some(id) && m.mode.is_active()) {
            return Err(EngineError::State {
                motor: motor.id,
                state: motor.mode.as_str(),
            });
        }
        inner.diagrams.remove(&id);
        Ok(())
    }

    pub fn kill_all_diagrams(&self) {
        self.state.inner.lock().diagrams.clear();
    }

    pub fn count_diagrams(&self) -> usize {
        self.state.inner.lock().diagrams.len()
    }

    pub fn count_waypoints(&self, id: DiagramId) -> Result<usize, EngineError> {
        let inner = self.state.inner.lock();
        Ok(inner.diagrams.get(&id).ok_or(EngineError::UnknownDiagram(id))?.len())
    }

    pub fn add_waypoint_hz(&self, id: DiagramId, t_us: u64, hz: f64) -> Result<(), EngineError> {
        self.with_diagram(id, |d| d.add_by_hz(t_us, hz))
    }

    pub fn add_waypoint_omega(&self, id: DiagramId, t_us: u64, omega: f64) -> Result<(), EngineError> {
        self.with_diagram(id, |d| d.add_by_omega(t_us, omega))
    }

    pub fn add_waypoint_rpm(&self, id: DiagramId, t_us: u64, rpm: f64) -> Result<(), EngineError> {
        self.with_diagram(id, |d| d.add_by_rpm(t_us, rpm))
    }

    pub fn add_waypoint_steps(&self, id: DiagramId, hz: f64, cumulative_steps: i64) -> Result<(), EngineError> {
        self.with_diagram(id, |d| d.add_by_steps(hz, cumulative_steps))
    }

    fn with_diagram(
        &self,
        id: DiagramId,
        f: impl FnOnce(&mut MotionDiagram) -> Result<(), EngineError>,
    ) -> Result<(), EngineError> {
        let mut inner = self.state.inner.lock();
        let diagram = inner.diagrams.get_mut(&id).ok_or(EngineError::UnknownDiagram(id))?;
        f(diagram)
    }

    /// Starts playback of `diagram` on `motor`. The diagram must have at
    /// least one waypoint beyond the implicit rest point and must not be
    /// marked `data_incorrect`.
    pub fn start_md(&self, motor_id: MotorId, diagram_id: DiagramId) -> Result<(), EngineError> {
        let now = self.now_us();
        let mut inner = self.state.inner.lock();
        {
            let diagram = inner
                .diagrams
                .get(&diagram_id)
                .ok_or(EngineError::UnknownDiagram(diagram_id))?;
            if diagram.data_incorrect || diagram.is_empty() {
                return Err(EngineError::Data("motion diagram is not playable".into()));
            }
        }
        let motor = inner.motors.get_mut(&motor_id).ok_or(EngineError::UnknownMotor(motor_id))?;
        if motor.mode.is_active() {
            return Err(EngineError::State {
                motor: motor_id,
                state: motor.mode.as_str(),
            });
        }
        if !motor.enabled {
            return Err(EngineError::State {
                motor: motor_id,
                state: "disabled",
            });
        }
        motor.diagram = Some(diagram_id);
        motor.next_due_us = now;
        motor.set_mode(Mode::StartMd);
        Ok(())
    }

    /// Loads a motion-profile file into a new diagram. `speed_format`
    /// selects how each line's two fields are interpreted.
    pub fn load_diagram_from_file(
        &self,
        path: &std::path::Path,
        steps_per_rev: u32,
        speed_format: profile_file::SpeedFormat,
    ) -> Result<DiagramId, EngineError> {
        let mut inner = self.state.inner.lock();
        let id = inner.alloc_diagram_id();
        let diagram = profile_file::load_diagram(path, id, steps_per_rev, speed_format)?;
        inner.diagrams.insert(id, diagram);
        Ok(id)
    }

    /// Writes the plot-data file for `diagram`: one line per waypoint,
    /// `t[s]  f[Hz]  <sum_steps>-Steps`, prefixed by an axis-labeling
    /// comment a caller can feed to an external plotting tool.
    pub fn plot_diagram(&self, id: DiagramId, path: &std::path::Path) -> Result<(), EngineError> {
        let inner = self.state.inner.lock();
        let diagram = inner.diagrams.get(&id).ok_or(EngineError::UnknownDiagram(id))?;
        profile_file::plot_diagram(diagram, path)
    }

    /// Grants temporary direct GPIO access for configuring a pin as an
    /// input with a pull resistor (e.g. an end-stop switch) — outside the
    /// motor/diagram model, but part of the same adapter.
    pub fn configure_input_pin(&self, pin: u32, pull: PullMode) -> Result<(), EngineError> {
        let mut inner = self.state.inner.lock();
        inner.gpio.configure_pullup(pin, pull)?;
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
