//! Data model for a single motor: identifiers, direction, the state-machine
//! enum, and the split between the scheduler-owned mutable state
//! (`Motor`) and the lock-free, cross-thread-readable counters
//! (`MotorShared`/`MotorHandle`) a caller gets back from `new_motor`.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crate::clock::Micros;

/// Opaque handle to a motor, stable for its lifetime in the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MotorId(pub(crate) u64);

/// Opaque handle to a motion diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagramId(pub(crate) u64);

/// Rotation sense, written to the direction pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Cw,
    Ccw,
}

/// The motor state machine: eleven states across three families —
/// bounded constant-speed runs, motion-diagram playback, and the shared
/// `Idle`/`JobReady` endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Mode {
    Idle = 0,
    StartRun = 1,
    SpeedUp = 2,
    RunSpeedUp = 3,
    Run = 4,
    SpeedDown = 5,
    RunSpeedDown = 6,
    StartMd = 7,
    RunMd = 8,
    RunSpeedMd = 9,
    JobReady = 10,
}

impl Mode {
    fn from_u8(v: u8) -> Mode {
        match v {
            0 => Mode::Idle,
            1 => Mode::StartRun,
            2 => Mode::SpeedUp,
            3 => Mode::RunSpeedUp,
            4 => Mode::Run,
            5 => Mode::SpeedDown,
            6 => Mode::RunSpeedDown,
            7 => Mode::StartMd,
            8 => Mode::RunMd,
            9 => Mode::RunSpeedMd,
            10 => Mode::JobReady,
            _ => Mode::Idle,
        }
    }

    /// Motion diagram playback, a bounded run, or stopped.
    pub fn is_active(self) -> bool {
        !matches!(self, Mode::Idle | Mode::JobReady)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Idle => "Idle",
            Mode::StartRun => "StartRun",
            Mode::SpeedUp => "SpeedUp",
            Mode::RunSpeedUp => "RunSpeedUp",
            Mode::Run => "Run",
            Mode::SpeedDown => "SpeedDown",
            Mode::RunSpeedDown => "RunSpeedDown",
            Mode::StartMd => "StartMd",
            Mode::RunMd => "RunMd",
            Mode::RunSpeedMd => "RunSpeedMd",
            Mode::JobReady => "JobReady",
        }
    }
}

/// Counters and state a caller can read without taking the scheduler's
/// lock. Written only by the scheduler thread; read with `Acquire` by
/// everyone else, matching the "lock-free snapshot" requirement for
/// cross-thread counter reads.
#[derive(Debug)]
pub struct MotorShared {
    id: MotorId,
    mode: AtomicU8,
    /// Steps taken since the current job/diagram started.
    current_stepcount: AtomicU64,
    /// Steps taken over the motor's entire lifetime.
    real_stepcount: AtomicU64,
    /// Largest observed gap (µs) between a pulse's due time and when the
    /// scheduler actually emitted it.
    max_latency_us: AtomicU64,
    /// Wall-clock duration (µs) of the current/last job.
    runtime_us: AtomicU64,
}

impl MotorShared {
    pub(crate) fn new(id: MotorId) -> Arc<Self> {
        Arc::new(Self {
            id,
            mode: AtomicU8::new(Mode::Idle as u8),
            current_stepcount: AtomicU64::new(0),
            real_stepcount: AtomicU64::new(0),
            max_latency_us: AtomicU64::new(0),
            runtime_us: AtomicU64::new(0),
        })
    }

    pub(crate) fn set_mode(&self, mode: Mode) {
        self.mode.store(mode as u8, Ordering::Release);
    }

    pub(crate) fn reset_job_counters(&self) {
        self.current_stepcount.store(0, Ordering::Release);
        self.runtime_us.store(0, Ordering::Release);
    }

    pub(crate) fn record_step(&self) {
        self.current_stepcount.fetch_add(1, Ordering::AcqRel);
        self.real_stepcount.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn record_latency(&self, latency_us: u64) {
        self.max_latency_us.fetch_max(latency_us, Ordering::AcqRel);
    }

    pub(crate) fn set_runtime(&self, runtime_us: Micros) {
        self.runtime_us.store(runtime_us, Ordering::Release);
    }
}

/// A caller-facing, cheaply-cloneable reference to a motor's live state.
#[derive(Debug, Clone)]
pub struct MotorHandle {
    shared: Arc<MotorShared>,
}

impl MotorHandle {
    pub(crate) fn new(shared: Arc<MotorShared>) -> Self {
        Self { shared }
    }

    pub fn id(&self) -> MotorId {
        self.shared.id
    }

    pub fn mode(&self) -> Mode {
        Mode::from_u8(self.shared.mode.load(Ordering::Acquire))
    }

    pub fn current_stepcount(&self) -> u64 {
        self.shared.current_stepcount.load(Ordering::Acquire)
    }

    pub fn real_stepcount(&self) -> u64 {
        self.shared.real_stepcount.load(Ordering::Acquire)
    }

    pub fn max_latency_us(&self) -> u64 {
        self.shared.max_latency_us.load(Ordering::Acquire)
    }

    pub fn runtime_us(&self) -> u64 {
        self.shared.runtime_us.load(Ordering::Acquire)
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.mode(), Mode::Idle | Mode::JobReady)
    }
}

/// Caller-supplied, per-motor configuration.
#[derive(Debug, Clone, Copy)]
pub struct MotorParams {
    pub steps_per_rev: u32,
    pub alpha_up: f64,
    pub alpha_down: f64,
}

/// Pin assignment for one motor: step, direction, and enable lines.
#[derive(Debug, Clone, Copy)]
pub struct MotorPins {
    pub step: u32,
    pub dir: u32,
    pub enable: u32,
}

/// The scheduler-owned, mutable state of one motor. Lives inside the
/// engine's `Mutex`-guarded collection; never shared across threads
/// directly (callers get a [`MotorHandle`] instead).
pub struct Motor {
    pub id: MotorId,
    pub pins: MotorPins,
    pub params: MotorParams,
    pub direction: Direction,
    pub enabled: bool,
    pub mode: Mode,

    /// Interval until the next pulse, in microseconds.
    pub current_steptime_us: u32,
    /// Signed angular velocity, used while following a motion diagram.
    pub current_omega: f64,
    /// Target steptime for a bounded constant-speed run (`Run`).
    pub target_steptime_us: u32,

    /// Steps already completed within the current ramp phase
    /// (`SpeedUp`/`SpeedDown`), per the `current_step` open-question
    /// resolution: incremented *after* the pulse for that index is sent.
    pub current_step: u64,
    /// Steps remaining before a bounded job reaches `JobReady`. Set from
    /// `num_steps` at `start()`; an endless run (`num_steps == 0`) sets
    /// this to `u64::MAX` so only an explicit `stop`/`fast_stop` ends it.
    pub num_rest: u64,
    /// Target step count configured via `set_params`: `0` means endless,
    /// a negative value means unconfigured (`start()` refuses to run).
    pub num_steps: i64,

    /// Active motion diagram, if following one.
    pub diagram: Option<DiagramId>,
    /// Index of the waypoint currently governing `RunMd`/`RunSpeedMd`.
    pub diagram_pointer: usize,
    /// Steps taken within the diagram waypoint currently in progress.
    pub diagram_step_in_segment: u64,

    /// When the current job (`StartRun`/`StartMd`) began.
    pub run_start_us: Micros,
    /// Absolute time (scheduler clock) the next pulse is due.
    pub next_due_us: Micros,

    pub shared: Arc<MotorShared>,
}

impl Motor {
    pub fn new(id: MotorId, pins: MotorPins, steps_per_rev: u32) -> Self {
        // Chip starts disabled and direction defaults to Cw until a caller
        // picks a direction or starts a move. Ramp rates and target step
        // count are unconfigured until `set_params` is called.
        Self {
            id,
            pins,
            params: MotorParams {
                steps_per_rev,
                alpha_up: 0.0,
                alpha_down: 0.0,
            },
            direction: Direction::Cw,
            enabled: false,
            mode: Mode::Idle,
            current_steptime_us: 0,
            current_omega: 0.0,
            target_steptime_us: 0,
            current_step: 0,
            num_rest: 0,
            num_steps: -1,
            diagram: None,
            diagram_pointer: 0,
            diagram_step_in_segment: 0,
            run_start_us: 0,
            next_due_us: 0,
            shared: MotorShared::new(id),
        }
    }

    pub fn handle(&self) -> MotorHandle {
        MotorHandle::new(self.shared.clone())
    }

    pub(crate) fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
        self.shared.set_mode(mode);
    }
}
