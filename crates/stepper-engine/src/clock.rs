//! A clock abstraction so the scheduler's tick logic can be driven by
//! synthetic timestamps in tests (a static queue of timestamps instead
//! of sleeping) while the production scheduler thread drives it from
//! real elapsed time.

/// Microseconds since some arbitrary, monotonic epoch.
pub type Micros = u64;

/// Anything that can report "how long has elapsed since I was created".
/// `Sync` so the engine can hold one behind `Arc<EngineState>` and share
/// it with the scheduler thread.
pub trait Clock: Send + Sync {
    fn now_us(&self) -> Micros;
}

/// The production clock: wraps [`std::time::Instant`].
#[derive(Debug)]
pub struct SystemClock {
    epoch: std::time::Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: std::time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_us(&self) -> Micros {
        self.epoch.elapsed().as_micros() as u64
    }
}

/// A clock a test can advance by hand, with no dependency on real time.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct FakeClock {
    now: std::sync::atomic::AtomicU64,
}

#[cfg(test)]
impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, delta_us: Micros) {
        self.now.fetch_add(delta_us, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn set(&self, now_us: Micros) {
        self.now.store(now_us, std::sync::atomic::Ordering::Relaxed);
    }
}

#[cfg(test)]
impl Clock for FakeClock {
    fn now_us(&self) -> Micros {
        self.now.load(std::sync::atomic::Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_advances_monotonically() {
        let clock = FakeClock::new();
        assert_eq!(clock.now_us(), 0);
        clock.advance(1_000);
        assert_eq!(clock.now_us(), 1_000);
        clock.set(5_000);
        assert_eq!(clock.now_us(), 5_000);
    }
}
