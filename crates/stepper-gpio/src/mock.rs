//! An in-memory [`GpioPort`] for tests.
//!
//! Mirrors the recording-mock style used for the timer/GPIO traits in the
//! teacher's `mcu-drivers` crate (`MockAtomicGpioPort`/`MockTimer`): no
//! real hardware, just a log of writes a test can assert against.

use std::collections::HashMap;

use crate::{GpioError, GpioPort, Level, PullMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PinMode {
    Output,
    Input,
}

/// A fake GPIO backend that records every configuration call and write.
#[derive(Debug, Default)]
pub struct MockGpio {
    modes: HashMap<u32, PinMode>,
    levels: HashMap<u32, Level>,
    /// Every `write()` call, in order, as `(pin, level)`.
    pub write_log: Vec<(u32, Level)>,
}

impl MockGpio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current level of `pin`, or `Level::Low` if it was never written.
    pub fn level(&self, pin: u32) -> Level {
        *self.levels.get(&pin).unwrap_or(&Level::Low)
    }

    /// Number of rising edges (Low->High writes) recorded for `pin`.
    pub fn rising_edges(&self, pin: u32) -> usize {
        let mut prev = Level::Low;
        let mut count = 0;
        for &(p, level) in &self.write_log {
            if p != pin {
                continue;
            }
            if prev == Level::Low && level == Level::High {
                count += 1;
            }
            prev = level;
        }
        count
    }
}

impl GpioPort for MockGpio {
    fn configure_output(&mut self, pin: u32) -> Result<(), GpioError> {
        self.modes.insert(pin, PinMode::Output);
        Ok(())
    }

    fn configure_input(&mut self, pin: u32) -> Result<(), GpioError> {
        self.modes.insert(pin, PinMode::Input);
        Ok(())
    }

    fn configure_pullup(&mut self, pin: u32, _mode: PullMode) -> Result<(), GpioError> {
        self.modes.insert(pin, PinMode::Input);
        Ok(())
    }

    fn write(&mut self, pin: u32, level: Level) -> Result<(), GpioError> {
        if self.modes.get(&pin) != Some(&PinMode::Output) {
            return Err(GpioError::Configure {
                pin,
                mode: "output",
            });
        }
        self.levels.insert(pin, level);
        self.write_log.push((pin, level));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_before_configure_is_an_error() {
        let mut gpio = MockGpio::new();
        assert!(gpio.write(4, Level::High).is_err());
    }

    #[test]
    fn records_writes_in_order() {
        let mut gpio = MockGpio::new();
        gpio.configure_output(4).unwrap();
        gpio.write(4, Level::Low).unwrap();
        gpio.write(4, Level::High).unwrap();
        gpio.write(4, Level::Low).unwrap();
        assert_eq!(gpio.rising_edges(4), 1);
        assert_eq!(gpio.level(4), Level::Low);
        assert_eq!(gpio.write_log.len(), 3);
    }
}
