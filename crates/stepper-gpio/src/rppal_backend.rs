//! Raspberry Pi backend built on [`rppal`].
//!
//! Pin numbers are BCM GPIO numbers, matching `rppal::gpio::Gpio`'s own
//! convention: one `rppal::gpio::Gpio` handle, pins retrieved and put
//! into output mode up front, levels written directly with no
//! buffering.

use std::collections::HashMap;

use rppal::gpio::{Gpio, InputPin, Level as RppalLevel, OutputPin};

use crate::{GpioError, GpioPort, Level, PullMode};

enum Pin {
    Output(OutputPin),
    Input(InputPin),
}

/// A [`GpioPort`] backed by real Raspberry Pi GPIO via `rppal`.
pub struct RppalGpio {
    gpio: Gpio,
    pins: HashMap<u32, Pin>,
}

impl RppalGpio {
    /// Opens the `/dev/gpiomem` character device. No pins are configured
    /// yet; call `configure_output`/`configure_input` for each pin in use.
    pub fn new() -> Result<Self, GpioError> {
        let gpio = Gpio::new().map_err(|e| GpioError::Backend(e.to_string()))?;
        Ok(Self {
            gpio,
            pins: HashMap::new(),
        })
    }
}

impl GpioPort for RppalGpio {
    fn configure_output(&mut self, pin: u32) -> Result<(), GpioError> {
        let out = self
            .gpio
            .get(pin)
            .map_err(|_| GpioError::InvalidPin(pin))?
            .into_output();
        self.pins.insert(pin, Pin::Output(out));
        Ok(())
    }

    fn configure_input(&mut self, pin: u32) -> Result<(), GpioError> {
        let input = self
            .gpio
            .get(pin)
            .map_err(|_| GpioError::InvalidPin(pin))?
            .into_input();
        self.pins.insert(pin, Pin::Input(input));
        Ok(())
    }

    fn configure_pullup(&mut self, pin: u32, mode: PullMode) -> Result<(), GpioError> {
        let raw = self.gpio.get(pin).map_err(|_| GpioError::InvalidPin(pin))?;
        let input = match mode {
            PullMode::Up => raw.into_input_pullup(),
            PullMode::Down => raw.into_input_pulldown(),
            PullMode::Off => raw.into_input(),
        };
        self.pins.insert(pin, Pin::Input(input));
        Ok(())
    }

    fn write(&mut self, pin: u32, level: Level) -> Result<(), GpioError> {
        match self.pins.get_mut(&pin) {
            Some(Pin::Output(out)) => {
                out.write(match level {
                    Level::High => RppalLevel::High,
                    Level::Low => RppalLevel::Low,
                });
                Ok(())
            }
            _ => Err(GpioError::Write { pin }),
        }
    }
}
