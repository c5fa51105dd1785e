//! Loads `motors.cfg`, an INI file listing the motors a demo run should
//! create, the same way `printer.cfg` is loaded with `configparser`. One
//! `[motor.<name>]` section per motor:
//!
//! ```ini
//! [motor.x]
//! step = 17
//! dir = 27
//! enable = 22
//! steps_per_rev = 400
//! alpha_up = 20.0
//! alpha_down = 40.0
//! ```

use anyhow::{Context, Result};
use configparser::ini::Ini;

use stepper_engine::{MotorParams, MotorPins};

pub struct MotorConfig {
    pub name: String,
    pub pins: MotorPins,
    pub params: MotorParams,
}

pub fn load_motors_cfg(path: &std::path::Path) -> Result<Vec<MotorConfig>> {
    let mut ini = Ini::new();
    ini.load(path.to_string_lossy().as_ref())
        .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))?;

    let mut motors = Vec::new();
    for section in ini.sections() {
        let Some(name) = section.strip_prefix("motor.") else {
            continue;
        };

        let get_u32 = |key: &str| -> Result<u32> {
            ini.getuint(&section, key)
                .ok()
                .flatten()
                .map(|v| v as u32)
                .with_context(|| format!("[{section}] missing or invalid `{key}`"))
        };
        let get_f64 = |key: &str, default: f64| -> f64 {
            ini.getfloat(&section, key).ok().flatten().unwrap_or(default)
        };

        motors.push(MotorConfig {
            name: name.to_string(),
            pins: MotorPins {
                step: get_u32("step")?,
                dir: get_u32("dir")?,
                enable: get_u32("enable")?,
            },
            params: MotorParams {
                steps_per_rev: get_u32("steps_per_rev")?,
                alpha_up: get_f64("alpha_up", 20.0),
                alpha_down: get_f64("alpha_down", 40.0),
            },
        });
    }

    if motors.is_empty() {
        anyhow::bail!("{} defines no [motor.*] sections", path.display());
    }
    Ok(motors)
}
