//! Step-time kinematics: the formulas behind `SpeedUp`, `SpeedDown`, the
//! braking-distance check, and motion-diagram segment stepping.
//!
//! These are pure functions of their inputs (no motor state, no clock) so
//! they can be unit-tested and benchmarked directly, free of I/O. Every
//! division here is guarded: a zero divisor (zero
//! acceleration, zero `steps_per_rev`, a degenerate segment) returns `0.0`
//! rather than producing `NaN`/`inf`, matching the "numeric errors return 0,
//! treated as no constraint" rule.

/// One microsecond, in seconds.
const US_PER_S: f64 = 1_000_000.0;

#[inline]
fn safe_div(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// `φ_step = 2π / S`. Returns 0 for `steps_per_rev == 0`.
pub fn phi_step(steps_per_rev: u32) -> f64 {
    if steps_per_rev == 0 {
        return 0.0;
    }
    std::f64::consts::TAU / steps_per_rev as f64
}

/// Result of one acceleration step computed from rest (`SpeedUp`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RampStep {
    /// The new velocity would reach or exceed the target; snap to target
    /// and the caller should transition to `Run`.
    ReachedTarget { steptime_us: u32 },
    /// Still ramping; continue in `RunSpeedUp`/`RunSpeedDown`.
    Ramping { omega_new: f64, steptime_us: u32 },
}

/// Acceleration-from-rest step.
///
/// `step_index` is the count of steps already taken in this ramp (`n`),
/// `omega_current` is `current_ω` before this step.
pub fn speed_up_step(
    step_index: u64,
    steps_per_rev: u32,
    alpha_up: f64,
    omega_target: f64,
    omega_current: f64,
) -> RampStep {
    let phi = phi_step(steps_per_rev);
    let phi0 = step_index as f64 * phi;
    let omega_new = (2.0 * alpha_up * (phi0 + phi)).max(0.0).sqrt();

    if omega_new >= omega_target || alpha_up <= 0.0 {
        return RampStep::ReachedTarget {
            steptime_us: steptime_from_omega(omega_target, steps_per_rev),
        };
    }

    let delta_t_s = safe_div(2.0 * phi, omega_new + omega_current);
    RampStep::Ramping {
        omega_new,
        steptime_us: seconds_to_us(delta_t_s),
    }
}

/// Deceleration-to-rest step.
///
/// `num_rest` is the number of steps remaining, counted *before* the step
/// this call computes the interval for.
pub fn speed_down_step(num_rest: u64, steps_per_rev: u32, alpha_down: f64) -> u32 {
    if alpha_down <= 0.0 || num_rest == 0 {
        return 0;
    }
    let phi = phi_step(steps_per_rev);
    let phi1 = num_rest as f64 * phi;
    let phi0 = (phi1 - phi).max(0.0);
    let delta_t_s = (2.0 * phi1 / alpha_down).sqrt() - (2.0 * phi0 / alpha_down).sqrt();
    seconds_to_us(delta_t_s.max(0.0))
}

/// Braking distance check: the number of steps, as a fractional value,
/// required to decelerate from the velocity
/// implied by `current_steptime_us` down to rest. The caller switches to
/// `SpeedDown` once `num_rest <= braking_distance_steps(...)`.
pub fn braking_distance_steps(current_steptime_us: u32, steps_per_rev: u32, alpha_down: f64) -> f64 {
    if alpha_down <= 0.0 || current_steptime_us == 0 || steps_per_rev == 0 {
        return 0.0;
    }
    let steptime_s = current_steptime_us as f64 / US_PER_S;
    let omega = std::f64::consts::TAU / (steptime_s * steps_per_rev as f64);
    let phi_brake = (omega * omega) / (2.0 * alpha_down);
    safe_div(phi_brake, phi_step(steps_per_rev))
}

/// Result of one motion-diagram segment step. `steptime_us == 0` means
/// "no constraint" (a degenerate
/// zero-velocity segment); the caller should not emit a pulse for it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MdStep {
    pub omega_new: f64,
    pub steptime_us: u32,
}

/// One step within a motion-diagram segment with (signed) acceleration
/// `alpha_seg` and segment target velocity `omega_seg` (used only when
/// `alpha_seg == 0.0`, i.e. a constant-velocity segment).
pub fn md_segment_step(omega_current: f64, alpha_seg: f64, omega_seg: f64, steps_per_rev: u32) -> MdStep {
    let phi = phi_step(steps_per_rev);

    if alpha_seg == 0.0 {
        let omega_new = omega_seg;
        let steptime_us = if omega_new == 0.0 {
            0
        } else {
            seconds_to_us(safe_div(phi, omega_new.abs()))
        };
        return MdStep {
            omega_new,
            steptime_us,
        };
    }

    let k: f64 = if omega_current >= 0.0 && alpha_seg >= 0.0 {
        1.0
    } else if omega_current < 0.0 || (omega_current == 0.0 && alpha_seg < 0.0) {
        -1.0
    } else {
        1.0
    };

    let radicand = omega_current * omega_current + 2.0 * alpha_seg * k * phi;
    let omega_new = k * radicand.max(0.0).sqrt();
    let delta_t_s = safe_div(2.0 * k * phi, omega_current + omega_new);
    MdStep {
        omega_new,
        steptime_us: seconds_to_us(delta_t_s.abs()),
    }
}

/// `steptime` (µs) for a target angular velocity:
/// `ω = 2π·1e6 / (steptime·S)` inverted for `steptime`.
pub fn steptime_from_omega(omega: f64, steps_per_rev: u32) -> u32 {
    if omega == 0.0 || steps_per_rev == 0 {
        return 0;
    }
    seconds_to_us(safe_div(std::f64::consts::TAU, omega * steps_per_rev as f64))
}

/// `ω = 2π·1e6 / (steptime·S)`.
pub fn omega_from_steptime(steptime_us: u32, steps_per_rev: u32) -> f64 {
    if steptime_us == 0 || steps_per_rev == 0 {
        return 0.0;
    }
    std::f64::consts::TAU * US_PER_S / (steptime_us as f64 * steps_per_rev as f64)
}

/// `steptime = 1e6·60 / (S·rpm)`.
pub fn steptime_from_rpm(rpm: f64, steps_per_rev: u32) -> u32 {
    if rpm == 0.0 || steps_per_rev == 0 {
        return 0;
    }
    seconds_to_us(safe_div(60.0, rpm * steps_per_rev as f64))
}

#[inline]
fn seconds_to_us(seconds: f64) -> u32 {
    if !seconds.is_finite() || seconds <= 0.0 {
        return 0;
    }
    let us = seconds * US_PER_S;
    if us >= u32::MAX as f64 {
        u32::MAX
    } else {
        us.round() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const S: u32 = 400;

    #[test]
    fn phi_step_zero_steps_is_zero() {
        assert_eq!(phi_step(0), 0.0);
    }

    #[test]
    fn omega_target_matches_literal_scenario() {
        // S=400, steptime=2000us -> ~7.854 rad/s.
        let omega = omega_from_steptime(2000, S);
        assert!((omega - 7.853_981_634).abs() < 1e-6);
    }

    #[test]
    fn speed_up_ramps_then_snaps_to_target() {
        let omega_target = omega_from_steptime(2000, S);
        let mut omega_current = 0.0;
        let mut n = 0u64;
        let mut last_steptime = u32::MAX;
        let mut reached = false;

        for _ in 0..10_000 {
            match speed_up_step(n, S, 20.0, omega_target, omega_current) {
                RampStep::Ramping {
                    omega_new,
                    steptime_us,
                } => {
                    assert!(steptime_us <= last_steptime, "steptime should shrink while accelerating");
                    last_steptime = steptime_us;
                    omega_current = omega_new;
                    n += 1;
                }
                RampStep::ReachedTarget { steptime_us } => {
                    assert_eq!(steptime_us, 2000);
                    reached = true;
                    break;
                }
            }
        }
        assert!(reached, "ramp must reach target within a bounded number of steps");
    }

    #[test]
    fn speed_up_with_zero_alpha_snaps_immediately() {
        let omega_target = omega_from_steptime(2000, S);
        match speed_up_step(0, S, 0.0, omega_target, 0.0) {
            RampStep::ReachedTarget { steptime_us } => assert_eq!(steptime_us, 2000),
            RampStep::Ramping { .. } => panic!("alpha_up=0 must jump straight to Run"),
        }
    }

    #[test]
    fn speed_down_last_step_lands_at_zero_rest() {
        // With 1 step left, the formula must not panic or produce NaN.
        let steptime = speed_down_step(1, S, 40.0);
        assert!(steptime > 0);
    }

    #[test]
    fn speed_down_zero_alpha_is_no_constraint() {
        assert_eq!(speed_down_step(10, S, 0.0), 0);
    }

    #[test]
    fn braking_distance_zero_steps_per_rev_is_zero() {
        assert_eq!(braking_distance_steps(2000, 0, 40.0), 0.0);
    }

    #[test]
    fn braking_distance_is_positive_for_moving_motor() {
        let steps = braking_distance_steps(2000, S, 40.0);
        assert!(steps > 0.0);
    }

    #[test]
    fn md_step_constant_velocity_segment() {
        let step = md_segment_step(5.0, 0.0, 5.0, S);
        assert_eq!(step.omega_new, 5.0);
        assert!(step.steptime_us > 0);
    }

    #[test]
    fn md_step_zero_velocity_segment_has_no_constraint() {
        let step = md_segment_step(0.0, 0.0, 0.0, S);
        assert_eq!(step.steptime_us, 0);
    }

    #[test]
    fn md_step_accelerating_from_rest_is_positive_direction() {
        let step = md_segment_step(0.0, 10.0, 20.0, S);
        assert!(step.omega_new > 0.0);
    }

    #[test]
    fn md_step_decelerating_through_zero_flips_sign() {
        // Negative current omega with a positive segment acceleration should
        // keep decelerating toward (and past) zero as k is chosen by sign of
        // omega_current.
        let step = md_segment_step(-1.0, 5.0, 0.0, S);
        // k = -1 since omega_current < 0; new omega should move toward 0.
        assert!(step.omega_new.abs() <= 1.0 + 1e-9);
    }
}
