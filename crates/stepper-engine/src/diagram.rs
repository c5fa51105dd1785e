//! Motion diagrams: a piecewise-linear speed-over-time profile built from
//! waypoints, played back by the scheduler in `StartMd`/`RunMd`/
//! `RunSpeedMd`.
//!
//! A waypoint is `(t_us, omega)`: at time `t_us` after the diagram starts,
//! the motor should be moving at angular velocity `omega` (signed — a sign
//! change means a direction reversal). The segment between two consecutive
//! waypoints has constant acceleration, computed from the pair. Direction
//! reversals are split at the zero-crossing so no segment ever needs to
//! change the sign of `omega` partway through: a segment whose endpoints
//! have opposite sign gets a synthetic `omega = 0` waypoint inserted at
//! the interpolated crossing time.

use crate::error::EngineError;
use crate::kinematics::phi_step;
use crate::motor::DiagramId;

/// One waypoint: `(t_us, omega)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovePoint {
    pub t_us: u64,
    pub omega: f64,
}

/// A motion diagram: an ordered list of waypoints plus aggregates
/// computed as waypoints are added.
#[derive(Debug, Clone)]
pub struct MotionDiagram {
    pub id: DiagramId,
    waypoints: Vec<MovePoint>,
    steps_per_rev: u32,
    /// Cumulative step count as of the last `add_by_steps` call, so the
    /// next call can derive how many steps that segment covers.
    last_cumulative_steps: i64,
    /// Set once an insertion would have broken monotonic time; the
    /// diagram is no longer eligible to be started.
    pub data_incorrect: bool,
}

impl MotionDiagram {
    pub fn new(id: DiagramId, steps_per_rev: u32) -> Self {
        Self {
            id,
            waypoints: vec![MovePoint { t_us: 0, omega: 0.0 }],
            steps_per_rev,
            last_cumulative_steps: 0,
            data_incorrect: false,
        }
    }

    pub fn waypoints(&self) -> &[MovePoint] {
        &self.waypoints
    }

    pub fn steps_per_rev(&self) -> u32 {
        self.steps_per_rev
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.len() <= 1
    }

    /// Appends a waypoint given directly as `(t_us, omega)`.
    pub fn add_by_omega(&mut self, t_us: u64, omega: f64) -> Result<(), EngineError> {
        self.push(t_us, omega)
    }

    /// Appends a waypoint given as a frequency in Hz, i.e. revolutions
    /// per second (`rpm = Hz·60`, `ω = 2π·Hz`, independent of
    /// `steps_per_rev`).
    pub fn add_by_hz(&mut self, t_us: u64, hz: f64) -> Result<(), EngineError> {
        let omega = hz * std::f64::consts::TAU;
        self.push(t_us, omega)
    }

    /// Appends a waypoint given as revolutions per minute.
    pub fn add_by_rpm(&mut self, t_us: u64, rpm: f64) -> Result<(), EngineError> {
        let omega = rpm * std::f64::consts::TAU / 60.0;
        self.push(t_us, omega)
    }

    /// Appends a waypoint given as a frequency `hz` reached once the
    /// motor has taken `cumulative_steps` steps in total. The segment's
    /// duration is derived from the trapezoidal relation between the
    /// previous waypoint's velocity and `hz`'s: `Δt =
    /// |2·Δφ/(ω_prev+ω_new)|`, where `Δφ` is the signed angle implied by
    /// the step delta since the last call.
    pub fn add_by_steps(&mut self, hz: f64, cumulative_steps: i64) -> Result<(), EngineError> {
        let omega_new = hz * std::f64::consts::TAU;
        let delta_steps = cumulative_steps - self.last_cumulative_steps;
        self.last_cumulative_steps = cumulative_steps;
        let delta_phi = delta_steps as f64 * phi_step(self.steps_per_rev);
        let omega_prev = self.waypoints.last().map(|w| w.omega).unwrap_or(0.0);
        let denom = omega_prev + omega_new;
        if denom == 0.0 {
            self.data_incorrect = true;
            return Err(EngineError::Data("zero-duration waypoint segment".into()));
        }
        let dt_us = ((2.0 * delta_phi / denom).abs() * 1_000_000.0).round() as u64;
        if dt_us == 0 {
            self.data_incorrect = true;
            return Err(EngineError::Data("zero-duration waypoint segment".into()));
        }
        let last_t = self.waypoints.last().map(|w| w.t_us).unwrap_or(0);
        self.push(last_t + dt_us, omega_new)
    }

    fn push(&mut self, t_us: u64, omega: f64) -> Result<(), EngineError> {
        let last_t = self.waypoints.last().map(|w| w.t_us).unwrap_or(0);
        if t_us <= last_t {
            self.data_incorrect = true;
            return Err(EngineError::Data(format!(
                "waypoint time {t_us} does not advance past previous waypoint {last_t}"
            )));
        }
        if let Some(&prev) = self.waypoints.last() {
            if prev.omega.signum() != omega.signum() && prev.omega != 0.0 && omega != 0.0 {
                let crossing_t = interpolate_zero_crossing_time(prev, MovePoint { t_us, omega });
                self.waypoints.push(MovePoint {
                    t_us: crossing_t,
                    omega: 0.0,
                });
            }
        }
        self.waypoints.push(MovePoint { t_us, omega });
        Ok(())
    }

    /// Total angle traveled across every segment (signed contributions
    /// cancel, matching a trapezoidal integral of `omega` over time).
    pub fn phi_all(&self) -> f64 {
        self.waypoints
            .windows(2)
            .map(|pair| {
                let (a, b) = (pair[0], pair[1]);
                let dt = (b.t_us - a.t_us) as f64 / 1_000_000.0;
                0.5 * (a.omega + b.omega) * dt
            })
            .sum()
    }

    pub fn max_omega(&self) -> f64 {
        self.waypoints
            .iter()
            .map(|w| w.omega)
            .fold(f64::MIN, f64::max)
    }

    pub fn min_omega(&self) -> f64 {
        self.waypoints
            .iter()
            .map(|w| w.omega)
            .fold(f64::MAX, f64::min)
    }

    pub fn max_t(&self) -> u64 {
        self.waypoints.last().map(|w| w.t_us).unwrap_or(0)
    }

    /// Total step count implied by the diagram (`phi_all / phi_step`,
    /// rounded to the nearest whole step).
    pub fn sum_steps(&self) -> u64 {
        let phi = phi_step(self.steps_per_rev);
        if phi == 0.0 {
            return 0;
        }
        (self.phi_all().abs() / phi).round() as u64
    }

    /// The segment `(start, end)` that covers `t_us`, if any, along with
    /// its index. Used by the scheduler to find which acceleration
    /// applies to the pointer's current position.
    pub fn segment_at(&self, index: usize) -> Option<(MovePoint, MovePoint)> {
        let start = *self.waypoints.get(index)?;
        let end = *self.waypoints.get(index + 1)?;
        Some((start, end))
    }

    /// Constant acceleration implied by a segment.
    pub fn segment_alpha(start: MovePoint, end: MovePoint) -> f64 {
        let dt = (end.t_us - start.t_us) as f64 / 1_000_000.0;
        if dt == 0.0 {
            return 0.0;
        }
        (end.omega - start.omega) / dt
    }
}

fn interpolate_zero_crossing_time(a: MovePoint, b: MovePoint) -> u64 {
    let span = (b.t_us - a.t_us) as f64;
    let fraction = a.omega.abs() / (a.omega.abs() + b.omega.abs());
    a.t_us + (span * fraction).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diagram() -> MotionDiagram {
        MotionDiagram::new(DiagramId(0), 400)
    }

    #[test]
    fn new_diagram_starts_at_rest() {
        let d = diagram();
        assert_eq!(d.waypoints().len(), 1);
        assert_eq!(d.waypoints()[0].omega, 0.0);
    }

    #[test]
    fn rejects_non_advancing_time() {
        let mut d = diagram();
        d.add_by_omega(1_000_000, 5.0).unwrap();
        let err = d.add_by_omega(1_000_000, 6.0);
        assert!(err.is_err());
        assert!(d.data_incorrect);
    }

    #[test]
    fn direction_reversal_inserts_zero_crossing() {
        let mut d = diagram();
        d.add_by_omega(1_000_000, 5.0).unwrap();
        d.add_by_omega(2_000_000, -5.0).unwrap();
        // rest -> +5 (no crossing), +5 -> -5 (crossing inserted), so 4 points total.
        assert_eq!(d.waypoints().len(), 4);
        assert_eq!(d.waypoints()[2].omega, 0.0);
        assert_eq!(d.waypoints()[2].t_us, 1_500_000);
    }

    #[test]
    fn add_by_rpm_matches_add_by_omega() {
        let mut a = diagram();
        let mut b = diagram();
        a.add_by_rpm(1_000_000, 60.0).unwrap();
        b.add_by_omega(1_000_000, std::f64::consts::TAU).unwrap();
        assert!((a.waypoints()[1].omega - b.waypoints()[1].omega).abs() < 1e-9);
    }

    #[test]
    fn phi_all_accumulates_trapezoidal_area() {
        let mut d = diagram();
        d.add_by_omega(1_000_000, 10.0).unwrap();
        d.add_by_omega(2_000_000, 10.0).unwrap();
        // ramp 0->10 over 1s (area 5) then constant 10 over 1s (area 10) = 15.
        assert!((d.phi_all() - 15.0).abs() < 1e-9);
    }

    #[test]
    fn segment_alpha_zero_duration_is_zero() {
        let start = MovePoint { t_us: 0, omega: 0.0 };
        let end = MovePoint { t_us: 0, omega: 5.0 };
        assert_eq!(MotionDiagram::segment_alpha(start, end), 0.0);
    }

    #[test]
    fn add_by_steps_zero_duration_marks_incorrect() {
        let mut d = diagram();
        // Starting and ending at rest with no step delta: ω_prev+ω_new=0.
        let err = d.add_by_steps(0.0, 0);
        assert!(err.is_err());
        assert!(d.data_incorrect);
    }

    #[test]
    fn add_by_steps_from_rest_matches_trapezoidal_formula() {
        let mut d = diagram();
        // From rest to 10 Hz (ω=10·TAU) over a segment of 100 steps at
        // 400 steps/rev (Δφ = 100·TAU/400 = TAU/4).
        d.add_by_steps(10.0, 100).unwrap();
        let omega_new = 10.0 * std::f64::consts::TAU;
        let delta_phi = std::f64::consts::TAU / 4.0;
        let expected_dt_us = ((2.0 * delta_phi / omega_new) * 1_000_000.0).round() as u64;
        assert_eq!(d.waypoints()[1].t_us, expected_dt_us);
        assert!((d.waypoints()[1].omega - omega_new).abs() < 1e-9);
    }
}
