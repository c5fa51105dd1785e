//! Motion-profile file I/O: loading a text file of waypoints into a
//! [`MotionDiagram`], and writing a diagram back out as a tab-separated
//! plot-data file a caller can hand to an external plotting tool.
//!
//! A profile file is line-oriented. Blank lines and lines whose first
//! non-space character is `#` are ignored. Every other line holds exactly
//! two whitespace-separated floating-point numbers, whose meaning depends
//! on the [`SpeedFormat`] chosen for the whole file:
//!
//! - `Omega`: `ω[rad/s] t[s]`
//! - `Freq`: `f[Hz] t[s]`
//! - `Rpm`: `rpm[1/min] t[s]`
//! - `Step`: `f[Hz] cumulative_steps` — the velocity `f` (revolutions
//!   per second) reached once the motor has taken `cumulative_steps`
//!   steps in total; the segment's duration is derived from the
//!   trapezoidal relation between the previous waypoint's velocity and
//!   `f`, not a constant-velocity estimate.
//!
//! A line with other than two fields is a diagnostic, not a failure: it
//! is skipped. A negative `t[s]` aborts the load outright and marks the
//! diagram `data_incorrect`.

use std::io::{BufRead, BufWriter, Write};
use std::path::Path;

use crate::diagram::MotionDiagram;
use crate::error::EngineError;
use crate::motor::DiagramId;

/// Which of the two file-line shapes a profile file uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedFormat {
    Omega,
    Freq,
    Rpm,
    Step,
}

pub fn load_diagram(
    path: &Path,
    id: DiagramId,
    steps_per_rev: u32,
    speed_format: SpeedFormat,
) -> Result<MotionDiagram, EngineError> {
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    let mut diagram = MotionDiagram::new(id, steps_per_rev);

    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let mut fields = trimmed.split_whitespace();
        let (Some(a_field), Some(b_field), None) = (fields.next(), fields.next(), fields.next()) else {
            tracing::warn!(line = lineno + 1, text = trimmed, "malformed motion-profile line, skipping");
            continue;
        };

        let Some(a) = parse_f64(a_field) else {
            tracing::warn!(line = lineno + 1, field = a_field, "unparseable field, skipping");
            continue;
        };
        let Some(b) = parse_f64(b_field) else {
            tracing::warn!(line = lineno + 1, field = b_field, "unparseable field, skipping");
            continue;
        };

        let result = match speed_format {
            SpeedFormat::Omega => {
                let t_us = parse_time(b, &mut diagram, lineno)?;
                t_us.map(|t| diagram.add_by_omega(t, a))
            }
            SpeedFormat::Freq => {
                let t_us = parse_time(b, &mut diagram, lineno)?;
                t_us.map(|t| diagram.add_by_hz(t, a))
            }
            SpeedFormat::Rpm => {
                let t_us = parse_time(b, &mut diagram, lineno)?;
                t_us.map(|t| diagram.add_by_rpm(t, a))
            }
            SpeedFormat::Step => {
                let cumulative_steps = b as i64;
                Some(diagram.add_by_steps(a, cumulative_steps))
            }
        };

        match result {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                tracing::warn!(line = lineno + 1, error = %e, "rejected motion-profile waypoint");
                return Err(e);
            }
            None => {}
        }
    }

    Ok(diagram)
}

/// Converts a `t[s]` field to microseconds, aborting the load on a
/// negative value per the profile-file format.
fn parse_time(t_s: f64, diagram: &mut MotionDiagram, lineno: usize) -> Result<Option<u64>, EngineError> {
    if t_s < 0.0 {
        diagram.data_incorrect = true;
        return Err(EngineError::Data(format!(
            "line {}: negative waypoint time {t_s}",
            lineno + 1
        )));
    }
    Ok(Some(seconds_to_us(t_s)))
}

fn seconds_to_us(s: f64) -> u64 {
    (s * 1_000_000.0).round() as u64
}

fn parse_f64(s: &str) -> Option<f64> {
    s.parse().ok()
}

/// Writes `diagram` as a plot-data table: a header line naming the axes
/// followed by one `t[s]  f[Hz]  <sum_steps>-Steps` row per waypoint.
pub fn plot_diagram(diagram: &MotionDiagram, path: &Path) -> Result<(), EngineError> {
    let file = std::fs::File::create(path)?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "# x=t[s]   y=omega[s^-1]   steps")?;
    let phi = crate::kinematics::phi_step(diagram_steps_per_rev(diagram));
    let mut sum_steps = 0.0_f64;
    let mut prev: Option<&crate::diagram::MovePoint> = None;
    for point in diagram.waypoints() {
        if let Some(p) = prev {
            let dt = (point.t_us - p.t_us) as f64 / 1_000_000.0;
            sum_steps += 0.5 * (p.omega + point.omega).abs() * dt / phi.max(f64::MIN_POSITIVE);
        }
        let t_s = point.t_us as f64 / 1_000_000.0;
        let hz = point.omega / std::f64::consts::TAU;
        writeln!(writer, "{t_s}\t{hz}\t{:.0}-Steps", sum_steps)?;
        prev = Some(point);
    }
    writer.flush()?;
    Ok(())
}

fn diagram_steps_per_rev(diagram: &MotionDiagram) -> u32 {
    diagram.steps_per_rev()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    struct TempPath(PathBuf);

    impl Drop for TempPath {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    fn write_temp(contents: &str) -> TempPath {
        let path = std::env::temp_dir().join(format!(
            "stepper-engine-test-{:?}-{}",
            std::thread::current().id(),
            PLOT_TEST_COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
        ));
        std::fs::write(&path, contents).unwrap();
        TempPath(path)
    }

    static PLOT_TEST_COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

    #[test]
    fn loads_omega_profile() {
        let tmp = write_temp("# ramp up then hold\n5.0 1.0\n10.0 2.0\n\n10.0 3.0\n");
        let diagram = load_diagram(&tmp.0, DiagramId(0), 400, SpeedFormat::Omega).unwrap();
        assert_eq!(diagram.waypoints().len(), 4);
    }

    #[test]
    fn loads_rpm_profile_matching_omega() {
        let tmp = write_temp("60.0 1.0\n");
        let diagram = load_diagram(&tmp.0, DiagramId(0), 400, SpeedFormat::Rpm).unwrap();
        assert!((diagram.waypoints()[1].omega - std::f64::consts::TAU).abs() < 1e-9);
    }

    #[test]
    fn loads_step_profile_by_cumulative_count() {
        // 400 steps/rev, 100 steps reaching 100Hz from rest.
        let tmp = write_temp("100.0 100\n");
        let diagram = load_diagram(&tmp.0, DiagramId(0), 400, SpeedFormat::Step).unwrap();
        assert_eq!(diagram.waypoints().len(), 2);
        assert!((diagram.waypoints()[1].omega - 100.0 * std::f64::consts::TAU).abs() < 1e-9);
    }

    #[test]
    fn negative_time_marks_incorrect_and_aborts() {
        let tmp = write_temp("5.0 -1.0\n");
        let err = load_diagram(&tmp.0, DiagramId(0), 400, SpeedFormat::Omega);
        assert!(err.is_err());
    }

    #[test]
    fn malformed_line_is_skipped_not_fatal() {
        let tmp = write_temp("not-a-number extra fields here\n5.0 1.0\n");
        let diagram = load_diagram(&tmp.0, DiagramId(0), 400, SpeedFormat::Omega).unwrap();
        assert_eq!(diagram.waypoints().len(), 2);
    }
}
