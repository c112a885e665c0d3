//! ---
//! sw_section: "02-orchestration"
//! sw_subsection: "module"
//! sw_type: "source"
//! sw_scope: "code"
//! sw_description: "Convergence check of the robot's final pose."
//! sw_version: "v0.1.0"
//! sw_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use simwalk_common::config::ValidationConfig;
use tracing::{info, warn};

use crate::error::HarnessError;

/// Maximum lateral/vertical deviation accepted by default.
pub const DEFAULT_TOLERANCE: f64 = 0.07;

/// A point in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl From<[f64; 3]> for Position {
    fn from([x, y, z]: [f64; 3]) -> Self {
        Self { x, y, z }
    }
}

/// Outcome of a convergence check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConvergenceResult {
    pub observed: Position,
    pub expected: Position,
    pub dy: f64,
    pub dz: f64,
    pub distance: f64,
    pub tolerance: f64,
    pub passed: bool,
}

/// Compare `observed` against `expected` in the y/z plane.
///
/// Forward progress along x is free, so x never enters the distance.
/// The bound is strict: a distance equal to `tolerance` fails.
pub fn validate(observed: Position, expected: Position, tolerance: f64) -> ConvergenceResult {
    let dy = observed.y - expected.y;
    let dz = observed.z - expected.z;
    let distance = (dy * dy + dz * dz).sqrt();
    ConvergenceResult {
        observed,
        expected,
        dy,
        dz,
        distance,
        tolerance,
        passed: distance < tolerance,
    }
}

/// Render the four-line report (`x:`, `y:`, `z:`, `dist:`).
pub fn render_report(result: &ConvergenceResult) -> String {
    format!(
        "x:{}\ny:{}\nz:{}\ndist:{}",
        result.observed.x, result.observed.y, result.observed.z, result.distance
    )
}

/// Overwrite `path` with the report for `result`.
pub fn write_report(path: &Path, result: &ConvergenceResult) -> Result<(), HarnessError> {
    fs::write(path, render_report(result)).map_err(|source| HarnessError::ReportWrite {
        path: path.to_path_buf(),
        source,
    })
}

/// Configured validator: expected pose, tolerance and report sink.
#[derive(Debug, Clone)]
pub struct ConvergenceValidator {
    expected: Position,
    tolerance: f64,
    report_path: Option<PathBuf>,
}

impl ConvergenceValidator {
    pub fn new(expected: Position, tolerance: f64) -> Self {
        Self {
            expected,
            tolerance,
            report_path: None,
        }
    }

    pub fn from_config(config: &ValidationConfig) -> Self {
        Self::new(config.expected_position.into(), config.tolerance)
            .with_report_path(config.report_path.clone())
    }

    pub fn with_report_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.report_path = Some(path.into());
        self
    }

    /// Validate `observed` and persist the report.
    ///
    /// A report that cannot be written is logged; the verdict still stands.
    pub fn validate(&self, observed: Position) -> ConvergenceResult {
        let result = validate(observed, self.expected, self.tolerance);
        info!(
            x = observed.x,
            y = observed.y,
            z = observed.z,
            distance = result.distance,
            tolerance = result.tolerance,
            passed = result.passed,
            "convergence evaluated"
        );
        if let Some(path) = &self.report_path {
            if let Err(err) = write_report(path, &result) {
                warn!(error = %err, "convergence report not written");
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const EXPECTED: Position = Position::new(0.0, 0.0038, 1.00152);

    #[test]
    fn pose_near_target_passes() {
        let result = validate(Position::new(2.5, 0.01, 1.0), EXPECTED, DEFAULT_TOLERANCE);
        assert!(result.passed);
        assert!((result.distance - 0.006_384).abs() < 1e-5, "{}", result.distance);
    }

    #[test]
    fn lateral_drift_fails() {
        let result = validate(Position::new(0.0, 0.2, 1.0), EXPECTED, DEFAULT_TOLERANCE);
        assert!(!result.passed);
        assert!((result.distance - 0.1962).abs() < 1e-3, "{}", result.distance);
    }

    #[test]
    fn small_lateral_and_vertical_error_passes() {
        let result = validate(Position::new(3.0, 0.05, 0.98), EXPECTED, DEFAULT_TOLERANCE);
        assert!((result.distance - 0.0510).abs() < 1e-3, "{}", result.distance);
        assert!(result.passed);
    }

    #[test]
    fn large_lateral_and_vertical_error_fails() {
        let result = validate(Position::new(3.0, 0.2, 0.98), EXPECTED, DEFAULT_TOLERANCE);
        assert!((result.distance - 0.1974).abs() < 1e-3, "{}", result.distance);
        assert!(!result.passed);
    }

    #[test]
    fn forward_distance_is_ignored() {
        let near = validate(Position::new(0.0, 0.0038, 1.00152), EXPECTED, DEFAULT_TOLERANCE);
        let far = validate(Position::new(100.0, 0.0038, 1.00152), EXPECTED, DEFAULT_TOLERANCE);
        assert_eq!(near.distance, far.distance);
        assert_eq!(far.distance, 0.0);
        assert!(far.passed);
    }

    #[test]
    fn boundary_distance_fails() {
        let result = validate(Position::new(0.0, 3.0, 4.0), Position::new(0.0, 0.0, 0.0), 5.0);
        assert_eq!(result.distance, 5.0);
        assert!(!result.passed);
    }

    #[test]
    fn report_has_four_lines() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("output.dat");
        let validator =
            ConvergenceValidator::new(EXPECTED, DEFAULT_TOLERANCE).with_report_path(&path);
        let result = validator.validate(Position::new(1.5, 0.25, 2.0));
        let contents = fs::read_to_string(&path).expect("report");
        let dist = format!("dist:{}", result.distance);
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines, vec!["x:1.5", "y:0.25", "z:2", dist.as_str()]);
        assert!(!contents.ends_with('\n'));
    }

    #[test]
    fn unwritable_report_keeps_verdict() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("missing").join("output.dat");
        let validator =
            ConvergenceValidator::new(EXPECTED, DEFAULT_TOLERANCE).with_report_path(&path);
        let result = validator.validate(Position::new(0.0, 0.0038, 1.0));
        assert!(result.passed);
        assert!(!path.exists());
    }

    #[test]
    fn write_report_surfaces_io_error() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("missing").join("output.dat");
        let result = validate(Position::new(0.0, 0.0, 0.0), EXPECTED, DEFAULT_TOLERANCE);
        let err = write_report(&path, &result).expect_err("parent missing");
        assert!(matches!(err, HarnessError::ReportWrite { .. }));
    }
}
