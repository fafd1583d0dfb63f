//! Golden vector checks for exported artifacts.
//!
//! A verification transcript is the oracle: its inputs are fed to an
//! independent evaluation of the artifact and every named output must match
//! within an absolute tolerance.
//!
//! # Architecture
//!
//! - [`GoldenCase`] - one model's inputs and expected outputs
//! - [`GoldenTestHarness`] - runs cases through an evaluator
//! - [`GoldenResult`] - per-case outcome with the largest error found
//! - [`GoldenSummary`] - totals over all cases
//!
//! # Example
//!
//! ```rust,ignore
//! let mut harness = GoldenTestHarness::new();
//! harness.add_case(GoldenCase::from_transcript("mlp", &transcript));
//!
//! let summary = harness.run_with(|case| {
//!     let interp = Interpreter::from_file(&path, &Device::Cpu).map_err(|e| e.to_string())?;
//!     run_artifact(&interp, &case.inputs, &Device::Cpu).map_err(|e| e.to_string())
//! });
//! assert!(summary.all_passed());
//! ```

use crate::error::Result;
use crate::pipeline::{NamedTensor, Transcript};
use crate::runtime::Interpreter;
use candle_core::Device;
use std::fmt;

/// Default absolute tolerance between golden and recomputed outputs.
pub const DEFAULT_TOLERANCE: f32 = 1e-5;

/// A single golden case.
#[derive(Debug, Clone)]
pub struct GoldenCase {
    /// Case name, usually the model name.
    pub name: String,
    /// Named inputs to feed.
    pub inputs: Vec<NamedTensor>,
    /// Expected named outputs.
    pub expected: Vec<NamedTensor>,
    /// Allowed absolute difference per element.
    pub tolerance: f32,
}

impl GoldenCase {
    /// Case whose oracle is a verification transcript.
    pub fn from_transcript(name: impl Into<String>, transcript: &Transcript) -> Self {
        Self {
            name: name.into(),
            inputs: transcript.inputs.clone(),
            expected: transcript.outputs.clone(),
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    /// Set the tolerance.
    pub fn with_tolerance(mut self, tolerance: f32) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Compare actual outputs against the expected ones.
    ///
    /// Outputs are matched by name; order does not matter.
    pub fn compare(&self, actual: &[NamedTensor], time_ms: f64) -> GoldenResult {
        let mut max_abs_diff = 0f32;
        let mut divergence: Option<Divergence> = None;

        for expected in &self.expected {
            let Some(found) = actual.iter().find(|t| t.name == expected.name) else {
                return GoldenResult::error(
                    self.name.clone(),
                    format!("output '{}' missing", expected.name),
                );
            };
            if found.shape != expected.shape {
                return GoldenResult::error(
                    self.name.clone(),
                    format!(
                        "output '{}' has shape {:?}, expected {:?}",
                        expected.name, found.shape, expected.shape
                    ),
                );
            }

            for (index, (&want, &got)) in expected.data.iter().zip(&found.data).enumerate() {
                let diff = (want - got).abs();
                // NaN never compares within tolerance
                let within = diff <= self.tolerance;
                if diff > max_abs_diff || diff.is_nan() {
                    max_abs_diff = if diff.is_nan() { f32::INFINITY } else { diff };
                }
                if !within && divergence.is_none() {
                    divergence = Some(Divergence {
                        output: expected.name.clone(),
                        index,
                        expected: want,
                        actual: got,
                    });
                }
            }
        }

        match divergence {
            None => GoldenResult::passed(self.name.clone(), max_abs_diff, time_ms),
            Some(d) => GoldenResult::failed(self.name.clone(), max_abs_diff, d, time_ms),
        }
    }
}

/// First element outside tolerance.
#[derive(Debug, Clone, PartialEq)]
pub struct Divergence {
    /// Output name.
    pub output: String,
    /// Flat row-major index.
    pub index: usize,
    /// Golden value.
    pub expected: f32,
    /// Recomputed value.
    pub actual: f32,
}

/// Result of a single golden case.
#[derive(Debug, Clone)]
pub struct GoldenResult {
    /// Case name.
    pub name: String,
    /// Whether every output matched.
    pub passed: bool,
    /// Largest absolute difference seen.
    pub max_abs_diff: f32,
    /// First diverging element (if any).
    pub first_divergence: Option<Divergence>,
    /// Error message (if the case could not be compared).
    pub error: Option<String>,
    /// Execution time in milliseconds.
    pub time_ms: f64,
}

impl GoldenResult {
    /// Create a passed result.
    pub fn passed(name: String, max_abs_diff: f32, time_ms: f64) -> Self {
        Self {
            name,
            passed: true,
            max_abs_diff,
            first_divergence: None,
            error: None,
            time_ms,
        }
    }

    /// Create a failed result.
    pub fn failed(name: String, max_abs_diff: f32, divergence: Divergence, time_ms: f64) -> Self {
        let error = format!(
            "Divergence in '{}' at index {}: expected {:?}, got {:?}",
            divergence.output, divergence.index, divergence.expected, divergence.actual
        );
        Self {
            name,
            passed: false,
            max_abs_diff,
            first_divergence: Some(divergence),
            error: Some(error),
            time_ms,
        }
    }

    /// Create an error result.
    pub fn error(name: String, error: String) -> Self {
        Self {
            name,
            passed: false,
            max_abs_diff: f32::INFINITY,
            first_divergence: None,
            error: Some(error),
            time_ms: 0.0,
        }
    }
}

impl fmt::Display for GoldenResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.passed { "PASS" } else { "FAIL" };
        write!(f, "[{}] {} ({:.1}ms)", status, self.name, self.time_ms)?;
        if self.max_abs_diff.is_finite() {
            write!(f, " max abs diff {:e}", self.max_abs_diff)?;
        }

        if !self.passed {
            if let Some(ref err) = self.error {
                write!(f, "\n  Error: {}", err)?;
            }
        }

        Ok(())
    }
}

/// Summary of golden case results.
#[derive(Debug, Clone, Default)]
pub struct GoldenSummary {
    /// Total number of cases.
    pub total: usize,
    /// Number of passed cases.
    pub passed: usize,
    /// Number of failed cases.
    pub failed: usize,
    /// Total execution time in milliseconds.
    pub total_time_ms: f64,
    /// Results in case order.
    pub results: Vec<GoldenResult>,
}

impl GoldenSummary {
    /// Create from results.
    pub fn from_results(results: Vec<GoldenResult>) -> Self {
        let total = results.len();
        let passed = results.iter().filter(|r| r.passed).count();
        let total_time_ms = results.iter().map(|r| r.time_ms).sum();

        Self {
            total,
            passed,
            failed: total - passed,
            total_time_ms,
            results,
        }
    }

    /// Check if all cases passed.
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }

    /// Look up a result by case name.
    pub fn get(&self, name: &str) -> Option<&GoldenResult> {
        self.results.iter().find(|r| r.name == name)
    }
}

impl fmt::Display for GoldenSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Golden Check Summary")?;
        writeln!(f, "====================")?;
        for result in &self.results {
            writeln!(f, "{result}")?;
        }
        writeln!(f, "Total:  {}", self.total)?;
        writeln!(f, "Passed: {}", self.passed)?;
        writeln!(f, "Failed: {}", self.failed)?;
        write!(f, "Time:   {:.1}ms", self.total_time_ms)
    }
}

/// Runs golden cases through an evaluator.
#[derive(Debug, Clone, Default)]
pub struct GoldenTestHarness {
    cases: Vec<GoldenCase>,
}

impl GoldenTestHarness {
    /// Create an empty harness.
    pub fn new() -> Self {
        Self { cases: Vec::new() }
    }

    /// Add a case.
    pub fn add_case(&mut self, case: GoldenCase) {
        self.cases.push(case);
    }

    /// All cases.
    pub fn cases(&self) -> &[GoldenCase] {
        &self.cases
    }

    /// Evaluate every case and compare.
    ///
    /// The evaluator receives the case and returns the outputs it computed;
    /// an evaluator error becomes an error result for that case only.
    pub fn run_with<F>(&self, mut evaluate: F) -> GoldenSummary
    where
        F: FnMut(&GoldenCase) -> std::result::Result<Vec<NamedTensor>, String>,
    {
        let results = self
            .cases
            .iter()
            .map(|case| {
                let start = std::time::Instant::now();
                match evaluate(case) {
                    Ok(actual) => {
                        let elapsed = start.elapsed().as_secs_f64() * 1000.0;
                        case.compare(&actual, elapsed)
                    }
                    Err(err) => GoldenResult::error(case.name.clone(), err),
                }
            })
            .collect();

        GoldenSummary::from_results(results)
    }
}

/// Feed named inputs to an artifact and capture its named outputs.
pub fn run_artifact(
    interpreter: &Interpreter,
    inputs: &[NamedTensor],
    device: &Device,
) -> Result<Vec<NamedTensor>> {
    let tensors = inputs
        .iter()
        .map(|t| t.to_tensor(device))
        .collect::<Result<Vec<_>>>()?;
    let feeds: Vec<(&str, &candle_core::Tensor)> = inputs
        .iter()
        .map(|t| t.name.as_str())
        .zip(&tensors)
        .collect();

    interpreter
        .run(&feeds)?
        .iter()
        .map(|(name, tensor)| NamedTensor::from_tensor(name.clone(), tensor))
        .collect()
}
