//! Action dispatcher over the three model pipelines.

use candle_core::Device;
use sample_models_core::{
    config::HarnessConfig,
    golden::{run_artifact, GoldenCase, GoldenSummary, GoldenTestHarness},
    graph::ExportTarget,
    model::ModelKind,
    pipeline::{export_declared, verify, ExportReport, Transcript},
    runtime::Interpreter,
    synth::{sample_input, SampleMode},
    HarnessError,
};
use std::fmt;
use std::path::PathBuf;

/// Builder for creating a Harness.
pub struct HarnessBuilder {
    config: HarnessConfig,
}

impl HarnessBuilder {
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: HarnessConfig::default(),
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: HarnessConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the artifact directory.
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    /// Set the parameter seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    /// Validate the configuration and build the harness.
    pub fn build(self) -> sample_models_core::Result<Harness> {
        self.config.validate()?;
        Ok(Harness {
            config: self.config,
            device: Device::Cpu,
        })
    }
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// One model's failure during an action.
#[derive(Debug)]
pub struct ModelFailure {
    /// Model that failed.
    pub model: ModelKind,
    /// What went wrong.
    pub error: HarnessError,
}

impl fmt::Display for ModelFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.model, self.error)
    }
}

/// Outcome of running one action over every model.
///
/// A failing model does not stop the others.
#[derive(Debug)]
pub struct RunReport<T> {
    /// Per-model results of the models that succeeded, in model order.
    pub completed: Vec<(ModelKind, T)>,
    /// Models that failed.
    pub failures: Vec<ModelFailure>,
}

impl<T> RunReport<T> {
    fn collect(mut step: impl FnMut(ModelKind) -> sample_models_core::Result<T>) -> Self {
        let mut report = Self {
            completed: Vec::new(),
            failures: Vec::new(),
        };
        for kind in ModelKind::ALL {
            match step(kind) {
                Ok(value) => report.completed.push((kind, value)),
                Err(error) => {
                    tracing::warn!(model = kind.name(), %error, "pipeline failed");
                    report.failures.push(ModelFailure { model: kind, error });
                }
            }
        }
        report
    }

    /// True when no model failed.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

impl<T: fmt::Display> fmt::Display for RunReport<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (_, value) in &self.completed {
            writeln!(f, "{value}")?;
        }
        Ok(())
    }
}

/// Runs the export, verification and golden-check actions.
pub struct Harness {
    config: HarnessConfig,
    device: Device,
}

impl Harness {
    /// Create a new harness builder.
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::new()
    }

    /// Get harness configuration.
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Export every model into the output directory.
    pub fn generate(&self) -> RunReport<ExportReport> {
        let target = ExportTarget::from_config(&self.config);
        RunReport::collect(|kind| {
            let model = kind.build(&self.config, &self.device)?;
            tracing::info!("{model}");
            let sample = sample_input(kind, SampleMode::Export, &self.config, &self.device)?;
            let path = self.config.artifact_path(kind.name());
            export_declared(model.as_ref(), &sample, &path, &target)
        })
    }

    /// Run every model directly on its verification input.
    pub fn test(&self) -> RunReport<Transcript> {
        RunReport::collect(|kind| {
            let model = kind.build(&self.config, &self.device)?;
            let sample = sample_input(kind, SampleMode::Verify, &self.config, &self.device)?;
            verify(model.as_ref(), &sample)
        })
    }

    /// Check every exported artifact against its verification transcript.
    ///
    /// A model whose transcript cannot be produced shows up as an error
    /// result in the summary.
    pub fn check(&self) -> GoldenSummary {
        let transcripts = self.test();

        let mut harness = GoldenTestHarness::new();
        for (kind, transcript) in &transcripts.completed {
            harness.add_case(GoldenCase::from_transcript(kind.name(), transcript));
        }

        let mut summary = harness.run_with(|case| {
            let path = self.config.artifact_path(&case.name);
            let interpreter =
                Interpreter::from_file(&path, &self.device).map_err(|e| e.to_string())?;
            run_artifact(&interpreter, &case.inputs, &self.device).map_err(|e| e.to_string())
        });

        if !transcripts.is_success() {
            let mut results = summary.results;
            for failure in transcripts.failures {
                results.push(sample_models_core::golden::GoldenResult::error(
                    failure.model.name().to_string(),
                    failure.error.to_string(),
                ));
            }
            summary = GoldenSummary::from_results(results);
        }
        summary
    }
}

impl fmt::Debug for Harness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Harness")
            .field("config", &self.config)
            .field("device", &self.device)
            .finish()
    }
}
