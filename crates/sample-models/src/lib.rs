//! # Sample Models
//!
//! Reproducible sample models for exercising ONNX runtimes.
//!
//! Three tiny models (an MLP, a batch-first GRU and a fitted standard scaler)
//! are built from a fixed seed, exported as ONNX artifacts with named and
//! dynamically sized inputs, and run directly to produce golden vectors:
//! - **generate**: write `mlp.onnx`, `gru.onnx` and `scaler.onnx`
//! - **test**: print the input/output transcript of every model
//! - **check**: run the artifacts through the reference interpreter and
//!   compare against the transcripts
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sample_models::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let harness = Harness::builder().output_dir("onnx_models").build()?;
//!
//!     let exported = harness.generate();
//!     for (_, report) in &exported.completed {
//!         println!("{report}");
//!     }
//!
//!     println!("{}", harness.check());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// Re-export core crate
pub use sample_models_core::*;

mod harness;

pub use harness::{Harness, HarnessBuilder, ModelFailure, RunReport};

/// Commonly used types.
pub mod prelude {
    pub use crate::harness::{Harness, HarnessBuilder, ModelFailure, RunReport};
    pub use sample_models_core::prelude::*;

    // Re-export useful external types
    pub use anyhow;
    pub use tracing;
}
