//! Export and verification pipelines.
//!
//! Both pipelines share one forward evaluation path: export traces
//! [`SampleModel::forward`](crate::model::SampleModel::forward) to build the
//! graph, verification calls it directly and records the result.

pub mod export;
pub mod verify;

pub use export::{export, export_declared, ExportReport};
pub use verify::{verify, NamedTensor, Transcript};
