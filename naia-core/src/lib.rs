#![forbid(unsafe_code)]

mod cfg;
mod env;
mod error;
mod infer;
mod link;
mod ownership;
mod pipeline;
mod subtype;

pub mod bridge;
pub mod checked;
pub mod diag;
pub mod types;


pub use bridge::{CapabilityAllowlist, HostRegistry};
pub use checked::CheckedUnit;
pub use diag::{Diagnostic, DiagnosticKind, DiagnosticSink};
pub use error::AnalysisError;
pub use pipeline::{analyze, check, CancelToken, CheckOptions, CheckReport, CheckStatus};
pub use types::Type;
