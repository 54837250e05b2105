#![forbid(unsafe_code)]

//! Error surface for drivers that treat a failed run as `Err`.

use miette::Diagnostic as MietteDiagnostic;
use thiserror::Error;

use crate::diag::Diagnostic;
use crate::pipeline::{CheckReport, CheckStatus};

#[derive(Debug, Error, MietteDiagnostic)]
pub enum AnalysisError {
    /// The run completed and produced diagnostics; they travel with the
    /// error so an embedder can inspect or re-render them.
    #[error("analysis failed with {} diagnostic(s)", .0.len())]
    #[diagnostic(code(naia::sema))]
    Failed(Vec<Diagnostic>),

    #[error("analysis canceled before completion")]
    #[diagnostic(code(naia::canceled))]
    Canceled,
}

impl CheckReport {
    pub fn into_result(self) -> Result<(), AnalysisError> {
        match self.status {
            CheckStatus::Passed => Ok(()),
            CheckStatus::Failed => Err(AnalysisError::Failed(self.diagnostics)),
            CheckStatus::Canceled => Err(AnalysisError::Canceled),
        }
    }
}
