//! Fatal error kinds raised by the pipeline.
//!
//! Every kind halts the run. They travel inside `anyhow::Error` so call sites
//! can attach context freely; `pipeline_error` recovers the typed kind from
//! the chain when a caller needs to branch on it.
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Unknown material/composition code or an otherwise invalid setting.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A required input file is absent right before an external process call.
    #[error("missing artifact {artifact}: {}", path.display())]
    MissingArtifact { artifact: String, path: PathBuf },

    /// The solver/observer transcript matched a failure predicate.
    #[error("[{program}] {line}")]
    ExternalProcess { program: String, line: String },

    /// The user interrupted a blocking external call.
    #[error("[{program}] received SIGINT, execution halted by user")]
    Interrupted { program: String },

    /// Explicitly unimplemented path.
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// Opacity tables being combined do not share a wavelength grid.
    #[error("cannot mix opacity tables on different wavelength grids ({left} vs {right} samples)")]
    MismatchedGrid { left: usize, right: usize },

    /// Remote table lookup or download failed.
    #[error("unable to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },
}

impl PipelineError {
    pub fn configuration(message: impl Into<String>) -> Self {
        PipelineError::Configuration(message.into())
    }

    pub fn missing(artifact: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        PipelineError::MissingArtifact {
            artifact: artifact.into(),
            path: path.into(),
        }
    }

    pub fn unsupported(feature: impl Into<String>) -> Self {
        PipelineError::UnsupportedFeature(feature.into())
    }
}

/// Find the first typed pipeline error in an `anyhow` chain.
pub fn pipeline_error(err: &anyhow::Error) -> Option<&PipelineError> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<PipelineError>())
}

/// True when the chain carries a failed remote lookup.
pub fn is_fetch_failure(err: &anyhow::Error) -> bool {
    matches!(pipeline_error(err), Some(PipelineError::Fetch { .. }))
}
