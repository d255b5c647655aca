use crate::core::series::VolumeKind;
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tomo_tools::ToolError;

/// The pipeline step that was running an external program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    MotionCorrection,
    Reconstruction(VolumeKind),
    IntegratedReconstruction,
    ExtractTrainData,
    Train,
    Predict,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::MotionCorrection => write!(f, "motion correction"),
            Stage::Reconstruction(kind) => write!(f, "{} reconstruction", kind.label()),
            Stage::IntegratedReconstruction => write!(f, "integrated reconstruction"),
            Stage::ExtractTrainData => write!(f, "training data extraction"),
            Stage::Train => write!(f, "denoiser training"),
            Stage::Predict => write!(f, "denoiser prediction"),
        }
    }
}

/// Every failure is terminal for the run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no raw data directory at {0:?}")]
    MissingRawDirectory(PathBuf),

    #[error("expected input file is missing: {0:?}")]
    MissingInput(PathBuf),

    #[error("malformed metadata file {path:?}: {reason}")]
    MalformedMetadata { path: PathBuf, reason: String },

    #[error("{stage} failed for {series}: {detail}")]
    ExternalToolFailure {
        series: String,
        stage: Stage,
        detail: String,
    },

    #[error("could not write config document {path:?}: {source}")]
    ConfigWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot draw a training subset of {requested} from {available} series")]
    InvalidSubset { requested: usize, available: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unusable MRC file {path:?}: {reason}")]
    Mrc { path: PathBuf, reason: String },

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        PipelineError::MalformedMetadata {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn mrc(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        PipelineError::Mrc {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn tool(series: &str, stage: Stage, err: ToolError) -> Self {
        PipelineError::ExternalToolFailure {
            series: series.to_string(),
            stage,
            detail: err.to_string(),
        }
    }
}
