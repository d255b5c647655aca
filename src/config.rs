use crate::core::error::{PipelineError, Result};
use crate::processing::integrated::{IntegratedParams, IntegratedStrategy};
use crate::processing::two_stage::{TwoStageParams, TwoStageStrategy};
use crate::processing::ReconstructionStrategy;
use crate::training::TrainingParams;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which reconstruction route to take, with its settings.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyConfig {
    TwoStage(TwoStageParams),
    Integrated(IntegratedParams),
}

impl StrategyConfig {
    pub fn build(&self) -> Box<dyn ReconstructionStrategy> {
        match self {
            StrategyConfig::TwoStage(p) => Box::new(TwoStageStrategy::new(p.clone())),
            StrategyConfig::Integrated(p) => Box::new(IntegratedStrategy::new(p.clone())),
        }
    }
}

/// Everything one run needs. Built fresh per invocation and never mutated,
/// so nothing carries over between runs.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub project_dir: PathBuf,
    /// Å/pixel.
    pub pixel_size: f64,
    pub gpu_id: u32,
    pub gain_file: Option<PathBuf>,
    pub strategy: StrategyConfig,
    /// `None` stops after reconstruction.
    pub training: Option<TrainingParams>,
    /// Per external invocation; unbounded when absent.
    pub tool_timeout: Option<Duration>,
}

impl PipelineConfig {
    pub fn new(project_dir: impl Into<PathBuf>, pixel_size: f64, strategy: StrategyConfig) -> Self {
        Self {
            project_dir: project_dir.into(),
            pixel_size,
            gpu_id: 0,
            gain_file: None,
            strategy,
            training: None,
            tool_timeout: None,
        }
    }

    /// Checks what can be checked before any tool runs: a positive pixel
    /// size and that the optional reference files exist.
    pub fn validate(&self) -> Result<()> {
        if !(self.pixel_size.is_finite() && self.pixel_size > 0.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "pixel size must be positive, got {}",
                self.pixel_size
            )));
        }

        require_file(self.gain_file.as_deref())?;
        if let StrategyConfig::Integrated(p) = &self.strategy {
            require_file(p.defect_file.as_deref())?;
        }
        Ok(())
    }

    /// A copy with the gain and defect references made absolute against the
    /// current directory. Tools may run from the project root, so a relative
    /// reference would otherwise resolve somewhere else.
    pub fn resolved(&self) -> Result<Self> {
        let mut config = self.clone();
        config.gain_file = absolute_opt(config.gain_file.take())?;
        if let StrategyConfig::Integrated(p) = &mut config.strategy {
            p.defect_file = absolute_opt(p.defect_file.take())?;
        }
        Ok(config)
    }
}

fn absolute_opt(path: Option<PathBuf>) -> Result<Option<PathBuf>> {
    path.map(|p| std::path::absolute(&p).map_err(|e| PipelineError::io(p, e)))
        .transpose()
}

fn require_file(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) if !p.is_file() => Err(PipelineError::MissingInput(p.to_path_buf())),
        _ => Ok(()),
    }
}
