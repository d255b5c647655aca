// ============================================================================
// MODULE DECLARATIONS
// ============================================================================
pub mod config;
pub mod core;
pub mod io;
pub mod math;
pub mod pipeline;
pub mod processing;
pub mod training;

// ============================================================================
// RE-EXPORTS (Public API)
// ============================================================================
pub use crate::config::{PipelineConfig, StrategyConfig};
pub use crate::core::error::{PipelineError, Result, Stage};
pub use crate::core::project::{Project, ProjectLayout};
pub use crate::core::series::{Frame, StackSet, TiltSeries, VolumeKind, VolumeSet};
pub use crate::io::mrc::MrcFile;
pub use crate::pipeline::{PipelineReport, ProjectOrchestrator};
pub use crate::processing::integrated::{IntegratedParams, IntegratedStrategy};
pub use crate::processing::stacking::StackAssembler;
pub use crate::processing::two_stage::{TwoStageParams, TwoStageStrategy};
pub use crate::processing::ReconstructionStrategy;
pub use crate::training::{TrainingConfigBuilder, TrainingParams};

use tomo_tools::{ExternalTools, ToolRunner};

// ============================================================================
// HIGH-LEVEL INTERFACE
// ============================================================================

/// The master pipeline function: raw tilts in, normalised full/even/odd
/// volumes and (optionally) a trained denoiser out.
pub fn run_pipeline(
    config: &PipelineConfig,
    tools: &ExternalTools,
    runner: &dyn ToolRunner,
) -> Result<PipelineReport> {
    ProjectOrchestrator::new(config).run(tools, runner)
}
