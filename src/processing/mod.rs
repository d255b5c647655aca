pub mod correction;
pub mod integrated;
pub mod normalise;
pub mod stacking;
pub mod two_stage;

use crate::core::error::{PipelineError, Result, Stage};
use crate::core::project::ProjectLayout;
use crate::core::series::{Frame, TiltSeries};
use std::path::{Path, PathBuf};
use tomo_tools::{ExternalTools, Invocation, Tool, ToolOutput, ToolRunner};
use tracing::{debug, info};

/// Everything a stage needs besides the series it works on.
pub struct StageContext<'a> {
    pub layout: &'a ProjectLayout,
    pub tools: &'a ExternalTools,
    pub runner: &'a dyn ToolRunner,
    /// Å/pixel.
    pub pixel_size: f64,
    pub gpu_id: u32,
    pub gain: Option<&'a Path>,
}

/// Turns discovered tilt series into full/even/odd volumes under the
/// canonical `tomograms/` layout.
pub trait ReconstructionStrategy {
    fn label(&self) -> &'static str;

    /// Programs that must be available before the run starts.
    fn required_tools(&self) -> &'static [Tool];

    /// Output directories created before any series is processed.
    fn output_dirs(&self, layout: &ProjectLayout) -> Vec<PathBuf>;

    /// The file a frame is read from by this strategy.
    fn frame_input(&self, frame: &Frame) -> PathBuf;

    /// Processes every series, in order, leaving `volumes` set on each.
    fn reconstruct(&self, ctx: &StageContext<'_>, series: &mut [TiltSeries]) -> Result<()>;
}

/// Runs one external program and turns a spawn failure or non-zero exit
/// into [`PipelineError::ExternalToolFailure`].
pub(crate) fn run_checked(
    ctx: &StageContext<'_>,
    invocation: &Invocation,
    series: &str,
    stage: Stage,
) -> Result<ToolOutput> {
    info!(series, %stage, program = %invocation.program.display(), "running");
    debug!(command = %invocation.command_line());

    let output = ctx
        .runner
        .run(invocation)
        .map_err(|e| PipelineError::tool(series, stage, e))?;

    if !output.stdout.is_empty() {
        debug!(series, %stage, stdout = %output.stdout);
    }
    if !output.success() {
        let status = output
            .code
            .map(|c| format!("exit code {}", c))
            .unwrap_or_else(|| "termination by signal".to_string());
        let tail = output.stderr_tail(20);
        let detail = if tail.is_empty() {
            status
        } else {
            format!("{}\n{}", status, tail)
        };
        return Err(PipelineError::ExternalToolFailure {
            series: series.to_string(),
            stage,
            detail,
        });
    }
    Ok(output)
}

/// A tool that exits cleanly but leaves a declared output missing has failed.
pub(crate) fn expect_output(path: &Path, series: &str, stage: Stage) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(PipelineError::ExternalToolFailure {
            series: series.to_string(),
            stage,
            detail: format!("expected output {:?} was not written", path),
        })
    }
}
