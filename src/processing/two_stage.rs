use crate::core::error::{Result, Stage};
use crate::core::project::ProjectLayout;
use crate::core::series::{Frame, KindPaths, TiltSeries, VolumeKind, VolumeSet};
use crate::processing::correction::FrameCorrector;
use crate::processing::normalise::normalise_volume;
use crate::processing::stacking::StackAssembler;
use crate::processing::{expect_output, run_checked, ReconstructionStrategy, StageContext};
use std::path::{Path, PathBuf};
use tomo_tools::{AlignAndReconstruct, ReconstructWithAlignment, Tool};
use tracing::info;

/// Reconstruction settings for the MotionCor2 + AreTomo route.
#[derive(Debug, Clone, PartialEq)]
pub struct TwoStageParams {
    /// Degrees; AreTomo estimates it when absent.
    pub tilt_axis: Option<f64>,
    /// Output binning of the full pass.
    pub binning: u32,
    /// Output binning of the even/odd passes.
    pub half_binning: u32,
    pub vol_z: u32,
    pub align_z: u32,
    pub tilt_cor: i32,
    pub tilt_cor_angle: Option<f64>,
}

/// Per-frame correction, stack assembly, then one aligning AreTomo pass on
/// the full stack and two passes on the half stacks that reuse its
/// alignment.
pub struct TwoStageStrategy {
    pub params: TwoStageParams,
}

impl TwoStageStrategy {
    pub fn new(params: TwoStageParams) -> Self {
        Self { params }
    }

    fn process(&self, ctx: &StageContext<'_>, series: &mut TiltSeries) -> Result<()> {
        info!(series = %series.name, frames = series.frames.len(), "processing tilt series");

        // 1. Correct every frame
        FrameCorrector::correct_series(ctx, series)?;

        // 2. Sort and stack
        let stacks = StackAssembler::new(ctx.pixel_size).assemble(ctx.layout, series)?;

        // 3. Full pass estimates the alignment
        let volumes = ctx.layout.volume_paths(&series.name);
        let alignment = alignment_path(ctx.layout.volume_dir(VolumeKind::Full), &stacks.stacks.full);
        let stage = Stage::Reconstruction(VolumeKind::Full);
        let full = AlignAndReconstruct {
            stack: &stacks.stacks.full,
            angle_file: &stacks.angle_file,
            output: &volumes.full,
            vol_z: self.params.vol_z,
            align_z: self.params.align_z,
            binning: self.params.binning,
            tilt_cor: self.params.tilt_cor,
            tilt_cor_angle: self.params.tilt_cor_angle,
            tilt_axis: self.params.tilt_axis,
            gpu_id: ctx.gpu_id,
        }
        .invocation(ctx.tools);
        run_checked(ctx, &full, &series.name, stage)?;
        expect_output(&volumes.full, &series.name, stage)?;
        expect_output(&alignment, &series.name, stage)?;

        // 4. Half passes reuse it read-only
        for kind in [VolumeKind::Even, VolumeKind::Odd] {
            let stage = Stage::Reconstruction(kind);
            let half = ReconstructWithAlignment {
                stack: stacks.stacks.get(kind),
                output: volumes.get(kind),
                alignment: &alignment,
                vol_z: self.params.vol_z,
                binning: self.params.half_binning,
                gpu_id: ctx.gpu_id,
            }
            .invocation(ctx.tools);
            run_checked(ctx, &half, &series.name, stage)?;
            expect_output(volumes.get(kind), &series.name, stage)?;
        }

        // 5. Unit standard deviation, only once all three exist
        for kind in VolumeKind::ALL {
            normalise_volume(volumes.get(kind))?;
        }

        series.volumes = Some(VolumeSet { volumes, alignment });
        Ok(())
    }
}

/// AreTomo names its alignment after the input stack, next to the output
/// volume: `<full_dir>/<name>.st.aln`.
fn alignment_path(full_dir: &Path, stack: &Path) -> PathBuf {
    let mut name = stack.file_name().unwrap_or_default().to_os_string();
    name.push(".aln");
    full_dir.join(name)
}

impl ReconstructionStrategy for TwoStageStrategy {
    fn label(&self) -> &'static str {
        "two-stage"
    }

    fn required_tools(&self) -> &'static [Tool] {
        &[Tool::MotionCor2, Tool::AreTomo]
    }

    fn output_dirs(&self, layout: &ProjectLayout) -> Vec<PathBuf> {
        let KindPaths { full, even, odd } = layout.volume_dirs.clone();
        vec![layout.stacks.clone(), full, even, odd]
    }

    fn frame_input(&self, frame: &Frame) -> PathBuf {
        frame.correction_input()
    }

    fn reconstruct(&self, ctx: &StageContext<'_>, series: &mut [TiltSeries]) -> Result<()> {
        for ts in series.iter_mut() {
            self.process(ctx, ts)?;
        }
        Ok(())
    }
}
