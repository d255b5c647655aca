use crate::core::error::{PipelineError, Result, Stage};
use crate::core::series::{CorrectedSums, TiltSeries, VolumeKind};
use crate::processing::{expect_output, run_checked, StageContext};
use tomo_tools::{FrameFormat, MotionCorrection};

/// Drives MotionCor2 over every frame of a series.
///
/// The correction itself happens in the external tool; this only builds
/// each invocation and records where the three sums land.
pub struct FrameCorrector;

impl FrameCorrector {
    pub fn correct_series(ctx: &StageContext<'_>, series: &mut TiltSeries) -> Result<()> {
        let name = series.name.clone();
        let stage = Stage::MotionCorrection;

        for frame in &series.frames {
            let input = frame.correction_input();
            if FrameFormat::from_path(&input).is_none() {
                return Err(PipelineError::InvalidConfig(format!(
                    "unsupported movie format for MotionCor2: {:?}",
                    input
                )));
            }
        }

        for frame in series.frames.iter_mut() {
            let input = frame.correction_input();
            if !input.is_file() {
                return Err(PipelineError::MissingInput(input));
            }

            let sums = CorrectedSums::for_movie(&input);
            let invocation = MotionCorrection {
                input: &input,
                output: sums.get(VolumeKind::Full),
                gain: ctx.gain,
                gpu_id: ctx.gpu_id,
            }
            .invocation(ctx.tools);
            run_checked(ctx, &invocation, &name, stage)?;

            for kind in VolumeKind::ALL {
                expect_output(sums.get(kind), &name, stage)?;
            }
            frame.corrected = Some(sums);
        }
        Ok(())
    }
}
