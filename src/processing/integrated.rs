use crate::core::error::{PipelineError, Result, Stage};
use crate::core::project::{ProjectLayout, INTEGRATED_OUTPUT_DIR, RAW_DIR};
use crate::core::series::{Frame, KindPaths, TiltSeries, VolumeKind, VolumeSet};
use crate::processing::{expect_output, run_checked, ReconstructionStrategy, StageContext};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tomo_tools::{IntegratedRun, Tool};
use tracing::{debug, info};

/// Acquisition and reconstruction settings for the AreTomo3 route.
#[derive(Debug, Clone, PartialEq)]
pub struct IntegratedParams {
    /// Accelerating voltage in kV.
    pub kv: f64,
    /// Spherical aberration in mm.
    pub cs: f64,
    /// Dose per movie frame in e/Å².
    pub fm_dose: f64,
    pub defect_file: Option<PathBuf>,
    pub tilt_axis: Option<f64>,
    pub align_z: u32,
    pub vol_z: u32,
    pub binning: u32,
    pub out_imod: u32,
}

/// One AreTomo3 run over the whole `raw/` directory, followed by relinking
/// its per-series output into the canonical volume directories.
pub struct IntegratedStrategy {
    pub params: IntegratedParams,
}

impl IntegratedStrategy {
    pub fn new(params: IntegratedParams) -> Self {
        Self { params }
    }

    /// Where AreTomo3 leaves each volume kind for a series.
    pub fn tool_outputs(layout: &ProjectLayout, series: &TiltSeries) -> (KindPaths, PathBuf) {
        let stem = series.metadata_stem();
        let out = &layout.integrated_output;
        let volumes = KindPaths {
            full: out.join(format!("{stem}_Vol.mrc")),
            even: out.join(format!("{stem}_EVN_Vol.mrc")),
            odd: out.join(format!("{stem}_ODD_Vol.mrc")),
        };
        (volumes, out.join(format!("{stem}.aln")))
    }

    fn relink(&self, layout: &ProjectLayout, series: &mut TiltSeries) -> Result<()> {
        let stage = Stage::IntegratedReconstruction;
        let (produced, alignment) = Self::tool_outputs(layout, series);
        expect_output(&alignment, &series.name, stage)?;

        let canonical = layout.volume_paths(&series.name);
        for kind in VolumeKind::ALL {
            let source = produced.get(kind);
            expect_output(source, &series.name, stage)?;
            link_volume(source, canonical.get(kind))?;
        }
        debug!(series = %series.name, "relinked integrated output");

        series.volumes = Some(VolumeSet {
            volumes: canonical,
            alignment,
        });
        Ok(())
    }
}

impl ReconstructionStrategy for IntegratedStrategy {
    fn label(&self) -> &'static str {
        "integrated"
    }

    fn required_tools(&self) -> &'static [Tool] {
        &[Tool::AreTomo3]
    }

    fn output_dirs(&self, layout: &ProjectLayout) -> Vec<PathBuf> {
        let KindPaths { full, even, odd } = layout.volume_dirs.clone();
        vec![layout.integrated_output.clone(), full, even, odd]
    }

    /// AreTomo3 reads the movies itself, as named in the metadata.
    fn frame_input(&self, frame: &Frame) -> PathBuf {
        frame.raw.clone()
    }

    fn reconstruct(&self, ctx: &StageContext<'_>, series: &mut [TiltSeries]) -> Result<()> {
        let p = &self.params;
        let raw_prefix = format!("{RAW_DIR}/");
        let invocation = IntegratedRun {
            project_root: &ctx.layout.root,
            raw_prefix: &raw_prefix,
            output_dir: INTEGRATED_OUTPUT_DIR,
            pixel_size: ctx.pixel_size,
            kv: p.kv,
            cs: p.cs,
            fm_dose: p.fm_dose,
            gpu_id: ctx.gpu_id,
            gain: ctx.gain,
            defect: p.defect_file.as_deref(),
            tilt_axis: p.tilt_axis,
            align_z: p.align_z,
            vol_z: p.vol_z,
            binning: p.binning,
            out_imod: p.out_imod,
        }
        .invocation(ctx.tools);

        info!(count = series.len(), "reconstructing all series in one run");
        run_checked(ctx, &invocation, "all series", Stage::IntegratedReconstruction)?;

        for ts in series.iter_mut() {
            self.relink(ctx.layout, ts)?;
        }
        Ok(())
    }
}

// ============================================================================
// LINKING
// ============================================================================

/// Points `link` at `target`, replacing whatever was there from a prior run.
/// Unix gets a relative symlink; other hosts get a copy.
pub fn link_volume(target: &Path, link: &Path) -> Result<()> {
    if fs::symlink_metadata(link).is_ok() {
        fs::remove_file(link).map_err(|e| PipelineError::io(link, e))?;
    }

    #[cfg(unix)]
    {
        let from = link.parent().unwrap_or_else(|| Path::new(""));
        let relative = relative_path(from, target);
        std::os::unix::fs::symlink(&relative, link).map_err(|e| PipelineError::io(link, e))?;
    }
    #[cfg(not(unix))]
    {
        fs::copy(target, link).map_err(|e| PipelineError::io(link, e))?;
    }
    Ok(())
}

/// Path to `target` as seen from directory `from`. Both must be expressed
/// against the same base (both absolute, or both relative to one directory).
pub fn relative_path(from: &Path, target: &Path) -> PathBuf {
    let from: Vec<Component> = from.components().filter(|c| *c != Component::CurDir).collect();
    let to: Vec<Component> = target.components().filter(|c| *c != Component::CurDir).collect();

    let shared = from.iter().zip(&to).take_while(|(a, b)| a == b).count();

    let mut rel = PathBuf::new();
    for _ in shared..from.len() {
        rel.push("..");
    }
    for part in &to[shared..] {
        rel.push(part.as_os_str());
    }
    rel
}
