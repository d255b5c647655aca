use crate::tools::{ExternalTools, Invocation};
use std::path::Path;

/// Raw movie container accepted by MotionCor2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    Tiff,
    Mrc,
    Eer,
}

impl FrameFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "tif" | "tiff" => Some(FrameFormat::Tiff),
            "mrc" | "mrcs" => Some(FrameFormat::Mrc),
            "eer" => Some(FrameFormat::Eer),
            _ => None,
        }
    }

    fn input_flag(self) -> &'static str {
        match self {
            FrameFormat::Tiff => "-InTiff",
            FrameFormat::Mrc => "-InMrc",
            FrameFormat::Eer => "-InEer",
        }
    }
}

// ============================================================================
// MOTION CORRECTION
// ============================================================================

/// One MotionCor2 run over a single tilt movie, with even/odd split sums.
///
/// Callers are expected to reject movies [`FrameFormat::from_path`] does
/// not recognise; anything else is handed over as TIFF.
#[derive(Debug, Clone)]
pub struct MotionCorrection<'a> {
    pub input: &'a Path,
    pub output: &'a Path,
    pub gain: Option<&'a Path>,
    pub gpu_id: u32,
}

impl MotionCorrection<'_> {
    pub fn invocation(&self, tools: &ExternalTools) -> Invocation {
        let format = FrameFormat::from_path(self.input).unwrap_or(FrameFormat::Tiff);
        Invocation::new(&tools.motioncor2)
            .flag(format.input_flag(), self.input)
            .flag("-OutMrc", self.output)
            .flag("-Gpu", self.gpu_id.to_string())
            .flag("-SplitSum", "1")
            .flag_opt("-Gain", self.gain)
    }
}

// ============================================================================
// TWO-STAGE RECONSTRUCTION (AreTomo)
// ============================================================================

/// Full-stack AreTomo pass: estimates the alignment and reconstructs.
#[derive(Debug, Clone)]
pub struct AlignAndReconstruct<'a> {
    pub stack: &'a Path,
    pub angle_file: &'a Path,
    pub output: &'a Path,
    pub vol_z: u32,
    pub align_z: u32,
    pub binning: u32,
    pub tilt_cor: i32,
    pub tilt_cor_angle: Option<f64>,
    pub tilt_axis: Option<f64>,
    pub gpu_id: u32,
}

impl AlignAndReconstruct<'_> {
    pub fn invocation(&self, tools: &ExternalTools) -> Invocation {
        let mut inv = Invocation::new(&tools.aretomo)
            .flag("-InMrc", self.stack)
            .flag("-AngFile", self.angle_file)
            .flag("-OutMrc", self.output)
            .flag("-VolZ", self.vol_z.to_string())
            .flag("-AlignZ", self.align_z.to_string())
            .flag("-OutBin", self.binning.to_string())
            .flag("-DarkTol", "0.01")
            .flag("-FlipVol", "1")
            .flag("-Wbp", "1")
            .flag("-TiltCor", self.tilt_cor.to_string());
        // -TiltCor takes an optional second value
        if let Some(angle) = self.tilt_cor_angle {
            inv = inv.arg(angle.to_string());
        }
        inv.flag("-Gpu", self.gpu_id.to_string())
            .flag_opt("-TiltAxis", self.tilt_axis.map(|a| a.to_string()))
    }
}

/// Half-set AreTomo pass reusing an existing alignment file.
#[derive(Debug, Clone)]
pub struct ReconstructWithAlignment<'a> {
    pub stack: &'a Path,
    pub output: &'a Path,
    pub alignment: &'a Path,
    pub vol_z: u32,
    pub binning: u32,
    pub gpu_id: u32,
}

impl ReconstructWithAlignment<'_> {
    pub fn invocation(&self, tools: &ExternalTools) -> Invocation {
        Invocation::new(&tools.aretomo)
            .flag("-InMrc", self.stack)
            .flag("-OutMrc", self.output)
            .flag("-VolZ", self.vol_z.to_string())
            .flag("-OutBin", self.binning.to_string())
            .flag("-FlipVol", "1")
            .flag("-Wbp", "1")
            .flag("-AlnFile", self.alignment)
            .flag("-Gpu", self.gpu_id.to_string())
    }
}

// ============================================================================
// INTEGRATED RECONSTRUCTION (AreTomo3)
// ============================================================================

/// A single AreTomo3 run over every `.mdoc` in the raw directory.
///
/// Relative `raw_prefix` and `output_dir` are resolved against
/// `project_root`, which becomes the working directory of the child.
#[derive(Debug, Clone)]
pub struct IntegratedRun<'a> {
    pub project_root: &'a Path,
    pub raw_prefix: &'a str,
    pub output_dir: &'a str,
    pub pixel_size: f64,
    pub kv: f64,
    pub cs: f64,
    pub fm_dose: f64,
    pub gpu_id: u32,
    pub gain: Option<&'a Path>,
    pub defect: Option<&'a Path>,
    pub tilt_axis: Option<f64>,
    pub align_z: u32,
    pub vol_z: u32,
    pub binning: u32,
    pub out_imod: u32,
}

impl IntegratedRun<'_> {
    pub fn invocation(&self, tools: &ExternalTools) -> Invocation {
        Invocation::new(&tools.aretomo3)
            .in_dir(self.project_root)
            .flag("-InPrefix", self.raw_prefix)
            .flag("-InSuffix", ".mdoc")
            .flag("-OutDir", self.output_dir)
            .flag("-PixSize", self.pixel_size.to_string())
            .flag("-kV", self.kv.to_string())
            .flag("-Cs", self.cs.to_string())
            .flag("-FmDose", self.fm_dose.to_string())
            .flag("-Cmd", "0")
            .flag("-Gpu", self.gpu_id.to_string())
            .flag_opt("-DefectFile", self.defect)
            .flag_opt("-Gain", self.gain)
            .flag("-InFmMotion", "1")
            .flag_opt("-TiltAxis", self.tilt_axis.map(|a| a.to_string()))
            .flag("-AlignZ", self.align_z.to_string())
            .flag("-VolZ", self.vol_z.to_string())
            .flag("-AtBin", self.binning.to_string())
            .flag("-FlipVol", "1")
            .flag("-Wbp", "1")
            .flag("-OutImod", self.out_imod.to_string())
    }
}

// ============================================================================
// DENOISING (cryoCARE)
// ============================================================================

/// The three cryoCARE scripts, each driven by a JSON config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenoiseStep {
    ExtractTrainData,
    Train,
    Predict,
}

impl DenoiseStep {
    pub const SEQUENCE: [DenoiseStep; 3] = [
        DenoiseStep::ExtractTrainData,
        DenoiseStep::Train,
        DenoiseStep::Predict,
    ];

    pub fn invocation(self, tools: &ExternalTools, config: &Path) -> Invocation {
        let program = match self {
            DenoiseStep::ExtractTrainData => &tools.cryocare_extract,
            DenoiseStep::Train => &tools.cryocare_train,
            DenoiseStep::Predict => &tools.cryocare_predict,
        };
        Invocation::new(program).flag("--conf", config)
    }
}
