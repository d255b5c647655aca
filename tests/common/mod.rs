#![allow(dead_code)]

use nalgebra::DMatrix;
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use tomo_prepper::{IntegratedParams, MrcFile, PipelineConfig, StrategyConfig, TwoStageParams};
use tomo_tools::{Invocation, Tool, ToolError, ToolOutput, ToolRunner};

pub const PIXEL_SIZE: f64 = 2.7;

// ============================================================================
// FIXTURES
// ============================================================================

/// A single 4x6 image filled with `value`.
pub fn write_image(path: &Path, value: f32) {
    MrcFile::new(vec![DMatrix::from_element(4, 6, value)], 1.0)
        .write(path)
        .expect("write image");
}

/// A small volume with a gradient along X, so it has non-zero variance.
pub fn write_volume(path: &Path, sections: usize) {
    let data = (0..sections)
        .map(|z| DMatrix::from_fn(4, 6, |_, x| (x + z) as f32 * 3.0))
        .collect();
    MrcFile::new(data, 10.0).write(path).expect("write volume");
}

/// The movie name a fixture gives frame `index` of `series`.
pub fn frame_name(series: &str, index: usize, angle: f64) -> String {
    format!("{series}_{index:03}_{angle:.1}.tif")
}

/// SerialEM-style metadata text with Windows frame paths.
pub fn mdoc_text(series: &str, angles: &[f64]) -> String {
    let mut text = format!("PixelSpacing = {PIXEL_SIZE}\nImageFile = {series}.mrc\nImageSize = 6 4\n\n");
    for (i, angle) in angles.iter().enumerate() {
        text.push_str(&format!(
            "[ZValue = {i}]\nTiltAngle = {angle:.2}\nExposureDose = 3.0\nSubFramePath = X:\\session\\frames\\{}\n\n",
            frame_name(series, i, *angle)
        ));
    }
    text
}

/// Lays out `raw/<series>.mrc.mdoc` plus one movie per tilt. Each movie is
/// a constant image whose value is its tilt angle, so stack order can be
/// read back from pixel data.
pub fn write_project(root: &Path, series: &[(&str, &[f64])]) {
    let raw = root.join("raw");
    fs::create_dir_all(&raw).expect("raw dir");
    for (name, angles) in series {
        fs::write(raw.join(format!("{name}.mrc.mdoc")), mdoc_text(name, angles)).expect("mdoc");
        for (i, angle) in angles.iter().enumerate() {
            write_image(&raw.join(frame_name(name, i, *angle)), *angle as f32);
        }
    }
}

pub fn two_stage_params() -> TwoStageParams {
    TwoStageParams {
        tilt_axis: Some(-85.4),
        binning: 4,
        half_binning: 8,
        vol_z: 1600,
        align_z: 1000,
        tilt_cor: 1,
        tilt_cor_angle: None,
    }
}

pub fn integrated_params() -> IntegratedParams {
    IntegratedParams {
        kv: 300.0,
        cs: 2.7,
        fm_dose: 0.25,
        defect_file: None,
        tilt_axis: None,
        align_z: 1000,
        vol_z: 1600,
        binning: 8,
        out_imod: 0,
    }
}

pub fn two_stage_config(root: &Path) -> PipelineConfig {
    PipelineConfig::new(root, PIXEL_SIZE, StrategyConfig::TwoStage(two_stage_params()))
}

pub fn integrated_config(root: &Path) -> PipelineConfig {
    PipelineConfig::new(root, PIXEL_SIZE, StrategyConfig::Integrated(integrated_params()))
}

/// Pixel value of the top-left corner of every section.
pub fn corner_values(path: &Path) -> Vec<f32> {
    let file = MrcFile::read(path).expect("read mrc");
    file.sections.iter().map(|s| s[(0, 0)]).collect()
}

// ============================================================================
// SCRIPTED RUNNER
// ============================================================================

/// Stands in for the external programs: records each invocation and writes
/// the files the real tool would leave behind.
#[derive(Default)]
pub struct ScriptedRunner {
    calls: RefCell<Vec<Invocation>>,
    fail_on: Option<Tool>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call to `tool` exits 1.
    pub fn failing(tool: Tool) -> Self {
        Self {
            calls: RefCell::new(Vec::new()),
            fail_on: Some(tool),
        }
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.borrow().clone()
    }

    pub fn calls_to(&self, tool: Tool) -> Vec<Invocation> {
        self.calls()
            .into_iter()
            .filter(|inv| tool_of(inv) == Some(tool))
            .collect()
    }

    /// Program names in call order.
    pub fn programs(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|inv| inv.program.display().to_string())
            .collect()
    }
}

fn tool_of(inv: &Invocation) -> Option<Tool> {
    let name = inv.program.file_name()?.to_str()?;
    Tool::ALL.into_iter().find(|t| t.default_name() == name)
}

fn path_of(inv: &Invocation, flag: &str) -> PathBuf {
    PathBuf::from(inv.value_of(flag).unwrap_or_else(|| panic!("{flag} missing")))
}

fn ok() -> Result<ToolOutput, ToolError> {
    Ok(ToolOutput { code: Some(0), ..ToolOutput::default() })
}

fn failed(message: &str) -> Result<ToolOutput, ToolError> {
    Ok(ToolOutput {
        code: Some(1),
        stdout: String::new(),
        stderr: format!("starting\n{message}\n"),
    })
}

impl ToolRunner for ScriptedRunner {
    fn run(&self, inv: &Invocation) -> Result<ToolOutput, ToolError> {
        self.calls.borrow_mut().push(inv.clone());
        let tool = tool_of(inv);
        if tool.is_some() && tool == self.fail_on {
            return failed("CUDA error: out of memory");
        }

        match tool {
            Some(Tool::MotionCor2) => {
                let input = ["-InTiff", "-InMrc", "-InEer"]
                    .iter()
                    .find_map(|f| inv.value_of(f))
                    .map(PathBuf::from)
                    .expect("input flag");
                let out = path_of(inv, "-OutMrc");
                let stem = out.file_stem().unwrap().to_string_lossy().into_owned();
                for target in [
                    out.clone(),
                    out.with_file_name(format!("{stem}_EVN.mrc")),
                    out.with_file_name(format!("{stem}_ODD.mrc")),
                ] {
                    fs::copy(&input, &target).expect("fake correction");
                }
                ok()
            }
            Some(Tool::AreTomo) => {
                let stack = path_of(inv, "-InMrc");
                let out = path_of(inv, "-OutMrc");
                let out_dir = out.parent().unwrap().to_path_buf();
                match inv.value_of("-AlnFile") {
                    Some(aln) if !Path::new(aln).is_file() => return failed("cannot read alignment"),
                    Some(_) => {}
                    None => {
                        let mut name = stack.file_name().unwrap().to_os_string();
                        name.push(".aln");
                        fs::write(out_dir.join(name), "# AreTomo alignment\n").expect("aln");
                    }
                }
                fs::copy(&stack, &out).expect("fake reconstruction");
                let stem = out.file_stem().unwrap().to_string_lossy().into_owned();
                write_volume(&out_dir.join(format!("{stem}_projXZ.mrc")), 1);
                ok()
            }
            Some(Tool::AreTomo3) => {
                let root = inv.current_dir.clone().expect("working directory");
                let out = root.join(inv.value_of("-OutDir").expect("-OutDir"));
                fs::create_dir_all(&out).expect("output dir");
                for entry in fs::read_dir(root.join("raw")).expect("raw") {
                    let path = entry.expect("entry").path();
                    if path.extension().is_some_and(|e| e == "mdoc") {
                        let stem = path.file_stem().unwrap().to_string_lossy().into_owned();
                        for suffix in ["_Vol", "_EVN_Vol", "_ODD_Vol"] {
                            write_volume(&out.join(format!("{stem}{suffix}.mrc")), 3);
                        }
                        fs::write(out.join(format!("{stem}.aln")), "# alignment\n").expect("aln");
                    }
                }
                ok()
            }
            Some(Tool::CryoCareTrain) => {
                let conf = path_of(inv, "--conf");
                let doc: serde_json::Value =
                    serde_json::from_str(&fs::read_to_string(conf).expect("conf")).expect("json");
                let dir = PathBuf::from(doc["path"].as_str().expect("path"));
                let model = doc["model_name"].as_str().expect("model_name");
                fs::create_dir_all(&dir).expect("model dir");
                fs::write(dir.join(format!("{model}.tar.gz")), b"model").expect("model");
                ok()
            }
            Some(Tool::CryoCareExtract) | Some(Tool::CryoCarePredict) => ok(),
            None => failed("unknown program"),
        }
    }
}
