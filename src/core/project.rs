use crate::core::error::{PipelineError, Result};
use crate::core::series::{KindPaths, StackSet, TiltSeries, VolumeKind};
use glob::{glob, Pattern};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const RAW_DIR: &str = "raw";
pub const STACKS_DIR: &str = "stacks";
pub const TOMOGRAMS_DIR: &str = "tomograms";
pub const INTEGRATED_OUTPUT_DIR: &str = "AreTomo3Output";

// ============================================================================
// LAYOUT
// ============================================================================

/// Canonical directory and file names under a project root.
///
/// ```text
/// project/
/// +- raw/                 .mdoc + movies (input)
/// +- stacks/              <name>.st, <name>_even.st, <name>_odd.st, <name>.rawtlt
/// +- AreTomo3Output/      integrated-mode tool output
/// +- tomograms/
/// |  +- full/ even/ odd/  <name>.mrc
/// |  +- denoised/
/// |  +- cryocare_model/
/// +- train_data_config.json, train_config.json, predict_config.json
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectLayout {
    pub root: PathBuf,
    pub raw: PathBuf,
    pub stacks: PathBuf,
    pub integrated_output: PathBuf,
    pub tomograms: PathBuf,
    pub volume_dirs: KindPaths,
    pub denoised: PathBuf,
    pub model_dir: PathBuf,
    pub train_data_config: PathBuf,
    pub train_config: PathBuf,
    pub predict_config: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let tomograms = root.join(TOMOGRAMS_DIR);
        Self {
            raw: root.join(RAW_DIR),
            stacks: root.join(STACKS_DIR),
            integrated_output: root.join(INTEGRATED_OUTPUT_DIR),
            volume_dirs: KindPaths {
                full: tomograms.join("full"),
                even: tomograms.join("even"),
                odd: tomograms.join("odd"),
            },
            denoised: tomograms.join("denoised"),
            model_dir: tomograms.join("cryocare_model"),
            train_data_config: root.join("train_data_config.json"),
            train_config: root.join("train_config.json"),
            predict_config: root.join("predict_config.json"),
            tomograms,
            root,
        }
    }

    pub fn volume_dir(&self, kind: VolumeKind) -> &Path {
        self.volume_dirs.get(kind)
    }

    /// `tomograms/<kind>/<name>.mrc`
    pub fn volume_path(&self, kind: VolumeKind, name: &str) -> PathBuf {
        self.volume_dir(kind).join(format!("{name}.mrc"))
    }

    pub fn volume_paths(&self, name: &str) -> KindPaths {
        KindPaths {
            full: self.volume_path(VolumeKind::Full, name),
            even: self.volume_path(VolumeKind::Even, name),
            odd: self.volume_path(VolumeKind::Odd, name),
        }
    }

    pub fn stack_set(&self, name: &str) -> StackSet {
        StackSet {
            stacks: KindPaths {
                full: self.stacks.join(format!("{name}.st")),
                even: self.stacks.join(format!("{name}_even.st")),
                odd: self.stacks.join(format!("{name}_odd.st")),
            },
            angle_file: self.stacks.join(format!("{name}.rawtlt")),
        }
    }

    /// Creates each directory (and parents) if absent.
    pub fn ensure_dirs<P: AsRef<Path>>(dirs: &[P]) -> Result<()> {
        for dir in dirs {
            let dir = dir.as_ref();
            fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;
        }
        Ok(())
    }
}

// ============================================================================
// PROJECT
// ============================================================================

/// A project root and the tilt series found in its `raw/` directory.
///
/// The series set is fixed at discovery; stages only mutate series in place.
#[derive(Debug)]
pub struct Project {
    pub layout: ProjectLayout,
    /// Physical pixel size in Å/pixel.
    pub pixel_size: f64,
    series: Vec<TiltSeries>,
}

impl Project {
    /// Reads every `raw/*.mdoc`, in file-name order.
    pub fn discover(root: impl Into<PathBuf>, pixel_size: f64) -> Result<Self> {
        let layout = ProjectLayout::new(root);
        if !layout.raw.is_dir() {
            return Err(PipelineError::MissingRawDirectory(layout.raw.clone()));
        }

        let raw_str = layout.raw.to_str().ok_or_else(|| {
            PipelineError::InvalidConfig(format!("raw directory path is not UTF-8: {:?}", layout.raw))
        })?;
        let pattern = format!("{}/*.mdoc", Pattern::escape(raw_str));
        let entries = glob(&pattern).map_err(|e| {
            PipelineError::io(&layout.raw, std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
        })?;

        let mut series = Vec::new();
        let mut seen = HashSet::new();
        for entry in entries {
            let path = entry.map_err(|e| {
                let path = e.path().to_path_buf();
                PipelineError::io(path, e.into_error())
            })?;
            if !path.is_file() {
                continue;
            }
            let ts = TiltSeries::from_metadata(&path)?;
            if !seen.insert(ts.name.clone()) {
                return Err(PipelineError::malformed(
                    &path,
                    format!("series name '{}' already used by another metadata file", ts.name),
                ));
            }
            debug!(series = %ts.name, frames = ts.frames.len(), "discovered tilt series");
            series.push(ts);
        }

        info!(root = %layout.root.display(), count = series.len(), "project discovered");
        Ok(Self {
            layout,
            pixel_size,
            series,
        })
    }

    pub fn series(&self) -> &[TiltSeries] {
        &self.series
    }

    pub fn series_mut(&mut self) -> &mut [TiltSeries] {
        &mut self.series
    }
}
