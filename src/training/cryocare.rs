use crate::core::error::{PipelineError, Result, Stage};
use crate::core::project::ProjectLayout;
use crate::core::series::TiltSeries;
use crate::processing::{expect_output, run_checked, StageContext};
use crate::training::subset::choose_subset;
use glob::{glob, Pattern};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tomo_tools::DenoiseStep;
use tracing::{debug, info};

/// cryoCARE parses this flag as a string.
const OVERWRITE: &str = "True";

/// Label used when a denoising tool fails; these steps span every series.
const DENOISE_SCOPE: &str = "denoising";

// ============================================================================
// PARAMETERS
// ============================================================================

/// Subset size, model name and every tunable that ends up in the three
/// cryoCARE documents. Built once per run; never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingParams {
    pub model_name: String,
    pub subset_size: usize,
    pub seed: Option<u64>,

    // extraction
    pub patch_shape: [u32; 3],
    pub num_slices: u32,
    pub split: f64,
    pub tilt_axis: String,
    pub n_normalization_samples: u32,

    // training
    pub epochs: u32,
    pub steps_per_epoch: u32,
    pub batch_size: u32,
    pub unet_kern_size: u32,
    pub unet_n_depth: u32,
    pub unet_n_first: u32,
    pub learning_rate: f64,

    // prediction
    pub n_tiles: [u32; 3],
}

impl TrainingParams {
    pub fn new(model_name: impl Into<String>, subset_size: usize) -> Self {
        Self {
            model_name: model_name.into(),
            subset_size,
            seed: None,
            patch_shape: [72, 72, 72],
            num_slices: 1200,
            split: 0.9,
            tilt_axis: "Y".to_string(),
            n_normalization_samples: 500,
            epochs: 100,
            steps_per_epoch: 200,
            batch_size: 16,
            unet_kern_size: 3,
            unet_n_depth: 3,
            unet_n_first: 16,
            learning_rate: 0.0004,
            n_tiles: [2, 4, 2],
        }
    }
}

// ============================================================================
// DOCUMENTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionDocument {
    pub even: Vec<PathBuf>,
    pub odd: Vec<PathBuf>,
    pub patch_shape: [u32; 3],
    pub num_slices: u32,
    pub split: f64,
    pub tilt_axis: String,
    pub n_normalization_samples: u32,
    pub path: PathBuf,
    pub overwrite: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingDocument {
    pub train_data: PathBuf,
    pub epochs: u32,
    pub steps_per_epoch: u32,
    pub batch_size: u32,
    pub unet_kern_size: u32,
    pub unet_n_depth: u32,
    pub unet_n_first: u32,
    pub learning_rate: f64,
    pub model_name: String,
    pub path: PathBuf,
    pub overwrite: &'static str,
    pub gpu_id: u32,
}

/// Prediction runs over whole directories, not just the training subset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionDocument {
    /// The trained model archive.
    pub path: PathBuf,
    pub even: PathBuf,
    pub odd: PathBuf,
    pub n_tiles: [u32; 3],
    pub output: PathBuf,
    pub overwrite: &'static str,
    pub gpu_id: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingDocuments {
    /// Names of the series drawn for training.
    pub subset: Vec<String>,
    pub extraction: ExtractionDocument,
    pub training: TrainingDocument,
    pub prediction: PredictionDocument,
}

// ============================================================================
// BUILDER
// ============================================================================

pub struct TrainingConfigBuilder<'a> {
    params: &'a TrainingParams,
}

impl<'a> TrainingConfigBuilder<'a> {
    pub fn new(params: &'a TrainingParams) -> Self {
        Self { params }
    }

    /// `<model_dir>/<model_name>.tar.gz`
    pub fn model_archive(&self, layout: &ProjectLayout) -> PathBuf {
        layout.model_dir.join(format!("{}.tar.gz", self.params.model_name))
    }

    /// Draws the training subset and fills in all three documents.
    pub fn documents(
        &self,
        layout: &ProjectLayout,
        series: &[TiltSeries],
        gpu_id: u32,
    ) -> Result<TrainingDocuments> {
        let p = self.params;
        let chosen = choose_subset(series.len(), p.subset_size, p.seed)?;

        let mut names = Vec::with_capacity(chosen.len());
        let mut even = Vec::with_capacity(chosen.len());
        let mut odd = Vec::with_capacity(chosen.len());
        for i in chosen {
            let volumes = layout.volume_paths(&series[i].name);
            names.push(series[i].name.clone());
            even.push(volumes.even);
            odd.push(volumes.odd);
        }

        let extraction = ExtractionDocument {
            even,
            odd,
            patch_shape: p.patch_shape,
            num_slices: p.num_slices,
            split: p.split,
            tilt_axis: p.tilt_axis.clone(),
            n_normalization_samples: p.n_normalization_samples,
            path: layout.model_dir.clone(),
            overwrite: OVERWRITE,
        };
        let training = TrainingDocument {
            train_data: layout.model_dir.clone(),
            epochs: p.epochs,
            steps_per_epoch: p.steps_per_epoch,
            batch_size: p.batch_size,
            unet_kern_size: p.unet_kern_size,
            unet_n_depth: p.unet_n_depth,
            unet_n_first: p.unet_n_first,
            learning_rate: p.learning_rate,
            model_name: p.model_name.clone(),
            path: layout.model_dir.clone(),
            overwrite: OVERWRITE,
            gpu_id,
        };
        let prediction = PredictionDocument {
            path: self.model_archive(layout),
            even: layout.volume_dirs.even.clone(),
            odd: layout.volume_dirs.odd.clone(),
            n_tiles: p.n_tiles,
            output: layout.denoised.clone(),
            overwrite: OVERWRITE,
            gpu_id,
        };

        Ok(TrainingDocuments {
            subset: names,
            extraction,
            training,
            prediction,
        })
    }

    /// Writes the three documents to their fixed paths in the project root.
    pub fn write(&self, layout: &ProjectLayout, docs: &TrainingDocuments) -> Result<()> {
        write_document(&layout.train_data_config, &docs.extraction)?;
        write_document(&layout.train_config, &docs.training)?;
        write_document(&layout.predict_config, &docs.prediction)?;
        Ok(())
    }

    /// Moves each series' `<name>_projX*` files out of the even/odd
    /// directories into a `proj/` subdirectory so prediction only sees
    /// volumes. A file that is itself some series' volume is never moved.
    pub fn stash_projections(layout: &ProjectLayout, series: &[TiltSeries]) -> Result<usize> {
        let volumes: HashSet<String> = series.iter().map(|s| format!("{}.mrc", s.name)).collect();
        let mut moved = 0;
        for dir in [&layout.volume_dirs.even, &layout.volume_dirs.odd] {
            let dir_str = dir.to_str().ok_or_else(|| {
                PipelineError::InvalidConfig(format!("volume directory path is not UTF-8: {:?}", dir))
            })?;
            let proj = dir.join("proj");

            for ts in series {
                let pattern = format!(
                    "{}/{}_projX*",
                    Pattern::escape(dir_str),
                    Pattern::escape(&ts.name)
                );
                let entries = glob(&pattern).map_err(|e| {
                    PipelineError::io(dir, io::Error::new(io::ErrorKind::InvalidInput, e))
                })?;

                for entry in entries {
                    let path = entry.map_err(|e| {
                        let path = e.path().to_path_buf();
                        PipelineError::io(path, e.into_error())
                    })?;
                    let Some(file_name) = path.file_name() else { continue };
                    if !path.is_file() || volumes.contains(&*file_name.to_string_lossy()) {
                        continue;
                    }
                    fs::create_dir_all(&proj).map_err(|e| PipelineError::io(&proj, e))?;
                    let dest = proj.join(file_name);
                    fs::rename(&path, &dest).map_err(|e| PipelineError::io(&path, e))?;
                    debug!(from = %path.display(), to = %dest.display(), "moved projection");
                    moved += 1;
                }
            }
        }
        Ok(moved)
    }

    /// Full denoising hand-off: tidy the volume directories, write the
    /// documents, then run extraction, training and prediction in order.
    pub fn run(&self, ctx: &StageContext<'_>, series: &[TiltSeries]) -> Result<TrainingDocuments> {
        let layout = ctx.layout;
        ProjectLayout::ensure_dirs(&[&layout.model_dir, &layout.denoised])?;

        let moved = Self::stash_projections(layout, series)?;
        if moved > 0 {
            info!(count = moved, "moved projection files aside");
        }

        let docs = self.documents(layout, series, ctx.gpu_id)?;
        info!(subset = ?docs.subset, model = %self.params.model_name, "training subset chosen");
        self.write(layout, &docs)?;

        for step in DenoiseStep::SEQUENCE {
            let (stage, config) = match step {
                DenoiseStep::ExtractTrainData => (Stage::ExtractTrainData, &layout.train_data_config),
                DenoiseStep::Train => (Stage::Train, &layout.train_config),
                DenoiseStep::Predict => (Stage::Predict, &layout.predict_config),
            };
            let invocation = step.invocation(ctx.tools, config);
            run_checked(ctx, &invocation, DENOISE_SCOPE, stage)?;

            if step == DenoiseStep::Train {
                expect_output(&self.model_archive(layout), DENOISE_SCOPE, stage)?;
            }
        }
        Ok(docs)
    }
}

fn write_document<T: Serialize>(path: &Path, doc: &T) -> Result<()> {
    let config_err = |source: io::Error| PipelineError::ConfigWrite {
        path: path.to_path_buf(),
        source,
    };
    let json = serde_json::to_string_pretty(doc).map_err(|e| config_err(io::Error::from(e)))?;
    fs::write(path, json + "\n").map_err(config_err)?;
    debug!(path = %path.display(), "wrote config document");
    Ok(())
}
