use crate::config::PipelineConfig;
use crate::core::error::{PipelineError, Result};
use crate::core::project::{Project, ProjectLayout};
use crate::core::series::VolumeSet;
use crate::processing::StageContext;
use crate::training::{TrainingConfigBuilder, TrainingDocuments};
use std::fmt;
use std::time::{Duration, Instant};
use tomo_tools::{ExternalTools, ToolRunner};
use tracing::{info, warn};

// ============================================================================
// REPORT
// ============================================================================

#[derive(Debug, Clone)]
pub struct SeriesSummary {
    pub name: String,
    pub tilts: usize,
    /// Sorted ascending.
    pub angles: Vec<f64>,
    pub volumes: Option<VolumeSet>,
}

/// What a finished run produced.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub strategy: &'static str,
    pub layout: ProjectLayout,
    pub series: Vec<SeriesSummary>,
    pub training: Option<TrainingDocuments>,
    pub elapsed: Duration,
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Tomogram Preparation Report ---")?;
        writeln!(f, "• Project:    {}", self.layout.root.display())?;
        writeln!(f, "• Strategy:   {}", self.strategy)?;
        writeln!(f, "• Series:     {}", self.series.len())?;
        for s in &self.series {
            let (first, last) = match (s.angles.first(), s.angles.last()) {
                (Some(a), Some(b)) => (*a, *b),
                _ => (0.0, 0.0),
            };
            writeln!(
                f,
                "    {:<24} {:>3} tilts  [{:+.1}° .. {:+.1}°]",
                s.name, s.tilts, first, last
            )?;
        }
        match &self.training {
            Some(docs) => {
                writeln!(f, "• Training:   {}", docs.subset.join(", "))?;
                writeln!(f, "• Model:      {}", docs.prediction.path.display())?;
                writeln!(f, "• Denoised:   {}", docs.prediction.output.display())?;
            }
            None => writeln!(f, "• Training:   skipped")?,
        }
        write!(f, "• Elapsed:    {:.2?}", self.elapsed)
    }
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

/// Runs discovery, reconstruction and the denoising hand-off for one
/// project, stopping at the first failure.
pub struct ProjectOrchestrator<'a> {
    config: &'a PipelineConfig,
}

impl<'a> ProjectOrchestrator<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    pub fn run(&self, tools: &ExternalTools, runner: &dyn ToolRunner) -> Result<PipelineReport> {
        let start = Instant::now();
        let resolved = self.config.resolved()?;
        let config = &resolved;
        config.validate()?;

        // 1. Discovery
        let mut project = Project::discover(&config.project_dir, config.pixel_size)?;
        let strategy = config.strategy.build();
        info!(strategy = strategy.label(), series = project.series().len(), "starting run");

        // 2. Every input must be present before the first tool runs
        for series in project.series() {
            series.check_frames(|frame| strategy.frame_input(frame))?;
        }
        if let Some(training) = &config.training {
            let available = project.series().len();
            if training.subset_size == 0 || training.subset_size > available {
                return Err(PipelineError::InvalidSubset {
                    requested: training.subset_size,
                    available,
                });
            }
        }
        if project.series().is_empty() {
            warn!(raw = %project.layout.raw.display(), "no metadata files found; nothing to do");
        }

        // 3. Reconstruction
        ProjectLayout::ensure_dirs(&strategy.output_dirs(&project.layout))?;
        let layout = project.layout.clone();
        let ctx = StageContext {
            layout: &layout,
            tools,
            runner,
            pixel_size: config.pixel_size,
            gpu_id: config.gpu_id,
            gain: config.gain_file.as_deref(),
        };
        if !project.series().is_empty() {
            strategy.reconstruct(&ctx, project.series_mut())?;
        }

        // 4. Denoising hand-off
        let training = match &config.training {
            Some(params) => Some(TrainingConfigBuilder::new(params).run(&ctx, project.series())?),
            None => {
                info!("training skipped");
                None
            }
        };

        let series = project
            .series()
            .iter()
            .map(|s| SeriesSummary {
                name: s.name.clone(),
                tilts: s.frames.len(),
                angles: s.tilt_angles(),
                volumes: s.volumes.clone(),
            })
            .collect();

        Ok(PipelineReport {
            strategy: strategy.label(),
            layout,
            series,
            training,
            elapsed: start.elapsed(),
        })
    }
}
