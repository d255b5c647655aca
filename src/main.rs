use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use tomo_prepper::{
    run_pipeline, IntegratedParams, PipelineConfig, StrategyConfig, TrainingParams,
    TwoStageParams,
};
use tomo_tools::{ExternalTools, ProcessRunner, Tool};

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Raw tilts to normalised full/even/odd tomograms and a cryoCARE denoiser"
)]
struct Cli {
    /// Debug-level logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Errors only.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// MotionCor2 per tilt, stack assembly, then AreTomo on full/even/odd stacks.
    TwoStage {
        #[command(flatten)]
        common: CommonArgs,

        /// Output binning of the even/odd reconstructions.
        #[arg(long, default_value_t = 8)]
        half_binning: u32,

        /// AreTomo -TiltCor mode (-1, 0, 1).
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        tilt_cor: i32,

        /// Optional angle passed along with -TiltCor.
        #[arg(long, allow_hyphen_values = true)]
        tilt_cor_angle: Option<f64>,

        #[command(flatten)]
        training: TrainingArgs,
    },

    /// One AreTomo3 run over raw/, then relink its volumes into tomograms/.
    Integrated {
        #[command(flatten)]
        common: CommonArgs,

        /// Accelerating voltage in kV.
        #[arg(long = "kv", default_value_t = 300.0)]
        kv: f64,

        /// Spherical aberration in mm.
        #[arg(long)]
        cs: f64,

        /// Per-frame dose in e/Å².
        #[arg(long)]
        fm_dose: f64,

        #[arg(long)]
        defect_file: Option<PathBuf>,

        /// AreTomo3 -OutImod level; 0 writes no IMOD files.
        #[arg(long, default_value_t = 0)]
        out_imod: u32,

        #[command(flatten)]
        training: TrainingArgs,
    },
}

#[derive(Args)]
struct CommonArgs {
    /// Project root containing raw/.
    #[arg(long, default_value = "./")]
    project_dir: PathBuf,

    /// Å/pixel written into every stack.
    #[arg(long)]
    pixel_size: f64,

    #[arg(long)]
    gain_file: Option<PathBuf>,

    /// Degrees; estimated by the tool when omitted.
    #[arg(long, allow_hyphen_values = true)]
    tilt_axis: Option<f64>,

    /// Tomogram binning.
    #[arg(long, default_value_t = 8)]
    binning: u32,

    /// Reconstruction thickness before binning, in voxels.
    #[arg(long)]
    vol_z: u32,

    /// Thickness used for alignment, before binning, in voxels.
    #[arg(long)]
    align_z: u32,

    #[arg(long, default_value_t = 0)]
    gpu_id: u32,

    /// Kill any external tool that runs longer than this.
    #[arg(long)]
    tool_timeout_secs: Option<u64>,
}

#[derive(Args)]
struct TrainingArgs {
    /// Number of tomograms handed to cryoCARE for training.
    #[arg(long, default_value_t = 5)]
    training_size: usize,

    /// e.g. arctica_er_microsomes
    #[arg(long, required_unless_present = "skip_training")]
    model_name: Option<String>,

    #[arg(long)]
    epochs: Option<u32>,

    #[arg(long)]
    steps_per_epoch: Option<u32>,

    #[arg(long)]
    batch_size: Option<u32>,

    #[arg(long)]
    learning_rate: Option<f64>,

    /// Fixes the training subset draw.
    #[arg(long)]
    seed: Option<u64>,

    /// Stop after reconstruction.
    #[arg(long)]
    skip_training: bool,
}

impl TrainingArgs {
    fn into_params(self) -> Option<TrainingParams> {
        if self.skip_training {
            return None;
        }
        let mut params = TrainingParams::new(self.model_name?, self.training_size);
        params.seed = self.seed;
        if let Some(v) = self.epochs {
            params.epochs = v;
        }
        if let Some(v) = self.steps_per_epoch {
            params.steps_per_epoch = v;
        }
        if let Some(v) = self.batch_size {
            params.batch_size = v;
        }
        if let Some(v) = self.learning_rate {
            params.learning_rate = v;
        }
        Some(params)
    }
}

fn init_tracing(quiet: bool, verbose: bool) -> Result<()> {
    let level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };

    let filter = tracing_subscriber::EnvFilter::try_from_env("TOMOPREP_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}

fn build_config(command: Commands) -> PipelineConfig {
    let (common, strategy, training) = match command {
        Commands::TwoStage { common, half_binning, tilt_cor, tilt_cor_angle, training } => {
            let params = TwoStageParams {
                tilt_axis: common.tilt_axis,
                binning: common.binning,
                half_binning,
                vol_z: common.vol_z,
                align_z: common.align_z,
                tilt_cor,
                tilt_cor_angle,
            };
            (common, StrategyConfig::TwoStage(params), training)
        }
        Commands::Integrated { common, kv, cs, fm_dose, defect_file, out_imod, training } => {
            let params = IntegratedParams {
                kv,
                cs,
                fm_dose,
                defect_file,
                tilt_axis: common.tilt_axis,
                align_z: common.align_z,
                vol_z: common.vol_z,
                binning: common.binning,
                out_imod,
            };
            (common, StrategyConfig::Integrated(params), training)
        }
    };

    let mut config = PipelineConfig::new(common.project_dir, common.pixel_size, strategy);
    config.gpu_id = common.gpu_id;
    config.gain_file = common.gain_file;
    config.training = training.into_params();
    config.tool_timeout = common.tool_timeout_secs.map(Duration::from_secs);
    config
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose)?;

    let config = build_config(cli.command);

    // 1. Resolve every program this run needs before touching any data
    let mut wanted: Vec<Tool> = config.strategy.build().required_tools().to_vec();
    if config.training.is_some() {
        wanted.extend([Tool::CryoCareExtract, Tool::CryoCareTrain, Tool::CryoCarePredict]);
    }
    let tools = ExternalTools::from_env()
        .locate(&wanted)
        .context("external tools are not available")?;

    // 2. Run
    let runner = ProcessRunner::new(config.tool_timeout);
    let report = run_pipeline(&config, &tools, &runner)
        .with_context(|| format!("pipeline failed for {}", config.project_dir.display()))?;

    println!("{}", report);
    Ok(())
}
