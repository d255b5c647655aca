//! Spawning and argument construction for the external programs the
//! tomography pipeline delegates to: MotionCor2, AreTomo, AreTomo3 and the
//! cryoCARE scripts.

pub mod commands;
pub mod tools;

pub use commands::{
    AlignAndReconstruct, DenoiseStep, FrameFormat, IntegratedRun, MotionCorrection,
    ReconstructWithAlignment,
};
pub use tools::{ExternalTools, Invocation, ProcessRunner, Tool, ToolError, ToolOutput, ToolRunner};
