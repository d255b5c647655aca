use std::env;
use std::ffi::{OsStr, OsString};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use wait_timeout::ChildExt;

// ============================================================================
// ERRORS
// ============================================================================

/// Failures to run a program at all. A program that runs and exits non-zero
/// is not an error here; see [`ToolOutput::success`].
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("'{name}' not found in PATH (override with {env_var})")]
    NotFound { name: String, env_var: &'static str },

    #[error("failed to spawn {program:?}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{program:?} timed out after {timeout:?}")]
    TimedOut { program: PathBuf, timeout: Duration },

    #[error("failed while waiting on {program:?}: {source}")]
    Wait {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ============================================================================
// TOOL REGISTRY
// ============================================================================

/// Every external program the pipeline knows how to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    MotionCor2,
    AreTomo,
    AreTomo3,
    CryoCareExtract,
    CryoCareTrain,
    CryoCarePredict,
}

impl Tool {
    pub const ALL: [Tool; 6] = [
        Tool::MotionCor2,
        Tool::AreTomo,
        Tool::AreTomo3,
        Tool::CryoCareExtract,
        Tool::CryoCareTrain,
        Tool::CryoCarePredict,
    ];

    pub fn default_name(self) -> &'static str {
        match self {
            Tool::MotionCor2 => "motioncor2",
            Tool::AreTomo => "aretomo",
            Tool::AreTomo3 => "aretomo3",
            Tool::CryoCareExtract => "cryoCARE_extract_train_data.py",
            Tool::CryoCareTrain => "cryoCARE_train.py",
            Tool::CryoCarePredict => "cryoCARE_predict.py",
        }
    }

    pub fn env_var(self) -> &'static str {
        match self {
            Tool::MotionCor2 => "TOMOPREP_MOTIONCOR2",
            Tool::AreTomo => "TOMOPREP_ARETOMO",
            Tool::AreTomo3 => "TOMOPREP_ARETOMO3",
            Tool::CryoCareExtract => "TOMOPREP_CRYOCARE_EXTRACT",
            Tool::CryoCareTrain => "TOMOPREP_CRYOCARE_TRAIN",
            Tool::CryoCarePredict => "TOMOPREP_CRYOCARE_PREDICT",
        }
    }
}

/// Locations of the external binaries.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalTools {
    pub motioncor2: PathBuf,
    pub aretomo: PathBuf,
    pub aretomo3: PathBuf,
    pub cryocare_extract: PathBuf,
    pub cryocare_train: PathBuf,
    pub cryocare_predict: PathBuf,
}

impl Default for ExternalTools {
    /// Bare program names, resolved by the OS at spawn time.
    fn default() -> Self {
        Self {
            motioncor2: Tool::MotionCor2.default_name().into(),
            aretomo: Tool::AreTomo.default_name().into(),
            aretomo3: Tool::AreTomo3.default_name().into(),
            cryocare_extract: Tool::CryoCareExtract.default_name().into(),
            cryocare_train: Tool::CryoCareTrain.default_name().into(),
            cryocare_predict: Tool::CryoCarePredict.default_name().into(),
        }
    }
}

impl ExternalTools {
    /// Default names with `TOMOPREP_*` environment overrides applied.
    pub fn from_env() -> Self {
        let mut tools = Self::default();
        for tool in Tool::ALL {
            if let Some(value) = env::var_os(tool.env_var()) {
                *tools.path_mut(tool) = PathBuf::from(value);
            }
        }
        tools
    }

    pub fn path(&self, tool: Tool) -> &Path {
        match tool {
            Tool::MotionCor2 => &self.motioncor2,
            Tool::AreTomo => &self.aretomo,
            Tool::AreTomo3 => &self.aretomo3,
            Tool::CryoCareExtract => &self.cryocare_extract,
            Tool::CryoCareTrain => &self.cryocare_train,
            Tool::CryoCarePredict => &self.cryocare_predict,
        }
    }

    fn path_mut(&mut self, tool: Tool) -> &mut PathBuf {
        match tool {
            Tool::MotionCor2 => &mut self.motioncor2,
            Tool::AreTomo => &mut self.aretomo,
            Tool::AreTomo3 => &mut self.aretomo3,
            Tool::CryoCareExtract => &mut self.cryocare_extract,
            Tool::CryoCareTrain => &mut self.cryocare_train,
            Tool::CryoCarePredict => &mut self.cryocare_predict,
        }
    }

    /// Resolves the requested tools to absolute paths, failing on the first
    /// one that cannot be found.
    pub fn locate(mut self, wanted: &[Tool]) -> Result<Self, ToolError> {
        for &tool in wanted {
            let current = self.path(tool).to_path_buf();
            let resolved = which::which(&current).map_err(|_| ToolError::NotFound {
                name: current.display().to_string(),
                env_var: tool.env_var(),
            })?;
            debug!(tool = tool.default_name(), path = %resolved.display(), "located tool");
            *self.path_mut(tool) = resolved;
        }
        Ok(self)
    }
}

// ============================================================================
// INVOCATIONS
// ============================================================================

/// A program plus its argument list, passed to the OS without a shell.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub current_dir: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, value: impl AsRef<OsStr>) -> Self {
        self.args.push(value.as_ref().to_os_string());
        self
    }

    /// Appends `name value`.
    pub fn flag(self, name: &str, value: impl AsRef<OsStr>) -> Self {
        self.arg(name).arg(value)
    }

    /// Appends `name value` only when a value is present.
    pub fn flag_opt<T: AsRef<OsStr>>(self, name: &str, value: Option<T>) -> Self {
        match value {
            Some(v) => self.flag(name, v),
            None => self,
        }
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// First value following `flag`, if the flag is present.
    pub fn value_of(&self, flag: &str) -> Option<&OsStr> {
        self.values_of(flag).first().copied()
    }

    /// Every argument between `flag` and the next `-Flag`.
    pub fn values_of(&self, flag: &str) -> Vec<&OsStr> {
        let Some(start) = self.args.iter().position(|a| a == flag) else {
            return Vec::new();
        };
        self.args[start + 1..]
            .iter()
            .take_while(|a| !is_flag(a))
            .map(OsString::as_os_str)
            .collect()
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.args.iter().any(|a| a == flag)
    }

    /// Human-readable rendering for logs. Not meant to be re-parsed.
    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }
}

// Negative numbers such as "-3.0" are values, not flags.
fn is_flag(arg: &OsStr) -> bool {
    let s = arg.to_string_lossy();
    let body = s.strip_prefix("--").or_else(|| s.strip_prefix('-'));
    body.and_then(|b| b.chars().next())
        .is_some_and(|c| c.is_ascii_alphabetic())
}

// ============================================================================
// EXECUTION
// ============================================================================

/// Exit status and captured output of a finished program.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// The last `lines` lines of stderr, for error messages.
    pub fn stderr_tail(&self, lines: usize) -> String {
        let all: Vec<&str> = self.stderr.lines().collect();
        all[all.len().saturating_sub(lines)..].join("\n")
    }
}

/// Seam between the pipeline and the operating system.
pub trait ToolRunner {
    /// Runs the invocation to completion. Blocks until the program exits.
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput, ToolError>;
}

/// Runs programs as child processes.
///
/// Without a timeout a hung tool blocks the caller indefinitely.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl ToolRunner for ProcessRunner {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput, ToolError> {
        let program = &invocation.program;
        let mut cmd = Command::new(program);
        cmd.args(&invocation.args);
        if let Some(dir) = &invocation.current_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        debug!(command = %invocation.command_line(), "spawning");
        let mut child = cmd.spawn().map_err(|source| ToolError::Spawn {
            program: program.clone(),
            source,
        })?;

        // The child blocks once a pipe buffer fills, so both are drained
        // concurrently with the wait.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let wait_err = |source: std::io::Error| ToolError::Wait {
            program: program.clone(),
            source,
        };

        let status = match self.timeout {
            Some(limit) => match child.wait_timeout(limit).map_err(wait_err)? {
                Some(status) => status,
                None => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ToolError::TimedOut {
                        program: program.clone(),
                        timeout: limit,
                    });
                }
            },
            None => child.wait().map_err(wait_err)?,
        };

        Ok(ToolOutput {
            code: status.code(),
            stdout: collect(stdout),
            stderr: collect(stderr),
        })
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut reader| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = reader.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn collect(handle: Option<JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}
