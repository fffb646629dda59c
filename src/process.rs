use std::ffi::{OsStr, OsString};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, StageError};

/// How long a `--version` probe may take before the tool is considered broken.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Captured output of a finished external process.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// A single blocking invocation of an external tool.
///
/// Output streams are fully captured and the child is killed if the
/// invocation is abandoned, so no process outlives the call on any path.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<OsString>,
    path_prefix: Option<PathBuf>,
    timeout: Duration,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            path_prefix: None,
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Prepend a directory to the child's PATH. The parent environment is untouched.
    pub fn path_prefix(mut self, dir: impl Into<PathBuf>) -> Self {
        self.path_prefix = Some(dir.into());
        self
    }

    pub fn arg_list(&self) -> &[OsString] {
        &self.args
    }

    fn label(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    fn build(&self) -> Result<Command> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref prefix) = self.path_prefix {
            let mut paths = vec![prefix.clone()];
            if let Some(existing) = std::env::var_os("PATH") {
                paths.extend(std::env::split_paths(&existing));
            }
            let joined = std::env::join_paths(paths).map_err(|e| {
                StageError::Config(format!("Invalid PATH entry {}: {e}", prefix.display()))
            })?;
            cmd.env("PATH", joined);
        }

        Ok(cmd)
    }

    /// Run to completion. Non-zero exit becomes `NonZeroExit` carrying stderr.
    pub async fn run(&self) -> Result<ToolOutput> {
        let label = self.label();
        debug!("Running {} {:?}", self.program.display(), self.args);

        let child = self.build()?.spawn().map_err(|e| spawn_error(&label, e))?;

        // Dropping the future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(StageError::Timeout {
                    tool: label,
                    after: self.timeout,
                })
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(StageError::NonZeroExit {
                tool: label,
                code: output.status.code(),
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(ToolOutput { stdout, stderr })
    }
}

fn spawn_error(label: &str, err: std::io::Error) -> StageError {
    if err.kind() == ErrorKind::NotFound {
        StageError::ExternalToolNotFound(label.to_string())
    } else {
        StageError::Io(err)
    }
}

/// Check that a tool can be launched at all.
///
/// Only a failure to spawn counts; tools disagree on their version flag, so
/// the exit status of the probe is ignored.
pub async fn probe_tool(program: &Path) -> Result<()> {
    let probe = ToolCommand::new(program, PROBE_TIMEOUT).arg("--version");
    match probe.run().await {
        Ok(_) | Err(StageError::NonZeroExit { .. }) => {
            debug!("{} is available", program.display());
            Ok(())
        }
        Err(e) => Err(e),
    }
}
