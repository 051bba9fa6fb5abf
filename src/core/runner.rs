use std::path::Path;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tracing::debug;

use super::error::RunError;
use crate::config::ToolchainConfig;

/// Placeholder in toolchain arguments replaced by the generated script path.
pub const SCRIPT_PLACEHOLDER: &str = "{script}";

/// Launches the external toolchain for one job.
pub struct ProcessRunner<'a> {
    shell: &'a Path,
    toolchain: &'a ToolchainConfig,
}

impl<'a> ProcessRunner<'a> {
    pub fn new(shell: &'a Path, toolchain: &'a ToolchainConfig) -> Self {
        Self { shell, toolchain }
    }

    /// The toolchain environment must be sourceable before anything is spawned.
    pub fn check_precondition(&self) -> Result<(), RunError> {
        if self.toolchain.settings.exists() {
            Ok(())
        } else {
            Err(RunError::MissingSettings(self.toolchain.settings.clone()))
        }
    }

    /// Shell command line that sources the settings and execs the toolchain
    /// with stderr folded into stdout.
    pub fn command_line(&self, script: &Path) -> String {
        let script = script.to_string_lossy();
        let mut words = vec![shell_quote(&self.toolchain.executable)];
        words.extend(
            self.toolchain
                .args
                .iter()
                .map(|arg| shell_quote(&arg.replace(SCRIPT_PLACEHOLDER, &script))),
        );

        format!(
            "exec 2>&1; . {} && exec {}",
            shell_quote(&self.toolchain.settings.to_string_lossy()),
            words.join(" ")
        )
    }

    pub fn spawn(&self, script: &Path) -> Result<RunningProcess, RunError> {
        self.check_precondition()?;

        let command_line = self.command_line(script);
        debug!(shell = %self.shell.display(), command = %command_line, "Spawning toolchain");

        let mut child = Command::new(self.shell)
            .arg("-c")
            .arg(&command_line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RunError::Spawn {
                shell: self.shell.to_path_buf(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or(RunError::NoStdout)?;

        Ok(RunningProcess {
            child,
            reader: BufReader::new(stdout),
            buffer: Vec::new(),
        })
    }
}

/// A spawned toolchain whose combined output is read line by line.
pub struct RunningProcess {
    child: Child,
    reader: BufReader<ChildStdout>,
    buffer: Vec<u8>,
}

impl RunningProcess {
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Next output line without its terminator, or `None` at end of output.
    ///
    /// A trailing line without a newline is still returned once.
    pub async fn next_line(&mut self) -> Result<Option<String>, RunError> {
        self.buffer.clear();
        let n = self
            .reader
            .read_until(b'\n', &mut self.buffer)
            .await
            .map_err(RunError::Read)?;

        if n == 0 {
            return Ok(None);
        }

        if self.buffer.last() == Some(&b'\n') {
            self.buffer.pop();
            if self.buffer.last() == Some(&b'\r') {
                self.buffer.pop();
            }
        }

        Ok(Some(String::from_utf8_lossy(&self.buffer).into_owned()))
    }

    pub async fn wait(mut self) -> Result<ExitStatus, RunError> {
        self.child.wait().await.map_err(RunError::Wait)
    }
}

/// Single-quote a word for `sh -c`.
fn shell_quote(word: &str) -> String {
    format!("'{}'", word.replace('\'', r"'\''"))
}
