//! Runs the external board toolchain.
//!
//! Nothing here keeps state between calls: every operation is one process
//! run, and its output is handed back as is.

use std::{ffi::OsString, path::PathBuf, process::Stdio};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{config::ToolchainConfig, error::Error};

/// What a toolchain run produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolchainOutput {
    /// Whether the process exited with status zero.
    pub success: bool,

    /// Captured standard output.
    pub stdout: String,

    /// Captured standard error, or why the process could not run.
    pub stderr: String,

    /// The exit status, `-1` if there was none.
    pub returncode: i32,
}

impl ToolchainOutput {
    fn failed_to_run(reason: String) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: reason,
            returncode: -1,
        }
    }

    /// Stdout on success, stderr otherwise.
    pub fn message(self) -> String {
        if self.success {
            self.stdout
        } else {
            self.stderr
        }
    }
}

/// The configured toolchain.
#[derive(Debug, Clone)]
pub struct Toolchain {
    config: ToolchainConfig,
}

impl Toolchain {
    /// Use the given toolchain configuration.
    pub fn new(config: ToolchainConfig) -> Self {
        Self { config }
    }

    fn path_env(&self) -> Option<OsString> {
        let bin_dir = self.config.bin_dir.as_ref()?;

        let existing = std::env::var_os("PATH").unwrap_or_default();
        let paths = std::iter::once(bin_dir.clone()).chain(std::env::split_paths(&existing));

        match std::env::join_paths(paths) {
            Ok(joined) => Some(joined),
            Err(e) => {
                warn!(%e, ?bin_dir, "Could not prefix PATH, leaving it alone");
                None
            }
        }
    }

    /// Run the toolchain with these arguments.
    ///
    /// Never fails: a toolchain which could not be started is reported
    /// as an unsuccessful run.
    pub async fn run<S: AsRef<str>>(&self, args: &[S]) -> ToolchainOutput {
        let args = args.iter().map(AsRef::as_ref).collect::<Vec<_>>();

        let mut command = tokio::process::Command::new(&self.config.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(path) = self.path_env() {
            command.env("PATH", path);
        }

        if let Some(home) = &self.config.home {
            command.env("HOME", home);
        }

        info!(program = %self.config.program, ?args, "Running toolchain");

        let output = match command.output().await {
            Ok(output) => output,
            Err(e) => {
                warn!(%e, "Toolchain did not start");
                return ToolchainOutput::failed_to_run(format!(
                    "Could not run `{}`: {e}",
                    self.config.program
                ));
            }
        };

        let returncode = output.status.code().unwrap_or(-1);
        let output = ToolchainOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            returncode,
        };

        if output.success {
            debug!("Toolchain done");
        } else {
            warn!(%returncode, stderr = %output.stderr.trim(), "Toolchain failed");
        }

        output
    }

    /// Run a listing command with JSON output and pick out one array from it.
    ///
    /// A missing key gives an empty array.
    pub async fn list<S: AsRef<str>>(&self, args: &[S], key: &str) -> Result<Value, Error> {
        let output = self.run(args).await;

        if !output.success {
            return Err(Error::Toolchain(output.stderr));
        }

        pick(&output.stdout, key)
    }

    /// Compile the code for the given board.
    pub async fn compile(&self, code: &str, board: &str) -> Result<ToolchainOutput, Error> {
        let sketch = Sketch::create(code).await?;
        let dir = sketch.dir_string();
        let output = self.run(&["compile", "--fqbn", board, dir.as_str()]).await;
        sketch.remove().await;

        Ok(output)
    }

    /// Compile and upload the code to the board at the given port.
    pub async fn upload(
        &self,
        code: &str,
        board: &str,
        port: &str,
    ) -> Result<ToolchainOutput, Error> {
        let sketch = Sketch::create(code).await?;
        let dir = sketch.dir_string();
        let output = self
            .run(&["upload", "--fqbn", board, "--port", port, dir.as_str()])
            .await;
        sketch.remove().await;

        Ok(output)
    }
}

fn pick(stdout: &str, key: &str) -> Result<Value, Error> {
    let mut parsed: Value = serde_json::from_str(stdout)
        .map_err(|e| Error::Toolchain(format!("Could not parse toolchain output: {e}")))?;

    Ok(match parsed.get_mut(key) {
        Some(Value::Null) | None => Value::Array(vec![]),
        Some(value) => value.take(),
    })
}

/// A throwaway sketch directory.
///
/// The toolchain wants the sketch file named after its directory.
struct Sketch {
    dir: PathBuf,
}

impl Sketch {
    async fn create(code: &str) -> Result<Self, Error> {
        let name = format!("sketch_{}", Uuid::new_v4().simple());
        let dir = std::env::temp_dir().join(&name);

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::Storage(format!("Could not create {dir:?}: {e}")))?;

        let file = dir.join(format!("{name}.ino"));
        if let Err(e) = tokio::fs::write(&file, code).await {
            Self { dir }.remove().await;
            return Err(Error::Storage(format!("Could not write {file:?}: {e}")));
        }

        debug!(?dir, "Sketch created");
        Ok(Self { dir })
    }

    fn dir_string(&self) -> String {
        self.dir.to_string_lossy().into_owned()
    }

    async fn remove(self) {
        if let Err(e) = tokio::fs::remove_dir_all(&self.dir).await {
            warn!(%e, dir = ?self.dir, "Could not remove sketch");
        }
    }
}
