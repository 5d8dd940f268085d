use std::{process::Stdio, time::Duration};

use futures::StreamExt;
use tokio::{
    io::AsyncWriteExt,
    process::{Child, ChildStdin, ChildStdout, Command},
};
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

use crate::{
    config::MonitorCommand,
    error::Error,
    frame::Frame,
    transport::{codecs::lines::LinesCodec, error::TransportError},
};

/// How long a monitor process gets to exit on its own before being killed.
const TERMINATE_GRACE: Duration = Duration::from_millis(500);

/// An external process which talks to the device,
/// and whose standard output is read line by line.
pub(crate) struct SpawnedProcess {
    target: String,
    child: Child,
    lines: FramedRead<ChildStdout, LinesCodec>,
}

/// The standard input of a [`SpawnedProcess`].
pub(crate) struct ProcessInput {
    target: String,

    // `None` if the process does not take input.
    stdin: Option<ChildStdin>,
}

impl SpawnedProcess {
    pub(crate) fn open(
        command: &MonitorCommand,
        port: &str,
        baud: u32,
    ) -> Result<(Self, ProcessInput), Error> {
        let args = command.render_args(port, baud);
        info!(program = %command.program, ?args, "Spawning monitor process");

        let stdin = if command.forward_input {
            Stdio::piped()
        } else {
            Stdio::null()
        };

        let mut child = Command::new(&command.program)
            .args(&args)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::transport_open(port, e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::transport_open(port, "stdout was not captured"))?;

        let input = ProcessInput {
            target: port.to_owned(),
            stdin: child.stdin.take(),
        };

        let process = Self {
            target: port.to_owned(),
            child,
            lines: FramedRead::new(stdout, LinesCodec::default()),
        };

        Ok((process, input))
    }

    /// Waits for the next complete line.
    pub(crate) async fn poll(&mut self) -> Result<Option<Frame>, TransportError> {
        match self.lines.next().await {
            Some(Ok(line)) => Ok(Some(Frame::new_lossy(line))),
            Some(Err(e)) => Err(e),
            None => {
                let status = self.child.try_wait()?.and_then(|status| status.code());
                Err(TransportError::ProcessExited(status))
            }
        }
    }

    /// Stop the process.
    /// The [`ProcessInput`] should be dropped first, closing stdin is enough
    /// for well behaved monitors.
    pub(crate) async fn close(mut self) {
        debug!(target = %self.target, "Stopping monitor process");

        terminate(&mut self.child);

        match tokio::time::timeout(TERMINATE_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => debug!(%status, "Monitor process exited"),
            Ok(Err(e)) => warn!(?e, "Could not wait for monitor process"),
            Err(_) => {
                warn!("Monitor process did not exit in time, killing it");
                if let Err(e) = self.child.kill().await {
                    warn!(?e, "Could not kill monitor process");
                }
            }
        }
    }
}

impl ProcessInput {
    pub(crate) async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        match self.stdin.as_mut() {
            Some(stdin) => {
                stdin.write_all(bytes).await?;
                stdin.flush().await?;
            }
            None => {
                debug!(
                    "Monitor process for {} takes no input, dropping {} byte(s)",
                    self.target,
                    bytes.len()
                );
            }
        }

        Ok(())
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    use nix::{
        sys::signal::{kill, Signal},
        unistd::Pid,
    };

    // Already reaped if there is no id.
    let Some(pid) = child.id() else { return };

    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        debug!(?e, "Could not signal monitor process");
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!(?e, "Could not signal monitor process");
    }
}
