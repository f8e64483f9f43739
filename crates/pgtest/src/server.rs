//! Supervision of the `postgres` server process.

use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::{Child, ExitStatus, Stdio};

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::SERVER_TARGET;
use crate::binaries::BinaryPaths;
use crate::identity::ExecutionIdentity;
use crate::layout::ClusterLayout;
use crate::output::{ProcessOutput, StreamCapture};

/// Errors raised while launching the server.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The OS refused to start the server executable.
    #[error("failed to start PostgreSQL '{program}': {source}")]
    Spawn {
        /// Server executable.
        program: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A helper thread for the output streams could not be started.
    #[error("failed to capture server output: {source}")]
    Capture {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Errors raised while stopping the server.
#[derive(Debug, Error)]
pub enum StopError {
    /// Delivering the interrupt signal failed.
    #[error("failed to interrupt server process {pid}: {source}")]
    Interrupt {
        /// Server process id.
        pid: u32,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// Waiting for the server to exit failed.
    #[error("failed to wait for server process {pid}: {source}")]
    Wait {
        /// Server process id.
        pid: u32,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The server exited on its own or stopped with a failure status.
    #[error("server process {pid} exited unexpectedly: {status}")]
    Exited {
        /// Server process id.
        pid: u32,
        /// Status the server exited with.
        status: ExitStatus,
    },
    /// Closing a captured output stream failed.
    #[error("failed to close server output: {source}")]
    OutputCapture {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Non-blocking view of whether the server is still alive.
pub trait ServerLiveness {
    /// Exit status when the server has already exited.
    fn exit_status(&mut self) -> Option<ExitStatus>;
}

/// Builds the fixed server command line followed by `extra` verbatim.
///
/// TCP listening is disabled with an empty `-h`, so the server is reachable
/// only through the unix socket in the layout's socket directory. `-F` turns
/// fsync off.
#[must_use]
pub fn server_args(layout: &ClusterLayout, extra: &[OsString]) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        OsString::from("-D"),
        layout.data_dir().as_os_str().to_owned(),
        OsString::from("-k"),
        layout.socket_dir().as_os_str().to_owned(),
        OsString::from("-h"),
        OsString::new(),
        OsString::from("-F"),
    ];
    args.extend(extra.iter().cloned());
    args
}

/// A launched `postgres` process and its captured output.
#[derive(Debug)]
pub struct ServerProcess {
    child: Child,
    stdout: Option<StreamCapture>,
    stderr: Option<StreamCapture>,
    exited: Option<ExitStatus>,
}

impl ServerProcess {
    /// Starts the server for `layout` as `identity`.
    ///
    /// Returning successfully only means the executable was started; the
    /// server may still be replaying WAL or failing to bind its socket.
    ///
    /// # Errors
    ///
    /// Returns a [`LaunchError`] when the process or its capture threads
    /// cannot be started.
    pub fn launch(
        binaries: &BinaryPaths,
        layout: &ClusterLayout,
        identity: &ExecutionIdentity,
        extra: &[OsString],
    ) -> Result<Self, LaunchError> {
        let program = binaries.postgres();
        let args = server_args(layout, extra);
        info!(
            target: SERVER_TARGET,
            program = %program.display(),
            args = ?args,
            "starting PostgreSQL"
        );
        let mut child = identity
            .command(&program, &args, layout.root())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                program: program.clone(),
                source,
            })?;

        let captures = child
            .stdout
            .take()
            .map(|stream| StreamCapture::spawn("stdout", stream))
            .transpose()
            .and_then(|stdout| {
                let stderr = child
                    .stderr
                    .take()
                    .map(|stream| StreamCapture::spawn("stderr", stream))
                    .transpose()?;
                Ok((stdout, stderr))
            });
        let mut server = Self {
            child,
            stdout: None,
            stderr: None,
            exited: None,
        };
        match captures {
            Ok((stdout, stderr)) => {
                server.stdout = stdout;
                server.stderr = stderr;
            }
            Err(source) => {
                server.abort();
                return Err(LaunchError::Capture { source });
            }
        }
        debug!(
            target: SERVER_TARGET,
            pid = server.pid(),
            "PostgreSQL process started"
        );
        Ok(server)
    }

    /// Operating system process id of the server.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Sends SIGINT, PostgreSQL's fast shutdown request.
    ///
    /// # Errors
    ///
    /// Returns [`StopError::Interrupt`] when the signal cannot be delivered.
    pub fn interrupt(&self) -> Result<(), StopError> {
        let pid = self.pid();
        let raw = i32::try_from(pid).map_err(|_| StopError::Interrupt {
            pid,
            source: Errno::ESRCH,
        })?;
        kill(Pid::from_raw(raw), Signal::SIGINT)
            .map_err(|source| StopError::Interrupt { pid, source })
    }

    /// Blocks until the server exits. There is no timeout.
    ///
    /// # Errors
    ///
    /// Returns [`StopError::Wait`] when the child cannot be reaped.
    pub fn wait(&mut self) -> Result<ExitStatus, StopError> {
        if let Some(status) = self.exited {
            return Ok(status);
        }
        let status = self.child.wait().map_err(|source| StopError::Wait {
            pid: self.child.id(),
            source,
        })?;
        self.exited = Some(status);
        Ok(status)
    }

    /// Interrupts the server, waits for it and closes its output streams.
    ///
    /// When the signal cannot be delivered the wait is skipped, since it
    /// would never return, and the capture threads are detached instead of
    /// joined.
    ///
    /// # Errors
    ///
    /// Returns [`StopError::Exited`] when the server had already exited
    /// before the interrupt or stopped with a failure status, otherwise the
    /// first [`StopError`] encountered.
    pub fn shutdown(mut self) -> Result<ExitStatus, StopError> {
        let crashed = self.exit_status();
        let stopped = crashed.map_or_else(|| self.interrupt().and_then(|()| self.wait()), Ok);
        match stopped {
            Ok(status) => {
                self.close_streams()?;
                if crashed.is_some() || !status.success() {
                    warn!(
                        target: SERVER_TARGET,
                        %status,
                        interrupted = crashed.is_none(),
                        "PostgreSQL exited unexpectedly"
                    );
                    return Err(StopError::Exited {
                        pid: self.pid(),
                        status,
                    });
                }
                info!(
                    target: SERVER_TARGET,
                    %status,
                    "PostgreSQL stopped"
                );
                Ok(status)
            }
            Err(error) => {
                self.detach_streams();
                Err(error)
            }
        }
    }

    /// Best-effort teardown after a failed start, returning whatever the
    /// server printed.
    pub fn abort(mut self) -> ProcessOutput {
        if let Err(error) = self.interrupt_unless_exited() {
            warn!(
                target: SERVER_TARGET,
                error = %error,
                "failed to interrupt server during abort; killing it"
            );
            if let Err(error) = self.child.kill() {
                warn!(
                    target: SERVER_TARGET,
                    error = %error,
                    "failed to kill server during abort"
                );
            }
        }
        if let Err(error) = self.wait() {
            warn!(
                target: SERVER_TARGET,
                error = %error,
                "failed to reap server during abort"
            );
            self.detach_streams();
            return ProcessOutput::default();
        }
        match self.close_streams() {
            Ok(output) => output,
            Err(error) => {
                warn!(
                    target: SERVER_TARGET,
                    error = %error,
                    "failed to collect server output during abort"
                );
                ProcessOutput::default()
            }
        }
    }

    fn interrupt_unless_exited(&mut self) -> Result<(), StopError> {
        if self.exit_status().is_some() {
            return Ok(());
        }
        self.interrupt()
    }

    fn close_streams(&mut self) -> Result<ProcessOutput, StopError> {
        let stdout = finish_capture(self.stdout.take());
        let stderr = finish_capture(self.stderr.take());
        Ok(ProcessOutput::new(stdout?, stderr?))
    }

    fn detach_streams(&mut self) {
        let stdout = self.stdout.take();
        let stderr = self.stderr.take();
        if stdout.is_some() || stderr.is_some() {
            debug!(
                target: SERVER_TARGET,
                pid = self.pid(),
                "detached server output capture"
            );
        }
    }
}

impl ServerLiveness for ServerProcess {
    fn exit_status(&mut self) -> Option<ExitStatus> {
        if self.exited.is_none() {
            match self.child.try_wait() {
                Ok(status) => self.exited = status,
                Err(error) => debug!(
                    target: SERVER_TARGET,
                    error = %error,
                    "failed to poll server status"
                ),
            }
        }
        self.exited
    }
}

fn finish_capture(capture: Option<StreamCapture>) -> Result<Vec<u8>, StopError> {
    capture.map_or_else(
        || Ok(Vec::new()),
        |capture| {
            capture
                .finish()
                .map_err(|source| StopError::OutputCapture { source })
        },
    )
}
