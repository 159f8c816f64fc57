//! Game server child process.
//!
//! The bridge owns the server: it spawns it with piped stdin/stdout, reads
//! the event log from stdout and writes console commands to stdin.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use futures::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{info, warn};

use crate::bridge::relay::GameSink;
use crate::common::error::{BridgeError, BridgeResult};
use crate::config::types::ServerConfig;
use crate::game::codec::ConsoleCodec;

pub struct GameProcess {
    child: Child,
    grace: Duration,
}

impl GameProcess {
    /// Start the server. stderr stays attached to the operator's terminal.
    pub fn spawn(config: &ServerConfig) -> io::Result<(Self, ChildStdin, ChildStdout)> {
        let mut cmd = Command::new(&config.executable);
        cmd.args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        if let Some(cwd) = &config.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "game stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "game stdout not captured"))?;

        let process = Self {
            child,
            grace: Duration::from_secs(config.shutdown_grace_secs),
        };
        info!(
            "Started game server '{}' (pid {})",
            config.executable,
            process.id().map_or_else(|| "?".to_string(), |id| id.to_string())
        );
        Ok((process, stdin, stdout))
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the server to exit on its own.
    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Ask the server to stop, killing it if it is still running after the grace period.
    pub async fn terminate(&mut self) -> io::Result<ExitStatus> {
        if let Some(status) = self.child.try_wait()? {
            return Ok(status);
        }

        self.request_stop()?;
        match tokio::time::timeout(self.grace, self.child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                warn!(
                    "Game server did not exit within {}s, killing it",
                    self.grace.as_secs()
                );
                self.child.kill().await?;
                self.child.wait().await
            }
        }
    }

    #[cfg(unix)]
    fn request_stop(&mut self) -> io::Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.id() else {
            return Ok(());
        };
        info!("Sending SIGTERM to game server (pid {})", pid);
        kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(io::Error::from)
    }

    #[cfg(not(unix))]
    fn request_stop(&mut self) -> io::Result<()> {
        self.child.start_kill()
    }
}

/// Frame the server's stdout into lines.
pub fn console_lines<R: AsyncRead>(stdout: R) -> FramedRead<R, ConsoleCodec> {
    FramedRead::new(stdout, ConsoleCodec::new())
}

/// Serialized writer for the server's stdin.
///
/// The inbound relay and operator passthrough share it, so each command is
/// written whole.
pub struct ProcessStdin<W> {
    writer: Mutex<FramedWrite<W, ConsoleCodec>>,
}

impl<W: AsyncWrite + Unpin> ProcessStdin<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(FramedWrite::new(writer, ConsoleCodec::new())),
        }
    }
}

#[async_trait]
impl<W> GameSink for ProcessStdin<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send_to_process(&self, text: &str) -> BridgeResult<()> {
        let mut writer = self.writer.lock().await;
        writer
            .send(text.to_string())
            .await
            .map_err(BridgeError::Process)
    }
}
