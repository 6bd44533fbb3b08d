//! Engine subprocess lifecycle and pipe I/O.
//!
//! Each job owns exactly one engine subprocess, spawned once against its
//! compiled script and kept alive across many events. The process handle
//! and its three standard streams are bundled into [`EngineProcess`] at
//! spawn time and never re-derived.
//!
//! There is no graceful per-job stop: a job terminates only through the
//! router's fail-stop path or full-application shutdown. Pipe writes have
//! no timeout - a hung engine blocks the event handler, which keeps event
//! handling observably synchronous.

use crate::config::EngineConfig;
use crate::error::{Result, RouterError};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

/// Bound on post-mortem output draining; the failed process has usually
/// exited and closed its pipes, but a half-dead engine must not wedge the
/// teardown path.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// A spawned engine subprocess with its pipe trio.
pub struct EngineProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    stderr: BufReader<ChildStderr>,
}

impl std::fmt::Debug for EngineProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineProcess")
            .field("pid", &self.child.id())
            .finish()
    }
}

/// Spawns engine subprocesses against compiled script files.
#[derive(Debug, Clone)]
pub struct Supervisor {
    command: String,
    args: Vec<String>,
    spec_flag: String,
}

impl Supervisor {
    /// Build a supervisor from engine configuration
    pub fn new(engine: &EngineConfig) -> Self {
        Self {
            command: engine.command.clone(),
            args: engine.args.clone(),
            spec_flag: engine.spec_flag.clone(),
        }
    }

    /// Spawn one engine subprocess for the given script file.
    ///
    /// Spawn failure is fatal to the whole application; the caller tears
    /// down and exits.
    pub fn spawn(&self, script_path: &Path) -> Result<EngineProcess> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .arg(format!("{}{}", self.spec_flag, script_path.display()))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                RouterError::spawn(format!("could not start '{}': {}", self.command, e))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RouterError::spawn("engine stdin not piped"))?;
        let stdout = child
            .stdout
            .take()
            .map(BufReader::new)
            .ok_or_else(|| RouterError::spawn("engine stdout not piped"))?;
        let stderr = child
            .stderr
            .take()
            .map(BufReader::new)
            .ok_or_else(|| RouterError::spawn("engine stderr not piped"))?;

        debug!("Spawned engine process {:?} for script '{}'", child.id(), script_path.display());

        Ok(EngineProcess {
            child,
            stdin,
            stdout,
            stderr,
        })
    }
}

impl EngineProcess {
    /// Write one record: values tab-separated with the trailing separator
    /// omitted, one newline terminator, then flush. A failure here is the
    /// router's fail-stop trigger.
    pub async fn write_record(&mut self, values: &[String]) -> std::io::Result<()> {
        let mut record = values.join("\t");
        record.push('\n');
        self.stdin.write_all(record.as_bytes()).await?;
        self.stdin.flush().await
    }

    /// Drain whatever buffered output and error text the process left
    /// behind, for post-mortem logging. Bounded; never blocks teardown.
    pub async fn drain_output(&mut self) -> String {
        let mut text = String::new();
        let _ = tokio::time::timeout(DRAIN_TIMEOUT, async {
            let mut line = String::new();
            while let Ok(n) = self.stdout.read_line(&mut line).await {
                if n == 0 {
                    break;
                }
                text.push_str(&line);
                line.clear();
            }
            let mut line = String::new();
            while let Ok(n) = self.stderr.read_line(&mut line).await {
                if n == 0 {
                    break;
                }
                text.push_str(&line);
                line.clear();
            }
        })
        .await;
        text
    }

    /// Close the input pipe and forcibly destroy the subprocess
    pub async fn kill(&mut self) {
        let _ = self.stdin.shutdown().await;
        if let Err(e) = self.child.kill().await {
            warn!("Failed to kill engine process: {}", e);
        }
    }
}
