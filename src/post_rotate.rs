use crate::{NetdumpError, Result};
use log::{debug, error, info};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};

/// Command run against every finalized capture file, e.g. `gzip` or
/// `bzip2 -9`. The file path is appended as the last argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostRotate {
    program: String,
    args: Vec<String>,
}

impl PostRotate {
    /// Splits a command line on whitespace. Returns `None` for a blank string.
    pub fn parse(command: &str) -> Option<Self> {
        let mut words = command.split_whitespace().map(str::to_string);
        let program = words.next()?;
        Some(Self {
            program,
            args: words.collect(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Runs the bare program once, with no arguments and empty stdin, to
    /// make sure it exists and executes successfully.
    pub fn validate(&self) -> Result<()> {
        let output = Command::new(&self.program)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| self.error(e.to_string()))?;

        if !output.status.success() {
            return Err(self.error(format!("exited with {}", output.status)));
        }
        debug!("Postrotate command {:?} is usable", self.program);
        Ok(())
    }

    pub fn command_for(&self, path: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).arg(path).stdin(Stdio::null());
        command
    }

    fn error(&self, reason: String) -> NetdumpError {
        NetdumpError::PostRotate {
            command: self.program.clone(),
            reason,
        }
    }
}

/// Dispatches [`PostRotate`] runs in the background and keeps their handles
/// so shutdown can wait for every one of them.
pub struct PostRotator {
    command: PostRotate,
    pending: Vec<JoinHandle<()>>,
}

impl PostRotator {
    pub fn new(command: PostRotate) -> Self {
        Self {
            command,
            pending: Vec::new(),
        }
    }

    /// Starts the command for `path` without waiting for it. Failures are
    /// logged and never retried.
    pub fn dispatch(&mut self, path: PathBuf) {
        self.reap();

        let mut command = self.command.command_for(&path);
        let program = self.command.program.clone();
        let spawned = thread::Builder::new()
            .name("post-rotate".to_string())
            .spawn(move || match command.status() {
                Ok(status) if status.success() => {
                    info!("Postrotate {} {} done", program, path.display());
                }
                Ok(status) => {
                    error!(
                        "Postrotate command error: {} {} exited with {}",
                        program,
                        path.display(),
                        status
                    );
                }
                Err(e) => {
                    error!("Postrotate command error: {} {}: {}", program, path.display(), e);
                }
            });

        match spawned {
            Ok(handle) => self.pending.push(handle),
            Err(e) => error!("Unable to start postrotate task: {}", e),
        }
    }

    /// Number of dispatched tasks not yet joined.
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    /// Blocks until every dispatched task has finished.
    pub fn wait_all(&mut self) {
        for handle in self.pending.drain(..) {
            if handle.join().is_err() {
                error!("Postrotate task panicked");
            }
        }
    }

    fn reap(&mut self) {
        let (finished, running): (Vec<_>, Vec<_>) =
            self.pending.drain(..).partition(|handle| handle.is_finished());
        self.pending = running;
        for handle in finished {
            if handle.join().is_err() {
                error!("Postrotate task panicked");
            }
        }
    }
}

impl Drop for PostRotator {
    fn drop(&mut self) {
        self.wait_all();
    }
}
