//! Compiler subprocess execution
//!
//! Each invocation is synchronous and bounded by the compile timeout. On
//! expiry the child is killed and the run is reported as timed out; nothing
//! is retried.

use std::fmt;
use std::io::{self, Read};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, warn};

use crate::timeout::Deadline;

/// Poll interval while waiting on a child
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A program plus its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn push(&mut self, arg: impl Into<String>) {
        self.args.push(arg.into());
    }

    /// Index of `flag`'s first occurrence in the argument list
    pub fn position(&self, flag: &str) -> Option<usize> {
        self.args.iter().position(|a| a == flag)
    }

    /// Values following every occurrence of `flag`
    pub fn values_of(&self, flag: &str) -> Vec<&str> {
        self.args
            .windows(2)
            .filter(|pair| pair[0] == flag)
            .map(|pair| pair[1].as_str())
            .collect()
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " \"{}\"", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Captured result of one subprocess run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, `None` when killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
}

impl ProcessOutput {
    /// Clean run: exit 0, nothing on stderr
    pub fn success(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    /// Any stderr output, a non-zero exit or a timeout is a failure.
    pub fn failed(&self) -> bool {
        self.timed_out || self.exit_code != Some(0) || !self.stderr.is_empty()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Human-readable reason for a failure without stderr output
    pub fn failure_reason(&self) -> String {
        if self.timed_out {
            "timed out".to_string()
        } else {
            match self.exit_code {
                Some(code) => format!("exited with status {}", code),
                None => "terminated by signal".to_string(),
            }
        }
    }
}

/// Runs compiler subprocesses
pub trait ProcessRunner: Send + Sync {
    /// Spawn `command`, wait for it and capture its output.
    ///
    /// Errors are reserved for failing to start the process or to read its
    /// output; a truncated capture is never reported as a run.
    fn run(&self, command: &CommandSpec) -> io::Result<ProcessOutput>;
}

/// `ProcessRunner` backed by `std::process`
#[derive(Debug, Clone)]
pub struct SystemRunner {
    timeout: Duration,
}

impl SystemRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl ProcessRunner for SystemRunner {
    fn run(&self, command: &CommandSpec) -> io::Result<ProcessOutput> {
        debug!("running {}", command);
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Drain both pipes while polling; a full pipe stalls the child
        let stdout_handle = drain(child.stdout.take());
        let stderr_handle = drain(child.stderr.take());

        let deadline = Deadline::after(self.timeout);
        let mut timed_out = false;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if deadline.is_expired() {
                warn!(
                    "{} exceeded {}s; killing",
                    command.program,
                    deadline.limit().as_secs()
                );
                timed_out = true;
                break terminate(&mut child)?;
            }
            thread::sleep(POLL_INTERVAL);
        };

        let stdout = join(stdout_handle);
        let stderr = join(stderr_handle);
        let (stdout, stderr) = match (stdout, stderr) {
            (Ok(out), Ok(err)) => (out, err),
            (Err(e), _) | (_, Err(e)) => {
                warn!("{}: reading output failed: {}", command.program, e);
                return Err(e);
            }
        };
        debug!(
            "{} finished: status={:?} stdout={}B stderr={}B",
            command.program,
            status.code(),
            stdout.len(),
            stderr.len()
        );

        Ok(ProcessOutput {
            exit_code: status.code(),
            stdout,
            stderr,
            timed_out,
        })
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<io::Result<Vec<u8>>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            pipe.read_to_end(&mut buf)?;
            Ok(buf)
        })
    })
}

fn join(handle: Option<JoinHandle<io::Result<Vec<u8>>>>) -> io::Result<Vec<u8>> {
    match handle {
        Some(h) => h
            .join()
            .unwrap_or_else(|_| Err(io::Error::other("output reader panicked"))),
        None => Ok(Vec::new()),
    }
}

fn terminate(child: &mut Child) -> io::Result<std::process::ExitStatus> {
    let _ = child.kill();
    child.wait()
}
