//! Kernel executable runs.

use anyhow::{anyhow, bail, Context, Result};
use kernelsweep_kernels::toolchain::{RunCommand, TrialRunner};
use std::io::{self, Read};
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Runs a compiled kernel once and captures its stdout.
///
/// Without a timeout the run blocks until the executable exits. With one, a
/// run that overstays is killed and reported as an error, which the
/// collector records as a failed trial.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl TrialRunner for ProcessRunner {
    fn run(&self, command: &RunCommand) -> Result<String> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("failed to launch `{}`", command.program.display()))?;

        let (status, stdout) = match self.timeout {
            Some(timeout) => {
                // Drained concurrently; a full pipe would stall the kernel.
                let reader = child.stdout.take().map(spawn_reader);
                let status = wait_with_timeout(&mut child, timeout)
                    .with_context(|| format!("`{}` did not finish", command.command_line()))?;
                let stdout = match reader {
                    Some(reader) => reader
                        .join()
                        .map_err(|_| anyhow!("output reader of `{}` panicked", command.command_line()))?
                        .with_context(|| format!("failed to read output of `{}`", command.command_line()))?,
                    None => Vec::new(),
                };
                (status, stdout)
            }
            None => {
                let output = child
                    .wait_with_output()
                    .with_context(|| format!("failed to wait for `{}`", command.command_line()))?;
                (output.status, output.stdout)
            }
        };
        let stdout = String::from_utf8_lossy(&stdout).into_owned();

        if !status.success() {
            warn!(command = %command.command_line(), code = ?status.code(), "kernel exited with failure");
        }
        debug!(command = %command.command_line(), output = %stdout.trim(), "trial output");
        Ok(stdout)
    }
}

fn spawn_reader(mut pipe: ChildStdout) -> JoinHandle<io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        pipe.read_to_end(&mut buffer)?;
        Ok(buffer)
    })
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<ExitStatus> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if start.elapsed() >= timeout {
            // Reap the killed child.
            let _ = child.kill();
            let _ = child.wait();
            bail!("killed after {:.3}s timeout", timeout.as_secs_f64());
        }
        thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn command(program: &str, dims: [&str; 3]) -> RunCommand {
        RunCommand {
            program: PathBuf::from(program),
            args: dims.map(str::to_string),
        }
    }

    #[test]
    fn captures_stdout_with_problem_dims() {
        let output = ProcessRunner::new().run(&command("echo", ["64", "32", "16"])).unwrap();
        assert_eq!(output.trim(), "64 32 16");
    }

    #[test]
    fn large_output_does_not_stall_the_run() {
        let large = command("head", ["-c", "200000", "/dev/zero"]);
        let output = ProcessRunner::new().run(&large).unwrap();
        assert_eq!(output.len(), 200_000);

        let runner = ProcessRunner::new().with_timeout(Some(Duration::from_secs(3)));
        let started = Instant::now();
        let output = runner.run(&large).unwrap();
        assert_eq!(output.len(), 200_000);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn overdue_run_is_killed() {
        let runner = ProcessRunner::new().with_timeout(Some(Duration::from_millis(100)));
        let started = Instant::now();
        assert!(runner.run(&command("sleep", ["5", "0", "0"])).is_err());
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn missing_executable_is_an_error() {
        assert!(ProcessRunner::new()
            .run(&command("./kernelsweep-no-such-kernel.out", ["1", "1", "1"]))
            .is_err());
    }
}
