//! Compiler invocation through `std::process`.

use anyhow::{Context, Result};
use kernelsweep_kernels::toolchain::{BuildCommand, BuildStatus, Toolchain};
use std::fs;
use std::process::{Command, Stdio};
use tracing::{info, warn};

/// Runs the configured compiler and waits for it to exit.
///
/// Compiler output is inherited so diagnostics reach the terminal.
#[derive(Debug, Clone, Default)]
pub struct ProcessToolchain {
    quiet: bool,
}

impl ProcessToolchain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discards compiler stdout/stderr.
    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }
}

impl Toolchain for ProcessToolchain {
    fn build(&self, command: &BuildCommand) -> Result<BuildStatus> {
        if let Some(dir) = command
            .artifact
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
        {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create artifact directory {}", dir.display()))?;
        }

        info!(command = %command.command_line(), "compiling");
        let mut process = Command::new(&command.program);
        process
            .args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        if self.quiet {
            process.stdout(Stdio::null()).stderr(Stdio::null());
        }
        let status = process
            .status()
            .with_context(|| format!("failed to launch `{}`", command.program))?;

        let result = BuildStatus {
            exit_code: status.code(),
            artifact_present: command.artifact.is_file(),
        };
        if !result.succeeded() {
            warn!(
                command = %command.command_line(),
                exit_code = ?result.exit_code,
                artifact_present = result.artifact_present,
                "build did not produce an executable"
            );
        }
        Ok(result)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn command(program: &str, args: &[&str], artifact: PathBuf) -> BuildCommand {
        BuildCommand {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: vec![("HIPSYCL_TARGETS".to_string(), "omp".to_string())],
            artifact,
        }
    }

    #[test]
    fn zero_exit_without_artifact_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let status = ProcessToolchain::new()
            .with_quiet(true)
            .build(&command("true", &[], dir.path().join("bin/k.out")))
            .unwrap();
        assert_eq!(status.exit_code, Some(0));
        assert!(!status.artifact_present);
        assert!(!status.succeeded());
        assert!(dir.path().join("bin").is_dir());
    }

    #[test]
    fn artifact_written_by_compiler_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("k.out");
        let script = format!("test \"$HIPSYCL_TARGETS\" = omp && touch {}", artifact.display());
        let status = ProcessToolchain::new()
            .build(&command("sh", &["-c", &script], artifact))
            .unwrap();
        assert!(status.succeeded());
    }

    #[test]
    fn non_zero_exit_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let status = ProcessToolchain::new()
            .with_quiet(true)
            .build(&command("false", &[], dir.path().join("k.out")))
            .unwrap();
        assert_eq!(status.exit_code, Some(1));
        assert!(!status.succeeded());
    }

    #[test]
    fn missing_compiler_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = ProcessToolchain::new().build(&command(
            "kernelsweep-no-such-compiler",
            &[],
            dir.path().join("k.out"),
        ));
        assert!(result.is_err());
    }
}
