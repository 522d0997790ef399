use anyhow::{Context, Result};
use std::process::Command;
use std::sync::Arc;
use tracing::{debug, error};

use crate::core::error::TestFailure;

/// Captured result of an external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    /// stdout followed by stderr
    pub output: Vec<u8>,
}

impl CommandOutput {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

/// Spawns external processes. Everything that touches the host goes through
/// this trait so command shapes can be checked without root.
#[cfg_attr(test, mockall::automock)]
pub trait Executor: Send + Sync {
    /// Run `program` to completion. Only a failure to spawn is an `Err`; a
    /// non-zero exit is reported through [`CommandOutput::success`].
    fn execute(&self, program: &str, args: &[String]) -> Result<CommandOutput>;
}

pub struct SystemExecutor;

impl Executor for SystemExecutor {
    fn execute(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        debug!("Executing: {} {}", program, args.join(" "));

        let output = Command::new(program)
            .args(args)
            .output()
            .with_context(|| format!("Failed to execute {}", program))?;

        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            output: combined,
        })
    }
}

/// Command adapter with the two failure policies a test needs.
#[derive(Clone)]
pub struct Shell {
    executor: Arc<dyn Executor>,
}

impl Shell {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }

    pub fn system() -> Self {
        Self::new(Arc::new(SystemExecutor))
    }

    /// Run a command whose success is a precondition for the test. A non-zero
    /// exit logs the captured output and returns [`TestFailure::CommandFailed`].
    pub fn must_run<S: AsRef<str>>(&self, program: &str, args: &[S]) -> Result<Vec<u8>> {
        let args = to_owned_args(args);
        let result = self.executor.execute(program, &args)?;

        if !result.success {
            let output = result.text();
            error!("{}", output.trim_end());
            return Err(TestFailure::CommandFailed {
                command: render_command(program, &args),
                code: result.code,
                output,
            }
            .into());
        }

        Ok(result.output)
    }

    /// Run a command where failure is a meaningful outcome rather than an
    /// error. Returns whether it exited successfully.
    pub fn run<S: AsRef<str>>(&self, program: &str, args: &[S]) -> bool {
        let args = to_owned_args(args);
        match self.executor.execute(program, &args) {
            Ok(result) => {
                if !result.success {
                    debug!(
                        "{} exited with {:?}: {}",
                        render_command(program, &args),
                        result.code,
                        result.text().trim_end()
                    );
                }
                result.success
            }
            Err(e) => {
                debug!("{:#}", e);
                false
            }
        }
    }
}

fn to_owned_args<S: AsRef<str>>(args: &[S]) -> Vec<String> {
    args.iter().map(|a| a.as_ref().to_string()).collect()
}

fn render_command(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}
