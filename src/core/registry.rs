use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use super::context::TestContext;
use super::error::TestFailure;
use crate::config::HarnessConfig;
use crate::utils::Shell;

pub type TestFn = dyn Fn(&TestContext) -> Result<()> + Send + Sync;

/// A named, self-contained test procedure.
#[derive(Clone)]
pub struct TestCase {
    pub name: String,
    func: Arc<TestFn>,
}

impl TestCase {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&TestContext) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }
}

impl std::fmt::Debug for TestCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestCase").field("name", &self.name).finish()
    }
}

/// Ordered, append-only list of test cases. Built once at startup and handed
/// to the [`Runner`] by reference.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    tests: Vec<TestCase>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, test: TestCase) {
        self.tests.push(test);
    }

    pub fn extend(&mut self, tests: impl IntoIterator<Item = TestCase>) {
        self.tests.extend(tests);
    }

    pub fn iter(&self) -> impl Iterator<Item = &TestCase> {
        self.tests.iter()
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tests.iter().map(|t| t.name.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    AssertionFailed(String),
    CommandFailed(String),
    Error(String),
    Panicked(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct TestOutcome {
    pub name: String,
    #[serde(flatten)]
    pub status: TestStatus,
    /// Non-fatal errors, cleanup failures included
    pub errors: Vec<String>,
    pub duration_ms: u128,
}

impl TestOutcome {
    pub fn passed(&self) -> bool {
        self.status == TestStatus::Passed && self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<TestOutcome>,
}

impl RunReport {
    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.passed()).count()
    }

    pub fn success(&self) -> bool {
        self.failed() == 0
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self).context("Failed to serialize run report")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write run report: {}", path.display()))
    }
}

/// Runs test cases one at a time, each with its own scratch directory.
pub struct Runner {
    config: HarnessConfig,
    shell: Shell,
    scratch_var: String,
}

impl Runner {
    pub fn new(config: HarnessConfig, shell: Shell) -> Self {
        Self {
            config,
            shell,
            scratch_var: "TMPDIR".to_string(),
        }
    }

    /// Use another environment variable for the scratch directory.
    pub fn with_scratch_var(mut self, var: impl Into<String>) -> Self {
        self.scratch_var = var.into();
        self
    }

    /// Run every registered test whose name contains `filter`, in
    /// registration order.
    pub fn run_all(&self, registry: &Registry, filter: Option<&str>) -> RunReport {
        let started_at = Utc::now();
        let outcomes: Vec<TestOutcome> = registry
            .iter()
            .filter(|t| filter.map_or(true, |f| t.name.contains(f)))
            .map(|t| self.run(t))
            .collect();

        let report = RunReport {
            started_at,
            finished_at: Utc::now(),
            outcomes,
        };
        info!(
            "{} passed, {} failed",
            report.outcomes.len() - report.failed(),
            report.failed()
        );
        report
    }

    pub fn run(&self, test: &TestCase) -> TestOutcome {
        info!("=== RUN   {}", test.name);
        let start = Instant::now();

        let inherited = std::env::var_os(&self.scratch_var).filter(|v| !v.is_empty());
        let scratch = if inherited.is_none() {
            match self.create_scratch() {
                Ok(dir) => Some(dir),
                Err(e) => {
                    return self.finish(
                        test,
                        TestStatus::Error(format!("{:#}", e)),
                        Vec::new(),
                        start,
                    )
                }
            }
        } else {
            None
        };

        let ctx = TestContext::new(test.name.clone(), self.config.clone(), self.shell.clone());
        let result = panic::catch_unwind(AssertUnwindSafe(|| (test.func)(&ctx)));
        ctx.run_cleanups();

        if let Some(dir) = scratch {
            std::env::remove_var(&self.scratch_var);
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                ctx.error(format!("couldn't remove {}: {}", path.display(), e));
            }
        }

        let status = match result {
            Ok(Ok(())) => TestStatus::Passed,
            Ok(Err(e)) => classify(&e),
            Err(payload) => TestStatus::Panicked(panic_message(payload.as_ref())),
        };
        self.finish(test, status, ctx.errors(), start)
    }

    fn create_scratch(&self) -> Result<tempfile::TempDir> {
        let dir = tempfile::Builder::new()
            .tempdir_in(&self.config.scratch_base)
            .with_context(|| {
                format!(
                    "failed to create temp working dir in {}",
                    self.config.scratch_base.display()
                )
            })?;
        std::env::set_var(&self.scratch_var, dir.path());
        Ok(dir)
    }

    fn finish(
        &self,
        test: &TestCase,
        status: TestStatus,
        errors: Vec<String>,
        start: Instant,
    ) -> TestOutcome {
        let outcome = TestOutcome {
            name: test.name.clone(),
            status,
            errors,
            duration_ms: start.elapsed().as_millis(),
        };

        let secs = start.elapsed().as_secs_f64();
        match &outcome.status {
            TestStatus::Passed if outcome.errors.is_empty() => {
                info!("--- PASS: {} ({:.2}s)", test.name, secs)
            }
            TestStatus::Passed => warn!(
                "--- FAIL: {} ({:.2}s): {} error(s) during the run",
                test.name,
                secs,
                outcome.errors.len()
            ),
            TestStatus::AssertionFailed(reason)
            | TestStatus::CommandFailed(reason)
            | TestStatus::Error(reason)
            | TestStatus::Panicked(reason) => {
                error!("--- FAIL: {} ({:.2}s): {}", test.name, secs, reason)
            }
        }
        outcome
    }
}

fn classify(err: &anyhow::Error) -> TestStatus {
    match err.downcast_ref::<TestFailure>() {
        Some(TestFailure::AssertionFailed(message)) => TestStatus::AssertionFailed(message.clone()),
        Some(failure @ TestFailure::CommandFailed { .. }) => {
            TestStatus::CommandFailed(failure.to_string())
        }
        None => TestStatus::Error(format!("{:#}", err)),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "test procedure panicked".to_string()
    }
}
