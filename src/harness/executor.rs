//! Sequential test execution inside the sandbox.
//!
//! Tests run one at a time in the order given. Each gets its own timeout,
//! capped by what is left of the run budget; a timeout, crash or panic is
//! recorded on that test's outcome and the suite moves on.

use crate::core::cancel::{CancelToken, RunBudget};
use crate::core::config::SimulationConfig;
use crate::core::sandbox::{Sandbox, resolve_within};
use crate::harness::functions::FunctionRegistry;
use crate::harness::generator::slug;
use crate::harness::model::{TestExecutable, TestOutcome, TestSpec, TestStatus};
use std::fs;
use std::io::{self, Read};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(25);
/// How long to wait for pipe readers once the child is gone.
const OUTPUT_GRACE: Duration = Duration::from_secs(1);
const FALLBACK_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

enum Completion {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

pub struct TestExecutor {
    workspace: PathBuf,
    artifacts: Option<PathBuf>,
    registry: FunctionRegistry,
    max_output_bytes: usize,
}

impl TestExecutor {
    pub fn new(sandbox: &Sandbox, registry: FunctionRegistry, config: &SimulationConfig) -> Self {
        Self {
            workspace: sandbox.workspace.clone(),
            artifacts: Some(sandbox.artifacts.clone()),
            registry,
            max_output_bytes: config.max_output_bytes,
        }
    }

    /// Executor over a bare directory, without artifact logs.
    pub fn in_dir(workspace: &Path, registry: FunctionRegistry, max_output_bytes: usize) -> Self {
        Self {
            workspace: workspace.to_path_buf(),
            artifacts: None,
            registry,
            max_output_bytes,
        }
    }

    pub fn run(&self, specs: &[TestSpec], budget: &RunBudget) -> Vec<TestOutcome> {
        let mut outcomes = Vec::with_capacity(specs.len());
        for (idx, spec) in specs.iter().enumerate() {
            if let Err(e) = budget.check(&format!("test '{}'", spec.name)) {
                outcomes.push(TestOutcome::skipped(spec, &e.to_string()));
                continue;
            }
            let timeout = Duration::from_secs(spec.timeout_seconds.max(1)).min(budget.remaining());
            let outcome = self.run_one(spec, timeout, budget.cancel_token());
            info!(
                test = %spec.name,
                category = %spec.category,
                status = ?outcome.status,
                secs = outcome.execution_time,
                "test finished"
            );
            self.write_log(idx, &outcome);
            outcomes.push(outcome);
        }
        outcomes
    }

    pub fn run_one(&self, spec: &TestSpec, timeout: Duration, cancel: &CancelToken) -> TestOutcome {
        let started = Instant::now();
        let (status, stdout, stderr, error) = match &spec.executable {
            TestExecutable::Script {
                interpreter,
                path,
                args,
            } => match resolve_within(&self.workspace, path) {
                Ok(script) if script.is_file() => {
                    let mut cmd = Command::new(interpreter);
                    cmd.arg(script).args(args);
                    self.run_process(cmd, timeout, cancel)
                }
                Ok(_) => (
                    TestStatus::Error,
                    String::new(),
                    String::new(),
                    Some(format!("script not found: {}", path)),
                ),
                Err(e) => (TestStatus::Error, String::new(), String::new(), Some(e.to_string())),
            },
            TestExecutable::Command { command } => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(command);
                self.run_process(cmd, timeout, cancel)
            }
            TestExecutable::Function { name, args } => {
                let (status, error) = self.run_function(name, args, timeout, cancel);
                (status, String::new(), String::new(), error)
            }
        };
        TestOutcome {
            name: spec.name.clone(),
            category: spec.category,
            status,
            execution_time: started.elapsed().as_secs_f64(),
            stdout,
            stderr,
            error,
        }
    }

    fn run_process(
        &self,
        mut cmd: Command,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> (TestStatus, String, String, Option<String>) {
        cmd.current_dir(&self.workspace)
            .env_clear()
            .env("PATH", std::env::var("PATH").unwrap_or_else(|_| FALLBACK_PATH.to_string()))
            .env("HOME", &self.workspace)
            .env("TMPDIR", &self.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return (
                    TestStatus::Error,
                    String::new(),
                    String::new(),
                    Some(format!("failed to spawn: {}", e)),
                );
            }
        };
        let stdout_rx = spawn_reader(child.stdout.take(), self.max_output_bytes);
        let stderr_rx = spawn_reader(child.stderr.take(), self.max_output_bytes);

        let completion = match wait_child(&mut child, timeout, cancel) {
            Ok(c) => c,
            Err(e) => {
                kill_tree(&mut child);
                return (
                    TestStatus::Error,
                    String::new(),
                    String::new(),
                    Some(format!("wait failed: {}", e)),
                );
            }
        };
        if matches!(completion, Completion::Exited(_)) {
            // Background jobs left in the group would hold the pipes open.
            kill_group(&child);
        }
        let stdout = collect(stdout_rx);
        let stderr = collect(stderr_rx);

        match completion {
            Completion::Exited(status) if status.success() => (TestStatus::Passed, stdout, stderr, None),
            Completion::Exited(status) => {
                let reason = match status.code() {
                    Some(code) => format!("exited with status {}", code),
                    None => "terminated by signal".to_string(),
                };
                (TestStatus::Failed, stdout, stderr, Some(reason))
            }
            Completion::TimedOut => (
                TestStatus::Error,
                stdout,
                stderr,
                Some(format!("timed out after {}s", timeout.as_secs_f64())),
            ),
            Completion::Cancelled => (TestStatus::Error, stdout, stderr, Some("cancelled".to_string())),
        }
    }

    fn run_function(
        &self,
        name: &str,
        args: &serde_json::Value,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> (TestStatus, Option<String>) {
        let Some(function) = self.registry.get(name) else {
            return (TestStatus::Error, Some(format!("unknown function '{}'", name)));
        };
        let workspace = self.workspace.clone();
        let args = args.clone();
        let (tx, rx) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name(format!("changesim-fn-{}", name))
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| function(&workspace, &args)));
                let _ = tx.send(result);
            });
        if let Err(e) = spawned {
            return (TestStatus::Error, Some(format!("failed to spawn: {}", e)));
        }

        // A timed-out callable keeps running detached; its result is dropped.
        let started = Instant::now();
        loop {
            if cancel.is_cancelled() {
                return (TestStatus::Error, Some("cancelled".to_string()));
            }
            let left = timeout.saturating_sub(started.elapsed());
            if left.is_zero() {
                return (
                    TestStatus::Error,
                    Some(format!("timed out after {}s", timeout.as_secs_f64())),
                );
            }
            match rx.recv_timeout(left.min(POLL_INTERVAL)) {
                Ok(Ok(Ok(true))) => return (TestStatus::Passed, None),
                Ok(Ok(Ok(false))) => {
                    return (TestStatus::Failed, Some(format!("{} returned false", name)));
                }
                Ok(Ok(Err(e))) => return (TestStatus::Failed, Some(e)),
                Ok(Err(payload)) => {
                    return (TestStatus::Error, Some(format!("panicked: {}", panic_message(&*payload))));
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return (TestStatus::Error, Some("function thread vanished".to_string()));
                }
            }
        }
    }

    fn write_log(&self, idx: usize, outcome: &TestOutcome) {
        let Some(dir) = &self.artifacts else {
            return;
        };
        let file = dir.join(format!("{:03}_{}.log", idx, slug(&outcome.name)));
        let body = format!(
            "test: {}\ncategory: {}\nstatus: {:?}\nexecution_time: {:.3}s\nerror: {}\n--- stdout ---\n{}\n--- stderr ---\n{}\n",
            outcome.name,
            outcome.category,
            outcome.status,
            outcome.execution_time,
            outcome.error.as_deref().unwrap_or("-"),
            outcome.stdout,
            outcome.stderr
        );
        if let Err(e) = fs::write(&file, body) {
            warn!(file = %file.display(), error = %e, "failed to write test log");
        }
    }
}

fn wait_child(child: &mut Child, timeout: Duration, cancel: &CancelToken) -> io::Result<Completion> {
    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Completion::Exited(status));
        }
        if cancel.is_cancelled() {
            kill_tree(child);
            debug!(pid = child.id(), "test process killed on cancel");
            return Ok(Completion::Cancelled);
        }
        if started.elapsed() >= timeout {
            kill_tree(child);
            debug!(pid = child.id(), "test process killed on timeout");
            return Ok(Completion::TimedOut);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// The child leads its own process group; take the whole group down.
#[cfg(unix)]
fn kill_group(child: &Child) {
    if let Ok(pid) = i32::try_from(child.id()) {
        unsafe {
            libc::kill(-pid, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) {}

fn kill_tree(child: &mut Child) {
    kill_group(child);
    let _ = child.kill();
    let _ = child.wait();
}

fn spawn_reader<R: Read + Send + 'static>(source: Option<R>, limit: usize) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    if let Some(mut source) = source {
        thread::spawn(move || {
            let mut kept = Vec::new();
            let mut truncated = false;
            let mut buf = [0u8; 8192];
            loop {
                match source.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let room = limit.saturating_sub(kept.len());
                        if n > room {
                            truncated = true;
                        }
                        kept.extend_from_slice(&buf[..n.min(room)]);
                    }
                }
            }
            let mut text = String::from_utf8_lossy(&kept).into_owned();
            if truncated {
                text.push_str("\n[output truncated]");
            }
            let _ = tx.send(text);
        });
    }
    rx
}

fn collect(rx: Receiver<String>) -> String {
    rx.recv_timeout(OUTPUT_GRACE).unwrap_or_default()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
