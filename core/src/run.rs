//! Subprocess execution of one compiled solution against one testcase,
//! under a hard wall-clock deadline.

use std::{
    collections::HashMap,
    ffi::OsStr,
    os::unix::process::ExitStatusExt,
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::bail;
use async_trait::async_trait;
use nix::{
    sys::signal::{killpg, Signal},
    unistd::Pid,
};
use tokio::{process::Command, sync::watch};

use crate::str_interp;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitKind {
    Normal(i32),
    Signaled(i32),
    Timeout,
    LaunchError(String),
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub exit_kind: ExitKind,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
    /// The file to verify against the expected answer: the declared output
    /// file when the problem names one, otherwise the captured stdout.
    pub answer_path: PathBuf,
    /// Just-before-spawn to just-after-reap.
    pub wall_elapsed_ms: u64,
    /// Just-after-spawn to just-after-wait, excluding harness setup.
    pub lean_elapsed_ms: u64,
}

#[derive(Debug, Clone)]
pub struct RunLimits {
    pub time_limit: Duration,
    pub grace_period: Duration,
    /// Advisory; handed to runtimes via the `{memory_mb}` recipe variable.
    pub memory_mb: u64,
}

impl RunLimits {
    pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(500);

    pub fn new(time_limit: Duration, memory_mb: u64) -> Self {
        Self {
            time_limit,
            grace_period: Self::DEFAULT_GRACE_PERIOD,
            memory_mb,
        }
    }
}

/// Everything the runner needs for one execution.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub run_recipe: String,
    pub source: PathBuf,
    pub artifact: PathBuf,
    pub input_path: PathBuf,
    /// Working directory of the subprocess; run files land here.
    pub workdir: PathBuf,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
    /// Input filename the problem declares, materialized in the workdir.
    pub declared_input: Option<String>,
    /// Output filename the problem declares, read from the workdir.
    pub declared_output: Option<String>,
    pub limits: RunLimits,
    /// Top-level cancellation; flips to `true` at most once.
    pub cancel: Option<watch::Receiver<bool>>,
}

#[async_trait]
pub trait SolutionRunner: Send + Sync {
    /// Execute the run request. Never retries; every failure mode is folded
    /// into the returned outcome's `exit_kind`.
    async fn run(&self, req: RunRequest) -> RunOutcome;
}

/// Instantiate the runner selected by `runner.name` in the config.
pub fn create_runner(name: &str, params: &toml::Table) -> anyhow::Result<Arc<dyn SolutionRunner>> {
    match name {
        "subprocess" => {
            let mut runner = SubprocessRunner::new();
            if let Some(shell) = params.get("shell").and_then(|v| v.as_str()) {
                runner = runner.shell(shell);
            }
            Ok(Arc::new(runner))
        }
        _ => bail!("Unknown runner '{}'", name),
    }
}

#[derive(Debug, Clone)]
pub struct SubprocessRunner {
    shell: PathBuf,
}

impl Default for SubprocessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl SubprocessRunner {
    const DEFAULT_SHELL: &'static str = "/bin/sh";

    pub fn new() -> Self {
        Self {
            shell: Self::DEFAULT_SHELL.into(),
        }
    }

    pub fn shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = shell.into();
        self
    }

    fn render_command(req: &RunRequest, output_file: &Path) -> Result<String, str_interp::InterpError> {
        let artifact_dir = req.artifact.parent().unwrap_or(Path::new("."));
        let source_dir = req.source.parent().unwrap_or(Path::new("."));
        let artifact_stem = req
            .artifact
            .file_stem()
            .map(|s| s.to_os_string())
            .unwrap_or_default();
        let memory_mb = req.limits.memory_mb.to_string();

        let vars: HashMap<&str, &OsStr> = HashMap::from([
            ("source", req.source.as_os_str()),
            ("source_dir", source_dir.as_os_str()),
            ("artifact", req.artifact.as_os_str()),
            ("artifact_dir", artifact_dir.as_os_str()),
            ("artifact_stem", artifact_stem.as_os_str()),
            ("input_file", req.input_path.as_os_str()),
            ("output_file", output_file.as_os_str()),
            ("memory_mb", OsStr::new(&memory_mb)),
        ]);
        str_interp::interp(&req.run_recipe, &vars)
    }
}

#[async_trait]
impl SolutionRunner for SubprocessRunner {
    async fn run(&self, mut req: RunRequest) -> RunOutcome {
        let recipe_output = req.workdir.join("answer.out");
        let answer_path = match &req.declared_output {
            Some(name) => req.workdir.join(name),
            None if req.run_recipe.contains("{output_file}") => recipe_output.clone(),
            None => req.stdout_path.clone(),
        };

        let launch_error = |detail: String| RunOutcome {
            exit_kind: ExitKind::LaunchError(detail),
            stdout_path: req.stdout_path.clone(),
            stderr_path: req.stderr_path.clone(),
            answer_path: answer_path.clone(),
            wall_elapsed_ms: 0,
            lean_elapsed_ms: 0,
        };

        let cmd = match Self::render_command(&req, &recipe_output) {
            Ok(cmd) => cmd,
            Err(e) => return launch_error(e.to_string()),
        };

        if let Err(e) = fsutil::mkdir_all(&req.workdir) {
            return launch_error(e.to_string());
        }
        if let Some(name) = &req.declared_input {
            if let Err(e) = fsutil::copy_file(&req.input_path, req.workdir.join(name)) {
                return launch_error(e.to_string());
            }
        }

        // The recipe or a declared input file takes over input handling;
        // otherwise the input file becomes the subprocess stdin.
        let stdin = if req.declared_input.is_some() || req.run_recipe.contains("{input_file}") {
            Stdio::null()
        } else {
            match std::fs::File::open(&req.input_path) {
                Ok(f) => Stdio::from(f),
                Err(e) => {
                    return launch_error(format!("Cannot open input {:?}: {}", req.input_path, e))
                }
            }
        };
        let stdout = match std::fs::File::create(&req.stdout_path) {
            Ok(f) => Stdio::from(f),
            Err(e) => return launch_error(format!("Cannot create {:?}: {}", req.stdout_path, e)),
        };
        let stderr = match std::fs::File::create(&req.stderr_path) {
            Ok(f) => Stdio::from(f),
            Err(e) => return launch_error(format!("Cannot create {:?}: {}", req.stderr_path, e)),
        };

        let wall_started_at = Instant::now();
        let mut child = match Command::new(&self.shell)
            .args(["-c", &cmd])
            .current_dir(&req.workdir)
            .stdin(stdin)
            .stdout(stdout)
            .stderr(stderr)
            .process_group(0)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return launch_error(format!(
                    "Failed to spawn '{} -c {}': {}",
                    self.shell.to_string_lossy(),
                    cmd,
                    e
                ))
            }
        };
        let pgid = child.id().map(|id| Pid::from_raw(id as i32));
        let lean_started_at = Instant::now();

        let mut cancel = req.cancel.take();
        let waited = tokio::select! {
            res = child.wait() => Some(res),
            _ = tokio::time::sleep(req.limits.time_limit) => None,
            _ = cancelled(&mut cancel) => None,
        };

        let exit_kind = match waited {
            Some(Ok(status)) => match status.code() {
                Some(code) => ExitKind::Normal(code),
                None => ExitKind::Signaled(status.signal().unwrap_or(0)),
            },
            Some(Err(e)) => ExitKind::LaunchError(format!("Failed to reap subprocess: {}", e)),
            None => {
                // Deadline or cancellation: graceful signal, short grace,
                // then kill the whole process group.
                if let Some(pgid) = pgid {
                    let _ = killpg(pgid, Signal::SIGTERM);
                }
                let reaped =
                    tokio::time::timeout(req.limits.grace_period, child.wait()).await;
                if reaped.is_err() {
                    if let Some(pgid) = pgid {
                        let _ = killpg(pgid, Signal::SIGKILL);
                    }
                    let _ = child.wait().await;
                }
                ExitKind::Timeout
            }
        };
        let lean_elapsed = lean_started_at.elapsed();
        let wall_elapsed = wall_started_at.elapsed();

        RunOutcome {
            exit_kind,
            stdout_path: req.stdout_path,
            stderr_path: req.stderr_path,
            answer_path,
            wall_elapsed_ms: wall_elapsed.as_millis() as u64,
            lean_elapsed_ms: lean_elapsed.as_millis() as u64,
        }
    }
}

/// Resolves once the cancel flag flips to `true`; pends forever otherwise.
async fn cancelled(cancel: &mut Option<watch::Receiver<bool>>) {
    match cancel {
        Some(rx) => {
            while !*rx.borrow() {
                if rx.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct Fixture {
        _dir: tempfile::TempDir,
        workdir: PathBuf,
        input_path: PathBuf,
    }

    fn fixture(input: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let workdir = dir.path().join("work");
        fsutil::mkdir_all(&workdir).unwrap();
        let input_path = dir.path().join("01.in");
        fsutil::write(&input_path, input).unwrap();
        Fixture {
            _dir: dir,
            workdir,
            input_path,
        }
    }

    fn request(f: &Fixture, recipe: &str, time_limit: Duration) -> RunRequest {
        RunRequest {
            run_recipe: recipe.to_owned(),
            source: f.workdir.join("sol.sh"),
            artifact: f.workdir.join("sol.sh"),
            input_path: f.input_path.clone(),
            workdir: f.workdir.clone(),
            stdout_path: f.workdir.join("01.stdout"),
            stderr_path: f.workdir.join("01.stderr"),
            declared_input: None,
            declared_output: None,
            limits: RunLimits {
                time_limit,
                grace_period: Duration::from_millis(200),
                memory_mb: 512,
            },
            cancel: None,
        }
    }

    #[tokio::test]
    async fn normal_exit_captures_stdout() {
        let f = fixture("3\n");
        let req = request(&f, "echo Hello; echo world >&2", Duration::from_secs(5));
        let outcome = SubprocessRunner::new().run(req).await;

        assert_eq!(outcome.exit_kind, ExitKind::Normal(0));
        assert_eq!(outcome.answer_path, outcome.stdout_path);
        assert_eq!(fsutil::read_to_string(&outcome.stdout_path).unwrap(), "Hello\n");
        assert_eq!(fsutil::read_to_string(&outcome.stderr_path).unwrap(), "world\n");
        assert!(outcome.lean_elapsed_ms <= outcome.wall_elapsed_ms);
    }

    #[tokio::test]
    async fn nonzero_exit_code_is_reported() {
        let f = fixture("");
        let req = request(&f, "exit 3", Duration::from_secs(5));
        let outcome = SubprocessRunner::new().run(req).await;
        assert_eq!(outcome.exit_kind, ExitKind::Normal(3));
    }

    #[tokio::test]
    async fn signal_death_is_reported() {
        let f = fixture("");
        let req = request(&f, "kill -6 $$", Duration::from_secs(5));
        let outcome = SubprocessRunner::new().run(req).await;
        assert_eq!(outcome.exit_kind, ExitKind::Signaled(Signal::SIGABRT as i32));
    }

    #[tokio::test]
    async fn stdin_is_piped_from_the_input_file() {
        let f = fixture("42 and more\n");
        let req = request(&f, "cat", Duration::from_secs(5));
        let outcome = SubprocessRunner::new().run(req).await;
        assert_eq!(outcome.exit_kind, ExitKind::Normal(0));
        assert_eq!(
            fsutil::read_to_string(&outcome.answer_path).unwrap(),
            "42 and more\n"
        );
    }

    #[tokio::test]
    async fn input_file_variable_suppresses_stdin_piping() {
        let f = fixture("via file\n");
        let req = request(&f, "cat {input_file}", Duration::from_secs(5));
        let outcome = SubprocessRunner::new().run(req).await;
        assert_eq!(
            fsutil::read_to_string(&outcome.stdout_path).unwrap(),
            "via file\n"
        );
    }

    #[tokio::test]
    async fn declared_output_file_is_the_answer() {
        let f = fixture("");
        let mut req = request(&f, "echo computed > result.txt", Duration::from_secs(5));
        req.declared_output = Some("result.txt".to_owned());
        let outcome = SubprocessRunner::new().run(req).await;

        assert_eq!(outcome.exit_kind, ExitKind::Normal(0));
        assert_eq!(outcome.answer_path, f.workdir.join("result.txt"));
        assert_eq!(
            fsutil::read_to_string(&outcome.answer_path).unwrap(),
            "computed\n"
        );
    }

    #[tokio::test]
    async fn declared_input_file_is_materialized_in_the_workdir() {
        let f = fixture("copied input\n");
        let mut req = request(&f, "cat data.in", Duration::from_secs(5));
        req.declared_input = Some("data.in".to_owned());
        let outcome = SubprocessRunner::new().run(req).await;
        assert_eq!(
            fsutil::read_to_string(&outcome.stdout_path).unwrap(),
            "copied input\n"
        );
    }

    #[tokio::test]
    async fn deadline_kills_the_process_tree() {
        let f = fixture("");
        let req = request(&f, "sleep 30", Duration::from_millis(300));
        let started = Instant::now();
        let outcome = SubprocessRunner::new().run(req).await;

        assert_eq!(outcome.exit_kind, ExitKind::Timeout);
        assert!(outcome.wall_elapsed_ms >= 300);
        // Deadline + grace period, with headroom for a slow machine.
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn launch_failure_is_contained() {
        let f = fixture("");
        let req = request(&f, "echo hi", Duration::from_secs(1));
        let outcome = SubprocessRunner::new()
            .shell("/no/such/shell")
            .run(req)
            .await;
        assert!(matches!(outcome.exit_kind, ExitKind::LaunchError(_)));
    }

    #[tokio::test]
    async fn undefined_recipe_variable_is_a_launch_error() {
        let f = fixture("");
        let req = request(&f, "prog {nope}", Duration::from_secs(1));
        let outcome = SubprocessRunner::new().run(req).await;
        assert!(matches!(outcome.exit_kind, ExitKind::LaunchError(_)));
    }

    #[tokio::test]
    async fn cancellation_terminates_an_in_flight_run() {
        let f = fixture("");
        let (tx, rx) = watch::channel(false);
        let mut req = request(&f, "sleep 30", Duration::from_secs(30));
        req.cancel = Some(rx);

        let runner = SubprocessRunner::new();
        let handle = tokio::spawn(async move { runner.run(req).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();

        let outcome = handle.await.unwrap();
        assert_eq!(outcome.exit_kind, ExitKind::Timeout);
        assert!(outcome.wall_elapsed_ms < 5000);
    }

    #[tokio::test]
    async fn memory_limit_reaches_the_recipe() {
        let f = fixture("");
        let mut req = request(&f, "echo limit={memory_mb}", Duration::from_secs(5));
        req.limits.memory_mb = 256;
        let outcome = SubprocessRunner::new().run(req).await;
        assert_eq!(
            fsutil::read_to_string(&outcome.stdout_path).unwrap(),
            "limit=256\n"
        );
    }

    #[test]
    fn runner_factory_knows_subprocess_only() {
        assert!(create_runner("subprocess", &toml::Table::new()).is_ok());
        assert!(create_runner("docker", &toml::Table::new()).is_err());
    }
}
