//! Compilation of solutions into runnable artifacts, with a per-run cache
//! so each solution is built at most once.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    process::Stdio,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use tokio::{process::Command, sync::OnceCell};

use crate::{lang::Language, str_interp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    Ok,
    Failed,
}

#[derive(Debug, Clone)]
pub struct BuildArtifact {
    pub status: BuildStatus,
    /// The runnable artifact. For interpreted languages this is the entry
    /// source file itself.
    pub artifact_path: PathBuf,
    /// Combined compiler stdout+stderr.
    pub compiler_output: String,
    pub compile_elapsed_ms: u64,
}

impl BuildArtifact {
    pub fn is_ok(&self) -> bool {
        self.status == BuildStatus::Ok
    }

    fn failed(artifact_path: PathBuf, output: String, elapsed: Duration) -> Self {
        Self {
            status: BuildStatus::Failed,
            artifact_path,
            compiler_output: output,
            compile_elapsed_ms: elapsed.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Compiler {
    shell: PathBuf,
    compile_timeout: Duration,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    const DEFAULT_SHELL: &'static str = "/bin/sh";
    const DEFAULT_COMPILE_TIMEOUT: Duration = Duration::from_secs(60);

    pub fn new() -> Self {
        Self {
            shell: Self::DEFAULT_SHELL.into(),
            compile_timeout: Self::DEFAULT_COMPILE_TIMEOUT,
        }
    }

    pub fn compile_timeout(mut self, timeout: Duration) -> Self {
        self.compile_timeout = timeout;
        self
    }

    /// Compile `entry` per the language's recipe, placing the artifact into
    /// `scratch_dir`. Never errors: every failure mode is folded into a
    /// `Failed` artifact carrying the captured output.
    pub async fn build(&self, entry: &Path, lang: &Language, scratch_dir: &Path) -> BuildArtifact {
        let Some(recipe) = &lang.compile_recipe else {
            return BuildArtifact {
                status: BuildStatus::Ok,
                artifact_path: entry.to_owned(),
                compiler_output: String::new(),
                compile_elapsed_ms: 0,
            };
        };

        let stem = entry
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "prog".to_owned());
        let artifact_path = scratch_dir.join(&stem);
        let source_dir = entry.parent().unwrap_or(Path::new("."));

        if let Err(e) = fsutil::mkdir_all(scratch_dir) {
            return BuildArtifact::failed(artifact_path, e.to_string(), Duration::ZERO);
        }

        let vars: HashMap<&str, &std::ffi::OsStr> = HashMap::from([
            ("source", entry.as_os_str()),
            ("source_dir", source_dir.as_os_str()),
            ("artifact", artifact_path.as_os_str()),
            ("artifact_dir", scratch_dir.as_os_str()),
            ("artifact_stem", std::ffi::OsStr::new(&stem)),
        ]);
        let cmd = match str_interp::interp(recipe, &vars) {
            Ok(cmd) => cmd,
            Err(e) => {
                return BuildArtifact::failed(artifact_path, e.to_string(), Duration::ZERO);
            }
        };

        let started_at = Instant::now();
        let output = tokio::time::timeout(
            self.compile_timeout,
            Command::new(&self.shell)
                .args(["-c", &cmd])
                .current_dir(source_dir)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await;
        let elapsed = started_at.elapsed();

        match output {
            Err(_) => BuildArtifact::failed(
                artifact_path,
                format!(
                    "Compilation timed out after {} seconds",
                    self.compile_timeout.as_secs()
                ),
                elapsed,
            ),
            Ok(Err(e)) => BuildArtifact::failed(
                artifact_path,
                format!("Failed to spawn compiler command '{}': {}", cmd, e),
                elapsed,
            ),
            Ok(Ok(out)) => {
                let mut text = String::from_utf8_lossy(&out.stdout).into_owned();
                text.push_str(&String::from_utf8_lossy(&out.stderr));
                BuildArtifact {
                    status: if out.status.success() {
                        BuildStatus::Ok
                    } else {
                        BuildStatus::Failed
                    },
                    artifact_path,
                    compiler_output: text,
                    compile_elapsed_ms: elapsed.as_millis() as u64,
                }
            }
        }
    }
}

/// Per-run build cache keyed by solution identity. Concurrent callers for
/// the same key block on the in-flight build and observe the same artifact.
#[derive(Default)]
pub struct BuildCache {
    cells: Mutex<HashMap<String, Arc<OnceCell<Arc<BuildArtifact>>>>>,
}

impl BuildCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_build<F, Fut>(&self, key: &str, build: F) -> Arc<BuildArtifact>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = BuildArtifact>,
    {
        let cell = {
            let mut cells = self.cells.lock().expect("build cache lock poisoned");
            cells.entry(key.to_owned()).or_default().clone()
        };
        cell.get_or_init(|| async { Arc::new(build().await) })
            .await
            .clone()
    }
}
