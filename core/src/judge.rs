//! Composition of compile → run → verify for one (solution, testcase) pair.

use std::{path::PathBuf, sync::Arc};

use chrono::Local;
use tokio::sync::watch;

use crate::{
    compile::{BuildArtifact, BuildCache, Compiler},
    discovery::{Problem, Solution, SolutionSource, Testcase},
    lang::{Language, LanguageRegistry},
    run::{ExitKind, RunLimits, RunOutcome, RunRequest, SolutionRunner},
    verdict::{RuntimeErrorKind, TestResult, TestRun},
    verifier::{Verdict, VerifierRegistry, VerifyContext},
};

pub struct Judge {
    registry: Arc<LanguageRegistry>,
    verifiers: Arc<VerifierRegistry>,
    runner: Arc<dyn SolutionRunner>,
    compiler: Compiler,
    cache: Arc<BuildCache>,
    scratch_root: PathBuf,
    cancel: watch::Receiver<bool>,
    reference_mode: bool,
}

impl Judge {
    const EXCERPT_BYTES: usize = 4096;

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<LanguageRegistry>,
        verifiers: Arc<VerifierRegistry>,
        runner: Arc<dyn SolutionRunner>,
        cache: Arc<BuildCache>,
        scratch_root: PathBuf,
        cancel: watch::Receiver<bool>,
        reference_mode: bool,
    ) -> Self {
        Self {
            registry,
            verifiers,
            runner,
            compiler: Compiler::new(),
            cache,
            scratch_root,
            cancel,
            reference_mode,
        }
    }

    /// Produce exactly one `TestRun` for the pair. All failure modes are
    /// folded into the result; this never errors and never panics.
    pub async fn judge(
        &self,
        problem: &Problem,
        solution: &Solution,
        testcase: &Testcase,
    ) -> TestRun {
        let judge_started_at = Local::now();
        let mut build: Option<Arc<BuildArtifact>> = None;
        let mut run: Option<RunOutcome> = None;

        let result = self
            .pipeline(problem, solution, testcase, &mut build, &mut run)
            .await;

        // Scratch files disappear at run end; keep the stream heads around
        // for the report renderer.
        let stdout_excerpt = run
            .as_ref()
            .and_then(|r| fsutil::read_head(&r.stdout_path, Self::EXCERPT_BYTES).ok());
        let stderr_excerpt = run
            .as_ref()
            .and_then(|r| fsutil::read_head(&r.stderr_path, Self::EXCERPT_BYTES).ok());

        TestRun {
            problem: problem.name.clone(),
            author: solution.author.clone(),
            testcase: testcase.name.clone(),
            language: solution.language_id().map(str::to_owned),
            judge_started_at,
            judge_finished_at: Local::now(),
            build,
            run,
            stdout_excerpt,
            stderr_excerpt,
            result,
        }
    }

    async fn pipeline(
        &self,
        problem: &Problem,
        solution: &Solution,
        testcase: &Testcase,
        build_slot: &mut Option<Arc<BuildArtifact>>,
        run_slot: &mut Option<RunOutcome>,
    ) -> TestResult {
        if let Some(reason) = solution.skip_reason() {
            return TestResult::Skipped { reason };
        }
        let SolutionSource::Ready { language, entry } = &solution.source else {
            unreachable!("skip_reason covers every non-ready source");
        };

        if !self.reference_mode && !testcase.has_answer {
            return TestResult::MissingAnswer;
        }

        let Some(lang) = self.registry.get(language) else {
            return TestResult::InternalError {
                detail: format!("Language '{}' is not registered", language),
            };
        };

        // Resolve the verifier up front so a misconfigured problem does not
        // waste a compile.
        let verifier = if self.reference_mode {
            None
        } else {
            match self.verifiers.get(&problem.config.verifier) {
                Some(v) => Some(v),
                None => {
                    return TestResult::InternalError {
                        detail: format!("Unknown verifier '{}'", problem.config.verifier),
                    };
                }
            }
        };

        let solution_scratch = self.scratch_root.join(&problem.name).join(&solution.author);
        let cache_key = format!("{}/{}", problem.name, solution.author);
        let build = self
            .cache
            .get_or_build(&cache_key, || {
                self.compiler.build(entry, lang, &solution_scratch)
            })
            .await;
        *build_slot = Some(build.clone());
        if !build.is_ok() {
            return TestResult::CompilationError {
                output: build.compiler_output.clone(),
            };
        }

        let outcome = self
            .run(problem, testcase, lang, entry.clone(), &build, &solution_scratch)
            .await;
        let result = self.conclude(problem, testcase, lang, &outcome, verifier.as_deref());
        *run_slot = Some(outcome);
        result
    }

    async fn run(
        &self,
        problem: &Problem,
        testcase: &Testcase,
        lang: &Language,
        source: PathBuf,
        build: &BuildArtifact,
        solution_scratch: &std::path::Path,
    ) -> RunOutcome {
        // Each testcase runs in its own subdir so parallel runs of one
        // solution cannot clobber each other's declared input/output files.
        let workdir = solution_scratch.join(&testcase.name);
        let req = RunRequest {
            run_recipe: lang.run_recipe.clone(),
            source,
            artifact: build.artifact_path.clone(),
            input_path: testcase.input_path.clone(),
            stdout_path: workdir.join(format!("{}.stdout", testcase.name)),
            stderr_path: workdir.join(format!("{}.stderr", testcase.name)),
            workdir,
            declared_input: problem.config.problem_input_file.clone(),
            declared_output: problem.config.problem_output_file.clone(),
            limits: RunLimits::new(
                problem.config.time_limit_for(lang),
                problem.config.memory_mb,
            ),
            cancel: Some(self.cancel.clone()),
        };
        self.runner.run(req).await
    }

    fn conclude(
        &self,
        problem: &Problem,
        testcase: &Testcase,
        lang: &Language,
        outcome: &RunOutcome,
        verifier: Option<&dyn crate::verifier::Verifier>,
    ) -> TestResult {
        let was_cancelled = *self.cancel.borrow();
        match &outcome.exit_kind {
            ExitKind::LaunchError(detail) => TestResult::InternalError {
                detail: format!("Cannot launch solution: {}", detail),
            },
            ExitKind::Timeout if was_cancelled => TestResult::Skipped {
                reason: "cancelled".to_owned(),
            },
            ExitKind::Timeout => TestResult::TimeLimitExceeded {
                limit: problem.config.time_limit_for(lang),
            },
            ExitKind::Signaled(_) if was_cancelled => TestResult::Skipped {
                reason: "cancelled".to_owned(),
            },
            ExitKind::Signaled(sig) => TestResult::RuntimeError {
                kind: RuntimeErrorKind::Signal(*sig),
            },
            ExitKind::Normal(code) if *code != 0 => TestResult::RuntimeError {
                kind: RuntimeErrorKind::ExitCode(*code),
            },
            ExitKind::Normal(_) => {
                if self.reference_mode {
                    return self.collect_reference_answer(testcase, outcome);
                }
                if !outcome.answer_path.is_file() {
                    return TestResult::OutputFormatError {
                        detail: "no output".to_owned(),
                    };
                }
                let ctx = VerifyContext {
                    abs_tol: problem.config.float_abs_tol,
                    rel_tol: problem.config.float_rel_tol,
                };
                let verifier = verifier.expect("verifier resolved before running");
                match verifier.verify(&testcase.answer_path, &outcome.answer_path, &ctx) {
                    Ok(Verdict::Correct) => TestResult::CorrectAnswer {
                        score: testcase.score,
                    },
                    Ok(Verdict::Wrong { detail }) => TestResult::WrongAnswer { detail },
                    Ok(Verdict::FormatError { detail }) => {
                        TestResult::OutputFormatError { detail }
                    }
                    Err(e) => TestResult::InternalError {
                        detail: format!("Verifier '{}' failed: {}", problem.config.verifier, e),
                    },
                }
            }
        }
    }

    /// Reference mode: the run's answer becomes the expected answer file.
    fn collect_reference_answer(&self, testcase: &Testcase, outcome: &RunOutcome) -> TestResult {
        if !outcome.answer_path.is_file() {
            return TestResult::OutputFormatError {
                detail: "no output".to_owned(),
            };
        }
        match fsutil::copy_file_with_mkdir(&outcome.answer_path, &testcase.answer_path) {
            Ok(_) => TestResult::Skipped {
                reason: "answer generated from the reference output".to_owned(),
            },
            Err(e) => TestResult::InternalError {
                detail: format!("Cannot save reference answer: {}", e),
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::{EffectiveConfig, GraderConfig, ProblemOverrides};
    use crate::run::SubprocessRunner;
    use glob::Pattern;
    use std::time::Duration;

    fn shell_registry() -> LanguageRegistry {
        LanguageRegistry::new(vec![Language {
            id: "shell".to_owned(),
            file_pattern: Pattern::new("*.sh").unwrap(),
            compile_recipe: None,
            run_recipe: "sh {artifact}".to_owned(),
            default_time_limit: Duration::from_secs(2),
            version_probe: "true".to_owned(),
        }])
    }

    struct Rig {
        _dir: tempfile::TempDir,
        _cancel_tx: watch::Sender<bool>,
        problem: Problem,
        judge: Judge,
    }

    impl Rig {
        fn new(reference_mode: bool) -> Self {
            Self::with_config(reference_mode, EffectiveConfig::default())
        }

        fn with_config(reference_mode: bool, config: EffectiveConfig) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let problem = Problem {
                name: "hworld".to_owned(),
                root_dir: dir.path().join("hworld"),
                config,
                testcases: Vec::new(),
                solutions: Vec::new(),
                reference: None,
            };
            let (cancel_tx, cancel) = watch::channel(false);
            let judge = Judge::new(
                Arc::new(shell_registry()),
                Arc::new(VerifierRegistry::builtin()),
                Arc::new(SubprocessRunner::new()),
                Arc::new(BuildCache::new()),
                dir.path().join("scratch"),
                cancel,
                reference_mode,
            );
            Self {
                _dir: dir,
                _cancel_tx: cancel_tx,
                problem,
                judge,
            }
        }

        fn solution(&self, author: &str, script: &str) -> Solution {
            let root = self.problem.root_dir.join("solutions").join(author);
            let entry = root.join("sol.sh");
            fsutil::write_with_mkdir(&entry, script).unwrap();
            Solution {
                author: author.to_owned(),
                root_dir: root,
                files: vec![entry.clone()],
                source: SolutionSource::Ready {
                    language: "shell".to_owned(),
                    entry,
                },
            }
        }

        fn testcase(&self, name: &str, input: &str, answer: Option<&str>) -> Testcase {
            let input_path = self.problem.root_dir.join("testcases").join(format!("{}.in", name));
            fsutil::write_with_mkdir(&input_path, input).unwrap();
            let answer_path = self.problem.root_dir.join("answers").join(format!("{}.out", name));
            if let Some(answer) = answer {
                fsutil::write_with_mkdir(&answer_path, answer).unwrap();
            }
            Testcase {
                name: name.to_owned(),
                input_path,
                answer_path,
                score: self.problem.config.testcase_score(name),
                has_answer: answer.is_some(),
            }
        }
    }

    #[tokio::test]
    async fn correct_answer_scores_the_testcase() {
        let rig = Rig::new(false);
        let solution = rig.solution("alice", "read n; i=0; while [ $i -lt $n ]; do echo Hello; i=$((i+1)); done");
        let testcase = rig.testcase("01", "2\n", Some("Hello\nHello\n"));

        let run = rig.judge.judge(&rig.problem, &solution, &testcase).await;
        assert_eq!(run.result, TestResult::CorrectAnswer { score: 1 });
        assert_eq!(run.result.score(), 1);
        assert!(run.build.is_some());
        assert!(run.run.is_some());
        assert_eq!(run.language.as_deref(), Some("shell"));
    }

    #[tokio::test]
    async fn wrong_answer_carries_the_verifier_detail() {
        let rig = Rig::new(false);
        let solution = rig.solution("bob", "echo Goodbye");
        let testcase = rig.testcase("01", "", Some("Hello\n"));

        let run = rig.judge.judge(&rig.problem, &solution, &testcase).await;
        assert!(matches!(run.result, TestResult::WrongAnswer { .. }));
        assert_eq!(run.result.score(), 0);
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_runtime_error() {
        let rig = Rig::new(false);
        let solution = rig.solution("carol", "exit 7");
        let testcase = rig.testcase("01", "", Some("x\n"));

        let run = rig.judge.judge(&rig.problem, &solution, &testcase).await;
        assert_eq!(
            run.result,
            TestResult::RuntimeError {
                kind: RuntimeErrorKind::ExitCode(7)
            }
        );
    }

    #[tokio::test]
    async fn missing_answer_short_circuits_before_any_run() {
        let rig = Rig::new(false);
        let solution = rig.solution("dave", "echo hi");
        let testcase = rig.testcase("01", "", None);

        let run = rig.judge.judge(&rig.problem, &solution, &testcase).await;
        assert_eq!(run.result, TestResult::MissingAnswer);
        assert!(run.build.is_none());
        assert!(run.run.is_none());
    }

    #[tokio::test]
    async fn ambiguous_solution_is_skipped() {
        let rig = Rig::new(false);
        let solution = Solution {
            author: "eve".to_owned(),
            root_dir: rig.problem.root_dir.clone(),
            files: Vec::new(),
            source: SolutionSource::Ambiguous {
                languages: vec!["python".to_owned(), "ruby".to_owned()],
            },
        };
        let testcase = rig.testcase("01", "", Some("x\n"));

        let run = rig.judge.judge(&rig.problem, &solution, &testcase).await;
        assert!(matches!(run.result, TestResult::Skipped { .. }));
    }

    #[tokio::test]
    async fn unknown_verifier_is_an_internal_error_without_running() {
        let config = {
            let overrides = ProblemOverrides {
                verifier: Some("no_such_verifier".to_owned()),
                ..Default::default()
            };
            GraderConfig::default().effective(&overrides)
        };
        let rig = Rig::with_config(false, config);
        let solution = rig.solution("frank", "echo hi");
        let testcase = rig.testcase("01", "", Some("hi\n"));

        let run = rig.judge.judge(&rig.problem, &solution, &testcase).await;
        match &run.result {
            TestResult::InternalError { detail } => {
                assert!(detail.contains("no_such_verifier"))
            }
            other => panic!("expected internal error, got {:?}", other),
        }
        assert!(run.run.is_none());
    }

    #[tokio::test]
    async fn missing_declared_output_is_a_format_error() {
        let config = {
            let overrides = ProblemOverrides {
                problem_output_file: Some("result.txt".to_owned()),
                ..Default::default()
            };
            GraderConfig::default().effective(&overrides)
        };
        let rig = Rig::with_config(false, config);
        let solution = rig.solution("grace", "echo ignored-stdout");
        let testcase = rig.testcase("01", "", Some("x\n"));

        let run = rig.judge.judge(&rig.problem, &solution, &testcase).await;
        assert_eq!(
            run.result,
            TestResult::OutputFormatError {
                detail: "no output".to_owned()
            }
        );
    }

    #[tokio::test]
    async fn reference_mode_generates_the_answer_file() {
        let rig = Rig::new(true);
        let solution = rig.solution("_reference", "echo generated");
        let testcase = rig.testcase("01", "", None);

        let run = rig.judge.judge(&rig.problem, &solution, &testcase).await;
        assert!(matches!(run.result, TestResult::Skipped { .. }));
        assert_eq!(
            fsutil::read_to_string(&testcase.answer_path).unwrap(),
            "generated\n"
        );
    }
}
