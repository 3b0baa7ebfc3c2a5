//! Fan-out of (solution, testcase) pairs over a fixed worker pool.
//!
//! Results come back in enumeration order regardless of completion order,
//! so reports are reproducible for any fixed filter.

use std::sync::Arc;

use anyhow::{bail, Context as _};
use tokio::{
    sync::{mpsc, watch, Mutex},
    task::JoinSet,
};

use crate::{
    compile::BuildCache,
    config::GraderConfig,
    discovery::{Inventory, Problem, Solution, Testcase},
    judge::Judge,
    lang::LanguageRegistry,
    run::{create_runner, SolutionRunner},
    verdict::{StatusCode, TestRun},
    verifier::VerifierRegistry,
};

#[derive(Debug, Clone)]
pub struct GraderOptions {
    /// Worker count; 1 keeps runs strictly serial for deterministic timing.
    pub parallelism: usize,
    /// Run only `_reference` solutions and write their output to `answers/`.
    pub reference_mode: bool,
}

impl Default for GraderOptions {
    fn default() -> Self {
        Self {
            parallelism: 1,
            reference_mode: false,
        }
    }
}

/// Aggregated output of one grading run.
#[derive(Debug)]
pub struct Dispatched {
    pub runs: Vec<TestRun>,
    /// True when the run was cut short; `runs` then holds partial results.
    pub cancelled: bool,
}

struct Pair {
    idx: usize,
    problem: Arc<Problem>,
    solution: Arc<Solution>,
    testcase: Testcase,
}

pub struct Grader {
    registry: Arc<LanguageRegistry>,
    verifiers: Arc<VerifierRegistry>,
    runner: Arc<dyn SolutionRunner>,
    options: GraderOptions,
}

impl Grader {
    pub fn new(
        registry: Arc<LanguageRegistry>,
        verifiers: Arc<VerifierRegistry>,
        runner: Arc<dyn SolutionRunner>,
        options: GraderOptions,
    ) -> Self {
        Self {
            registry,
            verifiers,
            runner,
            options,
        }
    }

    /// Builtin registries plus the runner selected by the config.
    pub fn from_config(cfg: &GraderConfig, options: GraderOptions) -> anyhow::Result<Self> {
        let runner = create_runner(&cfg.runner.name, &cfg.runner.params)?;
        Ok(Self::new(
            Arc::new(LanguageRegistry::builtin()),
            Arc::new(VerifierRegistry::builtin()),
            runner,
            options,
        ))
    }

    /// Judge every pair matching `filter((problem, author, testcase))`.
    ///
    /// Build artifacts live in a per-call scratch directory that is removed
    /// when this returns. Flipping `cancel` to `true` stops feeding new
    /// pairs, terminates in-flight subprocesses, and returns what finished.
    pub async fn grade<F>(
        &self,
        inventory: &Inventory,
        filter: F,
        cancel: watch::Receiver<bool>,
    ) -> anyhow::Result<Dispatched>
    where
        F: Fn(&str, &str, &str) -> bool,
    {
        let scratch = tempfile::tempdir().context("Cannot create scratch directory")?;
        let judge = Arc::new(Judge::new(
            self.registry.clone(),
            self.verifiers.clone(),
            self.runner.clone(),
            Arc::new(BuildCache::new()),
            scratch.path().to_owned(),
            cancel.clone(),
            self.options.reference_mode,
        ));

        let pairs = self.enumerate(inventory, &filter);
        let total = pairs.len();
        let parallelism = self.options.parallelism.max(1);

        let (pair_tx, pair_rx) = mpsc::channel::<Pair>(parallelism * 4);
        let pair_rx = Arc::new(Mutex::new(pair_rx));
        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<(usize, TestRun)>();

        let mut feeder_cancel = cancel.clone();
        let feeder = tokio::spawn(async move {
            for pair in pairs {
                tokio::select! {
                    res = pair_tx.send(pair) => {
                        if res.is_err() {
                            break;
                        }
                    }
                    _ = wait_cancelled(&mut feeder_cancel) => break,
                }
            }
        });

        let mut workers = JoinSet::new();
        for _ in 0..parallelism {
            let judge = judge.clone();
            let pair_rx = pair_rx.clone();
            let result_tx = result_tx.clone();
            workers.spawn(async move {
                loop {
                    let pair = pair_rx.lock().await.recv().await;
                    let Some(pair) = pair else {
                        break;
                    };
                    let run = judge
                        .judge(&pair.problem, &pair.solution, &pair.testcase)
                        .await;
                    if result_tx.send((pair.idx, run)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        let mut slots: Vec<Option<TestRun>> = (0..total).map(|_| None).collect();
        while let Some((idx, run)) = result_rx.recv().await {
            slots[idx] = Some(run);
        }
        feeder.await.context("Dispatcher feeder task panicked")?;
        while let Some(worker) = workers.join_next().await {
            worker.context("Dispatcher worker task panicked")?;
        }

        let runs: Vec<TestRun> = slots.into_iter().flatten().collect();
        let cancelled = *cancel.borrow();
        if self.options.reference_mode {
            self.check_reference_failures(inventory, &runs)?;
        }
        Ok(Dispatched { runs, cancelled })
    }

    fn enumerate<F>(&self, inventory: &Inventory, filter: &F) -> Vec<Pair>
    where
        F: Fn(&str, &str, &str) -> bool,
    {
        let mut pairs = Vec::new();
        for problem in &inventory.problems {
            let problem = Arc::new(problem.clone());
            let solutions: Vec<Arc<Solution>> = if self.options.reference_mode {
                problem.reference.iter().cloned().map(Arc::new).collect()
            } else {
                problem.solutions.iter().cloned().map(Arc::new).collect()
            };
            for solution in solutions {
                for testcase in &problem.testcases {
                    if filter(&problem.name, &solution.author, &testcase.name) {
                        pairs.push(Pair {
                            idx: pairs.len(),
                            problem: problem.clone(),
                            solution: solution.clone(),
                            testcase: testcase.clone(),
                        });
                    }
                }
            }
        }
        pairs
    }

    fn check_reference_failures(
        &self,
        inventory: &Inventory,
        runs: &[TestRun],
    ) -> anyhow::Result<()> {
        for run in runs {
            if run.result.status_code() != StatusCode::CE {
                continue;
            }
            let aborts = inventory
                .problems
                .iter()
                .find(|p| p.name == run.problem)
                .map(|p| p.config.reference_failure_aborts)
                .unwrap_or(false);
            if aborts {
                bail!(
                    "Reference solution of problem '{}' failed to compile",
                    run.problem
                );
            }
            log::warn!(
                "Reference solution of problem '{}' failed to compile; answers not generated",
                run.problem
            );
        }
        Ok(())
    }
}

async fn wait_cancelled(cancel: &mut watch::Receiver<bool>) {
    while !*cancel.borrow() {
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// A cancel channel pair for callers that may never cancel.
pub fn cancel_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}
