use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;
use colored::Colorize;
use hammurabi_core::{
    discovery,
    dispatch::{cancel_channel, Grader, GraderOptions},
    lang::LanguageRegistry,
    run::create_runner,
    style,
    verdict::TestRun,
    verifier::VerifierRegistry,
    GraderConfig,
};

use crate::{report, util};

use super::{GlobalArgs, SubcmdResult};

#[derive(Debug, clap::Args)]
pub struct Args {
    /// Use an alternative config file.
    #[arg(long)]
    pub conf: Option<PathBuf>,

    /// Grade only these problems.
    #[arg(long, num_args(1..))]
    pub problem: Option<Vec<String>>,

    /// Grade only these authors' solutions.
    #[arg(long, num_args(1..), conflicts_with = "reference")]
    pub author: Option<Vec<String>>,

    /// Run only the reference solutions and regenerate the expected answers.
    #[arg(long)]
    pub reference: bool,

    /// Run only these testcases (by name, no extension).
    #[arg(long, num_args(1..))]
    pub testcase: Option<Vec<String>>,

    /// Worker count; 1 keeps timing deterministic.
    #[arg(short = 'j', long, default_value_t = 1)]
    pub jobs: usize,
}

pub async fn exec(args: &Args, _global_args: &GlobalArgs) -> SubcmdResult {
    let cfg = match &args.conf {
        Some(path) => GraderConfig::from_toml_file(path)?,
        None => GraderConfig::from_file_finding_in_ancestors(util::current_dir())?,
    };

    let registry = Arc::new(LanguageRegistry::builtin());
    let inventory = discovery::discover(&cfg.locations.problem_root, &cfg, &registry)?;

    let grader = Grader::new(
        registry,
        Arc::new(VerifierRegistry::builtin()),
        create_runner(&cfg.runner.name, &cfg.runner.params)?,
        GraderOptions {
            parallelism: args.jobs,
            reference_mode: args.reference,
        },
    );

    let matches = |names: &Option<Vec<String>>, name: &str| {
        names
            .as_ref()
            .map(|list| list.iter().any(|n| n == name))
            .unwrap_or(true)
    };
    let filter = |problem: &str, author: &str, testcase: &str| {
        matches(&args.problem, problem)
            && (args.reference || matches(&args.author, author))
            && matches(&args.testcase, testcase)
    };

    let (cancel_tx, cancel) = cancel_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted; terminating in-flight runs");
            let _ = cancel_tx.send(true);
        }
    });

    let out = grader.grade(&inventory, filter, cancel).await?;
    print_runs(&out.runs);

    let report_dir = report::write_reports(&cfg, &out.runs)?;
    log::info!("Reports written to {:?}", report_dir);

    // Not every scheduled pair produced a record, so the process must not
    // report success.
    if out.cancelled {
        bail!("Grading was cancelled; reports hold partial results only");
    }
    Ok(())
}

fn print_runs(runs: &[TestRun]) {
    let mut current_problem: Option<&str> = None;
    for run in runs {
        if current_problem != Some(run.problem.as_str()) {
            current_problem = Some(run.problem.as_str());
            println!();
            println!("Judging problem: {}", run.problem.bold());
            println!("{}", "=".repeat(60));
        }
        let icon = style::status_icon(run.result.status_code());
        let lean = run
            .lean_elapsed_ms()
            .map(|ms| format!("{} ms", ms))
            .unwrap_or_else(|| "-".to_owned());
        println!(
            "{} {:<12} {:<10} [{}]  Time: {}, Overall: {} ms",
            icon,
            run.author,
            run.testcase,
            run.language.as_deref().unwrap_or("?"),
            lean,
            run.judge_elapsed_ms(),
        );
        if let Some(detail) = run.result.detail() {
            let first_line = detail.lines().next().unwrap_or_default();
            if !first_line.is_empty() {
                println!("    {}", first_line.dimmed());
            }
        }
    }
    if !runs.is_empty() {
        println!();
        let total: u32 = runs.iter().map(|r| r.result.score()).sum();
        println!("Total score: {}", total.to_string().bold());
    }
}
