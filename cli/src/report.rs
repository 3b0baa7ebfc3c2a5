//! Report writers: a CSV log of every test run and an HTML matrix
//! (author x testcase per problem).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::Context as _;
use chrono::Local;
use hammurabi_core::{str_interp, verdict::TestRun, GraderConfig};

pub fn write_reports(cfg: &GraderConfig, runs: &[TestRun]) -> anyhow::Result<PathBuf> {
    let dir = create_report_dir(cfg)?;
    fsutil::write(dir.join("testruns.csv"), csv_log(runs))?;
    fsutil::write(dir.join("report-matrix.html"), matrix_html(cfg, runs))?;
    Ok(dir)
}

/// Resolve `report_folder_template` (`{dt}`, `{hostname}`) under the
/// report root and create the directory.
fn create_report_dir(cfg: &GraderConfig) -> anyhow::Result<PathBuf> {
    let dt = Local::now().format("%Y%m%d-%H%M%S").to_string();
    let hostname = nix::unistd::gethostname()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown-host".to_owned());

    let vars: HashMap<&str, &str> = HashMap::from([("dt", dt.as_str()), ("hostname", hostname.as_str())]);
    let name = str_interp::interp(&cfg.locations.report_folder_template, &vars)
        .context("Invalid report_folder_template")?;

    let dir = cfg.locations.report_root.join(name);
    fsutil::mkdir_all(&dir)?;
    Ok(dir)
}

fn csv_log(runs: &[TestRun]) -> String {
    let mut out = String::from("problem,author,testcase,language,status,score,lean_ms,judge_ms,detail\n");
    for run in runs {
        let lean = run
            .lean_elapsed_ms()
            .map(|ms| ms.to_string())
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "{},{},{},{},{},{},{},{},{}",
            csv_field(&run.problem),
            csv_field(&run.author),
            csv_field(&run.testcase),
            csv_field(run.language.as_deref().unwrap_or("")),
            run.result.status_code(),
            run.result.score(),
            lean,
            run.judge_elapsed_ms(),
            csv_field(&run.result.detail().unwrap_or_default()),
        );
    }
    out
}

fn csv_field(s: &str) -> String {
    if s.contains([',', '"', '\n']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_owned()
    }
}

fn matrix_html(cfg: &GraderConfig, runs: &[TestRun]) -> String {
    // problem -> author -> testcase -> run
    let mut problems: BTreeMap<&str, BTreeMap<&str, BTreeMap<&str, &TestRun>>> = BTreeMap::new();
    for run in runs {
        problems
            .entry(&run.problem)
            .or_default()
            .entry(&run.author)
            .or_default()
            .insert(&run.testcase, run);
    }

    let mut html = String::from(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\">\
         <title>Grading matrix</title>\n<style>\n\
         body { font-family: sans-serif; }\n\
         table { border-collapse: collapse; margin-bottom: 2em; }\n\
         th, td { border: 1px solid #999; padding: 4px 10px; text-align: center; }\n\
         .st-OK { background: #b6e3b6; }\n\
         .st-WA, .st-OF { background: #f3d68a; }\n\
         .st-TLE { background: #f0a3a3; }\n\
         .st-RE, .st-CE { background: #dcb6ec; }\n\
         .st-IE { background: #ff9d9d; }\n\
         .st-SKIP, .st-MA { background: #d5d5d5; }\n\
         .banner-alert { color: #fff; background: #c0392b; padding: 6px; }\n\
         .banner-warning { background: #f3d68a; padding: 6px; }\n\
         .banner-info { background: #d6eaf8; padding: 6px; }\n\
         pre { background: #f4f4f4; padding: 4px; text-align: left; }\n\
         </style></head><body>\n",
    );

    for (class, banner) in [
        ("alert", &cfg.reporting.alert_banner),
        ("warning", &cfg.reporting.warning_banner),
        ("info", &cfg.reporting.info_banner),
    ] {
        if !banner.is_empty() {
            let _ = writeln!(
                html,
                "<div class=\"banner-{}\">{}</div>",
                class,
                escape(banner)
            );
        }
    }

    for (problem, authors) in &problems {
        let testcases: BTreeSet<&str> = authors
            .values()
            .flat_map(|cells| cells.keys().copied())
            .collect();

        let _ = writeln!(html, "<h2>{}</h2>\n<table>", escape(problem));
        let _ = write!(html, "<tr><th>author</th>");
        for testcase in &testcases {
            let _ = write!(html, "<th>{}</th>", escape(testcase));
        }
        let _ = writeln!(html, "<th>score</th></tr>");

        for (author, cells) in authors {
            let _ = write!(html, "<tr><td>{}</td>", escape(author));
            let mut score = 0;
            for testcase in &testcases {
                match cells.get(testcase) {
                    Some(run) => {
                        let code = run.result.status_code();
                        score += run.result.score();
                        let _ = write!(
                            html,
                            "<td class=\"st-{code}\" title=\"{}\">{code}</td>",
                            escape(&run.result.detail().unwrap_or_default()),
                        );
                    }
                    None => {
                        let _ = write!(html, "<td></td>");
                    }
                }
            }
            let _ = writeln!(html, "<td>{}</td></tr>", score);
        }
        let _ = writeln!(html, "</table>");

        append_failure_details(&mut html, cfg, authors);
    }

    html.push_str("</body></html>\n");
    html
}

fn append_failure_details(
    html: &mut String,
    cfg: &GraderConfig,
    authors: &BTreeMap<&str, BTreeMap<&str, &TestRun>>,
) {
    for (author, cells) in authors {
        for (testcase, run) in cells {
            if run.result.is_correct() {
                continue;
            }
            let _ = writeln!(
                html,
                "<h4>{} / {}: {}</h4>",
                escape(author),
                escape(testcase),
                escape(run.result.status()),
            );
            if let Some(detail) = run.result.detail() {
                let _ = writeln!(html, "<pre>{}</pre>", escape(&detail));
            }
            if cfg.security.report_stdout {
                if let Some(stdout) = run.stdout_excerpt.as_deref().filter(|s| !s.is_empty()) {
                    let _ = writeln!(html, "<p>stdout:</p><pre>{}</pre>", escape(stdout));
                }
            }
            if cfg.security.report_stderr {
                if let Some(stderr) = run.stderr_excerpt.as_deref().filter(|s| !s.is_empty()) {
                    let _ = writeln!(html, "<p>stderr:</p><pre>{}</pre>", escape(stderr));
                }
            }
        }
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
