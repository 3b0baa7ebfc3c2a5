//! The closed result model: status codes, result variants, scoring rules.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Local};

use crate::{compile::BuildArtifact, run::RunOutcome};

/// Short report-visible status of a test run. The textual form of each
/// variant is a stable external contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum StatusCode {
    OK,
    WA,
    OF,
    TLE,
    RE,
    CE,
    IE,
    SKIP,
    MA,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    ExitCode(i32),
    Signal(i32),
}

/// Final outcome of one (solution, testcase) pair.
#[derive(Debug, Clone, PartialEq)]
pub enum TestResult {
    CorrectAnswer { score: u32 },
    WrongAnswer { detail: String },
    OutputFormatError { detail: String },
    TimeLimitExceeded { limit: Duration },
    RuntimeError { kind: RuntimeErrorKind },
    CompilationError { output: String },
    InternalError { detail: String },
    Skipped { reason: String },
    MissingAnswer,
}

impl TestResult {
    pub fn status_code(&self) -> StatusCode {
        use TestResult::*;
        match self {
            CorrectAnswer { .. } => StatusCode::OK,
            WrongAnswer { .. } => StatusCode::WA,
            OutputFormatError { .. } => StatusCode::OF,
            TimeLimitExceeded { .. } => StatusCode::TLE,
            RuntimeError { .. } => StatusCode::RE,
            CompilationError { .. } => StatusCode::CE,
            InternalError { .. } => StatusCode::IE,
            Skipped { .. } => StatusCode::SKIP,
            MissingAnswer => StatusCode::MA,
        }
    }

    pub fn status(&self) -> &'static str {
        use TestResult::*;
        match self {
            CorrectAnswer { .. } => "Correct Answer",
            WrongAnswer { .. } => "Wrong Answer",
            OutputFormatError { .. } => "Output Format Error",
            TimeLimitExceeded { .. } => "Time Limit Exceeded",
            RuntimeError { .. } => "Runtime Error",
            CompilationError { .. } => "Compilation Error",
            InternalError { .. } => "Judge Internal Error",
            Skipped { .. } => "Skipped",
            MissingAnswer => "Missing Answer",
        }
    }

    /// `CorrectAnswer` carries the testcase score, everything else scores 0.
    pub fn score(&self) -> u32 {
        match self {
            TestResult::CorrectAnswer { score } => *score,
            _ => 0,
        }
    }

    pub fn is_correct(&self) -> bool {
        matches!(self, TestResult::CorrectAnswer { .. })
    }

    pub fn detail(&self) -> Option<String> {
        use TestResult::*;
        match self {
            CorrectAnswer { .. } => None,
            WrongAnswer { detail } | OutputFormatError { detail } | InternalError { detail } => {
                Some(detail.clone())
            }
            TimeLimitExceeded { limit } => Some(format!(
                "Execution time exceeded the limit of {:.2} seconds",
                limit.as_secs_f64()
            )),
            RuntimeError { kind } => Some(match kind {
                RuntimeErrorKind::ExitCode(code) => format!("Process exited with code {}", code),
                RuntimeErrorKind::Signal(sig) => format!("Process killed by signal {}", sig),
            }),
            CompilationError { output } => Some(output.clone()),
            Skipped { reason } => Some(reason.clone()),
            MissingAnswer => None,
        }
    }
}

/// Record of a single judged (solution, testcase) pair.
#[derive(Debug, Clone)]
pub struct TestRun {
    pub problem: String,
    pub author: String,
    pub testcase: String,
    pub language: Option<String>,
    pub judge_started_at: DateTime<Local>,
    pub judge_finished_at: DateTime<Local>,
    pub build: Option<Arc<BuildArtifact>>,
    pub run: Option<RunOutcome>,
    /// Head of the captured streams, kept so reports never re-read files
    /// from the (short-lived) scratch directory.
    pub stdout_excerpt: Option<String>,
    pub stderr_excerpt: Option<String>,
    pub result: TestResult,
}

impl TestRun {
    /// Whole-pipeline time for this pair, including build on cache miss.
    pub fn judge_elapsed_ms(&self) -> i64 {
        (self.judge_finished_at - self.judge_started_at)
            .num_milliseconds()
            .max(0)
    }

    /// Subprocess-only time, when the pair got as far as running.
    pub fn lean_elapsed_ms(&self) -> Option<u64> {
        self.run.as_ref().map(|r| r.lean_elapsed_ms)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn status_codes_are_stable() {
        let cases = [
            (TestResult::CorrectAnswer { score: 1 }, "OK"),
            (
                TestResult::WrongAnswer {
                    detail: String::new(),
                },
                "WA",
            ),
            (
                TestResult::OutputFormatError {
                    detail: String::new(),
                },
                "OF",
            ),
            (
                TestResult::TimeLimitExceeded {
                    limit: Duration::from_secs(4),
                },
                "TLE",
            ),
            (
                TestResult::RuntimeError {
                    kind: RuntimeErrorKind::ExitCode(1),
                },
                "RE",
            ),
            (
                TestResult::CompilationError {
                    output: String::new(),
                },
                "CE",
            ),
            (
                TestResult::InternalError {
                    detail: String::new(),
                },
                "IE",
            ),
            (
                TestResult::Skipped {
                    reason: String::new(),
                },
                "SKIP",
            ),
            (TestResult::MissingAnswer, "MA"),
        ];
        for (result, code) in cases {
            assert_eq!(result.status_code().to_string(), code);
        }
    }

    #[test]
    fn only_correct_answer_scores() {
        assert_eq!(TestResult::CorrectAnswer { score: 25 }.score(), 25);
        assert_eq!(
            TestResult::WrongAnswer {
                detail: "x".into()
            }
            .score(),
            0
        );
        assert_eq!(TestResult::MissingAnswer.score(), 0);
        assert!(TestResult::CorrectAnswer { score: 0 }.is_correct());
        assert!(!TestResult::MissingAnswer.is_correct());
    }

    #[test]
    fn timeout_detail_mentions_the_limit() {
        let r = TestResult::TimeLimitExceeded {
            limit: Duration::from_millis(2500),
        };
        assert_eq!(
            r.detail().unwrap(),
            "Execution time exceeded the limit of 2.50 seconds"
        );
    }
}
