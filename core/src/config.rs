//! Grader configuration: the top-level `grader.toml` plus per-problem
//! `problem.toml` overrides, merged into a typed [`EffectiveConfig`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::result::Result as StdResult;
use std::time::Duration;

use ::anyhow::Context as _;
use ::serde::Deserialize;

use crate::lang::Language;

pub const DEFAULT_VERIFIER: &str = "exact_bytes";
pub const DEFAULT_FLOAT_ABS_TOL: f64 = 1e-6;
pub const DEFAULT_FLOAT_REL_TOL: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct GraderConfig {
    pub locations: LocationsConfig,
    pub security: SecurityConfig,
    pub runner: RunnerConfig,
    pub limits: LimitsConfig,
    pub reporting: ReportingConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LocationsConfig {
    pub problem_root: PathBuf,
    pub report_root: PathBuf,
    pub report_folder_template: String,
}

impl Default for LocationsConfig {
    fn default() -> Self {
        Self {
            problem_root: "problems".into(),
            report_root: "reports".into(),
            report_folder_template: "testrun-{dt}-{hostname}".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub report_stdout: bool,
    pub report_stderr: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            report_stdout: true,
            report_stderr: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub name: String,
    pub params: toml::Table,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            name: "subprocess".to_owned(),
            params: toml::Table::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Advisory memory limit in megabytes.
    pub memory: u64,
    pub time_limit_multiplier: f64,
    /// Per-language time limits in seconds, overriding language defaults.
    pub time: BTreeMap<String, f64>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            memory: 512,
            time_limit_multiplier: 1.0,
            time: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct ReportingConfig {
    pub alert_banner: String,
    pub warning_banner: String,
    pub info_banner: String,
}

impl GraderConfig {
    pub const FILENAME: &'static str = "grader.toml";

    pub fn from_toml(s: &str) -> StdResult<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn from_toml_file(filepath: impl AsRef<Path>) -> anyhow::Result<Self> {
        let filepath = filepath.as_ref();
        let toml = fsutil::read_to_string(filepath).context("Cannot read config file")?;
        let cfg = Self::from_toml(&toml)
            .with_context(|| format!("Invalid config TOML: {:?}", filepath))?;
        Ok(cfg)
    }

    /// Find the config file in ancestor dirs, including the current dir.
    pub fn find_file_in_ancestors(cur_dir: impl AsRef<Path>) -> anyhow::Result<PathBuf> {
        let cur_dir = cur_dir.as_ref();
        cur_dir
            .ancestors()
            .map(|dir| dir.join(Self::FILENAME))
            .find(|path| path.is_file())
            .with_context(|| format!("Cannot find '{}' in ancestor dirs", Self::FILENAME))
    }

    pub fn from_file_finding_in_ancestors(cur_dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let config_filepath = Self::find_file_in_ancestors(cur_dir)?;
        Self::from_toml_file(config_filepath)
    }

    /// Materialize the per-problem view of this config with the problem's
    /// overrides applied on top.
    pub fn effective(&self, overrides: &ProblemOverrides) -> EffectiveConfig {
        let mut time_limits = self.limits.time.clone();
        time_limits.extend(overrides.limits.time.clone());

        EffectiveConfig {
            verifier: overrides
                .verifier
                .clone()
                .unwrap_or_else(|| DEFAULT_VERIFIER.to_owned()),
            problem_input_file: overrides.problem_input_file.clone(),
            problem_output_file: overrides.problem_output_file.clone(),
            testcase_score: overrides.testcase_score.clone(),
            memory_mb: overrides.limits.memory.unwrap_or(self.limits.memory),
            time_limit_multiplier: overrides
                .limits
                .time_limit_multiplier
                .unwrap_or(self.limits.time_limit_multiplier),
            time_limits,
            float_abs_tol: overrides.float_abs_tol.unwrap_or(DEFAULT_FLOAT_ABS_TOL),
            float_rel_tol: overrides.float_rel_tol.unwrap_or(DEFAULT_FLOAT_REL_TOL),
            reference_failure_aborts: overrides.reference_failure_aborts.unwrap_or(false),
            report_stdout: self.security.report_stdout,
            report_stderr: self.security.report_stderr,
            runner_name: self.runner.name.clone(),
            runner_params: self.runner.params.clone(),
        }
    }
}

/// Optional per-problem overrides read from `problem.toml`.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct ProblemOverrides {
    pub verifier: Option<String>,
    /// When set, the testcase input is materialized under this name in the
    /// run directory instead of being piped to stdin.
    pub problem_input_file: Option<String>,
    /// When set, the solution is expected to write its answer to this file
    /// instead of stdout.
    pub problem_output_file: Option<String>,
    pub testcase_score: BTreeMap<String, u32>,
    pub limits: LimitsOverride,
    pub float_abs_tol: Option<f64>,
    pub float_rel_tol: Option<f64>,
    /// Whether a reference-solution build failure aborts the whole run
    /// instead of skipping the problem.
    pub reference_failure_aborts: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct LimitsOverride {
    pub memory: Option<u64>,
    pub time_limit_multiplier: Option<f64>,
    pub time: BTreeMap<String, f64>,
}

impl ProblemOverrides {
    pub const FILENAME: &'static str = "problem.toml";

    pub fn from_toml(s: &str) -> StdResult<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn from_toml_file(filepath: impl AsRef<Path>) -> anyhow::Result<Self> {
        let filepath = filepath.as_ref();
        let toml = fsutil::read_to_string(filepath).context("Cannot read problem config")?;
        let cfg = Self::from_toml(&toml)
            .with_context(|| format!("Invalid problem TOML: {:?}", filepath))?;
        Ok(cfg)
    }
}

/// Fully merged configuration one problem is judged under.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveConfig {
    pub verifier: String,
    pub problem_input_file: Option<String>,
    pub problem_output_file: Option<String>,
    pub testcase_score: BTreeMap<String, u32>,
    pub memory_mb: u64,
    pub time_limit_multiplier: f64,
    pub time_limits: BTreeMap<String, f64>,
    pub float_abs_tol: f64,
    pub float_rel_tol: f64,
    pub reference_failure_aborts: bool,
    pub report_stdout: bool,
    pub report_stderr: bool,
    pub runner_name: String,
    pub runner_params: toml::Table,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        GraderConfig::default().effective(&ProblemOverrides::default())
    }
}

impl EffectiveConfig {
    pub fn testcase_score(&self, testcase_name: &str) -> u32 {
        self.testcase_score
            .get(testcase_name)
            .copied()
            .unwrap_or(1)
    }

    /// Effective wall-clock limit: per-language base times the multiplier.
    pub fn time_limit_for(&self, lang: &Language) -> Duration {
        let base = self
            .time_limits
            .get(&lang.id)
            .map(|&secs| Duration::from_secs_f64(secs))
            .unwrap_or(lang.default_time_limit);
        base.mul_f64(self.time_limit_multiplier)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::lang::LanguageRegistry;

    const EXAMPLE_TOML: &str = r#"
[locations]
problem_root = "grader/problems"
report_root = "grader/reports"
report_folder_template = "testrun-{dt}-{hostname}"

[security]
report_stdout = true
report_stderr = false

[runner]
name = "subprocess"

[limits]
memory = 256
time_limit_multiplier = 1.5

[limits.time]
cpp = 2.0
python = 10.0

[reporting]
info_banner = "practice round"
"#;

    #[test]
    fn example_toml_should_be_parsable() {
        let cfg = GraderConfig::from_toml(EXAMPLE_TOML).unwrap();
        assert_eq!(cfg.locations.problem_root, PathBuf::from("grader/problems"));
        assert_eq!(cfg.locations.report_root, PathBuf::from("grader/reports"));
        assert!(cfg.security.report_stdout);
        assert!(!cfg.security.report_stderr);
        assert_eq!(cfg.runner.name, "subprocess");
        assert_eq!(cfg.limits.memory, 256);
        assert_eq!(cfg.limits.time_limit_multiplier, 1.5);
        assert_eq!(cfg.limits.time["cpp"], 2.0);
        assert_eq!(cfg.reporting.info_banner, "practice round");
        assert_eq!(cfg.reporting.alert_banner, "");
    }

    #[test]
    fn empty_toml_materializes_defaults() {
        let cfg = GraderConfig::from_toml("").unwrap();
        assert_eq!(cfg.limits.memory, 512);
        assert_eq!(cfg.limits.time_limit_multiplier, 1.0);
        assert_eq!(cfg.runner.name, "subprocess");
        assert!(cfg.security.report_stdout);
        assert_eq!(
            cfg.locations.report_folder_template,
            "testrun-{dt}-{hostname}"
        );
    }

    #[test]
    fn problem_overrides_take_precedence() {
        let cfg = GraderConfig::from_toml(EXAMPLE_TOML).unwrap();
        let overrides = ProblemOverrides::from_toml(
            r#"
verifier = "float_sequence"
problem_output_file = "hworld.out"
float_rel_tol = 1e-9

[testcase_score]
"03" = 5

[limits]
memory = 1024

[limits.time]
python = 30.0
"#,
        )
        .unwrap();

        let eff = cfg.effective(&overrides);
        assert_eq!(eff.verifier, "float_sequence");
        assert_eq!(eff.problem_output_file.as_deref(), Some("hworld.out"));
        assert_eq!(eff.memory_mb, 1024);
        assert_eq!(eff.float_rel_tol, 1e-9);
        assert_eq!(eff.float_abs_tol, DEFAULT_FLOAT_ABS_TOL);
        assert_eq!(eff.testcase_score("03"), 5);
        assert_eq!(eff.testcase_score("01"), 1);
        // Merged time table: problem override wins, others survive.
        assert_eq!(eff.time_limits["python"], 30.0);
        assert_eq!(eff.time_limits["cpp"], 2.0);
        assert!(!eff.report_stderr);
    }

    #[test]
    fn effective_defaults_without_overrides() {
        let eff = EffectiveConfig::default();
        assert_eq!(eff.verifier, DEFAULT_VERIFIER);
        assert_eq!(eff.testcase_score("anything"), 1);
        assert!(!eff.reference_failure_aborts);
    }

    #[test]
    fn time_limit_multiplier_scales_language_default() {
        let reg = LanguageRegistry::builtin();
        let cfg = GraderConfig::from_toml(EXAMPLE_TOML).unwrap();
        let eff = cfg.effective(&ProblemOverrides::default());

        // cpp: overridden base 2.0s x 1.5
        let cpp = reg.get("cpp").unwrap();
        assert_eq!(eff.time_limit_for(cpp), Duration::from_secs_f64(3.0));

        // java: language default 8s x 1.5
        let java = reg.get("java").unwrap();
        assert_eq!(eff.time_limit_for(java), Duration::from_secs_f64(12.0));
    }
}
