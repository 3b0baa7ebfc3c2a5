//! Problem tree discovery.
//!
//! Expected layout under the problem root:
//!
//! ```text
//! <problem_root>/<problem>/
//!   solutions/<author>/...source files...
//!   testcases/NN.in
//!   answers/NN.out
//!   problem.toml          (optional per-problem overrides)
//! ```

use std::path::{Path, PathBuf};

use anyhow::ensure;

use crate::config::{EffectiveConfig, GraderConfig, ProblemOverrides};
use crate::lang::{Classification, LanguageRegistry};

pub const REFERENCE_AUTHOR: &str = "_reference";

pub const SOLUTIONS_DIR: &str = "solutions";
pub const TESTCASES_DIR: &str = "testcases";
pub const ANSWERS_DIR: &str = "answers";

/// Extensions that never count as source files.
const EXCLUDED_EXTENSIONS: &[&str] = &["sh", "in", "out"];

#[derive(Debug, Clone, Default)]
pub struct Inventory {
    pub problems: Vec<Problem>,
}

#[derive(Debug, Clone)]
pub struct Problem {
    pub name: String,
    pub root_dir: PathBuf,
    pub config: EffectiveConfig,
    pub testcases: Vec<Testcase>,
    pub solutions: Vec<Solution>,
    pub reference: Option<Solution>,
}

#[derive(Debug, Clone)]
pub struct Testcase {
    /// Basename without the `.in` extension, e.g. `01`.
    pub name: String,
    pub input_path: PathBuf,
    pub answer_path: PathBuf,
    pub score: u32,
    pub has_answer: bool,
}

#[derive(Debug, Clone)]
pub struct Solution {
    pub author: String,
    pub root_dir: PathBuf,
    pub files: Vec<PathBuf>,
    pub source: SolutionSource,
}

#[derive(Debug, Clone)]
pub enum SolutionSource {
    Ready { language: String, entry: PathBuf },
    Ambiguous { languages: Vec<String> },
    Unknown,
    NoEntry { language: String },
}

impl Solution {
    pub fn language_id(&self) -> Option<&str> {
        match &self.source {
            SolutionSource::Ready { language, .. } | SolutionSource::NoEntry { language } => {
                Some(language)
            }
            _ => None,
        }
    }

    /// Why this solution cannot be judged, if it cannot.
    pub fn skip_reason(&self) -> Option<String> {
        match &self.source {
            SolutionSource::Ready { .. } => None,
            SolutionSource::Ambiguous { languages } => Some(format!(
                "mixed-language solution ({})",
                languages.join(", ")
            )),
            SolutionSource::Unknown => Some("no recognizable source files".to_owned()),
            SolutionSource::NoEntry { language } => {
                Some(format!("cannot determine entry file ({})", language))
            }
        }
    }
}

/// Walk the problem root and build the inventory. Problems, authors and
/// testcases come out in lexicographic order so reports are stable.
pub fn discover(
    problem_root: impl AsRef<Path>,
    cfg: &GraderConfig,
    registry: &LanguageRegistry,
) -> anyhow::Result<Inventory> {
    let problem_root = problem_root.as_ref();
    ensure!(
        problem_root.is_dir(),
        "Problem root is not a directory: {:?}",
        problem_root
    );

    let mut problems = Vec::new();
    for problem_dir in fsutil::immediate_subdirs(problem_root)? {
        if !problem_dir.join(SOLUTIONS_DIR).is_dir() || !problem_dir.join(TESTCASES_DIR).is_dir() {
            log::warn!(
                "Skipping {:?}: missing '{}' or '{}' subdir",
                problem_dir,
                SOLUTIONS_DIR,
                TESTCASES_DIR
            );
            continue;
        }
        problems.push(discover_problem(&problem_dir, cfg, registry)?);
    }

    Ok(Inventory { problems })
}

fn discover_problem(
    problem_dir: &Path,
    cfg: &GraderConfig,
    registry: &LanguageRegistry,
) -> anyhow::Result<Problem> {
    let name = problem_dir
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let overrides_path = problem_dir.join(ProblemOverrides::FILENAME);
    let overrides = if overrides_path.is_file() {
        ProblemOverrides::from_toml_file(&overrides_path)?
    } else {
        ProblemOverrides::default()
    };
    let config = cfg.effective(&overrides);

    let testcases = discover_testcases(problem_dir, &config)?;
    let (solutions, reference) = discover_solutions(problem_dir, &name, registry)?;

    Ok(Problem {
        name,
        root_dir: problem_dir.to_owned(),
        config,
        testcases,
        solutions,
        reference,
    })
}

fn discover_testcases(problem_dir: &Path, config: &EffectiveConfig) -> anyhow::Result<Vec<Testcase>> {
    let testcase_dir = problem_dir.join(TESTCASES_DIR);
    let answers_dir = problem_dir.join(ANSWERS_DIR);

    let mut res = Vec::new();
    for input_path in fsutil::files_with_extension(&testcase_dir, "in")? {
        let name = input_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let answer_path = answers_dir.join(format!("{}.out", name));
        let has_answer = answer_path.is_file();
        if !has_answer {
            log::warn!("No expected answer for testcase {:?}", input_path);
        }
        res.push(Testcase {
            score: config.testcase_score(&name),
            name,
            input_path,
            answer_path,
            has_answer,
        });
    }
    Ok(res)
}

fn discover_solutions(
    problem_dir: &Path,
    problem_name: &str,
    registry: &LanguageRegistry,
) -> anyhow::Result<(Vec<Solution>, Option<Solution>)> {
    let solutions_root = problem_dir.join(SOLUTIONS_DIR);

    let mut solutions = Vec::new();
    let mut reference = None;
    for author_dir in fsutil::immediate_subdirs(&solutions_root)? {
        let author = author_dir
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let solution = discover_solution(&author_dir, author, problem_name, registry)?;
        if solution.author == REFERENCE_AUTHOR {
            reference = Some(solution);
        } else if solution.author.starts_with('_') {
            log::warn!("Skipping reserved author dir {:?}", author_dir);
        } else {
            solutions.push(solution);
        }
    }
    Ok((solutions, reference))
}

fn discover_solution(
    author_dir: &Path,
    author: String,
    problem_name: &str,
    registry: &LanguageRegistry,
) -> anyhow::Result<Solution> {
    let files: Vec<PathBuf> = fsutil::files_recursively(author_dir)?
        .into_iter()
        .filter(|path| {
            path.extension()
                .and_then(|x| x.to_str())
                .map(|x| !EXCLUDED_EXTENSIONS.contains(&x))
                .unwrap_or(false)
        })
        .collect();

    let source = match registry.classify(&files) {
        Classification::Unique(lang) => {
            // The entry is chosen over the full file list; the pick must
            // then actually be a source file of the detected language.
            let entry = select_entry_file(&files, problem_name)
                .filter(|f| registry.detect(f).map(|l| l.id == lang.id).unwrap_or(false));
            match entry {
                Some(entry) => SolutionSource::Ready {
                    language: lang.id.clone(),
                    entry,
                },
                None => SolutionSource::NoEntry {
                    language: lang.id.clone(),
                },
            }
        }
        Classification::Ambiguous(languages) => SolutionSource::Ambiguous { languages },
        Classification::Unknown => SolutionSource::Unknown,
    };

    Ok(Solution {
        author,
        root_dir: author_dir.to_owned(),
        files,
        source,
    })
}

/// A single source file is the entry; otherwise prefer a file named after
/// the problem, then one named `main` or `program`.
fn select_entry_file(sources: &[PathBuf], problem_name: &str) -> Option<PathBuf> {
    if let [only] = sources {
        return Some(only.clone());
    }
    let stem_of = |path: &PathBuf| {
        path.file_stem()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    };
    let problem_name = problem_name.to_lowercase();
    sources
        .iter()
        .find(|f| stem_of(f) == problem_name)
        .or_else(|| {
            sources
                .iter()
                .find(|f| matches!(stem_of(f).as_str(), "main" | "program"))
        })
        .cloned()
}
