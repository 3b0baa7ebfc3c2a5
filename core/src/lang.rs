//! Catalog of supported languages with their compile/run recipes.
//!
//! Recipes are declarative templates interpolated by [`crate::str_interp`]
//! over the variables `{source}`, `{source_dir}`, `{artifact}`,
//! `{artifact_dir}`, `{artifact_stem}`, `{input_file}`, `{output_file}` and
//! `{memory_mb}`. Registering a new language means adding one descriptor.

use std::{process::Stdio, time::Duration};

use glob::Pattern;
use tokio::process::Command;

#[derive(Debug, Clone)]
pub struct Language {
    pub id: String,
    pub file_pattern: Pattern,
    pub compile_recipe: Option<String>,
    pub run_recipe: String,
    pub default_time_limit: Duration,
    pub version_probe: String,
}

impl Language {
    fn new(
        id: &str,
        file_pattern: &str,
        compile_recipe: Option<&str>,
        run_recipe: &str,
        default_time_limit_secs: f64,
        version_probe: &str,
    ) -> Self {
        Self {
            id: id.to_owned(),
            file_pattern: Pattern::new(file_pattern).expect("invalid builtin file pattern"),
            compile_recipe: compile_recipe.map(str::to_owned),
            run_recipe: run_recipe.to_owned(),
            default_time_limit: Duration::from_secs_f64(default_time_limit_secs),
            version_probe: version_probe.to_owned(),
        }
    }

    pub fn is_compiled(&self) -> bool {
        self.compile_recipe.is_some()
    }
}

#[derive(Debug, Clone)]
pub enum Classification<'a> {
    Unique(&'a Language),
    Ambiguous(Vec<String>),
    Unknown,
}

/// Result of probing one language's toolchain.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolchainProbe {
    pub language: String,
    pub command: String,
    pub version: Option<String>,
    pub ok: bool,
}

#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    languages: Vec<Language>,
}

impl LanguageRegistry {
    const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(languages: Vec<Language>) -> Self {
        Self { languages }
    }

    pub fn builtin() -> Self {
        Self::new(vec![
            Language::new(
                "c",
                "*.c",
                Some("gcc --std=c99 -O2 {source} -o {artifact}"),
                "{artifact}",
                4.0,
                "gcc --version",
            ),
            Language::new(
                "cpp",
                "*.cpp",
                Some("g++ -std=c++11 -O3 {source} -o {artifact}"),
                "{artifact}",
                4.0,
                "g++ --version",
            ),
            Language::new(
                "csharp",
                "*.cs",
                Some("mcs -optimize+ -out:{artifact} {source}"),
                "mono {artifact}",
                6.0,
                "mono --version",
            ),
            Language::new(
                "java",
                "*.java",
                Some("javac -d {artifact_dir} {source}"),
                "java -Xmx{memory_mb}m -cp {artifact_dir} {artifact_stem}",
                8.0,
                "java -version",
            ),
            Language::new(
                "javascript",
                "*.js",
                None,
                "node {artifact}",
                20.0,
                "node --version",
            ),
            Language::new(
                "python",
                "*.py",
                None,
                "python3 {artifact}",
                20.0,
                "python3 --version",
            ),
            Language::new(
                "ruby",
                "*.rb",
                None,
                "ruby {artifact}",
                20.0,
                "ruby --version",
            ),
        ])
    }

    pub fn languages(&self) -> &[Language] {
        &self.languages
    }

    pub fn get(&self, id: &str) -> Option<&Language> {
        self.languages.iter().find(|lang| lang.id == id)
    }

    /// Detect the language of a single source file by extension pattern.
    pub fn detect(&self, path: impl AsRef<std::path::Path>) -> Option<&Language> {
        let file_name = path.as_ref().file_name()?.to_str()?;
        self.languages
            .iter()
            .find(|lang| lang.file_pattern.matches(file_name))
    }

    /// Classify a set of source files: the unique language covering every
    /// classifiable file, ambiguous when several languages are present,
    /// unknown when none matches.
    pub fn classify<'a, P>(&self, files: impl IntoIterator<Item = P>) -> Classification<'_>
    where
        P: AsRef<std::path::Path>,
    {
        let mut seen: Vec<&Language> = Vec::new();
        for file in files {
            if let Some(lang) = self.detect(file.as_ref()) {
                if !seen.iter().any(|l| l.id == lang.id) {
                    seen.push(lang);
                }
            }
        }
        match seen.len() {
            0 => Classification::Unknown,
            1 => Classification::Unique(seen[0]),
            _ => {
                let mut ids: Vec<String> = seen.iter().map(|l| l.id.clone()).collect();
                ids.sort();
                Classification::Ambiguous(ids)
            }
        }
    }

    /// Probe every registered toolchain by running its version command.
    pub async fn available(&self) -> Vec<ToolchainProbe> {
        let mut res = Vec::with_capacity(self.languages.len());
        for lang in &self.languages {
            res.push(Self::probe(lang).await);
        }
        res
    }

    async fn probe(lang: &Language) -> ToolchainProbe {
        let output = tokio::time::timeout(
            Self::PROBE_TIMEOUT,
            Command::new("/bin/sh")
                .args(["-c", &lang.version_probe])
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output(),
        )
        .await;

        let (ok, version) = match output {
            Ok(Ok(out)) => {
                // Some runtimes (notably `java -version`) report on stderr.
                let mut text = String::from_utf8_lossy(&out.stdout).into_owned();
                text.push_str(&String::from_utf8_lossy(&out.stderr));
                let first_line = text
                    .lines()
                    .map(str::trim)
                    .find(|line| !line.is_empty())
                    .map(str::to_owned);
                (out.status.success(), first_line)
            }
            _ => (false, None),
        };

        ToolchainProbe {
            language: lang.id.clone(),
            command: lang.version_probe.clone(),
            version,
            ok,
        }
    }
}
