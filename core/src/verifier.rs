//! Output verification: builtin comparators plus a name-keyed registry.

use std::{collections::HashMap, fs, io, path::Path, sync::Arc};

/// Correctness decision for one run's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Correct,
    Wrong { detail: String },
    /// Output that cannot even be parsed the way the verifier expects.
    FormatError { detail: String },
}

/// Per-problem verification knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerifyContext {
    pub abs_tol: f64,
    pub rel_tol: f64,
}

impl Default for VerifyContext {
    fn default() -> Self {
        Self {
            abs_tol: crate::config::DEFAULT_FLOAT_ABS_TOL,
            rel_tol: crate::config::DEFAULT_FLOAT_REL_TOL,
        }
    }
}

/// Compares an actual output file against the expected answer file.
/// Implementations read each file once and must not mutate either.
pub trait Verifier: Send + Sync {
    fn verify(&self, expected: &Path, actual: &Path, ctx: &VerifyContext) -> io::Result<Verdict>;
}

#[derive(Clone, Default)]
pub struct VerifierRegistry {
    verifiers: HashMap<String, Arc<dyn Verifier>>,
}

impl VerifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut reg = Self::new();
        reg.register("exact_bytes", Arc::new(ExactBytes));
        reg.register("integer_sequence", Arc::new(IntegerSequence));
        reg.register("float_sequence", Arc::new(FloatSequence));
        reg.register("word_sequence", Arc::new(WordSequence));
        reg
    }

    pub fn register(&mut self, name: impl Into<String>, verifier: Arc<dyn Verifier>) {
        self.verifiers.insert(name.into(), verifier);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Verifier>> {
        self.verifiers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.verifiers.keys().map(String::as_str).collect();
        names.sort();
        names
    }
}

/// Byte-for-byte comparison after normalizing trailing newlines.
pub struct ExactBytes;

impl Verifier for ExactBytes {
    fn verify(&self, expected: &Path, actual: &Path, _ctx: &VerifyContext) -> io::Result<Verdict> {
        let expected = normalize_tail(fs::read(expected)?);
        let actual = normalize_tail(fs::read(actual)?);
        if expected == actual {
            return Ok(Verdict::Correct);
        }
        let pos = expected
            .iter()
            .zip(actual.iter())
            .position(|(e, a)| e != a)
            .unwrap_or_else(|| expected.len().min(actual.len()));
        Ok(Verdict::Wrong {
            detail: format!("Output differs from the expected answer at byte {}", pos),
        })
    }
}

fn normalize_tail(mut bytes: Vec<u8>) -> Vec<u8> {
    while matches!(bytes.last(), Some(b'\n') | Some(b'\r')) {
        bytes.pop();
    }
    bytes
}

/// Whitespace-separated integer tokens; arbitrary precision via digit-string
/// normalization so long-arithmetic answers compare exactly.
pub struct IntegerSequence;

impl Verifier for IntegerSequence {
    fn verify(&self, expected: &Path, actual: &Path, _ctx: &VerifyContext) -> io::Result<Verdict> {
        verify_token_sequence(expected, actual, |exp_tok, act_tok| {
            let Some(exp) = parse_integer(exp_tok) else {
                return TokenCheck::MalformedExpected;
            };
            let Some(act) = parse_integer(act_tok) else {
                return TokenCheck::MalformedActual;
            };
            TokenCheck::matched(exp == act)
        })
    }
}

/// Whitespace-separated finite numbers, compared with a combined
/// absolute/relative tolerance.
pub struct FloatSequence;

impl Verifier for FloatSequence {
    fn verify(&self, expected: &Path, actual: &Path, ctx: &VerifyContext) -> io::Result<Verdict> {
        let (abs_tol, rel_tol) = (ctx.abs_tol, ctx.rel_tol);
        verify_token_sequence(expected, actual, move |exp_tok, act_tok| {
            let exp = exp_tok.parse::<f64>().ok().filter(|x| x.is_finite());
            let Some(exp) = exp else {
                return TokenCheck::MalformedExpected;
            };
            let act = act_tok.parse::<f64>().ok().filter(|x| x.is_finite());
            let Some(act) = act else {
                return TokenCheck::MalformedActual;
            };
            let tol = abs_tol.max(rel_tol * exp.abs());
            TokenCheck::matched((act - exp).abs() <= tol)
        })
    }
}

/// Whitespace-separated tokens compared as case-sensitive strings.
pub struct WordSequence;

impl Verifier for WordSequence {
    fn verify(&self, expected: &Path, actual: &Path, _ctx: &VerifyContext) -> io::Result<Verdict> {
        verify_token_sequence(expected, actual, |exp_tok, act_tok| {
            TokenCheck::matched(exp_tok == act_tok)
        })
    }
}

enum TokenCheck {
    Match,
    Mismatch,
    MalformedExpected,
    MalformedActual,
}

impl TokenCheck {
    fn matched(ok: bool) -> Self {
        if ok {
            TokenCheck::Match
        } else {
            TokenCheck::Mismatch
        }
    }
}

fn verify_token_sequence(
    expected: &Path,
    actual: &Path,
    check: impl Fn(&str, &str) -> TokenCheck,
) -> io::Result<Verdict> {
    let expected = fs::read_to_string(expected)?;
    let actual = fs::read_to_string(actual)?;
    let expected: Vec<&str> = expected.split_whitespace().collect();
    let actual: Vec<&str> = actual.split_whitespace().collect();

    for (i, &exp_tok) in expected.iter().enumerate() {
        let Some(&act_tok) = actual.get(i) else {
            return Ok(Verdict::Wrong {
                detail: format!("Expected: \"{}\", but the output ended", exp_tok),
            });
        };
        match check(exp_tok, act_tok) {
            TokenCheck::Match => {}
            TokenCheck::Mismatch => {
                return Ok(Verdict::Wrong {
                    detail: format!("Expected: \"{}\", Actual: \"{}\"", exp_tok, act_tok),
                });
            }
            TokenCheck::MalformedExpected => {
                return Ok(Verdict::FormatError {
                    detail: format!("Malformed token \"{}\" in the expected answer", exp_tok),
                });
            }
            TokenCheck::MalformedActual => {
                return Ok(Verdict::FormatError {
                    detail: format!("Malformed token \"{}\" in the output", act_tok),
                });
            }
        }
    }

    if actual.len() > expected.len() {
        return Ok(Verdict::FormatError {
            detail: "The output contained more tokens than required".to_owned(),
        });
    }
    Ok(Verdict::Correct)
}

/// Normalize an integer token to (sign, digits without leading zeros).
/// Returns `None` for anything that is not a plain base-10 integer.
fn parse_integer(tok: &str) -> Option<(bool, &str)> {
    let (negative, digits) = match tok.as_bytes() {
        [b'-', ..] => (true, &tok[1..]),
        [b'+', ..] => (false, &tok[1..]),
        _ => (false, tok),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let stripped = digits.trim_start_matches('0');
    if stripped.is_empty() {
        // All zeros: -0 == +0 == 0.
        return Some((false, ""));
    }
    Some((negative, stripped))
}
