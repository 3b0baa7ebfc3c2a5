//! Brace-template interpolation for compile/run recipes.
//!
//! `{name}` expands to the bound variable, `{{` and `}}` are literal braces.

use std::{borrow::Borrow, collections::HashMap, ffi::OsStr, hash::Hash};

pub type Result = std::result::Result<String, InterpError>;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum InterpError {
    #[error("Undefined variable '{0}' at {} (fmt={2})", .1+1)]
    UndefinedVar(String, usize, String),

    #[error("Unclosed brace (found open brace at {}, fmt={1})", .0+1)]
    UnclosedBrace(usize, String),
}

pub fn interp<K, V>(fmt: &str, variables: &HashMap<K, V>) -> Result
where
    K: Borrow<str> + Hash + Eq,
    V: AsRef<OsStr>,
{
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum State {
        Normal,
        OpenBrace,
        InsideBrace,
        CloseBrace,
    }
    use State::*;

    let mut state = Normal;
    let mut pos_open_brace = 0;
    let mut res = String::with_capacity(fmt.len() * 3);
    let mut var_name = String::with_capacity(32);

    for (i, c) in fmt.chars().enumerate() {
        state = match (c, state) {
            ('{', Normal) => {
                pos_open_brace = i;
                var_name.clear();
                OpenBrace
            }
            ('{', OpenBrace) => {
                res.push('{');
                Normal
            }
            ('}', OpenBrace | InsideBrace) => {
                let Some(value) = variables.get(&var_name) else {
                    return Err(InterpError::UndefinedVar(
                        var_name,
                        pos_open_brace + 1,
                        fmt.to_owned(),
                    ));
                };
                res += value.as_ref().to_string_lossy().as_ref();
                Normal
            }
            (_, OpenBrace | InsideBrace) => {
                var_name.push(c);
                InsideBrace
            }
            ('}', Normal) => CloseBrace,
            ('}', CloseBrace) => {
                res.push('}');
                Normal
            }
            (_, CloseBrace) => {
                res.push('}');
                if c == '{' {
                    pos_open_brace = i;
                    var_name.clear();
                    OpenBrace
                } else {
                    res.push(c);
                    Normal
                }
            }
            (_, Normal) => {
                res.push(c);
                Normal
            }
        };
    }

    match state {
        OpenBrace | InsideBrace => Err(InterpError::UnclosedBrace(pos_open_brace, fmt.to_owned())),
        CloseBrace => {
            res.push('}');
            res.shrink_to_fit();
            Ok(res)
        }
        Normal => {
            res.shrink_to_fit();
            Ok(res)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn interp_ok() {
        let vars = {
            let mut m = HashMap::new();
            m.insert("source", "main.cpp");
            m.insert("artifact", "prog");
            m.insert("memory_mb", "512");
            m
        };

        assert_eq!(interp("hello", &vars).unwrap(), "hello");
        assert_eq!(interp("{source}", &vars).unwrap(), vars["source"]);
        assert_eq!(
            interp("{source}{artifact}", &vars).unwrap(),
            format!("{}{}", vars["source"], vars["artifact"])
        );
        assert_eq!(
            interp("g++ -O3 {source} -o {artifact}", &vars).unwrap(),
            "g++ -O3 main.cpp -o prog"
        );
        assert_eq!(
            interp("java -Xmx{memory_mb}m Main", &vars).unwrap(),
            "java -Xmx512m Main"
        );
        assert_eq!(interp("a {{b}} c", &vars).unwrap(), "a {b} c");
        assert_eq!(interp("{{", &vars).unwrap(), "{");
        assert_eq!(interp("}}", &vars).unwrap(), "}");
        assert_eq!(interp("lone } brace", &vars).unwrap(), "lone } brace");
        assert_eq!(interp("end }", &vars).unwrap(), "end }");
    }

    #[test]
    fn interp_ng() {
        let vars = {
            let mut m = HashMap::new();
            m.insert("artifact", "prog");
            m
        };
        let fmt = "{artifact} {input}";
        assert_eq!(
            interp(fmt, &vars).unwrap_err(),
            InterpError::UndefinedVar("input".to_owned(), 12, fmt.to_owned())
        );
        let fmt = "{artifact} {oops";
        assert_eq!(
            interp(fmt, &vars).unwrap_err(),
            InterpError::UnclosedBrace(11, fmt.to_owned()),
        );
    }
}
