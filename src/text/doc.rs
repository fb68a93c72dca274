//! Doc-comment template expansion (§4.G).
//!
//! A doc comment attached to a command may carry a template string with
//! `${name}` substitutions (and `$(path)` for splicing a relative file's
//! contents, `$$` for a literal dollar sign). `name` may carry a modifier
//! after a colon: `rS` snaps a numeric value down to the nearest multiple of
//! `S`, `rS<=M` does the same but caps the result at `M`, and `0W` zero-pads
//! to width `W`.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone)]
pub enum Error {
    UnknownVariable(String),
    BadModifier(String),
    Unterminated,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnknownVariable(name) => write!(f, "unknown template variable {name:?}"),
            Error::BadModifier(m) => write!(f, "invalid template modifier {m:?}"),
            Error::Unterminated => write!(f, "unterminated ${{...}} in template"),
        }
    }
}

impl std::error::Error for Error {}

/// The values a template's `${name}` placeholders resolve against. Numeric
/// variables are stored pre-formatted as decimal text so `expand` can apply
/// modifiers uniformly.
pub type Vars = HashMap<String, String>;

/// Expands `template` against `vars`. `$(path)` splices the contents of
/// `path` relative to `workdir`, but only when a workdir is configured and
/// `omit_file_contents` is `false`; otherwise `$(path)` expands to nothing.
/// A missing file expands to the literal `<FILE NOT FOUND>`.
pub fn expand(
    template: &str,
    vars: &Vars,
    workdir: Option<&Path>,
    omit_file_contents: bool,
) -> Result<String, Error> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('$') => {
                chars.next();
                out.push('$');
            }
            Some('(') => {
                chars.next();
                let frag = take_until(&mut chars, ')')?;
                out.push_str(&splice_path(workdir, omit_file_contents, &frag));
            }
            Some('{') => {
                chars.next();
                let expr = take_until(&mut chars, '}')?;
                out.push_str(&resolve(&expr, vars)?);
            }
            Some(d) if d.is_ascii_digit() => {
                let mut num = String::new();
                while let Some(d2) = chars.peek() {
                    if d2.is_ascii_digit() {
                        num.push(*d2);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(vars.get(&num).map(String::as_str).unwrap_or("?"));
            }
            _ => out.push('$'),
        }
    }
    Ok(out)
}

fn take_until(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    end: char,
) -> Result<String, Error> {
    let mut s = String::new();
    for c in chars.by_ref() {
        if c == end {
            return Ok(s);
        }
        s.push(c);
    }
    Err(Error::Unterminated)
}

fn splice_path(workdir: Option<&Path>, omit_file_contents: bool, fragment: &str) -> String {
    let Some(workdir) = workdir else {
        return String::new();
    };
    if omit_file_contents {
        return String::new();
    }
    match fs::read_to_string(workdir.join(fragment)) {
        Ok(contents) => contents,
        Err(_) => "<FILE NOT FOUND>".to_string(),
    }
}

fn resolve(expr: &str, vars: &Vars) -> Result<String, Error> {
    let (name, modifier) = match expr.split_once(':') {
        Some((n, m)) => (n, Some(m)),
        None => (expr, None),
    };
    let raw = vars
        .get(name)
        .ok_or_else(|| Error::UnknownVariable(name.to_string()))?;
    match modifier {
        None => Ok(raw.clone()),
        Some(m) => apply_modifier(raw, m),
    }
}

fn apply_modifier(raw: &str, modifier: &str) -> Result<String, Error> {
    if let Some(width) = modifier.strip_prefix('0') {
        let width: usize = width
            .parse()
            .map_err(|_| Error::BadModifier(modifier.to_string()))?;
        return Ok(format!("{raw:0>width$}"));
    }
    if let Some(rest) = modifier.strip_prefix('r') {
        let bad = || Error::BadModifier(modifier.to_string());
        let value: f64 = raw.parse().map_err(|_| bad())?;
        if let Some((step, max)) = rest.split_once("<=") {
            let step: f64 = step.parse().map_err(|_| bad())?;
            let max: f64 = max.parse().map_err(|_| bad())?;
            return Ok(format_number(snap_down(value, step).min(max)));
        }
        let step: f64 = rest.parse().map_err(|_| bad())?;
        return Ok(format_number(snap_down(value, step)));
    }
    Err(Error::BadModifier(modifier.to_string()))
}

/// Snaps `value` down to the nearest multiple of `step` (floor division).
fn snap_down(value: f64, step: f64) -> f64 {
    if step == 0.0 {
        return value;
    }
    (value / step).floor() * step
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn expands_plain_variable() {
        let mut vars = Vars::new();
        vars.insert("eventid".to_string(), "42".to_string());
        assert_eq!(expand("event ${eventid}", &vars, None, false).unwrap(), "event 42");
    }

    #[test]
    fn expands_path_splice() {
        let vars = Vars::new();
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), "hello from file").unwrap();
        assert_eq!(
            expand("$(notes.txt)", &vars, Some(dir.path()), false).unwrap(),
            "hello from file"
        );
        assert_eq!(
            expand("$(missing.txt)", &vars, Some(dir.path()), false).unwrap(),
            "<FILE NOT FOUND>"
        );
        assert_eq!(expand("$(notes.txt)", &vars, None, false).unwrap(), "");
        assert_eq!(expand("$(notes.txt)", &vars, Some(dir.path()), true).unwrap(), "");
    }

    #[test]
    fn expands_literal_dollar() {
        let vars = Vars::new();
        assert_eq!(expand("cost: $$5", &vars, None, false).unwrap(), "cost: $5");
    }

    #[test]
    fn zero_pads() {
        let mut vars = Vars::new();
        vars.insert("n".to_string(), "7".to_string());
        assert_eq!(expand("${n:03}", &vars, None, false).unwrap(), "007");
    }

    #[test]
    fn snaps_down_to_nearest_multiple() {
        let mut vars = Vars::new();
        vars.insert("v".to_string(), "37".to_string());
        assert_eq!(expand("${v:r10}", &vars, None, false).unwrap(), "30");
    }

    #[test]
    fn resolves_positional_arguments() {
        let mut vars = Vars::new();
        vars.insert("1".to_string(), "sword".to_string());
        assert_eq!(expand("wield $1", &vars, None, false).unwrap(), "wield sword");
        assert_eq!(expand("wield $2", &vars, None, false).unwrap(), "wield ?");
    }

    #[test]
    fn snap_caps_at_max() {
        let mut vars = Vars::new();
        vars.insert("v".to_string(), "999".to_string());
        assert_eq!(expand("${v:r10<=50}", &vars, None, false).unwrap(), "50");
    }
}
