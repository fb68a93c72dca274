//! The GDA textual writer (§4.E): renders a [`GDSProgram`] as indented
//! source text, the inverse of [`crate::text::parser::parse`].

use std::fmt::Write as _;
use std::path::Path;

use crate::model::{GDSConditionToken, GDSElement, GDSFlow, GDSInvocation, GDSJumpAddress, LoopCondition};
use crate::schema::value::ValueType;
use crate::text::doc;

const INDENT: &str = "    ";

/// Context used to expand a command's doc-comment template (§4.G). `eventid`
/// should already be extracted from the file's workdir-relative path; the
/// writer doesn't know paths, only text.
pub struct WriteOptions<'a> {
    pub lang: &'a str,
    pub eventid: Option<&'a str>,
    pub workdir: Option<&'a Path>,
    pub omit_file_contents: bool,
}

impl Default for WriteOptions<'_> {
    fn default() -> Self {
        WriteOptions { lang: "en", eventid: None, workdir: None, omit_file_contents: false }
    }
}

pub fn write(elements: &[GDSElement]) -> String {
    write_with(elements, &WriteOptions::default())
}

pub fn write_with(elements: &[GDSElement], opts: &WriteOptions) -> String {
    let mut out = String::new();
    write_block(&mut out, elements, 0, opts);
    out
}

fn write_block(out: &mut String, elements: &[GDSElement], depth: usize, opts: &WriteOptions) {
    for elem in elements {
        write_element(out, elem, depth, opts);
    }
}

fn pad(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
}

fn write_element(out: &mut String, elem: &GDSElement, depth: usize, opts: &WriteOptions) {
    match elem {
        GDSElement::Label(label) => {
            pad(out, depth);
            let bang = if label.present { "" } else { "!" };
            match label.loc {
                Some(loc) => {
                    let _ = writeln!(out, "@{bang}{}({loc})", label.name);
                }
                None => {
                    let _ = writeln!(out, "@{bang}{}", label.name);
                }
            }
        }
        GDSElement::Break => {
            pad(out, depth);
            out.push_str("break\n");
        }
        GDSElement::Command(inv) => write_invocation(out, inv, depth, opts),
    }
}

fn write_invocation(out: &mut String, inv: &GDSInvocation, depth: usize, opts: &WriteOptions) {
    match inv.flow.as_deref() {
        None => {
            write_doc_comment(out, inv, depth, opts);
            pad(out, depth);
            out.push_str(&format_call(inv));
            out.push('\n');
        }
        Some(GDSFlow::If { condition, target, block, elseif, elze }) => {
            pad(out, depth);
            if *elze {
                out.push_str("else:");
            } else {
                let keyword = if *elseif { "elif" } else { "if" };
                let _ = write!(out, "{keyword} {}:", format_condition(condition));
            }
            write_flow_body(out, target, block, depth, opts);
        }
        Some(GDSFlow::Loop { condition, target, block }) => {
            pad(out, depth);
            match condition {
                LoopCondition::While(tokens) => {
                    let _ = write!(out, "while {}:", format_condition(tokens));
                }
                LoopCondition::RepeatN(n) => {
                    let _ = write!(out, "repeatN({n}):");
                }
            }
            write_flow_body(out, target, block, depth, opts);
        }
    }
}

/// Renders the tail of an `if`/`elif`/`else`/`while`/`repeatN` header: a
/// direct `@label` forward target on the same line when the jump never got
/// folded into a block (a backward branch or a multiply-referenced label),
/// or a nested block on the following lines.
fn write_flow_body(
    out: &mut String,
    target: &Option<GDSJumpAddress>,
    block: &Option<Vec<GDSElement>>,
    depth: usize,
    opts: &WriteOptions,
) {
    match (target, block) {
        (Some(addr), None) => {
            let _ = writeln!(out, " @{}", addr.label);
        }
        _ => {
            out.push('\n');
            write_block(out, block.as_deref().unwrap_or(&[]), depth + 1, opts);
        }
    }
}

/// Expands a simple invocation's command's doc template (if it has one) into
/// a block comment above the line (§4.E/§4.G). Expansion failures (an
/// unknown variable, say) are treated as "no comment" rather than aborting
/// the whole write.
fn write_doc_comment(out: &mut String, inv: &GDSInvocation, depth: usize, opts: &WriteOptions) {
    let Some(template) = inv.command.desc.as_deref() else {
        return;
    };
    let vars = doc_vars(inv, opts);
    let Ok(comment) = doc::expand(template, &vars, opts.workdir, opts.omit_file_contents) else {
        return;
    };
    if comment.trim().is_empty() {
        return;
    }
    for line in comment.lines() {
        pad(out, depth);
        out.push_str("# ");
        out.push_str(line);
        out.push('\n');
    }
}

/// Extracts the numeric event id from a workdir-relative path matching
/// `data/script/event/e<digits>.gd[as]` (§4.G), or `None` if it doesn't.
pub fn eventid_from_path(path: &str) -> Option<String> {
    let normalized = path.replace('\\', "/");
    if !normalized.contains("data/script/event/") {
        return None;
    }
    let file_name = normalized.rsplit('/').next()?;
    let stem = file_name.strip_prefix('e')?;
    let digits = stem.strip_suffix(".gda").or_else(|| stem.strip_suffix(".gds"))?;
    if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
        Some(digits.to_string())
    } else {
        None
    }
}

fn doc_vars(inv: &GDSInvocation, opts: &WriteOptions) -> doc::Vars {
    let mut vars = doc::Vars::new();
    vars.insert("lang".to_string(), opts.lang.to_string());
    if let Some(eventid) = opts.eventid {
        vars.insert("eventid".to_string(), eventid.to_string());
    }
    for (i, (param, value)) in inv.command.params.iter().zip(inv.args.iter()).enumerate() {
        if let Some(v) = value {
            if let Ok(vtype) = ValueType::parse(&param.type_descriptor) {
                vars.insert((i + 1).to_string(), vtype.format(v));
            }
        }
    }
    vars
}

/// Renders a condition's flat token list (§3 `GDSCondition token`) as the
/// literal `not`/`and`/`or` keywords and command calls, in stream order —
/// the game evaluates these left to right with no operator precedence, so
/// the text mirrors the token sequence exactly rather than inferring infix
/// grouping.
fn format_condition(tokens: &[GDSConditionToken]) -> String {
    tokens
        .iter()
        .map(|tok| match tok {
            GDSConditionToken::Not => "not".to_string(),
            GDSConditionToken::And => "and".to_string(),
            GDSConditionToken::Or => "or".to_string(),
            GDSConditionToken::Command(inv) => format_call(inv),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn format_call(inv: &GDSInvocation) -> String {
    let args: Vec<String> = inv
        .command
        .params
        .iter()
        .zip(inv.args.iter())
        .map(|(param, value)| match value {
            None => String::new(),
            Some(v) => ValueType::parse(&param.type_descriptor)
                .map(|vt| vt.format(v))
                .unwrap_or_default(),
        })
        .collect();
    format!("{}({})", inv.command.name, args.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::command::{Command, CommandParam};

    #[test]
    fn writes_simple_call() {
        let cmd = Command {
            id: 1,
            name: "foo".to_string(),
            aliases: Vec::new(),
            desc: None,
            uncertain: false,
            condition: false,
            context: vec!["all".to_string()],
            params: vec![CommandParam {
                name: "n".to_string(),
                type_descriptor: "int".to_string(),
                desc: None,
                uncertain: false,
                optional: false,
            }],
            complex: None,
            file: None,
        };
        let inv = GDSInvocation {
            command: cmd,
            args: vec![Some(crate::model::GDSValue::Int(crate::model::GDSIntValue {
                value: 3,
                bytelen: 4,
                unsigned: false,
                lit_fmt: crate::model::IntLiteralFormat::Dec,
            }))],
            flow: None,
        };
        let text = write(&[GDSElement::Command(inv)]);
        assert_eq!(text, "foo(3)\n");
    }

    #[test]
    fn extracts_eventid_from_path() {
        assert_eq!(eventid_from_path("data/script/event/e49.gds"), Some("49".to_string()));
        assert_eq!(eventid_from_path("data/script/rooms/room4_param.gds"), None);
        assert_eq!(eventid_from_path("data/script/event/e49.gda"), Some("49".to_string()));
    }

    #[test]
    fn expands_doc_comment_above_call() {
        let cmd = Command {
            id: 1,
            name: "give_gold".to_string(),
            aliases: Vec::new(),
            desc: Some("gives $1 gold to the player".to_string()),
            uncertain: false,
            condition: false,
            context: vec!["all".to_string()],
            params: vec![CommandParam {
                name: "n".to_string(),
                type_descriptor: "int".to_string(),
                desc: None,
                uncertain: false,
                optional: false,
            }],
            complex: None,
            file: None,
        };
        let inv = GDSInvocation {
            command: cmd,
            args: vec![Some(crate::model::GDSValue::Int(crate::model::GDSIntValue {
                value: 50,
                bytelen: 4,
                unsigned: false,
                lit_fmt: crate::model::IntLiteralFormat::Dec,
            }))],
            flow: None,
        };
        let text = write(&[GDSElement::Command(inv)]);
        assert_eq!(text, "# gives 50 gold to the player\ngive_gold(50)\n");
    }
}
