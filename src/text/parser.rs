//! The GDA textual parser (§4.F): a line-oriented lexer feeding a
//! recursive-descent grammar over indentation-delimited blocks.

use std::collections::HashMap;
use std::fmt;

use crate::error::UnresolvedLabelError;
use crate::model::{
    GDSConditionToken, GDSElement, GDSFlow, GDSInvocation, GDSJumpAddress, GDSLabel, GDSProgram,
    LabelRef, LoopCondition,
};
use crate::schema::command::Registry;
use crate::schema::value::{self, ValueType};

#[derive(Debug, Clone)]
pub enum Error {
    Value(value::Error),
    UnknownCommand(String),
    Expected { wanted: &'static str, line: usize, found: String },
    BadIndent { line: usize },
    UnresolvedLabel(UnresolvedLabelError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Value(e) => write!(f, "{e}"),
            Error::UnknownCommand(name) => write!(f, "unknown command {name:?}"),
            Error::Expected { wanted, line, found } => {
                write!(f, "line {line}: expected {wanted}, found {found:?}")
            }
            Error::BadIndent { line } => write!(f, "line {line}: inconsistent indentation"),
            Error::UnresolvedLabel(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<value::Error> for Error {
    fn from(e: value::Error) -> Self {
        Error::Value(e)
    }
}

impl From<UnresolvedLabelError> for Error {
    fn from(e: UnresolvedLabelError) -> Self {
        Error::UnresolvedLabel(e)
    }
}

struct Line {
    indent: usize,
    text: String,
    number: usize,
}

fn split_lines(source: &str) -> Vec<Line> {
    let mut out = Vec::new();
    for (i, raw) in source.lines().enumerate() {
        let trimmed = raw.trim_end();
        if trimmed.trim().is_empty() || trimmed.trim_start().starts_with('#') {
            continue;
        }
        let indent = trimmed.len() - trimmed.trim_start().len();
        out.push(Line { indent, text: trimmed.trim_start().to_string(), number: i + 1 });
    }
    out
}

pub fn parse(source: &str, registry: &Registry) -> Result<GDSProgram, Error> {
    let lines = split_lines(source);
    let mut pos = 0;
    let base_indent = lines.first().map(|l| l.indent).unwrap_or(0);
    let elements = parse_block(&lines, &mut pos, base_indent, registry)?;
    let labels = collect_labels(&elements)?;
    let mut program = GDSProgram::new();
    program.elements = elements;
    program.labels = labels;
    Ok(program)
}

/// Walks the parsed element tree (§4.F "Label collection") and builds the
/// name -> references map every [`GDSProgram`] carries. Only un-foldable
/// `if`/`while`/`repeatN` forms (those written with an explicit `@label`
/// tail rather than a nested block) and explicit `@label` elements touch
/// this map; a structurally nested block has no target to resolve.
fn collect_labels(elements: &[GDSElement]) -> Result<HashMap<String, Vec<LabelRef>>, Error> {
    let mut labels: HashMap<String, Vec<LabelRef>> = HashMap::new();
    walk_labels(elements, &mut labels);

    for (name, refs) in &labels {
        let present_count = refs
            .iter()
            .filter(|r| matches!(r, LabelRef::Definition(d) if d.present))
            .count();
        if present_count > 1 {
            return Err(UnresolvedLabelError {
                label: name.clone(),
                reason: "defined more than once as a physically present label",
            }
            .into());
        }
        let has_def = refs.iter().any(|r| matches!(r, LabelRef::Definition(_)));
        let has_use = refs.iter().any(|r| matches!(r, LabelRef::Use(_)));
        if has_use && !has_def {
            return Err(UnresolvedLabelError {
                label: name.clone(),
                reason: "referenced but never defined",
            }
            .into());
        }
    }
    Ok(labels)
}

fn walk_labels(elements: &[GDSElement], labels: &mut HashMap<String, Vec<LabelRef>>) {
    for elem in elements {
        match elem {
            GDSElement::Label(label) => {
                labels.entry(label.name.clone()).or_default().push(LabelRef::Definition(label.clone()));
            }
            GDSElement::Command(inv) => {
                if let Some(flow) = &inv.flow {
                    let (target, block) = flow_target_block(flow);
                    if let Some(addr) = target {
                        labels.entry(addr.label.clone()).or_default().push(LabelRef::Use(addr.clone()));
                    }
                    if let Some(body) = block {
                        walk_labels(body, labels);
                    }
                }
            }
            GDSElement::Break => {}
        }
    }
}

fn flow_target_block(flow: &GDSFlow) -> (&Option<GDSJumpAddress>, &Option<Vec<GDSElement>>) {
    match flow {
        GDSFlow::If { target, block, .. } => (target, block),
        GDSFlow::Loop { target, block, .. } => (target, block),
    }
}

fn parse_block(
    lines: &[Line],
    pos: &mut usize,
    indent: usize,
    registry: &Registry,
) -> Result<Vec<GDSElement>, Error> {
    let mut out = Vec::new();
    while *pos < lines.len() {
        let line = &lines[*pos];
        if line.indent < indent {
            break;
        }
        if line.indent > indent {
            return Err(Error::BadIndent { line: line.number });
        }
        out.push(parse_statement(lines, pos, indent, registry)?);
    }
    Ok(out)
}

fn parse_statement(
    lines: &[Line],
    pos: &mut usize,
    indent: usize,
    registry: &Registry,
) -> Result<GDSElement, Error> {
    let line = &lines[*pos];
    let text = line.text.clone();

    if let Some(rest) = text.strip_prefix('@') {
        *pos += 1;
        return parse_label(rest, line.number);
    }
    if text == "break" {
        *pos += 1;
        return Ok(GDSElement::Break);
    }
    if let Some(rest) = text.strip_prefix("if ") {
        return parse_if(lines, pos, indent, registry, rest, false);
    }
    if let Some(rest) = text.strip_prefix("while ") {
        return parse_while(lines, pos, indent, registry, rest);
    }
    if let Some(rest) = text.strip_prefix("repeatN(") {
        return parse_repeat(lines, pos, indent, registry, rest);
    }
    *pos += 1;
    Ok(GDSElement::Command(parse_invocation(&text, registry)?))
}

/// Parses a label body after the leading `@` is consumed: `["!"] name
/// ["(" addrlit ")"]`.
fn parse_label(rest: &str, line: usize) -> Result<GDSElement, Error> {
    let (present, rest) = match rest.strip_prefix('!') {
        Some(r) => (false, r),
        None => (true, rest),
    };
    let (name, loc) = match rest.strip_suffix(')').and_then(|r| {
        let open = r.rfind('(')?;
        Some((&r[..open], &r[open + 1..]))
    }) {
        Some((name, loc_src)) => {
            let loc: u32 = loc_src
                .parse()
                .map_err(|_| Error::Expected { wanted: "integer", line, found: loc_src.to_string() })?;
            (name, Some(loc))
        }
        None => (rest, None),
    };
    if !is_ident(name) {
        return Err(Error::Expected { wanted: "label name", line, found: name.to_string() });
    }
    Ok(GDSElement::Label(GDSLabel { name: name.to_string(), present, loc }))
}

/// Parses an `addr` reference (`["!"]` is accepted but not meaningful for a
/// use site; only a label *definition* tracks presence).
fn parse_addr(text: &str, line: usize) -> Result<GDSJumpAddress, Error> {
    let rest = text
        .strip_prefix('@')
        .ok_or_else(|| Error::Expected { wanted: "'@'", line, found: text.to_string() })?;
    let rest = rest.strip_prefix('!').unwrap_or(rest);
    if !is_ident(rest) {
        return Err(Error::Expected { wanted: "label name", line, found: rest.to_string() });
    }
    Ok(GDSJumpAddress { label: rest.to_string(), primary: false })
}

/// Splits a header line at its first top-level `:` (outside parens/quotes),
/// returning the text before it and whatever trails it (empty when the body
/// is a block on following lines, or an `@label` addr on this same line).
fn split_header(s: &str) -> Option<(&str, &str)> {
    let bytes = s.as_bytes();
    let mut depth = 0i32;
    let mut in_quote: Option<u8> = None;
    for (i, &b) in bytes.iter().enumerate() {
        match (b, in_quote) {
            (q, None) if q == b'"' || q == b'\'' => in_quote = Some(q),
            (q, Some(active)) if q == active => in_quote = None,
            (b'(', None) => depth += 1,
            (b')', None) => depth -= 1,
            (b':', None) if depth == 0 => return Some((&s[..i], s[i + 1..].trim())),
            _ => {}
        }
    }
    None
}

fn parse_if(
    lines: &[Line],
    pos: &mut usize,
    indent: usize,
    registry: &Registry,
    header_rest: &str,
    elseif: bool,
) -> Result<GDSElement, Error> {
    let (cond_src, tail) = split_header(header_rest)
        .ok_or_else(|| Error::Expected { wanted: "':'", line: lines[*pos].number, found: header_rest.to_string() })?;
    let line_no = lines[*pos].number;
    *pos += 1;
    let condition = parse_condition(cond_src, registry)?;

    let mut flow = if tail.is_empty() {
        let block = parse_block(lines, pos, indent + 1, registry)?;
        GDSFlow::If { condition, target: None, block: Some(block), elseif, elze: false }
    } else {
        let target = parse_addr(tail, line_no)?;
        GDSFlow::If { condition, target: Some(target), block: None, elseif, elze: false }
    };

    // Textual elif/else chaining only applies to a structurally-nested `if`
    // (its own jump folded into a block); an `if` left in address-style
    // (unfoldable backward/multi-reference jump) has no block to chain onto,
    // so any following `elif`/`else` lines are parsed as sibling statements.
    let chainable = matches!(flow, GDSFlow::If { block: Some(_), .. });
    if chainable && *pos < lines.len() && lines[*pos].indent == indent {
        if let Some(rest) = lines[*pos].text.strip_prefix("elif ") {
            let rest = rest.to_string();
            let elif_elem = parse_if(lines, pos, indent, registry, &rest, true)?;
            if let GDSElement::Command(inv) = elif_elem {
                return Ok(GDSElement::Command(GDSInvocation {
                    command: if_command(registry),
                    args: Vec::new(),
                    flow: Some(Box::new(chain_if(flow, inv))),
                }));
            }
        } else if let Some(else_rest) = lines[*pos].text.strip_prefix("else") {
            if let Some((empty, tail)) = split_header(else_rest) {
                if empty.trim().is_empty() {
                    let line_no = lines[*pos].number;
                    *pos += 1;
                    let else_flow = if tail.is_empty() {
                        let else_block = parse_block(lines, pos, indent + 1, registry)?;
                        GDSFlow::If { condition: Vec::new(), target: None, block: Some(else_block), elseif: false, elze: true }
                    } else {
                        let target = parse_addr(tail, line_no)?;
                        GDSFlow::If { condition: Vec::new(), target: Some(target), block: None, elseif: false, elze: true }
                    };
                    flow = match flow {
                        GDSFlow::If { condition, target, block, elseif, .. } => {
                            let mut elements = block.unwrap_or_default();
                            elements.push(GDSElement::Command(GDSInvocation {
                                command: else_command(registry),
                                args: Vec::new(),
                                flow: Some(Box::new(else_flow)),
                            }));
                            GDSFlow::If { condition, target, block: Some(elements), elseif }
                        }
                        other => other,
                    };
                }
            }
        }
    }

    Ok(GDSElement::Command(GDSInvocation {
        command: if_command(registry),
        args: Vec::new(),
        flow: Some(Box::new(flow)),
    }))
}

/// Folds a trailing `elif` chain into the parent `if`'s block as a single
/// nested command, mirroring how the binary reader represents `elif` as a
/// plain `if` placed at the tail of the preceding branch's block.
fn chain_if(parent: GDSFlow, elif_inv: GDSInvocation) -> GDSFlow {
    match parent {
        GDSFlow::If { condition, target, block, elseif, elze } => {
            let mut elements = block.unwrap_or_default();
            elements.push(GDSElement::Command(elif_inv));
            GDSFlow::If { condition, target, block: Some(elements), elseif, elze }
        }
        other => other,
    }
}

fn parse_while(
    lines: &[Line],
    pos: &mut usize,
    indent: usize,
    registry: &Registry,
    header_rest: &str,
) -> Result<GDSElement, Error> {
    let (cond_src, tail) = split_header(header_rest)
        .ok_or_else(|| Error::Expected { wanted: "':'", line: lines[*pos].number, found: header_rest.to_string() })?;
    let line_no = lines[*pos].number;
    *pos += 1;
    let condition = parse_condition(cond_src, registry)?;
    let (target, block) = if tail.is_empty() {
        (None, Some(parse_block(lines, pos, indent + 1, registry)?))
    } else {
        (Some(parse_addr(tail, line_no)?), None)
    };
    Ok(GDSElement::Command(GDSInvocation {
        command: while_command(registry),
        args: Vec::new(),
        flow: Some(Box::new(GDSFlow::Loop {
            condition: LoopCondition::While(condition),
            target,
            block,
        })),
    }))
}

fn parse_repeat(
    lines: &[Line],
    pos: &mut usize,
    indent: usize,
    registry: &Registry,
    header_rest: &str,
) -> Result<GDSElement, Error> {
    let close = header_rest.find(')').ok_or_else(|| Error::Expected {
        wanted: "')'",
        line: lines[*pos].number,
        found: header_rest.to_string(),
    })?;
    let n_src = &header_rest[..close];
    let n: u32 = n_src
        .parse()
        .map_err(|_| Error::Expected { wanted: "integer", line: lines[*pos].number, found: n_src.to_string() })?;
    let (_, tail) = split_header(&header_rest[close + 1..])
        .ok_or_else(|| Error::Expected { wanted: "':'", line: lines[*pos].number, found: header_rest.to_string() })?;
    let line_no = lines[*pos].number;
    *pos += 1;
    let (target, block) = if tail.is_empty() {
        (None, Some(parse_block(lines, pos, indent + 1, registry)?))
    } else {
        (Some(parse_addr(tail, line_no)?), None)
    };
    Ok(GDSElement::Command(GDSInvocation {
        command: repeat_command(registry),
        args: Vec::new(),
        flow: Some(Box::new(GDSFlow::Loop {
            condition: LoopCondition::RepeatN(n),
            target,
            block,
        })),
    }))
}

fn if_command(registry: &Registry) -> crate::schema::command::Command {
    find_complex(registry, crate::schema::command::Complex::If)
}
fn else_command(registry: &Registry) -> crate::schema::command::Command {
    find_complex(registry, crate::schema::command::Complex::Else)
}
fn while_command(registry: &Registry) -> crate::schema::command::Command {
    find_complex(registry, crate::schema::command::Complex::While)
}
fn repeat_command(registry: &Registry) -> crate::schema::command::Command {
    find_complex(registry, crate::schema::command::Complex::RepeatN)
}

fn find_complex(
    registry: &Registry,
    which: crate::schema::command::Complex,
) -> crate::schema::command::Command {
    registry
        .iter()
        .find(|c| c.complex == Some(which))
        .cloned()
        .unwrap_or(crate::schema::command::Command {
            id: 0,
            name: format!("{which:?}"),
            aliases: Vec::new(),
            desc: None,
            uncertain: false,
            condition: false,
            context: vec!["all".to_string()],
            params: Vec::new(),
            complex: Some(which),
            file: None,
        })
}

/// Parses a flat condition token sequence (§3 `GDSCondition token`): zero or
/// more of the literal keywords `not`/`and`/`or`, or a command invocation,
/// in stream order (no operator precedence — it mirrors the binary decoder's
/// own flat read loop in `reader::read_condition`).
fn parse_condition(src: &str, registry: &Registry) -> Result<Vec<GDSConditionToken>, Error> {
    let mut out = Vec::new();
    for part in split_condition_words(src) {
        match part.as_str() {
            "not" => out.push(GDSConditionToken::Not),
            "and" => out.push(GDSConditionToken::And),
            "or" => out.push(GDSConditionToken::Or),
            other => out.push(GDSConditionToken::Command(parse_invocation(other, registry)?)),
        }
    }
    Ok(out)
}

/// Splits a condition's source on whitespace, treating parens and quotes as
/// opaque (an argument list's own internal commas/spaces never split here).
fn split_condition_words(src: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_quote: Option<char> = None;
    let mut current = String::new();
    for c in src.chars() {
        match (c, in_quote) {
            (q, None) if q == '"' || q == '\'' => { in_quote = Some(q); current.push(c); }
            (q, Some(active)) if q == active => { in_quote = None; current.push(c); }
            ('(', None) => { depth += 1; current.push(c); }
            (')', None) => { depth -= 1; current.push(c); }
            (c, None) if depth == 0 && c.is_whitespace() => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

fn is_ident(s: &str) -> bool {
    !s.is_empty()
        && s.chars().next().map(|c| c.is_alphabetic() || c == '_').unwrap_or(false)
        && s.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.')
}

fn parse_invocation(text: &str, registry: &Registry) -> Result<GDSInvocation, Error> {
    let open = text.find('(').ok_or_else(|| Error::Expected {
        wanted: "'('",
        line: 0,
        found: text.to_string(),
    })?;
    let name = &text[..open];
    let rest = text[open + 1..].strip_suffix(')').ok_or_else(|| Error::Expected {
        wanted: "')'",
        line: 0,
        found: text.to_string(),
    })?;
    let cmd = registry
        .by_name(name)
        .cloned()
        .ok_or_else(|| Error::UnknownCommand(name.to_string()))?;

    let arg_strs = split_args(rest);
    let mut args = Vec::with_capacity(cmd.params.len());
    for (param, arg_str) in cmd.params.iter().zip(arg_strs.iter()) {
        if arg_str.trim().is_empty() {
            args.push(None);
            continue;
        }
        let vtype = ValueType::parse(&param.type_descriptor)?;
        args.push(Some(vtype.parse_literal(arg_str.trim())?));
    }
    Ok(GDSInvocation { command: cmd, args, flow: None })
}

fn split_args(s: &str) -> Vec<String> {
    if s.trim().is_empty() {
        return Vec::new();
    }
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_quote: Option<char> = None;
    let mut current = String::new();
    for c in s.chars() {
        match (c, in_quote) {
            (q, None) if q == '"' || q == '\'' => {
                in_quote = Some(q);
                current.push(c);
            }
            (q, Some(active)) if q == active => {
                in_quote = None;
                current.push(c);
            }
            ('(', None) => { depth += 1; current.push(c); }
            (')', None) => { depth -= 1; current.push(c); }
            (',', None) if depth == 0 => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::command::{Command, Registry};

    fn test_registry() -> Registry {
        let cmds = vec![Command {
            id: 5,
            name: "set_flag".to_string(),
            aliases: Vec::new(),
            desc: None,
            uncertain: false,
            condition: false,
            context: vec!["all".to_string()],
            params: vec![crate::schema::command::CommandParam {
                name: "n".to_string(),
                type_descriptor: "int".to_string(),
                desc: None,
                uncertain: false,
                optional: false,
            }],
            complex: None,
            file: None,
        }];
        Registry::from_commands_for_test(cmds)
    }

    fn test_registry_with_if() -> Registry {
        let mut cmds = vec![Command {
            id: 5,
            name: "set_flag".to_string(),
            aliases: Vec::new(),
            desc: None,
            uncertain: false,
            condition: false,
            context: vec!["all".to_string()],
            params: vec![crate::schema::command::CommandParam {
                name: "n".to_string(),
                type_descriptor: "int".to_string(),
                desc: None,
                uncertain: false,
                optional: false,
            }],
            complex: None,
            file: None,
        }];
        cmds.push(Command {
            id: 0,
            name: "if".to_string(),
            aliases: Vec::new(),
            desc: None,
            uncertain: false,
            condition: false,
            context: vec!["all".to_string()],
            params: Vec::new(),
            complex: Some(crate::schema::command::Complex::If),
            file: None,
        });
        Registry::from_commands_for_test(cmds)
    }

    #[test]
    fn addr_style_if_resolves_against_a_later_label() {
        let reg = test_registry_with_if();
        let source = "if set_flag(1): @end\nset_flag(2)\n@end\n";
        let program = parse(source, &reg).unwrap();
        assert!(program.labels.contains_key("end"));
    }

    #[test]
    fn unresolved_label_reference_is_rejected() {
        let reg = test_registry_with_if();
        let source = "if set_flag(1): @nowhere\n";
        let err = parse(source, &reg).unwrap_err();
        assert!(matches!(err, Error::UnresolvedLabel(_)));
    }

    #[test]
    fn parses_simple_invocation() {
        let reg = test_registry();
        let program = parse("set_flag(3)\n", &reg).unwrap();
        assert_eq!(program.elements.len(), 1);
    }

    #[test]
    fn parses_label() {
        let reg = test_registry();
        let program = parse("@start\nset_flag(1)\n", &reg).unwrap();
        assert!(matches!(program.elements[0], GDSElement::Label(_)));
    }

    #[test]
    fn parses_synthetic_label_with_backpointer() {
        let reg = test_registry();
        let program = parse("@!loop_1(12)\nset_flag(1)\n", &reg).unwrap();
        match &program.elements[0] {
            GDSElement::Label(l) => {
                assert_eq!(l.name, "loop_1");
                assert!(!l.present);
                assert_eq!(l.loc, Some(12));
            }
            other => panic!("expected a label, got {other:?}"),
        }
    }

    #[test]
    fn parses_condition_keywords() {
        let reg = test_registry();
        let source = "if not set_flag(1) and set_flag(2):\n    set_flag(3)\n";
        let program = parse(source, &reg).unwrap();
        match &program.elements[0] {
            GDSElement::Command(inv) => {
                let flow = inv.flow.as_deref().unwrap();
                match flow {
                    GDSFlow::If { condition, .. } => {
                        assert_eq!(condition.len(), 4);
                        assert!(matches!(condition[0], GDSConditionToken::Not));
                        assert!(matches!(condition[2], GDSConditionToken::And));
                    }
                    other => panic!("expected If flow, got {other:?}"),
                }
            }
            other => panic!("expected a command, got {other:?}"),
        }
    }
}
