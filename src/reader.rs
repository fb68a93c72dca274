//! The binary reader: label resolution and control-flow reconstruction
//! (§4.D, §4.E).
//!
//! Reading happens in three passes. First, [`read_program`] walks the token
//! stream end to end, producing a flat [`GDSProgram`] where every `if`/
//! `while`/`repeatN` still points at an explicit [`GDSJumpAddress`] target
//! and no [`GDSElement::Label`] has been folded away. Second, [`name_labels`]
//! assigns names to every address in the label map and marks, for each, the
//! one reference that is "primary" (the reference whose position matches the
//! label's stored back-pointer payload). Third, [`fold_blocks`] turns
//! forward-only, singly-referenced label targets into nested blocks.

use std::collections::HashMap;
use std::fmt;

use crate::model::{
    GDSConditionToken, GDSContext, GDSElement, GDSFlow, GDSInvocation, GDSJumpAddress, GDSLabel,
    GDSProgram, LabelRef, LoopCondition,
};
use crate::schema::command::{Command, Complex, Registry};
use crate::schema::value::{self, ValueType};
use crate::token::{self, Tag, TokenValue};

#[derive(Debug, Clone)]
pub enum Error {
    Token(token::Error),
    Value(value::Error),
    UnknownCommand(u16),
    ExpectedAddress,
    Unresolved(String),
    EofBeforeAddress(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Token(e) => write!(f, "{e}"),
            Error::Value(e) => write!(f, "{e}"),
            Error::UnknownCommand(id) => write!(f, "no command definition for id {id:#06x}"),
            Error::ExpectedAddress => write!(f, "expected a jump address token"),
            Error::Unresolved(label) => write!(f, "label {label:?} never resolved"),
            Error::EofBeforeAddress(ctx) => {
                write!(f, "{ctx}: encountered EOF looking for jump address")
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<token::Error> for Error {
    fn from(e: token::Error) -> Self {
        Error::Token(e)
    }
}

impl From<value::Error> for Error {
    fn from(e: value::Error) -> Self {
        Error::Value(e)
    }
}

/// A label definition or use, still keyed by byte address rather than name.
#[derive(Debug, Default)]
struct LabelSlot {
    /// Byte offset of the definition token, if one is physically present.
    def_loc: Option<u32>,
    /// The back-pointer payload stored in the definition token, used to
    /// determine which use is primary.
    backptr: Option<u32>,
    /// Byte offsets (payload start) of every `saddr` use pointing here,
    /// together with the kind of complex command that produced the use
    /// (`"if"`, `"elif"`, `"else"`, `"loop"`), used to derive the label's name.
    uses: Vec<(u32, &'static str)>,
}

struct State<'r> {
    registry: &'r Registry,
    /// Keyed by the shared address space both `saddr` payloads and label
    /// definition offsets (+2) live in.
    labels: HashMap<u32, LabelSlot>,
    context: GDSContext,
}

/// Reads a whole GDS binary (including its 4-byte length prefix) into a
/// [`GDSProgram`].
pub fn read_program(data: &[u8], registry: &Registry) -> Result<GDSProgram, Error> {
    let body = if data.len() >= 4 { &data[4..] } else { &[][..] };
    let mut reader = token::Reader::new(body);
    let mut state = State { registry, labels: HashMap::new(), context: GDSContext::new() };

    let mut located = Vec::new();
    loop {
        let loc = reader.pos() as u32;
        match read_raw_element(&mut reader, &mut state)? {
            Some(raw) => located.push((loc, raw)),
            None => break,
        }
    }

    let label_names = name_labels(&state);
    let elements = build_elements(located, &label_names, &state);
    let elements = fold_blocks(elements, &label_names);

    let mut labels: HashMap<String, Vec<LabelRef>> = HashMap::new();
    for (key, slot) in &state.labels {
        let name = label_names.get(key).cloned().unwrap_or_else(|| format!("label_{key:x}"));
        let entry = labels.entry(name.clone()).or_default();
        entry.push(LabelRef::Definition(GDSLabel {
            name: name.clone(),
            present: slot.def_loc.is_some(),
            loc: slot.backptr.or(if slot.def_loc.is_none() { Some(*key) } else { None }),
        }));
        for (use_loc, _tag) in &slot.uses {
            let primary = slot.backptr == Some(*use_loc);
            entry.push(LabelRef::Use(GDSJumpAddress { label: name.clone(), primary }));
        }
    }

    Ok(GDSProgram {
        context: Some(state.context),
        path: None,
        elements,
        labels,
    })
}

/// A partially-read element: flow instructions keep their raw target key
/// until [`build_elements`] turns it into a named `GDSJumpAddress`.
enum RawElement {
    Command(GDSInvocation),
    LabelDef(u32),
    Break,
}

fn read_raw_element(reader: &mut token::Reader, state: &mut State) -> Result<Option<RawElement>, Error> {
    if reader.is_at_end() {
        return Ok(None);
    }
    let tok = reader.read_token()?;
    match tok.value {
        TokenValue::FileEnd => Ok(None),
        TokenValue::Break => Ok(Some(RawElement::Break)),
        TokenValue::TAddr(backptr) => {
            let key = tok.loc + 2;
            let slot = state.labels.entry(key).or_default();
            slot.def_loc = Some(tok.loc);
            slot.backptr = Some(backptr);
            Ok(Some(RawElement::LabelDef(key)))
        }
        TokenValue::Command(id) => {
            let inv = read_command(reader, state, id)?;
            Ok(Some(RawElement::Command(inv)))
        }
        other => Err(Error::Unresolved(format!(
            "unexpected top-level token {} at offset {}",
            other.kind_name(),
            tok.loc
        ))),
    }
}

fn read_command(reader: &mut token::Reader, state: &mut State, id: u16) -> Result<GDSInvocation, Error> {
    let cmd = state
        .registry
        .by_id(id)
        .cloned()
        .ok_or(Error::UnknownCommand(id))?;
    state.context.narrow(&cmd);

    match cmd.complex {
        Some(Complex::If) | Some(Complex::Elif) => {
            let use_tag = if cmd.complex == Some(Complex::Elif) { "elif" } else { "if" };
            let condition = read_condition(reader, state)?;
            let target_key = read_address_use(reader, state, use_tag)?;
            Ok(GDSInvocation {
                command: cmd.clone(),
                args: Vec::new(),
                flow: Some(Box::new(GDSFlow::If {
                    condition,
                    target: Some(raw_target(target_key)),
                    block: None,
                    elseif: cmd.complex == Some(Complex::Elif),
                    elze: false,
                })),
            })
        }
        Some(Complex::Else) => {
            let target_key = skip_to_address_use(reader, state, "else", false)?;
            Ok(GDSInvocation {
                command: cmd.clone(),
                args: Vec::new(),
                flow: Some(Box::new(GDSFlow::If {
                    condition: Vec::new(),
                    target: Some(raw_target(target_key)),
                    block: None,
                    elseif: false,
                    elze: true,
                })),
            })
        }
        Some(Complex::While) => {
            let condition = read_condition(reader, state)?;
            let target_key = read_address_use(reader, state, "loop")?;
            Ok(GDSInvocation {
                command: cmd.clone(),
                args: Vec::new(),
                flow: Some(Box::new(GDSFlow::Loop {
                    condition: LoopCondition::While(condition),
                    target: Some(raw_target(target_key)),
                    block: None,
                })),
            })
        }
        Some(Complex::RepeatN) => {
            let count_tok = reader.read_token()?;
            let n = match count_tok.value {
                TokenValue::Int(v) => v as u32,
                _ => return Err(Error::ExpectedAddress),
            };
            let target_key = skip_to_address_use(reader, state, "loop", true)?;
            Ok(GDSInvocation {
                command: cmd.clone(),
                args: Vec::new(),
                flow: Some(Box::new(GDSFlow::Loop {
                    condition: LoopCondition::RepeatN(n),
                    target: Some(raw_target(target_key)),
                    block: None,
                })),
            })
        }
        None => {
            let args = read_simple_params(reader, &cmd)?;
            Ok(GDSInvocation { command: cmd, args, flow: None })
        }
    }
}

/// Placeholder jump address carrying the raw address key in place of a name;
/// [`build_elements`] rewrites every one of these once names exist.
fn raw_target(key: u32) -> GDSJumpAddress {
    GDSJumpAddress { label: format!("\0raw:{key:x}"), primary: false }
}

fn read_address_use(
    reader: &mut token::Reader,
    state: &mut State,
    use_tag: &'static str,
) -> Result<u32, Error> {
    let tok = reader.read_token()?;
    match tok.value {
        TokenValue::SAddr(addr) => {
            let payload_start = tok.loc + 2;
            let slot = state.labels.entry(addr).or_default();
            slot.uses.push((payload_start, use_tag));
            Ok(addr)
        }
        _ => Err(Error::ExpectedAddress),
    }
}

/// Skips tokens until an `saddr` is found (§4.D.1's `else`/`repeatN`
/// readout, neither of which has a condition stream to bound the search).
/// When `stop_at_fileend` is set, hitting `fileend` first is a fatal error
/// rather than just another token to skip past (repeatN only).
fn skip_to_address_use(
    reader: &mut token::Reader,
    state: &mut State,
    use_tag: &'static str,
    stop_at_fileend: bool,
) -> Result<u32, Error> {
    loop {
        let tok = reader.read_token()?;
        match tok.value {
            TokenValue::SAddr(addr) => {
                let payload_start = tok.loc + 2;
                let slot = state.labels.entry(addr).or_default();
                slot.uses.push((payload_start, use_tag));
                return Ok(addr);
            }
            TokenValue::FileEnd if stop_at_fileend => {
                return Err(Error::EofBeforeAddress(use_tag));
            }
            _ => continue,
        }
    }
}

fn read_condition(reader: &mut token::Reader, state: &mut State) -> Result<Vec<GDSConditionToken>, Error> {
    let mut out = Vec::new();
    loop {
        let start = reader.pos();
        let tok = reader.read_token()?;
        match tok.value {
            TokenValue::Not => out.push(GDSConditionToken::Not),
            TokenValue::And => out.push(GDSConditionToken::And),
            TokenValue::Or => out.push(GDSConditionToken::Or),
            TokenValue::Command(id) => {
                let cmd = state
                    .registry
                    .by_id(id)
                    .cloned()
                    .ok_or(Error::UnknownCommand(id))?;
                let args = read_simple_params(reader, &cmd)?;
                out.push(GDSConditionToken::Command(GDSInvocation { command: cmd, args, flow: None }));
            }
            TokenValue::SAddr(_) => {
                // The terminating jump belongs to the caller; rewind so
                // `read_address_use` can read it again.
                reader.seek(start);
                break;
            }
            _ => return Err(Error::ExpectedAddress),
        }
    }
    Ok(out)
}

fn read_simple_params(reader: &mut token::Reader, cmd: &Command) -> Result<Vec<Option<crate::model::GDSValue>>, Error> {
    let mut args = Vec::with_capacity(cmd.params.len());
    for param in &cmd.params {
        let vtype = ValueType::parse(&param.type_descriptor)?;
        let checkpoint = reader.pos();
        let tok = reader.read_token()?;
        match vtype.from_token(&tok.value) {
            Ok(value) => args.push(Some(value)),
            Err(e) => {
                if param.optional {
                    reader.seek(checkpoint);
                    args.push(None);
                } else {
                    return Err(Error::Value(e));
                }
            }
        }
    }
    Ok(args)
}

/// Assigns a name to each distinct label address: `{prefix}{n}`, where
/// `prefix` is the `if_`/`elif_`/`else_`/`loop_` tag shared by every use
/// pointing at the address (empty if its uses disagree on kind, or if it has
/// none), and `n` is a counter kept per prefix.
fn name_labels(state: &State) -> HashMap<u32, String> {
    let mut names = HashMap::new();
    let mut keys: Vec<&u32> = state.labels.keys().collect();
    keys.sort();

    let mut counters: HashMap<String, u32> = HashMap::new();
    for key in keys {
        let slot = &state.labels[key];
        let prefix = common_use_tag(slot).map(|tag| format!("{tag}_")).unwrap_or_default();
        let counter = counters.entry(prefix.clone()).or_insert(0);
        *counter += 1;
        names.insert(*key, format!("{prefix}{counter}"));
    }
    names
}

/// The use tag shared by every reference to a label, or `None` if it has no
/// uses or its uses disagree.
fn common_use_tag(slot: &LabelSlot) -> Option<&'static str> {
    let mut tags = slot.uses.iter().map(|(_, tag)| *tag);
    let first = tags.next()?;
    if tags.all(|t| t == first) {
        Some(first)
    } else {
        None
    }
}

/// Turns the located raw element stream into the final [`GDSElement`] list:
/// resolves every flow's raw address key into its assigned name, fills in
/// each physically-present label's name/back-pointer, and — per §4.D.2 —
/// synthesizes a non-present [`GDSLabel`] for any address that has uses but
/// no `taddr` token of its own (a jump landing mid-stream at a position the
/// writer never bothered marking with a label word).
fn build_elements(
    located: Vec<(u32, RawElement)>,
    names: &HashMap<u32, String>,
    state: &State,
) -> Vec<GDSElement> {
    let mut converted: Vec<(u32, GDSElement)> = Vec::with_capacity(located.len());
    for (loc, raw) in located {
        let elem = match raw {
            RawElement::Command(mut inv) => {
                if let Some(flow) = &mut inv.flow {
                    resolve_flow_target(flow, names);
                }
                GDSElement::Command(inv)
            }
            RawElement::LabelDef(key) => {
                let name = names.get(&key).cloned().unwrap_or_default();
                let slot = &state.labels[&key];
                GDSElement::Label(GDSLabel { name, present: true, loc: slot.backptr })
            }
            RawElement::Break => GDSElement::Break,
        };
        converted.push((loc, elem));
    }

    // A synthetic label's hypothetical `taddr` token would span
    // `[key - 2, key + 4)`; it belongs immediately before the first real
    // element starting at or after that span's end.
    let mut synthetic: Vec<(u32, GDSElement)> = state
        .labels
        .iter()
        .filter(|(_, slot)| slot.def_loc.is_none())
        .map(|(&key, _)| {
            let name = names.get(&key).cloned().unwrap_or_default();
            (key + 4, GDSElement::Label(GDSLabel { name, present: false, loc: Some(key) }))
        })
        .collect();
    synthetic.sort_by_key(|(k, _)| *k);

    let mut out = Vec::with_capacity(converted.len() + synthetic.len());
    let mut syn_iter = synthetic.into_iter().peekable();
    for (loc, elem) in converted {
        while let Some(&(k, _)) = syn_iter.peek() {
            if k > loc {
                break;
            }
            out.push(syn_iter.next().unwrap().1);
        }
        out.push(elem);
    }
    for (_, elem) in syn_iter {
        out.push(elem);
    }
    out
}

fn resolve_flow_target(flow: &mut GDSFlow, names: &HashMap<u32, String>) {
    let target = match flow {
        GDSFlow::If { target, .. } => target,
        GDSFlow::Loop { target, .. } => target,
    };
    if let Some(addr) = target {
        if let Some(rest) = addr.label.strip_prefix("\0raw:") {
            if let Ok(key) = u32::from_str_radix(rest, 16) {
                if let Some(name) = names.get(&key) {
                    addr.label = name.clone();
                }
            }
        }
    }
}

/// Folds forward-only, singly-referenced label targets into nested blocks.
///
/// A flow element's target folds when: the target label occurs later in
/// `elements`, and that label has exactly one use in the whole program (so
/// folding it away loses no other jump). Everything between the flow element
/// and its label becomes the block body; the label element itself is
/// dropped from the flattened sequence (it still exists in the program's
/// label map, just with `present: false` semantics left to the writer to
/// re-synthesize).
pub fn fold_blocks(elements: Vec<GDSElement>, _names: &HashMap<u32, String>) -> Vec<GDSElement> {
    // Only physically-present labels are fold candidates: folding drops the
    // label element and trusts the writer to re-synthesize a fresh `taddr`
    // token for the block's end, which would wrongly add a token where the
    // original binary had none if the label was itself synthesized (§4.D.2).
    let mut label_index: HashMap<String, usize> = HashMap::new();
    for (i, e) in elements.iter().enumerate() {
        if let GDSElement::Label(l) = e {
            if l.present {
                label_index.insert(l.name.clone(), i);
            }
        }
    }
    let mut ref_count: HashMap<String, usize> = HashMap::new();
    for e in &elements {
        if let GDSElement::Command(inv) = e {
            if let Some(flow) = &inv.flow {
                let target = match flow.as_ref() {
                    GDSFlow::If { target, .. } => target,
                    GDSFlow::Loop { target, .. } => target,
                };
                if let Some(addr) = target {
                    *ref_count.entry(addr.label.clone()).or_insert(0) += 1;
                }
            }
        }
    }

    fold_range(&elements, 0, elements.len(), &label_index, &ref_count)
}

fn fold_range(
    elements: &[GDSElement],
    start: usize,
    end: usize,
    label_index: &HashMap<String, usize>,
    ref_count: &HashMap<String, usize>,
) -> Vec<GDSElement> {
    let mut out = Vec::new();
    let mut i = start;
    while i < end {
        match &elements[i] {
            GDSElement::Command(inv) if inv.flow.is_some() => {
                let flow = inv.flow.as_ref().unwrap();
                let target_label = match flow.as_ref() {
                    GDSFlow::If { target, .. } => target.clone(),
                    GDSFlow::Loop { target, .. } => target.clone(),
                };
                let foldable = target_label.as_ref().and_then(|addr| {
                    let target_idx = *label_index.get(&addr.label)?;
                    let refs = *ref_count.get(&addr.label).unwrap_or(&0);
                    if target_idx > i && refs == 1 {
                        Some(target_idx)
                    } else {
                        None
                    }
                });
                if let Some(target_idx) = foldable {
                    let block = fold_range(elements, i + 1, target_idx, label_index, ref_count);
                    let mut new_inv = inv.clone();
                    let flow = new_inv.flow.as_mut().unwrap();
                    match flow.as_mut() {
                        GDSFlow::If { target, block: b, .. } => {
                            *target = None;
                            *b = Some(block);
                        }
                        GDSFlow::Loop { target, block: b, .. } => {
                            *target = None;
                            *b = Some(block);
                        }
                    }
                    out.push(GDSElement::Command(new_inv));
                    i = target_idx + 1;
                    continue;
                }
                out.push(elements[i].clone());
                i += 1;
            }
            other => {
                out.push(other.clone());
                i += 1;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::command::Registry;

    #[test]
    fn empty_program_decodes() {
        let mut data = vec![0u8, 0, 0, 0];
        let mut w = token::Writer::new();
        w.write_token(&TokenValue::FileEnd);
        data.extend_from_slice(&w.buf);
        let registry = Registry::default();
        let program = read_program(&data, &registry).unwrap();
        assert!(program.elements.is_empty());
    }
}
