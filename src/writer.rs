//! The binary writer: block flattening and jump backpatching (§4.H).
//!
//! This is the inverse of [`crate::reader::fold_blocks`]: a nested `block`
//! on an `if`/`while`/`repeatN` is flattened back into a flat
//! condition+target pair followed by the block's own elements and a
//! synthesized label. Addresses are written as a two-pass process: every
//! `saddr`/`taddr` token is emitted with a placeholder payload, and every
//! use/definition site is recorded by name so a final pass can backpatch the
//! real byte offsets in.

use std::collections::HashMap;
use std::fmt;

use crate::model::{
    GDSConditionToken, GDSElement, GDSFlow, GDSInvocation, GDSJumpAddress, GDSProgram,
    LoopCondition,
};
use crate::schema::value;
use crate::token::{TokenValue, Writer as TokenWriter};

#[derive(Debug, Clone)]
pub enum Error {
    Value(value::Error),
    UndefinedLabel(String),
    MultiplePrimary(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Value(e) => write!(f, "{e}"),
            Error::UndefinedLabel(name) => write!(f, "label {name:?} is used but never defined"),
            Error::MultiplePrimary(name) => {
                write!(f, "label {name:?} has more than one primary reference")
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<value::Error> for Error {
    fn from(e: value::Error) -> Self {
        Error::Value(e)
    }
}

/// Where a label's address comes from during backpatching: either a
/// physical `taddr` token (whose own back-pointer payload still needs
/// resolving) or an address synthesized from the position of whatever
/// follows a non-present label, per §4.D.2.
enum DefSite {
    Token { loc: usize, fallback: Option<u32> },
    Synthetic(u32),
}

/// Turns a [`GDSProgram`] back into GDS binary bytes, including the 4-byte
/// little-endian length prefix.
pub fn write_program(program: &GDSProgram) -> Result<Vec<u8>, Error> {
    let flattened = flatten(&program.elements);

    let mut w = TokenWriter::new();
    let mut use_locs: HashMap<String, Vec<(usize, bool)>> = HashMap::new();
    let mut def_locs: HashMap<String, DefSite> = HashMap::new();

    for elem in &flattened {
        write_element(&mut w, elem, &mut use_locs, &mut def_locs)?;
    }
    w.write_token(&TokenValue::FileEnd);

    backpatch(&mut w, &use_locs, &def_locs)?;

    let mut out = Vec::with_capacity(w.buf.len() + 4);
    out.extend_from_slice(&(w.buf.len() as u32).to_le_bytes());
    out.extend_from_slice(&w.buf);
    Ok(out)
}

/// Synthesizes a fresh label name for a flattened block's end, distinct from
/// any name already present in the program.
struct NameGen {
    counter: u32,
}

impl NameGen {
    fn new() -> Self {
        NameGen { counter: 0 }
    }

    fn next(&mut self) -> String {
        self.counter += 1;
        format!("block_{}", self.counter)
    }
}

/// Recursively rewrites nested `block` fields into flat
/// `condition + target + body + Label(target)` sequences.
fn flatten(elements: &[GDSElement]) -> Vec<GDSElement> {
    let mut gen = NameGen::new();
    flatten_with(elements, &mut gen)
}

fn flatten_with(elements: &[GDSElement], gen: &mut NameGen) -> Vec<GDSElement> {
    let mut out = Vec::with_capacity(elements.len());
    for elem in elements {
        match elem {
            GDSElement::Command(inv) if inv.flow.is_some() => {
                out.extend(flatten_invocation(inv, gen));
            }
            other => out.push(other.clone()),
        }
    }
    out
}

/// Flattens one flow invocation into the head command followed (if it had a
/// nested block) by the block's own flattened body and a synthesized label
/// marking where the forward jump lands.
fn flatten_invocation(inv: &GDSInvocation, gen: &mut NameGen) -> Vec<GDSElement> {
    let mut inv = inv.clone();
    let flow = inv.flow.take().unwrap();
    let (new_flow, tail) = match *flow {
        GDSFlow::If { condition, target, block, elseif, elze } => {
            if let Some(body) = block {
                let label = gen.next();
                let mut tail = flatten_with(&body, gen);
                tail.push(GDSElement::Label(crate::model::GDSLabel {
                    name: label.clone(),
                    present: true,
                    loc: None,
                }));
                (
                    GDSFlow::If {
                        condition,
                        target: Some(GDSJumpAddress { label, primary: true }),
                        block: None,
                        elseif,
                        elze,
                    },
                    tail,
                )
            } else {
                (GDSFlow::If { condition, target, block: None, elseif, elze }, Vec::new())
            }
        }
        GDSFlow::Loop { condition, target, block } => {
            if let Some(body) = block {
                let label = gen.next();
                let mut tail = flatten_with(&body, gen);
                tail.push(GDSElement::Label(crate::model::GDSLabel {
                    name: label.clone(),
                    present: true,
                    loc: None,
                }));
                (
                    GDSFlow::Loop {
                        condition,
                        target: Some(GDSJumpAddress { label, primary: true }),
                        block: None,
                    },
                    tail,
                )
            } else {
                (GDSFlow::Loop { condition, target, block: None }, Vec::new())
            }
        }
    };
    inv.flow = Some(Box::new(new_flow));
    let mut out = vec![GDSElement::Command(inv)];
    out.extend(tail);
    out
}

fn write_element(
    w: &mut TokenWriter,
    elem: &GDSElement,
    use_locs: &mut HashMap<String, Vec<(usize, bool)>>,
    def_locs: &mut HashMap<String, DefSite>,
) -> Result<(), Error> {
    match elem {
        GDSElement::Break => {
            w.write_token(&TokenValue::Break);
        }
        GDSElement::Label(label) if label.present => {
            let loc = w.write_token(&TokenValue::TAddr(0));
            def_locs.insert(label.name.clone(), DefSite::Token { loc, fallback: label.loc });
        }
        GDSElement::Label(label) => {
            // No token is emitted. An explicit back-pointer (round-tripped
            // from a decompiled program, or hand-authored) is used verbatim;
            // otherwise the address defaults to just before whatever comes
            // next, mirroring §4.D.2's `address + 4` placement rule.
            let addr = label.loc.unwrap_or_else(|| (w.pos() as u32).saturating_sub(4));
            def_locs.insert(label.name.clone(), DefSite::Synthetic(addr));
        }
        GDSElement::Command(inv) => write_invocation(w, inv, use_locs, def_locs)?,
    }
    Ok(())
}

fn write_invocation(
    w: &mut TokenWriter,
    inv: &GDSInvocation,
    use_locs: &mut HashMap<String, Vec<(usize, bool)>>,
    def_locs: &mut HashMap<String, DefSite>,
) -> Result<(), Error> {
    w.write_token(&TokenValue::Command(inv.command.id));
    match inv.flow.as_deref() {
        None => {
            for value in inv.args.iter().flatten() {
                write_value(w, value);
            }
        }
        Some(GDSFlow::If { condition, target, elseif: _, elze, .. }) => {
            if !elze {
                write_condition(w, condition, use_locs, def_locs)?;
            }
            write_target(w, target, use_locs)?;
        }
        Some(GDSFlow::Loop { condition, target, .. }) => {
            match condition {
                LoopCondition::While(tokens) => {
                    write_condition(w, tokens, use_locs, def_locs)?;
                }
                LoopCondition::RepeatN(n) => {
                    w.write_token(&TokenValue::Int(*n as i64));
                }
            }
            write_target(w, target, use_locs)?;
        }
    }
    Ok(())
}

fn write_value(w: &mut TokenWriter, value: &crate::model::GDSValue) {
    use crate::model::{BoolRepr, GDSValue};
    let token = match value {
        GDSValue::Int(v) => TokenValue::Int(v.value),
        GDSValue::Float(v) => TokenValue::Float(v.value),
        GDSValue::Str(v) => TokenValue::Str(v.value.clone()),
        GDSValue::LongStr(v) => TokenValue::LongStr(v.value.clone()),
        GDSValue::Bool(v) => match &v.value {
            BoolRepr::Bool(b) => TokenValue::Int(*b as i64),
            BoolRepr::Int(i) => TokenValue::Int(*i),
            BoolRepr::Str(s) => TokenValue::Str(s.clone()),
        },
    };
    w.write_token(&token);
}

fn write_condition(
    w: &mut TokenWriter,
    condition: &[GDSConditionToken],
    use_locs: &mut HashMap<String, Vec<(usize, bool)>>,
    def_locs: &mut HashMap<String, DefSite>,
) -> Result<(), Error> {
    for tok in condition {
        match tok {
            GDSConditionToken::Not => {
                w.write_token(&TokenValue::Not);
            }
            GDSConditionToken::And => {
                w.write_token(&TokenValue::And);
            }
            GDSConditionToken::Or => {
                w.write_token(&TokenValue::Or);
            }
            GDSConditionToken::Command(inv) => write_invocation(w, inv, use_locs, def_locs)?,
        }
    }
    Ok(())
}

fn write_target(
    w: &mut TokenWriter,
    target: &Option<GDSJumpAddress>,
    use_locs: &mut HashMap<String, Vec<(usize, bool)>>,
) -> Result<(), Error> {
    let addr = target
        .as_ref()
        .ok_or_else(|| Error::UndefinedLabel("<missing target>".to_string()))?;
    let loc = w.write_token(&TokenValue::SAddr(0));
    use_locs.entry(addr.label.clone()).or_default().push((loc, addr.primary));
    Ok(())
}

/// Mirrors the original's `write_label`: every use's forward offset is
/// patched to the label's site regardless of which one is primary, but the
/// label's own back-pointer comes from whichever use (if any) carries
/// `primary == true`, falling back to the label's recorded `loc`.
fn backpatch(
    w: &mut TokenWriter,
    use_locs: &HashMap<String, Vec<(usize, bool)>>,
    def_locs: &HashMap<String, DefSite>,
) -> Result<(), Error> {
    for (name, uses) in use_locs {
        match def_locs.get(name).ok_or_else(|| Error::UndefinedLabel(name.clone()))? {
            DefSite::Token { loc, fallback } => {
                let def_loc = *loc;
                let def_key = def_loc as u32 + 2;
                for &(use_loc, _) in uses {
                    w.backpatch_addr(use_loc, def_key);
                }

                let primaries: Vec<usize> =
                    uses.iter().filter(|(_, primary)| *primary).map(|(loc, _)| *loc).collect();
                let backptr = match primaries.as_slice() {
                    [] => fallback.unwrap_or(0),
                    [only] => *only as u32 + 2,
                    _ => return Err(Error::MultiplePrimary(name.clone())),
                };
                w.backpatch_addr(def_loc, backptr);
            }
            DefSite::Synthetic(addr) => {
                for &(use_loc, _) in uses {
                    w.backpatch_addr(use_loc, *addr);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GDSProgram;

    #[test]
    fn empty_program_round_trips_length_prefix() {
        let program = GDSProgram::new();
        let bytes = write_program(&program).unwrap();
        assert_eq!(bytes.len(), 6);
        assert_eq!(&bytes[0..4], &0u32.to_le_bytes());
    }
}
