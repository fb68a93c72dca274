//! The in-memory representation of a GDS program (§3).
//!
//! Labels and jump addresses are stored by name, not by pointer: a
//! [`GDSProgram`] owns a `name -> references` map, and every invocation or
//! label element only stores the name. This keeps the cyclic label/address
//! relationship representable without `Rc`/`RefCell` gymnastics.

use std::collections::HashMap;

use crate::schema::command::Command;

/// A value usable as a parameter in a [`GDSInvocation`].
#[derive(Debug, Clone, PartialEq)]
pub enum GDSValue {
    Int(GDSIntValue),
    Float(GDSFloatValue),
    Str(GDSStringValue),
    LongStr(GDSStringValue),
    Bool(GDSBoolValue),
}

/// How an integer literal was written, so it can be re-rendered the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntLiteralFormat {
    Dec,
    Hex,
    Bin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GDSIntValue {
    pub value: i64,
    pub bytelen: u8,
    pub unsigned: bool,
    pub lit_fmt: IntLiteralFormat,
}

#[derive(Debug, Clone, Copy)]
pub struct GDSFloatValue {
    pub value: f32,
}

impl PartialEq for GDSFloatValue {
    fn eq(&self, other: &Self) -> bool {
        self.value.to_bits() == other.value.to_bits()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GDSStringValue {
    pub value: String,
    pub maxlen: usize,
}

/// How a boolean value is or should be backed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolBacking {
    Int,
    Str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoolRepr {
    Bool(bool),
    Int(i64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GDSBoolValue {
    pub value: BoolRepr,
    /// `None` means the declared parameter type accepts either backing.
    pub force_rep: Option<BoolBacking>,
}

/// A token appearing in the condition of an `if`/`elif`/`while`.
#[derive(Debug, Clone, PartialEq)]
pub enum GDSConditionToken {
    Not,
    And,
    Or,
    Command(GDSInvocation),
}

/// A reference to a label, as used by flow instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GDSJumpAddress {
    pub label: String,
    /// Whether the label this address points to points back to this exact
    /// address instance. Exactly one reference per label may set this.
    pub primary: bool,
}

/// A target label from a GDS script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GDSLabel {
    pub name: String,
    /// Whether the label physically exists, or was synthesized because a
    /// jump pointed at a location with no label word.
    pub present: bool,
    /// The back-pointer value stored in the label word, if it differs from
    /// what a primary reference's offset would produce.
    pub loc: Option<u32>,
}

/// The plain invocation of a non-control-flow command.
#[derive(Debug, Clone, PartialEq)]
pub struct GDSInvocation {
    pub command: Command,
    pub args: Vec<Option<GDSValue>>,
    pub flow: Option<Box<GDSFlow>>,
}

/// The control-flow-specific payload of an `if`/`elif`/`else`/`while`/`repeatN`
/// invocation. Kept out of `GDSInvocation` itself so simple commands don't
/// carry a mostly-`None` flow struct; `flow.is_some()` iff `command.complex`.
#[derive(Debug, Clone, PartialEq)]
pub enum GDSFlow {
    If {
        condition: Vec<GDSConditionToken>,
        target: Option<GDSJumpAddress>,
        block: Option<Vec<GDSElement>>,
        elseif: bool,
        elze: bool,
    },
    Loop {
        condition: LoopCondition,
        target: Option<GDSJumpAddress>,
        block: Option<Vec<GDSElement>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoopCondition {
    While(Vec<GDSConditionToken>),
    RepeatN(u32),
}

/// An entry in a GDS script.
#[derive(Debug, Clone, PartialEq)]
pub enum GDSElement {
    Command(GDSInvocation),
    Label(GDSLabel),
    Break,
}

/// The execution context narrowed from the commands actually used in a
/// program, or set manually.
#[derive(Debug, Clone, Default)]
pub struct GDSContext {
    pub manual_name: Option<String>,
    pub candidates: Vec<String>,
    pub conflicts: Vec<Command>,
}

impl GDSContext {
    pub fn new() -> Self {
        Self {
            manual_name: None,
            candidates: vec!["all".to_string()],
            conflicts: Vec::new(),
        }
    }

    /// Narrows the candidate set against `cmd`'s declared context, recording
    /// a conflict (and widening the candidates) if nothing is compatible.
    pub fn narrow(&mut self, cmd: &Command) -> bool {
        let bases: Vec<String> = match &self.manual_name {
            Some(name) => vec![name.clone()],
            None => self.candidates.clone(),
        };
        let intersection = Self::intersect_sets(&bases, &cmd.context);
        if intersection.is_empty() {
            self.conflicts.push(cmd.clone());
            if self.manual_name.is_none() {
                self.candidates = Self::union_sets(&self.candidates, &cmd.context);
            }
            return false;
        }
        if self.manual_name.is_none() {
            self.candidates = intersection;
        }
        true
    }

    fn compat(a: &str, b: &str) -> Option<String> {
        if a == b {
            return Some(a.to_string());
        }
        if b.starts_with(&format!("{a}.")) {
            return Some(b.to_string());
        }
        if a.starts_with(&format!("{b}.")) {
            return Some(a.to_string());
        }
        None
    }

    fn intersect_sets(a: &[String], b: &[String]) -> Vec<String> {
        let mut out = Vec::new();
        for x in a {
            for y in b {
                if let Some(c) = Self::compat(x, y) {
                    if !out.contains(&c) {
                        out.push(c);
                    }
                }
            }
        }
        out
    }

    fn union_sets(a: &[String], b: &[String]) -> Vec<String> {
        let mut out = a.to_vec();
        for y in b {
            if !out.contains(y) {
                out.push(y.clone());
            }
        }
        out
    }
}

/// A label definition, or a use of it, inside a [`GDSProgram`]'s label map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelRef {
    Definition(GDSLabel),
    Use(GDSJumpAddress),
}

/// The program contained in a GDS script file.
#[derive(Debug, Clone, Default)]
pub struct GDSProgram {
    pub context: Option<GDSContext>,
    pub path: Option<String>,
    pub elements: Vec<GDSElement>,
    pub labels: HashMap<String, Vec<LabelRef>>,
}

impl GDSProgram {
    pub fn new() -> Self {
        Self::default()
    }
}
