//! Shared error and warning types (§7).
//!
//! Each module defines its own small error enum close to the code that
//! raises it; this module hosts the umbrella kinds the CLI reports by name
//! (`FormatError`, `SyntaxError`, `DefinitionError`, `UnresolvedLabelError`)
//! plus the two non-fatal warning payloads that are logged rather than
//! propagated.

use std::fmt;

use crate::reader;
use crate::schema::command;
use crate::schema::value;
use crate::text::parser;
use crate::token;
use crate::writer;

/// Any failure on the binary-decoding side: bad tags, truncated streams,
/// token-level label/address bookkeeping that doesn't add up.
#[derive(Debug, Clone)]
pub enum FormatError {
    Token(token::Error),
    Value(value::Error),
    Read(reader::Error),
    Write(writer::Error),
    Other(String),
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::Token(e) => write!(f, "FormatError: {e}"),
            FormatError::Value(e) => write!(f, "FormatError: {e}"),
            FormatError::Read(e) => write!(f, "FormatError: {e}"),
            FormatError::Write(e) => write!(f, "FormatError: {e}"),
            FormatError::Other(msg) => write!(f, "FormatError: {msg}"),
        }
    }
}

impl std::error::Error for FormatError {}

impl From<token::Error> for FormatError {
    fn from(e: token::Error) -> Self {
        FormatError::Token(e)
    }
}

impl From<value::Error> for FormatError {
    fn from(e: value::Error) -> Self {
        FormatError::Value(e)
    }
}

impl From<reader::Error> for FormatError {
    fn from(e: reader::Error) -> Self {
        FormatError::Read(e)
    }
}

impl From<writer::Error> for FormatError {
    fn from(e: writer::Error) -> Self {
        FormatError::Write(e)
    }
}

/// Any failure parsing GDA source text.
#[derive(Debug, Clone)]
pub enum SyntaxError {
    Parse(parser::Error),
    Value(value::Error),
    Other(String),
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyntaxError::Parse(e) => write!(f, "SyntaxError: {e}"),
            SyntaxError::Value(e) => write!(f, "SyntaxError: {e}"),
            SyntaxError::Other(msg) => write!(f, "SyntaxError: {msg}"),
        }
    }
}

impl std::error::Error for SyntaxError {}

impl From<parser::Error> for SyntaxError {
    fn from(e: parser::Error) -> Self {
        SyntaxError::Parse(e)
    }
}

impl From<value::Error> for SyntaxError {
    fn from(e: value::Error) -> Self {
        SyntaxError::Value(e)
    }
}

/// A label had zero or more than one primary reference, or a jump pointed
/// at a label name that was never defined.
#[derive(Debug, Clone)]
pub struct UnresolvedLabelError {
    pub label: String,
    pub reason: &'static str,
}

impl fmt::Display for UnresolvedLabelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "label {:?}: {}", self.label, self.reason)
    }
}

impl std::error::Error for UnresolvedLabelError {}

/// Failure loading or cross-checking the command-definition registry.
#[derive(Debug, Clone)]
pub enum DefinitionError {
    DuplicateId { id: u16, existing: String, new: String },
    DuplicateName { name: String, existing: u16, new: u16 },
    Yaml(String),
    Io(String),
}

impl fmt::Display for DefinitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefinitionError::DuplicateId { id, existing, new } => {
                write!(f, "command id {id:#x} defined twice ({existing} and {new})")
            }
            DefinitionError::DuplicateName { name, existing, new } => {
                write!(
                    f,
                    "command name {name:?} defined twice ({existing:#x} and {new:#x})"
                )
            }
            DefinitionError::Yaml(msg) => write!(f, "invalid command definition: {msg}"),
            DefinitionError::Io(msg) => write!(f, "could not read command definitions: {msg}"),
        }
    }
}

impl std::error::Error for DefinitionError {}

impl From<command::Error> for DefinitionError {
    fn from(e: command::Error) -> Self {
        match e {
            command::Error::DuplicateId { id, existing, new } => {
                DefinitionError::DuplicateId { id, existing, new }
            }
            command::Error::DuplicateName { name, existing, new } => {
                DefinitionError::DuplicateName { name, existing, new }
            }
            command::Error::Yaml(msg) => DefinitionError::Yaml(msg),
            command::Error::Io(msg) => DefinitionError::Io(msg),
        }
    }
}

/// A non-fatal correction to applied (or not applied) patch bytes. Logged via
/// `log::warn!`, never returned as an `Err`.
#[derive(Debug, Clone)]
pub struct PatchWarning {
    pub path: String,
    pub offset: usize,
    pub reason: String,
}

impl fmt::Display for PatchWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "patch at {}+{:#x} skipped: {}",
            self.path, self.offset, self.reason
        )
    }
}

/// A value was outside the range its declared type can faithfully represent,
/// but was stored anyway (matches the original reader/writer's leniency).
#[derive(Debug, Clone)]
pub struct RangeWarning {
    pub value: String,
    pub type_descriptor: String,
}

impl fmt::Display for RangeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "value {} out of range for type {}, stored anyway",
            self.value, self.type_descriptor
        )
    }
}
