//! A bidirectional (de)compiler for GDS, the bytecode scripting language
//! used by a handheld game's event, room and puzzle scripts.
//!
//! [`reader::read_program`] turns a GDS binary into a [`model::GDSProgram`];
//! [`writer::write_program`] turns one back into bytes. [`text::parser`] and
//! [`text::writer`] do the same conversion against the human-readable GDA
//! source form. [`schema::command::Registry`] and [`schema::value::ValueType`]
//! drive both directions' understanding of what a given command's parameters
//! mean; [`patch`] corrects a handful of known-bad scripts before decoding.

pub mod error;
pub mod model;
pub mod patch;
pub mod reader;
pub mod schema;
pub mod text;
pub mod token;
pub mod writer;

pub use error::{DefinitionError, FormatError, SyntaxError, UnresolvedLabelError};
pub use model::GDSProgram;
pub use schema::command::Registry;
