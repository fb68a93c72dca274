//! The human-readable GDA text format: parser (§4.F), writer (§4.E) and
//! doc-comment template expansion (§4.G).

pub mod doc;
pub mod parser;
pub mod writer;
