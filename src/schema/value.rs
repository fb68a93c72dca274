//! The value-type registry (§4.A).
//!
//! A parameter's declared type is a small descriptor string
//! (`int`, `uint(2)`, `short`, `byte`, `float`, `str(16)`, `longstr`,
//! `bool`, `bool|int`, `bool|string`, ...). [`ValueType::parse`] turns that
//! string into a [`ValueType`], which then knows how to read a literal out of
//! GDA source, bridge a raw [`crate::token::TokenValue`] into a
//! [`GDSValue`], and format a `GDSValue` back into GDA text.

use std::fmt;

use crate::model::{
    BoolBacking, BoolRepr, GDSBoolValue, GDSFloatValue, GDSIntValue, GDSStringValue, GDSValue,
    IntLiteralFormat,
};
use crate::token::TokenValue;

#[derive(Debug, Clone)]
pub enum Error {
    BadDescriptor(String),
    TokenMismatch { descriptor: String, found: &'static str },
    BadLiteral { descriptor: String, literal: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BadDescriptor(d) => write!(f, "unknown value type {d:?}"),
            Error::TokenMismatch { descriptor, found } => {
                write!(f, "type {descriptor:?} cannot take a {found} token")
            }
            Error::BadLiteral { descriptor, literal } => {
                write!(f, "{literal:?} is not a valid {descriptor} literal")
            }
        }
    }
}

impl std::error::Error for Error {}

/// A parsed parameter type descriptor.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueType {
    Int { bytelen: u8, unsigned: bool },
    Float,
    Str { maxlen: usize, longstr: bool },
    Bool { force_rep: Option<BoolBacking> },
}

impl ValueType {
    /// Parses a descriptor string such as `"uint(2)"` or `"bool|string"`.
    pub fn parse(descriptor: &str) -> Result<Self, Error> {
        let d = descriptor.trim();
        if d == "short" {
            return Ok(ValueType::Int { bytelen: 2, unsigned: false });
        }
        if d == "ushort" {
            return Ok(ValueType::Int { bytelen: 2, unsigned: true });
        }
        if d == "byte" {
            return Ok(ValueType::Int { bytelen: 1, unsigned: false });
        }
        if d == "ubyte" {
            return Ok(ValueType::Int { bytelen: 1, unsigned: true });
        }
        if d == "float" {
            return Ok(ValueType::Float);
        }
        if d == "bool" {
            return Ok(ValueType::Bool { force_rep: None });
        }
        if d == "bool|int" {
            return Ok(ValueType::Bool { force_rep: Some(BoolBacking::Int) });
        }
        if d == "bool|string" {
            return Ok(ValueType::Bool { force_rep: Some(BoolBacking::Str) });
        }
        if d == "longstr" {
            return Ok(ValueType::Str { maxlen: usize::MAX, longstr: true });
        }
        if let Some(rest) = d.strip_prefix("int") {
            return Self::parse_int(rest, false, descriptor);
        }
        if let Some(rest) = d.strip_prefix("uint") {
            return Self::parse_int(rest, true, descriptor);
        }
        for prefix in ["string", "str"] {
            if let Some(rest) = d.strip_prefix(prefix) {
                return Self::parse_str(rest, descriptor);
            }
        }
        Err(Error::BadDescriptor(descriptor.to_string()))
    }

    fn parse_int(rest: &str, unsigned: bool, descriptor: &str) -> Result<Self, Error> {
        if rest.is_empty() {
            return Ok(ValueType::Int { bytelen: 4, unsigned });
        }
        let n = rest
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .and_then(|s| s.parse::<u8>().ok())
            .ok_or_else(|| Error::BadDescriptor(descriptor.to_string()))?;
        Ok(ValueType::Int { bytelen: n, unsigned })
    }

    fn parse_str(rest: &str, descriptor: &str) -> Result<Self, Error> {
        if rest.is_empty() {
            return Ok(ValueType::Str { maxlen: 63, longstr: false });
        }
        let n = rest
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(|| Error::BadDescriptor(descriptor.to_string()))?;
        Ok(ValueType::Str { maxlen: n, longstr: false })
    }

    pub fn descriptor(&self) -> String {
        match self {
            ValueType::Int { bytelen: 4, unsigned: false } => "int".to_string(),
            ValueType::Int { bytelen: 4, unsigned: true } => "uint".to_string(),
            ValueType::Int { bytelen: 2, unsigned: false } => "short".to_string(),
            ValueType::Int { bytelen: 2, unsigned: true } => "ushort".to_string(),
            ValueType::Int { bytelen: 1, unsigned: false } => "byte".to_string(),
            ValueType::Int { bytelen: 1, unsigned: true } => "ubyte".to_string(),
            ValueType::Int { bytelen, unsigned: false } => format!("int({bytelen})"),
            ValueType::Int { bytelen, unsigned: true } => format!("uint({bytelen})"),
            ValueType::Float => "float".to_string(),
            ValueType::Str { longstr: true, .. } => "longstr".to_string(),
            ValueType::Str { maxlen: 63, longstr: false } => "str".to_string(),
            ValueType::Str { maxlen, longstr: false } => format!("str({maxlen})"),
            ValueType::Bool { force_rep: None } => "bool".to_string(),
            ValueType::Bool { force_rep: Some(BoolBacking::Int) } => "bool|int".to_string(),
            ValueType::Bool { force_rep: Some(BoolBacking::Str) } => "bool|string".to_string(),
        }
    }

    /// Builds a [`GDSValue`] out of a decoded binary token, checking that the
    /// token's shape is one this type actually accepts.
    pub fn from_token(&self, token: &TokenValue) -> Result<GDSValue, Error> {
        match (self, token) {
            (ValueType::Int { bytelen, unsigned }, TokenValue::Int(raw)) => {
                let value = sign_extend(*raw, *bytelen, *unsigned);
                warn_if_int_out_of_range(value, *bytelen, *unsigned, &self.descriptor());
                Ok(GDSValue::Int(GDSIntValue {
                    value,
                    bytelen: *bytelen,
                    unsigned: *unsigned,
                    lit_fmt: IntLiteralFormat::Dec,
                }))
            }
            (ValueType::Float, TokenValue::Float(f)) => {
                Ok(GDSValue::Float(GDSFloatValue { value: *f }))
            }
            (ValueType::Str { maxlen, longstr: false }, TokenValue::Str(s)) => {
                warn_if_str_out_of_range(s, *maxlen, &self.descriptor());
                Ok(GDSValue::Str(GDSStringValue { value: s.clone(), maxlen: *maxlen }))
            }
            (ValueType::Str { longstr: true, .. }, TokenValue::LongStr(s)) => {
                Ok(GDSValue::LongStr(GDSStringValue { value: s.clone(), maxlen: usize::MAX }))
            }
            (ValueType::Bool { force_rep }, TokenValue::Int(raw)) => {
                if *force_rep == Some(BoolBacking::Str) {
                    return Err(Error::TokenMismatch {
                        descriptor: self.descriptor(),
                        found: "int",
                    });
                }
                Ok(GDSValue::Bool(GDSBoolValue {
                    value: BoolRepr::Int(sign_extend(*raw, 4, false)),
                    force_rep: *force_rep,
                }))
            }
            (ValueType::Bool { force_rep }, TokenValue::Str(s)) => {
                if *force_rep == Some(BoolBacking::Int) {
                    return Err(Error::TokenMismatch {
                        descriptor: self.descriptor(),
                        found: "string",
                    });
                }
                Ok(GDSValue::Bool(GDSBoolValue {
                    value: BoolRepr::Str(s.clone()),
                    force_rep: *force_rep,
                }))
            }
            _ => Err(Error::TokenMismatch {
                descriptor: self.descriptor(),
                found: token.kind_name(),
            }),
        }
    }

    /// Renders a `GDSValue` as GDA source text.
    pub fn format(&self, value: &GDSValue) -> String {
        match value {
            GDSValue::Int(v) => format_int(v),
            GDSValue::Float(v) => format_float(v.value),
            GDSValue::Str(v) => format_str(&v.value),
            GDSValue::LongStr(v) => format!("l{}", format_str(&v.value)),
            GDSValue::Bool(v) => format_bool(v),
        }
    }

    /// Parses a GDA literal token into a `GDSValue` of this type.
    pub fn parse_literal(&self, literal: &str) -> Result<GDSValue, Error> {
        match self {
            ValueType::Int { bytelen, unsigned } => {
                let value = parse_int_literal(literal, *bytelen, *unsigned)
                    .ok_or_else(|| Error::BadLiteral {
                        descriptor: self.descriptor(),
                        literal: literal.to_string(),
                    })?;
                if let GDSValue::Int(i) = &value {
                    warn_if_int_out_of_range(i.value, *bytelen, *unsigned, &self.descriptor());
                }
                Ok(value)
            }
            ValueType::Float => parse_float_literal(literal).ok_or_else(|| Error::BadLiteral {
                descriptor: self.descriptor(),
                literal: literal.to_string(),
            }),
            ValueType::Str { maxlen, longstr } => {
                let body = if *longstr {
                    literal.strip_prefix('l').unwrap_or(literal)
                } else {
                    literal
                };
                let s = parse_quoted(body).ok_or_else(|| Error::BadLiteral {
                    descriptor: self.descriptor(),
                    literal: literal.to_string(),
                })?;
                if !longstr {
                    warn_if_str_out_of_range(&s, *maxlen, &self.descriptor());
                }
                Ok(if *longstr {
                    GDSValue::LongStr(GDSStringValue { value: s, maxlen: usize::MAX })
                } else {
                    GDSValue::Str(GDSStringValue { value: s, maxlen: *maxlen })
                })
            }
            ValueType::Bool { force_rep } => {
                if literal == "true" || literal == "false" {
                    return Ok(GDSValue::Bool(GDSBoolValue {
                        value: BoolRepr::Bool(literal == "true"),
                        force_rep: *force_rep,
                    }));
                }
                if *force_rep != Some(BoolBacking::Str) {
                    if let Some(v) = parse_int_literal(literal, 4, false) {
                        if let GDSValue::Int(i) = v {
                            return Ok(GDSValue::Bool(GDSBoolValue {
                                value: BoolRepr::Int(i.value),
                                force_rep: *force_rep,
                            }));
                        }
                    }
                }
                if *force_rep != Some(BoolBacking::Int) {
                    if let Some(s) = parse_quoted(literal) {
                        return Ok(GDSValue::Bool(GDSBoolValue {
                            value: BoolRepr::Str(s),
                            force_rep: *force_rep,
                        }));
                    }
                }
                Err(Error::BadLiteral {
                    descriptor: self.descriptor(),
                    literal: literal.to_string(),
                })
            }
        }
    }
}

/// Out-of-range integers and over-long strings are stored verbatim per
/// §4.A, but the loss of fidelity is surfaced as a [`crate::error::RangeWarning`]
/// rather than silently dropped.
fn warn_if_int_out_of_range(value: i64, bytelen: u8, unsigned: bool, descriptor: &str) {
    if bytelen >= 8 {
        return;
    }
    let bits = bytelen as u32 * 8;
    let (lo, hi): (i64, i64) = if unsigned {
        (0, (1i64 << bits) - 1)
    } else {
        (-(1i64 << (bits - 1)), (1i64 << (bits - 1)) - 1)
    };
    if value < lo || value > hi {
        let warning = crate::error::RangeWarning {
            value: value.to_string(),
            type_descriptor: descriptor.to_string(),
        };
        log::warn!("{warning}");
    }
}

fn warn_if_str_out_of_range(value: &str, maxlen: usize, descriptor: &str) {
    if value.len() > maxlen {
        let warning = crate::error::RangeWarning {
            value: format!("{value:?}"),
            type_descriptor: descriptor.to_string(),
        };
        log::warn!("{warning}");
    }
}

fn sign_extend(raw: i64, bytelen: u8, unsigned: bool) -> i64 {
    if unsigned || bytelen >= 8 {
        return raw;
    }
    let bits = bytelen as u32 * 8;
    let half = 1i64 << (bits - 1);
    let mask = (1i64 << bits) - 1;
    let masked = raw & mask;
    if masked >= half {
        masked - (1i64 << bits)
    } else {
        masked
    }
}

fn format_int(v: &GDSIntValue) -> String {
    let prefix = if v.unsigned { "u" } else { "" };
    match v.lit_fmt {
        IntLiteralFormat::Dec => format!("{}{}", prefix, v.value),
        IntLiteralFormat::Hex => format!("{}0x{:x}", prefix, v.value),
        IntLiteralFormat::Bin => format!("{}0b{:b}", prefix, v.value),
    }
}

fn parse_int_literal(literal: &str, bytelen: u8, unsigned: bool) -> Option<GDSValue> {
    let (body, neg) = match literal.strip_prefix('-') {
        Some(rest) => (rest, true),
        None => (literal, false),
    };
    let (body, lit_fmt, radix) = if let Some(rest) = body.strip_prefix("0x") {
        (rest, IntLiteralFormat::Hex, 16)
    } else if let Some(rest) = body.strip_prefix("0b") {
        (rest, IntLiteralFormat::Bin, 2)
    } else {
        (body, IntLiteralFormat::Dec, 10)
    };
    let magnitude = i64::from_str_radix(body, radix).ok()?;
    let value = if neg { -magnitude } else { magnitude };
    Some(GDSValue::Int(GDSIntValue { value, bytelen, unsigned, lit_fmt }))
}

fn parse_float_literal(literal: &str) -> Option<GDSValue> {
    if !literal.contains('.') {
        return None;
    }
    let value: f32 = literal.parse().ok()?;
    Some(GDSValue::Float(GDSFloatValue { value }))
}

/// Renders `value` with the shortest decimal precision that re-parses to the
/// exact same `f32` bit pattern.
fn format_float(value: f32) -> String {
    for precision in 0..=9 {
        let candidate = format!("{value:.precision$}");
        if candidate.parse::<f32>() == Ok(value) {
            if candidate.contains('.') {
                return candidate;
            }
            return format!("{candidate}.");
        }
    }
    format!("{value:.9}")
}

fn format_str(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

fn parse_quoted(literal: &str) -> Option<String> {
    let l = literal.trim();
    let quote = l.chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    if l.len() < 2 || !l.ends_with(quote) {
        return None;
    }
    let inner = &l[1..l.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next()? {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                '"' => out.push('"'),
                '\'' => out.push('\''),
                '\\' => out.push('\\'),
                other => out.push(other),
            }
        } else {
            out.push(c);
        }
    }
    Some(out)
}

fn format_bool(v: &GDSBoolValue) -> String {
    match &v.value {
        BoolRepr::Bool(b) => b.to_string(),
        BoolRepr::Int(i) => i.to_string(),
        BoolRepr::Str(s) => format_str(s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_descriptors() {
        assert_eq!(
            ValueType::parse("int").unwrap(),
            ValueType::Int { bytelen: 4, unsigned: false }
        );
        assert_eq!(
            ValueType::parse("uint(2)").unwrap(),
            ValueType::Int { bytelen: 2, unsigned: true }
        );
        assert_eq!(ValueType::parse("short").unwrap(), ValueType::Int { bytelen: 2, unsigned: false });
        assert_eq!(ValueType::parse("ushort").unwrap(), ValueType::Int { bytelen: 2, unsigned: true });
        assert_eq!(ValueType::parse("byte").unwrap(), ValueType::Int { bytelen: 1, unsigned: false });
        assert_eq!(ValueType::parse("ubyte").unwrap(), ValueType::Int { bytelen: 1, unsigned: true });
        assert_eq!(ValueType::parse("float").unwrap(), ValueType::Float);
        assert_eq!(
            ValueType::parse("str(16)").unwrap(),
            ValueType::Str { maxlen: 16, longstr: false }
        );
        assert_eq!(
            ValueType::parse("bool|int").unwrap(),
            ValueType::Bool { force_rep: Some(BoolBacking::Int) }
        );
    }

    #[test]
    fn rejects_unknown_descriptor() {
        assert!(ValueType::parse("wat").is_err());
    }

    #[test]
    fn float_shortest_round_trip() {
        assert_eq!(format_float(1.0), "1.");
        assert_eq!(format_float(0.1), "0.1");
        assert_eq!(format_float(1.0 / 3.0), "0.33333334");
    }

    #[test]
    fn signed_byte_sign_extends() {
        assert_eq!(sign_extend(255, 1, false), -1);
        assert_eq!(sign_extend(127, 1, false), 127);
        assert_eq!(sign_extend(255, 1, true), 255);
    }

    #[test]
    fn int_literal_round_trips_hex() {
        let v = ValueType::parse("int").unwrap().parse_literal("0xff").unwrap();
        assert_eq!(ValueType::parse("int").unwrap().format(&v), "0xff");
    }

    #[test]
    fn out_of_range_byte_literal_is_stored_verbatim() {
        let vtype = ValueType::parse("byte").unwrap();
        let v = vtype.parse_literal("200").unwrap();
        match &v {
            GDSValue::Int(i) => assert_eq!(i.value, 200),
            other => panic!("expected Int, got {other:?}"),
        }
        assert_eq!(vtype.format(&v), "200");
    }

    #[test]
    fn over_long_string_literal_is_stored_verbatim() {
        let vtype = ValueType::parse("str(4)").unwrap();
        let long = "\"abcdefgh\"";
        let v = vtype.parse_literal(long).unwrap();
        match &v {
            GDSValue::Str(s) => assert_eq!(s.value, "abcdefgh"),
            other => panic!("expected Str, got {other:?}"),
        }
    }

    #[test]
    fn string_literal_escapes() {
        let v = ValueType::parse("str").unwrap().parse_literal("\"a\\nb\"").unwrap();
        if let GDSValue::Str(s) = &v {
            assert_eq!(s.value, "a\nb");
        } else {
            panic!("expected Str");
        }
        assert_eq!(ValueType::parse("str").unwrap().format(&v), "\"a\\nb\"");
    }
}
