//! The signal value domain.
//!
//! A signal carries one of four value kinds. The kind is fixed at signal
//! construction and selects a plain-function setter used to validate every
//! `next` write, replacing any runtime type dispatch on the value itself.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::bitvec::{bitlen, BitVec};
use crate::errors::SimError;

// ─── Enum types ───────────────────────────────────────────────

/// Handle into the design's enum type table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnumTypeId(pub u32);

/// Encoding used when an enum type reaches the emitted HDL.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnumEncoding {
    Binary,
    OneHot,
    Gray,
}

/// A user-declared enumerated type.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnumType {
    pub name: String,
    pub variants: Vec<String>,
    pub encoding: EnumEncoding,
    pub nrbits: u32,
}

impl EnumType {
    pub fn new(name: impl Into<String>, variants: Vec<String>, encoding: EnumEncoding) -> Self {
        let n = variants.len().max(1) as i128;
        let nrbits = match encoding {
            EnumEncoding::Binary | EnumEncoding::Gray => bitlen(n - 1),
            EnumEncoding::OneHot => n as u32,
        };
        EnumType {
            name: name.into(),
            variants,
            encoding,
            nrbits,
        }
    }

    /// The bit image of one variant under this type's encoding.
    pub fn encode(&self, index: u32) -> i128 {
        match self.encoding {
            EnumEncoding::Binary => index as i128,
            EnumEncoding::OneHot => 1i128 << index,
            EnumEncoding::Gray => (index ^ (index >> 1)) as i128,
        }
    }
}

/// One variant of an enum type, as stored in a signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumVal {
    pub type_id: EnumTypeId,
    pub index: u32,
    pub nrbits: u32,
}

// ─── Val ──────────────────────────────────────────────────────

/// A value held by a signal or produced by expression evaluation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Val {
    Bit(bool),
    Int(i64),
    Vec(BitVec),
    Enum(EnumVal),
}

/// The kind tag fixed at signal construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalKind {
    Bit,
    Int,
    BitVec,
    Enum,
}

impl Val {
    pub fn kind(&self) -> SignalKind {
        match self {
            Val::Bit(_) => SignalKind::Bit,
            Val::Int(_) => SignalKind::Int,
            Val::Vec(_) => SignalKind::BitVec,
            Val::Enum(_) => SignalKind::Enum,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Val::Bit(_) => "bit",
            Val::Int(_) => "int",
            Val::Vec(_) => "bitvec",
            Val::Enum(_) => "enum",
        }
    }

    /// Integer view; `None` for enums.
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Val::Bit(b) => Some(*b as i128),
            Val::Int(i) => Some(*i as i128),
            Val::Vec(v) => Some(v.val()),
            Val::Enum(_) => None,
        }
    }

    /// Edge semantics: a value is "high" when non-zero.
    pub fn is_truthy(&self) -> bool {
        match self {
            Val::Bit(b) => *b,
            Val::Int(i) => *i != 0,
            Val::Vec(v) => v.val() != 0,
            Val::Enum(e) => e.index != 0,
        }
    }

    pub fn nrbits(&self) -> u32 {
        match self {
            Val::Bit(_) => 1,
            Val::Int(_) => 0,
            Val::Vec(v) => v.nrbits(),
            Val::Enum(e) => e.nrbits,
        }
    }

    pub fn is_signed(&self) -> bool {
        match self {
            Val::Vec(v) => v.is_signed(),
            Val::Int(_) => true,
            _ => false,
        }
    }
}

impl PartialEq for Val {
    fn eq(&self, other: &Val) -> bool {
        match (self, other) {
            (Val::Enum(l), Val::Enum(r)) => l.type_id == r.type_id && l.index == r.index,
            (Val::Enum(_), _) | (_, Val::Enum(_)) => false,
            (l, r) => l.as_i128() == r.as_i128(),
        }
    }
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Bit(b) => write!(f, "{}", *b as u8),
            Val::Int(i) => write!(f, "{i}"),
            Val::Vec(v) => write!(f, "{v}"),
            Val::Enum(e) => write!(f, "#{}", e.index),
        }
    }
}

// ─── Next-value setters ───────────────────────────────────────

/// Validating setter installed per signal at construction.
pub type NextSetter = fn(&mut Val, Val, &str) -> Result<(), SimError>;

/// Choose the setter for a signal kind.
pub fn setter_for(kind: SignalKind) -> NextSetter {
    match kind {
        SignalKind::Bit => set_next_bit,
        SignalKind::Int => set_next_int,
        SignalKind::BitVec => set_next_vec,
        SignalKind::Enum => set_next_enum,
    }
}

fn set_next_bit(next: &mut Val, incoming: Val, name: &str) -> Result<(), SimError> {
    let v = incoming.as_i128().ok_or_else(|| SimError::TypeMismatch {
        signal: name.to_string(),
        expected: "bit",
        got: incoming.kind_name(),
    })?;
    if v != 0 && v != 1 {
        return Err(SimError::BoundsViolation {
            value: v,
            min: 0,
            max: 2,
        });
    }
    *next = Val::Bit(v == 1);
    Ok(())
}

fn set_next_int(next: &mut Val, incoming: Val, name: &str) -> Result<(), SimError> {
    let v = incoming.as_i128().ok_or_else(|| SimError::TypeMismatch {
        signal: name.to_string(),
        expected: "int",
        got: incoming.kind_name(),
    })?;
    *next = Val::Int(v as i64);
    Ok(())
}

fn set_next_vec(next: &mut Val, incoming: Val, name: &str) -> Result<(), SimError> {
    let v = incoming.as_i128().ok_or_else(|| SimError::TypeMismatch {
        signal: name.to_string(),
        expected: "bitvec",
        got: incoming.kind_name(),
    })?;
    match next {
        // the signal's own bounds stay authoritative; modular signals wrap here
        Val::Vec(bv) => bv.set(v),
        _ => unreachable!("bitvec signal holds non-vec next value"),
    }
}

fn set_next_enum(next: &mut Val, incoming: Val, name: &str) -> Result<(), SimError> {
    match (&*next, incoming) {
        (Val::Enum(cur), Val::Enum(inc)) if cur.type_id == inc.type_id => {
            *next = Val::Enum(inc);
            Ok(())
        }
        (_, inc) => Err(SimError::TypeMismatch {
            signal: name.to_string(),
            expected: "enum of the declared type",
            got: inc.kind_name(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitvec::bitvec;

    #[test]
    fn bit_setter_rejects_wide_values() {
        let mut next = Val::Bit(false);
        set_next_bit(&mut next, Val::Int(1), "s").unwrap();
        assert_eq!(next, Val::Bit(true));
        assert!(set_next_bit(&mut next, Val::Int(2), "s").is_err());
    }

    #[test]
    fn vec_setter_keeps_signal_bounds() {
        let mut next = Val::Vec(bitvec(0, 0, 8).unwrap());
        set_next_vec(&mut next, Val::Int(5), "s").unwrap();
        assert_eq!(next.as_i128(), Some(5));
        assert!(set_next_vec(&mut next, Val::Int(8), "s").is_err());
    }

    #[test]
    fn enum_setter_requires_same_type() {
        let t0 = EnumTypeId(0);
        let t1 = EnumTypeId(1);
        let mut next = Val::Enum(EnumVal {
            type_id: t0,
            index: 0,
            nrbits: 2,
        });
        let ok = Val::Enum(EnumVal {
            type_id: t0,
            index: 2,
            nrbits: 2,
        });
        set_next_enum(&mut next, ok, "s").unwrap();
        let bad = Val::Enum(EnumVal {
            type_id: t1,
            index: 0,
            nrbits: 2,
        });
        assert!(set_next_enum(&mut next, bad, "s").is_err());
    }

    #[test]
    fn one_hot_encoding_width() {
        let t = EnumType::new("state", vec!["a".into(), "b".into(), "c".into()], EnumEncoding::OneHot);
        assert_eq!(t.nrbits, 3);
        assert_eq!(t.encode(2), 0b100);
    }
}
