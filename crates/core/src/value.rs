//! Attribute values
//!
//! This module defines `Value`, the payload of a user attribute junction.
//!
//! ## Value Model
//!
//! - Bool, Int, Float, String, Bytes, Reference, List
//! - There is no null variant: an attribute that is not set (or explicitly
//!   unset) resolves to `None` at the API surface.
//! - Different variants are NEVER equal: `Int(1) != Float(1.0)`.
//! - Float equality follows IEEE-754: `NaN != NaN`, `-0.0 == 0.0`.
//! - `is_identical` compares floats bit for bit. Stores use it to decide
//!   whether a write changes anything.
//!
//! `Reference` points at another artifact. References are reported to the
//! substrate when a revision commits, so it can check that the target exists.

use crate::types::AtomId;
use serde::{Deserialize, Serialize};

/// Value of a user attribute
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    /// Boolean value
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit floating point (IEEE-754)
    Float(f64),
    /// UTF-8 string
    String(String),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// Reference to another artifact
    Reference(AtomId),
    /// Ordered list of values
    List(Vec<Value>),
}

// IEEE-754 float semantics, cross-variant inequality
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Reference(a), Value::Reference(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    /// Get the type name as a string
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "Bool",
            Value::Int(_) => "Int",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::Bytes(_) => "Bytes",
            Value::Reference(_) => "Reference",
            Value::List(_) => "List",
        }
    }

    /// Get as bool if this is a Bool value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as i64 if this is an Int value
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as f64 if this is a Float value
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Get as &str if this is a String value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as byte slice if this is a Bytes value
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Get the referenced artifact if this is a Reference value
    pub fn as_reference(&self) -> Option<AtomId> {
        match self {
            Value::Reference(id) => Some(*id),
            _ => None,
        }
    }

    /// Get as list slice if this is a List value
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Bitwise identity: like `==`, except floats compare by their bits
    ///
    /// `NaN` is identical to the same `NaN`, and `-0.0` is not identical to `0.0`.
    pub fn is_identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.is_identical(y))
            }
            _ => self == other,
        }
    }

    /// All artifact keys referenced by this value, including nested list items
    pub fn referred_keys(&self) -> Vec<AtomId> {
        let mut keys = Vec::new();
        self.collect_referred(&mut keys);
        keys
    }

    fn collect_referred(&self, out: &mut Vec<AtomId>) {
        match self {
            Value::Reference(id) => out.push(*id),
            Value::List(items) => items.iter().for_each(|item| item.collect_referred(out)),
            _ => {}
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<AtomId> for Value {
    fn from(id: AtomId) -> Self {
        Value::Reference(id)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}
