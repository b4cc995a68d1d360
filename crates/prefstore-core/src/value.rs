//! Typed preference values
//!
//! A [`Value`] is one of six variants. Each variant has a fixed one-byte
//! tag on disk, see [`ValueType`].

use std::collections::BTreeSet;
use std::fmt;

/// One stored preference value.
///
/// String sets are unordered and unique; a `BTreeSet` keeps encoding
/// deterministic for equal sets.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    StringSet(BTreeSet<String>),
    Int(i32),
    Bool(bool),
    Long(i64),
    Float(f32),
}

/// Value discriminant, as written in the type byte of each entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueType {
    String = 0,
    StringSet = 1,
    Int = 2,
    Bool = 3,
    Long = 4,
    Float = 5,
}

impl ValueType {
    /// The on-disk tag byte.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Parse a tag byte. Unknown tags return `None`.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(ValueType::String),
            1 => Some(ValueType::StringSet),
            2 => Some(ValueType::Int),
            3 => Some(ValueType::Bool),
            4 => Some(ValueType::Long),
            5 => Some(ValueType::Float),
            _ => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::String => "string",
            ValueType::StringSet => "string set",
            ValueType::Int => "int",
            ValueType::Bool => "bool",
            ValueType::Long => "long",
            ValueType::Float => "float",
        };
        f.write_str(name)
    }
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::String(_) => ValueType::String,
            Value::StringSet(_) => ValueType::StringSet,
            Value::Int(_) => ValueType::Int,
            Value::Bool(_) => ValueType::Bool,
            Value::Long(_) => ValueType::Long,
            Value::Float(_) => ValueType::Float,
        }
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<BTreeSet<String>> for Value {
    fn from(v: BTreeSet<String>) -> Self {
        Value::StringSet(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

/// Extraction of a concrete Rust type from a [`Value`], used by the typed getters.
pub trait FromValue: Sized {
    const TYPE: ValueType;

    /// Returns the payload if the variant matches, otherwise hands the value back.
    fn from_value(value: Value) -> Result<Self, Value>;
}

macro_rules! impl_from_value {
    ($ty:ty, $variant:ident) => {
        impl FromValue for $ty {
            const TYPE: ValueType = ValueType::$variant;

            fn from_value(value: Value) -> Result<Self, Value> {
                match value {
                    Value::$variant(v) => Ok(v),
                    other => Err(other),
                }
            }
        }
    };
}

impl_from_value!(String, String);
impl_from_value!(BTreeSet<String>, StringSet);
impl_from_value!(i32, Int);
impl_from_value!(bool, Bool);
impl_from_value!(i64, Long);
impl_from_value!(f32, Float);
