// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The dynamically-typed argument/return payload, restricted to the
// primitive set P = { int32, float32, float64, bool, string }.
// Port of the encode/decode branches in original_source's
// fn_invoker.cc / fn_registry.cc (which dispatch on `typeid(T).name()`)
// onto a tagged Rust enum instead of runtime type identity.

use crate::error::{Error, Result};

/// Tag identifying which member of `P` a [`Value`] holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Int32,
    Float32,
    Float64,
    Bool,
    String,
}

impl TypeTag {
    /// Fixed-width encoding size, or `None` for `String` (length-prefixed).
    fn fixed_width(self) -> Option<usize> {
        match self {
            TypeTag::Int32 => Some(4),
            TypeTag::Float32 => Some(4),
            TypeTag::Float64 => Some(8),
            TypeTag::Bool => Some(1),
            TypeTag::String => None,
        }
    }
}

/// A dynamically-typed primitive value: the only shape an argument or
/// return value may take on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int32(i32),
    Float32(f32),
    Float64(f64),
    Bool(bool),
    String(String),
}

impl Value {
    /// The type tag of this value.
    pub fn tag(&self) -> TypeTag {
        match self {
            Value::Int32(_) => TypeTag::Int32,
            Value::Float32(_) => TypeTag::Float32,
            Value::Float64(_) => TypeTag::Float64,
            Value::Bool(_) => TypeTag::Bool,
            Value::String(_) => TypeTag::String,
        }
    }

    /// Raw, host-endian encoding with no length prefix (the caller adds one
    /// per `spec.md` §3's "size_t length precedes the raw bytes" rule).
    pub fn encode_raw(&self) -> Vec<u8> {
        match self {
            Value::Int32(v) => v.to_ne_bytes().to_vec(),
            Value::Float32(v) => v.to_ne_bytes().to_vec(),
            Value::Float64(v) => v.to_ne_bytes().to_vec(),
            Value::Bool(v) => vec![if *v { 1 } else { 0 }],
            Value::String(s) => s.as_bytes().to_vec(),
        }
    }

    /// Decode `bytes` as `tag`. Fixed-width types must match their declared
    /// width exactly (`DecodeError` otherwise); `String` accepts any length,
    /// including zero (the empty-string boundary case).
    pub fn decode(tag: TypeTag, bytes: &[u8]) -> Result<Value> {
        if let Some(width) = tag.fixed_width() {
            if bytes.len() != width {
                return Err(Error::DecodeError(format!(
                    "expected {width} bytes for {tag:?}, got {}",
                    bytes.len()
                )));
            }
        }
        match tag {
            TypeTag::Int32 => {
                let arr: [u8; 4] = bytes.try_into().unwrap();
                Ok(Value::Int32(i32::from_ne_bytes(arr)))
            }
            TypeTag::Float32 => {
                let arr: [u8; 4] = bytes.try_into().unwrap();
                Ok(Value::Float32(f32::from_ne_bytes(arr)))
            }
            TypeTag::Float64 => {
                let arr: [u8; 8] = bytes.try_into().unwrap();
                Ok(Value::Float64(f64::from_ne_bytes(arr)))
            }
            TypeTag::Bool => Ok(Value::Bool(bytes[0] != 0)),
            TypeTag::String => {
                let s = String::from_utf8(bytes.to_vec())
                    .map_err(|e| Error::DecodeError(format!("invalid UTF-8 string: {e}")))?;
                Ok(Value::String(s))
            }
        }
    }
}
