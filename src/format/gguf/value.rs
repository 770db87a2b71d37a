//! GGUF metadata values

use super::types::GgufValueType;

/// A decoded GGUF metadata value
#[derive(Debug, Clone, PartialEq)]
pub enum GgufValue {
    Uint8(u8),
    Int8(i8),
    Uint16(u16),
    Int16(i16),
    Uint32(u32),
    Int32(i32),
    Float32(f32),
    Bool(bool),
    String(String),
    Array(Vec<GgufValue>),
    Uint64(u64),
    Int64(i64),
    Float64(f64),
}

impl GgufValue {
    /// Wire tag of this value
    pub fn value_type(&self) -> GgufValueType {
        match self {
            GgufValue::Uint8(_) => GgufValueType::Uint8,
            GgufValue::Int8(_) => GgufValueType::Int8,
            GgufValue::Uint16(_) => GgufValueType::Uint16,
            GgufValue::Int16(_) => GgufValueType::Int16,
            GgufValue::Uint32(_) => GgufValueType::Uint32,
            GgufValue::Int32(_) => GgufValueType::Int32,
            GgufValue::Float32(_) => GgufValueType::Float32,
            GgufValue::Bool(_) => GgufValueType::Bool,
            GgufValue::String(_) => GgufValueType::String,
            GgufValue::Array(_) => GgufValueType::Array,
            GgufValue::Uint64(_) => GgufValueType::Uint64,
            GgufValue::Int64(_) => GgufValueType::Int64,
            GgufValue::Float64(_) => GgufValueType::Float64,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            GgufValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match *self {
            GgufValue::Uint8(v) => Some(v as u32),
            GgufValue::Uint16(v) => Some(v as u32),
            GgufValue::Uint32(v) => Some(v),
            GgufValue::Int32(v) => u32::try_from(v).ok(),
            GgufValue::Uint64(v) => u32::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match *self {
            GgufValue::Int8(v) => Some(v as i32),
            GgufValue::Int16(v) => Some(v as i32),
            GgufValue::Int32(v) => Some(v),
            GgufValue::Uint32(v) => i32::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match *self {
            GgufValue::Float32(v) => Some(v),
            GgufValue::Float64(v) => Some(v as f32),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[GgufValue]> {
        match self {
            GgufValue::Array(arr) => Some(arr),
            _ => None,
        }
    }
}

impl From<&str> for GgufValue {
    fn from(s: &str) -> Self {
        GgufValue::String(s.to_string())
    }
}

impl From<u32> for GgufValue {
    fn from(v: u32) -> Self {
        GgufValue::Uint32(v)
    }
}
