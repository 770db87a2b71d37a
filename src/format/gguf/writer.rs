//! Metadata-only GGUF v3 writer
//!
//! Emits files with key/value pairs and no tensors, which is all a
//! vocabulary file needs.

use super::reader::GGUF_MAGIC;
use super::value::GgufValue;
use crate::error::{Error, Result};
use std::io::Write;
use std::path::Path;

/// Builder for metadata-only GGUF files, written in insertion order
#[derive(Debug, Default)]
pub struct GgufWriter {
    kv: Vec<(String, GgufValue)>,
}

impl GgufWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: impl Into<String>, value: GgufValue) -> &mut Self {
        self.kv.push((key.into(), value));
        self
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&GGUF_MAGIC.to_le_bytes());
        buf.extend_from_slice(&3u32.to_le_bytes());
        buf.extend_from_slice(&0u64.to_le_bytes());
        buf.extend_from_slice(&(self.kv.len() as u64).to_le_bytes());
        for (key, value) in &self.kv {
            put_str(&mut buf, key);
            buf.extend_from_slice(&(value.value_type() as u32).to_le_bytes());
            put_value(&mut buf, value)?;
        }
        Ok(buf)
    }

    pub fn write_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let bytes = self.to_bytes()?;
        let mut file = std::fs::File::create(path)?;
        file.write_all(&bytes)?;
        file.flush()?;
        Ok(())
    }
}

fn put_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u64).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn put_value(buf: &mut Vec<u8>, value: &GgufValue) -> Result<()> {
    match value {
        GgufValue::Uint8(v) => buf.push(*v),
        GgufValue::Int8(v) => buf.push(*v as u8),
        GgufValue::Uint16(v) => buf.extend_from_slice(&v.to_le_bytes()),
        GgufValue::Int16(v) => buf.extend_from_slice(&v.to_le_bytes()),
        GgufValue::Uint32(v) => buf.extend_from_slice(&v.to_le_bytes()),
        GgufValue::Int32(v) => buf.extend_from_slice(&v.to_le_bytes()),
        GgufValue::Float32(v) => buf.extend_from_slice(&v.to_le_bytes()),
        GgufValue::Bool(v) => buf.push(u8::from(*v)),
        GgufValue::String(s) => put_str(buf, s),
        GgufValue::Uint64(v) => buf.extend_from_slice(&v.to_le_bytes()),
        GgufValue::Int64(v) => buf.extend_from_slice(&v.to_le_bytes()),
        GgufValue::Float64(v) => buf.extend_from_slice(&v.to_le_bytes()),
        GgufValue::Array(items) => {
            let elem = items.first().map(GgufValue::value_type);
            if items.iter().any(|it| Some(it.value_type()) != elem) {
                return Err(Error::InvalidArgument {
                    arg: "value",
                    reason: "GGUF arrays must be homogeneous".into(),
                });
            }
            // empty arrays are tagged as u8
            let tag = elem.map_or(0, |t| t as u32);
            buf.extend_from_slice(&tag.to_le_bytes());
            buf.extend_from_slice(&(items.len() as u64).to_le_bytes());
            for it in items {
                put_value(buf, it)?;
            }
        }
    }
    Ok(())
}
