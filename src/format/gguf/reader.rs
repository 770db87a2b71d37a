//! GGUF file reader
//!
//! Parses the GGUF binary layout (v1-v3) from a read-only memory map. Only
//! the header is decoded: the metadata and the tensor-info table. Tensor
//! data is never touched.

use super::GgufTensorInfo;
use super::metadata::GgufMetadata;
use super::types::{GgmlType, GgufValueType};
use super::value::GgufValue;
use crate::error::{Error, Result};
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

pub(crate) const GGUF_MAGIC: u32 = 0x46554747; // "GGUF" in little-endian

/// Header of a GGUF file
#[derive(Debug)]
pub struct Gguf {
    version: u32,
    metadata: GgufMetadata,
    tensors: Vec<GgufTensorInfo>,
}

impl Gguf {
    /// Map and parse a GGUF file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::VocabError {
            reason: format!("cannot open '{}': {e}", path.display()),
        })?;
        // SAFETY: the mapping is read-only and the harness never writes the
        // file while it is mapped.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| Error::VocabError {
            reason: format!("cannot map '{}': {e}", path.display()),
        })?;

        let header = parse_header(&mmap)?;
        tracing::debug!(
            path = %path.display(),
            version = header.version,
            n_kv = header.metadata.len(),
            n_tensors = header.tensors.len(),
            "parsed GGUF header"
        );

        Ok(Gguf {
            version: header.version,
            metadata: header.metadata,
            tensors: header.tensors,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn metadata(&self) -> &GgufMetadata {
        &self.metadata
    }

    /// Number of tensors listed in the header
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }
}

struct Header {
    version: u32,
    metadata: GgufMetadata,
    tensors: Vec<GgufTensorInfo>,
}

fn parse_header(bytes: &[u8]) -> Result<Header> {
    let mut cur = ByteCursor::new(bytes);

    let magic = cur.u32()?;
    if magic != GGUF_MAGIC {
        return Err(Error::VocabError {
            reason: format!("invalid GGUF magic: 0x{magic:08x}"),
        });
    }

    let version = cur.u32()?;
    if !(1..=3).contains(&version) {
        return Err(Error::VocabError {
            reason: format!("unsupported GGUF version: {version}"),
        });
    }

    let tensor_count = cur.count(version)?;
    let kv_count = cur.count(version)?;

    let mut metadata = GgufMetadata::default();
    for _ in 0..kv_count {
        let key = cur.string(version)?;
        let tag = cur.u32()?;
        let vt = value_type(tag)?;
        let value = cur.value(vt, version)?;
        metadata.kv.insert(key, value);
    }

    let mut tensors = Vec::with_capacity(tensor_count.min(cur.buf.len() - cur.pos));
    for _ in 0..tensor_count {
        tensors.push(cur.tensor_info(version)?);
    }

    Ok(Header {
        version,
        metadata,
        tensors,
    })
}

fn value_type(tag: u32) -> Result<GgufValueType> {
    GgufValueType::from_u32(tag).ok_or_else(|| Error::VocabError {
        reason: format!("invalid value type: {tag}"),
    })
}

/// Little-endian reader over the mapped header
struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.slice(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn slice(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&e| e <= self.buf.len());
        let Some(end) = end else {
            return Err(Error::VocabError {
                reason: format!(
                    "unexpected end of file at offset {} (wanted {n} bytes)",
                    self.pos
                ),
            });
        };
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        self.take().map(u16::from_le_bytes)
    }

    fn u32(&mut self) -> Result<u32> {
        self.take().map(u32::from_le_bytes)
    }

    fn u64(&mut self) -> Result<u64> {
        self.take().map(u64::from_le_bytes)
    }

    /// Counts and lengths are u32 in GGUF v1, u64 afterwards
    fn count(&mut self, version: u32) -> Result<usize> {
        let n = if version == 1 {
            self.u32()? as u64
        } else {
            self.u64()?
        };
        usize::try_from(n).map_err(|_| Error::VocabError {
            reason: format!("count {n} does not fit in memory"),
        })
    }

    fn string(&mut self, version: u32) -> Result<String> {
        let len = self.count(version)?;
        let bytes = self.slice(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| Error::VocabError {
            reason: format!("invalid UTF-8 at offset {}: {e}", self.pos - len),
        })
    }

    fn value(&mut self, vt: GgufValueType, version: u32) -> Result<GgufValue> {
        Ok(match vt {
            GgufValueType::Uint8 => GgufValue::Uint8(self.u8()?),
            GgufValueType::Int8 => GgufValue::Int8(self.u8()? as i8),
            GgufValueType::Uint16 => GgufValue::Uint16(self.u16()?),
            GgufValueType::Int16 => GgufValue::Int16(self.u16()? as i16),
            GgufValueType::Uint32 => GgufValue::Uint32(self.u32()?),
            GgufValueType::Int32 => GgufValue::Int32(self.u32()? as i32),
            GgufValueType::Float32 => GgufValue::Float32(f32::from_bits(self.u32()?)),
            GgufValueType::Bool => GgufValue::Bool(self.u8()? != 0),
            GgufValueType::String => GgufValue::String(self.string(version)?),
            GgufValueType::Uint64 => GgufValue::Uint64(self.u64()?),
            GgufValueType::Int64 => GgufValue::Int64(self.u64()? as i64),
            GgufValueType::Float64 => GgufValue::Float64(f64::from_bits(self.u64()?)),
            GgufValueType::Array => {
                let elem = value_type(self.u32()?)?;
                let len = self.count(version)?;
                // every element takes at least one byte
                let mut arr = Vec::with_capacity(len.min(self.buf.len() - self.pos));
                for _ in 0..len {
                    arr.push(self.value(elem, version)?);
                }
                GgufValue::Array(arr)
            }
        })
    }

    fn tensor_info(&mut self, version: u32) -> Result<GgufTensorInfo> {
        let name = self.string(version)?;
        let n_dims = self.u32()?;
        if n_dims > 4 {
            return Err(Error::VocabError {
                reason: format!("tensor '{name}' has {n_dims} dims, at most 4 supported"),
            });
        }
        let mut shape = Vec::with_capacity(n_dims as usize);
        for _ in 0..n_dims {
            shape.push(self.count(version)?);
        }
        let raw = self.u32()?;
        let ggml_type = GgmlType::from_u32(raw).ok_or_else(|| Error::VocabError {
            reason: format!("tensor '{name}' has unknown GGML type {raw}"),
        })?;
        let offset = self.u64()?;
        Ok(GgufTensorInfo {
            name,
            n_dims,
            shape,
            ggml_type,
            offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::gguf::GgufWriter;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_str(buf: &mut Vec<u8>, s: &str) {
        buf.extend_from_slice(&(s.len() as u64).to_le_bytes());
        buf.extend_from_slice(s.as_bytes());
    }

    /// GGUF v3 with one metadata key and one Q8_0 tensor, built by hand
    fn handmade_gguf() -> NamedTempFile {
        let mut buf = Vec::new();
        buf.extend_from_slice(&GGUF_MAGIC.to_le_bytes());
        buf.extend_from_slice(&3u32.to_le_bytes());
        buf.extend_from_slice(&1u64.to_le_bytes()); // tensors
        buf.extend_from_slice(&1u64.to_le_bytes()); // kv pairs

        write_str(&mut buf, "tokenizer.ggml.model");
        buf.extend_from_slice(&(GgufValueType::String as u32).to_le_bytes());
        write_str(&mut buf, "llama");

        write_str(&mut buf, "blk.0.w");
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&32u64.to_le_bytes());
        buf.extend_from_slice(&(GgmlType::Q8_0 as u32).to_le_bytes());
        buf.extend_from_slice(&0u64.to_le_bytes());

        buf.resize(buf.len().div_ceil(32) * 32, 0);
        buf.extend_from_slice(&half::f16::from_f32(0.5).to_le_bytes());
        buf.extend((0..32).map(|i| i as u8));

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&buf).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_open_handmade() {
        let f = handmade_gguf();
        let gguf = Gguf::open(f.path()).unwrap();
        assert_eq!(gguf.version(), 3);
        assert_eq!(gguf.metadata().get_string("tokenizer.ggml.model"), Some("llama"));
        assert_eq!(gguf.len(), 1);
        assert_eq!(gguf.tensors[0].name, "blk.0.w");
        assert_eq!(gguf.tensors[0].ggml_type, GgmlType::Q8_0);
        assert_eq!(gguf.tensors[0].shape, vec![32]);
    }

    #[test]
    fn test_bad_magic() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"GGML\x03\0\0\0").unwrap();
        file.flush().unwrap();
        let err = Gguf::open(file.path()).err().unwrap();
        assert!(err.to_string().contains("magic"));
    }

    #[test]
    fn test_truncated_header() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&GGUF_MAGIC.to_le_bytes());
        buf.extend_from_slice(&3u32.to_le_bytes());
        buf.extend_from_slice(&0u64.to_le_bytes());
        buf.extend_from_slice(&5u64.to_le_bytes()); // claims 5 kv pairs, has none
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&buf).unwrap();
        file.flush().unwrap();
        let err = Gguf::open(file.path()).err().unwrap();
        assert!(err.to_string().contains("unexpected end of file"));
    }

    #[test]
    fn test_writer_output_parses() {
        let mut w = GgufWriter::new();
        w.add("general.alignment", GgufValue::Uint32(64));
        w.add(
            "tokenizer.ggml.tokens",
            GgufValue::Array(vec!["a".into(), "b".into()]),
        );
        w.add(
            "tokenizer.ggml.scores",
            GgufValue::Array(vec![GgufValue::Float32(-1.0), GgufValue::Float32(-2.0)]),
        );
        let file = NamedTempFile::new().unwrap();
        w.write_to_path(file.path()).unwrap();

        let gguf = Gguf::open(file.path()).unwrap();
        let md = gguf.metadata();
        assert_eq!(md.get_u32("general.alignment"), Some(64));
        let tokens = md.get_array("tokenizer.ggml.tokens").unwrap();
        assert_eq!(tokens[1].as_string(), Some("b"));
        let scores = md.get_array("tokenizer.ggml.scores").unwrap();
        assert_eq!(scores[1].as_f32(), Some(-2.0));
        assert!(gguf.is_empty());
    }
}
