//! Harness configuration
//!
//! Every field has a default, so an empty JSON object is a valid config and
//! the binary works without one.

use crate::backend::BackendKind;
use crate::error::{Error, Result};
use crate::runtime::{KQ_MASK_PAD, pad};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Attention problem size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttentionShape {
    /// `d`: elements per head
    pub head_dim: usize,
    /// `B`: query length
    pub n_queries: usize,
    /// `S`: key/value length
    pub n_kv: usize,
    /// `H`: attention heads
    pub n_heads: usize,
}

impl Default for AttentionShape {
    fn default() -> Self {
        Self {
            head_dim: 64,
            n_queries: 2048,
            n_kv: 4096,
            n_heads: 32,
        }
    }
}

impl AttentionShape {
    pub fn validate(&self) -> Result<()> {
        for (name, v) in [
            ("head_dim", self.head_dim),
            ("n_queries", self.n_queries),
            ("n_kv", self.n_kv),
            ("n_heads", self.n_heads),
        ] {
            if v == 0 {
                return Err(Error::ConfigError {
                    reason: format!("{name} must be > 0"),
                });
            }
        }
        Ok(())
    }

    /// Mask rows: the query length padded to [`KQ_MASK_PAD`]
    pub fn mask_rows(&self) -> usize {
        pad(self.n_queries, KQ_MASK_PAD)
    }

    /// `1/√d`
    pub fn scale(&self) -> f32 {
        1.0 / (self.head_dim as f32).sqrt()
    }
}

/// Which attention graph to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphMode {
    /// One `flash_attn_ext` node
    #[default]
    Fused,
    /// `mul_mat` → `soft_max_ext` → `mul_mat` → `permute`
    Naive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    #[serde(default)]
    pub shape: AttentionShape,

    #[serde(default)]
    pub graph: GraphMode,

    /// Cross-check the primary backend against the CPU reference
    #[serde(default)]
    pub compare: bool,

    #[serde(default)]
    pub backend: BackendKind,

    /// Worker threads for CPU backends
    #[serde(default = "default_n_threads")]
    pub n_threads: usize,

    /// NMSE tolerance per node in compare mode
    #[serde(default = "default_max_err")]
    pub max_err: f64,

    /// Values printed from the result in single-backend mode
    #[serde(default = "default_dump_limit")]
    pub dump_limit: usize,
}

fn default_n_threads() -> usize {
    6
}

fn default_max_err() -> f64 {
    5e-4
}

fn default_dump_limit() -> usize {
    1024
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            shape: AttentionShape::default(),
            graph: GraphMode::default(),
            compare: false,
            backend: BackendKind::default(),
            n_threads: default_n_threads(),
            max_err: default_max_err(),
            dump_limit: default_dump_limit(),
        }
    }
}

impl HarnessConfig {
    pub fn validate(&self) -> Result<()> {
        self.shape.validate()?;
        if self.n_threads == 0 {
            return Err(Error::ConfigError {
                reason: "n_threads must be > 0".into(),
            });
        }
        if !(self.max_err.is_finite() && self.max_err > 0.0) {
            return Err(Error::ConfigError {
                reason: format!("max_err must be a positive number, got {}", self.max_err),
            });
        }
        Ok(())
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| Error::ConfigError {
            reason: format!("cannot read '{}': {e}", path.as_ref().display()),
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content).map_err(|e| Error::ConfigError {
            reason: format!("JSON parse error: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }
}
