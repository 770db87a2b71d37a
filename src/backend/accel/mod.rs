//! Accelerated backend: tiled kernels and fused attention on the global rayon pool

mod kernels;

use super::Backend;
use super::kernels::run_node;
use crate::error::Result;
use crate::runtime::{Context, TensorId};
use kernels::TiledKernels;

const NAME: &str = "Accel";

#[derive(Debug, Default)]
pub struct AccelBackend {
    _private: (),
}

impl AccelBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for AccelBackend {
    fn name(&self) -> &str {
        NAME
    }

    fn compute_node(&self, ctx: &Context, node: TensorId) -> Result<()> {
        run_node(&TiledKernels, NAME, ctx, node)
    }
}
