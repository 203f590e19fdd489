//! Model configuration.
//!
//! `TransformerConfig` is plain data: it can be built in code from a preset, or deserialized
//! by the embedding application from whatever format it likes. Nothing here touches a file.

use crate::tensor::{Result, TensorError};
use crate::transformer::LayerIndex;
use serde::{Deserialize, Serialize};

/// Configuration for the transformer encoder stacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformerConfig {
    /// Number of encoder blocks
    pub num_layers: usize,
    /// Embedding width of every token
    pub dim: usize,
    /// Number of attention heads; must divide `dim`
    pub num_heads: usize,
    /// Hidden width of the position-wise feed-forward network
    pub ff_dim: usize,
    /// Dropout probability for attention weights and residual branches
    #[serde(default = "default_dropout")]
    pub dropout: f64,
    /// LayerNorm epsilon
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,
    /// Clone point of the single-clone anomaly transformer (`-1` = last layer).
    /// Checked against `num_layers` when that model is built, not by `validate`.
    #[serde(default)]
    pub clone_block_ind: LayerIndex,
}

fn default_dropout() -> f64 {
    0.1
}

fn default_layer_norm_eps() -> f64 {
    1e-6
}

impl Default for TransformerConfig {
    fn default() -> Self {
        Self::vit_b16()
    }
}

impl TransformerConfig {
    /// Create a new configuration with required parameters
    pub fn new(num_layers: usize, dim: usize, num_heads: usize, ff_dim: usize) -> Self {
        Self {
            num_layers,
            dim,
            num_heads,
            ff_dim,
            dropout: default_dropout(),
            layer_norm_eps: default_layer_norm_eps(),
            clone_block_ind: LayerIndex::Last,
        }
    }

    /// ViT-B/16 encoder: 12 layers, 768 wide, 12 heads, 3072 MLP.
    pub fn vit_b16() -> Self {
        Self::new(12, 768, 12, 3072)
    }

    /// ViT-L/16 encoder: 24 layers, 1024 wide, 16 heads, 4096 MLP.
    pub fn vit_l16() -> Self {
        Self::new(24, 1024, 16, 4096)
    }

    /// Two-layer toy model, small enough for unit tests.
    pub fn tiny() -> Self {
        Self {
            dropout: 0.0,
            ..Self::new(2, 8, 2, 16)
        }
    }

    pub fn head_dim(&self) -> usize {
        self.dim / self.num_heads
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.num_layers == 0 {
            return Err(TensorError::InvalidConfig(
                "num_layers must be positive".to_string(),
            ));
        }
        if self.dim == 0 || self.ff_dim == 0 {
            return Err(TensorError::InvalidConfig(
                "dim and ff_dim must be positive".to_string(),
            ));
        }
        if self.num_heads == 0 || self.dim % self.num_heads != 0 {
            return Err(TensorError::InvalidConfig(format!(
                "num_heads ({}) must be positive and divide dim ({})",
                self.num_heads, self.dim
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(TensorError::InvalidConfig(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        if self.layer_norm_eps.is_nan() || self.layer_norm_eps <= 0.0 {
            return Err(TensorError::InvalidConfig(format!(
                "layer_norm_eps must be positive, got {}",
                self.layer_norm_eps
            )));
        }
        Ok(())
    }
}
