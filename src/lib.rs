//! # vit-anomaly
//!
//! The transformer encoder backbone of a Vision Transformer (ViT), in pure Rust on the CPU,
//! plus an *anomaly* variant that runs cloned encoder blocks beside the original ones and
//! reports both outputs layer by layer.
//!
//! Inputs are already-embedded token sequences `[batch, seq_len, dim]`; patch embedding,
//! positional encoding and the classification head live outside this crate.
//!
//! ## Modules
//!
//! - [`mod@tensor`]: rank-typed CPU tensors, backed by the `vit-anomaly-kernels` crate.
//! - [`nn`]: Linear, LayerNorm, GELU, Dropout and the [`Module`](nn::Module) trait.
//! - [`transformer`]: attention, blocks, the plain stack and the anomaly stacks.
//! - [`config`]: [`TransformerConfig`] and its presets.
//!
//! ## Example
//!
//! ```rust
//! use rand::SeedableRng;
//! use rand::rngs::StdRng;
//! use vit_anomaly::tensor::Tensor;
//! use vit_anomaly::transformer::{AnomalyTransformer, CloneSelection};
//! use vit_anomaly::TransformerConfig;
//!
//! let config = TransformerConfig::tiny(); // 2 layers, dim 8, 2 heads
//! let mut rng = StdRng::seed_from_u64(0);
//! let model = AnomalyTransformer::<f32>::new(&config, &mut rng).unwrap();
//!
//! let x = Tensor::<f32, 3>::ones([2, 5, 8]);
//! let mask = Tensor::<f32, 2>::ones([2, 5]);
//! let out = model.forward(&x, Some(&mask), &CloneSelection::All).unwrap();
//!
//! assert_eq!(out.original.shape(), &[2, 2, 5, 8]);
//! assert_eq!(out.cloned.shape(), &[2, 2, 5, 8]);
//! ```

pub mod config;
pub mod nn;
pub mod tensor;
pub mod transformer;

pub use config::TransformerConfig;
pub use nn::{Mode, Module};
pub use tensor::{Tensor, TensorElem, TensorError};
