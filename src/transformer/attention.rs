//! Multi-headed self-attention.

use crate::nn::{Dropout, Linear, Mode, Module};
use crate::tensor::{Dim, Result, Tensor, TensorElem, TensorError, cast};
use num_traits::Float;
use rand::Rng;
use rayon::prelude::*;

/// Penalty subtracted from the logits of padded key positions.
///
/// Large enough that the softmax weight of a padded position underflows to zero for any
/// realistic logit range, small enough to stay finite in `f32`.
const MASK_PENALTY: f64 = 10_000.0;

/// Output of [`MultiHeadedSelfAttention::forward_with_scores`].
#[derive(Debug, Clone)]
pub struct AttentionOutput<T: TensorElem> {
    /// Shape: `[batch, seq_len, dim]`
    pub output: Tensor<T, 3>,
    /// Post-softmax (and post-dropout) attention weights.
    /// - Shape: `[batch, num_heads, seq_len, seq_len]`
    pub scores: Tensor<T, 4>,
}

/// Multi-headed scaled dot-product self-attention.
///
/// Projects the input to queries, keys and values, splits the embedding into `num_heads`
/// subspaces, attends within each head and concatenates the heads back. There is no output
/// projection here; [`Block`](super::Block) owns it.
#[derive(Debug, Clone)]
pub struct MultiHeadedSelfAttention<T: TensorElem> {
    pub proj_q: Linear<T>,
    pub proj_k: Linear<T>,
    pub proj_v: Linear<T>,
    pub drop: Dropout,
    pub num_heads: usize,
}

impl<T: TensorElem + Float> MultiHeadedSelfAttention<T> {
    /// Builds the layer from explicit projections.
    ///
    /// # Errors
    ///
    /// - `TensorError::InvalidConfig` if the width is zero, or `num_heads` is zero or does not
    ///   divide the width.
    /// - `TensorError::ShapeMismatch` if the projections are not all `[dim, dim]`.
    pub fn new(
        proj_q: Linear<T>,
        proj_k: Linear<T>,
        proj_v: Linear<T>,
        num_heads: usize,
        dropout: f64,
    ) -> Result<Self> {
        let dim = proj_q.in_features();
        if dim == 0 {
            return Err(TensorError::InvalidConfig(
                "attention width must be positive".to_string(),
            ));
        }
        for proj in [&proj_q, &proj_k, &proj_v] {
            if proj.in_features() != dim || proj.out_features() != dim {
                return Err(TensorError::ShapeMismatch {
                    expected: vec![dim, dim],
                    got: proj.weight.shape().to_vec(),
                });
            }
        }
        if num_heads == 0 || dim % num_heads != 0 {
            return Err(TensorError::InvalidConfig(format!(
                "num_heads ({}) must be positive and divide dim ({})",
                num_heads, dim
            )));
        }

        Ok(Self {
            proj_q,
            proj_k,
            proj_v,
            drop: Dropout::new(dropout)?,
            num_heads,
        })
    }

    /// Randomly initialized attention over `dim`-wide tokens.
    pub fn init<R: Rng>(dim: usize, num_heads: usize, dropout: f64, rng: &mut R) -> Result<Self> {
        Self::new(
            Linear::init(dim, dim, rng)?,
            Linear::init(dim, dim, rng)?,
            Linear::init(dim, dim, rng)?,
            num_heads,
            dropout,
        )
    }

    pub fn dim(&self) -> usize {
        self.proj_q.in_features()
    }

    pub fn head_dim(&self) -> usize {
        self.dim() / self.num_heads
    }

    /// Attends over `x` of shape `[batch, seq_len, dim]`.
    ///
    /// `mask`, if given, has shape `[batch, seq_len]` with `1` for real tokens and `0` for
    /// padding; padded positions receive (numerically) zero attention from every query.
    pub fn forward(&self, x: &Tensor<T, 3>, mask: Option<&Tensor<T, 2>>) -> Result<Tensor<T, 3>> {
        Ok(self.forward_with_scores(x, mask)?.output)
    }

    /// Like [`forward`](Self::forward), also returning the attention weights.
    pub fn forward_with_scores(
        &self,
        x: &Tensor<T, 3>,
        mask: Option<&Tensor<T, 2>>,
    ) -> Result<AttentionOutput<T>> {
        let [b, s, _] = *x.shape();

        // (B, S, D) -> (B, S, H, W) -> (B, H, S, W)
        let q = self.split_heads(self.proj_q.forward(x)?)?;
        let k = self.split_heads(self.proj_k.forward(x)?)?;
        let v = self.split_heads(self.proj_v.forward(x)?)?;

        // (B, H, S, W) @ (B, H, W, S) -> (B, H, S, S)
        let mut scores = q.matmul_transposed(&k)?;
        scores.scale_inplace(cast::<T>(1.0 / (self.head_dim() as f64).sqrt())?);

        if let Some(mask) = mask {
            if mask.shape() != &[b, s] {
                return Err(TensorError::ShapeMismatch {
                    expected: vec![b, s],
                    got: mask.shape().to_vec(),
                });
            }
            self.apply_mask(&mut scores, mask)?;
        }

        scores.softmax_last_inplace()?;
        let scores = self.drop.forward(scores)?;

        // (B, H, S, S) @ (B, H, S, W) -> (B, H, S, W) -> (B, S, H, W) -> (B, S, D)
        let context = scores.matmul(&v)?.transpose_axes(1, 2)?;
        let output = context.merge_last(2)?;

        Ok(AttentionOutput { output, scores })
    }

    fn split_heads(&self, x: Tensor<T, 3>) -> Result<Tensor<T, 4>> {
        x.split_last::<4>(&[Dim::Fixed(self.num_heads), Dim::Infer])?
            .transpose_axes(1, 2)
    }

    /// `scores[b, h, i, j] -= 10000 * (1 - mask[b, j])`
    fn apply_mask(&self, scores: &mut Tensor<T, 4>, mask: &Tensor<T, 2>) -> Result<()> {
        let [_, heads, seq_len, _] = *scores.shape();
        if seq_len == 0 {
            return Ok(());
        }
        let penalty: T = cast(MASK_PENALTY)?;
        let mask_data = mask.data();

        // Every row of `scores` is one (batch, head, query) triple.
        scores
            .data_mut()
            .par_chunks_mut(seq_len)
            .enumerate()
            .for_each(|(row_idx, row)| {
                let batch_idx = row_idx / (heads * seq_len);
                let key_mask = &mask_data[batch_idx * seq_len..(batch_idx + 1) * seq_len];
                for (score, &m) in row.iter_mut().zip(key_mask) {
                    *score -= penalty * (T::one() - m);
                }
            });
        Ok(())
    }
}

impl<T: TensorElem + Float> Module<T> for MultiHeadedSelfAttention<T> {
    fn set_mode(&mut self, mode: Mode) {
        Module::<T>::set_mode(&mut self.drop, mode);
    }

    fn num_parameters(&self) -> usize {
        self.proj_q.num_parameters() + self.proj_k.num_parameters() + self.proj_v.num_parameters()
    }
}
