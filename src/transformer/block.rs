use super::attention::{AttentionOutput, MultiHeadedSelfAttention};
use super::feed_forward::PositionWiseFeedForward;
use crate::config::TransformerConfig;
use crate::nn::{Dropout, LayerNorm, Linear, Mode, Module};
use crate::tensor::{Result, Tensor, TensorElem, TensorError};
use num_traits::Float;
use rand::Rng;

/// Pre-norm transformer encoder block.
///
/// ```text
/// x = x + drop(proj(attn(norm1(x), mask)))
/// x = x + drop(pwff(norm2(x)))
/// ```
///
/// The block owns all of its parameters; cloning a block deep-copies them.
#[derive(Debug, Clone)]
pub struct Block<T: TensorElem> {
    pub attn: MultiHeadedSelfAttention<T>,
    pub proj: Linear<T>,
    pub norm1: LayerNorm<T>,
    pub pwff: PositionWiseFeedForward<T>,
    pub norm2: LayerNorm<T>,
    pub drop: Dropout,
}

impl<T: TensorElem + Float> Block<T> {
    /// Assembles a block from explicit sublayers, checking that their widths agree.
    pub fn new(
        attn: MultiHeadedSelfAttention<T>,
        proj: Linear<T>,
        norm1: LayerNorm<T>,
        pwff: PositionWiseFeedForward<T>,
        norm2: LayerNorm<T>,
        drop: Dropout,
    ) -> Result<Self> {
        let dim = attn.dim();
        let widths = [
            proj.in_features(),
            proj.out_features(),
            norm1.weight.shape()[0],
            pwff.fc1.in_features(),
            norm2.weight.shape()[0],
        ];
        if widths.iter().any(|&w| w != dim) {
            return Err(TensorError::ShapeMismatch {
                expected: vec![dim; widths.len()],
                got: widths.to_vec(),
            });
        }

        Ok(Self {
            attn,
            proj,
            norm1,
            pwff,
            norm2,
            drop,
        })
    }

    /// Randomly initialized block for `config`.
    pub fn init<R: Rng>(config: &TransformerConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;
        Self::new(
            MultiHeadedSelfAttention::init(config.dim, config.num_heads, config.dropout, rng)?,
            Linear::init(config.dim, config.dim, rng)?,
            LayerNorm::init(config.dim, config.layer_norm_eps)?,
            PositionWiseFeedForward::init(config.dim, config.ff_dim, rng)?,
            LayerNorm::init(config.dim, config.layer_norm_eps)?,
            Dropout::new(config.dropout)?,
        )
    }

    pub fn dim(&self) -> usize {
        self.attn.dim()
    }

    pub fn forward(&self, x: &Tensor<T, 3>, mask: Option<&Tensor<T, 2>>) -> Result<Tensor<T, 3>> {
        Ok(self.forward_with_scores(x, mask)?.output)
    }

    /// Runs the block and also returns the attention weights of its attention layer.
    pub fn forward_with_scores(
        &self,
        x: &Tensor<T, 3>,
        mask: Option<&Tensor<T, 2>>,
    ) -> Result<AttentionOutput<T>> {
        let AttentionOutput { output: h, scores } =
            self.attn.forward_with_scores(&self.norm1.forward(x)?, mask)?;
        let h = self.drop.forward(self.proj.forward(&h)?)?;
        let x = (x + &h)?; // Residual

        let h = self.drop.forward(self.pwff.forward(&self.norm2.forward(&x)?)?)?;
        let output = (&x + &h)?; // Residual

        Ok(AttentionOutput { output, scores })
    }
}

impl<T: TensorElem + Float> Module<T> for Block<T> {
    fn set_mode(&mut self, mode: Mode) {
        self.attn.set_mode(mode);
        Module::<T>::set_mode(&mut self.drop, mode);
    }

    fn num_parameters(&self) -> usize {
        self.attn.num_parameters()
            + self.proj.num_parameters()
            + self.norm1.num_parameters()
            + self.pwff.num_parameters()
            + self.norm2.num_parameters()
    }
}
