use super::attention::AttentionOutput;
use super::block::Block;
use crate::config::TransformerConfig;
use crate::nn::{Mode, Module};
use crate::tensor::{Result, Tensor, TensorElem, TensorError};
use num_traits::Float;
use rand::Rng;
use tracing::{debug, instrument, trace, warn};

/// Per-layer record of a full forward pass.
#[derive(Debug, Clone)]
pub struct TransformerTrace<T: TensorElem> {
    /// `hidden_states[i]` is the output of block `i`, shape `[batch, seq_len, dim]`.
    pub hidden_states: Vec<Tensor<T, 3>>,
    /// `attention_scores[i]` holds block `i`'s attention weights, `[batch, heads, seq_len, seq_len]`.
    pub attention_scores: Vec<Tensor<T, 4>>,
}

impl<T: TensorElem> TransformerTrace<T> {
    /// The output of the last block.
    pub fn output(&self) -> Option<&Tensor<T, 3>> {
        self.hidden_states.last()
    }
}

/// Sequential stack of encoder blocks.
#[derive(Debug, Clone)]
pub struct Transformer<T: TensorElem> {
    pub blocks: Vec<Block<T>>,
}

impl<T: TensorElem + Float> Transformer<T> {
    /// Randomly initialized stack of `config.num_layers` blocks.
    pub fn new<R: Rng>(config: &TransformerConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;
        let blocks = (0..config.num_layers)
            .map(|_| Block::init(config, rng))
            .collect::<Result<Vec<_>>>()?;
        Self::from_blocks(blocks)
    }

    /// Wraps pre-built blocks, e.g. ones filled by a weight loader.
    ///
    /// # Errors
    ///
    /// - `TensorError::InvalidConfig` if `blocks` is empty.
    /// - `TensorError::ShapeMismatch` if the blocks disagree on width.
    pub fn from_blocks(blocks: Vec<Block<T>>) -> Result<Self> {
        check_stack(&blocks)?;
        let transformer = Self { blocks };
        debug!(
            num_layers = transformer.num_layers(),
            dim = transformer.dim(),
            num_parameters = transformer.num_parameters(),
            "built transformer"
        );
        Ok(transformer)
    }

    pub fn num_layers(&self) -> usize {
        self.blocks.len()
    }

    pub fn dim(&self) -> usize {
        self.blocks.first().map_or(0, Block::dim)
    }

    /// Runs the blocks in order.
    ///
    /// With `output_layer_ind = Some(k)` the pass stops after block `k` (inclusive) and returns
    /// its output; `None` runs the whole stack.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::IndexOutOfBounds` if `k >= num_layers`, before any computation.
    #[instrument(level = "debug", skip_all, fields(shape = ?x.shape(), output_layer_ind = ?output_layer_ind))]
    pub fn forward(
        &self,
        x: &Tensor<T, 3>,
        mask: Option<&Tensor<T, 2>>,
        output_layer_ind: Option<usize>,
    ) -> Result<Tensor<T, 3>> {
        let last = match output_layer_ind {
            Some(k) if k >= self.num_layers() => {
                return Err(TensorError::IndexOutOfBounds {
                    index: vec![k],
                    shape: vec![self.num_layers()],
                });
            }
            Some(k) => k,
            None => self.num_layers().checked_sub(1).ok_or_else(|| {
                TensorError::InvalidConfig("transformer has no blocks".to_string())
            })?,
        };

        let mut h = x.clone();
        for (i, block) in self.blocks[..=last].iter().enumerate() {
            trace!(layer = i, "transformer block");
            h = block.forward(&h, mask)?;
        }
        Ok(h)
    }

    /// Runs the full stack, keeping every block's output and attention weights.
    #[instrument(level = "debug", skip_all, fields(shape = ?x.shape()))]
    pub fn forward_traced(
        &self,
        x: &Tensor<T, 3>,
        mask: Option<&Tensor<T, 2>>,
    ) -> Result<TransformerTrace<T>> {
        let mut hidden_states = Vec::with_capacity(self.num_layers());
        let mut attention_scores = Vec::with_capacity(self.num_layers());

        let mut h = x.clone();
        for (i, block) in self.blocks.iter().enumerate() {
            trace!(layer = i, "transformer block (traced)");
            let AttentionOutput { output, scores } = block.forward_with_scores(&h, mask)?;
            hidden_states.push(output.clone());
            attention_scores.push(scores);
            h = output;
        }

        Ok(TransformerTrace {
            hidden_states,
            attention_scores,
        })
    }
}

impl<T: TensorElem + Float> Module<T> for Transformer<T> {
    fn set_mode(&mut self, mode: Mode) {
        set_stack_mode(&mut self.blocks, mode);
    }

    fn num_parameters(&self) -> usize {
        self.blocks.iter().map(|b| b.num_parameters()).sum()
    }
}

/// Stacks must be non-empty and of uniform width.
pub(crate) fn check_stack<T: TensorElem + Float>(blocks: &[Block<T>]) -> Result<()> {
    let first = blocks
        .first()
        .ok_or_else(|| TensorError::InvalidConfig("a stack needs at least one block".to_string()))?;
    let dims: Vec<usize> = blocks.iter().map(Block::dim).collect();
    if dims.iter().any(|&d| d != first.dim()) {
        return Err(TensorError::ShapeMismatch {
            expected: vec![first.dim(); blocks.len()],
            got: dims,
        });
    }
    Ok(())
}

pub(crate) fn set_stack_mode<T: TensorElem + Float>(blocks: &mut [Block<T>], mode: Mode) {
    if mode == Mode::Train && blocks.iter().any(|b| b.drop.rate > 0.0) {
        warn!("train mode enables dropout; forward passes are no longer deterministic");
    }
    for block in blocks {
        block.set_mode(mode);
    }
}
