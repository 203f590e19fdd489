//! Anomaly transformer: an original stack and a cloned stack run side by side.
//!
//! At every selected layer both the original block and its clone see the same input (the
//! original path's state before that layer). The clones never feed back into the original
//! path, so comparing the two outputs layer by layer shows where the clones diverge.

use super::block::Block;
use super::stack::{Transformer, check_stack, set_stack_mode};
use crate::config::TransformerConfig;
use crate::nn::{Mode, Module};
use crate::tensor::{Result, Tensor, TensorElem, TensorError};
use num_traits::Float;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace};

/// A layer position that may count from the end.
///
/// Serializes as a signed integer: `-1` is [`LayerIndex::Last`], non-negative values are
/// [`LayerIndex::At`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum LayerIndex {
    At(usize),
    #[default]
    Last,
}

impl LayerIndex {
    /// Resolves against a stack of `num_layers` blocks.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::IndexOutOfBounds` if the index is not in `[0, num_layers)`.
    pub fn resolve(self, num_layers: usize) -> Result<usize> {
        let index = match self {
            LayerIndex::At(i) => i,
            LayerIndex::Last => num_layers.wrapping_sub(1),
        };
        if index >= num_layers {
            return Err(TensorError::IndexOutOfBounds {
                index: vec![index],
                shape: vec![num_layers],
            });
        }
        Ok(index)
    }
}

impl From<usize> for LayerIndex {
    fn from(i: usize) -> Self {
        LayerIndex::At(i)
    }
}

impl TryFrom<i64> for LayerIndex {
    type Error = TensorError;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            -1 => Ok(LayerIndex::Last),
            v if v >= 0 => usize::try_from(v)
                .map(LayerIndex::At)
                .map_err(|e| TensorError::InvalidConfig(e.to_string())),
            v => Err(TensorError::InvalidConfig(format!(
                "layer index must be -1 or non-negative, got {}",
                v
            ))),
        }
    }
}

impl From<LayerIndex> for i64 {
    fn from(index: LayerIndex) -> Self {
        match index {
            LayerIndex::At(i) => i64::try_from(i).unwrap_or(i64::MAX),
            LayerIndex::Last => -1,
        }
    }
}

/// Which layers of an [`AnomalyTransformer`] run their cloned block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CloneSelection {
    #[default]
    All,
    Single(LayerIndex),
    Set(Vec<LayerIndex>),
}

impl CloneSelection {
    /// Normalizes the selection against a stack of `num_layers` blocks.
    ///
    /// # Errors
    ///
    /// - `TensorError::IndexOutOfBounds` for any index outside `[0, num_layers)`.
    /// - `TensorError::InvalidConfig` for an empty `Set`.
    pub fn resolve(&self, num_layers: usize) -> Result<SelectedLayers> {
        let mut flags = vec![false; num_layers];
        match self {
            CloneSelection::All => flags.fill(true),
            CloneSelection::Single(index) => flags[index.resolve(num_layers)?] = true,
            CloneSelection::Set(indices) => {
                if indices.is_empty() {
                    return Err(TensorError::InvalidConfig(
                        "clone selection set is empty".to_string(),
                    ));
                }
                for index in indices {
                    flags[index.resolve(num_layers)?] = true;
                }
            }
        }
        Ok(SelectedLayers { flags })
    }
}

impl From<LayerIndex> for CloneSelection {
    fn from(index: LayerIndex) -> Self {
        CloneSelection::Single(index)
    }
}

/// A resolved [`CloneSelection`]: one flag per layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedLayers {
    flags: Vec<bool>,
}

impl SelectedLayers {
    pub fn contains(&self, layer: usize) -> bool {
        self.flags.get(layer).copied().unwrap_or(false)
    }

    /// Selected layers in ascending order, without duplicates.
    pub fn indices(&self) -> Vec<usize> {
        self.flags
            .iter()
            .enumerate()
            .filter_map(|(i, &on)| on.then_some(i))
            .collect()
    }

    pub fn last(&self) -> Option<usize> {
        self.flags.iter().rposition(|&on| on)
    }
}

/// Per-layer outputs of [`AnomalyTransformer::forward`].
#[derive(Debug, Clone)]
pub struct AnomalyOutput<T: TensorElem> {
    /// Original-path output after each selected layer, `[num_selected, batch, seq_len, dim]`.
    pub original: Tensor<T, 4>,
    /// Cloned-block output at each selected layer, same shape as `original`.
    pub cloned: Tensor<T, 4>,
    /// Layer index of each entry along the leading axis, ascending.
    pub layers: Vec<usize>,
}

impl<T: TensorElem> AnomalyOutput<T> {
    /// `(original, cloned)` outputs of one selected layer.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::IndexOutOfBounds` if `layer` was not selected.
    pub fn layer_pair(&self, layer: usize) -> Result<(Tensor<T, 3>, Tensor<T, 3>)> {
        let pos = self.layers.iter().position(|&l| l == layer).ok_or_else(|| {
            TensorError::IndexOutOfBounds {
                index: vec![layer],
                shape: self.layers.clone(),
            }
        })?;
        Ok((
            self.original.select_outer(pos)?,
            self.cloned.select_outer(pos)?,
        ))
    }
}

/// Two equally deep block stacks: `blocks` form the normal forward path, `cloned_blocks[i]`
/// shadows `blocks[i]`.
#[derive(Debug, Clone)]
pub struct AnomalyTransformer<T: TensorElem> {
    pub blocks: Vec<Block<T>>,
    pub cloned_blocks: Vec<Block<T>>,
}

impl<T: TensorElem + Float> AnomalyTransformer<T> {
    /// Randomly initializes both stacks independently.
    pub fn new<R: Rng>(config: &TransformerConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;
        let blocks = (0..config.num_layers)
            .map(|_| Block::init(config, rng))
            .collect::<Result<Vec<_>>>()?;
        let cloned_blocks = (0..config.num_layers)
            .map(|_| Block::init(config, rng))
            .collect::<Result<Vec<_>>>()?;
        Self::from_stacks(blocks, cloned_blocks)
    }

    /// # Errors
    ///
    /// Returns `TensorError::InvalidConfig` if the stacks are empty or differ in depth, and
    /// `TensorError::ShapeMismatch` if any block's width differs from the rest.
    pub fn from_stacks(blocks: Vec<Block<T>>, cloned_blocks: Vec<Block<T>>) -> Result<Self> {
        if blocks.len() != cloned_blocks.len() {
            return Err(TensorError::InvalidConfig(format!(
                "original and cloned stacks differ in depth: {} vs {}",
                blocks.len(),
                cloned_blocks.len()
            )));
        }
        check_stack(&blocks)?;
        check_stack(&cloned_blocks)?;
        if blocks[0].dim() != cloned_blocks[0].dim() {
            return Err(TensorError::ShapeMismatch {
                expected: vec![blocks[0].dim()],
                got: vec![cloned_blocks[0].dim()],
            });
        }

        let model = Self {
            blocks,
            cloned_blocks,
        };
        debug!(
            num_layers = model.num_layers(),
            num_parameters = model.num_parameters(),
            "built anomaly transformer"
        );
        Ok(model)
    }

    /// Uses `transformer` as the original path and a deep copy of it as the clones.
    ///
    /// Until the clones are modified both paths agree exactly.
    pub fn from_transformer(transformer: Transformer<T>) -> Result<Self> {
        let cloned_blocks = transformer.blocks.clone();
        Self::from_stacks(transformer.blocks, cloned_blocks)
    }

    pub fn num_layers(&self) -> usize {
        self.blocks.len()
    }

    /// Runs the original path and, at every selected layer, the cloned block on the same input.
    ///
    /// The pass stops after the last selected layer: later blocks cannot affect the result.
    #[instrument(level = "debug", skip_all, fields(shape = ?x.shape(), selection = ?selection))]
    pub fn forward(
        &self,
        x: &Tensor<T, 3>,
        mask: Option<&Tensor<T, 2>>,
        selection: &CloneSelection,
    ) -> Result<AnomalyOutput<T>> {
        // The stacks are public, so their depths may have drifted since construction.
        if self.blocks.len() != self.cloned_blocks.len() {
            return Err(TensorError::InvalidConfig(format!(
                "original and cloned stacks differ in depth: {} vs {}",
                self.blocks.len(),
                self.cloned_blocks.len()
            )));
        }
        let selected = selection.resolve(self.num_layers())?;
        let layers = selected.indices();
        let stop = selected.last().ok_or_else(|| {
            TensorError::InvalidConfig("no layers selected for cloning".to_string())
        })?;

        let mut originals = Vec::with_capacity(layers.len());
        let mut clones = Vec::with_capacity(layers.len());

        let mut h = x.clone();
        for (i, (block, cloned)) in self
            .blocks
            .iter()
            .zip(&self.cloned_blocks)
            .enumerate()
            .take(stop + 1)
        {
            if selected.contains(i) {
                trace!(layer = i, "original and cloned block");
                clones.push(cloned.forward(&h, mask)?);
                h = block.forward(&h, mask)?;
                originals.push(h.clone());
            } else {
                trace!(layer = i, "original block");
                h = block.forward(&h, mask)?;
            }
        }

        Ok(AnomalyOutput {
            original: Tensor::stack(&originals)?,
            cloned: Tensor::stack(&clones)?,
            layers,
        })
    }
}

impl<T: TensorElem + Float> Module<T> for AnomalyTransformer<T> {
    fn set_mode(&mut self, mode: Mode) {
        set_stack_mode(&mut self.blocks, mode);
        set_stack_mode(&mut self.cloned_blocks, mode);
    }

    fn num_parameters(&self) -> usize {
        self.blocks
            .iter()
            .chain(&self.cloned_blocks)
            .map(|b| b.num_parameters())
            .sum()
    }
}
