//! Single-clone anomaly transformer.
//!
//! The earlier form of [`AnomalyTransformer`](super::AnomalyTransformer): one cloned block at a
//! fixed layer, and the pass returns as soon as that layer is reached.

use super::anomaly::LayerIndex;
use super::block::Block;
use super::stack::{check_stack, set_stack_mode};
use crate::config::TransformerConfig;
use crate::nn::{Mode, Module};
use crate::tensor::{Result, Tensor, TensorElem, TensorError};
use num_traits::Float;
use rand::Rng;
use tracing::{debug, instrument, trace};

#[derive(Debug, Clone)]
pub struct SingleCloneAnomalyTransformer<T: TensorElem> {
    pub blocks: Vec<Block<T>>,
    pub cloned_block: Block<T>,
    clone_block_ind: usize,
}

impl<T: TensorElem + Float> SingleCloneAnomalyTransformer<T> {
    /// Randomly initialized model cloning layer `config.clone_block_ind`.
    pub fn new<R: Rng>(config: &TransformerConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;
        let blocks = (0..config.num_layers)
            .map(|_| Block::init(config, rng))
            .collect::<Result<Vec<_>>>()?;
        let cloned_block = Block::init(config, rng)?;
        Self::from_parts(blocks, cloned_block, config.clone_block_ind)
    }

    /// # Errors
    ///
    /// - `TensorError::IndexOutOfBounds` if `clone_block_ind` does not name a layer.
    /// - `TensorError::InvalidConfig` / `TensorError::ShapeMismatch` for an empty stack or
    ///   mismatched widths.
    pub fn from_parts(
        blocks: Vec<Block<T>>,
        cloned_block: Block<T>,
        clone_block_ind: LayerIndex,
    ) -> Result<Self> {
        check_stack(&blocks)?;
        if cloned_block.dim() != blocks[0].dim() {
            return Err(TensorError::ShapeMismatch {
                expected: vec![blocks[0].dim()],
                got: vec![cloned_block.dim()],
            });
        }
        let clone_block_ind = clone_block_ind.resolve(blocks.len())?;

        debug!(
            num_layers = blocks.len(),
            clone_block_ind, "built single-clone anomaly transformer"
        );
        Ok(Self {
            blocks,
            cloned_block,
            clone_block_ind,
        })
    }

    /// The resolved clone point, always in `[0, num_layers)`.
    pub fn clone_block_ind(&self) -> usize {
        self.clone_block_ind
    }

    /// Runs the original blocks up to and including the clone point.
    ///
    /// Returns `(original_output, cloned_output)` at that layer; blocks after it never run.
    #[instrument(level = "debug", skip_all, fields(shape = ?x.shape(), clone_block_ind = self.clone_block_ind))]
    pub fn forward(
        &self,
        x: &Tensor<T, 3>,
        mask: Option<&Tensor<T, 2>>,
    ) -> Result<(Tensor<T, 3>, Tensor<T, 3>)> {
        // `blocks` is public and may have been shortened since construction.
        if self.clone_block_ind >= self.blocks.len() {
            return Err(TensorError::IndexOutOfBounds {
                index: vec![self.clone_block_ind],
                shape: vec![self.blocks.len()],
            });
        }

        let mut h = x.clone();
        for block in &self.blocks[..self.clone_block_ind] {
            h = block.forward(&h, mask)?;
        }

        trace!(layer = self.clone_block_ind, "original and cloned block");
        let cloned = self.cloned_block.forward(&h, mask)?;
        let original = self.blocks[self.clone_block_ind].forward(&h, mask)?;
        Ok((original, cloned))
    }
}

impl<T: TensorElem + Float> Module<T> for SingleCloneAnomalyTransformer<T> {
    fn set_mode(&mut self, mode: Mode) {
        set_stack_mode(&mut self.blocks, mode);
        set_stack_mode(std::slice::from_mut(&mut self.cloned_block), mode);
    }

    fn num_parameters(&self) -> usize {
        self.blocks
            .iter()
            .map(|b| b.num_parameters())
            .sum::<usize>()
            + self.cloned_block.num_parameters()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transformer::{AnomalyTransformer, CloneSelection};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn config(clone_block_ind: LayerIndex) -> TransformerConfig {
        TransformerConfig {
            num_layers: 3,
            clone_block_ind,
            ..TransformerConfig::tiny()
        }
    }

    fn sample_input() -> Tensor<f32, 3> {
        let data = (0..2 * 5 * 8).map(|i| ((i % 5) as f32) * 0.4 - 0.8).collect();
        Tensor::new(data, [2, 5, 8]).unwrap()
    }

    #[test]
    fn test_last_is_normalized_at_construction() {
        let mut rng = StdRng::seed_from_u64(0);
        let model =
            SingleCloneAnomalyTransformer::<f32>::new(&config(LayerIndex::Last), &mut rng).unwrap();
        assert_eq!(model.clone_block_ind(), 2);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let mut rng = StdRng::seed_from_u64(1);
        let res = SingleCloneAnomalyTransformer::<f32>::new(&config(LayerIndex::At(3)), &mut rng);
        assert!(matches!(res, Err(TensorError::IndexOutOfBounds { .. })));
    }

    #[test]
    fn test_forward_matches_multi_clone_variant() {
        let mut rng = StdRng::seed_from_u64(2);
        let legacy =
            SingleCloneAnomalyTransformer::<f32>::new(&config(LayerIndex::At(1)), &mut rng)
                .unwrap();

        // Same weights in the general model, with only layer 1 selected.
        let mut cloned_blocks = legacy.blocks.clone();
        cloned_blocks[1] = legacy.cloned_block.clone();
        let general = AnomalyTransformer::from_stacks(legacy.blocks.clone(), cloned_blocks).unwrap();

        let x = sample_input();
        let (original, cloned) = legacy.forward(&x, None).unwrap();
        let out = general
            .forward(&x, None, &CloneSelection::Single(LayerIndex::At(1)))
            .unwrap();

        assert_eq!(original.shape(), &[2, 5, 8]);
        assert_eq!((original, cloned), out.layer_pair(1).unwrap());
    }

    #[test]
    fn test_forward_rejects_blocks_shortened_past_clone_point() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut model =
            SingleCloneAnomalyTransformer::<f32>::new(&config(LayerIndex::Last), &mut rng).unwrap();
        model.blocks.truncate(1);
        assert!(matches!(
            model.forward(&sample_input(), None),
            Err(TensorError::IndexOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_clone_point_ignored_by_other_stacks() {
        // Only this variant reads `clone_block_ind`; it alone rejects a bad one.
        let mut rng = StdRng::seed_from_u64(5);
        let bad = config(LayerIndex::At(7));
        assert!(crate::transformer::Transformer::<f32>::new(&bad, &mut rng).is_ok());
        assert!(AnomalyTransformer::<f32>::new(&bad, &mut rng).is_ok());
        assert!(matches!(
            SingleCloneAnomalyTransformer::<f32>::new(&bad, &mut rng),
            Err(TensorError::IndexOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_num_parameters() {
        let mut rng = StdRng::seed_from_u64(3);
        let model =
            SingleCloneAnomalyTransformer::<f32>::new(&config(LayerIndex::Last), &mut rng).unwrap();
        assert_eq!(model.num_parameters(), 4 * model.cloned_block.num_parameters());
    }
}
