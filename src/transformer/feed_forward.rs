use crate::nn::{Activation, Linear, Module};
use crate::tensor::{Result, Tensor, TensorElem, TensorError};
use num_traits::Float;
use rand::Rng;

/// Position-wise feed-forward network: `fc2(gelu(fc1(x)))`, applied to every token.
#[derive(Debug, Clone)]
pub struct PositionWiseFeedForward<T: TensorElem> {
    /// `[ff_dim, dim]`
    pub fc1: Linear<T>,
    /// `[dim, ff_dim]`
    pub fc2: Linear<T>,
}

impl<T: TensorElem + Float> PositionWiseFeedForward<T> {
    pub fn new(fc1: Linear<T>, fc2: Linear<T>) -> Result<Self> {
        if fc1.out_features() != fc2.in_features() || fc1.in_features() != fc2.out_features() {
            return Err(TensorError::ShapeMismatch {
                expected: vec![fc1.in_features(), fc1.out_features()],
                got: vec![fc2.out_features(), fc2.in_features()],
            });
        }
        Ok(Self { fc1, fc2 })
    }

    pub fn init<R: Rng>(dim: usize, ff_dim: usize, rng: &mut R) -> Result<Self> {
        Self::new(Linear::init(dim, ff_dim, rng)?, Linear::init(ff_dim, dim, rng)?)
    }

    pub fn forward(&self, x: &Tensor<T, 3>) -> Result<Tensor<T, 3>> {
        let hidden = Activation::gelu(&self.fc1.forward(x)?)?;
        self.fc2.forward(&hidden)
    }
}

impl<T: TensorElem + Float> Module<T> for PositionWiseFeedForward<T> {
    fn num_parameters(&self) -> usize {
        self.fc1.num_parameters() + self.fc2.num_parameters()
    }
}
