//! Activation Functions.
//!
//! Activation functions introduce **non-linearity** into neural networks. The ViT MLP uses
//! **GELU** (Gaussian Error Linear Unit), a smooth relative of ReLU.

use crate::tensor::{Result, Tensor, TensorElem, cast};
use num_traits::Float;

const SQRT_2_OVER_PI: f64 = 0.797_884_560_802_865_4;
const GELU_CUBIC: f64 = 0.044_715;

/// Activation functions namespace.
///
/// Provides element-wise activation functions for Tensors.
pub struct Activation;

impl Activation {
    /// Applies the GELU activation function element-wise to a tensor.
    ///
    /// $$ \text{GELU}(x) \approx 0.5 x (1 + \tanh[\sqrt{2/\pi} (x + 0.044715 x^3)]) $$
    ///
    /// The tanh approximation stays within about `1e-3` of the exact `x * Phi(x)` form.
    pub fn gelu<const RANK: usize, T: TensorElem + Float>(
        x: &Tensor<T, RANK>,
    ) -> Result<Tensor<T, RANK>> {
        let half: T = cast(0.5)?;
        let k: T = cast(SQRT_2_OVER_PI)?;
        let c: T = cast(GELU_CUBIC)?;
        Ok(x.map(|v| half * v * (T::one() + (k * (v + c * v * v * v)).tanh())))
    }
}
