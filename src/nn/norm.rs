use crate::nn::Module;
use crate::tensor::{Result, Tensor, TensorElem, TensorError, cast};
use num_traits::Float;
use rayon::prelude::*;

/// Layer Normalization.
///
/// Normalizes the input tensor over its last dimension using the mean and (biased) variance.
/// Formula: `y = (x - mean) / sqrt(var + eps) * gamma + beta`
#[derive(Debug, Clone)]
pub struct LayerNorm<T: TensorElem> {
    pub weight: Tensor<T, 1>,
    pub bias: Tensor<T, 1>,
    pub eps: T,
}

impl<T: TensorElem + Float> LayerNorm<T> {
    /// Creates a new LayerNorm layer.
    ///
    /// # Arguments
    ///
    /// * `weight` - The scale weights (gamma) of shape `[features]`.
    /// * `bias` - The shift weights (beta) of shape `[features]`.
    /// * `eps` - A small constant for numerical stability.
    pub fn new(weight: Tensor<T, 1>, bias: Tensor<T, 1>, eps: T) -> Self {
        Self { weight, bias, eps }
    }

    /// Identity-initialized LayerNorm (`gamma = 1`, `beta = 0`) over `features`.
    pub fn init(features: usize, eps: f64) -> Result<Self> {
        Ok(Self::new(
            Tensor::ones([features]),
            Tensor::zeros([features]),
            cast(eps)?,
        ))
    }

    /// Performs the forward pass of LayerNorm.
    ///
    /// Normalizes the input over the last dimension.
    pub fn forward<const RANK: usize>(&self, x: &Tensor<T, RANK>) -> Result<Tensor<T, RANK>> {
        const { assert!(RANK >= 1, "LayerNorm requires rank >= 1") };

        let shape = x.shape();
        let last_dim = shape[RANK - 1];
        if last_dim != self.weight.shape()[0] || last_dim != self.bias.shape()[0] {
            return Err(TensorError::ShapeMismatch {
                expected: vec![last_dim, last_dim],
                got: vec![self.weight.shape()[0], self.bias.shape()[0]],
            });
        }

        let mut out = Tensor::zeros(*shape);
        if last_dim == 0 {
            return Ok(out);
        }
        let n = cast::<T>(last_dim as f64)?;
        let weight = self.weight.data();
        let bias = self.bias.data();

        out.data_mut()
            .par_chunks_mut(last_dim)
            .zip(x.data().par_chunks(last_dim))
            .for_each(|(out_row, in_row)| {
                let mut sum = T::zero();
                for &val in in_row {
                    sum += val;
                }
                let mean = sum / n;

                let mut sum_sq_diff = T::zero();
                for &val in in_row {
                    let diff = val - mean;
                    sum_sq_diff += diff * diff;
                }
                let var = sum_sq_diff / n;
                let rstd = T::one() / (var + self.eps).sqrt();

                for i in 0..last_dim {
                    out_row[i] = (in_row[i] - mean) * rstd * weight[i] + bias[i];
                }
            });

        Ok(out)
    }
}

impl<T: TensorElem> Module<T> for LayerNorm<T> {
    fn num_parameters(&self) -> usize {
        self.weight.size() + self.bias.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_layernorm_forward() {
        // Input: [1.0, 2.0, 3.0]
        // Mean: 2.0
        // Var: ((1-2)^2 + (2-2)^2 + (3-2)^2) / 3 = 2/3
        // Norm: [(1-2)/0.8165, 0, (3-2)/0.8165] -> [-1.2247, 0.0, 1.2247]
        let input = Tensor::<f32, 1>::new(vec![1.0, 2.0, 3.0], [3]).unwrap();
        let norm = LayerNorm::<f32>::init(3, 1e-5).unwrap();

        let output = norm.forward(&input).unwrap();

        let std = (2.0f32 / 3.0 + 1e-5).sqrt();
        let expected = [-1.0 / std, 0.0, 1.0 / std];
        for (got, exp) in output.data().iter().zip(expected.iter()) {
            assert_relative_eq!(*got, *exp, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_layernorm_affine_rows() {
        // Two rows normalized independently, then scaled by 2 and shifted by 1.
        let input = Tensor::<f64, 2>::new(vec![1.0, 3.0, 10.0, 30.0], [2, 2]).unwrap();
        let norm = LayerNorm::new(
            Tensor::full([2], 2.0),
            Tensor::full([2], 1.0),
            1e-6,
        );

        let output = norm.forward(&input).unwrap();
        let scale = 1.0 / (1.0f64 + 1e-6).sqrt();
        let scale2 = 1.0 / (100.0f64 + 1e-6).sqrt() * 10.0;
        assert_relative_eq!(output.data()[0], 1.0 - 2.0 * scale, epsilon = 1e-9);
        assert_relative_eq!(output.data()[1], 1.0 + 2.0 * scale, epsilon = 1e-9);
        assert_relative_eq!(output.data()[2], 1.0 - 2.0 * scale2, epsilon = 1e-9);
        assert_relative_eq!(output.data()[3], 1.0 + 2.0 * scale2, epsilon = 1e-9);
    }

    #[test]
    fn test_layernorm_shape_mismatch() {
        let norm = LayerNorm::<f32>::init(4, 1e-5).unwrap();
        let input = Tensor::<f32, 2>::zeros([2, 3]);
        assert!(norm.forward(&input).is_err());
        assert_eq!(Module::<f32>::num_parameters(&norm), 8);
    }
}
