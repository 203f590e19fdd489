use crate::nn::Module;
use crate::tensor::{Result, Tensor, TensorElem, TensorError, cast};

use num_traits::Float;
use rand::Rng;
use rayon::prelude::*;
use vit_anomaly_kernels::cpu_matmul_nt;

/// Linear Layer: `y = xA^T + b`
///
/// Performs a linear transformation on the last dimension of the input. All leading
/// dimensions are treated as a batch, so `[B, S, in]` maps to `[B, S, out]`.
///
/// # Examples
/// ```rust
/// use vit_anomaly::nn::Linear;
/// use vit_anomaly::tensor::Tensor;
/// // Create a layer with 10 inputs and 5 outputs
/// let layer = Linear::<f32>::new(
///     Tensor::zeros([5, 10]), // Weights: [out, in]
///     Some(Tensor::zeros([5])) // Bias: [out]
/// ).unwrap();
/// assert_eq!(layer.in_features(), 10);
/// ```
#[derive(Debug, Clone)]
pub struct Linear<T: TensorElem> {
    /// The learnable weights of the layer.
    /// - Shape: `[out_features, in_features]`
    pub weight: Tensor<T, 2>,

    /// The learnable bias of the layer.
    /// - Shape: `[out_features]`
    pub bias: Option<Tensor<T, 1>>,
}

impl<T: TensorElem> Linear<T> {
    /// Creates a new Linear layer from explicit parameters.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::ShapeMismatch` if the bias length differs from `out_features`.
    pub fn new(weight: Tensor<T, 2>, bias: Option<Tensor<T, 1>>) -> Result<Self> {
        if let Some(b) = &bias {
            if b.shape()[0] != weight.shape()[0] {
                return Err(TensorError::ShapeMismatch {
                    expected: vec![weight.shape()[0]],
                    got: vec![b.shape()[0]],
                });
            }
        }
        Ok(Self { weight, bias })
    }

    pub fn in_features(&self) -> usize {
        self.weight.shape()[1]
    }

    pub fn out_features(&self) -> usize {
        self.weight.shape()[0]
    }

    /// Performs the forward pass of the Linear layer.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::ShapeMismatch` if the last dimension of `x` is not `in_features`.
    pub fn forward<const RANK: usize>(&self, x: &Tensor<T, RANK>) -> Result<Tensor<T, RANK>> {
        const { assert!(RANK >= 1, "Linear requires rank >= 1") };

        let in_features = self.in_features();
        let out_features = self.out_features();
        if x.shape()[RANK - 1] != in_features {
            return Err(TensorError::ShapeMismatch {
                expected: vec![in_features],
                got: vec![x.shape()[RANK - 1]],
            });
        }

        // Flatten leading dims into rows. The [out, in] weight is the `B^T` operand as stored.
        let rows = x.size() / in_features.max(1);
        let mut out_data = cpu_matmul_nt(
            x.data(),
            self.weight.data(),
            1,
            rows,
            in_features,
            out_features,
        )?;

        if let Some(b) = &self.bias {
            let bias_data = b.data();
            out_data
                .par_chunks_mut(out_features.max(1))
                .for_each(|row| {
                    for (o, &bv) in row.iter_mut().zip(bias_data) {
                        *o += bv;
                    }
                });
        }

        let mut out_shape = *x.shape();
        out_shape[RANK - 1] = out_features;
        Tensor::new(out_data, out_shape)
    }
}

impl<T: TensorElem + Float> Linear<T> {
    /// Creates a layer with PyTorch-default initialization.
    ///
    /// Weights and bias are drawn from `U(-1/sqrt(in_features), 1/sqrt(in_features))`.
    pub fn init<R: Rng>(
        in_features: usize,
        out_features: usize,
        rng: &mut R,
    ) -> Result<Self> {
        if in_features == 0 || out_features == 0 {
            return Err(TensorError::InvalidConfig(format!(
                "linear layer needs nonzero features, got {} -> {}",
                in_features, out_features
            )));
        }
        let bound = 1.0 / (in_features as f64).sqrt();

        let weight = (0..out_features * in_features)
            .map(|_| cast(rng.random_range(-bound..bound)))
            .collect::<Result<Vec<T>>>()?;
        let bias = (0..out_features)
            .map(|_| cast(rng.random_range(-bound..bound)))
            .collect::<Result<Vec<T>>>()?;

        Self::new(
            Tensor::new(weight, [out_features, in_features])?,
            Some(Tensor::new(bias, [out_features])?),
        )
    }
}

impl<T: TensorElem> Module<T> for Linear<T> {
    fn num_parameters(&self) -> usize {
        self.weight.size() + self.bias.as_ref().map_or(0, |b| b.size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_linear_forward_2d() {
        // Weight [2, 3]: row 0 sums inputs, row 1 picks the last input.
        let weight = Tensor::new(vec![1.0, 1.0, 1.0, 0.0, 0.0, 1.0], [2, 3]).unwrap();
        let bias = Tensor::new(vec![0.5, -1.0], [2]).unwrap();
        let layer = Linear::new(weight, Some(bias)).unwrap();

        let x = Tensor::<f32, 2>::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], [2, 3]).unwrap();
        let y = layer.forward(&x).unwrap();

        assert_eq!(y.shape(), &[2, 2]);
        assert_eq!(y.data(), &[6.5, 2.0, 15.5, 5.0]);
    }

    #[test]
    fn test_linear_forward_3d_no_bias() {
        let weight = Tensor::<f32, 2>::new(vec![2.0, 0.0, 0.0, 3.0], [2, 2]).unwrap();
        let layer = Linear::new(weight, None).unwrap();

        let x = Tensor::<f32, 3>::new(vec![1.0, 1.0, 2.0, 2.0, 3.0, 3.0], [1, 3, 2]).unwrap();
        let y = layer.forward(&x).unwrap();

        assert_eq!(y.shape(), &[1, 3, 2]);
        assert_eq!(y.data(), &[2.0, 3.0, 4.0, 6.0, 6.0, 9.0]);
    }

    #[test]
    fn test_linear_shape_mismatch() {
        let layer = Linear::<f32>::new(Tensor::zeros([4, 3]), None).unwrap();
        let x = Tensor::<f32, 2>::zeros([2, 5]);
        assert!(matches!(
            layer.forward(&x),
            Err(TensorError::ShapeMismatch { .. })
        ));

        let bad_bias = Linear::<f32>::new(Tensor::zeros([4, 3]), Some(Tensor::zeros([3])));
        assert!(bad_bias.is_err());
    }

    #[test]
    fn test_linear_init_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let layer = Linear::<f32>::init(16, 4, &mut rng).unwrap();
        let bound = 1.0 / 4.0;

        assert_eq!(layer.weight.shape(), &[4, 16]);
        assert!(layer.weight.data().iter().all(|w| w.abs() <= bound));
        assert!(layer.weight.data().iter().any(|w| *w != 0.0));
        assert_eq!(Module::<f32>::num_parameters(&layer), 4 * 16 + 4);

        assert!(Linear::<f32>::init(0, 4, &mut rng).is_err());
    }

    #[test]
    fn test_linear_init_is_seeded() {
        let a = Linear::<f64>::init(8, 8, &mut StdRng::seed_from_u64(1)).unwrap();
        let b = Linear::<f64>::init(8, 8, &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(a.weight, b.weight);
        assert_eq!(a.bias, b.bias);
    }
}
