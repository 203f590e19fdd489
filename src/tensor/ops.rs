//! Tensor operations.
//!
//! This module implements the mathematical engine of the crate:
//! - **Element-wise Arithmetic**: `+`, `-`, `*`, `/` on `&Tensor` (shapes must match exactly).
//! - **Matrix Multiplication**: batched matmuls over the last two dimensions.
//! - **Axis manipulation**: transposes, and stacking tensors along a new leading axis.
//!
//! Heavy lifting is delegated to `vit_anomaly_kernels` and parallelized with `rayon`.
//!
//! ```rust
//! use vit_anomaly::tensor::Tensor;
//!
//! let a = Tensor::<f32, 1>::new(vec![1.0, 2.0], [2]).unwrap();
//! let b = Tensor::<f32, 1>::new(vec![3.0, 4.0], [2]).unwrap();
//!
//! let c = (&a + &b).unwrap();
//! assert_eq!(c.data(), &[4.0, 6.0]);
//! ```

use super::{Result, Tensor, TensorElem, TensorError, compute_strides};

use num_traits::Float;
use rayon::prelude::*;
use std::ops::{Add, Div, Mul, Sub};
use vit_anomaly_kernels::{cpu_matmul, cpu_matmul_nt, cpu_softmax_rows, cpu_transpose};

/// Implements a binary arithmetic operation trait (e.g., `Add`, `Sub`) for `&Tensor`.
///
/// The generated impl checks shape equality, then applies the operation element-wise in
/// parallel using `rayon`.
macro_rules! impl_bin_op {
    ($trait:ident, $method:ident) => {
        impl<T, const RANK: usize> $trait for &Tensor<T, RANK>
        where
            T: TensorElem,
        {
            type Output = crate::tensor::Result<Tensor<T, RANK>>;

            fn $method(self, rhs: Self) -> Self::Output {
                if self.shape != rhs.shape {
                    return Err(TensorError::ShapeMismatch {
                        expected: self.shape.to_vec(),
                        got: rhs.shape.to_vec(),
                    });
                }

                let mut out = Tensor::zeros(self.shape);
                out.data
                    .par_iter_mut()
                    .zip(self.data.par_iter())
                    .zip(rhs.data.par_iter())
                    .for_each(|((o, a), b)| {
                        *o = a.$method(*b);
                    });

                Ok(out)
            }
        }
    };
}

impl_bin_op!(Add, add);
impl_bin_op!(Sub, sub);
impl_bin_op!(Mul, mul);
impl_bin_op!(Div, div);

impl<T, const RANK: usize> Tensor<T, RANK>
where
    T: TensorElem,
{
    /// Applies a function element-wise to the tensor.
    ///
    /// ```rust
    /// use vit_anomaly::tensor::Tensor;
    /// let t = Tensor::<f32, 1>::new(vec![1.0, 2.0, 3.0], [3]).unwrap();
    /// let squared = t.map(|x| x * x);
    /// assert_eq!(squared.data(), &[1.0, 4.0, 9.0]);
    /// ```
    pub fn map<F>(&self, f: F) -> Self
    where
        F: Fn(T) -> T + Sync + Send,
    {
        let mut out = Tensor::zeros(self.shape);
        out.data
            .par_iter_mut()
            .zip(self.data.par_iter())
            .for_each(|(o, i)| *o = f(*i));
        out
    }

    /// Multiplies every element by `factor` in place.
    pub fn scale_inplace(&mut self, factor: T) {
        self.data.par_iter_mut().for_each(|v| *v *= factor);
    }

    /// Number of independent matrices when the last two dimensions are treated as a matrix.
    fn batch_count(&self) -> usize {
        self.shape[..RANK - 2].iter().product()
    }

    fn check_batch_dims(&self, rhs: &Self) -> Result<()> {
        if self.shape[..RANK - 2] != rhs.shape[..RANK - 2] {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape.to_vec(),
                got: rhs.shape.to_vec(),
            });
        }
        Ok(())
    }

    /// Matrix Multiplication.
    ///
    /// Performs matrix multiplication on the last two dimensions of the tensors.
    /// If the rank is greater than 2, the leading dimensions are treated as batch dimensions
    /// and must match exactly.
    ///
    /// - **Rank 2**: `[M, K] x [K, N] -> [M, N]`
    /// - **Rank 3**: `[B, M, K] x [B, K, N] -> [B, M, N]`
    /// - **Rank 4**: `[B, H, M, K] x [B, H, K, N] -> [B, H, M, N]`
    pub fn matmul(&self, rhs: &Self) -> Result<Self> {
        const { assert!(RANK >= 2, "Matmul requires rank >= 2") };
        self.check_batch_dims(rhs)?;

        let m = self.shape[RANK - 2];
        let k = self.shape[RANK - 1];
        let n = rhs.shape[RANK - 1];
        if rhs.shape[RANK - 2] != k {
            return Err(TensorError::ShapeMismatch {
                expected: vec![k, n],
                got: vec![rhs.shape[RANK - 2], n],
            });
        }

        let mut out_shape = self.shape;
        out_shape[RANK - 1] = n;

        // This is where you would swap in a BLAS call or other accelerator
        let out_data = cpu_matmul(&self.data, &rhs.data, self.batch_count(), m, k, n)?;
        Tensor::new(out_data, out_shape)
    }

    /// Matrix multiplication against the transpose of `rhs`: `self @ rhs^T`.
    ///
    /// `[..., M, K] x [..., N, K] -> [..., M, N]`. Attention scores `Q K^T` use this to avoid
    /// materializing the transposed keys.
    pub fn matmul_transposed(&self, rhs: &Self) -> Result<Self> {
        const { assert!(RANK >= 2, "Matmul requires rank >= 2") };
        self.check_batch_dims(rhs)?;

        let m = self.shape[RANK - 2];
        let k = self.shape[RANK - 1];
        let n = rhs.shape[RANK - 2];
        if rhs.shape[RANK - 1] != k {
            return Err(TensorError::ShapeMismatch {
                expected: vec![n, k],
                got: vec![n, rhs.shape[RANK - 1]],
            });
        }

        let mut out_shape = self.shape;
        out_shape[RANK - 1] = n;

        let out_data = cpu_matmul_nt(&self.data, &rhs.data, self.batch_count(), m, k, n)?;
        Tensor::new(out_data, out_shape)
    }

    /// Transposes the last two dimensions.
    pub fn transpose(&self) -> Result<Self> {
        const { assert!(RANK >= 2, "Transpose requires rank >= 2") };
        let m = self.shape[RANK - 2];
        let n = self.shape[RANK - 1];
        let out_data = cpu_transpose(&self.data, self.batch_count(), m, n)?;

        let mut new_shape = self.shape;
        new_shape.swap(RANK - 1, RANK - 2);
        Tensor::new(out_data, new_shape)
    }

    /// Swaps two axes, physically moving the data so the result stays contiguous.
    ///
    /// Attention uses `transpose_axes(1, 2)` to go from `[B, S, H, D]` to `[B, H, S, D]` and back.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::IndexOutOfBounds` if `ax1` or `ax2` are out of bounds.
    pub fn transpose_axes(&self, ax1: usize, ax2: usize) -> Result<Self> {
        if ax1 >= RANK || ax2 >= RANK {
            return Err(TensorError::IndexOutOfBounds {
                index: vec![ax1, ax2],
                shape: self.shape.to_vec(),
            });
        }
        if ax1 == ax2 {
            return Ok(self.clone());
        }

        let mut new_shape = self.shape;
        new_shape.swap(ax1, ax2);
        let out_strides = compute_strides(&new_shape);

        // Output dim ax1 walks input dim ax2 and vice versa.
        let mut mapped_strides = self.strides;
        mapped_strides.swap(ax1, ax2);

        let mut out = Tensor::zeros(new_shape);
        let in_data = &self.data;
        out.data.par_iter_mut().enumerate().for_each(|(i, o)| {
            let mut rem = i;
            let mut src = 0;
            for d in 0..RANK {
                let coord = rem / out_strides[d];
                rem %= out_strides[d];
                src += coord * mapped_strides[d];
            }
            *o = in_data[src];
        });

        Ok(out)
    }

    /// Stacks equally shaped tensors along a new leading axis.
    ///
    /// `OUT` must equal `RANK + 1`; the result has shape `[items.len(), ..shape]`.
    ///
    /// # Errors
    ///
    /// - `TensorError::InvalidShape` if `items` is empty or `OUT != RANK + 1`.
    /// - `TensorError::ShapeMismatch` if the items do not all share one shape.
    pub fn stack<const OUT: usize>(items: &[Self]) -> Result<Tensor<T, OUT>> {
        if OUT != RANK + 1 {
            return Err(TensorError::InvalidShape(format!(
                "stacking rank {} tensors yields rank {}, not {}",
                RANK,
                RANK + 1,
                OUT
            )));
        }
        let first = items
            .first()
            .ok_or_else(|| TensorError::InvalidShape("cannot stack zero tensors".to_string()))?;

        let mut data = Vec::with_capacity(first.size() * items.len());
        for item in items {
            if item.shape != first.shape {
                return Err(TensorError::ShapeMismatch {
                    expected: first.shape.to_vec(),
                    got: item.shape.to_vec(),
                });
            }
            data.extend_from_slice(&item.data);
        }

        let mut out_shape = [0; OUT];
        out_shape[0] = items.len();
        out_shape[1..].copy_from_slice(&first.shape);
        Tensor::new(data, out_shape)
    }

    /// Returns the slice at `index` along the leading axis, dropping that axis.
    ///
    /// `INNER` must equal `RANK - 1`.
    pub fn select_outer<const INNER: usize>(&self, index: usize) -> Result<Tensor<T, INNER>> {
        if RANK == 0 || INNER + 1 != RANK {
            return Err(TensorError::InvalidShape(format!(
                "selecting from a rank {} tensor cannot yield rank {}",
                RANK, INNER
            )));
        }
        if index >= self.shape[0] {
            return Err(TensorError::IndexOutOfBounds {
                index: vec![index],
                shape: self.shape.to_vec(),
            });
        }

        let mut inner_shape = [0; INNER];
        inner_shape.copy_from_slice(&self.shape[1..]);
        let chunk = self.strides[0];
        Tensor::new(
            self.data[index * chunk..(index + 1) * chunk].to_vec(),
            inner_shape,
        )
    }

    /// Splits the tensor along its leading axis. Inverse of [`Tensor::stack`].
    pub fn unstack<const INNER: usize>(&self) -> Result<Vec<Tensor<T, INNER>>> {
        if RANK == 0 {
            return Err(TensorError::Unsupported(
                "cannot unstack a rank 0 tensor".to_string(),
            ));
        }
        (0..self.shape[0])
            .map(|i| self.select_outer(i))
            .collect()
    }
}

impl<T, const RANK: usize> Tensor<T, RANK>
where
    T: TensorElem + Float,
{
    /// Numerically stable softmax over the last dimension, in place.
    pub fn softmax_last_inplace(&mut self) -> Result<()> {
        const { assert!(RANK >= 1, "Softmax requires rank >= 1") };
        if self.data.is_empty() {
            return Ok(());
        }
        cpu_softmax_rows(&mut self.data, self.shape[RANK - 1])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arange<const RANK: usize>(shape: [usize; RANK]) -> Tensor<f32, RANK> {
        let size: usize = shape.iter().product();
        Tensor::new((0..size).map(|v| v as f32).collect(), shape).unwrap()
    }

    #[test]
    fn test_arithmetic() {
        let a = Tensor::<f32, 1>::new(vec![1.0, 2.0], [2]).unwrap();
        let b = Tensor::<f32, 1>::new(vec![3.0, 4.0], [2]).unwrap();

        let c = (&a + &b).unwrap();
        assert_eq!(c.data(), &[4.0, 6.0]);

        let c = (&a - &b).unwrap();
        assert_eq!(c.data(), &[-2.0, -2.0]);

        let d = (&a * &b).unwrap();
        assert_eq!(d.data(), &[3.0, 8.0]);

        let e = (&b / &a).unwrap();
        assert_eq!(e.data(), &[3.0, 2.0]);

        // Mismatch
        let f = Tensor::<f32, 1>::new(vec![1.0, 2.0, 3.0], [3]).unwrap();
        let err = &a + &f;
        assert!(matches!(err, Err(TensorError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_map_and_scale() {
        let t = Tensor::<f32, 1>::new(vec![1.0, -2.0, 3.0], [3]).unwrap();
        let abs = t.map(|x| x.abs());
        assert_eq!(abs.data(), &[1.0, 2.0, 3.0]);

        let mut s = t.clone();
        s.scale_inplace(2.0);
        assert_eq!(s.data(), &[2.0, -4.0, 6.0]);
    }

    #[test]
    fn test_matmul_2d() {
        // A: [2, 3], B: [3, 2] -> C: [2, 2]
        let a = Tensor::<f32, 2>::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], [2, 3]).unwrap();
        let b = Tensor::<f32, 2>::new(vec![7.0, 8.0, 9.0, 1.0, 2.0, 3.0], [3, 2]).unwrap();

        let c = a.matmul(&b).unwrap();
        assert_eq!(c.shape(), &[2, 2]);
        // [1*7+2*9+3*2, 1*8+2*1+3*3] = [31, 19]
        // [4*7+5*9+6*2, 4*8+5*1+6*3] = [85, 55]
        assert_eq!(c.data(), &[31.0, 19.0, 85.0, 55.0]);
    }

    #[test]
    fn test_matmul_4d_and_transposed() {
        let a = arange([2, 3, 4, 5]);
        let b = arange([2, 3, 6, 5]);

        let via_nt = a.matmul_transposed(&b).unwrap();
        let via_t = a.matmul(&b.transpose().unwrap()).unwrap();
        assert_eq!(via_nt.shape(), &[2, 3, 4, 6]);
        assert_eq!(via_nt, via_t);
    }

    #[test]
    fn test_matmul_mismatch() {
        let a = Tensor::<f32, 3>::zeros([2, 3, 4]);
        let b = Tensor::<f32, 3>::zeros([2, 5, 6]);
        assert!(matches!(
            a.matmul(&b),
            Err(TensorError::ShapeMismatch { .. })
        ));

        let c = Tensor::<f32, 3>::zeros([3, 4, 6]);
        assert!(matches!(
            a.matmul(&c),
            Err(TensorError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_transpose_last_two() {
        let t = arange([2, 3]);
        let tt = t.transpose().unwrap();
        assert_eq!(tt.shape(), &[3, 2]);
        assert_eq!(tt.data(), &[0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
    }

    #[test]
    fn test_transpose_axes_rank4() {
        // [B=2, S=3, H=2, D=2] -> [B, H, S, D]
        let t = arange([2, 3, 2, 2]);
        let swapped = t.transpose_axes(1, 2).unwrap();
        assert_eq!(swapped.shape(), &[2, 2, 3, 2]);

        for b in 0..2 {
            for s in 0..3 {
                for h in 0..2 {
                    for d in 0..2 {
                        assert_eq!(
                            t.get([b, s, h, d]).unwrap(),
                            swapped.get([b, h, s, d]).unwrap()
                        );
                    }
                }
            }
        }

        // Swapping back restores the original.
        assert_eq!(swapped.transpose_axes(1, 2).unwrap(), t);
    }

    #[test]
    fn test_transpose_axes_out_of_bounds() {
        let t = arange([2, 3]);
        assert!(matches!(
            t.transpose_axes(0, 2),
            Err(TensorError::IndexOutOfBounds { .. })
        ));
        assert_eq!(t.transpose_axes(1, 1).unwrap(), t);
    }

    #[test]
    fn test_stack_unstack() {
        let a = arange([2, 3]);
        let b = a.map(|x| x + 100.0);

        let stacked: Tensor<f32, 3> = Tensor::stack(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(stacked.shape(), &[2, 2, 3]);
        assert_eq!(stacked.select_outer::<2>(1).unwrap(), b);

        let parts: Vec<Tensor<f32, 2>> = stacked.unstack().unwrap();
        assert_eq!(parts, vec![a, b]);
    }

    #[test]
    fn test_stack_errors() {
        let empty: Vec<Tensor<f32, 2>> = Vec::new();
        let res: Result<Tensor<f32, 3>> = Tensor::stack(&empty);
        assert!(matches!(res, Err(TensorError::InvalidShape(_))));

        let a = arange([2, 3]);
        let b = arange([3, 2]);
        let res: Result<Tensor<f32, 3>> = Tensor::stack(&[a.clone(), b]);
        assert!(matches!(res, Err(TensorError::ShapeMismatch { .. })));

        let wrong_rank: Result<Tensor<f32, 4>> = Tensor::stack(&[a.clone()]);
        assert!(matches!(wrong_rank, Err(TensorError::InvalidShape(_))));

        assert!(matches!(
            a.select_outer::<1>(2),
            Err(TensorError::IndexOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_softmax_last() {
        let mut t = Tensor::<f32, 2>::new(vec![1.0, 1.0, 0.0, 100.0], [2, 2]).unwrap();
        t.softmax_last_inplace().unwrap();
        assert!((t.data()[0] - 0.5).abs() < 1e-6);
        assert!((t.data()[1] - 0.5).abs() < 1e-6);
        assert!(t.data()[2] < 1e-6);
        assert!((t.data()[3] - 1.0).abs() < 1e-6);

        let mut empty = Tensor::<f32, 2>::zeros([0, 3]);
        assert!(empty.softmax_last_inplace().is_ok());
    }
}
