//! Trailing-dimension reshapes used by multi-head attention.
//!
//! `split_last` turns `[B, S, D]` into `[B, S, H, D / H]` and `merge_last` undoes it. Both only
//! relabel the shape: the data is contiguous row-major, so no element moves.

use super::{Result, Tensor, TensorElem, TensorError};

/// One target dimension for [`Tensor::split_last`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dim {
    Fixed(usize),
    /// Inferred from the trailing size and the fixed dimensions. At most one per request.
    Infer,
}

impl From<usize> for Dim {
    fn from(size: usize) -> Self {
        Dim::Fixed(size)
    }
}

impl<T, const RANK: usize> Tensor<T, RANK>
where
    T: TensorElem,
{
    /// Splits the last dimension into `dims`.
    ///
    /// `NEW_RANK` must equal `RANK - 1 + dims.len()`.
    ///
    /// ```rust
    /// use vit_anomaly::tensor::{Dim, Tensor};
    ///
    /// let x = Tensor::<f32, 3>::zeros([2, 5, 8]);
    /// let heads: Tensor<f32, 4> = x.split_last(&[Dim::Fixed(2), Dim::Infer]).unwrap();
    /// assert_eq!(heads.shape(), &[2, 5, 2, 4]);
    /// ```
    ///
    /// # Errors
    ///
    /// - `TensorError::InvalidShape` if more than one `Dim::Infer` is given, `dims` is empty, or
    ///   `NEW_RANK` does not match.
    /// - `TensorError::ShapeMismatch` if the last dimension cannot be split as requested.
    pub fn split_last<const NEW_RANK: usize>(self, dims: &[Dim]) -> Result<Tensor<T, NEW_RANK>> {
        if RANK == 0 {
            return Err(TensorError::Unsupported(
                "split_last on a rank 0 tensor".to_string(),
            ));
        }
        if dims.is_empty() {
            return Err(TensorError::InvalidShape(
                "split_last needs at least one target dimension".to_string(),
            ));
        }
        if NEW_RANK != RANK - 1 + dims.len() {
            return Err(TensorError::InvalidShape(format!(
                "splitting the last dim of a rank {} tensor into {} dims yields rank {}, not {}",
                RANK,
                dims.len(),
                RANK - 1 + dims.len(),
                NEW_RANK
            )));
        }

        let infer_count = dims.iter().filter(|d| matches!(d, Dim::Infer)).count();
        if infer_count > 1 {
            return Err(TensorError::InvalidShape(format!(
                "at most one inferred dimension allowed, got {}",
                infer_count
            )));
        }

        let last = self.shape[RANK - 1];
        let fixed_product: usize = dims
            .iter()
            .map(|d| match d {
                Dim::Fixed(n) => *n,
                Dim::Infer => 1,
            })
            .product();

        let inferred = if infer_count == 1 {
            if fixed_product == 0 || last % fixed_product != 0 {
                return Err(TensorError::ShapeMismatch {
                    expected: vec![last],
                    got: vec![fixed_product],
                });
            }
            last / fixed_product
        } else {
            if fixed_product != last {
                return Err(TensorError::ShapeMismatch {
                    expected: vec![last],
                    got: vec![fixed_product],
                });
            }
            0
        };

        let mut new_shape = [0; NEW_RANK];
        new_shape[..RANK - 1].copy_from_slice(&self.shape[..RANK - 1]);
        for (slot, d) in new_shape[RANK - 1..].iter_mut().zip(dims) {
            *slot = match d {
                Dim::Fixed(n) => *n,
                Dim::Infer => inferred,
            };
        }

        self.reshape(new_shape)
    }

    /// Merges the last `n_dims` dimensions into one.
    ///
    /// `NEW_RANK` must equal `RANK - n_dims + 1`.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::InvalidShape` if `n_dims <= 1`, `n_dims >= RANK`, or `NEW_RANK` does
    /// not match.
    pub fn merge_last<const NEW_RANK: usize>(self, n_dims: usize) -> Result<Tensor<T, NEW_RANK>> {
        if n_dims <= 1 || n_dims >= RANK {
            return Err(TensorError::InvalidShape(format!(
                "merge_last needs 1 < n_dims < {}, got {}",
                RANK, n_dims
            )));
        }
        let kept = RANK - n_dims;
        if NEW_RANK != kept + 1 {
            return Err(TensorError::InvalidShape(format!(
                "merging {} dims of a rank {} tensor yields rank {}, not {}",
                n_dims,
                RANK,
                kept + 1,
                NEW_RANK
            )));
        }

        let mut new_shape = [0; NEW_RANK];
        new_shape[..kept].copy_from_slice(&self.shape[..kept]);
        new_shape[kept] = self.shape[kept..].iter().product();

        self.reshape(new_shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_last_infer() {
        let x = Tensor::<f32, 3>::zeros([2, 5, 8]);
        let y: Tensor<f32, 4> = x.split_last(&[Dim::Fixed(2), Dim::Infer]).unwrap();
        assert_eq!(y.shape(), &[2, 5, 2, 4]);
    }

    #[test]
    fn test_split_last_fixed() {
        let x = Tensor::<f32, 2>::zeros([3, 12]);
        let y: Tensor<f32, 4> = x.split_last(&[2.into(), 3.into(), 2.into()]).unwrap();
        assert_eq!(y.shape(), &[3, 2, 3, 2]);
    }

    #[test]
    fn test_split_last_errors() {
        let x = Tensor::<f32, 3>::zeros([2, 5, 8]);

        // Two wildcards.
        let res: Result<Tensor<f32, 4>> = x.clone().split_last(&[Dim::Infer, Dim::Infer]);
        assert!(matches!(res, Err(TensorError::InvalidShape(_))));

        // 8 is not divisible by 3.
        let res: Result<Tensor<f32, 4>> = x.clone().split_last(&[Dim::Fixed(3), Dim::Infer]);
        assert!(matches!(res, Err(TensorError::ShapeMismatch { .. })));

        // Fixed dims that do not multiply to 8.
        let res: Result<Tensor<f32, 4>> = x.clone().split_last(&[Dim::Fixed(2), Dim::Fixed(3)]);
        assert!(matches!(res, Err(TensorError::ShapeMismatch { .. })));

        // Output rank does not match the request.
        let res: Result<Tensor<f32, 5>> = x.split_last(&[Dim::Fixed(2), Dim::Infer]);
        assert!(matches!(res, Err(TensorError::InvalidShape(_))));
    }

    #[test]
    fn test_merge_last() {
        let x = Tensor::<f32, 4>::zeros([2, 5, 2, 4]);
        let y: Tensor<f32, 3> = x.merge_last(2).unwrap();
        assert_eq!(y.shape(), &[2, 5, 8]);

        let x = Tensor::<f32, 4>::zeros([2, 5, 2, 4]);
        let y: Tensor<f32, 2> = x.merge_last(3).unwrap();
        assert_eq!(y.shape(), &[2, 40]);
    }

    #[test]
    fn test_merge_last_errors() {
        let x = Tensor::<f32, 3>::zeros([2, 5, 8]);
        let res: Result<Tensor<f32, 3>> = x.clone().merge_last(1);
        assert!(matches!(res, Err(TensorError::InvalidShape(_))));

        let res: Result<Tensor<f32, 1>> = x.clone().merge_last(3);
        assert!(matches!(res, Err(TensorError::InvalidShape(_))));

        let res: Result<Tensor<f32, 3>> = x.merge_last(2);
        assert!(matches!(res, Err(TensorError::InvalidShape(_))));
    }
}

#[cfg(test)]
mod prop_tests {
    use crate::tensor::{Dim, Tensor};
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_split_merge_round_trip(
            b in 1usize..4,
            s in 1usize..6,
            heads in 1usize..5,
            head_dim in 1usize..6,
        ) {
            let d = heads * head_dim;
            let data: Vec<f32> = (0..b * s * d).map(|v| v as f32).collect();
            let x = Tensor::<f32, 3>::new(data, [b, s, d]).unwrap();

            let split: Tensor<f32, 4> = x.clone().split_last(&[Dim::Fixed(heads), Dim::Infer]).unwrap();
            prop_assert_eq!(split.shape(), &[b, s, heads, head_dim]);

            let merged: Tensor<f32, 3> = split.merge_last(2).unwrap();
            prop_assert_eq!(merged, x);
        }
    }
}
