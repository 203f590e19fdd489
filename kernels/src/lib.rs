//! CPU compute kernels for `vit-anomaly`.
//!
//! Kernels operate on flat, row-major slices and explicit dimensions. They know nothing
//! about `Tensor`; the main crate validates shapes, calls in here, and wraps the result.
//! Every kernel parallelizes with `rayon` over independent output rows, and each output
//! element is reduced sequentially, so results are deterministic regardless of thread count.

use num_traits::{FromPrimitive, Num, NumAssign, ToPrimitive};
use std::fmt::Debug;
use thiserror::Error;

pub mod cpu_matmul;
pub mod cpu_softmax;
pub mod cpu_transpose;

pub use cpu_matmul::{cpu_matmul, cpu_matmul_nt};
pub use cpu_softmax::cpu_softmax_rows;
pub use cpu_transpose::cpu_transpose;

#[derive(Error, Debug)]
pub enum KernelError {
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
}

pub type Result<T> = std::result::Result<T, KernelError>;

/// Trait bound for elements that can be processed by kernels.
/// This mirrors `TensorElem` in the main crate to avoid circular dependencies.
pub trait KernelElem:
    Num + NumAssign + Copy + Clone + Debug + Send + Sync + FromPrimitive + ToPrimitive + PartialOrd
{
}

impl<T> KernelElem for T where
    T: Num
        + NumAssign
        + Copy
        + Clone
        + Debug
        + Send
        + Sync
        + FromPrimitive
        + ToPrimitive
        + PartialOrd
{
}

/// Checks that a flat buffer holds exactly `dims.iter().product()` elements.
pub(crate) fn check_len<T>(data: &[T], dims: &[usize]) -> Result<()> {
    let expected: usize = dims.iter().product();
    if data.len() != expected {
        return Err(KernelError::ShapeMismatch {
            expected: vec![expected],
            got: vec![data.len()],
        });
    }
    Ok(())
}
