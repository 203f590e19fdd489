//! Core Tensor implementation.
//!
//! A `Tensor` is a multi-dimensional array stored as:
//! 1. **Data**: a flat, contiguous vector of elements (usually `f32`).
//! 2. **Shape**: an array of dimensions (e.g., `[batch, seq_len, dim]`).
//! 3. **Strides**: how far to step through the flat data to move along each dimension.
//!
//! The rank is a const generic, so a `Tensor<f32, 3>` is always a sequence batch and a
//! `Tensor<f32, 4>` is always something with an extra axis (heads, or stacked layers). The
//! sizes of each dimension stay runtime values, so batch size and sequence length can vary
//! between calls on the same model.
//!
//! ```rust
//! use vit_anomaly::tensor::Tensor;
//!
//! let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
//! let tensor = Tensor::<f32, 2>::new(data, [2, 3]).unwrap();
//!
//! assert_eq!(tensor.shape(), &[2, 3]);
//! assert_eq!(tensor.data(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
//! ```
//!
//! > [!TIP]
//! > Layout is **Row-Major** (C-style): the last dimension changes the fastest in memory.
//! > Every operation in this crate produces a fresh contiguous tensor, so strides are always
//! > the canonical row-major strides of the shape.

use num_traits::{FromPrimitive, Num, NumAssign, ToPrimitive};
use std::fmt::Debug;
use thiserror::Error;
use vit_anomaly_kernels::KernelError;

pub mod ops;
pub mod reshape;

pub use reshape::Dim;

/// Error type for Tensor operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TensorError {
    /// The shape of the data does not match the expected shape.
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    /// An index is out of bounds for the given shape.
    #[error("Index out of bounds: index {index:?} for shape {shape:?}")]
    IndexOutOfBounds {
        index: Vec<usize>,
        shape: Vec<usize>,
    },
    /// A reshape request that cannot describe any valid shape.
    #[error("Invalid shape: {0}")]
    InvalidShape(String),
    /// A layer or model configuration that cannot be built.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    /// The requested operation is not supported (e.g., for a specific rank or type).
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

impl From<KernelError> for TensorError {
    fn from(e: KernelError) -> Self {
        match e {
            KernelError::ShapeMismatch { expected, got } => {
                TensorError::ShapeMismatch { expected, got }
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, TensorError>;

/// Trait bound for elements that can be stored in a Tensor.
///
/// # Requirements
/// - `Copy + Clone`: Essential for efficient storage in contiguous memory (e.g., `Vec<T>`) and fast element access.
/// - `Num + ...`: Provides necessary numeric operations for tensor math.
/// - `Send + Sync`: Required for parallel execution via `rayon`.
pub trait TensorElem:
    Num + NumAssign + Copy + Clone + Debug + Send + Sync + FromPrimitive + ToPrimitive + PartialOrd
{
}

impl<T> TensorElem for T where
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

/// Converts an `f64` constant into the element type.
///
/// Layers keep their hyper-parameters (epsilon, dropout scale, GELU coefficients) as `f64`
/// and convert once per forward pass.
pub fn cast<T: TensorElem>(value: f64) -> Result<T> {
    T::from_f64(value).ok_or_else(|| {
        TensorError::Unsupported(format!(
            "value {} is not representable in {}",
            value,
            std::any::type_name::<T>()
        ))
    })
}

/// The core Tensor struct.
///
/// Represents an N-dimensional array of elements.
///
/// # Generics
///
/// - `T`: The element type (must implement `TensorElem`).
/// - `RANK`: The number of dimensions (const generic).
///
/// Shape mismatches between tensors of the same rank (e.g. multiplying `[32, 10]` by
/// `[5, 20]`) are caught at runtime and reported as [`TensorError::ShapeMismatch`].
#[derive(Clone, PartialEq)]
pub struct Tensor<T, const RANK: usize>
where
    T: TensorElem,
{
    shape: [usize; RANK],
    strides: [usize; RANK],
    data: Vec<T>,
}

impl<T, const RANK: usize> Tensor<T, RANK>
where
    T: TensorElem,
{
    /// Creates a new Tensor from a vector of data and a shape.
    ///
    /// # Arguments
    ///
    /// * `data` - A flat vector containing the tensor elements.
    /// * `shape` - An array representing the dimensions of the tensor.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::ShapeMismatch` if the length of `data` does not match the product of `shape`.
    pub fn new(data: Vec<T>, shape: [usize; RANK]) -> Result<Self> {
        let size: usize = shape.iter().product();
        if data.len() != size {
            return Err(TensorError::ShapeMismatch {
                expected: vec![size],
                got: vec![data.len()],
            });
        }

        let strides = compute_strides(&shape);
        Ok(Self {
            shape,
            strides,
            data,
        })
    }

    /// Creates a new Tensor filled with zeros.
    pub fn zeros(shape: [usize; RANK]) -> Self {
        Self::full(shape, T::zero())
    }

    /// Creates a new Tensor filled with ones.
    pub fn ones(shape: [usize; RANK]) -> Self {
        Self::full(shape, T::one())
    }

    /// Creates a new Tensor with every element set to `value`.
    pub fn full(shape: [usize; RANK], value: T) -> Self {
        let size: usize = shape.iter().product();
        let strides = compute_strides(&shape);
        Self {
            shape,
            strides,
            data: vec![value; size],
        }
    }

    /// Reshapes the tensor to a new shape.
    ///
    /// The number of elements must remain the same.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::ShapeMismatch` if the total number of elements in `new_shape`
    /// does not match the current size of the tensor.
    pub fn reshape<const NEW_RANK: usize>(
        self,
        new_shape: [usize; NEW_RANK],
    ) -> Result<Tensor<T, NEW_RANK>> {
        let current_size = self.size();
        let new_size: usize = new_shape.iter().product();

        if current_size != new_size {
            return Err(TensorError::ShapeMismatch {
                expected: vec![current_size],
                got: vec![new_size],
            });
        }

        let strides = compute_strides(&new_shape);
        Ok(Tensor {
            shape: new_shape,
            strides,
            data: self.data,
        })
    }

    /// Returns the shape of the tensor.
    pub const fn shape(&self) -> &[usize; RANK] {
        &self.shape
    }

    /// Returns the strides of the tensor.
    ///
    /// Strides represent the number of elements to skip in memory to move to the next element
    /// along a specific dimension.
    pub const fn strides(&self) -> &[usize; RANK] {
        &self.strides
    }

    /// Returns a reference to the underlying data as a slice.
    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// Returns a mutable reference to the underlying data as a slice.
    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Consumes the tensor and returns its flat data.
    pub fn into_data(self) -> Vec<T> {
        self.data
    }

    /// Returns the total number of elements in the tensor.
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    /// Returns the element at a multi-dimensional index.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::IndexOutOfBounds` if any coordinate exceeds its dimension.
    pub fn get(&self, index: [usize; RANK]) -> Result<T> {
        let mut offset = 0;
        for d in 0..RANK {
            if index[d] >= self.shape[d] {
                return Err(TensorError::IndexOutOfBounds {
                    index: index.to_vec(),
                    shape: self.shape.to_vec(),
                });
            }
            offset += index[d] * self.strides[d];
        }
        Ok(self.data[offset])
    }
}

/// Computes the strides for a given shape.
///
/// Assumes a row-major (C-style) memory layout.
pub(crate) const fn compute_strides<const RANK: usize>(shape: &[usize; RANK]) -> [usize; RANK] {
    let mut strides = [0; RANK];
    let mut stride = 1;
    let mut i = RANK;
    while i > 0 {
        i -= 1;
        strides[i] = stride;
        stride *= shape[i];
    }
    strides
}

impl<T, const RANK: usize> Debug for Tensor<T, RANK>
where
    T: TensorElem,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("data_len", &self.data.len())
            .finish()
    }
}
