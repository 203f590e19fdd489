use crate::{KernelElem, Result, check_len};
use rayon::prelude::*;

/// CPU Implementation of batched Matrix Multiplication.
///
/// Computes `batch` independent products `[m, k] x [k, n] -> [m, n]` over row-major buffers.
///
/// To swap in a BLAS `sgemm`, replace the body of [`cpu_matmul_nt`]: both entry points
/// funnel into it.
pub fn cpu_matmul<T>(
    lhs_data: &[T],
    rhs_data: &[T],
    batch: usize,
    m: usize,
    k: usize,
    n: usize,
) -> Result<Vec<T>>
where
    T: KernelElem,
{
    check_len(lhs_data, &[batch, m, k])?;
    check_len(rhs_data, &[batch, k, n])?;

    // Transpose rhs to [batch, n, k] so both operands are walked sequentially.
    let rhs_t_data = super::cpu_transpose::cpu_transpose(rhs_data, batch, k, n)?;
    cpu_matmul_nt(lhs_data, &rhs_t_data, batch, m, k, n)
}

/// Batched `A @ B^T` where `B` is already stored as `[batch, n, k]`.
///
/// This is the natural layout for `y = x W^T` with `W: [out_features, in_features]` and for
/// attention scores `Q K^T`, so callers holding such operands skip the transpose entirely.
pub fn cpu_matmul_nt<T>(
    lhs_data: &[T],
    rhs_t_data: &[T],
    batch: usize,
    m: usize,
    k: usize,
    n: usize,
) -> Result<Vec<T>>
where
    T: KernelElem,
{
    check_len(lhs_data, &[batch, m, k])?;
    check_len(rhs_t_data, &[batch, n, k])?;

    let mut out_data = vec![T::zero(); batch * m * n];
    if out_data.is_empty() {
        return Ok(out_data);
    }

    // Parallelize over rows of the output matrices across all batches: (batch * m) rows of n.
    out_data
        .par_chunks_mut(n)
        .enumerate()
        .for_each(|(global_row_idx, out_row)| {
            let batch_idx = global_row_idx / m;
            let row_in_matrix = global_row_idx % m;

            let a_row_start = batch_idx * m * k + row_in_matrix * k;
            let a_slice = &lhs_data[a_row_start..a_row_start + k];
            let b_t_batch_offset = batch_idx * n * k;

            for (col_in_matrix, out_elem) in out_row.iter_mut().enumerate() {
                let b_t_row_start = b_t_batch_offset + col_in_matrix * k;
                let b_t_slice = &rhs_t_data[b_t_row_start..b_t_row_start + k];

                let mut sum = T::zero();
                for (&val_a, &val_b) in a_slice.iter().zip(b_t_slice.iter()) {
                    sum += val_a * val_b;
                }
                *out_elem = sum;
            }
        });

    Ok(out_data)
}
