use crate::{KernelElem, Result, check_len};
use rayon::prelude::*;

/// CPU Implementation of a batched matrix transpose.
///
/// Treats `data` as `batch` row-major matrices of shape `[m, n]` and returns them as
/// `[n, m]` matrices, i.e. swaps the last two dimensions.
///
/// Optimized transpose operations often use tiling (blocking) to improve cache usage.
/// The row-per-task split below is enough for the sequence lengths a ViT sees.
pub fn cpu_transpose<T>(data: &[T], batch: usize, m: usize, n: usize) -> Result<Vec<T>>
where
    T: KernelElem,
{
    check_len(data, &[batch, m, n])?;

    let mut out_data = vec![T::zero(); batch * m * n];
    if out_data.is_empty() {
        return Ok(out_data);
    }

    // Parallelize over the rows of the OUTPUT: `batch * n` rows, each of length `m`.
    out_data
        .par_chunks_mut(m)
        .enumerate()
        .for_each(|(i, out_row)| {
            let batch_idx = i / n;
            let col_idx = i % n;
            let input_batch_offset = batch_idx * m * n;

            for (r, out_elem) in out_row.iter_mut().enumerate() {
                *out_elem = data[input_batch_offset + r * n + col_idx];
            }
        });

    Ok(out_data)
}
