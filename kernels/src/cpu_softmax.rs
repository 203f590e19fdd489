use crate::{KernelElem, KernelError, Result};
use num_traits::Float;
use rayon::prelude::*;

/// In-place softmax over consecutive rows of length `row_len`.
///
/// Uses the max-subtraction trick so large logits (or the large negative offsets added by
/// padding masks) neither overflow nor produce NaN. A row whose every entry has been pushed
/// far down still normalizes to a valid distribution.
pub fn cpu_softmax_rows<T>(data: &mut [T], row_len: usize) -> Result<()>
where
    T: KernelElem + Float,
{
    if row_len == 0 || data.len() % row_len != 0 {
        return Err(KernelError::ShapeMismatch {
            expected: vec![row_len],
            got: vec![data.len()],
        });
    }

    data.par_chunks_mut(row_len).for_each(|row| {
        let max_val = row.iter().copied().fold(T::neg_infinity(), T::max);

        let mut sum_exp = T::zero();
        for v in row.iter_mut() {
            *v = (*v - max_val).exp();
            sum_exp += *v;
        }

        let inv_sum = T::one() / sum_exp;
        for v in row.iter_mut() {
            *v *= inv_sum;
        }
    });
    Ok(())
}
