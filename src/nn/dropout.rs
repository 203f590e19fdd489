use crate::nn::{Mode, Module};
use crate::tensor::{Result, Tensor, TensorElem, TensorError, cast};

use rand::Rng;

/// Inverted dropout.
///
/// In [`Mode::Train`] each element is zeroed with probability `rate` and survivors are scaled
/// by `1 / (1 - rate)`. In [`Mode::Eval`] it is the identity.
#[derive(Debug, Clone)]
pub struct Dropout {
    pub rate: f64,
    pub mode: Mode,
}

impl Dropout {
    /// # Errors
    ///
    /// Returns `TensorError::InvalidConfig` unless `0 <= rate < 1`.
    pub fn new(rate: f64) -> Result<Self> {
        if !(0.0..1.0).contains(&rate) {
            return Err(TensorError::InvalidConfig(format!(
                "dropout rate must be in [0, 1), got {}",
                rate
            )));
        }
        Ok(Self {
            rate,
            mode: Mode::default(),
        })
    }

    pub fn is_active(&self) -> bool {
        self.mode == Mode::Train && self.rate > 0.0
    }

    pub fn forward<T: TensorElem, const RANK: usize>(
        &self,
        mut x: Tensor<T, RANK>,
    ) -> Result<Tensor<T, RANK>> {
        if !self.is_active() {
            return Ok(x);
        }

        let scale: T = cast(1.0 / (1.0 - self.rate))?;
        let mut rng = rand::rng();
        for v in x.data_mut() {
            if rng.random::<f64>() < self.rate {
                *v = T::zero();
            } else {
                *v *= scale;
            }
        }
        Ok(x)
    }
}

impl<T: TensorElem> Module<T> for Dropout {
    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    fn num_parameters(&self) -> usize {
        0
    }
}
