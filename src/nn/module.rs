use crate::tensor::TensorElem;
use std::fmt::Debug;

/// Whether stochastic layers are active.
///
/// `Eval` (the default) makes every dropout the identity, so forwards are deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    Train,
    #[default]
    Eval,
}

/// A Module trait for Neural Network layers.
///
/// Every layer and stack in the crate implements it. Requiring `Send + Sync` lets a model be
/// shared across threads for parallel inference (forwards take `&self`), and `Debug` lets the
/// structure of any model be inspected.
///
/// Containers forward `set_mode` to their children, so switching a whole stack is one call.
pub trait Module<T: TensorElem>: Debug + Send + Sync {
    /// Switches between training and evaluation behavior.
    ///
    /// Layers without stochastic behavior ignore it.
    fn set_mode(&mut self, _mode: Mode) {}

    /// Number of learnable scalars held by this module and its children.
    fn num_parameters(&self) -> usize;
}
