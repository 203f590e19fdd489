pub mod activation;
pub mod dropout;
pub mod linear;
pub mod module;
pub mod norm;

pub use activation::Activation;
pub use dropout::Dropout;
pub use linear::Linear;
pub use module::{Mode, Module};
pub use norm::LayerNorm;
