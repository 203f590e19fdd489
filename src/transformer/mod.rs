//! Transformer encoder components.
//!
//! - [`MultiHeadedSelfAttention`](attention::MultiHeadedSelfAttention) and
//!   [`PositionWiseFeedForward`](feed_forward::PositionWiseFeedForward): the two sublayers.
//! - [`Block`](block::Block): a pre-norm residual block built from them.
//! - [`Transformer`](stack::Transformer): a plain stack of blocks with early exit.
//! - [`AnomalyTransformer`](anomaly::AnomalyTransformer) and
//!   [`SingleCloneAnomalyTransformer`](legacy::SingleCloneAnomalyTransformer): stacks with
//!   cloned blocks running beside the originals.

pub mod anomaly;
pub mod attention;
pub mod block;
pub mod feed_forward;
pub mod legacy;
pub mod stack;

pub use anomaly::{AnomalyOutput, AnomalyTransformer, CloneSelection, LayerIndex, SelectedLayers};
pub use attention::{AttentionOutput, MultiHeadedSelfAttention};
pub use block::Block;
pub use feed_forward::PositionWiseFeedForward;
pub use legacy::SingleCloneAnomalyTransformer;
pub use stack::{Transformer, TransformerTrace};
