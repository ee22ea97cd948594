//! Built-in graph transformers.

mod gather_to_split;

pub use gather_to_split::GatherToSplitFusion;
