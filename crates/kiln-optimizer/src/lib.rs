//! Graph rewrites for Kiln.
//!
//! Transformers implement [`GraphTransformer`] and are run by the
//! [`GraphOptimizer`], which applies every transformer enabled at the
//! configured [`OptimizationLevel`] until the graph stops changing.
//!
//! # Example
//!
//! ```no_run
//! use kiln_core::Graph;
//! use kiln_optimizer::{GatherToSplitFusion, GraphOptimizer, OptimizerOptions};
//!
//! # fn main() -> kiln_core::Result<()> {
//! let mut graph = Graph::with_opset(13);
//! // ... build the graph ...
//!
//! let mut optimizer = GraphOptimizer::new(OptimizerOptions::default());
//! optimizer.add_transformer(GatherToSplitFusion::default());
//! let changed = optimizer.optimize(&mut graph)?;
//! # let _ = changed;
//! # Ok(())
//! # }
//! ```

pub mod graph_utils;
pub mod passes;
pub mod pipeline;

pub use passes::GatherToSplitFusion;
pub use pipeline::{GraphOptimizer, OptimizerOptions};

pub use kiln_core::{GraphTransformer, OptimizationLevel, Result};
