//! Graph transformer trait and optimization levels.

use crate::ir::{Graph, NodeIndex};
use crate::Result;
use std::collections::HashSet;

/// Optimization level a transformer belongs to.
///
/// The optimizer runs every transformer whose level is at or below the
/// configured level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum OptimizationLevel {
    /// No rewriting.
    Disabled,

    /// Semantics-preserving rewrites that only use standard operators.
    #[default]
    Basic,

    /// Rewrites that may introduce provider-specific fused operators.
    Extended,

    /// Everything, including layout changes.
    All,
}

/// A rewrite applied to a graph in place.
///
/// Transformers are standalone objects so a single rewrite can span several
/// operator types. They report whether they changed the graph through the
/// `modified` flag; pattern mismatches are not errors and must leave the
/// graph untouched.
///
/// # Example
///
/// ```ignore
/// struct RemoveIdentity { providers: HashSet<String> }
///
/// impl GraphTransformer for RemoveIdentity {
///     fn name(&self) -> &str {
///         "RemoveIdentity"
///     }
///
///     fn compatible_providers(&self) -> &HashSet<String> {
///         &self.providers
///     }
///
///     fn apply(&self, graph: &mut Graph, modified: &mut bool, level: usize) -> Result<()> {
///         // ...
///         Ok(())
///     }
/// }
/// ```
pub trait GraphTransformer: Send + Sync {
    /// Transformer name (used for logging).
    fn name(&self) -> &str;

    /// Optimization level this transformer belongs to.
    fn level(&self) -> OptimizationLevel {
        OptimizationLevel::Basic
    }

    /// Providers whose nodes this transformer may rewrite. Empty means any.
    fn compatible_providers(&self) -> &HashSet<String>;

    /// Rewrite `graph`, setting `modified` when anything changed.
    ///
    /// `graph_level` is the subgraph nesting depth (0 for the main graph).
    fn apply(&self, graph: &mut Graph, modified: &mut bool, graph_level: usize) -> Result<()>;

    /// Apply this transformer to every subgraph owned by `node`.
    fn apply_to_subgraphs(
        &self,
        graph: &mut Graph,
        node: NodeIndex,
        modified: &mut bool,
        graph_level: usize,
    ) -> Result<()> {
        for subgraph in graph.node_mut(node)?.subgraphs_mut() {
            self.apply(subgraph, modified, graph_level + 1)?;
        }
        Ok(())
    }
}
