//! Graph optimizer pipeline.

use kiln_core::{Graph, GraphTransformer, OptimizationLevel, Result};

/// Options for [`GraphOptimizer`].
#[derive(Debug, Clone)]
pub struct OptimizerOptions {
    /// Highest transformer level to run.
    pub level: OptimizationLevel,

    /// Maximum number of sweeps over all transformers.
    pub max_steps: usize,
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        Self {
            level: OptimizationLevel::Basic,
            max_steps: 10,
        }
    }
}

/// Runs graph transformers to a fixed point.
///
/// Each sweep applies every enabled transformer in registration order. The
/// optimizer stops after the first sweep in which no transformer changed the
/// graph, or after `max_steps` sweeps.
pub struct GraphOptimizer {
    transformers: Vec<Box<dyn GraphTransformer>>,
    options: OptimizerOptions,
}

impl GraphOptimizer {
    /// Create an optimizer with no transformers.
    pub fn new(options: OptimizerOptions) -> Self {
        Self {
            transformers: Vec::new(),
            options,
        }
    }

    /// Create an optimizer with the built-in transformers.
    pub fn with_defaults(options: OptimizerOptions) -> Self {
        let mut optimizer = Self::new(options);
        optimizer.add_transformer(crate::GatherToSplitFusion::default());
        optimizer
    }

    /// Add a transformer.
    ///
    /// Returns a mutable reference to self for method chaining.
    pub fn add_transformer(&mut self, transformer: impl GraphTransformer + 'static) -> &mut Self {
        self.transformers.push(Box::new(transformer));
        self
    }

    /// Names of the transformers enabled at the configured level.
    pub fn enabled_transformers(&self) -> impl Iterator<Item = &str> {
        self.enabled().map(|t| t.name())
    }

    fn enabled(&self) -> impl Iterator<Item = &dyn GraphTransformer> {
        let level = self.options.level;
        self.transformers
            .iter()
            .map(|t| t.as_ref())
            .filter(move |t| level != OptimizationLevel::Disabled && t.level() <= level)
    }

    /// Optimize `graph` in place. Returns whether anything changed.
    #[tracing::instrument(skip_all, fields(num_nodes = graph.node_count(), level = ?self.options.level))]
    pub fn optimize(&self, graph: &mut Graph) -> Result<bool> {
        let mut changed = false;

        for step in 0..self.options.max_steps {
            let mut modified = false;
            for transformer in self.enabled() {
                let _span = tracing::debug_span!(
                    "transformer",
                    name = transformer.name(),
                    level = ?transformer.level(),
                    step
                )
                .entered();
                let mut applied = false;
                transformer.apply(graph, &mut applied, 0)?;
                if applied {
                    tracing::debug!(num_nodes = graph.node_count(), "graph modified");
                }
                modified |= applied;
            }

            if !modified {
                break;
            }
            changed = true;
        }

        Ok(changed)
    }
}

impl Default for GraphOptimizer {
    fn default() -> Self {
        Self::with_defaults(OptimizerOptions::default())
    }
}
