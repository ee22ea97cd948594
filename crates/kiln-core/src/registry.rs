//! Kernel registry for dispatch.
//!
//! Each execution provider owns a registry populated from static tables of
//! builder functions at initialization. Lookup maps a node's operator
//! signature (provider, domain, op type, since-version, element types) to the
//! `KernelCreateInfo` that can instantiate a kernel for it.

use crate::ir::{Graph, Node};
use crate::kernel::KernelCreateInfo;
use crate::opset;
use crate::types::DataType;
use crate::{Error, Result};
use std::collections::HashMap;

/// Entry of a static registration table.
///
/// Returns `None` for entries compiled out of the build; those are skipped.
pub type BuildKernelCreateInfoFn = fn() -> Option<KernelCreateInfo>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct KernelKey {
    provider: String,
    domain: String,
    op_type: String,
}

impl KernelKey {
    fn new(provider: &str, domain: &str, op_type: &str) -> Self {
        let domain = if opset::is_default_domain(domain) {
            opset::DEFAULT_DOMAIN
        } else {
            domain
        };
        Self {
            provider: provider.to_string(),
            domain: domain.to_string(),
            op_type: op_type.to_string(),
        }
    }
}

/// Operator signature to resolve against a registry.
#[derive(Debug, Clone)]
pub struct KernelQuery<'a> {
    pub provider: &'a str,
    pub domain: &'a str,
    pub op_type: &'a str,
    pub since_version: i64,
    pub input_types: Vec<DataType>,
    pub output_types: Vec<DataType>,
}

impl<'a> KernelQuery<'a> {
    /// Build the query for `node` running on `provider`.
    pub fn for_node(provider: &'a str, node: &'a Node, graph: &Graph) -> Result<Self> {
        let input_types = node
            .inputs()
            .iter()
            .map(|&id| graph.arg(id).map(|arg| arg.dtype))
            .collect::<Result<Vec<_>>>()?;
        let output_types = node
            .outputs()
            .iter()
            .map(|&id| graph.arg(id).map(|arg| arg.dtype))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            provider,
            domain: &node.domain,
            op_type: &node.op_type,
            since_version: node.since_version(),
            input_types,
            output_types,
        })
    }

    fn describe(&self) -> String {
        let types: Vec<_> = self.input_types.iter().map(DataType::name).collect();
        format!(
            "{}:{} version {} on {} with inputs [{}]",
            if self.domain.is_empty() {
                "ai.onnx"
            } else {
                self.domain
            },
            self.op_type,
            self.since_version,
            self.provider,
            types.join(", ")
        )
    }
}

/// Registry of kernels, keyed by provider, domain and op type.
///
/// # Example
///
/// ```ignore
/// let mut registry = KernelRegistry::new();
/// register_table(&mut registry, &CPU_KERNELS)?;
///
/// let info = registry.lookup_for_node(CPU_EXECUTION_PROVIDER, node, &graph)?;
/// let kernel = info.create(node)?;
/// ```
#[derive(Debug, Default, Clone)]
pub struct KernelRegistry {
    kernels: HashMap<KernelKey, Vec<KernelCreateInfo>>,
}

impl KernelRegistry {
    /// Create a new empty kernel registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kernel.
    ///
    /// Fails with `DuplicateKernel` if an already registered kernel could
    /// match the same nodes.
    pub fn register(&mut self, info: KernelCreateInfo) -> Result<()> {
        let key = KernelKey::new(&info.def.provider, &info.def.domain, &info.def.op_type);
        let entries = self.kernels.entry(key).or_default();

        if let Some(existing) = entries.iter().find(|e| e.def.conflicts_with(&info.def)) {
            return Err(Error::DuplicateKernel(format!(
                "{} conflicts with {}",
                info.def, existing.def
            )));
        }

        tracing::trace!(kernel = %info.def, "registered kernel");
        entries.push(info);
        Ok(())
    }

    /// Find the kernel matching `query`.
    pub fn lookup(&self, query: &KernelQuery<'_>) -> Result<&KernelCreateInfo> {
        let key = KernelKey::new(query.provider, query.domain, query.op_type);
        self.kernels
            .get(&key)
            .and_then(|entries| {
                entries.iter().find(|e| {
                    e.def.version.contains(query.since_version)
                        && e.def.accepts_types(&query.input_types, &query.output_types)
                })
            })
            .ok_or_else(|| Error::KernelNotFound(query.describe()))
    }

    /// Find the kernel that runs `node` on `provider`.
    pub fn lookup_for_node(
        &self,
        provider: &str,
        node: &Node,
        graph: &Graph,
    ) -> Result<&KernelCreateInfo> {
        self.lookup(&KernelQuery::for_node(provider, node, graph)?)
    }

    /// Check whether `node` can run on `provider`.
    pub fn can_run(&self, provider: &str, node: &Node, graph: &Graph) -> bool {
        self.lookup_for_node(provider, node, graph).is_ok()
    }

    /// Iterate over all registered kernels.
    pub fn iter(&self) -> impl Iterator<Item = &KernelCreateInfo> {
        self.kernels.values().flatten()
    }

    /// Get the number of registered kernels.
    pub fn len(&self) -> usize {
        self.kernels.values().map(Vec::len).sum()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Build every entry of `table` and register the enabled ones.
///
/// Returns the number of kernels registered. The first registration failure
/// aborts and propagates.
pub fn register_table(
    registry: &mut KernelRegistry,
    table: &[BuildKernelCreateInfoFn],
) -> Result<usize> {
    let mut registered = 0;
    for build in table {
        if let Some(info) = build() {
            registry.register(info)?;
            registered += 1;
        }
    }

    tracing::debug!(
        registered,
        disabled = table.len() - registered,
        "registered kernel table"
    );
    Ok(registered)
}
