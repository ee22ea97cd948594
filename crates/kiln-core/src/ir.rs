//! Dataflow graph IR.
//!
//! The IR is a directed acyclic graph where:
//! - **Nodes** (`Node`) are operator instances (e.g. Gather, Split, Add)
//! - **Args** (`NodeArg`) describe the tensors flowing between them
//! - **Edges** connect a producer's output slot to a consumer's input slot
//!
//! Nodes live in a petgraph `StableGraph`, so a `NodeIndex` stays valid (or
//! becomes a tombstone) across removals. Iterating a stale topological order
//! after a rewrite is therefore well defined: removed nodes are skipped.

use crate::opset;
use crate::types::{AttributeValue, DataType, TensorShape, TensorValue};
use crate::{Error, Result};
use petgraph::stable_graph::StableGraph;
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use petgraph::Direction;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::OnceLock;

/// Node identifier (petgraph's stable node index).
pub type NodeIndex = petgraph::stable_graph::NodeIndex;

/// Identifier of a tensor descriptor in the graph.
///
/// An index into the graph's arg table; args are never removed, so ids stay
/// valid for the lifetime of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeArgId(pub usize);

impl NodeArgId {
    /// Get the underlying index.
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Connection between a producer output slot and a consumer input slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataEdge {
    pub arg: NodeArgId,
    pub src_slot: usize,
    pub dst_slot: usize,
}

// ──────────────────────────────── Graph ──────────────────────────────────

/// Mutable dataflow graph.
#[derive(Debug, Clone)]
pub struct Graph {
    graph: StableGraph<Node, DataEdge>,

    /// Tensor descriptor table.
    args: Vec<NodeArg>,

    /// Lookup table: arg name -> arg ID.
    arg_by_name: HashMap<String, NodeArgId>,

    /// Lookup table: arg ID -> (producing node, output slot).
    producers: HashMap<NodeArgId, (NodeIndex, usize)>,

    /// Lookup table: arg ID -> (consuming node, input slot).
    consumers: HashMap<NodeArgId, Vec<(NodeIndex, usize)>>,

    inputs: Vec<NodeArgId>,
    outputs: Vec<NodeArgId>,

    /// Imported opset version per domain.
    opset_imports: HashMap<String, i64>,

    /// Node names in use or handed out by `generate_node_name`.
    reserved_node_names: HashSet<String>,

    /// Arg names handed out by `generate_node_arg_name` but not yet created.
    reserved_arg_names: HashSet<String>,

    name_counter: usize,

    /// Cached topological order; reset by every structural mutation.
    topo_cache: OnceLock<Vec<NodeIndex>>,
}

impl Graph {
    /// Create a new empty graph with no opset imports.
    pub fn new() -> Self {
        Self {
            graph: StableGraph::new(),
            args: Vec::new(),
            arg_by_name: HashMap::new(),
            producers: HashMap::new(),
            consumers: HashMap::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            opset_imports: HashMap::new(),
            reserved_node_names: HashSet::new(),
            reserved_arg_names: HashSet::new(),
            name_counter: 0,
            topo_cache: OnceLock::new(),
        }
    }

    /// Create a graph importing `version` of the default domain.
    pub fn with_opset(version: i64) -> Self {
        let mut graph = Self::new();
        graph.set_opset(opset::DEFAULT_DOMAIN, version);
        graph
    }

    /// Create an empty subgraph that shares this graph's opset imports.
    pub fn new_subgraph(&self) -> Graph {
        let mut graph = Self::new();
        graph.opset_imports = self.opset_imports.clone();
        graph
    }

    // ── Opset imports ──

    /// Import `version` of `domain`.
    pub fn set_opset(&mut self, domain: &str, version: i64) {
        self.opset_imports
            .insert(normalize_domain(domain).to_string(), version);
    }

    /// Imported opset version of `domain`, if any.
    pub fn opset(&self, domain: &str) -> Option<i64> {
        self.opset_imports.get(normalize_domain(domain)).copied()
    }

    /// All opset imports.
    pub fn domain_to_version(&self) -> &HashMap<String, i64> {
        &self.opset_imports
    }

    // ── Node access ──

    /// Get an immutable reference to a node.
    pub fn node(&self, id: NodeIndex) -> Result<&Node> {
        self.graph
            .node_weight(id)
            .ok_or_else(|| Error::InvalidGraph(format!("Node {:?} not found", id)))
    }

    /// Get a mutable reference to a node.
    pub fn node_mut(&mut self, id: NodeIndex) -> Result<&mut Node> {
        self.graph
            .node_weight_mut(id)
            .ok_or_else(|| Error::InvalidGraph(format!("Node {:?} not found", id)))
    }

    /// Get a node if it is still live.
    pub fn get_node(&self, id: NodeIndex) -> Option<&Node> {
        self.graph.node_weight(id)
    }

    /// Iterate over all live nodes.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_weights()
    }

    /// Get the number of live nodes.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Find a node by name.
    pub fn find_node_by_name(&self, name: &str) -> Option<NodeIndex> {
        self.nodes().find(|n| n.name == name).map(|n| n.index)
    }

    // ── Arg access ──

    /// Get a tensor descriptor.
    pub fn arg(&self, id: NodeArgId) -> Result<&NodeArg> {
        self.args
            .get(id.index())
            .ok_or_else(|| Error::InvalidGraph(format!("NodeArg {:?} not found", id)))
    }

    /// Get a mutable tensor descriptor.
    pub fn arg_mut(&mut self, id: NodeArgId) -> Result<&mut NodeArg> {
        self.args
            .get_mut(id.index())
            .ok_or_else(|| Error::InvalidGraph(format!("NodeArg {:?} not found", id)))
    }

    /// Look up an arg by name.
    pub fn arg_by_name(&self, name: &str) -> Option<NodeArgId> {
        self.arg_by_name.get(name).copied()
    }

    /// Get the number of args.
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    /// Add a new tensor descriptor. Names must be unique.
    pub fn add_node_arg(&mut self, arg: NodeArg) -> Result<NodeArgId> {
        if self.arg_by_name.contains_key(&arg.name) {
            return Err(Error::InvalidGraph(format!(
                "NodeArg '{}' already exists",
                arg.name
            )));
        }
        let id = NodeArgId(self.args.len());
        self.reserved_arg_names.remove(&arg.name);
        self.arg_by_name.insert(arg.name.clone(), id);
        self.args.push(arg);
        Ok(id)
    }

    /// Return the arg called `name`, creating a runtime arg if it does not exist.
    ///
    /// An existing arg is returned unchanged.
    pub fn get_or_create_node_arg(
        &mut self,
        name: &str,
        dtype: DataType,
        shape: TensorShape,
    ) -> Result<NodeArgId> {
        match self.arg_by_name(name) {
            Some(id) => Ok(id),
            None => self.add_node_arg(NodeArg::new(name, dtype, shape)),
        }
    }

    /// Add a constant tensor as an initializer arg.
    pub fn add_initializer(&mut self, name: &str, value: TensorValue) -> Result<NodeArgId> {
        self.add_node_arg(NodeArg::initializer(name, value))
    }

    /// The initializer value behind `id`, if it is a constant.
    ///
    /// Initializers that are also graph inputs can be overridden at run time
    /// and are not constants.
    pub fn constant_initializer(&self, id: NodeArgId) -> Option<&TensorValue> {
        if self.inputs.contains(&id) {
            return None;
        }
        self.args.get(id.index()).and_then(NodeArg::initializer_value)
    }

    /// Iterate over all initializers (constant or overridable).
    pub fn initializers(&self) -> impl Iterator<Item = (NodeArgId, &TensorValue)> {
        self.args
            .iter()
            .enumerate()
            .filter_map(|(i, arg)| arg.initializer_value().map(|v| (NodeArgId(i), v)))
    }

    // ── Graph inputs/outputs ──

    /// Graph input args.
    pub fn inputs(&self) -> &[NodeArgId] {
        &self.inputs
    }

    /// Graph output args.
    pub fn outputs(&self) -> &[NodeArgId] {
        &self.outputs
    }

    /// Set graph inputs.
    pub fn set_inputs(&mut self, inputs: Vec<NodeArgId>) {
        self.inputs = inputs;
    }

    /// Set graph outputs.
    pub fn set_outputs(&mut self, outputs: Vec<NodeArgId>) {
        self.outputs = outputs;
    }

    // ── Producer / consumer queries ──

    /// The node currently producing `arg`.
    pub fn producer_of(&self, arg: NodeArgId) -> Option<NodeIndex> {
        self.producers.get(&arg).map(|&(node, _)| node)
    }

    /// Nodes consuming `arg`, one entry per consuming input slot.
    pub fn consumers_of(&self, arg: NodeArgId) -> Vec<NodeIndex> {
        self.consumers
            .get(&arg)
            .map(|c| c.iter().map(|&(node, _)| node).collect())
            .unwrap_or_default()
    }

    /// Number of edges leaving `id` (its fan-out).
    pub fn output_edges_count(&self, id: NodeIndex) -> Result<usize> {
        self.node(id)?;
        Ok(self.graph.edges_directed(id, Direction::Outgoing).count())
    }

    /// Number of edges entering `id`.
    pub fn input_edges_count(&self, id: NodeIndex) -> Result<usize> {
        self.node(id)?;
        Ok(self.graph.edges_directed(id, Direction::Incoming).count())
    }

    /// Consumers of `id`'s outputs, one entry per edge, ordered by node index.
    pub fn output_nodes(&self, id: NodeIndex) -> Result<Vec<NodeIndex>> {
        self.node(id)?;
        let mut edges: Vec<(NodeIndex, usize)> = self
            .graph
            .edges_directed(id, Direction::Outgoing)
            .map(|e| (e.target(), e.weight().dst_slot))
            .collect();
        edges.sort();
        Ok(edges.into_iter().map(|(node, _)| node).collect())
    }

    /// Producers of `id`'s inputs, one entry per edge, ordered by node index.
    pub fn input_nodes(&self, id: NodeIndex) -> Result<Vec<NodeIndex>> {
        self.node(id)?;
        let mut edges: Vec<(NodeIndex, usize)> = self
            .graph
            .edges_directed(id, Direction::Incoming)
            .map(|e| (e.source(), e.weight().dst_slot))
            .collect();
        edges.sort();
        Ok(edges.into_iter().map(|(node, _)| node).collect())
    }

    // ── Graph mutation ──

    /// Add a node and return its index.
    ///
    /// Wires one edge per input slot whose arg has a producer and one edge to
    /// every existing consumer of each output arg. If an output arg already
    /// has a producer, the new node takes over producing it; the previous
    /// producer keeps its edges until `remove_node_output_edges` detaches
    /// them.
    pub fn add_node(&mut self, mut node: Node) -> Result<NodeIndex> {
        for &arg in node.inputs.iter().chain(node.outputs.iter()) {
            self.arg(arg)?;
        }
        if let Some(arg) = node.outputs.iter().find(|a| node.inputs.contains(*a)) {
            return Err(Error::InvalidGraph(format!(
                "Node '{}' consumes its own output '{}'",
                node.name, self.args[arg.index()].name
            )));
        }

        if node.name.is_empty() {
            node.name = self.generate_node_name(&node.op_type);
        }
        if node.since_version.is_none() {
            let version = self
                .opset(&node.domain)
                .map(|opset| opset::since_version(&node.domain, &node.op_type, opset))
                .unwrap_or(1);
            node.since_version = Some(version);
        }
        self.reserved_node_names.insert(node.name.clone());

        let inputs = node.inputs.clone();
        let outputs = node.outputs.clone();
        let index = self.graph.add_node(node);
        if let Some(weight) = self.graph.node_weight_mut(index) {
            weight.index = index;
        }

        for (dst_slot, &arg) in inputs.iter().enumerate() {
            self.consumers.entry(arg).or_default().push((index, dst_slot));
            if let Some(&(producer, src_slot)) = self.producers.get(&arg) {
                self.graph.add_edge(
                    producer,
                    index,
                    DataEdge {
                        arg,
                        src_slot,
                        dst_slot,
                    },
                );
            }
        }

        for (src_slot, &arg) in outputs.iter().enumerate() {
            if let Some(&(previous, _)) = self.producers.get(&arg) {
                tracing::trace!(
                    arg = %self.args[arg.index()].name,
                    ?previous,
                    new = ?index,
                    "producer takeover"
                );
            }
            self.producers.insert(arg, (index, src_slot));
            for &(consumer, dst_slot) in self.consumers.get(&arg).into_iter().flatten() {
                self.graph.add_edge(
                    index,
                    consumer,
                    DataEdge {
                        arg,
                        src_slot,
                        dst_slot,
                    },
                );
            }
        }

        self.invalidate_topology();
        Ok(index)
    }

    /// Detach every edge leaving `id`. Returns the number of edges removed.
    ///
    /// Consumers keep referencing the args; only the connections go away.
    pub fn remove_node_output_edges(&mut self, id: NodeIndex) -> Result<usize> {
        self.node(id)?;
        let edges: Vec<_> = self
            .graph
            .edges_directed(id, Direction::Outgoing)
            .map(|e| e.id())
            .collect();
        for &edge in &edges {
            self.graph.remove_edge(edge);
        }
        if !edges.is_empty() {
            self.invalidate_topology();
        }
        Ok(edges.len())
    }

    /// Remove a node from the graph.
    ///
    /// The node must have no output edges left; detach them first with
    /// `remove_node_output_edges`. Input edges are removed with the node.
    pub fn remove_node(&mut self, id: NodeIndex) -> Result<()> {
        let remaining = self.output_edges_count(id)?;
        if remaining > 0 {
            return Err(Error::InvalidGraph(format!(
                "Cannot remove node '{}' ({:?}): {} output edge(s) still attached",
                self.node(id)?.name,
                id,
                remaining
            )));
        }

        let node = self
            .graph
            .remove_node(id)
            .ok_or_else(|| Error::InvalidGraph(format!("Node {:?} not found", id)))?;

        for arg in &node.inputs {
            if let Some(consumers) = self.consumers.get_mut(arg) {
                consumers.retain(|&(consumer, _)| consumer != id);
            }
        }
        for arg in &node.outputs {
            if self.producers.get(arg).map(|&(producer, _)| producer) == Some(id) {
                self.producers.remove(arg);
            }
        }
        self.reserved_node_names.remove(&node.name);

        self.invalidate_topology();
        Ok(())
    }

    // ── Names ──

    /// Generate a node name not used by any node in the graph.
    pub fn generate_node_name(&mut self, base: &str) -> String {
        let mut name = base.to_string();
        while self.reserved_node_names.contains(&name) {
            name = format!("{}_token_{}", base, self.name_counter);
            self.name_counter += 1;
        }
        self.reserved_node_names.insert(name.clone());
        name
    }

    /// Generate an arg name not used by any arg in the graph.
    pub fn generate_node_arg_name(&mut self, base: &str) -> String {
        let mut name = base.to_string();
        while self.arg_by_name.contains_key(&name) || self.reserved_arg_names.contains(&name) {
            name = format!("{}_token_{}", base, self.name_counter);
            self.name_counter += 1;
        }
        self.reserved_arg_names.insert(name.clone());
        name
    }

    // ── Graph queries ──

    /// Get the topological order of live nodes.
    ///
    /// Every node appears after the producers of its inputs. The order is
    /// cached until the next structural mutation.
    pub fn topological_order(&self) -> Result<Vec<NodeIndex>> {
        if let Some(order) = self.topo_cache.get() {
            return Ok(order.clone());
        }

        let order = petgraph::algo::toposort(&self.graph, None).map_err(|cycle| {
            Error::InvalidGraph(format!(
                "Graph contains a cycle through node {:?}",
                cycle.node_id()
            ))
        })?;
        let _ = self.topo_cache.set(order.clone());
        Ok(order)
    }

    /// Check structural invariants.
    ///
    /// - the graph is acyclic
    /// - every edge carries an arg that its source produces at `src_slot` and
    ///   its target consumes at `dst_slot`
    /// - every consumed arg with a producer has exactly one edge per
    ///   consuming slot, coming from that producer
    pub fn validate(&self) -> Result<()> {
        self.topological_order()?;

        for edge in self.graph.edge_references() {
            let data = edge.weight();
            let source = self.node(edge.source())?;
            let target = self.node(edge.target())?;
            if source.outputs.get(data.src_slot) != Some(&data.arg)
                || target.inputs.get(data.dst_slot) != Some(&data.arg)
            {
                return Err(Error::InvalidGraph(format!(
                    "Edge {} -> {} does not match the nodes' args",
                    source.name, target.name
                )));
            }
        }

        for (&arg, consumers) in &self.consumers {
            let Some(&(producer, _)) = self.producers.get(&arg) else {
                continue;
            };
            for &(consumer, dst_slot) in consumers {
                let edges = self
                    .graph
                    .edges_connecting(producer, consumer)
                    .filter(|e| e.weight().dst_slot == dst_slot)
                    .count();
                let incoming = self
                    .graph
                    .edges_directed(consumer, Direction::Incoming)
                    .filter(|e| e.weight().dst_slot == dst_slot)
                    .count();
                if edges != 1 || incoming != 1 {
                    return Err(Error::InvalidGraph(format!(
                        "Input slot {} of node '{}' has {} edge(s) from its producer and {} in total",
                        dst_slot,
                        self.node(consumer)?.name,
                        edges,
                        incoming
                    )));
                }
            }
        }

        Ok(())
    }

    fn invalidate_topology(&mut self) {
        self.topo_cache = OnceLock::new();
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_domain(domain: &str) -> &str {
    if opset::is_default_domain(domain) {
        opset::DEFAULT_DOMAIN
    } else {
        domain
    }
}

// ──────────────────────────────── Node ───────────────────────────────────

/// An operator instance in the graph.
#[derive(Debug, Clone)]
pub struct Node {
    /// Node name, unique within the graph once added.
    pub name: String,

    /// Operator type (e.g. "Gather", "Split").
    pub op_type: String,

    /// Operator domain; empty for the default domain.
    pub domain: String,

    /// Human-readable description.
    pub description: String,

    /// Operator attributes (e.g. axis, axes).
    pub attributes: HashMap<String, AttributeValue>,

    /// Provider the node has been assigned to; empty before assignment.
    pub execution_provider: String,

    since_version: Option<i64>,
    inputs: Vec<NodeArgId>,
    outputs: Vec<NodeArgId>,
    subgraphs: BTreeMap<String, Graph>,
    index: NodeIndex,
}

impl Node {
    /// Create a new node of `op_type` in the default domain.
    pub fn new(op_type: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            op_type: op_type.into(),
            domain: String::new(),
            description: String::new(),
            attributes: HashMap::new(),
            execution_provider: String::new(),
            since_version: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            subgraphs: BTreeMap::new(),
            index: NodeIndex::end(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Pin the schema version instead of resolving it from the graph's opset.
    pub fn with_since_version(mut self, version: i64) -> Self {
        self.since_version = Some(version);
        self
    }

    pub fn with_inputs(mut self, inputs: Vec<NodeArgId>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_outputs(mut self, outputs: Vec<NodeArgId>) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_execution_provider(mut self, provider: impl Into<String>) -> Self {
        self.execution_provider = provider.into();
        self
    }

    /// Attach a subgraph under an attribute name (e.g. "then_branch").
    pub fn with_subgraph(mut self, attribute: impl Into<String>, graph: Graph) -> Self {
        self.subgraphs.insert(attribute.into(), graph);
        self
    }

    /// Get the node index. Only meaningful once the node is in a graph.
    pub fn index(&self) -> NodeIndex {
        self.index
    }

    /// Get the operator type.
    pub fn op_type(&self) -> &str {
        &self.op_type
    }

    /// Schema version of this node's operator.
    pub fn since_version(&self) -> i64 {
        self.since_version.unwrap_or_default()
    }

    /// Get input arg IDs.
    pub fn inputs(&self) -> &[NodeArgId] {
        &self.inputs
    }

    /// Get output arg IDs.
    pub fn outputs(&self) -> &[NodeArgId] {
        &self.outputs
    }

    /// Get an attribute.
    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    /// Get an integer attribute, if present and an `Int`.
    pub fn attr_int(&self, key: &str) -> Option<i64> {
        self.attributes.get(key).and_then(AttributeValue::as_int)
    }

    /// Get an integer-list attribute, if present and `Ints`.
    pub fn attr_ints(&self, key: &str) -> Option<&[i64]> {
        self.attributes.get(key).and_then(AttributeValue::as_ints)
    }

    /// Set an attribute.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: AttributeValue) {
        self.attributes.insert(key.into(), value);
    }

    /// Subgraphs keyed by attribute name.
    pub fn subgraphs(&self) -> impl Iterator<Item = (&str, &Graph)> {
        self.subgraphs.iter().map(|(k, g)| (k.as_str(), g))
    }

    /// Mutable access to the subgraphs.
    pub fn subgraphs_mut(&mut self) -> impl Iterator<Item = &mut Graph> {
        self.subgraphs.values_mut()
    }

    /// Whether this node owns any subgraph.
    pub fn has_subgraphs(&self) -> bool {
        !self.subgraphs.is_empty()
    }
}

// ──────────────────────────────── NodeArg ────────────────────────────────

/// Compile-time payload of an arg.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgData {
    /// Value arrives at run time (graph input or node output).
    Runtime,

    /// Constant tensor stored in the graph.
    Initializer(TensorValue),
}

/// Tensor descriptor: name, element type and shape of a graph edge's value.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeArg {
    /// Tensor name, unique within the graph.
    pub name: String,

    /// Element type.
    pub dtype: DataType,

    /// Shape (static, symbolic or unknown).
    pub shape: TensorShape,

    /// Compile-time data carried by this arg.
    pub data: ArgData,
}

impl NodeArg {
    /// Create a runtime arg.
    pub fn new(name: impl Into<String>, dtype: DataType, shape: TensorShape) -> Self {
        Self {
            name: name.into(),
            dtype,
            shape,
            data: ArgData::Runtime,
        }
    }

    /// Create an initializer arg holding `value`.
    pub fn initializer(name: impl Into<String>, value: TensorValue) -> Self {
        Self {
            name: name.into(),
            dtype: value.dtype,
            shape: TensorShape::Static(value.shape.clone()),
            data: ArgData::Initializer(value),
        }
    }

    /// The initializer value, if any.
    pub fn initializer_value(&self) -> Option<&TensorValue> {
        match &self.data {
            ArgData::Initializer(value) => Some(value),
            ArgData::Runtime => None,
        }
    }

    /// Whether the arg is a rank-0 tensor.
    pub fn is_scalar(&self) -> bool {
        self.shape.ndim() == Some(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TensorData;

    fn f32_arg(graph: &mut Graph, name: &str, dims: &[usize]) -> NodeArgId {
        graph
            .add_node_arg(NodeArg::new(
                name,
                DataType::F32,
                TensorShape::Static(dims.to_vec()),
            ))
            .unwrap()
    }

    #[test]
    fn test_create_empty_graph() {
        let graph = Graph::new();
        assert_eq!(graph.node_count(), 0);
        assert_eq!(graph.arg_count(), 0);
        assert!(graph.topological_order().unwrap().is_empty());
    }

    #[test]
    fn test_add_node_arg() {
        let mut graph = Graph::new();
        let id = f32_arg(&mut graph, "x", &[1, 2, 3]);

        assert_eq!(graph.arg_count(), 1);
        assert_eq!(graph.arg(id).unwrap().name, "x");
        assert_eq!(graph.arg_by_name("x"), Some(id));
        assert!(graph
            .add_node_arg(NodeArg::new("x", DataType::F32, TensorShape::Unknown))
            .is_err());
        assert_eq!(
            graph
                .get_or_create_node_arg("x", DataType::I64, TensorShape::Unknown)
                .unwrap(),
            id
        );
    }

    #[test]
    fn test_add_node_wires_edges() {
        let mut graph = Graph::with_opset(13);
        let input = f32_arg(&mut graph, "input", &[2, 2]);
        let hidden = f32_arg(&mut graph, "hidden", &[2, 2]);
        let output = f32_arg(&mut graph, "output", &[2, 2]);

        let relu = graph
            .add_node(Node::new("Relu").with_inputs(vec![input]).with_outputs(vec![hidden]))
            .unwrap();
        let add = graph
            .add_node(
                Node::new("Add")
                    .with_inputs(vec![hidden, hidden])
                    .with_outputs(vec![output]),
            )
            .unwrap();

        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.node(relu).unwrap().op_type(), "Relu");
        assert_eq!(graph.node(relu).unwrap().since_version(), 13);
        assert_eq!(graph.producer_of(hidden), Some(relu));
        assert_eq!(graph.consumers_of(hidden), vec![add, add]);
        // One edge per consuming input slot.
        assert_eq!(graph.output_edges_count(relu).unwrap(), 2);
        assert_eq!(graph.output_nodes(relu).unwrap(), vec![add, add]);
        assert_eq!(graph.input_edges_count(add).unwrap(), 2);
        graph.validate().unwrap();
    }

    #[test]
    fn test_add_node_rejects_unknown_arg_and_self_loop() {
        let mut graph = Graph::new();
        let x = f32_arg(&mut graph, "x", &[1]);

        let missing = Node::new("Relu").with_inputs(vec![NodeArgId(42)]);
        assert!(graph.add_node(missing).is_err());

        let looped = Node::new("Relu").with_inputs(vec![x]).with_outputs(vec![x]);
        assert!(graph.add_node(looped).is_err());
    }

    #[test]
    fn test_remove_node_requires_detached_outputs() {
        let mut graph = Graph::new();
        let t0 = f32_arg(&mut graph, "t0", &[2]);
        let t1 = f32_arg(&mut graph, "t1", &[2]);
        let t2 = f32_arg(&mut graph, "t2", &[2]);

        let a = graph
            .add_node(Node::new("A").with_inputs(vec![t0]).with_outputs(vec![t1]))
            .unwrap();
        let b = graph
            .add_node(Node::new("B").with_inputs(vec![t1]).with_outputs(vec![t2]))
            .unwrap();

        assert!(graph.remove_node(a).is_err());
        assert_eq!(graph.node_count(), 2);

        assert_eq!(graph.remove_node_output_edges(a).unwrap(), 1);
        graph.remove_node(a).unwrap();

        assert_eq!(graph.node_count(), 1);
        assert!(graph.get_node(a).is_none());
        assert_eq!(graph.producer_of(t1), None);
        assert_eq!(graph.consumers_of(t0), Vec::<NodeIndex>::new());
        assert_eq!(graph.input_edges_count(b).unwrap(), 0);
    }

    #[test]
    fn test_topological_order() {
        let mut graph = Graph::new();
        let t0 = f32_arg(&mut graph, "t0", &[2]);
        let t1 = f32_arg(&mut graph, "t1", &[2]);
        let t2 = f32_arg(&mut graph, "t2", &[2]);
        let t3 = f32_arg(&mut graph, "t3", &[2]);

        // Insert consumers before producers to make sure order comes from edges.
        let id_c = graph
            .add_node(Node::new("C").with_inputs(vec![t2]).with_outputs(vec![t3]))
            .unwrap();
        let id_b = graph
            .add_node(Node::new("B").with_inputs(vec![t1]).with_outputs(vec![t2]))
            .unwrap();
        let id_a = graph
            .add_node(Node::new("A").with_inputs(vec![t0]).with_outputs(vec![t1]))
            .unwrap();

        let order = graph.topological_order().unwrap();
        assert_eq!(order, vec![id_a, id_b, id_c]);
        graph.validate().unwrap();
    }

    #[test]
    fn test_topological_order_invalidated_by_mutation() {
        let mut graph = Graph::new();
        let t0 = f32_arg(&mut graph, "t0", &[2]);
        let t1 = f32_arg(&mut graph, "t1", &[2]);
        let t2 = f32_arg(&mut graph, "t2", &[2]);

        let a = graph
            .add_node(Node::new("A").with_inputs(vec![t0]).with_outputs(vec![t1]))
            .unwrap();
        assert_eq!(graph.topological_order().unwrap(), vec![a]);

        let b = graph
            .add_node(Node::new("B").with_inputs(vec![t1]).with_outputs(vec![t2]))
            .unwrap();
        assert_eq!(graph.topological_order().unwrap(), vec![a, b]);

        graph.remove_node(b).unwrap();
        assert_eq!(graph.topological_order().unwrap(), vec![a]);
    }

    #[test]
    fn test_cycle_is_reported() {
        let mut graph = Graph::new();
        let t0 = f32_arg(&mut graph, "t0", &[2]);
        let t1 = f32_arg(&mut graph, "t1", &[2]);

        graph
            .add_node(Node::new("A").with_inputs(vec![t0]).with_outputs(vec![t1]))
            .unwrap();
        graph
            .add_node(Node::new("B").with_inputs(vec![t1]).with_outputs(vec![t0]))
            .unwrap();

        assert!(matches!(
            graph.topological_order(),
            Err(Error::InvalidGraph(_))
        ));
    }

    #[test]
    fn test_stable_indices_after_removal() {
        let mut graph = Graph::new();
        let t0 = f32_arg(&mut graph, "t0", &[2]);
        let t1 = f32_arg(&mut graph, "t1", &[2]);
        let t2 = f32_arg(&mut graph, "t2", &[2]);

        let id_a = graph
            .add_node(Node::new("A").with_inputs(vec![t0]).with_outputs(vec![t1]))
            .unwrap();
        let id_b = graph
            .add_node(Node::new("B").with_inputs(vec![t1]).with_outputs(vec![t2]))
            .unwrap();
        let id_c = graph
            .add_node(Node::new("C").with_inputs(vec![t2]))
            .unwrap();

        let stale_order = graph.topological_order().unwrap();
        graph.remove_node_output_edges(id_b).unwrap();
        graph.remove_node(id_b).unwrap();

        assert!(graph.node(id_a).is_ok());
        assert!(graph.node(id_c).is_ok());
        let live: Vec<_> = stale_order
            .into_iter()
            .filter(|&id| graph.get_node(id).is_some())
            .collect();
        assert_eq!(live, vec![id_a, id_c]);
    }

    #[test]
    fn test_producer_takeover() {
        let mut graph = Graph::new();
        let x = f32_arg(&mut graph, "x", &[2]);
        let y = f32_arg(&mut graph, "y", &[2]);
        let z = f32_arg(&mut graph, "z", &[2]);

        let old = graph
            .add_node(Node::new("Relu").with_inputs(vec![x]).with_outputs(vec![y]))
            .unwrap();
        let consumer = graph
            .add_node(Node::new("Identity").with_inputs(vec![y]).with_outputs(vec![z]))
            .unwrap();

        let new = graph
            .add_node(Node::new("Identity").with_inputs(vec![x]).with_outputs(vec![y]))
            .unwrap();
        assert_eq!(graph.producer_of(y), Some(new));
        assert_eq!(graph.output_nodes(new).unwrap(), vec![consumer]);

        graph.remove_node_output_edges(old).unwrap();
        graph.remove_node(old).unwrap();

        assert_eq!(graph.producer_of(y), Some(new));
        assert_eq!(graph.input_nodes(consumer).unwrap(), vec![new]);
        graph.validate().unwrap();
    }

    #[test]
    fn test_generated_names_are_unique() {
        let mut graph = Graph::new();
        let x = f32_arg(&mut graph, "split0", &[2]);
        graph
            .add_node(Node::new("Split").with_name("Split").with_inputs(vec![x]))
            .unwrap();

        let first = graph.generate_node_name("Split");
        let second = graph.generate_node_name("Split");
        assert_ne!(first, "Split");
        assert_ne!(first, second);
        assert_eq!(graph.generate_node_name("Squeeze0"), "Squeeze0");

        let arg_name = graph.generate_node_arg_name("split0");
        assert_ne!(arg_name, "split0");
        assert_ne!(graph.generate_node_arg_name("split0"), arg_name);
    }

    #[test]
    fn test_unnamed_node_gets_generated_name() {
        let mut graph = Graph::new();
        let a = graph.add_node(Node::new("Relu")).unwrap();
        let b = graph.add_node(Node::new("Relu")).unwrap();
        assert_eq!(graph.node(a).unwrap().name, "Relu");
        assert_ne!(graph.node(b).unwrap().name, "Relu");
    }

    #[test]
    fn test_constant_initializer_excludes_graph_inputs() {
        let mut graph = Graph::new();
        let constant = graph
            .add_initializer("idx", TensorValue::scalar(TensorData::I64(vec![1])))
            .unwrap();
        let overridable = graph
            .add_initializer("bias", TensorValue::scalar(TensorData::F32(vec![0.5])))
            .unwrap();
        graph.set_inputs(vec![overridable]);

        assert!(graph.arg(constant).unwrap().is_scalar());
        assert_eq!(
            graph.constant_initializer(constant).and_then(|v| v.scalar_i64()),
            Some(1)
        );
        assert!(graph.constant_initializer(overridable).is_none());
        assert_eq!(graph.initializers().count(), 2);
    }

    #[test]
    fn test_subgraph_inherits_opset() {
        let mut graph = Graph::with_opset(12);
        graph.set_opset("ai.onnx", 13);
        let sub = graph.new_subgraph();
        assert_eq!(sub.opset(""), Some(13));
        assert_eq!(graph.domain_to_version().len(), 1);
    }
}
