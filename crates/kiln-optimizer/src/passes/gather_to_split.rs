//! Fuse fan-out Gathers into one Split.
//!
//! Rewrites
//!
//! ```text
//! N -> Gather(index=0, axis=a)
//!   |-> Gather(index=1, axis=a)
//!   |-> Gather(index=2, axis=a)
//! ```
//!
//! into
//!
//! ```text
//! N -> Split(axis=a) -> Squeeze(axes=[a])
//!                   |-> Squeeze(axes=[a])
//!                   |-> Squeeze(axes=[a])
//! ```
//!
//! so that one kernel slices the whole tensor instead of one launch per slab.

use crate::graph_utils::{
    constant_scalar_int, is_supported_optype_version_and_domain, is_supported_provider,
    normalize_axis,
};
use kiln_core::opset::DEFAULT_DOMAIN;
use kiln_core::{
    AttributeValue, Graph, GraphTransformer, Node, NodeArg, NodeArgId, NodeIndex,
    OptimizationLevel, Result, SymbolicDim, TensorValue,
};
use std::collections::HashSet;

const GATHER_VERSIONS: &[i64] = &[1, 11, 13];

/// Opset from which Squeeze takes `axes` as an input instead of an attribute.
const SQUEEZE_AXES_INPUT_OPSET: i64 = 13;

/// Opset from which Split expects either `split` or `num_outputs`.
const SPLIT_NUM_OUTPUTS_OPSET: i64 = 18;

/// Replaces a set of Gathers that together select every slab of one axis
/// with a single Split followed by per-slab Squeezes.
///
/// The producer must have exactly one output, a known rank and at least two
/// output edges; every consumer must be a Gather on the same axis with a
/// constant scalar index, and the normalized indices must cover
/// `[0, fan_out)` exactly once. Graphs that do not match are left untouched.
#[derive(Debug, Clone, Default)]
pub struct GatherToSplitFusion {
    compatible_providers: HashSet<String>,
}

/// A producer whose consumers qualify for fusion.
struct FusionMatch {
    /// Normalized split axis.
    axis: usize,

    /// Gathers ordered by the slab they select.
    gathers: Vec<NodeIndex>,
}

impl GatherToSplitFusion {
    /// Create the transformer, restricted to nodes on `compatible_providers`.
    ///
    /// An empty set accepts nodes on any provider.
    pub fn new(compatible_providers: HashSet<String>) -> Self {
        Self {
            compatible_providers,
        }
    }

    /// Match the consumers of `node_id` against the fusion pattern.
    fn match_gathers(&self, graph: &Graph, node_id: NodeIndex) -> Option<FusionMatch> {
        let node = graph.get_node(node_id)?;

        // Shape -> Gather is common but cheap to compute; not worth a Split.
        if node.op_type == "Shape" {
            return None;
        }

        // Multi-output producers are out of scope.
        let [output] = node.outputs() else {
            return None;
        };

        let fan_out = graph.output_edges_count(node_id).ok()?;
        if fan_out <= 1 {
            return None;
        }

        let shape = &graph.arg(*output).ok()?.shape;
        let rank = shape.ndim()?;

        let mut axis = None;
        let mut gathers: Vec<Option<NodeIndex>> = vec![None; fan_out];
        for consumer in graph.output_nodes(node_id).ok()? {
            let gather = graph.get_node(consumer)?;
            let (index, gather_axis) = self.supported_gather(graph, gather, *output)?;
            let gather_axis = normalize_axis(gather_axis, rank)?;

            match axis {
                None => {
                    if shape.fixed_dim(gather_axis)? != fan_out {
                        return None;
                    }
                    axis = Some(gather_axis);
                }
                Some(split_axis) if split_axis != gather_axis => return None,
                Some(_) => {}
            }

            let index = if index < 0 {
                index + fan_out as i64
            } else {
                index
            };
            let slot = usize::try_from(index).ok().and_then(|i| gathers.get_mut(i))?;
            if slot.is_some() {
                return None;
            }
            *slot = Some(consumer);
        }

        Some(FusionMatch {
            axis: axis?,
            gathers: gathers.into_iter().collect::<Option<Vec<_>>>()?,
        })
    }

    /// Check one consumer; returns its raw `(index, axis)`.
    fn supported_gather(&self, graph: &Graph, gather: &Node, data: NodeArgId) -> Option<(i64, i64)> {
        if !is_supported_optype_version_and_domain(gather, "Gather", GATHER_VERSIONS, DEFAULT_DOMAIN)
            || !is_supported_provider(gather, &self.compatible_providers)
        {
            return None;
        }

        let [input, indices] = gather.inputs() else {
            return None;
        };
        if *input != data || gather.outputs().len() != 1 {
            return None;
        }

        let index = constant_scalar_int(graph, *indices)?;
        // An axis attribute that is not an int reads as the default.
        let axis = gather
            .attribute("axis")
            .and_then(AttributeValue::as_int)
            .unwrap_or(0);
        Some((index, axis))
    }

    /// Replace the matched Gathers with Split + Squeezes.
    fn fuse(&self, graph: &mut Graph, node_id: NodeIndex, matched: FusionMatch) -> Result<()> {
        let node = graph.node(node_id)?;
        let provider = node.execution_provider.clone();
        let producer_name = node.name.clone();
        let output = node.outputs()[0];

        let output_arg = graph.arg(output)?;
        let dtype = output_arg.dtype;
        let slab_shape = output_arg
            .shape
            .with_dim(matched.axis, SymbolicDim::Fixed(1))?;
        let fan_out = matched.gathers.len();
        let axis = matched.axis as i64;

        let gather_outputs = matched
            .gathers
            .iter()
            .map(|&id| graph.node(id).map(|gather| gather.outputs()[0]))
            .collect::<Result<Vec<_>>>()?;

        let mut split_outputs = Vec::with_capacity(fan_out);
        for i in 0..fan_out {
            let name = graph.generate_node_arg_name(&format!("split{i}"));
            split_outputs.push(graph.add_node_arg(NodeArg::new(name, dtype, slab_shape.clone()))?);
        }

        let opset = graph.opset(DEFAULT_DOMAIN).unwrap_or(-1);

        let split_name = graph.generate_node_name("Split");
        let mut split = Node::new("Split")
            .with_name(split_name)
            .with_description("Split for Fused Gather nodes")
            .with_inputs(vec![output])
            .with_outputs(split_outputs.clone())
            .with_attribute("axis", AttributeValue::Int(axis))
            .with_execution_provider(provider.clone());
        if opset >= SPLIT_NUM_OUTPUTS_OPSET {
            split.set_attribute("num_outputs", AttributeValue::Int(fan_out as i64));
        }
        graph.add_node(split)?;

        // Squeeze changed its schema in opset 13: axes moved from an
        // attribute to an optional input.
        let axes_input = if opset < SQUEEZE_AXES_INPUT_OPSET {
            None
        } else {
            let name = graph.generate_node_arg_name("SqueezeAxesInitializer");
            Some(graph.add_initializer(&name, TensorValue::from_i64s(vec![axis]))?)
        };

        for (i, (&slab, &gather_output)) in split_outputs.iter().zip(&gather_outputs).enumerate() {
            let name = graph.generate_node_name(&format!("Squeeze{i}"));
            let mut squeeze = Node::new("Squeeze")
                .with_name(name)
                .with_description("Squeeze for Fused Gather nodes")
                .with_outputs(vec![gather_output])
                .with_execution_provider(provider.clone());
            squeeze = match axes_input {
                Some(axes) => squeeze.with_inputs(vec![slab, axes]),
                None => squeeze
                    .with_inputs(vec![slab])
                    .with_attribute("axes", AttributeValue::Ints(vec![axis])),
            };
            graph.add_node(squeeze)?;
        }

        for &gather in &matched.gathers {
            graph.remove_node_output_edges(gather)?;
            graph.remove_node(gather)?;
        }

        tracing::debug!(
            producer = %producer_name,
            fan_out,
            axis,
            squeeze_axes_input = axes_input.is_some(),
            "fused Gather nodes into Split"
        );
        Ok(())
    }
}

impl GraphTransformer for GatherToSplitFusion {
    fn name(&self) -> &str {
        "GatherToSplitFusion"
    }

    fn level(&self) -> OptimizationLevel {
        OptimizationLevel::Basic
    }

    fn compatible_providers(&self) -> &HashSet<String> {
        &self.compatible_providers
    }

    fn apply(&self, graph: &mut Graph, modified: &mut bool, graph_level: usize) -> Result<()> {
        for node_id in graph.topological_order()? {
            // Removed by an earlier fusion in this sweep.
            if graph.get_node(node_id).is_none() {
                continue;
            }

            self.apply_to_subgraphs(graph, node_id, modified, graph_level)?;

            if let Some(matched) = self.match_gathers(graph, node_id) {
                self.fuse(graph, node_id, matched)?;
                *modified = true;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::{DataType, TensorData, TensorShape};

    /// `x:[2,3,4] -> Relu -> y`, with one Gather per (index, axis) pair.
    fn fan_out_graph(opset: i64, gathers: &[(i64, i64)]) -> (Graph, NodeIndex, Vec<NodeArgId>) {
        let mut graph = Graph::with_opset(opset);
        let x = graph
            .add_node_arg(NodeArg::new("x", DataType::F32, TensorShape::Static(vec![2, 3, 4])))
            .unwrap();
        let y = graph
            .add_node_arg(NodeArg::new("y", DataType::F32, TensorShape::Static(vec![2, 3, 4])))
            .unwrap();
        let relu = graph
            .add_node(Node::new("Relu").with_name("relu").with_inputs(vec![x]).with_outputs(vec![y]))
            .unwrap();

        let mut outputs = Vec::new();
        for (i, &(index, axis)) in gathers.iter().enumerate() {
            let idx = graph
                .add_initializer(&format!("idx{i}"), TensorValue::scalar(TensorData::I64(vec![index])))
                .unwrap();
            let out = graph
                .add_node_arg(NodeArg::new(format!("g{i}"), DataType::F32, TensorShape::Static(vec![2, 4])))
                .unwrap();
            graph
                .add_node(
                    Node::new("Gather")
                        .with_name(format!("gather{i}"))
                        .with_inputs(vec![y, idx])
                        .with_outputs(vec![out])
                        .with_attribute("axis", AttributeValue::Int(axis)),
                )
                .unwrap();
            outputs.push(out);
        }
        graph.set_inputs(vec![x]);
        graph.set_outputs(outputs.clone());
        (graph, relu, outputs)
    }

    fn run(graph: &mut Graph) -> bool {
        let mut modified = false;
        GatherToSplitFusion::default()
            .apply(graph, &mut modified, 0)
            .unwrap();
        modified
    }

    #[test]
    fn test_fuses_bijective_gathers() {
        let (mut graph, relu, outputs) = fan_out_graph(13, &[(2, 1), (0, 1), (1, 1)]);
        assert!(run(&mut graph));

        let consumers = graph.output_nodes(relu).unwrap();
        assert_eq!(consumers.len(), 1);
        let split = graph.node(consumers[0]).unwrap();
        assert_eq!(split.op_type(), "Split");
        assert_eq!(split.attr_int("axis"), Some(1));
        assert_eq!(split.outputs().len(), 3);

        for (i, &out) in outputs.iter().enumerate() {
            let squeeze = graph.node(graph.producer_of(out).unwrap()).unwrap();
            assert_eq!(squeeze.op_type(), "Squeeze");
            assert_eq!(squeeze.since_version(), 13);
            assert_eq!(squeeze.description, "Squeeze for Fused Gather nodes");
            // Slab order follows the gather index, not the gather order.
            let index = [2, 0, 1][i];
            assert_eq!(squeeze.inputs()[0], split.outputs()[index]);
        }
        assert!(graph.nodes().all(|n| n.op_type() != "Gather"));
        graph.validate().unwrap();
    }

    #[test]
    fn test_single_consumer_is_not_fused() {
        let (mut graph, _, _) = fan_out_graph(13, &[(0, 1)]);
        assert!(!run(&mut graph));
        assert_eq!(graph.node_count(), 2);
    }

    #[test]
    fn test_shape_producer_is_skipped() {
        let mut graph = Graph::with_opset(13);
        let x = graph
            .add_node_arg(NodeArg::new("x", DataType::F32, TensorShape::Static(vec![2, 3])))
            .unwrap();
        let dims = graph
            .add_node_arg(NodeArg::new("dims", DataType::I64, TensorShape::Static(vec![2])))
            .unwrap();
        graph
            .add_node(Node::new("Shape").with_inputs(vec![x]).with_outputs(vec![dims]))
            .unwrap();
        for i in 0..2 {
            let idx = graph
                .add_initializer(&format!("i{i}"), TensorValue::scalar(TensorData::I64(vec![i])))
                .unwrap();
            let out = graph
                .add_node_arg(NodeArg::new(format!("d{i}"), DataType::I64, TensorShape::scalar()))
                .unwrap();
            graph
                .add_node(Node::new("Gather").with_inputs(vec![dims, idx]).with_outputs(vec![out]))
                .unwrap();
        }

        assert!(!run(&mut graph));
        assert_eq!(graph.node_count(), 3);
    }

    #[test]
    fn test_incompatible_provider_is_skipped() {
        let (mut graph, _, _) = fan_out_graph(13, &[(0, 1), (1, 1), (2, 1)]);
        let fusion = GatherToSplitFusion::new(HashSet::from(["WgpuExecutionProvider".to_string()]));

        let mut modified = false;
        fusion.apply(&mut graph, &mut modified, 0).unwrap();
        assert!(!modified);
        assert_eq!(graph.node_count(), 4);
    }

    #[test]
    fn test_num_outputs_from_opset_18() {
        let (mut graph, relu, _) = fan_out_graph(18, &[(0, 1), (1, 1), (2, 1)]);
        assert!(run(&mut graph));

        let split = graph.node(graph.output_nodes(relu).unwrap()[0]).unwrap();
        assert_eq!(split.since_version(), 18);
        assert_eq!(split.attr_int("num_outputs"), Some(3));
    }

    #[test]
    fn test_non_int_axis_reads_as_zero() {
        let (mut graph, relu, _) = fan_out_graph(13, &[(1, 0), (0, 0)]);
        let gathers: Vec<_> = graph
            .nodes()
            .filter(|n| n.op_type() == "Gather")
            .map(|n| n.name.clone())
            .collect();
        for name in gathers {
            let id = graph.find_node_by_name(&name).unwrap();
            graph
                .node_mut(id)
                .unwrap()
                .set_attribute("axis", AttributeValue::String("1".to_string()));
        }
        assert!(run(&mut graph));

        let split = graph.node(graph.output_nodes(relu).unwrap()[0]).unwrap();
        assert_eq!(split.op_type(), "Split");
        assert_eq!(split.attr_int("axis"), Some(0));
        assert_eq!(split.outputs().len(), 2);
    }
}
