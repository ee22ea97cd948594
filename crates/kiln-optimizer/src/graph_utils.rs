//! Node and initializer predicates shared by transformers.

use kiln_core::opset;
use kiln_core::{Graph, Node, NodeArgId};
use std::collections::HashSet;

/// Check op type, schema version and domain of `node`.
///
/// `versions` lists the exact since-versions the caller understands.
pub fn is_supported_optype_version_and_domain(
    node: &Node,
    op_type: &str,
    versions: &[i64],
    domain: &str,
) -> bool {
    node.op_type == op_type
        && versions.contains(&node.since_version())
        && same_domain(&node.domain, domain)
}

/// Check that `node` is assigned to one of `providers`.
///
/// An empty set accepts every provider, including unassigned nodes.
pub fn is_supported_provider(node: &Node, providers: &HashSet<String>) -> bool {
    providers.is_empty() || providers.contains(&node.execution_provider)
}

/// Value of a rank-0 int32/int64 constant initializer.
pub fn constant_scalar_int(graph: &Graph, arg: NodeArgId) -> Option<i64> {
    graph.constant_initializer(arg)?.scalar_i64()
}

/// Normalize a possibly negative axis against `rank`.
///
/// Returns `None` when the axis is outside `[-rank, rank)`.
pub fn normalize_axis(axis: i64, rank: usize) -> Option<usize> {
    let rank = i64::try_from(rank).ok()?;
    let axis = if axis < 0 { axis + rank } else { axis };
    (0..rank).contains(&axis).then_some(axis as usize)
}

fn same_domain(a: &str, b: &str) -> bool {
    a == b || (opset::is_default_domain(a) && opset::is_default_domain(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::{DataType, NodeArg, TensorData, TensorShape, TensorValue};

    #[test]
    fn test_normalize_axis() {
        assert_eq!(normalize_axis(1, 3), Some(1));
        assert_eq!(normalize_axis(-1, 3), Some(2));
        assert_eq!(normalize_axis(-3, 3), Some(0));
        assert_eq!(normalize_axis(3, 3), None);
        assert_eq!(normalize_axis(-4, 3), None);
        assert_eq!(normalize_axis(0, 0), None);
    }

    #[test]
    fn test_supported_optype_version_and_domain() {
        let mut graph = Graph::with_opset(12);
        let gather = graph.add_node(Node::new("Gather")).unwrap();
        let custom = graph
            .add_node(Node::new("Gather").with_domain("com.example"))
            .unwrap();

        let gather = graph.node(gather).unwrap();
        assert_eq!(gather.since_version(), 11);
        assert!(is_supported_optype_version_and_domain(gather, "Gather", &[1, 11, 13], ""));
        assert!(is_supported_optype_version_and_domain(gather, "Gather", &[11], "ai.onnx"));
        assert!(!is_supported_optype_version_and_domain(gather, "Gather", &[13], ""));
        assert!(!is_supported_optype_version_and_domain(gather, "Split", &[11], ""));

        let custom = graph.node(custom).unwrap();
        assert!(!is_supported_optype_version_and_domain(custom, "Gather", &[1, 11, 13], ""));
    }

    #[test]
    fn test_supported_provider() {
        let node = Node::new("Gather").with_execution_provider("CPUExecutionProvider");
        assert!(is_supported_provider(&node, &HashSet::new()));

        let cpu_only = HashSet::from(["CPUExecutionProvider".to_string()]);
        assert!(is_supported_provider(&node, &cpu_only));

        let gpu_only = HashSet::from(["WgpuExecutionProvider".to_string()]);
        assert!(!is_supported_provider(&node, &gpu_only));
    }

    #[test]
    fn test_constant_scalar_int() {
        let mut graph = Graph::new();
        let scalar = graph
            .add_initializer("i", TensorValue::scalar(TensorData::I32(vec![-1])))
            .unwrap();
        let vector = graph
            .add_initializer("v", TensorValue::from_i64s(vec![1]))
            .unwrap();
        let float = graph
            .add_initializer("f", TensorValue::scalar(TensorData::F32(vec![1.0])))
            .unwrap();
        let runtime = graph
            .add_node_arg(NodeArg::new("r", DataType::I64, TensorShape::scalar()))
            .unwrap();

        assert_eq!(constant_scalar_int(&graph, scalar), Some(-1));
        assert_eq!(constant_scalar_int(&graph, vector), None);
        assert_eq!(constant_scalar_int(&graph, float), None);
        assert_eq!(constant_scalar_int(&graph, runtime), None);

        graph.set_inputs(vec![scalar]);
        assert_eq!(constant_scalar_int(&graph, scalar), None);
    }
}
