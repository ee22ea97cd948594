//! Provider assignment.

use crate::error::{Result, RuntimeError};
use crate::provider::ExecutionProvider;
use kiln_core::Graph;
use std::sync::Arc;

/// Assign every unplaced node to the first provider that can run it.
///
/// `providers` is in priority order. Nodes that already name a provider keep
/// it, provided that provider is in the list. Returns the number of nodes
/// assigned.
#[tracing::instrument(skip_all, fields(num_nodes = graph.node_count()))]
pub fn assign_providers(
    graph: &mut Graph,
    providers: &[Arc<dyn ExecutionProvider>],
) -> Result<usize> {
    let mut assignments = Vec::new();

    let view: &Graph = graph;
    for index in view.topological_order()? {
        let node = view.node(index)?;
        if !node.execution_provider.is_empty() {
            if !providers
                .iter()
                .any(|p| p.provider_type() == node.execution_provider)
            {
                return Err(RuntimeError::NoProvider(format!(
                    "Node '{}' is placed on unavailable provider '{}'",
                    node.name, node.execution_provider
                )));
            }
            continue;
        }

        let provider = providers
            .iter()
            .find(|p| p.kernel_registry().can_run(p.provider_type(), node, view))
            .ok_or_else(|| {
                RuntimeError::NoProvider(format!(
                    "No provider has a kernel for node '{}' ({} v{})",
                    node.name,
                    node.op_type(),
                    node.since_version()
                ))
            })?;
        tracing::trace!(node = %node.name, provider = provider.provider_type(), "assigned");
        assignments.push((index, provider.provider_type().to_string()));
    }

    let count = assignments.len();
    for (index, provider) in assignments {
        graph.node_mut(index)?.execution_provider = provider;
    }
    tracing::debug!(assigned = count, "provider assignment done");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HostDeviceOptions;
    use crate::provider::{CpuExecutionProvider, HostDeviceExecutionProvider};
    use kiln_core::{
        DataType, Node, NodeArg, TensorShape, CPU_EXECUTION_PROVIDER,
        HOST_DEVICE_EXECUTION_PROVIDER,
    };

    fn relu_graph(op_type: &str) -> Graph {
        let mut graph = Graph::with_opset(14);
        let x = graph
            .add_node_arg(NodeArg::new("x", DataType::F32, TensorShape::Static(vec![4])))
            .unwrap();
        let y = graph
            .add_node_arg(NodeArg::new("y", DataType::F32, TensorShape::Static(vec![4])))
            .unwrap();
        graph
            .add_node(
                Node::new(op_type)
                    .with_name("op")
                    .with_inputs(vec![x])
                    .with_outputs(vec![y]),
            )
            .unwrap();
        graph.set_inputs(vec![x]);
        graph.set_outputs(vec![y]);
        graph
    }

    fn providers() -> Vec<Arc<dyn ExecutionProvider>> {
        vec![
            Arc::new(
                HostDeviceExecutionProvider::new(HostDeviceOptions { queue_count: 1 }).unwrap(),
            ),
            Arc::new(CpuExecutionProvider::new().unwrap()),
        ]
    }

    #[test]
    fn test_first_capable_provider_wins() {
        let mut graph = relu_graph("Relu");
        assert_eq!(assign_providers(&mut graph, &providers()).unwrap(), 1);
        let node = graph.find_node_by_name("op").unwrap();
        let expected = if cfg!(feature = "minimal-kernels") {
            CPU_EXECUTION_PROVIDER
        } else {
            HOST_DEVICE_EXECUTION_PROVIDER
        };
        assert_eq!(graph.node(node).unwrap().execution_provider, expected);
    }

    #[test]
    fn test_existing_placement_kept() {
        let mut graph = relu_graph("Relu");
        let node = graph.find_node_by_name("op").unwrap();
        graph.node_mut(node).unwrap().execution_provider = CPU_EXECUTION_PROVIDER.to_string();

        assert_eq!(assign_providers(&mut graph, &providers()).unwrap(), 0);
        assert_eq!(
            graph.node(node).unwrap().execution_provider,
            CPU_EXECUTION_PROVIDER
        );
    }

    #[test]
    fn test_unknown_op_has_no_provider() {
        let mut graph = relu_graph("Softmax");
        assert!(matches!(
            assign_providers(&mut graph, &providers()),
            Err(RuntimeError::NoProvider(_))
        ));
    }

    #[test]
    fn test_unavailable_placement_rejected() {
        let mut graph = relu_graph("Relu");
        let node = graph.find_node_by_name("op").unwrap();
        graph.node_mut(node).unwrap().execution_provider = "RemoteProvider".to_string();
        assert!(matches!(
            assign_providers(&mut graph, &providers()),
            Err(RuntimeError::NoProvider(_))
        ));
    }
}
