//! Inference sessions.
//!
//! A session owns an optimized, partitioned graph and the kernels for all of
//! its nodes. Running it walks the graph in topological order, launching each
//! node on its provider and ordering buffer access through the producers'
//! fences.

use crate::buffer::DeviceBuffer;
use crate::device::{QueueId, Task};
use crate::error::{Result, RuntimeError};
use crate::partition::assign_providers;
use crate::provider::ExecutionProvider;
use kiln_core::{
    Graph, Node, NodeArgId, NodeIndex, OpKernel, OptimizationLevel, TensorValue,
    CPU_EXECUTION_PROVIDER,
};
use kiln_optimizer::{GraphOptimizer, OptimizerOptions};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Options for [`InferenceSession`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Highest graph transformer level to run.
    pub optimization_level: OptimizationLevel,

    /// Sweep limit for the graph optimizer.
    pub max_optimizer_steps: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            optimization_level: OptimizationLevel::Basic,
            max_optimizer_steps: 10,
        }
    }
}

/// A graph prepared for repeated execution.
///
/// # Example
///
/// ```no_run
/// use kiln_runtime::{CpuExecutionProvider, ExecutionProvider, InferenceSession, SessionOptions};
/// use kiln_core::{Graph, TensorData, TensorValue};
/// use std::sync::Arc;
///
/// # fn main() -> kiln_runtime::Result<()> {
/// # let graph = Graph::with_opset(13);
/// let providers: Vec<Arc<dyn ExecutionProvider>> = vec![Arc::new(CpuExecutionProvider::new()?)];
/// let session = InferenceSession::new(graph, providers, SessionOptions::default())?;
///
/// let input = TensorValue::new(TensorData::F32(vec![1.0, 2.0, 3.0, 4.0]), vec![2, 2]);
/// let outputs = session.run(&[("input", input)])?;
/// println!("{:?}", outputs["output"]);
/// # Ok(())
/// # }
/// ```
pub struct InferenceSession {
    graph: Graph,
    providers: HashMap<String, Arc<dyn ExecutionProvider>>,
    order: Vec<NodeIndex>,
    kernels: HashMap<NodeIndex, Arc<dyn OpKernel>>,
    pending_release: Mutex<Vec<DeviceBuffer>>,
}

impl InferenceSession {
    /// Partition and optimize `graph`, then create every kernel.
    ///
    /// `providers` is in priority order.
    ///
    /// # Errors
    /// Fails if a node has no provider or its provider has no kernel for it.
    #[tracing::instrument(skip_all, fields(num_nodes = graph.node_count(), level = ?options.optimization_level))]
    pub fn new(
        mut graph: Graph,
        providers: Vec<Arc<dyn ExecutionProvider>>,
        options: SessionOptions,
    ) -> Result<Self> {
        if providers.is_empty() {
            return Err(RuntimeError::NoProvider(
                "Session needs at least one execution provider".to_string(),
            ));
        }

        assign_providers(&mut graph, &providers)?;

        let optimizer = GraphOptimizer::with_defaults(OptimizerOptions {
            level: options.optimization_level,
            max_steps: options.max_optimizer_steps,
        });
        if optimizer.optimize(&mut graph)? {
            assign_providers(&mut graph, &providers)?;
        }
        graph.validate()?;

        let order = graph.topological_order()?;
        let providers: HashMap<String, Arc<dyn ExecutionProvider>> = providers
            .into_iter()
            .map(|p| (p.provider_type().to_string(), p))
            .collect();

        let mut kernels = HashMap::with_capacity(order.len());
        for &index in &order {
            let node = graph.node(index)?;
            let provider = provider_for(&providers, node)?;
            let info = provider
                .kernel_registry()
                .lookup_for_node(provider.provider_type(), node, &graph)?;
            let kernel: Arc<dyn OpKernel> = Arc::from(info.create(node)?);
            kernels.insert(index, kernel);
        }

        tracing::debug!(
            num_nodes = order.len(),
            num_providers = providers.len(),
            "session ready"
        );

        Ok(Self {
            graph,
            providers,
            order,
            kernels,
            pending_release: Mutex::new(Vec::new()),
        })
    }

    /// The optimized, partitioned graph.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Run the graph on `inputs`, keyed by graph input name.
    ///
    /// Returns every graph output by name.
    #[tracing::instrument(skip_all, fields(num_inputs = inputs.len()))]
    pub fn run(&self, inputs: &[(&str, TensorValue)]) -> Result<HashMap<String, TensorValue>> {
        self.release_completed()?;

        let mut buffers = self.bind_inputs(inputs)?;
        for &index in &self.order {
            self.launch_node(index, &mut buffers)?;
        }

        let mut outputs = HashMap::with_capacity(self.graph.outputs().len());
        for &id in self.graph.outputs() {
            let name = self.graph.arg(id)?.name.clone();
            let buffer = buffers
                .get(&id)
                .ok_or_else(|| RuntimeError::TensorNotFound(name.clone()))?;
            if let Some(fence) = buffer.fence() {
                fence.before_using_as_input(CPU_EXECUTION_PROVIDER, QueueId(0))?;
            }
            let value = buffer.value().map_err(RuntimeError::ExecutionError)?;
            outputs.insert(name, TensorValue::clone(&value));
        }

        self.defer_release(buffers)?;
        Ok(outputs)
    }

    /// Free deferred buffers whose fences allow it.
    ///
    /// Returns the number released.
    pub fn release_completed(&self) -> Result<usize> {
        let mut pending = self.pending_release.lock();
        let before = pending.len();
        let mut kept = Vec::with_capacity(before);
        for buffer in pending.drain(..) {
            if !buffer.can_release()? {
                kept.push(buffer);
            }
        }
        *pending = kept;
        Ok(before - pending.len())
    }

    /// Buffers still waiting on their fences.
    pub fn pending_releases(&self) -> usize {
        self.pending_release.lock().len()
    }

    fn bind_inputs(
        &self,
        inputs: &[(&str, TensorValue)],
    ) -> Result<HashMap<NodeArgId, DeviceBuffer>> {
        let mut buffers: HashMap<NodeArgId, DeviceBuffer> = self
            .graph
            .initializers()
            .map(|(id, value)| (id, DeviceBuffer::ready(value.clone())))
            .collect();

        for (name, value) in inputs {
            let id = self
                .graph
                .arg_by_name(name)
                .filter(|id| self.graph.inputs().contains(id))
                .ok_or_else(|| {
                    RuntimeError::InvalidInputOutput(format!("'{name}' is not a graph input"))
                })?;
            buffers.insert(id, DeviceBuffer::ready(value.clone()));
        }

        for &id in self.graph.inputs() {
            if !buffers.contains_key(&id) {
                return Err(RuntimeError::InvalidInputOutput(format!(
                    "Missing graph input '{}'",
                    self.graph.arg(id)?.name
                )));
            }
        }
        Ok(buffers)
    }

    fn launch_node(
        &self,
        index: NodeIndex,
        buffers: &mut HashMap<NodeArgId, DeviceBuffer>,
    ) -> Result<()> {
        let node = self.graph.node(index)?;
        let provider = provider_for(&self.providers, node)?;
        let provider_type = provider.provider_type();
        let kernel = self
            .kernels
            .get(&index)
            .cloned()
            .ok_or_else(|| RuntimeError::ExecutionError(format!("No kernel for '{}'", node.name)))?;
        let queue = provider.next_queue();

        let mut inputs = Vec::with_capacity(node.inputs().len());
        for &arg in node.inputs() {
            let buffer = buffers
                .get(&arg)
                .cloned()
                .ok_or_else(|| RuntimeError::TensorNotFound(self.arg_name(arg)))?;
            if let Some(fence) = buffer.fence() {
                fence.before_using_as_input(provider_type, queue)?;
            }
            inputs.push(buffer);
        }

        let mut outputs = Vec::with_capacity(node.outputs().len());
        for _ in node.outputs() {
            let buffer = DeviceBuffer::pending(provider.create_fence()?);
            if let Some(fence) = buffer.fence() {
                fence.before_using_as_output(provider_type, queue)?;
            }
            outputs.push(buffer);
        }

        tracing::trace!(node = %node.name, provider = provider_type, %queue, "launch");
        provider.launch(
            queue,
            compute_task(node.name.clone(), kernel, inputs.clone(), outputs.clone()),
        )?;

        for fence in inputs.iter().filter_map(DeviceBuffer::fence) {
            fence.after_used_as_input(queue)?;
        }
        for fence in outputs.iter().filter_map(DeviceBuffer::fence) {
            fence.after_used_as_output(queue)?;
        }

        for (&arg, buffer) in node.outputs().iter().zip(outputs) {
            buffers.insert(arg, buffer);
        }
        Ok(())
    }

    /// Keep fenced buffers that are still in use until a later poll.
    fn defer_release(&self, buffers: HashMap<NodeArgId, DeviceBuffer>) -> Result<()> {
        let outputs: HashSet<NodeArgId> = self.graph.outputs().iter().copied().collect();
        let mut pending = self.pending_release.lock();
        for (id, buffer) in buffers {
            if outputs.contains(&id) {
                continue;
            }
            if !buffer.can_release()? {
                pending.push(buffer);
            }
        }
        if !pending.is_empty() {
            tracing::debug!(pending = pending.len(), "deferred buffer release");
        }
        Ok(())
    }

    fn arg_name(&self, id: NodeArgId) -> String {
        self.graph
            .arg(id)
            .map(|arg| arg.name.clone())
            .unwrap_or_else(|_| format!("#{}", id.index()))
    }
}

fn provider_for<'a>(
    providers: &'a HashMap<String, Arc<dyn ExecutionProvider>>,
    node: &Node,
) -> Result<&'a Arc<dyn ExecutionProvider>> {
    providers.get(&node.execution_provider).ok_or_else(|| {
        RuntimeError::NoProvider(format!(
            "Node '{}' is placed on unavailable provider '{}'",
            node.name, node.execution_provider
        ))
    })
}

fn compute_task(
    node_name: String,
    kernel: Arc<dyn OpKernel>,
    inputs: Vec<DeviceBuffer>,
    outputs: Vec<DeviceBuffer>,
) -> Task {
    Box::new(move || {
        let result = inputs
            .iter()
            .map(DeviceBuffer::value)
            .collect::<std::result::Result<Vec<_>, _>>()
            .and_then(|values| {
                let refs: Vec<&TensorValue> = values.iter().map(|v| v.as_ref()).collect();
                kernel.compute(&refs).map_err(|e| e.to_string())
            });

        match result {
            Ok(values) if values.len() == outputs.len() => {
                for (buffer, value) in outputs.iter().zip(values) {
                    buffer.set(value);
                }
            }
            Ok(values) => {
                let message = format!(
                    "Node '{node_name}' produced {} outputs, expected {}",
                    values.len(),
                    outputs.len()
                );
                outputs.iter().for_each(|b| b.fail(message.clone()));
            }
            Err(message) => {
                tracing::debug!(node = %node_name, %message, "kernel failed");
                let message = format!("Node '{node_name}': {message}");
                outputs.iter().for_each(|b| b.fail(message.clone()));
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::CpuExecutionProvider;
    use kiln_core::{DataType, NodeArg, TensorData, TensorShape};

    fn cpu() -> Vec<Arc<dyn ExecutionProvider>> {
        vec![Arc::new(CpuExecutionProvider::new().unwrap())]
    }

    fn add_graph() -> Graph {
        let mut graph = Graph::with_opset(14);
        let shape = TensorShape::Static(vec![2]);
        let a = graph
            .add_node_arg(NodeArg::new("a", DataType::F32, shape.clone()))
            .unwrap();
        let b = graph
            .add_initializer(
                "b",
                TensorValue::new(TensorData::F32(vec![10.0, 20.0]), vec![2]),
            )
            .unwrap();
        let c = graph
            .add_node_arg(NodeArg::new("c", DataType::F32, shape))
            .unwrap();
        graph
            .add_node(Node::new("Add").with_inputs(vec![a, b]).with_outputs(vec![c]))
            .unwrap();
        graph.set_inputs(vec![a]);
        graph.set_outputs(vec![c]);
        graph
    }

    #[test]
    fn test_run_add_with_initializer() {
        let session = InferenceSession::new(add_graph(), cpu(), SessionOptions::default()).unwrap();
        let outputs = session
            .run(&[("a", TensorValue::new(TensorData::F32(vec![1.0, 2.0]), vec![2]))])
            .unwrap();
        assert_eq!(outputs["c"].as_f32(), Some(&[11.0, 22.0][..]));
        assert_eq!(session.pending_releases(), 0);
    }

    #[test]
    fn test_missing_and_unknown_inputs() {
        let session = InferenceSession::new(add_graph(), cpu(), SessionOptions::default()).unwrap();
        assert!(matches!(
            session.run(&[]),
            Err(RuntimeError::InvalidInputOutput(_))
        ));
        let value = TensorValue::new(TensorData::F32(vec![1.0, 2.0]), vec![2]);
        assert!(matches!(
            session.run(&[("b", value)]),
            Err(RuntimeError::InvalidInputOutput(_))
        ));
    }

    #[test]
    fn test_kernel_failure_surfaces_at_output() {
        let session = InferenceSession::new(add_graph(), cpu(), SessionOptions::default()).unwrap();
        // Shape [3] does not broadcast against [2].
        let value = TensorValue::new(TensorData::F32(vec![1.0, 2.0, 3.0]), vec![3]);
        assert!(matches!(
            session.run(&[("a", value)]),
            Err(RuntimeError::ExecutionError(_))
        ));
    }

    #[test]
    fn test_no_providers() {
        assert!(matches!(
            InferenceSession::new(add_graph(), Vec::new(), SessionOptions::default()),
            Err(RuntimeError::NoProvider(_))
        ));
    }
}
