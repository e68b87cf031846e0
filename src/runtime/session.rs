//! A frozen graph plus the name bindings needed to execute it repeatedly.

use super::backend::{Backend, Memo, RuntimeError};
use crate::analysis::shape_inference::{ShapeInference, ShapeInferenceError};
use crate::asg::{Asg, DType, NodeId, NodeType, Shape, Value};
use std::collections::HashMap;

/// Граф, готовый к многократному выполнению.
///
/// `Input` and `Parameter` nodes are bound by name; values for them are
/// supplied on every `run` call.
#[derive(Debug, Clone)]
pub struct Executable {
    graph: Asg,
    bindings: HashMap<String, Vec<NodeId>>,
}

impl Executable {
    pub fn new(graph: Asg) -> Self {
        let mut bindings: HashMap<String, Vec<NodeId>> = HashMap::new();
        for node in graph.nodes.values() {
            if let NodeType::Input { name } | NodeType::Parameter { name } = &node.node_type {
                bindings.entry(name.clone()).or_default().push(node.id);
            }
        }
        Self { graph, bindings }
    }

    pub fn graph(&self) -> &Asg {
        &self.graph
    }

    /// Выполняет граф.
    ///
    /// `feeds` are merged in order; a later map overrides an earlier one.
    /// Names that the graph does not use are ignored.
    pub fn run<B: Backend>(
        &self,
        backend: &B,
        feeds: &[&HashMap<String, Value>],
    ) -> Result<Vec<Value>, RuntimeError> {
        let mut memo: Memo<B::DeviceData> = Memo::new();
        for feed in feeds {
            for (name, data) in backend.load_data(feed)? {
                if let Some(nodes) = self.bindings.get(&name) {
                    for &node_id in nodes {
                        memo.insert((self.graph.id, node_id), data.clone());
                    }
                }
            }
        }

        let (outputs, _) = backend.run(&self.graph, memo)?;
        backend.retrieve_data(&outputs)
    }

    /// Runs shape inference on a copy of the graph with the given input and
    /// parameter shapes, returning the annotated copy.
    pub fn infer_shapes(&self, shapes: &HashMap<String, Shape>) -> Result<Asg, ShapeInferenceError> {
        let initial: HashMap<String, (Shape, DType)> = shapes
            .iter()
            .map(|(name, shape)| (name.clone(), (shape.clone(), DType::F32)))
            .collect();
        let mut graph = self.graph.clone();
        ShapeInference::run(&mut graph, &initial)?;
        Ok(graph)
    }
}
