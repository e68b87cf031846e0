//! ASG: Абстрактный семантический граф
//!
//! Graph of symbolic operations. Nodes are appended by `Tensor` handles
//! (see `crate::tensor`) and by the autograd pass, which writes gradient
//! nodes into the same graph so that gradients stay differentiable.

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Идентификатор узла
pub type NodeId = usize;
/// Идентификатор графа
pub type AsgId = usize;
/// Форма тензора
pub type Shape = Vec<usize>;

pub type AsgResult<T> = std::result::Result<T, AsgError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AsgError {
    #[error("Node with ID {0} not found")]
    NodeNotFound(NodeId),
    #[error("Invalid shape for node {0}")]
    InvalidShape(NodeId),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    F32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// ID узла (дублируем ключ HashMap для удобства вызовов в других модулях)
    pub id: NodeId,
    pub name: Option<String>,
    pub node_type: NodeType,
    pub shape: Option<Shape>,
    pub dtype: Option<DType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeType {
    // Данные
    Input { name: String },
    Parameter { name: String },
    Literal(Value),

    // Бинарные (numpy-style broadcasting)
    Add(NodeId, NodeId),
    Subtract(NodeId, NodeId),
    Multiply(NodeId, NodeId),
    Divide(NodeId, NodeId),
    /// Like `Divide`, but yields 0 wherever the divisor is exactly 0.
    DivideNoNan(NodeId, NodeId),
    /// 2-D matrix product.
    MatrixMultiply(NodeId, NodeId),
    /// 1.0 where lhs > rhs, 0.0 elsewhere.
    GreaterThan(NodeId, NodeId),

    // Унарные
    Negate(NodeId),
    Sqrt(NodeId),
    ReLU(NodeId),
    LeakyReLU(NodeId, f32),
    Tanh(NodeId),
    Sigmoid(NodeId),
    /// Identity in the forward pass, blocks gradient flow.
    StopGradient(NodeId),

    // Редукции
    /// Sum of all elements, rank-0 result.
    Sum(NodeId),
    /// Sum along one axis, keepdim=1.
    SumAxis(NodeId, usize),
    /// Number of elements as a rank-0 f32.
    Numel(NodeId),

    // Трансформации
    /// `[N, d1, d2, ...]` -> `[N, d1 * d2 * ...]`.
    Flatten(NodeId),
    /// `[N, D]` -> `[N, ...sample_shape]`.
    Unflatten(NodeId, Shape),
    /// Reshape the first operand to the runtime shape of the second.
    Reshape(NodeId, NodeId),
    Transpose(NodeId, usize, usize),
    /// Broadcast the first operand to the runtime shape of the second.
    Broadcast(NodeId, NodeId),
    /// Sum the first operand down to the runtime shape of the second.
    ReduceSumTo(NodeId, NodeId),
}

impl NodeType {
    /// Operands of the node, in order.
    pub fn operands(&self) -> Vec<NodeId> {
        match self {
            NodeType::Input { .. } | NodeType::Parameter { .. } | NodeType::Literal(_) => vec![],

            NodeType::Add(a, b)
            | NodeType::Subtract(a, b)
            | NodeType::Multiply(a, b)
            | NodeType::Divide(a, b)
            | NodeType::DivideNoNan(a, b)
            | NodeType::MatrixMultiply(a, b)
            | NodeType::GreaterThan(a, b)
            | NodeType::Reshape(a, b)
            | NodeType::Broadcast(a, b)
            | NodeType::ReduceSumTo(a, b) => vec![*a, *b],

            NodeType::Negate(a)
            | NodeType::Sqrt(a)
            | NodeType::ReLU(a)
            | NodeType::LeakyReLU(a, _)
            | NodeType::Tanh(a)
            | NodeType::Sigmoid(a)
            | NodeType::StopGradient(a)
            | NodeType::Sum(a)
            | NodeType::SumAxis(a, _)
            | NodeType::Numel(a)
            | NodeType::Flatten(a)
            | NodeType::Unflatten(a, _)
            | NodeType::Transpose(a, _, _) => vec![*a],
        }
    }

    /// Operands through which a value (and therefore a gradient) flows.
    ///
    /// Shape providers, masks, element counts and stop-gradient barriers
    /// are excluded.
    pub fn differentiable_operands(&self) -> Vec<NodeId> {
        match self {
            NodeType::Reshape(a, _) | NodeType::Broadcast(a, _) | NodeType::ReduceSumTo(a, _) => vec![*a],
            NodeType::GreaterThan(_, _) | NodeType::Numel(_) | NodeType::StopGradient(_) => vec![],
            other => other.operands(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Tensor(ArrayD<f32>),
    ScalarF32(f32),
}

impl Value {
    /// Rank-0 tensors and scalars both come out as an `ArrayD`.
    pub fn to_tensor(&self) -> ArrayD<f32> {
        match self {
            Value::Tensor(arr) => arr.clone(),
            Value::ScalarF32(v) => ndarray::arr0(*v).into_dyn(),
        }
    }

    pub fn into_tensor(self) -> ArrayD<f32> {
        match self {
            Value::Tensor(arr) => arr,
            Value::ScalarF32(v) => ndarray::arr0(v).into_dyn(),
        }
    }

    pub fn shape(&self) -> Shape {
        match self {
            Value::Tensor(arr) => arr.shape().to_vec(),
            Value::ScalarF32(_) => vec![],
        }
    }

    /// The single element of a one-element value.
    pub fn as_scalar(&self) -> Option<f32> {
        match self {
            Value::ScalarF32(v) => Some(*v),
            Value::Tensor(arr) if arr.len() == 1 => arr.iter().next().copied(),
            Value::Tensor(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asg {
    pub id: AsgId,
    pub name: Option<String>,
    pub nodes: HashMap<NodeId, Node>,
    pub inputs: Vec<NodeId>,
    pub outputs: Vec<NodeId>,
}

impl Asg {
    pub fn new(id: AsgId, name: Option<String>) -> Self {
        Self { id, name, nodes: HashMap::new(), inputs: vec![], outputs: vec![] }
    }

    pub fn add_node(&mut self, name: Option<String>, node_type: NodeType) -> NodeId {
        let new_id = self.nodes.len();
        let mut node = Node { id: new_id, name, node_type, shape: None, dtype: None };

        // Литералам форма известна сразу
        if let NodeType::Literal(value) = &node.node_type {
            node.shape = Some(value.shape());
            node.dtype = Some(DType::F32);
        }

        self.nodes.insert(new_id, node);
        new_id
    }

    pub fn set_outputs(&mut self, outputs: Vec<NodeId>) {
        self.outputs = outputs;
    }

    /// Шорткат для графов с одним выходом.
    pub fn set_output(&mut self, output: NodeId) {
        self.set_outputs(vec![output]);
    }

    pub fn get_node(&self, id: NodeId) -> AsgResult<&Node> {
        self.nodes.get(&id).ok_or(AsgError::NodeNotFound(id))
    }

    pub fn get_node_mut(&mut self, id: NodeId) -> AsgResult<&mut Node> {
        self.nodes.get_mut(&id).ok_or(AsgError::NodeNotFound(id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_gets_shape_on_insert() {
        let mut asg = Asg::new(0, None);
        let id = asg.add_node(None, NodeType::Literal(Value::Tensor(ArrayD::zeros(ndarray::IxDyn(&[2, 3])))));
        let scalar = asg.add_node(None, NodeType::Literal(Value::ScalarF32(1.0)));

        assert_eq!(asg.get_node(id).unwrap().shape, Some(vec![2, 3]));
        assert_eq!(asg.get_node(scalar).unwrap().shape, Some(vec![]));
        assert_eq!(asg.len(), 2);
    }

    #[test]
    fn test_missing_node() {
        let asg = Asg::new(0, None);
        assert_eq!(asg.get_node(7), Err(AsgError::NodeNotFound(7)));
    }

    #[test]
    fn test_differentiable_operands_skip_shape_providers() {
        assert_eq!(NodeType::Broadcast(1, 2).differentiable_operands(), vec![1]);
        assert_eq!(NodeType::ReduceSumTo(3, 4).operands(), vec![3, 4]);
        assert!(NodeType::StopGradient(5).differentiable_operands().is_empty());
        assert!(NodeType::GreaterThan(1, 2).differentiable_operands().is_empty());
    }

    #[test]
    fn test_value_as_scalar() {
        assert_eq!(Value::ScalarF32(2.5).as_scalar(), Some(2.5));
        let single = Value::Tensor(ndarray::arr0(4.0f32).into_dyn());
        assert_eq!(single.as_scalar(), Some(4.0));
        let many = Value::Tensor(ArrayD::zeros(ndarray::IxDyn(&[2])));
        assert_eq!(many.as_scalar(), None);
    }
}
