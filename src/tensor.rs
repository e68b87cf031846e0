//! Модуль, определяющий `Tensor` и `GraphContext`.
//!
//! `Tensor` is not a data container. It is a lightweight handle (a symbolic
//! variable) pointing at a node of the Abstract Semantic Graph (ASG).
//! Operations on tensors (`+`, `dot`, `tanh`, ...) do not compute anything;
//! they append nodes to the graph owned by the shared `GraphContext`.

use crate::asg::{Asg, NodeId, NodeType, Shape, Value};
use ndarray::ArrayD;
use std::cell::RefCell;
use std::collections::HashMap;
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::rc::Rc;

/// Контекст, который владеет и управляет построением ASG.
///
/// Wrapped in `Rc<RefCell<..>>` so that many `Tensor` handles can share it.
#[derive(Debug, Clone)]
pub struct GraphContext {
    main_graph: Asg,
    /// Parameter nodes by name. A network applied several times within one
    /// graph reuses the same parameter nodes.
    parameters: HashMap<String, NodeId>,
}

impl GraphContext {
    /// Создает новый, пустой контекст графа.
    pub fn new() -> Self {
        Self {
            main_graph: Asg::new(0, Some("main".to_string())),
            parameters: HashMap::new(),
        }
    }

    /// Изменяемая ссылка на основной граф.
    pub fn main_graph_mut(&mut self) -> &mut Asg {
        &mut self.main_graph
    }

    /// Иммутабельная ссылка на основной граф.
    pub fn main_graph(&self) -> &Asg {
        &self.main_graph
    }

    /// Node of an already registered parameter.
    pub fn parameter_node(&self, name: &str) -> Option<NodeId> {
        self.parameters.get(name).copied()
    }
}

impl Default for GraphContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Символьный дескриптор, представляющий узел в графе вычислений (ASG).
#[derive(Debug, Clone)]
pub struct Tensor {
    /// ID узла в ASG, который представляет этот тензор.
    pub node_id: NodeId,
    /// Разделяемая ссылка на контекст, в котором строится граф.
    pub context: Rc<RefCell<GraphContext>>,
}

impl Tensor {
    /// Wraps an existing node of `context`.
    pub fn from_node(context: &Rc<RefCell<GraphContext>>, node_id: NodeId) -> Self {
        Self {
            node_id,
            context: Rc::clone(context),
        }
    }

    /// Создает новый "входной" узел. Real data is bound to it by name at
    /// execution time.
    pub fn new_input(context: &Rc<RefCell<GraphContext>>, name: &str) -> Self {
        let mut ctx = context.borrow_mut();
        let graph = ctx.main_graph_mut();

        let node_id = graph.add_node(
            Some(name.to_string()),
            NodeType::Input {
                name: name.to_string(),
            },
        );
        graph.inputs.push(node_id);

        Self {
            node_id,
            context: Rc::clone(context),
        }
    }

    /// Returns the parameter node called `name`, creating it on first use.
    pub fn new_parameter(context: &Rc<RefCell<GraphContext>>, name: &str) -> Self {
        let mut ctx = context.borrow_mut();
        let node_id = match ctx.parameters.get(name) {
            Some(&id) => id,
            None => {
                let id = ctx.main_graph_mut().add_node(
                    Some(name.to_string()),
                    NodeType::Parameter {
                        name: name.to_string(),
                    },
                );
                ctx.parameters.insert(name.to_string(), id);
                id
            }
        };
        Self {
            node_id,
            context: Rc::clone(context),
        }
    }

    /// Создает узел-константу (литерал) из реальных данных.
    pub fn new_literal(context: &Rc<RefCell<GraphContext>>, data: ArrayD<f32>, name: &str) -> Self {
        let node_id = context
            .borrow_mut()
            .main_graph_mut()
            .add_node(Some(name.to_string()), NodeType::Literal(Value::Tensor(data)));
        Self {
            node_id,
            context: Rc::clone(context),
        }
    }

    /// Скалярная константа.
    pub fn scalar(context: &Rc<RefCell<GraphContext>>, value: f32) -> Self {
        let node_id = context
            .borrow_mut()
            .main_graph_mut()
            .add_node(None, NodeType::Literal(Value::ScalarF32(value)));
        Self {
            node_id,
            context: Rc::clone(context),
        }
    }

    /// Appends `node_type` to the graph of this tensor.
    fn push(&self, node_type: NodeType) -> Tensor {
        let node_id = self.context.borrow_mut().main_graph_mut().add_node(None, node_type);
        Tensor {
            node_id,
            context: Rc::clone(&self.context),
        }
    }

    /// Shape recorded on the node, if shape inference or a literal set it.
    pub fn shape(&self) -> Option<Shape> {
        self.context
            .borrow()
            .main_graph()
            .get_node(self.node_id)
            .ok()
            .and_then(|node| node.shape.clone())
    }

    // --- Математические операции ---

    pub fn dot(&self, other: &Tensor) -> Tensor {
        self.push(NodeType::MatrixMultiply(self.node_id, other.node_id))
    }

    pub fn sqrt(&self) -> Tensor {
        self.push(NodeType::Sqrt(self.node_id))
    }

    pub fn square(&self) -> Tensor {
        self * self
    }

    /// Division that yields 0 wherever `other` is 0.
    pub fn divide_no_nan(&self, other: &Tensor) -> Tensor {
        self.push(NodeType::DivideNoNan(self.node_id, other.node_id))
    }

    /// `self * value` with a scalar literal.
    pub fn scale(&self, value: f32) -> Tensor {
        let factor = Tensor::scalar(&self.context, value);
        self * &factor
    }

    // --- Функции активации ---

    pub fn relu(&self) -> Tensor {
        self.push(NodeType::ReLU(self.node_id))
    }

    pub fn leaky_relu(&self, negative_slope: f32) -> Tensor {
        self.push(NodeType::LeakyReLU(self.node_id, negative_slope))
    }

    pub fn tanh(&self) -> Tensor {
        self.push(NodeType::Tanh(self.node_id))
    }

    pub fn sigmoid(&self) -> Tensor {
        self.push(NodeType::Sigmoid(self.node_id))
    }

    /// Same value, no gradient flows back through the result.
    pub fn stop_gradient(&self) -> Tensor {
        self.push(NodeType::StopGradient(self.node_id))
    }

    // --- Операции редукции ---

    pub fn sum(&self) -> Tensor {
        self.push(NodeType::Sum(self.node_id))
    }

    /// Sum along `axis`, keeping it with length 1.
    pub fn sum_axis(&self, axis: usize) -> Tensor {
        self.push(NodeType::SumAxis(self.node_id, axis))
    }

    pub fn numel(&self) -> Tensor {
        self.push(NodeType::Numel(self.node_id))
    }

    /// Mean of all elements. The element count is read at run time, so the
    /// graph works for any batch size.
    pub fn mean(&self) -> Tensor {
        &self.sum() / &self.numel()
    }

    // --- Операции трансформации ---

    pub fn flatten(&self) -> Tensor {
        self.push(NodeType::Flatten(self.node_id))
    }

    pub fn unflatten(&self, sample_shape: &[usize]) -> Tensor {
        self.push(NodeType::Unflatten(self.node_id, sample_shape.to_vec()))
    }

    pub fn broadcast_like(&self, like: &Tensor) -> Tensor {
        self.push(NodeType::Broadcast(self.node_id, like.node_id))
    }

    pub fn transpose(&self, axis1: usize, axis2: usize) -> Tensor {
        self.push(NodeType::Transpose(self.node_id, axis1, axis2))
    }
}

// Реализация операторов для удобного синтаксиса `a + b`.

impl Add<&Tensor> for &Tensor {
    type Output = Tensor;
    fn add(self, rhs: &Tensor) -> Self::Output {
        self.push(NodeType::Add(self.node_id, rhs.node_id))
    }
}

impl Sub<&Tensor> for &Tensor {
    type Output = Tensor;
    fn sub(self, rhs: &Tensor) -> Self::Output {
        self.push(NodeType::Subtract(self.node_id, rhs.node_id))
    }
}

impl Mul<&Tensor> for &Tensor {
    type Output = Tensor;
    fn mul(self, rhs: &Tensor) -> Self::Output {
        self.push(NodeType::Multiply(self.node_id, rhs.node_id))
    }
}

impl Div<&Tensor> for &Tensor {
    type Output = Tensor;
    fn div(self, rhs: &Tensor) -> Self::Output {
        self.push(NodeType::Divide(self.node_id, rhs.node_id))
    }
}

impl Neg for &Tensor {
    type Output = Tensor;
    fn neg(self) -> Self::Output {
        self.push(NodeType::Negate(self.node_id))
    }
}
