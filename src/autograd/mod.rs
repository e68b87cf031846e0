//! Автоград: построение градиентов d(output)/d(wrt) прямо в исходном графе.
//!
//! Алгоритм:
//!  - обходим граф в обратном топологическом порядке от `output`;
//!  - для узлов, лежащих на пути от какого-либо `wrt` к `output`, считаем
//!    вклады в операнды и аккумулируем (суммируем);
//!  - gradient nodes are appended to the SAME graph and reference the
//!    forward nodes directly, so a gradient is an ordinary differentiable
//!    value: calling `grad` on an expression built from a gradient yields
//!    second-order derivatives.
//!
//! The output is seeded with an all-ones tensor of its own shape, which is
//! the gradient of `output.sum()`.
//!
//! Rules per operator:
//!  Add/Subtract/Multiply/Divide/DivideNoNan (reduced back to operand shapes
//!  with ReduceSumTo), MatrixMultiply, Negate, Sqrt, ReLU, LeakyReLU, Tanh,
//!  Sigmoid, Sum, SumAxis, Flatten, Unflatten, Reshape, Transpose,
//!  Broadcast, ReduceSumTo. GreaterThan, Numel and StopGradient carry no
//!  gradient; neither do shape-provider operands.

use crate::analysis::shape_inference::{ShapeInference, ShapeInferenceError};
use crate::asg::{Asg, AsgError, NodeId, NodeType, Value};
use crate::tensor::{GraphContext, Tensor};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AutogradError {
    #[error("ASG: {0}")]
    Asg(#[from] AsgError),
    #[error("Shape: {0}")]
    Shape(#[from] ShapeInferenceError),
    #[error("Tensors passed to grad() belong to different graph contexts")]
    ForeignTensor,
}

pub type AutogradResult<T> = Result<T, AutogradError>;

/// Gradients of `output` with respect to each tensor in `wrt`.
///
/// Every returned tensor has the shape of its `wrt` counterpart. A `wrt`
/// tensor that `output` does not depend on gets an explicit zero gradient.
pub fn grad(output: &Tensor, wrt: &[&Tensor]) -> AutogradResult<Vec<Tensor>> {
    if wrt.iter().any(|t| !Rc::ptr_eq(&t.context, &output.context)) {
        return Err(AutogradError::ForeignTensor);
    }
    let wrt_ids: Vec<NodeId> = wrt.iter().map(|t| t.node_id).collect();
    let ids = Gradients::new(&output.context).build(output.node_id, &wrt_ids)?;
    Ok(ids
        .into_iter()
        .map(|id| Tensor::from_node(&output.context, id))
        .collect())
}

/// Публичная обёртка над построителем градиентов для одного контекста.
pub struct Gradients {
    context: Rc<RefCell<GraphContext>>,
}

impl Gradients {
    pub fn new(context: &Rc<RefCell<GraphContext>>) -> Self {
        Self {
            context: Rc::clone(context),
        }
    }

    /// Appends gradient nodes for `output` and returns, for each id in
    /// `wrt`, the node holding d(sum(output))/d(wrt).
    pub fn build(&self, output: NodeId, wrt: &[NodeId]) -> AutogradResult<Vec<NodeId>> {
        let mut ctx = self.context.borrow_mut();
        let mut autograd = Autograd::new(ctx.main_graph_mut());
        autograd.build(output, wrt)
    }
}

// --------------------------- Реализация автограда ---------------------------

struct Autograd<'a> {
    graph: &'a mut Asg,
    /// Карта: узел -> узел его градиента
    gmap: HashMap<NodeId, NodeId>,
    /// Nodes on a path from some `wrt` node to the output.
    relevant: HashSet<NodeId>,
}

impl<'a> Autograd<'a> {
    fn new(graph: &'a mut Asg) -> Self {
        Self {
            graph,
            gmap: HashMap::new(),
            relevant: HashSet::new(),
        }
    }

    fn build(&mut self, output: NodeId, wrt: &[NodeId]) -> AutogradResult<Vec<NodeId>> {
        let order = ShapeInference::topological_sort_from(self.graph, &[output])?;
        self.mark_relevant(&order, wrt)?;

        if self.relevant.contains(&output) {
            let one = self.lit_scalar(1.0);
            let seed = self.add_node(NodeType::Broadcast(one, output));
            self.gmap.insert(output, seed);
        }

        for &id in order.iter().rev() {
            if !self.relevant.contains(&id) {
                continue;
            }
            let g_out = match self.gmap.get(&id).copied() {
                Some(g) => g,
                None => continue,
            };
            let node_type = self.graph.get_node(id)?.node_type.clone();
            self.backprop(id, &node_type, g_out);
        }

        let mut result = Vec::with_capacity(wrt.len());
        for &w in wrt {
            let g = match self.gmap.get(&w).copied() {
                Some(g) => g,
                None => {
                    let zero = self.lit_scalar(0.0);
                    self.add_node(NodeType::Broadcast(zero, w))
                }
            };
            result.push(g);
        }
        Ok(result)
    }

    /// Forward sweep: a node is relevant if it is a `wrt` node or one of its
    /// differentiable operands is relevant.
    fn mark_relevant(&mut self, order: &[NodeId], wrt: &[NodeId]) -> AutogradResult<()> {
        let targets: HashSet<NodeId> = wrt.iter().copied().collect();
        for &id in order {
            let node = self.graph.get_node(id)?;
            let depends = targets.contains(&id)
                || node
                    .node_type
                    .differentiable_operands()
                    .iter()
                    .any(|op| self.relevant.contains(op));
            if depends {
                self.relevant.insert(id);
            }
        }
        Ok(())
    }

    /// Propagates `g_out` (the gradient of node `y`) to its operands.
    fn backprop(&mut self, y: NodeId, node_type: &NodeType, g_out: NodeId) {
        match node_type {
            // Листья и узлы без производной
            NodeType::Input { .. }
            | NodeType::Parameter { .. }
            | NodeType::Literal(_)
            | NodeType::GreaterThan(_, _)
            | NodeType::Numel(_)
            | NodeType::StopGradient(_) => {}

            // -------- БИНАРНЫЕ --------
            NodeType::Add(a, b) => {
                self.acc_reduced(*a, g_out);
                self.acc_reduced(*b, g_out);
            }
            NodeType::Subtract(a, b) => {
                self.acc_reduced(*a, g_out);
                if self.relevant.contains(b) {
                    let neg = self.add_node(NodeType::Negate(g_out));
                    self.acc_reduced(*b, neg);
                }
            }
            NodeType::Multiply(a, b) => {
                if self.relevant.contains(a) {
                    let g_a = self.add_node(NodeType::Multiply(g_out, *b));
                    self.acc_reduced(*a, g_a);
                }
                if self.relevant.contains(b) {
                    let g_b = self.add_node(NodeType::Multiply(g_out, *a));
                    self.acc_reduced(*b, g_b);
                }
            }
            NodeType::Divide(a, b) => {
                // y = a / b: g_a = g / b, g_b = -g * y / b
                if self.relevant.contains(a) {
                    let g_a = self.add_node(NodeType::Divide(g_out, *b));
                    self.acc_reduced(*a, g_a);
                }
                if self.relevant.contains(b) {
                    let gy = self.add_node(NodeType::Multiply(g_out, y));
                    let ratio = self.add_node(NodeType::Divide(gy, *b));
                    let g_b = self.add_node(NodeType::Negate(ratio));
                    self.acc_reduced(*b, g_b);
                }
            }
            NodeType::DivideNoNan(a, b) => {
                if self.relevant.contains(a) {
                    let g_a = self.add_node(NodeType::DivideNoNan(g_out, *b));
                    self.acc_reduced(*a, g_a);
                }
                if self.relevant.contains(b) {
                    let gy = self.add_node(NodeType::Multiply(g_out, y));
                    let ratio = self.add_node(NodeType::DivideNoNan(gy, *b));
                    let g_b = self.add_node(NodeType::Negate(ratio));
                    self.acc_reduced(*b, g_b);
                }
            }
            NodeType::MatrixMultiply(a, b) => {
                if self.relevant.contains(a) {
                    // g_a = g_out @ b^T
                    let bt = self.add_node(NodeType::Transpose(*b, 0, 1));
                    let g_a = self.add_node(NodeType::MatrixMultiply(g_out, bt));
                    self.acc(*a, g_a);
                }
                if self.relevant.contains(b) {
                    // g_b = a^T @ g_out
                    let at = self.add_node(NodeType::Transpose(*a, 0, 1));
                    let g_b = self.add_node(NodeType::MatrixMultiply(at, g_out));
                    self.acc(*b, g_b);
                }
            }

            // -------- УНАРНЫЕ --------
            NodeType::Negate(x) => {
                let g_x = self.add_node(NodeType::Negate(g_out));
                self.acc(*x, g_x);
            }
            NodeType::Sqrt(x) => {
                // d sqrt(x) = g / (2 sqrt(x)); zero where sqrt(x) == 0
                let two = self.lit_scalar(2.0);
                let denom = self.add_node(NodeType::Multiply(two, y));
                let g_x = self.add_node(NodeType::DivideNoNan(g_out, denom));
                self.acc(*x, g_x);
            }
            NodeType::ReLU(x) => {
                let zero = self.lit_scalar(0.0);
                let mask = self.add_node(NodeType::GreaterThan(*x, zero));
                let g_x = self.add_node(NodeType::Multiply(g_out, mask));
                self.acc(*x, g_x);
            }
            NodeType::LeakyReLU(x, slope) => {
                // factor = mask * (1 - slope) + slope
                let zero = self.lit_scalar(0.0);
                let mask = self.add_node(NodeType::GreaterThan(*x, zero));
                let span = self.lit_scalar(1.0 - *slope);
                let scaled = self.add_node(NodeType::Multiply(mask, span));
                let floor = self.lit_scalar(*slope);
                let factor = self.add_node(NodeType::Add(scaled, floor));
                let g_x = self.add_node(NodeType::Multiply(g_out, factor));
                self.acc(*x, g_x);
            }
            NodeType::Tanh(x) => {
                let one = self.lit_scalar(1.0);
                let y2 = self.add_node(NodeType::Multiply(y, y));
                let dy = self.add_node(NodeType::Subtract(one, y2));
                let g_x = self.add_node(NodeType::Multiply(g_out, dy));
                self.acc(*x, g_x);
            }
            NodeType::Sigmoid(x) => {
                let one = self.lit_scalar(1.0);
                let one_minus = self.add_node(NodeType::Subtract(one, y));
                let dy = self.add_node(NodeType::Multiply(y, one_minus));
                let g_x = self.add_node(NodeType::Multiply(g_out, dy));
                self.acc(*x, g_x);
            }

            // -------- РЕДУКЦИИ --------
            NodeType::Sum(x) | NodeType::SumAxis(x, _) => {
                let g_x = self.add_node(NodeType::Broadcast(g_out, *x));
                self.acc(*x, g_x);
            }

            // -------- ТРАНСФОРМАЦИИ --------
            NodeType::Flatten(x) | NodeType::Unflatten(x, _) | NodeType::Reshape(x, _) => {
                let g_x = self.add_node(NodeType::Reshape(g_out, *x));
                self.acc(*x, g_x);
            }
            NodeType::Transpose(x, a1, a2) => {
                let g_x = self.add_node(NodeType::Transpose(g_out, *a1, *a2));
                self.acc(*x, g_x);
            }
            NodeType::Broadcast(x, _target) => {
                let g_x = self.add_node(NodeType::ReduceSumTo(g_out, *x));
                self.acc(*x, g_x);
            }
            NodeType::ReduceSumTo(x, _target) => {
                let g_x = self.add_node(NodeType::Broadcast(g_out, *x));
                self.acc(*x, g_x);
            }
        }
    }

    fn add_node(&mut self, node_type: NodeType) -> NodeId {
        self.graph.add_node(None, node_type)
    }

    fn lit_scalar(&mut self, v: f32) -> NodeId {
        self.graph.add_node(None, NodeType::Literal(Value::ScalarF32(v)))
    }

    /// Аккумуляция: d/d(target) += contrib. Irrelevant targets are skipped.
    fn acc(&mut self, target: NodeId, contrib: NodeId) {
        if !self.relevant.contains(&target) {
            return;
        }
        if let Some(prev) = self.gmap.get(&target).copied() {
            let sum = self.add_node(NodeType::Add(prev, contrib));
            self.gmap.insert(target, sum);
        } else {
            self.gmap.insert(target, contrib);
        }
    }

    /// Like `acc`, after summing `contrib` down to the shape of `target`
    /// (undoes broadcasting of elementwise operands).
    fn acc_reduced(&mut self, target: NodeId, contrib: NodeId) {
        if !self.relevant.contains(&target) {
            return;
        }
        let reduced = self.add_node(NodeType::ReduceSumTo(contrib, target));
        self.acc(target, reduced);
    }
}
