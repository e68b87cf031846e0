//! Бэкенд для выполнения ASG на CPU.
//!
//! Обходит граф в топологическом порядке и для каждого узла выполняет
//! соответствующую операцию с помощью `ndarray`. Elementwise binary
//! operations follow numpy broadcasting rules.

use super::backend::{Backend, Memo, RuntimeError};
use crate::analysis::shape_inference::{broadcast_shapes, ShapeInference};
use crate::asg::{Asg, AsgId, NodeId, NodeType, Value};
use ndarray::{ArrayD, Axis, Ix2, IxDyn, Zip};
use std::collections::HashMap;

/// Контекст выполнения одного графа на CPU.
struct ExecutionContext<'a> {
    asg: &'a Asg,
    /// Кэш уже вычисленных значений узлов.
    memo: Memo<Value>,
}

impl<'a> ExecutionContext<'a> {
    fn new(asg: &'a Asg, initial_memo: Memo<Value>) -> Self {
        Self {
            asg,
            memo: initial_memo,
        }
    }

    fn id(&self) -> AsgId {
        self.asg.id
    }

    /// Value of an operand that must already be in the memo.
    fn operand(&self, node_id: NodeId) -> Result<ArrayD<f32>, RuntimeError> {
        self.memo
            .get(&(self.id(), node_id))
            .map(Value::to_tensor)
            .ok_or(RuntimeError::NodeNotFound(node_id, self.id()))
    }

    /// Вычисляет значение узла. Operands are evaluated first by the caller
    /// (topological order), so this never recurses.
    fn evaluate_node(&mut self, node_id: NodeId) -> Result<(), RuntimeError> {
        if self.memo.contains_key(&(self.id(), node_id)) {
            return Ok(());
        }

        let asg = self.asg;
        let node = asg
            .nodes
            .get(&node_id)
            .ok_or(RuntimeError::NodeNotFound(node_id, self.id()))?;

        let result = match &node.node_type {
            NodeType::Input { name } => {
                return Err(RuntimeError::MissingInput(name.clone(), node.id));
            }
            NodeType::Parameter { name } => {
                return Err(RuntimeError::MissingParameter(name.clone(), node.id));
            }
            NodeType::Literal(value) => value.to_tensor(),

            NodeType::Add(l, r) => zip_broadcast(&self.operand(*l)?, &self.operand(*r)?, |a, b| a + b)?,
            NodeType::Subtract(l, r) => zip_broadcast(&self.operand(*l)?, &self.operand(*r)?, |a, b| a - b)?,
            NodeType::Multiply(l, r) => zip_broadcast(&self.operand(*l)?, &self.operand(*r)?, |a, b| a * b)?,
            NodeType::Divide(l, r) => zip_broadcast(&self.operand(*l)?, &self.operand(*r)?, |a, b| a / b)?,
            NodeType::DivideNoNan(l, r) => zip_broadcast(&self.operand(*l)?, &self.operand(*r)?, |a, b| {
                if b == 0.0 {
                    0.0
                } else {
                    a / b
                }
            })?,
            NodeType::GreaterThan(l, r) => zip_broadcast(&self.operand(*l)?, &self.operand(*r)?, |a, b| {
                if a > b {
                    1.0
                } else {
                    0.0
                }
            })?,
            NodeType::MatrixMultiply(l, r) => op_matmul(&self.operand(*l)?, &self.operand(*r)?)?,

            NodeType::Negate(op) => self.operand(*op)?.mapv(|x| -x),
            NodeType::Sqrt(op) => self.operand(*op)?.mapv(f32::sqrt),
            NodeType::ReLU(op) => self.operand(*op)?.mapv(|x| x.max(0.0)),
            NodeType::LeakyReLU(op, slope) => {
                let slope = *slope;
                self.operand(*op)?.mapv(|x| if x > 0.0 { x } else { slope * x })
            }
            NodeType::Tanh(op) => self.operand(*op)?.mapv(f32::tanh),
            NodeType::Sigmoid(op) => self.operand(*op)?.mapv(|x| 1.0 / (1.0 + (-x).exp())),
            NodeType::StopGradient(op) => self.operand(*op)?,

            NodeType::Sum(op) => ndarray::arr0(self.operand(*op)?.sum()).into_dyn(),
            NodeType::SumAxis(op, axis) => op_sum_axis(self.operand(*op)?, *axis)?,
            NodeType::Numel(op) => ndarray::arr0(self.operand(*op)?.len() as f32).into_dyn(),

            NodeType::Flatten(op) => op_flatten(self.operand(*op)?)?,
            NodeType::Unflatten(op, sample_shape) => {
                let source = self.operand(*op)?;
                let batch = source.shape().first().copied().unwrap_or(1);
                let mut target = vec![batch];
                target.extend_from_slice(sample_shape);
                reshape(&source, &target)?
            }
            NodeType::Reshape(op, like) => reshape(&self.operand(*op)?, self.operand(*like)?.shape())?,
            NodeType::Transpose(op, ax1, ax2) => op_transpose(self.operand(*op)?, *ax1, *ax2)?,
            NodeType::Broadcast(op, like) => op_broadcast(&self.operand(*op)?, self.operand(*like)?.shape())?,
            NodeType::ReduceSumTo(op, like) => op_reduce_sum_to(self.operand(*op)?, self.operand(*like)?.shape())?,
        };

        self.memo.insert((self.id(), node_id), Value::Tensor(result));
        Ok(())
    }
}

pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for CpuBackend {
    type DeviceData = Value;

    fn load_data(
        &self,
        data: &HashMap<String, Value>,
    ) -> Result<HashMap<String, Self::DeviceData>, RuntimeError> {
        Ok(data.clone())
    }

    fn run(
        &self,
        main_asg: &Asg,
        initial_memo: Memo<Self::DeviceData>,
    ) -> Result<(Vec<Self::DeviceData>, Memo<Self::DeviceData>), RuntimeError> {
        let sorted_nodes = ShapeInference::topological_sort(main_asg)
            .map_err(|e| RuntimeError::ShapeError(format!("Topological sort failed: {}", e)))?;

        let mut context = ExecutionContext::new(main_asg, initial_memo);
        for node_id in sorted_nodes {
            context.evaluate_node(node_id)?;
        }

        let mut results = Vec::with_capacity(main_asg.outputs.len());
        for output_node_id in &main_asg.outputs {
            let result = context
                .memo
                .get(&(main_asg.id, *output_node_id))
                .ok_or(RuntimeError::NodeNotFound(*output_node_id, main_asg.id))?
                .clone();
            results.push(result);
        }
        Ok((results, context.memo))
    }

    fn retrieve_data(&self, device_data: &[Self::DeviceData]) -> Result<Vec<Value>, RuntimeError> {
        Ok(device_data.to_vec())
    }
}

// --------------------------- Операции ---------------------------

/// Elementwise `f(a, b)` after broadcasting both operands to a common shape.
fn zip_broadcast<F>(a: &ArrayD<f32>, b: &ArrayD<f32>, f: F) -> Result<ArrayD<f32>, RuntimeError>
where
    F: Fn(f32, f32) -> f32,
{
    let shape = broadcast_shapes(a.shape(), b.shape()).ok_or_else(|| {
        RuntimeError::ShapeError(format!("Cannot broadcast {:?} with {:?}", a.shape(), b.shape()))
    })?;
    let av = a
        .broadcast(IxDyn(&shape))
        .ok_or_else(|| RuntimeError::ShapeError(format!("Cannot broadcast {:?} to {:?}", a.shape(), shape)))?;
    let bv = b
        .broadcast(IxDyn(&shape))
        .ok_or_else(|| RuntimeError::ShapeError(format!("Cannot broadcast {:?} to {:?}", b.shape(), shape)))?;
    Ok(Zip::from(av).and(bv).map_collect(|&x, &y| f(x, y)))
}

fn op_matmul(a: &ArrayD<f32>, b: &ArrayD<f32>) -> Result<ArrayD<f32>, RuntimeError> {
    let a_mat = a
        .view()
        .into_dimensionality::<Ix2>()
        .map_err(|_| RuntimeError::ShapeError(format!("Matmul expects 2D operands, got {:?}", a.shape())))?;
    let b_mat = b
        .view()
        .into_dimensionality::<Ix2>()
        .map_err(|_| RuntimeError::ShapeError(format!("Matmul expects 2D operands, got {:?}", b.shape())))?;
    if a_mat.shape()[1] != b_mat.shape()[0] {
        return Err(RuntimeError::ShapeError(format!(
            "Incompatible matmul shapes: {:?} and {:?}",
            a.shape(),
            b.shape()
        )));
    }
    Ok(a_mat.dot(&b_mat).into_dyn())
}

fn op_sum_axis(a: ArrayD<f32>, axis: usize) -> Result<ArrayD<f32>, RuntimeError> {
    if axis >= a.ndim() {
        return Err(RuntimeError::ShapeError(format!(
            "Axis {} out of range for shape {:?}",
            axis,
            a.shape()
        )));
    }
    Ok(a.sum_axis(Axis(axis)).insert_axis(Axis(axis)))
}

fn op_flatten(a: ArrayD<f32>) -> Result<ArrayD<f32>, RuntimeError> {
    let shape = a.shape().to_vec();
    let (batch, rest) = match shape.split_first() {
        Some((batch, rest)) => (*batch, rest.iter().product::<usize>()),
        None => {
            return Err(RuntimeError::ShapeError(
                "Flatten expects a tensor with a batch dimension".to_string(),
            ))
        }
    };
    reshape(&a, &[batch, rest])
}

fn reshape(a: &ArrayD<f32>, target: &[usize]) -> Result<ArrayD<f32>, RuntimeError> {
    a.to_shape(IxDyn(target))
        .map(|view| view.into_owned())
        .map_err(|e| RuntimeError::ShapeError(format!("Cannot reshape {:?} to {:?}: {}", a.shape(), target, e)))
}

fn op_transpose(a: ArrayD<f32>, axis1: usize, axis2: usize) -> Result<ArrayD<f32>, RuntimeError> {
    if axis1 >= a.ndim() || axis2 >= a.ndim() {
        return Err(RuntimeError::ShapeError(format!(
            "Transpose axes ({}, {}) out of range for shape {:?}",
            axis1,
            axis2,
            a.shape()
        )));
    }
    let mut axes: Vec<usize> = (0..a.ndim()).collect();
    axes.swap(axis1, axis2);
    Ok(a.permuted_axes(axes).as_standard_layout().into_owned())
}

fn op_broadcast(source: &ArrayD<f32>, target_shape: &[usize]) -> Result<ArrayD<f32>, RuntimeError> {
    // Одноэлементный источник заполняет всю целевую форму
    if source.len() == 1 {
        if let Some(&val) = source.iter().next() {
            return Ok(ArrayD::from_elem(IxDyn(target_shape), val));
        }
    }
    source
        .broadcast(IxDyn(target_shape))
        .map(|view| view.to_owned())
        .ok_or_else(|| {
            RuntimeError::ShapeError(format!("Cannot broadcast {:?} to {:?}", source.shape(), target_shape))
        })
}

/// Sums `source` down to `target_shape`, undoing a numpy-style broadcast.
fn op_reduce_sum_to(mut source: ArrayD<f32>, target_shape: &[usize]) -> Result<ArrayD<f32>, RuntimeError> {
    // Лишние ведущие оси
    while source.ndim() > target_shape.len() {
        source = source.sum_axis(Axis(0));
    }

    // Оси, растянутые из размерности 1
    let mut axes_to_sum = Vec::new();
    for (axis, (&target, &current)) in target_shape.iter().zip(source.shape().iter()).enumerate() {
        if target == 1 && current > 1 {
            axes_to_sum.push(axis);
        }
    }
    for axis in axes_to_sum {
        source = source.sum_axis(Axis(axis)).insert_axis(Axis(axis));
    }

    if source.shape() != target_shape {
        return reshape(&source, target_shape);
    }
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{GraphContext, Tensor};
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn eval(ctx: &Rc<RefCell<GraphContext>>, out: &Tensor, inputs: &[(&Tensor, ArrayD<f32>)]) -> ArrayD<f32> {
        let mut graph = ctx.borrow().main_graph().clone();
        graph.set_output(out.node_id);
        let memo: Memo<Value> = inputs
            .iter()
            .map(|(t, v)| ((graph.id, t.node_id), Value::Tensor(v.clone())))
            .collect();
        let (mut outputs, _) = CpuBackend::new().run(&graph, memo).unwrap();
        outputs.remove(0).into_tensor()
    }

    #[test]
    fn test_broadcast_add() {
        let ctx = Rc::new(RefCell::new(GraphContext::new()));
        let x = Tensor::new_input(&ctx, "x");
        let b = Tensor::new_input(&ctx, "b");
        let y = &x + &b;

        let out = eval(
            &ctx,
            &y,
            &[(&x, array![[1.0f32, 2.0], [3.0, 4.0]].into_dyn()), (&b, array![10.0f32, 20.0].into_dyn())],
        );
        assert_eq!(out, array![[11.0f32, 22.0], [13.0, 24.0]].into_dyn());
    }

    #[test]
    fn test_reduce_sum_to() {
        let source = array![[[1.0f32, 2.0], [3.0, 4.0]], [[5.0, 6.0], [7.0, 8.0]]].into_dyn();
        let out = op_reduce_sum_to(source.clone(), &[2, 1]).unwrap();
        assert_eq!(out, array![[1.0f32 + 2.0 + 5.0 + 6.0], [3.0 + 4.0 + 7.0 + 8.0]].into_dyn());

        let scalar = op_reduce_sum_to(source, &[]).unwrap();
        assert_eq!(scalar, ndarray::arr0(36.0f32).into_dyn());
    }

    #[test]
    fn test_divide_no_nan_and_mean() {
        let ctx = Rc::new(RefCell::new(GraphContext::new()));
        let x = Tensor::new_input(&ctx, "x");
        let z = Tensor::new_input(&ctx, "z");
        let y = x.divide_no_nan(&z).mean();

        let out = eval(
            &ctx,
            &y,
            &[(&x, array![2.0f32, 4.0, 6.0].into_dyn()), (&z, array![2.0f32, 0.0, 3.0].into_dyn())],
        );
        assert_abs_diff_eq!(out[[]], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_flatten_sum_axis_and_unflatten() {
        let ctx = Rc::new(RefCell::new(GraphContext::new()));
        let x = Tensor::new_input(&ctx, "x");
        let rows = x.flatten().sum_axis(1);
        let back = x.flatten().unflatten(&[2, 2]);

        let data = array![[[1.0f32, 2.0], [3.0, 4.0]], [[0.5, 0.5], [0.5, 0.5]]].into_dyn();
        let out = eval(&ctx, &rows, &[(&x, data.clone())]);
        assert_eq!(out, array![[10.0f32], [2.0]].into_dyn());
        let restored = eval(&ctx, &back, &[(&x, data.clone())]);
        assert_eq!(restored, data);
    }

    #[test]
    fn test_matmul_and_transpose() {
        let ctx = Rc::new(RefCell::new(GraphContext::new()));
        let a = Tensor::new_input(&ctx, "a");
        let y = a.dot(&a.transpose(0, 1));

        let out = eval(&ctx, &y, &[(&a, array![[1.0f32, 2.0], [3.0, 4.0]].into_dyn())]);
        assert_eq!(out, array![[5.0f32, 11.0], [11.0, 25.0]].into_dyn());
    }

    #[test]
    fn test_missing_input_is_reported() {
        let ctx = Rc::new(RefCell::new(GraphContext::new()));
        let x = Tensor::new_input(&ctx, "x");
        let y = x.tanh();
        let mut graph = ctx.borrow().main_graph().clone();
        graph.set_output(y.node_id);

        let err = CpuBackend::new().run(&graph, Memo::new()).unwrap_err();
        assert_eq!(err, RuntimeError::MissingInput("x".to_string(), x.node_id));
    }
}
