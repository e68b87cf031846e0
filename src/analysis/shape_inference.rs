//! Module for shape and data type inference (Shape Inference).
//!
//! Traverses the computation graph and determines the shape
//! and data type of the output tensor for each node based on its input shapes and operation type.

use crate::asg::{Asg, AsgError, DType, Node, NodeId, NodeType, Shape};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShapeInferenceError {
    #[error("Graph error: {0}")]
    AsgError(#[from] AsgError),

    #[error("Incompatible shapes for operation '{op}': left operand {shape1:?}, right operand {shape2:?}. \
             Ensure dimensions are compatible for broadcasting or matrix multiplication.")]
    IncompatibleShapes {
        op: String,
        shape1: Shape,
        shape2: Shape,
    },

    #[error("Shape information missing for node {0}. \
             This may mean the node has not been processed by shape inference yet or the graph contains a cyclic dependency.")]
    MissingShapeInfo(NodeId),

    #[error("Initial shape not specified for '{0}'. \
             Add the shape to the initial_shapes HashMap when calling ShapeInference::run().")]
    MissingInitialShape(String),

    #[error("Invalid tensor rank for node {node_id}: expected {expected}D, got {actual}D. \
             Check input data dimensions.")]
    InvalidRank {
        node_id: NodeId,
        expected: usize,
        actual: usize,
    },

    #[error("Element count mismatch for node {node_id}: cannot view {from:?} as {to:?}.")]
    ElementCountMismatch { node_id: NodeId, from: Shape, to: Shape },

    #[error("Broadcast error: cannot broadcast shapes {0:?} and {1:?} to a common shape.")]
    BroadcastError(Shape, Shape),
}

type Result<T> = std::result::Result<T, ShapeInferenceError>;

/// Numpy-style broadcast of two shapes (trailing dimensions aligned,
/// a dimension of 1 stretches). `None` if they are incompatible.
pub fn broadcast_shapes(a: &[usize], b: &[usize]) -> Option<Shape> {
    let rank = a.len().max(b.len());
    let mut out = vec![0; rank];
    for i in 0..rank {
        let da = if i < rank - a.len() { 1 } else { a[i - (rank - a.len())] };
        let db = if i < rank - b.len() { 1 } else { b[i - (rank - b.len())] };
        out[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => return None,
        };
    }
    Some(out)
}

/// Structure that performs shape inference for ASG.
pub struct ShapeInference;

impl ShapeInference {
    /// Runs the shape inference process for the graph.
    ///
    /// Modifies the graph in-place, filling in the `shape` and `dtype` fields
    /// for every node reachable from the outputs.
    ///
    /// # Arguments
    /// * `asg` - Mutable reference to the graph to analyze.
    /// * `initial_shapes` - Shapes and types for all `Input` and `Parameter`
    ///   nodes, keyed by node name.
    pub fn run(asg: &mut Asg, initial_shapes: &HashMap<String, (Shape, DType)>) -> Result<()> {
        let sorted_nodes = Self::topological_sort(asg)?;

        for node_id in sorted_nodes {
            let node = asg.get_node(node_id)?;
            let (shape, dtype) = Self::infer_node_shape(asg, node, initial_shapes)?;

            let node = asg.get_node_mut(node_id)?;
            node.shape = Some(shape);
            node.dtype = Some(dtype);
        }

        Ok(())
    }

    /// Main shape inference logic for a single node.
    fn infer_node_shape(
        asg: &Asg,
        node: &Node,
        initial_shapes: &HashMap<String, (Shape, DType)>,
    ) -> Result<(Shape, DType)> {
        match &node.node_type {
            NodeType::Input { name } | NodeType::Parameter { name } => initial_shapes
                .get(name)
                .cloned()
                .ok_or_else(|| ShapeInferenceError::MissingInitialShape(name.clone())),

            NodeType::Literal(value) => Ok((value.shape(), DType::F32)),

            NodeType::Add(l, r)
            | NodeType::Subtract(l, r)
            | NodeType::Multiply(l, r)
            | NodeType::Divide(l, r)
            | NodeType::DivideNoNan(l, r)
            | NodeType::GreaterThan(l, r) => {
                let (ls, ld) = Self::get_shape_dtype(asg, *l)?;
                let (rs, _) = Self::get_shape_dtype(asg, *r)?;
                let out_shape =
                    broadcast_shapes(&ls, &rs).ok_or(ShapeInferenceError::BroadcastError(ls, rs))?;
                Ok((out_shape, ld))
            }

            NodeType::MatrixMultiply(l, r) => {
                let (ls, ld) = Self::get_shape_dtype(asg, *l)?;
                let (rs, _) = Self::get_shape_dtype(asg, *r)?;

                if ls.len() != 2 || rs.len() != 2 {
                    return Err(ShapeInferenceError::InvalidRank {
                        node_id: node.id,
                        expected: 2,
                        actual: if ls.len() != 2 { ls.len() } else { rs.len() },
                    });
                }
                if ls[1] != rs[0] {
                    return Err(ShapeInferenceError::IncompatibleShapes {
                        op: "MatrixMultiply".to_string(),
                        shape1: ls,
                        shape2: rs,
                    });
                }
                Ok((vec![ls[0], rs[1]], ld))
            }

            // Element-wise operations - shape unchanged
            NodeType::Negate(id)
            | NodeType::Sqrt(id)
            | NodeType::ReLU(id)
            | NodeType::LeakyReLU(id, _)
            | NodeType::Tanh(id)
            | NodeType::Sigmoid(id)
            | NodeType::StopGradient(id) => Self::get_shape_dtype(asg, *id),

            NodeType::Sum(_) | NodeType::Numel(_) => Ok((vec![], DType::F32)),

            NodeType::SumAxis(id, axis) => {
                let (mut shape, dtype) = Self::get_shape_dtype(asg, *id)?;
                if *axis >= shape.len() {
                    return Err(ShapeInferenceError::InvalidRank {
                        node_id: node.id,
                        expected: axis + 1,
                        actual: shape.len(),
                    });
                }
                shape[*axis] = 1;
                Ok((shape, dtype))
            }

            NodeType::Flatten(id) => {
                let (shape, dtype) = Self::get_shape_dtype(asg, *id)?;
                if shape.is_empty() {
                    return Err(ShapeInferenceError::InvalidRank {
                        node_id: node.id,
                        expected: 1,
                        actual: 0,
                    });
                }
                let rest: usize = shape[1..].iter().product();
                Ok((vec![shape[0], rest], dtype))
            }

            NodeType::Unflatten(id, sample_shape) => {
                let (shape, dtype) = Self::get_shape_dtype(asg, *id)?;
                if shape.len() != 2 {
                    return Err(ShapeInferenceError::InvalidRank {
                        node_id: node.id,
                        expected: 2,
                        actual: shape.len(),
                    });
                }
                let mut out = vec![shape[0]];
                out.extend(sample_shape);
                if sample_shape.iter().product::<usize>() != shape[1] {
                    return Err(ShapeInferenceError::ElementCountMismatch {
                        node_id: node.id,
                        from: shape,
                        to: out,
                    });
                }
                Ok((out, dtype))
            }

            NodeType::Reshape(data_id, like_id) => {
                let (shape, dtype) = Self::get_shape_dtype(asg, *data_id)?;
                let (target, _) = Self::get_shape_dtype(asg, *like_id)?;
                if shape.iter().product::<usize>() != target.iter().product::<usize>() {
                    return Err(ShapeInferenceError::ElementCountMismatch {
                        node_id: node.id,
                        from: shape,
                        to: target,
                    });
                }
                Ok((target, dtype))
            }

            NodeType::Transpose(id, axis1, axis2) => {
                let (mut shape, dtype) = Self::get_shape_dtype(asg, *id)?;
                if *axis1 >= shape.len() || *axis2 >= shape.len() {
                    return Err(ShapeInferenceError::InvalidRank {
                        node_id: node.id,
                        expected: axis1.max(axis2) + 1,
                        actual: shape.len(),
                    });
                }
                shape.swap(*axis1, *axis2);
                Ok((shape, dtype))
            }

            NodeType::Broadcast(source_id, target_id) => {
                let (source, dtype) = Self::get_shape_dtype(asg, *source_id)?;
                let (target, _) = Self::get_shape_dtype(asg, *target_id)?;
                if broadcast_shapes(&source, &target).as_ref() != Some(&target) {
                    return Err(ShapeInferenceError::BroadcastError(source, target));
                }
                Ok((target, dtype))
            }

            NodeType::ReduceSumTo(source_id, target_id) => {
                let (source, dtype) = Self::get_shape_dtype(asg, *source_id)?;
                let (target, _) = Self::get_shape_dtype(asg, *target_id)?;
                // The target must be something that broadcasts back up to the source.
                if broadcast_shapes(&target, &source).as_ref() != Some(&source) {
                    return Err(ShapeInferenceError::BroadcastError(source, target));
                }
                Ok((target, dtype))
            }
        }
    }

    /// Helper function to get already computed shape and type for a node.
    fn get_shape_dtype(asg: &Asg, node_id: NodeId) -> Result<(Shape, DType)> {
        let node = asg.get_node(node_id)?;
        match (&node.shape, &node.dtype) {
            (Some(s), Some(d)) => Ok((s.clone(), *d)),
            _ => Err(ShapeInferenceError::MissingShapeInfo(node_id)),
        }
    }

    /// Performs topological sort of the nodes reachable from the graph outputs.
    pub fn topological_sort(asg: &Asg) -> Result<Vec<NodeId>> {
        Self::topological_sort_from(asg, &asg.outputs)
    }

    /// Topological order (operands first) of everything reachable from `roots`.
    pub fn topological_sort_from(asg: &Asg, roots: &[NodeId]) -> Result<Vec<NodeId>> {
        let mut sorted = Vec::new();
        let mut visited = HashSet::new();
        for root in roots {
            Self::build_sorted_graph(*root, asg, &mut visited, &mut sorted)?;
        }
        Ok(sorted)
    }

    fn build_sorted_graph(
        node_id: NodeId,
        asg: &Asg,
        visited: &mut HashSet<NodeId>,
        sorted: &mut Vec<NodeId>,
    ) -> Result<()> {
        if visited.contains(&node_id) {
            return Ok(());
        }

        let node = asg.get_node(node_id)?;
        for input_id in node.node_type.operands() {
            Self::build_sorted_graph(input_id, asg, visited, sorted)?;
        }

        if visited.insert(node_id) {
            sorted.push(node_id);
        }
        Ok(())
    }
}
