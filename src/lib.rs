//! # RustyGAN: WGAN-GP on a graph-based autograd engine
//!
//! Networks are described symbolically: operations on a [`tensor::Tensor`]
//! append nodes to an Abstract Semantic Graph (ASG). Gradients are built as
//! more nodes of the same graph, which makes them differentiable in turn;
//! the gradient penalty of WGAN-GP relies on exactly that.
//!
//! ## Usage Example
//!
//! ```no_run
//! use std::rc::Rc;
//! use std::cell::RefCell;
//! use rustygan::autograd::grad;
//! use rustygan::tensor::{GraphContext, Tensor};
//!
//! let context = Rc::new(RefCell::new(GraphContext::new()));
//! let x = Tensor::new_input(&context, "x");
//! let y = x.square().sum();
//!
//! // dy/dx = 2x, and d/dx of its sum = 2 per element
//! let dy = grad(&y, &[&x]).unwrap().remove(0);
//! let d2y = grad(&dy.sum(), &[&x]).unwrap().remove(0);
//! ```

pub mod analysis;
pub mod asg;
pub mod autograd;
pub mod data;
pub mod gan;
pub mod logging;
pub mod losses;
pub mod metrics;
pub mod nn;
pub mod optimizers;
pub mod runtime;
pub mod serialization;
pub mod tensor;
pub mod visualize;
