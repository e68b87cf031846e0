//! # Neural Network Layers Module
//!
//! Building blocks for constructing networks. In the graph-based
//! architecture each "layer" is a constructor that adds a specific pattern
//! of nodes (operations and parameters) to the ASG.
//!
//! - [`Linear`]: fully connected layer
//! - [`ReLU`], [`LeakyReLU`], [`Tanh`]: activations
//! - [`Network`]: a trainable model with concrete parameter values
//!
//! ## Example
//!
//! ```ignore
//! use rustygan::nn::{Linear, LeakyReLU, Module};
//! use rustygan::tensor::{GraphContext, Tensor};
//!
//! let ctx = Rc::new(RefCell::new(GraphContext::new()));
//! let linear = Linear::new(&ctx, 100, 128, "generator.fc0");
//! let act = LeakyReLU::new(0.2);
//!
//! let z = Tensor::new_input(&ctx, "noise");
//! let h = act.forward(&linear.forward(&z));
//! ```

pub mod activations;
pub mod linear;
pub mod module;
pub mod network;

pub use activations::{LeakyReLU, ReLU, Tanh};
pub use linear::Linear;
pub use module::Module;
pub use network::Network;
