//! Scalar and vector primitives shared by the recurrent cell and the loss.

mod activation;
mod cross_entropy;

pub use activation::{sigmoid, tanh};
pub use cross_entropy::{softmax_into, CrossEntropy};
