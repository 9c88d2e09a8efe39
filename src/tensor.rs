//! Dense row-major `f32` storage for model parameters and activations.
//!
//! Only what a single-layer recurrent model needs: vectors and matrices,
//! matrix-vector products (plain and transposed) and rank-one updates.

use rand::distributions::Distribution;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Shape errors raised when building or combining tensors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TensorError {
    /// The data length does not match the product of the shape.
    #[error("tensor of shape {shape:?} needs {expected} values, got {got}")]
    SizeMismatch {
        /// Requested shape.
        shape: Vec<usize>,
        /// Number of values the shape requires.
        expected: usize,
        /// Number of values supplied.
        got: usize,
    },
    /// Two tensors that must agree in shape do not.
    #[error("shape mismatch: {left:?} vs {right:?}")]
    ShapeMismatch {
        /// Shape of the left operand.
        left: Vec<usize>,
        /// Shape of the right operand.
        right: Vec<usize>,
    },
}

/// A 1-D or 2-D tensor of `f32` values in row-major order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    shape: Vec<usize>,
    blob: Vec<f32>,
}

impl Tensor {
    /// A tensor of the given shape filled with zeros.
    #[must_use]
    pub fn zeros(shape: &[usize]) -> Self {
        Self {
            shape: shape.to_vec(),
            blob: vec![0.0; shape.iter().product()],
        }
    }

    /// Wraps existing data; fails if `data` does not fill `shape` exactly.
    pub fn raw(shape: &[usize], data: Vec<f32>) -> Result<Self, TensorError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(TensorError::SizeMismatch {
                shape: shape.to_vec(),
                expected,
                got: data.len(),
            });
        }
        Ok(Self {
            shape: shape.to_vec(),
            blob: data,
        })
    }

    /// Samples every element independently from `dist`.
    pub fn sample<R: Rng, D: Distribution<f32>>(rng: &mut R, shape: &[usize], dist: &D) -> Self {
        let size = shape.iter().product();
        Self {
            shape: shape.to_vec(),
            blob: (0..size).map(|_| dist.sample(rng)).collect(),
        }
    }

    /// The shape of this tensor.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Total number of elements.
    #[must_use]
    pub fn size(&self) -> usize {
        self.blob.len()
    }

    /// Flat view of the values.
    #[must_use]
    pub fn blob(&self) -> &[f32] {
        &self.blob
    }

    /// Mutable flat view of the values.
    pub fn blob_mut(&mut self) -> &mut [f32] {
        &mut self.blob
    }

    /// Number of rows (the first dimension).
    #[must_use]
    pub fn rows(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    /// Number of columns; a 1-D tensor is treated as a single column.
    #[must_use]
    pub fn cols(&self) -> usize {
        self.shape.get(1).copied().unwrap_or(1)
    }

    /// Row `i` of a matrix.
    #[must_use]
    pub fn row(&self, i: usize) -> &[f32] {
        let cols = self.cols();
        &self.blob[i * cols..(i + 1) * cols]
    }

    /// Mutable row `i` of a matrix.
    pub fn row_mut(&mut self, i: usize) -> &mut [f32] {
        let cols = self.cols();
        &mut self.blob[i * cols..(i + 1) * cols]
    }

    /// Sets every element to zero, keeping the allocation.
    pub fn fill_zero(&mut self) {
        self.blob.iter_mut().for_each(|v| *v = 0.0);
    }

    /// Sum of squared elements.
    #[must_use]
    pub fn squared_norm(&self) -> f64 {
        self.blob.iter().map(|&v| f64::from(v) * f64::from(v)).sum()
    }

    /// Multiplies every element by `factor` in place.
    pub fn scale(&mut self, factor: f32) {
        self.blob.iter_mut().for_each(|v| *v *= factor);
    }

    /// `out = self · x` for a `[rows, cols]` matrix and a `cols`-vector.
    pub fn matvec_into(&self, x: &[f32], out: &mut [f32]) {
        debug_assert_eq!(x.len(), self.cols());
        debug_assert_eq!(out.len(), self.rows());
        for (r, o) in out.iter_mut().enumerate() {
            *o = dot(self.row(r), x);
        }
    }

    /// `out += selfᵀ · y` for a `[rows, cols]` matrix and a `rows`-vector.
    pub fn matvec_t_acc(&self, y: &[f32], out: &mut [f32]) {
        debug_assert_eq!(y.len(), self.rows());
        debug_assert_eq!(out.len(), self.cols());
        for (r, &yr) in y.iter().enumerate() {
            if yr == 0.0 {
                continue;
            }
            for (o, &w) in out.iter_mut().zip(self.row(r)) {
                *o += yr * w;
            }
        }
    }

    /// Rank-one update `self += a ⊗ b` for a `[a.len(), b.len()]` matrix.
    pub fn outer_acc(&mut self, a: &[f32], b: &[f32]) {
        debug_assert_eq!(a.len(), self.rows());
        debug_assert_eq!(b.len(), self.cols());
        for (r, &ar) in a.iter().enumerate() {
            if ar == 0.0 {
                continue;
            }
            for (s, &bc) in self.row_mut(r).iter_mut().zip(b) {
                *s += ar * bc;
            }
        }
    }

    /// Fails with [`TensorError::ShapeMismatch`] unless `other` has this shape.
    pub fn check_same_shape(&self, other: &Self) -> Result<(), TensorError> {
        if self.shape == other.shape {
            Ok(())
        } else {
            Err(TensorError::ShapeMismatch {
                left: self.shape.clone(),
                right: other.shape.clone(),
            })
        }
    }
}

/// Dot product of two equally long slices.
#[must_use]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_rejects_wrong_length() {
        let err = Tensor::raw(&[2, 3], vec![0.0; 5]).unwrap_err();
        assert_eq!(
            err,
            TensorError::SizeMismatch {
                shape: vec![2, 3],
                expected: 6,
                got: 5
            }
        );
    }

    #[test]
    fn matvec_and_transpose_agree_with_hand_computation() {
        // [[1, 2, 3],
        //  [4, 5, 6]]
        let m = Tensor::raw(&[2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let mut out = [0.0; 2];
        m.matvec_into(&[1.0, 0.0, -1.0], &mut out);
        assert_eq!(out, [-2.0, -2.0]);

        let mut back = [1.0; 3];
        m.matvec_t_acc(&[1.0, 1.0], &mut back);
        assert_eq!(back, [6.0, 8.0, 10.0]);
    }

    #[test]
    fn outer_product_accumulates() {
        let mut m = Tensor::zeros(&[2, 2]);
        m.outer_acc(&[1.0, 2.0], &[3.0, 4.0]);
        m.outer_acc(&[1.0, 0.0], &[1.0, 1.0]);
        assert_eq!(m.blob(), &[4.0, 5.0, 6.0, 8.0]);
    }

    #[test]
    fn shape_check_reports_both_sides() {
        let a = Tensor::zeros(&[2]);
        assert_eq!(a.check_same_shape(&Tensor::zeros(&[2])), Ok(()));
        assert_eq!(
            a.check_same_shape(&Tensor::zeros(&[1, 2])),
            Err(TensorError::ShapeMismatch {
                left: vec![2],
                right: vec![1, 2]
            })
        );
    }
}
