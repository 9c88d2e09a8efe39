use std::collections::HashMap;
use std::fmt;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::TraceResult;
use crate::lstm::LstmParams;
use crate::tensor::Tensor;

/// Persistent optimizer state carried from one step to the next.
///
/// Moment tensors are keyed `<param>_m` / `<param>_v` after the parameter
/// names of [`LstmParams::named`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizerState {
    /// Number of optimization steps taken so far.
    pub step: usize,
    /// Optimizer-specific state tensors.
    pub state: HashMap<String, Tensor>,
}

/// An update rule for model parameters.
pub trait Optimizer: Clone + Send + Sync + fmt::Debug {
    /// Applies one update to `params` from `grads` at `learning_rate`.
    fn step(
        &self,
        params: &mut LstmParams,
        grads: &LstmParams,
        state: &mut OptimizerState,
        learning_rate: f32,
    ) -> TraceResult<()>;
}

const DEFAULT_EPSILON: f32 = 1e-8;

/// Adam, with optional decoupled (AdamW-style) weight decay.
///
/// Defaults match the usual reference values: β1 0.9, β2 0.999, ε 1e-8 and no
/// weight decay.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Adam {
    /// Decay rate of the first moment.
    pub beta1: f32,
    /// Decay rate of the second moment.
    pub beta2: f32,
    /// Decoupled weight decay; 0 disables it.
    pub weight_decay: f32,
    /// Denominator stabiliser.
    pub epsilon: f32,
}

impl Adam {
    /// Creates an optimizer with explicit hyperparameters.
    #[must_use]
    pub const fn new(beta1: f32, beta2: f32, weight_decay: f32, epsilon: f32) -> Self {
        Self {
            beta1,
            beta2,
            weight_decay,
            epsilon,
        }
    }
}

impl Default for Adam {
    fn default() -> Self {
        Self::new(0.9, 0.999, 0.0, DEFAULT_EPSILON)
    }
}

impl Optimizer for Adam {
    fn step(
        &self,
        params: &mut LstmParams,
        grads: &LstmParams,
        state: &mut OptimizerState,
        learning_rate: f32,
    ) -> TraceResult<()> {
        let current_step = state.step + 1;
        let bias_correction1 = 1.0 - self.beta1.powi(current_step as i32);
        let bias_correction2 = 1.0 - self.beta2.powi(current_step as i32);

        // Every shape is checked before any moment leaves the map, so a
        // rejected step leaves `state` as it was.
        for ((name, param), (_, grad)) in params.named().into_iter().zip(grads.named()) {
            param.check_same_shape(grad)?;
            for key in [format!("{name}_m"), format!("{name}_v")] {
                if let Some(moment) = state.state.get(&key) {
                    param.check_same_shape(moment)?;
                }
            }
        }

        // Moments are taken out of the map so every parameter can be updated
        // independently in parallel, then put back.
        let mut work: Vec<(&'static str, &mut Tensor, &Tensor, Tensor, Tensor)> = params
            .named_mut()
            .into_iter()
            .zip(grads.named())
            .map(|((name, param), (_, grad))| {
                let m = state
                    .state
                    .remove(&format!("{name}_m"))
                    .unwrap_or_else(|| Tensor::zeros(param.shape()));
                let v = state
                    .state
                    .remove(&format!("{name}_v"))
                    .unwrap_or_else(|| Tensor::zeros(param.shape()));
                (name, param, grad, m, v)
            })
            .collect();

        work.par_iter_mut().for_each(|(_, param, grad, m, v)| {
            let p = param.blob_mut();
            let m = m.blob_mut();
            let v = v.blob_mut();
            for (j, &g) in grad.blob().iter().enumerate() {
                if self.weight_decay != 0.0 {
                    p[j] -= learning_rate * self.weight_decay * p[j];
                }
                m[j] = self.beta1 * m[j] + (1.0 - self.beta1) * g;
                v[j] = self.beta2 * v[j] + (1.0 - self.beta2) * g * g;
                let m_hat = m[j] / bias_correction1;
                let v_hat = v[j] / bias_correction2;
                p[j] -= learning_rate * m_hat / (v_hat.sqrt() + self.epsilon);
            }
        });

        for (name, _, _, m, v) in work {
            state.state.insert(format!("{name}_m"), m);
            state.state.insert(format!("{name}_v"), v);
        }
        state.step = current_step;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TraceError;
    use crate::lstm::{LanguageModel, ModelConfig};
    use crate::tensor::TensorError;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn model() -> LanguageModel {
        let mut rng = StdRng::seed_from_u64(3);
        LanguageModel::new(
            &mut rng,
            6,
            ModelConfig {
                embedding_dim: 2,
                hidden_dim: 3,
            },
        )
        .unwrap()
    }

    #[test]
    fn first_step_moves_each_parameter_by_learning_rate() {
        let mut m = model();
        let before = m.params().clone();
        let mut grads = m.zero_grads();
        grads.b_out.blob_mut()[0] = 0.5;
        grads.b_out.blob_mut()[1] = -2.0;

        let mut state = OptimizerState::default();
        Adam::default()
            .step(m.params_mut(), &grads, &mut state, 0.01)
            .unwrap();

        // With bias correction the first Adam step is lr·sign(g).
        let after = m.params().b_out.blob();
        assert!((before.b_out.blob()[0] - after[0] - 0.01).abs() < 1e-5);
        assert!((after[1] - before.b_out.blob()[1] - 0.01).abs() < 1e-5);
        assert_eq!(before.b_out.blob()[2], after[2]);
        assert_eq!(before.w_hh, m.params().w_hh);
        assert_eq!(state.step, 1);
        assert_eq!(state.state.len(), 12);
    }

    #[test]
    fn weight_decay_shrinks_parameters_without_gradient() {
        let mut m = model();
        let before = m.params().clone();
        let grads = m.zero_grads();
        let mut state = OptimizerState::default();
        Adam::new(0.9, 0.999, 0.5, DEFAULT_EPSILON)
            .step(m.params_mut(), &grads, &mut state, 0.1)
            .unwrap();

        // Zero gradients leave the Adam term at zero; only p·(1 − lr·λ) remains.
        for ((name, old), (_, new)) in before.named().into_iter().zip(m.params().named()) {
            for (a, b) in old.blob().iter().zip(new.blob()) {
                assert!((a * 0.95 - b).abs() < 1e-6, "{name}: {a} -> {b}");
            }
        }
    }

    #[test]
    fn rejected_step_keeps_existing_moments() {
        let mut m = model();
        let mut grads = m.zero_grads();
        grads.w_hh.blob_mut()[0] = 1.0;
        let mut state = OptimizerState::default();
        let adam = Adam::default();
        adam.step(m.params_mut(), &grads, &mut state, 0.01).unwrap();

        state
            .state
            .insert("w_out_m".into(), Tensor::zeros(&[1, 1]));
        let saved = state.clone();
        let params = m.params().clone();
        assert!(matches!(
            adam.step(m.params_mut(), &grads, &mut state, 0.01),
            Err(TraceError::Tensor(TensorError::ShapeMismatch { .. }))
        ));
        assert_eq!(state, saved);
        assert_eq!(m.params(), &params);
    }

    #[test]
    fn mismatched_gradients_are_rejected() {
        let mut a = model();
        let mut rng = StdRng::seed_from_u64(4);
        let b = LanguageModel::new(
            &mut rng,
            7,
            ModelConfig {
                embedding_dim: 2,
                hidden_dim: 3,
            },
        )
        .unwrap();
        let mut state = OptimizerState::default();
        assert!(Adam::default()
            .step(a.params_mut(), &b.zero_grads(), &mut state, 0.01)
            .is_err());
    }
}
