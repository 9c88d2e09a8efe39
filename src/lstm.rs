//! Word-level recurrent language model: embedding → LSTM → vocabulary head.
//!
//! The hidden and cell state start at zero for every sequence, so nothing
//! leaks between sentences or batches. Position `t` only ever sees tokens
//! `0..=t` of its own row when predicting token `t + 1`.

use rand::Rng;
use rand_distr::{Normal, Uniform};
use serde::{Deserialize, Serialize};

use crate::batch::Batch;
use crate::error::{TraceError, TraceResult};
use crate::funcs::{sigmoid, softmax_into, tanh, CrossEntropy};
use crate::tensor::{dot, Tensor};

/// Layer widths of the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Width of the word embeddings.
    pub embedding_dim: usize,
    /// Width of the LSTM hidden and cell state.
    pub hidden_dim: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            embedding_dim: 128,
            hidden_dim: 256,
        }
    }
}

/// Every trainable tensor of the model. Also used, zero-initialised, as the
/// gradient accumulator, so parameters and gradients always line up by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LstmParams {
    /// `[vocab, embedding]`
    pub embedding: Tensor,
    /// `[4·hidden, embedding]`, gate blocks ordered input, forget, cell, output.
    pub w_ih: Tensor,
    /// `[4·hidden, hidden]`
    pub w_hh: Tensor,
    /// `[4·hidden]`
    pub bias: Tensor,
    /// `[vocab, hidden]`
    pub w_out: Tensor,
    /// `[vocab]`
    pub b_out: Tensor,
}

impl LstmParams {
    fn zeros(vocab: usize, emb: usize, hidden: usize) -> Self {
        let [embedding, w_ih, w_hh, bias, w_out, b_out] = Self::shapes(vocab, emb, hidden);
        Self {
            embedding: Tensor::zeros(&embedding),
            w_ih: Tensor::zeros(&w_ih),
            w_hh: Tensor::zeros(&w_hh),
            bias: Tensor::zeros(&bias),
            w_out: Tensor::zeros(&w_out),
            b_out: Tensor::zeros(&b_out),
        }
    }

    /// Resets every tensor to zero.
    pub fn fill_zero(&mut self) {
        for (_, t) in self.named_mut() {
            t.fill_zero();
        }
    }

    /// Tensors paired with stable names.
    #[must_use]
    pub fn named(&self) -> [(&'static str, &Tensor); 6] {
        [
            ("embedding", &self.embedding),
            ("w_ih", &self.w_ih),
            ("w_hh", &self.w_hh),
            ("bias", &self.bias),
            ("w_out", &self.w_out),
            ("b_out", &self.b_out),
        ]
    }

    /// Mutable tensors paired with stable names.
    pub fn named_mut(&mut self) -> [(&'static str, &mut Tensor); 6] {
        [
            ("embedding", &mut self.embedding),
            ("w_ih", &mut self.w_ih),
            ("w_hh", &mut self.w_hh),
            ("bias", &mut self.bias),
            ("w_out", &mut self.w_out),
            ("b_out", &mut self.b_out),
        ]
    }

    /// Expected shape of every tensor, in [`named`](Self::named) order.
    fn shapes(vocab: usize, emb: usize, hidden: usize) -> [Vec<usize>; 6] {
        [
            vec![vocab, emb],
            vec![4 * hidden, emb],
            vec![4 * hidden, hidden],
            vec![4 * hidden],
            vec![vocab, hidden],
            vec![vocab],
        ]
    }

    /// Euclidean norm over every element of every tensor.
    #[must_use]
    pub fn global_norm(&self) -> f64 {
        self.named()
            .iter()
            .map(|(_, t)| t.squared_norm())
            .sum::<f64>()
            .sqrt()
    }

    /// Multiplies every tensor by `factor`.
    pub fn scale(&mut self, factor: f32) {
        for (_, t) in self.named_mut() {
            t.scale(factor);
        }
    }
}

/// Activations of one time step kept for backpropagation.
struct Step {
    token: usize,
    target: usize,
    h_prev: Vec<f32>,
    c_prev: Vec<f32>,
    /// Activated gates `[i | f | g | o]`.
    gates: Vec<f32>,
    tanh_c: Vec<f32>,
    h: Vec<f32>,
    logits: Vec<f32>,
}

/// The recurrent language model and its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageModel {
    vocab_size: usize,
    config: ModelConfig,
    params: LstmParams,
}

impl LanguageModel {
    /// Initialises a model for `vocab_size` words from `rng`.
    ///
    /// Embeddings are drawn from N(0, 1); every other tensor from
    /// U(−1/√hidden, 1/√hidden).
    pub fn new<R: Rng>(rng: &mut R, vocab_size: usize, config: ModelConfig) -> TraceResult<Self> {
        if vocab_size == 0 || config.embedding_dim == 0 || config.hidden_dim == 0 {
            return Err(TraceError::config(format!(
                "model dimensions must be positive (vocab {vocab_size}, embedding {}, hidden {})",
                config.embedding_dim, config.hidden_dim
            )));
        }
        let (v, e, h) = (vocab_size, config.embedding_dim, config.hidden_dim);
        let normal =
            Normal::new(0.0f32, 1.0).map_err(|err| TraceError::config(err.to_string()))?;
        let k = 1.0 / (h as f32).sqrt();
        let uniform = Uniform::new_inclusive(-k, k);

        let params = LstmParams {
            embedding: Tensor::sample(rng, &[v, e], &normal),
            w_ih: Tensor::sample(rng, &[4 * h, e], &uniform),
            w_hh: Tensor::sample(rng, &[4 * h, h], &uniform),
            bias: Tensor::sample(rng, &[4 * h], &uniform),
            w_out: Tensor::sample(rng, &[v, h], &uniform),
            b_out: Tensor::sample(rng, &[v], &uniform),
        };
        Ok(Self {
            vocab_size,
            config,
            params,
        })
    }

    /// Number of vocabulary ids the model scores.
    #[must_use]
    pub const fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    /// Layer widths.
    #[must_use]
    pub const fn config(&self) -> ModelConfig {
        self.config
    }

    /// Read-only parameter access.
    #[must_use]
    pub const fn params(&self) -> &LstmParams {
        &self.params
    }

    pub(crate) fn params_mut(&mut self) -> &mut LstmParams {
        &mut self.params
    }

    /// A zeroed gradient container shaped like the parameters.
    #[must_use]
    pub fn zero_grads(&self) -> LstmParams {
        LstmParams::zeros(
            self.vocab_size,
            self.config.embedding_dim,
            self.config.hidden_dim,
        )
    }

    /// Checks every parameter tensor against the declared vocabulary size and
    /// layer widths. A decoded model must pass this before any forward pass.
    pub fn validate(&self) -> TraceResult<()> {
        let (v, e, h) = (
            self.vocab_size,
            self.config.embedding_dim,
            self.config.hidden_dim,
        );
        if v == 0 || e == 0 || h == 0 {
            return Err(TraceError::config(format!(
                "model dimensions must be positive (vocab {v}, embedding {e}, hidden {h})"
            )));
        }
        let expected = LstmParams::shapes(v, e, h);
        for ((name, tensor), want) in self.params.named().into_iter().zip(&expected) {
            let got = tensor.shape();
            if got.len() != want.len() {
                return Err(TraceError::dimension(
                    format!("rank of parameter '{name}'"),
                    want.len(),
                    got.len(),
                ));
            }
            if let Some(axis) = (0..want.len()).find(|&a| got[a] != want[a]) {
                return Err(TraceError::dimension(
                    format!("axis {axis} of parameter '{name}'"),
                    want[axis],
                    got[axis],
                ));
            }
            if tensor.size() != want.iter().product::<usize>() {
                return Err(TraceError::dimension(
                    format!("values of parameter '{name}'"),
                    want.iter().product(),
                    tensor.size(),
                ));
            }
        }
        Ok(())
    }

    /// Total number of trainable scalars.
    #[must_use]
    pub fn num_params(&self) -> usize {
        self.params.named().iter().map(|(_, t)| t.size()).sum()
    }

    /// Un-normalised next-word scores for every prediction position.
    ///
    /// Returns one `[predictions, vocab]` tensor per batch row; a row with `n`
    /// real tokens has `n − 1` predictions.
    pub fn forward(&self, batch: &Batch) -> TraceResult<Vec<Tensor>> {
        (0..batch.rows())
            .map(|r| {
                let ids = batch.real_tokens(r);
                self.check_ids(&ids)?;
                let steps = self.run(&ids);
                let mut blob = Vec::with_capacity(steps.len() * self.vocab_size);
                for step in &steps {
                    blob.extend_from_slice(&step.logits);
                }
                Ok(Tensor::raw(&[steps.len(), self.vocab_size], blob)?)
            })
            .collect()
    }

    /// Negative log-likelihood of `ids` under the model, summed with its
    /// position count. `ids` are real tokens only (no padding).
    pub fn sequence_loss(&self, ids: &[u32]) -> TraceResult<CrossEntropy> {
        self.check_ids(ids)?;
        let mut ce = CrossEntropy::default();
        for step in self.run(ids) {
            ce.add(&step.logits, step.target);
        }
        Ok(ce)
    }

    /// Masked cross-entropy over every row of `batch`.
    pub fn batch_loss(&self, batch: &Batch) -> TraceResult<CrossEntropy> {
        let mut ce = CrossEntropy::default();
        for r in 0..batch.rows() {
            ce.merge(self.sequence_loss(&batch.real_tokens(r))?);
        }
        Ok(ce)
    }

    /// Runs `ids` forward, then backpropagates through time, adding
    /// `weight · ∂loss/∂θ` into `grads`. Returns the unweighted loss.
    pub(crate) fn accumulate_gradients(
        &self,
        ids: &[u32],
        weight: f32,
        grads: &mut LstmParams,
    ) -> TraceResult<CrossEntropy> {
        self.check_ids(ids)?;
        let steps = self.run(ids);
        let mut ce = CrossEntropy::default();
        for step in &steps {
            ce.add(&step.logits, step.target);
        }

        let hd = self.config.hidden_dim;
        let p = &self.params;
        let mut dh_next = vec![0.0f32; hd];
        let mut dc_next = vec![0.0f32; hd];
        let mut dlogits = vec![0.0f32; self.vocab_size];
        let mut dz = vec![0.0f32; 4 * hd];
        let mut dx = vec![0.0f32; self.config.embedding_dim];

        for step in steps.iter().rev() {
            softmax_into(&step.logits, &mut dlogits);
            dlogits[step.target] -= 1.0;
            dlogits.iter_mut().for_each(|d| *d *= weight);

            grads.w_out.outer_acc(&dlogits, &step.h);
            axpy(grads.b_out.blob_mut(), &dlogits);

            let mut dh = std::mem::replace(&mut dh_next, vec![0.0; hd]);
            p.w_out.matvec_t_acc(&dlogits, &mut dh);

            for k in 0..hd {
                let i = step.gates[k];
                let f = step.gates[hd + k];
                let g = step.gates[2 * hd + k];
                let o = step.gates[3 * hd + k];
                let tc = step.tanh_c[k];

                let dc = dh[k] * o * (1.0 - tc * tc) + dc_next[k];
                dz[k] = dc * g * i * (1.0 - i);
                dz[hd + k] = dc * step.c_prev[k] * f * (1.0 - f);
                dz[2 * hd + k] = dc * i * (1.0 - g * g);
                dz[3 * hd + k] = dh[k] * tc * o * (1.0 - o);
                dc_next[k] = dc * f;
            }

            let x = p.embedding.row(step.token);
            grads.w_ih.outer_acc(&dz, x);
            grads.w_hh.outer_acc(&dz, &step.h_prev);
            axpy(grads.bias.blob_mut(), &dz);

            dx.iter_mut().for_each(|v| *v = 0.0);
            p.w_ih.matvec_t_acc(&dz, &mut dx);
            axpy(grads.embedding.row_mut(step.token), &dx);

            p.w_hh.matvec_t_acc(&dz, &mut dh_next);
        }
        Ok(ce)
    }

    fn check_ids(&self, ids: &[u32]) -> TraceResult<()> {
        match ids.iter().find(|&&id| id as usize >= self.vocab_size) {
            Some(&id) => Err(TraceError::dimension(
                "token id vs model vocabulary",
                self.vocab_size,
                id as usize + 1,
            )),
            None => Ok(()),
        }
    }

    /// Forward pass over `ids`, one step per prediction position.
    fn run(&self, ids: &[u32]) -> Vec<Step> {
        let hd = self.config.hidden_dim;
        let p = &self.params;
        let mut h = vec![0.0f32; hd];
        let mut c = vec![0.0f32; hd];
        let mut steps = Vec::with_capacity(ids.len().saturating_sub(1));

        for pair in ids.windows(2) {
            let token = pair[0] as usize;
            let x = p.embedding.row(token);

            let mut gates = p.bias.blob().to_vec();
            for (r, z) in gates.iter_mut().enumerate() {
                *z += dot(p.w_ih.row(r), x) + dot(p.w_hh.row(r), &h);
            }
            for k in 0..hd {
                gates[k] = sigmoid(gates[k]);
                gates[hd + k] = sigmoid(gates[hd + k]);
                gates[2 * hd + k] = tanh(gates[2 * hd + k]);
                gates[3 * hd + k] = sigmoid(gates[3 * hd + k]);
            }

            let mut c_new = vec![0.0f32; hd];
            let mut tanh_c = vec![0.0f32; hd];
            let mut h_new = vec![0.0f32; hd];
            for k in 0..hd {
                c_new[k] = gates[hd + k] * c[k] + gates[k] * gates[2 * hd + k];
                tanh_c[k] = tanh(c_new[k]);
                h_new[k] = gates[3 * hd + k] * tanh_c[k];
            }

            let mut logits = vec![0.0f32; self.vocab_size];
            p.w_out.matvec_into(&h_new, &mut logits);
            axpy(&mut logits, p.b_out.blob());

            steps.push(Step {
                token,
                target: pair[1] as usize,
                h_prev: std::mem::replace(&mut h, h_new.clone()),
                c_prev: std::mem::replace(&mut c, c_new),
                gates,
                tanh_c,
                h: h_new,
                logits,
            });
        }
        steps
    }
}

fn axpy(dst: &mut [f32], src: &[f32]) {
    dst.iter_mut().zip(src).for_each(|(d, s)| *d += s);
}
