//! The optimization loop that turns a corpus into a [`Checkpoint`].

use std::time::Instant;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::batch::{make_batches, Batch};
use crate::checkpoint::{Checkpoint, Hyperparameters};
use crate::config::TrainConfig;
use crate::corpus::Corpus;
use crate::error::{TraceError, TraceResult};
use crate::funcs::CrossEntropy;
use crate::lstm::{LanguageModel, LstmParams};
use crate::optimizer::{Adam, Optimizer, OptimizerState};
use crate::tokenizer::{TokenizedCorpus, TokenizedSequence, Tokenizer, WordTokenizer};
use crate::vocab::Vocabulary;

/// Result of one training run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingOutcome {
    /// The fitted, immutable snapshot.
    pub checkpoint: Checkpoint,
    /// Mean batch loss of every epoch that ran.
    pub epoch_losses: Vec<f64>,
}

/// Mutable state of one run, owned by that run alone: the model being fitted,
/// optimizer moments, the reusable gradient buffer and the seeded RNG.
#[derive(Debug)]
pub struct TrainingContext<O: Optimizer = Adam> {
    model: LanguageModel,
    optimizer: O,
    state: OptimizerState,
    grads: LstmParams,
    rng: StdRng,
}

impl<O: Optimizer> TrainingContext<O> {
    /// Takes ownership of `model` for training.
    pub fn new(model: LanguageModel, optimizer: O, rng: StdRng) -> Self {
        let grads = model.zero_grads();
        Self {
            model,
            optimizer,
            state: OptimizerState::default(),
            grads,
            rng,
        }
    }

    /// One forward pass, backward pass and optimizer step on `batch`, the
    /// `index`-th batch of `epoch`.
    ///
    /// Returns the masked mean cross-entropy of the batch before the update.
    /// A batch without a single prediction position fails with
    /// [`TraceError::EmptyBatch`], a non-finite loss with
    /// [`TraceError::Diverged`]; both leave the parameters untouched.
    pub fn step(
        &mut self,
        batch: &Batch,
        epoch: usize,
        index: usize,
        learning_rate: f32,
        max_grad_norm: Option<f64>,
    ) -> TraceResult<f64> {
        let positions = batch.num_predictions();
        if positions == 0 {
            return Err(TraceError::EmptyBatch { index });
        }
        self.grads.fill_zero();
        let weight = 1.0 / positions as f32;
        let mut ce = CrossEntropy::default();
        for r in 0..batch.rows() {
            ce.merge(
                self.model
                    .accumulate_gradients(&batch.real_tokens(r), weight, &mut self.grads)?,
            );
        }
        let loss = ce.mean().ok_or(TraceError::EmptyBatch { index })?;
        if !loss.is_finite() {
            return Err(TraceError::Diverged { epoch, index, loss });
        }

        if let Some(max_norm) = max_grad_norm {
            let norm = self.grads.global_norm();
            if norm > max_norm {
                self.grads.scale((max_norm / norm) as f32);
            }
        }
        self.optimizer.step(
            self.model.params_mut(),
            &self.grads,
            &mut self.state,
            learning_rate,
        )?;
        Ok(loss)
    }

    /// The model as trained so far.
    pub const fn model(&self) -> &LanguageModel {
        &self.model
    }

    /// Optimizer steps taken so far.
    pub const fn steps(&self) -> usize {
        self.state.step
    }

    fn into_model(self) -> LanguageModel {
        self.model
    }
}

/// Fits a fresh model to a corpus.
#[derive(Debug, Clone)]
pub struct Trainer {
    config: TrainConfig,
}

impl Trainer {
    /// Validates `config` and wraps it.
    pub fn new(config: TrainConfig) -> TraceResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &TrainConfig {
        &self.config
    }

    /// Trains on every sentence of `corpus` and returns the checkpoint,
    /// stored under `checkpoint_name`.
    ///
    /// Epochs and the batches within them run strictly in order. Nothing is
    /// emitted if any batch fails.
    pub fn train(&self, corpus: &Corpus, checkpoint_name: &str) -> TraceResult<TrainingOutcome> {
        let cfg = &self.config;
        if corpus.is_empty() {
            return Err(TraceError::EmptyCorpus {
                corpus: corpus.name().to_string(),
            });
        }

        let tokenizer = WordTokenizer::new(cfg.tokenizer);
        let words: Vec<String> = corpus
            .sentences()
            .iter()
            .flat_map(|s| tokenizer.tokenize(s))
            .collect();
        let vocab = Vocabulary::build_with_min_freq(words.iter().map(String::as_str), cfg.min_freq);
        let sequences: Vec<TokenizedSequence> =
            TokenizedCorpus::new(corpus.sentences(), &vocab, &tokenizer)
                .iter()
                .collect();

        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let model = LanguageModel::new(&mut rng, vocab.size(), cfg.model)?;
        tracing::info!(
            corpus = corpus.name(),
            sentences = sequences.len(),
            vocab = vocab.size(),
            params = model.num_params(),
            "starting training"
        );

        let mut ctx = TrainingContext::new(model, Adam::default(), rng);
        let learning_rate = cfg.learning_rate as f32;
        let mut epoch_losses = Vec::with_capacity(cfg.epochs);
        let mut order: Vec<usize> = (0..sequences.len()).collect();
        let mut best = f64::INFINITY;
        let mut stale = 0usize;

        for epoch in 1..=cfg.epochs {
            let timer = Instant::now();
            if cfg.shuffle {
                order.shuffle(&mut ctx.rng);
            }
            let ordered: Vec<TokenizedSequence> =
                order.iter().map(|&i| sequences[i].clone()).collect();
            let batches = make_batches(corpus.name(), &ordered, cfg.batch_size)?;

            let mut total = 0.0;
            for (index, batch) in batches.iter().enumerate() {
                total += ctx.step(batch, epoch, index, learning_rate, cfg.max_grad_norm)?;
            }
            let epoch_loss = total / batches.len() as f64;
            epoch_losses.push(epoch_loss);
            tracing::info!(
                epoch,
                epochs = cfg.epochs,
                loss = epoch_loss,
                elapsed_ms = timer.elapsed().as_millis() as u64,
                "epoch finished"
            );

            if let Some(rule) = cfg.early_stopping {
                if epoch_loss < best - rule.min_delta {
                    best = epoch_loss;
                    stale = 0;
                } else {
                    stale += 1;
                    if stale >= rule.patience {
                        tracing::info!(epoch, "early stopping: loss stopped improving");
                        break;
                    }
                }
            }
        }

        let hyperparameters = Hyperparameters {
            epochs: epoch_losses.len(),
            batch_size: cfg.batch_size,
            learning_rate: cfg.learning_rate,
            seed: cfg.seed,
            model: cfg.model,
        };
        tracing::debug!(steps = ctx.steps(), "training finished");
        let checkpoint = Checkpoint::new(
            checkpoint_name.to_string(),
            corpus.name().to_string(),
            hyperparameters,
            cfg.tokenizer,
            vocab,
            ctx.into_model(),
            epoch_losses.clone(),
        )?;
        Ok(TrainingOutcome {
            checkpoint,
            epoch_losses,
        })
    }
}
