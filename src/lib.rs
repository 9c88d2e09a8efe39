#![warn(missing_docs)] // Enforce documentation coverage at the warning level

//! # whisper-trace
//!
//! `whisper-trace` trains small word-level LSTM language models and then
//! attacks them: given sentences the model was trained on and sentences it
//! never saw, it measures how well per-sentence loss tells the two apart
//! (membership inference) and labels arbitrary sentences as likely members or
//! not.
//!
//! Everything runs on the CPU. Parameter updates and per-sentence scoring use
//! `rayon`, with results collected in input order so runs are reproducible
//! for a fixed seed.
//!
//! ## Key Components:
//!
//! *   [`Vocabulary`] and [`WordTokenizer`]: sentence → word → id conversion,
//!     with reserved `<pad>`, `<bos>`, `<eos>`, `<unk>` ids.
//! *   [`make_batches`]: groups tokenized sentences into padded, masked [`Batch`]es.
//! *   [`LanguageModel`]: embedding → LSTM → linear head, with hand-written
//!     backpropagation through time.
//! *   [`Trainer`]: the epoch loop, driven by an [`Optimizer`] such as [`Adam`];
//!     produces an immutable [`Checkpoint`].
//! *   [`LossScorer`]: mean negative log-likelihood per sentence.
//! *   [`MiaEngine`]: ROC-AUC over member/held-out losses, a loss cutoff and
//!     per-sentence verdicts in a [`MiaResult`].
//! *   [`ResourceStore`] and the [`pipeline`] functions: corpora, checkpoints
//!     and attack reports on disk.
//!
//! ## Features
//!
//! *   `cli` (default): builds the `whisper-trace` binary (`clap` and
//!     `tracing-subscriber`). The library alone only needs `tracing`.
//!
//! ## Example
//!
//! ```no_run
//! use whisper_trace::{AttackConfig, Corpus, MiaEngine, TraceError, TrainConfig, Trainer};
//!
//! # fn main() -> Result<(), TraceError> {
//! let corpus = Corpus::new("toy", ["the cat sat", "the dog ran", "a bird flew"]);
//! let (members, held_out) = corpus.split(0.7);
//! let members = Corpus::new("toy", members);
//!
//! let config = TrainConfig {
//!     epochs: 20,
//!     batch_size: 2,
//!     ..TrainConfig::default()
//! };
//! let outcome = Trainer::new(config)?.train(&members, "toy__20__2__0.002")?;
//!
//! let engine = MiaEngine::new(AttackConfig::default())?;
//! let result = engine.run(
//!     &outcome.checkpoint,
//!     "toy",
//!     members.sentences(),
//!     held_out,
//!     None,
//! )?;
//! println!("AUC {:.3}, cutoff {:.3}", result.auc, result.threshold);
//! for s in &result.sentences {
//!     println!("{:>6.3} {:5} {}", s.loss, s.is_member, s.content);
//! }
//! # Ok(())
//! # }
//! ```

// --- Module Declarations ---

/// Batching of tokenized sentences into padded, masked grids.
pub mod batch;
/// Immutable trained-model snapshots and their binary encoding.
pub mod checkpoint;
/// Validated run configuration and the request payloads it is built from.
pub mod config;
/// Named sentence collections and the member/held-out split.
pub mod corpus;
/// The crate-wide error type.
pub mod error;
/// Scalar activations and cross-entropy used by the model.
pub mod funcs;
/// The recurrent language model.
pub mod lstm;
/// Membership inference: ROC, AUC, cutoffs and verdicts.
pub mod mia;
/// Parameter update rules (`Adam`).
pub mod optimizer;
/// Store-backed train and attack entry points.
pub mod pipeline;
/// Per-sentence loss computation.
pub mod scorer;
/// Filesystem resource store.
pub mod store;
/// Dense `f32` tensors holding model parameters.
pub mod tensor;
/// Text to word splitting and id encoding.
pub mod tokenizer;
/// The training loop.
pub mod trainer;
/// Word/id mapping.
pub mod vocab;

// --- Public API Re-exports ---

pub use batch::{make_batches, Batch};
pub use checkpoint::{Checkpoint, Hyperparameters};
pub use config::{AttackConfig, AttackRequest, EarlyStopping, TrainConfig, TrainRequest};
pub use corpus::Corpus;
pub use error::{TraceError, TraceResult};
pub use lstm::{LanguageModel, ModelConfig};
pub use mia::{MiaEngine, MiaResult, Normalization, SentenceRecord, ThresholdRule};
pub use optimizer::{Adam, Optimizer, OptimizerState};
pub use scorer::LossScorer;
pub use store::ResourceStore;
pub use tensor::{Tensor, TensorError};
pub use tokenizer::{TokenizedSequence, Tokenizer, TokenizerConfig, WordTokenizer};
pub use trainer::{Trainer, TrainingOutcome};
pub use vocab::Vocabulary;
