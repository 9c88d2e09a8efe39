//! Immutable snapshot of a fitted model and everything needed to use it.

use serde::{Deserialize, Serialize};

use crate::error::{TraceError, TraceResult};
use crate::lstm::{LanguageModel, ModelConfig};
use crate::tokenizer::{TokenizerConfig, WordTokenizer};
use crate::vocab::Vocabulary;

/// Leading bytes of every serialized checkpoint.
const MAGIC: &[u8; 4] = b"WTC1";

/// Hyperparameters a checkpoint was trained with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    /// Epochs actually run (early stopping may cut the configured number).
    pub epochs: usize,
    /// Training batch size.
    pub batch_size: usize,
    /// Adam step size.
    pub learning_rate: f64,
    /// Seed for initialisation and shuffling.
    pub seed: u64,
    /// Layer widths.
    pub model: ModelConfig,
}

/// A trained model, its vocabulary and tokenizer policy, and its provenance.
///
/// Only the trainer creates checkpoints, and nothing mutates one afterwards;
/// scoring borrows the model read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    name: String,
    corpus: String,
    hyperparameters: Hyperparameters,
    tokenizer: TokenizerConfig,
    vocabulary: Vocabulary,
    model: LanguageModel,
    epoch_losses: Vec<f64>,
}

impl Checkpoint {
    pub(crate) fn new(
        name: String,
        corpus: String,
        hyperparameters: Hyperparameters,
        tokenizer: TokenizerConfig,
        vocabulary: Vocabulary,
        model: LanguageModel,
        epoch_losses: Vec<f64>,
    ) -> TraceResult<Self> {
        let checkpoint = Self {
            name,
            corpus,
            hyperparameters,
            tokenizer,
            vocabulary,
            model,
            epoch_losses,
        };
        checkpoint.check_pairing()?;
        Ok(checkpoint)
    }

    /// Encodes the checkpoint as an opaque blob.
    pub fn serialize(&self) -> TraceResult<Vec<u8>> {
        let mut blob = MAGIC.to_vec();
        bincode::serialize_into(&mut blob, self)?;
        Ok(blob)
    }

    /// Decodes a blob produced by [`serialize`](Self::serialize).
    pub fn deserialize(blob: &[u8]) -> TraceResult<Self> {
        let body = blob.strip_prefix(MAGIC.as_slice()).ok_or_else(|| {
            TraceError::Serialization(Box::new(bincode::ErrorKind::Custom(
                "blob does not start with a checkpoint header".into(),
            )))
        })?;
        let checkpoint: Self = bincode::deserialize(body)?;
        checkpoint.check_pairing()?;
        Ok(checkpoint)
    }

    /// Storage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the corpus the model was trained on.
    #[must_use]
    pub fn corpus(&self) -> &str {
        &self.corpus
    }

    /// Training hyperparameters.
    #[must_use]
    pub const fn hyperparameters(&self) -> &Hyperparameters {
        &self.hyperparameters
    }

    /// The tokenizer the model was trained with.
    #[must_use]
    pub const fn tokenizer(&self) -> WordTokenizer {
        WordTokenizer::new(self.tokenizer)
    }

    /// Training vocabulary.
    #[must_use]
    pub const fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    /// The fitted model.
    #[must_use]
    pub const fn model(&self) -> &LanguageModel {
        &self.model
    }

    /// Mean training loss of each epoch.
    #[must_use]
    pub fn epoch_losses(&self) -> &[f64] {
        &self.epoch_losses
    }

    fn check_pairing(&self) -> TraceResult<()> {
        if self.vocabulary.size() != self.model.vocab_size() {
            return Err(TraceError::dimension(
                format!("checkpoint '{}' vocabulary vs model", self.name),
                self.model.vocab_size(),
                self.vocabulary.size(),
            ));
        }
        let declared = self.hyperparameters.model;
        let actual = self.model.config();
        if declared.hidden_dim != actual.hidden_dim {
            return Err(TraceError::dimension(
                format!("checkpoint '{}' hidden width", self.name),
                declared.hidden_dim,
                actual.hidden_dim,
            ));
        }
        if declared.embedding_dim != actual.embedding_dim {
            return Err(TraceError::dimension(
                format!("checkpoint '{}' embedding width", self.name),
                declared.embedding_dim,
                actual.embedding_dim,
            ));
        }
        self.model.validate()
    }
}
