//! Boundary payloads and the validated configuration they turn into.
//!
//! Requests arrive loosely (CLI flags, JSON); each is validated exactly once
//! into a config struct, and the core only ever sees the config.

use serde::{Deserialize, Serialize};

use crate::error::{TraceError, TraceResult};
use crate::lstm::ModelConfig;
use crate::mia::{Normalization, ThresholdRule};
use crate::tokenizer::TokenizerConfig;

/// Fraction of a stored corpus used as the training (member) split.
pub const TRAIN_FRACTION: f64 = 0.7;
/// Seed used when a request does not name one.
pub const DEFAULT_SEED: u64 = 42;
/// Separator between the parts of generated resource names.
pub const NAME_SPACER: &str = "__";

const EPOCHS_RANGE: std::ops::RangeInclusive<usize> = 1..=1000;
const BATCH_SIZE_RANGE: std::ops::RangeInclusive<usize> = 1..=1024;
const LEARNING_RATE_RANGE: std::ops::RangeInclusive<f64> = 1e-6..=1.0;

/// Stop training once the epoch loss stops improving.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EarlyStopping {
    /// Epochs without improvement tolerated before stopping.
    pub patience: usize,
    /// Smallest decrease that counts as an improvement.
    pub min_delta: f64,
}

/// Everything the trainer needs, already validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    /// Full passes over the training split.
    pub epochs: usize,
    /// Sequences per optimizer step.
    pub batch_size: usize,
    /// Adam step size.
    pub learning_rate: f64,
    /// Seeds parameter initialisation and epoch shuffling.
    pub seed: u64,
    /// Permute the training sequences before batching each epoch.
    pub shuffle: bool,
    /// Layer widths.
    pub model: ModelConfig,
    /// Word-splitting policy, stored with the checkpoint.
    pub tokenizer: TokenizerConfig,
    /// Minimum count for a word to enter the vocabulary.
    pub min_freq: usize,
    /// Rescale gradients whose global norm exceeds this.
    pub max_grad_norm: Option<f64>,
    /// Optional patience rule; off by default.
    pub early_stopping: Option<EarlyStopping>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 100,
            batch_size: 64,
            learning_rate: 2e-3,
            seed: DEFAULT_SEED,
            shuffle: true,
            model: ModelConfig::default(),
            tokenizer: TokenizerConfig::default(),
            min_freq: 1,
            max_grad_norm: None,
            early_stopping: None,
        }
    }
}

impl TrainConfig {
    /// Checks every field; the first violation is reported.
    pub fn validate(&self) -> TraceResult<()> {
        check_range("epochs", self.epochs, &EPOCHS_RANGE)?;
        check_range("batch_size", self.batch_size, &BATCH_SIZE_RANGE)?;
        check_learning_rate(self.learning_rate)?;
        if self.model.embedding_dim == 0 || self.model.hidden_dim == 0 {
            return Err(TraceError::config("model dimensions must be positive"));
        }
        if self.min_freq == 0 {
            return Err(TraceError::config("min_freq must be at least 1"));
        }
        if let Some(norm) = self.max_grad_norm {
            if !(norm.is_finite() && norm > 0.0) {
                return Err(TraceError::config(format!(
                    "max_grad_norm must be positive, got {norm}"
                )));
            }
        }
        if let Some(rule) = self.early_stopping {
            if rule.patience == 0 || !(rule.min_delta >= 0.0) {
                return Err(TraceError::config(
                    "early stopping needs patience ≥ 1 and a non-negative min_delta",
                ));
            }
        }
        Ok(())
    }
}

/// Request to train a checkpoint on a stored corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainRequest {
    /// Corpus to train on; its first [`TRAIN_FRACTION`] is used.
    pub corpus_name: String,
    /// Full passes over the training split.
    pub epochs: usize,
    /// Sequences per optimizer step.
    pub batch_size: usize,
    /// Adam step size.
    pub learning_rate: f64,
    /// Prefix for the generated checkpoint name.
    #[serde(default)]
    pub checkpoint_name: Option<String>,
}

impl TrainRequest {
    /// A request with the default hyperparameters.
    #[must_use]
    pub fn new(corpus_name: impl Into<String>) -> Self {
        let defaults = TrainConfig::default();
        Self {
            corpus_name: corpus_name.into(),
            epochs: defaults.epochs,
            batch_size: defaults.batch_size,
            learning_rate: defaults.learning_rate,
            checkpoint_name: None,
        }
    }

    /// Validates the request on top of `base` (which supplies every field the
    /// request does not carry).
    pub fn validate(&self, base: TrainConfig) -> TraceResult<TrainConfig> {
        check_corpus_name(&self.corpus_name)?;
        if let Some(prefix) = self.prefix() {
            check_name("checkpoint_name", prefix)?;
        }
        let config = TrainConfig {
            epochs: self.epochs,
            batch_size: self.batch_size,
            learning_rate: self.learning_rate,
            ..base
        };
        config.validate()?;
        Ok(config)
    }

    /// Name under which the resulting checkpoint is stored:
    /// `[prefix__]corpus__epochs__batch_size__learning_rate`.
    #[must_use]
    pub fn resolved_checkpoint_name(&self) -> String {
        let prefix = self
            .prefix()
            .map(|p| format!("{p}{NAME_SPACER}"))
            .unwrap_or_default();
        format!(
            "{prefix}{corpus}{s}{epochs}{s}{batch}{s}{lr}",
            corpus = self.corpus_name,
            epochs = self.epochs,
            batch = self.batch_size,
            lr = self.learning_rate,
            s = NAME_SPACER,
        )
    }

    /// The checkpoint name prefix; an empty one counts as none.
    fn prefix(&self) -> Option<&str> {
        self.checkpoint_name.as_deref().filter(|p| !p.is_empty())
    }
}

/// Attack settings, already validated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttackConfig {
    /// Sentences scored per forward batch.
    pub batch_size: usize,
    /// How the member/non-member cutoff is chosen.
    pub threshold_rule: ThresholdRule,
    /// How losses are rescaled into display scores.
    pub normalization: Normalization,
}

impl Default for AttackConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            threshold_rule: ThresholdRule::default(),
            normalization: Normalization::default(),
        }
    }
}

impl AttackConfig {
    /// Checks every field.
    pub fn validate(&self) -> TraceResult<()> {
        check_range("batch_size", self.batch_size, &BATCH_SIZE_RANGE)?;
        if let ThresholdRule::Fixed(cutoff) = self.threshold_rule {
            if !cutoff.is_finite() {
                return Err(TraceError::config("fixed threshold must be finite"));
            }
        }
        if let Normalization::Linear { max_loss } = self.normalization {
            if !(max_loss.is_finite() && max_loss > 0.0) {
                return Err(TraceError::config("linear normalization needs a positive max_loss"));
            }
        }
        Ok(())
    }
}

/// Request to attack a stored checkpoint with a stored corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackRequest {
    /// Checkpoint under attack.
    pub checkpoint_name: String,
    /// Corpus providing the member and held-out splits.
    pub corpus_name: String,
    /// Sentences scored per forward batch.
    pub batch_size: usize,
    /// Optional custom sentences, separated by `|`.
    #[serde(default)]
    pub input: Option<String>,
}

impl AttackRequest {
    /// Validates the request on top of `base`.
    pub fn validate(&self, base: AttackConfig) -> TraceResult<AttackConfig> {
        check_name("checkpoint_name", &self.checkpoint_name)?;
        check_corpus_name(&self.corpus_name)?;
        let config = AttackConfig {
            batch_size: self.batch_size,
            ..base
        };
        config.validate()?;
        Ok(config)
    }

    /// The custom sentences, if any non-blank ones were supplied.
    #[must_use]
    pub fn custom_sentences(&self) -> Option<Vec<String>> {
        let sentences: Vec<String> = self
            .input
            .as_deref()?
            .split('|')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        (!sentences.is_empty()).then_some(sentences)
    }
}

fn check_range(field: &str, value: usize, range: &std::ops::RangeInclusive<usize>) -> TraceResult<()> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(TraceError::config(format!(
            "{field} must be in {}..={}, got {value}",
            range.start(),
            range.end()
        )))
    }
}

fn check_learning_rate(lr: f64) -> TraceResult<()> {
    if lr.is_finite() && LEARNING_RATE_RANGE.contains(&lr) {
        Ok(())
    } else {
        Err(TraceError::config(format!(
            "learning_rate must be in {}..={}, got {lr}",
            LEARNING_RATE_RANGE.start(),
            LEARNING_RATE_RANGE.end()
        )))
    }
}

/// Resource names become file names, so they must be plain.
pub(crate) fn check_name(field: &str, name: &str) -> TraceResult<()> {
    let ok = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.chars().any(|c| matches!(c, '/' | '\\' | '\0'));
    if ok {
        Ok(())
    } else {
        Err(TraceError::config(format!("{field} '{name}' is not a valid name")))
    }
}

/// Corpus names are also embedded in checkpoint and attack names, so they may
/// not contain [`NAME_SPACER`].
pub(crate) fn check_corpus_name(name: &str) -> TraceResult<()> {
    check_name("corpus_name", name)?;
    if name.contains(NAME_SPACER) {
        return Err(TraceError::config(format!(
            "corpus_name '{name}' must not contain '{NAME_SPACER}'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        TrainConfig::default().validate().unwrap();
        AttackConfig::default().validate().unwrap();
    }

    #[test]
    fn non_positive_hyperparameters_are_rejected() {
        let base = TrainConfig::default();
        let mut req = TrainRequest::new("toy");
        req.epochs = 0;
        assert!(matches!(req.validate(base.clone()), Err(TraceError::Configuration(_))));

        let mut req = TrainRequest::new("toy");
        req.batch_size = 0;
        assert!(req.validate(base.clone()).is_err());

        for lr in [0.0, -1e-3, f64::NAN, 2.0] {
            let mut req = TrainRequest::new("toy");
            req.learning_rate = lr;
            assert!(req.validate(base.clone()).is_err(), "lr {lr} accepted");
        }
    }

    #[test]
    fn request_overrides_base() {
        let mut req = TrainRequest::new("toy");
        req.epochs = 3;
        req.batch_size = 2;
        req.learning_rate = 0.01;
        let cfg = req.validate(TrainConfig::default()).unwrap();
        assert_eq!((cfg.epochs, cfg.batch_size), (3, 2));
        assert!((cfg.learning_rate - 0.01).abs() < f64::EPSILON);
        assert_eq!(cfg.seed, DEFAULT_SEED);
    }

    #[test]
    fn checkpoint_name_follows_the_naming_scheme() {
        let mut req = TrainRequest::new("toy");
        req.epochs = 1;
        req.batch_size = 2;
        req.learning_rate = 0.002;
        assert_eq!(req.resolved_checkpoint_name(), "toy__1__2__0.002");
        req.checkpoint_name = Some("run".into());
        assert_eq!(req.resolved_checkpoint_name(), "run__toy__1__2__0.002");
    }

    #[test]
    fn empty_prefix_is_accepted_and_ignored() {
        let mut req = TrainRequest::new("toy");
        req.checkpoint_name = Some(String::new());
        req.validate(TrainConfig::default()).unwrap();
        req.epochs = 1;
        req.batch_size = 2;
        req.learning_rate = 0.002;
        assert_eq!(req.resolved_checkpoint_name(), "toy__1__2__0.002");
    }

    #[test]
    fn corpus_names_may_not_hold_the_separator() {
        assert!(check_corpus_name("my__corpus").is_err());
        assert!(check_corpus_name("my_corpus").is_ok());
        let req = TrainRequest::new("a__b");
        assert!(matches!(
            req.validate(TrainConfig::default()),
            Err(TraceError::Configuration(_))
        ));
        let attack = AttackRequest {
            checkpoint_name: "run__a__1__2__0.01".into(),
            corpus_name: "a__b".into(),
            batch_size: 8,
            input: None,
        };
        assert!(attack.validate(AttackConfig::default()).is_err());
    }

    #[test]
    fn custom_input_splits_on_pipes() {
        let mut req = AttackRequest {
            checkpoint_name: "c".into(),
            corpus_name: "toy".into(),
            batch_size: 8,
            input: Some(" one sentence | another one ||".into()),
        };
        assert_eq!(
            req.custom_sentences().unwrap(),
            vec!["one sentence".to_string(), "another one".to_string()]
        );
        req.input = Some(" | ".into());
        assert_eq!(req.custom_sentences(), None);
        req.input = None;
        assert_eq!(req.custom_sentences(), None);
    }

    #[test]
    fn path_like_names_are_rejected() {
        assert!(check_name("corpus_name", "../etc").is_err());
        assert!(check_name("corpus_name", "").is_err());
        assert!(check_name("corpus_name", "toy").is_ok());
    }
}
