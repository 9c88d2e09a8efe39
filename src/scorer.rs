//! Per-sentence loss under a fitted model.

use rayon::prelude::*;

use crate::batch::{make_batches, Batch};
use crate::checkpoint::Checkpoint;
use crate::error::{TraceError, TraceResult};
use crate::lstm::LanguageModel;
use crate::tokenizer::{TokenizedCorpus, TokenizedSequence, Tokenizer, WordTokenizer};
use crate::vocab::Vocabulary;

/// Computes average negative log-likelihood per sentence.
///
/// The scorer only ever borrows the model, so any number of scorers can share
/// one checkpoint and scoring the same sentence twice gives the same loss.
#[derive(Debug, Clone, Copy)]
pub struct LossScorer<'a> {
    model: &'a LanguageModel,
    vocab: &'a Vocabulary,
    tokenizer: WordTokenizer,
}

impl<'a> LossScorer<'a> {
    /// Pairs a model with the vocabulary it was trained on.
    pub fn new(
        model: &'a LanguageModel,
        vocab: &'a Vocabulary,
        tokenizer: WordTokenizer,
    ) -> TraceResult<Self> {
        if model.vocab_size() != vocab.size() {
            return Err(TraceError::dimension(
                "scorer vocabulary vs model",
                model.vocab_size(),
                vocab.size(),
            ));
        }
        Ok(Self {
            model,
            vocab,
            tokenizer,
        })
    }

    /// Scorer over a checkpoint's own model, vocabulary and tokenizer.
    #[must_use]
    pub fn from_checkpoint(checkpoint: &'a Checkpoint) -> Self {
        Self {
            model: checkpoint.model(),
            vocab: checkpoint.vocabulary(),
            tokenizer: checkpoint.tokenizer(),
        }
    }

    /// Loss of one tokenized sentence.
    pub fn score(&self, sequence: &TokenizedSequence) -> TraceResult<f64> {
        self.mean_loss(sequence.ids(), 0)
    }

    /// Loss of every row of `batch`, in row order. Padding is ignored.
    pub fn score_batch(&self, batch: &Batch) -> TraceResult<Vec<f64>> {
        (0..batch.rows())
            .into_par_iter()
            .map(|r| self.mean_loss(&batch.real_tokens(r), r))
            .collect()
    }

    /// Loss of every sequence, scored `batch_size` at a time.
    pub fn score_sequences(
        &self,
        corpus: &str,
        sequences: &[TokenizedSequence],
        batch_size: usize,
    ) -> TraceResult<Vec<f64>> {
        let mut losses = Vec::with_capacity(sequences.len());
        for batch in make_batches(corpus, sequences, batch_size)? {
            losses.extend(self.score_batch(&batch)?);
        }
        Ok(losses)
    }

    /// Tokenizes raw sentences with the training policy and scores them.
    pub fn score_sentences(
        &self,
        corpus: &str,
        sentences: &[String],
        batch_size: usize,
    ) -> TraceResult<Vec<f64>> {
        let sequences: Vec<TokenizedSequence> =
            TokenizedCorpus::new(sentences, self.vocab, &self.tokenizer)
                .iter()
                .collect();
        self.score_sequences(corpus, &sequences, batch_size)
    }

    /// Loss of a single raw sentence. Unknown words score through `<unk>`.
    pub fn score_sentence(&self, sentence: &str) -> TraceResult<f64> {
        self.score(&self.tokenizer.encode_sentence(sentence, self.vocab))
    }

    fn mean_loss(&self, ids: &[u32], row: usize) -> TraceResult<f64> {
        self.model
            .sequence_loss(ids)?
            .mean()
            .ok_or(TraceError::EmptyBatch { index: row })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lstm::ModelConfig;
    use crate::tokenizer::TokenizerConfig;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn fixture() -> (LanguageModel, Vocabulary) {
        let vocab = Vocabulary::build("the cat sat the dog ran".split_whitespace());
        let mut rng = StdRng::seed_from_u64(9);
        let model = LanguageModel::new(
            &mut rng,
            vocab.size(),
            ModelConfig {
                embedding_dim: 4,
                hidden_dim: 6,
            },
        )
        .unwrap();
        (model, vocab)
    }

    fn tokenizer() -> WordTokenizer {
        WordTokenizer::new(TokenizerConfig::default())
    }

    #[test]
    fn scoring_is_repeatable() {
        let (model, vocab) = fixture();
        let before = model.clone();
        let scorer = LossScorer::new(&model, &vocab, tokenizer()).unwrap();
        let a = scorer.score_sentence("the cat sat").unwrap();
        let b = scorer.score_sentence("the cat sat").unwrap();
        assert_eq!(a.to_bits(), b.to_bits());
        assert!(a > 0.0);
        assert_eq!(model, before);
    }

    #[test]
    fn batching_does_not_change_losses() {
        let (model, vocab) = fixture();
        let scorer = LossScorer::new(&model, &vocab, tokenizer()).unwrap();
        let sentences: Vec<String> = ["the cat sat", "the dog", "ran ran ran ran the cat"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let single: Vec<f64> = sentences
            .iter()
            .map(|s| scorer.score_sentence(s).unwrap())
            .collect();
        for batch_size in [1, 2, 3] {
            let batched = scorer.score_sentences("t", &sentences, batch_size).unwrap();
            for (x, y) in single.iter().zip(&batched) {
                assert!((x - y).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn out_of_vocabulary_sentence_still_scores() {
        let (model, vocab) = fixture();
        let scorer = LossScorer::new(&model, &vocab, tokenizer()).unwrap();
        let loss = scorer
            .score_sentence("completely unseen text about quantum gravity")
            .unwrap();
        assert!(loss.is_finite() && loss >= 0.0);
    }

    #[test]
    fn mismatched_vocabulary_is_rejected() {
        let (model, _) = fixture();
        let other = Vocabulary::build("a".split_whitespace());
        assert!(matches!(
            LossScorer::new(&model, &other, tokenizer()),
            Err(TraceError::DimensionMismatch { .. })
        ));
    }
}
