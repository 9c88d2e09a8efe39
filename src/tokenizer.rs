//! Sentence → word → id conversion.
//!
//! The splitting policy is a [`TokenizerConfig`] value rather than a hidden
//! default: it is stored in every checkpoint so attack-time scoring splits
//! text exactly like training did.

use serde::{Deserialize, Serialize};

use crate::vocab::Vocabulary;

/// How raw text is cut into words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizerConfig {
    /// Fold ASCII letters to lower case before anything else.
    pub lowercase: bool,
    /// Drop every character that is not ASCII alphanumeric, whitespace or `.`.
    pub strip_symbols: bool,
    /// Emit `.` as a separate token instead of gluing it to the previous word.
    pub split_periods: bool,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            lowercase: true,
            strip_symbols: true,
            split_periods: true,
        }
    }
}

/// Anything that can split a sentence into words.
pub trait Tokenizer {
    /// Splits `text` into words. Never fails; may return no words.
    fn tokenize(&self, text: &str) -> Vec<String>;

    /// Renders `sentence` as ids framed by the start and end markers.
    fn encode_sentence(&self, sentence: &str, vocab: &Vocabulary) -> TokenizedSequence {
        let words = self.tokenize(sentence);
        let mut ids = Vec::with_capacity(words.len() + 2);
        ids.push(vocab.bos_id());
        ids.extend(vocab.encode_all(words.iter().map(String::as_str)));
        ids.push(vocab.eos_id());
        TokenizedSequence::new(ids)
    }
}

/// Rule-based word splitter driven by a [`TokenizerConfig`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WordTokenizer {
    config: TokenizerConfig,
}

impl WordTokenizer {
    /// Creates a tokenizer with the given policy.
    #[must_use]
    pub const fn new(config: TokenizerConfig) -> Self {
        Self { config }
    }

    /// The active policy.
    #[must_use]
    pub const fn config(&self) -> TokenizerConfig {
        self.config
    }
}

impl Tokenizer for WordTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        let mut cleaned = String::with_capacity(text.len() + 8);
        for c in text.trim().chars() {
            let c = if self.config.lowercase {
                c.to_ascii_lowercase()
            } else {
                c
            };
            if self.config.strip_symbols
                && !(c.is_ascii_alphanumeric() || c.is_whitespace() || c == '.')
            {
                continue;
            }
            if self.config.split_periods && c == '.' {
                cleaned.push(' ');
            }
            cleaned.push(c);
        }
        cleaned.split_whitespace().map(str::to_string).collect()
    }
}

/// A sentence as vocabulary ids, starting with `<bos>` and ending with `<eos>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizedSequence {
    ids: Vec<u32>,
}

impl TokenizedSequence {
    /// Wraps already-encoded ids.
    #[must_use]
    pub const fn new(ids: Vec<u32>) -> Self {
        Self { ids }
    }

    /// The ids, markers included.
    #[must_use]
    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    /// Number of ids, markers included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// True when the sequence holds no ids at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Number of next-word predictions the sequence provides.
    #[must_use]
    pub fn num_predictions(&self) -> usize {
        self.ids.len().saturating_sub(1)
    }
}

/// A restartable view of a sentence list as [`TokenizedSequence`]s.
///
/// Nothing is encoded until iteration, and every call to [`iter`](Self::iter)
/// starts over from the first sentence.
#[derive(Debug, Clone, Copy)]
pub struct TokenizedCorpus<'a, T: Tokenizer> {
    sentences: &'a [String],
    vocab: &'a Vocabulary,
    tokenizer: &'a T,
}

impl<'a, T: Tokenizer> TokenizedCorpus<'a, T> {
    /// Binds `sentences` to a vocabulary and tokenizer.
    #[must_use]
    pub const fn new(sentences: &'a [String], vocab: &'a Vocabulary, tokenizer: &'a T) -> Self {
        Self {
            sentences,
            vocab,
            tokenizer,
        }
    }

    /// Iterates the encoded sentences from the beginning.
    #[must_use]
    pub fn iter(&self) -> Sequences<'a, T> {
        Sequences {
            inner: self.sentences.iter(),
            vocab: self.vocab,
            tokenizer: self.tokenizer,
        }
    }

    /// Number of sentences in the view.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.sentences.len()
    }

    /// True when there are no sentences.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }
}

impl<'a, T: Tokenizer> IntoIterator for &TokenizedCorpus<'a, T> {
    type Item = TokenizedSequence;
    type IntoIter = Sequences<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator returned by [`TokenizedCorpus::iter`].
#[derive(Debug, Clone)]
pub struct Sequences<'a, T: Tokenizer> {
    inner: std::slice::Iter<'a, String>,
    vocab: &'a Vocabulary,
    tokenizer: &'a T,
}

impl<T: Tokenizer> Iterator for Sequences<'_, T> {
    type Item = TokenizedSequence;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|s| self.tokenizer.encode_sentence(s, self.vocab))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<T: Tokenizer> ExactSizeIterator for Sequences<'_, T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocab::{BOS, BOS_ID, EOS, EOS_ID, PAD, UNK_ID};

    #[test]
    fn default_policy_folds_case_and_detaches_periods() {
        let t = WordTokenizer::default();
        assert_eq!(
            t.tokenize("  The Cat, sat!  On the mat. "),
            vec!["the", "cat", "sat", "on", "the", "mat", "."]
        );
    }

    #[test]
    fn symbols_only_sentence_yields_no_words() {
        let t = WordTokenizer::default();
        assert!(t.tokenize("?!, -- ;").is_empty());
    }

    #[test]
    fn case_preserving_policy_keeps_capitals() {
        let t = WordTokenizer::new(TokenizerConfig {
            lowercase: false,
            ..TokenizerConfig::default()
        });
        assert_eq!(t.tokenize("Alice met Bob."), vec!["Alice", "met", "Bob", "."]);
    }

    #[test]
    fn encoded_sentence_is_framed_by_markers() {
        let t = WordTokenizer::default();
        let vocab = Vocabulary::build(["the", "cat"]);
        let seq = t.encode_sentence("The cat purred", &vocab);
        assert_eq!(
            seq.ids(),
            &[BOS_ID, vocab.encode("the"), vocab.encode("cat"), UNK_ID, EOS_ID]
        );
        assert_eq!(seq.num_predictions(), 4);
    }

    #[test]
    fn restored_vocabulary_frames_with_its_own_markers() {
        let t = WordTokenizer::default();
        let vocab = Vocabulary::from_words(vec![PAD.into(), "hello".into(), "world".into()]);
        let seq = t.encode_sentence("hello", &vocab);
        assert_eq!(vocab.decode_all(seq.ids()).unwrap(), vec![BOS, "hello", EOS]);
    }

    #[test]
    fn corpus_view_is_restartable() {
        let t = WordTokenizer::default();
        let sentences = vec!["the cat sat".to_string(), "the dog ran".to_string()];
        let vocab = Vocabulary::build(sentences.iter().flat_map(|s| s.split_whitespace()));
        let corpus = TokenizedCorpus::new(&sentences, &vocab, &t);

        let first: Vec<_> = corpus.iter().collect();
        let second: Vec<_> = (&corpus).into_iter().collect();
        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
        assert_eq!(corpus.iter().len(), 2);
    }
}
