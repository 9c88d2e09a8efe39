//! Word ↔ id mapping with reserved markers.
//!
//! Ids are assigned deterministically: the four reserved markers first, then
//! every distinct corpus word in first-seen order. The same corpus therefore
//! always yields the same vocabulary, which keeps checkpoints reproducible.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{TraceError, TraceResult};

/// Padding marker; always id 0.
pub const PAD: &str = "<pad>";
/// Sequence-start marker.
pub const BOS: &str = "<bos>";
/// Sequence-end marker.
pub const EOS: &str = "<eos>";
/// Unknown-word marker.
pub const UNK: &str = "<unk>";

/// Id of [`PAD`].
pub const PAD_ID: u32 = 0;
/// Id of [`BOS`].
pub const BOS_ID: u32 = 1;
/// Id of [`EOS`].
pub const EOS_ID: u32 = 2;
/// Id of [`UNK`].
pub const UNK_ID: u32 = 3;

const RESERVED: [&str; 4] = [PAD, BOS, EOS, UNK];

/// Immutable bidirectional word/id mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "VocabularyRecord", into = "VocabularyRecord")]
pub struct Vocabulary {
    itos: Vec<String>,
    stoi: HashMap<String, u32>,
}

/// On-disk form: the id → word list only.
#[derive(Serialize, Deserialize)]
struct VocabularyRecord {
    words: Vec<String>,
}

impl From<VocabularyRecord> for Vocabulary {
    fn from(record: VocabularyRecord) -> Self {
        Self::from_words(record.words)
    }
}

impl From<Vocabulary> for VocabularyRecord {
    fn from(vocab: Vocabulary) -> Self {
        Self { words: vocab.itos }
    }
}

impl Vocabulary {
    /// Builds a vocabulary holding every distinct word in `tokens`.
    pub fn build<'a, I>(tokens: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        Self::build_with_min_freq(tokens, 1)
    }

    /// Builds a vocabulary from words seen at least `min_freq` times.
    ///
    /// Rarer words are left out and later encode to [`UNK_ID`]. Ids still
    /// follow first-seen order among the kept words.
    pub fn build_with_min_freq<'a, I>(tokens: I, min_freq: usize) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut order: Vec<&str> = Vec::new();
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for token in tokens {
            let count = counts.entry(token).or_insert(0);
            if *count == 0 {
                order.push(token);
            }
            *count += 1;
        }

        let mut itos: Vec<String> = RESERVED.iter().map(|s| (*s).to_string()).collect();
        itos.extend(
            order
                .into_iter()
                .filter(|w| counts[w] >= min_freq && !RESERVED.contains(w))
                .map(str::to_string),
        );
        Self::from_words(itos)
    }

    /// Restores a vocabulary from its id → word list.
    ///
    /// Reserved markers missing from `words` are appended, and [`PAD`] is
    /// swapped into id 0 if it sits elsewhere. Duplicate words keep their
    /// first id.
    pub fn from_words(words: Vec<String>) -> Self {
        let mut itos = Vec::with_capacity(words.len());
        let mut stoi = HashMap::with_capacity(words.len());
        for word in words {
            if !stoi.contains_key(&word) {
                stoi.insert(word.clone(), itos.len() as u32);
                itos.push(word);
            }
        }
        for marker in RESERVED {
            if !stoi.contains_key(marker) {
                stoi.insert(marker.to_string(), itos.len() as u32);
                itos.push(marker.to_string());
            }
        }
        let pad_at = stoi[PAD] as usize;
        if pad_at != 0 {
            itos.swap(0, pad_at);
            stoi.insert(itos[0].clone(), 0);
            stoi.insert(itos[pad_at].clone(), pad_at as u32);
        }
        Self { itos, stoi }
    }

    /// Number of ids, markers included.
    #[must_use]
    pub fn size(&self) -> usize {
        self.itos.len()
    }

    /// Id of `word`, or the unknown-word id. Never fails.
    #[must_use]
    pub fn encode(&self, word: &str) -> u32 {
        self.stoi
            .get(word)
            .copied()
            .unwrap_or_else(|| self.unk_id())
    }

    /// Encodes every word of `words`.
    pub fn encode_all<'a, I>(&self, words: I) -> Vec<u32>
    where
        I: IntoIterator<Item = &'a str>,
    {
        words.into_iter().map(|w| self.encode(w)).collect()
    }

    /// Word for `id`; fails with [`TraceError::OutOfRangeId`] past the end.
    pub fn decode(&self, id: u32) -> TraceResult<&str> {
        self.itos
            .get(id as usize)
            .map(String::as_str)
            .ok_or(TraceError::OutOfRangeId {
                id,
                size: self.size(),
            })
    }

    /// Decodes every id of `ids`.
    pub fn decode_all(&self, ids: &[u32]) -> TraceResult<Vec<&str>> {
        ids.iter().map(|&id| self.decode(id)).collect()
    }

    /// Id of the sequence-start marker. [`BOS_ID`] for built vocabularies;
    /// a restored list may place it elsewhere.
    #[must_use]
    pub fn bos_id(&self) -> u32 {
        self.stoi[BOS]
    }

    /// Id of the sequence-end marker.
    #[must_use]
    pub fn eos_id(&self) -> u32 {
        self.stoi[EOS]
    }

    /// Id of the unknown-word marker.
    #[must_use]
    pub fn unk_id(&self) -> u32 {
        self.stoi[UNK]
    }
}
