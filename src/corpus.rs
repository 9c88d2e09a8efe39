use serde::{Deserialize, Serialize};

/// A named, ordered list of raw sentences.
///
/// Blank lines never become sentences; surrounding whitespace is trimmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Corpus {
    name: String,
    sentences: Vec<String>,
}

impl Corpus {
    /// Builds a corpus from individual sentences.
    pub fn new<I, S>(name: impl Into<String>, sentences: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            name: name.into(),
            sentences: sentences
                .into_iter()
                .map(|s| s.as_ref().trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    /// Builds a corpus from text holding one sentence per line.
    pub fn from_text(name: impl Into<String>, text: &str) -> Self {
        Self::new(name, text.lines())
    }

    /// One sentence per line.
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut text = self.sentences.join("\n");
        text.push('\n');
        text
    }

    /// Corpus name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All sentences in order.
    #[must_use]
    pub fn sentences(&self) -> &[String] {
        &self.sentences
    }

    /// Number of sentences.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sentences.len()
    }

    /// True when the corpus has no sentences.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }

    /// Splits into `(members, held_out)`: the first ⌊fraction·n⌋ sentences
    /// and the rest. The split is positional, so training and attack always
    /// agree on it.
    #[must_use]
    pub fn split(&self, train_fraction: f64) -> (&[String], &[String]) {
        let n = self.sentences.len();
        let cut = ((n as f64) * train_fraction.clamp(0.0, 1.0)).floor() as usize;
        self.sentences.split_at(cut.min(n))
    }

    /// A corpus holding only the member split, under the same name.
    #[must_use]
    pub fn training_split(&self, train_fraction: f64) -> Self {
        let (members, _) = self.split(train_fraction);
        Self {
            name: self.name.clone(),
            sentences: members.to_vec(),
        }
    }
}
