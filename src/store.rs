//! On-disk home for corpora, checkpoints and attack reports.
//!
//! ```text
//! <root>/corpora/<name>.txt              one sentence per line
//! <root>/checkpoints/<name>.bin          Checkpoint::serialize blob
//! <root>/mias/<ts>__<ckpt>__<corpus>__<batch>__<auc>/
//!     output.csv                         per-sentence verdicts
//!     report.json                        the full MiaResult
//! ```

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::checkpoint::Checkpoint;
use crate::config::{check_corpus_name, check_name, NAME_SPACER};
use crate::corpus::Corpus;
use crate::error::{TraceError, TraceResult};
use crate::mia::MiaResult;

const DIR_CORPORA: &str = "corpora";
const DIR_CHECKPOINTS: &str = "checkpoints";
const DIR_MIAS: &str = "mias";
const EXT_CORPUS: &str = "txt";
const EXT_CHECKPOINT: &str = "bin";

/// A checkpoint as listed from its stored name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    /// Full stored name.
    pub name: String,
    /// Corpus the checkpoint was trained on.
    pub corpus: String,
    /// Requested epochs.
    pub epochs: usize,
    /// Training batch size.
    pub batch_size: usize,
    /// Adam step size.
    pub learning_rate: f64,
}

impl CheckpointEntry {
    /// Parses `[prefix__]corpus__epochs__batch__lr`.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let mut parts = name.rsplitn(4, NAME_SPACER);
        let learning_rate = parts.next()?.parse().ok()?;
        let batch_size = parts.next()?.parse().ok()?;
        let epochs = parts.next()?.parse().ok()?;
        let rest = parts.next()?;
        let corpus = rest.rsplit(NAME_SPACER).next()?;
        if corpus.is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            corpus: corpus.to_string(),
            epochs,
            batch_size,
            learning_rate,
        })
    }
}

/// An attack run as listed from its directory name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackEntry {
    /// Directory name.
    pub id: String,
    /// `YYYYMMDDhhmmss` in UTC.
    pub timestamp: String,
    /// Checkpoint that was attacked.
    pub checkpoint: String,
    /// Corpus that supplied the labelled splits.
    pub corpus: String,
    /// Scoring batch size.
    pub batch_size: usize,
    /// AUC, rounded to three decimals.
    pub auc: f64,
}

impl AttackEntry {
    /// Parses `timestamp__checkpoint__corpus__batch__auc`. The checkpoint
    /// part may itself contain the separator.
    #[must_use]
    pub fn parse(id: &str) -> Option<Self> {
        let (timestamp, rest) = id.split_once(NAME_SPACER)?;
        let mut tail = rest.rsplitn(4, NAME_SPACER);
        let auc = tail.next()?.parse().ok()?;
        let batch_size = tail.next()?.parse().ok()?;
        let corpus = tail.next()?;
        let checkpoint = tail.next()?;
        if timestamp.is_empty() || corpus.is_empty() || checkpoint.is_empty() {
            return None;
        }
        Some(Self {
            id: id.to_string(),
            timestamp: timestamp.to_string(),
            checkpoint: checkpoint.to_string(),
            corpus: corpus.to_string(),
            batch_size,
            auc,
        })
    }
}

/// Filesystem-backed resource store rooted at one directory.
#[derive(Debug, Clone)]
pub struct ResourceStore {
    root: PathBuf,
}

impl ResourceStore {
    /// Opens (creating if needed) a store under `root`.
    pub fn open(root: impl Into<PathBuf>) -> TraceResult<Self> {
        let root = root.into();
        for dir in [DIR_CORPORA, DIR_CHECKPOINTS, DIR_MIAS] {
            fs::create_dir_all(root.join(dir))?;
        }
        tracing::debug!(root = %root.display(), "opened resource store");
        Ok(Self { root })
    }

    /// Store root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn corpus_path(&self, name: &str) -> PathBuf {
        self.root
            .join(DIR_CORPORA)
            .join(format!("{name}.{EXT_CORPUS}"))
    }

    fn checkpoint_path(&self, name: &str) -> PathBuf {
        self.root
            .join(DIR_CHECKPOINTS)
            .join(format!("{name}.{EXT_CHECKPOINT}"))
    }

    /// Writes `corpus`, replacing any corpus with the same name.
    pub fn save_corpus(&self, corpus: &Corpus) -> TraceResult<PathBuf> {
        check_corpus_name(corpus.name())?;
        if corpus.is_empty() {
            return Err(TraceError::EmptyCorpus {
                corpus: corpus.name().to_string(),
            });
        }
        let path = self.corpus_path(corpus.name());
        write_atomic(&path, corpus.to_text().as_bytes())?;
        tracing::info!(corpus = corpus.name(), sentences = corpus.len(), "saved corpus");
        Ok(path)
    }

    /// Reads a stored corpus.
    pub fn load_corpus(&self, name: &str) -> TraceResult<Corpus> {
        check_corpus_name(name)?;
        match fs::read_to_string(self.corpus_path(name)) {
            Ok(text) => Ok(Corpus::from_text(name, &text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(TraceError::CorpusNotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Names of every stored corpus, sorted.
    pub fn list_corpora(&self) -> TraceResult<Vec<String>> {
        self.stems(DIR_CORPORA, EXT_CORPUS)
    }

    /// Writes `checkpoint` under its own name.
    pub fn save_checkpoint(&self, checkpoint: &Checkpoint) -> TraceResult<PathBuf> {
        check_name("checkpoint_name", checkpoint.name())?;
        let path = self.checkpoint_path(checkpoint.name());
        write_atomic(&path, &checkpoint.serialize()?)?;
        tracing::info!(checkpoint = checkpoint.name(), path = %path.display(), "saved checkpoint");
        Ok(path)
    }

    /// Reads a stored checkpoint.
    pub fn load_checkpoint(&self, name: &str) -> TraceResult<Checkpoint> {
        check_name("checkpoint_name", name)?;
        match fs::read(self.checkpoint_path(name)) {
            Ok(blob) => Checkpoint::deserialize(&blob),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(TraceError::CheckpointNotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Every stored checkpoint whose name follows the naming scheme.
    pub fn list_checkpoints(&self) -> TraceResult<Vec<CheckpointEntry>> {
        Ok(self
            .stems(DIR_CHECKPOINTS, EXT_CHECKPOINT)?
            .into_iter()
            .filter_map(|name| {
                let entry = CheckpointEntry::parse(&name);
                if entry.is_none() {
                    tracing::warn!(name = %name, "skipping checkpoint with unparseable name");
                }
                entry
            })
            .collect())
    }

    /// Writes an attack report directory and returns its path.
    pub fn save_attack(&self, result: &MiaResult) -> TraceResult<PathBuf> {
        let id = [
            utc_timestamp(SystemTime::now()),
            result.checkpoint.clone(),
            result.corpus.clone(),
            result.batch_size.to_string(),
            format!("{:.3}", result.auc),
        ]
        .join(NAME_SPACER);
        let dir = self.root.join(DIR_MIAS).join(&id);
        fs::create_dir_all(&dir)?;

        let mut csv = String::from("content,is_member,loss,normalized_score\n");
        for s in &result.sentences {
            csv.push_str(&format!(
                "{},{},{:.6},{:.6}\n",
                csv_field(&s.content),
                s.is_member,
                s.loss,
                s.normalized_score
            ));
        }
        write_atomic(&dir.join("output.csv"), csv.as_bytes())?;
        write_atomic(
            &dir.join("report.json"),
            serde_json::to_string_pretty(result)?.as_bytes(),
        )?;
        tracing::info!(id = %id, "saved attack report");
        Ok(dir)
    }

    /// Every stored attack run, ordered by checkpoint then time.
    pub fn list_attacks(&self) -> TraceResult<Vec<AttackEntry>> {
        let mut entries = Vec::new();
        for item in fs::read_dir(self.root.join(DIR_MIAS))? {
            let item = item?;
            if !item.file_type()?.is_dir() {
                continue;
            }
            let id = item.file_name().to_string_lossy().into_owned();
            match AttackEntry::parse(&id) {
                Some(entry) => entries.push(entry),
                None => tracing::warn!(id = %id, "skipping attack directory with unparseable name"),
            }
        }
        entries.sort_by(|a, b| {
            a.checkpoint
                .cmp(&b.checkpoint)
                .then_with(|| a.timestamp.cmp(&b.timestamp))
        });
        Ok(entries)
    }

    /// Reads back the full report of an attack run.
    pub fn load_attack(&self, id: &str) -> TraceResult<MiaResult> {
        check_name("attack id", id)?;
        let text = fs::read_to_string(self.root.join(DIR_MIAS).join(id).join("report.json"))?;
        Ok(serde_json::from_str(&text)?)
    }

    fn stems(&self, dir: &str, ext: &str) -> TraceResult<Vec<String>> {
        let mut names = Vec::new();
        for item in fs::read_dir(self.root.join(dir))? {
            let path = item?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ext) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Writes to a sibling temp file and renames it into place, so readers never
/// see a half-written file.
fn write_atomic(path: &Path, bytes: &[u8]) -> TraceResult<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn csv_field(text: &str) -> String {
    if text.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}

/// `YYYYMMDDhhmmss` (UTC) for `time`.
fn utc_timestamp(time: SystemTime) -> String {
    let secs = time.duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs());
    let (days, rem) = (secs / 86_400, secs % 86_400);
    let (y, m, d) = civil_from_days(days as i64);
    format!(
        "{y:04}{m:02}{d:02}{:02}{:02}{:02}",
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60
    )
}

// Howard Hinnant's days-to-civil conversion.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let y = yoe + era * 400 + i64::from(m <= 2);
    (y, m, d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn checkpoint_names_parse_with_and_without_prefix() {
        let e = CheckpointEntry::parse("toy__1__2__0.002").unwrap();
        assert_eq!((e.corpus.as_str(), e.epochs, e.batch_size), ("toy", 1, 2));
        let e = CheckpointEntry::parse("run__toy__100__64__0.002").unwrap();
        assert_eq!(e.corpus, "toy");
        assert!(CheckpointEntry::parse("handmade").is_none());
        assert!(CheckpointEntry::parse("toy__x__2__0.1").is_none());
    }

    #[test]
    fn attack_ids_keep_separators_inside_the_checkpoint() {
        let e = AttackEntry::parse("20250101120000__toy__1__2__0.002__toy__2__0.750").unwrap();
        assert_eq!(e.checkpoint, "toy__1__2__0.002");
        assert_eq!(e.corpus, "toy");
        assert_eq!(e.batch_size, 2);
        assert!((e.auc - 0.75).abs() < 1e-12);
        assert!(AttackEntry::parse("garbage").is_none());
    }

    #[test]
    fn corpus_with_separator_in_its_name_is_not_stored() {
        let root = std::env::temp_dir().join(format!("whisper-trace-store-{}", std::process::id()));
        let store = ResourceStore::open(&root).unwrap();
        let corpus = Corpus::new("pets__v2", ["the cat sat"]);
        assert!(matches!(
            store.save_corpus(&corpus),
            Err(TraceError::Configuration(_))
        ));
        assert!(store.list_corpora().unwrap().is_empty());
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn timestamps_are_utc_calendar_dates() {
        assert_eq!(utc_timestamp(UNIX_EPOCH), "19700101000000");
        let t = UNIX_EPOCH + Duration::from_secs(1_709_210_096);
        assert_eq!(utc_timestamp(t), "20240229123456");
    }

    #[test]
    fn csv_fields_are_quoted_when_needed() {
        assert_eq!(csv_field("plain text"), "plain text");
        assert_eq!(csv_field("a, \"b\""), "\"a, \"\"b\"\"\"");
    }
}
