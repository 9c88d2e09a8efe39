//! Loss-threshold membership inference.
//!
//! Members of the training split should receive a lower loss than held-out
//! sentences. The engine measures how well that separates the two known
//! splits (ROC-AUC), fixes a loss cutoff from the ROC curve, and labels
//! sentences against it.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::checkpoint::Checkpoint;
use crate::config::AttackConfig;
use crate::error::{TraceError, TraceResult};
use crate::scorer::LossScorer;

/// Loss ceiling of the fixed-range rescaling used by [`Normalization::Linear`]
/// when no other value is configured.
pub const LEGACY_MAX_LOSS: f64 = 17.0;

/// How the member/non-member loss cutoff is chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub enum ThresholdRule {
    /// The ROC threshold maximising `tpr − fpr` (Youden's J); the lowest such
    /// loss wins ties.
    #[default]
    Youden,
    /// Halfway between the member median and the non-member median.
    MedianMidpoint,
    /// A caller-supplied loss.
    Fixed(f64),
}

/// How a loss is rescaled into a display score in `[0, 1]` (higher means
/// more member-like).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub enum Normalization {
    /// `(max − loss) / (max − min)` over the losses of both known splits.
    #[default]
    MinMax,
    /// `σ((threshold − loss) / std)` with the pooled standard deviation.
    Logistic,
    /// `1 − loss / max_loss`.
    Linear {
        /// Loss that maps to a score of 0.
        max_loss: f64,
    },
}

/// One point of the ROC curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RocPoint {
    /// Sentences with `loss <= threshold` are called members. `None` marks the
    /// origin, where nothing is.
    pub threshold: Option<f64>,
    /// Fraction of members called members.
    pub tpr: f64,
    /// Fraction of non-members called members.
    pub fpr: f64,
}

fn check_sizes(members: &[f64], non_members: &[f64]) -> TraceResult<()> {
    if members.is_empty() || non_members.is_empty() {
        return Err(TraceError::InsufficientData {
            members: members.len(),
            non_members: non_members.len(),
        });
    }
    Ok(())
}

/// Labelled losses sorted ascending (`true` = member).
fn pooled(members: &[f64], non_members: &[f64]) -> Vec<(f64, bool)> {
    let mut all: Vec<(f64, bool)> = members
        .iter()
        .map(|&l| (l, true))
        .chain(non_members.iter().map(|&l| (l, false)))
        .collect();
    all.sort_by(|a, b| a.0.total_cmp(&b.0));
    all
}

/// Sweeps every distinct loss as a cutoff, lowest first.
///
/// The curve starts at the origin and ends at `(1, 1)`; tied losses move both
/// rates in a single step.
pub fn roc_curve(members: &[f64], non_members: &[f64]) -> TraceResult<Vec<RocPoint>> {
    check_sizes(members, non_members)?;
    let (p, n) = (members.len() as f64, non_members.len() as f64);
    let all = pooled(members, non_members);

    let mut curve = vec![RocPoint {
        threshold: None,
        tpr: 0.0,
        fpr: 0.0,
    }];
    let (mut tp, mut fp) = (0usize, 0usize);
    let mut i = 0;
    while i < all.len() {
        let loss = all[i].0;
        while i < all.len() && all[i].0.total_cmp(&loss) == Ordering::Equal {
            if all[i].1 {
                tp += 1;
            } else {
                fp += 1;
            }
            i += 1;
        }
        curve.push(RocPoint {
            threshold: Some(loss),
            tpr: tp as f64 / p,
            fpr: fp as f64 / n,
        });
    }
    Ok(curve)
}

/// Area under a ROC curve by the trapezoid rule.
#[must_use]
pub fn auc_trapezoid(curve: &[RocPoint]) -> f64 {
    curve
        .windows(2)
        .map(|w| (w[1].fpr - w[0].fpr) * (w[0].tpr + w[1].tpr) / 2.0)
        .sum()
}

/// ROC-AUC from the Mann-Whitney U statistic: the probability that a random
/// member has a lower loss than a random non-member, ties counting half.
pub fn auc_rank(members: &[f64], non_members: &[f64]) -> TraceResult<f64> {
    check_sizes(members, non_members)?;
    let all = pooled(members, non_members);
    let total = all.len() as f64;

    // Rank by descending loss; tied groups share their mid-rank.
    let mut member_rank_sum = 0.0;
    let mut i = 0;
    while i < all.len() {
        let mut j = i;
        while j < all.len() && all[j].0.total_cmp(&all[i].0) == Ordering::Equal {
            j += 1;
        }
        let ascending_mid = (i + 1 + j) as f64 / 2.0;
        let rank = total + 1.0 - ascending_mid;
        member_rank_sum += rank * all[i..j].iter().filter(|(_, m)| *m).count() as f64;
        i = j;
    }

    let (p, n) = (members.len() as f64, non_members.len() as f64);
    let u = member_rank_sum - p * (p + 1.0) / 2.0;
    Ok(u / (p * n))
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Everything learned from the two labelled splits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// ROC-AUC of the loss attack.
    pub auc: f64,
    /// Loss cutoff: `loss <= threshold` is a member verdict.
    pub threshold: f64,
    /// The full ROC curve.
    pub roc: Vec<RocPoint>,
    min_loss: f64,
    max_loss: f64,
    spread: f64,
    normalization: Normalization,
}

impl Calibration {
    /// Fits AUC, cutoff and score scale to labelled losses.
    pub fn fit(
        members: &[f64],
        non_members: &[f64],
        rule: ThresholdRule,
        normalization: Normalization,
    ) -> TraceResult<Self> {
        let roc = roc_curve(members, non_members)?;
        let auc = auc_rank(members, non_members)?;
        let threshold = match rule {
            ThresholdRule::Youden => roc
                .iter()
                .filter_map(|pt| pt.threshold.map(|t| (t, pt.tpr - pt.fpr)))
                .fold(None, |best: Option<(f64, f64)>, (t, j)| match best {
                    Some((_, best_j)) if best_j >= j => best,
                    _ => Some((t, j)),
                })
                .map_or(f64::INFINITY, |(t, _)| t),
            ThresholdRule::MedianMidpoint => (median(members) + median(non_members)) / 2.0,
            ThresholdRule::Fixed(t) => t,
        };

        let pool = || members.iter().chain(non_members);
        let count = (members.len() + non_members.len()) as f64;
        let min_loss = pool().copied().fold(f64::INFINITY, f64::min);
        let max_loss = pool().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = pool().sum::<f64>() / count;
        let spread = (pool().map(|l| (l - mean).powi(2)).sum::<f64>() / count).sqrt();

        Ok(Self {
            auc,
            threshold,
            roc,
            min_loss,
            max_loss,
            spread,
            normalization,
        })
    }

    /// Membership verdict for a loss.
    #[must_use]
    pub fn classify(&self, loss: f64) -> bool {
        loss <= self.threshold
    }

    /// Display score in `[0, 1]`; higher is more member-like.
    #[must_use]
    pub fn normalize(&self, loss: f64) -> f64 {
        let score = match self.normalization {
            Normalization::MinMax => {
                let range = self.max_loss - self.min_loss;
                if range > 0.0 {
                    (self.max_loss - loss) / range
                } else {
                    0.5
                }
            }
            Normalization::Logistic => {
                let scale = if self.spread > 0.0 { self.spread } else { 1.0 };
                1.0 / (1.0 + (-(self.threshold - loss) / scale).exp())
            }
            Normalization::Linear { max_loss } => 1.0 - loss / max_loss,
        };
        if score.is_nan() {
            0.0
        } else {
            score.clamp(0.0, 1.0)
        }
    }
}

/// Verdict for one sentence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentenceRecord {
    /// The sentence as given.
    pub content: String,
    /// Mean per-token negative log-likelihood.
    pub loss: f64,
    /// Loss rescaled to `[0, 1]`, higher is more member-like.
    pub normalized_score: f64,
    /// Whether the loss falls at or under the cutoff.
    pub is_member: bool,
}

/// Outcome of one attack run. Built once, never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiaResult {
    /// Checkpoint that was attacked.
    pub checkpoint: String,
    /// Corpus that supplied the labelled splits.
    pub corpus: String,
    /// Scoring batch size.
    pub batch_size: usize,
    /// ROC-AUC over the labelled splits.
    pub auc: f64,
    /// Loss cutoff used for the verdicts.
    pub threshold: f64,
    /// Rule that produced the cutoff.
    pub threshold_rule: ThresholdRule,
    /// Rescaling behind `normalized_score`.
    pub normalization: Normalization,
    /// Size of the member split.
    pub members: usize,
    /// Size of the held-out split.
    pub non_members: usize,
    /// ROC curve over the labelled splits.
    pub roc: Vec<RocPoint>,
    /// One verdict per classified sentence.
    pub sentences: Vec<SentenceRecord>,
}

/// Runs loss-threshold attacks against checkpoints.
#[derive(Debug, Clone, Copy, Default)]
pub struct MiaEngine {
    config: AttackConfig,
}

impl MiaEngine {
    /// Validates `config` and wraps it.
    pub fn new(config: AttackConfig) -> TraceResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &AttackConfig {
        &self.config
    }

    /// Fits a [`Calibration`] to already computed losses.
    pub fn calibrate(&self, members: &[f64], non_members: &[f64]) -> TraceResult<Calibration> {
        Calibration::fit(
            members,
            non_members,
            self.config.threshold_rule,
            self.config.normalization,
        )
    }

    /// Attacks `checkpoint` using `members` (sentences it was trained on) and
    /// `non_members` (held out) as labelled evidence.
    ///
    /// Classifies `custom` when given, otherwise every member followed by
    /// every non-member.
    pub fn run(
        &self,
        checkpoint: &Checkpoint,
        corpus: &str,
        members: &[String],
        non_members: &[String],
        custom: Option<&[String]>,
    ) -> TraceResult<MiaResult> {
        if members.is_empty() || non_members.is_empty() {
            return Err(TraceError::InsufficientData {
                members: members.len(),
                non_members: non_members.len(),
            });
        }
        let batch_size = self.config.batch_size;
        let scorer = LossScorer::from_checkpoint(checkpoint);
        let member_losses = scorer.score_sentences(corpus, members, batch_size)?;
        let non_member_losses = scorer.score_sentences(corpus, non_members, batch_size)?;
        let calibration = self.calibrate(&member_losses, &non_member_losses)?;

        let (pool, losses): (Vec<&String>, Vec<f64>) = match custom {
            Some(sentences) if !sentences.is_empty() => (
                sentences.iter().collect(),
                scorer.score_sentences("custom input", sentences, batch_size)?,
            ),
            _ => (
                members.iter().chain(non_members).collect(),
                member_losses.iter().chain(&non_member_losses).copied().collect(),
            ),
        };
        let sentences: Vec<SentenceRecord> = pool
            .into_iter()
            .zip(losses)
            .map(|(content, loss)| SentenceRecord {
                content: content.clone(),
                loss,
                normalized_score: calibration.normalize(loss),
                is_member: calibration.classify(loss),
            })
            .collect();

        tracing::info!(
            checkpoint = checkpoint.name(),
            corpus,
            auc = calibration.auc,
            threshold = calibration.threshold,
            classified = sentences.len(),
            "membership inference finished"
        );
        Ok(MiaResult {
            checkpoint: checkpoint.name().to_string(),
            corpus: corpus.to_string(),
            batch_size,
            auc: calibration.auc,
            threshold: calibration.threshold,
            threshold_rule: self.config.threshold_rule,
            normalization: self.config.normalization,
            members: members.len(),
            non_members: non_members.len(),
            roc: calibration.roc,
            sentences,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn both_aucs(members: &[f64], non_members: &[f64]) -> (f64, f64) {
        let rank = auc_rank(members, non_members).unwrap();
        let trap = auc_trapezoid(&roc_curve(members, non_members).unwrap());
        (rank, trap)
    }

    #[test]
    fn rank_and_trapezoid_agree_with_ties() {
        let (rank, trap) = both_aucs(&[1.0, 2.0, 2.0, 3.0], &[2.0, 4.0, 5.0]);
        assert!((rank - 10.0 / 12.0).abs() < 1e-12);
        assert!((rank - trap).abs() < 1e-9);
    }

    #[test]
    fn separation_extremes() {
        assert_eq!(both_aucs(&[0.1, 0.2], &[3.0, 4.0]), (1.0, 1.0));
        assert_eq!(both_aucs(&[3.0, 4.0], &[0.1, 0.2]), (0.0, 0.0));
        let (rank, trap) = both_aucs(&[1.0, 1.0], &[1.0, 1.0, 1.0]);
        assert!((rank - 0.5).abs() < 1e-12 && (trap - 0.5).abs() < 1e-12);
    }

    #[test]
    fn identical_distributions_give_chance_auc() {
        let mut rng = StdRng::seed_from_u64(17);
        let members: Vec<f64> = (0..2000).map(|_| rng.gen_range(2.0..6.0)).collect();
        let non_members: Vec<f64> = (0..2000).map(|_| rng.gen_range(2.0..6.0)).collect();
        let (rank, trap) = both_aucs(&members, &non_members);
        assert!((rank - 0.5).abs() < 0.05, "auc {rank}");
        assert!((rank - trap).abs() < 1e-9);
    }

    #[test]
    fn empty_split_is_insufficient() {
        assert!(matches!(
            auc_rank(&[], &[1.0]),
            Err(TraceError::InsufficientData {
                members: 0,
                non_members: 1
            })
        ));
        assert!(roc_curve(&[1.0], &[]).is_err());
    }

    #[test]
    fn roc_curve_spans_origin_to_corner() {
        let curve = roc_curve(&[1.0, 2.0], &[2.0, 3.0]).unwrap();
        assert_eq!(curve.first().unwrap().threshold, None);
        let last = curve.last().unwrap();
        assert_eq!((last.tpr, last.fpr), (1.0, 1.0));
        assert_eq!(curve.len(), 4);
    }

    #[test]
    fn youden_cutoff_sits_at_the_gap() {
        let c = Calibration::fit(
            &[1.0, 1.5, 2.0],
            &[3.0, 4.0],
            ThresholdRule::Youden,
            Normalization::MinMax,
        )
        .unwrap();
        assert_eq!(c.threshold, 2.0);
        assert!(c.classify(2.0) && !c.classify(2.5));
    }

    #[test]
    fn median_midpoint_and_fixed_rules() {
        let members = [1.0, 2.0];
        let non_members = [3.0, 4.0, 5.0];
        let mid = Calibration::fit(
            &members,
            &non_members,
            ThresholdRule::MedianMidpoint,
            Normalization::MinMax,
        )
        .unwrap();
        assert!((mid.threshold - 2.75).abs() < 1e-12);
        let fixed = Calibration::fit(
            &members,
            &non_members,
            ThresholdRule::Fixed(0.5),
            Normalization::MinMax,
        )
        .unwrap();
        assert_eq!(fixed.threshold, 0.5);
        assert!(!fixed.classify(1.0));
    }

    #[test]
    fn normalized_scores_stay_in_unit_interval() {
        for norm in [
            Normalization::MinMax,
            Normalization::Logistic,
            Normalization::Linear {
                max_loss: LEGACY_MAX_LOSS,
            },
        ] {
            let c = Calibration::fit(&[1.0, 2.0], &[3.0, 4.0], ThresholdRule::Youden, norm).unwrap();
            let mut last = f64::INFINITY;
            for loss in [-5.0, 0.0, 1.0, 2.5, 4.0, 30.0] {
                let s = c.normalize(loss);
                assert!((0.0..=1.0).contains(&s), "{norm:?} gave {s}");
                assert!(s <= last, "{norm:?} is not monotone");
                last = s;
            }
        }
    }

    #[test]
    fn degenerate_range_scores_one_half() {
        let c = Calibration::fit(&[2.0], &[2.0], ThresholdRule::Youden, Normalization::MinMax).unwrap();
        assert_eq!(c.normalize(2.0), 0.5);
    }
}
