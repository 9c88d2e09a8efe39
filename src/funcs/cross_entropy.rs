/// Writes the normalized-exponential of `logits` into `out`.
pub fn softmax_into(logits: &[f32], out: &mut [f32]) {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut total = 0.0f32;
    for (o, &z) in out.iter_mut().zip(logits) {
        *o = (z - max).exp();
        total += *o;
    }
    out.iter_mut().for_each(|o| *o /= total);
}

fn log_sum_exp(logits: &[f32]) -> f64 {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let max = f64::from(max);
    let total: f64 = logits.iter().map(|&z| (f64::from(z) - max).exp()).sum();
    max + total.ln()
}

/// Running masked cross-entropy: only positions explicitly added count, so
/// padding contributes to neither the sum nor the position count.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CrossEntropy {
    sum: f64,
    count: usize,
}

impl CrossEntropy {
    /// Adds one prediction position and returns its negative log-likelihood.
    pub fn add(&mut self, logits: &[f32], target: usize) -> f64 {
        let nll = log_sum_exp(logits) - f64::from(logits[target]);
        self.sum += nll;
        self.count += 1;
        nll
    }

    /// Folds another accumulator into this one.
    pub fn merge(&mut self, other: Self) {
        self.sum += other.sum;
        self.count += other.count;
    }

    /// Total negative log-likelihood so far.
    #[must_use]
    pub const fn sum(&self) -> f64 {
        self.sum
    }

    /// Number of prediction positions so far.
    #[must_use]
    pub const fn count(&self) -> usize {
        self.count
    }

    /// Mean loss, or `None` when no position was added.
    #[must_use]
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_logits_give_log_vocab_loss() {
        let mut ce = CrossEntropy::default();
        let nll = ce.add(&[0.0; 4], 2);
        assert!((nll - 4f64.ln()).abs() < 1e-9);
        assert_eq!(ce.count(), 1);
    }

    #[test]
    fn empty_accumulator_has_no_mean() {
        assert_eq!(CrossEntropy::default().mean(), None);
    }

    #[test]
    fn softmax_sums_to_one_and_matches_the_loss() {
        let logits = [1.0, -2.0, 0.5, 3.0];
        let mut probs = [0.0; 4];
        softmax_into(&logits, &mut probs);
        let total: f32 = probs.iter().sum();
        assert!((total - 1.0).abs() < 1e-6);
        for (target, p) in probs.iter().enumerate() {
            let nll = CrossEntropy::default().add(&logits, target);
            assert!((-f64::from(*p).ln() - nll).abs() < 1e-5);
        }
    }

    #[test]
    fn large_logits_stay_finite() {
        let mut ce = CrossEntropy::default();
        let nll = ce.add(&[1000.0, -1000.0], 1);
        assert!(nll.is_finite());
        assert!((nll - 2000.0).abs() < 1e-6);
    }
}
