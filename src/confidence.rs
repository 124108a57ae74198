use thiserror::Error;

const P_VALUE_EPSILON: f64 = 1e-12;
const P_SATURATION_LOG10: f64 = 6.0;
const SAMPLE_SCALE: f64 = 100.0;
const EFFECT_SCALE: f64 = 0.5;
const FRESHNESS_SCALE_DAYS: f64 = 365.0;

#[derive(Debug, Error, PartialEq)]
pub enum WeightsError {
    #[error("score weight '{name}' must be a non-negative number, got {value}")]
    Invalid { name: &'static str, value: f64 },
    #[error("score weights must sum to 1.0, got {0:.4}")]
    BadTotal(f64),
}

/// Linear weights applied to the four confidence sub-scores.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    pub n: f64,
    pub p: f64,
    pub e: f64,
    pub freshness: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            n: 0.25,
            p: 0.25,
            e: 0.30,
            freshness: 0.20,
        }
    }
}

impl ScoreWeights {
    pub fn validate(self) -> Result<Self, WeightsError> {
        for (name, value) in [
            ("n", self.n),
            ("p", self.p),
            ("e", self.e),
            ("freshness", self.freshness),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(WeightsError::Invalid { name, value });
            }
        }

        let total = self.n + self.p + self.e + self.freshness;
        if (total - 1.0).abs() > 1e-6 {
            return Err(WeightsError::BadTotal(total));
        }
        Ok(self)
    }

    /// Combines sample size, p-value, effect size and data age into a score
    /// in [0, 1], rounded to 3 decimals. Never panics and never returns NaN.
    pub fn score(&self, n: f64, p_value: f64, effect_size: f64, freshness_days: f64) -> f64 {
        let score = self.n * n_score(n)
            + self.p * p_score(p_value)
            + self.e * e_score(effect_size)
            + self.freshness * freshness_score(freshness_days);
        round_to(score.clamp(0.0, 1.0), 3)
    }
}

/// Confidence with the default weight table.
pub fn compute_confidence(n: f64, p_value: f64, effect_size: f64, freshness_days: f64) -> f64 {
    ScoreWeights::default().score(n, p_value, effect_size, freshness_days)
}

fn n_score(n: f64) -> f64 {
    if n.is_nan() {
        return 0.0;
    }
    (1.0 - (-n / SAMPLE_SCALE).exp()).clamp(0.0, 1.0)
}

fn p_score(p_value: f64) -> f64 {
    if p_value.is_nan() {
        return 0.0;
    }
    // log10 of a non-positive argument is NaN/-inf; clamp keeps it bounded
    let evidence = -(p_value.max(0.0) + P_VALUE_EPSILON).log10() / P_SATURATION_LOG10;
    evidence.clamp(0.0, 1.0)
}

fn e_score(effect_size: f64) -> f64 {
    if effect_size.is_nan() {
        return 0.0;
    }
    (1.0 - (-effect_size.abs() / EFFECT_SCALE).exp()).clamp(0.0, 1.0)
}

fn freshness_score(freshness_days: f64) -> f64 {
    if freshness_days.is_nan() {
        return 0.0;
    }
    (-freshness_days / FRESHNESS_SCALE_DAYS).exp().clamp(0.0, 1.0)
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

pub fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Bessel-corrected variance. NaN for fewer than two values.
pub fn sample_variance(values: &[f64]) -> f64 {
    let m = mean(values);
    let squares: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    squares / (values.len() as f64 - 1.0)
}

/// Cohen's d using the pooled standard deviation. Positive when `a` has the
/// larger mean. Returns 0.0 for samples shorter than two and for zero spread.
pub fn cohen_d(a: &[f64], b: &[f64]) -> f64 {
    let (na, nb) = (a.len(), b.len());
    if na < 2 || nb < 2 {
        return 0.0;
    }

    let pooled_var = ((na - 1) as f64 * sample_variance(a) + (nb - 1) as f64 * sample_variance(b))
        / (na + nb - 2) as f64;
    let pooled_sd = pooled_var.sqrt();
    if pooled_sd == 0.0 || !pooled_sd.is_finite() {
        return 0.0;
    }

    (mean(a) - mean(b)) / pooled_sd
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn saturated_inputs_score_high() {
        let score = compute_confidence(400.0, 1e-6, 0.5, 0.0);
        // 0.25*0.982 + 0.25*1.0 + 0.30*0.632 + 0.20*1.0
        assert_eq!(score, 0.885);
    }

    #[test]
    fn empty_evidence_scores_near_zero() {
        let score = compute_confidence(0.0, 1.0, 0.0, 3650.0);
        assert!(score.abs() < 0.01, "score was {score}");
    }

    #[test]
    fn degenerate_inputs_stay_bounded() {
        for (n, p, d, f) in [
            (0.0, 0.0, 0.0, 0.0),
            (0.0, -1.0, 0.0, 0.0),
            (f64::NAN, f64::NAN, f64::NAN, f64::NAN),
            (f64::INFINITY, 0.0, f64::INFINITY, 0.0),
            (1e12, 1e-300, -1e12, 1e12),
            (-50.0, 2.0, 0.0, -400.0),
        ] {
            let score = compute_confidence(n, p, d, f);
            assert!((0.0..=1.0).contains(&score), "{n} {p} {d} {f} -> {score}");
        }
    }

    #[test]
    fn zero_p_value_is_maximally_significant() {
        assert_eq!(p_score(0.0), 1.0);
        assert_eq!(p_score(1.0), 0.0);
    }

    #[test]
    fn custom_weights_change_the_mix() {
        let weights = ScoreWeights {
            n: 0.0,
            p: 0.0,
            e: 0.0,
            freshness: 1.0,
        };
        assert_eq!(weights.score(0.0, 1.0, 0.0, 0.0), 1.0);
        assert_eq!(weights.score(0.0, 1.0, 0.0, 365.0), 0.368);
    }

    #[test]
    fn weights_must_sum_to_one() {
        assert!(ScoreWeights::default().validate().is_ok());
        let skewed = ScoreWeights {
            n: 0.5,
            ..ScoreWeights::default()
        };
        assert!(matches!(skewed.validate(), Err(WeightsError::BadTotal(_))));
        let negative = ScoreWeights {
            n: -0.25,
            p: 0.75,
            ..ScoreWeights::default()
        };
        assert!(matches!(
            negative.validate(),
            Err(WeightsError::Invalid { name: "n", .. })
        ));
    }

    #[test]
    fn separated_samples_have_large_effect() {
        let d = cohen_d(&[4.5, 4.6, 4.7, 4.8], &[3.0, 3.1, 3.2, 3.3]);
        assert!(d > 1.0, "d was {d}");
        let reversed = cohen_d(&[3.0, 3.1, 3.2, 3.3], &[4.5, 4.6, 4.7, 4.8]);
        assert!((d + reversed).abs() < 1e-12);
    }

    #[test]
    fn short_samples_have_no_effect() {
        assert_eq!(cohen_d(&[], &[1.0, 2.0]), 0.0);
        assert_eq!(cohen_d(&[4.0], &[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(cohen_d(&[1.0, 2.0], &[5.0]), 0.0);
    }

    #[test]
    fn zero_spread_has_no_effect() {
        assert_eq!(cohen_d(&[4.0, 4.0, 4.0], &[4.0, 4.0]), 0.0);
        assert_eq!(cohen_d(&[4.0, 4.0], &[2.0, 2.0]), 0.0);
    }

    #[test]
    fn variance_uses_bessel_correction() {
        assert!((sample_variance(&[1.0, 2.0, 3.0, 4.0]) - 1.666_666_666).abs() < 1e-6);
        assert!(sample_variance(&[1.0]).is_nan());
    }

    proptest! {
        #[test]
        fn score_is_bounded_and_repeatable(
            n in 0.0f64..10_000.0,
            p in 1e-300f64..=1.0,
            d in -20.0f64..20.0,
            f in 0.0f64..100_000.0,
        ) {
            let first = compute_confidence(n, p, d, f);
            prop_assert!((0.0..=1.0).contains(&first));
            prop_assert_eq!(first, compute_confidence(n, p, d, f));
        }

        #[test]
        fn score_grows_with_sample_size(n in 0.0f64..5_000.0, extra in 0.0f64..5_000.0) {
            prop_assert!(compute_confidence(n + extra, 0.05, 0.3, 30.0) >= compute_confidence(n, 0.05, 0.3, 30.0));
        }

        #[test]
        fn score_shrinks_with_p_value(p in 1e-12f64..=1.0, q in 1e-12f64..=1.0) {
            let (low, high) = if p <= q { (p, q) } else { (q, p) };
            prop_assert!(compute_confidence(120.0, high, 0.3, 30.0) <= compute_confidence(120.0, low, 0.3, 30.0));
        }

        #[test]
        fn score_grows_with_effect_magnitude(d in -10.0f64..10.0, extra in 0.0f64..10.0) {
            let larger = d.abs() + extra;
            prop_assert!(compute_confidence(120.0, 0.05, larger, 30.0) >= compute_confidence(120.0, 0.05, d, 30.0));
            prop_assert!(compute_confidence(120.0, 0.05, -larger, 30.0) >= compute_confidence(120.0, 0.05, d, 30.0));
        }

        #[test]
        fn score_shrinks_with_age(days in 0.0f64..10_000.0, extra in 0.0f64..10_000.0) {
            prop_assert!(compute_confidence(120.0, 0.05, 0.3, days + extra) <= compute_confidence(120.0, 0.05, 0.3, days));
        }
    }
}
