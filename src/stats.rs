//! Descriptive statistics, correlation coefficients and p-value corrections.

use std::cmp::Ordering;

use serde::Serialize;
use statrs::distribution::{ContinuousCDF, StudentsT};

// ------------------------------------------------------------------
// Moments
// ------------------------------------------------------------------

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation (divides by n).
pub fn std_population(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    var.max(0.0).sqrt()
}

/// Standard scores against the slice's own mean and population deviation.
/// A constant slice maps to all zeros.
pub fn z_scores(values: &[f64]) -> Vec<f64> {
    let m = mean(values);
    let sd = std_population(values);
    if sd <= f64::EPSILON {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v - m) / sd).collect()
}

/// Linear-interpolated percentile (`q` in [0, 100]) of an ascending slice.
pub fn percentile_sorted(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let rank = (q.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            let frac = rank - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}

// ------------------------------------------------------------------
// Correlation
// ------------------------------------------------------------------

/// Pearson product-moment correlation. `None` when either side is constant
/// or the slices are shorter than two.
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len();
    if n != y.len() || n < 2 {
        return None;
    }
    let mean_x = mean(x);
    let mean_y = mean(y);

    let mut num = 0.0;
    let mut den_x = 0.0;
    let mut den_y = 0.0;
    for i in 0..n {
        let dx = x[i] - mean_x;
        let dy = y[i] - mean_y;
        num += dx * dy;
        den_x += dx * dx;
        den_y += dy * dy;
    }

    if den_x <= 0.0 || den_y <= 0.0 {
        return None;
    }
    Some((num / (den_x.sqrt() * den_y.sqrt())).clamp(-1.0, 1.0))
}

/// Spearman rank correlation (Pearson over average ranks).
pub fn spearman(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    pearson(&ranks_with_ties(x), &ranks_with_ties(y))
}

/// Zero-based ranks; tied values share their average rank.
pub fn ranks_with_ties(scores: &[f64]) -> Vec<f64> {
    let n = scores.len();
    let mut indices: Vec<usize> = (0..n).collect();
    indices.sort_by(|&a, &b| scores[a].partial_cmp(&scores[b]).unwrap_or(Ordering::Equal));

    let mut ranks = vec![0.0; n];
    let mut i = 0usize;
    while i < n {
        let score = scores[indices[i]];
        let mut j = i + 1;
        while j < n && scores[indices[j]] == score {
            j += 1;
        }
        let avg_rank = (i + j - 1) as f64 / 2.0;
        for &idx in &indices[i..j] {
            ranks[idx] = avg_rank;
        }
        i = j;
    }

    ranks
}

/// Two-sided p-value for a correlation coefficient via the t approximation
/// with `n - 2` degrees of freedom.
pub fn correlation_p_value(r: f64, n: usize) -> f64 {
    if n < 3 || !r.is_finite() {
        return 1.0;
    }
    let df = (n - 2) as f64;
    let denom = 1.0 - r * r;
    if denom <= 1e-15 {
        return 0.0;
    }
    let t = r * (df / denom).sqrt();
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => (2.0 * (1.0 - dist.cdf(t.abs()))).clamp(0.0, 1.0),
        Err(_) => 1.0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CorrelationStats {
    pub pearson_r: f64,
    pub pearson_p: f64,
    pub spearman_r: f64,
    pub spearman_p: f64,
    pub n: usize,
}

/// Pearson and Spearman coefficients with parametric p-values.
pub fn correlation_stats(x: &[f64], y: &[f64]) -> Option<CorrelationStats> {
    let n = x.len();
    let pearson_r = pearson(x, y)?;
    let spearman_r = spearman(x, y)?;
    Some(CorrelationStats {
        pearson_r,
        pearson_p: correlation_p_value(pearson_r, n),
        spearman_r,
        spearman_p: correlation_p_value(spearman_r, n),
        n,
    })
}

// ------------------------------------------------------------------
// Multiple-comparison correction
// ------------------------------------------------------------------

/// Bonferroni-adjusted p-values, capped at 1.
pub fn bonferroni(p_values: &[f64]) -> Vec<f64> {
    let m = p_values.len() as f64;
    p_values.iter().map(|p| (p * m).min(1.0)).collect()
}

/// Benjamini-Hochberg adjusted p-values (q-values), in input order.
pub fn benjamini_hochberg(p_values: &[f64]) -> Vec<f64> {
    let m = p_values.len();
    if m == 0 {
        return Vec::new();
    }
    let mut order: Vec<usize> = (0..m).collect();
    order.sort_by(|&a, &b| {
        p_values[a]
            .partial_cmp(&p_values[b])
            .unwrap_or(Ordering::Equal)
    });

    let mut adjusted = vec![1.0; m];
    let mut running_min = 1.0f64;
    for (rank, &idx) in order.iter().enumerate().rev() {
        let q = p_values[idx] * m as f64 / (rank + 1) as f64;
        running_min = running_min.min(q);
        adjusted[idx] = running_min.min(1.0);
    }
    adjusted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranks_average_ties() {
        assert_eq!(ranks_with_ties(&[3.0, 1.0, 3.0, 2.0]), vec![2.5, 0.0, 2.5, 1.0]);
    }

    #[test]
    fn pearson_detects_perfect_and_constant_inputs() {
        let x = [1.0, 2.0, 3.0, 4.0];
        assert!((pearson(&x, &[2.0, 4.0, 6.0, 8.0]).unwrap() - 1.0).abs() < 1e-12);
        assert!((pearson(&x, &[8.0, 6.0, 4.0, 2.0]).unwrap() + 1.0).abs() < 1e-12);
        assert_eq!(pearson(&x, &[1.0, 1.0, 1.0, 1.0]), None);
    }

    #[test]
    fn spearman_is_rank_based() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [1.0, 4.0, 9.0, 16.0, 100.0];
        assert!((spearman(&x, &y).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn p_value_matches_known_t_distribution_point() {
        // r = 0.5, n = 12 -> t = 1.8257, df = 10 -> two-sided p ~ 0.0979
        let p = correlation_p_value(0.5, 12);
        assert!((p - 0.0979).abs() < 1e-3, "p = {p}");
        assert_eq!(correlation_p_value(1.0, 12), 0.0);
        assert_eq!(correlation_p_value(0.3, 2), 1.0);
    }

    #[test]
    fn percentile_interpolates() {
        let sorted = [0.0, 1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile_sorted(&sorted, 50.0), 2.0);
        assert!((percentile_sorted(&sorted, 2.5) - 0.1).abs() < 1e-12);
        assert_eq!(percentile_sorted(&sorted, 100.0), 4.0);
    }

    #[test]
    fn corrections_match_reference_values() {
        let p = [0.01, 0.04, 0.03, 0.20];
        assert_eq!(bonferroni(&p), vec![0.04, 0.16, 0.12, 0.80]);
        let q = benjamini_hochberg(&p);
        let expected = [0.04, 0.0533333333, 0.0533333333, 0.20];
        for (got, want) in q.iter().zip(expected.iter()) {
            assert!((got - want).abs() < 1e-6, "{got} vs {want}");
        }
    }

    #[test]
    fn z_scores_of_constant_slice_are_zero() {
        assert_eq!(z_scores(&[2.0, 2.0, 2.0]), vec![0.0, 0.0, 0.0]);
        let z = z_scores(&[1.0, 3.0]);
        assert!((z[0] + 1.0).abs() < 1e-12 && (z[1] - 1.0).abs() < 1e-12);
    }
}
