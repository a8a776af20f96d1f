//! Statistical utility functions shared across modules
//!
//! Quantiles, ranks and the polygamma functions (beyond statrs' digamma)
//! needed by the empirical Bayes variance prior. Sorting helpers treat NaN as equal so that callers
//! never panic on partially missing data; callers filter NaN first where it
//! matters.

use std::cmp::Ordering;

fn cmp_f64(a: &f64, b: &f64) -> Ordering {
    a.partial_cmp(b).unwrap_or(Ordering::Equal)
}

/// Arithmetic mean. Returns NaN for an empty slice.
pub fn mean(x: &[f64]) -> f64 {
    if x.is_empty() {
        return f64::NAN;
    }
    x.iter().sum::<f64>() / x.len() as f64
}

/// Sample variance with n - 1 denominator. Returns NaN for fewer than two values.
pub fn sample_variance(x: &[f64]) -> f64 {
    if x.len() < 2 {
        return f64::NAN;
    }
    let m = mean(x);
    x.iter().map(|&v| (v - m).powi(2)).sum::<f64>() / (x.len() - 1) as f64
}

/// Relative spread below which values count as identical
const CONSTANT_TOLERANCE: f64 = 1e-12;

/// Whether the values show no spread
///
/// True when every value equals the first, or when the sample SD is within
/// rounding of zero relative to the magnitude of the mean. Two-pass float
/// variance of repeated non-representable values such as 0.1 is ~1e-17, not 0.
pub fn is_constant(x: &[f64]) -> bool {
    let first = match x.first() {
        Some(&v) => v,
        None => return true,
    };
    if x.iter().all(|&v| v == first) {
        return true;
    }
    let sd = sample_variance(x).sqrt();
    sd.is_finite() && sd <= CONSTANT_TOLERANCE * mean(x).abs().max(1.0)
}

/// Median of the finite values in `x`. Returns NaN if none are finite.
pub fn median(x: &[f64]) -> f64 {
    let mut v: Vec<f64> = x.iter().copied().filter(|v| v.is_finite()).collect();
    if v.is_empty() {
        return f64::NAN;
    }
    v.sort_by(cmp_f64);
    let n = v.len();
    if n % 2 == 0 {
        (v[n / 2 - 1] + v[n / 2]) / 2.0
    } else {
        v[n / 2]
    }
}

/// Quantile with linear interpolation between order statistics
/// R equivalent: quantile(x, p, type = 7)
pub fn quantile(x: &[f64], p: f64) -> f64 {
    let mut v: Vec<f64> = x.iter().copied().filter(|v| v.is_finite()).collect();
    if v.is_empty() {
        return f64::NAN;
    }
    v.sort_by(cmp_f64);
    quantile_sorted(&v, p)
}

/// Type 7 quantile of an already sorted slice.
pub fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    if n == 1 {
        return sorted[0];
    }
    let h = (n - 1) as f64 * p.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(n - 1);
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Interquartile range (type 7 quantiles)
pub fn iqr(x: &[f64]) -> f64 {
    quantile(x, 0.75) - quantile(x, 0.25)
}

/// 1-based ranks with ties averaged
/// R equivalent: rank(x, ties.method = "average")
pub fn rank_average(x: &[f64]) -> Vec<f64> {
    let n = x.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| cmp_f64(&x[a], &x[b]));

    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && x[order[j + 1]] == x[order[i]] {
            j += 1;
        }
        // positions i..=j share the average of ranks i+1..=j+1
        let avg = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg;
        }
        i = j + 1;
    }
    ranks
}

/// Trigamma function, the derivative of digamma
/// R equivalent: trigamma()
pub fn trigamma(x: f64) -> f64 {
    if !x.is_finite() || x <= 0.0 {
        return f64::NAN;
    }
    let mut x = x;
    let mut acc = 0.0;
    while x < 6.0 {
        acc += 1.0 / (x * x);
        x += 1.0;
    }
    let x2 = 1.0 / (x * x);
    // asymptotic expansion in 1/x
    acc + 1.0 / x
        + x2 / 2.0
        + (x2 / x) * (1.0 / 6.0 - x2 * (1.0 / 30.0 - x2 * (1.0 / 42.0 - x2 / 30.0)))
}

/// Second derivative of digamma
/// R equivalent: psigamma(x, deriv = 2)
pub fn tetragamma(x: f64) -> f64 {
    if !x.is_finite() || x <= 0.0 {
        return f64::NAN;
    }
    let mut x = x;
    let mut acc = 0.0;
    while x < 6.0 {
        acc -= 2.0 / (x * x * x);
        x += 1.0;
    }
    let x2 = 1.0 / (x * x);
    acc - x2
        - x2 / x
        - x2 * x2 / 2.0
        + x2 * x2 * x2 * (1.0 / 6.0 - x2 * (1.0 / 6.0 - x2 * 3.0 / 10.0))
}

/// Solve trigamma(x) = y for x > 0 by Newton iteration
/// R equivalent: limma::trigammaInverse()
pub fn trigamma_inverse(y: f64) -> f64 {
    if !y.is_finite() || y <= 0.0 {
        return f64::NAN;
    }
    if y > 1e7 {
        return 1.0 / y.sqrt();
    }
    if y < 1e-6 {
        return 1.0 / y;
    }

    let mut x = 0.5 + 1.0 / y;
    for _ in 0..50 {
        let tri = trigamma(x);
        let dif = tri * (1.0 - tri / y) / tetragamma(x);
        x += dif;
        if -dif / x < 1e-8 {
            break;
        }
    }
    x
}
