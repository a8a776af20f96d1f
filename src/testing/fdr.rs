//! Multiple testing correction

/// Benjamini-Hochberg adjusted p-values
/// R equivalent: p.adjust(p, method = "BH")
///
/// Non-finite p-values stay NaN and do not count towards the number of
/// tests, so each contrast or profile is adjusted over what was tested.
pub fn benjamini_hochberg(pvalues: &[f64]) -> Vec<f64> {
    let mut tested: Vec<usize> = (0..pvalues.len())
        .filter(|&i| pvalues[i].is_finite())
        .collect();
    let mut padj = vec![f64::NAN; pvalues.len()];
    let m = tested.len();
    if m == 0 {
        return padj;
    }

    tested.sort_by(|&a, &b| {
        pvalues[a]
            .partial_cmp(&pvalues[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    // step down from the largest p-value keeping a running minimum
    let mut running = 1.0f64;
    for (k, &i) in tested.iter().enumerate().rev() {
        let rank = (k + 1) as f64;
        running = running.min(pvalues[i] * m as f64 / rank);
        padj[i] = running;
    }
    padj
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bh_known_values() {
        // p.adjust(c(0.01, 0.04, 0.03, 0.02), "BH") = 0.04 0.04 0.04 0.04
        let padj = benjamini_hochberg(&[0.01, 0.04, 0.03, 0.02]);
        for adj in padj {
            assert!((adj - 0.04).abs() < 1e-12);
        }
    }

    #[test]
    fn test_bh_with_nan() {
        let padj = benjamini_hochberg(&[0.01, f64::NAN, 0.03, 0.02]);
        assert!((padj[0] - 0.03).abs() < 1e-12);
        assert!(padj[1].is_nan());
        assert!((padj[2] - 0.03).abs() < 1e-12);
        assert!((padj[3] - 0.03).abs() < 1e-12);
    }

    #[test]
    fn test_bh_monotone_and_capped() {
        let p = [0.001, 0.01, 0.05, 0.1, 0.9];
        let padj = benjamini_hochberg(&p);
        for w in padj.windows(2) {
            assert!(w[0] <= w[1]);
        }
        assert!(padj.iter().all(|&a| a <= 1.0));
        assert!(benjamini_hochberg(&[]).is_empty());
    }
}
