//! Trimmed mean of M-values (TMM) and log counts per million for RNA-seq
//!
//! R equivalent: edgeR::calcNormFactors(method = "TMM") followed by
//! edgeR::cpm(y, log = TRUE, prior.count = 2)

use ndarray::{Array2, ArrayView1, Axis};
use rayon::prelude::*;

use crate::config::{RnaSeqParams, TmmParams};
use crate::data::{CountMatrix, ExpressionMatrix};
use crate::error::{PipelineError, Result};
use crate::stats::{mean, quantile, rank_average};

/// TMM normalization factors, one per sample, scaled to a geometric mean of 1
///
/// Genes with zero counts in every sample are ignored. The reference sample
/// is the one whose upper-quartile proportion is closest to the mean
/// upper-quartile proportion.
pub fn tmm_factors(counts: &CountMatrix, params: &TmmParams) -> Result<Vec<f64>> {
    let n_samples = counts.n_samples();
    if counts.n_genes() == 0 || n_samples == 0 {
        return Err(PipelineError::EmptyData {
            reason: "Count matrix is empty".to_string(),
        });
    }

    let lib_sizes = counts.library_sizes();
    if let Some(j) = lib_sizes.iter().position(|&l| l <= 0.0) {
        return Err(PipelineError::NormalizationFailed {
            reason: format!("sample '{}' has a library size of zero", counts.sample_ids()[j]),
        });
    }

    let keep: Vec<usize> = counts
        .counts()
        .axis_iter(Axis(0))
        .enumerate()
        .filter(|(_, row)| row.iter().any(|&c| c > 0.0))
        .map(|(i, _)| i)
        .collect();
    let x = counts.counts().select(Axis(0), &keep);

    // upper quartile of each library, as a proportion of library size
    let f75: Vec<f64> = (0..n_samples)
        .map(|j| quantile(&x.column(j).to_vec(), 0.75) / lib_sizes[j])
        .collect();
    let avg = mean(&f75);
    let ref_col = f75
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            (*a - avg)
                .abs()
                .partial_cmp(&(*b - avg).abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(j, _)| j)
        .unwrap_or(0);
    log::debug!("TMM reference sample: {}", counts.sample_ids()[ref_col]);

    let reference = x.column(ref_col);
    let factors: Vec<f64> = (0..n_samples)
        .into_par_iter()
        .map(|j| {
            tmm_factor(
                x.column(j),
                reference,
                lib_sizes[j],
                lib_sizes[ref_col],
                params,
            )
        })
        .collect();

    let log_mean = factors.iter().map(|f| f.ln()).sum::<f64>() / n_samples as f64;
    let scale = log_mean.exp();
    let factors: Vec<f64> = factors.iter().map(|f| f / scale).collect();

    if factors.iter().any(|f| !f.is_finite() || *f <= 0.0) {
        return Err(PipelineError::NormalizationFailed {
            reason: "TMM produced a non-positive or non-finite factor".to_string(),
        });
    }
    Ok(factors)
}

/// TMM factor of one sample against the reference
/// R equivalent: edgeR:::.calcFactorTMM()
fn tmm_factor(
    obs: ArrayView1<f64>,
    reference: ArrayView1<f64>,
    lib_obs: f64,
    lib_ref: f64,
    params: &TmmParams,
) -> f64 {
    let mut log_r = Vec::new();
    let mut abs_e = Vec::new();
    let mut v = Vec::new();

    for (&o, &r) in obs.iter().zip(reference.iter()) {
        let po = o / lib_obs;
        let pr = r / lib_ref;
        let lr = (po / pr).log2();
        let ae = (po.log2() + pr.log2()) / 2.0;
        if !lr.is_finite() || !ae.is_finite() || ae <= params.a_cutoff {
            continue;
        }
        log_r.push(lr);
        abs_e.push(ae);
        v.push((lib_obs - o) / lib_obs / o + (lib_ref - r) / lib_ref / r);
    }

    if log_r.is_empty() || log_r.iter().all(|x| x.abs() < 1e-6) {
        return 1.0;
    }

    let n = log_r.len() as f64;
    let lo_l = (n * params.logratio_trim).floor() + 1.0;
    let hi_l = n + 1.0 - lo_l;
    let lo_s = (n * params.sum_trim).floor() + 1.0;
    let hi_s = n + 1.0 - lo_s;

    let rank_r = rank_average(&log_r);
    let rank_e = rank_average(&abs_e);

    let mut num = 0.0;
    let mut den = 0.0;
    let mut kept = 0usize;
    for k in 0..log_r.len() {
        let in_r = rank_r[k] >= lo_l && rank_r[k] <= hi_l;
        let in_e = rank_e[k] >= lo_s && rank_e[k] <= hi_s;
        if !(in_r && in_e) {
            continue;
        }
        kept += 1;
        if params.do_weighting {
            num += log_r[k] / v[k];
            den += 1.0 / v[k];
        } else {
            num += log_r[k];
            den += 1.0;
        }
    }

    let f = if kept == 0 || den == 0.0 { 0.0 } else { num / den };
    if f.is_finite() {
        2f64.powf(f)
    } else {
        1.0
    }
}

/// log2 counts per million using TMM-effective library sizes
///
/// prior = prior_count * lib / mean(lib) is added to each count and twice
/// the prior to each library size, so zero counts stay finite.
pub fn log_cpm(counts: &CountMatrix, factors: &[f64], prior_count: f64) -> Result<ExpressionMatrix> {
    let n_samples = counts.n_samples();
    if factors.len() != n_samples {
        return Err(PipelineError::DimensionMismatch {
            expected: format!("{} factors", n_samples),
            got: format!("{} factors", factors.len()),
        });
    }

    let lib: Vec<f64> = counts
        .library_sizes()
        .iter()
        .zip(factors)
        .map(|(l, f)| l * f)
        .collect();
    let mean_lib = mean(&lib);
    if !(mean_lib > 0.0) {
        return Err(PipelineError::NormalizationFailed {
            reason: "mean effective library size is zero".to_string(),
        });
    }

    let priors: Vec<f64> = lib.iter().map(|l| prior_count * l / mean_lib).collect();
    let adj_lib: Vec<f64> = lib.iter().zip(&priors).map(|(l, p)| l + 2.0 * p).collect();

    let raw = counts.counts();
    let mut values = Array2::zeros(raw.dim());
    for ((i, j), v) in values.indexed_iter_mut() {
        *v = ((raw[[i, j]] + priors[j]) / adj_lib[j] * 1e6).log2();
    }

    ExpressionMatrix::new(values, counts.gene_ids().to_vec(), counts.sample_ids().to_vec())
}

/// TMM factors then logCPM in one step
pub fn normalize_counts(counts: &CountMatrix, params: &RnaSeqParams) -> Result<ExpressionMatrix> {
    let factors = tmm_factors(counts, &params.tmm)?;
    log::info!(
        "TMM factors: {}",
        factors
            .iter()
            .map(|f| format!("{:.4}", f))
            .collect::<Vec<_>>()
            .join(", ")
    );
    log_cpm(counts, &factors, params.prior_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn counts(values: Array2<f64>) -> CountMatrix {
        let genes = (0..values.nrows()).map(|i| format!("g{}", i)).collect();
        let samples = (0..values.ncols()).map(|j| format!("s{}", j)).collect();
        CountMatrix::new(values, genes, samples).unwrap()
    }

    #[test]
    fn test_tmm_identical_composition_gives_unit_factors() {
        // s1 is s0 sequenced twice as deep: composition identical
        let m = counts(array![
            [10.0, 20.0],
            [50.0, 100.0],
            [100.0, 200.0],
            [5.0, 10.0],
            [30.0, 60.0]
        ]);
        let f = tmm_factors(&m, &TmmParams::default()).unwrap();
        assert!((f[0] - 1.0).abs() < 1e-9);
        assert!((f[1] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_tmm_factors_have_unit_geometric_mean() {
        let m = counts(array![
            [10.0, 12.0, 30.0],
            [50.0, 40.0, 55.0],
            [100.0, 90.0, 400.0],
            [5.0, 8.0, 2.0],
            [30.0, 33.0, 29.0],
            [0.0, 0.0, 0.0],
            [70.0, 60.0, 75.0]
        ]);
        let f = tmm_factors(&m, &TmmParams::default()).unwrap();
        let geo = (f.iter().map(|x| x.ln()).sum::<f64>() / 3.0).exp();
        assert!((geo - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_library_is_error() {
        let m = counts(array![[0.0, 3.0], [0.0, 4.0]]);
        assert!(matches!(
            tmm_factors(&m, &TmmParams::default()),
            Err(PipelineError::NormalizationFailed { .. })
        ));
    }

    #[test]
    fn test_log_cpm_zero_count_is_finite() {
        let m = counts(array![[0.0, 10.0], [1000.0, 990.0]]);
        let e = log_cpm(&m, &[1.0, 1.0], 2.0).unwrap();
        assert!(e.values().iter().all(|v| v.is_finite()));
        // lib 1000, prior 2 -> log2(2 / 1004 * 1e6)
        let expected = (2.0f64 / 1004.0 * 1e6).log2();
        assert!((e.values()[[0, 0]] - expected).abs() < 1e-9);
    }

    #[test]
    fn test_log_cpm_factor_length_mismatch() {
        let m = counts(array![[1.0, 2.0]]);
        assert!(log_cpm(&m, &[1.0], 2.0).is_err());
    }
}
