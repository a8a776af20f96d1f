//! Per-array quality metrics and outlier array removal for microarrays
//!
//! R equivalent: the distance and RLE modules of
//! arrayQualityMetrics::arrayQualityMetrics(), with outliers detected by the
//! boxplot rule on each metric.

use ndarray::Axis;
use serde::Serialize;

use crate::data::ExpressionMatrix;
use crate::stats::{iqr, median, quantile};

/// Quality metrics of one array on the log2 scale
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArrayQuality {
    pub sample_id: String,
    /// Sum of mean absolute differences to every other array
    pub distance: f64,
    /// Median relative log expression (absolute value)
    pub rle_median: f64,
    /// Interquartile range of relative log expression
    pub rle_iqr: f64,
    pub distance_outlier: bool,
    pub rle_median_outlier: bool,
    pub rle_iqr_outlier: bool,
}

impl ArrayQuality {
    /// Number of metrics that flag this array
    pub fn n_flags(&self) -> usize {
        [self.distance_outlier, self.rle_median_outlier, self.rle_iqr_outlier]
            .iter()
            .filter(|&&f| f)
            .count()
    }
}

/// Compute distance and RLE metrics for every array and flag outliers
pub fn array_quality(matrix: &ExpressionMatrix) -> Vec<ArrayQuality> {
    let values = matrix.values();
    let n_samples = matrix.n_samples();
    let n_genes = matrix.n_genes();

    let mut distance = vec![0.0; n_samples];
    for a in 0..n_samples {
        for b in (a + 1)..n_samples {
            let (sum, n) = values
                .column(a)
                .iter()
                .zip(values.column(b).iter())
                .filter(|(x, y)| x.is_finite() && y.is_finite())
                .fold((0.0, 0usize), |(s, n), (x, y)| (s + (x - y).abs(), n + 1));
            let d = if n == 0 { 0.0 } else { sum / n as f64 };
            distance[a] += d;
            distance[b] += d;
        }
    }

    // relative log expression: deviation from the gene's median across arrays
    let gene_medians: Vec<f64> = values
        .axis_iter(Axis(0))
        .map(|row| median(&row.to_vec()))
        .collect();
    let mut rle_median = Vec::with_capacity(n_samples);
    let mut rle_iqr = Vec::with_capacity(n_samples);
    for j in 0..n_samples {
        let rle: Vec<f64> = (0..n_genes)
            .map(|i| values[[i, j]] - gene_medians[i])
            .filter(|v| v.is_finite())
            .collect();
        rle_median.push(median(&rle).abs());
        rle_iqr.push(iqr(&rle));
    }

    let distance_flags = upper_fence_outliers(&distance);
    let median_flags = upper_fence_outliers(&rle_median);
    let iqr_flags = upper_fence_outliers(&rle_iqr);

    (0..n_samples)
        .map(|j| ArrayQuality {
            sample_id: matrix.sample_ids()[j].clone(),
            distance: distance[j],
            rle_median: rle_median[j],
            rle_iqr: rle_iqr[j],
            distance_outlier: distance_flags[j],
            rle_median_outlier: median_flags[j],
            rle_iqr_outlier: iqr_flags[j],
        })
        .collect()
}

/// Flag values above Q3 + 1.5 * IQR
fn upper_fence_outliers(x: &[f64]) -> Vec<bool> {
    let q3 = quantile(x, 0.75);
    let fence = q3 + 1.5 * iqr(x);
    x.iter().map(|&v| v.is_finite() && v > fence).collect()
}

/// Split arrays into kept indices and discarded sample ids
///
/// An array is discarded when at least `min_flags` metrics flag it.
pub fn discard_outlier_arrays(
    qualities: &[ArrayQuality],
    min_flags: usize,
) -> (Vec<usize>, Vec<String>) {
    let mut keep = Vec::new();
    let mut discarded = Vec::new();
    for (j, q) in qualities.iter().enumerate() {
        if min_flags > 0 && q.n_flags() >= min_flags {
            log::warn!(
                "Discarding array {} ({} of 3 quality metrics flagged)",
                q.sample_id,
                q.n_flags()
            );
            discarded.push(q.sample_id.clone());
        } else {
            keep.push(j);
        }
    }
    (keep, discarded)
}
