//! Normalization to log2 expression for microarray and RNA-seq inputs

mod rma;
mod tmm;

pub use rma::{median_polish, quantile_normalize, rma};
pub use tmm::{log_cpm, normalize_counts, tmm_factors};

use ndarray::Axis;

use crate::data::ExpressionMatrix;
use crate::error::{PipelineError, Result};
use crate::stats::is_constant;

/// log2(x + offset) for pre-summarized linear intensities
pub fn log2_transform(matrix: &ExpressionMatrix, offset: f64) -> Result<ExpressionMatrix> {
    if let Some(v) = matrix.values().iter().find(|v| **v + offset <= 0.0) {
        return Err(PipelineError::NormalizationFailed {
            reason: format!("cannot take log2 of {} with offset {}", v, offset),
        });
    }
    matrix.map_values(|v| (v + offset).log2())
}

/// Remove genes with zero variance across all samples
///
/// Returns the reduced matrix and the ids that were dropped. Genes whose
/// variance is undefined (fewer than two observed values) count as constant,
/// as do genes whose values differ only by rounding.
pub fn drop_constant_genes(matrix: &ExpressionMatrix) -> Result<(ExpressionMatrix, Vec<String>)> {
    let mut keep = Vec::new();
    let mut dropped = Vec::new();
    for (i, row) in matrix.values().axis_iter(Axis(0)).enumerate() {
        let observed: Vec<f64> = row.iter().copied().filter(|v| !v.is_nan()).collect();
        if observed.len() >= 2 && !is_constant(&observed) {
            keep.push(i);
        } else {
            dropped.push(matrix.gene_ids()[i].clone());
        }
    }

    if keep.is_empty() {
        return Err(PipelineError::EmptyData {
            reason: "every gene is constant across samples".to_string(),
        });
    }
    if !dropped.is_empty() {
        log::warn!("Dropped {} constant genes", dropped.len());
    }
    Ok((matrix.subset_genes(&keep)?, dropped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn matrix(values: ndarray::Array2<f64>) -> ExpressionMatrix {
        let genes = (0..values.nrows()).map(|i| format!("g{}", i)).collect();
        let samples = (0..values.ncols()).map(|j| format!("s{}", j)).collect();
        ExpressionMatrix::new(values, genes, samples).unwrap()
    }

    #[test]
    fn test_log2_transform_with_offset() {
        let m = matrix(array![[0.0, 1.0, 3.0]]);
        let t = log2_transform(&m, 1.0).unwrap();
        assert_eq!(t.gene_row(0).to_vec(), vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_log2_transform_rejects_non_positive() {
        let m = matrix(array![[0.0, 1.0]]);
        assert!(log2_transform(&m, 0.0).is_err());
    }

    #[test]
    fn test_drop_constant_genes_reports_ids() {
        let m = matrix(array![[1.0, 1.0, 1.0], [1.0, 2.0, 3.0], [4.0, 4.0, 4.0]]);
        let (kept, dropped) = drop_constant_genes(&m).unwrap();
        assert_eq!(kept.gene_ids(), &["g1".to_string()]);
        assert_eq!(dropped, vec!["g0".to_string(), "g2".to_string()]);
    }

    #[test]
    fn test_drop_constant_genes_with_inexact_repeats() {
        let m = matrix(array![[0.1, 0.1, 0.1, 0.1], [2.2, 2.2, 2.2, 2.2], [0.1, 0.2, 0.1, 0.2]]);
        let (kept, dropped) = drop_constant_genes(&m).unwrap();
        assert_eq!(kept.gene_ids(), &["g2".to_string()]);
        assert_eq!(dropped, vec!["g0".to_string(), "g1".to_string()]);
    }
}
