//! Cell-means design matrix over the derived group factor

use ndarray::{Array2, ArrayView2};

use super::Contrast;
use crate::data::SampleMetadata;
use crate::error::{PipelineError, Result};

/// Samples x group-level indicator matrix
/// R equivalent: model.matrix(~ 0 + group)
///
/// Columns follow the sorted group levels; every row has exactly one 1.
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    matrix: Array2<f64>,
    levels: Vec<String>,
    level_sizes: Vec<usize>,
    sample_ids: Vec<String>,
}

impl DesignMatrix {
    pub fn from_metadata(metadata: &SampleMetadata) -> Result<Self> {
        let levels = metadata.group_levels();
        if levels.is_empty() {
            return Err(PipelineError::InvalidDesignMatrix {
                reason: "metadata has no samples".to_string(),
            });
        }

        let n_samples = metadata.n_samples();
        let mut matrix = Array2::zeros((n_samples, levels.len()));
        let mut level_sizes = vec![0usize; levels.len()];
        for (i, group) in metadata.groups().iter().enumerate() {
            // group_levels() is sorted and holds every group
            let j = levels
                .binary_search_by(|l| l.as_str().cmp(*group))
                .map_err(|_| PipelineError::InvalidDesignMatrix {
                    reason: format!("group '{}' missing from level list", group),
                })?;
            matrix[[i, j]] = 1.0;
            level_sizes[j] += 1;
        }

        check_full_rank(&matrix)?;
        log::debug!(
            "Design: {} samples x {} levels ({})",
            n_samples,
            levels.len(),
            levels.join(", ")
        );

        Ok(Self {
            matrix,
            levels,
            level_sizes,
            sample_ids: metadata.sample_ids(),
        })
    }

    pub fn matrix(&self) -> ArrayView2<'_, f64> {
        self.matrix.view()
    }

    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn n_samples(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn n_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn level_index(&self, level: &str) -> Option<usize> {
        self.levels.iter().position(|l| l == level)
    }

    /// Number of samples in each level, in column order
    pub fn level_sizes(&self) -> &[usize] {
        &self.level_sizes
    }

    /// Residual degrees of freedom of the full model
    pub fn residual_df(&self) -> usize {
        self.n_samples().saturating_sub(self.n_levels())
    }

    /// Whether every level with a non-zero weight has at least two samples
    pub fn replicated(&self, contrast: &Contrast) -> bool {
        contrast
            .weights()
            .iter()
            .zip(&self.level_sizes)
            .all(|(&w, &n)| w == 0.0 || n >= 2)
    }
}

/// Check if a design matrix is full rank using QR decomposition with column pivoting.
/// R equivalent: qr(X)$rank == ncol(X)
pub fn check_full_rank(matrix: &Array2<f64>) -> Result<()> {
    let nrow = matrix.nrows();
    let ncol = matrix.ncols();

    if nrow == 0 || ncol == 0 {
        return Err(PipelineError::InvalidDesignMatrix {
            reason: "Design matrix has zero rows or columns".to_string(),
        });
    }

    let rank = qr_rank(matrix);
    if rank < ncol {
        let has_zero_column = (0..ncol).any(|j| matrix.column(j).iter().all(|&v| v == 0.0));
        let reason = if has_zero_column {
            "design matrix is not full rank: a group level has no samples"
        } else {
            "design matrix is not full rank: columns are linear combinations of each other"
        };
        return Err(PipelineError::InvalidDesignMatrix {
            reason: reason.to_string(),
        });
    }
    Ok(())
}

/// Numerical rank via Householder QR with column pivoting
///
/// Counts diagonal elements of R above `max(nrow, ncol) * eps * max(|diag(R)|)`.
fn qr_rank(matrix: &Array2<f64>) -> usize {
    let nrow = matrix.nrows();
    let ncol = matrix.ncols();
    let k = nrow.min(ncol);
    let mut r = matrix.to_owned();

    let mut col_norms_sq: Vec<f64> = (0..ncol)
        .map(|j| r.column(j).iter().map(|&v| v * v).sum())
        .collect();

    for step in 0..k {
        let best_col = (step..ncol)
            .max_by(|&a, &b| {
                col_norms_sq[a]
                    .partial_cmp(&col_norms_sq[b])
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(step);
        if best_col != step {
            for i in 0..nrow {
                r.swap([i, step], [i, best_col]);
            }
            col_norms_sq.swap(step, best_col);
        }

        let mut alpha = (step..nrow).map(|i| r[[i, step]].powi(2)).sum::<f64>().sqrt();
        if alpha < f64::EPSILON * 1e3 {
            break;
        }
        if r[[step, step]] > 0.0 {
            alpha = -alpha;
        }

        let v0 = r[[step, step]] - alpha;
        r[[step, step]] = alpha;
        let v_norm_sq = v0 * v0 + ((step + 1)..nrow).map(|i| r[[i, step]].powi(2)).sum::<f64>();
        if v_norm_sq < f64::MIN_POSITIVE {
            continue;
        }
        let tau = 2.0 / v_norm_sq;

        for j in (step + 1)..ncol {
            let dot = v0 * r[[step, j]] + ((step + 1)..nrow).map(|i| r[[i, step]] * r[[i, j]]).sum::<f64>();
            let scale = tau * dot;
            r[[step, j]] -= scale * v0;
            for i in (step + 1)..nrow {
                r[[i, j]] -= scale * r[[i, step]];
            }
            col_norms_sq[j] = (col_norms_sq[j] - r[[step, j]].powi(2)).max(0.0);
        }
    }

    let max_dim = nrow.max(ncol) as f64;
    let max_abs_diag = (0..k).map(|i| r[[i, i]].abs()).fold(0.0f64, f64::max);
    let tol = max_dim * f64::EPSILON * max_abs_diag;
    (0..k).filter(|&i| r[[i, i]].abs() > tol).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Factor, SampleRecord};

    fn metadata(groups: &[(&str, &str)]) -> SampleMetadata {
        let records = groups
            .iter()
            .enumerate()
            .map(|(i, (treatment, time))| SampleRecord {
                sample_id: format!("s{}", i + 1),
                treatment: treatment.to_string(),
                time: Some(time.to_string()),
                tissue: None,
                diet: None,
            })
            .collect();
        SampleMetadata::new(records, &[Factor::Treatment, Factor::Time]).unwrap()
    }

    #[test]
    fn test_design_rows_sum_to_one() {
        let md = metadata(&[
            ("Ctrl", "6h"),
            ("APAP", "6h"),
            ("Ctrl", "6h"),
            ("APAP", "24h"),
            ("APAP", "6h"),
        ]);
        let d = DesignMatrix::from_metadata(&md).unwrap();
        assert_eq!(d.levels(), &["APAP_24h".to_string(), "APAP_6h".to_string(), "Ctrl_6h".to_string()]);
        for row in d.matrix().rows() {
            assert_eq!(row.sum(), 1.0);
        }
        assert_eq!(d.level_sizes(), &[1, 2, 2]);
        assert_eq!(d.residual_df(), 2);
    }

    #[test]
    fn test_check_full_rank_linear_combination() {
        let matrix = Array2::from_shape_vec(
            (4, 3),
            vec![
                1.0, 0.0, 1.0,
                1.0, 0.0, 1.0,
                1.0, 1.0, 2.0,
                1.0, 1.0, 2.0,
            ],
        )
        .unwrap();
        assert!(check_full_rank(&matrix).is_err());
    }

    #[test]
    fn test_check_full_rank_zero_column() {
        let matrix = Array2::from_shape_vec((3, 2), vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0]).unwrap();
        let err = check_full_rank(&matrix).unwrap_err();
        assert!(format!("{}", err).contains("no samples"));
    }

    #[test]
    fn test_check_full_rank_identity() {
        let matrix = Array2::from_shape_vec((3, 3), vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]).unwrap();
        assert!(check_full_rank(&matrix).is_ok());
    }
}
