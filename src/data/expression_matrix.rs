//! Expression matrix representation (log2 intensities or log-CPM)

use std::collections::{HashMap, HashSet};

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{PipelineError, Result};

/// Return the first duplicated identifier, if any
pub(crate) fn first_duplicate(ids: &[String]) -> Option<&str> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().find(|id| !seen.insert(id.as_str())).map(|s| s.as_str())
}

/// Genes x samples matrix of real-valued expression
/// Rows are genes, columns are samples
#[derive(Debug, Clone)]
pub struct ExpressionMatrix {
    values: Array2<f64>,
    gene_ids: Vec<String>,
    sample_ids: Vec<String>,
}

impl ExpressionMatrix {
    /// Create a new expression matrix
    ///
    /// Gene and sample identifiers must be unique. Values may be NaN
    /// (missing) but never infinite.
    pub fn new(values: Array2<f64>, gene_ids: Vec<String>, sample_ids: Vec<String>) -> Result<Self> {
        let (n_genes, n_samples) = values.dim();

        if gene_ids.len() != n_genes {
            return Err(PipelineError::DimensionMismatch {
                expected: format!("{} gene IDs", n_genes),
                got: format!("{} gene IDs", gene_ids.len()),
            });
        }
        if sample_ids.len() != n_samples {
            return Err(PipelineError::DimensionMismatch {
                expected: format!("{} sample IDs", n_samples),
                got: format!("{} sample IDs", sample_ids.len()),
            });
        }
        if let Some(dup) = first_duplicate(&gene_ids) {
            return Err(PipelineError::InvalidMatrix {
                reason: format!("duplicate gene identifier '{}'", dup),
            });
        }
        if let Some(dup) = first_duplicate(&sample_ids) {
            return Err(PipelineError::InvalidMatrix {
                reason: format!("duplicate sample identifier '{}'", dup),
            });
        }
        if values.iter().any(|x| x.is_infinite()) {
            return Err(PipelineError::InvalidMatrix {
                reason: "expression values must not be infinite".to_string(),
            });
        }

        Ok(Self {
            values,
            gene_ids,
            sample_ids,
        })
    }

    pub fn n_genes(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.values.ncols()
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    pub fn into_values(self) -> Array2<f64> {
        self.values
    }

    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn gene_row(&self, gene_idx: usize) -> ArrayView1<'_, f64> {
        self.values.row(gene_idx)
    }

    pub fn sample_column(&self, sample_idx: usize) -> ArrayView1<'_, f64> {
        self.values.column(sample_idx)
    }

    pub fn gene_index(&self, gene_id: &str) -> Option<usize> {
        self.gene_ids.iter().position(|id| id == gene_id)
    }

    pub fn sample_index(&self, sample_id: &str) -> Option<usize> {
        self.sample_ids.iter().position(|id| id == sample_id)
    }

    /// Mean expression per gene over the non-missing samples
    pub fn gene_means(&self) -> Vec<f64> {
        self.values
            .axis_iter(Axis(0))
            .map(|row| {
                let (sum, n) = row
                    .iter()
                    .filter(|v| !v.is_nan())
                    .fold((0.0, 0usize), |(s, n), &v| (s + v, n + 1));
                if n == 0 {
                    f64::NAN
                } else {
                    sum / n as f64
                }
            })
            .collect()
    }

    /// Subset to specific samples, in the given order
    pub fn subset_samples(&self, sample_indices: &[usize]) -> Result<Self> {
        let values = self.values.select(Axis(1), sample_indices);
        let sample_ids = sample_indices
            .iter()
            .map(|&i| self.sample_ids[i].clone())
            .collect();
        Self::new(values, self.gene_ids.clone(), sample_ids)
    }

    /// Subset to specific genes, in the given order
    pub fn subset_genes(&self, gene_indices: &[usize]) -> Result<Self> {
        let values = self.values.select(Axis(0), gene_indices);
        let gene_ids = gene_indices
            .iter()
            .map(|&i| self.gene_ids[i].clone())
            .collect();
        Self::new(values, gene_ids, self.sample_ids.clone())
    }

    /// Reorder columns to exactly match `order` (by sample id)
    ///
    /// Both sides must hold the same set of sample ids.
    pub fn reorder_samples(&self, order: &[String]) -> Result<Self> {
        if order.len() != self.n_samples() {
            return Err(PipelineError::SampleAlignment {
                reason: format!(
                    "matrix has {} samples, requested order has {}",
                    self.n_samples(),
                    order.len()
                ),
            });
        }
        let index: HashMap<&str, usize> = self
            .sample_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        let mut indices = Vec::with_capacity(order.len());
        let mut missing = Vec::new();
        for id in order {
            match index.get(id.as_str()) {
                Some(&i) => indices.push(i),
                None => missing.push(id.as_str()),
            }
        }
        if !missing.is_empty() {
            return Err(PipelineError::SampleAlignment {
                reason: format!("samples not present in matrix: {:?}", missing),
            });
        }
        self.subset_samples(&indices)
    }

    /// Apply a function to every value, keeping identifiers
    pub fn map_values<F: Fn(f64) -> f64>(&self, f: F) -> Result<Self> {
        Self::new(self.values.mapv(f), self.gene_ids.clone(), self.sample_ids.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("{}{}", prefix, i)).collect()
    }

    #[test]
    fn test_expression_matrix_creation() {
        let m = ExpressionMatrix::new(array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]], ids("g", 2), ids("s", 3)).unwrap();
        assert_eq!(m.n_genes(), 2);
        assert_eq!(m.n_samples(), 3);
        assert_eq!(m.gene_means(), vec![2.0, 5.0]);
    }

    #[test]
    fn test_duplicate_gene_rejected() {
        let genes = vec!["Alb".to_string(), "Alb".to_string()];
        let result = ExpressionMatrix::new(array![[1.0], [2.0]], genes, ids("s", 1));
        assert!(matches!(result, Err(PipelineError::InvalidMatrix { .. })));
    }

    #[test]
    fn test_reorder_samples() {
        let m = ExpressionMatrix::new(array![[1.0, 2.0, 3.0]], ids("g", 1), ids("s", 3)).unwrap();
        let order = vec!["s3".to_string(), "s1".to_string(), "s2".to_string()];
        let r = m.reorder_samples(&order).unwrap();
        assert_eq!(r.sample_ids(), order.as_slice());
        assert_eq!(r.gene_row(0).to_vec(), vec![3.0, 1.0, 2.0]);
    }

    #[test]
    fn test_reorder_samples_unknown_id() {
        let m = ExpressionMatrix::new(array![[1.0, 2.0]], ids("g", 1), ids("s", 2)).unwrap();
        let order = vec!["s1".to_string(), "s9".to_string()];
        assert!(matches!(
            m.reorder_samples(&order),
            Err(PipelineError::SampleAlignment { .. })
        ));
    }
}
