//! Probe-level microarray intensities

use ndarray::{Array2, ArrayView2, Axis};

use super::expression_matrix::first_duplicate;
use crate::error::{PipelineError, Result};

/// Raw perfect-match probe intensities for a batch of arrays
/// R equivalent: pm(AffyBatch) / exprs of a probe-level oligo FeatureSet
/// Rows are probes, columns are samples
#[derive(Debug, Clone)]
pub struct ProbeIntensities {
    intensities: Array2<f64>,
    probe_ids: Vec<String>,
    /// Probeset each probe belongs to
    probeset_ids: Vec<String>,
    sample_ids: Vec<String>,
}

impl ProbeIntensities {
    pub fn new(
        intensities: Array2<f64>,
        probe_ids: Vec<String>,
        probeset_ids: Vec<String>,
        sample_ids: Vec<String>,
    ) -> Result<Self> {
        let (n_probes, n_samples) = intensities.dim();
        if probe_ids.len() != n_probes || probeset_ids.len() != n_probes {
            return Err(PipelineError::DimensionMismatch {
                expected: format!("{} probe and probeset IDs", n_probes),
                got: format!("{} probe IDs, {} probeset IDs", probe_ids.len(), probeset_ids.len()),
            });
        }
        if sample_ids.len() != n_samples {
            return Err(PipelineError::DimensionMismatch {
                expected: format!("{} sample IDs", n_samples),
                got: format!("{} sample IDs", sample_ids.len()),
            });
        }
        if let Some(dup) = first_duplicate(&probe_ids) {
            return Err(PipelineError::InvalidMatrix {
                reason: format!("duplicate probe identifier '{}'", dup),
            });
        }
        if intensities.iter().any(|&x| x <= 0.0 || !x.is_finite()) {
            return Err(PipelineError::InvalidMatrix {
                reason: "probe intensities must be positive finite values".to_string(),
            });
        }
        Ok(Self {
            intensities,
            probe_ids,
            probeset_ids,
            sample_ids,
        })
    }

    pub fn n_probes(&self) -> usize {
        self.intensities.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.intensities.ncols()
    }

    pub fn intensities(&self) -> ArrayView2<'_, f64> {
        self.intensities.view()
    }

    pub fn probe_ids(&self) -> &[String] {
        &self.probe_ids
    }

    pub fn probeset_ids(&self) -> &[String] {
        &self.probeset_ids
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Probesets in first-appearance order with the row indices of their probes
    pub fn probeset_groups(&self) -> Vec<(String, Vec<usize>)> {
        let mut order: Vec<(String, Vec<usize>)> = Vec::new();
        let mut index: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
        for (row, ps) in self.probeset_ids.iter().enumerate() {
            match index.get(ps.as_str()) {
                Some(&k) => order[k].1.push(row),
                None => {
                    index.insert(ps.as_str(), order.len());
                    order.push((ps.clone(), vec![row]));
                }
            }
        }
        order
    }

    /// Subset to specific samples
    pub fn subset_samples(&self, sample_indices: &[usize]) -> Result<Self> {
        let intensities = self.intensities.select(Axis(1), sample_indices);
        let sample_ids = sample_indices
            .iter()
            .map(|&i| self.sample_ids[i].clone())
            .collect();
        Self::new(
            intensities,
            self.probe_ids.clone(),
            self.probeset_ids.clone(),
            sample_ids,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn test_probeset_groups_preserve_order() {
        let p = ProbeIntensities::new(
            array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]],
            s(&["p1", "p2", "p3"]),
            s(&["ps_b", "ps_a", "ps_b"]),
            s(&["a1", "a2"]),
        )
        .unwrap();
        let groups = p.probeset_groups();
        assert_eq!(groups[0], ("ps_b".to_string(), vec![0, 2]));
        assert_eq!(groups[1], ("ps_a".to_string(), vec![1]));
    }

    #[test]
    fn test_non_positive_intensity_rejected() {
        let r = ProbeIntensities::new(array![[0.0]], s(&["p1"]), s(&["ps"]), s(&["a1"]));
        assert!(r.is_err());
    }
}
