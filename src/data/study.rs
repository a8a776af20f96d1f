//! Study - a normalized expression matrix paired with its sample metadata

use super::{ExpressionMatrix, SampleMetadata};
use crate::error::{PipelineError, Result};

/// Expression matrix and metadata with columns aligned 1:1 to metadata rows
#[derive(Debug, Clone)]
pub struct Study {
    name: String,
    expression: ExpressionMatrix,
    metadata: SampleMetadata,
}

impl Study {
    /// Pair a matrix with metadata, failing if sample order differs
    pub fn new(name: &str, expression: ExpressionMatrix, metadata: SampleMetadata) -> Result<Self> {
        check_alignment(expression.sample_ids(), &metadata.sample_ids())?;
        Ok(Self {
            name: name.to_string(),
            expression,
            metadata,
        })
    }

    /// Pair a matrix with metadata, reordering matrix columns to metadata order
    ///
    /// The sample id sets must be identical; only the order may differ.
    pub fn aligned(name: &str, expression: ExpressionMatrix, metadata: SampleMetadata) -> Result<Self> {
        let order = metadata.sample_ids();
        let expression = if expression.sample_ids() == order.as_slice() {
            expression
        } else {
            log::info!("Reordering matrix columns of study '{}' to metadata order", name);
            expression.reorder_samples(&order)?
        };
        Self::new(name, expression, metadata)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn expression(&self) -> &ExpressionMatrix {
        &self.expression
    }

    pub fn metadata(&self) -> &SampleMetadata {
        &self.metadata
    }

    pub fn n_genes(&self) -> usize {
        self.expression.n_genes()
    }

    pub fn n_samples(&self) -> usize {
        self.expression.n_samples()
    }

    /// Keep only the given samples in both matrix and metadata
    pub fn subset_samples(&self, sample_indices: &[usize]) -> Result<Self> {
        Self::new(
            &self.name,
            self.expression.subset_samples(sample_indices)?,
            self.metadata.subset(sample_indices),
        )
    }
}

/// Fail fast when matrix columns and metadata rows are not in the same order
pub fn check_alignment(matrix_ids: &[String], metadata_ids: &[String]) -> Result<()> {
    if matrix_ids.len() != metadata_ids.len() {
        return Err(PipelineError::SampleAlignment {
            reason: format!(
                "matrix has {} samples, metadata has {}",
                matrix_ids.len(),
                metadata_ids.len()
            ),
        });
    }
    if let Some((i, (m, d))) = matrix_ids
        .iter()
        .zip(metadata_ids.iter())
        .enumerate()
        .find(|(_, (m, d))| m != d)
    {
        return Err(PipelineError::SampleAlignment {
            reason: format!(
                "column {} is '{}' in the matrix but '{}' in the metadata",
                i, m, d
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Factor, SampleRecord};
    use ndarray::array;

    fn metadata(ids: &[&str]) -> SampleMetadata {
        let records = ids
            .iter()
            .map(|id| SampleRecord {
                sample_id: id.to_string(),
                treatment: "Ctrl".to_string(),
                time: None,
                tissue: None,
                diet: None,
            })
            .collect();
        SampleMetadata::new(records, &[Factor::Treatment]).unwrap()
    }

    fn matrix(ids: &[&str]) -> ExpressionMatrix {
        ExpressionMatrix::new(
            array![[1.0, 2.0, 3.0]],
            vec!["Alb".to_string()],
            ids.iter().map(|s| s.to_string()).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_misaligned_study_fails_fast() {
        let r = Study::new("s", matrix(&["a", "b", "c"]), metadata(&["a", "c", "b"]));
        assert!(matches!(r, Err(PipelineError::SampleAlignment { .. })));
    }

    #[test]
    fn test_aligned_reorders_to_metadata() {
        let study = Study::aligned("s", matrix(&["a", "b", "c"]), metadata(&["c", "a", "b"])).unwrap();
        assert_eq!(study.expression().sample_ids(), study.metadata().sample_ids().as_slice());
        assert_eq!(study.expression().gene_row(0).to_vec(), vec![3.0, 1.0, 2.0]);
    }

    #[test]
    fn test_aligned_rejects_different_sample_sets() {
        let r = Study::aligned("s", matrix(&["a", "b", "c"]), metadata(&["a", "b", "d"]));
        assert!(r.is_err());
    }
}
