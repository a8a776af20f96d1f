//! Collapse probesets to gene symbols
//!
//! R equivalent: the `aggregate`/`which.max(rowMeans)` idiom applied after
//! annotating an RMA ExpressionSet with gene symbols.

use std::collections::HashMap;

use super::ExpressionMatrix;
use crate::error::{PipelineError, Result};

/// Map probeset rows to gene symbols, keeping one probeset per symbol
///
/// Probesets without an annotation (or with an empty symbol) are dropped.
/// When several probesets map to the same symbol, the one with the highest
/// mean expression is kept; ties keep the probeset that comes first in the
/// matrix. Output rows follow the first appearance of each symbol.
pub fn collapse_to_symbols(
    matrix: &ExpressionMatrix,
    annotation: &HashMap<String, String>,
) -> Result<ExpressionMatrix> {
    let means = matrix.gene_means();

    // symbol -> (row index, mean), in first-appearance order
    let mut best: Vec<(String, usize, f64)> = Vec::new();
    let mut position: HashMap<&str, usize> = HashMap::new();
    let mut unmapped = 0usize;

    for (row, probeset) in matrix.gene_ids().iter().enumerate() {
        let symbol = match annotation.get(probeset).map(|s| s.trim()) {
            Some(s) if !s.is_empty() => s,
            _ => {
                unmapped += 1;
                continue;
            }
        };
        let mean = means[row];
        match position.get(symbol) {
            Some(&k) => {
                // strict comparison keeps the first probeset on ties
                if mean > best[k].2 || (best[k].2.is_nan() && !mean.is_nan()) {
                    best[k].1 = row;
                    best[k].2 = mean;
                }
            }
            None => {
                position.insert(symbol, best.len());
                best.push((symbol.to_string(), row, mean));
            }
        }
    }

    if best.is_empty() {
        return Err(PipelineError::EmptyData {
            reason: "no probeset maps to a gene symbol".to_string(),
        });
    }

    let n_duplicates = matrix.n_genes() - unmapped - best.len();
    log::info!(
        "Collapsed {} probesets to {} symbols ({} unmapped, {} duplicate probesets dropped)",
        matrix.n_genes(),
        best.len(),
        unmapped,
        n_duplicates
    );

    let rows: Vec<usize> = best.iter().map(|(_, row, _)| *row).collect();
    let symbols: Vec<String> = best.into_iter().map(|(symbol, _, _)| symbol).collect();
    let values = matrix.values().select(ndarray::Axis(0), &rows);

    ExpressionMatrix::new(values, symbols, matrix.sample_ids().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_collapse_keeps_highest_mean() {
        let m = ExpressionMatrix::new(
            array![[5.0, 5.0], [8.0, 9.0], [3.0, 3.0], [7.0, 7.0]],
            strings(&["ps1", "ps2", "ps3", "ps4"]),
            strings(&["a", "b"]),
        )
        .unwrap();
        let annotation: HashMap<String, String> = [
            ("ps1", "Cyp2e1"),
            ("ps2", "Cyp2e1"),
            ("ps3", "Alb"),
            ("ps4", ""),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let c = collapse_to_symbols(&m, &annotation).unwrap();
        assert_eq!(c.gene_ids(), &["Cyp2e1".to_string(), "Alb".to_string()]);
        assert_eq!(c.gene_row(0).to_vec(), vec![8.0, 9.0]);
    }

    #[test]
    fn test_collapse_tie_keeps_first() {
        let m = ExpressionMatrix::new(
            array![[6.0, 6.0], [5.0, 7.0]],
            strings(&["ps1", "ps2"]),
            strings(&["a", "b"]),
        )
        .unwrap();
        let annotation: HashMap<String, String> = [("ps1", "Alb"), ("ps2", "Alb")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let c = collapse_to_symbols(&m, &annotation).unwrap();
        assert_eq!(c.gene_row(0).to_vec(), vec![6.0, 6.0]);
    }
}
