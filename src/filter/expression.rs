//! Low-count gene filter for RNA-seq
//! R equivalent: edgeR::filterByExpr(y, group = group)

use std::collections::BTreeMap;

use ndarray::Axis;

use crate::config::ExpressionFilterParams;
use crate::data::CountMatrix;
use crate::error::{PipelineError, Result};
use crate::stats::median;

/// Keep genes with enough counts in enough samples
///
/// A gene is kept when its CPM reaches `min_count / median(lib) * 1e6` in at
/// least as many samples as the smallest group (relaxed by `min_prop` above
/// `large_n`) and its total count reaches `min_total_count`.
pub fn filter_by_expression(
    counts: &CountMatrix,
    groups: &[&str],
    params: &ExpressionFilterParams,
) -> Result<CountMatrix> {
    if groups.len() != counts.n_samples() {
        return Err(PipelineError::DimensionMismatch {
            expected: format!("{} group labels", counts.n_samples()),
            got: format!("{} group labels", groups.len()),
        });
    }

    let mut group_sizes: BTreeMap<&str, usize> = BTreeMap::new();
    for g in groups {
        *group_sizes.entry(g).or_insert(0) += 1;
    }
    let mut min_sample_size = group_sizes.values().copied().min().unwrap_or(0) as f64;
    let large_n = params.large_n as f64;
    if min_sample_size > large_n {
        min_sample_size = large_n + (min_sample_size - large_n) * params.min_prop;
    }

    let lib_sizes = counts.library_sizes();
    let cpm_cutoff = params.min_count / median(&lib_sizes) * 1e6;
    const TOL: f64 = 1e-14;

    let keep: Vec<usize> = counts
        .counts()
        .axis_iter(Axis(0))
        .enumerate()
        .filter(|(_, row)| {
            let n_above = row
                .iter()
                .zip(&lib_sizes)
                .filter(|(&c, &lib)| lib > 0.0 && c / lib * 1e6 >= cpm_cutoff)
                .count() as f64;
            let total: f64 = row.sum();
            n_above >= min_sample_size - TOL && total >= params.min_total_count - TOL
        })
        .map(|(i, _)| i)
        .collect();

    if keep.is_empty() {
        return Err(PipelineError::EmptyData {
            reason: "no gene passes the expression filter".to_string(),
        });
    }
    log::info!(
        "Expression filter kept {} of {} genes (CPM cutoff {:.3}, min samples {:.1})",
        keep.len(),
        counts.n_genes(),
        cpm_cutoff,
        min_sample_size
    );
    counts.subset_genes(&keep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_low_count_genes_removed() {
        let counts = CountMatrix::new(
            array![
                [100.0, 120.0, 90.0, 110.0],
                [0.0, 1.0, 0.0, 2.0],
                [30.0, 25.0, 0.0, 0.0],
                [900.0, 880.0, 910.0, 890.0]
            ],
            vec!["Alb".into(), "Low".into(), "Half".into(), "Apoa1".into()],
            vec!["c1".into(), "c2".into(), "t1".into(), "t2".into()],
        )
        .unwrap();
        let groups = ["Ctrl", "Ctrl", "APAP", "APAP"];
        let kept = filter_by_expression(&counts, &groups, &ExpressionFilterParams::default()).unwrap();
        // "Half" is expressed in exactly one group of size 2, which is enough
        assert_eq!(
            kept.gene_ids(),
            &["Alb".to_string(), "Half".to_string(), "Apoa1".to_string()]
        );
    }

    #[test]
    fn test_group_length_mismatch() {
        let counts = CountMatrix::new(array![[1.0, 2.0]], vec!["g".into()], vec!["a".into(), "b".into()]).unwrap();
        assert!(filter_by_expression(&counts, &["x"], &ExpressionFilterParams::default()).is_err());
    }
}
