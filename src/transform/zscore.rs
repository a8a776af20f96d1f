//! Z-scores of treated samples relative to control statistics
//!
//! z = (x - mean_control) / sd_control, with the sample SD (n - 1) of the
//! control replicates of the same gene.

use ndarray::Array2;

use crate::data::{check_alignment, ExpressionMatrix, SampleMetadata};
use crate::error::{PipelineError, Result};
use crate::stats::{is_constant, mean, sample_variance};

/// Treated samples and the control samples they are scored against
#[derive(Debug, Clone, PartialEq)]
pub struct ControlAssignment {
    /// Time label of the treated samples, if any
    pub time: Option<String>,
    pub treated: Vec<usize>,
    pub controls: Vec<usize>,
}

/// Control mean and SD of one gene
#[derive(Debug, Clone, Copy)]
struct ControlStats {
    mean: f64,
    sd: f64,
    /// Replicates identical up to rounding; the SD is then treated as zero
    constant: bool,
}

/// Per-gene control statistics; fails on fewer than two controls
fn control_stats(matrix: &ExpressionMatrix, control_idx: &[usize]) -> Result<Vec<ControlStats>> {
    if control_idx.len() < 2 {
        return Err(PipelineError::InsufficientControls {
            reason: format!(
                "{} control sample(s); at least 2 are needed for a standard deviation",
                control_idx.len()
            ),
        });
    }
    let values = matrix.values();
    Ok((0..matrix.n_genes())
        .map(|g| {
            let x: Vec<f64> = control_idx.iter().map(|&j| values[[g, j]]).collect();
            ControlStats {
                mean: mean(&x),
                sd: sample_variance(&x).sqrt(),
                constant: is_constant(&x),
            }
        })
        .collect())
}

/// Z-score the treated columns against the control columns
///
/// Output is genes x treated samples in the order of `treated_idx`.
pub fn zscore(
    matrix: &ExpressionMatrix,
    control_idx: &[usize],
    treated_idx: &[usize],
) -> Result<ExpressionMatrix> {
    let stats = control_stats(matrix, control_idx)?;
    if let Some(g) = stats.iter().position(|s| s.constant) {
        return Err(PipelineError::ZeroControlVariance {
            gene_id: matrix.gene_ids()[g].clone(),
        });
    }

    let values = matrix.values();
    let mut z = Array2::zeros((matrix.n_genes(), treated_idx.len()));
    for (g, s) in stats.iter().enumerate() {
        for (k, &j) in treated_idx.iter().enumerate() {
            z[[g, k]] = (values[[g, j]] - s.mean) / s.sd;
        }
    }
    let sample_ids = treated_idx
        .iter()
        .map(|&j| matrix.sample_ids()[j].clone())
        .collect();
    ExpressionMatrix::new(z, matrix.gene_ids().to_vec(), sample_ids)
}

/// Remove genes whose control SD is zero
///
/// Returns the reduced matrix and the removed gene ids.
pub fn drop_zero_control_variance(
    matrix: &ExpressionMatrix,
    control_idx: &[usize],
) -> Result<(ExpressionMatrix, Vec<String>)> {
    let stats = control_stats(matrix, control_idx)?;
    let mut keep = Vec::new();
    let mut dropped = Vec::new();
    for (g, s) in stats.iter().enumerate() {
        if s.constant {
            dropped.push(matrix.gene_ids()[g].clone());
        } else {
            keep.push(g);
        }
    }
    if !dropped.is_empty() {
        log::warn!(
            "Dropped {} genes with zero control variance before z-scoring",
            dropped.len()
        );
    }
    Ok((matrix.subset_genes(&keep)?, dropped))
}

/// Pair each time point's treated samples with their controls
///
/// Controls at the same time are used when present. Otherwise the two
/// control time points nearest in hours are pooled, preferring the earlier
/// one on equal distance. Samples without a time use every control.
pub fn assign_controls(
    metadata: &SampleMetadata,
    control_treatment: &str,
) -> Result<Vec<ControlAssignment>> {
    let controls = metadata.samples_with_treatment(control_treatment);
    if controls.is_empty() {
        return Err(PipelineError::InsufficientControls {
            reason: format!("no samples with treatment '{}'", control_treatment),
        });
    }

    // distinct control time points, ascending by hours
    let mut control_times: Vec<(String, f64)> = Vec::new();
    for &c in &controls {
        if let Some(t) = &metadata.sample(c).time {
            if !control_times.iter().any(|(_, h)| *h == t.hours) {
                control_times.push((t.label.clone(), t.hours));
            }
        }
    }
    control_times.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut assignments: Vec<ControlAssignment> = Vec::new();
    for (j, sample) in metadata.samples().iter().enumerate() {
        if sample.treatment == control_treatment {
            continue;
        }
        let label = sample.time.as_ref().map(|t| t.label.clone());
        if let Some(a) = assignments.iter_mut().find(|a| a.time == label) {
            a.treated.push(j);
            continue;
        }

        let matched = match &sample.time {
            None => controls.clone(),
            Some(t) => {
                let same: Vec<usize> = controls
                    .iter()
                    .copied()
                    .filter(|&c| metadata.sample(c).time.as_ref().map(|ct| ct.hours) == Some(t.hours))
                    .collect();
                if same.is_empty() {
                    let nearest = nearest_time_points(&control_times, t.hours, 2);
                    log::info!(
                        "No controls at {}; pooling controls from {}",
                        t.label,
                        nearest.iter().map(|(l, _)| l.as_str()).collect::<Vec<_>>().join(" and ")
                    );
                    controls
                        .iter()
                        .copied()
                        .filter(|&c| {
                            metadata.sample(c).time.as_ref().map_or(false, |ct| {
                                nearest.iter().any(|(_, h)| *h == ct.hours)
                            })
                        })
                        .collect()
                } else {
                    same
                }
            }
        };
        assignments.push(ControlAssignment {
            time: label,
            treated: vec![j],
            controls: matched,
        });
    }
    Ok(assignments)
}

/// The `k` time points closest to `hours`; ties go to the earlier time
fn nearest_time_points(times: &[(String, f64)], hours: f64, k: usize) -> Vec<(String, f64)> {
    let mut ranked: Vec<&(String, f64)> = times.iter().collect();
    // times are ascending, and the sort is stable, so equal distances keep the earlier time first
    ranked.sort_by(|a, b| {
        (a.1 - hours)
            .abs()
            .partial_cmp(&(b.1 - hours).abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked.into_iter().take(k).cloned().collect()
}

/// Z-score every treated sample against its time-matched controls
///
/// Output columns follow the metadata order of the treated samples.
pub fn zscore_time_matched(
    matrix: &ExpressionMatrix,
    metadata: &SampleMetadata,
    control_treatment: &str,
) -> Result<ExpressionMatrix> {
    check_alignment(matrix.sample_ids(), &metadata.sample_ids())?;
    let assignments = assign_controls(metadata, control_treatment)?;
    let mut treated_order: Vec<usize> = assignments.iter().flat_map(|a| a.treated.clone()).collect();
    treated_order.sort_unstable();

    let mut z = Array2::zeros((matrix.n_genes(), treated_order.len()));
    for a in &assignments {
        let part = zscore(matrix, &a.controls, &a.treated)?;
        for (k, &j) in a.treated.iter().enumerate() {
            let col = treated_order
                .binary_search(&j)
                .map_err(|_| PipelineError::InvalidInput {
                    reason: format!("treated sample index {} not in output order", j),
                })?;
            z.column_mut(col).assign(&part.sample_column(k));
        }
    }

    let sample_ids = treated_order
        .iter()
        .map(|&j| matrix.sample_ids()[j].clone())
        .collect();
    log::info!(
        "Z-scored {} treated samples over {} genes",
        treated_order.len(),
        matrix.n_genes()
    );
    ExpressionMatrix::new(z, matrix.gene_ids().to_vec(), sample_ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Factor, SampleRecord};
    use ndarray::array;

    fn metadata(samples: &[(&str, &str)]) -> SampleMetadata {
        let records = samples
            .iter()
            .enumerate()
            .map(|(i, (treatment, time))| SampleRecord {
                sample_id: format!("s{}", i),
                treatment: treatment.to_string(),
                time: Some(time.to_string()),
                tissue: None,
                diet: None,
            })
            .collect();
        SampleMetadata::new(records, &[Factor::Treatment, Factor::Time]).unwrap()
    }

    fn matrix(values: Array2<f64>) -> ExpressionMatrix {
        let genes = (0..values.nrows()).map(|i| format!("g{}", i)).collect();
        let samples = (0..values.ncols()).map(|j| format!("s{}", j)).collect();
        ExpressionMatrix::new(values, genes, samples).unwrap()
    }

    #[test]
    fn test_treated_at_control_mean_scores_zero() {
        let m = matrix(array![[4.0, 6.0, 5.0, 5.0]]);
        let z = zscore(&m, &[0, 1, 2], &[3]).unwrap();
        assert_eq!(z.values()[[0, 0]], 0.0);
        assert_eq!(z.sample_ids(), &["s3".to_string()]);
    }

    #[test]
    fn test_zero_control_sd_is_error() {
        let m = matrix(array![[5.0, 5.0, 5.0, 10.0, 10.0, 10.0]]);
        let err = zscore(&m, &[0, 1, 2], &[3, 4, 5]).unwrap_err();
        assert!(matches!(err, PipelineError::ZeroControlVariance { ref gene_id } if gene_id == "g0"));
    }

    #[test]
    fn test_repeated_inexact_controls_are_zero_variance() {
        for x in [0.1, 7.3, 2.2, 5f64.log2()] {
            let m = matrix(array![[x, x, x, 10.0]]);
            let err = zscore(&m, &[0, 1, 2], &[3]).unwrap_err();
            assert!(matches!(err, PipelineError::ZeroControlVariance { .. }), "x = {}", x);
        }

        let m = matrix(array![[0.1, 0.1, 0.1, 10.0], [0.1, 0.2, 0.3, 10.0]]);
        let (kept, dropped) = drop_zero_control_variance(&m, &[0, 1, 2]).unwrap();
        assert_eq!(dropped, vec!["g0".to_string()]);
        let z = zscore(&kept, &[0, 1, 2], &[3]).unwrap();
        assert!(z.values()[[0, 0]].is_finite());
    }

    #[test]
    fn test_single_control_is_error() {
        let m = matrix(array![[5.0, 6.0]]);
        assert!(matches!(
            zscore(&m, &[0], &[1]),
            Err(PipelineError::InsufficientControls { .. })
        ));
    }

    #[test]
    fn test_drop_zero_control_variance() {
        let m = matrix(array![[5.0, 5.0, 9.0], [4.0, 6.0, 9.0]]);
        let (kept, dropped) = drop_zero_control_variance(&m, &[0, 1]).unwrap();
        assert_eq!(dropped, vec!["g0".to_string()]);
        assert_eq!(kept.n_genes(), 1);
        assert!(zscore(&kept, &[0, 1], &[2]).is_ok());
    }

    #[test]
    fn test_time_matched_controls() {
        let md = metadata(&[
            ("Ctrl", "6h"),
            ("Ctrl", "6h"),
            ("APAP", "6h"),
            ("Ctrl", "24h"),
            ("Ctrl", "24h"),
            ("APAP", "24h"),
        ]);
        let m = matrix(array![[1.0, 3.0, 2.0, 10.0, 12.0, 14.0]]);
        let z = zscore_time_matched(&m, &md, "Ctrl").unwrap();
        assert_eq!(z.sample_ids(), &["s2".to_string(), "s5".to_string()]);
        assert!((z.values()[[0, 0]] - 0.0).abs() < 1e-12);
        // (14 - 11) / sqrt(2)
        assert!((z.values()[[0, 1]] - 3.0 / 2f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_missing_time_pools_two_nearest_controls() {
        let md = metadata(&[
            ("Ctrl", "0h"),
            ("Ctrl", "6h"),
            ("Ctrl", "24h"),
            ("Ctrl", "48h"),
            ("APAP", "12h"),
        ]);
        let a = assign_controls(&md, "Ctrl").unwrap();
        assert_eq!(a.len(), 1);
        // 12h: 6h is 6 away; 0h and 24h tie at 12 away and the earlier wins
        assert_eq!(a[0].controls, vec![0, 1]);

        let md = metadata(&[
            ("Ctrl", "0h"),
            ("Ctrl", "6h"),
            ("Ctrl", "24h"),
            ("Ctrl", "48h"),
            ("APAP", "16h"),
        ]);
        // 16h: 24h is 8 away, 6h is 10 away
        let a = assign_controls(&md, "Ctrl").unwrap();
        assert_eq!(a[0].controls, vec![1, 2]);

        let md = metadata(&[
            ("Ctrl", "0h"),
            ("Ctrl", "12h"),
            ("Ctrl", "24h"),
            ("APAP", "18h"),
        ]);
        // 12h and 24h are both 6 away; 0h is 18 away
        let a = assign_controls(&md, "Ctrl").unwrap();
        assert_eq!(a[0].controls, vec![1, 2]);

        let md = metadata(&[
            ("Ctrl", "10h"),
            ("Ctrl", "18h"),
            ("Ctrl", "30h"),
            ("APAP", "20h"),
        ]);
        // 18h is nearest; 10h and 30h tie for second and the earlier wins
        let a = assign_controls(&md, "Ctrl").unwrap();
        assert_eq!(a[0].controls, vec![0, 1]);
    }
}
