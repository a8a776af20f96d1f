//! Time-course trajectory clustering of effect sizes
//!
//! The clustering itself runs in an external tool behind the
//! [`TrajectoryClusterer`] trait; [`StemAdapter`] drives STEM.

mod stem;

pub use stem::{parse_gene_table, parse_profile_table, StemAdapter};

use std::collections::HashMap;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::config::TimePointContrast;
use crate::error::{PipelineError, Result};
use crate::io::DeTable;

/// Genes x ordered time points of log fold changes
#[derive(Debug, Clone, PartialEq)]
pub struct EffectTable {
    pub gene_ids: Vec<String>,
    pub time_labels: Vec<String>,
    pub values: Array2<f64>,
}

impl EffectTable {
    /// Collect the logFC of each time point's contrast
    ///
    /// Gene order follows the first contrast; every gene must be present in
    /// every contrast.
    pub fn from_de(table: &DeTable, time_course: &[TimePointContrast]) -> Result<Self> {
        if time_course.is_empty() {
            return Err(PipelineError::InvalidInput {
                reason: "time course has no time points".to_string(),
            });
        }

        let mut columns: Vec<HashMap<&str, f64>> = Vec::with_capacity(time_course.len());
        for tp in time_course {
            let col: HashMap<&str, f64> = table
                .for_contrast(&tp.contrast)
                .map(|r| (r.gene_id.as_str(), r.log_fc))
                .collect();
            if col.is_empty() {
                return Err(PipelineError::InvalidInput {
                    reason: format!("no results for contrast '{}' (time {})", tp.contrast, tp.time),
                });
            }
            columns.push(col);
        }

        let gene_ids: Vec<String> = table
            .for_contrast(&time_course[0].contrast)
            .map(|r| r.gene_id.clone())
            .collect();
        let mut values = Array2::zeros((gene_ids.len(), time_course.len()));
        for (g, gene) in gene_ids.iter().enumerate() {
            for (t, col) in columns.iter().enumerate() {
                values[[g, t]] = *col.get(gene.as_str()).ok_or_else(|| PipelineError::InvalidInput {
                    reason: format!(
                        "gene '{}' missing from contrast '{}'",
                        gene, time_course[t].contrast
                    ),
                })?;
            }
        }

        Ok(Self {
            gene_ids,
            time_labels: time_course.iter().map(|tp| tp.time.clone()).collect(),
            values,
        })
    }

    pub fn n_genes(&self) -> usize {
        self.gene_ids.len()
    }

    pub fn n_time_points(&self) -> usize {
        self.time_labels.len()
    }
}

/// One model profile with its assigned genes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterProfile {
    pub id: u32,
    /// Model values per time point
    pub model: Vec<f64>,
    /// Cluster of significant profiles; -1 when not significant
    pub cluster: i32,
    pub members: Vec<String>,
    pub expected: f64,
    pub p_value: f64,
}

impl ClusterProfile {
    pub fn size(&self) -> usize {
        self.members.len()
    }
}

/// A time-course clustering backend
pub trait TrajectoryClusterer {
    fn cluster(&self, effects: &EffectTable) -> Result<Vec<ClusterProfile>>;
}

/// Profiles with p-value at or below `max_p`, in input order
pub fn significant_profiles(profiles: &[ClusterProfile], max_p: f64) -> Vec<ClusterProfile> {
    profiles
        .iter()
        .filter(|p| p.p_value.is_finite() && p.p_value <= max_p)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{DeRecord, Regulation};

    fn record(gene: &str, contrast: &str, log_fc: f64) -> DeRecord {
        DeRecord {
            gene_id: gene.to_string(),
            contrast: contrast.to_string(),
            log_fc,
            ave_expr: 5.0,
            t: None,
            p_value: None,
            adj_p_value: None,
            df: None,
            estimable: false,
            regulation: Regulation::Ns,
        }
    }

    fn time_course() -> Vec<TimePointContrast> {
        vec![
            TimePointContrast { time: "6h".into(), contrast: "c6".into() },
            TimePointContrast { time: "24h".into(), contrast: "c24".into() },
        ]
    }

    #[test]
    fn test_effect_table_from_de() {
        let table = DeTable::new(vec![
            record("Alb", "c6", 0.5),
            record("Hmox1", "c6", 2.0),
            record("Hmox1", "c24", 1.0),
            record("Alb", "c24", -0.5),
        ]);
        let e = EffectTable::from_de(&table, &time_course()).unwrap();
        assert_eq!(e.gene_ids, vec!["Alb".to_string(), "Hmox1".to_string()]);
        assert_eq!(e.values.row(0).to_vec(), vec![0.5, -0.5]);
        assert_eq!(e.values.row(1).to_vec(), vec![2.0, 1.0]);
    }

    #[test]
    fn test_effect_table_missing_gene() {
        let table = DeTable::new(vec![record("Alb", "c6", 0.5), record("Hmox1", "c24", 1.0)]);
        assert!(EffectTable::from_de(&table, &time_course()).is_err());
    }

    #[test]
    fn test_significant_profiles() {
        let p = |id: u32, p_value: f64| ClusterProfile {
            id,
            model: vec![0.0, 1.0],
            cluster: -1,
            members: vec![],
            expected: 1.0,
            p_value,
        };
        let kept = significant_profiles(&[p(1, 0.01), p(2, 0.5), p(3, 0.05)], 0.05);
        assert_eq!(kept.iter().map(|c| c.id).collect::<Vec<_>>(), vec![1, 3]);
    }
}
