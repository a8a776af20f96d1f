//! Typed sample metadata and the declarative label -> factor mapping

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Experimental factors a sample can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Factor {
    Treatment,
    Time,
    Tissue,
    Diet,
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Factor::Treatment => "treatment",
            Factor::Time => "time",
            Factor::Tissue => "tissue",
            Factor::Diet => "diet",
        };
        f.write_str(s)
    }
}

/// A time point label with its value in hours
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimePoint {
    pub label: String,
    pub hours: f64,
}

impl TimePoint {
    /// Parse labels such as `0`, `6h`, `24h`, `3d`, `2w`, `30min`
    ///
    /// A bare number is read as hours.
    pub fn parse(label: &str) -> Result<Self> {
        let trimmed = label.trim();
        let split = trimmed
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(trimmed.len());
        let (number, unit) = trimmed.split_at(split);
        let value: f64 = number.parse().map_err(|_| PipelineError::InvalidMetadata {
            reason: format!("cannot parse time point '{}'", label),
        })?;
        let scale = match unit.trim().to_ascii_lowercase().as_str() {
            "" | "h" | "hr" | "hrs" | "hour" | "hours" => 1.0,
            "min" | "m" => 1.0 / 60.0,
            "d" | "day" | "days" => 24.0,
            "w" | "wk" | "week" | "weeks" => 168.0,
            other => {
                return Err(PipelineError::InvalidMetadata {
                    reason: format!("unknown time unit '{}' in '{}'", other, label),
                })
            }
        };
        Ok(Self {
            label: trimmed.to_string(),
            hours: value * scale,
        })
    }
}

/// Characters a grouping level may contain so a contrast can name it
pub(crate) fn is_level_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.'
}

/// One row of a metadata table as read from disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub sample_id: String,
    pub treatment: String,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub tissue: Option<String>,
    #[serde(default)]
    pub diet: Option<String>,
}

/// A sample with typed factors and its derived model group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub sample_id: String,
    pub treatment: String,
    pub time: Option<TimePoint>,
    pub tissue: Option<String>,
    pub diet: Option<String>,
    /// Concatenation of the grouping factor levels, used as the model key
    pub group: String,
}

impl Sample {
    /// Level of a factor for this sample, if the sample carries it
    pub fn level(&self, factor: Factor) -> Option<&str> {
        match factor {
            Factor::Treatment => Some(self.treatment.as_str()),
            Factor::Time => self.time.as_ref().map(|t| t.label.as_str()),
            Factor::Tissue => self.tissue.as_deref(),
            Factor::Diet => self.diet.as_deref(),
        }
    }
}

/// Sample metadata for one study
/// R equivalent: pData(eset) / DGEList$samples with a `group` column
///
/// Built once per study and immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleMetadata {
    samples: Vec<Sample>,
    group_factors: Vec<Factor>,
}

impl SampleMetadata {
    /// Build typed metadata, deriving `group` from `group_factors`
    pub fn new(records: Vec<SampleRecord>, group_factors: &[Factor]) -> Result<Self> {
        if records.is_empty() {
            return Err(PipelineError::EmptyData {
                reason: "no samples in metadata".to_string(),
            });
        }
        if group_factors.is_empty() {
            return Err(PipelineError::InvalidMetadata {
                reason: "at least one grouping factor is required".to_string(),
            });
        }

        let mut seen = HashSet::new();
        let mut samples = Vec::with_capacity(records.len());
        for rec in records {
            if !seen.insert(rec.sample_id.clone()) {
                return Err(PipelineError::InvalidMetadata {
                    reason: format!("duplicate sample ID '{}'", rec.sample_id),
                });
            }
            if rec.treatment.trim().is_empty() {
                return Err(PipelineError::InvalidMetadata {
                    reason: format!("sample '{}' has no treatment", rec.sample_id),
                });
            }
            let time = match rec.time.as_deref().map(str::trim) {
                Some(t) if !t.is_empty() => Some(TimePoint::parse(t)?),
                _ => None,
            };
            let mut sample = Sample {
                sample_id: rec.sample_id,
                treatment: rec.treatment.trim().to_string(),
                time,
                tissue: rec.tissue.filter(|s| !s.trim().is_empty()),
                diet: rec.diet.filter(|s| !s.trim().is_empty()),
                group: String::new(),
            };

            let mut parts = Vec::with_capacity(group_factors.len());
            for &factor in group_factors {
                let level = sample.level(factor).ok_or_else(|| PipelineError::InvalidMetadata {
                    reason: format!(
                        "sample '{}' has no value for grouping factor '{}'",
                        sample.sample_id, factor
                    ),
                })?;
                if let Some(c) = level.chars().find(|&c| !is_level_char(c)) {
                    return Err(PipelineError::InvalidMetadata {
                        reason: format!(
                            "sample '{}': {} level '{}' contains '{}'; grouping levels may only use letters, digits, '_' and '.'",
                            sample.sample_id, factor, level, c
                        ),
                    });
                }
                parts.push(level.to_string());
            }
            sample.group = parts.join("_");
            if matches!(sample.group.parse::<f64>(), Ok(v) if v.is_finite()) {
                return Err(PipelineError::InvalidMetadata {
                    reason: format!(
                        "sample '{}': group '{}' reads as a number and cannot be used in a contrast",
                        sample.sample_id, sample.group
                    ),
                });
            }
            samples.push(sample);
        }

        Ok(Self {
            samples,
            group_factors: group_factors.to_vec(),
        })
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn sample(&self, idx: usize) -> &Sample {
        &self.samples[idx]
    }

    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn group_factors(&self) -> &[Factor] {
        &self.group_factors
    }

    pub fn sample_ids(&self) -> Vec<String> {
        self.samples.iter().map(|s| s.sample_id.clone()).collect()
    }

    /// Per-sample group labels in sample order
    pub fn groups(&self) -> Vec<&str> {
        self.samples.iter().map(|s| s.group.as_str()).collect()
    }

    /// Unique group levels (sorted)
    pub fn group_levels(&self) -> Vec<String> {
        let set: BTreeSet<&str> = self.samples.iter().map(|s| s.group.as_str()).collect();
        set.into_iter().map(|s| s.to_string()).collect()
    }

    /// Sample indices belonging to a group level
    pub fn samples_in_group(&self, level: &str) -> Vec<usize> {
        self.indices_where(|s| s.group == level)
    }

    /// Sample indices with a given treatment
    pub fn samples_with_treatment(&self, treatment: &str) -> Vec<usize> {
        self.indices_where(|s| s.treatment == treatment)
    }

    /// Sample indices matching a predicate
    pub fn indices_where<F: Fn(&Sample) -> bool>(&self, pred: F) -> Vec<usize> {
        self.samples
            .iter()
            .enumerate()
            .filter(|(_, s)| pred(s))
            .map(|(i, _)| i)
            .collect()
    }

    /// Subset metadata to specific samples
    pub fn subset(&self, sample_indices: &[usize]) -> Self {
        Self {
            samples: sample_indices.iter().map(|&i| self.samples[i].clone()).collect(),
            group_factors: self.group_factors.clone(),
        }
    }
}

/// One row of a label mapping table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorMapEntry {
    pub label: String,
    pub treatment: String,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub tissue: Option<String>,
    #[serde(default)]
    pub diet: Option<String>,
}

/// Declarative mapping from sample labels to factor values
///
/// Replaces pattern matching on file names: every label a study uses must
/// be listed, and unknown labels are rejected when metadata is built.
#[derive(Debug, Clone, Default)]
pub struct FactorMap {
    entries: HashMap<String, FactorMapEntry>,
}

impl FactorMap {
    pub fn new(entries: Vec<FactorMapEntry>) -> Result<Self> {
        let mut map = HashMap::with_capacity(entries.len());
        for entry in entries {
            if let Some(time) = entry.time.as_deref().filter(|t| !t.trim().is_empty()) {
                TimePoint::parse(time)?;
            }
            let label = entry.label.clone();
            if map.insert(label.clone(), entry).is_some() {
                return Err(PipelineError::InvalidMetadata {
                    reason: format!("label '{}' appears twice in factor map", label),
                });
            }
        }
        Ok(Self { entries: map })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve (sample_id, label) pairs into metadata records
    pub fn resolve(&self, labelled: &[(String, String)]) -> Result<Vec<SampleRecord>> {
        let mut unknown = Vec::new();
        let mut records = Vec::with_capacity(labelled.len());
        for (sample_id, label) in labelled {
            match self.entries.get(label) {
                Some(e) => records.push(SampleRecord {
                    sample_id: sample_id.clone(),
                    treatment: e.treatment.clone(),
                    time: e.time.clone(),
                    tissue: e.tissue.clone(),
                    diet: e.diet.clone(),
                }),
                None => unknown.push(label.as_str()),
            }
        }
        if !unknown.is_empty() {
            return Err(PipelineError::InvalidMetadata {
                reason: format!("labels missing from factor map: {:?}", unknown),
            });
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, treatment: &str, time: &str) -> SampleRecord {
        SampleRecord {
            sample_id: id.to_string(),
            treatment: treatment.to_string(),
            time: Some(time.to_string()),
            tissue: None,
            diet: None,
        }
    }

    #[test]
    fn test_group_derivation() {
        let meta = SampleMetadata::new(
            vec![
                record("s1", "Ctrl", "6h"),
                record("s2", "Ctrl", "6h"),
                record("s3", "APAP", "6h"),
                record("s4", "APAP", "24h"),
            ],
            &[Factor::Treatment, Factor::Time],
        )
        .unwrap();

        assert_eq!(meta.groups(), vec!["Ctrl_6h", "Ctrl_6h", "APAP_6h", "APAP_24h"]);
        assert_eq!(meta.group_levels(), vec!["APAP_24h", "APAP_6h", "Ctrl_6h"]);
        assert_eq!(meta.samples_in_group("Ctrl_6h"), vec![0, 1]);
        assert_eq!(meta.samples_with_treatment("APAP"), vec![2, 3]);
    }

    #[test]
    fn test_missing_group_factor_rejected() {
        let rec = SampleRecord {
            sample_id: "s1".to_string(),
            treatment: "Ctrl".to_string(),
            time: None,
            tissue: None,
            diet: None,
        };
        let r = SampleMetadata::new(vec![rec], &[Factor::Treatment, Factor::Time]);
        assert!(matches!(r, Err(PipelineError::InvalidMetadata { .. })));
    }

    #[test]
    fn test_group_levels_must_be_contrast_identifiers() {
        for treatment in ["CCl4-2w", "APAP 300", "APAP(300)"] {
            let err = SampleMetadata::new(vec![record("s1", treatment, "6h")], &[Factor::Treatment]).unwrap_err();
            assert!(matches!(err, PipelineError::InvalidMetadata { .. }), "{}", treatment);
        }
        let err = SampleMetadata::new(vec![record("s1", "300", "6h")], &[Factor::Treatment]).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidMetadata { .. }));

        // only grouping factors are constrained
        let mut rec = record("s1", "CCl4_2w", "6h");
        rec.tissue = Some("left lobe".to_string());
        let meta = SampleMetadata::new(vec![rec], &[Factor::Treatment, Factor::Time]).unwrap();
        assert_eq!(meta.sample(0).group, "CCl4_2w_6h");
        let meta = SampleMetadata::new(vec![record("s1", "300", "6h")], &[Factor::Treatment, Factor::Time]).unwrap();
        assert_eq!(meta.sample(0).group, "300_6h");
    }

    #[test]
    fn test_time_point_units() {
        assert_eq!(TimePoint::parse("24h").unwrap().hours, 24.0);
        assert_eq!(TimePoint::parse("3d").unwrap().hours, 72.0);
        assert_eq!(TimePoint::parse("0").unwrap().hours, 0.0);
        assert!(TimePoint::parse("soon").is_err());
        assert!(TimePoint::parse("5y").is_err());
    }

    #[test]
    fn test_factor_map_resolve_and_unknown_label() {
        let map = FactorMap::new(vec![FactorMapEntry {
            label: "CCl4_2w".to_string(),
            treatment: "CCl4".to_string(),
            time: Some("2w".to_string()),
            tissue: None,
            diet: None,
        }])
        .unwrap();

        let ok = map
            .resolve(&[("GSM1".to_string(), "CCl4_2w".to_string())])
            .unwrap();
        assert_eq!(ok[0].treatment, "CCl4");

        let err = map.resolve(&[("GSM2".to_string(), "Oil_2w".to_string())]);
        assert!(err.is_err());
    }
}
