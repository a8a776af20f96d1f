//! Translation of result tables between species via an ortholog table

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::io::{DeRecord, DeTable};

#[derive(Debug, Deserialize)]
struct OrthologRow {
    source_gene: String,
    target_gene: String,
}

/// Source gene -> target genes, one-to-many allowed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrthologTable {
    map: HashMap<String, Vec<String>>,
}

impl OrthologTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a TSV with `source_gene` and `target_gene` columns
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .from_path(path)?;
        let mut table = Self::new();
        for row in reader.deserialize() {
            let row: OrthologRow = row?;
            let (source, target) = (row.source_gene.trim(), row.target_gene.trim());
            if source.is_empty() || target.is_empty() {
                continue;
            }
            table.insert(source, target);
        }
        if table.is_empty() {
            return Err(PipelineError::EmptyData {
                reason: format!("no ortholog pairs in {}", path.display()),
            });
        }
        log::info!(
            "Loaded orthologs for {} source genes from {}",
            table.len(),
            path.display()
        );
        Ok(table)
    }

    pub fn insert(&mut self, source: &str, target: &str) {
        let targets = self.map.entry(source.to_string()).or_default();
        if !targets.iter().any(|t| t == target) {
            targets.push(target.to_string());
        }
    }

    pub fn targets(&self, source: &str) -> &[String] {
        self.map.get(source).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of source genes
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Row counts of a translation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranslationSummary {
    pub input_rows: usize,
    pub unmapped_rows: usize,
    /// Rows dropped because another source gene had a larger |logFC| for the same target
    pub collapsed_rows: usize,
    pub output_rows: usize,
}

/// Rename genes to their orthologs
///
/// Rows without an ortholog are dropped and counted. A source gene with
/// several orthologs yields one row per target. When several rows land on
/// the same (contrast, target gene), the one with the largest |logFC| is
/// kept; on equal |logFC| the first encountered wins.
pub fn translate_results(table: &DeTable, orthologs: &OrthologTable) -> (DeTable, TranslationSummary) {
    let mut summary = TranslationSummary {
        input_rows: table.len(),
        ..Default::default()
    };
    let mut out: Vec<DeRecord> = Vec::new();
    let mut slot: HashMap<(String, String), usize> = HashMap::new();

    for record in &table.records {
        let targets = orthologs.targets(&record.gene_id);
        if targets.is_empty() {
            log::debug!("No ortholog for {}", record.gene_id);
            summary.unmapped_rows += 1;
            continue;
        }
        for target in targets {
            let key = (record.contrast.clone(), target.clone());
            match slot.get(&key) {
                Some(&i) => {
                    summary.collapsed_rows += 1;
                    if record.log_fc.abs() > out[i].log_fc.abs() {
                        out[i] = DeRecord {
                            gene_id: target.clone(),
                            ..record.clone()
                        };
                    }
                }
                None => {
                    slot.insert(key, out.len());
                    out.push(DeRecord {
                        gene_id: target.clone(),
                        ..record.clone()
                    });
                }
            }
        }
    }

    summary.output_rows = out.len();
    if summary.unmapped_rows > 0 {
        log::warn!(
            "{} of {} rows had no ortholog and were dropped",
            summary.unmapped_rows,
            summary.input_rows
        );
    }
    (DeTable::new(out), summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Regulation;
    use std::fs;
    use tempfile::TempDir;

    fn record(gene: &str, contrast: &str, log_fc: f64, p: f64) -> DeRecord {
        DeRecord {
            gene_id: gene.to_string(),
            contrast: contrast.to_string(),
            log_fc,
            ave_expr: 6.0,
            t: Some(log_fc * 10.0),
            p_value: Some(p),
            adj_p_value: Some(p),
            df: Some(10.0),
            estimable: true,
            regulation: Regulation::Ns,
        }
    }

    fn table() -> OrthologTable {
        let mut t = OrthologTable::new();
        t.insert("Cyp2b1", "CYP2B6");
        t.insert("Cyp2b2", "CYP2B6");
        t.insert("Mt1", "MT1A");
        t.insert("Mt1", "MT1X");
        t
    }

    #[test]
    fn test_max_abs_log_fc_survives() {
        let de = DeTable::new(vec![
            record("Cyp2b1", "apap", 1.5, 0.01),
            record("Cyp2b2", "apap", -2.5, 0.02),
            record("Cyp2b1", "ccl4", 0.5, 0.3),
        ]);
        let (out, summary) = translate_results(&de, &table());
        assert_eq!(out.len(), 2);
        let apap = out.for_contrast("apap").next().unwrap();
        assert_eq!(apap.gene_id, "CYP2B6");
        assert_eq!(apap.log_fc, -2.5);
        assert_eq!(apap.p_value, Some(0.02));
        assert_eq!(summary.collapsed_rows, 1);
    }

    #[test]
    fn test_tie_keeps_first() {
        let de = DeTable::new(vec![
            record("Cyp2b1", "apap", 2.0, 0.01),
            record("Cyp2b2", "apap", -2.0, 0.02),
        ]);
        let (out, _) = translate_results(&de, &table());
        assert_eq!(out.records[0].log_fc, 2.0);
    }

    #[test]
    fn test_unmapped_dropped_and_one_to_many_expanded() {
        let de = DeTable::new(vec![record("Mt1", "apap", 1.0, 0.01), record("Alb", "apap", 1.0, 0.01)]);
        let (out, summary) = translate_results(&de, &table());
        let genes: Vec<&str> = out.records.iter().map(|r| r.gene_id.as_str()).collect();
        assert_eq!(genes, vec!["MT1A", "MT1X"]);
        assert_eq!(summary.unmapped_rows, 1);
        assert_eq!(summary.output_rows, 2);
    }

    #[test]
    fn test_from_tsv() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("orthologs.tsv");
        fs::write(&path, "source_gene\ttarget_gene\nMt1\tMT1A\nMt1\tMT1X\nMt1\tMT1A\nAlb\t\n").unwrap();
        let t = OrthologTable::from_tsv(&path).unwrap();
        assert_eq!(t.targets("Mt1"), &["MT1A".to_string(), "MT1X".to_string()]);
        assert!(t.targets("Alb").is_empty());
    }
}
