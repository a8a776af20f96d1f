//! Differential-expression result table

use serde::{Deserialize, Serialize};

use crate::config::DeThresholds;

/// Absolute tolerance on the fold-change threshold so that values equal to
/// the threshold up to floating-point rounding still pass
const LFC_TOLERANCE: f64 = 1e-9;

/// Direction of a differential-expression call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Regulation {
    Up,
    Down,
    Ns,
}

impl Regulation {
    /// Call a gene from its fold change and adjusted p-value
    ///
    /// Up/down require |logFC| >= `min_abs_log_fc` and adj.p <= `max_adj_p`;
    /// a missing adjusted p-value is always `Ns`.
    pub fn call(log_fc: f64, adj_p: Option<f64>, thresholds: &DeThresholds) -> Self {
        let adj_p = match adj_p {
            Some(p) if p.is_finite() => p,
            _ => return Regulation::Ns,
        };
        if !log_fc.is_finite()
            || adj_p > thresholds.max_adj_p
            || log_fc.abs() < thresholds.min_abs_log_fc - LFC_TOLERANCE
        {
            return Regulation::Ns;
        }
        if log_fc > 0.0 {
            Regulation::Up
        } else {
            Regulation::Down
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Regulation::Up => "up",
            Regulation::Down => "down",
            Regulation::Ns => "ns",
        }
    }
}

impl std::fmt::Display for Regulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One gene in one contrast
/// R equivalent: a row of limma::topTable(fit, coef = contrast, number = Inf)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeRecord {
    pub gene_id: String,
    pub contrast: String,
    pub log_fc: f64,
    pub ave_expr: f64,
    pub t: Option<f64>,
    pub p_value: Option<f64>,
    pub adj_p_value: Option<f64>,
    /// Total df of the moderated t (residual + prior)
    pub df: Option<f64>,
    /// False when only the effect size could be estimated
    pub estimable: bool,
    pub regulation: Regulation,
}

/// Results of every contrast, grouped by contrast in definition order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeTable {
    pub records: Vec<DeRecord>,
}

impl DeTable {
    pub fn new(records: Vec<DeRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Contrast names in first-appearance order
    pub fn contrasts(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for r in &self.records {
            if !names.contains(&r.contrast.as_str()) {
                names.push(&r.contrast);
            }
        }
        names
    }

    pub fn for_contrast<'a, 'c>(&'a self, contrast: &'c str) -> impl Iterator<Item = &'a DeRecord> + 'c
    where
        'a: 'c,
    {
        self.records.iter().filter(move |r| r.contrast == contrast)
    }

    pub fn genes_with(&self, contrast: &str, regulation: Regulation) -> Vec<&str> {
        self.for_contrast(contrast)
            .filter(|r| r.regulation == regulation)
            .map(|r| r.gene_id.as_str())
            .collect()
    }

    /// Per-contrast counts
    pub fn summary(&self) -> Vec<ContrastSummary> {
        self.contrasts()
            .into_iter()
            .map(|c| {
                let mut s = ContrastSummary {
                    contrast: c.to_string(),
                    ..Default::default()
                };
                for r in self.for_contrast(c) {
                    s.total_genes += 1;
                    if r.p_value.is_some() {
                        s.genes_tested += 1;
                    }
                    match r.regulation {
                        Regulation::Up => s.upregulated += 1,
                        Regulation::Down => s.downregulated += 1,
                        Regulation::Ns => {}
                    }
                }
                s.estimable = self.for_contrast(c).any(|r| r.estimable);
                s
            })
            .collect()
    }
}

/// Counts of one contrast
/// R equivalent: summary(decideTests(fit))
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContrastSummary {
    pub contrast: String,
    pub total_genes: usize,
    pub genes_tested: usize,
    pub upregulated: usize,
    pub downregulated: usize,
    pub estimable: bool,
}

impl std::fmt::Display for ContrastSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Contrast {}", self.contrast)?;
        writeln!(f, "  Total genes: {}", self.total_genes)?;
        if self.estimable {
            writeln!(f, "  Genes tested: {}", self.genes_tested)?;
        } else {
            writeln!(f, "  Genes tested: none (effect sizes only)")?;
        }
        writeln!(f, "  Up-regulated: {}", self.upregulated)?;
        writeln!(f, "  Down-regulated: {}", self.downregulated)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t() -> DeThresholds {
        DeThresholds::default()
    }

    #[test]
    fn test_regulation_call() {
        assert_eq!(Regulation::call(1.5, Some(0.01), &t()), Regulation::Up);
        assert_eq!(Regulation::call(-1.5, Some(0.01), &t()), Regulation::Down);
        assert_eq!(Regulation::call(0.5, Some(0.001), &t()), Regulation::Ns);
        assert_eq!(Regulation::call(3.0, Some(0.2), &t()), Regulation::Ns);
        assert_eq!(Regulation::call(3.0, None, &t()), Regulation::Ns);
    }

    #[test]
    fn test_regulation_threshold_with_rounding() {
        let lfc = 10f64.log2() - 5f64.log2();
        assert_eq!(Regulation::call(lfc, Some(0.01), &t()), Regulation::Up);
    }

    #[test]
    fn test_regulation_monotone_in_fold_change() {
        // increasing |logFC| at fixed p never turns a call back to ns
        let mut seen_up = false;
        for i in 0..40 {
            let lfc = i as f64 * 0.1;
            let call = Regulation::call(lfc, Some(0.01), &t());
            if seen_up {
                assert_eq!(call, Regulation::Up);
            }
            seen_up |= call == Regulation::Up;
        }
        assert!(seen_up);
    }

    #[test]
    fn test_summary_counts() {
        let rec = |gene: &str, reg: Regulation| DeRecord {
            gene_id: gene.to_string(),
            contrast: "c".to_string(),
            log_fc: 1.0,
            ave_expr: 5.0,
            t: Some(3.0),
            p_value: Some(0.01),
            adj_p_value: Some(0.02),
            df: Some(4.0),
            estimable: true,
            regulation: reg,
        };
        let table = DeTable::new(vec![rec("a", Regulation::Up), rec("b", Regulation::Ns), rec("c", Regulation::Down)]);
        let s = &table.summary()[0];
        assert_eq!(s.total_genes, 3);
        assert_eq!(s.upregulated, 1);
        assert_eq!(s.downregulated, 1);
        assert_eq!(table.genes_with("c", Regulation::Up), vec!["a"]);
    }

    #[test]
    fn test_genes_with_borrows_table_not_contrast_name() {
        let rec = |gene: &str, contrast: &str, reg: Regulation| DeRecord {
            gene_id: gene.to_string(),
            contrast: contrast.to_string(),
            log_fc: -2.0,
            ave_expr: 5.0,
            t: Some(-4.0),
            p_value: Some(0.001),
            adj_p_value: Some(0.01),
            df: Some(4.0),
            estimable: true,
            regulation: reg,
        };
        let table = DeTable::new(vec![
            rec("Cyp2e1", "apap_24h", Regulation::Down),
            rec("Cyp2e1", "apap_6h", Regulation::Ns),
            rec("Hmox1", "apap_24h", Regulation::Up),
        ]);
        let down = {
            let name = format!("apap_{}h", 24);
            table.genes_with(&name, Regulation::Down)
        };
        assert_eq!(down, vec!["Cyp2e1"]);
        assert_eq!(table.for_contrast("apap_6h").count(), 1);
    }
}
