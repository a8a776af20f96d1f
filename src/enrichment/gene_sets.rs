//! Curated gene set collections in GMT format

use std::collections::HashSet;
use std::path::Path;

use crate::error::{PipelineError, Result};

/// A named set of gene symbols, without duplicates
#[derive(Debug, Clone, PartialEq)]
pub struct GeneSet {
    pub name: String,
    pub description: String,
    genes: Vec<String>,
}

impl GeneSet {
    pub fn new(name: impl Into<String>, description: impl Into<String>, genes: Vec<String>) -> Self {
        let mut set = Self {
            name: name.into(),
            description: description.into(),
            genes: Vec::with_capacity(genes.len()),
        };
        set.extend(genes);
        set
    }

    pub fn genes(&self) -> &[String] {
        &self.genes
    }

    pub fn len(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }

    /// Append genes not yet present, keeping first-seen order
    fn extend(&mut self, genes: impl IntoIterator<Item = String>) {
        let mut seen: HashSet<String> = self.genes.iter().cloned().collect();
        for g in genes {
            if !g.is_empty() && seen.insert(g.clone()) {
                self.genes.push(g);
            }
        }
    }
}

/// All gene sets available for enrichment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneSetCatalog {
    sets: Vec<GeneSet>,
}

impl GeneSetCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read one GMT file: name, description, then one gene per tab-separated field
    pub fn from_gmt<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .comment(Some(b'#'))
            .from_path(path)?;

        let mut catalog = Self::new();
        for (line, record) in reader.records().enumerate() {
            let record = record?;
            if record.iter().all(|f| f.trim().is_empty()) {
                continue;
            }
            if record.len() < 2 {
                return Err(PipelineError::InvalidInput {
                    reason: format!(
                        "{} line {}: a GMT row needs a name and a description",
                        path.display(),
                        line + 1
                    ),
                });
            }
            let genes = record.iter().skip(2).map(|g| g.trim().to_string()).collect();
            catalog.insert(GeneSet::new(record[0].trim(), record[1].trim(), genes));
        }
        log::info!("Loaded {} gene sets from {}", catalog.len(), path.display());
        Ok(catalog)
    }

    /// Read and merge several GMT files in order
    pub fn from_gmt_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut catalog = Self::new();
        for path in paths {
            catalog.merge(Self::from_gmt(path)?);
        }
        Ok(catalog)
    }

    /// Add a set; a set with an existing name is unioned into it
    pub fn insert(&mut self, set: GeneSet) {
        match self.sets.iter_mut().find(|s| s.name == set.name) {
            Some(existing) => {
                log::debug!("Merging duplicate gene set '{}'", set.name);
                existing.extend(set.genes);
            }
            None => self.sets.push(set),
        }
    }

    pub fn merge(&mut self, other: GeneSetCatalog) {
        for set in other.sets {
            self.insert(set);
        }
    }

    pub fn get(&self, name: &str) -> Option<&GeneSet> {
        self.sets.iter().find(|s| s.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &GeneSet> {
        self.sets.iter()
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}
