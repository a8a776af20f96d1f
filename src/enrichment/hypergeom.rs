//! Over-representation of gene sets among trajectory profile members
//! R equivalent: phyper(overlap - 1, set, universe - set, profile, lower.tail = FALSE)

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use statrs::distribution::{DiscreteCDF, Hypergeometric};

use super::GeneSetCatalog;
use crate::clustering::ClusterProfile;
use crate::config::EnrichmentParams;
use crate::error::{PipelineError, Result};
use crate::testing::benjamini_hochberg;

/// Enrichment of one gene set in one profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentRecord {
    pub profile_id: u32,
    pub gene_set: String,
    pub set_size: usize,
    pub profile_size: usize,
    pub overlap: usize,
    /// (overlap / profile size) / (set size / universe)
    pub fold_enrichment: f64,
    pub p_value: f64,
    pub adj_p_value: Option<f64>,
    pub overlapping_genes: Vec<String>,
}

/// P(X >= overlap) for X ~ Hypergeometric(universe, set size, profile size)
pub fn hypergeometric_pvalue(universe: u64, set_size: u64, profile_size: u64, overlap: u64) -> Result<f64> {
    if overlap == 0 {
        return Ok(1.0);
    }
    let hyper = Hypergeometric::new(universe, set_size, profile_size).map_err(|e| {
        PipelineError::InvalidInput {
            reason: format!(
                "hypergeometric(population {}, successes {}, draws {}): {}",
                universe, set_size, profile_size, e
            ),
        }
    })?;
    // sf is P(X > x); subtract one to include the observed overlap
    Ok(hyper.sf(overlap - 1))
}

/// Test every eligible gene set against every profile
///
/// Sets outside `[min_set_size, max_set_size]` are excluded before testing
/// and do not count towards the BH correction. Profiles without members are
/// skipped. Only sets sharing at least one gene with the profile are
/// reported; the others still count as tested with p = 1.
pub fn enrich_profiles(
    profiles: &[ClusterProfile],
    catalog: &GeneSetCatalog,
    params: &EnrichmentParams,
) -> Result<Vec<EnrichmentRecord>> {
    let eligible: Vec<_> = catalog
        .iter()
        .filter(|s| (params.min_set_size..=params.max_set_size).contains(&s.len()))
        .collect();
    log::info!(
        "Testing {} of {} gene sets (size {}..={}) against {} profiles",
        eligible.len(),
        catalog.len(),
        params.min_set_size,
        params.max_set_size,
        profiles.len()
    );

    let universe = params.universe_size;
    let mut records = Vec::new();
    for profile in profiles {
        if profile.members.is_empty() {
            log::debug!("Profile {} has no genes; skipped", profile.id);
            continue;
        }
        let members: HashSet<&str> = profile.members.iter().map(String::as_str).collect();
        let profile_size = members.len();

        let mut tested = Vec::with_capacity(eligible.len());
        for set in &eligible {
            let overlapping: Vec<String> = set
                .genes()
                .iter()
                .filter(|g| members.contains(g.as_str()))
                .cloned()
                .collect();
            let p = hypergeometric_pvalue(
                universe,
                set.len() as u64,
                profile_size as u64,
                overlapping.len() as u64,
            )?;
            tested.push((set, overlapping, p));
        }

        let pvalues: Vec<f64> = tested.iter().map(|t| t.2).collect();
        let padj = if params.adjust {
            benjamini_hochberg(&pvalues)
        } else {
            vec![f64::NAN; pvalues.len()]
        };

        for ((set, overlapping, p), adj) in tested.into_iter().zip(padj) {
            if overlapping.is_empty() {
                continue;
            }
            let fold = (overlapping.len() as f64 / profile_size as f64)
                / (set.len() as f64 / universe as f64);
            records.push(EnrichmentRecord {
                profile_id: profile.id,
                gene_set: set.name.clone(),
                set_size: set.len(),
                profile_size,
                overlap: overlapping.len(),
                fold_enrichment: fold,
                p_value: p,
                adj_p_value: if adj.is_finite() { Some(adj) } else { None },
                overlapping_genes: overlapping,
            });
        }
    }
    Ok(records)
}
