//! Gene set over-representation analysis of trajectory profiles

mod gene_sets;
mod hypergeom;

pub use gene_sets::{GeneSet, GeneSetCatalog};
pub use hypergeom::{enrich_profiles, hypergeometric_pvalue, EnrichmentRecord};
