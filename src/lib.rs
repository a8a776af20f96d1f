//! liver_expr: per-study expression analysis for liver injury studies
//!
//! One study at a time: load a microarray, RNA-seq or pre-summarized matrix
//! with its sample metadata, filter and normalize it, test named contrasts
//! with limma-style moderated t-statistics, z-score treated samples against
//! their controls, cluster time-course effect sizes with STEM, test the
//! clusters for gene set enrichment and translate results to orthologs.
//!
//! # Example
//!
//! ```ignore
//! use liver_expr::prelude::*;
//!
//! let analysis = AnalysisConfig::from_json_file("analysis.json")?;
//! let study = StudyConfig::from_json_file("studies/apap.json")?;
//! let outputs = run_study(&study, &analysis)?;
//! for s in &outputs.summary.contrasts {
//!     println!("{}", s);
//! }
//! ```

pub mod cli;
pub mod clustering;
pub mod config;
pub mod data;
pub mod design;
pub mod enrichment;
pub mod error;
pub mod filter;
pub mod io;
pub mod linear_model;
pub mod normalization;
pub mod orthologs;
pub mod pipeline;
pub mod stats;
pub mod testing;
pub mod transform;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::clustering::{ClusterProfile, EffectTable, StemAdapter, TrajectoryClusterer};
    pub use crate::config::{AnalysisConfig, DeConfig, DeThresholds, Platform, StudyConfig};
    pub use crate::data::{CountMatrix, ExpressionMatrix, Factor, SampleMetadata, Study};
    pub use crate::design::{Contrast, ContrastSet, DesignMatrix};
    pub use crate::enrichment::{enrich_profiles, EnrichmentRecord, GeneSetCatalog};
    pub use crate::error::{PipelineError, Result};
    pub use crate::io::{DeRecord, DeTable, Regulation};
    pub use crate::orthologs::{translate_results, OrthologTable};
    pub use crate::pipeline::{run_study, run_study_with, RunSummary, StudyOutputs};
    pub use crate::testing::differential_expression;
    pub use crate::transform::{zscore, zscore_time_matched};
}
