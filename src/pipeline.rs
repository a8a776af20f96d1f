//! Per-study pipeline: stage functions and the straight-line runner
//!
//! Every stage persists its artifact as TSV in the study's output
//! directory so that single stages can be re-run from the cached output of
//! the stage before.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::clustering::{significant_profiles, ClusterProfile, EffectTable, StemAdapter, TrajectoryClusterer};
use crate::config::{AnalysisConfig, Platform, StudyConfig};
use crate::data::{collapse_to_symbols, ExpressionMatrix, SampleMetadata, Study};
use crate::design::{ContrastSet, DesignMatrix};
use crate::enrichment::{enrich_profiles, EnrichmentRecord, GeneSetCatalog};
use crate::error::{PipelineError, Result};
use crate::filter::{array_quality, discard_outlier_arrays, filter_by_expression, ArrayQuality};
use crate::io::{self, ContrastSummary, DeTable};
use crate::normalization::{drop_constant_genes, log2_transform, normalize_counts, rma};
use crate::orthologs::{translate_results, OrthologTable, TranslationSummary};
use crate::testing::differential_expression;
use crate::transform::{assign_controls, drop_zero_control_variance, zscore_time_matched};

pub const NORMALIZED_FILE: &str = "normalized.tsv";
pub const METADATA_FILE: &str = "metadata.tsv";
pub const QUALITY_FILE: &str = "array_quality.tsv";
pub const DE_FILE: &str = "de_results.tsv";
pub const ZSCORE_FILE: &str = "zscores.tsv";
pub const EFFECTS_FILE: &str = "effects.tsv";
pub const CLUSTERS_FILE: &str = "clusters.tsv";
pub const ENRICHMENT_FILE: &str = "enrichment.tsv";
pub const ORTHOLOG_FILE: &str = "de_results_orthologs.tsv";
pub const SUMMARY_FILE: &str = "run_summary.json";

/// Minimum number of arrays for the between-array QC metrics to mean anything
const MIN_ARRAYS_FOR_QC: usize = 3;

/// Output of the normalization stage
#[derive(Debug, Clone)]
pub struct NormalizedStudy {
    pub study: Study,
    pub qualities: Vec<ArrayQuality>,
    pub discarded_arrays: Vec<String>,
    pub dropped_genes: Vec<String>,
}

/// Output of the z-score stage
#[derive(Debug, Clone)]
pub struct ZScoreOutput {
    pub zscores: ExpressionMatrix,
    /// Genes removed for zero control variance
    pub dropped_genes: Vec<String>,
}

/// Counts per stage, written as `run_summary.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub study: String,
    pub platform: String,
    pub samples: usize,
    pub genes: usize,
    pub discarded_arrays: Vec<String>,
    pub dropped_constant_genes: usize,
    pub contrasts: Vec<ContrastSummary>,
    pub zscore_samples: Option<usize>,
    pub zscore_dropped_genes: usize,
    pub profiles: Option<usize>,
    pub significant_profiles: Option<usize>,
    pub enrichment_records: Option<usize>,
    pub orthologs: Option<TranslationSummary>,
}

/// Everything one study run produced
#[derive(Debug, Clone)]
pub struct StudyOutputs {
    pub normalized: NormalizedStudy,
    pub de: DeTable,
    pub zscores: Option<ZScoreOutput>,
    pub profiles: Option<Vec<ClusterProfile>>,
    pub enrichment: Option<Vec<EnrichmentRecord>>,
    pub orthologs: Option<(DeTable, TranslationSummary)>,
    pub summary: RunSummary,
}

fn artifact(config: &StudyConfig, name: &str) -> PathBuf {
    config.output_dir.join(name)
}

fn cached(config: &StudyConfig, name: &str, stage: &str) -> Result<PathBuf> {
    let path = artifact(config, name);
    if path.exists() {
        Ok(path)
    } else {
        Err(PipelineError::MissingArtifact {
            path: path.display().to_string(),
            stage: stage.to_string(),
        })
    }
}

pub fn platform_name(platform: &Platform) -> &'static str {
    match platform {
        Platform::Microarray { .. } => "microarray",
        Platform::RnaSeq { .. } => "rnaseq",
        Platform::Intensities { .. } => "intensities",
    }
}

/// Matrix column index of every metadata sample, in metadata order
///
/// Fails when the two sample id sets differ.
fn metadata_order(matrix_ids: &[String], metadata: &SampleMetadata, study: &str) -> Result<Vec<usize>> {
    let metadata_ids = metadata.sample_ids();
    if matrix_ids.len() != metadata_ids.len() {
        return Err(PipelineError::SampleAlignment {
            reason: format!(
                "matrix has {} samples, metadata has {}",
                matrix_ids.len(),
                metadata_ids.len()
            ),
        });
    }
    let order = metadata_ids
        .iter()
        .map(|id| {
            matrix_ids
                .iter()
                .position(|m| m == id)
                .ok_or_else(|| PipelineError::SampleAlignment {
                    reason: format!("metadata sample '{}' is not a matrix column", id),
                })
        })
        .collect::<Result<Vec<usize>>>()?;
    if order.iter().enumerate().any(|(i, &j)| i != j) {
        log::info!("Reordering matrix columns of study '{}' to metadata order", study);
    }
    Ok(order)
}

fn load_metadata(config: &StudyConfig) -> Result<SampleMetadata> {
    let factor_map = match &config.factor_map {
        Some(path) => Some(io::read_factor_map(path)?),
        None => None,
    };
    io::read_metadata(&config.metadata, factor_map.as_ref(), &config.group_by)
}

/// Load, quality-filter and normalize one study
///
/// Writes the normalized matrix, the (possibly reduced) metadata and, for
/// microarrays, the array quality table.
pub fn normalize_stage(config: &StudyConfig, analysis: &AnalysisConfig) -> Result<NormalizedStudy> {
    fs::create_dir_all(&config.output_dir)?;
    let metadata = load_metadata(config)?;
    log::info!(
        "Study '{}': {} samples, {} platform",
        config.name,
        metadata.n_samples(),
        platform_name(&config.platform)
    );

    let mut qualities = Vec::new();
    let mut discarded_arrays = Vec::new();
    let (matrix, metadata) = match &config.platform {
        Platform::Microarray { probes, annotation } => {
            let probes = io::read_probe_intensities(probes)?;
            let order = metadata_order(probes.sample_ids(), &metadata, &config.name)?;
            let mut probes = probes.subset_samples(&order)?;
            let mut metadata = metadata;
            let mut summarized = rma(&probes, &analysis.rma)?;

            if analysis.qc.enabled && summarized.n_samples() >= MIN_ARRAYS_FOR_QC {
                qualities = array_quality(&summarized);
                let (keep, discarded) =
                    discard_outlier_arrays(&qualities, analysis.qc.min_flags_to_discard);
                if !discarded.is_empty() {
                    log::info!("Recomputing RMA on {} kept arrays", keep.len());
                    probes = probes.subset_samples(&keep)?;
                    metadata = metadata.subset(&keep);
                    summarized = rma(&probes, &analysis.rma)?;
                }
                discarded_arrays = discarded;
            }

            let annotation = io::read_annotation(annotation)?;
            (collapse_to_symbols(&summarized, &annotation)?, metadata)
        }
        Platform::RnaSeq { counts } => {
            let counts = io::read_count_matrix(counts)?;
            let order = metadata_order(counts.sample_ids(), &metadata, &config.name)?;
            let counts = counts.subset_samples(&order)?;
            let filtered = filter_by_expression(&counts, &metadata.groups(), &analysis.rnaseq.filter)?;
            (normalize_counts(&filtered, &analysis.rnaseq)?, metadata)
        }
        Platform::Intensities { matrix, log2_offset } => {
            let raw = io::read_expression_matrix(matrix)?;
            let order = metadata_order(raw.sample_ids(), &metadata, &config.name)?;
            (log2_transform(&raw.subset_samples(&order)?, *log2_offset)?, metadata)
        }
    };

    let (matrix, dropped_genes) = drop_constant_genes(&matrix)?;
    let study = Study::new(&config.name, matrix, metadata)?;
    log::info!(
        "Normalized study '{}': {} genes x {} samples",
        study.name(),
        study.n_genes(),
        study.n_samples()
    );

    io::write_expression_matrix(artifact(config, NORMALIZED_FILE), study.expression())?;
    io::write_metadata(artifact(config, METADATA_FILE), study.metadata())?;
    if !qualities.is_empty() {
        io::write_rows(artifact(config, QUALITY_FILE), &qualities)?;
    }

    Ok(NormalizedStudy {
        study,
        qualities,
        discarded_arrays,
        dropped_genes,
    })
}

/// Reload the normalized study written by [`normalize_stage`]
pub fn load_normalized(config: &StudyConfig) -> Result<Study> {
    let matrix = io::read_expression_matrix(cached(config, NORMALIZED_FILE, "normalize")?)?;
    let metadata = io::read_metadata(cached(config, METADATA_FILE, "normalize")?, None, &config.group_by)?;
    Study::aligned(&config.name, matrix, metadata)
}

/// Fit the design and test every configured contrast
pub fn de_stage(study: &Study, config: &StudyConfig, analysis: &AnalysisConfig) -> Result<DeTable> {
    let design = DesignMatrix::from_metadata(study.metadata())?;
    let contrasts = ContrastSet::from_defs(&config.contrasts, &design)?;
    log::info!(
        "Testing {} contrasts over {} group levels",
        contrasts.len(),
        design.n_levels()
    );
    let table = differential_expression(study.expression(), &design, &contrasts, &analysis.de)?;
    io::write_de_table(artifact(config, DE_FILE), &table)?;
    Ok(table)
}

pub fn load_de(config: &StudyConfig) -> Result<DeTable> {
    io::read_de_table(cached(config, DE_FILE, "de")?)
}

/// Z-score treated samples against time-matched controls
///
/// Skipped (`None`) when the study has no control treatment.
pub fn zscore_stage(
    study: &Study,
    config: &StudyConfig,
    analysis: &AnalysisConfig,
) -> Result<Option<ZScoreOutput>> {
    let control = match &config.control_treatment {
        Some(c) => c,
        None => {
            log::info!("No control treatment configured; skipping z-scores");
            return Ok(None);
        }
    };

    let mut matrix = study.expression().clone();
    let mut dropped_genes = Vec::new();
    if analysis.zscore.drop_zero_control_variance {
        for assignment in assign_controls(study.metadata(), control)? {
            let (kept, dropped) = drop_zero_control_variance(&matrix, &assignment.controls)?;
            matrix = kept;
            dropped_genes.extend(dropped);
        }
    }

    let zscores = zscore_time_matched(&matrix, study.metadata(), control)?;
    io::write_expression_matrix(artifact(config, ZSCORE_FILE), &zscores)?;
    Ok(Some(ZScoreOutput {
        zscores,
        dropped_genes,
    }))
}

/// Cluster the time-course effect sizes
///
/// Skipped (`None`) when the study declares no time course.
pub fn cluster_stage(
    de: &DeTable,
    config: &StudyConfig,
    clusterer: &dyn TrajectoryClusterer,
) -> Result<Option<Vec<ClusterProfile>>> {
    if !config.has_time_course() {
        log::info!("No time course configured; skipping trajectory clustering");
        return Ok(None);
    }
    let effects = EffectTable::from_de(de, &config.time_course)?;
    io::write_effect_table(artifact(config, EFFECTS_FILE), &effects)?;
    log::info!(
        "Clustering {} genes over {} time points",
        effects.n_genes(),
        effects.n_time_points()
    );
    let profiles = clusterer.cluster(&effects)?;
    io::write_clusters(artifact(config, CLUSTERS_FILE), &profiles)?;
    Ok(Some(profiles))
}

pub fn load_clusters(config: &StudyConfig) -> Result<Vec<ClusterProfile>> {
    io::read_clusters(cached(config, CLUSTERS_FILE, "cluster")?)
}

/// The STEM adapter working in `<output_dir>/stem`
pub fn stem_clusterer(config: &StudyConfig, analysis: &AnalysisConfig) -> StemAdapter {
    StemAdapter::new(analysis.clustering.clone(), config.output_dir.join("stem"))
}

/// Test significant profiles for gene set over-representation
///
/// Skipped (`None`) when no gene set files are configured.
pub fn enrichment_stage(
    profiles: &[ClusterProfile],
    config: &StudyConfig,
    analysis: &AnalysisConfig,
) -> Result<Option<Vec<EnrichmentRecord>>> {
    if config.gene_sets.is_empty() {
        log::info!("No gene set files configured; skipping enrichment");
        return Ok(None);
    }
    let catalog = GeneSetCatalog::from_gmt_files(&config.gene_sets)?;
    let significant = significant_profiles(profiles, analysis.clustering.max_profile_p);
    log::info!(
        "{} of {} profiles have p <= {}",
        significant.len(),
        profiles.len(),
        analysis.clustering.max_profile_p
    );
    let records = enrich_profiles(&significant, &catalog, &analysis.enrichment)?;
    io::write_enrichment(artifact(config, ENRICHMENT_FILE), &records)?;
    Ok(Some(records))
}

/// Translate the result table to orthologs
///
/// Skipped (`None`) when no ortholog table is configured.
pub fn ortholog_stage(de: &DeTable, config: &StudyConfig) -> Result<Option<(DeTable, TranslationSummary)>> {
    let path = match &config.orthologs {
        Some(p) => p,
        None => return Ok(None),
    };
    let table = OrthologTable::from_tsv(path)?;
    let (translated, summary) = translate_results(de, &table);
    io::write_de_table(artifact(config, ORTHOLOG_FILE), &translated)?;
    log::info!(
        "Translated {} rows to {} ortholog rows",
        summary.input_rows,
        summary.output_rows
    );
    Ok(Some((translated, summary)))
}

/// Run every applicable stage in order with STEM as the clusterer
pub fn run_study(config: &StudyConfig, analysis: &AnalysisConfig) -> Result<StudyOutputs> {
    let clusterer = stem_clusterer(config, analysis);
    run_study_with(config, analysis, &clusterer)
}

/// Run every applicable stage in order and write `run_summary.json`
pub fn run_study_with(
    config: &StudyConfig,
    analysis: &AnalysisConfig,
    clusterer: &dyn TrajectoryClusterer,
) -> Result<StudyOutputs> {
    let normalized = normalize_stage(config, analysis)?;
    let de = de_stage(&normalized.study, config, analysis)?;
    let zscores = zscore_stage(&normalized.study, config, analysis)?;
    let profiles = cluster_stage(&de, config, clusterer)?;
    let enrichment = match &profiles {
        Some(p) => enrichment_stage(p, config, analysis)?,
        None => None,
    };
    let orthologs = ortholog_stage(&de, config)?;

    let summary = RunSummary {
        study: config.name.clone(),
        platform: platform_name(&config.platform).to_string(),
        samples: normalized.study.n_samples(),
        genes: normalized.study.n_genes(),
        discarded_arrays: normalized.discarded_arrays.clone(),
        dropped_constant_genes: normalized.dropped_genes.len(),
        contrasts: de.summary(),
        zscore_samples: zscores.as_ref().map(|z| z.zscores.n_samples()),
        zscore_dropped_genes: zscores.as_ref().map_or(0, |z| z.dropped_genes.len()),
        profiles: profiles.as_ref().map(Vec::len),
        significant_profiles: profiles
            .as_ref()
            .map(|p| significant_profiles(p, analysis.clustering.max_profile_p).len()),
        enrichment_records: enrichment.as_ref().map(Vec::len),
        orthologs: orthologs.as_ref().map(|(_, s)| s.clone()),
    };
    write_summary(&artifact(config, SUMMARY_FILE), &summary)?;
    log::info!("Study '{}' done; outputs in {}", config.name, config.output_dir.display());

    Ok(StudyOutputs {
        normalized,
        de,
        zscores,
        profiles,
        enrichment,
        orthologs,
        summary,
    })
}

fn write_summary(path: &Path, summary: &RunSummary) -> Result<()> {
    let file = fs::File::create(path)?;
    serde_json::to_writer_pretty(file, summary)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContrastDef;
    use crate::data::Factor;
    use tempfile::TempDir;

    fn rnaseq_config(dir: &Path) -> StudyConfig {
        let counts = dir.join("counts.tsv");
        let mut text = String::from("gene_id\tb\ta\tc\td\n");
        for g in 0..30 {
            let base = 100 + g * 10;
            text.push_str(&format!(
                "g{}\t{}\t{}\t{}\t{}\n",
                g,
                base + 3,
                base,
                base * 4,
                base * 4 + 7
            ));
        }
        text.push_str("low\t0\t1\t0\t2\n");
        fs::write(&counts, text).unwrap();
        let metadata = dir.join("meta.tsv");
        fs::write(
            &metadata,
            "sample_id\ttreatment\na\tCtrl\nb\tCtrl\nc\tCCl4\nd\tCCl4\n",
        )
        .unwrap();

        StudyConfig {
            name: "ccl4".to_string(),
            output_dir: dir.join("out"),
            platform: Platform::RnaSeq { counts },
            metadata,
            factor_map: None,
            group_by: vec![Factor::Treatment],
            contrasts: vec![ContrastDef {
                name: "ccl4".to_string(),
                expression: "CCl4 - Ctrl".to_string(),
            }],
            control_treatment: None,
            time_course: Vec::new(),
            gene_sets: Vec::new(),
            orthologs: None,
        }
    }

    #[test]
    fn test_rnaseq_normalize_reorders_and_filters() {
        let dir = TempDir::new().unwrap();
        let config = rnaseq_config(dir.path());
        let out = normalize_stage(&config, &AnalysisConfig::default()).unwrap();

        assert_eq!(out.study.expression().sample_ids(), &["a", "b", "c", "d"]);
        assert!(out.study.expression().gene_index("low").is_none());
        assert!(out.qualities.is_empty());

        let reloaded = load_normalized(&config).unwrap();
        assert_eq!(reloaded.n_genes(), out.study.n_genes());
        assert_eq!(reloaded.metadata().groups(), vec!["Ctrl", "Ctrl", "CCl4", "CCl4"]);
    }

    #[test]
    fn test_missing_artifact_names_stage() {
        let dir = TempDir::new().unwrap();
        let config = rnaseq_config(dir.path());
        let err = load_de(&config).unwrap_err();
        assert!(matches!(err, PipelineError::MissingArtifact { ref stage, .. } if stage == "de"));
    }

    #[test]
    fn test_metadata_sample_missing_from_matrix() {
        let dir = TempDir::new().unwrap();
        let config = rnaseq_config(dir.path());
        fs::write(
            &config.metadata,
            "sample_id\ttreatment\na\tCtrl\nb\tCtrl\nc\tCCl4\nz\tCCl4\n",
        )
        .unwrap();
        let err = normalize_stage(&config, &AnalysisConfig::default()).unwrap_err();
        assert!(matches!(err, PipelineError::SampleAlignment { .. }));
    }

    #[test]
    fn test_optional_stages_skip() {
        let dir = TempDir::new().unwrap();
        let config = rnaseq_config(dir.path());
        let analysis = AnalysisConfig::default();
        let out = normalize_stage(&config, &analysis).unwrap();
        let de = de_stage(&out.study, &config, &analysis).unwrap();

        assert!(zscore_stage(&out.study, &config, &analysis).unwrap().is_none());
        assert!(ortholog_stage(&de, &config).unwrap().is_none());
        let stem = stem_clusterer(&config, &analysis);
        assert!(cluster_stage(&de, &config, &stem).unwrap().is_none());
        assert!(enrichment_stage(&[], &config, &analysis).unwrap().is_none());
    }
}
