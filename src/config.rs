//! Pipeline configuration
//!
//! Two layers, both plain JSON:
//! - [`AnalysisConfig`] holds every statistical threshold and tool setting.
//!   One file is shared by all studies so that regulation calls and
//!   enrichment p-values are comparable across studies.
//! - [`StudyConfig`] describes one study: inputs, grouping, contrasts and
//!   which optional stages apply.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::data::Factor;
use crate::error::{PipelineError, Result};

/// Thresholds turning (logFC, adjusted p) into a regulation call
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeThresholds {
    /// Minimum |log2 fold change| for an up/down call
    pub min_abs_log_fc: f64,
    /// Maximum BH-adjusted p-value for an up/down call
    pub max_adj_p: f64,
}

impl Default for DeThresholds {
    fn default() -> Self {
        Self {
            min_abs_log_fc: 1.0,
            max_adj_p: 0.05,
        }
    }
}

/// Differential-expression settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeConfig {
    pub thresholds: DeThresholds,
    /// Empirical Bayes variance moderation (limma eBayes); ordinary t otherwise
    pub moderate_variance: bool,
}

impl Default for DeConfig {
    fn default() -> Self {
        Self {
            thresholds: DeThresholds::default(),
            moderate_variance: true,
        }
    }
}

/// Low-count gene filter
/// R equivalent: edgeR::filterByExpr() defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpressionFilterParams {
    pub min_count: f64,
    pub min_total_count: f64,
    pub large_n: usize,
    pub min_prop: f64,
}

impl Default for ExpressionFilterParams {
    fn default() -> Self {
        Self {
            min_count: 10.0,
            min_total_count: 15.0,
            large_n: 10,
            min_prop: 0.7,
        }
    }
}

/// TMM scaling factor settings
/// R equivalent: edgeR::calcNormFactors(method = "TMM") defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TmmParams {
    pub logratio_trim: f64,
    pub sum_trim: f64,
    pub do_weighting: bool,
    pub a_cutoff: f64,
}

impl Default for TmmParams {
    fn default() -> Self {
        Self {
            logratio_trim: 0.3,
            sum_trim: 0.05,
            do_weighting: true,
            a_cutoff: -1e10,
        }
    }
}

/// RNA-seq normalization settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RnaSeqParams {
    pub filter: ExpressionFilterParams,
    pub tmm: TmmParams,
    /// Average prior count added before taking log2 CPM
    pub prior_count: f64,
}

impl Default for RnaSeqParams {
    fn default() -> Self {
        Self {
            filter: ExpressionFilterParams::default(),
            tmm: TmmParams::default(),
            prior_count: 2.0,
        }
    }
}

/// RMA settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RmaParams {
    pub background_correct: bool,
    pub quantile_normalize: bool,
    /// Number of grid points for the density mode estimates
    pub density_grid: usize,
    pub polish_max_iter: usize,
    pub polish_eps: f64,
}

impl Default for RmaParams {
    fn default() -> Self {
        Self {
            background_correct: true,
            quantile_normalize: true,
            density_grid: 512,
            polish_max_iter: 10,
            polish_eps: 0.01,
        }
    }
}

/// Array quality filter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QcParams {
    pub enabled: bool,
    /// An array is discarded when at least this many metrics flag it
    pub min_flags_to_discard: usize,
}

impl Default for QcParams {
    fn default() -> Self {
        Self {
            enabled: true,
            min_flags_to_discard: 2,
        }
    }
}

/// Z-score settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZScoreParams {
    /// Remove genes whose control SD is zero before z-scoring instead of failing
    pub drop_zero_control_variance: bool,
}

impl Default for ZScoreParams {
    fn default() -> Self {
        Self {
            drop_zero_control_variance: true,
        }
    }
}

/// Multiple-testing correction names understood by STEM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StemCorrection {
    Bonferroni,
    FalseDiscoveryRate,
    None,
}

/// STEM data normalization options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StemNormalization {
    LogNormalize,
    Normalize,
    NoNormalizationAddZero,
}

/// External command line with `{settings}`, `{output}` and `{input}` placeholders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for ToolCommand {
    fn default() -> Self {
        Self {
            program: "java".to_string(),
            args: ["-mx1024M", "-jar", "stem.jar", "-b", "{settings}", "{output}"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Trajectory clustering (STEM) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringParams {
    pub command: ToolCommand,
    pub timeout_secs: u64,
    pub max_profiles: usize,
    pub max_unit_change: usize,
    pub permutations_per_gene: usize,
    pub significance: f64,
    pub correction: StemCorrection,
    pub normalization: StemNormalization,
    /// Prepend an all-zero time point to the input file; leave off when the
    /// normalization option already adds one
    pub add_zero_time_point: bool,
    /// Prefix STEM uses for its result tables
    pub output_prefix: String,
    /// Profiles with p above this are ignored downstream
    pub max_profile_p: f64,
}

impl Default for ClusteringParams {
    fn default() -> Self {
        Self {
            command: ToolCommand::default(),
            timeout_secs: 1800,
            max_profiles: 50,
            max_unit_change: 2,
            permutations_per_gene: 50,
            significance: 0.05,
            correction: StemCorrection::Bonferroni,
            normalization: StemNormalization::NoNormalizationAddZero,
            add_zero_time_point: false,
            output_prefix: "stem_input".to_string(),
            max_profile_p: 0.05,
        }
    }
}

/// Over-representation analysis settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentParams {
    pub min_set_size: usize,
    pub max_set_size: usize,
    /// Background universe size; not derived from the data
    pub universe_size: u64,
    /// Apply BH across the gene sets tested for each profile
    pub adjust: bool,
}

impl Default for EnrichmentParams {
    fn default() -> Self {
        Self {
            min_set_size: 10,
            max_set_size: 500,
            universe_size: 20_000,
            adjust: true,
        }
    }
}

/// Settings shared by every study
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub de: DeConfig,
    pub rnaseq: RnaSeqParams,
    pub rma: RmaParams,
    pub qc: QcParams,
    pub zscore: ZScoreParams,
    pub clustering: ClusteringParams,
    pub enrichment: EnrichmentParams,
}

impl AnalysisConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let config: Self = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.de.thresholds;
        if !(t.min_abs_log_fc >= 0.0) {
            return invalid("de.thresholds.min_abs_log_fc must be >= 0");
        }
        if !(t.max_adj_p > 0.0 && t.max_adj_p <= 1.0) {
            return invalid("de.thresholds.max_adj_p must be in (0, 1]");
        }
        let tmm = &self.rnaseq.tmm;
        if !(0.0..0.5).contains(&tmm.logratio_trim) || !(0.0..0.5).contains(&tmm.sum_trim) {
            return invalid("rnaseq.tmm trims must be in [0, 0.5)");
        }
        if self.rnaseq.prior_count < 0.0 {
            return invalid("rnaseq.prior_count must be >= 0");
        }
        if self.rma.density_grid < 16 {
            return invalid("rma.density_grid must be at least 16");
        }
        let e = &self.enrichment;
        if e.min_set_size > e.max_set_size {
            return invalid("enrichment.min_set_size exceeds max_set_size");
        }
        if e.universe_size == 0 {
            return invalid("enrichment.universe_size must be positive");
        }
        if self.clustering.timeout_secs == 0 {
            return invalid("clustering.timeout_secs must be positive");
        }
        Ok(())
    }
}

/// Input platform of a study
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Platform {
    /// Probe-level intensities summarized with RMA
    Microarray {
        /// TSV: probe_id, probeset_id, one column per sample
        probes: PathBuf,
        /// TSV: probeset_id, symbol
        annotation: PathBuf,
    },
    /// Raw read counts normalized with TMM + log-CPM
    RnaSeq { counts: PathBuf },
    /// Pre-summarized linear intensities, log2-transformed with an offset
    Intensities {
        matrix: PathBuf,
        #[serde(default)]
        log2_offset: f64,
    },
}

/// Named contrast written as an expression over group levels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContrastDef {
    pub name: String,
    pub expression: String,
}

/// A contrast standing for one ordered time point of a time course
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimePointContrast {
    pub time: String,
    pub contrast: String,
}

/// Per-study configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyConfig {
    pub name: String,
    pub output_dir: PathBuf,
    pub platform: Platform,
    /// Metadata TSV; with a factor map it only needs `sample_id` and `label`
    pub metadata: PathBuf,
    #[serde(default)]
    pub factor_map: Option<PathBuf>,
    pub group_by: Vec<Factor>,
    pub contrasts: Vec<ContrastDef>,
    /// Treatment level of control samples; enables the z-score stage
    #[serde(default)]
    pub control_treatment: Option<String>,
    /// Ordered time points; enables trajectory clustering and enrichment
    #[serde(default)]
    pub time_course: Vec<TimePointContrast>,
    /// GMT files with curated gene sets
    #[serde(default)]
    pub gene_sets: Vec<PathBuf>,
    /// TSV with source_gene and target_gene columns
    #[serde(default)]
    pub orthologs: Option<PathBuf>,
}

impl StudyConfig {
    /// Load and validate; relative paths are resolved against the file's directory
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut config: Self = serde_json::from_reader(BufReader::new(file))?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        config.validate()?;
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let fix = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        fix(&mut self.output_dir);
        fix(&mut self.metadata);
        if let Some(p) = self.factor_map.as_mut() {
            fix(p);
        }
        if let Some(p) = self.orthologs.as_mut() {
            fix(p);
        }
        self.gene_sets.iter_mut().for_each(fix);
        match &mut self.platform {
            Platform::Microarray { probes, annotation } => {
                fix(probes);
                fix(annotation);
            }
            Platform::RnaSeq { counts } => fix(counts),
            Platform::Intensities { matrix, .. } => fix(matrix),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return invalid("study name must not be empty");
        }
        if self.group_by.is_empty() {
            return invalid("group_by must list at least one factor");
        }
        let mut names = std::collections::HashSet::new();
        for c in &self.contrasts {
            if !names.insert(c.name.as_str()) {
                return invalid(&format!("contrast name '{}' is used twice", c.name));
            }
        }
        for tp in &self.time_course {
            if !names.contains(tp.contrast.as_str()) {
                return invalid(&format!(
                    "time course point '{}' references unknown contrast '{}'",
                    tp.time, tp.contrast
                ));
            }
        }
        if let Platform::Intensities { log2_offset, .. } = &self.platform {
            if *log2_offset < 0.0 {
                return invalid("log2_offset must be >= 0");
            }
        }
        Ok(())
    }

    pub fn has_time_course(&self) -> bool {
        !self.time_course.is_empty()
    }
}

fn invalid<T>(reason: &str) -> Result<T> {
    Err(PipelineError::InvalidConfig {
        reason: reason.to_string(),
    })
}
