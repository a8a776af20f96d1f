//! Command-line interface for liver_expr

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "liver_expr")]
#[command(version)]
#[command(about = "Per-study expression analysis for liver injury studies")]
#[command(disable_help_flag = true)]
#[command(disable_version_flag = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Options shared by every subcommand
#[derive(Args, Debug, Clone)]
pub struct StudyArgs {
    /// Study configuration (JSON)
    #[arg(short, long, value_name = "STUDY_JSON",
        long_help = "Study configuration file (JSON).\n\
            Names the platform and input files, the metadata table, grouping\n\
            factors, contrasts, control treatment, time course, gene set files\n\
            and ortholog table. Relative paths are resolved against the\n\
            directory of this file.")]
    pub config: PathBuf,

    /// Shared analysis settings (JSON) [default: built-in]
    #[arg(short, long, value_name = "ANALYSIS_JSON",
        long_help = "Analysis settings shared by all studies (JSON).\n\
            Holds the regulation thresholds, normalization, QC, clustering and\n\
            enrichment parameters. Use the same file for every study so that\n\
            calls are comparable. Built-in defaults are used when omitted.")]
    pub analysis: Option<PathBuf>,

    /// Override the study output directory
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Number of threads (0 = auto) [default: 0]
    #[arg(short = 't', long, default_value = "0")]
    pub threads: usize,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run every stage of one study
    #[command(
        long_about = "Run every stage of one study.\n\n\
            normalize -> de -> zscore -> cluster -> enrich -> orthologs.\n\
            The z-score stage runs when a control treatment is configured,\n\
            clustering and enrichment when a time course is declared, and\n\
            ortholog translation when an ortholog table is given. Writes\n\
            run_summary.json next to the stage outputs.",
        after_long_help = "\
Examples:
  liver_expr run -c studies/apap_mouse.json -a analysis.json
  liver_expr run -c studies/ccl4.json -a analysis.json -o results/ccl4 -t 8"
    )]
    Run {
        #[command(flatten)]
        study: StudyArgs,
    },

    /// Load, quality-filter and normalize
    #[command(
        long_about = "Load, quality-filter and normalize one study.\n\n\
            Microarrays: RMA, array QC with outlier removal and RMA recomputed\n\
            on the kept arrays, probeset to symbol collapse.\n\
            RNA-seq: filterByExpr low-count filter, TMM, log-CPM.\n\
            Intensities: log2(x + offset).\n\
            Writes normalized.tsv and metadata.tsv."
    )]
    Normalize {
        #[command(flatten)]
        study: StudyArgs,
    },

    /// Differential expression from the normalized matrix
    #[command(
        long_about = "Moderated t-tests for every configured contrast.\n\n\
            Reads normalized.tsv and metadata.tsv, writes de_results.tsv."
    )]
    De {
        #[command(flatten)]
        study: StudyArgs,
    },

    /// Z-scores of treated samples against time-matched controls
    Zscore {
        #[command(flatten)]
        study: StudyArgs,
    },

    /// Trajectory clustering of time-course effect sizes with STEM
    #[command(
        long_about = "Trajectory clustering of time-course effect sizes.\n\n\
            Reads de_results.tsv, writes effects.tsv and the STEM input and\n\
            settings under <output_dir>/stem, runs STEM and writes clusters.tsv.\n\
            STEM assigns significance by permutation, so profile p-values can\n\
            differ slightly between runs."
    )]
    Cluster {
        #[command(flatten)]
        study: StudyArgs,
    },

    /// Gene set over-representation of significant profiles
    Enrich {
        #[command(flatten)]
        study: StudyArgs,
    },

    /// Translate the result table to orthologs
    Orthologs {
        #[command(flatten)]
        study: StudyArgs,
    },
}

impl Commands {
    pub fn study_args(&self) -> &StudyArgs {
        match self {
            Commands::Run { study }
            | Commands::Normalize { study }
            | Commands::De { study }
            | Commands::Zscore { study }
            | Commands::Cluster { study }
            | Commands::Enrich { study }
            | Commands::Orthologs { study } => study,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_subcommand_with_shared_args() {
        let cli = Cli::try_parse_from([
            "liver_expr",
            "de",
            "--config",
            "study.json",
            "-a",
            "analysis.json",
            "-t",
            "4",
            "--verbose",
        ])
        .unwrap();
        assert!(cli.verbose);
        let command = cli.command.unwrap();
        assert!(matches!(command, Commands::De { .. }));
        let args = command.study_args();
        assert_eq!(args.config, PathBuf::from("study.json"));
        assert_eq!(args.analysis, Some(PathBuf::from("analysis.json")));
        assert_eq!(args.threads, 4);
        assert!(args.output_dir.is_none());
    }

    #[test]
    fn test_config_is_required() {
        assert!(Cli::try_parse_from(["liver_expr", "run"]).is_err());
    }
}
