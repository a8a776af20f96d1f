//! liver_expr command-line interface

use clap::Parser;
use log::{info, LevelFilter};

use liver_expr::cli::{Cli, Commands, StudyArgs};
use liver_expr::pipeline::{self, ZScoreOutput};
use liver_expr::prelude::*;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() {
    let args: Vec<String> = std::env::args().collect();

    // Find the first non-flag argument (potential subcommand)
    let first_positional = args.iter().skip(1).find(|a| !a.starts_with('-'));
    let subcommands = [
        "run", "normalize", "de", "zscore", "cluster", "enrich", "orthologs", "help",
    ];
    let has_subcommand = first_positional.map_or(false, |a| subcommands.contains(&a.as_str()));

    if !has_subcommand {
        if args.len() == 1 {
            print_no_args();
            return;
        }
        if args.iter().any(|a| a == "--help") {
            print_long_help();
            return;
        }
        if args.iter().any(|a| a == "-h") {
            print_short_help();
            return;
        }
        if args.iter().any(|a| a == "-V" || a == "--version") {
            println!("liver_expr {}", VERSION);
            return;
        }
        print_no_args();
        return;
    }

    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let command = match cli.command {
        Some(c) => c,
        None => {
            print_no_args();
            return;
        }
    };

    if let Err(e) = dispatch(&command) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// Custom help output
// ---------------------------------------------------------------------------

fn print_no_args() {
    println!("liver_expr v{}", VERSION);
    println!("Run `liver_expr -h` for usage or `liver_expr --help` for detailed information.");
}

fn print_short_help() {
    println!("liver_expr v{}", VERSION);
    println!();
    println!("Usage: liver_expr <COMMAND> -c <STUDY_JSON> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  run        Run every stage of one study");
    println!("  normalize  Load, quality-filter and normalize");
    println!("  de         Differential expression for every contrast");
    println!("  zscore     Z-scores against time-matched controls");
    println!("  cluster    STEM trajectory clustering of effect sizes");
    println!("  enrich     Gene set enrichment of significant profiles");
    println!("  orthologs  Translate results to orthologs");
    println!();
    println!("Run `liver_expr <COMMAND> -h` for command-specific options.");
}

fn print_long_help() {
    println!("liver_expr v{}", VERSION);
    println!("Per-study expression analysis for liver injury studies");
    println!();
    println!("Usage: liver_expr <COMMAND> -c <STUDY_JSON> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  run        Run every stage of one study and write run_summary.json");
    println!("  normalize  Load, quality-filter and normalize");
    println!("               - microarray: RMA, array QC, probeset -> symbol collapse");
    println!("               - RNA-seq: filterByExpr, TMM, log-CPM");
    println!("               - intensities: log2(x + offset)");
    println!("  de         limma-style moderated t-tests for every contrast");
    println!("  zscore     Z-scores of treated samples against time-matched controls");
    println!("  cluster    STEM trajectory clustering of time-course effect sizes");
    println!("  enrich     Hypergeometric gene set enrichment of significant profiles");
    println!("  orthologs  Translate results to orthologs (max |logFC| per target)");
    println!();
    println!("Options (every command):");
    println!("  -c, --config <STUDY_JSON>       Study configuration");
    println!("  -a, --analysis <ANALYSIS_JSON>  Shared analysis settings [default: built-in]");
    println!("  -o, --output-dir <DIR>          Override the study output directory");
    println!("  -t, --threads <N>               Number of threads (0 = auto)");
    println!();
    println!("Global Options:");
    println!("  -v, --verbose    Enable verbose output");
    println!("  -h               Print short help");
    println!("      --help       Print detailed help");
    println!("  -V, --version    Print version");
    println!();
    println!("Examples:");
    println!("  liver_expr run -c studies/apap_mouse.json -a analysis.json");
    println!();
    println!("  liver_expr normalize -c studies/ccl4.json -a analysis.json");
    println!("  liver_expr de -c studies/ccl4.json -a analysis.json");
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn load_configs(args: &StudyArgs) -> Result<(StudyConfig, AnalysisConfig)> {
    if args.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.threads)
            .build_global()
            .ok();
    }

    info!("Loading study configuration from: {}", args.config.display());
    let mut study = StudyConfig::from_json_file(&args.config)?;
    if let Some(dir) = &args.output_dir {
        study.output_dir = dir.clone();
    }
    let analysis = match &args.analysis {
        Some(path) => {
            info!("Loading analysis settings from: {}", path.display());
            AnalysisConfig::from_json_file(path)?
        }
        None => {
            info!("Using built-in analysis settings");
            AnalysisConfig::default()
        }
    };
    Ok((study, analysis))
}

fn dispatch(command: &Commands) -> Result<()> {
    let (study, analysis) = load_configs(command.study_args())?;

    match command {
        Commands::Run { .. } => {
            let outputs = run_study(&study, &analysis)?;
            for s in &outputs.summary.contrasts {
                println!("{}", s);
            }
        }
        Commands::Normalize { .. } => {
            let normalized = pipeline::normalize_stage(&study, &analysis)?;
            if !normalized.discarded_arrays.is_empty() {
                info!("Discarded arrays: {}", normalized.discarded_arrays.join(", "));
            }
        }
        Commands::De { .. } => {
            let normalized = pipeline::load_normalized(&study)?;
            let table = pipeline::de_stage(&normalized, &study, &analysis)?;
            for s in table.summary() {
                println!("{}", s);
            }
        }
        Commands::Zscore { .. } => {
            let normalized = pipeline::load_normalized(&study)?;
            if let Some(ZScoreOutput { zscores, dropped_genes }) =
                pipeline::zscore_stage(&normalized, &study, &analysis)?
            {
                info!(
                    "Wrote z-scores for {} samples ({} genes dropped for zero control variance)",
                    zscores.n_samples(),
                    dropped_genes.len()
                );
            }
        }
        Commands::Cluster { .. } => {
            let de = pipeline::load_de(&study)?;
            let stem = pipeline::stem_clusterer(&study, &analysis);
            pipeline::cluster_stage(&de, &study, &stem)?;
        }
        Commands::Enrich { .. } => {
            let profiles = pipeline::load_clusters(&study)?;
            pipeline::enrichment_stage(&profiles, &study, &analysis)?;
        }
        Commands::Orthologs { .. } => {
            let de = pipeline::load_de(&study)?;
            if pipeline::ortholog_stage(&de, &study)?.is_none() {
                info!("No ortholog table configured for study '{}'", study.name);
            }
        }
    }

    info!("Outputs in {}", study.output_dir.display());
    Ok(())
}
