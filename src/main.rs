use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

const DEFAULT_MIN_GENE_LENGTH: usize = 100;
const DEFAULT_MIN_READ_LENGTH: usize = 30;

/// Map 0 to "disabled" for length cutoffs
fn cutoff(value: usize) -> Option<usize> {
    if value > 0 { Some(value) } else { None }
}

/// Check an input path exists before dispatching
fn check_input_path(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(anyhow::anyhow!(
            "Input file does not exist: {}",
            path.display()
        ));
    }
    Ok(())
}

#[derive(Parser)]
#[command(author, version, about = "Per-base coverage of single-copy genes from read alignments", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Accumulate per-base coverage from a gene FASTA and SAM alignments
    Cov {
        /// FASTA file with single copy gene sequences
        genes: PathBuf,

        /// SAM file with reads mapped against the gene sequences
        alignments: PathBuf,

        /// Path to output coverage file
        #[arg(short = 'c', long = "coverage", default_value = "coverage.out")]
        coverage: PathBuf,

        /// Write the registered gene sequences to this FASTA file
        #[arg(short = 'f', long = "fasta")]
        fasta: Option<PathBuf>,

        /// Cutoff length for gene sequences (0 = no cutoff)
        #[arg(short = 'l', long = "min-gene-length", default_value_t = DEFAULT_MIN_GENE_LENGTH)]
        min_gene_length: usize,

        /// Minimum alignment interval length (0 = keep all)
        #[arg(short = 'L', long = "min-read-length", default_value_t = DEFAULT_MIN_READ_LENGTH)]
        min_read_length: usize,

        /// Suppress progress reporting
        #[arg(short = 'q', long = "quiet", default_value_t = false)]
        quiet: bool,
    },

    /// Recompute summary statistics and a depth histogram from a coverage file
    Analyze {
        /// Coverage file written by cov
        coverage: PathBuf,

        /// Path to summary output file (- for stdout)
        #[arg(short = 'o', long = "output", default_value = "-")]
        output: String,

        /// Write the depth histogram to this file instead of stderr
        #[arg(long = "histogram")]
        histogram: Option<PathBuf>,

        /// Statistic for the second summary column
        #[arg(short = 's', long = "stat", default_value = "population", value_parser = ["population", "moment"])]
        stat: String,

        /// Output format
        #[arg(short = 'f', long = "format", default_value = "text", value_parser = ["text", "json"])]
        format: String,

        /// Suppress pooled/weighted reporting
        #[arg(short = 'q', long = "quiet", default_value_t = false)]
        quiet: bool,
    },

    /// Validate an external-step configuration and print each command line
    Check {
        /// TOML file describing the external pipeline steps
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Cov {
            genes,
            alignments,
            coverage,
            fasta,
            min_gene_length,
            min_read_length,
            quiet,
        } => {
            check_input_path(genes)?;
            check_input_path(alignments)?;

            let mut config = sconce::CoverageConfig::new(genes, alignments)
                .with_coverage(coverage)
                .with_min_gene_length(cutoff(*min_gene_length))
                .with_min_read_length(cutoff(*min_read_length))
                .with_quiet(*quiet);
            if let Some(fasta) = fasta {
                config = config.with_fasta(fasta);
            }

            config
                .execute()
                .context("Failed to run coverage accumulation")?;
        }

        Commands::Analyze {
            coverage,
            output,
            histogram,
            stat,
            format,
            quiet,
        } => {
            check_input_path(coverage)?;

            let mode = match stat.as_str() {
                "population" => sconce::StatMode::Population,
                "moment" => sconce::StatMode::MomentAverage,
                _ => unreachable!("clap should have validated the stat mode"),
            };
            let output_format = match format.as_str() {
                "text" => sconce::OutputFormat::Text,
                "json" => sconce::OutputFormat::Json,
                _ => unreachable!("clap should have validated the format"),
            };

            let mut config = sconce::AnalyzeConfig::new(coverage)
                .with_mode(mode)
                .with_format(output_format)
                .with_quiet(*quiet);
            if output != "-" {
                config = config.with_output(output);
            }
            if let Some(histogram) = histogram {
                config = config.with_histogram(histogram);
            }

            config.execute().context("Failed to run coverage analysis")?;
        }

        Commands::Check { config } => {
            check_input_path(config)?;
            let steps = sconce::PipelineSteps::from_path(config)?;
            for (name, step) in steps.steps() {
                println!("{}: {}", name, step.command_line().join(" "));
            }
        }
    }

    Ok(())
}
