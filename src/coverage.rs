use crate::targets::{CoverageSet, Outcome};
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use needletail::parse_fastx_file;
use noodles::sam;
use noodles::sam::alignment::Record as SamRecord;
use rustc_hash::FxHashSet;
use std::path::{Path, PathBuf};

const SPINNER_UPDATE_INTERVAL: u64 = 100_000;

pub struct CoverageConfig {
    /// FASTA file with single copy gene sequences
    pub genes_path: PathBuf,

    /// SAM file with reads mapped against the gene sequences
    pub alignments_path: PathBuf,

    /// Path to output coverage file
    pub coverage_path: PathBuf,

    /// Optional FASTA output with the registered gene sequences
    pub fasta_path: Option<PathBuf>,

    /// Cutoff length for gene sequences (None = no cutoff)
    pub min_gene_length: Option<usize>,

    /// Minimum alignment interval length after clamping (None = keep all)
    pub min_read_length: Option<usize>,

    /// Suppress progress reporting
    pub quiet: bool,
}

impl CoverageConfig {
    /// Create a coverage configuration with the default filtering policy.
    pub fn new<P: AsRef<Path>>(genes_path: P, alignments_path: P) -> Self {
        Self {
            genes_path: genes_path.as_ref().to_path_buf(),
            alignments_path: alignments_path.as_ref().to_path_buf(),
            coverage_path: PathBuf::from("coverage.out"),
            fasta_path: None,
            min_gene_length: Some(100),
            min_read_length: Some(30),
            quiet: false,
        }
    }

    /// Set the coverage output path
    pub fn with_coverage<P: AsRef<Path>>(mut self, coverage_path: P) -> Self {
        self.coverage_path = coverage_path.as_ref().to_path_buf();
        self
    }

    /// Set the FASTA output path
    pub fn with_fasta<P: AsRef<Path>>(mut self, fasta_path: P) -> Self {
        self.fasta_path = Some(fasta_path.as_ref().to_path_buf());
        self
    }

    /// Set the gene length cutoff
    pub fn with_min_gene_length(mut self, min_gene_length: Option<usize>) -> Self {
        self.min_gene_length = min_gene_length;
        self
    }

    /// Set the minimum alignment interval length
    pub fn with_min_read_length(mut self, min_read_length: Option<usize>) -> Self {
        self.min_read_length = min_read_length;
        self
    }

    /// Set quiet mode
    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Execute the accumulation pass with this configuration
    pub fn execute(&self) -> Result<RunCounters> {
        run_coverage(self)
    }
}

/// Counters from one accumulation pass.
#[derive(Debug, Default, Clone)]
pub struct RunCounters {
    /// Gene sequences registered
    pub targets: usize,
    /// Gene sequences below the length cutoff
    pub rejected_targets: usize,
    /// SAM records read
    pub alignments: u64,
    /// Records without a usable alignment (unmapped or missing coordinates)
    pub unmapped: u64,
    /// Intervals applied to a coverage array
    pub accumulated: u64,
    /// Intervals dropped by the minimum-length policy
    pub dropped: u64,
    /// Records whose reference name matched no registered gene
    pub unknown: u64,
}

/// Register genes from FASTA, stream SAM alignments into the set, and write
/// the coverage file.
pub fn run_coverage(config: &CoverageConfig) -> Result<RunCounters> {
    let mut set = CoverageSet::new(config.min_gene_length, config.min_read_length);
    let mut counters = RunCounters::default();

    // Register target genes
    let mut reader = parse_fastx_file(&config.genes_path).with_context(|| {
        format!("Failed to open gene file: {}", config.genes_path.display())
    })?;
    while let Some(record_result) = reader.next() {
        let record = record_result.context("Error reading FASTA record")?;
        let id_line = String::from_utf8_lossy(record.id()).to_string();
        let id = id_line.split_whitespace().next().unwrap_or("unknown");
        if set.register(id, &record.seq())? {
            counters.targets += 1;
        } else {
            counters.rejected_targets += 1;
        }
    }

    if !config.quiet {
        eprintln!(
            "Targets: {} registered, {} below length cutoff",
            counters.targets, counters.rejected_targets
        );
    }

    // Progress spinner for the alignment pass
    let spinner = if !config.quiet {
        let pb = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
        pb.set_style(
            ProgressStyle::default_spinner()
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
                .template("{msg}")?,
        );
        pb.set_message("Processing alignments: 0 records");
        Some(pb)
    } else {
        None
    };

    // Accumulate coverage from the SAM stream
    let mut sam_reader = sam::io::reader::Builder::default()
        .build_from_path(&config.alignments_path)
        .with_context(|| {
            format!(
                "Failed to open SAM file: {}",
                config.alignments_path.display()
            )
        })?;
    let header = sam_reader.read_header().context("Failed to read SAM header")?;
    let reference_names: Vec<String> = header
        .reference_sequences()
        .keys()
        .map(|name| name.to_string())
        .collect();

    let mut unknown_names: FxHashSet<String> = FxHashSet::default();
    for record_result in sam_reader.records() {
        let record = record_result.context("Error reading SAM record")?;
        counters.alignments += 1;

        let Some(reference_id) = record.reference_sequence_id(&header) else {
            counters.unmapped += 1;
            continue;
        };
        let reference_id = reference_id.context("Invalid reference sequence id")?;
        let name = reference_names.get(reference_id).with_context(|| {
            format!(
                "SAM record references sequence {} missing from the header",
                reference_id
            )
        })?;

        let (Some(start), Some(end)) = (record.alignment_start(), SamRecord::alignment_end(&record))
        else {
            counters.unmapped += 1;
            continue;
        };
        // 1-based closed to 0-based half-open
        let start = start.context("Invalid alignment start")?.get() as i64 - 1;
        let end = end.context("Invalid alignment end")?.get() as i64;

        match set.accumulate(name, start, end) {
            Outcome::Added => counters.accumulated += 1,
            Outcome::Dropped => counters.dropped += 1,
            Outcome::UnknownTarget => {
                counters.unknown += 1;
                if unknown_names.insert(name.clone()) && !config.quiet {
                    eprintln!("Target not found: {}", name);
                }
            }
        }

        if counters.alignments % SPINNER_UPDATE_INTERVAL == 0 {
            if let Some(ref pb) = spinner {
                pb.set_message(format!(
                    "Processing alignments: {} records, {} accumulated",
                    counters.alignments, counters.accumulated
                ));
            }
        }
    }

    if let Some(ref pb) = spinner {
        pb.finish_with_message("");
    }

    if !config.quiet {
        eprintln!(
            "Alignments: {} records, {} accumulated, {} dropped, {} unmapped, {} unknown",
            counters.alignments,
            counters.accumulated,
            counters.dropped,
            counters.unmapped,
            counters.unknown
        );
        if let Some(pooled) = set.pooled_stats() {
            match pooled.stddev {
                Some(sd) => eprintln!(
                    "Overall: mean coverage {:.4} (stddev {:.4}) across {} target(s)",
                    pooled.mean, sd, pooled.targets
                ),
                None => eprintln!(
                    "Overall: mean coverage {:.4} across {} target(s)",
                    pooled.mean, pooled.targets
                ),
            }
        }
    }

    // Write outputs
    if let Some(path) = &config.fasta_path {
        set.write_fasta(path)?;
    }
    set.write_coverage(&config.coverage_path)?;

    Ok(counters)
}
