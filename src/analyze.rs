use crate::histogram::{DepthHistogram, WeightedStats};
use crate::stats;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Which statistic fills the second summary column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatMode {
    /// Standard deviation via the sum-of-squares formula (canonical).
    Population,
    /// Mean of squared depth (`s2/n`), the historical moment-average column.
    MomentAverage,
}

impl StatMode {
    pub fn name(&self) -> &'static str {
        match self {
            StatMode::Population => "population",
            StatMode::MomentAverage => "moment",
        }
    }
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Running sums for one coverage-file block.
#[derive(Debug, Clone)]
pub struct TargetStats {
    id: String,
    reads: u64,
    bases: u64,
    sum: f64,
    sum_sq: f64,
}

impl TargetStats {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Read count from the block header.
    pub fn reads(&self) -> u64 {
        self.reads
    }

    /// Data lines seen for this block.
    pub fn bases(&self) -> u64 {
        self.bases
    }

    /// Mean depth, `None` for blocks without accumulated reads. The header
    /// read count gates this so the offline statistics agree with the live
    /// pass, where an untouched record has no mean.
    pub fn mean(&self) -> Option<f64> {
        if self.reads == 0 {
            return None;
        }
        stats::sum_mean(self.bases as f64, self.sum)
    }

    pub fn stddev(&self) -> Option<f64> {
        if self.reads == 0 {
            return None;
        }
        stats::sum_squares_stddev(self.bases as f64, self.sum, self.sum_sq)
    }

    /// The historical moment-average column, `s2/n`.
    pub fn moment_average(&self) -> Option<f64> {
        if self.reads == 0 {
            return None;
        }
        stats::sum_mean(self.bases as f64, self.sum_sq)
    }

    pub fn stat(&self, mode: StatMode) -> Option<f64> {
        match mode {
            StatMode::Population => self.stddev(),
            StatMode::MomentAverage => self.moment_average(),
        }
    }
}

/// Pooled statistics over the per-target summary columns.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PooledSummary {
    /// Targets with at least one data line.
    pub targets: usize,
    /// Mean of the per-target means.
    pub mean: f64,
    /// Second pooled column per the selected mode: sum-of-squares stddev of
    /// the per-target means, or the mean of the per-target moment averages.
    pub stat: Option<f64>,
}

/// Per-target and pooled statistics recomputed from a coverage file,
/// independent of the accumulation pass that produced it.
pub struct CoverageSummary {
    pub targets: Vec<TargetStats>,
    pub histogram: DepthHistogram,
}

struct Block {
    id: String,
    reads: u64,
    bases: u64,
    sum: f64,
    sum_sq: f64,
}

impl Block {
    fn finish(self) -> TargetStats {
        TargetStats {
            id: self.id,
            reads: self.reads,
            bases: self.bases,
            sum: self.sum,
            sum_sq: self.sum_sq,
        }
    }
}

impl CoverageSummary {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open coverage file: {}", path.display()))?;
        Self::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse coverage file: {}", path.display()))
    }

    /// Stream the coverage format line by line.
    ///
    /// A `#` header opens a new block and flushes any open one; a blank line
    /// flushes too. Accepting both means blank-line-terminated and
    /// header-terminated files parse identically. Malformed lines are fatal.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut targets = Vec::new();
        let mut histogram = DepthHistogram::new();
        let mut open: Option<Block> = None;

        for (index, line) in reader.lines().enumerate() {
            let line = line.context("Failed to read line")?;
            let lineno = index + 1;

            if let Some(header) = line.strip_prefix('#') {
                if let Some(block) = open.take() {
                    targets.push(block.finish());
                }
                let mut fields = header.split_whitespace();
                let id = fields
                    .next()
                    .with_context(|| format!("line {}: header without identifier", lineno))?;
                let reads = fields
                    .next()
                    .with_context(|| format!("line {}: header without read count", lineno))?
                    .parse::<u64>()
                    .with_context(|| format!("line {}: invalid read count", lineno))?;
                open = Some(Block {
                    id: id.to_string(),
                    reads,
                    bases: 0,
                    sum: 0.0,
                    sum_sq: 0.0,
                });
            } else if line.trim().is_empty() {
                if let Some(block) = open.take() {
                    targets.push(block.finish());
                }
            } else {
                let block = open
                    .as_mut()
                    .with_context(|| format!("line {}: data line outside a target block", lineno))?;
                let mut fields = line.split_whitespace();
                let _position = fields
                    .next()
                    .with_context(|| format!("line {}: missing position field", lineno))?;
                let depth = fields
                    .next()
                    .with_context(|| format!("line {}: missing depth field", lineno))?
                    .parse::<u64>()
                    .with_context(|| format!("line {}: invalid depth", lineno))?;
                fields
                    .next()
                    .with_context(|| format!("line {}: missing base field", lineno))?;

                block.bases += 1;
                block.sum += depth as f64;
                block.sum_sq += (depth as f64) * (depth as f64);
                histogram.observe(depth as usize);
            }
        }
        if let Some(block) = open.take() {
            targets.push(block.finish());
        }

        Ok(Self { targets, histogram })
    }

    /// Statistics-of-statistics across targets with data. The pooled mean is
    /// the mean of per-target means in both modes; the second column follows
    /// the mode.
    pub fn pooled(&self, mode: StatMode) -> Option<PooledSummary> {
        let (mut k, mut s, mut s2) = (0usize, 0.0, 0.0);
        let mut moment_sum = 0.0;
        for target in &self.targets {
            let Some(mean) = target.mean() else { continue };
            k += 1;
            s += mean;
            s2 += mean * mean;
            if let Some(moment) = target.moment_average() {
                moment_sum += moment;
            }
        }
        if k == 0 {
            return None;
        }
        let stat = match mode {
            StatMode::Population => stats::sum_squares_stddev(k as f64, s, s2),
            StatMode::MomentAverage => Some(moment_sum / k as f64),
        };
        Some(PooledSummary {
            targets: k,
            mean: s / k as f64,
            stat,
        })
    }

    pub fn weighted(&self) -> Option<WeightedStats> {
        self.histogram.weighted_stats()
    }

    /// One line per target: `<identifier> <mean> <stat>`, `NA` for no-value.
    pub fn write_summary<W: Write>(&self, writer: &mut W, mode: StatMode) -> io::Result<()> {
        for target in &self.targets {
            writeln!(
                writer,
                "{} {} {}",
                target.id(),
                fmt_stat(target.mean()),
                fmt_stat(target.stat(mode))
            )?;
        }
        Ok(())
    }

    /// One line per depth bin: `<depth> <count>`, for all depths `0..=max`.
    pub fn write_histogram<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        for (depth, &count) in self.histogram.bins().iter().enumerate() {
            writeln!(writer, "{} {}", depth, count)?;
        }
        Ok(())
    }
}

fn fmt_stat(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.6}", v),
        None => "NA".to_string(),
    }
}

#[derive(Serialize)]
struct SummaryRow<'a> {
    target: &'a str,
    reads: u64,
    bases: u64,
    mean: Option<f64>,
    stat: Option<f64>,
}

#[derive(Serialize)]
struct Report<'a> {
    version: String,
    coverage_file: String,
    stat_mode: &'static str,
    targets: Vec<SummaryRow<'a>>,
    pooled: Option<PooledSummary>,
    weighted: Option<WeightedStats>,
    histogram: &'a [u64],
}

pub struct AnalyzeConfig {
    /// Coverage file to summarise
    pub coverage_path: PathBuf,

    /// Path to summary output (None for stdout)
    pub output_path: Option<PathBuf>,

    /// Path to histogram dump (None for stderr)
    pub histogram_path: Option<PathBuf>,

    /// Statistic for the second summary column
    pub mode: StatMode,

    /// Output format
    pub output_format: OutputFormat,

    /// Suppress pooled/weighted reporting on stderr
    pub quiet: bool,
}

impl AnalyzeConfig {
    pub fn new<P: AsRef<Path>>(coverage_path: P) -> Self {
        Self {
            coverage_path: coverage_path.as_ref().to_path_buf(),
            output_path: None,
            histogram_path: None,
            mode: StatMode::Population,
            output_format: OutputFormat::Text,
            quiet: false,
        }
    }

    /// Set the summary output path
    pub fn with_output<P: AsRef<Path>>(mut self, output_path: P) -> Self {
        self.output_path = Some(output_path.as_ref().to_path_buf());
        self
    }

    /// Set the histogram output path
    pub fn with_histogram<P: AsRef<Path>>(mut self, histogram_path: P) -> Self {
        self.histogram_path = Some(histogram_path.as_ref().to_path_buf());
        self
    }

    /// Set the statistic mode
    pub fn with_mode(mut self, mode: StatMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the output format
    pub fn with_format(mut self, output_format: OutputFormat) -> Self {
        self.output_format = output_format;
        self
    }

    /// Set quiet mode
    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Execute the analysis with this configuration
    pub fn execute(&self) -> Result<CoverageSummary> {
        run_analysis(self)
    }
}

pub fn run_analysis(config: &AnalyzeConfig) -> Result<CoverageSummary> {
    let summary = CoverageSummary::from_path(&config.coverage_path)?;

    let mut writer: Box<dyn Write> = if let Some(path) = &config.output_path {
        Box::new(BufWriter::new(File::create(path).with_context(|| {
            format!("Failed to create output file: {}", path.display())
        })?))
    } else {
        Box::new(BufWriter::new(io::stdout()))
    };

    match config.output_format {
        OutputFormat::Text => {
            summary
                .write_summary(&mut writer, config.mode)
                .context("Failed to write summary")?;
            writer.flush().context("Failed to write summary")?;

            if let Some(path) = &config.histogram_path {
                let mut histogram_writer =
                    BufWriter::new(File::create(path).with_context(|| {
                        format!("Failed to create histogram file: {}", path.display())
                    })?);
                summary
                    .write_histogram(&mut histogram_writer)
                    .context("Failed to write histogram")?;
                histogram_writer.flush().context("Failed to write histogram")?;
            } else {
                let stderr = io::stderr();
                let mut histogram_writer = stderr.lock();
                summary
                    .write_histogram(&mut histogram_writer)
                    .context("Failed to write histogram")?;
            }
        }
        OutputFormat::Json => {
            let report = Report {
                version: format!("sconce {}", env!("CARGO_PKG_VERSION")),
                coverage_file: config.coverage_path.to_string_lossy().to_string(),
                stat_mode: config.mode.name(),
                targets: summary
                    .targets
                    .iter()
                    .map(|t| SummaryRow {
                        target: t.id(),
                        reads: t.reads(),
                        bases: t.bases(),
                        mean: t.mean(),
                        stat: t.stat(config.mode),
                    })
                    .collect(),
                pooled: summary.pooled(config.mode),
                weighted: summary.weighted(),
                histogram: summary.histogram.bins(),
            };
            serde_json::to_writer_pretty(&mut writer, &report)
                .context("Failed to write JSON report")?;
            writeln!(writer)?;
            writer.flush().context("Failed to write JSON report")?;
        }
    }

    if !config.quiet {
        if let Some(pooled) = summary.pooled(config.mode) {
            eprintln!(
                "Pooled ({}): {} target(s), mean {}, stat {}",
                config.mode.name(),
                pooled.targets,
                fmt_stat(Some(pooled.mean)),
                fmt_stat(pooled.stat)
            );
        }
        if let Some(weighted) = summary.weighted() {
            eprintln!(
                "Weighted: {} base(s), mean {}, stddev {}",
                weighted.bases,
                fmt_stat(Some(weighted.mean)),
                fmt_stat(Some(weighted.stddev))
            );
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    const COVERAGE: &str = "# g1 2\n0 1 A\n1 2 C\n2 1 G\n3 1 T\n\n# g2 1\n0 3 A\n1 3 C\n\n";

    #[test]
    fn test_parse_blocks() {
        let summary = CoverageSummary::from_reader(COVERAGE.as_bytes()).unwrap();
        assert_eq!(summary.targets.len(), 2);

        let g1 = &summary.targets[0];
        assert_eq!(g1.id(), "g1");
        assert_eq!(g1.reads(), 2);
        assert_eq!(g1.bases(), 4);
        assert!((g1.mean().unwrap() - 1.25).abs() < 1e-12);
        assert!((g1.stddev().unwrap() - 0.5).abs() < 1e-12);

        let g2 = &summary.targets[1];
        assert_eq!(g2.id(), "g2");
        assert_eq!(g2.mean(), Some(3.0));
    }

    #[test]
    fn test_terminator_conventions_agree() {
        // Same data without blank lines: headers terminate blocks implicitly
        let headers_only = "# g1 2\n0 1 A\n1 2 C\n2 1 G\n3 1 T\n# g2 1\n0 3 A\n1 3 C\n";
        let a = CoverageSummary::from_reader(COVERAGE.as_bytes()).unwrap();
        let b = CoverageSummary::from_reader(headers_only.as_bytes()).unwrap();

        assert_eq!(a.targets.len(), b.targets.len());
        for (x, y) in a.targets.iter().zip(&b.targets) {
            assert_eq!(x.id(), y.id());
            assert_eq!(x.bases(), y.bases());
            assert_eq!(x.mean(), y.mean());
            assert_eq!(x.stddev(), y.stddev());
        }
        assert_eq!(a.histogram.bins(), b.histogram.bins());
    }

    #[test]
    fn test_histogram_covers_all_blocks() {
        let summary = CoverageSummary::from_reader(COVERAGE.as_bytes()).unwrap();
        // depths: 1,2,1,1 and 3,3
        assert_eq!(summary.histogram.bins(), &[0, 3, 1, 2]);
        assert_eq!(summary.histogram.total(), 6);
    }

    #[test]
    fn test_moment_average_mode() {
        let summary = CoverageSummary::from_reader(COVERAGE.as_bytes()).unwrap();
        let g1 = &summary.targets[0];
        // s2 = 1 + 4 + 1 + 1 = 7 over 4 bases
        assert!((g1.stat(StatMode::MomentAverage).unwrap() - 1.75).abs() < 1e-12);
        // population mode keeps the true stddev
        assert!((g1.stat(StatMode::Population).unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_pooled_modes() {
        let summary = CoverageSummary::from_reader(COVERAGE.as_bytes()).unwrap();

        let population = summary.pooled(StatMode::Population).unwrap();
        assert_eq!(population.targets, 2);
        // means [1.25, 3.0]
        assert!((population.mean - 2.125).abs() < 1e-12);
        let s = 4.25;
        let s2 = 1.25f64 * 1.25 + 9.0;
        let expected = (2.0 * s2 - s * s).sqrt() / 2.0f64.sqrt();
        assert!((population.stat.unwrap() - expected).abs() < 1e-12);

        let moment = summary.pooled(StatMode::MomentAverage).unwrap();
        assert!((moment.mean - 2.125).abs() < 1e-12);
        // moment averages [7/4, 18/2]
        assert!((moment.stat.unwrap() - (1.75 + 9.0) / 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_block_has_no_stats() {
        let text = "# empty 0\n\n# g1 1\n0 2 A\n\n";
        let summary = CoverageSummary::from_reader(text.as_bytes()).unwrap();
        assert_eq!(summary.targets.len(), 2);
        assert!(summary.targets[0].mean().is_none());
        assert!(summary.targets[0].stddev().is_none());

        // Pooling skips the empty block
        let pooled = summary.pooled(StatMode::Population).unwrap();
        assert_eq!(pooled.targets, 1);
        assert!((pooled.mean - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_read_block_with_data_lines_has_no_stats() {
        // An emitted block for a target no read ever hit: all-zero depths
        let text = "# untouched 0\n0 0 A\n1 0 C\n\n";
        let summary = CoverageSummary::from_reader(text.as_bytes()).unwrap();
        let target = &summary.targets[0];
        assert_eq!(target.bases(), 2);
        assert!(target.mean().is_none());
        assert!(target.stddev().is_none());
        assert!(summary.pooled(StatMode::Population).is_none());
        // The bases still count toward the histogram
        assert_eq!(summary.histogram.bins(), &[2]);
    }

    #[test]
    fn test_single_base_block_stddev_guarded() {
        let text = "# tiny 1\n0 5 A\n\n";
        let summary = CoverageSummary::from_reader(text.as_bytes()).unwrap();
        assert_eq!(summary.targets[0].mean(), Some(5.0));
        assert!(summary.targets[0].stddev().is_none());
    }

    #[test]
    fn test_malformed_lines_are_fatal() {
        for text in [
            "0 1 A\n",             // data before any header
            "# g1\n",              // header without read count
            "# g1 2\n0 x A\n",     // non-numeric depth
            "# g1 2\n0 1\n",       // missing base field
            "# g1 two\n",          // non-numeric read count
        ] {
            assert!(CoverageSummary::from_reader(text.as_bytes()).is_err());
        }
    }

    #[test]
    fn test_summary_output_format() {
        let summary = CoverageSummary::from_reader(COVERAGE.as_bytes()).unwrap();
        let mut buffer = Vec::new();
        summary
            .write_summary(&mut buffer, StatMode::Population)
            .unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert_eq!(text, "g1 1.250000 0.500000\ng2 3.000000 0.000000\n");
    }

    #[test]
    fn test_histogram_dump_format() {
        let summary = CoverageSummary::from_reader(COVERAGE.as_bytes()).unwrap();
        let mut buffer = Vec::new();
        summary.write_histogram(&mut buffer).unwrap();
        assert_eq!(String::from_utf8(buffer).unwrap(), "0 0\n1 3\n2 1\n3 2\n");
    }
}
