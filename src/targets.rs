use crate::record::CoverageRecord;
use crate::stats;
use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// What happened to a single accumulation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Interval was clamped and applied to the target's coverage array.
    Added,
    /// Interval was shorter than the minimum after clamping.
    Dropped,
    /// No target registered under that identifier.
    UnknownTarget,
}

/// Pooled statistics over the per-target mean coverages.
#[derive(Debug, Clone, Copy)]
pub struct PooledStats {
    /// Targets with at least one accumulated read.
    pub targets: usize,
    pub mean: f64,
    pub stddev: Option<f64>,
}

/// The set of tracked gene sequences, keyed by identifier.
///
/// Registration order is preserved across iteration and file emission. All
/// coverage accumulation goes through [`accumulate`](CoverageSet::accumulate),
/// which applies the set's clamping and interval-length policy before
/// touching a record.
pub struct CoverageSet {
    ids: Vec<String>,
    records: FxHashMap<String, CoverageRecord>,
    min_target_length: Option<usize>,
    min_interval_length: Option<usize>,
}

impl CoverageSet {
    pub fn new(min_target_length: Option<usize>, min_interval_length: Option<usize>) -> Self {
        Self {
            ids: Vec::new(),
            records: FxHashMap::default(),
            min_target_length,
            min_interval_length,
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn get(&self, id: &str) -> Option<&CoverageRecord> {
        self.records.get(id)
    }

    /// Records in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &CoverageRecord> {
        self.ids.iter().filter_map(|id| self.records.get(id.as_str()))
    }

    /// Register a new target sequence.
    ///
    /// Returns `Ok(false)` when the sequence is below the length cutoff (the
    /// record is silently not created). Re-registering an identifier is an
    /// error.
    pub fn register(&mut self, id: &str, sequence: &[u8]) -> Result<bool> {
        if let Some(min) = self.min_target_length {
            if sequence.len() < min {
                return Ok(false);
            }
        }
        if self.records.contains_key(id) {
            return Err(anyhow::anyhow!("duplicate target identifier: {}", id));
        }
        self.ids.push(id.to_string());
        self.records
            .insert(id.to_string(), CoverageRecord::new(id, sequence.to_vec()));
        Ok(true)
    }

    /// Apply one alignment interval to the named target.
    ///
    /// `start` and `end` may arrive in either order and may exceed the
    /// sequence bounds; both ends are clamped to `[0, len]`. With a minimum
    /// interval length configured, clamped intervals of that length or
    /// shorter are dropped; otherwise every interval is forwarded, including
    /// zero-length ones (a no-op on the array, still counted as a read).
    pub fn accumulate(&mut self, id: &str, start: i64, end: i64) -> Outcome {
        let Some(record) = self.records.get_mut(id) else {
            return Outcome::UnknownTarget;
        };
        let len = record.len() as i64;
        let lo = start.min(end).clamp(0, len) as usize;
        let hi = start.max(end).clamp(0, len) as usize;
        if let Some(min) = self.min_interval_length {
            if hi - lo <= min {
                return Outcome::Dropped;
            }
        }
        record.add_coverage(lo, hi);
        Outcome::Added
    }

    /// Pooled mean and standard deviation over the per-target means,
    /// computed with the same sum-of-squares formula used per target.
    /// Targets without accumulated reads do not contribute.
    pub fn pooled_stats(&self) -> Option<PooledStats> {
        let (mut k, mut s, mut s2) = (0usize, 0.0, 0.0);
        for record in self.iter() {
            if let Some(mean) = record.mean() {
                k += 1;
                s += mean;
                s2 += mean * mean;
            }
        }
        if k == 0 {
            return None;
        }
        Some(PooledStats {
            targets: k,
            mean: s / k as f64,
            stddev: stats::sum_squares_stddev(k as f64, s, s2),
        })
    }

    /// Write every record to the coverage file format, in registration order.
    pub fn write_coverage<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("Failed to create coverage file: {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        self.write_coverage_to(&mut writer)
            .with_context(|| format!("Failed to write coverage file: {}", path.display()))?;
        writer
            .flush()
            .with_context(|| format!("Failed to write coverage file: {}", path.display()))?;
        Ok(())
    }

    /// Coverage file body: `# id readCount` header, one
    /// `position depth base` line per base, blank line per block.
    pub fn write_coverage_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        for record in self.iter() {
            writeln!(writer, "# {} {}", record.id(), record.read_count())?;
            for (i, (&depth, &base)) in record
                .coverage()
                .iter()
                .zip(record.sequence())
                .enumerate()
            {
                writeln!(writer, "{} {} {}", i, depth, base as char)?;
            }
            writeln!(writer)?;
        }
        Ok(())
    }

    /// Write the registered sequences in FASTA format, in registration order.
    pub fn write_fasta<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("Failed to create FASTA file: {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        for record in self.iter() {
            writeln!(writer, ">{}", record.id())?;
            writer.write_all(record.sequence())?;
            writeln!(writer)?;
        }
        writer
            .flush()
            .with_context(|| format!("Failed to write FASTA file: {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_with(min_target: Option<usize>, min_interval: Option<usize>) -> CoverageSet {
        let mut set = CoverageSet::new(min_target, min_interval);
        set.register("geneA", &vec![b'A'; 20]).unwrap();
        set
    }

    #[test]
    fn test_clamping_left_edge() {
        let mut clamped = set_with(None, None);
        let mut reference = set_with(None, None);
        assert_eq!(clamped.accumulate("geneA", -5, 10), Outcome::Added);
        assert_eq!(reference.accumulate("geneA", 0, 10), Outcome::Added);
        assert_eq!(
            clamped.get("geneA").unwrap().coverage(),
            reference.get("geneA").unwrap().coverage()
        );
    }

    #[test]
    fn test_clamping_right_edge() {
        let mut clamped = set_with(None, None);
        let mut reference = set_with(None, None);
        assert_eq!(clamped.accumulate("geneA", 15, 30), Outcome::Added);
        assert_eq!(reference.accumulate("geneA", 15, 20), Outcome::Added);
        assert_eq!(
            clamped.get("geneA").unwrap().coverage(),
            reference.get("geneA").unwrap().coverage()
        );
    }

    #[test]
    fn test_reversed_interval_is_normalized() {
        let mut reversed = set_with(None, None);
        let mut reference = set_with(None, None);
        reversed.accumulate("geneA", 10, 3);
        reference.accumulate("geneA", 3, 10);
        assert_eq!(
            reversed.get("geneA").unwrap().coverage(),
            reference.get("geneA").unwrap().coverage()
        );
    }

    #[test]
    fn test_interval_filter_is_strict() {
        let mut set = set_with(None, Some(20));
        // Clamped length exactly 20 must be dropped, 21 kept
        assert_eq!(set.accumulate("geneA", 0, 20), Outcome::Dropped);
        assert_eq!(set.get("geneA").unwrap().read_count(), 0);

        let mut set = CoverageSet::new(None, Some(20));
        set.register("geneB", &vec![b'C'; 30]).unwrap();
        assert_eq!(set.accumulate("geneB", 0, 21), Outcome::Added);
        assert_eq!(set.get("geneB").unwrap().read_count(), 1);
    }

    #[test]
    fn test_zero_length_interval_without_filter() {
        let mut set = set_with(None, None);
        assert_eq!(set.accumulate("geneA", 5, 5), Outcome::Added);
        assert_eq!(set.get("geneA").unwrap().read_count(), 1);
        let total: u32 = set.get("geneA").unwrap().coverage().iter().sum();
        assert_eq!(total, 0);
    }

    #[test]
    fn test_short_sequence_rejected_silently() {
        let mut set = CoverageSet::new(Some(100), None);
        assert!(!set.register("short", &vec![b'A'; 99]).unwrap());
        assert!(set.register("long", &vec![b'A'; 100]).unwrap());
        assert_eq!(set.len(), 1);
        assert!(set.get("short").is_none());
    }

    #[test]
    fn test_duplicate_identifier_is_an_error() {
        let mut set = CoverageSet::new(None, None);
        set.register("geneA", b"ACGT").unwrap();
        assert!(set.register("geneA", b"TTTT").is_err());
    }

    #[test]
    fn test_unknown_target_reported_not_applied() {
        let mut set = set_with(None, None);
        assert_eq!(set.accumulate("nosuch", 0, 10), Outcome::UnknownTarget);
        assert_eq!(set.get("geneA").unwrap().read_count(), 0);
    }

    #[test]
    fn test_registration_order_preserved() {
        let mut set = CoverageSet::new(None, None);
        for id in ["zeta", "alpha", "mid"] {
            set.register(id, b"ACGT").unwrap();
        }
        let order: Vec<&str> = set.iter().map(|r| r.id()).collect();
        assert_eq!(order, ["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_coverage_file_body() {
        let mut set = CoverageSet::new(None, None);
        set.register("g1", b"AC").unwrap();
        set.accumulate("g1", 0, 2);
        set.accumulate("g1", 1, 2);

        let mut buffer = Vec::new();
        set.write_coverage_to(&mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert_eq!(text, "# g1 2\n0 1 A\n1 2 C\n\n");
    }

    #[test]
    fn test_pooled_stats_skip_uncovered_targets() {
        let mut set = CoverageSet::new(None, None);
        set.register("g1", b"ACGT").unwrap();
        set.register("g2", b"ACGT").unwrap();
        set.register("untouched", b"ACGT").unwrap();
        set.accumulate("g1", 0, 4); // mean 1.0
        set.accumulate("g2", 0, 4);
        set.accumulate("g2", 0, 4); // mean 2.0

        let pooled = set.pooled_stats().unwrap();
        assert_eq!(pooled.targets, 2);
        assert!((pooled.mean - 1.5).abs() < 1e-12);
        // sum-of-squares over means [1, 2]: sqrt(2*5 - 9)/sqrt(2)
        let expected = (2.0f64 * 5.0 - 9.0).sqrt() / 2.0f64.sqrt();
        assert!((pooled.stddev.unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_pooled_stats_none_without_evidence() {
        let mut set = CoverageSet::new(None, None);
        set.register("g1", b"ACGT").unwrap();
        assert!(set.pooled_stats().is_none());
    }
}
