//! Post-hoc aggregation over recorded entries.
//!
//! Everything here recomputes from the current snapshot on each call; with
//! trace volumes in the thousands the sort is not worth caching.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::io::{self, Write};

use owo_colors::OwoColorize;

use crate::entry::{format_duration, TraceEntry};
use crate::tracer::Tracer;

/// Distribution summary for one function name.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionStats {
    pub name: String,
    pub count: usize,
    pub total_ns: u64,
    pub min_ns: u64,
    pub max_ns: u64,
    pub mean_ns: f64,
    pub median_ns: f64,
    pub p95_ns: u64,
    pub p99_ns: u64,
    pub stddev_ns: f64,
}

/// Aggregate row used by the summary's frequency table.
#[derive(Debug, Clone)]
struct FrequencyRow {
    name: String,
    count: usize,
    total_ns: u64,
    max_ns: u64,
}

impl Tracer {
    /// Entries at or above the hot threshold, slowest first.
    #[must_use]
    pub fn get_hot_paths(&self) -> Vec<TraceEntry> {
        let hot_ns = self.hot_threshold_ns();
        let mut hot: Vec<TraceEntry> = self
            .get_traces()
            .into_iter()
            .filter(|e| e.duration_ns >= hot_ns)
            .collect();
        hot.sort_unstable_by_key(|e| Reverse(e.duration_ns));
        hot
    }

    /// Distribution of durations for every completed call whose name matches
    /// `name` exactly, or `None` when nothing matched.
    #[must_use]
    pub fn function_stats(&self, name: &str) -> Option<FunctionStats> {
        let mut durations: Vec<u64> = self
            .get_traces()
            .iter()
            .filter(|e| e.name == name)
            .map(|e| e.duration_ns)
            .collect();
        if durations.is_empty() {
            return None;
        }
        durations.sort_unstable();

        let count = durations.len();
        let total_ns: u64 = durations.iter().sum();
        #[allow(clippy::cast_precision_loss)]
        let mean_ns = total_ns as f64 / count as f64;

        #[allow(clippy::cast_precision_loss)]
        let median_ns = if count % 2 == 1 {
            durations[count / 2] as f64
        } else {
            (durations[count / 2 - 1] + durations[count / 2]) as f64 / 2.0
        };

        #[allow(clippy::cast_precision_loss)]
        let variance = durations
            .iter()
            .map(|&d| {
                let diff = d as f64 - mean_ns;
                diff * diff
            })
            .sum::<f64>()
            / count as f64;

        Some(FunctionStats {
            name: name.to_string(),
            count,
            total_ns,
            min_ns: durations[0],
            max_ns: durations[count - 1],
            mean_ns,
            median_ns,
            p95_ns: percentile(&durations, 0.95),
            p99_ns: percentile(&durations, 0.99),
            stddev_ns: variance.sqrt(),
        })
    }

    /// Prints the run summary to stdout. See [`Tracer::write_summary`].
    pub fn print_summary(&self) {
        // stdout write failure here means the consumer is gone; nothing
        // useful left to do.
        let _ = self.write_summary(&mut io::stdout().lock());
    }

    /// Writes the run summary: totals, the ten slowest calls, and per-name
    /// frequency rows ordered by cumulative time.
    pub fn write_summary<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let traces = self.get_traces();
        let colorize = self.colorize_enabled();

        writeln!(out)?;
        write_header(out, "=== Trace Summary ===", colorize)?;
        if traces.is_empty() {
            writeln!(out, "no calls recorded")?;
            return Ok(());
        }

        let total_ns: u64 = traces.iter().map(|e| e.duration_ns).sum();
        let unique: std::collections::HashSet<&str> =
            traces.iter().map(|e| e.name.as_str()).collect();
        writeln!(
            out,
            "{} calls, {} unique functions, {} total traced time",
            traces.len(),
            unique.len(),
            format_duration(total_ns)
        )?;

        writeln!(out)?;
        write_header(out, "Top 10 Slowest:", colorize)?;
        let mut by_duration: Vec<&TraceEntry> = traces.iter().collect();
        by_duration.sort_unstable_by_key(|e| Reverse(e.duration_ns));
        for entry in by_duration.iter().take(10) {
            let dur = format_duration(entry.duration_ns);
            let name = truncate(&entry.name, NAME_COLUMN_WIDTH);
            let tag = if entry.panicked { " PANIC" } else { "" };
            if colorize {
                writeln!(
                    out,
                    "  {:>10}  {name}{} {}",
                    dur.yellow(),
                    tag.red().bold(),
                    format!("[{}:{} t{}]", entry.file, entry.line, entry.thread).dimmed(),
                )?;
            } else {
                writeln!(
                    out,
                    "  {:>10}  {name}{tag} [{}:{} t{}]",
                    dur, entry.file, entry.line, entry.thread
                )?;
            }
        }

        writeln!(out)?;
        write_header(out, "Call Frequency:", colorize)?;
        for row in frequency_rows(&traces).iter().take(10) {
            writeln!(
                out,
                "  {:>6}x  {:>10} total  {:>10} max  {}",
                row.count,
                format_duration(row.total_ns),
                format_duration(row.max_ns),
                truncate(&row.name, NAME_COLUMN_WIDTH)
            )?;
        }
        Ok(())
    }

    /// Prints the distribution for one function name to stdout.
    pub fn print_function_stats(&self, name: &str) {
        let _ = self.write_function_stats(&mut io::stdout().lock(), name);
    }

    pub fn write_function_stats<W: Write>(&self, out: &mut W, name: &str) -> io::Result<()> {
        writeln!(out)?;
        write_header(out, &format!("=== Stats for {name} ==="), self.colorize_enabled())?;
        match self.function_stats(name) {
            None => writeln!(out, "no calls recorded for {name}"),
            Some(s) => {
                writeln!(out, "  count:  {}", s.count)?;
                writeln!(out, "  total:  {}", format_duration(s.total_ns))?;
                writeln!(out, "  min:    {}", format_duration(s.min_ns))?;
                writeln!(out, "  max:    {}", format_duration(s.max_ns))?;
                writeln!(out, "  mean:   {}", format_duration(round_ns(s.mean_ns)))?;
                writeln!(out, "  median: {}", format_duration(round_ns(s.median_ns)))?;
                writeln!(out, "  p95:    {}", format_duration(s.p95_ns))?;
                writeln!(out, "  p99:    {}", format_duration(s.p99_ns))?;
                writeln!(out, "  stddev: {}", format_duration(round_ns(s.stddev_ns)))
            }
        }
    }
}

const NAME_COLUMN_WIDTH: usize = 40;

/// Shortens `s` to at most `max` characters, marking the cut with `...`.
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let kept: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}

/// Nearest-rank percentile over an already-sorted slice: index
/// `floor((n - 1) * p)`.
fn percentile(sorted: &[u64], p: f64) -> u64 {
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let idx = ((sorted.len() - 1) as f64 * p).floor() as usize;
    sorted[idx]
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn round_ns(ns: f64) -> u64 {
    ns.round().max(0.0) as u64
}

fn frequency_rows(traces: &[TraceEntry]) -> Vec<FrequencyRow> {
    let mut by_name: HashMap<&str, FrequencyRow> = HashMap::new();
    for entry in traces {
        let row = by_name.entry(&entry.name).or_insert_with(|| FrequencyRow {
            name: entry.name.clone(),
            count: 0,
            total_ns: 0,
            max_ns: 0,
        });
        row.count += 1;
        row.total_ns += entry.duration_ns;
        row.max_ns = row.max_ns.max(entry.duration_ns);
    }
    let mut rows: Vec<FrequencyRow> = by_name.into_values().collect();
    rows.sort_unstable_by_key(|r| Reverse(r.total_ns));
    rows
}

fn write_header<W: Write>(out: &mut W, text: &str, colorize: bool) -> io::Result<()> {
    if colorize {
        writeln!(out, "{}", text.bold())
    } else {
        writeln!(out, "{text}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::entry::CompletionResult;
    use std::sync::Arc;

    fn tracer_with_durations(name: &str, durations: &[u64]) -> Tracer {
        let clock = Arc::new(ManualClock::new());
        let tracer = Tracer::with_clock(clock.clone());
        tracer.set_colorize(false);
        for &d in durations {
            let span = tracer.span(name, Vec::new());
            clock.advance(d);
            span.complete(CompletionResult::Normal(Vec::new()));
        }
        tracer
    }

    #[test]
    fn hot_paths_filtered_and_sorted_desc() {
        let tracer = tracer_with_durations("f", &[5, 100, 40, 250]);
        tracer.set_thresholds(10, 40);
        let hot = tracer.get_hot_paths();
        let durations: Vec<u64> = hot.iter().map(|e| e.duration_ns).collect();
        assert_eq!(durations, vec![250, 100, 40]);
    }

    #[test]
    fn function_stats_odd_count() {
        let tracer = tracer_with_durations("f", &[10, 30, 20]);
        let s = tracer.function_stats("f").unwrap();
        assert_eq!(s.count, 3);
        assert_eq!(s.total_ns, 60);
        assert_eq!(s.min_ns, 10);
        assert_eq!(s.max_ns, 30);
        assert!((s.mean_ns - 20.0).abs() < f64::EPSILON);
        assert!((s.median_ns - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn function_stats_even_median_averages_middles() {
        let tracer = tracer_with_durations("f", &[10, 20, 30, 40]);
        let s = tracer.function_stats("f").unwrap();
        assert!((s.median_ns - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn percentile_uses_floor_rank() {
        let sorted: Vec<u64> = (1..=100).collect();
        assert_eq!(percentile(&sorted, 0.95), 95);
        assert_eq!(percentile(&sorted, 0.99), 99);
        assert_eq!(percentile(&[7], 0.95), 7);
    }

    #[test]
    fn stddev_is_population() {
        let tracer = tracer_with_durations("f", &[2, 4, 4, 4, 5, 5, 7, 9]);
        let s = tracer.function_stats("f").unwrap();
        assert!((s.stddev_ns - 2.0).abs() < 1e-9);
    }

    #[test]
    fn function_stats_missing_name_is_none() {
        let tracer = tracer_with_durations("f", &[10]);
        assert!(tracer.function_stats("g").is_none());
    }

    #[test]
    fn summary_lists_frequency_by_total_desc() {
        let clock = Arc::new(ManualClock::new());
        let tracer = Tracer::with_clock(clock.clone());
        tracer.set_colorize(false);
        for (name, d) in [("small", 10u64), ("big", 500), ("small", 20), ("big", 400)] {
            let span = tracer.span(name, Vec::new());
            clock.advance(d);
            span.complete(CompletionResult::Normal(Vec::new()));
        }
        let mut buf = Vec::new();
        tracer.write_summary(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let big_at = text.find(" big").unwrap();
        let small_at = text.rfind(" small").unwrap();
        assert!(text.contains("4 calls"));
        assert!(big_at < small_at, "big should precede small:\n{text}");
    }

    #[test]
    fn truncate_caps_long_names() {
        assert_eq!(truncate("short", 40), "short");
        let long = "a".repeat(60);
        let cut = truncate(&long, 40);
        assert_eq!(cut.chars().count(), 40);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn summary_truncates_oversized_names() {
        let long_name = "very_".repeat(20);
        let tracer = tracer_with_durations(&long_name, &[100]);
        let mut buf = Vec::new();
        tracer.write_summary(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(!text.contains(&long_name));
        assert!(text.contains("..."));
    }

    #[test]
    fn empty_summary_does_not_divide() {
        let tracer = Tracer::with_clock(Arc::new(ManualClock::new()));
        tracer.set_colorize(false);
        let mut buf = Vec::new();
        tracer.write_summary(&mut buf).unwrap();
        assert!(String::from_utf8(buf).unwrap().contains("no calls recorded"));
    }
}
