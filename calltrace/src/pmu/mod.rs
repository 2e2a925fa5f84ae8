//! Hardware performance counters for hot runs.
//!
//! Counters are opened on the parent before the instrumented binary is
//! spawned: disabled at open, inherited across fork, and enabled by the
//! child's exec, so the window covers exactly the child's lifetime.

#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(not(target_os = "linux"))]
pub mod stub;

#[cfg(target_os = "linux")]
pub use linux::PerfCounterGroup;
#[cfg(not(target_os = "linux"))]
pub use stub::PerfCounterGroup;

use std::io::{self, Write};

use serde::Serialize;

use crate::domain::PmuError;

/// The hardware events a hot run collects, in open order. The numeric
/// configs are the `PERF_COUNT_HW_*` values.
pub(crate) const COUNTERS: [(&str, u64); 5] = [
    ("cycles", 0),
    ("instructions", 1),
    ("cache-references", 2),
    ("cache-misses", 3),
    ("branch-misses", 5),
];

/// Final counter values for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PmuCounters {
    pub cycles: u64,
    pub instructions: u64,
    pub cache_references: u64,
    pub cache_misses: u64,
    pub branch_misses: u64,
}

impl PmuCounters {
    /// Instructions per cycle; `None` when no cycles were counted.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn ipc(&self) -> Option<f64> {
        (self.cycles > 0).then(|| self.instructions as f64 / self.cycles as f64)
    }

    /// Cache miss rate over references; `None` without references.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn cache_miss_rate(&self) -> Option<f64> {
        (self.cache_references > 0).then(|| self.cache_misses as f64 / self.cache_references as f64)
    }

    /// Writes the human-readable counter table with derived ratios.
    pub fn write_summary<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out)?;
        writeln!(out, "=== Hardware Counters ===")?;
        writeln!(out, "  cycles:           {:>18}", format_count(self.cycles))?;
        writeln!(out, "  instructions:     {:>18}", format_count(self.instructions))?;
        writeln!(out, "  cache-references: {:>18}", format_count(self.cache_references))?;
        writeln!(out, "  cache-misses:     {:>18}", format_count(self.cache_misses))?;
        writeln!(out, "  branch-misses:    {:>18}", format_count(self.branch_misses))?;
        if let Some(ipc) = self.ipc() {
            writeln!(out, "  IPC:              {ipc:>18.2}")?;
        }
        if let Some(rate) = self.cache_miss_rate() {
            writeln!(out, "  cache miss rate:  {:>17.1}%", rate * 100.0)?;
        }
        Ok(())
    }
}

/// Opens the counter group for the calling process and its future children.
pub fn open_counters() -> Result<PerfCounterGroup, PmuError> {
    PerfCounterGroup::open()
}

/// Groups digits in threes: `1234567` becomes `1,234,567`.
#[must_use]
pub fn format_count(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_count_groups_thousands() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(1_000), "1,000");
        assert_eq!(format_count(1_234_567_890), "1,234,567,890");
    }

    #[test]
    fn derived_ratios_guard_division() {
        let zero = PmuCounters::default();
        assert_eq!(zero.ipc(), None);
        assert_eq!(zero.cache_miss_rate(), None);

        let counters = PmuCounters {
            cycles: 1_000,
            instructions: 2_500,
            cache_references: 200,
            cache_misses: 50,
            branch_misses: 7,
        };
        assert!((counters.ipc().unwrap() - 2.5).abs() < f64::EPSILON);
        assert!((counters.cache_miss_rate().unwrap() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn summary_includes_ratios_when_available() {
        let counters = PmuCounters { cycles: 100, instructions: 200, ..Default::default() };
        let mut buf = Vec::new();
        counters.write_summary(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("IPC"));
        assert!(!text.contains("cache miss rate"));
    }

    #[test]
    fn counters_serialize_for_json_output() {
        let counters = PmuCounters { cycles: 5, ..Default::default() };
        let json = serde_json::to_string(&counters).unwrap();
        assert!(json.contains("\"cycles\":5"));
    }
}
