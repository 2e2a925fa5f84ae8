//! Call-bracket tracing runtime linked into instrumented programs.
//!
//! Instrumentation rewrites selected functions to open a [`Span`] on entry
//! and complete it on exit. The shared [`Tracer`] records every completed
//! call with nanosecond timing, nesting depth, and thread identity, and can
//! replay the run as:
//!
//! - live entry/exit lines on stdout, colorized unless `NO_COLOR` is set;
//! - a run summary (slowest calls, per-function frequency);
//! - per-function latency distributions (mean, median, p95/p99, stddev);
//! - a Perfetto track-event trace for ui.perfetto.dev.
//!
//! The crate-level free functions operate on a process-wide singleton so
//! instrumented code needs no plumbing:
//!
//! ```
//! use calltrace_runtime::{trace, trace_args, CompletionResult};
//!
//! fn add(a: i64, b: i64) -> i64 {
//!     let span = trace("add", trace_args!(a, b));
//!     let sum = a + b;
//!     span.complete(CompletionResult::Normal(trace_args!(sum)));
//!     sum
//! }
//! # add(1, 2);
//! ```
//!
//! Panic-triggered mode ([`trace_on_panic`]) stays silent on the happy path
//! and dumps the pending call stack of the unwinding thread exactly once per
//! process.

pub mod clock;
pub mod entry;
pub mod export;
pub mod stats;
pub mod tracer;

pub use entry::{format_duration, format_values, ArgValue, CompletionResult, TraceEntry};
pub use export::{ExportError, PerfettoExporter};
pub use stats::FunctionStats;
pub use tracer::{HeatClass, Span, Tracer, DEFAULT_HOT_NS, DEFAULT_WARN_NS};

use std::path::Path;

use once_cell::sync::Lazy;

static GLOBAL: Lazy<Tracer> = Lazy::new(Tracer::new);

/// The process-wide tracer every free function below operates on.
#[must_use]
pub fn tracer() -> &'static Tracer {
    &GLOBAL
}

/// Opens a traced call bracket on the global tracer; the entry line prints
/// immediately. Complete the returned span with the call's outcome.
#[track_caller]
pub fn trace(name: &str, args: Vec<ArgValue>) -> Span<'static> {
    GLOBAL.span(name, args)
}

/// Like [`trace`], but silent unless the call unwinds.
#[track_caller]
pub fn trace_on_panic(name: &str, args: Vec<ArgValue>) -> Span<'static> {
    GLOBAL.span_on_panic(name, args)
}

/// Snapshot of all recorded entries, in completion order.
#[must_use]
pub fn get_traces() -> Vec<TraceEntry> {
    GLOBAL.get_traces()
}

/// Recorded entries at or above the hot threshold, slowest first.
#[must_use]
pub fn get_hot_paths() -> Vec<TraceEntry> {
    GLOBAL.get_hot_paths()
}

/// Latency distribution for one function name, if it was ever called.
#[must_use]
pub fn function_stats(name: &str) -> Option<FunctionStats> {
    GLOBAL.function_stats(name)
}

/// Clears recorded state and rearms the panic dump.
pub fn reset() {
    GLOBAL.reset();
}

/// Reconfigures the warn/hot duration boundaries, in nanoseconds.
pub fn set_thresholds(warn_ns: i64, hot_ns: i64) {
    GLOBAL.set_thresholds(warn_ns, hot_ns);
}

/// Forces colorized output on or off, overriding the `NO_COLOR` default.
pub fn set_colorize(enabled: bool) {
    GLOBAL.set_colorize(enabled);
}

/// Prints the run summary to stdout.
pub fn print_summary() {
    GLOBAL.print_summary();
}

/// Prints the latency distribution for `name` to stdout.
pub fn print_function_stats(name: &str) {
    GLOBAL.print_function_stats(name);
}

/// Writes the recorded run as a Perfetto trace file at `path`.
pub fn export_trace(path: impl AsRef<Path>) -> Result<(), ExportError> {
    PerfettoExporter::new(&GLOBAL).export_to_file(path.as_ref())
}

/// Builds a `Vec<ArgValue>` from expressions the tracer knows how to
/// capture. Anything else should be formatted by the caller first.
#[macro_export]
macro_rules! trace_args {
    () => {
        ::std::vec::Vec::new()
    };
    ($($value:expr),+ $(,)?) => {
        ::std::vec![$($crate::ArgValue::from($value)),+]
    };
}
