//! Recorded call data.

use std::fmt;

/// Stringified argument or return value captured at the instrumentation
/// boundary.
///
/// The tracer core never holds live references into the traced program;
/// anything without a structured mapping arrives already debug-formatted as
/// [`ArgValue::Opaque`].
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Opaque(String),
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Str(s) | ArgValue::Opaque(s) => f.write_str(s),
            ArgValue::Int(v) => write!(f, "{v}"),
            ArgValue::Float(v) => write!(f, "{v}"),
            ArgValue::Bool(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for ArgValue {
    fn from(v: &str) -> Self {
        ArgValue::Str(v.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(v: String) -> Self {
        ArgValue::Str(v)
    }
}

impl From<i64> for ArgValue {
    fn from(v: i64) -> Self {
        ArgValue::Int(v)
    }
}

impl From<i32> for ArgValue {
    fn from(v: i32) -> Self {
        ArgValue::Int(i64::from(v))
    }
}

impl From<u32> for ArgValue {
    fn from(v: u32) -> Self {
        ArgValue::Int(i64::from(v))
    }
}

impl From<usize> for ArgValue {
    fn from(v: usize) -> Self {
        i64::try_from(v).map_or_else(|_| ArgValue::Opaque(v.to_string()), ArgValue::Int)
    }
}

impl From<f64> for ArgValue {
    fn from(v: f64) -> Self {
        ArgValue::Float(v)
    }
}

impl From<bool> for ArgValue {
    fn from(v: bool) -> Self {
        ArgValue::Bool(v)
    }
}

/// Joins values as `a, b, c` for entry/exit lines and annotations.
#[must_use]
pub fn format_values(values: &[ArgValue]) -> String {
    values.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// Pretty-prints a nanosecond duration with the unit that keeps it readable.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_duration(ns: u64) -> String {
    match ns {
        0..=999 => format!("{ns}ns"),
        1_000..=999_999 => format!("{:.2}µs", ns as f64 / 1e3),
        1_000_000..=999_999_999 => format!("{:.2}ms", ns as f64 / 1e6),
        _ => format!("{:.2}s", ns as f64 / 1e9),
    }
}

/// Outcome of a traced call, reported by the instrumented code when the
/// bracket closes.
///
/// The caller is responsible for re-raising after reporting
/// [`CompletionResult::Unwinding`]; the tracer only records and logs, it
/// never swallows the failure.
#[derive(Debug, Clone)]
pub enum CompletionResult {
    Normal(Vec<ArgValue>),
    Unwinding(String),
}

/// One recorded call: timing, nesting, identity, and captured values.
///
/// Appended to the shared sequence at exit time, so sequence order is
/// completion order.
#[derive(Debug, Clone)]
pub struct TraceEntry {
    pub name: String,
    pub args: Vec<ArgValue>,
    pub returns: Vec<ArgValue>,
    pub depth: i32,
    pub start_ns: u64,
    pub end_ns: u64,
    pub duration_ns: u64,
    pub thread: u64,
    pub file: &'static str,
    pub line: u32,
    pub panicked: bool,
    pub panic_payload: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_values_joins_with_commas() {
        let values = vec![ArgValue::Int(1), ArgValue::from("x"), ArgValue::Bool(true)];
        assert_eq!(format_values(&values), "1, x, true");
    }

    #[test]
    fn format_duration_picks_unit() {
        assert_eq!(format_duration(999), "999ns");
        assert_eq!(format_duration(1_500), "1.50µs");
        assert_eq!(format_duration(2_500_000), "2.50ms");
        assert_eq!(format_duration(3_000_000_000), "3.00s");
    }
}
