//! Error types for graph analysis, counter collection, and hot runs.

use std::path::PathBuf;

use thiserror::Error;

/// Failures while building or querying the static call graph.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("failed to load sources for analysis: {0}")]
    Load(String),

    #[error("no functions found under {0}")]
    EmptyGraph(PathBuf),

    #[error("function not found in call graph: {0}")]
    NotFound(String),

    #[error("no call path from {from} to {to}")]
    NoPath { from: String, to: String },
}

/// Failures while opening or reading hardware performance counters.
#[derive(Debug, Error)]
pub enum PmuError {
    #[error("hardware counters are not supported on this platform")]
    Unsupported,

    #[error("failed to open counter {counter}: {source} (try: sudo sysctl kernel.perf_event_paranoid=-1)")]
    Open {
        counter: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read counter {counter}: {source}")]
    Read {
        counter: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Failures during a hot run, ordered roughly by pipeline stage.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("target is not a file: {0}")]
    BadTarget(PathBuf),

    #[error("no Cargo.toml found above {0}")]
    NoManifest(PathBuf),

    #[error("failed to stage instrumented sources: {0}")]
    Stage(String),

    #[error("build of instrumented sources failed: {0}")]
    Build(String),

    #[error("failed to launch instrumented binary {path}: {source}")]
    Launch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The instrumented binary ran and exited non-zero; its code is
    /// propagated verbatim.
    #[error("instrumented binary exited with code {code}")]
    Child { code: i32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_errors_name_the_function() {
        let err = GraphError::NotFound("Database.query".to_string());
        assert!(err.to_string().contains("Database.query"));

        let err = GraphError::NoPath { from: "main".to_string(), to: "flush".to_string() };
        let msg = err.to_string();
        assert!(msg.contains("main") && msg.contains("flush"));
    }

    #[test]
    fn pmu_open_error_suggests_paranoid_fix() {
        let err = PmuError::Open {
            counter: "cycles",
            source: std::io::Error::from_raw_os_error(libc::EACCES),
        };
        assert!(err.to_string().contains("perf_event_paranoid"));
    }

    #[test]
    fn run_error_wraps_graph_error() {
        let err = RunError::from(GraphError::NotFound("f".to_string()));
        assert!(matches!(err, RunError::Graph(_)));
    }
}
