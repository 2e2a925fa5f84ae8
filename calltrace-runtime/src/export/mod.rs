//! Trace file export.

mod perfetto;

pub use perfetto::PerfettoExporter;

use std::io;
use std::path::PathBuf;

/// Failures while producing a trace file.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("failed to write trace: {0}")]
    Io(#[from] io::Error),

    #[error("failed to persist trace at {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
