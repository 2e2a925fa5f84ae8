//! Default pipeline collaborators: the external source rewriter and the
//! cargo release build.

use std::path::{Path, PathBuf};
use std::process::Command;

use cargo_metadata::MetadataCommand;
use log::{debug, info};

use crate::domain::RunError;
use crate::orchestrator::{ArtifactBuilder, InstrumentPlan, Instrumentor, TracePrimitive};

/// Invokes the source rewriter as an external command over the staged tree.
///
/// The rewriter contract: it takes `--root <dir>`, a `--primitive` name,
/// optional repeated `--allow <name>` scope entries, an optional
/// `--pattern <substring>` name filter, and an optional `--stats <name>`,
/// and rewrites the sources in place.
pub struct CommandInstrumentor {
    program: PathBuf,
}

impl Default for CommandInstrumentor {
    fn default() -> Self {
        Self { program: PathBuf::from("calltrace-instrument") }
    }
}

impl CommandInstrumentor {
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into() }
    }
}

impl Instrumentor for CommandInstrumentor {
    fn instrument(&self, staged_root: &Path, plan: &InstrumentPlan) -> Result<(), RunError> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--root").arg(staged_root);
        cmd.arg("--primitive").arg(match plan.primitive {
            TracePrimitive::Trace => "trace",
            TracePrimitive::TraceOnPanic => "trace-on-panic",
        });
        for name in plan.scope.names() {
            cmd.arg("--allow").arg(name);
        }
        if let Some(pattern) = &plan.pattern {
            cmd.arg("--pattern").arg(pattern);
        }
        if let Some(stats) = &plan.stats_target {
            cmd.arg("--stats").arg(stats);
        }

        debug!("instrumenting staged tree at {}", staged_root.display());
        let output = cmd
            .output()
            .map_err(|e| RunError::Stage(format!("{}: {e}", self.program.display())))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RunError::Stage(stderr.trim().to_string()));
        }
        Ok(())
    }
}

/// Builds the staged tree with `cargo build --release` and locates the
/// produced binary through cargo metadata.
#[derive(Default)]
pub struct CargoBuilder;

impl ArtifactBuilder for CargoBuilder {
    fn build(&self, staged_root: &Path) -> Result<PathBuf, RunError> {
        info!("building instrumented sources");
        let output = Command::new("cargo")
            .arg("build")
            .arg("--release")
            .current_dir(staged_root)
            .output()
            .map_err(|e| RunError::Build(e.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RunError::Build(stderr.trim().to_string()));
        }

        let metadata = MetadataCommand::new()
            .manifest_path(staged_root.join("Cargo.toml"))
            .no_deps()
            .exec()
            .map_err(|e| RunError::Build(e.to_string()))?;
        let bin = metadata
            .workspace_packages()
            .iter()
            .flat_map(|p| &p.targets)
            .find(|t| t.kind.iter().any(|k| k == "bin"))
            .map(|t| t.name.clone())
            .ok_or_else(|| RunError::Build("no binary target in staged tree".to_string()))?;

        Ok(metadata.target_directory.as_std_path().join("release").join(bin))
    }
}
