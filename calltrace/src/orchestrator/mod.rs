//! Hot-run pipeline: scope → stage → instrument → build → run → counters.
//!
//! The pipeline aborts before any staging work if scope computation fails,
//! so a bad `--until` target never leaves artifacts behind. Counter results
//! are printed even when the instrumented binary fails, since a crashing
//! run is often exactly the one being investigated.

pub mod collab;

pub use collab::{CargoBuilder, CommandInstrumentor};

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{info, warn};
use tempfile::TempDir;
use tokio::process::Command;
use tokio::sync::watch;

use crate::callgraph::{build_call_graph, path_segment};
use crate::domain::RunError;
use crate::pmu::{open_counters, PmuCounters};
use crate::scope::ScopePredicate;

/// Which runtime primitive the rewriter injects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracePrimitive {
    /// Print every call as it happens.
    Trace,
    /// Stay silent unless a traced call unwinds.
    TraceOnPanic,
}

/// Requested instrumentation scope, before graph resolution.
#[derive(Debug, Clone, Default)]
pub struct ScopeSpec {
    /// Entry function for path scoping; defaults to `main`.
    pub entry: Option<String>,
    /// Restrict instrumentation to functions on a call path from the entry
    /// to this target.
    pub until: Option<String>,
}

/// Everything the source rewriter needs to know.
#[derive(Debug, Clone)]
pub struct InstrumentPlan {
    pub scope: ScopePredicate,
    pub primitive: TracePrimitive,
    /// Substring filter on function names, applied on top of the scope.
    pub pattern: Option<String>,
    /// Inject a latency-distribution printout for this function at exit.
    pub stats_target: Option<String>,
}

/// Rewrites staged sources in place according to a plan.
pub trait Instrumentor {
    fn instrument(&self, staged_root: &Path, plan: &InstrumentPlan) -> Result<(), RunError>;
}

/// Turns a staged source tree into a runnable binary.
pub trait ArtifactBuilder {
    fn build(&self, staged_root: &Path) -> Result<PathBuf, RunError>;
}

/// Parameters for one hot run.
#[derive(Debug, Clone)]
pub struct HotRunConfig {
    /// Source file or project directory to run.
    pub target: PathBuf,
    pub scope: ScopeSpec,
    pub primitive: TracePrimitive,
    /// Substring filter on function names.
    pub pattern: Option<String>,
    pub stats_target: Option<String>,
    /// Collect hardware counters for the run.
    pub collect_counters: bool,
    /// Keep the staged tree after the run for inspection.
    pub keep_staging: bool,
    /// Emit counters as JSON instead of the text table.
    pub json_counters: bool,
    /// Arguments forwarded to the instrumented binary.
    pub child_args: Vec<String>,
}

/// Walks up from `start` to the nearest directory containing `Cargo.toml`.
pub fn find_module_root(start: &Path) -> Result<PathBuf, RunError> {
    let mut dir = if start.is_dir() { start } else { start.parent().unwrap_or(start) };
    loop {
        if dir.join("Cargo.toml").is_file() {
            return Ok(dir.to_path_buf());
        }
        match dir.parent() {
            Some(parent) => dir = parent,
            None => return Err(RunError::NoManifest(start.to_path_buf())),
        }
    }
}

/// Resolves the requested scope against the module's call graph. An
/// unrestricted spec skips graph construction entirely.
pub fn compute_scope(module_root: &Path, spec: &ScopeSpec) -> Result<ScopePredicate, RunError> {
    let Some(until) = &spec.until else {
        return Ok(ScopePredicate::allow_all());
    };
    let graph = build_call_graph(module_root)?;
    let entry = spec.entry.as_deref().unwrap_or("main");
    let names = path_segment(&graph, entry, until)?;
    info!("scope: {} functions on the {entry} → {until} path", names.len());
    Ok(ScopePredicate::from_names(names))
}

/// Runs the full pipeline. Returns `Ok` only when the instrumented binary
/// exited zero; a non-zero child exit surfaces as [`RunError::Child`] after
/// counters are reported.
pub async fn run_hot<I, B>(
    config: &HotRunConfig,
    instrumentor: &I,
    builder: &B,
) -> Result<(), RunError>
where
    I: Instrumentor,
    B: ArtifactBuilder,
{
    let target = config
        .target
        .canonicalize()
        .map_err(|_| RunError::BadTarget(config.target.clone()))?;
    if !target.exists() {
        return Err(RunError::BadTarget(target));
    }
    let module_root = find_module_root(&target)?;

    // Scope resolution happens before anything touches the filesystem.
    let scope = compute_scope(&module_root, &config.scope)?;
    let plan = InstrumentPlan {
        scope,
        primitive: config.primitive,
        pattern: config.pattern.clone(),
        stats_target: config.stats_target.clone(),
    };

    let staging = TempDir::new()?;
    let result = run_staged(config, &module_root, staging.path(), &plan, instrumentor, builder).await;

    if config.keep_staging {
        let kept = staging.into_path();
        info!("staged sources kept at {}", kept.display());
    }
    result
}

async fn run_staged<I, B>(
    config: &HotRunConfig,
    module_root: &Path,
    staged_root: &Path,
    plan: &InstrumentPlan,
    instrumentor: &I,
    builder: &B,
) -> Result<(), RunError>
where
    I: Instrumentor,
    B: ArtifactBuilder,
{
    copy_tree(module_root, staged_root)
        .map_err(|e| RunError::Stage(format!("{}: {e}", module_root.display())))?;
    instrumentor.instrument(staged_root, plan)?;
    let binary = builder.build(staged_root)?;

    // Open before spawn: the events are inherited across fork and armed to
    // start counting at the child's exec. Without an explicit request the
    // run stays silent about counters entirely.
    let pmu = if config.collect_counters {
        match open_counters() {
            Ok(group) => Some(group),
            Err(e) => {
                warn!("hardware counters unavailable: {e}");
                None
            }
        }
    } else {
        None
    };

    let run_result = launch(&binary, &config.child_args).await;

    let counters = pmu.and_then(|group| match group.finalize() {
        Ok(counters) => Some(counters),
        Err(e) => {
            warn!("failed to read hardware counters: {e}");
            None
        }
    });
    if let Some(counters) = counters {
        // The child's exit status is the primary result; a failed counter
        // printout must not replace it.
        if let Err(e) = report_counters(&mut std::io::stdout().lock(), &counters, config.json_counters)
        {
            warn!("failed to report hardware counters: {e}");
        }
    }

    match run_result? {
        0 => Ok(()),
        code => Err(RunError::Child { code }),
    }
}

fn report_counters<W: Write>(out: &mut W, counters: &PmuCounters, json: bool) -> std::io::Result<()> {
    if json {
        let rendered = serde_json::to_string_pretty(counters)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        writeln!(out, "{rendered}")?;
    } else {
        counters.write_summary(out)?;
    }
    Ok(())
}

/// Spawns the instrumented binary with inherited stdio, relaying SIGINT and
/// SIGTERM to it for as long as it runs. Returns the child's exit code,
/// mapping signal deaths to `128 + signal`.
async fn launch(binary: &Path, args: &[String]) -> Result<i32, RunError> {
    let mut child = Command::new(binary)
        .args(args)
        .spawn()
        .map_err(|source| RunError::Launch { path: binary.to_path_buf(), source })?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let relay = child
        .id()
        .and_then(|id| i32::try_from(id).ok())
        .map(|pid| tokio::spawn(relay_signals(pid, stop_rx)));

    let status = child.wait().await;

    // The relay is stopped and joined on every path, including a failed
    // wait, so it never outlives the child it forwards to.
    let _ = stop_tx.send(true);
    if let Some(task) = relay {
        let _ = task.await;
    }

    let status = status?;
    if let Some(code) = status.code() {
        return Ok(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Ok(128 + signal);
        }
    }
    Ok(1)
}

async fn relay_signals(pid: i32, mut stop: watch::Receiver<bool>) {
    use tokio::signal::unix::{signal, SignalKind};

    let (Ok(mut sigint), Ok(mut sigterm)) =
        (signal(SignalKind::interrupt()), signal(SignalKind::terminate()))
    else {
        warn!("signal relay unavailable; interrupts will not reach the child");
        return;
    };

    loop {
        tokio::select! {
            _ = sigint.recv() => forward_signal(pid, libc::SIGINT),
            _ = sigterm.recv() => forward_signal(pid, libc::SIGTERM),
            _ = stop.changed() => break,
        }
    }
}

#[allow(unsafe_code)]
fn forward_signal(pid: i32, signal: i32) {
    // SAFETY: kill with a valid pid and signal number has no memory effects.
    let rc = unsafe { libc::kill(pid, signal) };
    if rc != 0 {
        warn!("failed to forward signal {signal} to pid {pid}");
    }
}

/// Copies a project tree, skipping build output and VCS metadata.
fn copy_tree(from: &Path, to: &Path) -> std::io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let name = entry.file_name();
        let skip = matches!(name.to_string_lossy().as_ref(), "target" | ".git");
        if skip {
            continue;
        }
        let src = entry.path();
        let dst = to.join(&name);
        if src.is_dir() {
            copy_tree(&src, &dst)?;
        } else {
            fs::copy(&src, &dst)?;
        }
    }
    Ok(())
}
