//! # calltrace - Main Entry Point
//!
//! Subcommands split into two groups:
//! - **Queries** (`callers`, `callees`, `path`): static call-graph analysis
//! - **Hot run** (`run`): instrument, build, and execute with counters

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;

use calltrace::callgraph::{self, build_call_graph};
use calltrace::cli::{Cli, Command};
use calltrace::domain::{GraphError, RunError};
use calltrace::orchestrator::{
    run_hot, CargoBuilder, CommandInstrumentor, HotRunConfig, ScopeSpec, TracePrimitive,
};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_ANALYSIS: i32 = 3;
const EXIT_BUILD: i32 = 4;
const EXIT_IO: i32 = 5;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            // A non-zero child already reported itself on its own stderr;
            // its code passes through without extra noise.
            if let Some(RunError::Child { code }) = e.downcast_ref::<RunError>() {
                *code
            } else {
                eprintln!("error: {e}");
                exit_code_for(&e)
            }
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<GraphError>().is_some() {
        return EXIT_ANALYSIS;
    }
    match err.downcast_ref::<RunError>() {
        Some(RunError::Graph(_)) => EXIT_ANALYSIS,
        Some(RunError::Stage(_) | RunError::Build(_)) => EXIT_BUILD,
        Some(RunError::BadTarget(_) | RunError::NoManifest(_)) => EXIT_USAGE,
        Some(RunError::Io(_) | RunError::Launch { .. }) => EXIT_IO,
        Some(RunError::Child { code }) => *code,
        None => EXIT_ERROR,
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Callers { function, project } => {
            let names = query_graph(project.as_deref(), |g| callgraph::callers_to(g, &function))?;
            print_names(&names);
        }
        Command::Callees { function, project } => {
            let names = query_graph(project.as_deref(), |g| callgraph::callees_from(g, &function))?;
            print_names(&names);
        }
        Command::Path { from, to, project } => {
            let names =
                query_graph(project.as_deref(), |g| callgraph::path_segment(g, &from, &to))?;
            print_names(&names);
        }
        Command::Run {
            target,
            until,
            entry,
            panic,
            pattern,
            stats,
            keep_staging,
            counters,
            json,
            instrumentor,
            child_args,
        } => {
            let config = HotRunConfig {
                target,
                scope: ScopeSpec { entry: Some(entry), until },
                primitive: if panic { TracePrimitive::TraceOnPanic } else { TracePrimitive::Trace },
                pattern,
                stats_target: stats,
                keep_staging,
                collect_counters: counters,
                json_counters: json,
                child_args,
            };
            run_hot(&config, &CommandInstrumentor::new(instrumentor), &CargoBuilder).await?;
        }
    }
    Ok(())
}

fn query_graph<F>(project: Option<&Path>, query: F) -> Result<BTreeSet<String>>
where
    F: FnOnce(&callgraph::CallGraph) -> Result<BTreeSet<String>, GraphError>,
{
    let project = project.map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let graph = build_call_graph(&project)?;
    Ok(query(&graph)?)
}

fn print_names(names: &BTreeSet<String>) {
    for name in names {
        println!("{name}");
    }
}
