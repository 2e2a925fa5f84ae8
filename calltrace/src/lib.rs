//! # calltrace - call graph analysis and selective instrumentation
//!
//! Static analysis and run orchestration for tracing Rust programs:
//!
//! - [`callgraph`] builds a conservative, name-resolved call graph from a
//!   crate's sources and answers reachability queries over it (`callers`,
//!   `callees`, `path`).
//! - [`scope`] turns a query result into a predicate that limits which
//!   functions get instrumented.
//! - [`orchestrator`] runs the hot pipeline: stage the project into a temp
//!   tree, rewrite it, build it, run it with signals relayed, and report
//!   hardware counters.
//! - [`pmu`] opens `perf_event_open` counter groups that cover exactly the
//!   instrumented child's lifetime.
//!
//! The runtime half lives in the `calltrace-runtime` crate, which the
//! rewriter links into instrumented programs.

pub mod callgraph;
pub mod cli;
pub mod domain;
pub mod orchestrator;
pub mod pmu;
pub mod scope;
