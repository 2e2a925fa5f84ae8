//! CLI argument definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "calltrace",
    about = "Trace function calls in Rust programs with selective instrumentation",
    after_help = "\
EXAMPLES:
    calltrace callers Database.query            Who can reach Database.query
    calltrace callees Server.start              Everything Server.start may call
    calltrace path main Database.query          Functions on the main → query path
    calltrace run src/main.rs                   Trace every call in a hot run
    calltrace run src/main.rs --until flush     Trace only the main → flush path
    calltrace run src/main.rs --panic           Print call stacks only on panic
    calltrace run src/main.rs --counters        Report hardware counters
    calltrace run src/main.rs -- --port 8080    Pass arguments to the binary"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// List every function from which FUNCTION is reachable
    Callers {
        /// Function name, Type.method, or module::name
        function: String,

        /// Project directory to analyze (defaults to the current directory)
        #[arg(long, value_name = "DIR")]
        project: Option<PathBuf>,
    },

    /// List every function reachable from FUNCTION
    Callees {
        function: String,

        #[arg(long, value_name = "DIR")]
        project: Option<PathBuf>,
    },

    /// List the functions on some call path from FROM to TO
    Path {
        from: String,
        to: String,

        #[arg(long, value_name = "DIR")]
        project: Option<PathBuf>,
    },

    /// Instrument, build, and run a program with tracing and hardware counters
    Run {
        /// Source file or project directory to run
        target: PathBuf,

        /// Only instrument functions on a call path from the entry to this one
        #[arg(long, value_name = "FUNCTION")]
        until: Option<String>,

        /// Entry function for --until scoping
        #[arg(long, default_value = "main", value_name = "FUNCTION")]
        entry: String,

        /// Buffer traces and print them only when a call panics
        #[arg(long)]
        panic: bool,

        /// Only instrument functions whose name contains this substring
        #[arg(long, value_name = "SUBSTRING")]
        pattern: Option<String>,

        /// Print a latency distribution for this function when the run ends
        #[arg(long, value_name = "FUNCTION")]
        stats: Option<String>,

        /// Keep the staged instrumented sources for inspection
        #[arg(long)]
        keep_staging: bool,

        /// Collect hardware performance counters for the run
        #[arg(long)]
        counters: bool,

        /// Emit hardware counters as JSON (requires --counters)
        #[arg(long, requires = "counters")]
        json: bool,

        /// Source rewriter command to invoke over the staged tree
        #[arg(long, default_value = "calltrace-instrument", value_name = "PROGRAM")]
        instrumentor: PathBuf,

        /// Arguments passed through to the instrumented binary
        #[arg(last = true, value_name = "ARGS")]
        child_args: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_defaults() {
        let cli = Cli::try_parse_from(["calltrace", "run", "src/main.rs"]).unwrap();
        let Command::Run { target, until, entry, panic, .. } = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(target, PathBuf::from("src/main.rs"));
        assert_eq!(until, None);
        assert_eq!(entry, "main");
        assert!(!panic);
    }

    #[test]
    fn path_takes_two_functions() {
        let cli = Cli::try_parse_from(["calltrace", "path", "main", "Database.query"]).unwrap();
        let Command::Path { from, to, .. } = cli.command else {
            panic!("expected path command");
        };
        assert_eq!(from, "main");
        assert_eq!(to, "Database.query");
    }

    #[test]
    fn missing_subcommand_is_a_usage_error() {
        assert!(Cli::try_parse_from(["calltrace"]).is_err());
    }

    #[test]
    fn pattern_and_counters_parse() {
        let cli = Cli::try_parse_from([
            "calltrace", "run", "src/main.rs", "--pattern", "db_", "--counters",
        ])
        .unwrap();
        let Command::Run { pattern, counters, .. } = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(pattern.as_deref(), Some("db_"));
        assert!(counters);
    }

    #[test]
    fn json_requires_counters() {
        assert!(Cli::try_parse_from(["calltrace", "run", "src/main.rs", "--json"]).is_err());
        assert!(
            Cli::try_parse_from(["calltrace", "run", "src/main.rs", "--counters", "--json"])
                .is_ok()
        );
    }
}
