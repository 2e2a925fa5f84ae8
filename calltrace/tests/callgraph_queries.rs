//! Call graph construction and queries against a real on-disk project.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use calltrace::callgraph::{build_call_graph, callees_from, callers_to, path_segment};
use calltrace::domain::GraphError;

fn write_project(root: &Path, main_rs: &str) {
    fs::create_dir_all(root.join("src")).unwrap();
    fs::write(
        root.join("Cargo.toml"),
        "[package]\nname = \"demo\"\nversion = \"0.1.0\"\nedition = \"2021\"\n",
    )
    .unwrap();
    fs::write(root.join("src/main.rs"), main_rs).unwrap();
}

const SERVICE: &str = r"
struct Server;
struct Database;

impl Server {
    fn start(&self, db: &Database) {
        db.query();
    }
}

impl Database {
    fn query(&self) {}
}

fn main() {
    let server = Server;
    let db = Database;
    server.start(&db);
}

fn unused_helper() {}
";

#[test]
fn queries_work_end_to_end_on_a_cargo_project() {
    let dir = tempfile::tempdir().unwrap();
    write_project(dir.path(), SERVICE);

    let graph = build_call_graph(dir.path()).unwrap();

    let callers = callers_to(&graph, "Database.query").unwrap();
    let expected: BTreeSet<String> =
        ["main", "Server.start", "Database.query"].iter().map(ToString::to_string).collect();
    assert_eq!(callers, expected);

    let callees = callees_from(&graph, "main").unwrap();
    assert!(callees.contains("Server.start"));
    assert!(!callees.contains("unused_helper"));

    let on_path = path_segment(&graph, "main", "Database.query").unwrap();
    assert_eq!(on_path, expected);
}

#[test]
fn disconnected_target_is_a_no_path_error() {
    let dir = tempfile::tempdir().unwrap();
    write_project(dir.path(), SERVICE);

    let graph = build_call_graph(dir.path()).unwrap();
    let err = path_segment(&graph, "unused_helper", "Database.query").unwrap_err();
    assert!(matches!(err, GraphError::NoPath { .. }));
}

#[test]
fn project_without_functions_is_an_empty_graph() {
    let dir = tempfile::tempdir().unwrap();
    write_project(dir.path(), "struct OnlyData;\n");

    let err = build_call_graph(dir.path()).unwrap_err();
    assert!(matches!(err, GraphError::EmptyGraph(_)));
}

#[test]
fn sources_across_modules_share_one_graph() {
    let dir = tempfile::tempdir().unwrap();
    write_project(dir.path(), "mod db;\nfn main() { db::open(); }\n");
    fs::write(dir.path().join("src/db.rs"), "pub fn open() { connect(); }\nfn connect() {}\n")
        .unwrap();

    let graph = build_call_graph(dir.path()).unwrap();
    let callees = callees_from(&graph, "main").unwrap();
    assert!(callees.contains("open"));
    assert!(callees.contains("connect"));
}
