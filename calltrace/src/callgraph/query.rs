//! Reachability queries over the call graph.
//!
//! All three queries return display names in a sorted set. Synthetic nodes
//! participate in traversal (a path through a nested helper still connects
//! its endpoints) but are dropped from the returned sets.

use std::collections::{BTreeSet, HashSet, VecDeque};

use crate::callgraph::{CallGraph, FunctionId};
use crate::domain::GraphError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

/// All functions matching `pattern`. Three pattern shapes are accepted:
///
/// - `name` matches any function or method with that bare name;
/// - `Type.method` (or `Type::method`) matches the method on that receiver
///   type, tolerating a leading `*` or `&` on the type;
/// - `module::name` matches a free function whose module path ends with the
///   given prefix.
#[must_use]
pub fn match_nodes(graph: &CallGraph, pattern: &str) -> Vec<FunctionId> {
    if let Some((qualifier, name)) = split_pattern(pattern) {
        let qualifier = qualifier.trim_start_matches(['*', '&']);
        graph
            .ids_named(name)
            .iter()
            .copied()
            .filter(|&id| {
                let node = graph.node(id);
                node.self_ty.as_deref() == Some(qualifier)
                    || (node.self_ty.is_none() && module_ends_with(&node.module, qualifier))
            })
            .collect()
    } else {
        graph.ids_named(pattern).to_vec()
    }
}

fn split_pattern(pattern: &str) -> Option<(&str, &str)> {
    if let Some((qualifier, name)) = pattern.rsplit_once('.') {
        return Some((qualifier, name));
    }
    pattern.rsplit_once("::")
}

fn module_ends_with(module: &str, qualifier: &str) -> bool {
    // Qualifier may itself be a path, so compare segment-wise from the end.
    let mut mod_segments = module.rsplit("::");
    qualifier.rsplit("::").all(|q| mod_segments.next() == Some(q))
}

/// Every function from which `target` is reachable, including the matches
/// themselves.
pub fn callers_to(graph: &CallGraph, target: &str) -> Result<BTreeSet<String>, GraphError> {
    let seeds = seeds_for(graph, target)?;
    Ok(display_set(graph, &reachable(graph, &seeds, Direction::Reverse)))
}

/// Every function reachable from `source`, including the matches
/// themselves.
pub fn callees_from(graph: &CallGraph, source: &str) -> Result<BTreeSet<String>, GraphError> {
    let seeds = seeds_for(graph, source)?;
    Ok(display_set(graph, &reachable(graph, &seeds, Direction::Forward)))
}

/// Functions on some call path from `from` to `to`: the intersection of the
/// forward cone of `from` and the reverse cone of `to`.
pub fn path_segment(
    graph: &CallGraph,
    from: &str,
    to: &str,
) -> Result<BTreeSet<String>, GraphError> {
    let from_seeds = seeds_for(graph, from)?;
    let to_seeds = seeds_for(graph, to)?;

    let forward = reachable(graph, &from_seeds, Direction::Forward);
    let reverse = reachable(graph, &to_seeds, Direction::Reverse);
    let on_path: HashSet<FunctionId> = forward.intersection(&reverse).copied().collect();
    if on_path.is_empty() {
        return Err(GraphError::NoPath { from: from.to_string(), to: to.to_string() });
    }
    Ok(display_set(graph, &on_path))
}

fn seeds_for(graph: &CallGraph, pattern: &str) -> Result<Vec<FunctionId>, GraphError> {
    let seeds = match_nodes(graph, pattern);
    if seeds.is_empty() {
        return Err(GraphError::NotFound(pattern.to_string()));
    }
    Ok(seeds)
}

/// Breadth-first reachability from `seeds` along the chosen direction; the
/// result includes the seeds.
pub(crate) fn reachable(
    graph: &CallGraph,
    seeds: &[FunctionId],
    direction: Direction,
) -> HashSet<FunctionId> {
    let mut visited: HashSet<FunctionId> = seeds.iter().copied().collect();
    let mut queue: VecDeque<FunctionId> = seeds.iter().copied().collect();
    while let Some(current) = queue.pop_front() {
        let next = match direction {
            Direction::Forward => graph.callees(current),
            Direction::Reverse => graph.callers(current),
        };
        for &id in next {
            if visited.insert(id) {
                queue.push_back(id);
            }
        }
    }
    visited
}

fn display_set(graph: &CallGraph, ids: &HashSet<FunctionId>) -> BTreeSet<String> {
    ids.iter()
        .filter(|&&id| !graph.node(id).synthetic)
        .map(|&id| graph.node(id).display_name())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callgraph::build_from_sources;
    use std::path::PathBuf;

    fn service_graph() -> CallGraph {
        build_from_sources(&[(
            PathBuf::from("main.rs"),
            r"
            struct Server;
            struct Database;
            impl Server {
                fn start(&self, db: &Database) { db.query(); }
            }
            impl Database {
                fn query(&self) {}
            }
            fn main() {
                let server = Server;
                let db = Database;
                server.start(&db);
            }
            fn idle() {}
            "
            .to_string(),
        )])
        .unwrap()
    }

    #[test]
    fn callers_include_the_whole_chain_and_the_target() {
        let graph = service_graph();
        let callers = callers_to(&graph, "Database.query").unwrap();
        let expected: BTreeSet<String> =
            ["main", "Server.start", "Database.query"].iter().map(ToString::to_string).collect();
        assert_eq!(callers, expected);
    }

    #[test]
    fn callees_walk_forward_from_the_source() {
        let graph = service_graph();
        let callees = callees_from(&graph, "Server.start").unwrap();
        assert!(callees.contains("Server.start"));
        assert!(callees.contains("Database.query"));
        assert!(!callees.contains("main"));
    }

    #[test]
    fn path_segment_is_the_cone_intersection() {
        let graph = service_graph();
        let on_path = path_segment(&graph, "main", "Database.query").unwrap();
        let expected: BTreeSet<String> =
            ["main", "Server.start", "Database.query"].iter().map(ToString::to_string).collect();
        assert_eq!(on_path, expected);
    }

    #[test]
    fn unconnected_functions_report_no_path() {
        let graph = service_graph();
        let err = path_segment(&graph, "idle", "Database.query").unwrap_err();
        assert!(matches!(err, GraphError::NoPath { .. }));
    }

    #[test]
    fn unknown_function_reports_not_found() {
        let graph = service_graph();
        let err = callers_to(&graph, "does_not_exist").unwrap_err();
        assert!(matches!(err, GraphError::NotFound(_)));
    }

    #[test]
    fn pattern_tolerates_pointer_prefix_and_double_colon() {
        let graph = service_graph();
        assert_eq!(match_nodes(&graph, "*Server.start").len(), 1);
        assert_eq!(match_nodes(&graph, "Server::start").len(), 1);
        assert_eq!(match_nodes(&graph, "start").len(), 1);
    }

    #[test]
    fn synthetic_helpers_connect_but_stay_hidden() {
        let graph = build_from_sources(&[(
            PathBuf::from("lib.rs"),
            r"
            fn top() {
                fn helper() { bottom(); }
                helper();
            }
            fn bottom() {}
            "
            .to_string(),
        )])
        .unwrap();

        let callers = callers_to(&graph, "bottom").unwrap();
        let expected: BTreeSet<String> =
            ["top", "bottom"].iter().map(ToString::to_string).collect();
        assert_eq!(callers, expected);
    }
}
