//! Static call graph over a Rust source tree.
//!
//! The graph is a deliberate over-approximation: method calls resolve by
//! name across every type, and calls through function values resolve by
//! arity. A spurious edge costs a few extra instrumented functions; a
//! missing edge silently drops calls from the trace, so ties break toward
//! inclusion.

pub mod builder;
pub mod query;

pub use builder::{build_call_graph, build_from_sources};
pub use query::{callees_from, callers_to, path_segment};

use std::collections::HashMap;
use std::path::PathBuf;

/// Index of a function in the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub(crate) usize);

/// One analyzed function or method.
#[derive(Debug, Clone)]
pub struct FunctionNode {
    /// Unique key: module path, receiver type if any, and name.
    pub identity: String,
    /// Bare function or method name.
    pub name: String,
    /// Receiver type for inherent/trait methods.
    pub self_ty: Option<String>,
    /// Module path the item was declared in, `::`-joined.
    pub module: String,
    /// Parameter count, including any receiver.
    pub arity: usize,
    /// Function bodies nested inside other functions. Traversed during
    /// reachability but kept out of query results.
    pub synthetic: bool,
    pub file: PathBuf,
}

impl FunctionNode {
    /// Name as shown in query results: `Type.method` for methods, the bare
    /// name for free functions.
    #[must_use]
    pub fn display_name(&self) -> String {
        match &self.self_ty {
            Some(ty) => format!("{ty}.{}", self.name),
            None => self.name.clone(),
        }
    }
}

/// Arena-backed directed call graph with forward and reverse adjacency.
#[derive(Debug, Default)]
pub struct CallGraph {
    nodes: Vec<FunctionNode>,
    by_identity: HashMap<String, FunctionId>,
    by_name: HashMap<String, Vec<FunctionId>>,
    callees: Vec<Vec<FunctionId>>,
    callers: Vec<Vec<FunctionId>>,
}

impl CallGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a node, or returns the existing id when the identity was
    /// already present.
    pub fn add_node(&mut self, node: FunctionNode) -> FunctionId {
        if let Some(&id) = self.by_identity.get(&node.identity) {
            return id;
        }
        let id = FunctionId(self.nodes.len());
        self.by_identity.insert(node.identity.clone(), id);
        self.by_name.entry(node.name.clone()).or_default().push(id);
        self.nodes.push(node);
        self.callees.push(Vec::new());
        self.callers.push(Vec::new());
        id
    }

    /// Adds a caller → callee edge; duplicates and self-loops collapse.
    pub fn add_edge(&mut self, from: FunctionId, to: FunctionId) {
        if from == to || self.callees[from.0].contains(&to) {
            return;
        }
        self.callees[from.0].push(to);
        self.callers[to.0].push(from);
    }

    #[must_use]
    pub fn node(&self, id: FunctionId) -> &FunctionNode {
        &self.nodes[id.0]
    }

    #[must_use]
    pub fn callees(&self, id: FunctionId) -> &[FunctionId] {
        &self.callees[id.0]
    }

    #[must_use]
    pub fn callers(&self, id: FunctionId) -> &[FunctionId] {
        &self.callers[id.0]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = FunctionId> + '_ {
        (0..self.nodes.len()).map(FunctionId)
    }

    #[must_use]
    pub fn ids_named(&self, name: &str) -> &[FunctionId] {
        self.by_name.get(name).map_or(&[], Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str) -> FunctionNode {
        FunctionNode {
            identity: format!("test::{name}"),
            name: name.to_string(),
            self_ty: None,
            module: "test".to_string(),
            arity: 0,
            synthetic: false,
            file: PathBuf::from("lib.rs"),
        }
    }

    #[test]
    fn duplicate_identity_reuses_node() {
        let mut graph = CallGraph::new();
        let a = graph.add_node(node("f"));
        let b = graph.add_node(node("f"));
        assert_eq!(a, b);
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn edges_dedup_and_drop_self_loops() {
        let mut graph = CallGraph::new();
        let a = graph.add_node(node("a"));
        let b = graph.add_node(node("b"));
        graph.add_edge(a, b);
        graph.add_edge(a, b);
        graph.add_edge(a, a);
        assert_eq!(graph.callees(a), &[b]);
        assert_eq!(graph.callers(b), &[a]);
        assert!(graph.callees(b).is_empty());
    }

    #[test]
    fn display_name_uses_receiver_type() {
        let mut method = node("query");
        method.self_ty = Some("Database".to_string());
        assert_eq!(method.display_name(), "Database.query");
        assert_eq!(node("main").display_name(), "main");
    }
}
