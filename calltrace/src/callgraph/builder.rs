//! Two-pass call graph construction from parsed sources.
//!
//! Pass one registers every function and method as a node. Pass two walks
//! each body and resolves call expressions against the node table:
//!
//! - path calls resolve by name, narrowed by the qualifying segment when
//!   one is present;
//! - method calls resolve to every method with that name, on any type;
//! - calls through function values resolve to every free function with a
//!   matching arity.

use std::fs;
use std::path::{Path, PathBuf};

use cargo_metadata::MetadataCommand;
use log::{debug, warn};
use syn::visit::Visit;

use crate::callgraph::{CallGraph, FunctionId, FunctionNode};
use crate::domain::GraphError;

/// Builds the call graph for the crate or workspace rooted at
/// `manifest_dir` (the directory containing `Cargo.toml`).
pub fn build_call_graph(manifest_dir: &Path) -> Result<CallGraph, GraphError> {
    let metadata = MetadataCommand::new()
        .manifest_path(manifest_dir.join("Cargo.toml"))
        .no_deps()
        .exec()
        .map_err(|e| GraphError::Load(e.to_string()))?;

    let mut dirs: Vec<PathBuf> = Vec::new();
    for package in metadata.workspace_packages() {
        for target in &package.targets {
            if let Some(dir) = target.src_path.as_std_path().parent() {
                let dir = dir.to_path_buf();
                if !dirs.contains(&dir) {
                    dirs.push(dir);
                }
            }
        }
    }

    let mut files: Vec<PathBuf> = Vec::new();
    for dir in &dirs {
        collect_rs_files(dir, &mut files)?;
    }
    files.sort();
    files.dedup();

    let mut sources = Vec::with_capacity(files.len());
    for file in files {
        let text = fs::read_to_string(&file)
            .map_err(|e| GraphError::Load(format!("{}: {e}", file.display())))?;
        sources.push((file, text));
    }

    let graph = build_from_sources(&sources)?;
    if graph.is_empty() {
        return Err(GraphError::EmptyGraph(manifest_dir.to_path_buf()));
    }
    debug!("call graph: {} functions", graph.len());
    Ok(graph)
}

/// Builds a graph from already-loaded `(path, source)` pairs. Files that
/// fail to parse are skipped with a warning so one broken file does not
/// block analysis of the rest.
pub fn build_from_sources(sources: &[(PathBuf, String)]) -> Result<CallGraph, GraphError> {
    let mut collected: Vec<Collected> = Vec::new();
    let mut parse_failures: Vec<String> = Vec::new();
    for (path, text) in sources {
        match syn::parse_file(text) {
            Ok(ast) => {
                let mut module = vec![module_name_for(path)];
                collect_items(&ast.items, &mut module, path, &mut collected);
            }
            Err(e) => {
                warn!("skipping unparseable file {}: {e}", path.display());
                parse_failures.push(format!("{}: {e}", path.display()));
            }
        }
    }
    // Partial parse failure degrades to a smaller graph; losing every file
    // means the module itself does not build.
    if collected.is_empty() && !parse_failures.is_empty() {
        return Err(GraphError::Load(parse_failures.swap_remove(0)));
    }

    let mut graph = CallGraph::new();
    let mut bodies: Vec<(FunctionId, syn::Block)> = Vec::with_capacity(collected.len());
    for item in collected {
        let id = graph.add_node(item.node);
        bodies.push((id, item.body));
    }

    for (caller, body) in &bodies {
        let mut visitor = EdgeCollector::default();
        visitor.visit_block(body);
        for site in visitor.sites {
            for callee in resolve_call_site(&graph, &site) {
                graph.add_edge(*caller, callee);
            }
        }
    }
    Ok(graph)
}

fn collect_rs_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), GraphError> {
    let entries =
        fs::read_dir(dir).map_err(|e| GraphError::Load(format!("{}: {e}", dir.display())))?;
    for entry in entries {
        let entry = entry.map_err(|e| GraphError::Load(e.to_string()))?;
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if path.is_dir() {
            if name == "target" || name.starts_with('.') {
                continue;
            }
            collect_rs_files(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            out.push(path);
        }
    }
    Ok(())
}

fn module_name_for(path: &Path) -> String {
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned());
    match stem.as_deref() {
        // mod.rs and the crate roots take their containing directory's name.
        Some("mod" | "lib" | "main") | None => path
            .parent()
            .and_then(Path::file_name)
            .map_or_else(|| "crate".to_string(), |d| d.to_string_lossy().into_owned()),
        Some(stem) => stem.to_string(),
    }
}

struct Collected {
    node: FunctionNode,
    body: syn::Block,
}

fn collect_items(items: &[syn::Item], module: &mut Vec<String>, file: &Path, out: &mut Vec<Collected>) {
    for item in items {
        match item {
            syn::Item::Fn(f) => {
                collect_fn(&f.sig, &f.block, None, module, file, out);
            }
            syn::Item::Impl(imp) => {
                let self_ty = type_name(&imp.self_ty);
                for member in &imp.items {
                    if let syn::ImplItem::Fn(m) = member {
                        collect_fn(&m.sig, &m.block, self_ty.clone(), module, file, out);
                    }
                }
            }
            syn::Item::Trait(tr) => {
                let self_ty = Some(tr.ident.to_string());
                for member in &tr.items {
                    if let syn::TraitItem::Fn(m) = member {
                        if let Some(body) = &m.default {
                            collect_fn(&m.sig, body, self_ty.clone(), module, file, out);
                        }
                    }
                }
            }
            syn::Item::Mod(m) => {
                if let Some((_, items)) = &m.content {
                    module.push(m.ident.to_string());
                    collect_items(items, module, file, out);
                    module.pop();
                }
            }
            _ => {}
        }
    }
}

fn collect_fn(
    sig: &syn::Signature,
    body: &syn::Block,
    self_ty: Option<String>,
    module: &[String],
    file: &Path,
    out: &mut Vec<Collected>,
) {
    let name = sig.ident.to_string();
    let module_path = module.join("::");
    let identity = match &self_ty {
        Some(ty) => format!("{module_path}::{ty}::{name}"),
        None => format!("{module_path}::{name}"),
    };
    out.push(Collected {
        node: FunctionNode {
            identity: identity.clone(),
            name: name.clone(),
            self_ty,
            module: module_path,
            arity: sig.inputs.len(),
            // Double-underscore names are generated glue; keep them out of
            // query results like nested helpers.
            synthetic: name.starts_with("__"),
            file: file.to_path_buf(),
        },
        body: body.clone(),
    });

    let mut nested = NestedFnCollector { outer_identity: identity, module: module.to_vec(), file, out };
    nested.visit_block(body);
}

/// Registers function items declared inside other function bodies as
/// synthetic nodes.
struct NestedFnCollector<'a> {
    outer_identity: String,
    module: Vec<String>,
    file: &'a Path,
    out: &'a mut Vec<Collected>,
}

impl<'ast> Visit<'ast> for NestedFnCollector<'_> {
    fn visit_item_fn(&mut self, f: &'ast syn::ItemFn) {
        let name = f.sig.ident.to_string();
        self.out.push(Collected {
            node: FunctionNode {
                identity: format!("{}::{name}", self.outer_identity),
                name,
                self_ty: None,
                module: self.module.join("::"),
                arity: f.sig.inputs.len(),
                synthetic: true,
                file: self.file.to_path_buf(),
            },
            body: (*f.block).clone(),
        });
        // Doubly-nested functions are collected relative to their own
        // parent by the recursive visit below.
        syn::visit::visit_item_fn(self, f);
    }
}

/// One call expression found in a body, before resolution.
enum CallSite {
    Direct { path: Vec<String>, arity: usize },
    Method { name: String },
    Value { arity: usize },
}

#[derive(Default)]
struct EdgeCollector {
    sites: Vec<CallSite>,
}

impl<'ast> Visit<'ast> for EdgeCollector {
    fn visit_expr_call(&mut self, call: &'ast syn::ExprCall) {
        match &*call.func {
            syn::Expr::Path(p) => {
                let path: Vec<String> =
                    p.path.segments.iter().map(|s| s.ident.to_string()).collect();
                self.sites.push(CallSite::Direct { path, arity: call.args.len() });
            }
            _ => self.sites.push(CallSite::Value { arity: call.args.len() }),
        }
        syn::visit::visit_expr_call(self, call);
    }

    fn visit_expr_method_call(&mut self, call: &'ast syn::ExprMethodCall) {
        self.sites.push(CallSite::Method { name: call.method.to_string() });
        syn::visit::visit_expr_method_call(self, call);
    }

    // Nested function items own their call sites; see NestedFnCollector.
    fn visit_item_fn(&mut self, _: &'ast syn::ItemFn) {}
}

fn resolve_call_site(graph: &CallGraph, site: &CallSite) -> Vec<FunctionId> {
    match site {
        CallSite::Direct { path, arity } => {
            let Some(name) = path.last() else { return Vec::new() };
            let candidates = graph.ids_named(name);
            // A bare lowercase identifier that names no known function is a
            // call through a function value (local binding, parameter), so
            // it falls back to arity matching.
            if candidates.is_empty() {
                if path.len() == 1 && name.chars().next().is_some_and(char::is_lowercase) {
                    return resolve_call_site(graph, &CallSite::Value { arity: *arity });
                }
                return Vec::new();
            }
            let qualifier = path
                .iter()
                .rev()
                .nth(1)
                .filter(|q| !matches!(q.as_str(), "crate" | "self" | "super" | "Self"));
            if let Some(qual) = qualifier {
                let narrowed: Vec<FunctionId> = candidates
                    .iter()
                    .copied()
                    .filter(|&id| {
                        let node = graph.node(id);
                        node.self_ty.as_deref() == Some(qual)
                            || node.module.split("::").last() == Some(qual)
                    })
                    .collect();
                if !narrowed.is_empty() {
                    return narrowed;
                }
            }
            candidates.to_vec()
        }
        CallSite::Method { name } => graph
            .ids_named(name)
            .iter()
            .copied()
            .filter(|&id| graph.node(id).self_ty.is_some())
            .collect(),
        CallSite::Value { arity } => graph
            .ids()
            .filter(|&id| {
                let node = graph.node(id);
                node.self_ty.is_none() && !node.synthetic && node.arity == *arity
            })
            .collect(),
    }
}

fn type_name(ty: &syn::Type) -> Option<String> {
    match ty {
        syn::Type::Path(p) => p.path.segments.last().map(|s| s.ident.to_string()),
        syn::Type::Reference(r) => type_name(&r.elem),
        _ => None,
    }
}
