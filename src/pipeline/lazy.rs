//! Deferred Call Graph
//!
//! Builds a graph of not-yet-executed calls whose arguments may reference
//! earlier deferred calls. The builder is explicit: callers thread a
//! [`TaskGraph`] through [`with_task_graph`] instead of relying on an
//! ambient "current graph" slot, so two builders never interfere.
//!
//! Evaluation is memoised; each node runs at most once per graph.

use crate::value::Value;
use std::sync::Arc;

/// Handle to a deferred call inside one [`TaskGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Lazy(usize);

/// An argument of a deferred call.
#[derive(Clone)]
pub enum LazyArg {
    /// An immediate value.
    Literal(Value),
    /// The result of an earlier deferred call in the same graph.
    Node(Lazy),
}

impl From<Value> for LazyArg {
    fn from(value: Value) -> Self {
        LazyArg::Literal(value)
    }
}

impl From<Lazy> for LazyArg {
    fn from(node: Lazy) -> Self {
        LazyArg::Node(node)
    }
}

type LazyBody = Arc<dyn Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync>;

struct LazyNode {
    name: String,
    body: LazyBody,
    args: Vec<LazyArg>,
    result: Option<Value>,
}

/// An explicit builder for deferred call graphs.
#[derive(Default)]
pub struct TaskGraph {
    nodes: Vec<LazyNode>,
}

impl TaskGraph {
    pub fn new() -> Self {
        TaskGraph { nodes: Vec::new() }
    }

    /// Record a deferred call and return its handle. Dependency edges are
    /// implied by [`LazyArg::Node`] arguments.
    pub fn add_call<F>(&mut self, name: &str, args: Vec<LazyArg>, body: F) -> Lazy
    where
        F: Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let id = self.nodes.len();
        self.nodes.push(LazyNode {
            name: name.to_string(),
            body: Arc::new(body),
            args,
            result: None,
        });
        Lazy(id)
    }

    /// Handles of the calls `node` depends on.
    pub fn dependencies(&self, node: Lazy) -> Vec<Lazy> {
        self.nodes[node.0]
            .args
            .iter()
            .filter_map(|arg| match arg {
                LazyArg::Node(dep) => Some(*dep),
                LazyArg::Literal(_) => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Evaluate a node, running its transitive dependencies first. Results
    /// are memoised, so shared dependencies execute once.
    pub fn evaluate(&mut self, target: Lazy) -> anyhow::Result<Value> {
        if let Some(result) = &self.nodes[target.0].result {
            return Ok(result.clone());
        }

        let args = self.nodes[target.0].args.clone();
        let mut resolved = Vec::with_capacity(args.len());
        for arg in args {
            match arg {
                LazyArg::Literal(value) => resolved.push(value),
                LazyArg::Node(dep) => resolved.push(self.evaluate(dep)?),
            }
        }

        let node = &self.nodes[target.0];
        let body = Arc::clone(&node.body);
        let name = node.name.clone();
        let result = body(&resolved)
            .map_err(|e| e.context(format!("deferred call `{name}` failed")))?;
        self.nodes[target.0].result = Some(result.clone());
        Ok(result)
    }
}

/// Run `build` against a fresh graph and return both the graph and the
/// builder's result (typically the handle of the final call).
pub fn with_task_graph<R>(build: impl FnOnce(&mut TaskGraph) -> R) -> (TaskGraph, R) {
    let mut graph = TaskGraph::new();
    let result = build(&mut graph);
    (graph, result)
}
