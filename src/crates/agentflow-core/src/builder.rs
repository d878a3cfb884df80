//! Workflow construction and build-time validation.
//!
//! [`WorkflowBuilder`] collects executor registrations and edges, then
//! validates the whole graph in [`build()`](WorkflowBuilder::build):
//!
//! - every late-bound executor reference is resolved
//! - every edge endpoint names a registered executor or port
//! - the start executor accepts the declared input type
//! - no duplicate unconditional direct edge per `(source, target)` pair
//! - no executor registers two handlers for one input tag
//!
//! Edges may name executors that have not been added yet; such references
//! are recorded as *unbound* and must be resolved with
//! [`bind`](WorkflowBuilder::bind) (or [`add_executor`](WorkflowBuilder::add_executor))
//! before `build()` succeeds.
//!
//! # Example
//!
//! ```rust
//! use agentflow_core::builder::WorkflowBuilder;
//! use agentflow_core::executor::Executor;
//!
//! let shout = Executor::new("shout").handler_with_output("text", "text", |msg, _ctx| {
//!     Box::pin(async move {
//!         let text = msg.payload.as_str().unwrap_or_default().to_uppercase();
//!         Ok(Some(serde_json::json!(text)))
//!     })
//! });
//! let sink = Executor::new("sink").handler("text", |_msg, _ctx| {
//!     Box::pin(async move { Ok(None) })
//! });
//!
//! let workflow = WorkflowBuilder::new("shout")
//!     .add_executor(shout)
//!     .add_executor(sink)
//!     .add_edge("shout", "sink")
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(workflow.start_id(), "shout");
//! assert_eq!(workflow.input_tag(), "text");
//! ```

use crate::edge::{Edge, EdgePredicate, Partitioner};
use crate::error::{Result, WorkflowError};
use crate::executor::{Executor, ExecutorFactory, ExecutorId};
use crate::message::{TypeRegistry, TypeTag, WorkflowMessage};
use crate::ports::InputPort;
use crate::workflow::Workflow;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// A node reference: either bound to a factory or a dangling id awaiting
/// [`bind`](WorkflowBuilder::bind).
enum Node {
    Unbound(ExecutorId),
    Bound(ExecutorId, ExecutorFactory),
}

impl Node {
    fn id(&self) -> &str {
        match self {
            Self::Unbound(id) | Self::Bound(id, _) => id,
        }
    }
}

/// Builder collecting executors, edges, and ports into a [`Workflow`].
pub struct WorkflowBuilder {
    start_id: ExecutorId,
    nodes: HashMap<ExecutorId, Node>,
    edges: Vec<Edge>,
    ports: HashMap<String, InputPort>,
    registry: TypeRegistry,
    input_tag: Option<TypeTag>,
    concurrent_runs: bool,
}

impl WorkflowBuilder {
    /// Start a workflow whose input is delivered to `start_id`.
    ///
    /// The start executor itself is a late-bound reference until added.
    pub fn new(start_id: impl Into<ExecutorId>) -> Self {
        let start_id = start_id.into();
        let mut builder = Self {
            start_id: start_id.clone(),
            nodes: HashMap::new(),
            edges: Vec::new(),
            ports: HashMap::new(),
            registry: TypeRegistry::new(),
            input_tag: None,
            concurrent_runs: false,
        };
        builder.ensure_node(&start_id);
        builder
    }

    /// Register an executor instance. The instance is cloned per run.
    pub fn add_executor(mut self, executor: Executor) -> Self {
        let id = executor.id().to_string();
        let factory: ExecutorFactory = Arc::new(move || executor.clone());
        self.nodes.insert(id.clone(), Node::Bound(id, factory));
        self
    }

    /// Register a factory producing the executor lazily, once per run.
    pub fn add_executor_factory(
        mut self,
        id: impl Into<ExecutorId>,
        factory: ExecutorFactory,
    ) -> Self {
        let id = id.into();
        self.nodes.insert(id.clone(), Node::Bound(id, factory));
        self
    }

    /// Resolve a late-bound executor reference.
    ///
    /// Identical to [`add_executor`](Self::add_executor); named for the case
    /// where edges referenced the id first.
    pub fn bind(self, executor: Executor) -> Self {
        self.add_executor(executor)
    }

    /// Add an unconditional direct edge.
    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        let (from, to) = (from.into(), to.into());
        self.ensure_node(&from);
        self.ensure_node(&to);
        self.edges.push(Edge::direct(from, to));
        self
    }

    /// Add a direct edge guarded by a predicate over the message.
    pub fn add_conditional_edge<F>(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        predicate: F,
    ) -> Self
    where
        F: Fn(&WorkflowMessage) -> bool + Send + Sync + 'static,
    {
        let (from, to) = (from.into(), to.into());
        self.ensure_node(&from);
        self.ensure_node(&to);
        let predicate: EdgePredicate = Arc::new(predicate);
        self.edges.push(Edge::direct_when(from, to, predicate));
        self
    }

    /// Add a broadcast fan-out edge.
    pub fn add_fan_out(mut self, from: impl Into<String>, targets: Vec<String>) -> Self {
        let from = from.into();
        self.ensure_node(&from);
        for target in &targets {
            self.ensure_node(target);
        }
        self.edges.push(Edge::fan_out(from, targets));
        self
    }

    /// Add a fan-out edge narrowed by a partitioner selecting target indices.
    pub fn add_fan_out_with<F>(
        mut self,
        from: impl Into<String>,
        targets: Vec<String>,
        partitioner: F,
    ) -> Self
    where
        F: Fn(&WorkflowMessage, usize) -> Vec<usize> + Send + Sync + 'static,
    {
        let from = from.into();
        self.ensure_node(&from);
        for target in &targets {
            self.ensure_node(target);
        }
        let partitioner: Partitioner = Arc::new(partitioner);
        self.edges.push(Edge::fan_out_with(from, targets, partitioner));
        self
    }

    /// Add a gated fan-in edge from `sources` to `to`.
    pub fn add_fan_in(mut self, sources: Vec<String>, to: impl Into<String>) -> Self {
        let to = to.into();
        for source in &sources {
            self.ensure_node(source);
        }
        self.ensure_node(&to);
        self.edges.push(Edge::fan_in(sources, to));
        self
    }

    /// Register an external input port. The port's id becomes a node in the
    /// graph; messages delivered to it surface as external requests.
    pub fn add_input_port(mut self, port: InputPort) -> Self {
        self.nodes.remove(&port.id);
        self.ports.insert(port.id.clone(), port);
        self
    }

    /// Declare `subtype` assignable wherever `supertype` is accepted.
    pub fn register_subtype(
        mut self,
        subtype: impl Into<TypeTag>,
        supertype: impl Into<TypeTag>,
    ) -> Self {
        self.registry.register_subtype(subtype, supertype);
        self
    }

    /// Replace the whole type registry.
    pub fn with_type_registry(mut self, registry: TypeRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Declare the workflow's input type. Defaults to the start executor's
    /// first registered input tag.
    pub fn with_input_type(mut self, tag: impl Into<TypeTag>) -> Self {
        self.input_tag = Some(tag.into());
        self
    }

    /// Hint to executors that multiple runs may execute concurrently.
    pub fn with_concurrent_runs(mut self, enabled: bool) -> Self {
        self.concurrent_runs = enabled;
        self
    }

    fn ensure_node(&mut self, id: &str) {
        if !self.nodes.contains_key(id) && !self.ports.contains_key(id) {
            self.nodes
                .insert(id.to_string(), Node::Unbound(id.to_string()));
        }
    }

    /// Validate the graph and produce an immutable [`Workflow`].
    pub fn build(self) -> Result<Workflow> {
        // Unresolved references fail first; everything else assumes bound
        // nodes.
        let mut unbound: Vec<&str> = self
            .nodes
            .values()
            .filter_map(|n| match n {
                Node::Unbound(id) => Some(id.as_str()),
                Node::Bound(..) => None,
            })
            .collect();
        if !unbound.is_empty() {
            unbound.sort_unstable();
            return Err(WorkflowError::Validation(format!(
                "unbound executor reference(s): {}",
                unbound.join(", ")
            )));
        }

        for node in self.nodes.values() {
            if node.id().is_empty() {
                return Err(WorkflowError::Validation(
                    "executor ids must be non-empty".into(),
                ));
            }
        }
        for port in self.ports.values() {
            if port.id.is_empty() {
                return Err(WorkflowError::Validation("port ids must be non-empty".into()));
            }
        }

        self.validate_edges()?;

        // Probe each factory once: the probe checks id consistency and
        // duplicate handler registrations, and doubles as the shared
        // instance for shareable executors.
        let mut probes: HashMap<ExecutorId, Executor> = HashMap::new();
        let mut executors: HashMap<ExecutorId, ExecutorFactory> = HashMap::new();
        for node in self.nodes.values() {
            let Node::Bound(id, factory) = node else {
                continue;
            };
            let probe = factory();
            if probe.id() != id {
                return Err(WorkflowError::Validation(format!(
                    "factory for '{id}' produced an executor with id '{}'",
                    probe.id()
                )));
            }
            if let Some(tag) = probe.duplicate_registration() {
                return Err(WorkflowError::Validation(format!(
                    "executor '{id}' registers more than one handler for type '{tag}'"
                )));
            }
            probes.insert(id.clone(), probe);
            executors.insert(id.clone(), factory.clone());
        }

        // The start node must accept the declared input type. A start port
        // accepts its declared request type instead.
        let input_tag = match &self.input_tag {
            Some(tag) => tag.clone(),
            None => match probes.get(&self.start_id) {
                Some(probe) => probe
                    .input_tags()
                    .first()
                    .map(|t| t.to_string())
                    .ok_or_else(|| {
                        WorkflowError::Validation(format!(
                            "start executor '{}' has no handlers",
                            self.start_id
                        ))
                    })?,
                None => self
                    .ports
                    .get(&self.start_id)
                    .map(|p| p.request_tag.clone())
                    .ok_or_else(|| {
                        WorkflowError::Validation(format!(
                            "start executor '{}' is not registered",
                            self.start_id
                        ))
                    })?,
            },
        };
        if let Some(probe) = probes.get(&self.start_id) {
            if !probe.accepts(&input_tag, &self.registry) {
                return Err(WorkflowError::Validation(format!(
                    "start executor '{}' does not accept the workflow input type '{input_tag}'",
                    self.start_id
                )));
            }
        } else if let Some(port) = self.ports.get(&self.start_id) {
            if !self.registry.is_assignable(&input_tag, &port.request_tag) {
                return Err(WorkflowError::Validation(format!(
                    "start port '{}' does not accept the workflow input type '{input_tag}'",
                    self.start_id
                )));
            }
        } else {
            return Err(WorkflowError::Validation(format!(
                "start executor '{}' is not registered",
                self.start_id
            )));
        }

        let mut edges_by_source: HashMap<ExecutorId, Vec<usize>> = HashMap::new();
        for (idx, edge) in self.edges.iter().enumerate() {
            for source in edge.source_ids() {
                edges_by_source
                    .entry(source.to_string())
                    .or_default()
                    .push(idx);
            }
        }

        // Shareable probes become the shared instances.
        let shared: HashMap<ExecutorId, Executor> = probes
            .into_iter()
            .filter(|(_, e)| e.is_shareable())
            .collect();

        Ok(Workflow {
            executors,
            edges: self.edges,
            edges_by_source,
            start_id: self.start_id,
            input_tag,
            ports: self.ports,
            registry: self.registry,
            concurrent_runs: self.concurrent_runs,
            shared_instances: Mutex::new(shared),
        })
    }

    fn validate_edges(&self) -> Result<()> {
        let registered =
            |id: &str| self.nodes.contains_key(id) || self.ports.contains_key(id);

        let mut unconditional_direct: HashSet<(String, String)> = HashSet::new();
        for edge in &self.edges {
            for endpoint in edge.source_ids().into_iter().chain(edge.target_ids()) {
                if !registered(endpoint) {
                    return Err(WorkflowError::Validation(format!(
                        "edge endpoint '{endpoint}' does not name a registered executor"
                    )));
                }
            }
            match edge {
                Edge::Direct {
                    source,
                    target,
                    condition: None,
                } => {
                    if !unconditional_direct.insert((source.clone(), target.clone())) {
                        return Err(WorkflowError::Validation(format!(
                            "duplicate unconditional edge from '{source}' to '{target}'"
                        )));
                    }
                }
                Edge::Direct { .. } => {}
                Edge::FanOut { source, targets, .. } => {
                    if targets.is_empty() {
                        return Err(WorkflowError::Validation(format!(
                            "fan-out edge from '{source}' has no targets"
                        )));
                    }
                }
                Edge::FanIn { sources, target } => {
                    if sources.is_empty() {
                        return Err(WorkflowError::Validation(format!(
                            "fan-in edge into '{target}' has no sources"
                        )));
                    }
                    let unique: HashSet<&String> = sources.iter().collect();
                    if unique.len() != sources.len() {
                        return Err(WorkflowError::Validation(format!(
                            "fan-in edge into '{target}' declares a source twice"
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sink(id: &str, tag: &str) -> Executor {
        Executor::new(id).handler(tag.to_string(), |_msg, _ctx| Box::pin(async { Ok(None) }))
    }

    #[test]
    fn build_rejects_unbound_references() {
        let err = WorkflowBuilder::new("a")
            .add_executor(sink("a", "text"))
            .add_edge("a", "ghost")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("ghost"), "{err}");
    }

    #[test]
    fn bind_resolves_late_references() {
        let workflow = WorkflowBuilder::new("a")
            .add_executor(sink("a", "text"))
            .add_edge("a", "late")
            .bind(sink("late", "text"))
            .build()
            .unwrap();
        assert!(workflow.executor_ids().contains(&"late"));
    }

    #[test]
    fn build_rejects_duplicate_unconditional_edges() {
        let err = WorkflowBuilder::new("a")
            .add_executor(sink("a", "text"))
            .add_executor(sink("b", "text"))
            .add_edge("a", "b")
            .add_edge("a", "b")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("duplicate unconditional edge"));
    }

    #[test]
    fn conditional_duplicates_are_allowed() {
        let workflow = WorkflowBuilder::new("a")
            .add_executor(sink("a", "text"))
            .add_executor(sink("b", "text"))
            .add_edge("a", "b")
            .add_conditional_edge("a", "b", |msg| msg.payload == json!(1))
            .build();
        assert!(workflow.is_ok());
    }

    #[test]
    fn build_rejects_start_input_mismatch() {
        let err = WorkflowBuilder::new("a")
            .add_executor(sink("a", "text"))
            .with_input_type("number")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("does not accept"));
    }

    #[test]
    fn input_type_defaults_to_first_start_handler() {
        let workflow = WorkflowBuilder::new("a")
            .add_executor(sink("a", "greeting"))
            .build()
            .unwrap();
        assert_eq!(workflow.input_tag(), "greeting");
    }

    #[test]
    fn subtype_input_is_accepted_via_registry() {
        let workflow = WorkflowBuilder::new("a")
            .add_executor(sink("a", "number"))
            .register_subtype("int", "number")
            .with_input_type("int")
            .build();
        assert!(workflow.is_ok());
    }

    #[test]
    fn build_rejects_duplicate_handler_registrations() {
        let bad = Executor::new("a")
            .handler("text", |_m, _c| Box::pin(async { Ok(None) }))
            .handler("text", |_m, _c| Box::pin(async { Ok(None) }));
        let err = WorkflowBuilder::new("a").add_executor(bad).build().unwrap_err();
        assert!(err.to_string().contains("more than one handler"));
    }

    #[test]
    fn build_rejects_duplicate_fan_in_sources() {
        let err = WorkflowBuilder::new("a")
            .add_executor(sink("a", "text"))
            .add_executor(sink("t", "text"))
            .add_fan_in(vec!["a".into(), "a".into()], "t")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("declares a source twice"));
    }
}
