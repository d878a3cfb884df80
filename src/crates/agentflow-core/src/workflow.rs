//! The immutable, validated workflow description.
//!
//! A [`Workflow`] is produced by the
//! [`WorkflowBuilder`](crate::builder::WorkflowBuilder) and is a static,
//! id-indexed description: executor factories by id, edges grouped by source
//! id, the port registry, and the type registry. It contains no pointer
//! graphs and no per-run state, so any number of runs may execute against
//! one `Workflow` concurrently.

use crate::edge::Edge;
use crate::error::{Result, WorkflowError};
use crate::executor::{Executor, ExecutorFactory, ExecutorId};
use crate::message::{TypeRegistry, TypeTag};
use crate::ports::InputPort;
use std::collections::HashMap;
use std::sync::Mutex;

/// A validated workflow graph, ready to run.
pub struct Workflow {
    pub(crate) executors: HashMap<ExecutorId, ExecutorFactory>,
    pub(crate) edges: Vec<Edge>,
    pub(crate) edges_by_source: HashMap<ExecutorId, Vec<usize>>,
    pub(crate) start_id: ExecutorId,
    pub(crate) input_tag: TypeTag,
    pub(crate) ports: HashMap<String, InputPort>,
    pub(crate) registry: TypeRegistry,
    pub(crate) concurrent_runs: bool,
    /// Instances of executors marked shareable, reused across runs.
    pub(crate) shared_instances: Mutex<HashMap<ExecutorId, Executor>>,
}

impl Workflow {
    /// Id of the executor the input is delivered to.
    pub fn start_id(&self) -> &str {
        &self.start_id
    }

    /// Type tag of the workflow's input.
    pub fn input_tag(&self) -> &str {
        &self.input_tag
    }

    /// Every edge in the graph.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Indices into [`edges`](Self::edges) of edges leaving `source`.
    pub fn edges_from(&self, source: &str) -> &[usize] {
        self.edges_by_source
            .get(source)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Registered executor ids, unordered.
    pub fn executor_ids(&self) -> Vec<&str> {
        self.executors.keys().map(String::as_str).collect()
    }

    /// The port registered under an id, if any.
    pub fn port(&self, id: &str) -> Option<&InputPort> {
        self.ports.get(id)
    }

    /// Every registered input port.
    pub fn ports(&self) -> impl Iterator<Item = &InputPort> {
        self.ports.values()
    }

    /// The subtype registry handlers are matched against.
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Whether executors should expect concurrent runs.
    pub fn concurrent_runs_enabled(&self) -> bool {
        self.concurrent_runs
    }

    /// Instantiate the executor registered under `id`.
    ///
    /// Non-shareable executors get a fresh instance per call (one per run);
    /// shareable executors are created once and shared.
    pub(crate) fn instantiate(&self, id: &str) -> Result<Executor> {
        {
            let cache = self
                .shared_instances
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(executor) = cache.get(id) {
                return Ok(executor.clone());
            }
        }

        let factory = self.executors.get(id).ok_or_else(|| {
            WorkflowError::Validation(format!("no executor registered under id '{id}'"))
        })?;
        let executor = factory();
        if executor.id() != id {
            return Err(WorkflowError::Validation(format!(
                "factory for '{id}' produced an executor with id '{}'",
                executor.id()
            )));
        }
        if executor.is_shareable() {
            self.shared_instances
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .insert(id.to_string(), executor.clone());
        }
        Ok(executor)
    }
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("start_id", &self.start_id)
            .field("input_tag", &self.input_tag)
            .field("executors", &self.executors.keys().collect::<Vec<_>>())
            .field("edges", &self.edges)
            .field("ports", &self.ports.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
