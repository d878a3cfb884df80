//! The message dispatcher - a single-threaded event loop per run.
//!
//! The dispatcher advances a FIFO queue of `(target, message)` pairs. A
//! *superstep* drains every message enqueued at its start; messages sent by
//! handlers during the superstep join the next one. The run is quiescent
//! when the queue is empty; it then either completes or, with external
//! requests outstanding, pauses until the caller supplies responses.
//!
//! # Guarantees
//!
//! - A run never invokes two handlers concurrently; handlers may `await`
//!   freely.
//! - Messages emitted by one handler are delivered in `send_message` call
//!   order.
//! - Events reflect true handler completion order (FIFO).
//! - Cancellation is observed between messages; a cancelled run never starts
//!   another handler.
//! - A failed handler's queued state writes and outbox are discarded.
//!
//! # Safe points
//!
//! Checkpoints are taken only between handler completions: automatically at
//! each superstep boundary while a store is bound, and on request at the
//! next safe point.

use crate::cancellation::CancellationToken;
use crate::context::WorkflowContext;
use crate::error::{Result, WorkflowError};
use crate::events::{RunStatus, WorkflowEvent};
use crate::executor::{Executor, ExecutorId};
use crate::message::{bundle_messages, WorkflowMessage, ANY_TAG};
use crate::ports::ExternalRequest;
use crate::state::RunState;
use crate::workflow::Workflow;
use agentflow_checkpoint::{
    CheckpointInfo, CheckpointStore, FanInBufferSnapshot, PendingRequestSnapshot, QueuedMessage,
    RunCheckpoint,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Latest-per-source arrival buffer for one fan-in edge.
#[derive(Debug, Default)]
struct FanInBuffer {
    sources: Vec<ExecutorId>,
    pending: HashMap<ExecutorId, WorkflowMessage>,
}

impl FanInBuffer {
    fn is_complete(&self) -> bool {
        self.sources.iter().all(|s| self.pending.contains_key(s))
    }

    /// Drain the round in declared source order.
    fn drain_round(&mut self) -> Vec<WorkflowMessage> {
        let entries = self
            .sources
            .iter()
            .filter_map(|s| self.pending.remove(s))
            .collect();
        self.pending.clear();
        entries
    }
}

/// Per-run dispatcher state. Driven by the run controllers.
pub(crate) struct Dispatcher {
    workflow: Arc<Workflow>,
    run_id: String,
    instances: HashMap<ExecutorId, Executor>,
    state: Arc<Mutex<RunState>>,
    queue: VecDeque<(ExecutorId, WorkflowMessage)>,
    fan_in: HashMap<String, FanInBuffer>,
    pending_requests: HashMap<String, ExternalRequest>,
    cancellation: CancellationToken,
    store: Option<Arc<dyn CheckpointStore>>,
    checkpoint_requested: bool,
    superstep: u64,
    remaining_in_superstep: usize,
    event_cursor: u64,
    status: RunStatus,
    result: Option<Value>,
    /// Executors whose restore hook must run when first instantiated.
    restored_hooks_pending: HashSet<ExecutorId>,
}

impl Dispatcher {
    pub(crate) fn new(workflow: Arc<Workflow>, store: Option<Arc<dyn CheckpointStore>>) -> Self {
        Self {
            workflow,
            run_id: Uuid::new_v4().to_string(),
            instances: HashMap::new(),
            state: Arc::new(Mutex::new(RunState::new())),
            queue: VecDeque::new(),
            fan_in: HashMap::new(),
            pending_requests: HashMap::new(),
            cancellation: CancellationToken::new(),
            store,
            checkpoint_requested: false,
            superstep: 0,
            remaining_in_superstep: 0,
            event_cursor: 0,
            status: RunStatus::Idle,
            result: None,
            restored_hooks_pending: HashSet::new(),
        }
    }

    /// Rebuild a dispatcher from a checkpoint. The restored run inherits the
    /// checkpoint's run id and continues mid-superstep.
    pub(crate) fn restore(
        workflow: Arc<Workflow>,
        checkpoint: RunCheckpoint,
        store: Option<Arc<dyn CheckpointStore>>,
    ) -> Result<Self> {
        let mut fan_in = HashMap::new();
        for buffer in checkpoint.fan_in_buffers {
            let sources = workflow
                .edges()
                .iter()
                .find(|e| e.id() == buffer.edge_id)
                .map(|e| e.source_ids().iter().map(|s| s.to_string()).collect())
                .ok_or_else(|| {
                    WorkflowError::Checkpoint(agentflow_checkpoint::CheckpointError::Integrity(
                        format!("checkpoint references unknown edge '{}'", buffer.edge_id),
                    ))
                })?;
            let pending = buffer
                .pending
                .into_iter()
                .map(|(source, snapshot)| (source, snapshot.into()))
                .collect();
            fan_in.insert(buffer.edge_id, FanInBuffer { sources, pending });
        }

        let queue: VecDeque<(ExecutorId, WorkflowMessage)> = checkpoint
            .queue
            .into_iter()
            .map(|q| (q.target, q.message.into()))
            .collect();
        let pending_requests = checkpoint
            .pending_requests
            .into_iter()
            .map(|r| {
                (
                    r.request_id.clone(),
                    ExternalRequest {
                        port_id: r.port_id,
                        request_id: r.request_id,
                        type_tag: r.type_tag,
                        payload: r.payload,
                    },
                )
            })
            .collect();

        let restored_hooks_pending = workflow
            .executor_ids()
            .into_iter()
            .map(|s| s.to_string())
            .collect();
        let remaining = queue.len();

        info!(run_id = %checkpoint.run_id, superstep = checkpoint.superstep, "restoring run from checkpoint");
        Ok(Self {
            workflow,
            run_id: checkpoint.run_id,
            instances: HashMap::new(),
            state: Arc::new(Mutex::new(RunState::restore(checkpoint.scopes))),
            queue,
            fan_in,
            pending_requests,
            cancellation: CancellationToken::new(),
            store,
            checkpoint_requested: false,
            superstep: checkpoint.superstep,
            remaining_in_superstep: remaining,
            event_cursor: checkpoint.event_cursor,
            status: RunStatus::Running,
            result: None,
            restored_hooks_pending,
        })
    }

    pub(crate) fn run_id(&self) -> &str {
        &self.run_id
    }

    pub(crate) fn status(&self) -> RunStatus {
        self.status
    }

    pub(crate) fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub(crate) fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub(crate) fn pending_requests(&self) -> Vec<ExternalRequest> {
        let mut requests: Vec<ExternalRequest> = self.pending_requests.values().cloned().collect();
        requests.sort_by(|a, b| a.request_id.cmp(&b.request_id));
        requests
    }

    pub(crate) fn has_store(&self) -> bool {
        self.store.is_some()
    }

    /// Request a checkpoint at the next safe point.
    pub(crate) fn request_checkpoint(&mut self) {
        self.checkpoint_requested = true;
    }

    /// Seed the run: enqueue the input to the start executor.
    pub(crate) fn seed(&mut self, input: Value) -> Result<Vec<WorkflowEvent>> {
        if self.status != RunStatus::Idle {
            return Err(WorkflowError::InvalidInput(
                "run has already been seeded".into(),
            ));
        }
        let message = WorkflowMessage::new(self.workflow.input_tag().to_string(), input.clone());
        self.queue
            .push_back((self.workflow.start_id().to_string(), message));
        self.remaining_in_superstep = 1;
        self.superstep = 1;
        self.status = RunStatus::Running;
        info!(run_id = %self.run_id, start = %self.workflow.start_id(), "workflow run started");

        let mut events = Vec::new();
        self.record(
            &mut events,
            WorkflowEvent::WorkflowStarted {
                run_id: self.run_id.clone(),
                data: Some(input),
            },
        );
        Ok(events)
    }

    /// Advance by one dispatch step.
    ///
    /// Returns the events the step produced, or `None` when the run can make
    /// no further progress (terminal, or paused on external responses).
    pub(crate) async fn step(&mut self) -> Option<Vec<WorkflowEvent>> {
        match self.status {
            RunStatus::Running => {}
            RunStatus::PendingResponses => {
                if self.cancellation.is_cancelled() {
                    let mut events = Vec::new();
                    self.finish(RunStatus::Cancelled, &mut events);
                    return Some(events);
                }
                return None;
            }
            _ => return None,
        }

        let mut events = Vec::new();

        // Cancellation is checked between messages.
        if self.cancellation.is_cancelled() {
            self.finish(RunStatus::Cancelled, &mut events);
            return Some(events);
        }

        // Superstep boundary: a safe point for automatic checkpoints.
        if self.remaining_in_superstep == 0 && !self.queue.is_empty() {
            self.superstep += 1;
            self.remaining_in_superstep = self.queue.len();
            debug!(run_id = %self.run_id, superstep = self.superstep, pending = self.queue.len(), "superstep boundary");
            if self.store.is_some() {
                if let Err(err) = self.checkpoint_into(&mut events).await {
                    self.record(
                        &mut events,
                        WorkflowEvent::WorkflowError {
                            error: err.to_string(),
                        },
                    );
                    self.finish(RunStatus::Failed, &mut events);
                    return Some(events);
                }
            }
        }

        let Some((target, message)) = self.queue.pop_front() else {
            // Quiescent.
            if !self.pending_requests.is_empty() {
                self.status = RunStatus::PendingResponses;
                debug!(run_id = %self.run_id, outstanding = self.pending_requests.len(), "run paused on external requests");
                return None;
            }
            self.finish(RunStatus::Completed, &mut events);
            return Some(events);
        };
        self.remaining_in_superstep = self.remaining_in_superstep.saturating_sub(1);

        // Input ports intercept delivery: the message becomes an external
        // request instead of a handler invocation.
        if let Some(port) = self.workflow.port(&target).cloned() {
            if !self
                .workflow
                .registry()
                .is_assignable(&message.type_tag, &port.request_tag)
            {
                let err = WorkflowError::routing(&port.id, &message.type_tag);
                self.record(
                    &mut events,
                    WorkflowEvent::ExecutorFailed {
                        executor_id: port.id.clone(),
                        error: err.to_string(),
                    },
                );
                self.finish(RunStatus::Failed, &mut events);
                return Some(events);
            }
            let request = ExternalRequest {
                port_id: port.id.clone(),
                request_id: Uuid::new_v4().to_string(),
                type_tag: message.type_tag.clone(),
                payload: message.payload.clone(),
            };
            debug!(run_id = %self.run_id, port = %port.id, request_id = %request.request_id, "external request emitted");
            self.pending_requests
                .insert(request.request_id.clone(), request.clone());
            self.record(&mut events, WorkflowEvent::RequestInfo { request });
            return Some(events);
        }

        self.deliver(target, message, &mut events).await;
        Some(events)
    }

    /// Deliver one message to an executor and process the handler outcome.
    async fn deliver(
        &mut self,
        target: ExecutorId,
        message: WorkflowMessage,
        events: &mut Vec<WorkflowEvent>,
    ) {
        let executor = match self.instance(&target).await {
            Ok(executor) => executor,
            Err(err) => {
                self.record(
                    events,
                    WorkflowEvent::WorkflowError {
                        error: err.to_string(),
                    },
                );
                self.finish(RunStatus::Failed, events);
                return;
            }
        };

        let Some(registration) = executor.select_handler(&message.type_tag, self.workflow.registry())
        else {
            let err = WorkflowError::routing(&target, &message.type_tag);
            warn!(run_id = %self.run_id, executor = %target, type_tag = %message.type_tag, "routing error");
            self.record(
                events,
                WorkflowEvent::ExecutorFailed {
                    executor_id: target.clone(),
                    error: err.to_string(),
                },
            );
            self.finish(RunStatus::Failed, events);
            return;
        };
        let handler = registration.handler.clone();
        let output_tag = registration.output_tag.clone();

        self.record(
            events,
            WorkflowEvent::ExecutorInvoked {
                executor_id: target.clone(),
                data: Some(message.payload.clone()),
            },
        );

        let ctx = WorkflowContext::new(
            &target,
            &self.run_id,
            Arc::clone(&self.state),
            self.workflow.concurrent_runs_enabled(),
            self.cancellation.clone(),
        );
        let result = handler(message, ctx.clone()).await;
        let outcome = ctx.finish();

        match (result, outcome) {
            (Ok(output), Ok(outcome)) => {
                // Queued writes apply atomically at handler return.
                {
                    let mut state = self
                        .state
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    for (scope, key, value) in outcome.queued_writes {
                        state.write(scope, key, value);
                    }
                }
                for event in outcome.events {
                    if let WorkflowEvent::WorkflowCompleted { result } = &event {
                        self.result = Some(result.clone());
                    }
                    self.record(events, event);
                }
                for outgoing in outcome.outbox {
                    if let Err(err) = self.route_from(&target, outgoing) {
                        self.record(
                            events,
                            WorkflowEvent::WorkflowError {
                                error: err.to_string(),
                            },
                        );
                        self.finish(RunStatus::Failed, events);
                        return;
                    }
                }
                if let Some(value) = output {
                    let tag = output_tag.unwrap_or_else(|| ANY_TAG.to_string());
                    let outgoing = WorkflowMessage::new(tag, value).with_source(target.clone());
                    if let Err(err) = self.route_from(&target, outgoing) {
                        self.record(
                            events,
                            WorkflowEvent::WorkflowError {
                                error: err.to_string(),
                            },
                        );
                        self.finish(RunStatus::Failed, events);
                        return;
                    }
                }
                self.record(
                    events,
                    WorkflowEvent::ExecutorCompleted {
                        executor_id: target,
                    },
                );

                // Caller-requested checkpoints take effect at this safe point.
                if self.checkpoint_requested && self.store.is_some() {
                    self.checkpoint_requested = false;
                    if let Err(err) = self.checkpoint_into(events).await {
                        self.record(
                            events,
                            WorkflowEvent::WorkflowError {
                                error: err.to_string(),
                            },
                        );
                        self.finish(RunStatus::Failed, events);
                    }
                }
            }
            (Err(err), _) => {
                // Queued writes and outbox are discarded with the context.
                if err.is_cancellation() || self.cancellation.is_cancelled() {
                    self.finish(RunStatus::Cancelled, events);
                } else {
                    warn!(run_id = %self.run_id, executor = %target, error = %err, "executor failed");
                    self.record(
                        events,
                        WorkflowEvent::ExecutorFailed {
                            executor_id: target,
                            error: err.to_string(),
                        },
                    );
                    self.finish(RunStatus::Failed, events);
                }
            }
            (Ok(_), Err(err)) => {
                self.record(
                    events,
                    WorkflowEvent::WorkflowError {
                        error: err.to_string(),
                    },
                );
                self.finish(RunStatus::Failed, events);
            }
        }
    }

    /// Route a message from `source` through every matching outgoing edge.
    fn route_from(&mut self, source: &str, message: WorkflowMessage) -> Result<()> {
        let workflow = Arc::clone(&self.workflow);
        for &idx in workflow.edges_from(source) {
            let edge = &workflow.edges()[idx];
            match edge {
                crate::edge::Edge::Direct {
                    target, condition, ..
                } => {
                    let pass = condition.as_ref().map_or(true, |p| p(&message));
                    if pass {
                        self.queue.push_back((target.clone(), message.clone()));
                    }
                }
                crate::edge::Edge::FanOut {
                    targets,
                    partitioner,
                    ..
                } => {
                    let selected: Vec<usize> = match partitioner {
                        None => (0..targets.len()).collect(),
                        Some(partition) => {
                            let mut indices = partition(&message, targets.len());
                            indices.sort_unstable();
                            indices.dedup();
                            if let Some(&bad) = indices.iter().find(|&&i| i >= targets.len()) {
                                return Err(WorkflowError::Validation(format!(
                                    "partitioner selected index {bad} out of range for {} targets",
                                    targets.len()
                                )));
                            }
                            indices
                        }
                    };
                    // Declared index order, not partitioner return order.
                    for i in selected {
                        self.queue.push_back((targets[i].clone(), message.clone()));
                    }
                }
                crate::edge::Edge::FanIn { sources, target } => {
                    let buffer = self.fan_in.entry(edge.id()).or_insert_with(|| FanInBuffer {
                        sources: sources.clone(),
                        pending: HashMap::new(),
                    });
                    // Latest-per-source: a second arrival replaces the first.
                    buffer.pending.insert(source.to_string(), message.clone());
                    if buffer.is_complete() {
                        let entries = buffer.drain_round();
                        debug!(run_id = %self.run_id, target = %target, "fan-in gating round complete");
                        self.queue
                            .push_back((target.clone(), bundle_messages(&entries)));
                    }
                }
            }
        }
        Ok(())
    }

    /// Inject a caller response to an outstanding external request.
    ///
    /// Type assignability is enforced here, before any state changes.
    pub(crate) fn inject_response(
        &mut self,
        response: crate::ports::ExternalResponse,
    ) -> Result<Vec<WorkflowEvent>> {
        let known = self
            .pending_requests
            .get(&response.request_id)
            .is_some_and(|req| req.port_id == response.port_id);
        if !known {
            return Err(WorkflowError::UnknownRequest(response.request_id));
        }
        let port = self
            .workflow
            .port(&response.port_id)
            .ok_or_else(|| WorkflowError::UnknownRequest(response.request_id.clone()))?
            .clone();
        if !self
            .workflow
            .registry()
            .is_assignable(&response.type_tag, &port.response_tag)
        {
            return Err(WorkflowError::PortTypeMismatch {
                port_id: port.id,
                expected: port.response_tag,
                actual: response.type_tag,
            });
        }

        self.pending_requests.remove(&response.request_id);
        debug!(run_id = %self.run_id, port = %port.id, request_id = %response.request_id, "external response injected");
        let message =
            WorkflowMessage::new(response.type_tag, response.payload).with_source(port.id.clone());
        self.route_from(&port.id, message)?;
        if self.status == RunStatus::PendingResponses {
            self.status = RunStatus::Running;
        }
        Ok(Vec::new())
    }

    /// Take a checkpoint now. Callers must only invoke this between handler
    /// completions; the run controllers guarantee it.
    pub(crate) async fn checkpoint_explicit(
        &mut self,
    ) -> Result<(CheckpointInfo, Vec<WorkflowEvent>)> {
        if self.store.is_none() {
            return Err(WorkflowError::Validation(
                "no checkpoint store is bound to this run".into(),
            ));
        }
        let mut events = Vec::new();
        let info = self.take_checkpoint().await?;
        self.record(
            &mut events,
            WorkflowEvent::CheckpointCreated { info: info.clone() },
        );
        Ok((info, events))
    }

    async fn checkpoint_into(&mut self, events: &mut Vec<WorkflowEvent>) -> Result<()> {
        let info = self.take_checkpoint().await?;
        self.record(events, WorkflowEvent::CheckpointCreated { info });
        Ok(())
    }

    async fn take_checkpoint(&mut self) -> Result<CheckpointInfo> {
        let store = self
            .store
            .as_ref()
            .cloned()
            .ok_or_else(|| WorkflowError::Validation("no checkpoint store bound".into()))?;

        // Give instantiated executors a chance to persist extra private
        // state before the snapshot.
        let state = Arc::clone(&self.state);
        for (id, executor) in &self.instances {
            let Some(hook) = executor.checkpointing_hook().cloned() else {
                continue;
            };
            let ctx = WorkflowContext::new(
                id,
                &self.run_id,
                Arc::clone(&state),
                self.workflow.concurrent_runs_enabled(),
                self.cancellation.clone(),
            );
            hook(ctx.clone()).await?;
            let outcome = ctx.finish()?;
            let mut guard = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            for (scope, key, value) in outcome.queued_writes {
                guard.write(scope, key, value);
            }
        }

        let scopes = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .snapshot();
        let mut checkpoint = RunCheckpoint::new(self.run_id.clone());
        checkpoint.queue = self
            .queue
            .iter()
            .map(|(target, message)| QueuedMessage {
                target: target.clone(),
                message: message.clone().into(),
            })
            .collect();
        checkpoint.scopes = scopes;
        checkpoint.fan_in_buffers = self
            .fan_in
            .iter()
            .filter(|(_, buffer)| !buffer.pending.is_empty())
            .map(|(edge_id, buffer)| FanInBufferSnapshot {
                edge_id: edge_id.clone(),
                pending: buffer
                    .sources
                    .iter()
                    .filter_map(|s| {
                        buffer
                            .pending
                            .get(s)
                            .map(|m| (s.clone(), m.clone().into()))
                    })
                    .collect(),
            })
            .collect();
        checkpoint.pending_requests = self
            .pending_requests
            .values()
            .map(|r| PendingRequestSnapshot {
                port_id: r.port_id.clone(),
                request_id: r.request_id.clone(),
                type_tag: r.type_tag.clone(),
                payload: r.payload.clone(),
            })
            .collect();
        checkpoint.superstep = self.superstep;
        checkpoint.event_cursor = self.event_cursor;

        debug!(run_id = %self.run_id, checkpoint_id = %checkpoint.checkpoint_id, "committing checkpoint");
        let info = store.commit(checkpoint).await?;
        Ok(info)
    }

    /// Get or lazily create the run's instance of an executor. In resumed
    /// runs the restore hook fires on first instantiation.
    async fn instance(&mut self, id: &str) -> Result<Executor> {
        if !self.instances.contains_key(id) {
            let executor = self.workflow.instantiate(id)?;
            let run_restore_hook = self.restored_hooks_pending.remove(id);
            if run_restore_hook {
                if let Some(hook) = executor.restored_hook().cloned() {
                    let ctx = WorkflowContext::new(
                        id,
                        &self.run_id,
                        Arc::clone(&self.state),
                        self.workflow.concurrent_runs_enabled(),
                        self.cancellation.clone(),
                    );
                    hook(ctx.clone()).await?;
                    let outcome = ctx.finish()?;
                    let mut guard = self
                        .state
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    for (scope, key, value) in outcome.queued_writes {
                        guard.write(scope, key, value);
                    }
                }
            }
            self.instances.insert(id.to_string(), executor);
        }
        self.instances
            .get(id)
            .cloned()
            .ok_or_else(|| WorkflowError::Validation(format!("executor '{id}' vanished")))
    }

    /// Record a run-level error event without failing the run.
    pub(crate) fn record_run_error(&mut self, err: WorkflowError) -> Vec<WorkflowEvent> {
        let mut events = Vec::new();
        self.record(
            &mut events,
            WorkflowEvent::WorkflowError {
                error: err.to_string(),
            },
        );
        events
    }

    fn finish(&mut self, status: RunStatus, events: &mut Vec<WorkflowEvent>) {
        self.status = status;
        info!(run_id = %self.run_id, ?status, "run ended");
        self.record(events, WorkflowEvent::RunEnded { status });
    }

    fn record(&mut self, events: &mut Vec<WorkflowEvent>, event: WorkflowEvent) {
        self.event_cursor += 1;
        events.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::WorkflowBuilder;
    use crate::executor::Executor;
    use crate::state::ScopeId;
    use serde_json::json;

    async fn drain(dispatcher: &mut Dispatcher) -> Vec<WorkflowEvent> {
        let mut events = Vec::new();
        while let Some(batch) = dispatcher.step().await {
            events.extend(batch);
        }
        events
    }

    #[tokio::test]
    async fn writes_apply_on_success_and_discard_on_failure() {
        let ok = Executor::new("ok").handler("go", |_msg, ctx| {
            Box::pin(async move {
                ctx.queue_state_update("applied", json!(true), Some("board"))?;
                ctx.send_message(WorkflowMessage::new("go", json!(1)))?;
                Ok(None)
            })
        });
        let bad = Executor::new("bad").handler("go", |_msg, ctx| {
            Box::pin(async move {
                ctx.queue_state_update("poison", json!(true), Some("board"))?;
                Err(WorkflowError::Custom("boom".into()))
            })
        });
        let workflow = Arc::new(
            WorkflowBuilder::new("ok")
                .add_executor(ok)
                .add_executor(bad)
                .add_edge("ok", "bad")
                .build()
                .unwrap(),
        );

        let mut dispatcher = Dispatcher::new(workflow, None);
        dispatcher.seed(json!(0)).unwrap();
        let events = drain(&mut dispatcher).await;

        assert_eq!(dispatcher.status(), RunStatus::Failed);
        assert!(events
            .iter()
            .any(|e| matches!(e, WorkflowEvent::ExecutorFailed { executor_id, .. } if executor_id == "bad")));

        let state = dispatcher
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        assert_eq!(
            state.read(&ScopeId::shared("board"), "applied"),
            Some(json!(true))
        );
        assert_eq!(state.read(&ScopeId::shared("board"), "poison"), None);
    }

    #[tokio::test]
    async fn fan_in_buffers_latest_per_source() {
        let sink = Executor::new("t").handler(crate::message::FAN_IN_BUNDLE_TAG, |_m, _c| {
            Box::pin(async { Ok(None) })
        });
        let noop = |id: &str| {
            Executor::new(id).handler("n", |_m, _c| Box::pin(async { Ok(None) }))
        };
        let workflow = Arc::new(
            WorkflowBuilder::new("s1")
                .add_executor(noop("s1"))
                .add_executor(noop("s2"))
                .add_executor(noop("s3"))
                .add_executor(sink)
                .add_fan_in(vec!["s1".into(), "s2".into(), "s3".into()], "t")
                .build()
                .unwrap(),
        );

        let mut dispatcher = Dispatcher::new(workflow, None);
        dispatcher
            .route_from("s1", WorkflowMessage::new("n", json!(1)))
            .unwrap();
        dispatcher
            .route_from("s1", WorkflowMessage::new("n", json!(2)))
            .unwrap();
        dispatcher
            .route_from("s2", WorkflowMessage::new("n", json!(5)))
            .unwrap();
        assert!(dispatcher.queue.is_empty(), "gating round incomplete");

        dispatcher
            .route_from("s3", WorkflowMessage::new("n", json!(9)))
            .unwrap();
        assert_eq!(dispatcher.queue.len(), 1);

        let (target, bundle) = dispatcher.queue.pop_front().unwrap();
        assert_eq!(target, "t");
        let entries = crate::message::unbundle_messages(&bundle).unwrap();
        let payloads: Vec<_> = entries.iter().map(|m| m.payload.clone()).collect();
        assert_eq!(payloads, vec![json!(2), json!(5), json!(9)]);

        // Buffer cleared: the next round gates again.
        dispatcher
            .route_from("s1", WorkflowMessage::new("n", json!(7)))
            .unwrap();
        assert!(dispatcher.queue.is_empty());
    }

    #[tokio::test]
    async fn fan_out_partitioner_selects_declared_order() {
        let noop = |id: &str| {
            Executor::new(id).handler("n", |_m, _c| Box::pin(async { Ok(None) }))
        };
        let workflow = Arc::new(
            WorkflowBuilder::new("s")
                .add_executor(noop("s"))
                .add_executor(noop("a"))
                .add_executor(noop("b"))
                .add_executor(noop("c"))
                .add_fan_out_with(
                    "s",
                    vec!["a".into(), "b".into(), "c".into()],
                    // Deliberately reversed; delivery must follow index order.
                    |_msg, _n| vec![2, 0],
                )
                .build()
                .unwrap(),
        );

        let mut dispatcher = Dispatcher::new(workflow, None);
        dispatcher
            .route_from("s", WorkflowMessage::new("n", json!(1)))
            .unwrap();
        let targets: Vec<_> = dispatcher.queue.iter().map(|(t, _)| t.clone()).collect();
        assert_eq!(targets, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn partitioner_out_of_range_is_an_error() {
        let noop = |id: &str| {
            Executor::new(id).handler("n", |_m, _c| Box::pin(async { Ok(None) }))
        };
        let workflow = Arc::new(
            WorkflowBuilder::new("s")
                .add_executor(noop("s"))
                .add_executor(noop("a"))
                .add_fan_out_with("s", vec!["a".into()], |_msg, _n| vec![3])
                .build()
                .unwrap(),
        );

        let mut dispatcher = Dispatcher::new(workflow, None);
        let err = dispatcher
            .route_from("s", WorkflowMessage::new("n", json!(1)))
            .unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[tokio::test]
    async fn routing_error_fails_the_run() {
        let start = Executor::new("start").handler("go", |_msg, ctx| {
            Box::pin(async move {
                ctx.send_message(WorkflowMessage::new("mystery", json!(null)))?;
                Ok(None)
            })
        });
        let strict = Executor::new("strict").handler("go", |_m, _c| Box::pin(async { Ok(None) }));
        let workflow = Arc::new(
            WorkflowBuilder::new("start")
                .add_executor(start)
                .add_executor(strict)
                .add_edge("start", "strict")
                .build()
                .unwrap(),
        );

        let mut dispatcher = Dispatcher::new(workflow, None);
        dispatcher.seed(json!(0)).unwrap();
        let events = drain(&mut dispatcher).await;

        assert_eq!(dispatcher.status(), RunStatus::Failed);
        let failed = events.iter().find_map(|e| match e {
            WorkflowEvent::ExecutorFailed { executor_id, error } => {
                Some((executor_id.clone(), error.clone()))
            }
            _ => None,
        });
        let (executor_id, error) = failed.expect("an ExecutorFailed event");
        assert_eq!(executor_id, "strict");
        assert!(error.contains("mystery"));
    }

    #[tokio::test]
    async fn cancellation_between_messages_ends_the_run() {
        let looper = Executor::new("looper").handler("go", |msg, ctx| {
            Box::pin(async move {
                ctx.send_message(msg)?;
                Ok(None)
            })
        });
        let workflow = Arc::new(
            WorkflowBuilder::new("looper")
                .add_executor(looper)
                .add_edge("looper", "looper")
                .build()
                .unwrap(),
        );

        let mut dispatcher = Dispatcher::new(workflow, None);
        dispatcher.seed(json!(0)).unwrap();
        for _ in 0..3 {
            dispatcher.step().await;
        }
        dispatcher.cancellation_token().cancel();

        let events = dispatcher.step().await.expect("cancellation step");
        assert_eq!(dispatcher.status(), RunStatus::Cancelled);
        assert!(events
            .iter()
            .any(|e| matches!(e, WorkflowEvent::RunEnded { status: RunStatus::Cancelled })));
        assert!(dispatcher.step().await.is_none());
    }
}
