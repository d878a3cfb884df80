//! Run controllers: streaming and snapshot execution of a workflow.
//!
//! Two controllers drive the dispatcher:
//!
//! - [`StreamingRun`] - a pull-based stream of [`WorkflowEvent`]s. The
//!   stream closes when the dispatcher quiesces. A detachable [`RunHandle`]
//!   supports `cancel()`, `checkpoint_now()`, and `send_response()` while
//!   the stream is being consumed.
//! - [`Run`] - drives the dispatcher to quiescence, buffers the events, and
//!   exposes them as a snapshot. If the workflow emits external requests the
//!   run pauses; the caller supplies responses via
//!   [`resume`](Run::resume).
//!
//! Both support checkpointing when a
//! [`CheckpointStore`](agentflow_checkpoint::CheckpointStore) is bound, and
//! both can be reconstructed from a committed checkpoint with
//! [`resume_run`] / [`resume_stream`]: the restored run inherits the
//! checkpoint's run id and never re-emits events the caller already
//! observed.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use agentflow_core::run::{run, stream};
//! use futures::StreamExt;
//!
//! // Snapshot execution:
//! let finished = run(workflow.clone(), serde_json::json!("hello")).await?;
//! println!("status: {:?}", finished.status());
//!
//! // Streaming execution:
//! let mut streaming = stream(workflow, serde_json::json!("hello")).await?;
//! while let Some(event) = streaming.next().await {
//!     println!("{event:?}");
//! }
//! ```

use crate::dispatcher::Dispatcher;
use crate::error::{Result, WorkflowError};
use crate::events::{RunStatus, WorkflowEvent};
use crate::ports::{ExternalRequest, ExternalResponse};
use crate::workflow::Workflow;
use agentflow_checkpoint::{CheckpointInfo, CheckpointStore};
use futures::Stream;
use serde_json::Value;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::Notify;

/// Execute a workflow to quiescence and return the buffered run.
pub async fn run(workflow: Arc<Workflow>, input: Value) -> Result<Run> {
    Run::start(workflow, input, None, false).await
}

/// Execute with a checkpoint store bound; a checkpoint is taken right after
/// seeding and at every superstep boundary.
pub async fn run_with_checkpointing(
    workflow: Arc<Workflow>,
    input: Value,
    store: Arc<dyn CheckpointStore>,
) -> Result<Run> {
    Run::start(workflow, input, Some(store), true).await
}

/// Restore a run from a checkpoint and drive it to quiescence.
///
/// Events already observed before the checkpoint are not re-emitted.
pub async fn resume_run(
    workflow: Arc<Workflow>,
    info: &CheckpointInfo,
    store: Arc<dyn CheckpointStore>,
) -> Result<Run> {
    let checkpoint = store.lookup(info).await?;
    let dispatcher = Dispatcher::restore(workflow, checkpoint, Some(store))?;
    let mut run = Run {
        dispatcher,
        events: Vec::new(),
    };
    run.drive().await;
    Ok(run)
}

/// Execute a workflow as a pull-based event stream.
pub async fn stream(workflow: Arc<Workflow>, input: Value) -> Result<StreamingRun> {
    StreamingRun::start(workflow, input, None, false).await
}

/// Stream with a checkpoint store bound; a checkpoint is taken right after
/// seeding and at every superstep boundary.
pub async fn stream_with_checkpointing(
    workflow: Arc<Workflow>,
    input: Value,
    store: Arc<dyn CheckpointStore>,
) -> Result<StreamingRun> {
    StreamingRun::start(workflow, input, Some(store), true).await
}

/// Restore a run from a checkpoint and stream the remaining events.
pub async fn resume_stream(
    workflow: Arc<Workflow>,
    info: &CheckpointInfo,
    store: Arc<dyn CheckpointStore>,
) -> Result<StreamingRun> {
    let checkpoint = store.lookup(info).await?;
    let dispatcher = Dispatcher::restore(Arc::clone(&workflow), checkpoint, Some(store))?;
    Ok(StreamingRun::from_dispatcher(
        workflow,
        dispatcher,
        Vec::new(),
    ))
}

/// A non-streaming run: events buffered, driven to quiescence or pause.
pub struct Run {
    dispatcher: Dispatcher,
    events: Vec<WorkflowEvent>,
}

impl Run {
    async fn start(
        workflow: Arc<Workflow>,
        input: Value,
        store: Option<Arc<dyn CheckpointStore>>,
        checkpoint_after_seed: bool,
    ) -> Result<Self> {
        let mut dispatcher = Dispatcher::new(workflow, store);
        let events = dispatcher.seed(input)?;
        let mut run = Self { dispatcher, events };
        if checkpoint_after_seed {
            let (_, events) = run.dispatcher.checkpoint_explicit().await?;
            run.events.extend(events);
        }
        run.drive().await;
        Ok(run)
    }

    async fn drive(&mut self) {
        while let Some(events) = self.dispatcher.step().await {
            self.events.extend(events);
        }
    }

    /// The run id events and checkpoints are tagged with.
    pub fn run_id(&self) -> &str {
        self.dispatcher.run_id()
    }

    /// Current status: terminal, or `PendingResponses` when paused.
    pub fn status(&self) -> RunStatus {
        self.dispatcher.status()
    }

    /// Every event observed so far, in emission order.
    pub fn events(&self) -> &[WorkflowEvent] {
        &self.events
    }

    /// The result published by a `WorkflowCompleted` event, if any.
    pub fn result(&self) -> Option<&Value> {
        self.dispatcher.result()
    }

    /// External requests currently awaiting responses.
    pub fn pending_requests(&self) -> Vec<ExternalRequest> {
        self.dispatcher.pending_requests()
    }

    /// Answer outstanding external requests and continue to the next
    /// quiescence or pause. Returns the newly produced events.
    ///
    /// # Errors
    ///
    /// Each response is validated at enqueue: an unknown request id or a
    /// payload not assignable to the port's declared response type fails
    /// before any state changes.
    pub async fn resume(&mut self, responses: Vec<ExternalResponse>) -> Result<&[WorkflowEvent]> {
        let start = self.events.len();
        for response in responses {
            let events = self.dispatcher.inject_response(response)?;
            self.events.extend(events);
        }
        self.drive().await;
        Ok(&self.events[start..])
    }

    /// Fire the run's cancellation token. Takes effect before the next
    /// handler invocation.
    pub fn cancel(&self) {
        self.dispatcher.cancellation_token().cancel();
    }

    /// Take a checkpoint now. The run is between handler completions
    /// whenever the caller holds it, so this is always a safe point.
    pub async fn checkpoint_now(&mut self) -> Result<CheckpointInfo> {
        let (info, events) = self.dispatcher.checkpoint_explicit().await?;
        self.events.extend(events);
        Ok(info)
    }
}

impl std::fmt::Debug for Run {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Run")
            .field("run_id", &self.run_id())
            .field("status", &self.status())
            .field("events", &self.events.len())
            .finish()
    }
}

/// Control surface detachable from a [`StreamingRun`].
#[derive(Clone)]
pub struct RunHandle {
    run_id: String,
    workflow: Arc<Workflow>,
    cancellation: crate::cancellation::CancellationToken,
    checkpoint_flag: Arc<AtomicBool>,
    responses: Arc<Mutex<Vec<ExternalResponse>>>,
    wake: Arc<Notify>,
}

impl RunHandle {
    /// The run id.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Cancel the run: no new handler invocations start, and the stream
    /// ends with a `RunEnded { status: Cancelled }` event.
    pub fn cancel(&self) {
        self.cancellation.cancel();
        self.wake.notify_one();
    }

    /// Request a checkpoint at the next safe point.
    pub fn checkpoint_now(&self) {
        self.checkpoint_flag.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    /// Enqueue a response to an outstanding external request.
    ///
    /// The payload type is validated against the port's declared response
    /// type here, at enqueue. An unknown request id is reported through a
    /// `WorkflowError` event on the stream.
    pub fn send_response(&self, response: ExternalResponse) -> Result<()> {
        let port = self
            .workflow
            .port(&response.port_id)
            .ok_or_else(|| WorkflowError::UnknownRequest(response.request_id.clone()))?;
        if !self
            .workflow
            .registry()
            .is_assignable(&response.type_tag, &port.response_tag)
        {
            return Err(WorkflowError::PortTypeMismatch {
                port_id: port.id.clone(),
                expected: port.response_tag.clone(),
                actual: response.type_tag,
            });
        }
        self.responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(response);
        self.wake.notify_one();
        Ok(())
    }
}

impl std::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle")
            .field("run_id", &self.run_id)
            .finish_non_exhaustive()
    }
}

/// A streaming run: pull events as they occur.
///
/// Implements [`Stream`]; the stream closes when the run reaches a terminal
/// status.
pub struct StreamingRun {
    handle: RunHandle,
    events: Pin<Box<dyn Stream<Item = WorkflowEvent> + Send>>,
}

impl StreamingRun {
    async fn start(
        workflow: Arc<Workflow>,
        input: Value,
        store: Option<Arc<dyn CheckpointStore>>,
        checkpoint_after_seed: bool,
    ) -> Result<Self> {
        let mut dispatcher = Dispatcher::new(Arc::clone(&workflow), store);
        let mut seed_events = dispatcher.seed(input)?;
        if checkpoint_after_seed {
            let (_, events) = dispatcher.checkpoint_explicit().await?;
            seed_events.extend(events);
        }
        Ok(Self::from_dispatcher(workflow, dispatcher, seed_events))
    }

    fn from_dispatcher(
        workflow: Arc<Workflow>,
        mut dispatcher: Dispatcher,
        seed_events: Vec<WorkflowEvent>,
    ) -> Self {
        let handle = RunHandle {
            run_id: dispatcher.run_id().to_string(),
            workflow,
            cancellation: dispatcher.cancellation_token(),
            checkpoint_flag: Arc::new(AtomicBool::new(false)),
            responses: Arc::new(Mutex::new(Vec::new())),
            wake: Arc::new(Notify::new()),
        };
        let loop_handle = handle.clone();

        let events = async_stream::stream! {
            for event in seed_events {
                yield event;
            }
            loop {
                // Injected responses are drained at a safe point.
                let injected: Vec<ExternalResponse> = loop_handle
                    .responses
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .drain(..)
                    .collect();
                for response in injected {
                    match dispatcher.inject_response(response) {
                        Ok(events) => {
                            for event in events {
                                yield event;
                            }
                        }
                        Err(err) => {
                            for event in dispatcher.record_run_error(err) {
                                yield event;
                            }
                        }
                    }
                }

                // Caller-requested checkpoints are likewise at a safe point.
                if loop_handle.checkpoint_flag.swap(false, Ordering::SeqCst)
                    && dispatcher.has_store()
                {
                    match dispatcher.checkpoint_explicit().await {
                        Ok((_, events)) => {
                            for event in events {
                                yield event;
                            }
                        }
                        Err(err) => {
                            for event in dispatcher.record_run_error(err) {
                                yield event;
                            }
                        }
                    }
                }

                match dispatcher.step().await {
                    Some(events) => {
                        for event in events {
                            yield event;
                        }
                        if dispatcher.status().is_terminal() {
                            break;
                        }
                    }
                    None if dispatcher.status() == RunStatus::PendingResponses => {
                        // Park until a response, cancellation, or checkpoint
                        // request arrives.
                        let notified = loop_handle.wake.notified();
                        let woken = {
                            let pending = loop_handle
                                .responses
                                .lock()
                                .unwrap_or_else(|poisoned| poisoned.into_inner());
                            !pending.is_empty()
                        } || loop_handle.cancellation.is_cancelled()
                            || loop_handle.checkpoint_flag.load(Ordering::SeqCst);
                        if !woken {
                            notified.await;
                        }
                    }
                    None => break,
                }
            }
        };

        Self {
            handle,
            events: Box::pin(events),
        }
    }

    /// The run id.
    pub fn run_id(&self) -> &str {
        self.handle.run_id()
    }

    /// A clonable control handle for this run.
    pub fn handle(&self) -> RunHandle {
        self.handle.clone()
    }

    /// Pull the next event; `None` when the stream has closed.
    pub async fn next(&mut self) -> Option<WorkflowEvent> {
        use futures::StreamExt;
        self.events.next().await
    }

    /// Cancel the run.
    pub fn cancel(&self) {
        self.handle.cancel();
    }

    /// Request a checkpoint at the next safe point.
    pub fn checkpoint_now(&self) {
        self.handle.checkpoint_now();
    }

    /// Enqueue a response to an outstanding external request.
    pub fn send_response(&self, response: ExternalResponse) -> Result<()> {
        self.handle.send_response(response)
    }

    /// Drain the stream, collecting every remaining event.
    pub async fn collect_events(mut self) -> Vec<WorkflowEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }
}

impl Stream for StreamingRun {
    type Item = WorkflowEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for StreamingRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingRun")
            .field("run_id", &self.handle.run_id)
            .finish_non_exhaustive()
    }
}
