//! Sequential re-evaluation of dynamic controls.
//!
//! The scheduler owns the mutable state of every control in a session and is
//! the only place that changes it. It runs on a dedicated thread and works
//! through a FIFO of [`RefreshRequest`]s, one control at a time:
//!
//! 1. A value change records the new value and stamps every affected control
//!    with a fresh generation number, then queues a request carrying that
//!    generation.
//! 2. Before a control is refreshed, its stamp is compared with the request's
//!    generation. A newer request has taken the control over when they differ,
//!    so the item is abandoned.
//! 3. While an evaluation runs, the scheduler keeps ingesting events. Once the
//!    result arrives the stamp is checked again, and a stale result is
//!    discarded instead of being applied.
//!
//! Because requests run strictly one after another and each follows the
//! topological order of the graph, a control is never evaluated with a value
//! its own dependencies are about to replace. When a refresh fails, the
//! controls reading it are skipped for the rest of the request and keep their
//! previous choices; unrelated branches still refresh.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, never, select};
use tracing::{debug, info, info_span, warn};

use crate::blueprint::Wizard;
use crate::core::{Arguments, ArcStr, ControlDescriptor};
use crate::engine::diagnostics::{Diagnostics, RefreshOutcome};
use crate::engine::invoke::{Evaluation, Invocation, Invoker};
use crate::engine::progress::Watchdog;
use crate::engine::{ChangeCause, ControlSnapshot, Snapshot, Update};
use crate::error::{ErrorKind, InvocationError};
use crate::settings::Settings;

/// Lifecycle of a [`RefreshRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Pending,
    InProgress,
    /// Every control was refreshed successfully.
    Completed,
    /// At least one control failed; the others were still refreshed.
    Failed,
    /// At least one control was taken over by a newer request.
    Superseded,
}

/// One cascade of refreshes triggered by a single value change.
#[derive(Debug, Clone)]
pub struct RefreshRequest {
    origin: Option<ArcStr>,
    value: Option<String>,
    generation: u64,
    pending: VecDeque<ArcStr>,
    state: RequestState,
}

impl RefreshRequest {
    fn new(
        origin: Option<ArcStr>,
        value: Option<String>,
        generation: u64,
        pending: Vec<ArcStr>,
    ) -> Self {
        Self {
            origin,
            value,
            generation,
            pending: pending.into(),
            state: RequestState::Pending,
        }
    }

    /// The control whose change started the cascade, `None` for the initial
    /// population of a session.
    pub fn origin(&self) -> Option<&ArcStr> {
        self.origin.as_ref()
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn pending(&self) -> impl Iterator<Item = &ArcStr> {
        self.pending.iter()
    }

    pub fn state(&self) -> RequestState {
        self.state
    }
}

/// Messages sent from a [`SessionHandle`](crate::SessionHandle).
pub(crate) enum Event {
    ValueChanged {
        control: ArcStr,
        value: Option<String>,
    },
    Snapshot(Sender<Snapshot>),
    Diagnostics(Sender<Diagnostics>),
    WaitIdle(Sender<()>),
    Shutdown,
}

#[derive(Debug)]
struct ControlState {
    value: Option<String>,
    choices: Vec<String>,
    stamp: u64,
}

enum Step {
    Applied,
    Failed,
    Discarded,
}

pub(crate) struct Scheduler {
    wizard: Wizard,
    invoker: Invoker,
    controls: HashMap<ArcStr, ControlState>,
    queue: VecDeque<RefreshRequest>,
    generation: u64,
    watchdog: Watchdog,
    diagnostics: Diagnostics,
    events: Receiver<Event>,
    updates: Sender<Update>,
    idle: Vec<Sender<()>>,
    closed: bool,
}

impl Scheduler {
    pub(crate) fn new(
        wizard: Wizard,
        settings: Settings,
        events: Receiver<Event>,
        updates: Sender<Update>,
    ) -> Self {
        let controls = wizard
            .controls()
            .iter()
            .map(|control| {
                let state = ControlState {
                    value: control.default.clone(),
                    choices: control.choices.clone(),
                    stamp: 0,
                };
                (control.name().clone(), state)
            })
            .collect();

        let mut scheduler = Self {
            invoker: Invoker::new(settings),
            watchdog: Watchdog::new(settings.progress_threshold),
            wizard,
            controls,
            queue: VecDeque::new(),
            generation: 0,
            diagnostics: Diagnostics::default(),
            events,
            updates,
            idle: Vec::new(),
            closed: false,
        };

        let initial = scheduler.wizard.graph().topological();
        if !initial.is_empty() {
            scheduler.enqueue(None, None, initial);
        }

        scheduler
    }

    pub(crate) fn run(mut self) {
        let span = info_span!("session", controls = self.controls.len());
        let _enter = span.enter();

        loop {
            if let Some(request) = self.queue.pop_front() {
                self.process(request);
                continue;
            }

            self.go_idle();

            if self.closed {
                break;
            }

            match self.events.recv() {
                Ok(event) => self.ingest(event),
                Err(_) => self.disconnect(),
            }
        }

        debug!("scheduler stopped");
    }

    fn ingest(&mut self, event: Event) {
        match event {
            Event::ValueChanged { control, value } => self.value_changed(control, value),
            Event::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Event::Diagnostics(reply) => {
                let _ = reply.send(self.diagnostics.clone());
            }
            Event::WaitIdle(reply) => self.idle.push(reply),
            Event::Shutdown => {
                debug!(queued = self.queue.len(), "shutdown requested");
                self.closed = true;
                self.queue.clear();
            }
        }
    }

    fn disconnect(&mut self) {
        self.events = never();
        self.closed = true;
    }

    fn value_changed(&mut self, control: ArcStr, value: Option<String>) {
        if self.closed {
            return;
        }

        let Some(state) = self.controls.get_mut(&control) else {
            return;
        };

        state.value = value.clone();

        let affected = self.wizard.graph().affected_by(&control);
        if !affected.is_empty() {
            self.enqueue(Some(control), value, affected);
        }
    }

    fn enqueue(&mut self, origin: Option<ArcStr>, value: Option<String>, affected: Vec<ArcStr>) {
        self.generation += 1;

        for name in &affected {
            if let Some(state) = self.controls.get_mut(name) {
                state.stamp = self.generation;
            }
        }

        debug!(
            origin = origin.as_deref().unwrap_or("<initial>"),
            generation = self.generation,
            affected = affected.len(),
            "queued refresh"
        );

        self.queue
            .push_back(RefreshRequest::new(origin, value, self.generation, affected));
    }

    fn is_current(&self, name: &str, generation: u64) -> bool {
        self.controls
            .get(name)
            .is_some_and(|state| state.stamp == generation)
    }

    fn process(&mut self, mut request: RefreshRequest) {
        let origin = request.origin.as_deref().unwrap_or("<initial>").to_string();
        let span = info_span!("refresh", origin = %origin, generation = request.generation);
        let _enter = span.enter();

        request.state = RequestState::InProgress;
        let started = Instant::now();
        let mut failed = 0;
        let mut abandoned = 0;
        // Pending controls reading a failed one, with the control that failed.
        let mut blocked: HashMap<ArcStr, ArcStr> = HashMap::new();

        while let Some(name) = request.pending.pop_front() {
            if !self.is_current(&name, request.generation) {
                debug!(control = %name, "superseded by a newer change");
                abandoned += 1;
                continue;
            }

            if let Some(upstream) = blocked.get(&name) {
                self.skip(&name, upstream);
                failed += 1;
                continue;
            }

            match self.refresh(&name, request.generation) {
                Step::Applied => {}
                Step::Failed => {
                    failed += 1;
                    for dependent in self.wizard.graph().affected_by(&name) {
                        blocked.entry(dependent).or_insert_with(|| name.clone());
                    }
                }
                Step::Discarded => abandoned += 1,
            }

            if self.closed && !request.pending.is_empty() {
                debug!(dropped = request.pending.len(), "session closing");
                abandoned += request.pending.len();
                request.pending.clear();
            }
        }

        request.state = if abandoned > 0 {
            RequestState::Superseded
        } else if failed > 0 {
            RequestState::Failed
        } else {
            RequestState::Completed
        };

        info!(
            state = ?request.state,
            failed,
            abandoned,
            "refresh settled in {:.2?}",
            started.elapsed()
        );

        self.emit(Update::Settled {
            origin: request.origin,
            generation: request.generation,
            state: request.state,
        });
    }

    fn refresh(&mut self, name: &ArcStr, generation: u64) -> Step {
        let wizard = self.wizard.clone();
        let Some(control) = wizard.control(name) else {
            return Step::Discarded;
        };

        let span = info_span!("control", name = %name);
        let _enter = span.enter();

        let values = self.dependency_values(control);
        let started = Instant::now();

        let result = match self.invoker.start(control, &values) {
            Ok(invocation) => self.await_invocation(invocation),
            Err(err) => Err(err),
        };

        self.watchdog.disarm();
        let elapsed = started.elapsed();

        if !self.is_current(name, generation) {
            debug!("result discarded, a newer change took over");
            self.diagnostics
                .record(name, elapsed, RefreshOutcome::Discarded);
            return Step::Discarded;
        }

        match result {
            Ok(evaluation) => {
                self.apply(control, evaluation);
                self.diagnostics.record(name, elapsed, RefreshOutcome::Applied);
                Step::Applied
            }
            Err(error) => {
                warn!(kind = ?error.kind, "{error}");
                self.diagnostics.record(name, elapsed, RefreshOutcome::Failed);
                self.emit(Update::Failed {
                    control: name.clone(),
                    error,
                });
                Step::Failed
            }
        }
    }

    /// Reports a control that was not refreshed because `upstream` failed.
    /// Its value and choices are left alone.
    fn skip(&mut self, name: &ArcStr, upstream: &ArcStr) {
        let wizard = self.wizard.clone();
        let Some(control) = wizard.control(name) else {
            return;
        };

        let error = InvocationError::new(
            name.clone(),
            ErrorKind::UpstreamFailed,
            format!("Not refreshed because '{upstream}' failed"),
            self.dependency_values(control),
            Duration::ZERO,
        );

        warn!(control = %name, upstream = %upstream, "refresh skipped");
        self.emit(Update::Failed {
            control: name.clone(),
            error,
        });
    }

    /// Waits for the running evaluation while still answering events.
    fn await_invocation(&mut self, invocation: Invocation) -> Result<Evaluation, InvocationError> {
        self.watchdog.arm(Instant::now());

        let results = invocation.receiver().clone();

        loop {
            let now = Instant::now();
            let deadline = invocation.deadline();

            if now >= deadline {
                return Err(invocation.timed_out());
            }

            let wake = self
                .watchdog
                .due()
                .map_or(deadline, |due| due.min(deadline));

            let events = self.events.clone();

            select! {
                recv(results) -> message => return invocation.complete(message),
                recv(events) -> event => match event {
                    Ok(event) => self.ingest(event),
                    Err(_) => self.disconnect(),
                },
                default(wake.saturating_duration_since(now)) => {
                    if let Some(signal) = self.watchdog.poll(Instant::now()) {
                        self.emit(Update::Progress(signal));
                    }
                }
            }
        }
    }

    fn apply(&mut self, control: &ControlDescriptor, evaluation: Evaluation) {
        let name = control.name();

        if let Some(truncated) = evaluation.truncated {
            warn!(
                produced = truncated.produced,
                limit = truncated.limit,
                "choice list truncated"
            );
        }

        let Some(state) = self.controls.get_mut(name) else {
            return;
        };

        state.choices = evaluation.choices;

        let valid = state
            .value
            .as_ref()
            .is_some_and(|value| state.choices.contains(value));

        let mut change = None;
        if !valid {
            let replacement = if control.select_first {
                state.choices.first().cloned()
            } else {
                None
            };

            if state.value != replacement {
                let cause = if replacement.is_some() {
                    ChangeCause::AutoSelected
                } else {
                    ChangeCause::Cleared
                };

                state.value = replacement.clone();
                change = Some((replacement, cause));
            }
        }

        let choices = state.choices.clone();
        info!(choices = choices.len(), "choices refreshed");

        self.emit(Update::Choices {
            control: name.clone(),
            choices,
            truncated: evaluation.truncated,
        });

        if let Some((value, cause)) = change {
            debug!(?cause, "value no longer valid");
            self.emit(Update::ValueChanged {
                control: name.clone(),
                value,
                cause,
            });
        }
    }

    fn dependency_values(&self, control: &ControlDescriptor) -> Arguments {
        control
            .dependencies()
            .iter()
            .filter_map(|dependency| {
                let value = self.controls.get(dependency)?.value.as_deref()?;
                Some((dependency.as_ref(), value))
            })
            .collect()
    }

    fn snapshot(&self) -> Snapshot {
        let controls = self
            .wizard
            .controls()
            .iter()
            .filter_map(|control| {
                let state = self.controls.get(control.name())?;
                Some(ControlSnapshot {
                    name: control.name().clone(),
                    value: state.value.clone(),
                    choices: state.choices.clone(),
                })
            })
            .collect();

        Snapshot { controls }
    }

    fn go_idle(&mut self) {
        if let Some(signal) = self.watchdog.settle() {
            self.emit(Update::Progress(signal));
        }

        for reply in self.idle.drain(..) {
            let _ = reply.send(());
        }
    }

    fn emit(&self, update: Update) {
        // The UI may have stopped listening; the session keeps running.
        let _ = self.updates.send(update);
    }
}
