//! A running wizard session.
//!
//! A session is a dedicated scheduler thread that owns the state of every
//! control, plus two channel endpoints for the UI:
//!
//! * [`SessionHandle`] sends value changes and queries to the scheduler. It
//!   is cheap to clone and never blocks on data source evaluations.
//! * [`SessionEvents`] receives [`Update`]s describing what changed.
//!
//! Sessions share nothing with each other, so any number of them may run at
//! the same time, even from the same [`Wizard`].

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded, unbounded};

use crate::blueprint::Wizard;
use crate::core::ArcStr;
use crate::engine::{Diagnostics, Event, Scheduler, Snapshot, Update};
use crate::error::SessionError;
use crate::settings::Settings;

pub(crate) fn start(
    wizard: Wizard,
    settings: Settings,
) -> Result<(SessionHandle, SessionEvents), SessionError> {
    let (event_tx, event_rx) = unbounded();
    let (update_tx, update_rx) = unbounded();

    let scheduler = Scheduler::new(wizard.clone(), settings, event_rx, update_tx);

    std::thread::Builder::new()
        .name("poshwizard-scheduler".to_string())
        .spawn(move || scheduler.run())?;

    Ok((
        SessionHandle {
            wizard,
            events: event_tx,
        },
        SessionEvents { receiver: update_rx },
    ))
}

#[derive(Clone)]
pub struct SessionHandle {
    wizard: Wizard,
    events: Sender<Event>,
}

impl SessionHandle {
    pub fn wizard(&self) -> &Wizard {
        &self.wizard
    }

    /// Records a new value for a control and refreshes everything that
    /// depends on it.
    pub fn set_value(&self, control: &str, value: impl Into<String>) -> Result<(), SessionError> {
        self.change(control, Some(value.into()))
    }

    /// Unsets the value of a control and refreshes everything that depends
    /// on it.
    pub fn clear_value(&self, control: &str) -> Result<(), SessionError> {
        self.change(control, None)
    }

    fn change(&self, control: &str, value: Option<String>) -> Result<(), SessionError> {
        let Some(descriptor) = self.wizard.control(control) else {
            return Err(SessionError::UnknownControl(control.into()));
        };

        let control: ArcStr = descriptor.name().clone();
        self.send(Event::ValueChanged { control, value })
    }

    /// Current values and choices of every control.
    pub fn snapshot(&self) -> Result<Snapshot, SessionError> {
        let (reply, response) = bounded(1);
        self.send(Event::Snapshot(reply))?;
        response.recv().map_err(|_| SessionError::Closed)
    }

    pub fn diagnostics(&self) -> Result<Diagnostics, SessionError> {
        let (reply, response) = bounded(1);
        self.send(Event::Diagnostics(reply))?;
        response.recv().map_err(|_| SessionError::Closed)
    }

    /// Blocks until no refresh is queued or running.
    pub fn wait_idle(&self) -> Result<(), SessionError> {
        let (reply, response) = bounded(1);
        self.send(Event::WaitIdle(reply))?;
        response.recv().map_err(|_| SessionError::Closed)
    }

    /// Like [`wait_idle`](Self::wait_idle), giving up after `timeout`.
    /// Returns whether the session became idle in time.
    pub fn wait_idle_timeout(&self, timeout: Duration) -> Result<bool, SessionError> {
        let (reply, response) = bounded(1);
        self.send(Event::WaitIdle(reply))?;

        match response.recv_timeout(timeout) {
            Ok(()) => Ok(true),
            Err(RecvTimeoutError::Timeout) => Ok(false),
            Err(RecvTimeoutError::Disconnected) => Err(SessionError::Closed),
        }
    }

    /// Stops the scheduler once the evaluation in flight returns. The rest of
    /// the running request and every queued request are dropped.
    pub fn shutdown(&self) -> Result<(), SessionError> {
        self.send(Event::Shutdown)
    }

    fn send(&self, event: Event) -> Result<(), SessionError> {
        self.events.send(event).map_err(|_| SessionError::Closed)
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionHandle(*)")
    }
}

/// Stream of [`Update`]s produced by a session.
#[derive(Debug)]
pub struct SessionEvents {
    receiver: Receiver<Update>,
}

impl SessionEvents {
    /// Blocks for the next update. `None` once the scheduler has stopped and
    /// every update was consumed.
    pub fn recv(&self) -> Option<Update> {
        self.receiver.recv().ok()
    }

    pub fn try_recv(&self) -> Option<Update> {
        match self.receiver.try_recv() {
            Ok(update) => Some(update),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<Update> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Drains every update that is already available.
    pub fn drain(&self) -> Vec<Update> {
        self.receiver.try_iter().collect()
    }

    /// The raw receiver, for use in a `select!` alongside other channels.
    pub fn receiver(&self) -> &Receiver<Update> {
        &self.receiver
    }
}
