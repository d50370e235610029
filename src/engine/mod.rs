mod diagnostics;
mod invoke;
mod progress;
mod scheduler;

use crate::core::ArcStr;
use crate::error::InvocationError;

pub use crate::engine::diagnostics::{Diagnostics, RefreshOutcome, RefreshStats};
pub use crate::engine::invoke::{Evaluation, Invoker, Truncated};
pub use crate::engine::progress::Progress;
pub use crate::engine::scheduler::{RefreshRequest, RequestState};

pub(crate) use crate::engine::scheduler::{Event, Scheduler};

/// Why the engine changed the value of a control on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeCause {
    /// The value was no longer among the refreshed choices.
    Cleared,
    /// The value was replaced by the first refreshed choice.
    AutoSelected,
}

/// Everything the UI needs to know to keep the wizard in sync.
#[derive(Debug, Clone)]
pub enum Update {
    /// A dynamic control has a fresh list of choices.
    Choices {
        control: ArcStr,
        choices: Vec<String>,
        truncated: Option<Truncated>,
    },
    /// The engine changed the value of a control after a refresh.
    ValueChanged {
        control: ArcStr,
        value: Option<String>,
        cause: ChangeCause,
    },
    /// A refresh failed; the control keeps its previous choices.
    Failed {
        control: ArcStr,
        error: InvocationError,
    },
    /// Show or hide the working indicator.
    Progress(Progress),
    /// A refresh request reached a terminal state.
    Settled {
        origin: Option<ArcStr>,
        generation: u64,
        state: RequestState,
    },
}

/// Current value and choices of one control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlSnapshot {
    pub name: ArcStr,
    pub value: Option<String>,
    pub choices: Vec<String>,
}

/// Point-in-time view of every control in a session, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub controls: Vec<ControlSnapshot>,
}

impl Snapshot {
    pub fn get(&self, name: &str) -> Option<&ControlSnapshot> {
        self.controls.iter().find(|c| c.name.as_ref() == name)
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|c| c.value.as_deref())
    }

    pub fn choices(&self, name: &str) -> &[String] {
        self.get(name).map(|c| c.choices.as_slice()).unwrap_or_default()
    }
}
