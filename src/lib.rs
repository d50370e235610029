#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod blueprint;
mod core;
pub mod engine;
mod error;
mod graph;
mod session;
mod settings;
mod source;
#[cfg(feature = "terminal")]
pub mod terminal;
mod utils;

pub use crate::blueprint::{Blueprint, ControlDef, Wizard};
pub use crate::core::{ArcStr, Arguments, ControlDescriptor, ControlKind};
pub use crate::engine::{
    ChangeCause, ControlSnapshot, Diagnostics, Evaluation, Invoker, Progress, RefreshOutcome,
    RefreshRequest, RefreshStats, RequestState, Snapshot, Truncated, Update,
};
pub use crate::error::*;
pub use crate::graph::DependencyGraph;
pub use crate::session::{SessionEvents, SessionHandle};
pub use crate::settings::Settings;
pub use crate::source::{Callable, DataSource, Row, RowFilter, RowSource, ScriptBlock};
#[cfg(feature = "logging")]
pub use crate::utils::init_logging;
