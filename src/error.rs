use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::core::{Arguments, ArcStr};

/// Errors raised while turning a [`Blueprint`](crate::Blueprint) into a
/// [`Wizard`](crate::Wizard). Any of these aborts the whole definition.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("Control '{0}' is defined more than once")]
    DuplicateControl(ArcStr),

    #[error("Control '{control}' depends on '{missing}', which is not defined in this wizard")]
    UnknownDependency { control: ArcStr, missing: ArcStr },

    #[error("Dependency cycle detected: {}", CyclePath(.0))]
    CycleDetected(Vec<ArcStr>),

    #[error("Dynamic control '{0}' has no data source")]
    MissingSource(ArcStr),
}

struct CyclePath<'a>(&'a [ArcStr]);

impl fmt::Display for CyclePath<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, name) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" -> ")?;
            }
            f.write_str(name)?;
        }
        Ok(())
    }
}

/// Classification of a failed data source evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The callable or the row source returned an error or panicked.
    SourceThrew,
    /// The evaluation did not finish before the configured deadline.
    Timeout,
    /// The source produced something that cannot be turned into choices.
    MalformedSource,
    /// The source was not run because a control it reads failed to refresh
    /// in the same cascade.
    UpstreamFailed,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::SourceThrew => f.write_str("data source failed"),
            ErrorKind::Timeout => f.write_str("data source timed out"),
            ErrorKind::MalformedSource => f.write_str("data source is malformed"),
            ErrorKind::UpstreamFailed => f.write_str("dependency failed to refresh"),
        }
    }
}

/// A single control refresh that did not produce choices.
///
/// These never abort a session. The affected control keeps its previous
/// choices and the error is reported to the UI, carrying enough context
/// (control, dependency values, elapsed time) for the author to debug it.
#[derive(Debug, Clone, Error)]
#[error("Control '{control}': {kind} after {elapsed:.2?} ({arguments}): {message}")]
pub struct InvocationError {
    pub control: ArcStr,
    pub kind: ErrorKind,
    pub message: String,
    pub arguments: Arguments,
    pub elapsed: Duration,
}

impl InvocationError {
    pub(crate) fn new(
        control: ArcStr,
        kind: ErrorKind,
        message: impl Into<String>,
        arguments: Arguments,
        elapsed: Duration,
    ) -> Self {
        Self {
            control,
            kind,
            message: message.into(),
            arguments,
            elapsed,
        }
    }
}

/// Misuse of a [`SessionHandle`](crate::SessionHandle).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Control '{0}' is not part of this wizard")]
    UnknownControl(Box<str>),

    #[error("The session scheduler has stopped")]
    Closed,

    #[error("Failed to spawn the session scheduler")]
    Spawn(#[from] std::io::Error),
}

/// Failure to read [`Settings`](crate::Settings).
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Invalid settings document.\n{0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_display() {
        let err = DefinitionError::CycleDetected(vec!["A".into(), "B".into(), "A".into()]);
        assert_eq!(err.to_string(), "Dependency cycle detected: A -> B -> A");
    }

    #[test]
    fn test_invocation_display_names_arguments() {
        let mut arguments = Arguments::default();
        arguments.insert("Env", "Prod");

        let err = InvocationError::new(
            "Server".into(),
            ErrorKind::Timeout,
            "no result within 30s",
            arguments,
            Duration::from_secs(30),
        );

        let text = err.to_string();
        assert!(text.contains("Control 'Server'"));
        assert!(text.contains("timed out"));
        assert!(text.contains("Env=Prod"));
    }
}
