use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvError, RecvTimeoutError, bounded};

use crate::core::{Arguments, ArcStr, ControlDescriptor};
use crate::error::{ErrorKind, InvocationError};
use crate::settings::Settings;
use crate::source::{DataSource, Fault};

/// Advisory attached to an [`Evaluation`] whose result was cut to the limit.
///
/// The limit applies to the shaped list, after empty values and duplicates
/// are dropped. A source returning 5000 entries with only 700 distinct ones
/// is therefore not truncated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Truncated {
    /// How many distinct, non-empty choices the source produced.
    pub produced: usize,
    /// How many were kept.
    pub limit: usize,
}

/// The choices produced by one successful evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub choices: Vec<String>,
    pub truncated: Option<Truncated>,
}

type WorkerResult = std::thread::Result<Result<Vec<String>, Fault>>;

/// Runs data sources off the calling thread under the limits in [`Settings`].
///
/// Every evaluation gets its own worker thread. Author code cannot be
/// interrupted, so on timeout the worker is detached rather than stopped: it
/// keeps its OS thread until the source returns, and its result is dropped.
/// A source that never returns holds one thread per timed out refresh for
/// the lifetime of the process.
#[derive(Debug, Clone)]
pub struct Invoker {
    settings: Settings,
}

impl Invoker {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Evaluates the data source of `control` and blocks until it returns or
    /// the timeout passes.
    ///
    /// `values` holds the current values of the control's dependencies. Only
    /// those the source declares as parameters are passed on.
    pub fn evaluate(
        &self,
        control: &ControlDescriptor,
        values: &Arguments,
    ) -> Result<Evaluation, InvocationError> {
        self.start(control, values)?.wait()
    }

    /// Starts an evaluation on a worker thread and returns immediately.
    pub(crate) fn start(
        &self,
        control: &ControlDescriptor,
        values: &Arguments,
    ) -> Result<Invocation, InvocationError> {
        let started = Instant::now();
        let arguments = bind(control, values);

        let Some(source) = control.source().cloned() else {
            return Err(InvocationError::new(
                control.name().clone(),
                ErrorKind::MalformedSource,
                "The control has no data source",
                arguments,
                Duration::ZERO,
            ));
        };

        let (sender, receiver) = bounded::<WorkerResult>(1);
        let worker_arguments = arguments.clone();

        let spawned = std::thread::Builder::new()
            .name(format!("poshwizard-source-{}", control.name()))
            .spawn(move || {
                // Author code may panic; the payload is reported as a
                // SourceThrew error instead of tearing down the session.
                let result = catch_unwind(AssertUnwindSafe(|| source.fetch(&worker_arguments)));

                // The receiver is gone when the evaluation timed out.
                let _ = sender.send(result);
            });

        if let Err(err) = spawned {
            return Err(InvocationError::new(
                control.name().clone(),
                ErrorKind::SourceThrew,
                format!("Couldn't start a worker thread.\n{err}"),
                arguments,
                started.elapsed(),
            ));
        }

        Ok(Invocation {
            control: control.name().clone(),
            arguments,
            started,
            deadline: started + self.settings.timeout,
            timeout: self.settings.timeout,
            max_results: self.settings.max_results,
            receiver,
        })
    }
}

/// Restricts the dependency values to what the source is allowed to see.
fn bind(control: &ControlDescriptor, values: &Arguments) -> Arguments {
    let declared = control.dependencies();

    let accepted: Vec<ArcStr> = match control.source() {
        Some(DataSource::Callable(callable)) => callable
            .parameters()
            .into_iter()
            .filter(|name| declared.contains(name))
            .collect(),
        _ => declared.to_vec(),
    };

    values
        .iter()
        .filter(|(name, _)| accepted.iter().any(|a| a.as_ref() == *name))
        .collect()
}

/// An evaluation running on a worker thread.
pub(crate) struct Invocation {
    control: ArcStr,
    arguments: Arguments,
    started: Instant,
    deadline: Instant,
    timeout: Duration,
    max_results: usize,
    receiver: Receiver<WorkerResult>,
}

impl Invocation {
    pub(crate) fn receiver(&self) -> &Receiver<WorkerResult> {
        &self.receiver
    }

    pub(crate) fn deadline(&self) -> Instant {
        self.deadline
    }

    pub(crate) fn wait(self) -> Result<Evaluation, InvocationError> {
        match self.receiver.recv_deadline(self.deadline) {
            Ok(result) => self.complete(Ok(result)),
            Err(RecvTimeoutError::Timeout) => Err(self.timed_out()),
            Err(RecvTimeoutError::Disconnected) => self.complete(Err(RecvError)),
        }
    }

    /// Turns whatever the worker sent into the final result.
    pub(crate) fn complete(
        self,
        message: Result<WorkerResult, RecvError>,
    ) -> Result<Evaluation, InvocationError> {
        let elapsed = self.started.elapsed();

        let (kind, text) = match message {
            Ok(Ok(Ok(values))) => return Ok(shape(values, self.max_results)),
            Ok(Ok(Err(fault))) => (fault.kind, fault.message),
            Ok(Err(panic)) => {
                let text = if let Some(s) = panic.downcast_ref::<&str>() {
                    format!("Data source panicked: {s}")
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    format!("Data source panicked: {s}")
                } else {
                    String::from("Data source panicked with unknown payload")
                };
                (ErrorKind::SourceThrew, text)
            }
            Err(RecvError) => (
                ErrorKind::SourceThrew,
                String::from("Worker exited without a result"),
            ),
        };

        Err(InvocationError::new(
            self.control,
            kind,
            text,
            self.arguments,
            elapsed,
        ))
    }

    /// Abandons the evaluation. The worker keeps running until the source
    /// returns, its result is dropped.
    pub(crate) fn timed_out(self) -> InvocationError {
        let message = format!(
            "No result within {}",
            humantime::format_duration(self.timeout)
        );

        InvocationError::new(
            self.control,
            ErrorKind::Timeout,
            message,
            self.arguments,
            self.started.elapsed(),
        )
    }
}

/// Drops empty values and duplicates, then applies the result limit.
fn shape(values: Vec<String>, limit: usize) -> Evaluation {
    let mut seen = HashSet::with_capacity(values.len());
    let mut choices: Vec<String> = values
        .into_iter()
        .filter(|value| !value.is_empty())
        .filter(|value| seen.insert(value.clone()))
        .collect();

    let produced = choices.len();
    let truncated = (produced > limit).then(|| {
        choices.truncate(limit);
        Truncated { produced, limit }
    });

    Evaluation { choices, truncated }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{RowFilter, RowSource, ScriptBlock};
    use serde_json::json;
    use std::io::Write;

    fn control(params: &[&str], f: impl Fn(&Arguments) -> anyhow::Result<serde_json::Value> + Send + Sync + 'static) -> ControlDescriptor {
        let params: Vec<String> = params.iter().map(|p| p.to_string()).collect();
        ControlDescriptor::dynamic("Target", ScriptBlock::new(params, f).into())
    }

    #[test]
    fn test_binds_declared_parameters_only() {
        let target = control(&["Env"], |args| {
            assert_eq!(args.get("Env"), Some("Prod"));
            assert_eq!(args.get("Other"), None);
            Ok(json!([args.len()]))
        });

        let values: Arguments = [("Env", "Prod"), ("Other", "x")].into_iter().collect();
        let evaluation = Invoker::new(Settings::default())
            .evaluate(&target, &values)
            .unwrap();

        assert_eq!(evaluation.choices, ["1"]);
    }

    #[test]
    fn test_explicit_dependency_not_in_parameters_is_omitted() {
        let target = control(&["Env"], |args| Ok(json!([args.get("Region").unwrap_or("none")])))
            .depends_on(["Env", "Region"]);

        let values: Arguments = [("Env", "Prod"), ("Region", "eu")].into_iter().collect();
        let evaluation = Invoker::new(Settings::default())
            .evaluate(&target, &values)
            .unwrap();

        assert_eq!(evaluation.choices, ["none"]);
    }

    #[test]
    fn test_timeout() {
        let target = control(&[], |_| {
            std::thread::sleep(Duration::from_secs(5));
            Ok(json!(["late"]))
        });

        let settings = Settings::default().timeout(Duration::from_millis(50));
        let started = Instant::now();
        let err = Invoker::new(settings)
            .evaluate(&target, &Arguments::new())
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Timeout);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_truncation_is_advisory() {
        let target = control(&[], |_| Ok(json!((0..5000).collect::<Vec<_>>())));

        let evaluation = Invoker::new(Settings::default())
            .evaluate(&target, &Arguments::new())
            .unwrap();

        assert_eq!(evaluation.choices.len(), 1000);
        assert_eq!(evaluation.choices[0], "0");
        assert_eq!(evaluation.choices[999], "999");
        assert_eq!(
            evaluation.truncated,
            Some(Truncated {
                produced: 5000,
                limit: 1000
            })
        );
    }

    #[test]
    fn test_duplicates_do_not_count_towards_limit() {
        let target = control(&[], |_| Ok(json!((0..5000).map(|i| i % 700).collect::<Vec<_>>())));

        let evaluation = Invoker::new(Settings::default())
            .evaluate(&target, &Arguments::new())
            .unwrap();

        assert_eq!(evaluation.choices.len(), 700);
        assert_eq!(evaluation.truncated, None);
    }

    #[test]
    fn test_timed_out_worker_is_detached() {
        let (release, gate) = crossbeam_channel::bounded::<()>(0);
        let target = control(&[], move |_| {
            let _ = gate.recv_timeout(Duration::from_secs(5));
            Ok(json!(["late"]))
        });

        let invoker = Invoker::new(Settings::default().timeout(Duration::from_millis(50)));
        let err = invoker.evaluate(&target, &Arguments::new()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);

        // The abandoned worker is still blocked in the source.
        assert!(release.send_timeout((), Duration::from_secs(1)).is_ok());

        let fresh = control(&[], |_| Ok(json!(["next"])));
        let evaluation = invoker.evaluate(&fresh, &Arguments::new()).unwrap();
        assert_eq!(evaluation.choices, ["next"]);
    }

    #[test]
    fn test_panic_is_contained() {
        let target = control(&[], |_| panic!("kaboom"));

        let err = Invoker::new(Settings::default())
            .evaluate(&target, &Arguments::new())
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::SourceThrew);
        assert!(err.message.contains("kaboom"));
    }

    #[test]
    fn test_shape_dedups_and_drops_empty() {
        let evaluation = shape(
            vec!["b".into(), "".into(), "a".into(), "b".into()],
            10,
        );
        assert_eq!(evaluation.choices, ["b", "a"]);
        assert_eq!(evaluation.truncated, None);
    }

    #[test]
    fn test_rows_filtered_and_projected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Env,Region").unwrap();
        writeln!(file, "Prod,eu-west").unwrap();
        writeln!(file, "Dev,us-east").unwrap();
        writeln!(file, "prod,ap-south").unwrap();

        let path = camino::Utf8Path::from_path(file.path()).unwrap();
        let source = RowSource::new(path, "region").filter(RowFilter::column_equals("Env"));
        let target = ControlDescriptor::dynamic("Region", source.into());

        let values: Arguments = [("Env", "Prod")].into_iter().collect();
        let evaluation = Invoker::new(Settings::default())
            .evaluate(&target, &values)
            .unwrap();

        assert_eq!(evaluation.choices, ["eu-west", "ap-south"]);
    }

    #[test]
    fn test_rows_missing_column_is_malformed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Env,Region").unwrap();
        writeln!(file, "Prod,eu-west").unwrap();

        let path = camino::Utf8Path::from_path(file.path()).unwrap();
        let target = ControlDescriptor::dynamic("Server", RowSource::new(path, "Server").into());

        let err = Invoker::new(Settings::default())
            .evaluate(&target, &Arguments::new())
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::MalformedSource);
    }

    #[test]
    fn test_rows_missing_file_is_source_threw() {
        let target = ControlDescriptor::dynamic(
            "Server",
            RowSource::new("/nonexistent/poshwizard/servers.csv", "Name").into(),
        );

        let err = Invoker::new(Settings::default())
            .evaluate(&target, &Arguments::new())
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::SourceThrew);
    }
}
