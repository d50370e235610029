//! Data sources that produce the choices of a dynamic control.
//!
//! A source is either an opaque [`Callable`] supplied by the host (for example
//! a script block running in an embedded interpreter) or a reference to rows
//! in an external CSV file. Both kinds declare the parameter names they read,
//! which is how a control's dependencies are detected when the author does
//! not list them explicitly.

use std::fmt::Debug;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use csv::{StringRecord, Trim};
use serde_json::Value;

use crate::core::{Arguments, ArcStr};
use crate::error::ErrorKind;

/// An opaque, host-provided function computing a list of choices.
///
/// The execution context behind it is external to the engine. Implementors
/// only need to report which named parameters they accept and evaluate
/// themselves against a set of [`Arguments`].
pub trait Callable: Send + Sync {
    /// Formal parameter names, in declaration order.
    fn parameters(&self) -> Vec<ArcStr>;

    /// Evaluates the callable. The result may be a JSON array of scalars, a
    /// single scalar or `null`.
    fn call(&self, arguments: &Arguments) -> anyhow::Result<Value>;
}

type ScriptFnPtr = Arc<dyn Fn(&Arguments) -> anyhow::Result<Value> + Send + Sync>;

/// A [`Callable`] backed by a Rust closure with explicitly named parameters.
#[derive(Clone)]
pub struct ScriptBlock {
    parameters: Vec<ArcStr>,
    func: ScriptFnPtr,
}

impl ScriptBlock {
    pub fn new<I, S, F>(parameters: I, func: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ArcStr>,
        F: Fn(&Arguments) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            parameters: parameters.into_iter().map(Into::into).collect(),
            func: Arc::new(func),
        }
    }
}

impl Callable for ScriptBlock {
    fn parameters(&self) -> Vec<ArcStr> {
        self.parameters.clone()
    }

    fn call(&self, arguments: &Arguments) -> anyhow::Result<Value> {
        (self.func)(arguments)
    }
}

impl Debug for ScriptBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ScriptBlock({:?})", self.parameters)
    }
}

/// A single CSV row, with case-insensitive access by column name.
pub struct Row<'a> {
    headers: &'a StringRecord,
    record: &'a StringRecord,
}

impl<'a> Row<'a> {
    pub fn get(&self, column: &str) -> Option<&'a str> {
        let index = column_index(self.headers, column)?;
        self.record.get(index)
    }
}

type RowPredicate = Arc<dyn Fn(&Row<'_>, &Arguments) -> bool + Send + Sync>;

/// Predicate deciding whether a row contributes a choice.
#[derive(Clone)]
pub struct RowFilter {
    parameters: Vec<ArcStr>,
    predicate: RowPredicate,
}

impl RowFilter {
    pub fn new<I, S, F>(parameters: I, predicate: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ArcStr>,
        F: Fn(&Row<'_>, &Arguments) -> bool + Send + Sync + 'static,
    {
        Self {
            parameters: parameters.into_iter().map(Into::into).collect(),
            predicate: Arc::new(predicate),
        }
    }

    /// Keeps rows whose `column` equals the current value of the control
    /// with the same name. Rows are dropped while that control is unset.
    pub fn column_equals(column: impl Into<ArcStr>) -> Self {
        let column: ArcStr = column.into();
        let key = column.clone();

        Self::new([column], move |row, args| {
            match (row.get(&key), args.get(&key)) {
                (Some(cell), Some(value)) => cell.eq_ignore_ascii_case(value),
                _ => false,
            }
        })
    }
}

impl Debug for RowFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RowFilter({:?})", self.parameters)
    }
}

/// Rows loaded from a CSV file with a header line, projected onto one column.
#[derive(Debug, Clone)]
pub struct RowSource {
    locator: Utf8PathBuf,
    column: String,
    filter: Option<RowFilter>,
}

impl RowSource {
    pub fn new(locator: impl AsRef<Utf8Path>, column: impl Into<String>) -> Self {
        Self {
            locator: locator.as_ref().to_owned(),
            column: column.into(),
            filter: None,
        }
    }

    pub fn filter(mut self, filter: RowFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn locator(&self) -> &Utf8Path {
        &self.locator
    }

    fn read(&self, arguments: &Arguments) -> Result<Vec<String>, Fault> {
        let text = std::fs::read_to_string(&self.locator).map_err(|err| {
            Fault::new(
                ErrorKind::SourceThrew,
                format!("Couldn't read rows from '{}'.\n{err}", self.locator),
            )
        })?;

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(Trim::All)
            .from_reader(text.as_bytes());

        let headers = reader
            .headers()
            .map_err(|err| Fault::malformed(format!("Invalid header in '{}'.\n{err}", self.locator)))?
            .clone();

        let Some(index) = column_index(&headers, &self.column) else {
            return Err(Fault::malformed(format!(
                "Column '{}' not found in '{}'",
                self.column, self.locator
            )));
        };

        let mut values = Vec::new();

        for record in reader.records() {
            let record = record.map_err(|err| {
                Fault::malformed(format!("Invalid row in '{}'.\n{err}", self.locator))
            })?;

            if let Some(filter) = &self.filter {
                let row = Row {
                    headers: &headers,
                    record: &record,
                };

                if !(filter.predicate)(&row, arguments) {
                    continue;
                }
            }

            values.push(record.get(index).unwrap_or_default().to_string());
        }

        Ok(values)
    }
}

fn column_index(headers: &StringRecord, column: &str) -> Option<usize> {
    headers
        .iter()
        .position(|header| header.eq_ignore_ascii_case(column))
}

/// Where the choices of a dynamic control come from.
#[derive(Clone)]
pub enum DataSource {
    Callable(Arc<dyn Callable>),
    ExternalRows(RowSource),
}

impl DataSource {
    pub fn callable(callable: impl Callable + 'static) -> Self {
        DataSource::Callable(Arc::new(callable))
    }

    /// Parameter names the source reads.
    pub fn parameters(&self) -> Vec<ArcStr> {
        match self {
            DataSource::Callable(callable) => callable.parameters(),
            DataSource::ExternalRows(rows) => rows
                .filter
                .as_ref()
                .map(|filter| filter.parameters.clone())
                .unwrap_or_default(),
        }
    }

    /// Runs the source to completion on the calling thread.
    pub(crate) fn fetch(&self, arguments: &Arguments) -> Result<Vec<String>, Fault> {
        match self {
            DataSource::Callable(callable) => {
                let value = callable
                    .call(arguments)
                    .map_err(|err| Fault::new(ErrorKind::SourceThrew, format!("{err:#}")))?;

                choices_from_json(value)
            }
            DataSource::ExternalRows(rows) => rows.read(arguments),
        }
    }
}

impl From<ScriptBlock> for DataSource {
    fn from(value: ScriptBlock) -> Self {
        DataSource::callable(value)
    }
}

impl From<RowSource> for DataSource {
    fn from(value: RowSource) -> Self {
        DataSource::ExternalRows(value)
    }
}

impl Debug for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataSource::Callable(callable) => {
                write!(f, "DataSource::Callable({:?})", callable.parameters())
            }
            DataSource::ExternalRows(rows) => write!(f, "DataSource::ExternalRows({rows:?})"),
        }
    }
}

/// A classified failure produced inside a worker thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Fault {
    pub kind: ErrorKind,
    pub message: String,
}

impl Fault {
    pub(crate) fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedSource, message)
    }
}

/// Flattens the result of a callable into plain choice strings.
fn choices_from_json(value: Value) -> Result<Vec<String>, Fault> {
    match value {
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.into_iter().enumerate() {
                match item {
                    Value::Array(_) | Value::Object(_) => {
                        return Err(Fault::malformed(format!(
                            "Item {i} of the result is not a plain value"
                        )));
                    }
                    item => out.extend(scalar(item)),
                }
            }
            Ok(out)
        }
        Value::Object(_) => Err(Fault::malformed(
            "The result is an object, expected a list of values",
        )),
        other => Ok(scalar(other).into_iter().collect()),
    }
}

fn scalar(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s),
        Value::Array(_) | Value::Object(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_shapes() {
        assert_eq!(
            choices_from_json(json!(["a", 1, true, null])).unwrap(),
            ["a", "1", "true"]
        );
        assert_eq!(choices_from_json(json!("single")).unwrap(), ["single"]);
        assert!(choices_from_json(json!(null)).unwrap().is_empty());
    }

    #[test]
    fn test_nested_result_is_malformed() {
        let fault = choices_from_json(json!(["a", ["b"]])).unwrap_err();
        assert_eq!(fault.kind, ErrorKind::MalformedSource);

        let fault = choices_from_json(json!({"a": 1})).unwrap_err();
        assert_eq!(fault.kind, ErrorKind::MalformedSource);
    }

    #[test]
    fn test_callable_error_is_source_threw() {
        let source: DataSource =
            ScriptBlock::new(["Env"], |_| Err(anyhow::anyhow!("boom"))).into();

        let fault = source.fetch(&Arguments::new()).unwrap_err();
        assert_eq!(fault.kind, ErrorKind::SourceThrew);
        assert!(fault.message.contains("boom"));
    }

    #[test]
    fn test_row_source_parameters_come_from_filter() {
        let source: DataSource = RowSource::new("servers.csv", "Name")
            .filter(RowFilter::column_equals("Env"))
            .into();

        assert_eq!(source.parameters(), vec![ArcStr::from("Env")]);
        assert!(
            DataSource::from(RowSource::new("servers.csv", "Name"))
                .parameters()
                .is_empty()
        );
    }
}
