use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::core::{ArcStr, ControlDescriptor, ControlKind};
use crate::error::{DefinitionError, SessionError};
use crate::graph::DependencyGraph;
use crate::session::{SessionEvents, SessionHandle};
use crate::settings::Settings;
use crate::source::{DataSource, RowSource, ScriptBlock};

/// The blueprint of a wizard.
///
/// `Blueprint` collects control declarations. Once every control is added,
/// [`finish`](Self::finish) validates the declarations and builds the
/// dependency graph, producing an immutable [`Wizard`].
///
/// # Example
///
/// ```rust
/// use poshwizard::Blueprint;
/// use serde_json::json;
///
/// let mut blueprint = Blueprint::new();
/// blueprint.control("Env").choices(["Dev", "Prod"]);
/// blueprint
///     .control("Region")
///     .select_first()
///     .script(["Env"], |args| match args.get("Env") {
///         Some("Prod") => Ok(json!(["eu-west", "us-east"])),
///         _ => Ok(json!(["local"])),
///     });
///
/// let wizard = blueprint.finish().unwrap();
/// assert_eq!(wizard.graph().affected_by("Env").len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct Blueprint {
    controls: Vec<ControlDescriptor>,
}

impl Blueprint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a fully built descriptor.
    pub fn add(&mut self, control: ControlDescriptor) -> &mut Self {
        self.controls.push(control);
        self
    }

    /// Starts declaring a control with the given name.
    pub fn control(&mut self, name: impl Into<ArcStr>) -> ControlDef<'_> {
        ControlDef {
            blueprint: self,
            name: name.into(),
            depends_on: None,
            default: None,
            select_first: false,
        }
    }

    pub fn finish(self) -> Result<Wizard, DefinitionError> {
        Wizard::new(self.controls)
    }
}

impl Extend<ControlDescriptor> for Blueprint {
    fn extend<T: IntoIterator<Item = ControlDescriptor>>(&mut self, iter: T) {
        self.controls.extend(iter);
    }
}

/// A control being declared. Nothing is added to the blueprint until one of
/// the terminal methods (`kind`, `choices`, `script`, `rows`, `source`) is
/// called.
pub struct ControlDef<'a> {
    blueprint: &'a mut Blueprint,
    name: ArcStr,
    depends_on: Option<Vec<ArcStr>>,
    default: Option<String>,
    select_first: bool,
}

impl ControlDef<'_> {
    /// Explicit dependencies, overriding the detected ones.
    pub fn depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ArcStr>,
    {
        self.depends_on = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn select_first(mut self) -> Self {
        self.select_first = true;
        self
    }

    /// A plain value control.
    pub fn kind(self, kind: ControlKind) -> ArcStr {
        let control = ControlDescriptor::new(self.name.clone(), kind);
        self.push(control)
    }

    /// A dropdown with fixed choices.
    pub fn choices<I, S>(self, choices: I) -> ArcStr
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let control = ControlDescriptor::static_choice(self.name.clone(), choices);
        self.push(control)
    }

    /// A dropdown computed by a closure reading the named controls.
    pub fn script<I, S, F>(self, parameters: I, func: F) -> ArcStr
    where
        I: IntoIterator<Item = S>,
        S: Into<ArcStr>,
        F: Fn(&crate::Arguments) -> anyhow::Result<serde_json::Value> + Send + Sync + 'static,
    {
        self.source(ScriptBlock::new(parameters, func))
    }

    /// A dropdown computed from the rows of a CSV file.
    pub fn rows(self, rows: RowSource) -> ArcStr {
        self.source(rows)
    }

    /// A dropdown computed by any data source.
    pub fn source(self, source: impl Into<DataSource>) -> ArcStr {
        let control = ControlDescriptor::dynamic(self.name.clone(), source.into());
        self.push(control)
    }

    fn push(self, mut control: ControlDescriptor) -> ArcStr {
        if let Some(depends_on) = self.depends_on {
            control = control.depends_on(depends_on);
        }

        if let Some(default) = self.default {
            control = control.default_value(default);
        }

        control = control.select_first(self.select_first);
        self.blueprint.controls.push(control);
        self.name
    }
}

struct Definition {
    controls: Vec<ControlDescriptor>,
    positions: HashMap<ArcStr, usize>,
    graph: DependencyGraph,
}

/// A validated wizard definition.
///
/// Cheap to clone and safe to share between threads; every session started
/// from it reads the same descriptors and graph.
#[derive(Clone)]
pub struct Wizard {
    inner: Arc<Definition>,
}

impl Wizard {
    pub fn new(controls: Vec<ControlDescriptor>) -> Result<Self, DefinitionError> {
        let graph = DependencyGraph::build(&controls)?;

        let positions = controls
            .iter()
            .enumerate()
            .map(|(i, control)| (control.name().clone(), i))
            .collect();

        Ok(Self {
            inner: Arc::new(Definition {
                controls,
                positions,
                graph,
            }),
        })
    }

    pub fn design() -> Blueprint {
        Blueprint::default()
    }

    pub fn controls(&self) -> &[ControlDescriptor] {
        &self.inner.controls
    }

    pub fn control(&self, name: &str) -> Option<&ControlDescriptor> {
        let &index = self.inner.positions.get(name)?;
        self.inner.controls.get(index)
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.inner.graph
    }

    /// Starts a new session on its own scheduler thread.
    ///
    /// The session immediately computes the choices of every dynamic control,
    /// using the default values of their dependencies.
    pub fn start(&self, settings: Settings) -> Result<(SessionHandle, SessionEvents), SessionError> {
        crate::session::start(self.clone(), settings)
    }
}

impl fmt::Debug for Wizard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wizard")
            .field("controls", &self.inner.controls)
            .finish()
    }
}

/// Mermaid rendering of the dependency graph.
impl fmt::Display for Wizard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner.graph, f)
    }
}
