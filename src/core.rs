use std::collections::BTreeMap;
use std::fmt;

use crate::source::DataSource;

/// Atomic reference-counted string type used for control names.
pub type ArcStr = std::sync::Arc<str>;

/// The kind of an interactive control.
///
/// Only [`ControlKind::DynamicChoice`] controls have their choices computed
/// by the engine, every other kind is a plain value holder that dynamic
/// controls may read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlKind {
    StaticChoice,
    DynamicChoice,
    FreeText,
    Boolean,
    Numeric,
    Date,
    Path,
    Display,
}

/// Static metadata for a single control in a wizard.
///
/// Descriptors are immutable once the wizard is built. The current value and
/// current choices of a control live in the session that owns it.
#[derive(Debug, Clone)]
pub struct ControlDescriptor {
    pub(crate) name: ArcStr,
    pub(crate) kind: ControlKind,
    pub(crate) depends_on: Vec<ArcStr>,
    pub(crate) source: Option<DataSource>,
    pub(crate) choices: Vec<String>,
    pub(crate) default: Option<String>,
    pub(crate) select_first: bool,
}

impl ControlDescriptor {
    /// A plain control of the given kind with no choices and no dependencies.
    pub fn new(name: impl Into<ArcStr>, kind: ControlKind) -> Self {
        Self {
            name: name.into(),
            kind,
            depends_on: Vec::new(),
            source: None,
            choices: Vec::new(),
            default: None,
            select_first: false,
        }
    }

    /// A dropdown with a fixed list of choices.
    pub fn static_choice<I, S>(name: impl Into<ArcStr>, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut control = Self::new(name, ControlKind::StaticChoice);
        control.choices = choices.into_iter().map(Into::into).collect();
        control
    }

    /// A dropdown whose choices are computed by `source`.
    ///
    /// The dependencies are taken from the parameters the source declares.
    /// Use [`depends_on`](Self::depends_on) to override them.
    pub fn dynamic(name: impl Into<ArcStr>, source: DataSource) -> Self {
        let mut control = Self::new(name, ControlKind::DynamicChoice);
        control.depends_on = dedup(source.parameters());
        control.source = Some(source);
        control
    }

    /// Replaces the detected dependencies with an explicit list.
    pub fn depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ArcStr>,
    {
        self.depends_on = dedup(names.into_iter().map(Into::into).collect());
        self
    }

    /// Initial value of the control.
    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Select the first choice whenever a refresh leaves the control without
    /// a valid value.
    pub fn select_first(mut self, enabled: bool) -> Self {
        self.select_first = enabled;
        self
    }

    pub fn name(&self) -> &ArcStr {
        &self.name
    }

    pub fn kind(&self) -> ControlKind {
        self.kind
    }

    pub fn dependencies(&self) -> &[ArcStr] {
        &self.depends_on
    }

    pub fn source(&self) -> Option<&DataSource> {
        self.source.as_ref()
    }

    pub fn is_dynamic(&self) -> bool {
        self.kind == ControlKind::DynamicChoice
    }

    /// Fixed choices of a static control; empty for every other kind.
    pub fn choices(&self) -> &[String] {
        &self.choices
    }
}

fn dedup(names: Vec<ArcStr>) -> Vec<ArcStr> {
    let mut out: Vec<ArcStr> = Vec::with_capacity(names.len());
    for name in names {
        if !out.contains(&name) {
            out.push(name);
        }
    }
    out
}

/// Named argument values passed to a data source.
///
/// Only dependencies that currently hold a value are present, so a source can
/// tell "unset" apart from an empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Arguments {
    values: BTreeMap<String, String>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Display for Arguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.values.is_empty() {
            return f.write_str("no arguments");
        }

        for (i, (name, value)) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}={value}")?;
        }

        Ok(())
    }
}

impl<K, V> FromIterator<(K, V)> for Arguments
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ScriptBlock;

    #[test]
    fn test_dynamic_detects_parameters() {
        let source = ScriptBlock::new(["Env", "Region", "Env"], |_| Ok(serde_json::json!([])));
        let control = ControlDescriptor::dynamic("Server", source.into());

        let deps: Vec<&str> = control.dependencies().iter().map(AsRef::as_ref).collect();
        assert_eq!(deps, ["Env", "Region"]);
        assert!(control.is_dynamic());
    }

    #[test]
    fn test_explicit_dependencies_win() {
        let source = ScriptBlock::new(["Env"], |_| Ok(serde_json::json!([])));
        let control = ControlDescriptor::dynamic("Server", source.into()).depends_on(["Region"]);

        let deps: Vec<&str> = control.dependencies().iter().map(AsRef::as_ref).collect();
        assert_eq!(deps, ["Region"]);
    }

    #[test]
    fn test_arguments_display() {
        let args: Arguments = [("Region", "eu"), ("Env", "Prod")].into_iter().collect();
        assert_eq!(args.to_string(), "Env=Prod, Region=eu");
        assert_eq!(Arguments::new().to_string(), "no arguments");
    }
}
