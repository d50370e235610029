use std::collections::HashMap;
use std::fmt::Write;
use std::time::Duration;

use crate::core::ArcStr;
use crate::graph::DependencyGraph;

/// How a single control refresh ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Applied,
    Failed,
    /// The result arrived after a newer cascade took over the control.
    Discarded,
}

/// Refresh statistics for one control.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshStats {
    pub applied: usize,
    pub failed: usize,
    pub discarded: usize,
    pub last: Duration,
    pub total: Duration,
}

/// Per-control refresh metrics collected over the lifetime of a session.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    pub refreshes: HashMap<ArcStr, RefreshStats>,
}

impl Diagnostics {
    pub(crate) fn record(&mut self, control: &ArcStr, elapsed: Duration, outcome: RefreshOutcome) {
        let stats = self.refreshes.entry(control.clone()).or_default();

        match outcome {
            RefreshOutcome::Applied => stats.applied += 1,
            RefreshOutcome::Failed => stats.failed += 1,
            RefreshOutcome::Discarded => stats.discarded += 1,
        }

        stats.last = elapsed;
        stats.total += elapsed;
    }

    pub fn get(&self, control: &str) -> Option<&RefreshStats> {
        self.refreshes.get(control)
    }

    /// Renders the dependency graph as a Mermaid diagram, color-coded by the
    /// duration of the last refresh.
    ///
    /// * **Green**: Fast
    /// * **Yellow**: Moderate
    /// * **Red**: Slow
    /// * **Blue**: Never refreshed
    pub fn render_mermaid(&self, graph: &DependencyGraph) -> String {
        let mut f = String::new();
        let _ = writeln!(f, "graph LR");

        let mut min_time = f64::MAX;
        let mut max_time = f64::MIN;

        for stats in self.refreshes.values() {
            let secs = stats.last.as_secs_f64();
            min_time = min_time.min(secs);
            max_time = max_time.max(secs);
        }

        if min_time > max_time {
            min_time = 0.0;
            max_time = 0.0;
        }

        // all refreshes took the same time
        if (max_time - min_time).abs() < f64::EPSILON {
            max_time = min_time + 1.0;
        }

        for (index, name, _) in graph.nodes() {
            let (label, color) = match self.refreshes.get(name) {
                Some(stats) => {
                    let t = (stats.last.as_secs_f64() - min_time) / (max_time - min_time);

                    // 0.0 green -> 0.5 yellow -> 1.0 red
                    let (r, g) = if t < 0.5 {
                        ((255.0 * t * 2.0) as u8, 255)
                    } else {
                        (255, (255.0 * (1.0 - (t - 0.5) * 2.0)) as u8)
                    };

                    let label = format!("{:.2?}", stats.last);
                    (label, format!("#{r:02X}{g:02X}00"))
                }
                None => ("Static".to_string(), "#ADD8E6".to_string()),
            };

            let name = name.replace('"', "\\\"");
            let _ = writeln!(f, "    {index}[\"{name}\\n{label}\"]");
            let _ = writeln!(f, "    style {index} fill:{color}");
        }

        for (source, target) in graph.edges() {
            let _ = writeln!(f, "    {source} --> {target}");
        }

        f
    }
}
