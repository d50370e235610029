use std::thread::sleep;
use std::time::Duration;

use poshwizard::terminal::TerminalRenderer;
use poshwizard::{Blueprint, Settings};
use serde_json::json;

/// This example demonstrates a three level cascade.
///
/// Topology:
///   [Env] --> [Region] --> [Server]
///     \______________________^
///
/// `Env` is a plain dropdown. `Region` lists the regions available in the
/// selected environment, and `Server` lists the machines in that region. The
/// server lookup is slow on purpose, so the spinner shows up after the
/// progress threshold.
fn main() -> anyhow::Result<()> {
    poshwizard::init_logging()?;

    let mut blueprint = Blueprint::new();

    // -----------------------------------------------------------------------
    // 1. Static root
    // -----------------------------------------------------------------------
    blueprint
        .control("Env")
        .default_value("Dev")
        .choices(["Dev", "Prod"]);

    // -----------------------------------------------------------------------
    // 2. Regions depend on the environment
    // -----------------------------------------------------------------------
    blueprint
        .control("Region")
        .select_first()
        .script(["Env"], |args| match args.get("Env") {
            Some("Prod") => Ok(json!(["eu-west", "us-east"])),
            Some("Dev") => Ok(json!(["local"])),
            _ => Ok(json!([])),
        });

    // -----------------------------------------------------------------------
    // 3. Servers depend on both
    // -----------------------------------------------------------------------
    blueprint
        .control("Server")
        .script(["Env", "Region"], |args| {
            sleep(Duration::from_millis(800));

            let env = args.get("Env").unwrap_or("none");
            let region = args.get("Region").unwrap_or("none");
            let servers: Vec<String> = (1..=3)
                .map(|i| format!("{}-{region}-{i:02}", env.to_lowercase()))
                .collect();

            Ok(json!(servers))
        });

    let wizard = blueprint.finish()?;
    println!("{wizard}");

    let (handle, events) = wizard.start(Settings::default())?;
    let mut renderer = TerminalRenderer::new();

    handle.wait_idle()?;
    for update in events.drain() {
        renderer.render(&update);
    }

    // Two changes in quick succession: the first cascade is superseded.
    handle.set_value("Env", "Prod")?;
    handle.set_value("Env", "Dev")?;
    handle.set_value("Env", "Prod")?;

    loop {
        match events.recv_timeout(Duration::from_millis(100)) {
            Some(update) => renderer.render(&update),
            None if handle.wait_idle_timeout(Duration::from_millis(50))? => break,
            None => {}
        }
    }
    for update in events.drain() {
        renderer.render(&update);
    }

    let snapshot = handle.snapshot()?;
    for control in &snapshot.controls {
        println!(
            "{:>8} = {:<16} {:?}",
            control.name,
            control.value.as_deref().unwrap_or("-"),
            control.choices
        );
    }

    let diagnostics = handle.diagnostics()?;
    println!("{}", diagnostics.render_mermaid(wizard.graph()));

    handle.shutdown()?;
    Ok(())
}
