use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use timeline::{EditOutcome, EditRequest, EditSession, EditorConfig, Timeline};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "timeline-edit")]
#[command(about = "Headless timeline editing - apply scripted edits to a timeline document")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a JSON script of edits to a timeline document
    Apply {
        /// Timeline document (JSON)
        #[arg(short, long)]
        timeline: PathBuf,

        /// Script: a JSON array of edit requests, `{"op": "undo"}` or `{"op": "redo"}`
        #[arg(short, long)]
        script: PathBuf,

        /// Editor config (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Where to write the edited document (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the tracks, items and groups of a timeline document
    Inspect {
        /// Timeline document (JSON)
        timeline: PathBuf,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum HistoryStep {
    Undo,
    Redo,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScriptStep {
    History(HistoryStep),
    Edit(EditRequest),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Apply {
            timeline,
            script,
            config,
            output,
        } => apply_command(timeline, script, config, output),
        Commands::Inspect { timeline } => inspect_command(timeline),
    }
}

fn load_timeline(path: &Path) -> Result<Timeline> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading timeline {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing timeline {}", path.display()))
}

fn apply_command(
    timeline_path: PathBuf,
    script_path: PathBuf,
    config_path: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<()> {
    let config = match &config_path {
        Some(path) => EditorConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EditorConfig::default(),
    };
    let timeline = load_timeline(&timeline_path)?;
    let script = std::fs::read_to_string(&script_path)
        .with_context(|| format!("reading script {}", script_path.display()))?;
    let steps: Vec<ScriptStep> = serde_json::from_str(&script)
        .with_context(|| format!("parsing script {}", script_path.display()))?;

    info!(
        "Applying {} steps to timeline: {:?}",
        steps.len(),
        timeline_path
    );
    let mut session = EditSession::new(timeline, config);
    let mut applied = 0;
    for (index, step) in steps.iter().enumerate() {
        let result = match step {
            ScriptStep::Edit(request) => session.apply_request(request).map(|outcome| {
                if outcome == EditOutcome::Applied {
                    applied += 1;
                }
                format!("{}: {:?}", request.name(), outcome)
            }),
            ScriptStep::History(HistoryStep::Undo) => {
                session.undo().map(|label| format!("undo: {label}"))
            }
            ScriptStep::History(HistoryStep::Redo) => {
                session.redo().map(|label| format!("redo: {label}"))
            }
        };
        match result {
            Ok(summary) => {
                println!("[{index}] {summary}");
                for range in session.last_invalidations() {
                    debug!("Step {} invalidated {:?}", index, range);
                }
            }
            Err(err) if err.is_fatal() => {
                bail!("step {index} left the timeline in an unknown state: {err}")
            }
            Err(err) => {
                warn!("Step {} declined: {}", index, err);
                println!("[{index}] declined: {err}");
            }
        }
    }
    info!("{} of {} steps changed the timeline", applied, steps.len());

    let timeline = session.close();
    let json = serde_json::to_string_pretty(&timeline)?;
    match output {
        Some(path) => {
            std::fs::write(&path, json)
                .with_context(|| format!("writing timeline {}", path.display()))?;
            info!("Wrote timeline to: {:?}", path);
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn inspect_command(timeline_path: PathBuf) -> Result<()> {
    let timeline = load_timeline(&timeline_path)?;
    println!("Timeline: {}", timeline.name);
    for (index, track) in timeline.tracks().iter().enumerate() {
        println!("  [{index}] {} ({:?})", track.name, track.kind);
        for item in timeline.track_items(track.id) {
            println!(
                "    {} [{}, {}) in={} state={:?}",
                item.id,
                item.position,
                item.end(),
                item.in_point,
                item.state
            );
        }
    }
    let roots = timeline.groups().roots();
    if roots.is_empty() {
        println!("No groups");
    } else {
        println!("Groups:");
        for group in roots {
            let leaves = timeline.groups().leaves(timeline::Member::Group(group));
            println!("  {group}: {} items", leaves.len());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_mixes_edits_and_history_steps() {
        let script = r#"[
            { "op": "insert_space", "position": 10, "width": 5 },
            { "op": "undo" },
            { "op": "redo" }
        ]"#;
        let steps: Vec<ScriptStep> = serde_json::from_str(script).unwrap();
        assert!(matches!(
            steps[0],
            ScriptStep::Edit(EditRequest::InsertSpace {
                position: 10,
                width: 5
            })
        ));
        assert!(matches!(steps[1], ScriptStep::History(HistoryStep::Undo)));
        assert!(matches!(steps[2], ScriptStep::History(HistoryStep::Redo)));
    }

    #[test]
    fn unknown_op_is_rejected() {
        assert!(serde_json::from_str::<Vec<ScriptStep>>(r#"[{ "op": "explode" }]"#).is_err());
    }
}
