//! Subcommand implementations.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde_json::Value;
use squirrel_hoard::{Action, English, Node, join_path};
use squirrel_sync::{Hoarder, LocalStore, SaveOptions, TracingProgress, UiPlayer};
use tracing::{info, warn};

use crate::config::Config;

/// Split a user-supplied `a/b/c` path.
pub fn parse_path(text: &str) -> Vec<String> {
    text.split('/')
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

/// Open the client (and cloud, if configured) and load the client blob.
pub async fn open(config: &Config, cloud_override: bool) -> Result<Hoarder> {
    let client = Arc::new(LocalStore::new(&config.client_dir));
    let mut hoarder = Hoarder::new(client, config.client_key.clone());
    if let Some(cloud_dir) = &config.cloud_dir {
        hoarder.set_cloud_store(Arc::new(LocalStore::new(cloud_dir)));
    }

    match hoarder.load_client().await {
        Ok(true) => {}
        Ok(false) => info!("starting a new hoard in {}", config.client_dir.display()),
        Err(err) => warn!("{err}; starting with an empty hoard"),
    }

    if cloud_override || hoarder.cloud_path().is_none() {
        hoarder.set_cloud_path(config.cloud_path.clone());
    }
    Ok(hoarder)
}

/// Print the tree below `path`.
pub fn show(hoarder: &Hoarder, path: &[String]) -> Result<()> {
    let node = hoarder
        .hoard()
        .node_at(path)
        .with_context(|| format!("nothing at '{}'", path.join("/")))?;
    let mut out = String::new();
    render(node, path.last().map(String::as_str).unwrap_or("/"), 0, &mut out);
    print!("{out}");
    Ok(())
}

fn render(node: &Node, name: &str, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    out.push_str(&indent);
    out.push_str(name);
    if node.value.is_some() {
        out.push_str(" = ****");
    }
    if let Some(alarm) = node.alarm.filter(|a| !a.is_expired()) {
        out.push_str(&format!(" [alarm {}]", alarm.due));
    }
    if let Some(c) = &node.constraints {
        out.push_str(&format!(" [{} of {}]", c.size, c.chars));
    }
    out.push('\n');
    node.each_child(|child_name, child| {
        render(child, child_name, depth + 1, out);
        None::<()>
    });
}

/// Build an action from command-line pieces and play it locally.
pub async fn play(
    hoarder: &mut Hoarder,
    code: &str,
    path: &str,
    data: Option<&str>,
    json: bool,
    autocreate: bool,
) -> Result<()> {
    let data = match data {
        Some(text) if json => Some(serde_json::from_str::<Value>(text).context("data is not JSON")?),
        Some(text) => Some(Value::String(text.to_string())),
        None => None,
    };
    let action = Action::from_parts(code, parse_path(path), None, data)?;
    if let Err(conflict) = hoarder.play_action(&action, autocreate) {
        bail!("{}: {}", action.verbose(&English), conflict.message());
    }
    println!("{}", action.verbose(&English));
    hoarder.save_client().await?;
    Ok(())
}

pub async fn undo(hoarder: &mut Hoarder) -> Result<()> {
    let undone = hoarder.undo()?;
    println!("Undid: {}", undone.verbose(&English));
    hoarder.save_client().await?;
    Ok(())
}

/// List local actions not yet pushed to the cloud.
pub fn changes(hoarder: &Hoarder, max: usize) {
    let pending: Vec<_> = hoarder
        .hoard()
        .history()
        .iter()
        .filter(|entry| entry.redo.time() > hoarder.last_sync())
        .collect();
    if pending.is_empty() {
        println!("No unsynced changes");
        return;
    }
    for entry in pending.iter().take(max) {
        println!("{}", entry.redo.verbose(&English));
    }
    if pending.len() > max {
        println!("... and {} more", pending.len() - max);
    }
}

/// Prints each merged action.
struct PrintPlayer;

#[async_trait]
impl UiPlayer for PrintPlayer {
    async fn play(&self, action: &Action) -> Result<()> {
        println!("  {}", action.verbose(&English));
        Ok(())
    }
}

pub async fn sync(hoarder: &mut Hoarder) -> Result<()> {
    let report = hoarder
        .save_stores(SaveOptions {
            ui_player: Some(&PrintPlayer),
            progress: &TracingProgress,
            force_cloud: true,
            ..Default::default()
        })
        .await;

    for conflict in &report.conflicts {
        println!("Conflict: {}: {}", conflict.action.verbose(&English), conflict.message());
    }
    if !report.is_success() {
        bail!("sync incomplete: {}", report.errors.join("; "));
    }
    println!(
        "Synced: {} merged, {} conflicts",
        report.merged,
        report.conflicts.len()
    );
    Ok(())
}

pub async fn alarms(hoarder: &mut Hoarder) -> Result<()> {
    let fired = hoarder
        .check_alarms(|path, due| {
            println!("Reminder: '{}' (due {due})", join_path(&path));
            futures::future::ready(())
        })
        .await;
    if fired == 0 {
        println!("No reminders due");
        return Ok(());
    }
    hoarder.save_client().await?;
    Ok(())
}

/// Print the minimal stream that rebuilds the client tree.
pub fn compact(hoarder: &Hoarder) -> Result<()> {
    let actions = hoarder.hoard().actions_to_recreate();
    println!("{}", serde_json::to_string_pretty(&actions)?);
    Ok(())
}
