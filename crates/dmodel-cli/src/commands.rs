use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use colored::Colorize;
use serde_json::{json, Value};

use dmodel_cache::ProxyNode;
use dmodel_client::ClientError;
use dmodel_loader::{EventFilter, LazyTreeLoader, LoaderConfig, TreeEvent, TreeEventKind};
use dmodel_protocol::ObjectDescriptor;
use dmodel_types::{attributes, ExecutionState, PathAddress};

use crate::cli::*;
use crate::sim::{self, Session, THREADS};

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => LoaderConfig::load(path)?,
        None => LoaderConfig::default(),
    };
    let format = cli.format;
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        match cli.command {
            Command::Tree(args) => cmd_tree(args, config, format).await,
            Command::Attrs(args) => cmd_attrs(args, config, format).await,
            Command::Interrupt(args) => cmd_interrupt(args, config, format).await,
            Command::Step(args) => cmd_step(args, config, format).await,
            Command::Demo(_) => cmd_demo(config, format).await,
        }
    })
}

async fn cmd_tree(args: TreeArgs, mut config: LoaderConfig, format: OutputFormat) -> anyhow::Result<()> {
    if let Some(depth) = args.depth {
        config.load_all_max_depth = depth;
    }
    let session = Session::start(config)?;
    let path = args.path.unwrap_or_default();
    let node = session.loader.resolve(&path).await?;
    let expanded = session.loader.load_all(&node).await?;

    match format {
        OutputFormat::Text => {
            println!("{}", node.path().to_string().yellow().bold());
            print_tree(&session.loader, &node, 1)?;
            println!("\n{} nodes expanded", expanded.to_string().bold());
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&tree_json(&session.loader, &node)?)?);
        }
    }
    Ok(())
}

async fn cmd_attrs(args: AttrsArgs, config: LoaderConfig, format: OutputFormat) -> anyhow::Result<()> {
    let session = Session::start(config)?;
    let node = session.loader.resolve(&args.path).await?;
    let attrs = session.client.list_attributes(&node).await?;
    let shown: Vec<_> = attrs
        .iter()
        .filter(|(name, _)| args.all || !attributes::is_invisible(name))
        .collect();

    match format {
        OutputFormat::Text => {
            println!("Attributes of {}", node.path().to_string().yellow());
            if shown.is_empty() {
                println!("  {}", "(none)".dimmed());
            }
            for (name, value) in shown {
                println!("  {} = {}", name.bold(), value);
            }
        }
        OutputFormat::Json => {
            let map: serde_json::Map<String, Value> = shown
                .into_iter()
                .map(|(name, value)| (name.clone(), value.to_json()))
                .collect();
            println!("{}", serde_json::to_string_pretty(&Value::Object(map))?);
        }
    }
    Ok(())
}

async fn cmd_interrupt(args: TargetArgs, config: LoaderConfig, format: OutputFormat) -> anyhow::Result<()> {
    let session = Session::start(config)?;
    let node = session.loader.resolve(&args.path).await?;
    session.client.interrupt(&node).await?;
    let state = current_state(&session, &node).await?;
    report_command(&format, "Interrupted", &node, state, None)
}

async fn cmd_step(args: StepArgs, config: LoaderConfig, format: OutputFormat) -> anyhow::Result<()> {
    let session = Session::start(config)?;
    let node = session.loader.resolve(&args.path).await?;
    session.client.step(&node, args.kind).await?;
    let state = current_state(&session, &node).await?;
    report_command(&format, "Stepped", &node, state, Some(args.kind.name()))
}

async fn cmd_demo(config: LoaderConfig, format: OutputFormat) -> anyhow::Result<()> {
    let session = Session::start(config)?;
    let loader = &session.loader;
    let mut events = loader.subscribe(EventFilter {
        kinds: Some(vec![TreeEventKind::ChildrenChanged, TreeEventKind::NodeInvalidated]),
        ..Default::default()
    });
    let watcher = loader.watch_changes(session.client.subscribe_changes());

    let threads_path = PathAddress::new(["1234", THREADS]);
    let threads = loader.resolve(&threads_path).await?;
    let before = loader.expand(&threads).await?;
    loader.mark_visible(&threads)?;
    let main_thread = Arc::clone(before.get("0x1a0").context("thread 0x1a0 missing")?);
    let doomed = Arc::clone(before.get("0x1a4").context("thread 0x1a4 missing")?);
    let before_keys = before.keys();

    // The engine renames one thread, loses another, and starts a third.
    session
        .provider
        .insert(&threads_path, sim::thread(0x1a0).with_display("Thread 0x1a0 (main)"))?;
    session.provider.remove(&threads_path.child(doomed.key()))?;
    session.provider.insert(&threads_path, sim::thread(0x1a8))?;
    session.engine.notify_changed(threads_path.clone()).await?;

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(TreeEvent::ChildrenChanged { path, .. }) if path == threads_path => return Ok(()),
                Ok(_) => continue,
                Err(e) => return Err(e),
            }
        }
    })
    .await
    .context("no refresh after change notification")??;

    let after = loader
        .get_cached(&threads)?
        .context("threads listing missing after refresh")?;
    let reused = after
        .get("0x1a0")
        .is_some_and(|n| Arc::ptr_eq(n, &main_thread));
    let stale_interrupt = session.client.interrupt(&doomed).await;

    let mut log = Vec::new();
    while let Ok(event) = events.try_recv() {
        log.push(describe(&event));
    }
    watcher.abort();

    let after_keys = after.keys();
    match format {
        OutputFormat::Text => {
            println!("{} {}", "Threads before:".bold(), join(&before_keys));
            println!("{} {}", "Threads after: ".bold(), join(&after_keys));
            println!(
                "  0x1a0 identity {}; now displayed as {}",
                if reused { "preserved".green() } else { "lost".red() },
                main_thread.display_name().cyan()
            );
            println!(
                "  0x1a4 {}",
                if doomed.is_valid() { "still valid".red() } else { "invalidated".green() }
            );
            match &stale_interrupt {
                Err(ClientError::InvalidatedTarget { path }) => {
                    println!("  interrupt {} refused: {}", path.to_string().yellow(), "invalidated target".green())
                }
                other => println!("  interrupt of 0x1a4 returned {other:?}"),
            }
            println!("{}", "Events:".bold());
            for line in &log {
                println!("  {line}");
            }
        }
        OutputFormat::Json => {
            let summary = json!({
                "before": before_keys.iter().map(|k| k.as_str()).collect::<Vec<_>>(),
                "after": after_keys.iter().map(|k| k.as_str()).collect::<Vec<_>>(),
                "identity_preserved": reused,
                "renamed_to": main_thread.display_name(),
                "invalidated": !doomed.is_valid(),
                "stale_interrupt": match &stale_interrupt {
                    Ok(()) => Value::Null,
                    Err(e) => Value::String(e.to_string()),
                },
                "events": log,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }
    session.engine.shutdown();
    Ok(())
}

fn print_tree(loader: &LazyTreeLoader, node: &Arc<ProxyNode>, indent: usize) -> anyhow::Result<()> {
    let Some(snapshot) = loader.get_cached(node)? else {
        return Ok(());
    };
    for child in snapshot.children() {
        let object = child.object();
        let kind = ObjectDescriptor::downcast(object.as_ref()).map_or("?", |d| d.kind.as_str());
        let caps = child.capabilities();
        let caps = if caps.is_empty() {
            String::new()
        } else {
            format!(" {{{caps}}}")
        };
        println!(
            "{}{} {}{}",
            "  ".repeat(indent),
            child.display_name().bold(),
            format!("[{kind} {}]", child.key()).dimmed(),
            caps.blue()
        );
        print_tree(loader, child, indent + 1)?;
    }
    Ok(())
}

fn tree_json(loader: &LazyTreeLoader, node: &Arc<ProxyNode>) -> anyhow::Result<Value> {
    let object = node.object();
    let kind = ObjectDescriptor::downcast(object.as_ref()).map(|d| d.kind.clone());
    let children = match loader.get_cached(node)? {
        Some(snapshot) => Value::Array(
            snapshot
                .children()
                .iter()
                .map(|child| tree_json(loader, child))
                .collect::<anyhow::Result<Vec<_>>>()?,
        ),
        None => Value::Null,
    };
    Ok(json!({
        "path": node.path().to_string(),
        "key": node.key().as_str(),
        "kind": kind,
        "display": node.display_name(),
        "capabilities": node.capabilities().iter().map(|c| c.name()).collect::<Vec<_>>(),
        "children": children,
    }))
}

async fn current_state(session: &Session, node: &ProxyNode) -> anyhow::Result<Option<ExecutionState>> {
    let attrs = session.client.list_attributes(node).await?;
    Ok(ExecutionState::from_attributes(&attrs))
}

fn report_command(
    format: &OutputFormat,
    verb: &str,
    node: &ProxyNode,
    state: Option<ExecutionState>,
    kind: Option<&str>,
) -> anyhow::Result<()> {
    let state = state.map_or_else(|| "unknown".to_string(), |s| s.to_string());
    match format {
        OutputFormat::Text => {
            let how = kind.map(|k| format!(" ({k})")).unwrap_or_default();
            println!(
                "{} {} {}{} — state: {}",
                "✓".green().bold(),
                verb,
                node.path().to_string().yellow(),
                how,
                state.cyan()
            );
        }
        OutputFormat::Json => {
            let report = json!({
                "path": node.path().to_string(),
                "command": verb.to_lowercase(),
                "kind": kind,
                "state": state,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

fn describe(event: &TreeEvent) -> String {
    match event {
        TreeEvent::ChildrenChanged {
            path,
            generation,
            created,
            removed,
            ..
        } => format!(
            "children of {path} committed (generation {generation}, {created} created, {} removed)",
            removed.len()
        ),
        TreeEvent::NodeInvalidated { path } => format!("{path} invalidated"),
        TreeEvent::VisibilityChanged { path, visible } => {
            format!("{path} {}", if *visible { "visible" } else { "hidden" })
        }
    }
}

fn join(keys: &[dmodel_types::SearchKey]) -> String {
    keys.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(", ")
}
