//! bte CLI - behavior tree editor core.
//!
//! - `bte demo` - scripted editing session against a live tree
//! - `bte check-config <path>` - validate an editor configuration file

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use bte_model::{ChangeListener, EditorConfig, Model, ModelTree, NodeId, NodeKind};
use bte_runtime::{BbKey, Flag, Succeed, SubtreeLibrary, TaskTemplate, TaskTree, Wait};

const DOOR_OPEN: BbKey<bool> = BbKey::new(1);

#[derive(Parser)]
#[command(name = "bte")]
#[command(about = "Behavior tree editor core", version)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scripted editing session and print the tree after each edit
    Demo {
        /// Editor configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Steps to run between edits
        #[arg(long, default_value_t = 2)]
        steps: u32,
    },

    /// Validate an editor configuration file
    CheckConfig {
        path: PathBuf,

        /// Print the resolved configuration as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let subscriber = fmt().with_env_filter(filter).with_target(false);
    if cli.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    match cli.command {
        Commands::Demo { config, steps } => run_demo(config.as_deref(), steps),
        Commands::CheckConfig { path, json } => check_config(&path, json),
    }
}

/// Logs every model notification.
struct EventLog;

impl ChangeListener for EventLog {
    fn on_init(&mut self, model: &ModelTree) {
        tracing::info!(nodes = model.len(), "tree loaded");
    }

    fn on_reset(&mut self, _model: &ModelTree) {
        tracing::info!("tree unloaded");
    }

    fn on_change(&mut self, model: &ModelTree) {
        tracing::debug!(valid = model.cached_valid(), "tree changed");
    }
}

fn run_demo(config_path: Option<&Path>, steps: u32) -> Result<()> {
    let config = match config_path {
        Some(path) => EditorConfig::load(path)?,
        None => EditorConfig::default(),
    };
    config.check()?;

    let mut subtrees = SubtreeLibrary::new();
    subtrees.register(
        "patrol",
        TaskTemplate::sequence(vec![TaskTemplate::leaf(Wait::new(1)), TaskTemplate::leaf(Succeed)]),
    );

    let mut model = Model::with_config(config).with_subtrees(subtrees);
    model.subscribe(Box::new(EventLog));
    model.init(TaskTree::from_template(&TaskTemplate::selector(vec![
        TaskTemplate::sequence(vec![
            TaskTemplate::leaf(Flag::new(DOOR_OPEN)),
            TaskTemplate::leaf(Wait::new(2)),
        ]),
        TaskTemplate::include("patrol"),
    ])));
    model.blackboard_mut().set(DOOR_OPEN, true);

    let selector = first_child(&model, model.root())?;
    let enter = first_child(&model, selector)?;
    show(&mut model, "loaded", steps);

    // Wrap the entry sequence in a Guard: condition first, guarded task second.
    let guard = model.instantiate_guard();
    model.add_before(guard, enter)?;
    model.move_to(enter, guard)?;
    show(&mut model, "guard with one child", steps);

    let condition = model.instantiate("Success")?;
    model.add_at(condition, guard, 0)?;
    model.set_comment(condition, Some("always open".into()))?;
    show(&mut model, "guard complete", steps);

    let invert = model.instantiate("Invert")?;
    model.add(invert, selector)?;
    show(&mut model, "empty decorator", steps);

    let fail = model.instantiate("Failure")?;
    model.add(fail, invert)?;
    show(&mut model, "decorator filled", steps);

    model.remove(condition)?;
    show(&mut model, "guard condition removed", steps);

    model.undo();
    show(&mut model, "undo", steps);
    model.undo();
    model.undo();
    show(&mut model, "undo x2", steps);
    model.redo();
    show(&mut model, "redo", steps);

    println!("History ({} applied):", model.history().applied());
    for (i, command) in model.history().commands().iter().enumerate() {
        let marker = if i < model.history().applied() { ' ' } else { '~' };
        println!("  {marker} {command}");
    }
    println!("Integrity: {}", model.integrity());

    if let Some(tree) = model.reset() {
        tracing::info!(tasks = tree.task_count(), "session closed");
    }
    Ok(())
}

fn first_child(model: &Model, node: NodeId) -> Result<NodeId> {
    model
        .node(node)
        .and_then(|n| n.child(0))
        .with_context(|| format!("node {node} has no children"))
}

fn show(model: &mut Model, title: &str, steps: u32) {
    let valid = model.is_valid();
    let statuses: Vec<String> = (0..steps)
        .filter_map(|_| model.update())
        .map(|status| format!("{status:?}"))
        .collect();

    println!("== {title} ({})", if valid { "valid" } else { "invalid" });
    print_node(model, model.root(), 0);
    if statuses.is_empty() {
        println!("   steps: skipped");
    } else {
        println!("   steps: {}", statuses.join(" -> "));
    }
    println!();
}

fn print_node(model: &Model, id: NodeId, depth: usize) {
    let Some(node) = model.node(id) else {
        return;
    };
    let mut line = format!("{}{}", "  ".repeat(depth + 1), node.type_name());
    if node.kind() == NodeKind::Guard {
        line.push_str(" <guard>");
    }
    if let Some(status) = model.status(id) {
        line.push_str(&format!(" [{status:?}]"));
    }
    if !node.is_valid() {
        line.push_str(" !invalid");
    }
    if node.is_read_only() {
        line.push_str(" (read-only)");
    }
    let pending = node.pending().count();
    if pending > 0 {
        line.push_str(&format!(" +{pending} pending"));
    }
    if let Some(comment) = node.comment() {
        line.push_str(&format!(" # {comment}"));
    }
    println!("{line}");

    for child in node.children() {
        print_node(model, *child, depth + 1);
    }
    if let Some(guard) = node.guard().filter(|g| model.node(*g).is_some_and(|g| g.parent().is_none())) {
        print_node(model, guard, depth + 2);
    }
}

fn check_config(path: &Path, json: bool) -> Result<()> {
    let config = EditorConfig::load(path)?;
    config.check()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    println!("Config OK: {}", path.display());
    match config.history_limit {
        Some(limit) => println!("  history limit: {limit}"),
        None => println!("  history limit: unbounded"),
    }
    println!("  strict integrity: {}", config.strict_integrity);
    println!("  reset on edit: {}", config.reset_on_edit);
    for (type_name, bounds) in &config.constraints {
        println!("  {type_name}: {}", bounds.to_constraint());
    }
    Ok(())
}
