use anyhow::{Context, Result};
use protorun::cli::commands::{ExpandCommand, RunCommand, StatusCommand, ValidateCommand};
use protorun::cli::output::*;
use protorun::cli::{Cli, Command};
use protorun::core::config::{CheckpointBackend, RunConfig};
use protorun::core::{expand, Pipeline, PipelineBuilder};
use protorun::execution::{build_dispatcher, FsWorkspace, RunController, RunOptions};
use protorun::persistence::{open_store, CheckpointEntry, CheckpointStore, RunLock};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    // Execute command
    match &cli.command {
        Command::Run(cmd) => run_protocol(cmd).await?,
        Command::Validate(cmd) => validate_config(cmd)?,
        Command::Status(cmd) => show_status(cmd).await?,
        Command::Expand(cmd) => expand_notation(cmd)?,
    }

    Ok(())
}

fn load(file: &str, overrides: &[(String, String)]) -> Result<(RunConfig, Pipeline)> {
    let config = RunConfig::load(file, overrides).context("Failed to load run configuration")?;
    let pipeline = PipelineBuilder::new(&config)
        .build()
        .context("Failed to build pipeline")?;
    Ok((config, pipeline))
}

/// Files in the working directory that a fresh-start reset must keep
fn preserved_paths(config: &RunConfig) -> Vec<PathBuf> {
    let mut paths = vec![RunLock::path_for(&config.working_dir, &config.run_name)];
    if config.checkpoint_backend == CheckpointBackend::Sqlite {
        let db = config.checkpoint_path().display().to_string();
        for suffix in ["", "-wal", "-shm"] {
            paths.push(PathBuf::from(format!("{}{}", db, suffix)));
        }
    }
    paths
}

async fn run_protocol(cmd: &RunCommand) -> Result<()> {
    let mut config =
        RunConfig::load(&cmd.file, &cmd.set).context("Failed to load run configuration")?;
    if let Some(mode) = cmd.resume.mode() {
        config.resume = mode;
        config.continue_at_iteration = None;
        config.validate().context("Invalid resume selection")?;
    }

    println!(
        "{} Loaded run: {} ({})",
        INFO,
        style(&config.run_name).bold(),
        style(config.protocol.as_protocol().kind()).cyan()
    );
    if let Some(comment) = &config.comment {
        println!("  {}", style(comment).dim());
    }

    let mut pipeline = PipelineBuilder::new(&config)
        .build()
        .context("Failed to build pipeline")?;

    let store = open_store(&config)
        .await
        .context("Failed to open checkpoint store")?;
    let dispatcher = build_dispatcher(&config.dispatch, &config.working_dir.join("jobs"));
    let workspace = preserved_paths(&config)
        .into_iter()
        .fold(FsWorkspace::new(&config.working_dir), |ws, path| ws.preserve(path));

    let mut controller = RunController::new(dispatcher, store)
        .with_workspace(Arc::new(workspace))
        .with_lock(&config.working_dir);

    // Set up event handler for console output
    let progress = (!cmd.no_progress).then(|| create_progress_bar(pipeline.len()));
    let bar = progress.clone();
    controller.add_event_handler(move |event| {
        let line = format_execution_event(&event);
        match &bar {
            Some(bar) => {
                match &event {
                    protorun::ExecutionEvent::ResumeResolved { skipped, .. } => {
                        bar.set_position(*skipped as u64)
                    }
                    protorun::ExecutionEvent::StepStarted { step, .. } => bar.set_message(step.clone()),
                    protorun::ExecutionEvent::StepCompleted { .. } => bar.inc(1),
                    _ => {}
                }
                bar.println(line);
            }
            None => println!("{}", line),
        }
    });

    let options = RunOptions::from_config(&config)?;
    println!();
    let result = controller.run(&mut pipeline, &options).await;
    if let Some(bar) = &progress {
        bar.finish_and_clear();
    }

    match result {
        Ok(report) => {
            println!(
                "\n{} {} completed {} ({} executed, {} already done)",
                CHECK,
                style(&report.run_name).bold(),
                style("successfully").green(),
                report.executed_steps.len(),
                report.skipped_steps
            );
            Ok(())
        }
        Err(e) => {
            println!(
                "\n{} {} {}",
                CROSS,
                style(&pipeline.run_name).bold(),
                style("failed").red()
            );
            error!("{}", e);
            std::process::exit(1);
        }
    }
}

fn validate_config(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating run configuration...", INFO);

    match load(&cmd.file, &cmd.set) {
        Ok((config, pipeline)) => {
            println!("{} Run configuration is valid!", CHECK);
            println!("  Run: {}", style(&config.run_name).bold());
            println!("  Protocol: {}", style(&pipeline.protocol).cyan());
            println!("  Iterations: {}", style(pipeline.iterations).cyan());
            println!("  Steps: {}", style(pipeline.len()).cyan());

            if cmd.json {
                let data = serde_json::json!({
                    "run_name": pipeline.run_name,
                    "protocol": pipeline.protocol,
                    "iterations": pipeline.iterations,
                    "steps": pipeline.steps,
                });
                println!("\n{}", serde_json::to_string_pretty(&data)?);
            } else {
                for step in &pipeline.steps {
                    println!("  {:>4}  {}", step.position, step.name);
                }
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}

async fn show_status(cmd: &StatusCommand) -> Result<()> {
    let (config, pipeline) = load(&cmd.file, &cmd.set)?;
    let store = open_store(&config)
        .await
        .context("Failed to open checkpoint store")?;

    let entries = match store.entries().await {
        Ok(entries) => entries,
        Err(e) => {
            println!("{} {}", WARN, style(e).yellow());
            println!("  Run with --fresh to discard the checkpoint log");
            std::process::exit(1);
        }
    };
    let latest = store.latest_completed_iteration().await?;
    let by_step: HashMap<&str, &CheckpointEntry> =
        entries.iter().map(|e| (e.step.as_str(), e)).collect();
    let next = pipeline
        .steps
        .iter()
        .find(|s| !by_step.contains_key(s.name.as_str()));

    if cmd.json {
        let data = serde_json::json!({
            "run_name": pipeline.run_name,
            "completed_steps": entries.len(),
            "total_steps": pipeline.len(),
            "latest_completed_iteration": latest,
            "next_step": next.map(|s| s.name.clone()),
            "entries": entries,
        });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    println!(
        "{} {} - {}/{} steps checkpointed, latest iteration {}",
        INFO,
        style(&pipeline.run_name).bold(),
        style(entries.len()).cyan(),
        pipeline.len(),
        style(latest).cyan()
    );
    for step in &pipeline.steps {
        println!("  {}", format_step_line(step, by_step.get(step.name.as_str()).copied()));
    }
    match next {
        Some(step) => println!("\n{} Next step: {}", INFO, style(&step.name).cyan()),
        None => println!("\n{} All steps complete", CHECK),
    }

    Ok(())
}

fn expand_notation(cmd: &ExpandCommand) -> Result<()> {
    let table = expand(&cmd.tokens, cmd.iterations)
        .with_context(|| format!("Cannot expand '{}'", cmd.tokens))?;
    for (i, value) in table.values().iter().enumerate() {
        println!("{:>4}  {}", i + 1, value);
    }
    Ok(())
}
