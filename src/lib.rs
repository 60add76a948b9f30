// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod schedule;
pub mod types;

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Result, anyhow};
use tokio::sync::oneshot;
use tokio::task::LocalSet;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::JobFile;
use crate::engine::{ChainCommand, Supervisor};
use crate::exec::display_command;
use crate::types::format_metadata;

/// Result of running a job to completion.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub success: bool,
    pub commands: Vec<ChainCommand>,
}

impl JobReport {
    /// First step that ran and did not succeed.
    pub fn failed_step(&self) -> Option<&ChainCommand> {
        self.commands.iter().find(|c| c.success == Some(false))
    }
}

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - job file loading
/// - a `Supervisor` on Tokio timers and real processes
/// - the job's steps as one `ProcessChain`
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let job_path = PathBuf::from(&args.job);
    let mut job = load_and_validate(&job_path)?;
    if let Some(secs) = args.timeout {
        job.apply_default_timeout(secs);
    }

    if args.dry_run {
        print_dry_run(&job);
        return Ok(());
    }

    // Tasks are `Rc`-based and ticked by `spawn_local`.
    let local = LocalSet::new();
    let report = local
        .run_until(async {
            let supervisor = Supervisor::tokio(job.job.capture);
            run_job(&supervisor, &job, |_, chunk| {
                let mut stdout = std::io::stdout().lock();
                let _ = stdout.write_all(chunk.as_bytes());
                let _ = stdout.flush();
            })
            .await
        })
        .await?;

    match report.failed_step() {
        None if report.success => {
            info!(job = %job.job.name, "job finished successfully");
            Ok(())
        }
        Some(step) => Err(anyhow!(
            "job '{}' failed at {} (exit code {})",
            job.job.name,
            step.label(),
            step.return_code.unwrap_or(-1)
        )),
        None => Err(anyhow!("job '{}' failed", job.job.name)),
    }
}

/// Run every step of `job` as one chain and wait for it to finish.
///
/// `on_output` receives each new chunk of output from the active step.
/// Ctrl-C kills every live task of `supervisor`, which ends the chain as
/// failed. Must be awaited inside a `LocalSet` when `supervisor` uses the
/// Tokio scheduler.
pub async fn run_job(
    supervisor: &Supervisor,
    job: &JobFile,
    mut on_output: impl FnMut(&ChainCommand, &str) + 'static,
) -> Result<JobReport> {
    let (done_tx, mut done_rx) = oneshot::channel::<bool>();

    let mut builder = supervisor
        .chain()
        .env(job.environment())
        .on_progress(move |progress| {
            if !progress.output.is_empty() {
                on_output(progress.command, progress.output);
            }
        })
        .on_completion(move |success| {
            let _ = done_tx.send(success);
        });
    for (key, value) in &job.job.tags {
        builder = builder.tag(key.clone(), value.clone());
    }
    let chain = builder.build();

    for step in job.chain_steps() {
        chain.add(step)?;
    }

    info!(
        job = %job.job.name,
        steps = chain.len(),
        tags = %format_metadata(&job.job.tags),
        "running job"
    );
    chain.start()?;

    let interrupted = tokio::select! {
        res = &mut done_rx => Some(res.unwrap_or(false)),
        sig = tokio::signal::ctrl_c() => {
            match sig {
                Ok(()) => {
                    let killed = supervisor.kill_all();
                    warn!(killed, "interrupted; killed running tasks");
                }
                Err(e) => warn!(error = %e, "failed to listen for Ctrl+C"),
            }
            None
        }
    };

    let success = match interrupted {
        Some(success) => success,
        None => done_rx.await.unwrap_or(false),
    };

    let commands = chain.commands();
    for command in &commands {
        debug!(
            step = command.index,
            name = %command.label(),
            started = command.started,
            exit_code = ?command.return_code,
            "step result"
        );
    }

    Ok(JobReport { success, commands })
}

/// Simple dry-run output: print job settings and steps.
fn print_dry_run(job: &JobFile) {
    println!("runwatch dry-run");
    println!("  job.name = {}", job.job.name);
    println!("  job.capture = {:?}", job.job.capture);
    println!("  job.inherit_env = {}", job.job.inherit_env);
    if let Some(ref exe) = job.job.executable {
        println!("  job.executable = {}", exe.display());
    }
    if !job.job.tags.is_empty() {
        println!("  job.tags = {}", format_metadata(&job.job.tags));
    }
    if !job.job.env.is_empty() {
        let mut keys: Vec<_> = job.job.env.keys().collect();
        keys.sort();
        println!("  job.env = {:?}", keys);
    }
    println!();

    println!("steps ({}):", job.steps.len());
    for (index, step) in job.steps.iter().enumerate() {
        match step.name {
            Some(ref name) => println!("  {}. {name}", index + 1),
            None => println!("  {}.", index + 1),
        }
        println!("      cmd: {}", display_command(&step.cmd));
        if step.timeout > 0 {
            println!("      timeout: {}s", step.timeout);
        }
        println!("      poll_frequency: {} Hz", step.poll_frequency);
    }

    debug!("dry-run complete (no execution)");
}
