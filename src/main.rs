use anyhow::{Context, Result};
use indicatif::ProgressBar;
use nodeline::cli::commands::{GenerateCommand, HistoryCommand, ValidateCommand};
use nodeline::cli::output::*;
use nodeline::cli::{Cli, Command};
use nodeline::core::RunId;
use nodeline::execution::{Confirmation, ConsoleConfirmation};
use nodeline::persistence::SqliteStore;
use nodeline::{
    ExecutionEngine, ExecutionEvent, ExecutorRegistry, Ledger, PersistenceBackend,
    PipelineConfig, PipelineError, RunOutcome, Settings,
};
use std::sync::{Arc, Mutex};
use tracing::{debug, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(log_level.to_string().to_lowercase())),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    let settings = Settings::from_env();
    debug!("Settings: {:?}", settings);

    match &cli.command {
        Command::Generate(cmd) => generate(cmd, settings).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::History(cmd) => show_history(cmd, &settings).await?,
    }

    Ok(())
}

async fn open_store(settings: &Settings) -> Result<Arc<dyn PersistenceBackend>> {
    let path = settings.database_path()?;
    debug!("Using database {}", path.display());
    Ok(Arc::new(SqliteStore::new(&path).await?))
}

/// Keeps the confirmation prompt readable while the progress bar ticks
struct SuspendingConfirmation {
    progress: ProgressBar,
    inner: ConsoleConfirmation,
}

impl Confirmation for SuspendingConfirmation {
    fn confirm(&self, prompt: &str) -> bool {
        self.progress.suspend(|| self.inner.confirm(prompt))
    }
}

async fn generate(cmd: &GenerateCommand, mut settings: Settings) -> Result<()> {
    if cmd.no_cache {
        settings.enable_cache = false;
    }

    let config = match &cmd.config {
        Some(path) if !cmd.retry && cmd.resume.is_none() => {
            let mut config =
                PipelineConfig::from_file(path).context("Failed to load pipeline config")?;
            if let Some(n) = cmd.pause_after {
                if config.truncate(n) {
                    println!("{} Pausing after step {}", INFO, style(n).bold());
                }
            }
            Some(config)
        }
        _ => None,
    };

    let store = open_store(&settings).await?;
    let progress = create_progress_bar(0);

    let mut engine = ExecutionEngine::new(store, ExecutorRegistry::with_builtins())
        .with_settings(settings)
        .with_confirmation(Arc::new(SuspendingConfirmation {
            progress: progress.clone(),
            inner: ConsoleConfirmation::new(),
        }));

    // Remember the run so a failure can point at it
    let current_run: Arc<Mutex<Option<RunId>>> = Arc::new(Mutex::new(None));
    let seen_run = current_run.clone();
    let bar = progress.clone();
    engine.add_event_handler(move |event| {
        match &event {
            ExecutionEvent::RunStarted { run_id, steps } => {
                if let Ok(mut current) = seen_run.lock() {
                    *current = Some(*run_id);
                }
                bar.set_length(*steps as u64);
                bar.set_position(0);
            }
            ExecutionEvent::RunResumed {
                run_id, position, ..
            } => {
                if let Ok(mut current) = seen_run.lock() {
                    *current = Some(*run_id);
                }
                bar.set_position(*position as u64);
            }
            ExecutionEvent::StepStarted { step, total, .. } => {
                bar.set_length(*total as u64);
                bar.set_message(step.clone());
            }
            _ => {}
        }
        if completes_step(&event) {
            bar.inc(1);
        }
        let line = format_event(&event);
        bar.suspend(|| println!("{}", line));
    });

    let interrupt = engine.interrupt_flag();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            interrupt.raise();
        }
    });

    let batch_size = cmd.batch_size();
    let result = match (config, cmd.resume) {
        (Some(config), _) => engine.execute(&config, batch_size).await,
        (None, Some(run_id)) => engine.resume(run_id, batch_size).await,
        (None, None) => engine.retry(batch_size).await,
    };
    progress.finish_and_clear();

    match result {
        Ok(RunOutcome::Finished { run_id, nodes }) => {
            println!(
                "\n{} Run {} finished: {} nodes written",
                CHECK,
                style(run_id).dim(),
                style(nodes.len()).bold()
            );
            Ok(())
        }
        Ok(RunOutcome::Stopped { run_id }) => {
            println!("\n{} Run {} stopped", WARN, style(run_id).dim());
            Ok(())
        }
        Err(e) => {
            report_failure(&e, *current_run.lock().unwrap_or_else(|p| p.into_inner()));
            std::process::exit(1);
        }
    }
}

fn report_failure(err: &PipelineError, run_id: Option<RunId>) {
    eprintln!("\n{} {}", CROSS, style(err).red());
    if err.is_validation() {
        return;
    }
    if let Some(run_id) = run_id {
        eprintln!(
            "{} Run {} can be resumed with `nodeline generate --resume {}`",
            INFO,
            style(run_id).dim(),
            run_id
        );
    }
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    let registry = ExecutorRegistry::with_builtins();
    let result = PipelineConfig::from_file(&cmd.config)
        .map_err(|e| format!("{:#}", e))
        .and_then(|config| {
            registry
                .validate(&config)
                .map(|_| config)
                .map_err(|e| e.to_string())
        });

    if cmd.json {
        let report = match &result {
            Ok(config) => serde_json::json!({
                "valid": true,
                "steps": config.pipeline.iter().map(|s| s.name()).collect::<Vec<_>>(),
            }),
            Err(e) => serde_json::json!({ "valid": false, "error": e }),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    match result {
        Ok(config) => {
            if !cmd.json {
                println!("{} Pipeline is valid", CHECK);
                for (i, step) in config.pipeline.iter().enumerate() {
                    println!(
                        "  {:>2}. {} [{}/{}]",
                        i + 1,
                        style(step.name()).bold(),
                        step.step_type,
                        step.method
                    );
                }
            }
            Ok(())
        }
        Err(e) => {
            if !cmd.json {
                eprintln!("{} Invalid pipeline: {}", CROSS, style(e).red());
            }
            std::process::exit(1);
        }
    }
}

async fn show_history(cmd: &HistoryCommand, settings: &Settings) -> Result<()> {
    let ledger = Ledger::new(open_store(settings).await?);

    if let Some(run_id) = cmd.run_id {
        let run = ledger.load_run(run_id).await?;
        let steps = ledger.steps(run_id).await?;
        if cmd.json {
            let report = serde_json::json!({ "run": run, "steps": steps });
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }

        println!(
            "{} Run {} - {} - created {}",
            INFO,
            style(run.id).bold(),
            format_run_status(run.status),
            run.created_at.format("%Y-%m-%d %H:%M:%S")
        );
        for step in &steps {
            println!("{}", format_step(step));
        }
        return Ok(());
    }

    let summaries = ledger.summaries(cmd.limit).await?;
    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    if summaries.is_empty() {
        println!("{} No runs recorded yet", INFO);
        return Ok(());
    }
    for summary in &summaries {
        println!("{}", format_run_summary(summary));
    }
    Ok(())
}
