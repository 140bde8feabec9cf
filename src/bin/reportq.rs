//! reportq CLI: run the report worker, or submit survey responses.

use clap::{Parser, Subcommand};
use reportq::backend::{JobQueue as _, PgLockBackend, PgmqJobQueue};
use reportq::config::Config;
use reportq::config::secrets::ExposeSecret;
use reportq::db::Db;
use reportq::engine::{
    CoordinatorConfig, ProcessSupervisor, SubmissionCoordinator, WorkerConfig, WorkerLoop,
};
use reportq::model::{SubmissionEvent, SurveyId};
use reportq::report::SimulatedReportGenerator;
use reportq::telemetry::{TelemetryConfig, init_telemetry};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Parser)]
#[command(name = "reportq", about = "Coalesced survey report jobs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the report worker until SIGINT/SIGTERM
    Serve,
    /// Submit a survey response, scheduling a report unless one is pending
    Submit {
        /// Survey the response belongs to
        survey_id: String,
        /// Answers as a JSON document
        #[arg(long)]
        answers: Option<String>,
    },
    /// Release a survey's coalescing lock so the next submission schedules a report
    Release {
        /// Survey whose window to reopen
        survey_id: String,
    },
}

impl Command {
    /// Resource role reported in telemetry.
    fn role(&self) -> &'static str {
        match self {
            Command::Serve => "serve",
            Command::Submit { .. } => "submit",
            Command::Release { .. } => "release",
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(
        TelemetryConfig::new("reportq", cli.command.role())
            .endpoint(config.otel_endpoint.clone())
            .log_level(config.log_level.clone()),
    )?;

    let db = Arc::new(Db::connect(config.database_url.expose_secret()).await?);
    db.migrate().await?;

    let queue = Arc::new(PgmqJobQueue::new(
        Arc::clone(&db),
        config.queue_name.clone(),
        config.visibility_timeout,
        config.poll_interval,
    ));
    queue.declare().await?;

    let coordinator = SubmissionCoordinator::new(
        Arc::new(PgLockBackend::new(Arc::clone(&db))),
        queue.clone(),
        CoordinatorConfig {
            lock_ttl: config.lock_ttl,
            lock_prefix: config.lock_prefix.clone(),
        },
    );

    let result = match cli.command {
        Command::Serve => cmd_serve(&config, queue.clone()).await,
        Command::Submit { survey_id, answers } => {
            cmd_submit(&coordinator, survey_id, answers).await
        }
        Command::Release { survey_id } => cmd_release(&coordinator, survey_id).await,
    };

    db.close().await;
    result
}

async fn cmd_serve(config: &Config, queue: Arc<PgmqJobQueue>) -> anyhow::Result<()> {
    let root = CancellationToken::new();

    let signal_token = root.clone();
    tokio::spawn(async move {
        match wait_for_shutdown_signal().await {
            Ok(()) => info!("shutdown signal received"),
            Err(e) => error!(error = %e, "failed to listen for shutdown signals"),
        }
        signal_token.cancel();
    });

    let worker = WorkerLoop::new(
        queue.clone(),
        Arc::new(SimulatedReportGenerator::new(config.report_work)),
        WorkerConfig {
            retry_interval: config.poll_interval,
        },
    );
    let mut handle = ProcessSupervisor::new(worker).start(&root);

    handle.exited().await;
    info!("shutting down");
    let stopped = handle.stop().await;

    queue.close().await?;
    stopped?;
    info!("shutdown complete");
    Ok(())
}

async fn cmd_submit(
    coordinator: &SubmissionCoordinator,
    survey_id: String,
    answers: Option<String>,
) -> anyhow::Result<()> {
    let answers: serde_json::Value = match answers {
        Some(json) => serde_json::from_str(&json)?,
        None => serde_json::json!({}),
    };

    let event = SubmissionEvent::new(survey_id.parse::<SurveyId>()?).answers(answers);
    let outcome = coordinator
        .submit(&event)
        .await
        .map_err(|e| anyhow::anyhow!("could not schedule report job: {e}"))?;
    debug!(%outcome, "submission handled");

    // Coalesced and scheduled submissions look the same to the submitter.
    println!("Response submitted: {}", event.id);
    Ok(())
}

async fn cmd_release(coordinator: &SubmissionCoordinator, survey_id: String) -> anyhow::Result<()> {
    let survey_id: SurveyId = survey_id.parse()?;
    if coordinator.reopen_window(&survey_id).await? {
        println!("Released lock for survey {survey_id}");
    } else {
        println!("No live lock for survey {survey_id}");
    }
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = sigterm.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
