//! Watch remote code-analysis jobs from the terminal.

mod render;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use analysis_stream::init_observability;
use analysis_stream::prelude::*;
use analysis_stream::wizard::{self, WizardAction, WizardState};
use clap::{Parser, Subcommand};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::render::{ViewPrinter, summary_lines};

#[derive(Parser)]
#[command(name = "analysis", about = "Follow code-analysis jobs as they run")]
struct Args {
    /// WebSocket base URL (overrides ANALYSIS_WS_URL)
    #[arg(long, global = true)]
    ws_url: Option<String>,

    /// HTTP base URL (overrides ANALYSIS_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stream progress of a running job until it finishes
    Watch { job: String },
    /// Start the analysis for a job and stream it until it finishes
    Analyze { job: String },
    /// Print the stored analysis result as JSON
    Result { job: String },
    /// Print the session record as JSON
    Session { job: String },
    /// Print the session's features as JSON
    Features { job: String },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("failed to encode output: {0}")]
    Output(#[from] serde_json::Error),
    #[error("analysis failed: {0}")]
    JobFailed(String),
    #[error("stream stopped before the job finished (phase {0})")]
    StreamEnded(ConnectionPhase),
    #[error("interrupted")]
    Interrupted,
}

fn load_env() {
    let _ = dotenvy::from_path(concat!(env!("CARGO_MANIFEST_DIR"), "/.env"));
    dotenvy::dotenv().ok();
}

fn config(args: &Args) -> Result<StreamConfig, StreamError> {
    let mut config = StreamConfig::from_env()?;
    if let Some(url) = &args.ws_url {
        config.ws_base_url = url.clone();
    }
    if let Some(url) = &args.api_url {
        config.api_base_url = url.clone();
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    load_env();
    init_observability();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "command failed");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), CliError> {
    let config = config(&args)?;
    let api = AnalysisApi::new(config.clone())?;
    match args.command {
        Command::Watch { job } => {
            let client = spawn_client(config)?;
            let view = follow(&client, JobId::new(job.as_str())).await?;
            finish(&api, &JobId::new(job), view).await
        }
        Command::Analyze { job } => analyze(config, &api, job).await,
        Command::Result { job } => print_json(&api.fetch_result(&JobId::new(job)).await?),
        Command::Session { job } => print_json(&api.fetch_session(&JobId::new(job)).await?),
        Command::Features { job } => print_json(&api.fetch_features(&JobId::new(job)).await?),
    }
}

fn spawn_client(config: StreamConfig) -> Result<StreamClient, StreamError> {
    let transport = Arc::new(WebSocketTransport::from_config(&config));
    StreamClient::spawn(transport, config)
}

/// After the backend answered, how long the stream may take to deliver its
/// terminal event before the summary is printed anyway.
const STREAM_GRACE: Duration = Duration::from_secs(5);

/// Drives the wizard to its analysis page, then streams while the backend
/// runs the job.
async fn analyze(config: StreamConfig, api: &AnalysisApi, job: String) -> Result<(), CliError> {
    let state = wizard::apply(WizardState::default(), WizardAction::SetSession(job));
    let Some(target) = state.stream_target().map(JobId::new) else {
        return Err(StreamError::Validation("no job to stream".into()).into());
    };

    let client = spawn_client(config)?;
    let (view, started) = follow_while(&client, target.clone(), api.start_analysis(&target)).await?;

    let failure = match (&view.error, &started) {
        (Some(message), _) => Some(message.clone()),
        (None, Err(err)) => {
            warn!(job = %target, error = %err, "start analysis request failed");
            Some(err.to_string())
        }
        (None, Ok(_)) => None,
    };
    let state = wizard::apply(state, WizardAction::SetError(failure));
    if let Some(message) = state.error {
        return Err(CliError::JobFailed(message));
    }
    if let Ok(summary) = started {
        print_lines(&summary_lines(&summary));
    }
    Ok(())
}

/// Follows `job` while `start` runs on the backend and returns once both
/// settled. The backend answers only after the job finished, so once it
/// did the stream gets `STREAM_GRACE` to deliver its terminal event.
async fn follow_while<T>(
    client: &StreamClient,
    job: JobId,
    start: impl Future<Output = Result<T, ApiError>>,
) -> Result<(ViewModel, Result<T, ApiError>), CliError> {
    let following = follow(client, job.clone());
    tokio::pin!(start, following);

    let mut started = None;
    let mut grace_until = None;
    let followed = loop {
        tokio::select! {
            result = &mut start, if started.is_none() => {
                let failed = result.is_err();
                started = Some(result);
                if failed {
                    break None;
                }
                grace_until = Some(Instant::now() + STREAM_GRACE);
            }
            _ = wait_until(grace_until) => {
                debug!(job = %job, "stream not terminal after backend finished");
                break None;
            }
            view = &mut following => break Some(view),
        }
    };
    client.disable();

    let view = match followed {
        Some(Ok(view)) => view,
        Some(Err(CliError::StreamEnded(phase))) => {
            debug!(job = %job, %phase, "stream ended early; waiting for backend");
            client.view()
        }
        Some(Err(err)) => return Err(err),
        None => client.view(),
    };
    let started = match started {
        Some(result) => result,
        None => start.await,
    };
    Ok((view, started))
}

/// Streams `job` until its view turns terminal, the stream stops without a
/// terminal event, or the user interrupts.
async fn follow(client: &StreamClient, job: JobId) -> Result<ViewModel, CliError> {
    let mut updates = client.subscribe();
    let mut phases = client.subscribe_phase();
    phases.borrow_and_update();
    let mut printer = ViewPrinter::default();
    info!(job = %job, "following job");
    client.enable(job);

    loop {
        let view = updates.borrow_and_update().clone();
        print_lines(&printer.lines(&view));
        if view.is_terminal() {
            client.disable();
            return Ok(view);
        }
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    return Ok(view);
                }
            }
            changed = phases.changed() => {
                if changed.is_err() {
                    return Ok(view);
                }
                // Any phase change after enable that lands on Idle means the
                // supervisor parked: normal remote close or retries exhausted.
                let phase = *phases.borrow_and_update();
                if phase == ConnectionPhase::Idle && !client.view().is_terminal() {
                    print_lines(&printer.lines(&client.view()));
                    return Err(CliError::StreamEnded(phase));
                }
            }
            _ = tokio::signal::ctrl_c() => {
                client.disable();
                return Err(CliError::Interrupted);
            }
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn finish(api: &AnalysisApi, job: &JobId, view: ViewModel) -> Result<(), CliError> {
    if let Some(message) = &view.error {
        return Err(CliError::JobFailed(message.clone()));
    }
    match api.fetch_result(job).await {
        Ok(summary) => print_lines(&summary_lines(&summary)),
        Err(err) if err.status_code() == Some(404) => {
            println!("{}", view.headline());
        }
        Err(err) => return Err(err.into()),
    }
    Ok(())
}

fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{line}");
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
