use std::{future::Future, io, path::PathBuf, sync::Arc};

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use client_core::{
    AsyncOperationController, BatchActionForm, ControllerError, HttpTransport, OperationEvent,
    SelectionChange,
};
use shared::domain::{ItemId, OperationRequest, ProgressReport};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, Settings, CONFIG_FILE};

/// Submit a batch review action and follow its progress until the server
/// reports completion.
#[derive(Parser, Debug)]
#[command(name = "review-batch")]
struct Args {
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    submit_path: Option<String>,
    /// Extra form field sent with the submission, as `name=value`.
    #[arg(long = "field", value_parser = parse_field)]
    fields: Vec<(String, String)>,
    #[arg(long)]
    poll_interval_ms: Option<u64>,
    #[arg(long)]
    max_retries: Option<u32>,
    /// Give up polling after this many seconds; 0 disables the deadline.
    #[arg(long)]
    timeout_secs: Option<u64>,
    #[arg(long, default_value = CONFIG_FILE)]
    config: PathBuf,
    /// Ids of the reviews the action applies to.
    #[arg(required = true)]
    review_ids: Vec<i64>,
}

impl Args {
    fn apply_overrides(&self, mut settings: Settings) -> Settings {
        if let Some(v) = &self.server_url {
            settings.server_url = v.clone();
        }
        if let Some(v) = &self.submit_path {
            settings.submit_path = v.clone();
        }
        if let Some(v) = self.poll_interval_ms {
            settings.poll_interval_ms = v;
        }
        if let Some(v) = self.max_retries {
            settings.max_retries = v;
        }
        if let Some(v) = self.timeout_secs {
            settings.timeout_secs = (v > 0).then_some(v);
        }
        settings
    }

    fn form(&self) -> BatchActionForm<()> {
        let mut form = self
            .fields
            .iter()
            .fold(BatchActionForm::new(), |form, (name, value)| {
                form.with_field(name.clone(), value.clone())
            });
        for id in &self.review_ids {
            form.apply(SelectionChange::Selected(ItemId(*id), ()));
        }
        form
    }
}

fn parse_field(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got `{raw}`"))?;
    if name.trim().is_empty() {
        return Err(format!("field name is empty in `{raw}`"));
    }
    Ok((name.trim().to_string(), value.to_string()))
}

enum Outcome {
    Completed(ProgressReport),
    Failed(ControllerError),
    Cancelled,
}

async fn wait_for_outcome(events: &mut broadcast::Receiver<OperationEvent>) -> Result<Outcome> {
    loop {
        match events.recv().await {
            Ok(OperationEvent::Completed(report)) => return Ok(Outcome::Completed(report)),
            Ok(OperationEvent::Failed(err)) => return Ok(Outcome::Failed(err)),
            Ok(OperationEvent::Cancelled) => return Ok(Outcome::Cancelled),
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "progress events dropped"),
            Err(RecvError::Closed) => return Err(anyhow!("controller event stream closed")),
        }
    }
}

/// Submits `request` and waits for its outcome. `interrupt` resolving at any
/// point, including while the submission is still pending, cancels the
/// operation.
async fn run_batch<I>(
    controller: &Arc<AsyncOperationController>,
    request: OperationRequest,
    interrupt: I,
) -> Result<Outcome>
where
    I: Future<Output = io::Result<()>>,
{
    tokio::pin!(interrupt);
    let mut events = controller.subscribe_events();

    let handle = tokio::select! {
        submitted = controller.submit(request) => submitted.context("batch submission failed")?,
        signal = &mut interrupt => {
            signal.context("failed to listen for ctrl-c")?;
            controller.cancel().await;
            return Ok(Outcome::Cancelled);
        }
    };
    println!("Submitted; polling {handle}");

    tokio::select! {
        outcome = wait_for_outcome(&mut events) => outcome,
        signal = &mut interrupt => {
            signal.context("failed to listen for ctrl-c")?;
            controller.cancel().await;
            Ok(Outcome::Cancelled)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();
    let settings = args.apply_overrides(load_settings(&args.config));

    let request = args
        .form()
        .build_request()
        .context("at least one review id is required")?;
    let transport = HttpTransport::new(&settings.server_url, &settings.submit_path)
        .context("invalid batch endpoint configuration")?;
    info!(
        url = %transport.submit_url(),
        reviews = request.item_ids.len(),
        "starting batch action"
    );

    let controller = AsyncOperationController::new(Arc::new(transport), settings.poll_policy());
    controller
        .on_progress(|report| println!("progress: {:>3}%", report.progress))
        .await;

    match run_batch(&controller, request, tokio::signal::ctrl_c()).await? {
        Outcome::Completed(report) => {
            println!("Batch action complete ({}%)", report.progress);
            Ok(())
        }
        Outcome::Failed(err) => Err(err).context("batch action failed"),
        Outcome::Cancelled => bail!("batch action cancelled"),
    }
}
