//! detect-console: drive a detection job from the terminal.
//!
//! Owns the application store for the lifetime of one command, persists the user identity in a
//! JSON state file and is the only place errors are shown to the user.

use anyhow::Context;
use clap::{Parser, Subcommand};
use detect_flow::{
    DetectApp, DetectConfig, DetectError, DetectPhase, DetectionStatus, FileKeyValueStore,
    ImageType, JobAck, Report, Result,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Report fetch attempts after a finished job came back without one.
const REPORT_RETRIES: u32 = 3;

#[derive(Parser)]
#[command(name = "detect-console")]
#[command(about = "Start a health detection and follow it to completion")]
#[command(version)]
struct Cli {
    /// File holding the persisted user id and profile
    #[arg(long, default_value = "detect-state.json")]
    state_file: PathBuf,

    /// Backend base URL (overrides DETECT_BASE_URL)
    #[arg(long)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a detection from the stored profile data
    Start,

    /// Start a detection from an uploaded MRI or CT image
    Image {
        /// MRI or CT
        #[arg(long)]
        image_type: ImageType,

        /// Id returned by the medical record upload
        #[arg(long)]
        file_id: String,
    },

    /// Print the stored user state
    Status,

    /// Fetch and print the user's medical records
    Records,

    /// Stop any detection and delete all stored user data
    Logout,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "detect_console=info,detect_flow=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = DetectConfig::from_env();
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }
    info!(base_url = %config.base_url, state_file = %cli.state_file.display(), "Starting detect-console");

    let storage = Arc::new(FileKeyValueStore::new(&cli.state_file));
    let app = DetectApp::open(&config, storage)
        .await
        .with_context(|| format!("failed to open state file {}", cli.state_file.display()))?;

    if let Err(err) = run(&app, &config, cli.command).await {
        notify(&err);
        std::process::exit(1);
    }
    Ok(())
}

async fn run(app: &DetectApp, config: &DetectConfig, command: Commands) -> Result<()> {
    match command {
        Commands::Start => {
            let user_id = app.ensure_user_id().await?;
            let ack = app.runner().start(&user_id).await?;
            announce(&ack);
            follow(app, config).await
        }
        Commands::Image {
            image_type,
            file_id,
        } => {
            let user_id = app.ensure_user_id().await?;
            let ack = app
                .runner()
                .start_image(&user_id, image_type, &file_id)
                .await?;
            announce(&ack);
            follow(app, config).await
        }
        Commands::Status => {
            println!("{}", serde_json::to_string_pretty(&app.store().snapshot())?);
            Ok(())
        }
        Commands::Records => {
            let count = app.refresh_medical_records().await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&app.store().medical_records())?
            );
            info!(count, "Medical records loaded");
            Ok(())
        }
        Commands::Logout => {
            app.logout().await?;
            println!("Logged out");
            Ok(())
        }
    }
}

fn announce(ack: &JobAck) {
    println!(
        "{}",
        ack.message.as_deref().unwrap_or("Detection started")
    );
}

/// Print progress until the job settles, then the report.
async fn follow(app: &DetectApp, config: &DetectConfig) -> Result<()> {
    let runner = app.runner();
    let mut updates = app.store().subscribe();
    let mut last_shown: Option<DetectionStatus> = None;

    let settled = runner.settled();
    tokio::pin!(settled);

    let status = loop {
        tokio::select! {
            status = &mut settled => break status,
            changed = updates.changed() => {
                if changed.is_err() {
                    break runner.status();
                }
                let status = updates.borrow_and_update().detect_status;
                if status.status == DetectPhase::Processing && last_shown != Some(status) {
                    println!("Processing... {}%", status.progress);
                    last_shown = Some(status);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                runner.reset();
                return Err(DetectError::Cancelled("Detection cancelled".to_string()));
            }
        }
    };

    match status.status {
        DetectPhase::Finished => {
            let report = match app.store().current_report() {
                Some(report) => report,
                None => retry_report(app, config.poll_interval).await?,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        DetectPhase::Failed => Err(DetectError::rejected(
            runner
                .last_error()
                .unwrap_or_else(|| "Detection failed".to_string()),
        )),
        DetectPhase::Idle | DetectPhase::Processing => Err(DetectError::Cancelled(
            "Detection stopped before it finished".to_string(),
        )),
    }
}

async fn retry_report(app: &DetectApp, delay: Duration) -> Result<Report> {
    let mut attempt = 1;
    loop {
        tokio::time::sleep(delay).await;
        match app.runner().retry_report().await {
            Ok(report) => return Ok(report),
            Err(err) if err.is_transient() && attempt < REPORT_RETRIES => {
                warn!(attempt, error = %err, "Report not available yet");
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// The console's notification surface: one line for the user, full detail in the log.
fn notify(err: &DetectError) {
    error!(error = %err, "Command failed");
    eprintln!("Error: {}", err.user_message());
}
