use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use client_core::{HandoffBundle, HospitalClient};
use shared::domain::{DoctorId, TokenNumber, VisitId};
use storage::Storage;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod config;
mod doctor;
mod patient;

use config::{load_settings, normalize_database_url};

/// Line-oriented operator input.
pub type Input = Lines<BufReader<Stdin>>;

#[derive(Parser, Debug)]
#[command(name = "kiosk", about = "Hospital patient queue kiosk")]
struct Cli {
    /// Hospital service base url; overrides `kiosk.toml` and the environment.
    #[arg(long)]
    api_url: Option<String>,
    #[arg(long)]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Walk a patient through registration, then follow their place in the queue.
    Register,
    /// Follow an existing visit in the queue.
    Track(TrackArgs),
    #[command(subcommand)]
    Doctor(DoctorCommand),
}

#[derive(Args, Debug)]
struct TrackArgs {
    #[arg(long)]
    token: Option<u32>,
    #[arg(long)]
    visit_id: Option<Uuid>,
    #[arg(long)]
    doctor_id: Option<Uuid>,
    /// Queue date, YYYY-MM-DD. Defaults to today.
    #[arg(long)]
    date: Option<NaiveDate>,
    /// Ring when the token is called.
    #[arg(long)]
    alerts: bool,
}

impl From<&TrackArgs> for HandoffBundle {
    fn from(args: &TrackArgs) -> Self {
        HandoffBundle {
            token_number: args.token.map(TokenNumber),
            visit_id: args.visit_id.map(VisitId),
            doctor_id: args.doctor_id.map(DoctorId),
            queue_date: args.date,
            ..HandoffBundle::default()
        }
    }
}

#[derive(Subcommand, Debug)]
enum DoctorCommand {
    /// Sign in by (partial) name and remember the doctor on this machine.
    Login {
        #[arg(trailing_var_arg = true)]
        name: Vec<String>,
    },
    /// Run the call-next / consultation console for the signed-in doctor.
    Console,
    SignOut,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut settings = load_settings();
    if let Some(api_url) = cli.api_url {
        settings.api_base_url = api_url;
    }
    if let Some(database_url) = cli.database_url {
        settings.database_url = database_url;
    }
    let timings = settings.timings();

    let client = Arc::new(
        HospitalClient::new(&settings.api_base_url)
            .with_context(|| format!("invalid hospital api url '{}'", settings.api_base_url))?,
    );
    info!(api = %client.base_url(), "kiosk starting");
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    match cli.command {
        Command::Register => {
            if let Some(bundle) = patient::register(client.clone(), timings, &mut input).await? {
                patient::track(client, timings, bundle, false, &mut input).await?;
            }
        }
        Command::Track(args) => {
            let bundle = HandoffBundle::from(&args);
            patient::track(client, timings, bundle, args.alerts, &mut input).await?;
        }
        Command::Doctor(command) => {
            let storage = open_storage(&settings.database_url).await?;
            match command {
                DoctorCommand::Login { name } => {
                    doctor::login(client.as_ref(), &storage, &name.join(" ")).await;
                }
                DoctorCommand::Console => {
                    doctor::console(client, storage, timings, &mut input).await?;
                }
                DoctorCommand::SignOut => doctor::sign_out(&storage).await?,
            }
        }
    }

    Ok(())
}

async fn open_storage(raw_database_url: &str) -> Result<Storage> {
    let database_url = normalize_database_url(raw_database_url);
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open kiosk state database; verify the path is writable"
        );
        error
    })?;
    storage.health_check().await?;
    Ok(storage)
}
