use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::info;
use tracing_subscriber::EnvFilter;

use wind_repower_era5::cds::{CdsHttpClient, Credentials, transfer};
use wind_repower_era5::config::{ConfigLoader, ResolvedConfig};
use wind_repower_era5::error::FetchError;
use wind_repower_era5::grid::{AcquisitionTask, build_grid};
use wind_repower_era5::orchestrator::{Orchestrator, RunOptions, plan};
use wind_repower_era5::output::{JsonOutput, OutputMode, TextOutput};
use wind_repower_era5::safety::{AllowList, Fingerprint, install_protection, is_known_good};

#[derive(Parser)]
#[command(name = "era5-fetch")]
#[command(about = "Download the ERA5 wind grid for the configured years and months")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download every missing (year, month) file")]
    Fetch(ConfigArgs),
    #[command(about = "Show which files a fetch would download")]
    Plan(ConfigArgs),
    #[command(about = "Print the transfer routine fingerprint and whether it is allow-listed")]
    Fingerprint(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    #[arg(long)]
    config: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<FetchError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &FetchError) -> u8 {
    match error {
        FetchError::MissingConfig
        | FetchError::ConfigRead(_)
        | FetchError::ConfigParse(_)
        | FetchError::ConfigInvalid(_)
        | FetchError::InvalidMonth(_)
        | FetchError::MissingArea
        | FetchError::RegistryRead { .. }
        | FetchError::EmptyRegistry(_)
        | FetchError::MissingCredentials
        | FetchError::InvalidCredentials(_) => 2,
        FetchError::CdsHttp(_) | FetchError::CdsStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };

    match cli.command {
        Commands::Fetch(args) => run_fetch(args, output_mode),
        Commands::Plan(args) => run_plan(args, output_mode),
        Commands::Fingerprint(args) => run_fingerprint(args, output_mode),
    }
}

fn load_tasks(config: &ResolvedConfig) -> Result<Vec<AcquisitionTask>, FetchError> {
    let bbox = config.area.bounding_box()?;
    info!(
        bounding_box = %bbox,
        years = ?config.years,
        months = ?config.months.iter().map(|m| m.number()).collect::<Vec<_>>(),
        "building task grid"
    );
    Ok(build_grid(
        config.years.iter().copied(),
        config.months.iter().copied(),
        &bbox,
        &config.template,
    ))
}

fn run_fetch(args: ConfigArgs, output_mode: OutputMode) -> miette::Result<()> {
    let config = ConfigLoader::resolve(args.config.as_deref())?;
    let tasks = load_tasks(&config)?;

    let credentials = Credentials::resolve(config.api.as_ref())?;
    let mut client = CdsHttpClient::new(credentials)?;
    let protection = install_protection(&mut client, &config.allow_list, config.transfer_timeout)?;
    info!(enabled = protection.is_enabled(), "transfer protection checked");

    let orchestrator = Orchestrator::new(
        client,
        config.dataset.clone(),
        RunOptions {
            max_attempts: config.max_attempts,
            retry_delay: config.retry_delay,
        },
    );

    match output_mode {
        OutputMode::Json => {
            let report = orchestrator.run(&tasks, &JsonOutput)?;
            JsonOutput::print_report(&report).into_diagnostic()?;
        }
        OutputMode::Text => {
            let report = orchestrator.run(&tasks, &TextOutput)?;
            TextOutput::print_summary(&report).into_diagnostic()?;
        }
    }
    Ok(())
}

fn run_plan(args: ConfigArgs, output_mode: OutputMode) -> miette::Result<()> {
    let config = ConfigLoader::resolve(args.config.as_deref())?;
    let tasks = load_tasks(&config)?;
    let report = plan(&tasks);
    match output_mode {
        OutputMode::Json => JsonOutput::print_report(&report).into_diagnostic(),
        OutputMode::Text => TextOutput::print_plan(&report).into_diagnostic(),
    }
}

fn run_fingerprint(args: ConfigArgs, output_mode: OutputMode) -> miette::Result<()> {
    let allow_list = match ConfigLoader::resolve(args.config.as_deref()) {
        Ok(config) => config.allow_list,
        Err(FetchError::MissingConfig) => AllowList::builtin(),
        Err(err) => return Err(err.into()),
    };
    let fingerprint = Fingerprint::of(transfer::SOURCE.as_bytes());
    let allow_listed = is_known_good(&fingerprint, &allow_list);
    match output_mode {
        OutputMode::Json => JsonOutput::print_fingerprint(&fingerprint, allow_listed),
        OutputMode::Text => TextOutput::print_fingerprint(&fingerprint, allow_listed),
    }
    .into_diagnostic()
}
