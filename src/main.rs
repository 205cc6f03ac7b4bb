use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use fpr_audit::audit::AuditStatus;
use fpr_audit::cli::{self, Cli, Commands, LogFormat};
use fpr_audit::config;
use fpr_audit::errors::AuditError;

fn init_logging(cli: &Cli) {
    let log_level = match (cli.quiet, cli.verbose) {
        (true, 0) => "warn",
        (_, 0) => "info",
        (_, 1) => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    match cli.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_ansi(!cli.no_color)
            .with_writer(std::io::stderr)
            .init(),
    }
}

fn exit_code_for(e: &AuditError) -> u8 {
    match e {
        AuditError::Config(_) => 2,
        AuditError::Simple(_) => 3,
        AuditError::Authentication(_) => 4,
        _ => 1,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);
    if cli.no_color {
        console::set_colors_enabled(false);
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            on_signal.cancel();
        }
    });

    let config_path = cli.config.as_deref();
    let result = match cli.command {
        Commands::Audit(args) => cli::audit::handle_audit(args, config_path, cli.quiet, cancel)
            .await
            .map(|r| if r.status == AuditStatus::Failed { 5 } else { 0 }),
        Commands::ApplyRemediations(args) => {
            cli::remediate::handle_apply_remediations(args, config_path, cli.quiet).await.map(|_| 0)
        }
        Commands::FilterSets(args) => cli::inspect::handle_filter_sets(args).await.map(|_| 0),
        Commands::Inspect(args) => cli::inspect::handle_inspect(args).await.map(|_| 0),
        Commands::ValidateConfig(args) => handle_validate(&args.config).await.map(|_| 0),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            let class = e.classify();
            error!(error_type = class.error_type, "{}", e);
            eprintln!("Error: {}", e);
            ExitCode::from(exit_code_for(&e))
        }
    }
}

async fn handle_validate(path: &str) -> Result<(), AuditError> {
    let _config = config::parse_config(std::path::Path::new(path)).await?;
    println!("Configuration is valid: {}", path);
    Ok(())
}
