use std::path::PathBuf;

use console::style;
use tracing::info;

use crate::archive::FprArchive;
use crate::cli::commands::RemediateArgs;
use crate::errors::AuditError;
use crate::remediation::{RemediationApplier, RemediationMetric};

pub async fn handle_apply_remediations(
    args: RemediateArgs,
    config_path: Option<&str>,
    quiet: bool,
) -> Result<RemediationMetric, AuditError> {
    let config = super::load_config(config_path).await?;
    let source_dir = args
        .source_dir
        .clone()
        .or_else(|| config.remediation.map(|r| r.source_dir))
        .unwrap_or_else(|| ".".to_string());

    let fpr = PathBuf::from(&args.fpr);
    if !fpr.is_file() {
        return Err(AuditError::simple(format!("FPR file not found: {}", fpr.display())));
    }
    let applier = RemediationApplier::new(&source_dir)?;
    info!(fpr = %fpr.display(), source = %applier.source_root().display(), "Applying remediations");

    let metric = tokio::task::spawn_blocking(move || {
        let archive = FprArchive::open(&fpr)?;
        applier.apply_archive(&archive)
    })
    .await
    .map_err(|e| AuditError::Internal(format!("Remediation task failed: {}", e)))??;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&metric)?);
    } else if !quiet {
        println!();
        println!(
            "  {} {} of {} remediations applied",
            style("Remediation:").bold(),
            style(metric.applied_remediations).green().bold(),
            metric.total_remediations
        );
        println!(
            "  {} {} changes applied, {} skipped",
            style("Changes:").bold(),
            metric.changes_applied,
            metric.changes_skipped
        );
        if metric.skipped_remediations > 0 {
            println!(
                "  {} {} remediations could not be located, see the log for details",
                style("!").yellow().bold(),
                metric.skipped_remediations
            );
        }
    }
    Ok(metric)
}
